//! Error types for the head panel
//!
//! Two layers: [`NodeError`] describes what went wrong talking to one party's
//! node, [`PanelError`] is what the panel API hands back to its callers.
//! [`ErrorClass`] turns raw node error text into the message a viewer sees.

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Display budget for unclassified error text.
pub const MAX_ERROR_DISPLAY_CHARS: usize = 120;

/// Failure talking to a single party's node
#[derive(Error, Debug, Clone, PartialEq)]
pub enum NodeError {
    #[error("Node unreachable: {0}")]
    Unreachable(String),

    #[error("HTTP {status_code}: {message}")]
    Transport { status_code: u16, message: String },

    #[error("Malformed response: {0}")]
    Malformed(String),

    #[error("{0}")]
    Rejected(String),

    #[error("Event stream closed")]
    StreamClosed,
}

impl NodeError {
    /// Connectivity failures are displayed as "disconnected", never as errors
    pub fn is_connectivity(&self) -> bool {
        matches!(self, NodeError::Unreachable(_) | NodeError::StreamClosed)
    }

    /// Raw text carried by the error, used for classification
    pub fn raw_message(&self) -> &str {
        match self {
            NodeError::Unreachable(m)
            | NodeError::Malformed(m)
            | NodeError::Rejected(m)
            | NodeError::Transport { message: m, .. } => m,
            NodeError::StreamClosed => "event stream closed",
        }
    }

    pub fn class(&self) -> ErrorClass {
        ErrorClass::classify(self.raw_message())
    }
}

impl From<reqwest::Error> for NodeError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_connect() || e.is_timeout() {
            NodeError::Unreachable(e.to_string())
        } else if e.is_decode() {
            NodeError::Malformed(e.to_string())
        } else {
            NodeError::Transport {
                status_code: e.status().map(|s| s.as_u16()).unwrap_or(0),
                message: e.to_string(),
            }
        }
    }
}

/// Result type for node capabilities
pub type NodeResult<T> = Result<T, NodeError>;

/// Main error type for the panel
#[derive(Error, Debug)]
pub enum PanelError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Party {party} is not tracked")]
    UnknownParty { party: String },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("UTXO {utxo_ref} is not spendable by {party}")]
    UtxoNotSpendable { party: String, utxo_ref: String },

    #[error("Node error for party {party}: {source}")]
    Node {
        party: String,
        #[source]
        source: NodeError,
    },
}

impl PanelError {
    /// Fatal input errors are rejected before any network call
    pub fn is_fatal_input(&self) -> bool {
        matches!(
            self,
            PanelError::UnknownParty { .. }
                | PanelError::InvalidRequest(_)
                | PanelError::UtxoNotSpendable { .. }
        )
    }

    /// Message shown to the viewer
    pub fn user_message(&self) -> String {
        match self {
            PanelError::Node { source, .. } => source.class().user_message(source.raw_message()),
            other => truncate_message(&other.to_string()),
        }
    }
}

/// Result type for panel operations
pub type PanelResult<T> = Result<T, PanelError>;

/// Recognized families of protocol errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// The head is not ready to accept the commit yet
    ScriptNotReady,
    /// Fee or collateral could not be covered
    InsufficientFunds,
    /// Inputs are unknown or already spent
    BadInputs,
    Unclassified,
}

lazy_static! {
    static ref SCRIPT_ERROR: Regex =
        Regex::new(r"(?i)script\s*(error|fail)|ScriptFailedInWallet|ValidationTagMismatch")
            .unwrap();
    static ref INSUFFICIENT_FUNDS: Regex = Regex::new(
        r"(?i)insufficient|NotEnoughFunds|FeeTooSmall|fee too small|collateral"
    )
    .unwrap();
    static ref BAD_INPUTS: Regex = Regex::new(
        r"(?i)BadInputs|already spent|input.{0,40}(not found|unknown|spent)"
    )
    .unwrap();
}

impl ErrorClass {
    pub fn classify(raw: &str) -> Self {
        if SCRIPT_ERROR.is_match(raw) {
            ErrorClass::ScriptNotReady
        } else if INSUFFICIENT_FUNDS.is_match(raw) {
            ErrorClass::InsufficientFunds
        } else if BAD_INPUTS.is_match(raw) {
            ErrorClass::BadInputs
        } else {
            ErrorClass::Unclassified
        }
    }

    pub fn user_message(&self, raw: &str) -> String {
        match self {
            ErrorClass::ScriptNotReady => {
                "The head is not ready to accept this commit yet. Wait for initialization to settle and try again.".to_string()
            }
            ErrorClass::InsufficientFunds => {
                "Not enough funds to cover the fee or collateral for this transaction.".to_string()
            }
            ErrorClass::BadInputs => {
                "The selected UTXO is unknown or already spent. Refresh and pick another one.".to_string()
            }
            ErrorClass::Unclassified => truncate_message(raw),
        }
    }
}

/// Normalize raw error text for display
pub fn normalize_message(raw: &str) -> String {
    ErrorClass::classify(raw).user_message(raw)
}

/// Cut a message to the display budget, appending an ellipsis when cut
pub fn truncate_message(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.chars().count() <= MAX_ERROR_DISPLAY_CHARS {
        return trimmed.to_string();
    }
    let mut out: String = trimmed.chars().take(MAX_ERROR_DISPLAY_CHARS).collect();
    out.push_str("...");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_signatures() {
        assert_eq!(
            ErrorClass::classify("ScriptFailedInWallet: redeemer missing"),
            ErrorClass::ScriptNotReady
        );
        assert_eq!(
            ErrorClass::classify("Script error while validating"),
            ErrorClass::ScriptNotReady
        );
        assert_eq!(
            ErrorClass::classify("FeeTooSmallUTxO {minimum = 170000}"),
            ErrorClass::InsufficientFunds
        );
        assert_eq!(
            ErrorClass::classify("InsufficientCollateral"),
            ErrorClass::InsufficientFunds
        );
        assert_eq!(
            ErrorClass::classify("BadInputsUTxO (fromList [abc#0])"),
            ErrorClass::BadInputs
        );
        assert_eq!(ErrorClass::classify("boom"), ErrorClass::Unclassified);
    }

    #[test]
    fn test_truncate_long_message() {
        let raw = "x".repeat(300);
        let shown = normalize_message(&raw);
        assert_eq!(shown.chars().count(), MAX_ERROR_DISPLAY_CHARS + 3);
        assert!(shown.ends_with("..."));

        assert_eq!(normalize_message("  short  "), "short");
    }

    #[test]
    fn test_canned_messages_replace_raw_text() {
        let shown = normalize_message("BadInputsUTxO with a very long payload");
        assert!(shown.contains("already spent"));
        assert!(!shown.contains("payload"));
    }

    #[test]
    fn test_connectivity_predicate() {
        assert!(NodeError::Unreachable("refused".into()).is_connectivity());
        assert!(!NodeError::Transport {
            status_code: 500,
            message: "oops".into()
        }
        .is_connectivity());
    }

    #[test]
    fn test_fatal_input_predicate() {
        assert!(PanelError::InvalidRequest("amount".into()).is_fatal_input());
        assert!(!PanelError::Config("missing".into()).is_fatal_input());
    }
}
