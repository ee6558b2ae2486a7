//! UTXO identity and per-party UTXO sets

use crate::error::{NodeError, NodeResult, PanelError};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::str::FromStr;

/// `txHash#index` reference, stable across fetches
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct UtxoRef(String);

impl UtxoRef {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn tx_hash(&self) -> &str {
        self.0.split_once('#').map(|(hash, _)| hash).unwrap_or(&self.0)
    }

    pub fn index(&self) -> u32 {
        self.0
            .split_once('#')
            .and_then(|(_, ix)| ix.parse().ok())
            .unwrap_or(0)
    }
}

impl FromStr for UtxoRef {
    type Err = PanelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (hash, index) = s
            .split_once('#')
            .ok_or_else(|| PanelError::InvalidRequest(format!("UTXO reference {:?} lacks '#'", s)))?;

        if hash.is_empty() || !hash.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(PanelError::InvalidRequest(format!(
                "UTXO reference {:?} has an invalid transaction hash",
                s
            )));
        }
        if index.parse::<u32>().is_err() {
            return Err(PanelError::InvalidRequest(format!(
                "UTXO reference {:?} has an invalid output index",
                s
            )));
        }

        Ok(Self(s.to_string()))
    }
}

impl TryFrom<String> for UtxoRef {
    type Error = PanelError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<UtxoRef> for String {
    fn from(value: UtxoRef) -> Self {
        value.0
    }
}

impl fmt::Display for UtxoRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One unspent output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Utxo {
    pub utxo_ref: UtxoRef,
    pub address: String,
    /// Asset key → quantity. Native assets are keyed `policy.name`.
    pub amounts: BTreeMap<String, u64>,
}

impl Utxo {
    pub fn lovelace(&self) -> u64 {
        self.amounts.get("lovelace").copied().unwrap_or(0)
    }
}

/// All outputs a party holds, keyed by reference
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UtxoSet(BTreeMap<UtxoRef, Utxo>);

impl UtxoSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, utxo: Utxo) {
        self.0.insert(utxo.utxo_ref.clone(), utxo);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, utxo_ref: &UtxoRef) -> Option<&Utxo> {
        self.0.get(utxo_ref)
    }

    pub fn contains(&self, utxo_ref: &UtxoRef) -> bool {
        self.0.contains_key(utxo_ref)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Utxo> {
        self.0.values()
    }

    pub fn refs(&self) -> impl Iterator<Item = &UtxoRef> {
        self.0.keys()
    }

    /// Content comparison: key count first, then full structural equality
    pub fn same_content(&self, other: &UtxoSet) -> bool {
        self.0.len() == other.0.len() && self.0 == other.0
    }

    /// Outputs not currently being spent
    pub fn spendable(&self, sending: &HashSet<UtxoRef>) -> Vec<Utxo> {
        self.0
            .values()
            .filter(|u| !sending.contains(&u.utxo_ref))
            .cloned()
            .collect()
    }

    pub fn total_lovelace(&self) -> u64 {
        self.0.values().map(Utxo::lovelace).sum()
    }

    /// Parse the node's snapshot UTXO JSON:
    /// `{"<hash>#<ix>": {"address": "...", "value": {"lovelace": n, "<policy>": {"<name>": q}}}}`
    pub fn from_node_json(value: &Value) -> NodeResult<Self> {
        let entries = value
            .as_object()
            .ok_or_else(|| NodeError::Malformed("UTXO response is not an object".to_string()))?;

        let mut set = UtxoSet::new();
        for (key, output) in entries {
            let utxo_ref: UtxoRef = key
                .parse()
                .map_err(|e: PanelError| NodeError::Malformed(e.to_string()))?;
            let address = output
                .get("address")
                .and_then(Value::as_str)
                .ok_or_else(|| NodeError::Malformed(format!("UTXO {} has no address", key)))?
                .to_string();

            let mut amounts = BTreeMap::new();
            match output.get("value") {
                Some(Value::Number(n)) => {
                    amounts.insert("lovelace".to_string(), quantity(n, key)?);
                }
                Some(Value::Object(assets)) => {
                    for (asset, amount) in assets {
                        match amount {
                            Value::Number(n) => {
                                amounts.insert(asset.clone(), quantity(n, key)?);
                            }
                            Value::Object(names) => {
                                for (name, q) in names {
                                    let n = q.as_u64().ok_or_else(|| {
                                        NodeError::Malformed(format!("Bad quantity in UTXO {}", key))
                                    })?;
                                    amounts.insert(format!("{}.{}", asset, name), n);
                                }
                            }
                            _ => {
                                return Err(NodeError::Malformed(format!(
                                    "Bad asset {} in UTXO {}",
                                    asset, key
                                )))
                            }
                        }
                    }
                }
                _ => return Err(NodeError::Malformed(format!("UTXO {} has no value", key))),
            }

            set.insert(Utxo {
                utxo_ref,
                address,
                amounts,
            });
        }

        Ok(set)
    }
}

fn quantity(n: &serde_json::Number, key: &str) -> NodeResult<u64> {
    n.as_u64()
        .ok_or_else(|| NodeError::Malformed(format!("Bad quantity in UTXO {}", key)))
}

impl FromIterator<Utxo> for UtxoSet {
    fn from_iter<I: IntoIterator<Item = Utxo>>(iter: I) -> Self {
        let mut set = UtxoSet::new();
        for utxo in iter {
            set.insert(utxo);
        }
        set
    }
}
