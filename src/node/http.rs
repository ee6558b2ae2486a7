//! HTTP + WebSocket node client

use super::{EventStream, HeadNode, TxId};
use crate::config::PartyConfig;
use crate::error::{NodeError, NodeResult};
use crate::events::HeadStatus;
use crate::state::{UtxoRef, UtxoSet};

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Response, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubmitResponse {
    tx_id: String,
}

/// Talks to one party's node over its HTTP API and push WebSocket
pub struct HttpHeadNode {
    party: String,
    client: reqwest::Client,
    api_url: String,
    ws_url: String,
}

impl HttpHeadNode {
    pub fn new(party: &str, config: &PartyConfig) -> NodeResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .connect_timeout(CONNECT_TIMEOUT)
            .no_proxy()
            .build()
            .map_err(|e| NodeError::Malformed(format!("HTTP client: {}", e)))?;

        Ok(Self {
            party: party.to_string(),
            client,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            ws_url: config.ws_url(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.api_url, path)
    }

    /// Map non-2xx responses to errors, keeping the body text verbatim
    async fn check(response: Response) -> NodeResult<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let message = if body.is_empty() {
            status.canonical_reason().unwrap_or("request failed").to_string()
        } else {
            body
        };

        if status.is_client_error() {
            Err(NodeError::Rejected(message))
        } else {
            Err(NodeError::Transport {
                status_code: status.as_u16(),
                message,
            })
        }
    }

    async fn post_submit(&self, path: &str, body: Value) -> NodeResult<TxId> {
        let response = self.client.post(self.url(path)).json(&body).send().await?;
        let response = Self::check(response).await?;
        let parsed: SubmitResponse = response
            .json()
            .await
            .map_err(|e| NodeError::Malformed(e.to_string()))?;
        Ok(TxId(parsed.tx_id))
    }
}

#[async_trait]
impl HeadNode for HttpHeadNode {
    async fn query_status(&self) -> NodeResult<Option<HeadStatus>> {
        let response = match self.client.get(self.url("/status")).send().await {
            Ok(r) => r,
            Err(e) => {
                let err = NodeError::from(e);
                if err.is_connectivity() {
                    debug!("Status query for {}: node unreachable", self.party);
                    return Ok(None);
                }
                return Err(err);
            }
        };

        if matches!(
            response.status(),
            StatusCode::SERVICE_UNAVAILABLE | StatusCode::GATEWAY_TIMEOUT
        ) {
            return Ok(None);
        }

        let response = Self::check(response).await?;
        let body: Value = response
            .json()
            .await
            .map_err(|e| NodeError::Malformed(e.to_string()))?;

        if body.is_null() {
            return Ok(None);
        }

        HeadStatus::from_node_value(&body)
            .map(Some)
            .ok_or_else(|| NodeError::Malformed(format!("Unrecognized status payload: {}", body)))
    }

    async fn subscribe_events(&self) -> NodeResult<EventStream> {
        let (ws, _) = connect_async(self.ws_url.as_str())
            .await
            .map_err(|e| NodeError::Unreachable(format!("WS connect {}: {}", self.ws_url, e)))?;
        info!("Push channel connected for {}", self.party);

        let party = self.party.clone();
        let stream = ws.filter_map(move |msg| {
            let party = party.clone();
            async move {
                match msg {
                    Ok(Message::Text(text)) => match serde_json::from_str::<Value>(&text) {
                        Ok(value) => HeadStatus::from_node_value(&value).map(Ok),
                        Err(e) => {
                            debug!("Unparseable push message for {}: {}", party, e);
                            None
                        }
                    },
                    Ok(Message::Close(_)) => Some(Err(NodeError::StreamClosed)),
                    Ok(_) => None,
                    Err(e) => Some(Err(NodeError::Unreachable(e.to_string()))),
                }
            }
        });

        Ok(stream.boxed())
    }

    async fn fetch_utxo_set(&self) -> NodeResult<UtxoSet> {
        let response = self.client.get(self.url("/snapshot/utxo")).send().await?;
        let response = Self::check(response).await?;
        let body: Value = response
            .json()
            .await
            .map_err(|e| NodeError::Malformed(e.to_string()))?;
        UtxoSet::from_node_json(&body)
    }

    async fn submit_transfer(
        &self,
        from: &UtxoRef,
        to_address: &str,
        amount: u64,
    ) -> NodeResult<TxId> {
        self.post_submit(
            "/transfer",
            json!({
                "utxoRef": from.as_str(),
                "toAddress": to_address,
                "amount": amount,
            }),
        )
        .await
    }

    async fn submit_commit(&self, utxo_ref: &UtxoRef) -> NodeResult<TxId> {
        self.post_submit("/commit", json!({ "utxoRef": utxo_ref.as_str() }))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn party_config(api_url: &str) -> PartyConfig {
        PartyConfig {
            name: "Alice".to_string(),
            api_url: api_url.to_string(),
            ws_url: None,
            address: "addr_test1alice".to_string(),
            enabled: true,
        }
    }

    #[test]
    fn test_urls_are_normalized() {
        let node = HttpHeadNode::new("alice", &party_config("http://127.0.0.1:4001/")).unwrap();
        assert_eq!(node.url("/status"), "http://127.0.0.1:4001/status");
        assert_eq!(node.ws_url, "ws://127.0.0.1:4001/");
    }

    #[tokio::test]
    async fn test_unreachable_node_has_no_status() {
        // Port 9 (discard) is not expected to run an HTTP server locally
        let node = HttpHeadNode::new("alice", &party_config("http://127.0.0.1:9")).unwrap();
        assert_eq!(node.query_status().await, Ok(None));
    }
}
