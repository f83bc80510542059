//! JSON-RPC client for the nano node, with redundant endpoint pools.
//!
//! Block processing and work generation each go to their own ordered pool of endpoints. An endpoint that times out,
//! refuses the connection or returns an `error` body is skipped and the next one is tried; only once the whole pool
//! has failed does the call return an error, carrying the last failure for diagnosis.

use std::time::Duration;

use log::*;
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::json;
use url::Url;

use crate::{
    db_types::BlockHash,
    node::{
        wallet::StateBlock,
        work::{validate_work, WorkError, WorkThreshold},
    },
};

#[derive(Debug, thiserror::Error)]
pub enum NodeClientError {
    #[error("No {0} endpoints configured")]
    NoEndpoints(&'static str),
    #[error("Invalid endpoint URL '{0}': {1}")]
    InvalidEndpoint(String, String),
    #[error("Node returned an error: {0}")]
    NodeError(String),
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Unexpected response shape: {0}")]
    BadResponse(String),
    #[error("The node did not return a work value")]
    MissingWork,
    #[error(transparent)]
    InvalidWork(#[from] WorkError),
    #[error("All {attempts} endpoints failed. Last error: {last}")]
    EndpointsExhausted { attempts: usize, last: String },
}

#[derive(Debug, Deserialize)]
struct ProcessResponse {
    hash: String,
}

#[derive(Debug, Deserialize)]
struct WorkGenerateResponse {
    work: Option<String>,
}

#[derive(Clone, Debug)]
pub struct NodeRpcClient {
    rpc_urls: Vec<Url>,
    work_urls: Vec<Url>,
    timeout: Duration,
    http: reqwest::Client,
}

impl NodeRpcClient {
    pub fn new(rpc_urls: &[String], work_urls: &[String], timeout: Duration) -> Result<Self, NodeClientError> {
        let rpc_urls = parse_pool(rpc_urls, "RPC")?;
        let work_urls = parse_pool(work_urls, "work")?;
        let http = reqwest::Client::new();
        Ok(Self { rpc_urls, work_urls, timeout, http })
    }

    /// Submit a signed block. The confirmation hash echoed by the node must match `expected`, otherwise the
    /// submission is treated as failed: a node that confirms a different hash than the one we computed is either
    /// broken or hostile, and the wallet must not record its result as our new frontier.
    pub async fn process(&self, block: &StateBlock, expected: &BlockHash) -> Result<BlockHash, NodeClientError> {
        let body = json!({
            "action": "process",
            "json_block": "true",
            "block": block,
        });
        let response: ProcessResponse = self.post_pool(&body, PoolKind::Rpc).await?;
        let confirmed = BlockHash::from(response.hash);
        if &confirmed != expected {
            return Err(NodeClientError::BadResponse(format!(
                "Block hash mismatch: node confirmed {confirmed}, expected {expected}"
            )));
        }
        Ok(confirmed)
    }

    /// Request proof-of-work for `root` from the work pool and validate it locally against `threshold` before
    /// returning it. Missing or forged work is a hard error.
    pub async fn work_generate(&self, root: &BlockHash, threshold: WorkThreshold) -> Result<String, NodeClientError> {
        let body = json!({
            "action": "work_generate",
            "hash": root,
            "difficulty": threshold.to_string(),
        });
        let response: WorkGenerateResponse = self.post_pool(&body, PoolKind::Work).await?;
        let work = response.work.ok_or(NodeClientError::MissingWork)?;
        let achieved = validate_work(&work, root, threshold)?;
        trace!("⚙️ Work {work} for root {root} achieved difficulty {achieved:016x}");
        Ok(work)
    }

    async fn post_pool<T: DeserializeOwned>(
        &self,
        body: &serde_json::Value,
        pool: PoolKind,
    ) -> Result<T, NodeClientError> {
        let urls = match pool {
            PoolKind::Rpc => &self.rpc_urls,
            PoolKind::Work => &self.work_urls,
        };
        let mut last = String::new();
        for (i, url) in urls.iter().enumerate() {
            match self.post_one(url, body).await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    warn!("📡️ {pool:?} endpoint {url} failed ({} of {}): {e}", i + 1, urls.len());
                    last = e.to_string();
                },
            }
        }
        Err(NodeClientError::EndpointsExhausted { attempts: urls.len(), last })
    }

    async fn post_one<T: DeserializeOwned>(
        &self,
        url: &Url,
        body: &serde_json::Value,
    ) -> Result<T, NodeClientError> {
        let response = self
            .http
            .post(url.clone())
            .timeout(self.timeout)
            .json(body)
            .send()
            .await
            .map_err(|e| NodeClientError::Transport(e.to_string()))?;
        let value: serde_json::Value =
            response.json().await.map_err(|e| NodeClientError::BadResponse(e.to_string()))?;
        if let Some(err) = value.get("error") {
            let message = err.as_str().map(String::from).unwrap_or_else(|| err.to_string());
            return Err(NodeClientError::NodeError(message));
        }
        serde_json::from_value(value).map_err(|e| NodeClientError::BadResponse(e.to_string()))
    }
}

#[derive(Debug, Clone, Copy)]
enum PoolKind {
    Rpc,
    Work,
}

fn parse_pool(urls: &[String], kind: &'static str) -> Result<Vec<Url>, NodeClientError> {
    if urls.is_empty() {
        return Err(NodeClientError::NoEndpoints(kind));
    }
    urls.iter()
        .map(|u| Url::parse(u.trim()).map_err(|e| NodeClientError::InvalidEndpoint(u.clone(), e.to_string())))
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::node::constants::DEFAULT_RPC_TIMEOUT;

    #[test]
    fn endpoint_pools_are_validated() {
        let good = vec!["http://localhost:7076".to_string()];
        let work = vec!["http://localhost:7077".to_string()];
        assert!(NodeRpcClient::new(&good, &work, DEFAULT_RPC_TIMEOUT).is_ok());

        let err = NodeRpcClient::new(&[], &work, DEFAULT_RPC_TIMEOUT).unwrap_err();
        assert!(matches!(err, NodeClientError::NoEndpoints("RPC")));

        let bad = vec!["not a url".to_string()];
        let err = NodeRpcClient::new(&bad, &work, DEFAULT_RPC_TIMEOUT).unwrap_err();
        assert!(matches!(err, NodeClientError::InvalidEndpoint(..)));
    }
}
