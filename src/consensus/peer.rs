use async_trait::async_trait;
use log::debug;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::blockchain::Block;
use crate::error::PeerError;

/// What sync needs from a remote replica.
#[async_trait]
pub trait PeerTransport: Send + Sync {
    /// Identifier used in logs and errors.
    fn id(&self) -> &str;

    /// Index of the peer's newest block.
    async fn get_height(&self) -> Result<u64, PeerError>;

    async fn get_block(&self, height: u64) -> Result<Block, PeerError>;

    /// Proof of the peer's block at `height`.
    async fn get_proof(&self, height: u64) -> Result<String, PeerError> {
        Ok(self.get_block(height).await?.proof)
    }
}

/// Body of `GET /api/v1/height/`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeightResponse {
    pub height: u64,
}

/// Peer node reached over its HTTP API.
#[derive(Debug, Clone)]
pub struct HttpPeer {
    base_url: String,
    client: reqwest::Client,
}

impl HttpPeer {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, PeerError> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PeerError::Request {
                peer: base_url.clone(),
                reason: e.to_string(),
            })?;
        Ok(Self { base_url, client })
    }

    fn request_error(&self, e: reqwest::Error) -> PeerError {
        if e.is_timeout() {
            PeerError::Timeout(self.base_url.clone())
        } else {
            PeerError::Request {
                peer: self.base_url.clone(),
                reason: e.to_string(),
            }
        }
    }
}

#[async_trait]
impl PeerTransport for HttpPeer {
    fn id(&self) -> &str {
        &self.base_url
    }

    async fn get_height(&self) -> Result<u64, PeerError> {
        let url = format!("{}/api/v1/height/", self.base_url);
        debug!("GET {url}");
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| self.request_error(e))?;
        let body: HeightResponse = resp.json().await.map_err(|e| self.request_error(e))?;
        Ok(body.height)
    }

    async fn get_block(&self, height: u64) -> Result<Block, PeerError> {
        let url = format!("{}/api/v1/blocks/{}/", self.base_url, height);
        debug!("GET {url}");
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| self.request_error(e))?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Err(PeerError::NotFound {
                peer: self.base_url.clone(),
                height,
            });
        }
        let resp = resp.error_for_status().map_err(|e| self.request_error(e))?;
        resp.json::<Block>().await.map_err(|e| self.request_error(e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_is_normalized() {
        let peer = HttpPeer::new("http://127.0.0.1:8080/", Duration::from_millis(100)).unwrap();
        assert_eq!(peer.id(), "http://127.0.0.1:8080");
    }
}
