use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use reqwest::{Client, Response};
use serde::Serialize;
use serde::de::DeserializeOwned;

use super::{API_PREFIX, PeerClient};
use crate::blockchain::{Block, ChainSnapshot};
use crate::error::{LedgerError, Result};
use crate::message::{Introduction, KeepAlive, PeerUpdate, RegisterReply, SignedEnvelope};
use crate::transaction::Transaction;

/// `PeerClient` over the JSON HTTP routes served by `api`. Every request is
/// bounded by the configured timeout.
pub struct HttpPeerClient {
    client: Client,
}

impl HttpPeerClient {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .map_err(|e| LedgerError::Config(format!("http client: {e}")))?;
        Ok(Self { client })
    }

    fn url(peer: &str, route: &str) -> String {
        format!("{}{API_PREFIX}/{route}", peer.trim_end_matches('/'))
    }

    async fn post<B: Serialize + Sync>(&self, peer: &str, route: &str, body: &B) -> Result<Response> {
        let url = Self::url(peer, route);
        debug!("POST {url}");
        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| LedgerError::unreachable(peer, e))?;
        check_status(peer, response).await
    }

    async fn get<R: DeserializeOwned>(&self, peer: &str, route: &str) -> Result<R> {
        let url = Self::url(peer, route);
        debug!("GET {url}");
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| LedgerError::unreachable(peer, e))?;
        check_status(peer, response)
            .await?
            .json()
            .await
            .map_err(|e| LedgerError::unreachable(peer, e))
    }
}

async fn check_status(peer: &str, response: Response) -> Result<Response> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    Err(LedgerError::Rejected {
        addr: peer.to_string(),
        reason: format!("{status}: {body}"),
    })
}

#[async_trait]
impl PeerClient for HttpPeerClient {
    async fn register(
        &self,
        peer: &str,
        intro: &Introduction,
    ) -> Result<SignedEnvelope<RegisterReply>> {
        self.post(peer, "register_node", intro)
            .await?
            .json()
            .await
            .map_err(|e| LedgerError::unreachable(peer, e))
    }

    async fn keep_alive(&self, peer: &str, msg: &SignedEnvelope<KeepAlive>) -> Result<()> {
        self.post(peer, "keep_alive", msg).await.map(drop)
    }

    async fn update_peers(&self, peer: &str, msg: &SignedEnvelope<PeerUpdate>) -> Result<()> {
        self.post(peer, "update_peers", msg).await.map(drop)
    }

    async fn announce_transaction(&self, peer: &str, tx: &Transaction) -> Result<()> {
        self.post(peer, "announce_transaction", tx).await.map(drop)
    }

    async fn announce_block(&self, peer: &str, block: &Block) -> Result<()> {
        self.post(peer, "add_block", block).await.map(drop)
    }

    async fn fetch_chain(&self, peer: &str) -> Result<ChainSnapshot> {
        self.get(peer, "chain").await
    }
}
