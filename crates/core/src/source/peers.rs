//! HTTP peer client: broadcast polls and per-request failover.
//!
//! Every request is a POST body against a peer base URL. A failed request
//! is retried against the next peer of the set; only when the whole set has
//! failed does the error reach the caller.

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PeerError {
    #[error("http: {0}")]
    Http(#[from] reqwest::Error),
    #[error("peer {peer} answered status {status}")]
    Status { peer: String, status: u16 },
    #[error("peer set exhausted: {last}")]
    Exhausted { last: String },
    #[error("no peers configured")]
    NoPeers,
}

#[derive(Clone)]
pub struct PeerClient {
    client: reqwest::Client,
    peers: Vec<String>,
}

impl PeerClient {
    pub fn new(peers: Vec<String>, timeout: Duration) -> PeerClient {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("reqwest client construction cannot fail with these options");
        PeerClient { client, peers }
    }

    pub fn peers(&self) -> &[String] {
        &self.peers
    }

    pub async fn request_one(&self, peer: &str, body: String) -> Result<Vec<u8>, PeerError> {
        let response = self.client.post(peer).body(body).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(PeerError::Status {
                peer: peer.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(response.bytes().await?.to_vec())
    }

    /// Sends `body` to every peer concurrently; per-peer results.
    pub async fn broadcast(&self, body: &str) -> Vec<(String, Result<Vec<u8>, PeerError>)> {
        let calls = self.peers.iter().map(|peer| {
            let body = body.to_string();
            async move {
                let result = self.request_one(peer, body).await;
                (peer.clone(), result)
            }
        });
        futures::future::join_all(calls).await
    }

    /// Runs one request against `servers`, starting at `start_index` and
    /// rotating to the next server on each failure.
    pub async fn request_failover(
        &self,
        body: &str,
        servers: &[String],
        start_index: usize,
    ) -> Result<Vec<u8>, PeerError> {
        if servers.is_empty() {
            return Err(PeerError::NoPeers);
        }
        let mut last_error = None;
        for attempt in 0..servers.len() {
            let peer = &servers[(start_index + attempt) % servers.len()];
            match self.request_one(peer, body.to_string()).await {
                Ok(response) => return Ok(response),
                Err(err) => {
                    tracing::debug!(peer = %peer, error = %err, "peer request failed, rotating");
                    last_error = Some(err);
                }
            }
        }
        Err(PeerError::Exhausted {
            last: last_error
                .map(|err| err.to_string())
                .unwrap_or_else(|| "no attempts made".to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httptest::{matchers::*, responders::*, Expectation, Server};

    #[tokio::test]
    async fn failover_rotates_to_healthy_peer() {
        let bad = Server::run();
        bad.expect(
            Expectation::matching(request::method_path("POST", "/"))
                .times(1..)
                .respond_with(status_code(500)),
        );
        let good = Server::run();
        good.expect(
            Expectation::matching(request::method_path("POST", "/"))
                .respond_with(status_code(200).body("ok")),
        );

        let servers = vec![bad.url("/").to_string(), good.url("/").to_string()];
        let client = PeerClient::new(servers.clone(), Duration::from_secs(2));
        let response = client.request_failover("{}", &servers, 0).await.unwrap();
        assert_eq!(response, b"ok");
    }

    #[tokio::test]
    async fn exhausted_set_is_an_error() {
        let bad = Server::run();
        bad.expect(
            Expectation::matching(request::method_path("POST", "/"))
                .times(1..)
                .respond_with(status_code(503)),
        );
        let servers = vec![bad.url("/").to_string()];
        let client = PeerClient::new(servers.clone(), Duration::from_secs(2));
        let err = client.request_failover("{}", &servers, 0).await.unwrap_err();
        assert!(matches!(err, PeerError::Exhausted { .. }));
    }

    #[tokio::test]
    async fn broadcast_collects_per_peer_results() {
        let one = Server::run();
        one.expect(
            Expectation::matching(request::method_path("POST", "/"))
                .respond_with(status_code(200).body("a")),
        );
        let two = Server::run();
        two.expect(
            Expectation::matching(request::method_path("POST", "/"))
                .respond_with(status_code(404)),
        );
        let client = PeerClient::new(
            vec![one.url("/").to_string(), two.url("/").to_string()],
            Duration::from_secs(2),
        );
        let results = client.broadcast("{}").await;
        assert_eq!(results.len(), 2);
        assert!(results[0].1.is_ok());
        assert!(results[1].1.is_err());
    }
}
