//! Client of the external contract execution oracle.
//!
//! The oracle compiles and runs contract transactions; the node only
//! forwards the raw transaction with its signature material and persists
//! whatever state comes back.

use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use thiserror::Error;
use torrent_node_types::{Address, ContractErrorKind, ContractState};

#[derive(Debug, Error)]
pub enum OracleError {
    #[error("oracle http: {0}")]
    Http(#[from] reqwest::Error),
    #[error("oracle answered status {0}")]
    Status(u16),
    #[error("oracle response malformed: {0}")]
    Malformed(String),
    /// 1000-1999: the producer shipped a transaction the oracle rejects at
    /// protocol level. The node must not continue past this.
    #[error("oracle user error {code}: {message}")]
    UserError { code: i64, message: String },
}

#[derive(Debug, Deserialize)]
struct OracleResult {
    state: String,
    address: String,
    #[serde(default)]
    contractdump: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct OracleErrorBody {
    code: i64,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct OracleEnvelope {
    result: Option<OracleResult>,
    error: Option<OracleErrorBody>,
}

#[derive(Clone)]
pub struct OracleClient {
    client: reqwest::Client,
    base_url: String,
}

impl OracleClient {
    pub fn new(base_url: String, timeout: Duration) -> OracleClient {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("reqwest client construction cannot fail with these options");
        OracleClient { client, base_url }
    }

    /// Init-time reachability probe; an unreachable oracle aborts startup
    /// before ingestion begins.
    pub async fn health_check(&self) -> Result<(), OracleError> {
        let response = self.client.get(&self.base_url).send().await?;
        // Any HTTP answer proves the endpoint is alive; the oracle may not
        // serve GET with a success status.
        let _ = response.status();
        Ok(())
    }

    pub async fn compile(
        &self,
        raw_tx: &[u8],
        sign: &[u8],
        pubkey: &[u8],
        address: &Address,
    ) -> Result<ContractState, OracleError> {
        self.call("compile", raw_tx, sign, pubkey, address, "").await
    }

    pub async fn run(
        &self,
        raw_tx: &[u8],
        sign: &[u8],
        pubkey: &[u8],
        address: &Address,
        prev_state: &str,
    ) -> Result<ContractState, OracleError> {
        self.call("cmdrun", raw_tx, sign, pubkey, address, prev_state)
            .await
    }

    async fn call(
        &self,
        act: &str,
        raw_tx: &[u8],
        sign: &[u8],
        pubkey: &[u8],
        address: &Address,
        prev_state: &str,
    ) -> Result<ContractState, OracleError> {
        let body = json!({
            "id": 1,
            "version": "1.0.0",
            "method": act,
            "params": {
                "transaction": hex::encode(raw_tx),
                "sign": hex::encode(sign),
                "pubkey": hex::encode(pubkey),
                "address": hex::encode(address.as_bytes()),
                "state": prev_state,
                "isDetails": true,
            }
        });
        let url = format!("{}?act={act}", self.base_url);
        let response = self.client.post(&url).json(&body).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(OracleError::Status(status.as_u16()));
        }
        let envelope: OracleEnvelope = response
            .json()
            .await
            .map_err(|err| OracleError::Malformed(err.to_string()))?;

        if let Some(error) = envelope.error {
            let kind = ContractErrorKind::from_code(error.code);
            if kind == ContractErrorKind::UserError {
                return Err(OracleError::UserError {
                    code: error.code,
                    message: error.message,
                });
            }
            return Ok(ContractState {
                error_kind: kind,
                error_message: error.message,
                ..ContractState::default()
            });
        }

        let result = envelope
            .result
            .ok_or_else(|| OracleError::Malformed("neither result nor error".to_string()))?;
        let address = Address::from_hex(&result.address)
            .ok_or_else(|| OracleError::Malformed("bad contract address".to_string()))?;
        Ok(ContractState {
            address,
            state: result.state,
            details: result.contractdump.to_string(),
            ..ContractState::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httptest::{matchers::*, responders::*, Expectation, Server};
    use serde_json::json;

    fn client(server: &Server) -> OracleClient {
        OracleClient::new(server.url_str("/contracts"), Duration::from_secs(2))
    }

    #[tokio::test]
    async fn compile_success() {
        let server = Server::run();
        let contract = torrent_node_types::Address::from_pubkey(b"contract");
        server.expect(
            Expectation::matching(all_of![
                request::method_path("POST", "/contracts"),
                request::query(url_decoded(contains(("act", "compile")))),
            ])
            .respond_with(json_encoded(json!({
                "result": {
                    "state": "S",
                    "address": hex::encode(contract.as_bytes()),
                    "contractdump": {"fields": 1},
                }
            }))),
        );

        let state = client(&server)
            .compile(b"raw", b"sign", b"pub", &contract)
            .await
            .unwrap();
        assert_eq!(state.state, "S");
        assert_eq!(state.address, contract);
        assert!(state.is_ok());
    }

    #[tokio::test]
    async fn script_error_band_is_recorded_not_fatal() {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path("POST", "/contracts")).respond_with(
                json_encoded(json!({"error": {"code": 2001, "message": "syntax"}})),
            ),
        );
        let state = client(&server)
            .run(b"raw", b"sign", b"pub", &Address::from_pubkey(b"c"), "prev")
            .await
            .unwrap();
        assert_eq!(state.error_kind, ContractErrorKind::ScriptError);
        assert_eq!(state.error_message, "syntax");
    }

    #[tokio::test]
    async fn user_error_band_is_fatal() {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path("POST", "/contracts")).respond_with(
                json_encoded(json!({"error": {"code": 1005, "message": "bad tx"}})),
            ),
        );
        let err = client(&server)
            .compile(b"raw", b"sign", b"pub", &Address::from_pubkey(b"c"))
            .await
            .unwrap_err();
        assert!(matches!(err, OracleError::UserError { code: 1005, .. }));
    }
}
