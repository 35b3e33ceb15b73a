//! HTTP client for the route aggregator.
//!
//! The aggregator is an opaque routing oracle: it discovers bridge/swap
//! routes, builds step transaction calldata, and reports relayed transaction
//! status. This client only knows the endpoints and the handful of fields
//! the rest of the library extracts.
//!
//! All requests carry the integrator id (and API key when configured) and an
//! abort-backed timeout; non-success statuses are mapped to a typed error
//! carrying the status and response body.

pub(crate) mod types;

use alloy::primitives::{Address, TxHash};
use serde::de::DeserializeOwned;
use std::time::Duration;

use types::{
    ChainsEnvelope, ConnectionsEnvelope, LifiChain, LifiConnection, LifiRoute, LifiStatusResponse,
    LifiStep, LifiToken, RoutesEnvelope, TokensEnvelope,
};

pub(crate) const LIFI_API_BASE: &str = "https://li.quest/v1";

/// Timeout for catalog-style lookups (chains, tokens, connections).
pub(crate) const CATALOG_TIMEOUT: Duration = Duration::from_secs(15);

/// Timeout for quote and route requests, which can take far longer than
/// catalog reads while the aggregator simulates routes.
pub(crate) const QUOTE_TIMEOUT: Duration = Duration::from_secs(30);

const INTEGRATOR_HEADER: &str = "x-lifi-integrator";
const API_KEY_HEADER: &str = "x-lifi-api-key";

#[derive(Debug, Clone, thiserror::Error)]
pub(crate) enum LifiApiError {
    #[error("request aborted after the configured {0}ms limit", .limit.as_millis())]
    Timeout { limit: Duration },
    #[error("transport error: {message}")]
    Transport { message: String },
    #[error("API error (status {status}): {body}")]
    Status { status: u16, body: String },
    #[error("malformed response: {message}")]
    Decode { message: String },
}

impl LifiApiError {
    fn from_reqwest(err: reqwest::Error, limit: Duration) -> Self {
        if err.is_timeout() {
            Self::Timeout { limit }
        } else {
            Self::Transport {
                message: err.to_string(),
            }
        }
    }
}

/// Parameters for a `/quote` request (one route, with calldata).
#[derive(Debug, Clone)]
pub(crate) struct QuoteRequest {
    pub from_chain: u64,
    pub to_chain: u64,
    pub from_token: String,
    pub to_token: String,
    pub from_amount: String,
    pub from_address: String,
    pub to_address: Option<String>,
    /// Slippage as a percent string with two decimals (0.005 -> "0.50").
    pub slippage_pct: String,
    pub order: Option<&'static str>,
}

#[derive(Debug)]
pub(crate) struct LifiClient {
    http: reqwest::Client,
    base_url: String,
    integrator: String,
    api_key: Option<String>,
}

impl LifiClient {
    pub(crate) fn new(
        base_url: impl Into<String>,
        integrator: impl Into<String>,
        api_key: Option<String>,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            integrator: integrator.into(),
            api_key,
        }
    }

    fn apply_headers(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let request = request.header(INTEGRATOR_HEADER, &self.integrator);
        match &self.api_key {
            Some(key) => request.header(API_KEY_HEADER, key),
            None => request,
        }
    }

    async fn decode<T: DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, LifiApiError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(LifiApiError::Status {
                status: status.as_u16(),
                body,
            });
        }
        response.json().await.map_err(|err| LifiApiError::Decode {
            message: err.to_string(),
        })
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
        timeout: Duration,
    ) -> Result<T, LifiApiError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .apply_headers(self.http.get(&url).query(query).timeout(timeout))
            .send()
            .await
            .map_err(|err| LifiApiError::from_reqwest(err, timeout))?;
        Self::decode(response).await
    }

    async fn post_json<T: DeserializeOwned>(
        &self,
        path: &str,
        body: &serde_json::Value,
        timeout: Duration,
    ) -> Result<T, LifiApiError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .apply_headers(self.http.post(&url).json(body).timeout(timeout))
            .send()
            .await
            .map_err(|err| LifiApiError::from_reqwest(err, timeout))?;
        Self::decode(response).await
    }

    pub(crate) async fn chains(&self) -> Result<Vec<LifiChain>, LifiApiError> {
        let envelope: ChainsEnvelope = self
            .get_json(
                "/chains",
                &[("chainTypes", "EVM".to_string())],
                CATALOG_TIMEOUT,
            )
            .await?;
        Ok(envelope.chains)
    }

    pub(crate) async fn tokens(&self, chain_id: u64) -> Result<Vec<LifiToken>, LifiApiError> {
        let envelope: TokensEnvelope = self
            .get_json(
                "/tokens",
                &[("chains", chain_id.to_string())],
                CATALOG_TIMEOUT,
            )
            .await?;
        Ok(envelope
            .tokens
            .get(&chain_id.to_string())
            .cloned()
            .unwrap_or_default())
    }

    pub(crate) async fn connections(
        &self,
        from_chain: u64,
        to_chain: u64,
    ) -> Result<Vec<LifiConnection>, LifiApiError> {
        let envelope: ConnectionsEnvelope = self
            .get_json(
                "/connections",
                &[
                    ("fromChain", from_chain.to_string()),
                    ("toChain", to_chain.to_string()),
                ],
                CATALOG_TIMEOUT,
            )
            .await?;
        Ok(envelope.connections)
    }

    pub(crate) async fn token(
        &self,
        chain_id: u64,
        token: Address,
    ) -> Result<LifiToken, LifiApiError> {
        self.get_json(
            "/token",
            &[
                ("chain", chain_id.to_string()),
                ("token", format!("{token:#x}")),
            ],
            CATALOG_TIMEOUT,
        )
        .await
    }

    pub(crate) async fn quote(
        &self,
        request: &QuoteRequest,
        timeout: Duration,
    ) -> Result<LifiStep, LifiApiError> {
        let mut query = vec![
            ("fromChain", request.from_chain.to_string()),
            ("toChain", request.to_chain.to_string()),
            ("fromToken", request.from_token.clone()),
            ("toToken", request.to_token.clone()),
            ("fromAmount", request.from_amount.clone()),
            ("fromAddress", request.from_address.clone()),
            ("slippage", request.slippage_pct.clone()),
        ];
        if let Some(to_address) = &request.to_address {
            query.push(("toAddress", to_address.clone()));
        }
        if let Some(order) = request.order {
            query.push(("order", order.to_string()));
        }
        self.get_json("/quote", &query, timeout).await
    }

    pub(crate) async fn routes(
        &self,
        body: &serde_json::Value,
        timeout: Duration,
    ) -> Result<Vec<LifiRoute>, LifiApiError> {
        let envelope: RoutesEnvelope = self.post_json("/advanced/routes", body, timeout).await?;
        Ok(envelope.routes)
    }

    pub(crate) async fn status(
        &self,
        tx_hash: TxHash,
        from_chain: u64,
        to_chain: u64,
    ) -> Result<LifiStatusResponse, LifiApiError> {
        self.get_json(
            "/status",
            &[
                ("txHash", format!("{tx_hash:#x}")),
                ("fromChain", from_chain.to_string()),
                ("toChain", to_chain.to_string()),
            ],
            CATALOG_TIMEOUT,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;

    #[tokio::test]
    async fn sends_integrator_and_api_key_headers() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET)
                .path("/chains")
                .header(INTEGRATOR_HEADER, "hyperflow-test")
                .header(API_KEY_HEADER, "secret");
            then.status(200)
                .header("content-type", "application/json")
                .json_body(json!({ "chains": [] }));
        });

        let client = LifiClient::new(
            server.base_url(),
            "hyperflow-test",
            Some("secret".to_string()),
        );
        let chains = client.chains().await.unwrap();
        assert!(chains.is_empty());
        mock.assert();
    }

    #[tokio::test]
    async fn non_success_maps_to_status_error_with_body() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/quote");
            then.status(404).body("No available quotes for the requested transfer");
        });

        let client = LifiClient::new(server.base_url(), "hyperflow-test", None);
        let request = QuoteRequest {
            from_chain: 1,
            to_chain: 999,
            from_token: "0xa0b86991c6218b36c1d19d4a2e9eb0ce3606eb48".into(),
            to_token: "0xb88339cb7199b77e23db6e890353e22632ba630f".into(),
            from_amount: "1000000000".into(),
            from_address: "0x1111111111111111111111111111111111111111".into(),
            to_address: None,
            slippage_pct: "0.50".into(),
            order: None,
        };
        let err = client.quote(&request, QUOTE_TIMEOUT).await.unwrap_err();
        match err {
            LifiApiError::Status { status, body } => {
                assert_eq!(status, 404);
                assert!(body.contains("No available quotes"));
            }
            other => panic!("expected status error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn timeout_is_reported_with_configured_limit() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/status");
            then.status(200)
                .delay(Duration::from_millis(500))
                .json_body(json!({ "status": "DONE" }));
        });

        let client = LifiClient::new(server.base_url(), "hyperflow-test", None);
        let slow = client
            .get_json::<LifiStatusResponse>(
                "/status",
                &[("txHash", "0x00".to_string())],
                Duration::from_millis(50),
            )
            .await;
        match slow {
            Err(LifiApiError::Timeout { limit }) => assert_eq!(limit.as_millis(), 50),
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn tokens_unwraps_the_per_chain_map() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/tokens").query_param("chains", "1");
            then.status(200).json_body(json!({
                "tokens": {
                    "1": [{
                        "address": "0xa0b86991c6218b36c1d19d4a2e9eb0ce3606eb48",
                        "symbol": "USDC",
                        "name": "USD Coin",
                        "decimals": 6,
                        "chainId": 1,
                        "priceUSD": "1.0"
                    }]
                }
            }));
        });

        let client = LifiClient::new(server.base_url(), "hyperflow-test", None);
        let tokens = client.tokens(1).await.unwrap();
        assert_eq!(tokens.len(), 1);
        assert_eq!(tokens[0].symbol, "USDC");
        assert_eq!(tokens[0].decimals, 6);
    }
}
