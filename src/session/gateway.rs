//! Gateway handshake
//!
//! The gateway trades a user token for the address of a main channel and a
//! session token to authenticate on it.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use url::Url;

use crate::error::SessionError;

/// Result of a successful gateway handshake
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayGrant {
    /// Main channel address
    pub address: String,
    /// Token for `Authenticate`
    pub token: String,
}

#[async_trait]
pub trait Gateway: Send + Sync {
    async fn connect(&self, token: &str) -> Result<GatewayGrant, SessionError>;
}

/// Gateway that always grants the same address, for fixed deployments and tests
#[derive(Debug, Clone)]
pub struct StaticGateway {
    pub address: String,
}

#[async_trait]
impl Gateway for StaticGateway {
    async fn connect(&self, token: &str) -> Result<GatewayGrant, SessionError> {
        Ok(GatewayGrant {
            address: self.address.clone(),
            token: token.to_string(),
        })
    }
}

#[derive(Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'static str,
    params: ConnectParams<'a>,
}

#[derive(Serialize)]
struct ConnectParams<'a> {
    token: &'a str,
}

#[derive(Deserialize)]
struct JsonRpcResponse {
    #[serde(default)]
    result: Option<GatewayGrant>,
    #[serde(default)]
    error: Option<JsonRpcError>,
}

#[derive(Deserialize)]
struct JsonRpcError {
    #[serde(default)]
    message: String,
}

/// Gateway reached with a JSON-RPC `Connect` call over HTTP(S)
#[derive(Debug, Clone)]
pub struct HttpGateway {
    http_client: reqwest::Client,
    url: Url,
}

impl HttpGateway {
    pub fn new(url: &str, timeout: Duration) -> Result<Self, SessionError> {
        let url = Url::parse(url)
            .map_err(|e| SessionError::Gateway(format!("invalid gateway url '{}': {}", url, e)))?;
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SessionError::Gateway(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self { http_client, url })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl Gateway for HttpGateway {
    async fn connect(&self, token: &str) -> Result<GatewayGrant, SessionError> {
        let body = JsonRpcRequest {
            jsonrpc: "2.0",
            id: 1,
            method: "Connect",
            params: ConnectParams { token },
        };

        debug!(url = %self.url, "contacting gateway");
        let response = self
            .http_client
            .post(self.url.clone())
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    SessionError::Gateway("request timeout".to_string())
                } else if e.is_connect() {
                    SessionError::Gateway(format!("connection failed: {}", e))
                } else {
                    SessionError::Gateway(format!("request failed: {}", e))
                }
            })?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(SessionError::Gateway(format!("token rejected ({})", status)));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(%status, "gateway returned an error status");
            return Err(SessionError::Gateway(format!("HTTP {}: {}", status, body)));
        }

        let reply: JsonRpcResponse = response
            .json()
            .await
            .map_err(|e| SessionError::Gateway(format!("invalid gateway response: {}", e)))?;

        match (reply.result, reply.error) {
            (_, Some(error)) => Err(SessionError::Gateway(error.message)),
            (Some(grant), None) => {
                debug!(address = %grant.address, "gateway granted main channel");
                Ok(grant)
            }
            (None, None) => Err(SessionError::Gateway("empty gateway response".to_string())),
        }
    }
}
