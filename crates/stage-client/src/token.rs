//! Join credentials.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::ClientError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenRole {
    Publisher,
    Subscriber,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credentials {
    pub token: String,
    pub app_id: String,
}

/// Issues short-lived join tokens. Called again on every connect attempt;
/// tokens are never cached across retries.
#[async_trait]
pub trait TokenIssuer: Send + Sync {
    async fn generate_token(
        &self,
        channel: &str,
        uid: &str,
        role: TokenRole,
        ttl_seconds: u64,
    ) -> Result<Credentials, ClientError>;
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TokenRequest<'a> {
    channel_name: &'a str,
    uid: &'a str,
    role: TokenRole,
    expiration_time_in_seconds: u64,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default, alias = "message")]
    error: Option<String>,
}

/// Token issuer backed by an HTTP endpoint that accepts a JSON POST and
/// answers with `{ "token": ..., "appId": ... }`.
#[derive(Clone)]
pub struct HttpTokenIssuer {
    http: Client,
    endpoint: Url,
    bearer: Option<String>,
}

impl HttpTokenIssuer {
    pub fn new(endpoint: &str) -> Result<Self, ClientError> {
        let endpoint = Url::parse(endpoint)?;
        if !matches!(endpoint.scheme(), "http" | "https") {
            return Err(ClientError::InvalidConfig(format!(
                "token endpoint must be http(s), got {}",
                endpoint.scheme()
            )));
        }
        Ok(Self {
            http: Client::new(),
            endpoint,
            bearer: None,
        })
    }

    /// Authenticate requests with a bearer token (e.g. the signed-in user's
    /// session token).
    pub fn with_bearer(mut self, token: impl Into<String>) -> Self {
        self.bearer = Some(token.into());
        self
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait]
impl TokenIssuer for HttpTokenIssuer {
    async fn generate_token(
        &self,
        channel: &str,
        uid: &str,
        role: TokenRole,
        ttl_seconds: u64,
    ) -> Result<Credentials, ClientError> {
        let body = TokenRequest {
            channel_name: channel,
            uid,
            role,
            expiration_time_in_seconds: ttl_seconds,
        };
        let mut req = self.http.post(self.endpoint.clone()).json(&body);
        if let Some(bearer) = &self.bearer {
            req = req.bearer_auth(bearer);
        }

        let resp = req.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorBody>(&text)
                .ok()
                .and_then(|b| b.error)
                .unwrap_or(text);
            tracing::warn!(status = status.as_u16(), channel, "Token request rejected");
            return Err(ClientError::TokenIssuer {
                status: status.as_u16(),
                message,
            });
        }

        let creds: Credentials = resp.json().await?;
        if creds.token.is_empty() || creds.app_id.is_empty() {
            return Err(ClientError::InvalidConfig(
                "token issuer returned empty credentials".into(),
            ));
        }
        Ok(creds)
    }
}
