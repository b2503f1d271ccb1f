//! Client for the account/voice REST authority.

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use crate::error::ServerError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RestEndpoint {
    GetAccountState,
    StartVoiceSession,
    EndVoiceSession,
}

impl RestEndpoint {
    #[must_use]
    pub const fn path(self) -> &'static str {
        match self {
            Self::GetAccountState => "account/state",
            Self::StartVoiceSession => "voice/session/start",
            Self::EndVoiceSession => "voice/session/end",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    NoRtc,
    NoPermissions,
    AlreadyActive,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestError {
    pub code: ErrorCode,
    #[serde(default)]
    pub message: String,
}

/// Envelope every endpoint answers with.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RestResponse {
    #[serde(default)]
    pub errors: Vec<RestError>,
    #[serde(default)]
    pub response: Value,
}

impl RestResponse {
    #[must_use]
    pub fn ok(response: Value) -> Self {
        Self {
            errors: Vec::new(),
            response,
        }
    }

    #[must_use]
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            errors: vec![RestError {
                code,
                message: message.into(),
            }],
            response: Value::Null,
        }
    }

    #[must_use]
    pub fn first_error(&self) -> Option<&RestError> {
        self.errors.first()
    }

    /// Decodes the payload into `T`.
    ///
    /// # Errors
    /// Returns [`ServerError::Json`] when the payload has the wrong shape.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, ServerError> {
        Ok(serde_json::from_value(self.response.clone())?)
    }
}

#[async_trait]
pub trait RestClient: Send + Sync {
    /// # Errors
    /// Returns transport or decoding errors. Errors reported by the authority
    /// itself come back inside [`RestResponse::errors`].
    async fn call(&self, endpoint: RestEndpoint) -> Result<RestResponse, ServerError>;
}

/// [`RestClient`] over HTTPS.
pub struct HttpRestClient {
    http: reqwest::Client,
    base_url: String,
    key: String,
}

impl HttpRestClient {
    /// # Errors
    /// Returns [`ServerError::Http`] if the HTTP client cannot be built.
    pub fn new(base_url: impl Into<String>, key: impl Into<String>) -> Result<Self, ServerError> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.into(),
            key: key.into(),
        })
    }

    fn url(&self, endpoint: RestEndpoint) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), endpoint.path())
    }
}

#[async_trait]
impl RestClient for HttpRestClient {
    async fn call(&self, endpoint: RestEndpoint) -> Result<RestResponse, ServerError> {
        let url = self.url(endpoint);
        debug!("REST {:?} -> {}", endpoint, url);

        let response = self
            .http
            .post(&url)
            .json(&json!({ "key": self.key }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ServerError::Remote(format!("HTTP {}: {}", status, text)));
        }

        Ok(response.json::<RestResponse>().await?)
    }
}
