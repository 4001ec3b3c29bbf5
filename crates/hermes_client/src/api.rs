//! HTTP side of the backend: health probe, REST query fallback and auth endpoints.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::Settings;
use crate::error::ClientError;
use crate::messages::{QueryMessage, QueryResponse};

/// `POST /api/auth/login` response.
#[derive(Debug, Clone, Deserialize)]
pub struct LoginResponse {
    pub access_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub user: serde_json::Value,
}

/// `POST /api/auth/signup` body.
#[derive(Debug, Clone, Serialize)]
pub struct SignupRequest {
    pub username: String,
    pub password: String,
    pub full_name: String,
}

impl SignupRequest {
    /// `full_name` falls back to the username when blank.
    pub fn new(username: &str, password: &str, full_name: Option<&str>) -> Self {
        let full_name = full_name
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .unwrap_or(username);
        Self {
            username: username.into(),
            password: password.into(),
            full_name: full_name.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BackendApi {
    http: reqwest::Client,
    base_url: String,
    health_timeout: Duration,
}

impl BackendApi {
    pub fn new(base_url: &str, health_timeout: Duration) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            health_timeout,
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(&settings.api_url, settings.health_timeout)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Liveness probe. Any non-2xx status, timeout or transport error counts
    /// as unavailable.
    pub async fn health(&self) -> bool {
        let result = self
            .http
            .get(self.url("/api/health"))
            .timeout(self.health_timeout)
            .send()
            .await;
        match result {
            Ok(resp) if resp.status().is_success() => true,
            Ok(resp) => {
                tracing::warn!(status = %resp.status(), "health probe rejected");
                false
            }
            Err(e) => {
                tracing::warn!(error = %e, "health probe failed");
                false
            }
        }
    }

    /// One-shot question/answer call used when the socket is not open.
    pub async fn query(&self, question: &str) -> Result<QueryResponse, ClientError> {
        let resp = self
            .http
            .post(self.url("/api/query"))
            .json(&QueryMessage::new(question))
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(ClientError::RequestFailed {
                status: status.as_u16(),
                detail: error_detail(resp).await,
            });
        }
        Ok(resp.json().await?)
    }

    /// Form-encoded login.
    pub async fn login(&self, username: &str, password: &str) -> Result<LoginResponse, ClientError> {
        let resp = self
            .http
            .post(self.url("/api/auth/login"))
            .form(&[("username", username), ("password", password)])
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(ClientError::AuthRejected(error_detail(resp).await));
        }
        Ok(resp.json().await?)
    }

    pub async fn signup(&self, request: &SignupRequest) -> Result<serde_json::Value, ClientError> {
        let resp = self
            .http
            .post(self.url("/api/auth/signup"))
            .json(request)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(ClientError::AuthRejected(error_detail(resp).await));
        }
        Ok(resp.json().await.unwrap_or(serde_json::Value::Null))
    }

    pub async fn logout(&self, token: Option<&str>) -> Result<(), ClientError> {
        let mut req = self.http.post(self.url("/api/auth/logout"));
        if let Some(token) = token {
            req = req.bearer_auth(token);
        }
        let resp = req.send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(ClientError::RequestFailed {
                status: status.as_u16(),
                detail: error_detail(resp).await,
            });
        }
        Ok(())
    }
}

/// Extract FastAPI's `{"detail": ...}` from an error body, else the raw text.
async fn error_detail(resp: reqwest::Response) -> String {
    let status = resp.status();
    let body = resp.text().await.unwrap_or_default();
    match serde_json::from_str::<serde_json::Value>(&body) {
        Ok(serde_json::Value::Object(map)) => match map.get("detail") {
            Some(serde_json::Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => body,
        },
        _ if body.is_empty() => status.to_string(),
        _ => body,
    }
}
