//! HTTP implementation of the core backend contract.
//!
//! Maps REST endpoints and HTTP status codes onto the distinguished
//! [`BackendError`] signals the core reacts to. Anything that is not an
//! explicit signal (network failure, timeout, unexpected status, bad
//! JSON) becomes [`BackendError::Transport`].

use std::collections::HashMap;

use latchkey_core::backend::{
    Backend, BackendError, BackendResult, GrantRecord, LockDisplay, NewGrant, NewToken,
    OpeningRecord, TokenRecord,
};
use latchkey_core::model::{AccessGrant, AccessToken, Lock, Role, Session};
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::debug;
use url::Url;
use uuid::Uuid;

/// Legacy conflict status emitted by older backend deployments for a
/// token-code collision, alongside the standard 409.
const LEGACY_CONFLICT: u16 = 462;

/// Structured error body the backend attaches to failures.
#[derive(Debug, Deserialize, Default)]
struct ErrorBody {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// Backend client over HTTP.
pub struct HttpBackend {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpBackend {
    /// Create a backend client against the given base URL.
    ///
    /// # Errors
    ///
    /// Returns a [`BackendError::Transport`] if the underlying HTTP
    /// client cannot be constructed.
    pub fn new(base_url: Url, timeout: std::time::Duration) -> BackendResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| BackendError::Transport(err.to_string()))?;
        Ok(Self { client, base_url })
    }

    fn endpoint(&self, path: &str) -> BackendResult<Url> {
        self.base_url
            .join(path)
            .map_err(|err| BackendError::Transport(err.to_string()))
    }

    async fn parse_json<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> BackendResult<T> {
        response
            .json()
            .await
            .map_err(|err| BackendError::Transport(format!("malformed response: {err}")))
    }

    /// Read an error body and translate the status into a signal.
    async fn failure(response: reqwest::Response) -> BackendError {
        let status = response.status();
        let body: ErrorBody = response.json().await.unwrap_or_default();
        let message = body
            .message
            .or(body.error)
            .unwrap_or_else(|| status.to_string());
        map_status(status, message)
    }
}

fn map_status(status: StatusCode, message: String) -> BackendError {
    match status {
        StatusCode::NOT_FOUND => BackendError::NotFound,
        StatusCode::CONFLICT => BackendError::Conflict,
        StatusCode::FORBIDDEN | StatusCode::UNAUTHORIZED => BackendError::Rejected(message),
        StatusCode::UNPROCESSABLE_ENTITY | StatusCode::BAD_REQUEST => {
            // The backend distinguishes a bad window from a missing guest
            // through its machine-readable error code.
            if message.contains("guest") {
                BackendError::GuestNotFound
            } else {
                BackendError::InvalidWindow
            }
        }
        other if other.as_u16() == LEGACY_CONFLICT => BackendError::Conflict,
        other => BackendError::Transport(format!("unexpected status {other}: {message}")),
    }
}

fn transport(err: reqwest::Error) -> BackendError {
    if err.is_timeout() {
        BackendError::Transport("request timed out".to_string())
    } else {
        BackendError::Transport(err.to_string())
    }
}

impl Backend for HttpBackend {
    async fn resolve_lock_by_property(&self, property_id: Uuid) -> BackendResult<Lock> {
        let url = self.endpoint(&format!("api/properties/{property_id}/lock"))?;
        debug!(%property_id, "resolving lock for property");
        let response = self.client.get(url).send().await.map_err(transport)?;
        if response.status().is_success() {
            Self::parse_json(response).await
        } else {
            Err(Self::failure(response).await)
        }
    }

    async fn create_token(&self, request: &NewToken) -> BackendResult<AccessToken> {
        let url = self.endpoint("api/tokens")?;
        let response = self
            .client
            .post(url)
            .json(request)
            .send()
            .await
            .map_err(transport)?;
        if response.status().is_success() {
            Self::parse_json(response).await
        } else {
            Err(Self::failure(response).await)
        }
    }

    async fn validate_token(&self, code: &str, lock_id: Uuid) -> BackendResult<()> {
        let mut url = self.endpoint("api/tokens/validate")?;
        url.query_pairs_mut()
            .append_pair("code", code)
            .append_pair("lock_id", &lock_id.to_string());
        let response = self.client.post(url).send().await.map_err(transport)?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(Self::failure(response).await)
        }
    }

    async fn primary_unlock(&self, lock_id: Uuid, session: &Session) -> BackendResult<()> {
        let url = self.endpoint(&format!("api/locks/{lock_id}/unlock"))?;
        let response = self
            .client
            .post(url)
            .json(&serde_json::json!({ "user_id": session.user_id }))
            .send()
            .await
            .map_err(transport)?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(Self::failure(response).await)
        }
    }

    async fn check_access(&self, lock_id: Uuid, user_id: Uuid) -> BackendResult<bool> {
        let mut url = self.endpoint(&format!("api/locks/{lock_id}/access"))?;
        url.query_pairs_mut()
            .append_pair("user_id", &user_id.to_string());
        let response = self.client.get(url).send().await.map_err(transport)?;
        if response.status().is_success() {
            #[derive(Deserialize)]
            struct AccessResponse {
                has_access: bool,
            }
            let body: AccessResponse = Self::parse_json(response).await?;
            Ok(body.has_access)
        } else {
            Err(Self::failure(response).await)
        }
    }

    async fn create_grant(&self, request: &NewGrant) -> BackendResult<AccessGrant> {
        let url = self.endpoint("api/grants")?;
        let response = self
            .client
            .post(url)
            .json(request)
            .send()
            .await
            .map_err(transport)?;
        if response.status().is_success() {
            Self::parse_json(response).await
        } else {
            Err(Self::failure(response).await)
        }
    }

    async fn list_grants(&self, session: &Session) -> BackendResult<Vec<GrantRecord>> {
        let mut url = self.endpoint("api/grants")?;
        let key = match session.role {
            Role::Owner => "owner_id",
            Role::Guest => "guest_id",
        };
        url.query_pairs_mut()
            .append_pair(key, &session.user_id.to_string());
        let response = self.client.get(url).send().await.map_err(transport)?;
        match response.status() {
            status if status.is_success() => Self::parse_json(response).await,
            StatusCode::NOT_FOUND => Ok(Vec::new()),
            _ => Err(Self::failure(response).await),
        }
    }

    async fn list_tokens(&self, owner_id: Uuid) -> BackendResult<Vec<TokenRecord>> {
        let mut url = self.endpoint("api/tokens")?;
        url.query_pairs_mut()
            .append_pair("owner_id", &owner_id.to_string());
        let response = self.client.get(url).send().await.map_err(transport)?;
        match response.status() {
            status if status.is_success() => Self::parse_json(response).await,
            StatusCode::NOT_FOUND => Ok(Vec::new()),
            _ => Err(Self::failure(response).await),
        }
    }

    async fn resolve_lock_names(
        &self,
        lock_ids: &[Uuid],
    ) -> BackendResult<HashMap<Uuid, LockDisplay>> {
        let url = self.endpoint("api/locks/names")?;
        let response = self
            .client
            .post(url)
            .json(&serde_json::json!({ "lock_ids": lock_ids }))
            .send()
            .await
            .map_err(transport)?;
        if response.status().is_success() {
            Self::parse_json(response).await
        } else {
            Err(Self::failure(response).await)
        }
    }

    async fn resolve_owner_name(&self, lock_id: Uuid) -> BackendResult<String> {
        let url = self.endpoint(&format!("api/locks/{lock_id}/owner-name"))?;
        let response = self.client.get(url).send().await.map_err(transport)?;
        if response.status().is_success() {
            response.text().await.map_err(transport)
        } else {
            Err(Self::failure(response).await)
        }
    }

    async fn record_opening(&self, record: &OpeningRecord) -> BackendResult<()> {
        let url = self.endpoint("api/openings")?;
        let response = self
            .client
            .post(url)
            .json(record)
            .send()
            .await
            .map_err(transport)?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(Self::failure(response).await)
        }
    }
}
