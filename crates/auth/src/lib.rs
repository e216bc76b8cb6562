//! Auth client for the Lost & Found backend
//!
//! Email/password identities only: sign up, sign in, verify the current
//! session against the provider, refresh it and sign out. The active
//! session lives in an in-memory slot shared by clones of [`Auth`];
//! persisting it across restarts is left to the caller.

use log::{debug, warn};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AuthError {
    /// The provider answered with an error; `message` is its own wording.
    #[error("{message}")]
    ApiError { status: StatusCode, message: String },

    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    #[error("JSON serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Missing session")]
    MissingSession,

    #[error("Invalid token: {0}")]
    InvalidToken(String),
}

impl AuthError {
    /// True when the provider rejected the credential itself.
    pub fn is_unauthorized(&self) -> bool {
        match self {
            AuthError::ApiError { status, .. } => {
                *status == StatusCode::UNAUTHORIZED || *status == StatusCode::FORBIDDEN
            }
            AuthError::MissingSession | AuthError::InvalidToken(_) => true,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub user_metadata: Value,
    #[serde(default)]
    pub created_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: i64,
    /// Unix seconds; filled in from `expires_in` when the provider omits it.
    #[serde(default)]
    pub expires_at: Option<i64>,
    pub token_type: String,
    pub user: User,
}

impl Session {
    pub fn is_expired(&self) -> bool {
        match self.expires_at {
            Some(expires_at) => chrono::Utc::now().timestamp() >= expires_at,
            None => false,
        }
    }

    fn stamped(mut self) -> Self {
        if self.expires_at.is_none() {
            self.expires_at = Some(chrono::Utc::now().timestamp() + self.expires_in);
        }
        self
    }
}

/// Result of a sign-up; `session` is absent while email confirmation is pending.
#[derive(Debug, Clone)]
pub struct SignUpResponse {
    pub user: User,
    pub session: Option<Session>,
}

#[derive(Debug, Clone)]
pub struct AuthOptions {
    pub auto_refresh_token: bool,
}

impl Default for AuthOptions {
    fn default() -> Self {
        Self {
            auto_refresh_token: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Auth {
    url: String,
    key: String,
    http_client: Client,
    options: AuthOptions,
    current_session: Arc<RwLock<Option<Session>>>,
}

impl Auth {
    pub fn new(url: &str, key: &str, http_client: Client, options: AuthOptions) -> Self {
        Self {
            url: url.trim_end_matches('/').to_string(),
            key: key.to_string(),
            http_client,
            options,
            current_session: Arc::new(RwLock::new(None)),
        }
    }

    /// Registers a new identity. `data` is stored as the user's metadata.
    pub async fn sign_up(
        &self,
        email: &str,
        password: &str,
        data: Option<Value>,
    ) -> Result<SignUpResponse, AuthError> {
        let url = format!("{}/auth/v1/signup", self.url);

        let mut payload = serde_json::json!({
            "email": email,
            "password": password,
        });
        if let Some(data) = data {
            payload["data"] = data;
        }

        let response = self
            .http_client
            .post(&url)
            .header("apikey", &self.key)
            .json(&payload)
            .send()
            .await?;
        let body: Value = read_json(response).await?;

        let signed_up = if body.get("access_token").is_some() {
            let session: Session = serde_json::from_value::<Session>(body)?.stamped();
            self.set_session(Some(session.clone()));
            SignUpResponse {
                user: session.user.clone(),
                session: Some(session),
            }
        } else if let Some(user) = body.get("user").filter(|u| !u.is_null()) {
            SignUpResponse {
                user: serde_json::from_value(user.clone())?,
                session: None,
            }
        } else {
            SignUpResponse {
                user: serde_json::from_value(body)?,
                session: None,
            }
        };

        debug!(
            "signed up user {} (session issued: {})",
            signed_up.user.id,
            signed_up.session.is_some()
        );
        Ok(signed_up)
    }

    pub async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Session, AuthError> {
        let url = format!("{}/auth/v1/token?grant_type=password", self.url);

        let payload = serde_json::json!({
            "email": email,
            "password": password,
        });

        let response = self
            .http_client
            .post(&url)
            .header("apikey", &self.key)
            .json(&payload)
            .send()
            .await?;

        let session: Session = read_json::<Session>(response).await?.stamped();
        self.set_session(Some(session.clone()));
        Ok(session)
    }

    pub fn get_session(&self) -> Option<Session> {
        self.read_slot().clone()
    }

    /// Replaces the active session, e.g. with one restored from disk.
    pub fn set_session(&self, session: Option<Session>) {
        *self.write_slot() = session;
    }

    /// Asks the provider who the current token belongs to.
    ///
    /// An expired session is refreshed first when `auto_refresh_token` is on.
    pub async fn get_user(&self) -> Result<User, AuthError> {
        let mut session = self.get_session().ok_or(AuthError::MissingSession)?;
        if session.is_expired() && self.options.auto_refresh_token {
            session = self.refresh_session().await?;
        }

        let url = format!("{}/auth/v1/user", self.url);
        let response = self
            .http_client
            .get(&url)
            .header("apikey", &self.key)
            .header("Authorization", format!("Bearer {}", session.access_token))
            .send()
            .await?;

        read_json(response).await
    }

    pub async fn refresh_session(&self) -> Result<Session, AuthError> {
        let session = self.get_session().ok_or(AuthError::MissingSession)?;

        let url = format!("{}/auth/v1/token?grant_type=refresh_token", self.url);
        let payload = serde_json::json!({
            "refresh_token": session.refresh_token,
        });

        let response = self
            .http_client
            .post(&url)
            .header("apikey", &self.key)
            .json(&payload)
            .send()
            .await?;

        let refreshed: Session = read_json::<Session>(response).await?.stamped();
        self.set_session(Some(refreshed.clone()));
        Ok(refreshed)
    }

    /// Revokes the session at the provider. The local slot is cleared even
    /// when the revoke call fails.
    pub async fn sign_out(&self) -> Result<(), AuthError> {
        let session = self.write_slot().take().ok_or(AuthError::MissingSession)?;

        let url = format!("{}/auth/v1/logout", self.url);
        let response = self
            .http_client
            .post(&url)
            .header("apikey", &self.key)
            .header("Authorization", format!("Bearer {}", session.access_token))
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            let body = response.text().await.unwrap_or_default();
            warn!("logout rejected with {}: {}", status, body);
            Err(api_error(status, &body))
        }
    }

    fn read_slot(&self) -> RwLockReadGuard<'_, Option<Session>> {
        match self.current_session.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write_slot(&self) -> RwLockWriteGuard<'_, Option<Session>> {
        match self.current_session.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

async fn read_json<T: for<'de> Deserialize<'de>>(
    response: reqwest::Response,
) -> Result<T, AuthError> {
    let status = response.status();
    let body = response.text().await?;
    if !status.is_success() {
        return Err(api_error(status, &body));
    }
    Ok(serde_json::from_str(&body)?)
}

/// The provider has used `msg`, `error_description`, `message` and `error`
/// for the human readable part over time.
fn api_error(status: StatusCode, body: &str) -> AuthError {
    let message = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|value| {
            ["msg", "error_description", "message", "error"]
                .iter()
                .find_map(|key| value.get(*key).and_then(Value::as_str).map(str::to_string))
        })
        .unwrap_or_else(|| body.to_string());

    AuthError::ApiError { status, message }
}
