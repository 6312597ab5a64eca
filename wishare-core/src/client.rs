//! Wishare REST API client
//!
//! Thin reqwest wrapper that handles credentials through an [`AuthSession`]:
//! - Attaches `Authorization: Bearer <access>` to every request
//! - Refreshes ahead of time when the access token is about to expire
//! - On a 401, refreshes once and retries the request once
//! - Clears the session's tokens when the refresh cannot succeed

use std::sync::Arc;

use reqwest::{Client, Method, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::codec;
use crate::config::ApiConfig;
use crate::session::{AuthSession, SessionError};
use crate::store::{SessionNamespace, TokenPair};

const TOKEN_PATH: &str = "/token/";
const REFRESH_PATH: &str = "/token/refresh/";
const VERIFY_PATH: &str = "/token/verify/";
const LOGOUT_PATH: &str = "/users/logout/";
const PROFILE_PATH: &str = "/users/profile/";

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Failed to encode request body: {0}")]
    EncodeError(#[from] serde_json::Error),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("Invalid credentials")]
    AuthFailed,

    #[error("Token refresh rejected with HTTP {0}")]
    RefreshFailed(u16),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Server error: {0}")]
    ServerError(String),
}

#[derive(Serialize)]
struct LoginRequest<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Deserialize)]
struct LoginResponse {
    access: String,
    refresh: String,
}

#[derive(Serialize)]
struct RefreshRequest<'a> {
    refresh: &'a str,
}

/// `refresh` is only present when the backend rotates refresh tokens
#[derive(Deserialize)]
struct RefreshResponse {
    access: String,
    #[serde(default)]
    refresh: Option<String>,
}

pub struct ApiClient {
    client: Client,
    base_url: String,
    session: Arc<AuthSession>,
}

impl ApiClient {
    pub fn new(base_url: &str, session: Arc<AuthSession>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            session,
        }
    }

    pub fn from_config(config: &ApiConfig, session: Arc<AuthSession>) -> Result<Self, ApiError> {
        let client = Client::builder().timeout(config.timeout()).build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            session,
        })
    }

    pub fn session(&self) -> &Arc<AuthSession> {
        &self.session
    }

    /// Obtain a token pair and store it under `user_id`'s namespace
    pub async fn login(
        &self,
        username: &str,
        password: &str,
        user_id: Option<&str>,
    ) -> Result<SessionNamespace, ApiError> {
        let resp = self
            .client
            .post(self.url(TOKEN_PATH))
            .json(&LoginRequest { username, password })
            .send()
            .await?;

        if matches!(resp.status(), StatusCode::UNAUTHORIZED | StatusCode::BAD_REQUEST) {
            return Err(ApiError::AuthFailed);
        }
        let resp = self.handle_error_status(resp, TOKEN_PATH)?;

        let tokens: LoginResponse = resp.json().await?;
        let ns = self
            .session
            .login(user_id, &TokenPair::new(tokens.access, tokens.refresh))?;
        Ok(ns)
    }

    /// Exchange the stored refresh token for a new access token
    ///
    /// Any failure clears the session's tokens: the caller has to log in again.
    pub async fn refresh(&self) -> Result<(), ApiError> {
        let tokens = self.session.tokens();
        let info = self.session.tokens_info();
        debug!(?info, "Token refresh attempt");

        let refresh_token = match tokens.refresh_token {
            Some(token) if !codec::is_expired(Some(&token)) => token,
            Some(_) => return Err(self.invalidate(SessionError::RefreshExpired.into())),
            None => return Err(self.invalidate(SessionError::MissingTokens.into())),
        };

        let refreshed = match self.request_refresh(&refresh_token).await {
            Ok(refreshed) => refreshed,
            Err(e) => return Err(self.invalidate(e)),
        };

        let rotated = refreshed.refresh.is_some();
        if let Err(e) = self
            .session
            .apply_refresh(&refreshed.access, refreshed.refresh.as_deref())
        {
            return Err(self.invalidate(e.into()));
        }

        if rotated {
            info!("Tokens refreshed with rotation");
        } else {
            info!("Access token refreshed");
        }
        Ok(())
    }

    /// Ask the backend whether `token` is still valid
    pub async fn verify(&self, token: &str) -> Result<bool, ApiError> {
        let resp = self
            .client
            .post(self.url(VERIFY_PATH))
            .json(&serde_json::json!({ "token": token }))
            .send()
            .await?;

        match resp.status() {
            s if s.is_success() => Ok(true),
            StatusCode::UNAUTHORIZED | StatusCode::BAD_REQUEST => Ok(false),
            s => Err(ApiError::ServerError(format!("HTTP {}: {}", s.as_u16(), VERIFY_PATH))),
        }
    }

    /// Restore a stored session: verify the access token, then load the profile
    ///
    /// Returns `None` when there is nothing to restore or the backend rejects
    /// the token. Tokens are cleared whenever either step fails.
    pub async fn restore<T: DeserializeOwned>(&self) -> Result<Option<T>, ApiError> {
        let Some(access) = self.session.tokens().access_token else {
            debug!("No stored session to restore");
            return Ok(None);
        };

        match self.verify(&access).await {
            Ok(true) => {}
            Ok(false) => {
                self.invalidate(ApiError::Unauthorized(VERIFY_PATH.to_string()));
                return Ok(None);
            }
            Err(e) => return Err(self.invalidate(e)),
        }

        match self.profile().await {
            Ok(profile) => {
                info!(namespace = %self.session.namespace(), "Session restored");
                Ok(Some(profile))
            }
            Err(e) => Err(self.invalidate(e)),
        }
    }

    /// Tell the backend to blacklist the refresh token, then clear the session
    ///
    /// The local session is cleared even when the backend call fails.
    pub async fn logout(&self) -> Result<(), ApiError> {
        let refresh_token = self.session.tokens().refresh_token;
        let body = serde_json::json!({ "refresh_token": refresh_token });

        match self.send(Method::POST, LOGOUT_PATH, Some(&body)).await {
            Ok(resp) if !resp.status().is_success() => {
                warn!(status = resp.status().as_u16(), "Backend logout rejected");
            }
            Err(e) => warn!("Backend logout failed: {}", e),
            Ok(_) => {}
        }

        self.session.logout()?;
        Ok(())
    }

    /// Profile of the logged-in user
    pub async fn profile<T: DeserializeOwned>(&self) -> Result<T, ApiError> {
        self.get_json(PROFILE_PATH).await
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let resp = self.send(Method::GET, path, None).await?;
        let resp = self.handle_error_status(resp, path)?;
        Ok(resp.json().await?)
    }

    /// Send an authorized request, refreshing and retrying once on 401
    ///
    /// The returned response may still carry an error status other than 401.
    pub async fn send(&self, method: Method, path: &str, body: Option<&Value>) -> Result<Response, ApiError> {
        let refresh_endpoint = path.contains(REFRESH_PATH);

        if !refresh_endpoint && self.session.should_refresh() {
            debug!(path = path, "Access token expiring, refreshing first");
            if let Err(e) = self.refresh().await {
                warn!("Proactive token refresh failed: {}", e);
            }
        }

        let resp = self.authed_request(method.clone(), path, body).send().await?;
        if resp.status() != StatusCode::UNAUTHORIZED || refresh_endpoint {
            return Ok(resp);
        }

        info!(path = path, "401 received, refreshing token and retrying");
        self.refresh().await?;

        Ok(self.authed_request(method, path, body).send().await?)
    }

    // Private helpers

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authed_request(&self, method: Method, path: &str, body: Option<&Value>) -> reqwest::RequestBuilder {
        let mut req = self.client.request(method, self.url(path));

        if let Some(header) = self.session.authorization_header() {
            req = req.header(reqwest::header::AUTHORIZATION, header);
        }
        if let Some(body) = body {
            req = req.json(body);
        }

        req
    }

    /// Sent without the bearer header so an expired access token cannot interfere
    async fn request_refresh(&self, refresh_token: &str) -> Result<RefreshResponse, ApiError> {
        let resp = self
            .client
            .post(self.url(REFRESH_PATH))
            .json(&RefreshRequest {
                refresh: refresh_token,
            })
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(ApiError::RefreshFailed(resp.status().as_u16()));
        }
        Ok(resp.json().await?)
    }

    fn invalidate(&self, err: ApiError) -> ApiError {
        warn!("Clearing tokens: {}", err);
        if let Err(e) = self.session.clear_tokens() {
            warn!("Failed to clear tokens: {}", e);
        }
        err
    }

    fn handle_error_status(&self, resp: Response, path: &str) -> Result<Response, ApiError> {
        match resp.status() {
            s if s.is_success() => Ok(resp),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                Err(ApiError::Unauthorized(path.to_string()))
            }
            StatusCode::NOT_FOUND => Err(ApiError::NotFound(path.to_string())),
            s => Err(ApiError::ServerError(format!("HTTP {}: {}", s.as_u16(), path))),
        }
    }
}
