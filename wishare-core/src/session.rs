//! Auth session facade
//!
//! `AuthSession` is the one object collaborators hold. The HTTP client asks
//! it for credentials and whether to refresh; the UI asks it whether the
//! user is logged in. It performs no network I/O itself.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::codec;
use crate::config::SessionConfig;
use crate::monitor::{SessionMonitor, SessionStatus};
use crate::registry::SessionRegistry;
use crate::storage::{Storage, StorageError};
use crate::store::{SessionNamespace, StoredTokens, TokenPair, TokenStore, TokensInfo};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("No tokens stored for this session")]
    MissingTokens,

    #[error("Refresh token expired, login required")]
    RefreshExpired,

    #[error("Session storage failed: {0}")]
    Storage(#[from] StorageError),
}

/// What a collaborator should do with the current session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionState {
    /// Nothing stored: logged out
    NoTokens,
    /// Must log in again
    RefreshExpired,
    /// Access token missing or about to expire, refresh token still good
    NeedsRefresh,
    Valid,
}

/// Diagnostics exposed only in debug mode
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebugView {
    pub namespace: String,
    pub user_id: Option<String>,
    pub state: SessionState,
    pub stored_namespaces: Vec<String>,
    pub tokens: TokensInfo,
}

pub struct AuthSession {
    store: TokenStore,
    registry: SessionRegistry,
    config: SessionConfig,
}

impl AuthSession {
    /// `durable` is shared by every tab; `tab` belongs to this tab only
    pub fn new(durable: Arc<dyn Storage>, tab: Arc<dyn Storage>, config: SessionConfig) -> Self {
        Self {
            store: TokenStore::new(durable.clone()),
            registry: SessionRegistry::new(tab, durable),
            config,
        }
    }

    pub fn store(&self) -> &TokenStore {
        &self.store
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn namespace(&self) -> SessionNamespace {
        self.registry.resolve_namespace()
    }

    pub fn tokens(&self) -> StoredTokens {
        self.store.get_tokens(&self.namespace())
    }

    pub fn tokens_info(&self) -> TokensInfo {
        self.store.get_tokens_info(&self.namespace())
    }

    /// Both tokens stored and the refresh token still live
    pub fn is_usable(&self) -> bool {
        self.store.are_tokens_valid(&self.namespace())
    }

    pub fn state(&self) -> SessionState {
        self.state_at(Utc::now())
    }

    pub fn state_at(&self, now: DateTime<Utc>) -> SessionState {
        let tokens = self.tokens();
        let threshold = self.config.refresh_threshold();

        match (tokens.access_token.as_deref(), tokens.refresh_token.as_deref()) {
            (_, None) => SessionState::NoTokens,
            (_, Some(refresh)) if codec::is_expired_at(Some(refresh), now) => {
                SessionState::RefreshExpired
            }
            (None, Some(_)) => SessionState::NeedsRefresh,
            (Some(access), Some(_)) if codec::expires_within_at(Some(access), threshold, now) => {
                SessionState::NeedsRefresh
            }
            _ => SessionState::Valid,
        }
    }

    pub fn should_refresh(&self) -> bool {
        self.state() == SessionState::NeedsRefresh
    }

    /// Stored pair, or the reason the session cannot be used
    pub fn require_tokens(&self) -> Result<TokenPair, SessionError> {
        match self.state() {
            SessionState::NoTokens => Err(SessionError::MissingTokens),
            SessionState::RefreshExpired => Err(SessionError::RefreshExpired),
            SessionState::NeedsRefresh | SessionState::Valid => {
                self.tokens().into_pair().ok_or(SessionError::MissingTokens)
            }
        }
    }

    /// Persist a fresh login and make it active in this tab
    pub fn login(&self, user_id: Option<&str>, pair: &TokenPair) -> Result<SessionNamespace, SessionError> {
        let ns = SessionNamespace::from_user_id(user_id);
        self.store.set_tokens(pair, &ns)?;

        match ns.user_id() {
            Some(id) => self.registry.set_current_user_id(id)?,
            None => self.registry.clear_current_user_id()?,
        }

        info!(namespace = %ns, "Logged in");
        Ok(ns)
    }

    /// Store a refreshed access token
    ///
    /// Without a rotated refresh token the stored one is kept.
    pub fn apply_refresh(&self, access_token: &str, refresh_token: Option<&str>) -> Result<(), SessionError> {
        let ns = self.namespace();
        let refresh_token = match refresh_token {
            Some(token) => token.to_string(),
            None => self
                .store
                .get_tokens(&ns)
                .refresh_token
                .ok_or(SessionError::MissingTokens)?,
        };

        self.store
            .set_tokens(&TokenPair::new(access_token, refresh_token), &ns)?;
        Ok(())
    }

    /// Drop this tab's tokens but keep the active user (refresh failure)
    pub fn clear_tokens(&self) -> Result<(), SessionError> {
        self.store.clear_tokens(&self.namespace())?;
        Ok(())
    }

    pub fn logout(&self) -> Result<(), SessionError> {
        let ns = self.namespace();
        self.store.clear_tokens(&ns)?;
        self.registry.clear_current_user_id()?;

        info!(namespace = %ns, "Logged out");
        Ok(())
    }

    /// `Bearer <access>` when an access token is stored
    pub fn authorization_header(&self) -> Option<String> {
        self.tokens()
            .access_token
            .map(|token| format!("Bearer {}", token))
    }

    pub fn monitor(&self) -> SessionMonitor {
        SessionMonitor::new(self.store.clone(), self.registry.clone())
    }

    pub fn status(&self) -> SessionStatus {
        SessionStatus::capture(&self.store, &self.registry, Utc::now())
    }

    /// Full diagnostics, only when `session.debug` is enabled
    pub fn debug_view(&self) -> Option<DebugView> {
        if !self.config.debug {
            return None;
        }

        let ns = self.namespace();
        Some(DebugView {
            namespace: ns.to_string(),
            user_id: self.registry.get_current_user_id(),
            state: self.state(),
            stored_namespaces: self
                .store
                .stored_namespaces()
                .iter()
                .map(ToString::to_string)
                .collect(),
            tokens: self.store.get_tokens_info(&ns),
        })
    }
}
