//! Namespaced token persistence
//!
//! Key layout in durable storage:
//! - `access_token` / `refresh_token`: default (legacy) namespace
//! - `access_token_<id>` / `refresh_token_<id>`: per-user namespace
//! - `current_user_id`: legacy durable pointer to the last namespaced login
//!
//! Reads never fail. A storage error while reading is logged and reported
//! as a missing token.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::codec;
use crate::storage::{Storage, StorageError};

pub const ACCESS_TOKEN_KEY: &str = "access_token";
pub const REFRESH_TOKEN_KEY: &str = "refresh_token";
pub const CURRENT_USER_KEY: &str = "current_user_id";

/// Pair of access and refresh tokens
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

impl TokenPair {
    pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
        }
    }
}

/// Tokens as read back from storage; either may be missing
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoredTokens {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
}

impl StoredTokens {
    pub fn into_pair(self) -> Option<TokenPair> {
        match (self.access_token, self.refresh_token) {
            (Some(access_token), Some(refresh_token)) => Some(TokenPair {
                access_token,
                refresh_token,
            }),
            _ => None,
        }
    }
}

/// Storage partition a token pair belongs to
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub enum SessionNamespace {
    /// Unsuffixed keys used before multi-user isolation existed
    #[default]
    Default,
    ForUser(String),
}

impl SessionNamespace {
    /// Empty ids fall back to the default namespace
    pub fn from_user_id(user_id: Option<&str>) -> Self {
        match user_id {
            Some(id) if !id.is_empty() => Self::ForUser(id.to_string()),
            _ => Self::Default,
        }
    }

    pub fn user_id(&self) -> Option<&str> {
        match self {
            Self::Default => None,
            Self::ForUser(id) => Some(id),
        }
    }

    pub fn access_key(&self) -> String {
        self.key(ACCESS_TOKEN_KEY)
    }

    pub fn refresh_key(&self) -> String {
        self.key(REFRESH_TOKEN_KEY)
    }

    fn key(&self, base: &str) -> String {
        match self {
            Self::Default => base.to_string(),
            Self::ForUser(id) => format!("{}_{}", base, id),
        }
    }
}

impl fmt::Display for SessionNamespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Default => write!(f, "default"),
            Self::ForUser(id) => write!(f, "user:{}", id),
        }
    }
}

/// Diagnostic snapshot of one namespace
///
/// Expiry fields are `None` when the corresponding token is absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokensInfo {
    pub has_access: bool,
    pub has_refresh: bool,
    pub access_expired: Option<bool>,
    pub access_expiration: Option<DateTime<Utc>>,
    pub refresh_expired: Option<bool>,
    pub refresh_expiration: Option<DateTime<Utc>>,
}

/// Token persistence over durable storage
#[derive(Clone)]
pub struct TokenStore {
    durable: Arc<dyn Storage>,
}

impl TokenStore {
    pub fn new(durable: Arc<dyn Storage>) -> Self {
        Self { durable }
    }

    /// Store both tokens; a namespaced write also moves the legacy pointer
    pub fn set_tokens(&self, pair: &TokenPair, ns: &SessionNamespace) -> Result<(), StorageError> {
        let access_key = ns.access_key();
        let refresh_key = ns.refresh_key();

        let written = self
            .durable
            .set_item(&access_key, &pair.access_token)
            .and_then(|_| self.durable.set_item(&refresh_key, &pair.refresh_token));

        if let Err(e) = written {
            warn!(namespace = %ns, "Token write failed, removing partial pair: {}", e);
            let _ = self.durable.remove_item(&access_key);
            let _ = self.durable.remove_item(&refresh_key);
            return Err(e);
        }

        if let Some(user_id) = ns.user_id() {
            self.durable.set_item(CURRENT_USER_KEY, user_id)?;
        }

        info!(namespace = %ns, "Tokens stored");
        Ok(())
    }

    pub fn get_tokens(&self, ns: &SessionNamespace) -> StoredTokens {
        StoredTokens {
            access_token: self.read(&ns.access_key()),
            refresh_token: self.read(&ns.refresh_key()),
        }
    }

    /// Remove this namespace's pair; other namespaces are untouched
    pub fn clear_tokens(&self, ns: &SessionNamespace) -> Result<(), StorageError> {
        let access = self.durable.remove_item(&ns.access_key());
        let refresh = self.durable.remove_item(&ns.refresh_key());
        access.and(refresh)?;

        info!(namespace = %ns, "Tokens cleared");
        Ok(())
    }

    /// Both tokens present and the refresh token still live
    ///
    /// An expired access token alone does not invalidate the session since it
    /// can be refreshed.
    pub fn are_tokens_valid(&self, ns: &SessionNamespace) -> bool {
        self.are_tokens_valid_at(ns, Utc::now())
    }

    pub fn are_tokens_valid_at(&self, ns: &SessionNamespace, now: DateTime<Utc>) -> bool {
        let tokens = self.get_tokens(ns);
        match (&tokens.access_token, &tokens.refresh_token) {
            (Some(access), Some(refresh)) => {
                let refresh_expired = codec::is_expired_at(Some(refresh), now);
                debug!(
                    namespace = %ns,
                    access_expired = codec::is_expired_at(Some(access), now),
                    refresh_expired,
                    "Token status"
                );
                !refresh_expired
            }
            (access, refresh) => {
                debug!(
                    namespace = %ns,
                    has_access = access.is_some(),
                    has_refresh = refresh.is_some(),
                    "Missing tokens"
                );
                false
            }
        }
    }

    pub fn get_tokens_info(&self, ns: &SessionNamespace) -> TokensInfo {
        self.get_tokens_info_at(ns, Utc::now())
    }

    pub fn get_tokens_info_at(&self, ns: &SessionNamespace, now: DateTime<Utc>) -> TokensInfo {
        let tokens = self.get_tokens(ns);
        let access = tokens.access_token.as_deref();
        let refresh = tokens.refresh_token.as_deref();

        TokensInfo {
            has_access: access.is_some(),
            has_refresh: refresh.is_some(),
            access_expired: access.map(|t| codec::is_expired_at(Some(t), now)),
            access_expiration: access.and_then(|t| codec::expiration_time(Some(t))),
            refresh_expired: refresh.map(|t| codec::is_expired_at(Some(t), now)),
            refresh_expiration: refresh.and_then(|t| codec::expiration_time(Some(t))),
        }
    }

    /// Every namespace that currently holds an access token
    pub fn stored_namespaces(&self) -> Vec<SessionNamespace> {
        let keys = match self.durable.keys() {
            Ok(keys) => keys,
            Err(e) => {
                warn!("Failed to list storage keys: {}", e);
                return Vec::new();
            }
        };

        let prefix = format!("{}_", ACCESS_TOKEN_KEY);
        keys.iter()
            .filter_map(|key| {
                if key == ACCESS_TOKEN_KEY {
                    Some(SessionNamespace::Default)
                } else {
                    key.strip_prefix(&prefix)
                        .map(|id| SessionNamespace::from_user_id(Some(id)))
                }
            })
            .collect()
    }

    fn read(&self, key: &str) -> Option<String> {
        match self.durable.get_item(key) {
            Ok(value) => value.filter(|v| !v.is_empty()),
            Err(e) => {
                warn!(key = key, "Storage read failed: {}", e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::testing::mint;
    use crate::storage::MemoryStorage;

    fn store() -> (TokenStore, Arc<MemoryStorage>) {
        let durable = Arc::new(MemoryStorage::new());
        (TokenStore::new(durable.clone()), durable)
    }

    fn user(id: &str) -> SessionNamespace {
        SessionNamespace::ForUser(id.to_string())
    }

    /// Fails every write to keys containing `refresh`
    struct RefreshWriteFails(MemoryStorage);

    impl Storage for RefreshWriteFails {
        fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
            self.0.get_item(key)
        }

        fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
            if key.contains("refresh") {
                return Err(StorageError::Io(std::io::Error::other("disk full")));
            }
            self.0.set_item(key, value)
        }

        fn remove_item(&self, key: &str) -> Result<(), StorageError> {
            self.0.remove_item(key)
        }

        fn keys(&self) -> Result<Vec<String>, StorageError> {
            self.0.keys()
        }
    }

    /// Fails every operation
    struct Broken;

    impl Storage for Broken {
        fn get_item(&self, _: &str) -> Result<Option<String>, StorageError> {
            Err(StorageError::Poisoned)
        }

        fn set_item(&self, _: &str, _: &str) -> Result<(), StorageError> {
            Err(StorageError::Poisoned)
        }

        fn remove_item(&self, _: &str) -> Result<(), StorageError> {
            Err(StorageError::Poisoned)
        }

        fn keys(&self) -> Result<Vec<String>, StorageError> {
            Err(StorageError::Poisoned)
        }
    }

    #[test]
    fn test_namespace_keys() {
        assert_eq!(SessionNamespace::Default.access_key(), "access_token");
        assert_eq!(user("42").refresh_key(), "refresh_token_42");
        assert_eq!(SessionNamespace::from_user_id(Some("")), SessionNamespace::Default);
        assert_eq!(SessionNamespace::from_user_id(None), SessionNamespace::Default);
        assert_eq!(user("7").to_string(), "user:7");
    }

    #[test]
    fn test_set_get_round_trip() {
        let (store, _) = store();
        let pair = TokenPair::new(mint("access", 600), mint("refresh", 86400));

        store.set_tokens(&pair, &user("42")).unwrap();

        assert_eq!(store.get_tokens(&user("42")).into_pair(), Some(pair));
        assert_eq!(store.get_tokens(&SessionNamespace::Default), StoredTokens::default());
    }

    #[test]
    fn test_namespaced_write_moves_legacy_pointer() {
        let (store, durable) = store();
        let pair = TokenPair::new("a", "r");

        store.set_tokens(&pair, &SessionNamespace::Default).unwrap();
        assert_eq!(durable.get_item(CURRENT_USER_KEY).unwrap(), None);

        store.set_tokens(&pair, &user("42")).unwrap();
        assert_eq!(durable.get_item(CURRENT_USER_KEY).unwrap(), Some("42".to_string()));
    }

    #[test]
    fn test_clear_is_namespace_scoped() {
        let (store, durable) = store();
        let pair = TokenPair::new("a", "r");
        store.set_tokens(&pair, &SessionNamespace::Default).unwrap();
        store.set_tokens(&pair, &user("42")).unwrap();
        store.set_tokens(&pair, &user("7")).unwrap();

        store.clear_tokens(&SessionNamespace::Default).unwrap();

        assert_eq!(durable.get_item("access_token").unwrap(), None);
        assert_eq!(durable.get_item("refresh_token").unwrap(), None);
        assert_eq!(durable.get_item("access_token_42").unwrap(), Some("a".to_string()));

        store.clear_tokens(&user("42")).unwrap();
        assert!(store.get_tokens(&user("42")).into_pair().is_none());
        assert!(store.get_tokens(&user("7")).into_pair().is_some());
    }

    #[test]
    fn test_valid_with_expired_access_token() {
        let (store, _) = store();
        let ns = SessionNamespace::Default;
        store
            .set_tokens(&TokenPair::new(mint("access", -1), mint("refresh", 3600)), &ns)
            .unwrap();

        assert!(store.are_tokens_valid(&ns));

        let info = store.get_tokens_info(&ns);
        assert_eq!(info.access_expired, Some(true));
        assert_eq!(info.refresh_expired, Some(false));
        assert!(info.refresh_expiration.is_some());
    }

    #[test]
    fn test_invalid_when_refresh_expired() {
        let (store, _) = store();
        let ns = user("42");
        store
            .set_tokens(&TokenPair::new(mint("access", 3600), mint("refresh", -1)), &ns)
            .unwrap();

        assert!(!store.are_tokens_valid(&ns));
    }

    #[test]
    fn test_invalid_when_refresh_malformed() {
        let (store, _) = store();
        let ns = SessionNamespace::Default;
        store
            .set_tokens(&TokenPair::new(mint("access", 3600), "not-a-token"), &ns)
            .unwrap();

        assert!(!store.are_tokens_valid(&ns));
        assert_eq!(store.get_tokens_info(&ns).refresh_expiration, None);
        assert_eq!(store.get_tokens_info(&ns).refresh_expired, Some(true));
    }

    #[test]
    fn test_invalid_when_either_missing() {
        let (store, durable) = store();
        assert!(!store.are_tokens_valid(&SessionNamespace::Default));

        durable.set_item("refresh_token", &mint("refresh", 3600)).unwrap();
        assert!(!store.are_tokens_valid(&SessionNamespace::Default));
    }

    #[test]
    fn test_info_reports_unknown_for_missing_tokens() {
        let (store, _) = store();
        let info = store.get_tokens_info(&SessionNamespace::Default);

        assert!(!info.has_access);
        assert!(!info.has_refresh);
        assert_eq!(info.access_expired, None);
        assert_eq!(info.access_expiration, None);
        assert_eq!(info.refresh_expired, None);
        assert_eq!(info.refresh_expiration, None);
    }

    #[test]
    fn test_failed_write_leaves_no_partial_pair() {
        let store = TokenStore::new(Arc::new(RefreshWriteFails(MemoryStorage::new())));
        let ns = user("42");

        let result = store.set_tokens(&TokenPair::new("a", "r"), &ns);

        assert!(result.is_err());
        assert_eq!(store.get_tokens(&ns), StoredTokens::default());
    }

    #[test]
    fn test_reads_degrade_on_broken_storage() {
        let store = TokenStore::new(Arc::new(Broken));
        let ns = SessionNamespace::Default;

        assert_eq!(store.get_tokens(&ns), StoredTokens::default());
        assert!(!store.are_tokens_valid(&ns));
        assert!(!store.get_tokens_info(&ns).has_access);
        assert!(store.stored_namespaces().is_empty());
        assert!(store.clear_tokens(&ns).is_err());
    }

    #[test]
    fn test_stored_namespaces() {
        let (store, _) = store();
        let pair = TokenPair::new("a", "r");
        store.set_tokens(&pair, &SessionNamespace::Default).unwrap();
        store.set_tokens(&pair, &user("42")).unwrap();

        let namespaces = store.stored_namespaces();
        assert_eq!(namespaces.len(), 2);
        assert!(namespaces.contains(&SessionNamespace::Default));
        assert!(namespaces.contains(&user("42")));
    }
}
