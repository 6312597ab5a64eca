//! wishare-core: Session and token lifecycle for Wishare clients
//!
//! This crate provides:
//! - Bearer token decoding and expiry checks
//! - Namespaced token persistence over pluggable storage
//! - Tab-scoped active session tracking
//! - A cancellable session monitor
//! - The `AuthSession` facade and an HTTP client that refreshes through it

pub mod client;
pub mod codec;
pub mod config;
pub mod monitor;
pub mod registry;
pub mod session;
pub mod storage;
pub mod store;

pub use client::{ApiClient, ApiError};
pub use codec::{Claims, DecodeError};
pub use config::Config;
pub use monitor::{MonitorHandle, SessionMonitor, SessionStatus};
pub use registry::SessionRegistry;
pub use session::{AuthSession, SessionError, SessionState};
pub use storage::{FileStorage, MemoryStorage, Storage, StorageError};
pub use store::{SessionNamespace, StoredTokens, TokenPair, TokenStore, TokensInfo};

/// Default API base URL (Django REST backend)
pub const DEFAULT_API_URL: &str = "http://localhost:8000/api";

/// Seconds before access token expiry at which a refresh is due
pub const DEFAULT_REFRESH_THRESHOLD_SECS: u64 = 300;

/// Default session monitor polling interval in milliseconds
pub const DEFAULT_MONITOR_INTERVAL_MS: u64 = 5000;
