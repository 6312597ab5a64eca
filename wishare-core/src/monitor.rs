//! Periodic session status reporting
//!
//! The monitor owns no state beyond its running flag. Each tick reads the
//! store, logs a snapshot and hands it to an optional subscriber. Ticks are
//! synchronous, so two ticks never overlap.
//!
//! Stopping is deterministic: once [`MonitorHandle::stop`] returns, the
//! subscriber is never called again.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::codec;
use crate::registry::SessionRegistry;
use crate::store::{TokenStore, TokensInfo};

type Subscriber = Arc<dyn Fn(&SessionStatus) + Send + Sync>;

/// One observation of the active session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStatus {
    pub timestamp: DateTime<Utc>,
    pub namespace: String,
    pub user_id: Option<String>,
    pub are_valid: bool,
    #[serde(flatten)]
    pub tokens: TokensInfo,
    /// Negative once expired
    pub access_expires_in_secs: Option<i64>,
    pub refresh_expires_in_secs: Option<i64>,
}

impl SessionStatus {
    pub fn capture(store: &TokenStore, registry: &SessionRegistry, now: DateTime<Utc>) -> Self {
        let user_id = registry.get_current_user_id();
        let ns = registry.resolve_namespace();
        let tokens = store.get_tokens_info_at(&ns, now);
        let raw = store.get_tokens(&ns);
        let remaining = |token: Option<&str>| {
            codec::time_remaining_at(token, now).map(|d| d.num_seconds())
        };

        Self {
            timestamp: now,
            namespace: ns.to_string(),
            user_id,
            are_valid: store.are_tokens_valid_at(&ns, now),
            access_expires_in_secs: remaining(raw.access_token.as_deref()),
            refresh_expires_in_secs: remaining(raw.refresh_token.as_deref()),
            tokens,
        }
    }
}

#[derive(Clone)]
pub struct SessionMonitor {
    store: TokenStore,
    registry: SessionRegistry,
    subscriber: Option<Subscriber>,
}

impl SessionMonitor {
    pub fn new(store: TokenStore, registry: SessionRegistry) -> Self {
        Self {
            store,
            registry,
            subscriber: None,
        }
    }

    /// Call `f` with every snapshot taken by a started monitor
    pub fn on_tick<F>(mut self, f: F) -> Self
    where
        F: Fn(&SessionStatus) + Send + Sync + 'static,
    {
        self.subscriber = Some(Arc::new(f));
        self
    }

    /// Snapshot now, without a timer
    pub fn status(&self) -> SessionStatus {
        SessionStatus::capture(&self.store, &self.registry, Utc::now())
    }

    /// Start ticking every `period` (first tick fires immediately)
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self, period: Duration) -> MonitorHandle {
        let period = period.max(Duration::from_millis(1));
        let cancel = CancellationToken::new();
        let gate = Arc::new(Mutex::new(true));

        info!(interval_ms = period.as_millis() as u64, "Starting session monitoring");

        let task = tokio::spawn({
            let cancel = cancel.clone();
            let gate = gate.clone();
            let monitor = self.clone();
            async move {
                let mut ticker = interval(period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = ticker.tick() => {
                            if !monitor.tick(&gate) {
                                break;
                            }
                        }
                    }
                }
            }
        });

        MonitorHandle {
            cancel,
            gate,
            task: Mutex::new(Some(task)),
        }
    }

    /// Runs one tick under the gate; false once the handle was stopped
    fn tick(&self, gate: &Mutex<bool>) -> bool {
        let running = gate.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if !*running {
            return false;
        }

        let status = self.status();
        info!(
            namespace = %status.namespace,
            is_valid = status.are_valid,
            has_access = status.tokens.has_access,
            has_refresh = status.tokens.has_refresh,
            access_expired = ?status.tokens.access_expired,
            refresh_expired = ?status.tokens.refresh_expired,
            access_expires_in_min = ?status.access_expires_in_secs.map(|s| s / 60),
            refresh_expires_in_h = ?status.refresh_expires_in_secs.map(|s| s / 3600),
            "Session monitor"
        );

        if let Some(ref subscriber) = self.subscriber {
            subscriber(&status);
        }
        true
    }
}

/// Running monitor; stopping (or dropping) it cancels the timer
pub struct MonitorHandle {
    cancel: CancellationToken,
    gate: Arc<Mutex<bool>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl MonitorHandle {
    /// Cancel the timer. Safe to call more than once.
    ///
    /// Waits for a tick that is already running, so no subscriber call
    /// happens after this returns.
    pub fn stop(&self) {
        let was_running = {
            let mut running = self.gate.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            std::mem::replace(&mut *running, false)
        };

        self.cancel.cancel();
        if let Some(task) = self
            .task
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
        {
            task.abort();
        }

        if was_running {
            info!("Stopped session monitoring");
        }
    }
}

impl Drop for MonitorHandle {
    fn drop(&mut self) {
        self.stop();
    }
}
