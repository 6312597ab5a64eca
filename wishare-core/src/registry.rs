//! Which session is active in this tab
//!
//! Tabs of one profile share durable storage but not tab storage. The
//! active user id therefore lives in tab storage, so two tabs can hold two
//! different logins. The durable `current_user_id` is only read as a
//! fallback for sessions created before tab isolation and is never copied
//! into tab storage, otherwise it would spread to every new tab.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::storage::{Storage, StorageError};
use crate::store::{CURRENT_USER_KEY, SessionNamespace};

#[derive(Clone)]
pub struct SessionRegistry {
    tab: Arc<dyn Storage>,
    durable: Arc<dyn Storage>,
}

impl SessionRegistry {
    pub fn new(tab: Arc<dyn Storage>, durable: Arc<dyn Storage>) -> Self {
        Self { tab, durable }
    }

    /// Mark `user_id` active in this tab only
    pub fn set_current_user_id(&self, user_id: &str) -> Result<(), StorageError> {
        self.tab.set_item(CURRENT_USER_KEY, user_id)?;
        debug!(user_id = user_id, "Active user set for tab");
        Ok(())
    }

    pub fn get_current_user_id(&self) -> Option<String> {
        if let Some(id) = read(self.tab.as_ref(), "tab") {
            return Some(id);
        }

        let legacy = read(self.durable.as_ref(), "durable");
        if let Some(ref id) = legacy {
            debug!(user_id = %id, "Using legacy durable user pointer");
        }
        legacy
    }

    /// Clear both the tab pointer and the legacy durable pointer
    pub fn clear_current_user_id(&self) -> Result<(), StorageError> {
        let tab = self.tab.remove_item(CURRENT_USER_KEY);
        let durable = self.durable.remove_item(CURRENT_USER_KEY);
        tab.and(durable)
    }

    /// Namespace the current tab's tokens live in
    pub fn resolve_namespace(&self) -> SessionNamespace {
        SessionNamespace::from_user_id(self.get_current_user_id().as_deref())
    }
}

fn read(storage: &dyn Storage, which: &str) -> Option<String> {
    match storage.get_item(CURRENT_USER_KEY) {
        Ok(value) => value.filter(|v| !v.is_empty()),
        Err(e) => {
            warn!(storage = which, "Failed to read current user id: {}", e);
            None
        }
    }
}
