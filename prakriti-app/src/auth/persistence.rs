//! Serialized session snapshot surviving restarts

use std::sync::Arc;

use anyhow::Result;
use prakriti_core::types::User;
use serde::{Deserialize, Serialize};

use super::storage::Storage;

pub const SESSION_STORAGE_KEY: &str = "auth-storage";

/// What survives a restart: everything but the loading flag
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedSession {
    #[serde(default)]
    pub user: Option<User>,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub is_authenticated: bool,
}

pub trait SessionPersistence: Send + Sync {
    fn load(&self) -> Result<Option<PersistedSession>>;
    fn save(&self, session: &PersistedSession) -> Result<()>;
    fn clear(&self) -> Result<()>;
}

/// Stores the snapshot as JSON under a single [`Storage`] key
pub struct StoragePersistence {
    storage: Arc<dyn Storage>,
    key: String,
}

impl StoragePersistence {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self::with_key(storage, SESSION_STORAGE_KEY)
    }

    pub fn with_key(storage: Arc<dyn Storage>, key: impl Into<String>) -> Self {
        Self {
            storage,
            key: key.into(),
        }
    }
}

impl SessionPersistence for StoragePersistence {
    fn load(&self) -> Result<Option<PersistedSession>> {
        let Some(raw) = self.storage.get(&self.key)? else {
            return Ok(None);
        };
        Ok(Some(serde_json::from_str(&raw)?))
    }

    fn save(&self, session: &PersistedSession) -> Result<()> {
        let raw = serde_json::to_string(session)?;
        self.storage.set(&self.key, &raw)
    }

    fn clear(&self) -> Result<()> {
        self.storage.remove(&self.key)
    }
}
