//! Identity collaborator handle
//!
//! The identity provider is external. This module owns the process-wide
//! handle to it (explicit init/teardown, one live instance at a time) and the
//! login callback that saves the user's session record.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use thiserror::Error;
use tracing::info;

#[derive(Debug, Clone, Deserialize)]
pub struct IdentityConfig {
    pub project_id: String,
    pub auth_domain: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentityError {
    #[error("identity handle is already initialized")]
    AlreadyInitialized,

    #[error("identity handle is not initialized")]
    NotInitialized,

    #[error("failed to save session: {0}")]
    Sink(String),
}

/// Profile delivered by the identity provider on login
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginProfile {
    pub uid: String,
    pub display_name: Option<String>,
    pub email: Option<String>,
    pub photo_url: Option<String>,
}

/// Stored user record, merged on every login
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub uid: String,
    pub display_name: Option<String>,
    pub email: Option<String>,
    pub photo_url: Option<String>,
    pub last_login: DateTime<Utc>,
}

/// External "save session" call
#[async_trait]
pub trait SessionSink: Send + Sync {
    /// Merge `record` into the stored user record
    async fn save_session(&self, record: &UserRecord) -> Result<(), IdentityError>;
}

/// In-process session sink with merge semantics
#[derive(Debug, Default)]
pub struct MemorySessionSink {
    users: Mutex<HashMap<String, UserRecord>>,
}

impl MemorySessionSink {
    pub fn get(&self, uid: &str) -> Option<UserRecord> {
        self.users
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(uid)
            .cloned()
    }
}

#[async_trait]
impl SessionSink for MemorySessionSink {
    async fn save_session(&self, record: &UserRecord) -> Result<(), IdentityError> {
        let mut users = self.users.lock().unwrap_or_else(|e| e.into_inner());
        match users.get_mut(&record.uid) {
            Some(existing) => {
                // Missing fields keep their stored value
                if record.display_name.is_some() {
                    existing.display_name = record.display_name.clone();
                }
                if record.email.is_some() {
                    existing.email = record.email.clone();
                }
                if record.photo_url.is_some() {
                    existing.photo_url = record.photo_url.clone();
                }
                existing.last_login = record.last_login;
            }
            None => {
                users.insert(record.uid.clone(), record.clone());
            }
        }
        Ok(())
    }
}

/// A live identity instance
pub struct Identity {
    config: IdentityConfig,
    sink: Arc<dyn SessionSink>,
}

impl Identity {
    fn create(config: IdentityConfig, sink: Arc<dyn SessionSink>) -> Arc<Self> {
        info!(
            "Initializing identity for project {} ({})",
            config.project_id, config.auth_domain
        );
        Arc::new(Self { config, sink })
    }

    pub fn config(&self) -> &IdentityConfig {
        &self.config
    }

    /// Login callback: save the user's session record
    pub async fn on_login(&self, profile: LoginProfile) -> Result<UserRecord, IdentityError> {
        let record = UserRecord {
            uid: profile.uid,
            display_name: profile.display_name,
            email: profile.email,
            photo_url: profile.photo_url,
            last_login: Utc::now(),
        };

        self.sink.save_session(&record).await?;
        info!(uid = %record.uid, "Saved session for {}", self.config.project_id);
        Ok(record)
    }
}

/// Owner of the single identity instance
#[derive(Default)]
pub struct IdentityHandle {
    slot: RwLock<Option<Arc<Identity>>>,
}

impl IdentityHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn init(
        &self,
        config: IdentityConfig,
        sink: Arc<dyn SessionSink>,
    ) -> Result<Arc<Identity>, IdentityError> {
        let mut slot = self.slot.write().unwrap_or_else(|e| e.into_inner());
        if slot.is_some() {
            return Err(IdentityError::AlreadyInitialized);
        }

        let identity = Identity::create(config, sink);
        *slot = Some(Arc::clone(&identity));
        Ok(identity)
    }

    /// The live instance, created from `config` on first use
    pub fn get_or_init(
        &self,
        config: IdentityConfig,
        sink: Arc<dyn SessionSink>,
    ) -> Arc<Identity> {
        if let Ok(identity) = self.get() {
            return identity;
        }

        let mut slot = self.slot.write().unwrap_or_else(|e| e.into_inner());
        match slot.as_ref() {
            Some(identity) => Arc::clone(identity),
            None => {
                let identity = Identity::create(config, sink);
                *slot = Some(Arc::clone(&identity));
                identity
            }
        }
    }

    pub fn get(&self) -> Result<Arc<Identity>, IdentityError> {
        self.slot
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .ok_or(IdentityError::NotInitialized)
    }

    pub fn is_initialized(&self) -> bool {
        self.slot
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    /// Drop the live instance. Returns false if there was none.
    pub fn teardown(&self) -> bool {
        let previous = self
            .slot
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if previous.is_some() {
            info!("Identity torn down");
        }
        previous.is_some()
    }
}
