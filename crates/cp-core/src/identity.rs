//! The installation-wide session identifier.
//!
//! The remote service threads chat history through this token, so it has to
//! survive restarts of the panel and must never be absent once the panel is
//! running.

use std::sync::{Arc, Mutex};

use tracing::{info, warn};
use uuid::Uuid;

use crate::storage::{KeyValueStore, StorageError};

/// Key under which the token is persisted.
pub const SESSION_ID_KEY: &str = "command_post_session_id";

/// Owns the persisted session token.
pub struct SessionIdentity {
    store: Arc<dyn KeyValueStore>,
    // Serialises read-then-create so two callers never mint different tokens.
    gate: Mutex<()>,
}

impl SessionIdentity {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            gate: Mutex::new(()),
        }
    }

    /// Return the persisted token, minting and persisting one if none exists.
    pub fn get_or_create(&self) -> Result<String, StorageError> {
        let _gate = self.lock_gate();
        if let Some(existing) = self.store.get(SESSION_ID_KEY)? {
            if !existing.is_empty() {
                return Ok(existing);
            }
        }
        let token = generate_token();
        self.store.set(SESSION_ID_KEY, &token)?;
        info!(session_id = %token, "created new session identifier");
        Ok(token)
    }

    /// The persisted token, if any, without creating one.
    pub fn current(&self) -> Result<Option<String>, StorageError> {
        self.store.get(SESSION_ID_KEY)
    }

    /// Replace the current token with a fresh one in a single write.
    ///
    /// Returns the replacement, which is guaranteed to differ from the
    /// cleared value. If the write fails the previous token stays in place.
    pub fn clear(&self) -> Result<String, StorageError> {
        let _gate = self.lock_gate();
        let previous = self.store.get(SESSION_ID_KEY)?;

        let mut token = generate_token();
        while previous.as_deref() == Some(token.as_str()) {
            token = generate_token();
        }
        self.store.set(SESSION_ID_KEY, &token)?;
        info!(session_id = %token, "session identifier reset");
        Ok(token)
    }

    fn lock_gate(&self) -> std::sync::MutexGuard<'_, ()> {
        self.gate.lock().unwrap_or_else(|e| {
            warn!("identity gate was poisoned, recovering");
            e.into_inner()
        })
    }
}

impl std::fmt::Debug for SessionIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionIdentity")
            .field("key", &SESSION_ID_KEY)
            .finish()
    }
}

/// `session_<unix-millis>_<9 random chars>`; opaque to every consumer.
fn generate_token() -> String {
    let millis = chrono::Utc::now().timestamp_millis();
    let random = Uuid::new_v4().simple().to_string();
    format!("session_{millis}_{}", &random[..9])
}
