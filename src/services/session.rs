//! Sessions: opaque server-side session records plus a per-user registry
//! of active session ids.
//!
//! The registry (`user_sessions:{user_id}` set) is advisory; the session
//! record itself (`session:{sid}`, TTL-bound) is authoritative for whether
//! a session is still valid.

use async_trait::async_trait;
use futures::future::join_all;
use redis::{aio::ConnectionManager, Client};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::Mutex;
use uuid::Uuid;

use crate::config::RedisConfig;
use crate::error::AppError;
use crate::models::Role;

/// Minimal identity claims held server-side for a session. The cookie only
/// ever carries the opaque session id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionData {
    pub user_id: Uuid,
    pub role: Role,
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn save_session(
        &self,
        session_id: &str,
        data: &SessionData,
        ttl_seconds: i64,
    ) -> Result<(), AppError>;
    async fn load_session(&self, session_id: &str) -> Result<Option<SessionData>, AppError>;
    /// Destroying a session that is already gone is a success.
    async fn destroy_session(&self, session_id: &str) -> Result<(), AppError>;

    async fn add_session(&self, user_id: Uuid, session_id: &str) -> Result<(), AppError>;
    async fn remove_session(&self, user_id: Uuid, session_id: &str) -> Result<(), AppError>;
    async fn list_sessions(&self, user_id: Uuid) -> Result<Vec<String>, AppError>;
    /// Batched removal of the whole registry set; batch-or-nothing, a
    /// failed batch is reported rather than leaving a silent partial state.
    async fn remove_all_sessions(&self, user_id: Uuid) -> Result<(), AppError>;

    async fn health_check(&self) -> Result<(), AppError>;
}

fn session_key(session_id: &str) -> String {
    format!("session:{session_id}")
}

fn registry_key(user_id: Uuid) -> String {
    format!("user_sessions:{user_id}")
}

/// Redis-backed session store.
#[derive(Clone)]
pub struct RedisSessions {
    manager: ConnectionManager,
}

impl RedisSessions {
    pub async fn new(config: &RedisConfig) -> Result<Self, AppError> {
        tracing::info!(url = %config.url, "Connecting to Redis");
        let client = Client::open(config.url.clone())?;

        // ConnectionManager reconnects automatically.
        let manager = client.get_connection_manager().await.map_err(|e| {
            tracing::error!(error = %e, "Failed to get Redis connection manager");
            AppError::Transient(anyhow::anyhow!("Failed to connect to Redis: {e}"))
        })?;

        tracing::info!("Connected to Redis");
        Ok(Self { manager })
    }
}

#[async_trait]
impl SessionStore for RedisSessions {
    async fn save_session(
        &self,
        session_id: &str,
        data: &SessionData,
        ttl_seconds: i64,
    ) -> Result<(), AppError> {
        let mut conn = self.manager.clone();
        let payload = serde_json::to_string(data)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("Session encode error: {e}")))?;

        redis::cmd("SET")
            .arg(session_key(session_id))
            .arg(payload)
            .arg("EX")
            .arg(ttl_seconds)
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn load_session(&self, session_id: &str) -> Result<Option<SessionData>, AppError> {
        let mut conn = self.manager.clone();
        let payload: Option<String> = redis::cmd("GET")
            .arg(session_key(session_id))
            .query_async(&mut conn)
            .await?;

        match payload {
            Some(json) => {
                let data = serde_json::from_str(&json)
                    .map_err(|e| AppError::Internal(anyhow::anyhow!("Session decode error: {e}")))?;
                Ok(Some(data))
            }
            None => Ok(None),
        }
    }

    async fn destroy_session(&self, session_id: &str) -> Result<(), AppError> {
        let mut conn = self.manager.clone();
        redis::cmd("DEL")
            .arg(session_key(session_id))
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn add_session(&self, user_id: Uuid, session_id: &str) -> Result<(), AppError> {
        let mut conn = self.manager.clone();
        redis::cmd("SADD")
            .arg(registry_key(user_id))
            .arg(session_id)
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn remove_session(&self, user_id: Uuid, session_id: &str) -> Result<(), AppError> {
        let mut conn = self.manager.clone();
        redis::cmd("SREM")
            .arg(registry_key(user_id))
            .arg(session_id)
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn list_sessions(&self, user_id: Uuid) -> Result<Vec<String>, AppError> {
        let mut conn = self.manager.clone();
        let members: Vec<String> = redis::cmd("SMEMBERS")
            .arg(registry_key(user_id))
            .query_async(&mut conn)
            .await?;
        Ok(members)
    }

    async fn remove_all_sessions(&self, user_id: Uuid) -> Result<(), AppError> {
        let members = self.list_sessions(user_id).await?;
        if members.is_empty() {
            return Ok(());
        }

        let mut conn = self.manager.clone();
        let key = registry_key(user_id);
        let mut pipe = redis::pipe();
        for sid in &members {
            pipe.cmd("SREM").arg(&key).arg(sid);
        }
        pipe.query_async::<_, ()>(&mut conn).await?;
        Ok(())
    }

    async fn health_check(&self) -> Result<(), AppError> {
        let mut conn = self.manager.clone();
        redis::cmd("PING").query_async::<_, ()>(&mut conn).await?;
        Ok(())
    }
}

/// In-memory session store for tests.
#[derive(Default)]
pub struct MemorySessions {
    sessions: Mutex<HashMap<String, SessionData>>,
    registry: Mutex<HashMap<Uuid, HashSet<String>>>,
}

impl MemorySessions {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemorySessions {
    async fn save_session(
        &self,
        session_id: &str,
        data: &SessionData,
        _ttl_seconds: i64,
    ) -> Result<(), AppError> {
        self.sessions
            .lock()
            .map_err(lock_err)?
            .insert(session_id.to_string(), data.clone());
        Ok(())
    }

    async fn load_session(&self, session_id: &str) -> Result<Option<SessionData>, AppError> {
        Ok(self
            .sessions
            .lock()
            .map_err(lock_err)?
            .get(session_id)
            .cloned())
    }

    async fn destroy_session(&self, session_id: &str) -> Result<(), AppError> {
        self.sessions.lock().map_err(lock_err)?.remove(session_id);
        Ok(())
    }

    async fn add_session(&self, user_id: Uuid, session_id: &str) -> Result<(), AppError> {
        self.registry
            .lock()
            .map_err(lock_err)?
            .entry(user_id)
            .or_default()
            .insert(session_id.to_string());
        Ok(())
    }

    async fn remove_session(&self, user_id: Uuid, session_id: &str) -> Result<(), AppError> {
        if let Some(set) = self.registry.lock().map_err(lock_err)?.get_mut(&user_id) {
            set.remove(session_id);
        }
        Ok(())
    }

    async fn list_sessions(&self, user_id: Uuid) -> Result<Vec<String>, AppError> {
        Ok(self
            .registry
            .lock()
            .map_err(lock_err)?
            .get(&user_id)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn remove_all_sessions(&self, user_id: Uuid) -> Result<(), AppError> {
        self.registry.lock().map_err(lock_err)?.remove(&user_id);
        Ok(())
    }

    async fn health_check(&self) -> Result<(), AppError> {
        Ok(())
    }
}

fn lock_err<T>(_: std::sync::PoisonError<T>) -> AppError {
    AppError::Internal(anyhow::anyhow!("Session mutex poisoned"))
}

/// Orchestrates session lifecycle over a `SessionStore`.
#[derive(Clone)]
pub struct SessionManager {
    store: Arc<dyn SessionStore>,
    ttl_seconds: i64,
}

impl SessionManager {
    pub fn new(store: Arc<dyn SessionStore>, ttl_days: i64) -> Self {
        Self {
            store,
            ttl_seconds: ttl_days * 24 * 60 * 60,
        }
    }

    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    /// Establish a fresh session after authentication.
    ///
    /// Sequence: (1) destroy any pre-auth session so a fixed session id
    /// cannot become privileged, (2) create the new session record,
    /// (3) register the new id. A failure before step 3 leaves no registry
    /// entry behind.
    pub async fn establish(
        &self,
        user_id: Uuid,
        role: Role,
        previous_session_id: Option<&str>,
    ) -> Result<String, AppError> {
        if let Some(prev) = previous_session_id {
            self.store.destroy_session(prev).await?;
            self.store.remove_session(user_id, prev).await?;
        }

        let session_id = Uuid::new_v4().to_string();
        let data = SessionData { user_id, role };

        self.store
            .save_session(&session_id, &data, self.ttl_seconds)
            .await?;
        self.store.add_session(user_id, &session_id).await?;

        tracing::debug!(user_id = %user_id, "Session established");
        Ok(session_id)
    }

    /// Drop a single session (logout on one device).
    pub async fn clear(&self, user_id: Uuid, session_id: &str) -> Result<(), AppError> {
        self.store.remove_session(user_id, session_id).await?;
        self.store.destroy_session(session_id).await?;
        Ok(())
    }

    /// Drop every session for a user (logout-all).
    ///
    /// Each tracked session is destroyed first, concurrently, so none can
    /// survive the registry drain; a session that is already gone counts as
    /// destroyed.
    pub async fn clear_all(&self, user_id: Uuid) -> Result<(), AppError> {
        let sessions = self.store.list_sessions(user_id).await?;

        let results = join_all(
            sessions
                .iter()
                .map(|sid| self.store.destroy_session(sid)),
        )
        .await;
        for result in results {
            result?;
        }

        self.store.remove_all_sessions(user_id).await?;
        Ok(())
    }
}
