//! Lifecycle (§4.10): ordered startup/shutdown wiring the lock manager, the
//! store, and Orchestration together. Shutdown always attempts every step so
//! `release_lock` runs even if termination or store close fails.

use crate::db::Database;
use crate::error::{LockError, OrchestrationError};
use crate::lock::LockManager;
use crate::orchestration::Orchestration;
use crate::queue::LaunchQueue;
use crate::streaming::StreamingService;
use chrono::{DateTime, Utc};
use std::sync::Arc;

pub struct InstanceMetadata {
    pub pid: u32,
    pub port: u16,
    pub uptime_ms: u64,
    pub active_agents: usize,
    pub database_status: &'static str,
    pub started_at: DateTime<Utc>,
    pub instance_id: String,
}

pub struct Instance {
    pub store: Arc<Database>,
    pub streaming: Arc<StreamingService>,
    pub orchestration: Arc<Orchestration>,
    lock: LockManager,
    port: u16,
    started_at: DateTime<Utc>,
    instance_id: String,
}

impl Instance {
    /// Startup (§4.10): `cleanup_stale_lock` -> `acquire_lock` -> open the
    /// store (migrations run via `Database::new`, idempotent) -> wire
    /// Orchestration.
    pub fn startup(lock_path: impl Into<std::path::PathBuf>, db_path: &str, port: u16) -> Result<Self, StartupError> {
        let lock = LockManager::new(lock_path);
        lock.cleanup_stale_lock()?;
        if lock.has_running_instance() {
            return Err(StartupError::AlreadyRunning);
        }
        let acquired = lock.acquire_lock(port)?;

        let store = Arc::new(
            Database::new(db_path)
                .map_err(|e| StartupError::Store(OrchestrationError::Store(e.into())))?,
        );
        let streaming = Arc::new(StreamingService::new(
            store.clone(),
            Arc::new(crate::streaming::LoggingGateway),
        ));
        let queue = Arc::new(LaunchQueue::new());
        let orchestration = Arc::new(Orchestration::new(store.clone(), streaming.clone(), queue));

        Ok(Self {
            store,
            streaming,
            orchestration,
            lock,
            port,
            started_at: acquired.started_at,
            instance_id: acquired.instance_id,
        })
    }

    /// Shutdown (§4.10): every step runs independently; a failure in (a) or
    /// (b) is logged but never skips (c).
    pub fn shutdown(self) {
        let active = self
            .orchestration
            .list_active_agents()
            .unwrap_or_else(|error| {
                log::error!("failed to list active agents during shutdown: {error}");
                Vec::new()
            });
        for agent in active {
            if let Err(error) = self.orchestration.terminate_agent(&agent.id) {
                log::error!("failed to terminate {} during shutdown: {error}", agent.id);
            }
        }

        // The store has no explicit close (the connection drops with `self`);
        // logging here documents the step even though it cannot fail.
        drop(self.store);

        if let Err(error) = self.lock.release_lock() {
            log::error!("failed to release instance lock: {error}");
        }
    }

    pub fn metadata(&self) -> InstanceMetadata {
        let active_agents = self
            .orchestration
            .list_active_agents()
            .map(|v| v.len())
            .unwrap_or(0);
        InstanceMetadata {
            pid: std::process::id(),
            port: self.port,
            uptime_ms: (Utc::now() - self.started_at).num_milliseconds().max(0) as u64,
            active_agents,
            database_status: "open",
            started_at: self.started_at,
            instance_id: self.instance_id.clone(),
        }
    }
}

#[derive(Debug)]
pub enum StartupError {
    AlreadyRunning,
    Lock(LockError),
    Store(OrchestrationError),
}

impl std::fmt::Display for StartupError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AlreadyRunning => write!(f, "another instance is already running"),
            Self::Lock(e) => write!(f, "{e}"),
            Self::Store(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for StartupError {}

impl From<LockError> for StartupError {
    fn from(value: LockError) -> Self {
        Self::Lock(value)
    }
}
