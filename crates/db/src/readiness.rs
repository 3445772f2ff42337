//! One-shot initialization of the backing store.
//!
//! The store moves through `Uninitialized -> Connecting -> Ready | Failed` exactly once.
//! Dependents hold a cloned [`StoreReadiness`] and await [`StoreReadiness::ready`] before
//! every operation, so a store handle can be handed out before the pool exists.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{info, warn};

use crate::{connect_with_settings, migrations, repositories::StoreError, DbPool};

#[derive(Clone, Debug)]
pub enum StoreState {
    Uninitialized,
    Connecting,
    Ready(DbPool),
    Failed(String),
}

impl StoreState {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Uninitialized => "uninitialized",
            Self::Connecting => "connecting",
            Self::Ready(_) => "ready",
            Self::Failed(_) => "failed",
        }
    }
}

#[derive(Clone)]
pub struct StoreReadiness {
    state: Arc<watch::Sender<StoreState>>,
}

impl Default for StoreReadiness {
    fn default() -> Self {
        Self::new()
    }
}

impl StoreReadiness {
    pub fn new() -> Self {
        let (sender, _receiver) = watch::channel(StoreState::Uninitialized);
        Self { state: Arc::new(sender) }
    }

    /// Readiness for a pool that is already connected and migrated.
    pub fn ready_with(pool: DbPool) -> Self {
        let (sender, _receiver) = watch::channel(StoreState::Ready(pool));
        Self { state: Arc::new(sender) }
    }

    pub fn state(&self) -> StoreState {
        self.state.borrow().clone()
    }

    /// Connects and migrates. Only the first caller performs the transition; later calls
    /// get `AlreadyInitialized` and should await [`Self::ready`] instead.
    pub async fn connect(
        &self,
        database_url: &str,
        max_connections: u32,
        timeout_secs: u64,
    ) -> Result<DbPool, StoreError> {
        self.begin()?;
        info!(event_name = "store.readiness.connecting", "connecting token store");

        match open(database_url, max_connections, timeout_secs).await {
            Ok(pool) => {
                self.state.send_replace(StoreState::Ready(pool.clone()));
                info!(event_name = "store.readiness.ready", "token store ready");
                Ok(pool)
            }
            Err(error) => {
                warn!(
                    event_name = "store.readiness.failed",
                    error = %error,
                    "token store initialization failed"
                );
                self.state.send_replace(StoreState::Failed(error.to_string()));
                Err(error)
            }
        }
    }

    pub async fn ready(&self) -> Result<DbPool, StoreError> {
        let mut receiver = self.state.subscribe();
        let settled = receiver
            .wait_for(|state| matches!(state, StoreState::Ready(_) | StoreState::Failed(_)))
            .await
            .map_err(|_| StoreError::NotReady("readiness channel closed".to_string()))?;

        match &*settled {
            StoreState::Ready(pool) => Ok(pool.clone()),
            StoreState::Failed(reason) => Err(StoreError::NotReady(reason.clone())),
            other => Err(StoreError::NotReady(format!("store is {}", other.label()))),
        }
    }

    fn begin(&self) -> Result<(), StoreError> {
        let mut started = false;
        self.state.send_if_modified(|state| {
            if matches!(state, StoreState::Uninitialized) {
                *state = StoreState::Connecting;
                started = true;
                true
            } else {
                false
            }
        });

        if started {
            Ok(())
        } else {
            Err(StoreError::AlreadyInitialized)
        }
    }
}

async fn open(
    database_url: &str,
    max_connections: u32,
    timeout_secs: u64,
) -> Result<DbPool, StoreError> {
    let pool = connect_with_settings(database_url, max_connections, timeout_secs)
        .await
        .map_err(|error| StoreError::unknown("connect", error))?;
    migrations::run_pending(&pool).await.map_err(|error| StoreError::unknown("migrate", error))?;
    Ok(pool)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{StoreReadiness, StoreState};
    use crate::repositories::StoreError;

    #[tokio::test]
    async fn connect_moves_to_ready_and_releases_waiters() {
        let readiness = StoreReadiness::new();
        assert!(matches!(readiness.state(), StoreState::Uninitialized));

        let waiter = {
            let readiness = readiness.clone();
            tokio::spawn(async move { readiness.ready().await })
        };
        tokio::task::yield_now().await;

        readiness.connect("sqlite::memory:", 1, 5).await.expect("connect");

        let pool = tokio::time::timeout(Duration::from_secs(5), waiter)
            .await
            .expect("waiter should be released")
            .expect("waiter task")
            .expect("ready pool");
        assert!(matches!(readiness.state(), StoreState::Ready(_)));
        pool.close().await;
    }

    #[tokio::test]
    async fn second_connect_is_rejected() {
        let readiness = StoreReadiness::new();
        let pool = readiness.connect("sqlite::memory:", 1, 5).await.expect("connect");

        let error = readiness.connect("sqlite::memory:", 1, 5).await.expect_err("second connect");
        assert!(matches!(error, StoreError::AlreadyInitialized));
        pool.close().await;
    }

    #[tokio::test]
    async fn failed_connect_surfaces_to_waiters() {
        let readiness = StoreReadiness::new();
        let error = readiness
            .connect("sqlite:///nonexistent-dir/for/speck/test.db", 1, 1)
            .await
            .expect_err("connect should fail");
        assert!(matches!(error, StoreError::Unknown { operation: "connect", .. }));

        let waited = readiness.ready().await.expect_err("ready should report failure");
        assert!(matches!(waited, StoreError::NotReady(_)));
        assert_eq!(readiness.state().label(), "failed");
    }
}
