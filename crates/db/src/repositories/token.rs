use async_trait::async_trait;
use chrono::Utc;
use tracing::debug;

use super::{StoreError, StoreKey, TokenStore};
use crate::{readiness::StoreReadiness, DbPool};

/// SQLite-backed token store. Every operation waits for the store to become ready.
#[derive(Clone)]
pub struct SqlTokenStore {
    readiness: StoreReadiness,
}

impl SqlTokenStore {
    pub fn new(readiness: StoreReadiness) -> Self {
        Self { readiness }
    }

    pub fn from_pool(pool: DbPool) -> Self {
        Self { readiness: StoreReadiness::ready_with(pool) }
    }

    pub fn readiness(&self) -> &StoreReadiness {
        &self.readiness
    }
}

#[async_trait]
impl TokenStore for SqlTokenStore {
    async fn get(&self, key: &StoreKey) -> Result<Option<String>, StoreError> {
        let pool = self.readiness.ready().await?;
        sqlx::query_scalar::<_, String>("SELECT value FROM token WHERE key = ?")
            .bind(key.as_str())
            .fetch_optional(&pool)
            .await
            .map_err(|error| StoreError::unknown("get", error))
    }

    async fn set(&self, key: &StoreKey, value: &str) -> Result<(), StoreError> {
        let pool = self.readiness.ready().await?;
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            "INSERT INTO token (key, value, created_at, updated_at) VALUES (?, ?, ?, ?)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
        )
        .bind(key.as_str())
        .bind(value)
        .bind(&now)
        .bind(&now)
        .execute(&pool)
        .await
        .map_err(|error| StoreError::unknown("set", error))?;

        debug!(event_name = "store.token.set", key = %key, "token value stored");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::repositories::{SqlTokenStore, StoreError, StoreKey, TokenStore, BOT_TOKEN_KEY};
    use crate::{connect_with_settings, migrations, StoreReadiness};

    async fn store() -> SqlTokenStore {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        SqlTokenStore::from_pool(pool)
    }

    #[tokio::test]
    async fn set_then_get_round_trips_and_missing_is_none() {
        let store = store().await;
        store.set(&StoreKey::from("k"), "v").await.expect("set");

        assert_eq!(store.get(&StoreKey::from("k")).await.expect("get"), Some("v".to_owned()));
        assert_eq!(store.get(&StoreKey::from("missing")).await.expect("get"), None);
    }

    #[tokio::test]
    async fn set_overwrites_existing_row() {
        let store = store().await;
        let key = StoreKey::from(BOT_TOKEN_KEY);
        store.set(&key, "xoxb-first").await.expect("first grant");
        store.set(&key, "xoxb-second").await.expect("second grant");

        assert_eq!(store.get(&key).await.expect("get"), Some("xoxb-second".to_owned()));

        let pool = store.readiness().ready().await.expect("pool");
        let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM token")
            .fetch_one(&pool)
            .await
            .expect("count rows");
        assert_eq!(rows, 1);
    }

    #[tokio::test]
    async fn non_string_key_is_rejected_before_touching_the_database() {
        let store = SqlTokenStore::new(StoreReadiness::new());

        // The readiness is never resolved, so reaching the database would hang.
        let error = store.get_untyped(&json!(42)).await.expect_err("number key");
        assert!(matches!(error, StoreError::KeyNotString { found: "number" }));
    }

    #[tokio::test]
    async fn operations_wait_for_readiness() {
        let readiness = StoreReadiness::new();
        let store = SqlTokenStore::new(readiness.clone());

        let pending = {
            let store = store.clone();
            tokio::spawn(async move { store.set(&StoreKey::from("k"), "v").await })
        };
        tokio::task::yield_now().await;
        readiness.connect("sqlite::memory:", 1, 5).await.expect("connect");

        pending.await.expect("task").expect("set after readiness");
        assert_eq!(store.get(&StoreKey::from("k")).await.expect("get"), Some("v".to_owned()));
    }

    #[tokio::test]
    async fn failed_store_reports_not_ready() {
        let readiness = StoreReadiness::new();
        let _ = readiness.connect("sqlite:///nonexistent-dir/for/speck/test.db", 1, 1).await;
        let store = SqlTokenStore::new(readiness);

        let error = store.get(&StoreKey::from("k")).await.expect_err("store failed");
        assert!(matches!(error, StoreError::NotReady(_)));
    }
}
