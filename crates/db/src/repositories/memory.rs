use std::collections::HashMap;

use tokio::sync::RwLock;

use super::{StoreError, StoreKey, TokenStore};

#[derive(Default)]
pub struct InMemoryTokenStore {
    values: RwLock<HashMap<String, String>>,
}

#[async_trait::async_trait]
impl TokenStore for InMemoryTokenStore {
    async fn get(&self, key: &StoreKey) -> Result<Option<String>, StoreError> {
        let values = self.values.read().await;
        Ok(values.get(key.as_str()).cloned())
    }

    async fn set(&self, key: &StoreKey, value: &str) -> Result<(), StoreError> {
        let mut values = self.values.write().await;
        values.insert(key.as_str().to_owned(), value.to_owned());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::repositories::{InMemoryTokenStore, StoreError, StoreKey, TokenStore};

    #[tokio::test]
    async fn set_then_get_returns_value() {
        let store = InMemoryTokenStore::default();
        store.set(&StoreKey::from("k"), "v").await.expect("set");

        assert_eq!(store.get(&StoreKey::from("k")).await.expect("get"), Some("v".to_owned()));
        assert_eq!(store.get(&StoreKey::from("missing")).await.expect("get"), None);
    }

    #[tokio::test]
    async fn untyped_number_key_is_rejected() {
        let store = InMemoryTokenStore::default();
        let error = store.set_untyped(&json!(42), "v").await.expect_err("number key");

        assert!(matches!(error, StoreError::KeyNotString { found: "number" }));
        assert_eq!(store.get(&StoreKey::from("42")).await.expect("get"), None);
    }
}
