use std::fmt;

use async_trait::async_trait;
use serde_json::Value;
use speck_core::ApplicationError;
use thiserror::Error;

pub mod memory;
pub mod token;

pub use memory::InMemoryTokenStore;
pub use token::SqlTokenStore;

/// Key under which the OAuth grant flow stores the bot token.
pub const BOT_TOKEN_KEY: &str = "bot_token";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("token store keys must be strings, got {found} instead")]
    KeyNotString { found: &'static str },
    #[error("token store is not ready: {0}")]
    NotReady(String),
    #[error("token store was already initialized")]
    AlreadyInitialized,
    #[error("an unknown error happened during the operation `{operation}`: {source}")]
    Unknown {
        operation: &'static str,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl StoreError {
    pub fn unknown(
        operation: &'static str,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Unknown { operation, source: Box::new(source) }
    }
}

impl From<StoreError> for ApplicationError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::KeyNotString { .. } => Self::MalformedInput(error.to_string()),
            other => Self::Persistence(other.to_string()),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct StoreKey(String);

impl StoreKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StoreKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StoreKey {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl From<String> for StoreKey {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl TryFrom<&Value> for StoreKey {
    type Error = StoreError;

    fn try_from(value: &Value) -> Result<Self, Self::Error> {
        match value {
            Value::String(key) => Ok(Self(key.clone())),
            other => Err(StoreError::KeyNotString { found: json_type_name(other) }),
        }
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[async_trait]
pub trait TokenStore: Send + Sync {
    async fn get(&self, key: &StoreKey) -> Result<Option<String>, StoreError>;
    async fn set(&self, key: &StoreKey, value: &str) -> Result<(), StoreError>;

    /// Lookup with a key that arrived as untyped data (CLI args parsed as JSON, admin
    /// payloads). Non-string keys are rejected, never coerced.
    async fn get_untyped(&self, key: &Value) -> Result<Option<String>, StoreError> {
        let key = StoreKey::try_from(key)?;
        self.get(&key).await
    }

    async fn set_untyped(&self, key: &Value, value: &str) -> Result<(), StoreError> {
        let key = StoreKey::try_from(key)?;
        self.set(&key, value).await
    }
}
