use serde_json::Value;
use speck_core::config::{AppConfig, LoadOptions};
use speck_core::ApplicationError;
use speck_db::{SqlTokenStore, StoreReadiness, TokenStore};

use crate::commands::{block_on, CommandResult};

/// Bare words become string keys; anything that parses as JSON keeps its JSON type, so
/// `42` is a number and is rejected by the store.
pub fn parse_key(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

pub fn get(raw_key: &str, reveal: bool) -> CommandResult {
    let key = parse_key(raw_key);
    let outcome = with_store("token get", |store| async move {
        let value = store.get_untyped(&key).await?;
        Ok::<_, ApplicationError>(value)
    });

    match outcome {
        Ok(Some(value)) => {
            let shown = if reveal { value } else { redact(&value) };
            CommandResult::success("token get", shown)
        }
        Ok(None) => CommandResult::success("token get", "<unset>"),
        Err(failure) => failure,
    }
}

pub fn set(raw_key: &str, value: &str) -> CommandResult {
    let key = parse_key(raw_key);
    let value = value.to_string();
    let outcome = with_store("token set", |store| async move {
        store.set_untyped(&key, &value).await?;
        Ok::<_, ApplicationError>(())
    });

    match outcome {
        Ok(()) => CommandResult::success("token set", format!("stored value for `{raw_key}`")),
        Err(failure) => failure,
    }
}

fn with_store<T, F, Fut>(command: &str, operation: F) -> Result<T, CommandResult>
where
    F: FnOnce(SqlTokenStore) -> Fut,
    Fut: std::future::Future<Output = Result<T, ApplicationError>>,
{
    let config = AppConfig::load(LoadOptions::default())
        .map_err(|error| CommandResult::from_error(command, &error.into()))?;

    let result = block_on(command, async {
        let readiness = StoreReadiness::new();
        let pool = readiness
            .connect(
                &config.database.url,
                config.database.max_connections,
                config.database.timeout_secs,
            )
            .await?;
        let outcome = operation(SqlTokenStore::new(readiness)).await;
        pool.close().await;
        outcome
    })?;

    result.map_err(|error| CommandResult::from_error(command, &error))
}

fn redact(value: &str) -> String {
    match value.split_once('-') {
        Some((prefix, _)) if !prefix.is_empty() => format!("{prefix}-***"),
        _ => "<redacted>".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{parse_key, redact};

    #[test]
    fn keys_parse_as_json_literals_or_bare_strings() {
        assert_eq!(parse_key("bot_token"), json!("bot_token"));
        assert_eq!(parse_key("\"42\""), json!("42"));
        assert_eq!(parse_key("42"), json!(42));
    }

    #[test]
    fn redaction_keeps_only_the_token_prefix() {
        assert_eq!(redact("xoxb-123-abc"), "xoxb-***");
        assert_eq!(redact("opaque"), "<redacted>");
    }
}
