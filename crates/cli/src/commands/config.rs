use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use speck_core::config::{AppConfig, LoadOptions};
use toml::Value;

/// One rendered config field: dotted path, display value, env names that can set it.
struct Field<'a> {
    key: &'static str,
    value: String,
    env_keys: &'a [&'static str],
}

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let fields = [
        Field {
            key: "database.url",
            value: config.database.url.clone(),
            env_keys: &["SPECK_DATABASE_URL"],
        },
        Field {
            key: "database.max_connections",
            value: config.database.max_connections.to_string(),
            env_keys: &["SPECK_DATABASE_MAX_CONNECTIONS"],
        },
        Field {
            key: "database.timeout_secs",
            value: config.database.timeout_secs.to_string(),
            env_keys: &["SPECK_DATABASE_TIMEOUT_SECS"],
        },
        Field {
            key: "slack.bot_token",
            value: redact_token(config.slack.bot_token.as_ref()),
            env_keys: &["SPECK_SLACK_BOT_TOKEN", "SLACK_BOT_TOKEN"],
        },
        Field {
            key: "slack.client_id",
            value: config.slack.client_id.clone().unwrap_or_else(|| "<unset>".to_string()),
            env_keys: &["SPECK_SLACK_CLIENT_ID", "SLACK_CLIENT_ID"],
        },
        Field {
            key: "slack.client_secret",
            value: redact_opaque(config.slack.client_secret.as_ref()),
            env_keys: &["SPECK_SLACK_CLIENT_SECRET", "SLACK_CLIENT_SECRET"],
        },
        Field {
            key: "slack.verification_token",
            value: redact_opaque(config.slack.verification_token.as_ref()),
            env_keys: &["SPECK_SLACK_VERIFICATION_TOKEN"],
        },
        Field {
            key: "slack.api_base_url",
            value: config.slack.api_base_url.clone(),
            env_keys: &["SPECK_SLACK_API_BASE_URL"],
        },
        Field {
            key: "slack.request_timeout_secs",
            value: config.slack.request_timeout_secs.to_string(),
            env_keys: &["SPECK_SLACK_REQUEST_TIMEOUT_SECS"],
        },
        Field {
            key: "slack.rtm_enabled",
            value: config.slack.rtm_enabled.to_string(),
            env_keys: &["SPECK_SLACK_RTM_ENABLED"],
        },
        Field {
            key: "server.bind_address",
            value: config.server.bind_address.clone(),
            env_keys: &["SPECK_SERVER_BIND_ADDRESS"],
        },
        Field {
            key: "server.port",
            value: config.server.port.to_string(),
            env_keys: &["SPECK_SERVER_PORT", "PORT"],
        },
        Field {
            key: "server.max_body_bytes",
            value: config.server.max_body_bytes.to_string(),
            env_keys: &["SPECK_SERVER_MAX_BODY_BYTES"],
        },
        Field {
            key: "bot.utc_offset_hours",
            value: config.bot.utc_offset_hours.to_string(),
            env_keys: &["SPECK_BOT_UTC_OFFSET_HOURS"],
        },
        Field {
            key: "bot.match_feed_url",
            value: config.bot.match_feed_url.clone(),
            env_keys: &["SPECK_BOT_MATCH_FEED_URL"],
        },
        Field {
            key: "logging.level",
            value: config.logging.level.clone(),
            env_keys: &["SPECK_LOGGING_LEVEL", "SPECK_LOG_LEVEL"],
        },
        Field {
            key: "logging.format",
            value: format!("{:?}", config.logging.format),
            env_keys: &["SPECK_LOGGING_FORMAT", "SPECK_LOG_FORMAT"],
        },
    ];

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    lines.extend(fields.iter().map(|field| {
        let source = field_source(
            field.key,
            field.env_keys,
            config_file_doc.as_ref(),
            config_file_path.as_deref(),
        );
        render_line(field.key, &field.value, source)
    }));
    lines.join("\n")
}

fn detect_config_path() -> Option<PathBuf> {
    [PathBuf::from("speck.toml"), PathBuf::from("config/speck.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_keys: &[&str],
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_keys.iter().find(|key| env::var_os(key).is_some()) {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}

fn redact_token(token: Option<&SecretString>) -> String {
    let Some(token) = token else {
        return "<unset>".to_string();
    };
    let trimmed = token.expose_secret().trim();
    if trimmed.is_empty() {
        return "<empty>".to_string();
    }

    if let Some((prefix, _)) = trimmed.split_once('-') {
        return format!("{prefix}-***");
    }

    "<redacted>".to_string()
}

fn redact_opaque(secret: Option<&SecretString>) -> String {
    let shown = if secret.is_some() { "<redacted>" } else { "<unset>" };
    shown.to_string()
}
