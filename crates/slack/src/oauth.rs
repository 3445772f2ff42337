use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::Value;
use speck_core::config::SlackConfig;
use tracing::{info, warn};

use crate::api::ApiError;

/// Credentials returned by `oauth.access`.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct OAuthGrant {
    pub access_token: String,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub team_id: Option<String>,
    #[serde(default)]
    pub bot_access_token: Option<String>,
}

#[derive(Deserialize)]
struct BotSection {
    bot_access_token: Option<String>,
}

#[async_trait]
pub trait OAuthExchange: Send + Sync {
    async fn exchange(&self, code: &str) -> Result<OAuthGrant, ApiError>;
}

#[derive(Clone)]
pub struct SlackOAuthClient {
    http: reqwest::Client,
    access_url: String,
    client_id: String,
    client_secret: SecretString,
}

impl SlackOAuthClient {
    /// `None` when the app credentials are not configured.
    pub fn from_config(config: &SlackConfig) -> Result<Option<Self>, ApiError> {
        let (Some(client_id), Some(client_secret)) =
            (config.client_id.as_ref(), config.client_secret.as_ref())
        else {
            return Ok(None);
        };

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(ApiError::Transport)?;

        Ok(Some(Self {
            http,
            access_url: config.oauth_access_url.clone(),
            client_id: client_id.clone(),
            client_secret: client_secret.clone(),
        }))
    }
}

#[async_trait]
impl OAuthExchange for SlackOAuthClient {
    async fn exchange(&self, code: &str) -> Result<OAuthGrant, ApiError> {
        let response = self
            .http
            .post(&self.access_url)
            .form(&[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.expose_secret()),
                ("code", code),
            ])
            .send()
            .await
            .map_err(|error| {
                warn!(event_name = "slack.oauth.transport_error", error = %error, "oauth exchange failed");
                ApiError::Transport(error)
            })?;

        let text = response.text().await.map_err(ApiError::Transport)?;
        let grant = parse_grant(&text)?;
        info!(
            event_name = "slack.oauth.granted",
            team_id = grant.team_id.as_deref().unwrap_or("unknown"),
            "oauth exchange succeeded"
        );
        Ok(grant)
    }
}

fn parse_grant(body: &str) -> Result<OAuthGrant, ApiError> {
    let value: Value = serde_json::from_str(body).map_err(ApiError::Decode)?;
    if value.get("ok") != Some(&Value::Bool(true)) {
        let error = value
            .get("error")
            .and_then(Value::as_str)
            .map_or_else(|| body.to_owned(), str::to_owned);
        return Err(ApiError::Platform { error });
    }

    let mut grant = OAuthGrant::deserialize(&value).map_err(ApiError::Decode)?;
    if grant.bot_access_token.is_none() {
        if let Some(bot) = value.get("bot") {
            let section = BotSection::deserialize(bot).map_err(ApiError::Decode)?;
            grant.bot_access_token = section.bot_access_token;
        }
    }
    Ok(grant)
}

#[cfg(test)]
mod tests {
    use speck_core::AppConfig;

    use super::{parse_grant, SlackOAuthClient};
    use crate::api::ApiError;

    #[test]
    fn successful_body_yields_grant_with_bot_token() {
        let body = r#"{
            "ok": true,
            "access_token": "xoxp-user",
            "scope": "bot,commands",
            "team_id": "T1",
            "bot": {"bot_user_id": "U9", "bot_access_token": "xoxb-bot"}
        }"#;

        let grant = parse_grant(body).expect("grant");
        assert_eq!(grant.access_token, "xoxp-user");
        assert_eq!(grant.team_id.as_deref(), Some("T1"));
        assert_eq!(grant.bot_access_token.as_deref(), Some("xoxb-bot"));
    }

    #[test]
    fn not_ok_body_is_rejected_with_platform_error() {
        let error = parse_grant(r#"{"ok":false,"error":"invalid_code"}"#).expect_err("rejected");
        assert!(matches!(error, ApiError::Platform { ref error } if error == "invalid_code"));
    }

    #[test]
    fn non_json_body_is_a_decode_error() {
        let error = parse_grant("<html>").expect_err("decode");
        assert!(matches!(error, ApiError::Decode(_)));
    }

    #[test]
    fn client_requires_app_credentials() {
        let mut config = AppConfig::default();
        assert!(SlackOAuthClient::from_config(&config.slack).expect("build").is_none());

        config.slack.client_id = Some("123.456".to_owned());
        config.slack.client_secret = Some("shh".to_owned().into());
        assert!(SlackOAuthClient::from_config(&config.slack).expect("build").is_some());
    }
}
