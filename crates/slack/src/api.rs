//! Outbound calls to the Slack Web API and platform callback URLs.
//!
//! [`SlackApiClient::prepare`] is pure: it resolves the effective endpoint, chooses the body
//! encoding and places credentials. [`SlackApiClient::execute`] only performs the network
//! round trip and maps the response.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{
    header::{AUTHORIZATION, CONTENT_TYPE, USER_AGENT},
    StatusCode,
};
use secrecy::{ExposeSecret, SecretString};
use serde_json::{Map, Value};
use speck_core::{config::SlackConfig, ApplicationError};
use thiserror::Error;
use tracing::{debug, warn};

pub const POST_MESSAGE: &str = "chat.postMessage";
pub const UPDATE_MESSAGE: &str = "chat.update";

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";
const WEBHOOK_SEGMENT: &str = "hooks";

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("slack request failed: {0}")]
    Transport(#[source] reqwest::Error),
    #[error("slack rejected the call: {error}")]
    Platform { error: String },
    #[error("slack response could not be decoded: {0}")]
    Decode(#[source] serde_json::Error),
}

impl From<ApiError> for ApplicationError {
    fn from(error: ApiError) -> Self {
        Self::Integration(error.to_string())
    }
}

/// Where an outbound call goes: a Web API method name or an absolute callback URL.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ApiTarget {
    Method(String),
    Url(String),
}

impl Default for ApiTarget {
    fn default() -> Self {
        Self::Method(POST_MESSAGE.to_owned())
    }
}

impl ApiTarget {
    pub fn parse(target: &str) -> Self {
        let is_url = target.get(..4).is_some_and(|scheme| scheme.eq_ignore_ascii_case("http"));
        if is_url {
            Self::Url(target.to_owned())
        } else {
            Self::Method(target.to_owned())
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Method(value) | Self::Url(value) => value,
        }
    }

    /// Webhook URLs carry their own secret and take no token.
    pub fn is_webhook(&self) -> bool {
        self.as_str().contains(WEBHOOK_SEGMENT)
    }
}

impl From<&str> for ApiTarget {
    fn from(value: &str) -> Self {
        Self::parse(value)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum RequestBody {
    Form(String),
    Json(Value),
}

/// A fully resolved outbound request. Nothing here is decided at send time.
#[derive(Clone, Debug)]
pub struct PreparedRequest {
    pub target: ApiTarget,
    pub url: String,
    pub body: RequestBody,
    pub user_agent: String,
    bearer: Option<SecretString>,
}

impl PreparedRequest {
    pub fn bearer_token(&self) -> Option<&str> {
        self.bearer.as_ref().map(ExposeSecret::expose_secret)
    }
}

/// Seam for anything that posts to Slack; handlers depend on this, not on the client.
#[async_trait]
pub trait ChatApi: Send + Sync {
    async fn send(&self, target: ApiTarget, args: Map<String, Value>) -> Result<Value, ApiError>;
}

#[derive(Clone)]
pub struct SlackApiClient {
    http: reqwest::Client,
    base_url: String,
    user_agent: String,
    defaults: Map<String, Value>,
    token: Option<SecretString>,
}

impl SlackApiClient {
    /// `token` is the snapshot used for every call; a new token means a new client.
    pub fn new(config: &SlackConfig, token: Option<SecretString>) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(ApiError::Transport)?;

        Ok(Self {
            http,
            base_url: config.api_base_url.clone(),
            user_agent: config.user_agent.clone(),
            defaults: Map::new(),
            token,
        })
    }

    /// Fields merged under every call's arguments.
    pub fn with_defaults(mut self, defaults: Map<String, Value>) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn has_token(&self) -> bool {
        self.token.is_some()
    }

    pub fn prepare(&self, target: ApiTarget, args: Map<String, Value>) -> PreparedRequest {
        let mut payload = self.defaults.clone();
        payload.extend(args);

        let target = match target {
            ApiTarget::Method(method)
                if method == POST_MESSAGE && payload.get("ts").is_some_and(is_truthy) =>
            {
                ApiTarget::Method(UPDATE_MESSAGE.to_owned())
            }
            other => other,
        };

        let token = match payload.remove("token") {
            Some(Value::String(token)) if !token.is_empty() => Some(SecretString::from(token)),
            _ => self.token.clone(),
        };

        let body = match &target {
            ApiTarget::Method(_) => {
                if let Some(attachments) = payload.get_mut("attachments") {
                    if !attachments.is_string() {
                        *attachments = Value::String(attachments.to_string());
                    }
                }
                RequestBody::Form(encode_form(&payload))
            }
            ApiTarget::Url(_) => {
                if let Some(attachments) = payload.get_mut("attachments") {
                    let decoded = attachments
                        .as_str()
                        .and_then(|raw| serde_json::from_str::<Value>(raw).ok());
                    if let Some(decoded) = decoded {
                        *attachments = decoded;
                    }
                }
                RequestBody::Json(Value::Object(payload))
            }
        };

        let endpoint = match &target {
            ApiTarget::Url(url) => url.clone(),
            ApiTarget::Method(method) => join_base(&self.base_url, method),
        };

        let (url, bearer) = match token {
            Some(token) if !target.is_webhook() => {
                let encoded: String =
                    url::form_urlencoded::byte_serialize(token.expose_secret().as_bytes())
                        .collect();
                let separator = if endpoint.contains('?') { '&' } else { '?' };
                (format!("{endpoint}{separator}token={encoded}"), Some(token))
            }
            _ => (endpoint, None),
        };

        PreparedRequest { target, url, body, user_agent: self.user_agent.clone(), bearer }
    }

    pub async fn execute(&self, request: PreparedRequest) -> Result<Value, ApiError> {
        let mut builder =
            self.http.post(&request.url).header(USER_AGENT, request.user_agent.as_str());
        if let Some(token) = request.bearer_token() {
            builder = builder.header(AUTHORIZATION, format!("Bearer {token}"));
        }
        builder = match request.body {
            RequestBody::Form(form) => builder.header(CONTENT_TYPE, FORM_CONTENT_TYPE).body(form),
            RequestBody::Json(json) => builder.json(&json),
        };

        let response = builder.send().await.map_err(|error| {
            warn!(
                event_name = "slack.api.transport_error",
                target = request.target.as_str(),
                error = %error,
                "slack request failed"
            );
            ApiError::Transport(error)
        })?;
        let status = response.status();
        let text = response.text().await.map_err(ApiError::Transport)?;

        debug!(
            event_name = "slack.api.response",
            target = request.target.as_str(),
            status = status.as_u16(),
            "slack responded"
        );
        interpret_response(status, &text)
    }
}

#[async_trait]
impl ChatApi for SlackApiClient {
    async fn send(&self, target: ApiTarget, args: Map<String, Value>) -> Result<Value, ApiError> {
        let request = self.prepare(target, args);
        self.execute(request).await
    }
}

/// JSON bodies must say `ok: true`. Webhooks answer with plain text, which is accepted
/// only on a success status.
fn interpret_response(status: StatusCode, body: &str) -> Result<Value, ApiError> {
    match serde_json::from_str::<Value>(body) {
        Ok(Value::Object(map)) => {
            if map.get("ok") == Some(&Value::Bool(true)) {
                Ok(Value::Object(map))
            } else {
                let error = map
                    .get("error")
                    .and_then(Value::as_str)
                    .map_or_else(|| body.to_owned(), str::to_owned);
                Err(ApiError::Platform { error })
            }
        }
        _ if status.is_success() => Ok(Value::String(body.to_owned())),
        _ => Err(ApiError::Platform { error: body.to_owned() }),
    }
}

fn join_base(base: &str, method: &str) -> String {
    if base.ends_with('/') {
        format!("{base}{method}")
    } else {
        format!("{base}/{method}")
    }
}

fn encode_form(payload: &Map<String, Value>) -> String {
    let mut serializer = url::form_urlencoded::Serializer::new(String::new());
    for (key, value) in payload {
        match value {
            Value::String(text) => serializer.append_pair(key, text),
            Value::Null => serializer.append_pair(key, ""),
            nested @ (Value::Array(_) | Value::Object(_)) => {
                serializer.append_pair(key, &nested.to_string())
            }
            scalar => serializer.append_pair(key, &scalar.to_string()),
        };
    }
    serializer.finish()
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_f64().is_some_and(|n| n != 0.0 && !n.is_nan()),
        Value::String(text) => !text.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}
