//! Inbound payload normalization.
//!
//! Slack delivers three body shapes to the same endpoint: Events API JSON, slash-command
//! and outgoing-webhook form bodies, and interactive-message forms whose `payload` field
//! is itself a JSON document. [`RawPayload`] names the shape once at ingestion and
//! [`RawPayload::normalize`] turns every shape into an [`InboundRecord`].

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use speck_core::ApplicationError;
use thiserror::Error;

#[derive(Clone, Debug, PartialEq)]
pub enum RawPayload {
    /// Body that parsed as a JSON object.
    Json(Map<String, Value>),
    /// Body text that is not a JSON object; parsed leniently as a query string.
    Form(String),
    /// Already-structured data, e.g. a record handed over in-process.
    Object(Map<String, Value>),
}

#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("nested `payload` field is not valid JSON: {0}")]
    NestedPayload(#[source] serde_json::Error),
}

impl From<PayloadError> for ApplicationError {
    fn from(error: PayloadError) -> Self {
        Self::MalformedInput(error.to_string())
    }
}

impl RawPayload {
    pub fn from_body(body: &[u8]) -> Self {
        let text = String::from_utf8_lossy(body);
        Self::from_text(&text)
    }

    pub fn from_text(text: &str) -> Self {
        match serde_json::from_str::<Value>(text) {
            Ok(Value::Object(map)) => Self::Json(map),
            _ => Self::Form(text.to_owned()),
        }
    }

    pub fn normalize(self) -> Result<InboundRecord, PayloadError> {
        let mut fields = match self {
            Self::Json(map) => map,
            Self::Form(text) => parse_form(&text),
            // Already structured: any nested payload was decoded when it came off the wire.
            Self::Object(map) => return Ok(InboundRecord { fields: map }),
        };

        // Interactive message payloads arrive as a JSON string inside the form body.
        if let Some(Value::String(nested)) = fields.get("payload") {
            let decoded =
                serde_json::from_str::<Value>(nested).map_err(PayloadError::NestedPayload)?;
            fields.insert("payload".to_owned(), decoded);
        }

        Ok(InboundRecord { fields })
    }
}

/// Never fails: anything that is not `key=value` degrades to a key with an empty value.
/// Repeated keys collect into an array, in arrival order.
fn parse_form(text: &str) -> Map<String, Value> {
    let mut fields = Map::new();
    for (key, value) in url::form_urlencoded::parse(text.as_bytes()) {
        let value = Value::String(value.into_owned());
        match fields.get_mut(&*key) {
            Some(Value::Array(values)) => values.push(value),
            Some(existing) => {
                let first = existing.take();
                *existing = Value::Array(vec![first, value]);
            }
            None => {
                fields.insert(key.into_owned(), value);
            }
        }
    }
    fields
}

/// One normalized inbound body. Holds exactly the fields the platform sent.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InboundRecord {
    fields: Map<String, Value>,
}

impl InboundRecord {
    pub fn from_map(fields: Map<String, Value>) -> Self {
        Self { fields }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(Value::as_str)
    }

    pub fn record_type(&self) -> Option<&str> {
        self.str_field("type")
    }

    pub fn command(&self) -> Option<&str> {
        self.str_field("command")
    }

    pub fn trigger_word(&self) -> Option<&str> {
        self.str_field("trigger_word")
    }

    pub fn challenge(&self) -> Option<&str> {
        self.str_field("challenge")
    }

    pub fn token(&self) -> Option<&str> {
        self.str_field("token")
    }

    pub fn event(&self) -> Option<&Map<String, Value>> {
        self.fields.get("event").and_then(Value::as_object)
    }

    pub fn event_type(&self) -> Option<&str> {
        self.event()?.get("type").and_then(Value::as_str)
    }

    pub fn callback_id(&self) -> Option<&str> {
        self.fields.get("payload")?.get("callback_id").and_then(Value::as_str)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn into_map(self) -> Map<String, Value> {
        self.fields
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use super::{InboundRecord, PayloadError, RawPayload};

    fn object(value: Value) -> serde_json::Map<String, Value> {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {other}"),
        }
    }

    #[test]
    fn json_body_parses_to_structurally_equal_record() {
        let body = r#"{"type":"event_callback","event":{"type":"star_added","user":"U1"}}"#;
        let raw = RawPayload::from_body(body.as_bytes());
        assert!(matches!(raw, RawPayload::Json(_)));

        let record = raw.normalize().expect("normalize");
        let expected: Value = serde_json::from_str(body).expect("fixture");
        assert_eq!(Value::Object(record.into_map()), expected);
    }

    #[test]
    fn form_body_parses_to_key_value_mapping() {
        let body = "token=abc&command=%2Fweather&text=94070+today&user_name=steve";
        let record = RawPayload::from_body(body.as_bytes()).normalize().expect("normalize");

        assert_eq!(record.command(), Some("/weather"));
        assert_eq!(record.str_field("text"), Some("94070 today"));
        assert_eq!(record.token(), Some("abc"));
        assert_eq!(record.as_map().len(), 4);
    }

    #[test]
    fn garbage_text_degrades_without_error() {
        let record = RawPayload::from_text("{not json").normalize().expect("lenient");
        assert_eq!(record.get("{not json"), Some(&json!("")));

        let empty = RawPayload::from_text("").normalize().expect("lenient");
        assert!(empty.as_map().is_empty());
    }

    #[test]
    fn repeated_form_keys_collect_into_an_array() {
        let record = RawPayload::from_text("a=1&a=2&a=3").normalize().expect("normalize");
        assert_eq!(record.get("a"), Some(&json!(["1", "2", "3"])));
    }

    #[test]
    fn json_scalars_are_treated_as_form_text() {
        let raw = RawPayload::from_text("42");
        assert_eq!(raw, RawPayload::Form("42".to_owned()));
    }

    #[test]
    fn nested_payload_string_is_decoded_in_place() {
        let inner = r#"{"callback_id":"wopr_game","actions":[{"name":"game"}]}"#;
        let encoded: String = url::form_urlencoded::byte_serialize(inner.as_bytes()).collect();
        let body = format!("payload={encoded}");
        let record = RawPayload::from_body(body.as_bytes()).normalize().expect("normalize");

        assert_eq!(record.callback_id(), Some("wopr_game"));
        let expected = serde_json::from_str::<Value>(inner).expect("inner");
        assert_eq!(record.get("payload"), Some(&expected));
    }

    #[test]
    fn malformed_nested_payload_is_an_error() {
        let error = RawPayload::from_text("payload=%7Bnot-json").normalize().expect_err("fatal");
        assert!(matches!(error, PayloadError::NestedPayload(_)));
    }

    #[test]
    fn normalizing_an_object_is_identity() {
        let map = object(json!({
            "type": "event_callback",
            "payload": {"callback_id": "cb"},
            "token": "t"
        }));
        let record = RawPayload::Object(map.clone()).normalize().expect("normalize");
        assert_eq!(record, InboundRecord::from_map(map.clone()));

        let again = RawPayload::Object(record.into_map()).normalize().expect("normalize");
        assert_eq!(again.into_map(), map);
    }

    #[test]
    fn renormalizing_a_decoded_string_payload_is_identity() {
        let record = RawPayload::from_text("payload=%22hello%22").normalize().expect("normalize");
        assert_eq!(record.get("payload"), Some(&json!("hello")));

        let again = RawPayload::Object(record.clone().into_map()).normalize().expect("identity");
        assert_eq!(again, record);
    }

    #[test]
    fn accessors_ignore_non_string_values() {
        let record = InboundRecord::from_map(object(json!({"type": 7, "event": {"type": null}})));
        assert_eq!(record.record_type(), None);
        assert_eq!(record.event_type(), None);
    }
}
