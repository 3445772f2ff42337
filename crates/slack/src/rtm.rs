//! Real Time Messaging transport.
//!
//! `rtm.start` hands back a WebSocket URL and the bot's own user (`self`). Every frame read
//! from that socket goes through the same normalize/classify/dispatch path as an HTTP body.
//! Frames are handled one at a time: a frame's handlers finish before the next is read.

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::{
    api::{ApiError, ApiTarget, ChatApi},
    events::{EventContext, EventRegistry},
    payload::RawPayload,
};

pub const RTM_START: &str = "rtm.start";

#[derive(Debug, Error)]
pub enum RtmError {
    #[error("rtm.start failed: {0}")]
    Start(#[from] ApiError),
    #[error("rtm.start response has no `{0}` field")]
    MissingField(&'static str),
    #[error("websocket connect failed: {0}")]
    Connect(String),
    #[error("websocket read failed: {0}")]
    Receive(String),
}

/// What `rtm.start` returned: where to connect and who the bot is.
#[derive(Clone, Debug, PartialEq)]
pub struct RtmSession {
    pub url: String,
    pub identity: Map<String, Value>,
}

impl RtmSession {
    pub fn from_start(response: &Value) -> Result<Self, RtmError> {
        let url =
            response.get("url").and_then(Value::as_str).ok_or(RtmError::MissingField("url"))?;
        let identity = response.get("self").and_then(Value::as_object).cloned().unwrap_or_default();
        Ok(Self { url: url.to_owned(), identity })
    }

    pub fn user_id(&self) -> Option<&str> {
        self.identity.get("id").and_then(Value::as_str)
    }
}

#[async_trait]
pub trait FrameSource: Send {
    /// `Ok(None)` once the peer has closed the socket.
    async fn next_frame(&mut self) -> Result<Option<String>, RtmError>;
}

#[async_trait]
pub trait FrameConnector: Send + Sync {
    async fn connect(&self, url: &str) -> Result<Box<dyn FrameSource>, RtmError>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct WebSocketConnector;

#[async_trait]
impl FrameConnector for WebSocketConnector {
    async fn connect(&self, url: &str) -> Result<Box<dyn FrameSource>, RtmError> {
        let (stream, _response) =
            connect_async(url).await.map_err(|error| RtmError::Connect(error.to_string()))?;
        Ok(Box::new(WebSocketFrames { stream }))
    }
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct WebSocketFrames {
    stream: WsStream,
}

#[async_trait]
impl FrameSource for WebSocketFrames {
    async fn next_frame(&mut self) -> Result<Option<String>, RtmError> {
        while let Some(message) = self.stream.next().await {
            match message.map_err(|error| RtmError::Receive(error.to_string()))? {
                Message::Text(text) => return Ok(Some(text.as_str().to_owned())),
                Message::Binary(data) => {
                    return Ok(Some(String::from_utf8_lossy(&data).into_owned()));
                }
                // tungstenite queues the pong itself.
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {}
                Message::Close(_) => return Ok(None),
            }
        }
        Ok(None)
    }
}

/// Counters for one RTM session, returned when the socket closes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RtmSummary {
    pub frames: usize,
    pub malformed: usize,
    pub invoked: usize,
    pub failed: usize,
}

pub struct RtmClient {
    api: Arc<dyn ChatApi>,
    connector: Arc<dyn FrameConnector>,
    registry: EventRegistry,
}

impl RtmClient {
    pub fn new(api: Arc<dyn ChatApi>, registry: EventRegistry) -> Self {
        Self { api, connector: Arc::new(WebSocketConnector), registry }
    }

    pub fn with_connector(mut self, connector: Arc<dyn FrameConnector>) -> Self {
        self.connector = connector;
        self
    }

    /// Calls `rtm.start` with `options` and opens the returned socket.
    pub async fn start(&self, options: Map<String, Value>) -> Result<RtmConnection, RtmError> {
        let response = self.api.send(ApiTarget::Method(RTM_START.to_owned()), options).await?;
        let session = RtmSession::from_start(&response)?;
        let frames = self.connector.connect(&session.url).await?;

        info!(
            event_name = "rtm.session.started",
            correlation_id = "rtm",
            user_id = session.user_id().unwrap_or("unknown"),
            "rtm socket connected"
        );
        Ok(RtmConnection { session, frames, registry: self.registry.clone() })
    }
}

pub struct RtmConnection {
    session: RtmSession,
    frames: Box<dyn FrameSource>,
    registry: EventRegistry,
}

impl RtmConnection {
    pub fn session(&self) -> &RtmSession {
        &self.session
    }

    /// Pumps frames into the registry until the socket closes.
    pub async fn run(mut self) -> Result<RtmSummary, RtmError> {
        let mut summary = RtmSummary::default();

        while let Some(frame) = self.frames.next_frame().await? {
            summary.frames += 1;
            let correlation_id = format!("rtm-{}", summary.frames);

            let record = match RawPayload::from_text(&frame).normalize() {
                Ok(record) => record,
                Err(error) => {
                    summary.malformed += 1;
                    warn!(
                        event_name = "rtm.frame.malformed",
                        correlation_id = %correlation_id,
                        error = %error,
                        "skipping malformed rtm frame"
                    );
                    continue;
                }
            };

            let ctx = EventContext { correlation_id: correlation_id.clone(), path: None };
            match self.registry.dispatch(record, ctx).completion().await {
                Ok(report) => {
                    summary.invoked += report.invoked;
                    summary.failed += report.failed;
                }
                Err(error) => warn!(
                    event_name = "rtm.frame.dispatch_aborted",
                    correlation_id = %correlation_id,
                    error = %error,
                    "rtm frame dispatch did not complete"
                ),
            }
            debug!(event_name = "rtm.frame.dispatched", correlation_id = %correlation_id);
        }

        info!(
            event_name = "rtm.session.closed",
            correlation_id = "rtm",
            frames = summary.frames,
            malformed = summary.malformed,
            "rtm socket closed"
        );
        Ok(summary)
    }
}
