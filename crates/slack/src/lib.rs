//! Slack integration for speck.
//!
//! - **Payloads** (`payload`) - normalize JSON, form and JSON-in-form bodies
//! - **Events** (`events`) - classify records into routing keys and multicast to handlers
//! - **API** (`api`) - encode outbound calls to Web API methods and callback URLs
//! - **OAuth** (`oauth`) - exchange an authorization code for tokens
//! - **RTM** (`rtm`) - receive the same records over an `rtm.start` WebSocket
//!
//! # Architecture
//!
//! ```text
//! HTTP body → RawPayload → InboundRecord → classify → EventRegistry → handlers
//!                                                                        ↓
//!                                             Slack ← SlackApiClient ← ChatApi
//! ```

pub mod api;
pub mod events;
pub mod oauth;
pub mod payload;
pub mod rtm;

pub use api::{ApiError, ApiTarget, ChatApi, PreparedRequest, RequestBody, SlackApiClient};
pub use events::{
    classify, handler_fn, DispatchHandle, DispatchObserver, DispatchReport, EventContext,
    EventHandler, EventHandlerError, EventRegistry, EventRegistryBuilder, RoutingKey,
};
pub use oauth::{OAuthExchange, OAuthGrant, SlackOAuthClient};
pub use payload::{InboundRecord, PayloadError, RawPayload};
pub use rtm::{
    FrameConnector, FrameSource, RtmClient, RtmConnection, RtmError, RtmSession, RtmSummary,
    WebSocketConnector,
};
