//! Event classification and multicast dispatch.
//!
//! A record fans out to every routing key it matches and every handler subscribed to
//! each of those keys runs, in classification order then registration order. A handler
//! subscribed under two matching keys runs twice.

use std::{borrow::Borrow, collections::HashMap, fmt, future::Future, sync::Arc};

use async_trait::async_trait;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::{api::ApiError, payload::InboundRecord};

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RoutingKey(String);

impl RoutingKey {
    pub const WILDCARD: &'static str = "*";

    pub fn wildcard() -> Self {
        Self(Self::WILDCARD.to_owned())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoutingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for RoutingKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for RoutingKey {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl From<String> for RoutingKey {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Every key a record answers to. Rules are independent; order is stable.
pub fn classify(record: &InboundRecord) -> Vec<RoutingKey> {
    let mut keys = vec![RoutingKey::wildcard()];
    let candidates = [
        record.record_type(),
        record.command(),
        record.event_type(),
        record.trigger_word(),
        record.callback_id(),
    ];
    keys.extend(candidates.into_iter().flatten().map(RoutingKey::from));
    keys
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventContext {
    pub correlation_id: String,
    pub path: Option<String>,
}

impl Default for EventContext {
    fn default() -> Self {
        Self { correlation_id: "unknown-correlation-id".to_owned(), path: None }
    }
}

#[derive(Debug, Error)]
pub enum EventHandlerError {
    #[error("handler failure: {0}")]
    Failed(String),
    #[error(transparent)]
    Api(#[from] ApiError),
}

#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(
        &self,
        record: &InboundRecord,
        ctx: &EventContext,
    ) -> Result<(), EventHandlerError>;
}

/// Adapts an async closure into an [`EventHandler`].
pub struct FnHandler<F> {
    callback: F,
}

pub fn handler_fn<F, Fut>(callback: F) -> FnHandler<F>
where
    F: Fn(InboundRecord, EventContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), EventHandlerError>> + Send,
{
    FnHandler { callback }
}

#[async_trait]
impl<F, Fut> EventHandler for FnHandler<F>
where
    F: Fn(InboundRecord, EventContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), EventHandlerError>> + Send,
{
    async fn handle(
        &self,
        record: &InboundRecord,
        ctx: &EventContext,
    ) -> Result<(), EventHandlerError> {
        (self.callback)(record.clone(), ctx.clone()).await
    }
}

/// Observability hook for handler failures. Dispatch never propagates them.
pub trait DispatchObserver: Send + Sync {
    fn handler_failed(&self, key: &RoutingKey, ctx: &EventContext, error: &EventHandlerError);
}

#[derive(Default)]
pub struct TracingObserver;

impl DispatchObserver for TracingObserver {
    fn handler_failed(&self, key: &RoutingKey, ctx: &EventContext, error: &EventHandlerError) {
        warn!(
            event_name = "dispatch.handler.failed",
            routing_key = %key,
            correlation_id = %ctx.correlation_id,
            error = %error,
            "event handler failed"
        );
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub invoked: usize,
    pub failed: usize,
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("dispatch task did not complete: {0}")]
    Aborted(String),
}

/// Completion handle for one dispatch. Dropping it detaches the task: handlers keep
/// running and nobody waits for them, which is how the front door uses it.
#[must_use = "await `completion()` or drop the handle to run fire-and-forget"]
pub struct DispatchHandle {
    task: JoinHandle<DispatchReport>,
}

impl DispatchHandle {
    pub async fn completion(self) -> Result<DispatchReport, DispatchError> {
        self.task.await.map_err(|error| DispatchError::Aborted(error.to_string()))
    }

    /// Lets the dispatch finish unobserved. Failures still reach the observer.
    pub fn detach(self) {}
}

type HandlerList = Vec<Arc<dyn EventHandler>>;

#[derive(Default)]
pub struct EventRegistryBuilder {
    routes: HashMap<RoutingKey, HandlerList>,
    observer: Option<Arc<dyn DispatchObserver>>,
}

impl EventRegistryBuilder {
    /// Subscribes one handler under every key in `keys`.
    pub fn on<I, K, H>(&mut self, keys: I, handler: H) -> &mut Self
    where
        I: IntoIterator<Item = K>,
        K: Into<RoutingKey>,
        H: EventHandler + 'static,
    {
        self.on_shared(keys, Arc::new(handler))
    }

    pub fn on_shared<I, K>(&mut self, keys: I, handler: Arc<dyn EventHandler>) -> &mut Self
    where
        I: IntoIterator<Item = K>,
        K: Into<RoutingKey>,
    {
        for key in keys {
            self.routes.entry(key.into()).or_default().push(Arc::clone(&handler));
        }
        self
    }

    pub fn on_failure<O>(&mut self, observer: O) -> &mut Self
    where
        O: DispatchObserver + 'static,
    {
        self.observer = Some(Arc::new(observer));
        self
    }

    pub fn build(self) -> EventRegistry {
        EventRegistry {
            inner: Arc::new(RegistryInner {
                routes: self.routes,
                observer: self.observer.unwrap_or_else(|| Arc::new(TracingObserver)),
            }),
        }
    }
}

struct RegistryInner {
    routes: HashMap<RoutingKey, HandlerList>,
    observer: Arc<dyn DispatchObserver>,
}

/// Immutable routing table. Cloning shares the same table.
#[derive(Clone)]
pub struct EventRegistry {
    inner: Arc<RegistryInner>,
}

impl Default for EventRegistry {
    fn default() -> Self {
        EventRegistryBuilder::default().build()
    }
}

impl EventRegistry {
    pub fn builder() -> EventRegistryBuilder {
        EventRegistryBuilder::default()
    }

    pub fn handlers_for(&self, key: &str) -> &[Arc<dyn EventHandler>] {
        self.inner.routes.get(key).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn route_count(&self) -> usize {
        self.inner.routes.len()
    }

    /// Classifies the record and runs every matched handler on a spawned task.
    pub fn dispatch(&self, record: InboundRecord, ctx: EventContext) -> DispatchHandle {
        let keys = classify(&record);
        self.dispatch_keys(keys, record, ctx)
    }

    pub fn dispatch_keys(
        &self,
        keys: Vec<RoutingKey>,
        record: InboundRecord,
        ctx: EventContext,
    ) -> DispatchHandle {
        let registry = self.clone();
        let task = tokio::spawn(async move { registry.run(&keys, &record, &ctx).await });
        DispatchHandle { task }
    }

    /// Runs matched handlers inline, sequentially.
    pub async fn run(
        &self,
        keys: &[RoutingKey],
        record: &InboundRecord,
        ctx: &EventContext,
    ) -> DispatchReport {
        let mut report = DispatchReport::default();
        for key in keys {
            for handler in self.handlers_for(key.as_str()) {
                report.invoked += 1;
                if let Err(error) = handler.handle(record, ctx).await {
                    report.failed += 1;
                    self.inner.observer.handler_failed(key, ctx, &error);
                }
            }
        }

        debug!(
            event_name = "dispatch.completed",
            correlation_id = %ctx.correlation_id,
            keys = keys.len(),
            invoked = report.invoked,
            failed = report.failed,
            "dispatch completed"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    };

    use async_trait::async_trait;
    use serde_json::{json, Value};

    use super::{
        classify, handler_fn, DispatchObserver, EventContext, EventHandler, EventHandlerError,
        EventRegistry, RoutingKey,
    };
    use crate::payload::{InboundRecord, RawPayload};

    fn record(value: Value) -> InboundRecord {
        match value {
            Value::Object(map) => RawPayload::Object(map).normalize().expect("normalize"),
            other => panic!("expected object, got {other}"),
        }
    }

    fn keys(record: &InboundRecord) -> Vec<String> {
        classify(record).into_iter().map(|key| key.to_string()).collect()
    }

    #[derive(Clone, Default)]
    struct CountingHandler {
        calls: Arc<AtomicUsize>,
        seen: Arc<Mutex<Vec<InboundRecord>>>,
    }

    impl CountingHandler {
        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl EventHandler for CountingHandler {
        async fn handle(
            &self,
            record: &InboundRecord,
            _ctx: &EventContext,
        ) -> Result<(), EventHandlerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen.lock().expect("seen lock").push(record.clone());
            Ok(())
        }
    }

    #[derive(Clone, Default)]
    struct RecordingObserver {
        failures: Arc<Mutex<Vec<String>>>,
    }

    impl DispatchObserver for RecordingObserver {
        fn handler_failed(&self, key: &RoutingKey, _ctx: &EventContext, error: &EventHandlerError) {
            self.failures.lock().expect("failures lock").push(format!("{key}: {error}"));
        }
    }

    #[test]
    fn star_added_event_classifies_to_wildcard_and_subtype() {
        let record = record(json!({
            "type": "event_callback",
            "event": {"type": "star_added", "user": "U1"}
        }));

        assert_eq!(keys(&record), vec!["*", "event_callback", "star_added"]);
    }

    #[test]
    fn every_rule_contributes_independently() {
        let record = record(json!({
            "type": "message",
            "command": "/next",
            "event": {"type": "app_mention"},
            "trigger_word": "goal",
            "payload": {"callback_id": "vote"}
        }));

        assert_eq!(keys(&record), vec!["*", "message", "/next", "app_mention", "goal", "vote"]);
    }

    #[test]
    fn empty_record_only_matches_wildcard() {
        assert_eq!(keys(&InboundRecord::default()), vec![RoutingKey::WILDCARD]);
    }

    #[tokio::test]
    async fn handler_under_one_matching_key_runs_once() {
        let handler = CountingHandler::default();
        let mut builder = EventRegistry::builder();
        builder.on(["star_added"], handler.clone());
        let registry = builder.build();

        let report = registry
            .dispatch(record(json!({"event": {"type": "star_added"}})), EventContext::default())
            .completion()
            .await
            .expect("dispatch");

        assert_eq!(handler.calls(), 1);
        assert_eq!(report.invoked, 1);
    }

    #[tokio::test]
    async fn handler_under_two_matching_keys_runs_twice_with_full_record() {
        let handler = CountingHandler::default();
        let mut builder = EventRegistry::builder();
        builder.on(["*", "star_added"], handler.clone());
        let registry = builder.build();
        let inbound = record(json!({"event": {"type": "star_added"}, "team_id": "T1"}));

        registry
            .dispatch(inbound.clone(), EventContext::default())
            .completion()
            .await
            .expect("dispatch");

        assert_eq!(handler.calls(), 2);
        let seen = handler.seen.lock().expect("seen lock");
        assert!(seen.iter().all(|record| record == &inbound));
    }

    #[tokio::test]
    async fn unmatched_record_is_a_silent_no_op() {
        let handler = CountingHandler::default();
        let mut builder = EventRegistry::builder();
        builder.on(["reaction_added"], handler.clone());
        let registry = builder.build();

        let report = registry
            .dispatch(record(json!({"event": {"type": "pin_added"}})), EventContext::default())
            .completion()
            .await
            .expect("dispatch");

        assert_eq!(report.invoked, 0);
        assert_eq!(handler.calls(), 0);
    }

    #[tokio::test]
    async fn failures_reach_the_observer_and_do_not_stop_other_handlers() {
        let observer = RecordingObserver::default();
        let after = CountingHandler::default();
        let mut builder = EventRegistry::builder();
        builder
            .on(
                ["*"],
                handler_fn(|_record, _ctx| async {
                    Err(EventHandlerError::Failed("boom".to_owned()))
                }),
            )
            .on(["*"], after.clone())
            .on_failure(observer.clone());
        let registry = builder.build();

        let report = registry
            .dispatch(InboundRecord::default(), EventContext::default())
            .completion()
            .await
            .expect("dispatch");

        assert_eq!(report.invoked, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(after.calls(), 1);
        let failures = observer.failures.lock().expect("failures lock");
        assert_eq!(failures.as_slice(), ["*: handler failure: boom"]);
    }

    #[tokio::test]
    async fn explicit_keys_route_request_paths() {
        let handler = CountingHandler::default();
        let mut builder = EventRegistry::builder();
        builder.on(["/slack/commands"], handler.clone());
        let registry = builder.build();

        registry
            .dispatch_keys(
                vec![RoutingKey::from("/slack/commands")],
                InboundRecord::default(),
                EventContext::default(),
            )
            .completion()
            .await
            .expect("dispatch");

        assert_eq!(handler.calls(), 1);
        assert_eq!(registry.route_count(), 1);
        assert!(registry.handlers_for("/other").is_empty());
    }
}
