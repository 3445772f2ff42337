//! Public HTTP surface.
//!
//! - `GET /auth/grant`: OAuth redirect target; exchanges `code` and stores the token
//! - `GET /`: install page with the "Add to Slack" button
//! - `GET /health`: store readiness
//! - anything else: event ingestion; always answers 200
//!
//! Every route also accepts `POST` as ingestion, so platform callbacks work on any path.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{
        rejection::{BytesRejection, QueryRejection},
        DefaultBodyLimit, FromRef, Query, State,
    },
    http::{Method, StatusCode, Uri},
    response::{Html, IntoResponse, Response},
    routing::get,
    Router,
};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use speck_core::config::DEFAULT_MAX_BODY_BYTES;
use speck_db::{StoreError, StoreKey, StoreReadiness, TokenStore, BOT_TOKEN_KEY};
use speck_slack::{
    classify, ApiError, EventContext, EventRegistry, InboundRecord, OAuthExchange, RawPayload,
    RoutingKey,
};
use tera::{Context, Tera};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::health::{self, HealthState};

const INSTALL_PAGE: &str = "install.html";
const GRANT_SUCCESS_PAGE: &str = "grant_success.html";
const GRANT_FAILURE_PAGE: &str = "grant_failure.html";
const INSTALL_TITLE: &str = "World Cup Slack Bot";

#[derive(Clone)]
pub struct FrontDoorState {
    registry: EventRegistry,
    store: Arc<dyn TokenStore>,
    readiness: StoreReadiness,
    oauth: Option<Arc<dyn OAuthExchange>>,
    verification_token: Option<SecretString>,
    install_url: String,
    max_body_bytes: usize,
    templates: Arc<Tera>,
}

impl FromRef<FrontDoorState> for HealthState {
    fn from_ref(state: &FrontDoorState) -> Self {
        HealthState::new(state.readiness.clone())
    }
}

impl FrontDoorState {
    pub fn new(
        registry: EventRegistry,
        store: Arc<dyn TokenStore>,
        readiness: StoreReadiness,
        install_url: impl Into<String>,
    ) -> Self {
        Self {
            registry,
            store,
            readiness,
            oauth: None,
            verification_token: None,
            install_url: install_url.into(),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            templates: init_templates(),
        }
    }

    pub fn with_oauth(mut self, oauth: Option<Arc<dyn OAuthExchange>>) -> Self {
        self.oauth = oauth;
        self
    }

    pub fn with_verification_token(mut self, token: Option<SecretString>) -> Self {
        self.verification_token = token;
        self
    }

    pub fn with_max_body_bytes(mut self, max_body_bytes: usize) -> Self {
        self.max_body_bytes = max_body_bytes;
        self
    }

    /// With no shared secret configured every record is accepted.
    fn accepts(&self, record: &InboundRecord) -> bool {
        match &self.verification_token {
            Some(expected) => record.token() == Some(expected.expose_secret()),
            None => true,
        }
    }

    fn render(&self, template: &str, context: &Context) -> Html<String> {
        match self.templates.render(template, context) {
            Ok(html) => Html(html),
            Err(error) => {
                warn!(template, error = %error, "failed to render page");
                Html(format!("<h1>Template Error</h1><p>{template}</p>"))
            }
        }
    }
}

fn init_templates() -> Arc<Tera> {
    let mut tera = Tera::default();
    let pages = [
        (INSTALL_PAGE, include_str!("../../../templates/pages/install.html")),
        (GRANT_SUCCESS_PAGE, include_str!("../../../templates/pages/grant_success.html")),
        (GRANT_FAILURE_PAGE, include_str!("../../../templates/pages/grant_failure.html")),
    ];
    for (name, source) in pages {
        if let Err(error) = tera.add_raw_template(name, source) {
            warn!(template = name, error = %error, "failed to register page template");
        }
    }
    Arc::new(tera)
}

pub fn router(state: FrontDoorState) -> Router {
    let body_limit = DefaultBodyLimit::max(state.max_body_bytes);
    Router::new()
        .route("/auth/grant", get(auth_grant).post(ingest))
        .route("/", get(install_page).post(ingest))
        .route("/health", get(health::health).post(ingest))
        .fallback(ingest)
        .layer(body_limit)
        .with_state(state)
}

pub async fn ingest(
    State(state): State<FrontDoorState>,
    method: Method,
    uri: Uri,
    body: Result<Bytes, BytesRejection>,
) -> Response {
    if method != Method::POST {
        return StatusCode::OK.into_response();
    }

    let correlation_id = Uuid::new_v4().to_string();
    // Query string included: handlers subscribe to the URL the platform calls back on.
    let target = uri.path_and_query().map_or_else(|| uri.path(), |target| target.as_str());

    let body = match body {
        Ok(body) => body,
        Err(rejection) => {
            warn!(
                event_name = "ingest.body.rejected",
                correlation_id = %correlation_id,
                path = %target,
                limit = state.max_body_bytes,
                error = %rejection,
                "dropping request whose body could not be buffered"
            );
            return StatusCode::OK.into_response();
        }
    };

    let record = match RawPayload::from_body(&body).normalize() {
        Ok(record) => record,
        Err(error) => {
            warn!(
                event_name = "ingest.payload.malformed",
                correlation_id = %correlation_id,
                path = %target,
                error = %error,
                "dropping request with malformed payload"
            );
            return StatusCode::OK.into_response();
        }
    };

    if let Some(challenge) = record.challenge() {
        info!(
            event_name = "ingest.challenge",
            correlation_id = %correlation_id,
            "verifying event subscription"
        );
        return (StatusCode::OK, challenge.to_owned()).into_response();
    }

    // The path emit is not gated by the verification token; classified keys are.
    let mut keys = vec![RoutingKey::from(target)];
    if state.accepts(&record) {
        keys.extend(classify(&record));
    } else {
        debug!(
            event_name = "ingest.token.mismatch",
            correlation_id = %correlation_id,
            "dropping record with unexpected verification token"
        );
    }

    let ctx = EventContext { correlation_id, path: Some(target.to_owned()) };
    state.registry.dispatch_keys(keys, record, ctx).detach();

    StatusCode::OK.into_response()
}

pub async fn install_page(State(state): State<FrontDoorState>) -> Html<String> {
    let mut context = Context::new();
    context.insert("title", INSTALL_TITLE);
    context.insert("install_url", &state.install_url);
    state.render(INSTALL_PAGE, &context)
}

#[derive(Debug, Default, Deserialize)]
pub struct GrantQuery {
    pub code: Option<String>,
}

/// The page depends only on whether a code was supplied; the exchange finishes in the
/// background and its outcome is logged.
pub async fn auth_grant(
    State(state): State<FrontDoorState>,
    query: Result<Query<GrantQuery>, QueryRejection>,
) -> Html<String> {
    let correlation_id = Uuid::new_v4().to_string();
    let query = match query {
        Ok(Query(query)) => query,
        Err(rejection) => {
            warn!(
                event_name = "oauth.grant.bad_query",
                correlation_id = %correlation_id,
                error = %rejection,
                "oauth redirect query could not be parsed"
            );
            GrantQuery::default()
        }
    };
    let Some(code) = query.code.filter(|code| !code.is_empty()) else {
        warn!(
            event_name = "oauth.grant.missing_code",
            correlation_id = %correlation_id,
            "oauth redirect arrived without a code"
        );
        return state.render(GRANT_FAILURE_PAGE, &Context::new());
    };

    match state.oauth.clone() {
        Some(oauth) => {
            let store = Arc::clone(&state.store);
            tokio::spawn(async move {
                match persist_grant(oauth.as_ref(), store.as_ref(), &code).await {
                    Ok(()) => info!(
                        event_name = "oauth.grant.stored",
                        correlation_id = %correlation_id,
                        "token stored"
                    ),
                    Err(error) => warn!(
                        event_name = "oauth.grant.failed",
                        correlation_id = %correlation_id,
                        error = %error,
                        "oauth grant failed"
                    ),
                }
            });
        }
        None => warn!(
            event_name = "oauth.grant.unconfigured",
            correlation_id = %correlation_id,
            "client id/secret not configured; skipping token exchange"
        ),
    }

    state.render(GRANT_SUCCESS_PAGE, &Context::new())
}

#[derive(Debug, Error)]
pub enum GrantError {
    #[error("token exchange failed: {0}")]
    Exchange(#[from] ApiError),
    #[error("token could not be stored: {0}")]
    Store(#[from] StoreError),
}

/// Exchanges the code and stores the bot token, falling back to the access token.
pub async fn persist_grant(
    oauth: &dyn OAuthExchange,
    store: &dyn TokenStore,
    code: &str,
) -> Result<(), GrantError> {
    let grant = oauth.exchange(code).await?;
    let token = grant.bot_access_token.unwrap_or(grant.access_token);
    store.set(&StoreKey::from(BOT_TOKEN_KEY), &token).await?;
    Ok(())
}
