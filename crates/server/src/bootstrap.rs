use std::{sync::Arc, time::Duration};

use secrecy::{ExposeSecret, SecretString};
use speck_core::config::{AppConfig, ConfigError, LoadOptions};
use speck_db::{SqlTokenStore, StoreError, StoreKey, StoreReadiness, TokenStore, BOT_TOKEN_KEY};
use speck_slack::{
    ApiError, ChatApi, EventRegistry, OAuthExchange, RtmClient, SlackApiClient, SlackOAuthClient,
};
use thiserror::Error;
use tracing::{info, warn};

use crate::{
    bot::{MentionBot, MENTION_EVENT},
    front_door::FrontDoorState,
    matches::HttpMatchFeed,
};

pub struct Application {
    pub config: AppConfig,
    pub readiness: StoreReadiness,
    pub registry: EventRegistry,
    pub front_door: FrontDoorState,
    pub has_bot_token: bool,
    /// Present when `slack.rtm_enabled` is set.
    pub rtm: Option<RtmClient>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("token store initialization failed: {0}")]
    Store(#[from] StoreError),
    #[error("slack client setup failed: {0}")]
    Slack(#[from] ApiError),
    #[error("match feed client setup failed: {0}")]
    Feed(#[source] reqwest::Error),
    #[error("mention patterns failed to compile: {0}")]
    Patterns(#[from] regex::Error),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );

    let readiness = StoreReadiness::new();
    readiness
        .connect(
            &config.database.url,
            config.database.max_connections,
            config.database.timeout_secs,
        )
        .await?;
    let store = Arc::new(SqlTokenStore::new(readiness.clone()));
    let bot_token_key = StoreKey::from(BOT_TOKEN_KEY);

    if let Some(token) = &config.slack.bot_token {
        store.set(&bot_token_key, token.expose_secret()).await?;
        info!(
            event_name = "system.bootstrap.token_seeded",
            correlation_id = "bootstrap",
            "configured bot token written to token store"
        );
    }

    let snapshot = store.get(&bot_token_key).await?;
    let has_bot_token = snapshot.is_some();
    if has_bot_token {
        info!(event_name = "system.bootstrap.token_loaded", correlation_id = "bootstrap", "using bot token");
    } else {
        warn!(
            event_name = "system.bootstrap.token_missing",
            correlation_id = "bootstrap",
            "no bot token stored; install the app via the Add to Slack button to enable replies"
        );
    }

    let api: Arc<dyn ChatApi> =
        Arc::new(SlackApiClient::new(&config.slack, snapshot.map(SecretString::from))?);
    let feed = HttpMatchFeed::new(
        config.bot.match_feed_url.clone(),
        Duration::from_secs(config.slack.request_timeout_secs),
    )
    .map_err(BootstrapError::Feed)?;
    let bot = MentionBot::new(&config.bot, Arc::new(feed), Arc::clone(&api))?;

    let mut builder = EventRegistry::builder();
    builder.on([MENTION_EVENT], bot);
    let registry = builder.build();

    let rtm = config.slack.rtm_enabled.then(|| {
        if !has_bot_token {
            warn!(
                event_name = "system.bootstrap.rtm_without_token",
                correlation_id = "bootstrap",
                "rtm is enabled but no bot token is stored; rtm.start will be rejected"
            );
        }
        RtmClient::new(Arc::clone(&api), registry.clone())
    });

    let oauth = SlackOAuthClient::from_config(&config.slack)?
        .map(|client| Arc::new(client) as Arc<dyn OAuthExchange>);
    if oauth.is_none() {
        warn!(
            event_name = "system.bootstrap.oauth_disabled",
            correlation_id = "bootstrap",
            "slack client id/secret not configured; /auth/grant will not exchange codes"
        );
    }

    let front_door = FrontDoorState::new(
        registry.clone(),
        store,
        readiness.clone(),
        config.slack.install_url(),
    )
    .with_oauth(oauth)
    .with_verification_token(config.slack.verification_token.clone())
    .with_max_body_bytes(config.server.max_body_bytes);

    info!(
        event_name = "system.bootstrap.complete",
        correlation_id = "bootstrap",
        routes = registry.route_count(),
        "application bootstrap complete"
    );

    Ok(Application { config, readiness, registry, front_door, has_bot_token, rtm })
}
