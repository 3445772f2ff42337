mod bootstrap;
mod bot;
mod front_door;
mod health;
mod matches;

use std::time::Duration;

use anyhow::Result;
use speck_core::config::{AppConfig, LoadOptions};
use speck_db::StoreState;
use tracing_subscriber::EnvFilter;

fn init_logging(config: &AppConfig) {
    use speck_core::config::LogFormat::*;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.level.as_str()));

    match config.logging.format {
        Compact => {
            tracing_subscriber::fmt().with_target(false).with_env_filter(filter).compact().init();
        }
        Pretty => {
            tracing_subscriber::fmt().with_target(false).with_env_filter(filter).pretty().init();
        }
        Json => {
            tracing_subscriber::fmt().with_target(false).with_env_filter(filter).json().init();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    run().await
}

pub async fn run() -> Result<()> {
    let config = AppConfig::load(LoadOptions::default())?;
    init_logging(&config);

    let app = bootstrap::bootstrap_with_config(config).await?;

    if let Some(rtm) = app.rtm {
        tokio::spawn(run_rtm(rtm));
    }

    let address = format!("{}:{}", app.config.server.bind_address, app.config.server.port);
    let listener = tokio::net::TcpListener::bind(&address).await?;
    tracing::info!(
        event_name = "system.server.started",
        correlation_id = "bootstrap",
        bind_address = %address,
        bot_token = app.has_bot_token,
        "listening for events"
    );

    axum::serve(listener, front_door::router(app.front_door.clone()))
        .with_graceful_shutdown(wait_for_shutdown())
        .await?;

    tracing::info!(
        event_name = "system.server.stopping",
        correlation_id = "shutdown",
        "speck-server stopping"
    );

    if let StoreState::Ready(pool) = app.readiness.state() {
        let grace = Duration::from_secs(app.config.server.graceful_shutdown_secs);
        if tokio::time::timeout(grace, pool.close()).await.is_err() {
            tracing::warn!(
                event_name = "system.server.store_close_timeout",
                correlation_id = "shutdown",
                "token store did not close within the grace period"
            );
        }
    }

    Ok(())
}

async fn run_rtm(client: speck_slack::RtmClient) {
    let outcome = match client.start(serde_json::Map::new()).await {
        Ok(connection) => connection.run().await,
        Err(error) => Err(error),
    };
    match outcome {
        Ok(summary) => tracing::info!(
            event_name = "system.rtm.finished",
            correlation_id = "rtm",
            frames = summary.frames,
            invoked = summary.invoked,
            failed = summary.failed,
            "rtm session ended"
        ),
        Err(error) => tracing::error!(
            event_name = "system.rtm.failed",
            correlation_id = "rtm",
            error = %error,
            "rtm session failed"
        ),
    }
}

async fn wait_for_shutdown() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::error!(
            event_name = "system.server.signal_error",
            correlation_id = "shutdown",
            error = %error,
            "failed to listen for shutdown signal"
        );
    }
}
