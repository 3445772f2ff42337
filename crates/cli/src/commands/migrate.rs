use crate::commands::{block_on, CommandResult};
use speck_core::config::{AppConfig, LoadOptions};
use speck_core::ApplicationError;
use speck_db::StoreReadiness;

pub fn run() -> CommandResult {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return CommandResult::from_error("migrate", &error.into()),
    };

    let result = block_on("migrate", async {
        let readiness = StoreReadiness::new();
        let pool = readiness
            .connect(
                &config.database.url,
                config.database.max_connections,
                config.database.timeout_secs,
            )
            .await?;
        pool.close().await;
        Ok::<(), ApplicationError>(())
    });

    match result {
        Ok(Ok(())) => CommandResult::success("migrate", "applied pending migrations"),
        Ok(Err(error)) => CommandResult::from_error("migrate", &error),
        Err(failure) => failure,
    }
}
