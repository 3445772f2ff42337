use secrecy::ExposeSecret;
use serde::Serialize;
use speck_core::config::{AppConfig, LoadOptions};
use speck_db::{SqlTokenStore, StoreKey, StoreReadiness, TokenStore, BOT_TOKEN_KEY};

use crate::commands::block_on;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Warn,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: CheckStatus,
    details: String,
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

pub fn run(json_output: bool) -> String {
    let report = build_report();

    if json_output {
        return serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        });
    }

    render_human(&report)
}

fn build_report() -> DoctorReport {
    let mut checks = Vec::new();

    match AppConfig::load(LoadOptions::default()) {
        Ok(config) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Pass,
                details: "configuration loaded and validated".to_string(),
            });
            checks.push(check_oauth_credentials(&config));
            checks.push(check_token_store(&config));
        }
        Err(error) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Fail,
                details: error.to_string(),
            });
            for name in ["oauth_credentials", "token_store"] {
                checks.push(DoctorCheck {
                    name,
                    status: CheckStatus::Skipped,
                    details: "skipped because configuration did not load".to_string(),
                });
            }
        }
    }

    let failed = checks.iter().any(|check| check.status == CheckStatus::Fail);
    let overall_status = if failed { CheckStatus::Fail } else { CheckStatus::Pass };
    let summary = if failed {
        "doctor: one or more readiness checks failed".to_string()
    } else {
        "doctor: all readiness checks passed".to_string()
    };

    DoctorReport { overall_status, summary, checks }
}

fn check_oauth_credentials(config: &AppConfig) -> DoctorCheck {
    let has_secret = config
        .slack
        .client_secret
        .as_ref()
        .is_some_and(|secret| !secret.expose_secret().trim().is_empty());

    if config.slack.client_id.is_some() && has_secret {
        DoctorCheck {
            name: "oauth_credentials",
            status: CheckStatus::Pass,
            details: "client id and secret configured; /auth/grant can exchange codes".to_string(),
        }
    } else {
        DoctorCheck {
            name: "oauth_credentials",
            status: CheckStatus::Warn,
            details: "client id/secret not configured; installs will not store a token"
                .to_string(),
        }
    }
}

fn check_token_store(config: &AppConfig) -> DoctorCheck {
    let result = block_on("doctor", async {
        let readiness = StoreReadiness::new();
        let pool = readiness
            .connect(
                &config.database.url,
                config.database.max_connections,
                config.database.timeout_secs,
            )
            .await
            .map_err(|error| format!("failed to open token store: {error}"))?;

        let store = SqlTokenStore::new(readiness);
        let token = store
            .get(&StoreKey::from(BOT_TOKEN_KEY))
            .await
            .map_err(|error| format!("failed to read `{BOT_TOKEN_KEY}`: {error}"));
        pool.close().await;
        token
    });

    match result {
        Ok(Ok(Some(_))) => DoctorCheck {
            name: "token_store",
            status: CheckStatus::Pass,
            details: format!("`{BOT_TOKEN_KEY}` present in `{}`", config.database.url),
        },
        Ok(Ok(None)) if config.slack.bot_token.is_some() => DoctorCheck {
            name: "token_store",
            status: CheckStatus::Pass,
            details: "store reachable; configured bot token is seeded at server start".to_string(),
        },
        Ok(Ok(None)) => DoctorCheck {
            name: "token_store",
            status: CheckStatus::Warn,
            details: format!(
                "store reachable but `{BOT_TOKEN_KEY}` is unset; only verification requests can be served"
            ),
        },
        Ok(Err(error)) => {
            DoctorCheck { name: "token_store", status: CheckStatus::Fail, details: error }
        }
        Err(failure) => {
            DoctorCheck { name: "token_store", status: CheckStatus::Fail, details: failure.output }
        }
    }
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = Vec::new();
    lines.push(report.summary.clone());

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Warn => "warn",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skip",
        };
        lines.push(format!("- [{marker}] {}: {}", check.name, check.details));
    }

    lines.join("\n")
}

fn escape_json(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}
