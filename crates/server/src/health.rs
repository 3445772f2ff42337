use axum::{extract::State, http::StatusCode, Json};
use chrono::Utc;
use serde::Serialize;
use speck_db::{DbPool, StoreReadiness, StoreState};

#[derive(Clone)]
pub struct HealthState {
    readiness: StoreReadiness,
}

impl HealthState {
    pub fn new(readiness: StoreReadiness) -> Self {
        Self { readiness }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthCheck {
    pub status: &'static str,
    pub detail: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: HealthCheck,
    pub store: HealthCheck,
    pub checked_at: String,
}

pub async fn health(State(state): State<HealthState>) -> (StatusCode, Json<HealthResponse>) {
    let store = store_check(&state.readiness).await;
    let ready = store.status == "ready";

    let payload = HealthResponse {
        status: if ready { "ready" } else { "degraded" },
        service: HealthCheck {
            status: "ready",
            detail: "speck-server runtime initialized".to_string(),
        },
        store,
        checked_at: Utc::now().to_rfc3339(),
    };

    let status_code = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status_code, Json(payload))
}

async fn store_check(readiness: &StoreReadiness) -> HealthCheck {
    match readiness.state() {
        StoreState::Ready(pool) => query_check(&pool).await,
        StoreState::Failed(reason) => HealthCheck {
            status: "degraded",
            detail: format!("token store initialization failed: {reason}"),
        },
        other => HealthCheck {
            status: "degraded",
            detail: format!("token store is {}", other.label()),
        },
    }
}

async fn query_check(pool: &DbPool) -> HealthCheck {
    match sqlx::query_scalar::<_, i64>("SELECT 1").fetch_one(pool).await {
        Ok(_) => HealthCheck { status: "ready", detail: "token store query succeeded".to_string() },
        Err(error) => {
            HealthCheck { status: "degraded", detail: format!("token store query failed: {error}") }
        }
    }
}
