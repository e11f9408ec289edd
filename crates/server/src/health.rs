use std::sync::Arc;

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::Utc;
use ratebook_core::{config::CrmConfig, BackingStore};
use serde::Serialize;
use tracing::{error, info};

#[derive(Clone)]
pub struct HealthState {
    store: Arc<dyn BackingStore>,
    crm_enabled: bool,
    crm_configured: bool,
}

impl HealthState {
    pub fn new(store: Arc<dyn BackingStore>, crm: &CrmConfig) -> Self {
        Self { store, crm_enabled: crm.enabled, crm_configured: crm.has_credentials() }
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
    pub crm: HealthCheck,
    pub checked_at: String,
}

pub fn router(state: HealthState) -> Router {
    Router::new().route("/health", get(health)).with_state(state)
}

pub async fn spawn(bind_address: &str, port: u16, state: HealthState) -> std::io::Result<()> {
    let address = format!("{bind_address}:{port}");
    let listener = tokio::net::TcpListener::bind(&address).await?;

    info!(
        event_name = "system.health.start",
        correlation_id = "bootstrap",
        bind_address = %address,
        "health endpoint started"
    );

    tokio::spawn(async move {
        if let Err(error) = axum::serve(listener, router(state)).await {
            error!(
                event_name = "system.health.error",
                correlation_id = "bootstrap",
                error = %error,
                "health endpoint server terminated unexpectedly"
            );
        }
    });

    Ok(())
}

pub async fn health(State(state): State<HealthState>) -> (StatusCode, Json<HealthResponse>) {
    let store = store_check(state.store.as_ref());
    let crm = crm_check(state.crm_enabled, state.crm_configured);
    let ready = store.status == "ready" && crm.status != "degraded";

    let payload = HealthResponse {
        status: if ready { "ready" } else { "degraded" },
        service: HealthCheck {
            status: "ready",
            detail: "ratebook-server runtime initialized".to_string(),
        },
        store,
        crm,
        checked_at: Utc::now().to_rfc3339(),
    };

    let status_code = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status_code, Json(payload))
}

fn store_check(store: &dyn BackingStore) -> HealthCheck {
    match store.load() {
        Ok(book) => HealthCheck {
            status: "ready",
            detail: format!(
                "{} decoded ({} tables populated)",
                store.describe(),
                book.table_counts().values().filter(|count| **count > 0).count()
            ),
        },
        Err(error) => {
            HealthCheck { status: "degraded", detail: format!("rate store unavailable: {error}") }
        }
    }
}

fn crm_check(enabled: bool, configured: bool) -> HealthCheck {
    match (enabled, configured) {
        (false, _) => {
            HealthCheck { status: "disabled", detail: "crm integration is disabled".to_string() }
        }
        (true, true) => {
            HealthCheck { status: "ready", detail: "crm credentials configured".to_string() }
        }
        (true, false) => HealthCheck {
            status: "degraded",
            detail: "crm is enabled but credentials are incomplete".to_string(),
        },
    }
}
