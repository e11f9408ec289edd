use std::sync::Arc;

use arc_swap::ArcSwap;
use axum::Router;
use ratebook_core::config::{AppConfig, ConfigError};
use ratebook_core::{BackingStore, FileBackingStore, RateEngine, StoreError};
use thiserror::Error;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

use crate::crm::client::{CrmClientError, DynamicsClient, ProgramUpdater};
use crate::editor::EditorState;
use crate::health::HealthState;

pub struct Application {
    pub config: AppConfig,
    pub store: Arc<dyn BackingStore>,
    pub engine: Arc<ArcSwap<RateEngine>>,
    pub crm: Option<Arc<DynamicsClient>>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("rate store could not be loaded: {0}")]
    Store(#[from] StoreError),
    #[error("crm client could not be initialized: {0}")]
    Crm(#[from] CrmClientError),
}

#[cfg(test)]
pub fn bootstrap(
    options: ratebook_core::config::LoadOptions,
) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config)
}

pub fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );

    let store: Arc<dyn BackingStore> =
        Arc::new(FileBackingStore::new(&config.store.path, config.store.backup_suffix.clone()));
    let book = store.load()?;
    let engine = RateEngine::from_book(book).map_err(StoreError::from)?;
    info!(
        event_name = "system.bootstrap.store_loaded",
        correlation_id = "bootstrap",
        store = %store.describe(),
        "rate store loaded"
    );

    let crm = if config.crm.enabled {
        let client = DynamicsClient::from_config(&config.crm)?;
        info!(
            event_name = "system.bootstrap.crm_ready",
            correlation_id = "bootstrap",
            mapped_programs = config.crm.programs.len(),
            "crm client initialized"
        );
        Some(Arc::new(client))
    } else {
        None
    };

    Ok(Application { config, store, engine: Arc::new(ArcSwap::from_pointee(engine)), crm })
}

impl Application {
    pub fn health_state(&self) -> HealthState {
        HealthState::new(self.store.clone(), &self.config.crm)
    }

    /// Editor, query and CRM proxy routes on one listener.
    pub fn router(&self) -> Router {
        let updater = self.crm.clone().map(|client| client as Arc<dyn ProgramUpdater>);
        let editor = EditorState::new(
            self.store.clone(),
            self.engine.clone(),
            self.config.crm.programs.clone(),
            updater,
        );

        crate::crm::router(&self.config.crm, self.crm.clone())
            .merge(crate::editor::router(editor, &self.config.store.static_dir))
            .layer(CorsLayer::permissive())
            .layer(TraceLayer::new_for_http())
    }
}
