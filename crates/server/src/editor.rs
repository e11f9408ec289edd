//! Rate editor backend and query endpoints.
//!
//! Every write decodes the new document and builds its engine before anything is persisted,
//! then swaps the engine in. Readers keep whichever engine they loaded, so a lookup never sees
//! a half-applied save. Writes are serialized.

use std::path::Path;
use std::sync::Arc;

use arc_swap::ArcSwap;
use axum::{
    extract::{rejection::JsonRejection, Path as UrlPath, Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use ratebook_core::engine::DEFAULT_YEAR;
use ratebook_core::rates::set_cell;
use ratebook_core::{
    match_cell, ApplicationError, BackingStore, InterfaceError, PjmZoneInfo, ProgramMapping,
    RateBook, RateEngine, RateQuery, RateResult, Region, ResolutionFailure, StoreError,
    UtilityProgramData,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tower_http::services::{ServeDir, ServeFile};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::crm::client::{ProgramUpdate, ProgramUpdater};

pub const EDITOR_PAGE: &str = "pricing-editor.html";

#[derive(Clone)]
pub struct EditorState {
    store: Arc<dyn BackingStore>,
    engine: Arc<ArcSwap<RateEngine>>,
    programs: Arc<[ProgramMapping]>,
    updater: Option<Arc<dyn ProgramUpdater>>,
    writes: Arc<Mutex<()>>,
}

impl EditorState {
    /// `updater` is `None` when CRM sync is disabled; mapped cells are then saved locally only.
    pub fn new(
        store: Arc<dyn BackingStore>,
        engine: Arc<ArcSwap<RateEngine>>,
        programs: Vec<ProgramMapping>,
        updater: Option<Arc<dyn ProgramUpdater>>,
    ) -> Self {
        Self { store, engine, programs: programs.into(), updater, writes: Arc::new(Mutex::new(())) }
    }

    /// Validates, persists and publishes one document.
    fn publish(&self, content: &str) -> Result<Option<String>, StoreError> {
        let engine = prepare(content)?;
        self.commit(content, engine)
    }

    /// Persists a document whose engine is already built, then swaps the engine in.
    fn commit(&self, content: &str, engine: RateEngine) -> Result<Option<String>, StoreError> {
        let outcome = self.store.save_document(content)?;
        self.engine.store(Arc::new(engine));
        info!(
            event_name = "editor.store.published",
            correlation_id = "editor",
            bytes = outcome.bytes_written,
            "rate store saved and engine reloaded"
        );
        Ok(outcome.backup)
    }
}

fn prepare(content: &str) -> Result<RateEngine, StoreError> {
    Ok(RateEngine::from_book(RateBook::from_json(content)?)?)
}

#[derive(Debug, Serialize)]
struct EditorError {
    success: bool,
    error: String,
}

type EditorFailure = (StatusCode, Json<EditorError>);

fn failure(status: StatusCode, error: impl Into<String>) -> EditorFailure {
    (status, Json(EditorError { success: false, error: error.into() }))
}

fn store_failure(error: StoreError) -> EditorFailure {
    let correlation_id = Uuid::new_v4().to_string();
    match ApplicationError::from(error).into_interface(correlation_id) {
        InterfaceError::BadRequest { message, .. } => failure(StatusCode::BAD_REQUEST, message),
        interface => {
            error!(
                event_name = "editor.store.error",
                correlation_id = %interface.correlation_id(),
                error = %interface.message(),
                "rate store access failed"
            );
            failure(StatusCode::INTERNAL_SERVER_ERROR, "Failed to save file")
        }
    }
}

pub fn router(state: EditorState, static_dir: &Path) -> Router {
    Router::new()
        .route("/api/pricing", get(get_pricing))
        .route("/api/save-pricing", post(save_pricing))
        .route("/api/rates/cell", post(update_cell))
        .route("/api/rates/resolve", get(resolve_query).post(resolve_body))
        .route("/api/rates/price", get(price))
        .route("/api/rates/utility-program", get(utility_program))
        .route("/api/rates/pjm-zone/{zone}", get(pjm_zone))
        .route_service("/", ServeFile::new(static_dir.join(EDITOR_PAGE)))
        .fallback_service(ServeDir::new(static_dir))
        .with_state(state)
}

async fn get_pricing(State(state): State<EditorState>) -> Result<Json<Value>, EditorFailure> {
    let data = state.store.read_document().map_err(|error| {
        error!(event_name = "editor.store.read_failed", error = %error, "rate store read failed");
        failure(StatusCode::INTERNAL_SERVER_ERROR, "Failed to read pricing table")
    })?;
    Ok(Json(json!({ "data": data })))
}

#[derive(Debug, Deserialize)]
struct SavePricingRequest {
    content: String,
}

async fn save_pricing(
    State(state): State<EditorState>,
    payload: Result<Json<SavePricingRequest>, JsonRejection>,
) -> Result<Json<Value>, EditorFailure> {
    let Ok(Json(request)) = payload else {
        return Err(failure(StatusCode::BAD_REQUEST, "Invalid request"));
    };

    let _write = state.writes.lock().await;
    let backup = state.publish(&request.content).map_err(store_failure)?;

    Ok(Json(json!({
        "success": true,
        "message": "File saved successfully",
        "backup": backup,
    })))
}

#[derive(Debug, Deserialize)]
struct CellEdit {
    path: String,
    value: Value,
}

async fn update_cell(
    State(state): State<EditorState>,
    payload: Result<Json<CellEdit>, JsonRejection>,
) -> Result<Json<Value>, EditorFailure> {
    let Ok(Json(edit)) = payload else {
        return Err(failure(StatusCode::BAD_REQUEST, "Invalid request"));
    };
    let Some(value) = edit.value.as_f64().filter(|value| value.is_finite()) else {
        return Err(failure(StatusCode::BAD_REQUEST, "value must be a number"));
    };

    let _write = state.writes.lock().await;
    let previous = state.store.read_document().map_err(store_failure)?;
    let mut document: Value =
        serde_json::from_str(&previous).map_err(|error| store_failure(StoreError::Decode(error)))?;
    set_cell(&mut document, &edit.path, edit.value.clone()).map_err(store_failure)?;
    let content = serde_json::to_string_pretty(&document)
        .map_err(|error| store_failure(StoreError::Decode(error)))?;
    let engine = prepare(&content).map_err(store_failure)?;

    // CRM first; a rejected sync writes nothing.
    let sync = match (&state.updater, match_cell(&edit.path, &state.programs)) {
        (Some(updater), Some(sync)) => {
            let update = ProgramUpdate::price(value, Some(sync.year.clone()));
            if let Err(sync_error) = updater.update_program(&sync.program_id, &update).await {
                warn!(
                    event_name = "editor.crm.sync_failed",
                    correlation_id = "editor",
                    program_id = %sync.program_id,
                    error = %sync_error,
                    "crm sync failed; cell edit not saved"
                );
                return Err(failure(
                    StatusCode::BAD_GATEWAY,
                    format!(
                        "CRM update for {} failed, edit not saved: {sync_error}",
                        sync.program_name
                    ),
                ));
            }
            info!(
                event_name = "editor.crm.synced",
                correlation_id = "editor",
                program_id = %sync.program_id,
                year = %sync.year,
                "cell edit mirrored to crm program"
            );
            Some(sync)
        }
        _ => None,
    };

    let backup = state.commit(&content, engine).map_err(store_failure)?;
    Ok(Json(json!({
        "success": true,
        "path": edit.path,
        "value": value,
        "backup": backup,
        "synced": sync,
    })))
}

async fn resolve_query(
    State(state): State<EditorState>,
    Query(query): Query<RateQuery>,
) -> Json<RateResult> {
    Json(state.engine.load().resolve(&query))
}

async fn resolve_body(
    State(state): State<EditorState>,
    Json(query): Json<RateQuery>,
) -> Json<RateResult> {
    Json(state.engine.load().resolve(&query))
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PriceQuery {
    zone: String,
    product: String,
    year: Option<String>,
    region: Option<String>,
}

async fn price(
    State(state): State<EditorState>,
    Query(query): Query<PriceQuery>,
) -> Json<RateResult> {
    let region = match query.region.as_deref().map(str::trim).filter(|raw| !raw.is_empty()) {
        None => None,
        Some(raw) => match Region::parse(raw) {
            Some(region) => Some(region),
            None => {
                return Json(RateResult::missing(ResolutionFailure::invalid(format!(
                    "unknown region `{raw}`"
                ))));
            }
        },
    };
    let year = query.year.as_deref().map(str::trim).filter(|year| !year.is_empty());

    Json(state.engine.load().price(
        &query.zone,
        &query.product,
        year.unwrap_or(DEFAULT_YEAR),
        region,
    ))
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct UtilityProgramQuery {
    zone: String,
    program: String,
    utility: Option<String>,
    tier: Option<String>,
}

async fn utility_program(
    State(state): State<EditorState>,
    Query(query): Query<UtilityProgramQuery>,
) -> Result<Json<UtilityProgramData>, EditorFailure> {
    state
        .engine
        .load()
        .utility_program_data(
            &query.zone,
            &query.program,
            query.utility.as_deref(),
            query.tier.as_deref(),
        )
        .map(Json)
        .map_err(|miss| lookup_failure(&miss))
}

async fn pjm_zone(
    State(state): State<EditorState>,
    UrlPath(zone): UrlPath<String>,
) -> Result<Json<PjmZoneInfo>, EditorFailure> {
    state
        .engine
        .load()
        .pjm_zone_info(&zone)
        .map(Json)
        .map_err(|miss| lookup_failure(&miss))
}

fn lookup_failure(miss: &ResolutionFailure) -> EditorFailure {
    let status = match miss {
        ResolutionFailure::InvalidQuery { .. } => StatusCode::BAD_REQUEST,
        _ => StatusCode::NOT_FOUND,
    };
    failure(status, miss.to_string())
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::sync::{Arc, Mutex};

    use arc_swap::ArcSwap;
    use async_trait::async_trait;
    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
        Router,
    };
    use ratebook_core::{
        BackingStore, FileBackingStore, InMemoryBackingStore, ProgramMapping, RateBook,
        RateEngine, RateQuery,
    };
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use super::{router, EditorState, EDITOR_PAGE};
    use crate::crm::client::{CrmClientError, ProgramUpdate, ProgramUpdater};

    const DOCUMENT: &str = r#"{
  "isoneRates": {
    "adcr": { "CT": { "25-26": 2.59 } },
    "connectedSolutions": { "RI Energy": { "Targeted Dispatch": { "25-26": 35 } } }
  },
  "pjmRates": { "ec": { "zones": { "BGE": { "capacity": 0.46635, "excess": 0.0125 } } } }
}"#;

    #[derive(Default)]
    struct RecordingUpdater {
        fail: bool,
        calls: Mutex<Vec<(String, ProgramUpdate)>>,
    }

    #[async_trait]
    impl ProgramUpdater for RecordingUpdater {
        async fn update_program(
            &self,
            program_id: &str,
            update: &ProgramUpdate,
        ) -> Result<Value, CrmClientError> {
            self.calls.lock().unwrap().push((program_id.to_string(), update.clone()));
            if self.fail {
                return Err(CrmClientError::EmptyToken);
            }
            Ok(json!({ "id": program_id }))
        }
    }

    struct Harness {
        store: Arc<InMemoryBackingStore>,
        engine: Arc<ArcSwap<RateEngine>>,
        updater: Arc<RecordingUpdater>,
        app: Router,
    }

    fn harness(updater: RecordingUpdater, static_dir: &Path) -> Harness {
        let store = Arc::new(InMemoryBackingStore::with_document(DOCUMENT));
        let book = RateBook::from_json(DOCUMENT).unwrap();
        let engine = Arc::new(ArcSwap::from_pointee(RateEngine::from_book(book).unwrap()));
        let updater = Arc::new(updater);
        let state = EditorState::new(
            store.clone(),
            engine.clone(),
            ri_program(),
            Some(updater.clone() as Arc<dyn ProgramUpdater>),
        );
        Harness { store, engine, updater, app: router(state, static_dir) }
    }

    fn ri_program() -> Vec<ProgramMapping> {
        vec![ProgramMapping {
            name: "RI Energy Targeted Dispatch".to_string(),
            program_id: "510104b7-a1bb-ea11-a812-000d3a1bb080".to_string(),
            utility: "RI Energy".to_string(),
            dispatch: "Targeted Dispatch".to_string(),
        }]
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn adcr(engine: &ArcSwap<RateEngine>) -> Option<f64> {
        engine.load().resolve(&RateQuery::new("ADCR").with_zone("CT")).value
    }

    #[tokio::test]
    async fn pricing_returns_raw_document() {
        let dir = tempfile::tempdir().unwrap();
        let harness = harness(RecordingUpdater::default(), dir.path());

        let response = harness.app.oneshot(get("/api/pricing")).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["data"], DOCUMENT);
    }

    #[tokio::test]
    async fn save_rejects_missing_content_and_invalid_documents() {
        let dir = tempfile::tempdir().unwrap();
        let harness = harness(RecordingUpdater::default(), dir.path());

        let missing =
            harness.app.clone().oneshot(post_json("/api/save-pricing", json!({}))).await.unwrap();
        let invalid = harness
            .app
            .oneshot(post_json("/api/save-pricing", json!({ "content": "{\"isoneRates\": [" })))
            .await
            .unwrap();

        assert_eq!(missing.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(missing).await["error"], "Invalid request");
        assert_eq!(invalid.status(), StatusCode::BAD_REQUEST);
        assert_eq!(harness.store.read_document().unwrap(), DOCUMENT);
        assert!(harness.store.backups().unwrap().is_empty());
    }

    #[tokio::test]
    async fn save_backs_up_and_reloads_engine() {
        let dir = tempfile::tempdir().unwrap();
        let harness = harness(RecordingUpdater::default(), dir.path());
        let content = DOCUMENT.replace("2.59", "2.75");

        let response = harness
            .app
            .oneshot(post_json("/api/save-pricing", json!({ "content": content })))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["message"], "File saved successfully");
        assert_eq!(harness.store.backups().unwrap(), vec![DOCUMENT.to_string()]);
        assert_eq!(adcr(&harness.engine), Some(2.75));
    }

    #[tokio::test]
    async fn unmapped_cell_edit_is_saved_without_sync() {
        let dir = tempfile::tempdir().unwrap();
        let harness = harness(RecordingUpdater::default(), dir.path());

        let response = harness
            .app
            .oneshot(post_json(
                "/api/rates/cell",
                json!({ "path": "isoneRates.adcr.CT.25-26", "value": 3.1 }),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["synced"], Value::Null);
        assert_eq!(adcr(&harness.engine), Some(3.1));
        assert!(harness.updater.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn mapped_cell_edit_is_pushed_to_crm() {
        let dir = tempfile::tempdir().unwrap();
        let harness = harness(RecordingUpdater::default(), dir.path());

        let response = harness
            .app
            .oneshot(post_json(
                "/api/rates/cell",
                json!({
                    "path": "isoneRates.connectedSolutions.RI Energy.Targeted Dispatch.25-26",
                    "value": 40
                }),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["synced"]["year"], "2025-26");
        let calls = harness.updater.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "510104b7-a1bb-ea11-a812-000d3a1bb080");
        assert_eq!(calls[0].1.price_per_kw, 40.0);
        assert_eq!(calls[0].1.year.as_deref(), Some("2025-26"));
    }

    #[tokio::test]
    async fn failed_crm_sync_leaves_store_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let harness = harness(RecordingUpdater { fail: true, ..Default::default() }, dir.path());

        let response = harness
            .app
            .oneshot(post_json(
                "/api/rates/cell",
                json!({
                    "path": "isoneRates.connectedSolutions.RI Energy.Targeted Dispatch.25-26",
                    "value": 40
                }),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(harness.store.read_document().unwrap(), DOCUMENT);
        assert!(harness.store.backups().unwrap().is_empty());
        let restored = harness.engine.load().rate_by_utility("RI Energy", "Targeted Dispatch", None);
        assert_eq!(restored.value, Some(35.0));
    }

    #[tokio::test]
    async fn failed_crm_sync_keeps_file_and_backup_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rate-store.json");
        let older = DOCUMENT.replace("2.59", "1.11");
        std::fs::write(&path, DOCUMENT).unwrap();
        std::fs::write(dir.path().join("rate-store.json.backup"), &older).unwrap();

        let store = Arc::new(FileBackingStore::new(&path, ".backup"));
        let book = RateBook::from_json(DOCUMENT).unwrap();
        let engine = Arc::new(ArcSwap::from_pointee(RateEngine::from_book(book).unwrap()));
        let updater = Arc::new(RecordingUpdater { fail: true, ..Default::default() });
        let state = EditorState::new(
            store.clone(),
            engine.clone(),
            ri_program(),
            Some(updater.clone() as Arc<dyn ProgramUpdater>),
        );

        let response = router(state, dir.path())
            .oneshot(post_json(
                "/api/rates/cell",
                json!({
                    "path": "isoneRates.connectedSolutions.RI Energy.Targeted Dispatch.25-26",
                    "value": 40
                }),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), DOCUMENT);
        assert_eq!(std::fs::read_to_string(store.backup_path()).unwrap(), older);
        assert_eq!(updater.calls.lock().unwrap().len(), 1);
        let current = engine.load().rate_by_utility("RI Energy", "Targeted Dispatch", None);
        assert_eq!(current.value, Some(35.0));
    }

    #[tokio::test]
    async fn cell_edit_requires_numeric_value() {
        let dir = tempfile::tempdir().unwrap();
        let harness = harness(RecordingUpdater::default(), dir.path());

        let response = harness
            .app
            .oneshot(post_json(
                "/api/rates/cell",
                json!({ "path": "isoneRates.adcr.CT.25-26", "value": "high" }),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(harness.store.read_document().unwrap(), DOCUMENT);
    }

    #[tokio::test]
    async fn resolve_accepts_query_string_and_json_body() {
        let dir = tempfile::tempdir().unwrap();
        let harness = harness(RecordingUpdater::default(), dir.path());

        let by_query = harness
            .app
            .clone()
            .oneshot(get("/api/rates/resolve?product=ADCR&zone=CT&year=25-26"))
            .await
            .unwrap();
        let by_body = harness
            .app
            .oneshot(post_json("/api/rates/resolve", json!({ "product": "EC", "zone": "BGE" })))
            .await
            .unwrap();

        assert_eq!(body_json(by_query).await["value"], 2.59);
        assert_eq!(body_json(by_body).await["value"], 0.46635);
    }

    #[tokio::test]
    async fn price_with_unknown_region_is_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let harness = harness(RecordingUpdater::default(), dir.path());

        let response = harness
            .app
            .oneshot(get("/api/rates/price?zone=CT&product=ADCR&region=mars"))
            .await
            .unwrap();

        let body = body_json(response).await;
        assert_eq!(body["value"], Value::Null);
        assert_eq!(body["diagnostic"]["kind"], "invalid_query");
    }

    #[tokio::test]
    async fn pjm_zone_info_or_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let harness = harness(RecordingUpdater::default(), dir.path());

        let known = harness.app.clone().oneshot(get("/api/rates/pjm-zone/BGE")).await.unwrap();
        let unknown = harness.app.oneshot(get("/api/rates/pjm-zone/NOPE")).await.unwrap();

        assert_eq!(known.status(), StatusCode::OK);
        let info = body_json(known).await;
        assert_eq!(info["type"], "Zone");
        assert_eq!(info["capacityPrice"], 0.46635);
        assert_eq!(unknown.status(), StatusCode::NOT_FOUND);
        let error = body_json(unknown).await;
        assert_eq!(error["error"], "no rate entry at `pjmRates.ec.zones.NOPE`");
    }

    #[tokio::test]
    async fn utility_program_misses_separate_bad_queries_from_absent_rows() {
        let dir = tempfile::tempdir().unwrap();
        let harness = harness(RecordingUpdater::default(), dir.path());

        let no_utility = harness
            .app
            .clone()
            .oneshot(get("/api/rates/utility-program?zone=NYC&program=CSRP"))
            .await
            .unwrap();
        let absent = harness
            .app
            .oneshot(get("/api/rates/utility-program?zone=NYC&program=CSRP&utility=ConEd"))
            .await
            .unwrap();

        assert_eq!(no_utility.status(), StatusCode::BAD_REQUEST);
        assert_eq!(absent.status(), StatusCode::NOT_FOUND);
        let error = body_json(absent).await;
        assert_eq!(error["error"], "no rate entry at `nyisoRates.csrp.NYC.ConEd`");
    }

    #[tokio::test]
    async fn root_serves_editor_page() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(EDITOR_PAGE), "<h1>Rate editor</h1>").unwrap();
        let harness = harness(RecordingUpdater::default(), dir.path());

        let page = harness.app.clone().oneshot(get("/")).await.unwrap();
        let missing = harness.app.oneshot(get("/nothing-here.js")).await.unwrap();

        assert_eq!(page.status(), StatusCode::OK);
        let bytes = to_bytes(page.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], b"<h1>Rate editor</h1>");
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
    }
}
