//! Dynamics 365 proxy endpoints.
//!
//! Routes:
//! - `GET  /api/test-connection`
//! - `POST /api/update-program/{program_id}`
//! - `GET  /api/program/{program_id}`
//! - `GET  /api/programs/search?name=`
//! - `GET  /api/programs?top=&orderby=`
//! - `GET  /api/search-fields/{entity}?search=&type=`
//! - business rule routes, see [`workflows`]

pub mod client;
pub mod workflows;

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, patch, post},
    Router,
};
use chrono::Utc;
use ratebook_core::config::CrmConfig;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{error, info};
use uuid::Uuid;

use self::client::{CrmClientError, DynamicsClient, ProgramUpdate, ProgramUpdater};

const DEFAULT_PROGRAM_PAGE: u32 = 100;
const MAX_PROGRAM_PAGE: u32 = 5000;
const DEFAULT_PROGRAM_ORDER: &str = "createdon desc";

#[derive(Clone)]
pub struct CrmState {
    enabled: bool,
    client: Option<Arc<DynamicsClient>>,
}

#[derive(Debug, Serialize)]
pub(crate) struct CrmError {
    success: bool,
    error: String,
}

pub(crate) type CrmFailure = (StatusCode, Json<CrmError>);

pub(crate) fn failure(status: StatusCode, error: impl Into<String>) -> CrmFailure {
    (status, Json(CrmError { success: false, error: error.into() }))
}

pub fn router(config: &CrmConfig, client: Option<Arc<DynamicsClient>>) -> Router {
    let state = CrmState { enabled: config.enabled, client };

    Router::new()
        .route("/api/test-connection", get(test_connection))
        .route("/api/update-program/{program_id}", post(update_program))
        .route("/api/program/{program_id}", get(get_program))
        .route("/api/programs/search", get(search_programs))
        .route("/api/programs", get(list_programs))
        .route("/api/search-fields/{entity}", get(search_fields))
        .route("/api/business-rules/{entity}", get(workflows::list_rules))
        .route("/api/business-rules", post(workflows::create_rule))
        .route("/api/business-rule/{rule_id}", patch(workflows::update_rule))
        .route("/api/business-rule/{rule_id}/activate", post(workflows::activate_rule))
        .with_state(state)
}

pub(crate) fn crm_state_guard(state: &CrmState) -> Result<&DynamicsClient, CrmFailure> {
    if !state.enabled {
        return Err(failure(StatusCode::FORBIDDEN, "crm integration is disabled"));
    }
    state
        .client
        .as_deref()
        .ok_or_else(|| failure(StatusCode::BAD_REQUEST, "crm credentials are not configured"))
}

pub(crate) fn upstream_error(error: CrmClientError) -> CrmFailure {
    error!(event_name = "crm.request.failed", error = %error, "dynamics request failed");
    let status = match &error {
        CrmClientError::NotConfigured(_) => StatusCode::BAD_REQUEST,
        CrmClientError::Transport(_)
        | CrmClientError::Upstream { .. }
        | CrmClientError::EmptyToken => StatusCode::BAD_GATEWAY,
    };
    failure(status, error.to_string())
}

/// Record ids are interpolated into OData resource paths, so only GUIDs are accepted.
pub(crate) fn record_id(raw: &str, field: &str) -> Result<String, CrmFailure> {
    Uuid::parse_str(raw.trim().trim_matches(|c| c == '{' || c == '}'))
        .map(|id| id.to_string())
        .map_err(|_| failure(StatusCode::BAD_REQUEST, format!("{field} must be a GUID")))
}

/// Entity logical names are lower-case identifiers.
pub(crate) fn logical_name(raw: &str) -> Result<String, CrmFailure> {
    let name = raw.trim();
    let valid = !name.is_empty()
        && name
            .bytes()
            .all(|byte| byte.is_ascii_lowercase() || byte.is_ascii_digit() || byte == b'_');
    if valid {
        Ok(name.to_string())
    } else {
        Err(failure(StatusCode::BAD_REQUEST, format!("`{raw}` is not an entity logical name")))
    }
}

/// Quotes a string literal for an OData `$filter`.
pub(crate) fn odata_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

async fn test_connection(State(state): State<CrmState>) -> Result<Json<Value>, CrmFailure> {
    let client = crm_state_guard(&state)?;
    client.access_token().await.map_err(upstream_error)?;

    Ok(Json(json!({
        "success": true,
        "message": "Successfully connected to Dynamics 365",
        "baseUrl": client.base_url(),
        "timestamp": Utc::now().to_rfc3339(),
    })))
}

async fn update_program(
    State(state): State<CrmState>,
    Path(program_id): Path<String>,
    Json(body): Json<Map<String, Value>>,
) -> Result<Json<Value>, CrmFailure> {
    let client = crm_state_guard(&state)?;
    let program_id = record_id(&program_id, "programId")?;
    let update = program_update(body)?;

    let record = client.update_program(&program_id, &update).await.map_err(upstream_error)?;

    info!(
        event_name = "crm.proxy.program_updated",
        correlation_id = "crm",
        program_id = %program_id,
        "program updated through proxy"
    );
    Ok(Json(json!({
        "success": true,
        "message": format!("Program {program_id} updated to ${}/kW", update.price_per_kw),
        "programId": program_id,
        "updatedValue": update.price_per_kw,
        "record": record,
    })))
}

/// Splits an update request into the price, the optional year and the remaining columns.
fn program_update(mut body: Map<String, Value>) -> Result<ProgramUpdate, CrmFailure> {
    let price = match body.remove("pricePerKw") {
        None | Some(Value::Null) => {
            return Err(failure(StatusCode::BAD_REQUEST, "pricePerKw is required"));
        }
        Some(raw) => number(&raw)
            .ok_or_else(|| failure(StatusCode::BAD_REQUEST, "pricePerKw must be a number"))?,
    };
    let year = match body.remove("year") {
        Some(Value::String(year)) if !year.trim().is_empty() => Some(year.trim().to_string()),
        _ => None,
    };
    body.remove("programId");

    Ok(ProgramUpdate { price_per_kw: price, year, extra: body })
}

fn number(value: &Value) -> Option<f64> {
    let parsed = match value {
        Value::Number(number) => number.as_f64(),
        Value::String(raw) => raw.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    parsed.is_finite().then_some(parsed)
}

async fn get_program(
    State(state): State<CrmState>,
    Path(program_id): Path<String>,
) -> Result<Json<Value>, CrmFailure> {
    let client = crm_state_guard(&state)?;
    let program_id = record_id(&program_id, "programId")?;
    let entity = client.entity();

    let data = client
        .get(
            &client.program_resource(&program_id),
            &[("$select", format!("{},{}", entity.price_field, entity.name_field))],
        )
        .await
        .map_err(upstream_error)?;

    Ok(Json(json!({ "success": true, "programId": program_id, "data": data })))
}

#[derive(Debug, Deserialize)]
struct SearchProgramsQuery {
    name: Option<String>,
}

async fn search_programs(
    State(state): State<CrmState>,
    Query(query): Query<SearchProgramsQuery>,
) -> Result<Json<Value>, CrmFailure> {
    let client = crm_state_guard(&state)?;
    let name = query
        .name
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .ok_or_else(|| failure(StatusCode::BAD_REQUEST, "name parameter is required"))?;
    let entity = client.entity();

    let programs = client
        .get_rows(
            &entity.entity_set,
            &[
                ("$filter", format!("{} eq {}", entity.name_field, odata_literal(&name))),
                (
                    "$select",
                    format!(
                        "{},{},{},{}",
                        entity.price_field, entity.name_field, entity.year_field, entity.id_field
                    ),
                ),
            ],
        )
        .await
        .map_err(upstream_error)?;

    Ok(Json(json!({ "success": true, "searchTerm": name, "programs": programs })))
}

#[derive(Debug, Deserialize)]
struct ListProgramsQuery {
    top: Option<u32>,
    orderby: Option<String>,
}

#[derive(Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
struct ProgramSummary {
    id: Option<String>,
    name: Option<String>,
    price_per_kw: Option<f64>,
    createdon: Option<String>,
}

async fn list_programs(
    State(state): State<CrmState>,
    Query(query): Query<ListProgramsQuery>,
) -> Result<Json<Value>, CrmFailure> {
    let client = crm_state_guard(&state)?;
    let entity = client.entity();
    let top = query.top.unwrap_or(DEFAULT_PROGRAM_PAGE).clamp(1, MAX_PROGRAM_PAGE);
    let orderby = query
        .orderby
        .map(|order| order.trim().to_string())
        .filter(|order| !order.is_empty())
        .unwrap_or_else(|| DEFAULT_PROGRAM_ORDER.to_string());

    let rows = client
        .get_rows(
            &entity.entity_set,
            &[
                (
                    "$select",
                    format!(
                        "{},{},{},createdon",
                        entity.id_field, entity.name_field, entity.price_field
                    ),
                ),
                ("$top", top.to_string()),
                ("$orderby", orderby),
            ],
        )
        .await
        .map_err(upstream_error)?;

    let programs: Vec<ProgramSummary> = rows
        .iter()
        .map(|row| ProgramSummary {
            id: text(row, &entity.id_field),
            name: text(row, &entity.name_field),
            price_per_kw: row.get(&entity.price_field).and_then(Value::as_f64),
            createdon: text(row, "createdon"),
        })
        .collect();

    Ok(Json(json!({ "success": true, "count": programs.len(), "programs": programs })))
}

fn text(row: &Value, field: &str) -> Option<String> {
    row.get(field).and_then(Value::as_str).map(str::to_string)
}

#[derive(Debug, Deserialize)]
struct SearchFieldsQuery {
    search: Option<String>,
    #[serde(rename = "type")]
    field_type: Option<String>,
}

#[derive(Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct FieldInfo {
    logical_name: String,
    display_name: String,
    #[serde(rename = "type")]
    field_type: String,
}

async fn search_fields(
    State(state): State<CrmState>,
    Path(entity): Path<String>,
    Query(query): Query<SearchFieldsQuery>,
) -> Result<Json<Value>, CrmFailure> {
    let client = crm_state_guard(&state)?;
    let entity = logical_name(&entity)?;

    let rows = client
        .get_rows(
            &format!("EntityDefinitions(LogicalName={})/Attributes", odata_literal(&entity)),
            &[
                ("$select", "LogicalName,DisplayName,AttributeType".to_string()),
                ("$filter", "AttributeOf eq null".to_string()),
            ],
        )
        .await
        .map_err(upstream_error)?;

    let matching = matching_fields(&rows, query.search.as_deref(), query.field_type.as_deref());

    Ok(Json(json!({
        "success": true,
        "searchTerm": query.search.unwrap_or_default(),
        "fieldType": query.field_type.unwrap_or_default(),
        "matchingFields": matching,
    })))
}

pub(crate) fn matching_fields(
    rows: &[Value],
    search: Option<&str>,
    field_type: Option<&str>,
) -> Vec<FieldInfo> {
    let search = search.map(str::trim).filter(|term| !term.is_empty()).map(str::to_lowercase);
    let field_type = field_type.map(str::trim).filter(|kind| !kind.is_empty());

    rows.iter()
        .map(|row| FieldInfo {
            logical_name: text(row, "LogicalName").unwrap_or_default(),
            display_name: row
                .pointer("/DisplayName/LocalizedLabels/0/Label")
                .and_then(Value::as_str)
                .unwrap_or("No display name")
                .to_string(),
            field_type: text(row, "AttributeType").unwrap_or_default(),
        })
        .filter(|field| {
            search.as_deref().map_or(true, |term| {
                field.logical_name.to_lowercase().contains(term)
                    || field.display_name.to_lowercase().contains(term)
            })
        })
        .filter(|field| field_type.map_or(true, |kind| field.field_type.eq_ignore_ascii_case(kind)))
        .collect()
}
