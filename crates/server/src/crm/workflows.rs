//! Business rules on CRM entities.
//!
//! Rules are `workflow` records with category 2. Their definition travels as opaque JSON in
//! `clientdata`; the proxy stores and returns it but never interprets it. A rule must be
//! deactivated before its definition can change.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, warn};

use super::client::{CrmClientError, DynamicsClient};
use super::{crm_state_guard, failure, logical_name, odata_literal, record_id, upstream_error};
use super::{CrmFailure, CrmState};

const WORKFLOWS: &str = "workflows";
const BUSINESS_RULE_CATEGORY: u8 = 2;
const DEFINITION_TYPE: u8 = 1;
const ORGANIZATION_SCOPE: u8 = 4;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum RuleState {
    Draft,
    Activated,
}

impl RuleState {
    fn set_state_body(self) -> Value {
        match self {
            Self::Draft => json!({ "State": 0, "Status": 1 }),
            Self::Activated => json!({ "State": 1, "Status": 2 }),
        }
    }
}

#[derive(Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct BusinessRule {
    id: Option<String>,
    name: Option<String>,
    description: Option<String>,
    is_active: bool,
    /// Parsed `clientdata`; the raw string when it is not JSON.
    definition: Value,
}

impl BusinessRule {
    fn from_row(row: &Value) -> Self {
        let text = |field: &str| row.get(field).and_then(Value::as_str).map(str::to_string);
        let definition = match row.get("clientdata") {
            Some(Value::String(raw)) => {
                serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.clone()))
            }
            _ => Value::Null,
        };
        Self {
            id: text("workflowid"),
            name: text("name"),
            description: text("description"),
            is_active: row.get("statecode").and_then(Value::as_i64) == Some(1),
            definition,
        }
    }
}

pub(crate) async fn list_rules(
    State(state): State<CrmState>,
    Path(entity): Path<String>,
) -> Result<Json<Value>, CrmFailure> {
    let client = crm_state_guard(&state)?;
    let entity = logical_name(&entity)?;

    let rows = client
        .get_rows(
            WORKFLOWS,
            &[
                (
                    "$filter",
                    format!(
                        "primaryentity eq {} and category eq {BUSINESS_RULE_CATEGORY}",
                        odata_literal(&entity)
                    ),
                ),
                (
                    "$select",
                    "workflowid,name,statecode,statuscode,description,clientdata".to_string(),
                ),
            ],
        )
        .await
        .map_err(upstream_error)?;

    let rules: Vec<BusinessRule> = rows.iter().map(BusinessRule::from_row).collect();
    Ok(Json(json!({ "success": true, "entity": entity, "count": rules.len(), "rules": rules })))
}

#[derive(Debug, Deserialize)]
pub(crate) struct CreateRuleRequest {
    name: String,
    entity: String,
    #[serde(default)]
    description: Option<String>,
    definition: Value,
}

pub(crate) fn workflow_record(request: &CreateRuleRequest, entity: &str) -> Value {
    json!({
        "category": BUSINESS_RULE_CATEGORY,
        "type": DEFINITION_TYPE,
        "scope": ORGANIZATION_SCOPE,
        "name": request.name.trim(),
        "description": request.description.clone().unwrap_or_default(),
        "primaryentity": entity,
        "rendererobjecttypecode": entity,
        "statecode": 0,
        "statuscode": 1,
        "mode": 0,
        "uiflowtype": 0,
        "iscrmuiworkflow": true,
        "clientdata": request.definition.to_string(),
    })
}

pub(crate) async fn create_rule(
    State(state): State<CrmState>,
    Json(request): Json<CreateRuleRequest>,
) -> Result<Json<Value>, CrmFailure> {
    let client = crm_state_guard(&state)?;
    let entity = logical_name(&request.entity)?;
    if request.name.trim().is_empty() {
        return Err(failure(StatusCode::BAD_REQUEST, "name is required"));
    }

    let created = client
        .send(
            Method::POST,
            WORKFLOWS,
            &[],
            Some(&workflow_record(&request, &entity)),
            &[("Prefer", "return=representation")],
        )
        .await
        .map_err(upstream_error)?;
    let rule_id = created
        .get("workflowid")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| failure(StatusCode::BAD_GATEWAY, "created rule has no workflowid"))?;

    let activated = set_state(client, &rule_id, RuleState::Activated).await;
    info!(
        event_name = "crm.rule.created",
        correlation_id = "crm",
        rule_id = %rule_id,
        activated,
        "business rule created"
    );

    let message = if activated {
        "Business rule created and activated"
    } else {
        "Business rule created but activation failed; activate it manually"
    };
    Ok(Json(json!({
        "success": true,
        "ruleId": rule_id,
        "activated": activated,
        "message": message,
    })))
}

#[derive(Debug, Deserialize)]
pub(crate) struct UpdateRuleRequest {
    definition: Value,
}

pub(crate) async fn update_rule(
    State(state): State<CrmState>,
    Path(rule_id): Path<String>,
    Json(request): Json<UpdateRuleRequest>,
) -> Result<Json<Value>, CrmFailure> {
    let client = crm_state_guard(&state)?;
    let rule_id = record_id(&rule_id, "ruleId")?;

    // Deactivation failures surface on the PATCH that follows.
    set_state(client, &rule_id, RuleState::Draft).await;
    client
        .send(
            Method::PATCH,
            &format!("{WORKFLOWS}({rule_id})"),
            &[],
            Some(&json!({ "clientdata": request.definition.to_string() })),
            &[("If-Match", "*")],
        )
        .await
        .map_err(upstream_error)?;
    let activated = set_state(client, &rule_id, RuleState::Activated).await;

    let message = if activated {
        "Business rule updated and activated"
    } else {
        "Business rule updated but needs manual activation"
    };
    Ok(Json(json!({
        "success": true,
        "ruleId": rule_id,
        "activated": activated,
        "message": message,
    })))
}

pub(crate) async fn activate_rule(
    State(state): State<CrmState>,
    Path(rule_id): Path<String>,
) -> Result<Json<Value>, CrmFailure> {
    let client = crm_state_guard(&state)?;
    let rule_id = record_id(&rule_id, "ruleId")?;

    change_state(client, &rule_id, RuleState::Activated).await.map_err(upstream_error)?;

    Ok(Json(json!({ "success": true, "ruleId": rule_id, "message": "Business rule activated" })))
}

async fn change_state(
    client: &DynamicsClient,
    rule_id: &str,
    target: RuleState,
) -> Result<(), CrmClientError> {
    client
        .send(
            Method::POST,
            &format!("{WORKFLOWS}({rule_id})/Microsoft.Dynamics.CRM.SetState"),
            &[],
            Some(&target.set_state_body()),
            &[],
        )
        .await
        .map(|_| ())
}

/// Like [`change_state`] but reports failure as `false` so a create or update can still succeed.
async fn set_state(client: &DynamicsClient, rule_id: &str, target: RuleState) -> bool {
    match change_state(client, rule_id, target).await {
        Ok(()) => true,
        Err(error) => {
            warn!(
                event_name = "crm.rule.state_change_failed",
                correlation_id = "crm",
                rule_id = %rule_id,
                target = ?target,
                error = %error,
                "business rule state change failed"
            );
            false
        }
    }
}
