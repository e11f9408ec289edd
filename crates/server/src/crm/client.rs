//! Dynamics 365 Web API client.
//!
//! Authenticates with the OAuth2 resource-owner password grant and keeps the bearer token
//! until `token_refresh_margin_secs` before it expires. Refreshes run behind a single lock, so
//! concurrent callers wait for one token request instead of issuing their own.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ratebook_core::config::CrmConfig;
use reqwest::{header, Client, Method, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info};

const ODATA_VERSION: &str = "4.0";
const DEFAULT_TOKEN_LIFETIME_SECS: i64 = 3600;
const MAX_TOKEN_LIFETIME_SECS: i64 = 86_400;

#[derive(Debug, Error)]
pub enum CrmClientError {
    #[error("crm is not configured: `{0}` is missing")]
    NotConfigured(&'static str),
    #[error("crm request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("{context} returned {status}: {body}")]
    Upstream { context: &'static str, status: StatusCode, body: String },
    #[error("token endpoint returned an empty access token")]
    EmptyToken,
}

/// Logical names of the program entity and the fields the proxy reads and writes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProgramEntity {
    pub entity_set: String,
    pub id_field: String,
    pub name_field: String,
    pub price_field: String,
    pub year_field: String,
}

impl From<&CrmConfig> for ProgramEntity {
    fn from(config: &CrmConfig) -> Self {
        Self {
            entity_set: config.entity_set.clone(),
            id_field: config.id_field.clone(),
            name_field: config.name_field.clone(),
            price_field: config.price_field.clone(),
            year_field: config.year_field.clone(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ProgramUpdate {
    pub price_per_kw: f64,
    pub year: Option<String>,
    /// Additional columns written verbatim alongside the price.
    pub extra: Map<String, Value>,
}

impl ProgramUpdate {
    pub fn price(price_per_kw: f64, year: Option<String>) -> Self {
        Self { price_per_kw, year, extra: Map::new() }
    }

    /// The PATCH body. Extra columns never override the price or year columns.
    pub fn body(&self, entity: &ProgramEntity) -> Value {
        let mut body = self.extra.clone();
        body.insert(entity.price_field.clone(), json!(self.price_per_kw));
        if let Some(year) = &self.year {
            body.insert(entity.year_field.clone(), json!(year));
        }
        Value::Object(body)
    }
}

/// Writes a program's price to the CRM.
///
/// The editor depends on this seam rather than on [`DynamicsClient`] so cell edits can be
/// exercised without a live organization.
#[async_trait]
pub trait ProgramUpdater: Send + Sync {
    async fn update_program(
        &self,
        program_id: &str,
        update: &ProgramUpdate,
    ) -> Result<Value, CrmClientError>;
}

struct CachedToken {
    access_token: SecretString,
    expires_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    access_token: String,
    /// Azure AD v1 endpoints return this as a string.
    #[serde(default)]
    expires_in: Option<Value>,
}

pub struct DynamicsClient {
    http: Client,
    base_url: String,
    api_root: String,
    token_url: String,
    resource: String,
    client_id: String,
    client_secret: Option<SecretString>,
    username: String,
    password: SecretString,
    refresh_margin_secs: i64,
    entity: ProgramEntity,
    token: Mutex<Option<CachedToken>>,
}

impl DynamicsClient {
    pub fn from_config(config: &CrmConfig) -> Result<Self, CrmClientError> {
        let base_url = required(&config.base_url, "crm.base_url")?;
        let api_root = config.api_root().ok_or(CrmClientError::NotConfigured("crm.base_url"))?;
        let token_url =
            config.token_url().ok_or(CrmClientError::NotConfigured("crm.tenant_id"))?;
        let resource = config
            .resource_url()
            .map(|resource| resource.trim_end_matches('/').to_string())
            .ok_or(CrmClientError::NotConfigured("crm.resource"))?;
        let client_id = required(&config.client_id, "crm.client_id")?;
        let username = required(&config.username, "crm.username")?;
        let password = config
            .password
            .clone()
            .filter(|password| !password.expose_secret().is_empty())
            .ok_or(CrmClientError::NotConfigured("crm.password"))?;

        let http = Client::builder().timeout(Duration::from_secs(config.timeout_secs)).build()?;

        Ok(Self {
            http,
            base_url,
            api_root,
            token_url,
            resource,
            client_id,
            client_secret: config.client_secret.clone(),
            username,
            password,
            refresh_margin_secs: i64::try_from(config.token_refresh_margin_secs)
                .unwrap_or(i64::MAX),
            entity: ProgramEntity::from(config),
            token: Mutex::new(None),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn entity(&self) -> &ProgramEntity {
        &self.entity
    }

    pub async fn access_token(&self) -> Result<SecretString, CrmClientError> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if Utc::now() < token.expires_at {
                return Ok(token.access_token.clone());
            }
        }

        let fresh = self.request_token().await?;
        let access_token = fresh.access_token.clone();
        *cached = Some(fresh);
        Ok(access_token)
    }

    async fn request_token(&self) -> Result<CachedToken, CrmClientError> {
        let mut form: Vec<(&str, &str)> = vec![
            ("grant_type", "password"),
            ("client_id", self.client_id.as_str()),
            ("resource", self.resource.as_str()),
            ("username", self.username.as_str()),
            ("password", self.password.expose_secret()),
        ];
        if let Some(secret) = &self.client_secret {
            form.push(("client_secret", secret.expose_secret()));
        }

        let response = self.http.post(&self.token_url).form(&form).send().await?;
        let response = ensure_success(response, "token endpoint").await?;
        let token: TokenResponse = response.json().await?;
        if token.access_token.is_empty() {
            return Err(CrmClientError::EmptyToken);
        }

        let lifetime = lifetime_secs(token.expires_in.as_ref());
        let usable =
            lifetime.saturating_sub(self.refresh_margin_secs).clamp(0, MAX_TOKEN_LIFETIME_SECS);
        info!(
            event_name = "crm.token.refreshed",
            correlation_id = "crm",
            usable_secs = usable,
            "dynamics access token acquired"
        );

        Ok(CachedToken {
            access_token: token.access_token.into(),
            expires_at: Utc::now() + chrono::Duration::seconds(usable),
        })
    }

    /// Sends one Web API request. `resource` is relative to `<base>/api/data/<version>/`.
    ///
    /// A `204 No Content` reply yields `Value::Null`.
    pub async fn send(
        &self,
        method: Method,
        resource: &str,
        query: &[(&str, String)],
        body: Option<&Value>,
        headers: &[(&'static str, &'static str)],
    ) -> Result<Value, CrmClientError> {
        let token = self.access_token().await?;
        let url = format!("{}/{}", self.api_root, resource.trim_start_matches('/'));
        debug!(event_name = "crm.request.sent", method = %method, url = %url, "dynamics request");

        let mut request = self
            .http
            .request(method, &url)
            .bearer_auth(token.expose_secret())
            .header(header::ACCEPT, "application/json")
            .header("OData-MaxVersion", ODATA_VERSION)
            .header("OData-Version", ODATA_VERSION);
        for (name, value) in headers {
            request = request.header(*name, *value);
        }
        if !query.is_empty() {
            request = request.query(query);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = ensure_success(request.send().await?, "dynamics web api").await?;
        if response.status() == StatusCode::NO_CONTENT {
            return Ok(Value::Null);
        }
        let text = response.text().await?;
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text).map_err(|error| CrmClientError::Upstream {
            context: "dynamics web api",
            status: StatusCode::OK,
            body: format!("response is not JSON: {error}"),
        })
    }

    pub async fn get(
        &self,
        resource: &str,
        query: &[(&str, String)],
    ) -> Result<Value, CrmClientError> {
        self.send(Method::GET, resource, query, None, &[]).await
    }

    /// Collection responses carry their rows under `value`.
    pub async fn get_rows(
        &self,
        resource: &str,
        query: &[(&str, String)],
    ) -> Result<Vec<Value>, CrmClientError> {
        match self.get(resource, query).await? {
            Value::Object(mut body) => match body.remove("value") {
                Some(Value::Array(rows)) => Ok(rows),
                _ => Ok(Vec::new()),
            },
            _ => Ok(Vec::new()),
        }
    }

    pub fn program_resource(&self, program_id: &str) -> String {
        format!("{}({program_id})", self.entity.entity_set)
    }
}

#[async_trait]
impl ProgramUpdater for DynamicsClient {
    async fn update_program(
        &self,
        program_id: &str,
        update: &ProgramUpdate,
    ) -> Result<Value, CrmClientError> {
        let body = update.body(&self.entity);
        let record = self
            .send(
                Method::PATCH,
                &self.program_resource(program_id),
                &[],
                Some(&body),
                &[("If-Match", "*"), ("Prefer", "return=representation")],
            )
            .await?;

        info!(
            event_name = "crm.program.updated",
            correlation_id = "crm",
            program_id = %program_id,
            price_per_kw = update.price_per_kw,
            "program price written to dynamics"
        );

        Ok(match record {
            Value::Null => json!({ "id": program_id }),
            record => record,
        })
    }
}

async fn ensure_success(
    response: reqwest::Response,
    context: &'static str,
) -> Result<reqwest::Response, CrmClientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(CrmClientError::Upstream { context, status, body })
}

fn required(value: &Option<String>, field: &'static str) -> Result<String, CrmClientError> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .ok_or(CrmClientError::NotConfigured(field))
}

fn lifetime_secs(value: Option<&Value>) -> i64 {
    match value {
        Some(Value::Number(number)) => number.as_i64(),
        Some(Value::String(raw)) => raw.trim().parse().ok(),
        _ => None,
    }
    .unwrap_or(DEFAULT_TOKEN_LIFETIME_SECS)
}
