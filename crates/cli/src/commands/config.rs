use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use ratebook_core::config::{AppConfig, LoadOptions};
use secrecy::{ExposeSecret, SecretString};
use toml::Value;

const UNSET: &str = "<unset>";

struct Field {
    key: &'static str,
    env_keys: &'static [&'static str],
    value: String,
}

impl Field {
    fn new(key: &'static str, env_keys: &'static [&'static str], value: impl Into<String>) -> Self {
        Self { key, env_keys, value: value.into() }
    }
}

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for field in fields(&config) {
        let source = field_source(
            field.key,
            field.env_keys,
            config_file_doc.as_ref(),
            config_file_path.as_deref(),
        );
        lines.push(format!("- {} = {} (source: {source})", field.key, field.value));
    }

    lines.join("\n")
}

fn fields(config: &AppConfig) -> Vec<Field> {
    let crm = &config.crm;
    vec![
        Field::new("store.path", &["RATEBOOK_STORE_PATH"], config.store.path.display().to_string()),
        Field::new(
            "store.backup_suffix",
            &["RATEBOOK_STORE_BACKUP_SUFFIX"],
            config.store.backup_suffix.clone(),
        ),
        Field::new(
            "store.static_dir",
            &["RATEBOOK_STORE_STATIC_DIR"],
            config.store.static_dir.display().to_string(),
        ),
        Field::new(
            "server.bind_address",
            &["RATEBOOK_SERVER_BIND_ADDRESS"],
            config.server.bind_address.clone(),
        ),
        Field::new("server.port", &["RATEBOOK_SERVER_PORT"], config.server.port.to_string()),
        Field::new(
            "server.health_check_port",
            &["RATEBOOK_SERVER_HEALTH_CHECK_PORT"],
            config.server.health_check_port.to_string(),
        ),
        Field::new("crm.enabled", &["RATEBOOK_CRM_ENABLED"], crm.enabled.to_string()),
        Field::new(
            "crm.base_url",
            &["RATEBOOK_CRM_BASE_URL"],
            crm.base_url.as_deref().unwrap_or(UNSET),
        ),
        Field::new(
            "crm.tenant_id",
            &["RATEBOOK_CRM_TENANT_ID"],
            crm.tenant_id.as_deref().unwrap_or(UNSET),
        ),
        Field::new(
            "crm.client_id",
            &["RATEBOOK_CRM_CLIENT_ID"],
            crm.client_id.as_deref().unwrap_or(UNSET),
        ),
        Field::new(
            "crm.client_secret",
            &["RATEBOOK_CRM_CLIENT_SECRET"],
            redact_secret(crm.client_secret.as_ref()),
        ),
        Field::new(
            "crm.username",
            &["RATEBOOK_CRM_USERNAME"],
            crm.username.as_deref().map(redact_account).unwrap_or_else(|| UNSET.to_string()),
        ),
        Field::new(
            "crm.password",
            &["RATEBOOK_CRM_PASSWORD"],
            redact_secret(crm.password.as_ref()),
        ),
        Field::new("crm.api_version", &["RATEBOOK_CRM_API_VERSION"], crm.api_version.clone()),
        Field::new("crm.programs", &[], format!("{} mapped", crm.programs.len())),
        Field::new(
            "logging.level",
            &["RATEBOOK_LOGGING_LEVEL", "RATEBOOK_LOG_LEVEL"],
            config.logging.level.clone(),
        ),
        Field::new(
            "logging.format",
            &["RATEBOOK_LOGGING_FORMAT", "RATEBOOK_LOG_FORMAT"],
            format!("{:?}", config.logging.format),
        ),
    ]
}

fn detect_config_path() -> Option<PathBuf> {
    [PathBuf::from("ratebook.toml"), PathBuf::from("config/ratebook.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_keys: &[&str],
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_keys.iter().find(|key| env::var_os(key).is_some()) {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn redact_secret(secret: Option<&SecretString>) -> String {
    match secret {
        None => UNSET.to_string(),
        Some(secret) if secret.expose_secret().trim().is_empty() => "<empty>".to_string(),
        Some(_) => "<redacted>".to_string(),
    }
}

/// Keeps the domain of a sign-in name so operators can tell which tenant account is in use.
fn redact_account(username: &str) -> String {
    match username.trim().split_once('@') {
        Some((_, domain)) => format!("***@{domain}"),
        None => "<redacted>".to_string(),
    }
}
