use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::sync::ProgramMapping;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub store: StoreConfig,
    pub server: ServerConfig,
    pub crm: CrmConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct StoreConfig {
    pub path: PathBuf,
    pub backup_suffix: String,
    /// Directory the editor UI is served from.
    pub static_dir: PathBuf,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub health_check_port: u16,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug)]
pub struct CrmConfig {
    pub enabled: bool,
    pub base_url: Option<String>,
    /// OAuth resource; the organization URL when unset.
    pub resource: Option<String>,
    pub authority_url: String,
    pub tenant_id: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<SecretString>,
    pub username: Option<String>,
    pub password: Option<SecretString>,
    pub api_version: String,
    pub timeout_secs: u64,
    pub token_refresh_margin_secs: u64,
    pub entity_set: String,
    pub id_field: String,
    pub name_field: String,
    pub price_field: String,
    pub year_field: String,
    pub programs: Vec<ProgramMapping>,
}

impl CrmConfig {
    pub fn resource_url(&self) -> Option<&str> {
        self.resource.as_deref().or(self.base_url.as_deref())
    }

    /// `<base_url>/api/data/<api_version>`, without a trailing slash.
    pub fn api_root(&self) -> Option<String> {
        self.base_url
            .as_deref()
            .map(|base| format!("{}/api/data/{}", base.trim_end_matches('/'), self.api_version))
    }

    pub fn token_url(&self) -> Option<String> {
        self.tenant_id.as_deref().map(|tenant| {
            format!("{}/{tenant}/oauth2/token", self.authority_url.trim_end_matches('/'))
        })
    }

    pub fn has_credentials(&self) -> bool {
        let present = |value: &Option<String>| {
            value.as_deref().map(|value| !value.trim().is_empty()).unwrap_or(false)
        };
        let password =
            self.password.as_ref().map(|value| !value.expose_secret().is_empty()).unwrap_or(false);
        present(&self.base_url)
            && present(&self.tenant_id)
            && present(&self.client_id)
            && present(&self.username)
            && password
    }
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub store_path: Option<PathBuf>,
    pub log_level: Option<String>,
    pub server_port: Option<u16>,
    pub crm_enabled: Option<bool>,
    pub crm_base_url: Option<String>,
    pub crm_password: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            store: StoreConfig {
                path: PathBuf::from("data/rate-store.json"),
                backup_suffix: ".backup".to_string(),
                static_dir: PathBuf::from("public"),
            },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 3002,
                health_check_port: 8080,
                graceful_shutdown_secs: 15,
            },
            crm: CrmConfig {
                enabled: false,
                base_url: None,
                resource: None,
                authority_url: "https://login.microsoftonline.com".to_string(),
                tenant_id: None,
                client_id: None,
                client_secret: None,
                username: None,
                password: None,
                api_version: "v9.2".to_string(),
                timeout_secs: 30,
                token_refresh_margin_secs: 300,
                entity_set: "cpw_programs".to_string(),
                id_field: "cpw_programid".to_string(),
                name_field: "cpw_name".to_string(),
                price_field: "cpw_priceperkw".to_string(),
                year_field: "cpw_year".to_string(),
                programs: Vec::new(),
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("ratebook.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(store) = patch.store {
            if let Some(path) = store.path {
                self.store.path = path;
            }
            if let Some(backup_suffix) = store.backup_suffix {
                self.store.backup_suffix = backup_suffix;
            }
            if let Some(static_dir) = store.static_dir {
                self.store.static_dir = static_dir;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
            if let Some(health_check_port) = server.health_check_port {
                self.server.health_check_port = health_check_port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
        }

        if let Some(crm) = patch.crm {
            if let Some(enabled) = crm.enabled {
                self.crm.enabled = enabled;
            }
            if let Some(base_url) = crm.base_url {
                self.crm.base_url = Some(base_url);
            }
            if let Some(resource) = crm.resource {
                self.crm.resource = Some(resource);
            }
            if let Some(authority_url) = crm.authority_url {
                self.crm.authority_url = authority_url;
            }
            if let Some(tenant_id) = crm.tenant_id {
                self.crm.tenant_id = Some(tenant_id);
            }
            if let Some(client_id) = crm.client_id {
                self.crm.client_id = Some(client_id);
            }
            if let Some(crm_client_secret_value) = crm.client_secret {
                self.crm.client_secret = Some(secret_value(crm_client_secret_value));
            }
            if let Some(username) = crm.username {
                self.crm.username = Some(username);
            }
            if let Some(crm_password_value) = crm.password {
                self.crm.password = Some(secret_value(crm_password_value));
            }
            if let Some(api_version) = crm.api_version {
                self.crm.api_version = api_version;
            }
            if let Some(timeout_secs) = crm.timeout_secs {
                self.crm.timeout_secs = timeout_secs;
            }
            if let Some(token_refresh_margin_secs) = crm.token_refresh_margin_secs {
                self.crm.token_refresh_margin_secs = token_refresh_margin_secs;
            }
            if let Some(entity_set) = crm.entity_set {
                self.crm.entity_set = entity_set;
            }
            if let Some(id_field) = crm.id_field {
                self.crm.id_field = id_field;
            }
            if let Some(name_field) = crm.name_field {
                self.crm.name_field = name_field;
            }
            if let Some(price_field) = crm.price_field {
                self.crm.price_field = price_field;
            }
            if let Some(year_field) = crm.year_field {
                self.crm.year_field = year_field;
            }
            if let Some(programs) = crm.programs {
                self.crm.programs = programs;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("RATEBOOK_STORE_PATH") {
            self.store.path = PathBuf::from(value);
        }
        if let Some(value) = read_env("RATEBOOK_STORE_BACKUP_SUFFIX") {
            self.store.backup_suffix = value;
        }
        if let Some(value) = read_env("RATEBOOK_STORE_STATIC_DIR") {
            self.store.static_dir = PathBuf::from(value);
        }

        if let Some(value) = read_env("RATEBOOK_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("RATEBOOK_SERVER_PORT") {
            self.server.port = parse_u16("RATEBOOK_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("RATEBOOK_SERVER_HEALTH_CHECK_PORT") {
            self.server.health_check_port =
                parse_u16("RATEBOOK_SERVER_HEALTH_CHECK_PORT", &value)?;
        }
        if let Some(value) = read_env("RATEBOOK_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("RATEBOOK_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        if let Some(value) = read_env("RATEBOOK_CRM_ENABLED") {
            self.crm.enabled = parse_bool("RATEBOOK_CRM_ENABLED", &value)?;
        }
        if let Some(value) = read_env("RATEBOOK_CRM_BASE_URL") {
            self.crm.base_url = Some(value);
        }
        if let Some(value) = read_env("RATEBOOK_CRM_RESOURCE") {
            self.crm.resource = Some(value);
        }
        if let Some(value) = read_env("RATEBOOK_CRM_AUTHORITY_URL") {
            self.crm.authority_url = value;
        }
        if let Some(value) = read_env("RATEBOOK_CRM_TENANT_ID") {
            self.crm.tenant_id = Some(value);
        }
        if let Some(value) = read_env("RATEBOOK_CRM_CLIENT_ID") {
            self.crm.client_id = Some(value);
        }
        if let Some(value) = read_env("RATEBOOK_CRM_CLIENT_SECRET") {
            self.crm.client_secret = Some(secret_value(value));
        }
        if let Some(value) = read_env("RATEBOOK_CRM_USERNAME") {
            self.crm.username = Some(value);
        }
        if let Some(value) = read_env("RATEBOOK_CRM_PASSWORD") {
            self.crm.password = Some(secret_value(value));
        }
        if let Some(value) = read_env("RATEBOOK_CRM_API_VERSION") {
            self.crm.api_version = value;
        }
        if let Some(value) = read_env("RATEBOOK_CRM_TIMEOUT_SECS") {
            self.crm.timeout_secs = parse_u64("RATEBOOK_CRM_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("RATEBOOK_CRM_TOKEN_REFRESH_MARGIN_SECS") {
            self.crm.token_refresh_margin_secs =
                parse_u64("RATEBOOK_CRM_TOKEN_REFRESH_MARGIN_SECS", &value)?;
        }

        let log_level =
            read_env("RATEBOOK_LOGGING_LEVEL").or_else(|| read_env("RATEBOOK_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("RATEBOOK_LOGGING_FORMAT").or_else(|| read_env("RATEBOOK_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(store_path) = overrides.store_path {
            self.store.path = store_path;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(port) = overrides.server_port {
            self.server.port = port;
        }
        if let Some(enabled) = overrides.crm_enabled {
            self.crm.enabled = enabled;
        }
        if let Some(base_url) = overrides.crm_base_url {
            self.crm.base_url = Some(base_url);
        }
        if let Some(password) = overrides.crm_password {
            self.crm.password = Some(secret_value(password));
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_store(&self.store)?;
        validate_server(&self.server)?;
        validate_crm(&self.crm)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("ratebook.toml"), PathBuf::from("config/ratebook.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_store(store: &StoreConfig) -> Result<(), ConfigError> {
    if store.path.as_os_str().is_empty() {
        return Err(ConfigError::Validation("store.path must not be empty".to_string()));
    }

    if store.backup_suffix.trim().is_empty() {
        return Err(ConfigError::Validation(
            "store.backup_suffix must not be empty; a save would overwrite its own backup"
                .to_string(),
        ));
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.port == 0 {
        return Err(ConfigError::Validation("server.port must be greater than zero".to_string()));
    }

    if server.health_check_port == 0 {
        return Err(ConfigError::Validation(
            "server.health_check_port must be greater than zero".to_string(),
        ));
    }

    if server.health_check_port == server.port {
        return Err(ConfigError::Validation(
            "server.health_check_port must differ from server.port".to_string(),
        ));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn validate_crm(crm: &CrmConfig) -> Result<(), ConfigError> {
    if crm.enabled {
        let required = [
            ("crm.base_url", crm.base_url.as_deref()),
            ("crm.tenant_id", crm.tenant_id.as_deref()),
            ("crm.client_id", crm.client_id.as_deref()),
            ("crm.username", crm.username.as_deref()),
        ];
        for (key, value) in required {
            if value.map(|value| value.trim().is_empty()).unwrap_or(true) {
                return Err(ConfigError::Validation(format!(
                    "crm.enabled is true but {key} is missing"
                )));
            }
        }

        let missing_password =
            crm.password.as_ref().map(|value| value.expose_secret().is_empty()).unwrap_or(true);
        if missing_password {
            return Err(ConfigError::Validation(
                "crm.enabled is true but crm.password is missing (set RATEBOOK_CRM_PASSWORD)"
                    .to_string(),
            ));
        }
    }

    let urls = [
        ("crm.base_url", crm.base_url.as_deref()),
        ("crm.resource", crm.resource.as_deref()),
        ("crm.authority_url", Some(crm.authority_url.as_str())),
    ];
    for (key, value) in urls {
        if let Some(url) = value {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(ConfigError::Validation(format!(
                    "{key} must start with http:// or https://"
                )));
            }
        }
    }

    if crm.timeout_secs == 0 || crm.timeout_secs > 300 {
        return Err(ConfigError::Validation("crm.timeout_secs must be in range 1..=300".to_string()));
    }

    for program in &crm.programs {
        if program.program_id.trim().is_empty() {
            return Err(ConfigError::Validation(format!(
                "crm.programs entry `{}` has an empty program_id",
                program.name
            )));
        }
    }

    Ok(())
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.parse::<u16>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    value.parse::<bool>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    store: Option<StorePatch>,
    server: Option<ServerPatch>,
    crm: Option<CrmPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct StorePatch {
    path: Option<PathBuf>,
    backup_suffix: Option<String>,
    static_dir: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    health_check_port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

#[derive(Debug, Default, Deserialize)]
struct CrmPatch {
    enabled: Option<bool>,
    base_url: Option<String>,
    resource: Option<String>,
    authority_url: Option<String>,
    tenant_id: Option<String>,
    client_id: Option<String>,
    client_secret: Option<String>,
    username: Option<String>,
    password: Option<String>,
    api_version: Option<String>,
    timeout_secs: Option<u64>,
    token_refresh_margin_secs: Option<u64>,
    entity_set: Option<String>,
    id_field: Option<String>,
    name_field: Option<String>,
    price_field: Option<String>,
    year_field: Option<String>,
    programs: Option<Vec<ProgramMapping>>,
}
