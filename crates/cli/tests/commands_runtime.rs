use std::env;
use std::fs;
use std::path::Path;
use std::sync::{Mutex, OnceLock};

use ratebook_cli::commands::lookup::LookupArgs;
use ratebook_cli::commands::programs::ProgramsArgs;
use ratebook_cli::commands::{doctor, lookup, programs};
use serde_json::Value;

const BUNDLED_STORE: &str = include_str!("../../../data/rate-store.json");

#[test]
fn doctor_passes_with_bundled_store_and_crm_disabled() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = write_store(dir.path(), BUNDLED_STORE);

    with_env(&[("RATEBOOK_STORE_PATH", store.as_str())], || {
        let result = doctor::run(true);
        assert_eq!(result.exit_code, 0, "expected readiness checks to pass: {}", result.output);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["overall_status"], "pass");
        let checks = payload["checks"].as_array().expect("checks array");
        assert_eq!(check_status(checks, "config_validation"), "pass");
        assert_eq!(check_status(checks, "rate_store"), "pass");
        assert_eq!(check_status(checks, "crm_readiness"), "skipped");
    });
}

#[test]
fn doctor_fails_when_crm_is_enabled_without_credentials() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = write_store(dir.path(), BUNDLED_STORE);

    with_env(
        &[("RATEBOOK_STORE_PATH", store.as_str()), ("RATEBOOK_CRM_ENABLED", "true")],
        || {
            let result = doctor::run(true);
            assert_ne!(result.exit_code, 0);

            let payload = parse_payload(&result.output);
            assert_eq!(payload["overall_status"], "fail");
            let checks = payload["checks"].as_array().expect("checks array");
            assert_eq!(check_status(checks, "config_validation"), "fail");
            assert_eq!(check_status(checks, "rate_store"), "skipped");
        },
    );
}

#[test]
fn doctor_reports_undecodable_store() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = write_store(dir.path(), "{ not json");

    with_env(&[("RATEBOOK_STORE_PATH", store.as_str())], || {
        let result = doctor::run(false);
        assert_ne!(result.exit_code, 0);
        assert!(result.output.contains("[fail] rate_store"), "{}", result.output);
        assert!(result.output.contains("[ok] config_validation"));
    });
}

#[test]
fn lookup_resolves_against_configured_store() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = write_store(dir.path(), BUNDLED_STORE);

    with_env(&[("RATEBOOK_STORE_PATH", store.as_str())], || {
        let args = LookupArgs {
            product: "SCR".to_string(),
            zone: Some("NYC".to_string()),
            ..LookupArgs::default()
        };
        let result = lookup::run(&args);
        assert_eq!(result.exit_code, 0, "{}", result.output);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["value"], 15.0);
    });
}

#[test]
fn lookup_returns_config_failure_for_invalid_port_override() {
    with_env(&[("RATEBOOK_SERVER_PORT", "not-a-port")], || {
        let result = lookup::run(&LookupArgs { product: "SCR".to_string(), ..LookupArgs::default() });
        assert_eq!(result.exit_code, 2, "expected config validation failure code");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "lookup");
        assert_eq!(payload["status"], "error");
        assert_eq!(payload["error_class"], "config_validation");
    });
}

#[test]
fn programs_reports_unreachable_server() {
    with_env(&[], || {
        let args = ProgramsArgs {
            // Port 9 (discard) is not served in the test environment.
            proxy_url: Some("http://127.0.0.1:9".to_string()),
            top: 10,
            highlight: String::new(),
            timeout_secs: 2,
        };
        let result = programs::run(&args);
        assert_eq!(result.exit_code, 4, "expected proxy failure code");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "programs");
        assert_eq!(payload["error_class"], "proxy_unavailable");
    });
}

fn write_store(dir: &Path, contents: &str) -> String {
    let path = dir.join("rate-store.json");
    fs::write(&path, contents).expect("write store");
    path.display().to_string()
}

fn check_status<'a>(checks: &'a [Value], name: &str) -> &'a str {
    checks
        .iter()
        .find(|check| check["name"] == name)
        .and_then(|check| check["status"].as_str())
        .unwrap_or("missing")
}

fn parse_payload(output: &str) -> Value {
    serde_json::from_str(output).expect("command output should be JSON")
}

fn with_env(vars: &[(&str, &str)], test_fn: impl FnOnce()) {
    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    let _guard =
        ENV_LOCK.get_or_init(|| Mutex::new(())).lock().expect("env mutex should not be poisoned");

    let keys = [
        "RATEBOOK_STORE_PATH",
        "RATEBOOK_STORE_BACKUP_SUFFIX",
        "RATEBOOK_STORE_STATIC_DIR",
        "RATEBOOK_SERVER_BIND_ADDRESS",
        "RATEBOOK_SERVER_PORT",
        "RATEBOOK_SERVER_HEALTH_CHECK_PORT",
        "RATEBOOK_SERVER_GRACEFUL_SHUTDOWN_SECS",
        "RATEBOOK_CRM_ENABLED",
        "RATEBOOK_CRM_BASE_URL",
        "RATEBOOK_CRM_TENANT_ID",
        "RATEBOOK_CRM_CLIENT_ID",
        "RATEBOOK_CRM_CLIENT_SECRET",
        "RATEBOOK_CRM_USERNAME",
        "RATEBOOK_CRM_PASSWORD",
        "RATEBOOK_LOGGING_LEVEL",
        "RATEBOOK_LOGGING_FORMAT",
        "RATEBOOK_LOG_LEVEL",
        "RATEBOOK_LOG_FORMAT",
    ];

    let previous_values: Vec<(&str, Option<String>)> =
        keys.iter().map(|key| (*key, env::var(key).ok())).collect();

    for key in &keys {
        env::remove_var(key);
    }
    for (key, value) in vars {
        env::set_var(key, value);
    }

    test_fn();

    for (key, value) in previous_values {
        if let Some(value) = value {
            env::set_var(key, value);
        } else {
            env::remove_var(key);
        }
    }
}
