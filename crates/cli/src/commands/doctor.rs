use ratebook_core::config::{AppConfig, LoadOptions};
use ratebook_core::{BackingStore, FileBackingStore, RateEngine};
use serde::Serialize;

use crate::commands::{escape_json, CommandResult, EXIT_CONFIG};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: CheckStatus,
    details: String,
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

pub fn run(json_output: bool) -> CommandResult {
    let report = build_report();
    let exit_code = if report.overall_status == CheckStatus::Pass { 0 } else { EXIT_CONFIG };

    if json_output {
        let output = serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        });
        return CommandResult::rendered(exit_code, output);
    }

    CommandResult::rendered(exit_code, render_human(&report))
}

fn build_report() -> DoctorReport {
    let mut checks = Vec::new();

    match AppConfig::load(LoadOptions::default()) {
        Ok(config) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Pass,
                details: "configuration loaded and validated".to_string(),
            });
            checks.push(check_rate_store(&config));
            checks.push(check_crm_readiness(&config));
        }
        Err(error) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Fail,
                details: error.to_string(),
            });
            for name in ["rate_store", "crm_readiness"] {
                checks.push(DoctorCheck {
                    name,
                    status: CheckStatus::Skipped,
                    details: "skipped because configuration did not load".to_string(),
                });
            }
        }
    }

    let all_pass = checks.iter().all(|check| check.status != CheckStatus::Fail);
    let overall_status = if all_pass { CheckStatus::Pass } else { CheckStatus::Fail };
    let summary = if all_pass {
        "doctor: all readiness checks passed".to_string()
    } else {
        "doctor: one or more readiness checks failed".to_string()
    };

    DoctorReport { overall_status, summary, checks }
}

fn check_rate_store(config: &AppConfig) -> DoctorCheck {
    let store = FileBackingStore::new(&config.store.path, config.store.backup_suffix.clone());
    let book = match store.load() {
        Ok(book) => book,
        Err(error) => {
            return DoctorCheck {
                name: "rate_store",
                status: CheckStatus::Fail,
                details: error.to_string(),
            };
        }
    };

    let counts = book.table_counts();
    let populated = counts.values().filter(|count| **count > 0).count();
    let listing = counts
        .iter()
        .map(|(table, count)| format!("{table}={count}"))
        .collect::<Vec<_>>()
        .join(", ");

    match RateEngine::from_book(book) {
        Ok(_) => DoctorCheck {
            name: "rate_store",
            status: CheckStatus::Pass,
            details: format!(
                "`{}` decoded, {populated}/{} tables populated ({listing})",
                store.describe(),
                counts.len()
            ),
        },
        Err(error) => DoctorCheck {
            name: "rate_store",
            status: CheckStatus::Fail,
            details: format!("alias table rejected: {error}"),
        },
    }
}

fn check_crm_readiness(config: &AppConfig) -> DoctorCheck {
    let crm = &config.crm;
    if !crm.enabled {
        return DoctorCheck {
            name: "crm_readiness",
            status: CheckStatus::Skipped,
            details: "crm integration is disabled".to_string(),
        };
    }

    if !crm.has_credentials() {
        return DoctorCheck {
            name: "crm_readiness",
            status: CheckStatus::Fail,
            details: "crm is enabled but credentials are incomplete".to_string(),
        };
    }

    DoctorCheck {
        name: "crm_readiness",
        status: CheckStatus::Pass,
        details: format!(
            "credentials configured for `{}`, {} program mapping(s)",
            crm.base_url.as_deref().unwrap_or_default(),
            crm.programs.len()
        ),
    }
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = Vec::new();
    lines.push(report.summary.clone());

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skip",
        };
        lines.push(format!("- [{marker}] {}: {}", check.name, check.details));
    }

    lines.join("\n")
}
