use std::time::Duration;

use chrono::DateTime;
use clap::Args;
use ratebook_core::config::{AppConfig, LoadOptions};
use serde::Deserialize;

use crate::commands::{CommandResult, EXIT_CONFIG, EXIT_PROXY, EXIT_RUNTIME};

const RULE_WIDTH: usize = 120;
const NAME_WIDTH: usize = 50;
const ID_WIDTH: usize = 40;
const CREATED_WIDTH: usize = 20;

/// List CRM programs through a running server.
#[derive(Debug, Clone, Args)]
pub struct ProgramsArgs {
    /// Server base URL; defaults to the configured bind address and port.
    #[arg(long)]
    pub proxy_url: Option<String>,
    #[arg(long, default_value_t = 1000)]
    pub top: u32,
    /// Programs whose name contains this text (case-insensitive) are starred and summarized.
    /// Pass an empty string to disable.
    #[arg(long, default_value = "rhode island")]
    pub highlight: String,
    #[arg(long, default_value_t = 30)]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgramRow {
    pub id: Option<String>,
    pub name: Option<String>,
    pub price_per_kw: Option<f64>,
    pub createdon: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProgramListing {
    #[serde(default)]
    programs: Vec<ProgramRow>,
}

#[derive(Debug, Deserialize)]
struct ProxyError {
    error: Option<String>,
}

pub fn run(args: &ProgramsArgs) -> CommandResult {
    let base_url = match &args.proxy_url {
        Some(url) => url.trim_end_matches('/').to_string(),
        None => match AppConfig::load(LoadOptions::default()) {
            Ok(config) => proxy_url(&config.server.bind_address, config.server.port),
            Err(error) => {
                return CommandResult::failure(
                    "programs",
                    "config_validation",
                    error.to_string(),
                    EXIT_CONFIG,
                );
            }
        },
    };

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return CommandResult::failure(
                "programs",
                "runtime_init",
                format!("failed to initialize async runtime: {error}"),
                EXIT_RUNTIME,
            );
        }
    };

    match runtime.block_on(fetch_programs(&base_url, args.top, args.timeout_secs)) {
        Ok(programs) => CommandResult::rendered(0, render_listing(&programs, &args.highlight)),
        Err(message) => {
            CommandResult::failure("programs", "proxy_unavailable", message, EXIT_PROXY)
        }
    }
}

fn proxy_url(bind_address: &str, port: u16) -> String {
    let host = match bind_address.trim() {
        "" | "0.0.0.0" | "::" | "[::]" => "127.0.0.1",
        host => host,
    };
    format!("http://{host}:{port}")
}

async fn fetch_programs(
    base_url: &str,
    top: u32,
    timeout_secs: u64,
) -> Result<Vec<ProgramRow>, String> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs.max(1)))
        .build()
        .map_err(|error| format!("failed to build http client: {error}"))?;

    let connection = client
        .get(format!("{base_url}/api/test-connection"))
        .send()
        .await
        .map_err(|error| format!("server at {base_url} is not reachable: {error}"))?;
    if !connection.status().is_success() {
        let status = connection.status();
        let message = error_message(connection).await;
        return Err(format!("connection test failed ({status}): {message}"));
    }

    let response = client
        .get(format!("{base_url}/api/programs"))
        .query(&[("top", top.to_string()), ("orderby", "createdon desc".to_string())])
        .send()
        .await
        .map_err(|error| format!("program listing request failed: {error}"))?;
    if !response.status().is_success() {
        let status = response.status();
        let message = error_message(response).await;
        return Err(format!("program listing failed ({status}): {message}"));
    }

    let listing: ProgramListing = response
        .json()
        .await
        .map_err(|error| format!("program listing was not valid JSON: {error}"))?;
    Ok(listing.programs)
}

async fn error_message(response: reqwest::Response) -> String {
    let body = response.text().await.unwrap_or_default();
    match serde_json::from_str::<ProxyError>(&body) {
        Ok(ProxyError { error: Some(error) }) => error,
        _ if body.trim().is_empty() => "no response body".to_string(),
        _ => body,
    }
}

pub fn render_listing(programs: &[ProgramRow], highlight: &str) -> String {
    if programs.is_empty() {
        return "No programs found in the system".to_string();
    }

    let needle = highlight.trim().to_lowercase();
    let is_highlighted = |row: &ProgramRow| {
        !needle.is_empty()
            && row.name.as_deref().is_some_and(|name| name.to_lowercase().contains(&needle))
    };

    let rule = "═".repeat(RULE_WIDTH);
    let mut lines = vec![
        format!("Found {} programs:", programs.len()),
        String::new(),
        rule.clone(),
        format!(
            "{:<NAME_WIDTH$} | {:<ID_WIDTH$} | {:<CREATED_WIDTH$}",
            "Program Name", "ID (GUID)", "Created Date"
        ),
        rule.clone(),
    ];

    for row in programs {
        let name = row.name.as_deref().unwrap_or("Unnamed");
        let label = if is_highlighted(row) {
            format!("* {}", truncate(name, NAME_WIDTH - 4))
        } else {
            truncate(name, NAME_WIDTH - 2)
        };
        lines.push(format!(
            "{label:<NAME_WIDTH$} | {:<ID_WIDTH$} | {:<CREATED_WIDTH$}",
            row.id.as_deref().unwrap_or("No ID"),
            created_date(row.createdon.as_deref())
        ));
    }
    lines.push(rule);
    lines.push(String::new());
    lines.push("Summary:".to_string());
    lines.push(format!("  Total Programs: {}", programs.len()));

    if needle.is_empty() {
        return lines.join("\n");
    }

    let matches: Vec<&ProgramRow> = programs.iter().filter(|row| is_highlighted(*row)).collect();
    lines.push(String::new());
    if matches.is_empty() {
        lines.push(format!("No programs matching \"{}\" found", highlight.trim()));
        return lines.join("\n");
    }

    lines.push(format!("Found {} program(s) matching \"{}\":", matches.len(), highlight.trim()));
    for row in matches {
        lines.push(String::new());
        lines.push(format!("  Program: {}", row.name.as_deref().unwrap_or("Unnamed")));
        lines.push(format!("  ID: {}", row.id.as_deref().unwrap_or("No ID")));
        if let Some(price) = row.price_per_kw {
            lines.push(format!("  Price: ${price}/kW"));
        }
        lines.push(format!("  Created: {}", created_date(row.createdon.as_deref())));
    }

    lines.join("\n")
}

fn truncate(value: &str, max_chars: usize) -> String {
    value.chars().take(max_chars).collect()
}

fn created_date(createdon: Option<&str>) -> String {
    match createdon {
        None => "N/A".to_string(),
        Some(raw) => DateTime::parse_from_rfc3339(raw)
            .map(|timestamp| timestamp.format("%Y-%m-%d").to_string())
            .unwrap_or_else(|_| raw.to_string()),
    }
}
