use std::path::Path;

use clap::Args;
use ratebook_core::config::{AppConfig, LoadOptions};
use ratebook_core::{BackingStore, FileBackingStore, RateEngine, RateQuery};

use crate::commands::{CommandResult, EXIT_CONFIG, EXIT_NOT_FOUND, EXIT_STORE};

/// Resolve one rate against the configured store.
#[derive(Debug, Clone, Default, Args)]
pub struct LookupArgs {
    /// Product, for example `SCR`, `CSRP` or `ADCR`.
    #[arg(long)]
    pub product: String,
    #[arg(long)]
    pub zone: Option<String>,
    /// Market region such as `NYISO` or `PJM`; inferred from the zone when omitted.
    #[arg(long)]
    pub region: Option<String>,
    /// Planning year such as `25-26`.
    #[arg(long)]
    pub year: Option<String>,
    #[arg(long)]
    pub season: Option<String>,
    #[arg(long)]
    pub tier: Option<String>,
    #[arg(long)]
    pub month: Option<String>,
    #[arg(long, alias = "udc")]
    pub utility: Option<String>,
    #[arg(long)]
    pub service_class: Option<String>,
    #[arg(long)]
    pub time_period: Option<String>,
    #[arg(long)]
    pub price_type: Option<String>,
    #[arg(long)]
    pub time_window: Option<String>,
}

impl LookupArgs {
    fn to_query(&self) -> RateQuery {
        RateQuery {
            region: self.region.clone(),
            zone: self.zone.clone(),
            product: self.product.clone(),
            year: self.year.clone(),
            season: self.season.clone(),
            tier: self.tier.clone(),
            month: self.month.clone(),
            utility: self.utility.clone(),
            service_class: self.service_class.clone(),
            time_period: self.time_period.clone(),
            price_type: self.price_type.clone(),
            time_window: self.time_window.clone(),
        }
    }
}

pub fn run(args: &LookupArgs) -> CommandResult {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                "lookup",
                "config_validation",
                error.to_string(),
                EXIT_CONFIG,
            );
        }
    };

    lookup_in(&config.store.path, &config.store.backup_suffix, args)
}

pub(crate) fn lookup_in(
    store_path: &Path,
    backup_suffix: &str,
    args: &LookupArgs,
) -> CommandResult {
    let store = FileBackingStore::new(store_path, backup_suffix.to_string());
    let engine = match store.load().and_then(|book| Ok(RateEngine::from_book(book)?)) {
        Ok(engine) => engine,
        Err(error) => {
            return CommandResult::failure("lookup", "rate_store", error.to_string(), EXIT_STORE);
        }
    };

    let result = engine.resolve(&args.to_query());
    let exit_code = if result.is_found() { 0 } else { EXIT_NOT_FOUND };
    match serde_json::to_string_pretty(&result) {
        Ok(output) => CommandResult::rendered(exit_code, output),
        Err(error) => {
            CommandResult::failure("lookup", "serialization", error.to_string(), EXIT_STORE)
        }
    }
}
