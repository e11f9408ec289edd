pub mod commands;

use clap::{Parser, Subcommand};
use std::process::ExitCode;

use commands::lookup::LookupArgs;
use commands::programs::ProgramsArgs;

#[derive(Debug, Parser)]
#[command(
    name = "ratebook",
    about = "Ratebook operator CLI",
    long_about = "Inspect configuration, check rate store readiness, resolve rates, and list CRM programs.",
    after_help = "Examples:\n  ratebook doctor --json\n  ratebook lookup --zone NYC --product SCR --season winter\n  ratebook programs --highlight \"rhode island\""
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Validate config, rate store decoding, and CRM readiness")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "Resolve one rate against the configured rate store")]
    Lookup(LookupArgs),
    #[command(about = "List CRM programs through a running ratebook-server")]
    Programs(ProgramsArgs),
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::Doctor { json } => commands::doctor::run(json),
        Command::Lookup(args) => commands::lookup::run(&args),
        Command::Programs(args) => commands::programs::run(&args),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
