use std::process::ExitCode;

fn main() -> ExitCode {
    ratebook_cli::run()
}
