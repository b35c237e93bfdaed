//! upack - universal package installer CLI

use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use upack_cli::{Cli, Commands, cmd};
use upack_core::ErrorClass;

#[tokio::main]
async fn main() -> ExitCode {
    // Initialize logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("upack=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return if e.use_stderr() {
                exit_code(ErrorClass::Validation.exit_code())
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    let result = match cli.command {
        Commands::Install(args) => cmd::install::install(args).await.map_err(|e| {
            eprintln!("error: {e}");
            e.exit_code()
        }),
        Commands::List { userregistry } => cmd::list::list(userregistry).map_err(|e| report(&e)),
        Commands::Clean { userregistry } => cmd::clean::clean(userregistry).map_err(|e| report(&e)),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(code) => exit_code(code),
    }
}

fn report(e: &anyhow::Error) -> i32 {
    eprintln!("error: {e:#}");
    ErrorClass::Storage.exit_code()
}

fn exit_code(code: i32) -> ExitCode {
    ExitCode::from(u8::try_from(code).unwrap_or(1))
}
