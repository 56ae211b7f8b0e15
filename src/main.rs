//! Ratify CLI
//!
//! Verify the signatures attached to container artifacts from the command line.

use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{ArgAction, Args, Parser, Subcommand};
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

use ratify_cli::{run_verify, to_json, CancelToken, RatifyError, VerifyRequest};

const VERIFY_LONG_ABOUT: &str = "Verify an artifact

Prerequisite: a trust store for the notation verifier and an OCI store holding
the artifacts.

Example - Verify an artifact:
  ratify verify --subject <subject> --config <config file> --store <store path>";

/// Ratify is a reference artifact tool for managing and verifying reference artifacts
#[derive(Parser, Debug)]
#[command(name = "ratify")]
#[command(author = "The Ratify Authors")]
#[command(about = "Ratify is a reference artifact tool for managing and verifying reference artifacts")]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Verify the provided artifact
    #[command(long_about = VERIFY_LONG_ABOUT)]
    Verify(VerifyArgs),

    /// Show the ratify version information
    Version,
}

#[derive(Args, Debug)]
struct VerifyArgs {
    /// Subject to verify
    #[arg(short, long)]
    subject: String,

    /// Path to the verifier config file
    #[arg(short, long, value_name = "PATH")]
    config: PathBuf,

    /// Path to the store, an OCI layout directory or a tar of one
    #[arg(short = 't', long, value_name = "PATH")]
    store: PathBuf,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let result = match &cli.command {
        Command::Verify(args) => verify(args),
        Command::Version => print_version(),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            debug!(exit_code = e.exit_code(), "verification run failed");
            eprintln!("Error: {e}");
            ExitCode::from(e.exit_code())
        }
    }
}

/// Logs go to stderr so stdout carries only the report.
fn init_tracing(verbose: u8) {
    let filter = match verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        1 => EnvFilter::new("info"),
        2 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();
}

fn verify(args: &VerifyArgs) -> Result<(), RatifyError> {
    let cancel = CancelToken::new();
    let handler_token = cancel.clone();
    if let Err(e) = ctrlc::set_handler(move || handler_token.cancel()) {
        warn!("could not install interrupt handler: {e}");
    }

    let request = VerifyRequest {
        subject: args.subject.clone(),
        config_path: args.config.clone(),
        store_path: args.store.clone(),
    };
    let report = run_verify(&cancel, &request)?;
    let json = to_json(&report)?;

    // Never print a report for an interrupted run
    cancel.check()?;
    let mut stdout = io::stdout().lock();
    stdout.write_all(json.as_bytes())?;
    stdout.flush()?;
    Ok(())
}

fn print_version() -> Result<(), RatifyError> {
    let mut stdout = io::stdout().lock();
    writeln!(stdout, "Version:      {}", env!("CARGO_PKG_VERSION"))?;
    writeln!(stdout, "Rust version: {}", env!("RATIFY_RUSTC_VERSION"))?;
    writeln!(stdout, "Git commit:   {}", env!("RATIFY_GIT_COMMIT"))?;
    Ok(())
}
