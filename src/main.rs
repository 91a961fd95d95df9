//! Turtles CLI - call-trace clustering over durable trace databases
//!
//! Usage: turtles <command> [arguments]

mod cli;
mod cluster_cmd;
mod report_cmd;
mod status_cmd;

use std::process::ExitCode;

use cli::{parse_args, print_usage, Command};
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("turtles=warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> ExitCode {
    init_tracing();

    let args: Vec<String> = std::env::args().collect();
    match parse_args(&args) {
        Ok(Command::Help) => {
            print_usage();
            ExitCode::SUCCESS
        }
        Ok(Command::Version) => {
            println!("{}", turtles::version::version());
            ExitCode::SUCCESS
        }
        Ok(Command::Cluster {
            db_path,
            cutoff,
            undirected,
            machines,
            verbosity,
            output_format,
        }) => {
            if let Err(e) = cluster_cmd::run_cluster(
                db_path,
                cutoff,
                undirected,
                machines,
                verbosity,
                output_format,
            ) {
                eprintln!("Error: {}", e);
                return ExitCode::from(1);
            }
            ExitCode::SUCCESS
        }
        Ok(Command::Calls {
            db_path,
            by_callee,
            limit,
            output_format,
        }) => {
            if let Err(e) = report_cmd::run_calls(db_path, by_callee, limit, output_format) {
                eprintln!("Error: {}", e);
                return ExitCode::from(1);
            }
            ExitCode::SUCCESS
        }
        Ok(Command::Unused {
            db_path,
            output_format,
        }) => {
            if let Err(e) = report_cmd::run_unused(db_path, output_format) {
                eprintln!("Error: {}", e);
                return ExitCode::from(1);
            }
            ExitCode::SUCCESS
        }
        Ok(Command::Status {
            db_path,
            output_format,
        }) => {
            if let Err(e) = status_cmd::run_status(db_path, output_format) {
                eprintln!("Error: {}", e);
                return ExitCode::from(1);
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            print_usage();
            ExitCode::from(1)
        }
    }
}
