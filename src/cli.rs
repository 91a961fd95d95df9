//! CLI argument parsing for Turtles
//!
//! Defines the Command enum and parse_args() function for all CLI commands.

use anyhow::Result;
use std::path::PathBuf;

use turtles::engine::DEFAULT_MACHINES;
use turtles::output::OutputFormat;

pub fn print_usage() {
    eprintln!("Turtles - Call-trace clustering tool");
    eprintln!();
    eprintln!("Usage:");
    eprintln!("  turtles <command> [arguments]");
    eprintln!("  turtles --help");
    eprintln!("  turtles --version");
    eprintln!();
    eprintln!("  turtles cluster <db-file> [--cutoff <N>] [--undirected] [--machines <K>] [--verbosity <L>] [--output <FORMAT>]");
    eprintln!("  turtles calls <db-file> [--by-callee] [--limit <N>] [--output <FORMAT>]");
    eprintln!("  turtles unused <db-file> [--output <FORMAT>]");
    eprintln!("  turtles status <db-file> [--output <FORMAT>]");
    eprintln!();
    eprintln!("Commands:");
    eprintln!("  cluster  Partition traced procedures into call-graph clusters");
    eprintln!("  calls    Show aggregated caller/callee statistics");
    eprintln!("  unused   List procedures with no settled incoming call");
    eprintln!("  status   Show trace database statistics");
    eprintln!();
    eprintln!("Cluster arguments:");
    eprintln!("  <db-file>           Durable trace database to read");
    eprintln!("  --cutoff <N>        Drop edges with fewer than N settled calls (default: 1)");
    eprintln!("  --undirected        Sum both call directions into one edge weight");
    eprintln!("  --machines <K>      Worker machines to simulate (default: {})", DEFAULT_MACHINES);
    eprintln!("  --verbosity <L>     0 = clusters, 1 = + summary, 2 = + per-node lines (default: 0)");
    eprintln!();
    eprintln!("Calls arguments:");
    eprintln!("  --by-callee         Aggregate over callers");
    eprintln!("  --limit <N>         Show at most N rows");
    eprintln!();
    eprintln!("Global arguments:");
    eprintln!("  --output <FORMAT>   Output format: human (default) or json");
}

#[derive(Debug)]
pub enum Command {
    Cluster {
        db_path: PathBuf,
        cutoff: i64,
        undirected: bool,
        machines: usize,
        verbosity: u8,
        output_format: OutputFormat,
    },
    Calls {
        db_path: PathBuf,
        by_callee: bool,
        limit: Option<usize>,
        output_format: OutputFormat,
    },
    Unused {
        db_path: PathBuf,
        output_format: OutputFormat,
    },
    Status {
        db_path: PathBuf,
        output_format: OutputFormat,
    },
    Help,
    Version,
}

/// Consume the positional `<db-file>` argument, which must come first.
fn take_db_path(args: &[String], i: &mut usize) -> Result<PathBuf> {
    if *i >= args.len() || args[*i].starts_with("--") {
        return Err(anyhow::anyhow!("<db-file> is required"));
    }
    let path = PathBuf::from(&args[*i]);
    *i += 1;
    Ok(path)
}

fn parse_output_format(args: &[String], i: usize) -> Result<OutputFormat> {
    if i + 1 >= args.len() {
        return Err(anyhow::anyhow!("--output requires an argument"));
    }
    OutputFormat::from_str(&args[i + 1]).ok_or_else(|| {
        anyhow::anyhow!(
            "Invalid output format: {}. Must be human or json",
            args[i + 1]
        )
    })
}

pub fn parse_args(args: &[String]) -> Result<Command> {
    if args.len() < 2 {
        return Err(anyhow::anyhow!("No command given"));
    }

    match args[1].as_str() {
        "--help" | "-h" | "help" => Ok(Command::Help),
        "--version" | "-V" | "version" => Ok(Command::Version),
        "cluster" => {
            let mut i = 2;
            let db_path = take_db_path(args, &mut i)?;
            let mut cutoff: i64 = 1;
            let mut undirected = false;
            let mut machines = DEFAULT_MACHINES;
            let mut verbosity: u8 = 0;
            let mut output_format = OutputFormat::Human;

            while i < args.len() {
                match args[i].as_str() {
                    "--cutoff" => {
                        if i + 1 >= args.len() {
                            return Err(anyhow::anyhow!("--cutoff requires an argument"));
                        }
                        cutoff = args[i + 1]
                            .parse()
                            .map_err(|e| anyhow::anyhow!("Invalid cutoff: {}: {}", args[i + 1], e))?;
                        i += 2;
                    }
                    "--undirected" => {
                        undirected = true;
                        i += 1;
                    }
                    "--machines" => {
                        if i + 1 >= args.len() {
                            return Err(anyhow::anyhow!("--machines requires an argument"));
                        }
                        machines = args[i + 1].parse().map_err(|e| {
                            anyhow::anyhow!("Invalid machine count: {}: {}", args[i + 1], e)
                        })?;
                        if machines == 0 {
                            return Err(anyhow::anyhow!("--machines must be at least 1"));
                        }
                        i += 2;
                    }
                    "--verbosity" => {
                        if i + 1 >= args.len() {
                            return Err(anyhow::anyhow!("--verbosity requires an argument"));
                        }
                        verbosity = args[i + 1].parse().map_err(|e| {
                            anyhow::anyhow!("Invalid verbosity: {}: {}", args[i + 1], e)
                        })?;
                        i += 2;
                    }
                    "--output" => {
                        output_format = parse_output_format(args, i)?;
                        i += 2;
                    }
                    _ => {
                        return Err(anyhow::anyhow!("Unknown argument: {}", args[i]));
                    }
                }
            }

            Ok(Command::Cluster {
                db_path,
                cutoff,
                undirected,
                machines,
                verbosity,
                output_format,
            })
        }
        "calls" => {
            let mut i = 2;
            let db_path = take_db_path(args, &mut i)?;
            let mut by_callee = false;
            let mut limit: Option<usize> = None;
            let mut output_format = OutputFormat::Human;

            while i < args.len() {
                match args[i].as_str() {
                    "--by-callee" => {
                        by_callee = true;
                        i += 1;
                    }
                    "--limit" => {
                        if i + 1 >= args.len() {
                            return Err(anyhow::anyhow!("--limit requires an argument"));
                        }
                        limit = Some(args[i + 1].parse().map_err(|e| {
                            anyhow::anyhow!("Invalid limit: {}: {}", args[i + 1], e)
                        })?);
                        i += 2;
                    }
                    "--output" => {
                        output_format = parse_output_format(args, i)?;
                        i += 2;
                    }
                    _ => {
                        return Err(anyhow::anyhow!("Unknown argument: {}", args[i]));
                    }
                }
            }

            Ok(Command::Calls {
                db_path,
                by_callee,
                limit,
                output_format,
            })
        }
        "unused" | "status" => {
            let command = args[1].clone();
            let mut i = 2;
            let db_path = take_db_path(args, &mut i)?;
            let mut output_format = OutputFormat::Human;

            while i < args.len() {
                match args[i].as_str() {
                    "--output" => {
                        output_format = parse_output_format(args, i)?;
                        i += 2;
                    }
                    _ => {
                        return Err(anyhow::anyhow!("Unknown argument: {}", args[i]));
                    }
                }
            }

            if command == "unused" {
                Ok(Command::Unused {
                    db_path,
                    output_format,
                })
            } else {
                Ok(Command::Status {
                    db_path,
                    output_format,
                })
            }
        }
        unknown => Err(anyhow::anyhow!("Unknown command: {}", unknown)),
    }
}
