//! Runtime option handling for Turtles
//!
//! Tracing is enabled through bracketed option blocks embedded in the
//! host process argv: everything between `+TURTLES` and `-TURTLES` is
//! consumed by Turtles, the rest is handed back to the host untouched.
//! Multiple blocks concatenate their contents.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Opening marker of an option block in the host argv.
pub const BLOCK_OPEN: &str = "+TURTLES";

/// Closing marker of an option block in the host argv.
pub const BLOCK_CLOSE: &str = "-TURTLES";

/// Default finalizer period in milliseconds.
pub const DEFAULT_INTERVAL_MILLIS: u64 = 30_000;

/// Default durable file stem.
pub const DEFAULT_DB_PREFIX: &str = "turtles";

/// How writes reach the durable file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommitMode {
    /// Ephemeral in-memory `main` fronting a file-backed `stage1`;
    /// a periodic finalizer moves settled rows across.
    Staged,
    /// `main` is the durable file itself; the finalizer is inert.
    Direct,
}

/// Where the recorder runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScheduleMode {
    /// Dedicated recorder thread consuming a submission queue.
    Mt,
    /// Cooperative: writes are applied inline on the submitting thread,
    /// serialized by a lock, with the finalize tick piggybacked.
    Ev,
}

/// Parsed `+TURTLES` options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceConfig {
    /// No tracing at all unless set.
    pub enabled: bool,
    pub commit_mode: CommitMode,
    /// Finalizer period.
    pub interval_millis: u64,
    /// Directory holding the durable file.
    pub db_path: PathBuf,
    /// Durable filename stem; the pid suffix is appended per process.
    pub db_prefix: String,
    pub schedule_mode: ScheduleMode,
    /// Emit trace diagnostics.
    pub debug: bool,
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            commit_mode: CommitMode::Staged,
            interval_millis: DEFAULT_INTERVAL_MILLIS,
            db_path: PathBuf::from("./"),
            db_prefix: DEFAULT_DB_PREFIX.to_string(),
            schedule_mode: ScheduleMode::Mt,
            debug: false,
        }
    }
}

impl TraceConfig {
    /// Durable file path for a given process id:
    /// `<db_path>/<db_prefix>-<pid>.db`.
    pub fn durable_file(&self, pid: u32) -> PathBuf {
        self.db_path.join(format!("{}-{}.db", self.db_prefix, pid))
    }
}

/// Split the host argv into (residual argv, extracted option block contents).
///
/// Blocks open at `+TURTLES` and close at `-TURTLES`; the markers
/// themselves are consumed. A block left open at the end of argv
/// extends to the end of argv.
pub fn extract_trace_args(argv: &[String]) -> (Vec<String>, Vec<String>) {
    let mut residual = Vec::with_capacity(argv.len());
    let mut extracted = Vec::new();
    let mut in_block = false;

    for arg in argv {
        if in_block {
            if arg == BLOCK_CLOSE {
                in_block = false;
            } else {
                extracted.push(arg.clone());
            }
        } else if arg == BLOCK_OPEN {
            in_block = true;
        } else {
            residual.push(arg.clone());
        }
    }

    (residual, extracted)
}

/// Parse extracted block contents into a [`TraceConfig`].
///
/// Unknown options and malformed values are errors; the caller treats
/// them as fatal at startup.
pub fn parse_trace_options(opts: &[String]) -> Result<TraceConfig> {
    let mut config = TraceConfig::default();

    let mut i = 0;
    while i < opts.len() {
        match opts[i].as_str() {
            "-enabled" => {
                config.enabled = true;
                i += 1;
            }
            "-debug" => {
                config.debug = true;
                i += 1;
            }
            "-commitMode" => {
                if i + 1 >= opts.len() {
                    return Err(anyhow::anyhow!("-commitMode requires an argument"));
                }
                config.commit_mode = match opts[i + 1].as_str() {
                    "staged" => CommitMode::Staged,
                    "direct" => CommitMode::Direct,
                    other => {
                        return Err(anyhow::anyhow!(
                            "Invalid commit mode: {}. Must be staged or direct",
                            other
                        ))
                    }
                };
                i += 2;
            }
            "-intervalMillis" => {
                if i + 1 >= opts.len() {
                    return Err(anyhow::anyhow!("-intervalMillis requires an argument"));
                }
                config.interval_millis = opts[i + 1]
                    .parse()
                    .map_err(|e| anyhow::anyhow!("Invalid interval: {}: {}", opts[i + 1], e))?;
                i += 2;
            }
            "-dbPath" => {
                if i + 1 >= opts.len() {
                    return Err(anyhow::anyhow!("-dbPath requires an argument"));
                }
                config.db_path = PathBuf::from(&opts[i + 1]);
                i += 2;
            }
            "-dbPrefix" => {
                if i + 1 >= opts.len() {
                    return Err(anyhow::anyhow!("-dbPrefix requires an argument"));
                }
                config.db_prefix = opts[i + 1].clone();
                i += 2;
            }
            "-scheduleMode" => {
                if i + 1 >= opts.len() {
                    return Err(anyhow::anyhow!("-scheduleMode requires an argument"));
                }
                config.schedule_mode = match opts[i + 1].as_str() {
                    "mt" => ScheduleMode::Mt,
                    "ev" => ScheduleMode::Ev,
                    other => {
                        return Err(anyhow::anyhow!(
                            "Invalid schedule mode: {}. Must be mt or ev",
                            other
                        ))
                    }
                };
                i += 2;
            }
            unknown => {
                return Err(anyhow::anyhow!("Unknown turtles option: {}", unknown));
            }
        }
    }

    Ok(config)
}

/// Convenience wrapper: extract blocks from argv and parse them.
///
/// Returns the residual argv the host should keep processing, plus the
/// parsed configuration.
pub fn config_from_argv(argv: &[String]) -> Result<(Vec<String>, TraceConfig)> {
    let (residual, extracted) = extract_trace_args(argv);
    let config = parse_trace_options(&extracted)?;
    Ok((residual, config))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(args: &[&str]) -> Vec<String> {
        args.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_consume_leaves_host_args_intact() {
        let input = argv(&["-i", "x", "+TURTLES", "-enabled", "-TURTLES", "-o", "y"]);
        let (residual, extracted) = extract_trace_args(&input);
        assert_eq!(residual, argv(&["-i", "x", "-o", "y"]));
        assert_eq!(extracted, argv(&["-enabled"]));
    }

    #[test]
    fn test_two_blocks_concatenate() {
        let input = argv(&[
            "+TURTLES", "-enabled", "-TURTLES", "run", "+TURTLES", "-debug", "-TURTLES",
        ]);
        let (residual, extracted) = extract_trace_args(&input);
        assert_eq!(residual, argv(&["run"]));
        assert_eq!(extracted, argv(&["-enabled", "-debug"]));
    }

    #[test]
    fn test_unterminated_block_extends_to_end() {
        let input = argv(&["a", "+TURTLES", "-enabled", "-debug"]);
        let (residual, extracted) = extract_trace_args(&input);
        assert_eq!(residual, argv(&["a"]));
        assert_eq!(extracted, argv(&["-enabled", "-debug"]));
    }

    #[test]
    fn test_defaults() {
        let config = parse_trace_options(&[]).unwrap();
        assert!(!config.enabled);
        assert_eq!(config.commit_mode, CommitMode::Staged);
        assert_eq!(config.interval_millis, 30_000);
        assert_eq!(config.db_path, PathBuf::from("./"));
        assert_eq!(config.db_prefix, "turtles");
        assert_eq!(config.schedule_mode, ScheduleMode::Mt);
        assert!(!config.debug);
    }

    #[test]
    fn test_full_option_set() {
        let opts = argv(&[
            "-enabled",
            "-commitMode",
            "direct",
            "-intervalMillis",
            "50",
            "-dbPath",
            "/tmp/traces",
            "-dbPrefix",
            "svc",
            "-scheduleMode",
            "ev",
            "-debug",
        ]);
        let config = parse_trace_options(&opts).unwrap();
        assert!(config.enabled);
        assert_eq!(config.commit_mode, CommitMode::Direct);
        assert_eq!(config.interval_millis, 50);
        assert_eq!(config.db_path, PathBuf::from("/tmp/traces"));
        assert_eq!(config.db_prefix, "svc");
        assert_eq!(config.schedule_mode, ScheduleMode::Ev);
        assert!(config.debug);
    }

    #[test]
    fn test_invalid_commit_mode_is_fatal() {
        let result = parse_trace_options(&argv(&["-commitMode", "buffered"]));
        assert!(result.is_err());
    }

    #[test]
    fn test_unknown_option_fails_parsing() {
        let result = parse_trace_options(&argv(&["-frobnicate"]));
        assert!(result.is_err());
    }

    #[test]
    fn test_missing_value_fails_parsing() {
        assert!(parse_trace_options(&argv(&["-commitMode"])).is_err());
        assert!(parse_trace_options(&argv(&["-intervalMillis"])).is_err());
    }

    #[test]
    fn test_durable_file_naming() {
        let config = TraceConfig {
            db_path: PathBuf::from("/var/trace"),
            db_prefix: "turtles".into(),
            ..TraceConfig::default()
        };
        assert_eq!(
            config.durable_file(1234),
            PathBuf::from("/var/trace/turtles-1234.db")
        );
    }
}
