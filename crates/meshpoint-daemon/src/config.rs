//! CLI argument parsing and config file support.
//!
//! The daemon can be configured via CLI flags, a JSON config file,
//! or a combination of both (CLI overrides config file).

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use meshpoint_types::config::AppConfig;

// ---------------------------------------------------------------------------
// CLI arguments (manual parsing, no clap dependency)
// ---------------------------------------------------------------------------

/// Parsed command-line arguments.
pub struct CliArgs {
    pub data_dir: Option<PathBuf>,
    pub server: Option<String>,
    pub auth_token: Option<String>,
    pub schedule_tick: Option<u64>,
    pub metrics_period: Option<u64>,
    pub config_path: Option<PathBuf>,
}

impl CliArgs {
    /// Parses CLI arguments from `std::env::args`.
    pub fn parse_from_env() -> Self {
        let args: Vec<String> = std::env::args().collect();
        let mut cli = Self {
            data_dir: None,
            server: None,
            auth_token: None,
            schedule_tick: None,
            metrics_period: None,
            config_path: None,
        };

        let mut i = 1;
        while i < args.len() {
            match args[i].as_str() {
                "--data-dir" => {
                    i += 1;
                    cli.data_dir = args.get(i).map(PathBuf::from);
                }
                "--server" => {
                    i += 1;
                    cli.server = args.get(i).cloned();
                }
                "--auth-token" => {
                    i += 1;
                    cli.auth_token = args.get(i).cloned();
                }
                "--schedule-tick" => {
                    i += 1;
                    cli.schedule_tick = args.get(i).and_then(|s| s.parse().ok());
                }
                "--metrics-period" => {
                    i += 1;
                    cli.metrics_period = args.get(i).and_then(|s| s.parse().ok());
                }
                "--config" => {
                    i += 1;
                    cli.config_path = args.get(i).map(PathBuf::from);
                }
                "--help" | "-h" => {
                    print_help();
                    std::process::exit(0);
                }
                other => {
                    eprintln!("unknown argument: {other}");
                    eprintln!("use --help for usage information");
                    std::process::exit(1);
                }
            }
            i += 1;
        }

        cli
    }
}

fn print_help() {
    println!("meshpoint-daemon -- headless Meshpoint runtime");
    println!();
    println!("Usage:");
    println!();
    println!("  meshpoint-daemon [OPTIONS]");
    println!();
    println!("Options:");
    println!();
    println!("  --data-dir <PATH>       Data directory (default: meshpoint-data)");
    println!("  --server <ADDR>         Broker connection string");
    println!("  --auth-token <TOKEN>    Shared secret for privileged subjects");
    println!("  --schedule-tick <SECS>  Schedule sweeper period (default: 5)");
    println!("  --metrics-period <SECS> Metrics report period (default: 60)");
    println!("  --config <PATH>         Load config from JSON file");
}

// ---------------------------------------------------------------------------
// Config file
// ---------------------------------------------------------------------------

/// On-disk daemon configuration; every field optional so partial
/// files merge over the defaults.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct DaemonConfig {
    pub data_dir: Option<PathBuf>,
    pub server: Option<String>,
    pub auth_token: Option<String>,
    pub schedule_tick_secs: Option<u64>,
    pub report_metrics_period_secs: Option<u64>,
}

impl DaemonConfig {
    /// Loads a JSON config file.
    pub fn load(path: &Path) -> Result<Self, String> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| format!("cannot read {}: {e}", path.display()))?;
        serde_json::from_str(&raw).map_err(|e| format!("cannot parse {}: {e}", path.display()))
    }

    /// Resolves the effective runtime config: defaults, overlaid with
    /// the file, overlaid with CLI flags.
    pub fn resolve(self, cli: &CliArgs) -> AppConfig {
        let mut cfg = AppConfig::default();

        if let Some(dir) = self.data_dir {
            cfg.data_dir = dir;
        }
        if let Some(server) = self.server {
            cfg.server = server;
        }
        if let Some(token) = self.auth_token {
            cfg.auth_token = token;
        }
        if let Some(tick) = self.schedule_tick_secs {
            cfg.schedule_tick_secs = tick;
        }
        if let Some(period) = self.report_metrics_period_secs {
            cfg.report_metrics_period_secs = period;
        }

        if let Some(dir) = &cli.data_dir {
            cfg.data_dir = dir.clone();
        }
        if let Some(server) = &cli.server {
            cfg.server = server.clone();
        }
        if let Some(token) = &cli.auth_token {
            cfg.auth_token = token.clone();
        }
        if let Some(tick) = cli.schedule_tick {
            cfg.schedule_tick_secs = tick;
        }
        if let Some(period) = cli.metrics_period {
            cfg.report_metrics_period_secs = period;
        }

        cfg
    }
}
