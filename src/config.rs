//! Process-wide configuration: CLI flags with environment-backed defaults.
//!
//! Mirrors the shape of `uwb_hub::UwbHubConfig` (defaults computed once,
//! overridable per field) but sourced from `clap` rather than bare
//! `std::env::var` lookups, since this crate's surface is a CLI binary
//! rather than a background task spawned from another `main`.

use clap::Parser;

const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8082";
const DEFAULT_DATABASE_URL: &str = "postgres://127.0.0.1/deezle";
const DEFAULT_LOG_FILE: &str = "/var/log/deezle.log";

#[derive(Debug, Clone, Parser)]
#[command(name = "deezle-fleet-server", about = "TCP fleet-management server for scooter lock modules")]
pub struct Config {
    /// Raise stdout logging to debug level (the file sink always gets info+).
    #[arg(long)]
    pub verbose: bool,

    /// Address to bind the device-facing TCP listener on.
    #[arg(long, default_value = DEFAULT_BIND_ADDR)]
    pub bind_addr: String,

    /// Connection string for the document-store backing database.
    #[arg(long, default_value = DEFAULT_DATABASE_URL, env = "DATABASE_URL")]
    pub database_url: String,

    /// Path to the process-wide log file.
    #[arg(long, default_value = DEFAULT_LOG_FILE)]
    pub log_file: String,
}

impl Config {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let cfg = Config::parse_from(["deezle-fleet-server"]);
        assert!(!cfg.verbose);
        assert_eq!(cfg.bind_addr, DEFAULT_BIND_ADDR);
        assert_eq!(cfg.log_file, DEFAULT_LOG_FILE);
    }

    #[test]
    fn verbose_flag_parses() {
        let cfg = Config::parse_from(["deezle-fleet-server", "--verbose"]);
        assert!(cfg.verbose);
    }
}
