//! CLI argument definitions for logship-daemon.
//!
//! Uses `clap` v4 derive macros to parse command-line arguments.

use std::path::PathBuf;

use clap::Parser;

use logship_core::config::LogshipConfig;

/// logship log forwarding daemon.
///
/// Tails files, containers and network inputs, applies processing rules
/// and ships the result to the configured intake.
#[derive(Parser, Debug)]
#[command(name = "logship-daemon")]
#[command(version, about, long_about = None)]
pub struct DaemonCli {
    /// Path to logship.toml configuration file.
    #[arg(short, long, default_value = "/etc/logship/logship.toml")]
    pub config: PathBuf,

    /// Override log level (trace, debug, info, warn, error).
    ///
    /// Takes precedence over the config file and environment variables.
    #[arg(long)]
    pub log_level: Option<String>,

    /// Override log format (json, pretty).
    ///
    /// Takes precedence over the config file and environment variables.
    #[arg(long)]
    pub log_format: Option<String>,

    /// Validate configuration file and sources, then exit without starting the daemon.
    #[arg(long)]
    pub validate: bool,

    /// Override PID file path (takes precedence over config file).
    #[arg(long)]
    pub pid_file: Option<String>,
}

impl DaemonCli {
    /// Apply command-line overrides on top of a loaded configuration.
    ///
    /// Call after `apply_env_overrides` so the command line wins.
    pub fn apply_overrides(&self, config: &mut LogshipConfig) {
        if let Some(level) = &self.log_level {
            config.general.log_level = level.clone();
        }
        if let Some(format) = &self.log_format {
            config.general.log_format = format.clone();
        }
        if let Some(pid_file) = &self.pid_file {
            config.general.pid_file = pid_file.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_point_at_system_config() {
        let cli = DaemonCli::parse_from(["logship-daemon"]);
        assert_eq!(cli.config, PathBuf::from("/etc/logship/logship.toml"));
        assert!(!cli.validate);
        assert!(cli.log_level.is_none());
    }

    #[test]
    fn overrides_take_precedence() {
        let cli = DaemonCli::parse_from([
            "logship-daemon",
            "--config",
            "/tmp/logship.toml",
            "--log-level",
            "debug",
            "--log-format",
            "pretty",
            "--pid-file",
            "/tmp/logship.pid",
            "--validate",
        ]);
        let mut config = LogshipConfig::default();
        cli.apply_overrides(&mut config);

        assert!(cli.validate);
        assert_eq!(config.general.log_level, "debug");
        assert_eq!(config.general.log_format, "pretty");
        assert_eq!(config.general.pid_file, "/tmp/logship.pid");
    }
}
