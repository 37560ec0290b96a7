use std::path::PathBuf;

use clap::Parser;

use crate::pipeline::RunMode;
use crate::telemetry::{DEFAULT_LOG_LEVEL, LogFormat};

#[derive(Debug, Parser)]
#[command(
    name = "glance-image-sync",
    version,
    about = "Keep a Glance image catalog in sync with upstream distribution cloud images"
)]
pub struct Cli {
    /// Path to the YAML configuration file.
    #[arg(long, short, env = "IMAGE_SYNC_CONFIG", default_value = "config.yml")]
    pub config: PathBuf,
    /// Cloud entry in clouds.yaml; overrides `catalog.cloud`.
    #[arg(long, env = "OS_CLOUD")]
    pub cloud: Option<String>,
    /// Explicit clouds.yaml location; overrides `catalog.clouds_file`.
    #[arg(long, env = "OS_CLIENT_CONFIG_FILE")]
    pub clouds_file: Option<PathBuf>,
    #[arg(long, default_value = DEFAULT_LOG_LEVEL)]
    pub log_level: String,
    #[arg(long, value_enum)]
    pub log_format: Option<LogFormat>,
    /// Run a single batch, wait for its uploads and exit.
    #[arg(long)]
    pub once: bool,
}

impl Cli {
    pub fn log_format(&self) -> LogFormat {
        self.log_format.unwrap_or_else(LogFormat::infer)
    }

    pub fn mode(&self) -> RunMode {
        if self.once { RunMode::Once } else { RunMode::Daemon }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_daemon_mode() {
        let cli = Cli::try_parse_from(["glance-image-sync"]).expect("parses");
        assert_eq!(cli.mode(), RunMode::Daemon);
        assert_eq!(cli.log_level, "info");
    }

    #[test]
    fn once_and_format_flags() {
        let cli = Cli::try_parse_from([
            "glance-image-sync",
            "--config",
            "/etc/image-sync.yml",
            "--once",
            "--log-format",
            "json",
            "--cloud",
            "uk.linaro.cloud",
        ])
        .expect("parses");

        assert_eq!(cli.mode(), RunMode::Once);
        assert_eq!(cli.log_format(), LogFormat::Json);
        assert_eq!(cli.config, PathBuf::from("/etc/image-sync.yml"));
        assert_eq!(cli.cloud.as_deref(), Some("uk.linaro.cloud"));
    }
}
