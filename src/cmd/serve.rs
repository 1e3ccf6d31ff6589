//! HTTP job API command — `slidesmith serve`.

use anyhow::Result;
use std::path::PathBuf;

use slidesmith::config::{CliOverrides, EnvOverrides, SlidesmithConfig};
use slidesmith::server::{ServerConfig, start_server};

pub async fn cmd_serve(
    project_dir: PathBuf,
    overrides: &CliOverrides,
    port: u16,
    dev: bool,
) -> Result<()> {
    let config = SlidesmithConfig::with_overrides(project_dir, &EnvOverrides::from_env(), overrides)?;
    for warning in config.validate() {
        tracing::warn!(%warning, "configuration");
    }

    start_server(
        ServerConfig {
            port,
            dev_mode: dev,
        },
        config,
    )
    .await
}
