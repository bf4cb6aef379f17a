use std::{net::SocketAddr, path::{Path, PathBuf}};

use anyhow::Context;
use clap::Parser;
use serde::Deserialize;
use workout_tracker_lib::activity::CalorieRates;

#[derive(Parser, Debug, Clone)]
#[command(version, about = "Live GPS workout tracking server")]
pub struct Args {
    /// Address of the HTTP control and snapshot API
    #[arg(long, default_value = "0.0.0.0:8080")]
    pub http_addr: SocketAddr,

    /// Address location sources connect to
    #[arg(long, default_value = "0.0.0.0:3169")]
    pub feed_addr: SocketAddr,

    /// TOML file overriding the calorie table
    #[arg(long)]
    pub config: Option<PathBuf>,

    #[arg(long, default_value = "server/log")]
    pub log_dir: PathBuf,

    /// Directory holding `data/`. Defaults to the project root.
    #[arg(long)]
    pub data_root: Option<PathBuf>,

    /// Milliseconds between live snapshot ticks
    #[arg(long, default_value_t = 1000)]
    pub tick_ms: u64,
}

/// Contents of the optional config file.
///
/// ```toml
/// [calories.running]
/// base_per_hour = 650.0
/// per_km = 55.0
/// ```
#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct FileConfig {
    pub calories: CalorieRates,
}

impl FileConfig {
    pub fn parse(contents: &str) -> anyhow::Result<Self> {
        toml::from_str(contents).context("Invalid config file")
    }

    pub async fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = tokio::fs::read_to_string(path).await
            .with_context(|| format!("Failed to read config file {:?}", path))?;
        Self::parse(&contents)
    }
}
