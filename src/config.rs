use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::fs;

use anyhow::{Context, Result};
use serde::Deserialize;

pub use self::{detect::Detect, tls::Tls};

mod detect;
mod tls;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub listen_addr: SocketAddr,
    pub doc_root: PathBuf,
    pub tls: Tls,
    #[serde(default)]
    pub detect: Detect,
}

impl Config {
    pub fn read(path: impl AsRef<Path>) -> Result<Self> {
        let config = fs::read_to_string(path)
            .context("failed to read config")?;

        Self::parse(&config)
    }

    pub fn parse(config: &str) -> Result<Self> {
        let config = toml::from_str(config)
            .context("failed to parse config")?;

        Ok(config)
    }
}
