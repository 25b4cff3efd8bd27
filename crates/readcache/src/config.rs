use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::purge::PurgePolicy;

/// Configuration of a single [`Cache`](crate::Cache).
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// The name of the cache, used to tag logs and metrics.
    pub name: String,
    /// Bounds the number of entries, see [`PurgePolicy`].
    pub purge: PurgePolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            name: "default".into(),
            purge: PurgePolicy::DISABLED,
        }
    }
}

impl Config {
    /// Loads the configuration from a YAML file, or returns the default configuration.
    pub fn get(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_reader(
                fs::File::open(path).context("failed to open configuration file")?,
            ),
            None => Ok(Config::default()),
        }
    }

    fn from_reader(mut reader: impl std::io::Read) -> Result<Self> {
        let mut config = String::new();
        reader
            .read_to_string(&mut config)
            .context("failed reading config file")?;
        // check for empty files explicitly
        if config.trim().is_empty() {
            anyhow::bail!("config file empty");
        }
        let config: Self =
            serde_yaml::from_str(&config).context("failed to parse config YAML")?;
        config.purge.validate().context("invalid purge policy")?;
        Ok(config)
    }
}
