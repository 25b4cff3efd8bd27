use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer, de};
use tracing::level_filters::LevelFilter;

/// Controls the log format
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Auto detect (pretty for tty, simplified for other)
    Auto,
    /// With colors
    Pretty,
    /// Simplified log output
    Simplified,
    /// Dump out JSON lines
    Json,
}

/// Controls the logging system.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Logging {
    /// The log level for the stresstest.
    #[serde(deserialize_with = "deserialize_level_filter")]
    pub level: LevelFilter,
    /// Controls the log format.
    pub format: LogFormat,
}

impl Default for Logging {
    fn default() -> Self {
        Logging {
            level: LevelFilter::WARN,
            format: LogFormat::Auto,
        }
    }
}

/// Control the metrics.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Metrics {
    /// host/port of statsd instance
    pub statsd: Option<String>,
    /// The prefix that should be added to all metrics.
    pub prefix: String,
    /// A map containing custom tags and their values.
    ///
    /// These tags will be appended to every metric.
    pub custom_tags: BTreeMap<String, String>,
}

impl Default for Metrics {
    fn default() -> Self {
        Metrics {
            statsd: None,
            prefix: "readcache".into(),
            custom_tags: BTreeMap::new(),
        }
    }
}

/// Configuration of the stresstest.
///
/// Every workload runs against its own cache, created from `cache` with the workload index
/// appended to the cache name.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct StressConfig {
    pub cache: readcache::Config,
    pub logging: Logging,
    pub metrics: Metrics,
}

impl StressConfig {
    pub fn get(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_reader(
                fs::File::open(path).context("failed to open configuration file")?,
            ),
            None => Ok(StressConfig::default()),
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
        config
            .cache
            .purge
            .validate()
            .context("invalid purge policy")?;
        Ok(config)
    }
}

fn deserialize_level_filter<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<LevelFilter, D::Error> {
    let level = String::deserialize(deserializer)?;
    level.parse().map_err(|_| {
        de::Error::invalid_value(
            de::Unexpected::Str(&level),
            &r#"one of the strings "off", "error", "warn", "info", "debug", or "trace""#,
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let cfg = StressConfig::get(None).unwrap();
        assert_eq!(cfg.logging.level, LevelFilter::WARN);
        assert_eq!(cfg.metrics.statsd, None);
        assert!(!cfg.cache.purge.is_enabled());
    }

    #[test]
    fn test_full_config() {
        let yaml = r#"
            cache:
              name: stress
              purge:
                purge_at: 1000
            logging:
              level: debug
              format: json
            metrics:
              statsd: 127.0.0.1:8125
              custom_tags:
                env: stresstest
        "#;
        let cfg = StressConfig::from_reader(yaml.as_bytes()).unwrap();
        assert_eq!(cfg.cache.name, "stress");
        assert_eq!(cfg.cache.purge.purge_at, Some(1000));
        assert_eq!(cfg.logging.level, LevelFilter::DEBUG);
        assert_eq!(cfg.logging.format, LogFormat::Json);
        assert_eq!(cfg.metrics.statsd.as_deref(), Some("127.0.0.1:8125"));
        assert_eq!(cfg.metrics.prefix, "readcache");
        assert_eq!(cfg.metrics.custom_tags["env"], "stresstest");
    }

    #[test]
    fn test_invalid_level() {
        let yaml = r#"
            logging:
              level: loud
        "#;
        let err = StressConfig::from_reader(yaml.as_bytes()).unwrap_err();
        assert_eq!(err.to_string(), "failed to parse config YAML");
    }

    #[test]
    fn test_invalid_purge_policy() {
        let yaml = r#"
            cache:
              purge:
                purge_to: 10
        "#;
        let err = StressConfig::from_reader(yaml.as_bytes()).unwrap_err();
        assert_eq!(err.to_string(), "invalid purge policy");
    }
}
