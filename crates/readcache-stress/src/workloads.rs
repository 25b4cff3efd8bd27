use std::thread;
use std::time::Duration;

use anyhow::{Result, ensure};
use readcache::{BoxError, Entry, Fetcher};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize, Serialize)]
pub struct WorkloadsConfig {
    pub workloads: Vec<Workload>,
}

impl WorkloadsConfig {
    pub fn validate(&self) -> Result<()> {
        ensure!(!self.workloads.is_empty(), "no workloads defined");
        for (i, workload) in self.workloads.iter().enumerate() {
            ensure!(workload.concurrency > 0, "workload {i}: concurrency must be > 0");
            ensure!(workload.keys > 0, "workload {i}: keys must be > 0");
            ensure!(
                (0.0..=1.0).contains(&workload.error_rate),
                "workload {i}: error_rate must be within [0, 1]"
            );
        }
        Ok(())
    }
}

/// A workload hammering a single cache.
#[derive(Debug, Deserialize, Serialize)]
pub struct Workload {
    /// Number of threads calling `get`.
    pub concurrency: usize,
    /// Number of distinct keys, chosen uniformly at random.
    pub keys: usize,
    /// How long fetched values stay live.
    #[serde(with = "humantime_serde")]
    pub ttl: Duration,
    /// How long every fetch takes.
    #[serde(with = "humantime_serde", default)]
    pub fetch_latency: Duration,
    /// Probability of a fetch failing.
    #[serde(default)]
    pub error_rate: f64,
}

impl Workload {
    pub fn upstream(&self) -> SimulatedUpstream {
        SimulatedUpstream {
            ttl: self.ttl,
            latency: self.fetch_latency,
            error_rate: self.error_rate,
        }
    }

    pub fn random_key(&self) -> String {
        rand::random_range(0..self.keys).to_string()
    }
}

/// A [`Fetcher`] simulating a slow and unreliable backend.
#[derive(Debug)]
pub struct SimulatedUpstream {
    ttl: Duration,
    latency: Duration,
    error_rate: f64,
}

impl Fetcher<String> for SimulatedUpstream {
    fn fetch(&self, key: &str) -> Result<Entry<String>, BoxError> {
        if !self.latency.is_zero() {
            thread::sleep(self.latency);
        }
        if rand::random_bool(self.error_rate) {
            return Err(format!("simulated failure fetching {key}").into());
        }
        Ok(Entry::with_ttl(format!("value-{key}"), self.ttl))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_workloads() {
        let yaml = r#"
            workloads:
              - concurrency: 16
                keys: 1000
                ttl: 5s
                fetch_latency: 10ms
                error_rate: 0.01
              - concurrency: 4
                keys: 10
                ttl: 1m
        "#;
        let config: WorkloadsConfig = serde_yaml::from_str(yaml).unwrap();
        config.validate().unwrap();

        insta::assert_debug_snapshot!(config.workloads, @r###"
        [
            Workload {
                concurrency: 16,
                keys: 1000,
                ttl: 5s,
                fetch_latency: 10ms,
                error_rate: 0.01,
            },
            Workload {
                concurrency: 4,
                keys: 10,
                ttl: 60s,
                fetch_latency: 0ns,
                error_rate: 0.0,
            },
        ]
        "###);
    }

    #[test]
    fn test_invalid_error_rate() {
        let yaml = r#"
            workloads:
              - concurrency: 1
                keys: 1
                ttl: 1s
                error_rate: 2
        "#;
        let config: WorkloadsConfig = serde_yaml::from_str(yaml).unwrap();
        let err = config.validate().unwrap_err();
        assert_eq!(err.to_string(), "workload 0: error_rate must be within [0, 1]");
    }

    fn workload(error_rate: f64) -> Workload {
        Workload {
            concurrency: 1,
            keys: 3,
            ttl: Duration::from_secs(60),
            fetch_latency: Duration::ZERO,
            error_rate,
        }
    }

    #[test]
    fn test_simulated_upstream() {
        let reliable = workload(0.0);
        let entry = reliable.upstream().fetch("1").unwrap();
        assert_eq!(entry.value(), "value-1");

        let failing = workload(1.0).upstream();
        let err = failing.fetch("1").unwrap_err();
        assert_eq!(err.to_string(), "simulated failure fetching 1");
    }

    #[test]
    fn test_random_key_in_range() {
        let workload = workload(0.0);
        for _ in 0..100 {
            let key: usize = workload.random_key().parse().unwrap();
            assert!(key < workload.keys);
        }
    }
}
