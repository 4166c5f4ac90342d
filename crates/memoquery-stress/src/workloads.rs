use std::fs::File;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use futures::FutureExt;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

use memoquery::{Query, QueryHandler, QueryOptions};

#[derive(Debug, Deserialize)]
pub struct WorkloadsConfig {
    pub workloads: Vec<Workload>,
}

impl WorkloadsConfig {
    pub fn from_path(path: &Path) -> Result<Self> {
        let file = File::open(path).context("failed to open workloads file")?;
        Self::from_reader(file)
    }

    pub fn from_reader(reader: impl std::io::Read) -> Result<Self> {
        let config: Self =
            serde_yaml::from_reader(reader).context("failed to parse workloads YAML")?;
        for (i, workload) in config.workloads.iter().enumerate() {
            workload
                .validate()
                .with_context(|| format!("invalid workload {i}"))?;
        }
        Ok(config)
    }
}

/// A stream of queries against a single executor.
#[derive(Debug, Clone, Deserialize)]
pub struct Workload {
    /// The number of queries in flight at any point in time.
    pub concurrency: usize,
    /// The number of distinct keys that queries are drawn from.
    pub keys: u32,
    /// How long each computation takes.
    #[serde(with = "humantime_serde")]
    pub delay: Duration,
    /// The probability of a computation failing.
    #[serde(default)]
    pub error_rate: f64,
    /// The options every query is issued with.
    #[serde(default)]
    pub options: QueryOptions,
}

impl Workload {
    fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            anyhow::bail!("concurrency must be at least 1");
        }
        if self.keys == 0 {
            anyhow::bail!("keys must be at least 1");
        }
        if !(0.0..=1.0).contains(&self.error_rate) {
            anyhow::bail!("error_rate must be between 0 and 1");
        }
        Ok(())
    }

    /// Creates a query for a random key.
    pub fn random_query(&self) -> SleepQuery {
        SleepQuery {
            key: rand::random_range(0..self.keys),
            options: self.options,
        }
    }
}

/// A query that is computed by sleeping for a while.
#[derive(Debug, Serialize)]
pub struct SleepQuery {
    pub key: u32,
    #[serde(skip)]
    pub options: QueryOptions,
}

impl Query for SleepQuery {
    fn options(&self) -> Option<QueryOptions> {
        Some(self.options)
    }
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("simulated failure for key {0}")]
pub struct SimulatedError(u32);

/// Computes [`SleepQuery`]s, failing some of them at random.
#[derive(Debug, Clone)]
pub struct SleepHandler {
    delay: Duration,
    error_rate: f64,
    computations: Arc<AtomicUsize>,
}

impl SleepHandler {
    pub fn new(workload: &Workload) -> Self {
        Self {
            delay: workload.delay,
            error_rate: workload.error_rate,
            computations: Default::default(),
        }
    }

    /// The number of computations that were actually run.
    pub fn computations(&self) -> usize {
        self.computations.load(Ordering::Relaxed)
    }
}

impl QueryHandler<SleepQuery> for SleepHandler {
    type Output = u32;
    type Error = SimulatedError;

    fn compute(&self, query: SleepQuery) -> BoxFuture<'static, Result<u32, SimulatedError>> {
        self.computations.fetch_add(1, Ordering::Relaxed);
        let delay = self.delay;
        let fails = rand::random::<f64>() < self.error_rate;

        async move {
            tokio::time::sleep(delay).await;
            if fails {
                Err(SimulatedError(query.key))
            } else {
                Ok(query.key)
            }
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_workloads() {
        let yaml = r#"
            workloads:
              - concurrency: 8
                keys: 100
                delay: 10ms
              - concurrency: 2
                keys: 1
                delay: 1s
                error_rate: 0.5
                options: [save_to_cache]
        "#;
        let config = WorkloadsConfig::from_reader(yaml.as_bytes()).unwrap();

        let [first, second] = &config.workloads[..] else {
            panic!("expected two workloads");
        };
        assert_eq!(first.delay, Duration::from_millis(10));
        assert_eq!(first.error_rate, 0.0);
        assert_eq!(first.options, QueryOptions::DEFAULT);
        assert_eq!(second.options, QueryOptions::SAVE_TO_CACHE);
        assert_eq!(second.error_rate, 0.5);
    }

    #[test]
    fn test_invalid_workload() {
        let yaml = r#"
            workloads:
              - concurrency: 0
                keys: 1
                delay: 1s
        "#;
        let err = WorkloadsConfig::from_reader(yaml.as_bytes()).unwrap_err();
        assert_eq!(err.to_string(), "invalid workload 0");
    }

    #[test]
    fn test_example_workloads() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("workloads/example.yaml");
        let config = WorkloadsConfig::from_path(&path).unwrap();
        assert!(!config.workloads.is_empty());
    }

    #[test]
    fn test_workloads_file() {
        use std::io::Write;

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "workloads: []").unwrap();
        let config = WorkloadsConfig::from_path(file.path()).unwrap();
        assert!(config.workloads.is_empty());
    }
}
