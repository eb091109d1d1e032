//! Runtime configuration, loaded from TOML.
//!
//! ```toml
//! [queues]
//! graph = "histograph-graph"
//! downstream = "histograph-es"
//! rejected = "histograph-pg"
//!
//! [worker]
//! progress_interval = 100
//!
//! [reasoning]
//! equivalence = "hg:sameHgConcept"
//!
//! [sinks]
//! failure_dir = "."
//!
//! [log]
//! level = "info"
//! ```
//!
//! Every field is optional.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::taxonomy::{RelationType, Taxonomy};
use crate::{Error, Result};

/// Environment variable naming the config file.
pub const CONFIG_ENV: &str = "HISTOGRAPH_CONFIG";

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub queues: QueueConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub reasoning: ReasoningConfig,
    #[serde(default)]
    pub sinks: SinkConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct QueueConfig {
    /// Queue the worker drains.
    #[serde(default = "default_graph_queue")]
    pub graph: String,
    /// Queue applied payloads are forwarded to.
    #[serde(default = "default_downstream_queue")]
    pub downstream: String,
    /// Queue rejected relations are pushed to.
    #[serde(default = "default_rejected_queue")]
    pub rejected: String,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            graph: default_graph_queue(),
            downstream: default_downstream_queue(),
            rejected: default_rejected_queue(),
        }
    }
}

fn default_graph_queue() -> String {
    "histograph-graph".into()
}

fn default_downstream_queue() -> String {
    "histograph-es".into()
}

fn default_rejected_queue() -> String {
    "histograph-pg".into()
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct WorkerConfig {
    /// Log progress every this many tasks. 0 disables progress logging.
    #[serde(default = "default_progress_interval")]
    pub progress_interval: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self { progress_interval: default_progress_interval() }
    }
}

fn default_progress_interval() -> u64 {
    100
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ReasoningConfig {
    /// Relation used for transitive inference and clustering.
    #[serde(default = "default_equivalence")]
    pub equivalence: RelationType,
}

impl Default for ReasoningConfig {
    fn default() -> Self {
        Self { equivalence: default_equivalence() }
    }
}

fn default_equivalence() -> RelationType {
    RelationType::SameHgConcept
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct SinkConfig {
    /// Directory for the failure log files.
    #[serde(default = "default_failure_dir")]
    pub failure_dir: PathBuf,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self { failure_dir: default_failure_dir() }
    }
}

fn default_failure_dir() -> PathBuf {
    PathBuf::from(".")
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct LogConfig {
    /// `EnvFilter` directives.
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self { level: default_log_level() }
    }
}

fn default_log_level() -> String {
    "info".into()
}

impl Config {
    pub fn from_toml(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml(&text)
    }

    /// Load from the file named by `HISTOGRAPH_CONFIG`, or defaults when unset.
    pub fn from_env() -> Result<Self> {
        match std::env::var(CONFIG_ENV) {
            Ok(path) => Self::from_file(path),
            Err(std::env::VarError::NotPresent) => Ok(Self::default()),
            Err(e) => Err(Error::Config(format!("{CONFIG_ENV}: {e}"))),
        }
    }

    /// The default taxonomy with the configured equivalence relation.
    ///
    /// Fails if the equivalence relation is not a primary relation.
    pub fn taxonomy(&self) -> Result<Taxonomy> {
        Taxonomy::default().with_equivalence(self.reasoning.equivalence)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.queues.graph, "histograph-graph");
        assert_eq!(config.worker.progress_interval, 100);
        assert_eq!(config.log.level, "info");
    }

    #[test]
    fn test_partial_sections() {
        let config = Config::from_toml(
            r#"
            [queues]
            graph = "graph-in"

            [reasoning]
            equivalence = "hg:liesIn"
            "#,
        )
        .unwrap();
        assert_eq!(config.queues.graph, "graph-in");
        assert_eq!(config.queues.rejected, "histograph-pg");
        assert_eq!(config.taxonomy().unwrap().equivalence(), RelationType::LiesIn);
    }

    #[test]
    fn test_atomic_equivalence_rejected() {
        let config = Config::from_toml("[reasoning]\nequivalence = \"hga:conceptIdentical\"\n").unwrap();
        assert!(matches!(config.taxonomy(), Err(Error::Config(_))));
    }

    #[test]
    fn test_bad_toml() {
        assert!(matches!(Config::from_toml("[worker]\nprogress_interval = \"x\""), Err(Error::Toml(_))));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[sinks]\nfailure_dir = \"/var/log/histograph\"").unwrap();
        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.sinks.failure_dir, PathBuf::from("/var/log/histograph"));
    }
}
