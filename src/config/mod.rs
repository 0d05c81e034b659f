//! Configuration parsing and table specifications.
//!
//! Handles loading configuration from YAML files and command-line
//! arguments, including the declarative table/query specs that drive the
//! extraction planner.

mod vars;

use serde::{Deserialize, Serialize};
use snafu::prelude::*;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use crate::error::{
    ConfigError, EmptyHostSnafu, EmptySelectorSnafu, EmptySinkPathSnafu, EnvInterpolationSnafu,
    NoTablesSnafu, ReadFileSnafu, YamlParseSnafu,
};

/// Main configuration structure for an extraction run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub source: SourceConfig,
    pub sink: SinkConfig,
    pub extract: ExtractConfig,
    /// Logical tables to pull, in order.
    pub tables: Vec<TableSpec>,
    /// Metrics configuration (optional, enabled by default).
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Source API connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Base URL of the student-information-system API.
    pub host: String,

    /// OAuth2 client credentials.
    pub client_id: String,
    pub client_secret: String,

    /// Page size override. When absent, the client's advertised maximum
    /// page size is used.
    #[serde(default)]
    pub page_size: Option<u32>,
}

/// Sink configuration for writing artifacts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SinkConfig {
    /// Destination for compressed artifacts.
    /// Examples: "s3://bucket/powerschool", "gs://bucket/powerschool",
    /// "/local/path/powerschool"
    pub path: String,

    /// Storage options (credentials, region, etc.)
    #[serde(default)]
    pub storage_options: HashMap<String, String>,
}

/// Extraction engine tuning and anchor values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractConfig {
    /// School-year identifier used as the reference temporal anchor.
    pub year_id: i32,

    /// Fixed UTC offset (hours) of the reference time zone used to resolve
    /// the "today" literal.
    #[serde(default)]
    pub utc_offset_hours: i8,

    /// Change-tracking timestamp field used for the cheap recency probe.
    #[serde(default = "default_recency_field")]
    pub recency_field: String,

    /// Timestamp of the last successful scheduled run. Absent means
    /// "never", which degrades the recency probe to "assume something
    /// changed".
    #[serde(default)]
    pub last_run: Option<chrono::DateTime<chrono::Utc>>,

    /// Maximum number of work units extracted concurrently (default: 4).
    #[serde(default = "default_max_concurrent_units")]
    pub max_concurrent_units: usize,

    /// Time budget for a single page fetch in seconds (default: 300).
    #[serde(default = "default_page_timeout_secs")]
    pub page_timeout_secs: u64,

    /// Maximum attempts for a work unit, including the first (default: 3).
    #[serde(default = "default_max_unit_attempts")]
    pub max_unit_attempts: usize,

    /// Base delay for exponential backoff in milliseconds (default: 500).
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,

    /// Override for the historical backfill chunk size of identifier
    /// selectors. Defaults to the resolver's fixed chunk.
    #[serde(default)]
    pub historical_step_size: Option<u64>,
}

fn default_recency_field() -> String {
    "whenmodified".to_string()
}

fn default_max_concurrent_units() -> usize {
    4
}

fn default_page_timeout_secs() -> u64 {
    300
}

fn default_max_unit_attempts() -> usize {
    3
}

fn default_retry_base_delay_ms() -> u64 {
    500
}

impl ExtractConfig {
    pub fn page_timeout(&self) -> Duration {
        Duration::from_secs(self.page_timeout_secs)
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }
}

/// Metrics configuration for Prometheus endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Whether metrics collection is enabled (default: true).
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,
    /// Address to bind the metrics HTTP server (default: "0.0.0.0:9090").
    #[serde(default = "default_metrics_address")]
    pub address: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
            address: default_metrics_address(),
        }
    }
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_metrics_address() -> String {
    "0.0.0.0:9090".to_string()
}

/// A logical source table to extract.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableSpec {
    /// Stable external identifier of the table.
    pub name: String,

    /// Default field projection for every query against this table.
    #[serde(default)]
    pub projection: Option<String>,

    /// Filter queries to run. An empty list means "extract everything,
    /// unfiltered".
    #[serde(default)]
    pub queries: Vec<QuerySpec>,
}

/// A single filter query against a table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuerySpec {
    /// The filter: a literal expression string or a structured selector.
    #[serde(default)]
    pub q: Option<QueryFilter>,

    /// Projection override for this query only.
    #[serde(default)]
    pub projection: Option<String>,
}

/// Either a ready-made filter expression or a declarative selector the
/// constraint resolver turns into one.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QueryFilter {
    /// Literal filter expression, used verbatim.
    Literal(String),

    /// Structured selector descriptor.
    Structured {
        selector: String,
        #[serde(default)]
        value: Option<FilterValue>,
        #[serde(default)]
        max_value: Option<FilterValue>,
    },
}

/// A scalar filter boundary as written in configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum FilterValue {
    Number(i64),
    Text(String),
}

impl std::fmt::Display for FilterValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FilterValue::Number(n) => write!(f, "{n}"),
            FilterValue::Text(s) => write!(f, "{s}"),
        }
    }
}

impl Config {
    /// Load configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::from_file_with_options(path, true)
    }

    /// Load configuration from a YAML file with optional environment
    /// variable interpolation.
    pub fn from_file_with_options(
        path: impl AsRef<Path>,
        interpolate_env: bool,
    ) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).context(ReadFileSnafu)?;

        let content = if interpolate_env {
            let result = vars::interpolate(&content);
            if !result.is_ok() {
                let error_msg = result.errors.join("\n");
                return EnvInterpolationSnafu { message: error_msg }.fail();
            }
            result.text
        } else {
            content
        };

        let config: Config = serde_yaml::from_str(&content).context(YamlParseSnafu)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        ensure!(!self.source.host.is_empty(), EmptyHostSnafu);
        ensure!(!self.sink.path.is_empty(), EmptySinkPathSnafu);
        ensure!(!self.tables.is_empty(), NoTablesSnafu);

        for table in &self.tables {
            for query in &table.queries {
                if let Some(QueryFilter::Structured { selector, .. }) = &query.q {
                    ensure!(
                        !selector.is_empty(),
                        EmptySelectorSnafu {
                            table: table.name.clone()
                        }
                    );
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_yaml_parsing() {
        let yaml = r#"
source:
  host: https://district.powerschool.com
  client_id: abc
  client_secret: def

sink:
  path: "gs://bucket/powerschool"

extract:
  year_id: 33

tables:
  - name: students
    queries:
      - q: { selector: whenmodified, value: today }
  - name: schools
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.tables.len(), 2);
        assert_eq!(config.extract.year_id, 33);
        assert_eq!(config.extract.recency_field, "whenmodified");
        assert_eq!(config.extract.max_concurrent_units, 4);
        assert!(config.tables[1].queries.is_empty());

        match config.tables[0].queries[0].q.as_ref().unwrap() {
            QueryFilter::Structured { selector, value, .. } => {
                assert_eq!(selector, "whenmodified");
                assert_eq!(value, &Some(FilterValue::Text("today".into())));
            }
            other => panic!("Expected structured filter, got {other:?}"),
        }
    }

    #[test]
    fn test_literal_and_numeric_filters() {
        let yaml = r#"
source:
  host: https://district.powerschool.com
  client_id: abc
  client_secret: def
sink:
  path: "/data/powerschool"
extract:
  year_id: 33
tables:
  - name: storedgrades
    queries:
      - q: "storedgrades.termid=ge=3300"
      - q: { selector: dcid, value: 10000 }
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        let queries = &config.tables[0].queries;

        assert!(matches!(
            queries[0].q,
            Some(QueryFilter::Literal(ref s)) if s == "storedgrades.termid=ge=3300"
        ));
        match queries[1].q.as_ref().unwrap() {
            QueryFilter::Structured { value, .. } => {
                assert_eq!(value, &Some(FilterValue::Number(10000)));
            }
            other => panic!("Expected structured filter, got {other:?}"),
        }
    }

    #[test]
    fn test_validation_rejects_empty_tables() {
        let yaml = r#"
source:
  host: https://district.powerschool.com
  client_id: abc
  client_secret: def
sink:
  path: "/data"
extract:
  year_id: 33
tables: []
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::NoTables)));
    }
}
