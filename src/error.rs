//! Error types for glacier using snafu.
//!
//! This module defines structured error types with context selectors for
//! all error conditions in the codebase.

use snafu::prelude::*;

// ============ Storage Errors ============

/// Errors that can occur during storage operations.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum StorageError {
    /// Invalid storage URL format.
    #[snafu(display("Invalid storage URL: {url}"))]
    InvalidUrl { url: String },

    /// Object store operation failed.
    #[snafu(display("Storage operation failed"))]
    ObjectStore { source: object_store::Error },

    /// IO error during storage operations.
    #[snafu(display("IO error"))]
    Io { source: std::io::Error },

    /// S3 configuration error.
    #[snafu(display("S3 configuration error"))]
    S3Config { source: object_store::Error },

    /// GCS configuration error.
    #[snafu(display("GCS configuration error"))]
    GcsConfig { source: object_store::Error },
}

impl StorageError {
    /// Check if this error represents a "not found" condition (404, NoSuchKey, etc.)
    pub fn is_not_found(&self) -> bool {
        match self {
            StorageError::ObjectStore { source } => {
                matches!(source, object_store::Error::NotFound { .. })
            }
            _ => false,
        }
    }
}

// ============ Config Errors ============

/// Errors that can occur during configuration parsing and validation.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ConfigError {
    /// Source host is empty.
    #[snafu(display("Source host cannot be empty"))]
    EmptyHost,

    /// Sink path is empty.
    #[snafu(display("Sink path cannot be empty"))]
    EmptySinkPath,

    /// No tables configured.
    #[snafu(display("At least one table must be configured"))]
    NoTables,

    /// A structured query is missing its selector.
    #[snafu(display("Table '{table}' has a query with an empty selector"))]
    EmptySelector { table: String },

    /// Environment variable interpolation failed.
    #[snafu(display("Environment variable interpolation failed:\n{message}"))]
    EnvInterpolation { message: String },

    /// Failed to parse YAML configuration.
    #[snafu(display("Failed to parse YAML configuration"))]
    YamlParse { source: serde_yaml::Error },

    /// Failed to read configuration file.
    #[snafu(display("Failed to read configuration file"))]
    ReadFile { source: std::io::Error },
}

// ============ Filter Errors ============

/// Errors raised while resolving selectors into filter boundaries.
///
/// These are configuration errors: they abort the affected work unit and
/// are never retried.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum FilterError {
    /// The selector name matches no known constraint rule.
    #[snafu(display("Unknown selector: '{selector}'"))]
    UnknownSelector { selector: String },

    /// A selector value could not be parsed as the expected type.
    #[snafu(display("Invalid value '{value}' for selector '{selector}'"))]
    InvalidValue { selector: String, value: String },
}

// ============ Source Errors ============

/// Errors returned by the source API client.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum SourceError {
    /// A request exceeded its time budget.
    #[snafu(display("Source request timed out for table '{table}'"))]
    Timeout { table: String },

    /// Network-level failure (connect, TLS, DNS).
    #[snafu(display("Source connection failed"))]
    Connect { source: reqwest::Error },

    /// The source returned a non-success HTTP status.
    #[snafu(display("Source returned HTTP {status}: {message}"))]
    Http { status: u16, message: String },

    /// The source rejected a filter field (e.g. a table without the
    /// change-tracking column).
    #[snafu(display("Source rejected field '{field}'"))]
    InvalidField { field: String },

    /// The response body could not be decoded.
    #[snafu(display("Failed to decode source response: {message}"))]
    Decode { message: String },

    /// Token acquisition failed.
    #[snafu(display("Source authentication failed: {message}"))]
    Auth { message: String },
}

impl SourceError {
    /// Transient errors are retried with backoff; permanent ones are not.
    pub fn is_transient(&self) -> bool {
        match self {
            SourceError::Timeout { .. } | SourceError::Connect { .. } => true,
            SourceError::Http { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}

// ============ Sink Errors ============

/// Errors that can occur while materializing artifacts.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum SinkError {
    /// JSON serialization failed.
    #[snafu(display("Failed to serialize records"))]
    Serialize { source: serde_json::Error },

    /// Gzip compression failed.
    #[snafu(display("Failed to compress artifact"))]
    Compress { source: std::io::Error },

    /// Artifact upload failed.
    #[snafu(display("Failed to upload artifact '{key}'"))]
    Upload { key: String, source: StorageError },

    /// Artifact existence probe failed.
    #[snafu(display("Failed to probe artifact '{key}'"))]
    Probe { key: String, source: StorageError },
}

// ============ Metrics Errors ============

/// Errors that can occur during metrics initialization.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum MetricsError {
    /// Failed to initialize Prometheus recorder.
    #[snafu(display("Failed to initialize Prometheus recorder"))]
    PrometheusInit {
        source: metrics_exporter_prometheus::BuildError,
    },
}

// ============ Extract Error (top-level) ============

/// Top-level extraction errors that aggregate all error types.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ExtractError {
    /// Configuration error.
    #[snafu(display("Configuration error"))]
    Config { source: ConfigError },

    /// Filter resolution error.
    #[snafu(display("Filter error"))]
    Filter { source: FilterError },

    /// Source API error.
    #[snafu(display("Source error"))]
    Source { source: SourceError },

    /// Storage error.
    #[snafu(display("Storage error"))]
    ExtractStorage { source: StorageError },

    /// Sink error.
    #[snafu(display("Sink error"))]
    Sink { source: SinkError },

    /// Retrieved record count still differs from the authoritative count
    /// after one re-verification.
    #[snafu(display(
        "Count mismatch for table '{table}': retrieved {retrieved}, expected {expected}"
    ))]
    CountMismatch {
        table: String,
        retrieved: u64,
        expected: u64,
    },

    /// Address parsing error.
    #[snafu(display("Failed to parse address"))]
    AddressParse { source: std::net::AddrParseError },

    /// Metrics error.
    #[snafu(display("Metrics error"))]
    Metrics { source: MetricsError },

    /// One or more work units failed after exhausting their retry budget.
    #[snafu(display("{count} work unit(s) failed"))]
    UnitsFailed { count: usize },
}

impl ExtractError {
    /// Whether an out-of-band re-run of the affected unit could succeed.
    ///
    /// Configuration and filter errors are deterministic and excluded;
    /// everything that depends on the source or storage being in a
    /// different state is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            ExtractError::Source { source } => source.is_transient(),
            ExtractError::CountMismatch { .. } => true,
            ExtractError::ExtractStorage { .. } => true,
            ExtractError::Sink { source } => {
                matches!(source, SinkError::Upload { .. } | SinkError::Probe { .. })
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_source_errors() {
        assert!(
            SourceError::Timeout {
                table: "students".into()
            }
            .is_transient()
        );
        assert!(
            SourceError::Http {
                status: 503,
                message: "unavailable".into()
            }
            .is_transient()
        );
        assert!(
            SourceError::Http {
                status: 429,
                message: "rate limited".into()
            }
            .is_transient()
        );
        assert!(
            !SourceError::Http {
                status: 400,
                message: "bad request".into()
            }
            .is_transient()
        );
        assert!(
            !SourceError::InvalidField {
                field: "whenmodified".into()
            }
            .is_transient()
        );
    }

    #[test]
    fn test_retryable_extract_errors() {
        let mismatch = ExtractError::CountMismatch {
            table: "students".into(),
            retrieved: 10,
            expected: 12,
        };
        assert!(mismatch.is_retryable());

        let filter = ExtractError::Filter {
            source: FilterError::UnknownSelector {
                selector: "bogus".into(),
            },
        };
        assert!(!filter.is_retryable());
    }
}
