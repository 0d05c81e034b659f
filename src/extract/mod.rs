//! Work-unit execution and run orchestration.
//!
//! A run plans every configured table into work units, then fans the
//! units out over a bounded-concurrency stream. Each unit runs the
//! reconcile -> fetch -> materialize pipeline under a unit-level retry
//! budget; failures stay scoped to their unit and are reported in the
//! run summary instead of aborting the run.

pub mod fetch;
pub mod reconcile;
pub mod retry;

pub use fetch::{Fetched, Fetcher, ResumeState};
pub use reconcile::{Reconciler, Reconciliation};
pub use retry::RetryPolicy;

use backon::Retryable;
use chrono::{DateTime, Utc};
use futures::{StreamExt, stream};
use snafu::prelude::*;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::Config;
use crate::emit;
use crate::error::{ExtractError, ExtractStorageSnafu, SinkSnafu};
use crate::filter::Resolver;
use crate::metrics::events::{UnitCompleted, UnitRetried, UnitStatus, UnitsPlanned};
use crate::plan::{self, WorkUnit};
use crate::sink::{Artifact, Materializer};
use crate::source::{RestSourceClient, SourceClient};
use crate::storage::StorageProvider;

/// Terminal state of a work unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitOutcome {
    /// The unit matched no records; nothing was written.
    NoMatchingRecords,
    /// The unit's artifacts were written.
    Materialized {
        artifacts: Vec<Artifact>,
        records: u64,
        /// Resync pages skipped because their artifacts already existed.
        resumed_pages: u32,
    },
    /// The unit failed after exhausting its retry budget.
    Failed { error: String, retryable: bool },
}

/// Terminal record for one work unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitReport {
    pub key: String,
    pub table: String,
    pub outcome: UnitOutcome,
}

/// Aggregate counters for a finished run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractionStats {
    pub units_planned: usize,
    pub units_materialized: usize,
    pub units_empty: usize,
    pub units_failed: usize,
    pub records_extracted: u64,
    pub artifacts_uploaded: usize,
    pub bytes_written: u64,
}

impl ExtractionStats {
    fn tally(units_planned: usize, reports: &[UnitReport]) -> Self {
        let mut stats = Self {
            units_planned,
            ..Default::default()
        };
        for report in reports {
            match &report.outcome {
                UnitOutcome::NoMatchingRecords => stats.units_empty += 1,
                UnitOutcome::Materialized {
                    artifacts, records, ..
                } => {
                    stats.units_materialized += 1;
                    stats.records_extracted += records;
                    stats.artifacts_uploaded += artifacts.len();
                    stats.bytes_written += artifacts.iter().map(|a| a.bytes as u64).sum::<u64>();
                }
                UnitOutcome::Failed { .. } => stats.units_failed += 1,
            }
        }
        stats
    }
}

/// Everything a finished run reports.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub stats: ExtractionStats,
    pub reports: Vec<UnitReport>,
}

/// Shared per-run state handed to each work unit.
#[derive(Clone)]
struct UnitContext {
    client: Arc<dyn SourceClient>,
    materializer: Materializer,
    recency_field: String,
    last_run: Option<DateTime<Utc>>,
    page_timeout: Duration,
    retry: RetryPolicy,
}

impl UnitContext {
    /// Run one unit to a terminal state. Never returns an error; failures
    /// become a `Failed` outcome so sibling units keep running.
    async fn run_unit(&self, unit: WorkUnit) -> UnitReport {
        // Shared across retry attempts: only artifacts older than the
        // unit itself count as resume signals.
        let resume = fetch::ResumeState::new();
        let attempt = || self.execute(&unit, &resume);
        let result = attempt
            .retry(self.retry.backoff())
            .when(ExtractError::is_retryable)
            .notify(|error: &ExtractError, delay: Duration| {
                emit!(UnitRetried);
                warn!(unit = %unit.key, %error, ?delay, "Unit attempt failed, will retry");
            })
            .await;

        let outcome = match result {
            Ok(outcome) => outcome,
            Err(error) => UnitOutcome::Failed {
                retryable: error.is_retryable(),
                error: error.to_string(),
            },
        };

        match &outcome {
            UnitOutcome::NoMatchingRecords => {
                info!(unit = %unit.key, "No matching records");
                emit!(UnitCompleted {
                    status: UnitStatus::Empty
                });
            }
            UnitOutcome::Materialized {
                artifacts,
                records,
                resumed_pages,
            } => {
                info!(
                    unit = %unit.key,
                    artifacts = artifacts.len(),
                    records,
                    resumed_pages,
                    "Unit materialized"
                );
                emit!(UnitCompleted {
                    status: UnitStatus::Materialized
                });
            }
            UnitOutcome::Failed { error, .. } => {
                warn!(unit = %unit.key, error, "Unit failed after exhausting retries");
                emit!(UnitCompleted {
                    status: UnitStatus::Failed
                });
            }
        }

        UnitReport {
            key: unit.key,
            table: unit.table,
            outcome,
        }
    }

    /// One attempt of the reconcile -> fetch -> materialize pipeline.
    async fn execute(
        &self,
        unit: &WorkUnit,
        resume: &fetch::ResumeState,
    ) -> Result<UnitOutcome, ExtractError> {
        let reconciler = Reconciler::new(&*self.client, &self.recency_field, self.last_run);
        let (count, pages) = match reconciler.reconcile(unit).await? {
            Reconciliation::NoMatch => return Ok(UnitOutcome::NoMatchingRecords),
            Reconciliation::Matched { count, pages } => (count, pages),
        };

        let fetcher = Fetcher::new(&*self.client, &self.materializer, self.page_timeout);
        match fetcher.fetch(unit, count, pages, resume).await? {
            Fetched::Historical {
                artifacts,
                records,
                skipped_pages,
            } => Ok(UnitOutcome::Materialized {
                artifacts,
                records,
                resumed_pages: skipped_pages,
            }),
            Fetched::Complete { records } => {
                let total = records.len() as u64;
                let artifact = self
                    .materializer
                    .materialize(&unit.table, unit.filter.as_deref(), None, &records)
                    .await
                    .context(SinkSnafu)?;
                Ok(UnitOutcome::Materialized {
                    artifacts: vec![artifact],
                    records: total,
                    resumed_pages: 0,
                })
            }
        }
    }
}

/// Plan and execute a full extraction run.
///
/// Cancelling `shutdown` lets in-flight units finish but starts no new
/// ones. Unit failures are collected into the report; the run itself
/// only errors when it cannot get off the ground (storage or config).
pub async fn run_extraction(
    config: &Config,
    shutdown: CancellationToken,
) -> Result<RunReport, ExtractError> {
    let anchor = plan::build_anchor(config.extract.year_id, config.extract.utc_offset_hours);
    let resolver = Resolver::new(anchor, config.extract.historical_step_size);

    let client: Arc<dyn SourceClient> = Arc::new(RestSourceClient::new(
        &config.source.host,
        &config.source.client_id,
        &config.source.client_secret,
        config.source.page_size,
    ));
    let storage =
        StorageProvider::for_url_with_options(&config.sink.path, config.sink.storage_options.clone())
            .await
            .context(ExtractStorageSnafu)?;
    let materializer = Materializer::new(Arc::new(storage));

    run_with(config, client, materializer, &resolver, shutdown).await
}

/// Run against caller-supplied source and sink. Extracted from
/// [`run_extraction`] so tests can script the source client.
pub async fn run_with(
    config: &Config,
    client: Arc<dyn SourceClient>,
    materializer: Materializer,
    resolver: &Resolver,
    shutdown: CancellationToken,
) -> Result<RunReport, ExtractError> {
    let plans = plan::plan_tables(&*client, &config.tables, resolver).await;

    let mut units = Vec::new();
    let mut reports = Vec::new();
    for (table, plan) in plans {
        match plan {
            Ok(planned) => units.extend(planned),
            Err(error) => {
                warn!(table = %table, %error, "Planning failed, skipping table");
                reports.push(UnitReport {
                    key: format!("{table}_plan"),
                    table,
                    outcome: UnitOutcome::Failed {
                        retryable: error.is_retryable(),
                        error: error.to_string(),
                    },
                });
            }
        }
    }

    let units_planned = units.len();
    emit!(UnitsPlanned {
        count: units_planned as u64
    });
    info!(units = units_planned, "Planned extraction run");

    let ctx = UnitContext {
        client,
        materializer,
        recency_field: config.extract.recency_field.clone(),
        last_run: config.extract.last_run,
        page_timeout: config.extract.page_timeout(),
        retry: RetryPolicy::new(
            config.extract.max_unit_attempts,
            config.extract.retry_base_delay(),
        ),
    };

    let executed: Vec<UnitReport> = stream::iter(units)
        .map(|unit| {
            let ctx = ctx.clone();
            let shutdown = shutdown.clone();
            async move {
                if shutdown.is_cancelled() {
                    info!(unit = %unit.key, "Shutdown requested, unit not started");
                    return None;
                }
                Some(ctx.run_unit(unit).await)
            }
        })
        .buffer_unordered(config.extract.max_concurrent_units.max(1))
        .filter_map(|report| async move { report })
        .collect()
        .await;
    reports.extend(executed);

    let stats = ExtractionStats::tally(units_planned, &reports);
    info!(
        units_planned = stats.units_planned,
        materialized = stats.units_materialized,
        empty = stats.units_empty,
        failed = stats.units_failed,
        records = stats.records_extracted,
        bytes = stats.bytes_written,
        "Extraction run finished"
    );

    Ok(RunReport { stats, reports })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(key: &str, outcome: UnitOutcome) -> UnitReport {
        UnitReport {
            key: key.into(),
            table: "students".into(),
            outcome,
        }
    }

    #[test]
    fn test_stats_tally() {
        let reports = vec![
            report("students_q_0", UnitOutcome::NoMatchingRecords),
            report(
                "students_q_1",
                UnitOutcome::Materialized {
                    artifacts: vec![Artifact {
                        key: "students/students.json.gz".into(),
                        records: 10,
                        bytes: 128,
                    }],
                    records: 10,
                    resumed_pages: 0,
                },
            ),
            report(
                "students_hq_0",
                UnitOutcome::Failed {
                    error: "boom".into(),
                    retryable: true,
                },
            ),
        ];

        let stats = ExtractionStats::tally(3, &reports);
        assert_eq!(stats.units_planned, 3);
        assert_eq!(stats.units_materialized, 1);
        assert_eq!(stats.units_empty, 1);
        assert_eq!(stats.units_failed, 1);
        assert_eq!(stats.records_extracted, 10);
        assert_eq!(stats.artifacts_uploaded, 1);
        assert_eq!(stats.bytes_written, 128);
    }
}
