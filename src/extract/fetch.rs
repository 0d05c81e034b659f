//! Paginated fetching with per-page time budgets and resync resume.
//!
//! Historical backfill units materialize each page as soon as it
//! arrives, so an interrupted resync resumes by probing which page
//! artifacts already exist. Incremental units fetch every page first and
//! tally-verify the total against the reconciled count before a single
//! artifact is written.

use serde_json::Value;
use snafu::prelude::*;
use std::collections::HashSet;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::emit;
use crate::error::{CountMismatchSnafu, ExtractError, SinkSnafu, SourceSnafu, TimeoutSnafu};
use crate::metrics::events::{PagesFetched, PagesSkipped, RecordsExtracted};
use crate::plan::WorkUnit;
use crate::sink::{Artifact, Materializer};
use crate::source::SourceClient;

/// Upper bound on tally preallocation.
const PREALLOC_RECORD_CAP: u64 = 10_000;

/// Result of fetching one work unit.
#[derive(Debug)]
pub enum Fetched {
    /// Historical unit: pages already materialized individually.
    Historical {
        artifacts: Vec<Artifact>,
        records: u64,
        skipped_pages: u32,
    },
    /// Incremental unit: the tally-verified record set, not yet written.
    Complete { records: Vec<Value> },
}

/// Resume signals for one work unit, snapshotted on the unit's first
/// attempt.
///
/// Only artifacts that existed before the unit started count as resume
/// signals. Pages written by a failed attempt of the same unit are
/// re-fetched and re-verified on retry, so a persistent count mismatch
/// stays a failure instead of being skipped past.
#[derive(Debug, Default)]
pub struct ResumeState {
    preexisting: Mutex<Option<HashSet<u32>>>,
}

impl ResumeState {
    pub fn new() -> Self {
        Self::default()
    }

    fn cached(&self) -> Option<HashSet<u32>> {
        self.preexisting.lock().expect("resume state lock").clone()
    }

    fn store(&self, pages: HashSet<u32>) {
        *self.preexisting.lock().expect("resume state lock") = Some(pages);
    }
}

/// Drives the page loop for a single work unit.
pub struct Fetcher<'a> {
    client: &'a dyn SourceClient,
    materializer: &'a Materializer,
    page_timeout: Duration,
}

impl<'a> Fetcher<'a> {
    pub fn new(
        client: &'a dyn SourceClient,
        materializer: &'a Materializer,
        page_timeout: Duration,
    ) -> Self {
        Self {
            client,
            materializer,
            page_timeout,
        }
    }

    pub async fn fetch(
        &self,
        unit: &WorkUnit,
        count: u64,
        pages: u32,
        resume: &ResumeState,
    ) -> Result<Fetched, ExtractError> {
        if unit.is_historical {
            self.fetch_historical(unit, count, pages, resume).await
        } else {
            self.fetch_complete(unit, count, pages).await
        }
    }

    /// Fetch every page, then verify the tally against the reconciled
    /// count.
    async fn fetch_complete(
        &self,
        unit: &WorkUnit,
        count: u64,
        pages: u32,
    ) -> Result<Fetched, ExtractError> {
        // The count is remote-reported; never trust it for allocation
        // sizing.
        let mut records = Vec::with_capacity(count.min(PREALLOC_RECORD_CAP) as usize);
        for page in 1..=pages {
            records.extend(self.fetch_page(unit, page).await?);
        }

        self.verify_tally(unit, records.len() as u64, count).await?;

        Ok(Fetched::Complete { records })
    }

    /// Fetch a historical chunk page by page, materializing each page and
    /// skipping pages whose artifacts predate this unit's first attempt.
    async fn fetch_historical(
        &self,
        unit: &WorkUnit,
        count: u64,
        pages: u32,
        resume: &ResumeState,
    ) -> Result<Fetched, ExtractError> {
        // Single-page chunks keep the unsuffixed artifact key.
        let paged = pages > 1;
        let preexisting = self.preexisting_pages(unit, pages, paged, resume).await?;
        let mut artifacts = Vec::new();
        let mut fetched = 0u64;
        let mut skipped_pages = 0u32;

        for page in 1..=pages {
            let page_label = paged.then_some(page);
            if preexisting.contains(&page) {
                skipped_pages += 1;
                emit!(PagesSkipped { count: 1 });
                continue;
            }

            let records = self.fetch_page(unit, page).await?;
            fetched += records.len() as u64;
            let artifact = self
                .materializer
                .materialize(&unit.table, unit.filter.as_deref(), page_label, &records)
                .await
                .context(SinkSnafu)?;
            artifacts.push(artifact);
        }

        if skipped_pages == 0 {
            self.verify_tally(unit, fetched, count).await?;
        } else {
            // Skipped pages make the expected remainder unknowable.
            debug!(unit = %unit.key, skipped_pages, "Resumed resync, tally verification skipped");
        }

        Ok(Fetched::Historical {
            artifacts,
            records: fetched,
            skipped_pages,
        })
    }

    /// Resolve which pages already had artifacts before the unit's first
    /// attempt. Probed once and cached in `resume`, so retry attempts see
    /// the same snapshot rather than their own partial writes.
    async fn preexisting_pages(
        &self,
        unit: &WorkUnit,
        pages: u32,
        paged: bool,
        resume: &ResumeState,
    ) -> Result<HashSet<u32>, ExtractError> {
        if let Some(cached) = resume.cached() {
            return Ok(cached);
        }

        let mut existing = HashSet::new();
        for page in 1..=pages {
            let page_label = paged.then_some(page);
            let exists = self
                .materializer
                .exists(&unit.table, unit.filter.as_deref(), page_label)
                .await
                .context(SinkSnafu)?;
            if exists {
                existing.insert(page);
            }
        }
        resume.store(existing.clone());
        Ok(existing)
    }

    /// Fetch one page within the time budget, retrying a transient
    /// failure once before handing the error to the unit retry loop.
    async fn fetch_page(&self, unit: &WorkUnit, page: u32) -> Result<Vec<Value>, ExtractError> {
        let result = match self.try_page(unit, page).await {
            Err(error) if error.is_transient() => {
                warn!(unit = %unit.key, page, %error, "Page fetch failed, retrying once");
                self.try_page(unit, page).await
            }
            result => result,
        };

        let records = result.context(SourceSnafu)?;
        emit!(PagesFetched { count: 1 });
        emit!(RecordsExtracted {
            count: records.len() as u64
        });
        Ok(records)
    }

    async fn try_page(
        &self,
        unit: &WorkUnit,
        page: u32,
    ) -> Result<Vec<Value>, crate::error::SourceError> {
        timeout(
            self.page_timeout,
            self.client.query(
                &unit.table,
                unit.filter.as_deref(),
                unit.projection.as_deref(),
                page,
            ),
        )
        .await
        .unwrap_or_else(|_| {
            TimeoutSnafu {
                table: unit.table.clone(),
            }
            .fail()
        })
    }

    /// A short tally usually means records changed mid-fetch. One fresh
    /// count decides whether the drift is real.
    async fn verify_tally(
        &self,
        unit: &WorkUnit,
        retrieved: u64,
        expected: u64,
    ) -> Result<(), ExtractError> {
        if retrieved == expected {
            return Ok(());
        }

        warn!(
            unit = %unit.key,
            retrieved,
            expected,
            "Tally differs from reconciled count, re-verifying"
        );
        let fresh = self
            .client
            .count(&unit.table, unit.filter.as_deref())
            .await
            .context(SourceSnafu)?;

        ensure!(
            retrieved >= fresh,
            CountMismatchSnafu {
                table: unit.table.clone(),
                retrieved,
                expected: fresh,
            }
        );
        Ok(())
    }
}
