//! Count reconciliation: decide whether a work unit has anything to
//! fetch, and how many pages it spans.
//!
//! For scheduled incremental units the reconciler first runs a cheap
//! recency probe: a count constrained to records modified since the last
//! successful run. A zero probe short-circuits the unit without paying
//! for the full count. Sources that reject the change-tracking field
//! degrade to "assume something changed".

use chrono::{DateTime, Utc};
use snafu::prelude::*;
use tracing::debug;

use crate::error::{ExtractError, SourceError, SourceSnafu};
use crate::filter::conjoin;
use crate::plan::WorkUnit;
use crate::source::SourceClient;

/// Outcome of reconciling a work unit against the source's counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciliation {
    /// The unit matches no records (or nothing changed since the last
    /// run). Terminal; nothing is fetched or materialized.
    NoMatch,
    /// The unit matches `count` records spanning `pages` pages.
    Matched { count: u64, pages: u32 },
}

/// Resolves a work unit's authoritative record count.
pub struct Reconciler<'a> {
    client: &'a dyn SourceClient,
    recency_field: &'a str,
    last_run: Option<DateTime<Utc>>,
}

impl<'a> Reconciler<'a> {
    pub fn new(
        client: &'a dyn SourceClient,
        recency_field: &'a str,
        last_run: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            client,
            recency_field,
            last_run,
        }
    }

    /// Reconcile one unit. Errors propagate to the unit retry loop.
    pub async fn reconcile(&self, unit: &WorkUnit) -> Result<Reconciliation, ExtractError> {
        if unit.probe_recency {
            if let Some(last_run) = self.last_run {
                if let Some(0) = self.probe(unit, last_run).await? {
                    debug!(unit = %unit.key, "Nothing changed since last run");
                    return Ok(Reconciliation::NoMatch);
                }
            }
        }

        let count = self
            .client
            .count(&unit.table, unit.filter.as_deref())
            .await
            .context(SourceSnafu)?;
        if count == 0 {
            return Ok(Reconciliation::NoMatch);
        }

        let page_size = u64::from(self.client.max_page_size().max(1));
        let pages = count.div_ceil(page_size) as u32;
        debug!(unit = %unit.key, count, pages, "Reconciled unit");

        Ok(Reconciliation::Matched { count, pages })
    }

    /// Count records modified since `last_run`. Returns `None` when the
    /// source does not track the recency field for this table.
    async fn probe(
        &self,
        unit: &WorkUnit,
        last_run: DateTime<Utc>,
    ) -> Result<Option<u64>, ExtractError> {
        let since = format!(
            "{}=gt={}",
            self.recency_field,
            last_run.date_naive().format("%Y-%m-%d")
        );
        let probe_filter = match unit.filter.as_deref() {
            Some(filter) => conjoin(filter, &since),
            None => since,
        };

        match self.client.count(&unit.table, Some(&probe_filter)).await {
            Ok(count) => Ok(Some(count)),
            Err(SourceError::InvalidField { field }) => {
                debug!(unit = %unit.key, field, "Recency field unsupported, assuming changed");
                Ok(None)
            }
            Err(source) => Err(source).context(SourceSnafu),
        }
    }
}
