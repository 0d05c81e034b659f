//! Extraction planning: table configuration -> work units.
//!
//! The planner expands each configured table into one or more immutable
//! [`WorkUnit`]s: a single unfiltered pull, one unit per literal or
//! selector-derived filter, or a descending sequence of historical
//! backfill chunks when a query requests a resync. Planning is the only
//! phase allowed to branch on query shape; execution consumes a flat work
//! queue.

use snafu::prelude::*;
use tracing::{debug, info};

use crate::config::{FilterValue, QueryFilter, TableSpec};
use crate::error::{ExtractError, FilterSnafu, SourceSnafu};
use crate::filter::{Anchor, Boundary, ConstraintRule, Resolver, classify, compose, compose_range};
use crate::source::SourceClient;

/// Literal query value that switches a table into historical-backfill
/// mode.
const RESYNC: &str = "resync";

/// One planned, independently retryable extraction task.
///
/// Immutable once emitted; consumed exactly once by the fetch pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkUnit {
    /// Deterministic mapping key: `{table}_q_{i}` or `{table}_hq_{i}`.
    pub key: String,
    /// Source table name.
    pub table: String,
    /// Field projection, if any.
    pub projection: Option<String>,
    /// Filter expression, or `None` for an unfiltered pull.
    pub filter: Option<String>,
    /// Whether this unit is a historical backfill chunk.
    pub is_historical: bool,
    /// Whether the count reconciler may use the cheap recency probe.
    /// Ad-hoc (literal) filters and historical chunks opt out.
    pub probe_recency: bool,
}

/// Plan every configured table.
///
/// Returns one entry per table so a planning failure (e.g. an unknown
/// selector) stays scoped to its table instead of aborting the run.
pub async fn plan_tables(
    client: &dyn SourceClient,
    tables: &[TableSpec],
    resolver: &Resolver,
) -> Vec<(String, Result<Vec<WorkUnit>, ExtractError>)> {
    let mut plans = Vec::with_capacity(tables.len());
    for table in tables {
        let plan = plan_table(client, table, resolver).await;
        if let Ok(units) = &plan {
            info!(table = %table.name, units = units.len(), "Planned table");
        }
        plans.push((table.name.clone(), plan));
    }
    plans
}

/// Expand a single table specification into work units.
pub async fn plan_table(
    client: &dyn SourceClient,
    spec: &TableSpec,
    resolver: &Resolver,
) -> Result<Vec<WorkUnit>, ExtractError> {
    // No filters configured at all: one unfiltered pull.
    if spec.queries.iter().all(|q| q.q.is_none()) {
        let projection = spec
            .queries
            .first()
            .and_then(|q| q.projection.clone())
            .or_else(|| spec.projection.clone());
        return Ok(vec![WorkUnit {
            key: format!("{}_q_0", spec.name),
            table: spec.name.clone(),
            projection,
            filter: None,
            is_historical: false,
            probe_recency: true,
        }]);
    }

    let mut units = Vec::new();
    let mut query_index = 0usize;
    let mut historical_index = 0usize;

    for query in &spec.queries {
        let projection = query.projection.clone().or_else(|| spec.projection.clone());

        match &query.q {
            None => {
                // A filterless entry among filtered ones still means one
                // unfiltered pull for its projection.
                units.push(WorkUnit {
                    key: format!("{}_q_{}", spec.name, query_index),
                    table: spec.name.clone(),
                    projection,
                    filter: None,
                    is_historical: false,
                    probe_recency: true,
                });
                query_index += 1;
            }
            Some(QueryFilter::Literal(expression)) => {
                units.push(WorkUnit {
                    key: format!("{}_q_{}", spec.name, query_index),
                    table: spec.name.clone(),
                    projection,
                    filter: Some(expression.clone()),
                    is_historical: false,
                    probe_recency: false,
                });
                query_index += 1;
            }
            Some(QueryFilter::Structured {
                selector,
                value,
                max_value,
            }) => {
                if is_resync(value.as_ref()) {
                    let chunks = plan_resync(
                        client,
                        &spec.name,
                        selector,
                        max_value.as_ref(),
                        resolver,
                    )
                    .await?;
                    for (low, high) in chunks {
                        units.push(WorkUnit {
                            key: format!("{}_hq_{}", spec.name, historical_index),
                            table: spec.name.clone(),
                            projection: projection.clone(),
                            filter: Some(compose_range(selector, &low, &high)),
                            is_historical: true,
                            probe_recency: false,
                        });
                        historical_index += 1;
                    }
                } else {
                    let kind = classify(selector).context(FilterSnafu)?;
                    let low = match value {
                        Some(raw) => resolver.parse_value(selector, raw).context(FilterSnafu)?,
                        None => resolver.anchor().default_value(kind),
                    };
                    let high = max_value
                        .as_ref()
                        .map(|raw| resolver.parse_value(selector, raw))
                        .transpose()
                        .context(FilterSnafu)?;
                    units.push(WorkUnit {
                        key: format!("{}_q_{}", spec.name, query_index),
                        table: spec.name.clone(),
                        projection,
                        filter: Some(compose(selector, &low, high.as_ref())),
                        is_historical: false,
                        probe_recency: true,
                    });
                    query_index += 1;
                }
            }
        }
    }

    Ok(units)
}

fn is_resync(value: Option<&FilterValue>) -> bool {
    matches!(value, Some(FilterValue::Text(s)) if s == RESYNC)
}

/// Plan the historical chunks for a resync query.
///
/// The maximum boundary comes from configuration when present; otherwise
/// identifier selectors estimate one from the table's full count (the
/// single planning-time network call) and temporal selectors start at the
/// anchor's current date.
async fn plan_resync(
    client: &dyn SourceClient,
    table: &str,
    selector: &str,
    max_value: Option<&FilterValue>,
    resolver: &Resolver,
) -> Result<Vec<(Boundary, Boundary)>, ExtractError> {
    let kind = classify(selector).context(FilterSnafu)?;
    let rule = resolver.resolve(selector).context(FilterSnafu)?;

    let max = match max_value {
        // Explicit max_value always wins over the heuristic estimate.
        Some(raw) => resolver.parse_value(selector, raw).context(FilterSnafu)?,
        None => match kind {
            crate::filter::SelectorKind::Identifier => {
                let total = client.count(table, None).await.context(SourceSnafu)?;
                let estimated = resolver.estimate_max(total);
                debug!(table, total, estimated, "Estimated resync upper bound");
                Boundary::Number(estimated as i64)
            }
            crate::filter::SelectorKind::SchoolYear => {
                Boundary::Number(resolver.anchor().year_id as i64)
            }
            crate::filter::SelectorKind::Temporal => Boundary::Date(resolver.anchor().today),
        },
    };

    Ok(historical_chunks(&rule, max))
}

/// Slide an inclusive window from `max` down to the rule's stop value.
///
/// Chunks are produced most-recent-first; an interrupted resync resumes
/// with the most valuable ranges already materialized.
pub fn historical_chunks(rule: &ConstraintRule, max: Boundary) -> Vec<(Boundary, Boundary)> {
    let mut chunks = Vec::new();

    match (max, rule.stop_value) {
        (Boundary::Number(max), Boundary::Number(stop)) => {
            let step = rule.step_size as i64;
            let mut high = max;
            while high > stop {
                let low = std::cmp::max(stop + 1, high - step + 1);
                chunks.push((Boundary::Number(low), Boundary::Number(high)));
                high = low - 1;
            }
        }
        (Boundary::Date(max), Boundary::Date(stop)) => {
            let step = chrono::Days::new(rule.step_size - 1);
            let mut high = max;
            while high >= stop {
                let low = std::cmp::max(stop, high.checked_sub_days(step).unwrap_or(stop));
                chunks.push((Boundary::Date(low), Boundary::Date(high)));
                match low.pred_opt() {
                    Some(prev) if low > stop => high = prev,
                    _ => break,
                }
            }
        }
        // Mixed kinds cannot occur: rule and max derive from one selector.
        _ => {}
    }

    chunks
}

/// Build the run anchor from configuration values.
pub fn build_anchor(year_id: i32, utc_offset_hours: i8) -> Anchor {
    let offset_hours = i32::from(utc_offset_hours).clamp(-23, 23);
    let offset =
        chrono::FixedOffset::east_opt(offset_hours * 3600).expect("clamped offset is in range");
    let today = chrono::Utc::now().with_timezone(&offset).date_naive();
    Anchor { year_id, today }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn anchor() -> Anchor {
        Anchor {
            year_id: 33,
            today: NaiveDate::from_ymd_opt(2024, 2, 1).unwrap(),
        }
    }

    #[test]
    fn test_numeric_chunks_descend_and_cover() {
        let rule = ConstraintRule {
            step_size: 1000,
            stop_value: Boundary::Number(0),
        };
        let chunks = historical_chunks(&rule, Boundary::Number(2000));
        assert_eq!(
            chunks,
            vec![
                (Boundary::Number(1001), Boundary::Number(2000)),
                (Boundary::Number(1), Boundary::Number(1000)),
            ]
        );
    }

    #[test]
    fn test_numeric_chunks_partial_tail() {
        let rule = ConstraintRule {
            step_size: 1000,
            stop_value: Boundary::Number(0),
        };
        let chunks = historical_chunks(&rule, Boundary::Number(2500));
        assert_eq!(chunks.len(), 3);
        assert_eq!(
            chunks[0],
            (Boundary::Number(1501), Boundary::Number(2500))
        );
        assert_eq!(chunks[2], (Boundary::Number(1), Boundary::Number(500)));
    }

    #[test]
    fn test_date_chunks_stop_at_boundary() {
        let rule = ConstraintRule {
            step_size: 30,
            stop_value: Boundary::Date(NaiveDate::from_ymd_opt(2023, 12, 15).unwrap()),
        };
        let chunks =
            historical_chunks(&rule, Boundary::Date(NaiveDate::from_ymd_opt(2024, 2, 1).unwrap()));

        // Descending, and the final chunk is clamped to the stop date.
        assert!(chunks.len() >= 2);
        for window in chunks.windows(2) {
            assert!(window[0].1 > window[1].1);
        }
        let (last_low, _) = chunks.last().unwrap();
        assert_eq!(
            *last_low,
            Boundary::Date(NaiveDate::from_ymd_opt(2023, 12, 15).unwrap())
        );
    }

    #[test]
    fn test_chunks_strictly_descending() {
        let rule = ConstraintRule {
            step_size: 10_000,
            stop_value: Boundary::Number(0),
        };
        let chunks = historical_chunks(&rule, Boundary::Number(50_000));
        assert_eq!(chunks.len(), 5);
        for window in chunks.windows(2) {
            assert!(window[0].0 > window[1].1);
        }
    }

    #[test]
    fn test_anchor_default_unused_fields() {
        // Ensure helper anchor is wired the way planner tests expect.
        assert_eq!(anchor().year_id, 33);
    }
}
