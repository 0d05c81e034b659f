//! Constraint resolution: selector + anchor -> step size and stop value.
//!
//! The resolver decides how historical backfills are chunked and when
//! they terminate, and estimates an upper identifier bound when a resync
//! has no explicit maximum.

use snafu::prelude::*;

use super::{Anchor, Boundary, SelectorKind, classify};
use crate::error::{FilterError, InvalidValueSnafu};

/// Fixed chunk for identifier-family backfills.
const IDENTIFIER_STEP: u64 = 10_000;

/// Days per chunk for date-family backfills.
const TEMPORAL_STEP_DAYS: u64 = 30;

/// Applied to a table's reported count before estimating an identifier
/// upper bound. Unfiltered counts undercount because soft-deleted and
/// out-of-range records still occupy key space.
pub const SAFETY_FACTOR: f64 = 1.5;

/// Derived batching rule for one selector: never stored, recomputed per
/// plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConstraintRule {
    /// Chunk size: records for numeric selectors, days for temporal ones.
    pub step_size: u64,
    /// Where a historical walk terminates.
    pub stop_value: Boundary,
}

/// Resolves selectors against a run's anchor.
#[derive(Debug, Clone, Copy)]
pub struct Resolver {
    anchor: Anchor,
    /// Configured override for the identifier chunk size.
    step_override: Option<u64>,
}

impl Resolver {
    pub fn new(anchor: Anchor, step_override: Option<u64>) -> Self {
        Self {
            anchor,
            step_override,
        }
    }

    pub fn anchor(&self) -> &Anchor {
        &self.anchor
    }

    /// Resolve a selector into its constraint rule.
    ///
    /// Identifier selectors chunk in fixed record ranges down to zero.
    /// Temporal selectors chunk in fixed day ranges down to the anchor
    /// school year's start. The school-year selector steps one year at a
    /// time down to the current anchor year.
    pub fn resolve(&self, selector: &str) -> Result<ConstraintRule, FilterError> {
        let kind = classify(selector)?;
        Ok(match kind {
            SelectorKind::Identifier => ConstraintRule {
                step_size: self.step_override.unwrap_or(IDENTIFIER_STEP),
                stop_value: Boundary::Number(0),
            },
            SelectorKind::SchoolYear => ConstraintRule {
                step_size: 1,
                stop_value: Boundary::Number(self.anchor.year_id as i64),
            },
            SelectorKind::Temporal => ConstraintRule {
                step_size: TEMPORAL_STEP_DAYS,
                stop_value: Boundary::Date(self.anchor.year_start()),
            },
        })
    }

    /// Parse a configured scalar into a boundary of the selector's kind.
    pub fn parse_value(
        &self,
        selector: &str,
        raw: &crate::config::FilterValue,
    ) -> Result<Boundary, FilterError> {
        let kind = classify(selector)?;
        match (kind, raw) {
            (SelectorKind::Identifier | SelectorKind::SchoolYear, v) => {
                let text = v.to_string();
                let n = text.parse::<i64>().ok().context(InvalidValueSnafu {
                    selector,
                    value: text.clone(),
                })?;
                Ok(Boundary::Number(n))
            }
            (SelectorKind::Temporal, v) => {
                let text = v.to_string();
                if text == "today" {
                    return Ok(Boundary::Date(self.anchor.today));
                }
                let date = text
                    .parse::<chrono::NaiveDate>()
                    .ok()
                    .context(InvalidValueSnafu {
                        selector,
                        value: text.clone(),
                    })?;
                Ok(Boundary::Date(date))
            }
        }
    }

    /// Estimate an identifier upper bound for a resync with no explicit
    /// maximum.
    ///
    /// Scales the table's reported total by [`SAFETY_FACTOR`] and rounds
    /// up to the nearest power-of-ten-aligned value, so the walk covers
    /// key space the unfiltered count does not see.
    pub fn estimate_max(&self, table_count: u64) -> u64 {
        let scaled = (table_count as f64 * SAFETY_FACTOR).ceil() as u64;
        round_up_pow10(scaled)
    }
}

/// Round up to a multiple of the largest power of ten at or below `v`.
///
/// 1500 -> 2000, 45000 -> 50000, 7 -> 7.
pub fn round_up_pow10(v: u64) -> u64 {
    if v < 10 {
        return v;
    }
    let mut magnitude = 1u64;
    while magnitude * 10 <= v {
        magnitude *= 10;
    }
    v.div_ceil(magnitude) * magnitude
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FilterValue;
    use chrono::NaiveDate;

    fn resolver() -> Resolver {
        Resolver::new(
            Anchor {
                year_id: 33,
                today: NaiveDate::from_ymd_opt(2024, 2, 1).unwrap(),
            },
            None,
        )
    }

    #[test]
    fn test_identifier_rule() {
        let rule = resolver().resolve("dcid").unwrap();
        assert_eq!(rule.step_size, IDENTIFIER_STEP);
        assert_eq!(rule.stop_value, Boundary::Number(0));
    }

    #[test]
    fn test_identifier_rule_with_override() {
        let r = Resolver::new(
            Anchor {
                year_id: 33,
                today: NaiveDate::from_ymd_opt(2024, 2, 1).unwrap(),
            },
            Some(1000),
        );
        assert_eq!(r.resolve("id").unwrap().step_size, 1000);
    }

    #[test]
    fn test_school_year_rule_stops_at_anchor() {
        let rule = resolver().resolve("yearid").unwrap();
        assert_eq!(rule.step_size, 1);
        assert_eq!(rule.stop_value, Boundary::Number(33));
    }

    #[test]
    fn test_temporal_rule_stops_at_year_start() {
        let rule = resolver().resolve("whenmodified").unwrap();
        assert_eq!(rule.step_size, TEMPORAL_STEP_DAYS);
        assert_eq!(
            rule.stop_value,
            Boundary::Date(NaiveDate::from_ymd_opt(2023, 7, 1).unwrap())
        );
    }

    #[test]
    fn test_unknown_selector_is_config_error() {
        assert!(matches!(
            resolver().resolve("nonsense"),
            Err(FilterError::UnknownSelector { .. })
        ));
    }

    #[test]
    fn test_parse_today_literal() {
        let b = resolver()
            .parse_value("entry_date", &FilterValue::Text("today".into()))
            .unwrap();
        assert_eq!(
            b,
            Boundary::Date(NaiveDate::from_ymd_opt(2024, 2, 1).unwrap())
        );
    }

    #[test]
    fn test_parse_invalid_number() {
        let err = resolver()
            .parse_value("dcid", &FilterValue::Text("abc".into()))
            .unwrap_err();
        assert!(matches!(err, FilterError::InvalidValue { .. }));
    }

    #[test]
    fn test_estimate_max_scales_and_rounds() {
        // 1000 * 1.5 = 1500, rounded up to the nearest thousand.
        assert_eq!(resolver().estimate_max(1000), 2000);
        // 30000 * 1.5 = 45000, rounded up to the nearest ten thousand.
        assert_eq!(resolver().estimate_max(30_000), 50_000);
        assert!(resolver().estimate_max(1000) as f64 >= 1000.0 * SAFETY_FACTOR);
    }

    #[test]
    fn test_round_up_pow10() {
        assert_eq!(round_up_pow10(1500), 2000);
        assert_eq!(round_up_pow10(45_000), 50_000);
        assert_eq!(round_up_pow10(99), 100);
        assert_eq!(round_up_pow10(100), 100);
        assert_eq!(round_up_pow10(7), 7);
    }
}
