//! Filter boundary types and selector classification.
//!
//! A selector names the field (and implicitly the strategy) used to build
//! a filter boundary: an auto-incrementing identifier, the school-year
//! identifier, or a date/change-tracking column. The resolver and
//! composer submodules turn selectors plus a temporal anchor into the
//! source's filter-expression syntax.

mod compose;
mod resolver;

pub use compose::{compose, compose_range, conjoin};
pub use resolver::{ConstraintRule, Resolver, SAFETY_FACTOR, round_up_pow10};

use chrono::NaiveDate;

use crate::error::{FilterError, UnknownSelectorSnafu};

/// Fields treated as change-tracking timestamps even though their names
/// lack a `date` suffix.
const TIMESTAMP_FIELDS: &[&str] = &["whenmodified", "whencreated", "transaction_date"];

/// How a selector's boundary values behave.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectorKind {
    /// Numeric-monotonic identifier column (auto-incrementing key).
    Identifier,
    /// The school-year identifier itself.
    SchoolYear,
    /// A date or change-tracking timestamp column.
    Temporal,
}

/// Classify a selector name into its constraint family.
///
/// Selectors may be qualified with a table prefix ("students.dcid"); only
/// the final segment is classified. Unknown names are configuration
/// errors and abort the unit without retry.
pub fn classify(selector: &str) -> Result<SelectorKind, FilterError> {
    let field = selector.rsplit('.').next().unwrap_or(selector);
    let field = field.to_ascii_lowercase();

    if field == "yearid" {
        return Ok(SelectorKind::SchoolYear);
    }
    if TIMESTAMP_FIELDS.contains(&field.as_str()) || field.ends_with("date") {
        return Ok(SelectorKind::Temporal);
    }
    if field.ends_with("id") {
        return Ok(SelectorKind::Identifier);
    }

    UnknownSelectorSnafu { selector }.fail()
}

/// A concrete filter boundary value.
///
/// Rendering is deterministic: dates always use ISO `%Y-%m-%d`, numbers
/// their decimal form, so identical inputs compose byte-identical
/// expressions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Boundary {
    Number(i64),
    Date(NaiveDate),
}

impl std::fmt::Display for Boundary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Boundary::Number(n) => write!(f, "{n}"),
            Boundary::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
        }
    }
}

/// The reference temporal anchor for a run.
///
/// Passed explicitly into the planner and resolver rather than read from
/// ambient process state, so planning stays deterministic under test.
#[derive(Debug, Clone, Copy)]
pub struct Anchor {
    /// School-year identifier (e.g. 33 for the 2023-2024 school year).
    pub year_id: i32,
    /// Current date in the reference time zone.
    pub today: NaiveDate,
}

impl Anchor {
    /// First day of the anchor school year.
    ///
    /// Year identifiers are offsets from 1990; the school year starts on
    /// July 1 of the first calendar year.
    pub fn year_start(&self) -> NaiveDate {
        NaiveDate::from_ymd_opt(1990 + self.year_id, 7, 1)
            .expect("July 1 exists in every year")
    }

    /// Default boundary value for a selector when configuration supplies
    /// none.
    pub fn default_value(&self, kind: SelectorKind) -> Boundary {
        match kind {
            // From the first possible key: an unfiltered lower bound.
            SelectorKind::Identifier => Boundary::Number(1),
            SelectorKind::SchoolYear => Boundary::Number(self.year_id as i64),
            SelectorKind::Temporal => Boundary::Date(self.year_start()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_selectors() {
        assert_eq!(classify("dcid").unwrap(), SelectorKind::Identifier);
        assert_eq!(classify("students.id").unwrap(), SelectorKind::Identifier);
        assert_eq!(classify("assignmentid").unwrap(), SelectorKind::Identifier);
        assert_eq!(classify("yearid").unwrap(), SelectorKind::SchoolYear);
        assert_eq!(classify("entry_date").unwrap(), SelectorKind::Temporal);
        assert_eq!(classify("whenmodified").unwrap(), SelectorKind::Temporal);
        assert_eq!(
            classify("transaction_date").unwrap(),
            SelectorKind::Temporal
        );
    }

    #[test]
    fn test_classify_unknown_selector() {
        let err = classify("grade_level").unwrap_err();
        assert!(matches!(err, FilterError::UnknownSelector { .. }));
    }

    #[test]
    fn test_anchor_year_start() {
        let anchor = Anchor {
            year_id: 33,
            today: NaiveDate::from_ymd_opt(2024, 2, 1).unwrap(),
        };
        assert_eq!(
            anchor.year_start(),
            NaiveDate::from_ymd_opt(2023, 7, 1).unwrap()
        );
    }

    #[test]
    fn test_default_values() {
        let anchor = Anchor {
            year_id: 33,
            today: NaiveDate::from_ymd_opt(2024, 2, 1).unwrap(),
        };
        assert_eq!(
            anchor.default_value(SelectorKind::SchoolYear),
            Boundary::Number(33)
        );
        assert_eq!(
            anchor.default_value(SelectorKind::Temporal),
            Boundary::Date(NaiveDate::from_ymd_opt(2023, 7, 1).unwrap())
        );
    }
}
