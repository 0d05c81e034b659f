//! Filter expression composition.
//!
//! Renders boundary values into the source's FIQL-like filter syntax
//! (`field=operator=value`, `;` for conjunction). Pure functions: the
//! rendered expression feeds artifact key derivation, so identical inputs
//! must produce byte-identical output.

use super::Boundary;

/// Compose a lower-bounded filter expression, with an optional upper
/// bound rendered as a conjunction.
pub fn compose(selector: &str, value: &Boundary, max_value: Option<&Boundary>) -> String {
    match max_value {
        Some(max) => compose_range(selector, value, max),
        None => format!("{selector}=ge={value}"),
    }
}

/// Compose an inclusive range constraint as a conjunction of a lower- and
/// upper-bound clause.
pub fn compose_range(selector: &str, low: &Boundary, high: &Boundary) -> String {
    format!("{selector}=ge={low};{selector}=le={high}")
}

/// Conjoin two filter expressions.
pub fn conjoin(left: &str, right: &str) -> String {
    format!("{left};{right}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_single_bound() {
        let expr = compose("dcid", &Boundary::Number(5000), None);
        assert_eq!(expr, "dcid=ge=5000");
    }

    #[test]
    fn test_range() {
        let expr = compose(
            "id",
            &Boundary::Number(1001),
            Some(&Boundary::Number(2000)),
        );
        assert_eq!(expr, "id=ge=1001;id=le=2000");
    }

    #[test]
    fn test_date_rendering() {
        let low = Boundary::Date(NaiveDate::from_ymd_opt(2023, 7, 1).unwrap());
        let high = Boundary::Date(NaiveDate::from_ymd_opt(2024, 2, 1).unwrap());
        let expr = compose_range("whenmodified", &low, &high);
        assert_eq!(expr, "whenmodified=ge=2023-07-01;whenmodified=le=2024-02-01");
    }

    #[test]
    fn test_deterministic() {
        let low = Boundary::Number(42);
        let first = compose("students.dcid", &low, None);
        for _ in 0..10 {
            assert_eq!(compose("students.dcid", &low, None), first);
        }
    }

    #[test]
    fn test_conjoin() {
        assert_eq!(
            conjoin("yearid=ge=33", "whenmodified=gt=2024-01-15"),
            "yearid=ge=33;whenmodified=gt=2024-01-15"
        );
    }
}
