//! Bracket table resolution by vigência.
//!
//! A table applies to a date when the date falls in its half-open validity
//! interval `[validity_start, validity_end)`. Exactly one table of a kind
//! must match; anything else is a data problem the caller cannot recover
//! from for that computation.

use chrono::NaiveDate;
use tracing::debug;

use super::error::ComputationError;
use crate::models::{BracketTable, ContributorKind};

/// Returns the single table of `kind` whose vigência covers `date`.
///
/// # Errors
///
/// * [`ComputationError::MissingTaxTable`] when no table covers the date.
/// * [`ComputationError::AmbiguousTaxTable`] when several tables cover the
///   date, or when more than one table of the kind is still open.
/// * [`ComputationError::InvalidBracketSet`] when the matching table breaks
///   a bracket invariant.
pub fn resolve(
    tables: &[BracketTable],
    date: NaiveDate,
    kind: ContributorKind,
) -> Result<&BracketTable, ComputationError> {
    let of_kind = || tables.iter().filter(move |t| t.kind == kind);

    let open: Vec<i64> = of_kind().filter(|t| t.is_open()).map(|t| t.id).collect();
    if open.len() > 1 {
        return Err(ComputationError::AmbiguousTaxTable {
            kind,
            date,
            ids: open,
        });
    }

    let mut matching = of_kind().filter(|t| t.covers(date));
    let table = matching
        .next()
        .ok_or(ComputationError::MissingTaxTable { kind, date })?;

    let others: Vec<i64> = matching.map(|t| t.id).collect();
    if !others.is_empty() {
        let mut ids = vec![table.id];
        ids.extend(others);
        return Err(ComputationError::AmbiguousTaxTable { kind, date, ids });
    }

    table
        .validate()
        .map_err(|source| ComputationError::InvalidBracketSet {
            table_id: table.id,
            source,
        })?;

    debug!(table_id = table.id, kind = kind.as_str(), %date, "resolved bracket table");
    Ok(table)
}

/// Every bracket table known to a run, shared read-only across physicians.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BracketTableSet {
    tables: Vec<BracketTable>,
}

impl BracketTableSet {
    pub fn new(tables: Vec<BracketTable>) -> Self {
        Self { tables }
    }

    pub fn resolve(
        &self,
        date: NaiveDate,
        kind: ContributorKind,
    ) -> Result<&BracketTable, ComputationError> {
        resolve(&self.tables, date, kind)
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    use super::*;
    use crate::models::{Bracket, BracketSetError};

    fn date(
        y: i32,
        m: u32,
        d: u32,
    ) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn flat_table(
        id: i64,
        start: NaiveDate,
        end: Option<NaiveDate>,
    ) -> BracketTable {
        BracketTable {
            id,
            kind: ContributorKind::FlatRate,
            validity_start: start,
            validity_end: end,
            dependent_deduction: Decimal::ZERO,
            brackets: vec![Bracket {
                index: 1,
                base_from: dec!(0),
                base_to: None,
                rate: dec!(0.11),
                deduction: dec!(0),
                contribution_ceiling: None,
            }],
        }
    }

    #[test]
    fn picks_the_table_covering_the_date() {
        let tables = vec![
            flat_table(1, date(2023, 1, 1), Some(date(2024, 1, 1))),
            flat_table(2, date(2024, 1, 1), None),
        ];

        assert_eq!(resolve(&tables, date(2023, 12, 31), ContributorKind::FlatRate).unwrap().id, 1);
        assert_eq!(resolve(&tables, date(2024, 1, 1), ContributorKind::FlatRate).unwrap().id, 2);
    }

    #[test]
    fn validity_end_is_exclusive() {
        let tables = vec![flat_table(1, date(2023, 1, 1), Some(date(2024, 1, 1)))];

        let err = resolve(&tables, date(2024, 1, 1), ContributorKind::FlatRate).unwrap_err();

        assert_eq!(
            err,
            ComputationError::MissingTaxTable {
                kind: ContributorKind::FlatRate,
                date: date(2024, 1, 1),
            }
        );
    }

    #[test]
    fn tables_of_other_kinds_are_ignored() {
        let tables = vec![flat_table(1, date(2023, 1, 1), None)];

        let err = resolve(&tables, date(2024, 5, 1), ContributorKind::Withholding).unwrap_err();

        assert!(matches!(err, ComputationError::MissingTaxTable { .. }));
    }

    #[test]
    fn overlapping_tables_are_ambiguous() {
        let tables = vec![
            flat_table(1, date(2023, 1, 1), Some(date(2024, 6, 1))),
            flat_table(2, date(2024, 1, 1), None),
        ];

        let err = resolve(&tables, date(2024, 3, 1), ContributorKind::FlatRate).unwrap_err();

        assert_eq!(
            err,
            ComputationError::AmbiguousTaxTable {
                kind: ContributorKind::FlatRate,
                date: date(2024, 3, 1),
                ids: vec![1, 2],
            }
        );
    }

    #[test]
    fn two_open_tables_are_ambiguous_even_when_only_one_covers() {
        let tables = vec![
            flat_table(1, date(2023, 1, 1), None),
            flat_table(2, date(2025, 1, 1), None),
        ];

        let err = resolve(&tables, date(2023, 6, 1), ContributorKind::FlatRate).unwrap_err();

        assert!(matches!(err, ComputationError::AmbiguousTaxTable { ids, .. } if ids == vec![1, 2]));
    }

    #[test]
    fn invalid_table_is_reported_with_its_id() {
        let mut table = flat_table(7, date(2024, 1, 1), None);
        table.brackets[0].deduction = dec!(10);

        let err = resolve(&[table], date(2024, 2, 1), ContributorKind::FlatRate).unwrap_err();

        assert_eq!(
            err,
            ComputationError::InvalidBracketSet {
                table_id: 7,
                source: BracketSetError::FlatRateShape,
            }
        );
    }

    #[test]
    fn table_set_delegates_to_resolve() {
        let set = BracketTableSet::new(vec![flat_table(3, date(2024, 1, 1), None)]);

        assert_eq!(set.len(), 1);
        assert_eq!(set.resolve(date(2024, 8, 15), ContributorKind::FlatRate).unwrap().id, 3);
    }
}
