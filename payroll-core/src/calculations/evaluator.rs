//! Bracket evaluation.
//!
//! `tax = round2(base × rate − deduction)` for the bracket containing the
//! base, clamped at zero and, when the table carries one, at its
//! contribution ceiling. Flat-rate tables are the single-bracket case.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::common::{clamp_non_negative, round_half_up, round_rate};
use crate::models::BracketTable;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Evaluation {
    pub tax_amount: Decimal,
    /// `tax_amount / base`, six places; zero for a zero base.
    pub effective_rate: Decimal,
    pub bracket_index: u32,
    /// The ceiling cut the raw tax down.
    pub ceiling_applied: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithholdingEvaluation {
    /// Base after the dependent deduction, never negative.
    pub adjusted_base: Decimal,
    pub evaluation: Evaluation,
}

/// Applies `table` to `base`.
///
/// The bracket whose `[base_from, base_to)` range holds the base is used;
/// a base above every bound falls into the last bracket. Callers clamp
/// negative bases before calling, and a negative base here is treated as
/// zero.
///
/// # Arguments
///
/// * `base` - The contribution or withholding base
/// * `table` - The table resolved for the reference date
///
/// # Returns
///
/// An [`Evaluation`] with the rounded tax, the bracket used and whether the
/// table's contribution ceiling cut the tax down. An empty table yields a
/// zero evaluation with `bracket_index` 0.
///
/// # Examples
///
/// ```
/// use chrono::NaiveDate;
/// use rust_decimal_macros::dec;
/// use payroll_core::calculations::evaluate;
/// use payroll_core::{Bracket, BracketTable, ContributorKind};
///
/// let flat = BracketTable {
///     id: 1,
///     kind: ContributorKind::FlatRate,
///     validity_start: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
///     validity_end: None,
///     dependent_deduction: dec!(0),
///     brackets: vec![Bracket {
///         index: 1,
///         base_from: dec!(0),
///         base_to: None,
///         rate: dec!(0.11),
///         deduction: dec!(0),
///         contribution_ceiling: Some(dec!(550.00)),
///     }],
/// };
///
/// assert_eq!(evaluate(dec!(2000.00), &flat).tax_amount, dec!(220.00));
///
/// let capped = evaluate(dec!(7000.00), &flat);
/// assert_eq!(capped.tax_amount, dec!(550.00));
/// assert!(capped.ceiling_applied);
/// ```
pub fn evaluate(
    base: Decimal,
    table: &BracketTable,
) -> Evaluation {
    let base = base.max(Decimal::ZERO);

    let Some(bracket) = table.bracket_for(base) else {
        return Evaluation {
            tax_amount: Decimal::ZERO,
            effective_rate: Decimal::ZERO,
            bracket_index: 0,
            ceiling_applied: false,
        };
    };

    let (mut tax, _) = clamp_non_negative(round_half_up(base * bracket.rate - bracket.deduction));

    let mut ceiling_applied = false;
    if let Some(ceiling) = table.contribution_ceiling() {
        if tax > ceiling {
            tax = ceiling;
            ceiling_applied = true;
        }
    }

    let effective_rate = if base.is_zero() {
        Decimal::ZERO
    } else {
        round_rate(tax / base)
    };

    Evaluation {
        tax_amount: tax,
        effective_rate,
        bracket_index: bracket.index,
        ceiling_applied,
    }
}

/// Subtracts `dependents × table.dependent_deduction` from `base`, clamps
/// at zero, then evaluates.
///
/// # Arguments
///
/// * `base` - The withholding base before the dependent deduction
/// * `dependents` - Dependents declared by the physician
/// * `table` - A withholding table; its `dependent_deduction` is the
///   per-dependent amount
///
/// # Returns
///
/// The base actually evaluated together with its [`Evaluation`].
///
/// # Examples
///
/// ```
/// use chrono::NaiveDate;
/// use rust_decimal_macros::dec;
/// use payroll_core::calculations::evaluate_withholding;
/// use payroll_core::{Bracket, BracketTable, ContributorKind};
///
/// let table = BracketTable {
///     id: 3,
///     kind: ContributorKind::Withholding,
///     validity_start: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
///     validity_end: None,
///     dependent_deduction: dec!(189.59),
///     brackets: vec![Bracket {
///         index: 1,
///         base_from: dec!(0),
///         base_to: None,
///         rate: dec!(0.10),
///         deduction: dec!(0),
///         contribution_ceiling: None,
///     }],
/// };
///
/// let result = evaluate_withholding(dec!(3000.00), 2, &table);
///
/// assert_eq!(result.adjusted_base, dec!(2620.82));
/// assert_eq!(result.evaluation.tax_amount, dec!(262.08));
/// assert_eq!(evaluate_withholding(dec!(100.00), 2, &table).adjusted_base, dec!(0));
/// ```
pub fn evaluate_withholding(
    base: Decimal,
    dependents: u32,
    table: &BracketTable,
) -> WithholdingEvaluation {
    let deduction = Decimal::from(dependents) * table.dependent_deduction;
    let (adjusted_base, _) = clamp_non_negative(round_half_up(base - deduction));

    WithholdingEvaluation {
        evaluation: evaluate(adjusted_base, table),
        adjusted_base,
    }
}
