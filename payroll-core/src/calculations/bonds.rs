//! Consolidation with income taxed elsewhere.
//!
//! Contribution and withholding already charged by other payers count
//! toward the same tax. Each table is evaluated on the combined internal and
//! external base, and what was withheld elsewhere is subtracted from the
//! result. Two kinds of source are external to a result: active fiscal
//! bonds, and the latest stored result of the other family for the same
//! physician and competência. Sources are taken in aggregate, with no
//! allocation between them.

use rust_decimal::Decimal;
use tracing::{debug, warn};

use super::common::{max, round_half_up};
use super::evaluator::{Evaluation, WithholdingEvaluation, evaluate, evaluate_withholding};
use crate::models::{
    Annotation, AnnotationKind, BracketTable, Competencia, ComputationResult, ExternalFiscalBond,
};

/// Income reported for the same physician and competência outside the
/// result being computed.
#[derive(Debug, Clone, Copy, Default)]
pub struct OtherSources<'a> {
    pub bonds: &'a [ExternalFiscalBond],
    /// Latest stored result of the other family, if any.
    pub other_family: Option<&'a ComputationResult>,
}

impl<'a> OtherSources<'a> {
    /// Active bonds covering `competencia`, ordered by id.
    pub fn applicable_bonds(
        &self,
        physician_id: i64,
        competencia: Competencia,
    ) -> Vec<&'a ExternalFiscalBond> {
        let mut applicable: Vec<&ExternalFiscalBond> = self
            .bonds
            .iter()
            .filter(|b| b.physician_id == physician_id && b.applies_to(competencia))
            .collect();
        applicable.sort_by_key(|b| b.id);
        applicable
    }

    /// The other family's result when it belongs to the same physician and month.
    pub fn other_family_for(
        &self,
        physician_id: i64,
        competencia: Competencia,
    ) -> Option<&'a ComputationResult> {
        self.other_family
            .filter(|r| r.physician_id == physician_id && r.competencia == competencia)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BondConsolidation {
    /// Bonds plus the other family's own contribution base.
    pub external_base: Decimal,
    pub external_withheld: Decimal,
    pub combined_base: Decimal,
    pub combined: Evaluation,
    /// Contribution still due internally, never negative.
    pub contribution_due: Decimal,
    /// Bonds that applied, ordered by id.
    pub bonds: Vec<ExternalFiscalBond>,
    pub annotations: Vec<Annotation>,
}

/// Contribution due on `internal_base` once the other sources are counted
/// toward the table's ceiling.
pub fn consolidate(
    physician_id: i64,
    competencia: Competencia,
    internal_base: Decimal,
    sources: OtherSources<'_>,
    table: &BracketTable,
) -> BondConsolidation {
    let applicable = sources.applicable_bonds(physician_id, competencia);
    let bond_base: Decimal = applicable.iter().map(|b| b.contribution_base).sum();
    let mut external_base = bond_base;
    let mut external_withheld: Decimal = applicable.iter().map(|b| b.contribution_withheld).sum();

    if let Some(other) = sources.other_family_for(physician_id, competencia) {
        debug!(
            physician_id,
            %competencia,
            family = other.family.as_str(),
            version = other.version,
            base = %other.contribution_base,
            withheld = %other.contribution_amount,
            "counting the other family's contribution"
        );
        external_base += other.contribution_base;
        external_withheld += other.contribution_amount;
    }

    let combined_base = internal_base + external_base;
    let combined = evaluate(combined_base, table);
    let contribution_due = max(Decimal::ZERO, combined.tax_amount - external_withheld);

    let mut annotations = Vec::new();

    if combined.ceiling_applied {
        warn!(
            physician_id,
            %competencia,
            %combined_base,
            ceiling = %combined.tax_amount,
            "contribution ceiling reached"
        );
        annotations.push(Annotation::new(
            AnnotationKind::CeilingExceeded,
            format!(
                "combined contribution base {combined_base} exceeds the ceiling; tax clamped"
            ),
            Some(combined.tax_amount),
        ));
    }

    if let Some(ceiling) = table.contribution_ceiling() {
        let bonds_only = evaluate(bond_base, table);
        if applicable.len() > 1 && bonds_only.tax_amount >= ceiling {
            warn!(
                physician_id,
                %competencia,
                bonds = applicable.len(),
                %bond_base,
                "external bonds alone reach the ceiling"
            );
            annotations.push(Annotation::new(
                AnnotationKind::ConsolidationOrder,
                format!(
                    "{} external bonds reach the ceiling on their own; consolidated external-first",
                    applicable.len()
                ),
                Some(bond_base),
            ));
        }
    }

    BondConsolidation {
        external_base,
        external_withheld,
        combined_base,
        combined,
        contribution_due,
        bonds: applicable.into_iter().cloned().collect(),
        annotations,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WithholdingConsolidation {
    /// The internal base less the dependent deduction, never negative.
    pub internal_adjusted_base: Decimal,
    /// Bonds plus the other family's internal withholding base.
    pub external_base: Decimal,
    pub external_withheld: Decimal,
    /// Evaluation of internal plus external base, less the dependent deduction.
    pub combined: WithholdingEvaluation,
    /// Withholding still due internally, never negative.
    pub withholding_due: Decimal,
}

/// Withholding due on `internal_base` once the other sources are counted.
///
/// The dependent deduction is taken once, from the combined base.
pub fn consolidate_withholding(
    physician_id: i64,
    competencia: Competencia,
    internal_base: Decimal,
    dependents: u32,
    sources: OtherSources<'_>,
    table: &BracketTable,
) -> WithholdingConsolidation {
    let applicable = sources.applicable_bonds(physician_id, competencia);
    let mut external_base: Decimal = applicable.iter().map(|b| b.withholding_base).sum();
    let mut external_withheld: Decimal = applicable.iter().map(|b| b.withholding_amount).sum();

    if let Some(other) = sources.other_family_for(physician_id, competencia) {
        external_base += other.internal_withholding_base;
        external_withheld += other.withholding_amount;
    }

    let deduction = Decimal::from(dependents) * table.dependent_deduction;
    let internal_adjusted_base = max(Decimal::ZERO, round_half_up(internal_base - deduction));
    let combined = evaluate_withholding(internal_base + external_base, dependents, table);
    let withholding_due = max(Decimal::ZERO, combined.evaluation.tax_amount - external_withheld);

    if !external_withheld.is_zero() && withholding_due.is_zero() {
        debug!(
            physician_id,
            %competencia,
            %external_withheld,
            combined_tax = %combined.evaluation.tax_amount,
            "withholding fully covered by other sources"
        );
    }

    WithholdingConsolidation {
        internal_adjusted_base,
        external_base,
        external_withheld,
        combined,
        withholding_due,
    }
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, TimeZone, Utc};
    use pretty_assertions::assert_eq;
    use rust_decimal_macros::dec;

    use super::*;
    use crate::models::{Bracket, ContributorKind, NewComputationResult, ResultFamily};

    fn competencia() -> Competencia {
        Competencia::new(2024, 3).unwrap()
    }

    fn flat(
        kind: ContributorKind,
        rate: Decimal,
        ceiling: Option<Decimal>,
    ) -> BracketTable {
        BracketTable {
            id: 1,
            kind,
            validity_start: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            validity_end: None,
            dependent_deduction: dec!(189.59),
            brackets: vec![Bracket {
                index: 1,
                base_from: dec!(0),
                base_to: None,
                rate,
                deduction: dec!(0),
                contribution_ceiling: ceiling,
            }],
        }
    }

    fn flat_with_ceiling(ceiling: Decimal) -> BracketTable {
        flat(ContributorKind::FlatRate, dec!(0.11), Some(ceiling))
    }

    fn bond(
        id: i64,
        base: Decimal,
        withheld: Decimal,
    ) -> ExternalFiscalBond {
        ExternalFiscalBond {
            id,
            physician_id: 1,
            competencia_start: Competencia::new(2024, 1).unwrap(),
            competencia_end: None,
            responsible_tax_id: format!("00.000.000/000{id}-00"),
            contribution_base: base,
            contribution_withheld: withheld,
            withholding_base: Decimal::ZERO,
            withholding_amount: Decimal::ZERO,
            bond_kind: "employment".to_string(),
            active: true,
        }
    }

    fn bonds(bonds: &[ExternalFiscalBond]) -> OtherSources<'_> {
        OtherSources {
            bonds,
            other_family: None,
        }
    }

    /// A stored production result carrying only the figures consolidation reads.
    fn production_result(
        contribution_base: Decimal,
        contribution_amount: Decimal,
        internal_withholding_base: Decimal,
        withholding_amount: Decimal,
    ) -> ComputationResult {
        let new = NewComputationResult {
            family: ResultFamily::Production,
            physician_id: 1,
            competencia: competencia(),
            reference_date: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            gross_value: contribution_base,
            credits_total: dec!(0),
            debits_total: dec!(0),
            contribution_base,
            contribution_amount,
            external_contribution_base: dec!(0),
            external_contribution_withheld: dec!(0),
            internal_withholding_base,
            external_withholding_base: dec!(0),
            external_withholding_withheld: dec!(0),
            withholding_base: internal_withholding_base,
            withholding_amount,
            company_fee_amount: dec!(0),
            net_value: dec!(0),
            contribution_table_id: 1,
            withholding_table_id: 2,
            items: vec![],
            annotations: vec![],
        };
        ComputationResult::from_new(
            new,
            41,
            1,
            Utc.with_ymd_and_hms(2024, 3, 31, 18, 0, 0).unwrap(),
        )
    }

    #[test]
    fn internal_contribution_is_combined_tax_minus_external_withholding() {
        let table = flat_with_ceiling(dec!(550));

        let result = consolidate(
            1,
            competencia(),
            dec!(2000),
            bonds(&[bond(1, dec!(3000), dec!(400))]),
            &table,
        );

        assert_eq!(result.combined_base, dec!(5000));
        assert_eq!(result.combined.tax_amount, dec!(550.00));
        assert_eq!(result.contribution_due, dec!(150.00));
        assert!(result.annotations.is_empty());
    }

    #[test]
    fn external_withholding_at_or_above_combined_tax_leaves_nothing_due() {
        let table = flat_with_ceiling(dec!(550));

        let result = consolidate(
            1,
            competencia(),
            dec!(1000),
            bonds(&[bond(1, dec!(6000), dec!(600))]),
            &table,
        );

        assert_eq!(result.combined.tax_amount, dec!(550));
        assert_eq!(result.contribution_due, dec!(0));
    }

    #[test]
    fn clamped_combined_tax_is_annotated() {
        let table = flat_with_ceiling(dec!(550));

        let result = consolidate(
            1,
            competencia(),
            dec!(4000),
            bonds(&[bond(1, dec!(3000), dec!(330))]),
            &table,
        );

        assert_eq!(result.combined.tax_amount, dec!(550));
        assert_eq!(result.contribution_due, dec!(220));
        assert_eq!(result.annotations.len(), 1);
        assert_eq!(result.annotations[0].kind, AnnotationKind::CeilingExceeded);
    }

    #[test]
    fn several_bonds_reaching_the_ceiling_flag_consolidation_order() {
        let table = flat_with_ceiling(dec!(550));
        let both = [bond(2, dec!(3000), dec!(330)), bond(1, dec!(3000), dec!(220))];

        let result = consolidate(1, competencia(), dec!(500), bonds(&both), &table);

        assert_eq!(result.bonds.iter().map(|b| b.id).collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(result.contribution_due, dec!(0));
        assert!(
            result
                .annotations
                .iter()
                .any(|a| a.kind == AnnotationKind::ConsolidationOrder)
        );
    }

    #[test]
    fn inactive_and_out_of_range_bonds_are_ignored() {
        let table = flat_with_ceiling(dec!(550));
        let mut inactive = bond(1, dec!(1000), dec!(110));
        inactive.active = false;
        let mut ended = bond(2, dec!(1000), dec!(110));
        ended.competencia_end = Some(Competencia::new(2024, 2).unwrap());

        let result = consolidate(1, competencia(), dec!(1000), bonds(&[inactive, ended]), &table);

        assert!(result.bonds.is_empty());
        assert_eq!(result.external_base, dec!(0));
        assert_eq!(result.contribution_due, dec!(110.00));
    }

    #[test]
    fn other_family_result_shares_the_ceiling() {
        let table = flat_with_ceiling(dec!(550));
        let production = production_result(dec!(2000.00), dec!(220.00), dec!(2300.00), dec!(230.00));

        let result = consolidate(
            1,
            competencia(),
            dec!(5000.00),
            OtherSources {
                bonds: &[],
                other_family: Some(&production),
            },
            &table,
        );

        assert_eq!(result.external_base, dec!(2000.00));
        assert_eq!(result.external_withheld, dec!(220.00));
        assert_eq!(result.combined.tax_amount, dec!(550.00));
        assert_eq!(result.contribution_due, dec!(330.00));
        assert!(result.bonds.is_empty());
    }

    #[test]
    fn other_family_and_bonds_add_up() {
        let table = flat_with_ceiling(dec!(550));
        let production = production_result(dec!(1000.00), dec!(110.00), dec!(1000.00), dec!(0));

        let result = consolidate(
            1,
            competencia(),
            dec!(1000.00),
            OtherSources {
                bonds: &[bond(1, dec!(1500.00), dec!(165.00))],
                other_family: Some(&production),
            },
            &table,
        );

        assert_eq!(result.combined_base, dec!(3500.00));
        assert_eq!(result.external_withheld, dec!(275.00));
        // 385.00 - 275.00
        assert_eq!(result.contribution_due, dec!(110.00));
    }

    #[test]
    fn other_family_for_another_month_is_ignored() {
        let table = flat_with_ceiling(dec!(550));
        let mut february = production_result(dec!(2000.00), dec!(220.00), dec!(0), dec!(0));
        february.competencia = Competencia::new(2024, 2).unwrap();

        let result = consolidate(
            1,
            competencia(),
            dec!(1000.00),
            OtherSources {
                bonds: &[],
                other_family: Some(&february),
            },
            &table,
        );

        assert_eq!(result.external_base, dec!(0));
        assert_eq!(result.contribution_due, dec!(110.00));
    }

    #[test]
    fn withholding_counts_bond_bases_and_subtracts_what_they_withheld() {
        let table = flat(ContributorKind::Withholding, dec!(0.10), None);
        let mut paid_elsewhere = bond(1, dec!(0), dec!(0));
        paid_elsewhere.withholding_base = dec!(3000.00);
        paid_elsewhere.withholding_amount = dec!(250.00);

        let result = consolidate_withholding(
            1,
            competencia(),
            dec!(2300.00),
            0,
            bonds(&[paid_elsewhere]),
            &table,
        );

        assert_eq!(result.external_base, dec!(3000.00));
        assert_eq!(result.combined.adjusted_base, dec!(5300.00));
        assert_eq!(result.combined.evaluation.tax_amount, dec!(530.00));
        assert_eq!(result.withholding_due, dec!(280.00));
    }

    #[test]
    fn withholding_already_exceeding_the_combined_tax_leaves_nothing_due() {
        let table = flat(ContributorKind::Withholding, dec!(0.10), None);
        let mut paid_elsewhere = bond(1, dec!(0), dec!(0));
        paid_elsewhere.withholding_base = dec!(3000.00);
        paid_elsewhere.withholding_amount = dec!(10000.00);

        let result = consolidate_withholding(
            1,
            competencia(),
            dec!(2300.00),
            0,
            bonds(&[paid_elsewhere]),
            &table,
        );

        assert_eq!(result.withholding_due, dec!(0));
    }

    #[test]
    fn dependents_are_deducted_once_from_the_combined_withholding_base() {
        let table = flat(ContributorKind::Withholding, dec!(0.10), None);
        let production = production_result(dec!(0), dec!(0), dec!(2000.00), dec!(162.08));

        let result = consolidate_withholding(
            1,
            competencia(),
            dec!(1000.00),
            2,
            OtherSources {
                bonds: &[],
                other_family: Some(&production),
            },
            &table,
        );

        // 1000.00 - 2 * 189.59
        assert_eq!(result.internal_adjusted_base, dec!(620.82));
        // 3000.00 - 2 * 189.59
        assert_eq!(result.combined.adjusted_base, dec!(2620.82));
        assert_eq!(result.combined.evaluation.tax_amount, dec!(262.08));
        assert_eq!(result.withholding_due, dec!(100.00));
    }

    #[test]
    fn no_other_sources_is_a_plain_evaluation() {
        let table = flat(ContributorKind::Withholding, dec!(0.10), None);

        let result =
            consolidate_withholding(1, competencia(), dec!(1200.00), 0, OtherSources::default(), &table);

        assert_eq!(result.external_base, dec!(0));
        assert_eq!(result.external_withheld, dec!(0));
        assert_eq!(result.withholding_due, dec!(120.00));
    }
}
