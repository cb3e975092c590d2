//! Management-compensation (pro-labore) pipeline.
//!
//! Only confirmed, taxable entries take part; the others are left out of the
//! result entirely. The contribution base is the gross compensation,
//! evaluated on the flat-rate table. The withholding base is the gross
//! compensation less the dependent deduction. Both are consolidated with
//! external bonds and the physician's production result for the month. No
//! adjustments or company fees apply.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use tracing::debug;

use super::bonds::{OtherSources, consolidate, consolidate_withholding};
use super::common::round_half_up;
use super::writer::ResultBuilder;
use crate::models::{
    BracketTable, Competencia, ComputationResult, ExternalFiscalBond, ItemKind,
    ManagementCompensationEntry, NewComputationResult, Physician, ResultFamily,
};

#[derive(Debug)]
pub struct ManagementAssembly<'a> {
    pub physician: &'a Physician,
    pub competencia: Competencia,
    pub reference_date: NaiveDate,
    pub entries: &'a [ManagementCompensationEntry],
    pub bonds: &'a [ExternalFiscalBond],
    /// Latest stored production result for the same month.
    pub other_family: Option<&'a ComputationResult>,
    /// Must be a flat-rate table.
    pub contribution_table: &'a BracketTable,
    pub withholding_table: &'a BracketTable,
    pub deduct_contribution_from_withholding: bool,
}

pub fn assemble_management(input: ManagementAssembly<'_>) -> NewComputationResult {
    let ManagementAssembly {
        physician,
        competencia,
        reference_date,
        entries,
        bonds,
        other_family,
        contribution_table,
        withholding_table,
        deduct_contribution_from_withholding,
    } = input;

    let mut included: Vec<&ManagementCompensationEntry> = entries
        .iter()
        .filter(|e| {
            e.physician_id == physician.id && e.competencia == competencia && e.is_computable()
        })
        .collect();
    included.sort_by_key(|e| (e.date, e.id));

    let excluded = entries.len() - included.len();
    debug!(
        physician_id = physician.id,
        %competencia,
        included = included.len(),
        excluded,
        "selected management compensation entries"
    );

    let mut builder = ResultBuilder::new();
    for entry in &included {
        builder.item(
            ItemKind::ManagementCompensation,
            Some(entry.id),
            entry.description.clone(),
            None,
            entry.gross_value,
        );
    }

    let gross_value = round_half_up(included.iter().map(|e| e.gross_value).sum());
    let contribution_base = builder.non_negative_base("contribution", gross_value);

    let sources = OtherSources {
        bonds,
        other_family,
    };
    let consolidation = consolidate(
        physician.id,
        competencia,
        contribution_base,
        sources,
        contribution_table,
    );
    builder.bond_items(&consolidation.bonds);
    builder.other_family_item(sources.other_family_for(physician.id, competencia));
    builder.annotate(consolidation.annotations.iter().cloned());

    let contribution_amount = consolidation.contribution_due;
    let withholding_raw = if deduct_contribution_from_withholding {
        gross_value - contribution_amount
    } else {
        gross_value
    };
    let internal_withholding_base = builder.non_negative_base("withholding", withholding_raw);
    let withholding = consolidate_withholding(
        physician.id,
        competencia,
        internal_withholding_base,
        physician.dependents,
        sources,
        withholding_table,
    );

    let net_value = round_half_up(gross_value - contribution_amount - withholding.withholding_due);

    let (items, annotations) = builder.into_parts();
    NewComputationResult {
        family: ResultFamily::ManagementCompensation,
        physician_id: physician.id,
        competencia,
        reference_date,
        gross_value,
        credits_total: Decimal::ZERO,
        debits_total: Decimal::ZERO,
        contribution_base,
        contribution_amount,
        external_contribution_base: consolidation.external_base,
        external_contribution_withheld: consolidation.external_withheld,
        internal_withholding_base,
        external_withholding_base: withholding.external_base,
        external_withholding_withheld: withholding.external_withheld,
        withholding_base: withholding.internal_adjusted_base,
        withholding_amount: withholding.withholding_due,
        company_fee_amount: Decimal::ZERO,
        net_value,
        contribution_table_id: contribution_table.id,
        withholding_table_id: withholding_table.id,
        items,
        annotations,
    }
}
