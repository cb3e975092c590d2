//! Result assembly and append-only persistence.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use tracing::{info, warn};

use super::adjustments::AdjustmentLedger;
use super::bonds::{OtherSources, consolidate, consolidate_withholding};
use super::cancel::CancellationFlag;
use super::common::{clamp_non_negative, round_half_up};
use super::error::ComputationError;
use super::fees::FeeSummary;
use super::production::ProductionSummary;
use crate::db::repository::PayrollRepository;
use crate::models::{
    AdjustmentKind, Annotation, AnnotationKind, BracketTable, Competencia, ComputationItem,
    ComputationResult, ExternalFiscalBond, ItemKind, NewComputationResult, Physician,
    ResultFamily,
};

/// Numbers items in insertion order and collects annotations.
#[derive(Debug, Default)]
pub struct ResultBuilder {
    items: Vec<ComputationItem>,
    annotations: Vec<Annotation>,
}

impl ResultBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn item(
        &mut self,
        kind: ItemKind,
        source_id: Option<i64>,
        description: impl Into<String>,
        quantity: Option<Decimal>,
        value: Decimal,
    ) -> &mut Self {
        let sequence = self.items.len() as u32 + 1;
        self.items.push(ComputationItem {
            sequence,
            kind,
            source_id,
            description: description.into(),
            quantity,
            value,
        });
        self
    }

    pub fn annotate(
        &mut self,
        annotations: impl IntoIterator<Item = Annotation>,
    ) -> &mut Self {
        self.annotations.extend(annotations);
        self
    }

    /// Clamps a base at zero, recording a `NegativeBase` annotation when it was cut.
    pub fn non_negative_base(
        &mut self,
        label: &str,
        base: Decimal,
    ) -> Decimal {
        let (clamped, shortfall) = clamp_non_negative(base);
        if !shortfall.is_zero() {
            warn!(base = label, %shortfall, "negative base clamped to zero");
            self.annotations.push(Annotation::new(
                AnnotationKind::NegativeBase,
                format!("{label} base was {base}; clamped to zero"),
                Some(shortfall),
            ));
        }
        clamped
    }

    pub fn bond_items(
        &mut self,
        bonds: &[ExternalFiscalBond],
    ) -> &mut Self {
        for bond in bonds {
            self.item(
                ItemKind::ExternalBond,
                Some(bond.id),
                format!("{} bond with {}", bond.bond_kind, bond.responsible_tax_id),
                None,
                bond.contribution_withheld,
            );
        }
        self
    }

    /// Records the other family's result that was counted as an external source.
    pub fn other_family_item(
        &mut self,
        other: Option<&ComputationResult>,
    ) -> &mut Self {
        if let Some(result) = other {
            self.item(
                ItemKind::OtherFamilyResult,
                Some(result.id),
                format!("{} result v{}", result.family.as_str(), result.version),
                None,
                result.contribution_amount,
            );
        }
        self
    }

    pub fn into_parts(self) -> (Vec<ComputationItem>, Vec<Annotation>) {
        (self.items, self.annotations)
    }
}

/// Everything the production family needs for one physician.
#[derive(Debug)]
pub struct ProductionAssembly<'a> {
    pub physician: &'a Physician,
    pub competencia: Competencia,
    pub reference_date: NaiveDate,
    pub production: ProductionSummary,
    pub adjustments: AdjustmentLedger,
    pub bonds: &'a [ExternalFiscalBond],
    /// Latest stored management-compensation result for the same month.
    pub other_family: Option<&'a ComputationResult>,
    pub fees: FeeSummary,
    pub contribution_table: &'a BracketTable,
    pub withholding_table: &'a BracketTable,
    pub deduct_contribution_from_withholding: bool,
}

/// Builds the production snapshot.
///
/// Taxable debits reduce both bases; taxable credits raise the withholding
/// base only. Both taxes are consolidated with the bonds and the other
/// family's result before the internal amount is taken. The net value is
/// `gross + credits − debits − contribution − withholding − company fees`.
pub fn assemble_production(input: ProductionAssembly<'_>) -> NewComputationResult {
    let ProductionAssembly {
        physician,
        competencia,
        reference_date,
        production,
        adjustments,
        bonds,
        other_family,
        fees,
        contribution_table,
        withholding_table,
        deduct_contribution_from_withholding,
    } = input;

    let mut builder = ResultBuilder::new();
    builder.annotate(production.annotations);

    for line in &production.lines {
        builder.item(
            ItemKind::ProductionLine,
            Some(line.contract_id),
            format!("contract {} shift type {}", line.contract_id, line.shift_type_id),
            Some(line.quantity),
            line.value,
        );
    }
    for line in &production.direct {
        builder.item(line.kind, Some(line.source_id), line.description.clone(), None, line.value);
    }
    for entry in &adjustments.entries {
        let kind = match entry.kind {
            AdjustmentKind::Credit => ItemKind::Credit,
            AdjustmentKind::Debit => ItemKind::Debit,
        };
        builder.item(kind, Some(entry.id), entry.description.clone(), None, entry.value);
    }

    let gross_value = production.gross_value;
    let contribution_base =
        builder.non_negative_base("contribution", gross_value - adjustments.taxable_debits);

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

    for fee in &fees.lines {
        builder.item(
            ItemKind::CompanyFee,
            Some(fee.parameters_id),
            format!("{} at {} for company {}", fee.kind.as_str(), fee.rate, fee.company_id),
            None,
            fee.amount,
        );
    }
    builder.annotate(fees.annotations);

    let contribution_amount = consolidation.contribution_due;
    let mut withholding_raw =
        gross_value + adjustments.taxable_credits - adjustments.taxable_debits;
    if deduct_contribution_from_withholding {
        withholding_raw -= contribution_amount;
    }
    let internal_withholding_base = builder.non_negative_base("withholding", withholding_raw);
    let withholding = consolidate_withholding(
        physician.id,
        competencia,
        internal_withholding_base,
        physician.dependents,
        sources,
        withholding_table,
    );

    let net_value = round_half_up(
        gross_value + adjustments.credits_total
            - adjustments.debits_total
            - contribution_amount
            - withholding.withholding_due
            - fees.total,
    );

    let (items, annotations) = builder.into_parts();
    NewComputationResult {
        family: ResultFamily::Production,
        physician_id: physician.id,
        competencia,
        reference_date,
        gross_value,
        credits_total: adjustments.credits_total,
        debits_total: adjustments.debits_total,
        contribution_base,
        contribution_amount,
        external_contribution_base: consolidation.external_base,
        external_contribution_withheld: consolidation.external_withheld,
        internal_withholding_base,
        external_withholding_base: withholding.external_base,
        external_withholding_withheld: withholding.external_withheld,
        withholding_base: withholding.internal_adjusted_base,
        withholding_amount: withholding.withholding_due,
        company_fee_amount: fees.total,
        net_value,
        contribution_table_id: contribution_table.id,
        withholding_table_id: withholding_table.id,
        items,
        annotations,
    }
}

/// Appends `result` as the next version of its key unless `cancel` was raised.
pub async fn persist(
    repository: &dyn PayrollRepository,
    result: NewComputationResult,
    cancel: &CancellationFlag,
) -> Result<ComputationResult, ComputationError> {
    if cancel.is_cancelled() {
        return Err(ComputationError::Cancelled);
    }

    let stored = repository.append_result(result).await?;
    info!(
        physician_id = stored.physician_id,
        competencia = %stored.competencia,
        family = stored.family.as_str(),
        version = stored.version,
        net_value = %stored.net_value,
        "result written"
    );
    Ok(stored)
}
