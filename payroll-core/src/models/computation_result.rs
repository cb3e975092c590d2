use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::Competencia;

/// Which pipeline produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ResultFamily {
    Production,
    ManagementCompensation,
}

impl ResultFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Production => "production",
            Self::ManagementCompensation => "management_compensation",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "production" => Some(Self::Production),
            "management_compensation" => Some(Self::ManagementCompensation),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ItemKind {
    ProductionLine,
    PrivateProcedure,
    AdministrativeProduction,
    Credit,
    Debit,
    ManagementCompensation,
    ExternalBond,
    /// The latest result of the other family for the same physician and month.
    OtherFamilyResult,
    CompanyFee,
}

impl ItemKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ProductionLine => "production_line",
            Self::PrivateProcedure => "private_procedure",
            Self::AdministrativeProduction => "administrative_production",
            Self::Credit => "credit",
            Self::Debit => "debit",
            Self::ManagementCompensation => "management_compensation",
            Self::ExternalBond => "external_bond",
            Self::OtherFamilyResult => "other_family_result",
            Self::CompanyFee => "company_fee",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "production_line" => Some(Self::ProductionLine),
            "private_procedure" => Some(Self::PrivateProcedure),
            "administrative_production" => Some(Self::AdministrativeProduction),
            "credit" => Some(Self::Credit),
            "debit" => Some(Self::Debit),
            "management_compensation" => Some(Self::ManagementCompensation),
            "external_bond" => Some(Self::ExternalBond),
            "other_family_result" => Some(Self::OtherFamilyResult),
            "company_fee" => Some(Self::CompanyFee),
            _ => None,
        }
    }
}

/// Non-fatal conditions recorded on a result for auditability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AnnotationKind {
    /// A base went below zero and was clamped.
    NegativeBase,
    /// The contribution ceiling clamped the combined tax.
    CeilingExceeded,
    /// A source row referenced missing or inactive data and was skipped.
    PartialData,
    /// External bonds alone reach the ceiling; allocation between them needs review.
    ConsolidationOrder,
}

impl AnnotationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NegativeBase => "negative_base",
            Self::CeilingExceeded => "ceiling_exceeded",
            Self::PartialData => "partial_data",
            Self::ConsolidationOrder => "consolidation_order",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "negative_base" => Some(Self::NegativeBase),
            "ceiling_exceeded" => Some(Self::CeilingExceeded),
            "partial_data" => Some(Self::PartialData),
            "consolidation_order" => Some(Self::ConsolidationOrder),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Annotation {
    pub kind: AnnotationKind,
    pub message: String,
    pub amount: Option<Decimal>,
}

impl Annotation {
    pub fn new(
        kind: AnnotationKind,
        message: impl Into<String>,
        amount: Option<Decimal>,
    ) -> Self {
        Self {
            kind,
            message: message.into(),
            amount,
        }
    }
}

/// One breakdown line of a result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComputationItem {
    /// 1-based position within the result.
    pub sequence: u32,
    pub kind: ItemKind,
    pub source_id: Option<i64>,
    pub description: String,
    pub quantity: Option<Decimal>,
    pub value: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComputationResult {
    pub id: i64,
    pub family: ResultFamily,
    pub physician_id: i64,
    pub competencia: Competencia,
    pub reference_date: NaiveDate,
    pub version: u32,

    pub gross_value: Decimal,
    pub credits_total: Decimal,
    pub debits_total: Decimal,
    pub contribution_base: Decimal,
    pub contribution_amount: Decimal,
    /// Contribution base of the bonds and of the other family's latest result.
    pub external_contribution_base: Decimal,
    pub external_contribution_withheld: Decimal,
    /// This result's own withholding base before the dependent deduction.
    pub internal_withholding_base: Decimal,
    /// Withholding base of the bonds and of the other family's latest result.
    pub external_withholding_base: Decimal,
    pub external_withholding_withheld: Decimal,
    /// The internal base less the dependent deduction, never negative.
    pub withholding_base: Decimal,
    pub withholding_amount: Decimal,
    pub company_fee_amount: Decimal,
    pub net_value: Decimal,

    pub contribution_table_id: i64,
    pub withholding_table_id: i64,

    pub items: Vec<ComputationItem>,
    pub annotations: Vec<Annotation>,

    pub computed_at: DateTime<Utc>,
}

/// For appending new snapshots (no id, version or timestamp)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewComputationResult {
    pub family: ResultFamily,
    pub physician_id: i64,
    pub competencia: Competencia,
    pub reference_date: NaiveDate,

    pub gross_value: Decimal,
    pub credits_total: Decimal,
    pub debits_total: Decimal,
    pub contribution_base: Decimal,
    pub contribution_amount: Decimal,
    pub external_contribution_base: Decimal,
    pub external_contribution_withheld: Decimal,
    pub internal_withholding_base: Decimal,
    pub external_withholding_base: Decimal,
    pub external_withholding_withheld: Decimal,
    pub withholding_base: Decimal,
    pub withholding_amount: Decimal,
    pub company_fee_amount: Decimal,
    pub net_value: Decimal,

    pub contribution_table_id: i64,
    pub withholding_table_id: i64,

    pub items: Vec<ComputationItem>,
    pub annotations: Vec<Annotation>,
}

impl ComputationResult {
    /// Materializes a stored snapshot from its new-result payload.
    pub fn from_new(
        new: NewComputationResult,
        id: i64,
        version: u32,
        computed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            family: new.family,
            physician_id: new.physician_id,
            competencia: new.competencia,
            reference_date: new.reference_date,
            version,
            gross_value: new.gross_value,
            credits_total: new.credits_total,
            debits_total: new.debits_total,
            contribution_base: new.contribution_base,
            contribution_amount: new.contribution_amount,
            external_contribution_base: new.external_contribution_base,
            external_contribution_withheld: new.external_contribution_withheld,
            internal_withholding_base: new.internal_withholding_base,
            external_withholding_base: new.external_withholding_base,
            external_withholding_withheld: new.external_withholding_withheld,
            withholding_base: new.withholding_base,
            withholding_amount: new.withholding_amount,
            company_fee_amount: new.company_fee_amount,
            net_value: new.net_value,
            contribution_table_id: new.contribution_table_id,
            withholding_table_id: new.withholding_table_id,
            items: new.items,
            annotations: new.annotations,
            computed_at,
        }
    }

    pub fn has_annotation(
        &self,
        kind: AnnotationKind,
    ) -> bool {
        self.annotations.iter().any(|a| a.kind == kind)
    }
}
