//! Boundary validation: loosely typed CSV rows become strict entities.
//!
//! Every raw row field is an optional string. Required fields that are
//! absent or blank fail with [`IntakeError::MissingField`]; nothing is
//! defaulted to zero on the way in.

use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use payroll_core::{
    AdjustmentEntry, AdjustmentKind, AdministrativeProduction, Bracket, CompanyFeeKind,
    CompanyLink, Competencia, Contract, ContractShiftRate, ContributorKind, ExternalFiscalBond,
    ManagementCompensationEntry, Physician, PrivateProcedure, ShiftRecord,
};
use rust_decimal::Decimal;
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IntakeError {
    #[error("missing required field '{0}'")]
    MissingField(&'static str),

    #[error("invalid value '{value}' for field '{field}': {reason}")]
    InvalidField {
        field: &'static str,
        value: String,
        reason: String,
    },
}

impl IntakeError {
    fn invalid(
        field: &'static str,
        value: &str,
        reason: impl ToString,
    ) -> Self {
        IntakeError::InvalidField {
            field,
            value: value.to_string(),
            reason: reason.to_string(),
        }
    }
}

fn present<'a>(value: &'a Option<String>) -> Option<&'a str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn required<'a>(
    field: &'static str,
    value: &'a Option<String>,
) -> Result<&'a str, IntakeError> {
    present(value).ok_or(IntakeError::MissingField(field))
}

fn parse_with<T, E: ToString>(
    field: &'static str,
    value: &str,
    parse: impl FnOnce(&str) -> Result<T, E>,
) -> Result<T, IntakeError> {
    parse(value).map_err(|e| IntakeError::invalid(field, value, e))
}

fn required_parsed<T>(
    field: &'static str,
    value: &Option<String>,
) -> Result<T, IntakeError>
where
    T: FromStr,
    T::Err: ToString,
{
    let raw = required(field, value)?;
    parse_with(field, raw, T::from_str)
}

fn optional_parsed<T>(
    field: &'static str,
    value: &Option<String>,
) -> Result<Option<T>, IntakeError>
where
    T: FromStr,
    T::Err: ToString,
{
    present(value)
        .map(|raw| parse_with(field, raw, T::from_str))
        .transpose()
}

fn required_bool(
    field: &'static str,
    value: &Option<String>,
) -> Result<bool, IntakeError> {
    let raw = required(field, value)?;
    match raw.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "y" => Ok(true),
        "false" | "0" | "no" | "n" => Ok(false),
        _ => Err(IntakeError::invalid(field, raw, "expected a boolean")),
    }
}

fn required_timestamp(
    field: &'static str,
    value: &Option<String>,
) -> Result<DateTime<Utc>, IntakeError> {
    let raw = required(field, value)?;
    parse_with(field, raw, DateTime::parse_from_rfc3339).map(|dt| dt.with_timezone(&Utc))
}

fn non_negative(
    field: &'static str,
    value: Decimal,
) -> Result<Decimal, IntakeError> {
    if value < Decimal::ZERO {
        return Err(IntakeError::invalid(
            field,
            &value.to_string(),
            "must not be negative",
        ));
    }
    Ok(value)
}

/// One bracket of a bracket table CSV. Rows sharing `kind` and
/// `validity_start` form one table.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct RawBracketRow {
    pub kind: Option<String>,
    pub validity_start: Option<String>,
    pub validity_end: Option<String>,
    pub dependent_deduction: Option<String>,
    pub index: Option<String>,
    pub base_from: Option<String>,
    pub base_to: Option<String>,
    pub rate: Option<String>,
    pub deduction: Option<String>,
    pub contribution_ceiling: Option<String>,
}

/// A validated bracket row, still carrying its table header fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BracketRow {
    pub kind: ContributorKind,
    pub validity_start: NaiveDate,
    pub validity_end: Option<NaiveDate>,
    pub dependent_deduction: Decimal,
    pub bracket: Bracket,
}

impl TryFrom<RawBracketRow> for BracketRow {
    type Error = IntakeError;

    fn try_from(raw: RawBracketRow) -> Result<Self, Self::Error> {
        let kind_str = required("kind", &raw.kind)?;
        let kind = ContributorKind::parse(kind_str)
            .ok_or_else(|| IntakeError::invalid("kind", kind_str, "unknown contributor kind"))?;

        // Only withholding tables carry a dependent deduction; the
        // contribution tables never read it.
        let dependent_deduction = match kind {
            ContributorKind::Withholding => non_negative(
                "dependent_deduction",
                required_parsed("dependent_deduction", &raw.dependent_deduction)?,
            )?,
            ContributorKind::Employee | ContributorKind::FlatRate => {
                optional_parsed("dependent_deduction", &raw.dependent_deduction)?
                    .unwrap_or(Decimal::ZERO)
            }
        };

        Ok(BracketRow {
            kind,
            validity_start: required_parsed("validity_start", &raw.validity_start)?,
            validity_end: optional_parsed("validity_end", &raw.validity_end)?,
            dependent_deduction,
            bracket: Bracket {
                index: required_parsed("index", &raw.index)?,
                base_from: required_parsed("base_from", &raw.base_from)?,
                base_to: optional_parsed("base_to", &raw.base_to)?,
                rate: required_parsed("rate", &raw.rate)?,
                deduction: required_parsed("deduction", &raw.deduction)?,
                contribution_ceiling: optional_parsed(
                    "contribution_ceiling",
                    &raw.contribution_ceiling,
                )?,
            },
        })
    }
}

/// One rate of a fiscal parameter set. Rows sharing `id` form one set.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct RawFiscalParametersRow {
    pub id: Option<String>,
    pub company_id: Option<String>,
    pub tax_regime: Option<String>,
    pub validity_start: Option<String>,
    pub validity_end: Option<String>,
    pub fee_kind: Option<String>,
    pub rate: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FiscalParametersRow {
    pub id: i64,
    pub company_id: i64,
    pub tax_regime: String,
    pub validity_start: NaiveDate,
    pub validity_end: Option<NaiveDate>,
    pub fee_kind: CompanyFeeKind,
    pub rate: Decimal,
}

impl TryFrom<RawFiscalParametersRow> for FiscalParametersRow {
    type Error = IntakeError;

    fn try_from(raw: RawFiscalParametersRow) -> Result<Self, Self::Error> {
        let fee_str = required("fee_kind", &raw.fee_kind)?;
        let fee_kind = CompanyFeeKind::parse(fee_str)
            .ok_or_else(|| IntakeError::invalid("fee_kind", fee_str, "unknown fee kind"))?;

        Ok(FiscalParametersRow {
            id: required_parsed("id", &raw.id)?,
            company_id: required_parsed("company_id", &raw.company_id)?,
            tax_regime: required("tax_regime", &raw.tax_regime)?.to_string(),
            validity_start: required_parsed("validity_start", &raw.validity_start)?,
            validity_end: optional_parsed("validity_end", &raw.validity_end)?,
            fee_kind,
            rate: non_negative("rate", required_parsed("rate", &raw.rate)?)?,
        })
    }
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct RawPhysicianRow {
    pub id: Option<String>,
    pub name: Option<String>,
    pub dependents: Option<String>,
}

impl TryFrom<RawPhysicianRow> for Physician {
    type Error = IntakeError;

    fn try_from(raw: RawPhysicianRow) -> Result<Self, Self::Error> {
        Ok(Physician {
            id: required_parsed("id", &raw.id)?,
            name: required("name", &raw.name)?.to_string(),
            dependents: required_parsed("dependents", &raw.dependents)?,
        })
    }
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct RawCompanyLinkRow {
    pub id: Option<String>,
    pub physician_id: Option<String>,
    pub company_id: Option<String>,
    pub linked_on: Option<String>,
    pub unlinked_on: Option<String>,
}

impl TryFrom<RawCompanyLinkRow> for CompanyLink {
    type Error = IntakeError;

    fn try_from(raw: RawCompanyLinkRow) -> Result<Self, Self::Error> {
        Ok(CompanyLink {
            id: required_parsed("id", &raw.id)?,
            physician_id: required_parsed("physician_id", &raw.physician_id)?,
            company_id: required_parsed("company_id", &raw.company_id)?,
            linked_on: required_parsed("linked_on", &raw.linked_on)?,
            unlinked_on: optional_parsed("unlinked_on", &raw.unlinked_on)?,
        })
    }
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct RawContractRow {
    pub id: Option<String>,
    pub company_id: Option<String>,
    pub hospital_id: Option<String>,
    pub number: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub deactivated_on: Option<String>,
}

impl TryFrom<RawContractRow> for Contract {
    type Error = IntakeError;

    fn try_from(raw: RawContractRow) -> Result<Self, Self::Error> {
        Ok(Contract {
            id: required_parsed("id", &raw.id)?,
            company_id: required_parsed("company_id", &raw.company_id)?,
            hospital_id: required_parsed("hospital_id", &raw.hospital_id)?,
            number: present(&raw.number).map(str::to_string),
            start_date: required_parsed("start_date", &raw.start_date)?,
            end_date: optional_parsed("end_date", &raw.end_date)?,
            deactivated_on: optional_parsed("deactivated_on", &raw.deactivated_on)?,
        })
    }
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct RawShiftRateRow {
    pub id: Option<String>,
    pub contract_id: Option<String>,
    pub shift_type_id: Option<String>,
    pub rate: Option<String>,
    pub valid_from: Option<String>,
    pub valid_until: Option<String>,
}

impl TryFrom<RawShiftRateRow> for ContractShiftRate {
    type Error = IntakeError;

    fn try_from(raw: RawShiftRateRow) -> Result<Self, Self::Error> {
        Ok(ContractShiftRate {
            id: required_parsed("id", &raw.id)?,
            contract_id: required_parsed("contract_id", &raw.contract_id)?,
            shift_type_id: required_parsed("shift_type_id", &raw.shift_type_id)?,
            rate: non_negative("rate", required_parsed("rate", &raw.rate)?)?,
            valid_from: required_parsed("valid_from", &raw.valid_from)?,
            valid_until: optional_parsed("valid_until", &raw.valid_until)?,
        })
    }
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct RawShiftRecordRow {
    pub id: Option<String>,
    pub physician_id: Option<String>,
    pub contract_id: Option<String>,
    pub shift_type_id: Option<String>,
    pub date: Option<String>,
    pub competencia: Option<String>,
    pub quantity: Option<String>,
    pub confirmed: Option<String>,
}

impl TryFrom<RawShiftRecordRow> for ShiftRecord {
    type Error = IntakeError;

    fn try_from(raw: RawShiftRecordRow) -> Result<Self, Self::Error> {
        let date: NaiveDate = required_parsed("date", &raw.date)?;
        // The competencia defaults to the month the shift was worked in.
        let competencia = optional_parsed::<Competencia>("competencia", &raw.competencia)?
            .unwrap_or_else(|| Competencia::of(date));

        Ok(ShiftRecord {
            id: required_parsed("id", &raw.id)?,
            physician_id: required_parsed("physician_id", &raw.physician_id)?,
            contract_id: required_parsed("contract_id", &raw.contract_id)?,
            shift_type_id: required_parsed("shift_type_id", &raw.shift_type_id)?,
            date,
            competencia,
            quantity: non_negative("quantity", required_parsed("quantity", &raw.quantity)?)?,
            confirmed: required_bool("confirmed", &raw.confirmed)?,
        })
    }
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct RawPrivateProcedureRow {
    pub id: Option<String>,
    pub physician_id: Option<String>,
    pub company_id: Option<String>,
    pub competencia: Option<String>,
    pub procedure_date: Option<String>,
    pub patient_name: Option<String>,
    pub procedure_type: Option<String>,
    pub gross_value: Option<String>,
    pub net_transfer_value: Option<String>,
    pub confirmed: Option<String>,
    pub active: Option<String>,
}

impl TryFrom<RawPrivateProcedureRow> for PrivateProcedure {
    type Error = IntakeError;

    fn try_from(raw: RawPrivateProcedureRow) -> Result<Self, Self::Error> {
        let procedure_date: NaiveDate = required_parsed("procedure_date", &raw.procedure_date)?;
        let competencia = optional_parsed::<Competencia>("competencia", &raw.competencia)?
            .unwrap_or_else(|| Competencia::of(procedure_date));
        let gross_value: Decimal =
            non_negative("gross_value", required_parsed("gross_value", &raw.gross_value)?)?;
        let net_transfer_value: Decimal = non_negative(
            "net_transfer_value",
            required_parsed("net_transfer_value", &raw.net_transfer_value)?,
        )?;
        if net_transfer_value > gross_value {
            return Err(IntakeError::invalid(
                "net_transfer_value",
                &net_transfer_value.to_string(),
                format!("exceeds the gross value {gross_value}"),
            ));
        }

        Ok(PrivateProcedure {
            id: required_parsed("id", &raw.id)?,
            physician_id: required_parsed("physician_id", &raw.physician_id)?,
            company_id: required_parsed("company_id", &raw.company_id)?,
            competencia,
            procedure_date,
            patient_name: required("patient_name", &raw.patient_name)?.to_string(),
            procedure_type: required("procedure_type", &raw.procedure_type)?.to_string(),
            gross_value,
            net_transfer_value,
            confirmed: required_bool("confirmed", &raw.confirmed)?,
            active: required_bool("active", &raw.active)?,
        })
    }
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct RawAdministrativeProductionRow {
    pub id: Option<String>,
    pub physician_id: Option<String>,
    pub company_id: Option<String>,
    pub competencia: Option<String>,
    pub description: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub total_value: Option<String>,
    pub confirmed: Option<String>,
    pub active: Option<String>,
}

impl TryFrom<RawAdministrativeProductionRow> for AdministrativeProduction {
    type Error = IntakeError;

    fn try_from(raw: RawAdministrativeProductionRow) -> Result<Self, Self::Error> {
        let start_date: NaiveDate = required_parsed("start_date", &raw.start_date)?;
        let end_date: Option<NaiveDate> = optional_parsed("end_date", &raw.end_date)?;
        if let Some(end) = end_date.filter(|end| *end < start_date) {
            return Err(IntakeError::invalid(
                "end_date",
                &end.to_string(),
                "before the start date",
            ));
        }

        Ok(AdministrativeProduction {
            id: required_parsed("id", &raw.id)?,
            physician_id: required_parsed("physician_id", &raw.physician_id)?,
            company_id: required_parsed("company_id", &raw.company_id)?,
            competencia: required_parsed("competencia", &raw.competencia)?,
            description: required("description", &raw.description)?.to_string(),
            start_date,
            end_date,
            total_value: non_negative(
                "total_value",
                required_parsed("total_value", &raw.total_value)?,
            )?,
            confirmed: required_bool("confirmed", &raw.confirmed)?,
            active: required_bool("active", &raw.active)?,
        })
    }
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct RawAdjustmentRow {
    pub id: Option<String>,
    pub physician_id: Option<String>,
    pub company_id: Option<String>,
    pub hospital_id: Option<String>,
    pub kind: Option<String>,
    pub taxable: Option<String>,
    pub recurring: Option<String>,
    pub competencia: Option<String>,
    pub value: Option<String>,
    pub description: Option<String>,
    pub created_at: Option<String>,
}

impl TryFrom<RawAdjustmentRow> for AdjustmentEntry {
    type Error = IntakeError;

    fn try_from(raw: RawAdjustmentRow) -> Result<Self, Self::Error> {
        let kind_str = required("kind", &raw.kind)?;
        let kind = AdjustmentKind::parse(kind_str)
            .ok_or_else(|| IntakeError::invalid("kind", kind_str, "expected debit or credit"))?;

        Ok(AdjustmentEntry {
            id: required_parsed("id", &raw.id)?,
            physician_id: required_parsed("physician_id", &raw.physician_id)?,
            company_id: required_parsed("company_id", &raw.company_id)?,
            hospital_id: optional_parsed("hospital_id", &raw.hospital_id)?,
            kind,
            taxable: required_bool("taxable", &raw.taxable)?,
            recurring: required_bool("recurring", &raw.recurring)?,
            competencia: required_parsed("competencia", &raw.competencia)?,
            value: non_negative("value", required_parsed("value", &raw.value)?)?,
            description: present(&raw.description).unwrap_or_default().to_string(),
            created_at: required_timestamp("created_at", &raw.created_at)?,
        })
    }
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct RawFiscalBondRow {
    pub id: Option<String>,
    pub physician_id: Option<String>,
    pub competencia_start: Option<String>,
    pub competencia_end: Option<String>,
    pub responsible_tax_id: Option<String>,
    pub contribution_base: Option<String>,
    pub contribution_withheld: Option<String>,
    pub withholding_base: Option<String>,
    pub withholding_amount: Option<String>,
    pub bond_kind: Option<String>,
    pub active: Option<String>,
}

impl TryFrom<RawFiscalBondRow> for ExternalFiscalBond {
    type Error = IntakeError;

    fn try_from(raw: RawFiscalBondRow) -> Result<Self, Self::Error> {
        Ok(ExternalFiscalBond {
            id: required_parsed("id", &raw.id)?,
            physician_id: required_parsed("physician_id", &raw.physician_id)?,
            competencia_start: required_parsed("competencia_start", &raw.competencia_start)?,
            competencia_end: optional_parsed("competencia_end", &raw.competencia_end)?,
            responsible_tax_id: required("responsible_tax_id", &raw.responsible_tax_id)?
                .to_string(),
            contribution_base: non_negative(
                "contribution_base",
                required_parsed("contribution_base", &raw.contribution_base)?,
            )?,
            contribution_withheld: non_negative(
                "contribution_withheld",
                required_parsed("contribution_withheld", &raw.contribution_withheld)?,
            )?,
            withholding_base: non_negative(
                "withholding_base",
                required_parsed("withholding_base", &raw.withholding_base)?,
            )?,
            withholding_amount: non_negative(
                "withholding_amount",
                required_parsed("withholding_amount", &raw.withholding_amount)?,
            )?,
            bond_kind: required("bond_kind", &raw.bond_kind)?.to_string(),
            active: required_bool("active", &raw.active)?,
        })
    }
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct RawManagementRow {
    pub id: Option<String>,
    pub physician_id: Option<String>,
    pub company_id: Option<String>,
    pub competencia: Option<String>,
    pub date: Option<String>,
    pub description: Option<String>,
    pub gross_value: Option<String>,
    pub taxable: Option<String>,
    pub confirmed: Option<String>,
}

impl TryFrom<RawManagementRow> for ManagementCompensationEntry {
    type Error = IntakeError;

    fn try_from(raw: RawManagementRow) -> Result<Self, Self::Error> {
        Ok(ManagementCompensationEntry {
            id: required_parsed("id", &raw.id)?,
            physician_id: required_parsed("physician_id", &raw.physician_id)?,
            company_id: required_parsed("company_id", &raw.company_id)?,
            competencia: required_parsed("competencia", &raw.competencia)?,
            date: required_parsed("date", &raw.date)?,
            description: present(&raw.description).unwrap_or_default().to_string(),
            gross_value: non_negative(
                "gross_value",
                required_parsed("gross_value", &raw.gross_value)?,
            )?,
            taxable: required_bool("taxable", &raw.taxable)?,
            confirmed: required_bool("confirmed", &raw.confirmed)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rust_decimal_macros::dec;

    use super::*;

    fn s(v: &str) -> Option<String> {
        Some(v.to_string())
    }

    fn shift_row() -> RawShiftRecordRow {
        RawShiftRecordRow {
            id: s("1"),
            physician_id: s("7"),
            contract_id: s("3"),
            shift_type_id: s("2"),
            date: s("2024-03-10"),
            competencia: None,
            quantity: s("1.5"),
            confirmed: s("true"),
        }
    }

    #[test]
    fn shift_record_defaults_competencia_to_its_month() {
        let record = ShiftRecord::try_from(shift_row()).expect("valid row");

        assert_eq!(record.competencia, Competencia::new(2024, 3).unwrap());
        assert_eq!(record.quantity, dec!(1.5));
        assert!(record.confirmed);
    }

    #[test]
    fn blank_required_field_is_missing_not_zero() {
        let mut row = shift_row();
        row.quantity = s("   ");

        assert_eq!(
            ShiftRecord::try_from(row),
            Err(IntakeError::MissingField("quantity"))
        );
    }

    #[test]
    fn absent_required_field_is_missing() {
        let row = RawPhysicianRow {
            id: s("1"),
            name: s("Dr. Ana"),
            dependents: None,
        };

        assert_eq!(
            Physician::try_from(row),
            Err(IntakeError::MissingField("dependents"))
        );
    }

    #[test]
    fn unparseable_decimal_is_invalid() {
        let mut row = shift_row();
        row.quantity = s("two");

        let err = ShiftRecord::try_from(row).unwrap_err();

        assert!(matches!(
            err,
            IntakeError::InvalidField { field: "quantity", ref value, .. } if value == "two"
        ));
    }

    #[test]
    fn negative_amount_is_invalid() {
        let mut row = shift_row();
        row.quantity = s("-1");

        assert!(matches!(
            ShiftRecord::try_from(row),
            Err(IntakeError::InvalidField {
                field: "quantity",
                ..
            })
        ));
    }

    #[test]
    fn booleans_accept_common_spellings() {
        for (raw, expected) in [("TRUE", true), ("1", true), ("no", false), ("0", false)] {
            assert_eq!(required_bool("confirmed", &s(raw)), Ok(expected));
        }
        assert!(required_bool("confirmed", &s("maybe")).is_err());
    }

    #[test]
    fn adjustment_requires_known_kind_and_timestamp() {
        let row = RawAdjustmentRow {
            id: s("1"),
            physician_id: s("7"),
            company_id: s("10"),
            hospital_id: None,
            kind: s("credit"),
            taxable: s("true"),
            recurring: s("false"),
            competencia: s("2024-03"),
            value: s("300.00"),
            description: None,
            created_at: s("2024-03-15T12:00:00Z"),
        };

        let entry = AdjustmentEntry::try_from(row.clone()).expect("valid row");
        assert_eq!(entry.kind, AdjustmentKind::Credit);
        assert_eq!(entry.description, "");
        assert_eq!(entry.hospital_id, None);

        let mut bad_kind = row.clone();
        bad_kind.kind = s("refund");
        assert!(matches!(
            AdjustmentEntry::try_from(bad_kind),
            Err(IntakeError::InvalidField { field: "kind", .. })
        ));

        let mut no_timestamp = row;
        no_timestamp.created_at = None;
        assert_eq!(
            AdjustmentEntry::try_from(no_timestamp),
            Err(IntakeError::MissingField("created_at"))
        );
    }

    #[test]
    fn bracket_row_keeps_open_upper_bound() {
        let row = RawBracketRow {
            kind: s("withholding"),
            validity_start: s("2024-01-01"),
            validity_end: None,
            dependent_deduction: s("189.59"),
            index: s("5"),
            base_from: s("4664.68"),
            base_to: s(""),
            rate: s("0.275"),
            deduction: s("896.00"),
            contribution_ceiling: None,
        };

        let parsed = BracketRow::try_from(row).expect("valid row");

        assert_eq!(parsed.kind, ContributorKind::Withholding);
        assert_eq!(parsed.dependent_deduction, dec!(189.59));
        assert_eq!(parsed.bracket.base_to, None);
        assert_eq!(parsed.bracket.index, 5);
    }

    fn withholding_row() -> RawBracketRow {
        RawBracketRow {
            kind: s("withholding"),
            validity_start: s("2024-01-01"),
            validity_end: None,
            dependent_deduction: s("189.59"),
            index: s("1"),
            base_from: s("0"),
            base_to: s("2259.20"),
            rate: s("0"),
            deduction: s("0"),
            contribution_ceiling: None,
        }
    }

    #[test]
    fn withholding_row_requires_a_dependent_deduction() {
        let mut absent = withholding_row();
        absent.dependent_deduction = None;
        let mut blank = withholding_row();
        blank.dependent_deduction = s(" ");

        assert_eq!(
            BracketRow::try_from(absent),
            Err(IntakeError::MissingField("dependent_deduction"))
        );
        assert_eq!(
            BracketRow::try_from(blank),
            Err(IntakeError::MissingField("dependent_deduction"))
        );
    }

    #[test]
    fn withholding_row_rejects_a_negative_dependent_deduction() {
        let mut row = withholding_row();
        row.dependent_deduction = s("-189.59");

        assert!(matches!(
            BracketRow::try_from(row),
            Err(IntakeError::InvalidField {
                field: "dependent_deduction",
                ..
            })
        ));
    }

    #[test]
    fn contribution_row_may_omit_the_dependent_deduction() {
        let mut row = withholding_row();
        row.kind = s("employee");
        row.dependent_deduction = None;

        let parsed = BracketRow::try_from(row).expect("valid row");

        assert_eq!(parsed.kind, ContributorKind::Employee);
        assert_eq!(parsed.dependent_deduction, Decimal::ZERO);
    }

    fn procedure_row() -> RawPrivateProcedureRow {
        RawPrivateProcedureRow {
            id: s("4"),
            physician_id: s("1"),
            company_id: s("10"),
            competencia: None,
            procedure_date: s("2024-03-18"),
            patient_name: s("M. Costa"),
            procedure_type: s("endoscopy"),
            gross_value: s("900.00"),
            net_transfer_value: s("540.00"),
            confirmed: s("true"),
            active: s("true"),
        }
    }

    #[test]
    fn procedure_defaults_competencia_to_its_month() {
        let procedure = PrivateProcedure::try_from(procedure_row()).expect("valid row");

        assert_eq!(procedure.competencia, Competencia::new(2024, 3).unwrap());
        assert_eq!(procedure.net_transfer_value, dec!(540.00));
        assert!(procedure.is_computable());
    }

    #[test]
    fn procedure_requires_its_net_transfer_value() {
        let mut missing = procedure_row();
        missing.net_transfer_value = None;
        let mut too_high = procedure_row();
        too_high.net_transfer_value = s("950.00");

        assert_eq!(
            PrivateProcedure::try_from(missing),
            Err(IntakeError::MissingField("net_transfer_value"))
        );
        assert!(matches!(
            PrivateProcedure::try_from(too_high),
            Err(IntakeError::InvalidField {
                field: "net_transfer_value",
                ..
            })
        ));
    }

    #[test]
    fn administrative_production_needs_an_ordered_period() {
        let row = RawAdministrativeProductionRow {
            id: s("2"),
            physician_id: s("1"),
            company_id: s("10"),
            competencia: s("2024-03"),
            description: s("clinical board"),
            start_date: s("2024-03-10"),
            end_date: s("2024-03-01"),
            total_value: s("1000.00"),
            confirmed: s("true"),
            active: s("true"),
        };

        assert!(matches!(
            AdministrativeProduction::try_from(row.clone()),
            Err(IntakeError::InvalidField {
                field: "end_date",
                ..
            })
        ));

        let mut open = row;
        open.end_date = None;
        let entry = AdministrativeProduction::try_from(open).expect("valid row");
        assert_eq!(entry.total_value, dec!(1000.00));
        assert_eq!(entry.end_date, None);
    }

    #[test]
    fn bond_competencia_must_be_year_month() {
        let row = RawFiscalBondRow {
            id: s("1"),
            physician_id: s("7"),
            competencia_start: s("03/2024"),
            competencia_end: None,
            responsible_tax_id: s("12.345.678/0001-90"),
            contribution_base: s("3000"),
            contribution_withheld: s("400"),
            withholding_base: s("3000"),
            withholding_amount: s("0"),
            bond_kind: s("employment"),
            active: s("true"),
        };

        assert!(matches!(
            ExternalFiscalBond::try_from(row),
            Err(IntakeError::InvalidField {
                field: "competencia_start",
                ..
            })
        ));
    }
}
