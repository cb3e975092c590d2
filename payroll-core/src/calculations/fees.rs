//! Company-level fees layered on top of the bracket computation.
//!
//! Each company's production is charged at the rates of the fiscal
//! parameter set active on the reference date.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use tracing::warn;

use super::common::round_half_up;
use crate::models::{Annotation, AnnotationKind, CompanyFeeKind, FiscalParameters};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeeLine {
    pub company_id: i64,
    pub parameters_id: i64,
    pub kind: CompanyFeeKind,
    pub rate: Decimal,
    pub base: Decimal,
    pub amount: Decimal,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeeSummary {
    /// Ordered by company id, then fee kind.
    pub lines: Vec<FeeLine>,
    pub total: Decimal,
    pub annotations: Vec<Annotation>,
}

/// Applies the active parameter set of each company to its production value.
///
/// `parameters` holds every set known for the companies in `value_by_company`.
/// A company without an active set is charged nothing and annotated.
pub fn company_fees(
    value_by_company: &BTreeMap<i64, Decimal>,
    parameters: &[FiscalParameters],
    reference_date: NaiveDate,
) -> FeeSummary {
    let mut summary = FeeSummary::default();

    for (&company_id, &base) in value_by_company {
        let active = parameters
            .iter()
            .filter(|p| p.company_id == company_id && p.covers(reference_date))
            .max_by_key(|p| (p.validity_start, p.id));

        let Some(params) = active else {
            warn!(company_id, %reference_date, "no fiscal parameters active; fees skipped");
            summary.annotations.push(Annotation::new(
                AnnotationKind::PartialData,
                format!("company {company_id} has no fiscal parameters on {reference_date}"),
                Some(base),
            ));
            continue;
        };

        for (&kind, &rate) in &params.rates {
            let amount = round_half_up(base * rate);
            if amount.is_zero() {
                continue;
            }
            summary.total += amount;
            summary.lines.push(FeeLine {
                company_id,
                parameters_id: params.id,
                kind,
                rate,
                base,
                amount,
            });
        }
    }

    summary
}
