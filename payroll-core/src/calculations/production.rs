//! Production aggregation.
//!
//! Executed shifts are valued at the contract's rate for the shift type as
//! of the shift date, then summed per `(contract, shift type)`. A shift whose
//! contract or rate cannot be resolved for its date is skipped and recorded
//! as a `PartialData` annotation; the rest of the month still computes.
//!
//! Private procedures (at their net transfer value) and administrative
//! production (at their total value) are added to gross as one line each.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use tracing::{debug, warn};

use super::common::round_half_up;
use crate::models::{
    AdministrativeProduction, Annotation, AnnotationKind, CompanyLink, Competencia, Contract,
    ContractShiftRate, ItemKind, PrivateProcedure, ShiftRecord,
};

/// Source rows the aggregator needs for one physician and competencia.
#[derive(Debug, Clone, Copy)]
pub struct ProductionSources<'a> {
    pub links: &'a [CompanyLink],
    /// Contracts of every company the physician is or was linked to.
    pub contracts: &'a [Contract],
    pub rates: &'a [ContractShiftRate],
    pub shifts: &'a [ShiftRecord],
    pub procedures: &'a [PrivateProcedure],
    pub administrative: &'a [AdministrativeProduction],
}

/// Value produced under one `(contract, shift type)` pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductionLine {
    pub contract_id: i64,
    pub company_id: i64,
    pub shift_type_id: i64,
    pub quantity: Decimal,
    pub value: Decimal,
}

/// Production that carries its own value: a private procedure or an
/// administrative production entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectLine {
    pub kind: ItemKind,
    pub source_id: i64,
    pub description: String,
    pub value: Decimal,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProductionSummary {
    /// Shift lines plus direct lines.
    pub gross_value: Decimal,
    /// Ordered by contract id, then shift type id.
    pub lines: Vec<ProductionLine>,
    /// Procedures by date, then administrative production by start date.
    pub direct: Vec<DirectLine>,
    pub annotations: Vec<Annotation>,
}

impl ProductionSummary {
    /// Shift line values summed per company, for fee calculation. Direct
    /// lines carry no company fee.
    pub fn value_by_company(&self) -> BTreeMap<i64, Decimal> {
        let mut totals = BTreeMap::new();
        for line in &self.lines {
            *totals.entry(line.company_id).or_insert(Decimal::ZERO) += line.value;
        }
        totals
    }
}

/// Values the confirmed shifts, procedures and administrative production of
/// `physician_id` in `competencia`.
pub fn aggregate(
    physician_id: i64,
    competencia: Competencia,
    sources: ProductionSources<'_>,
) -> ProductionSummary {
    let contracts: BTreeMap<i64, &Contract> = sources.contracts.iter().map(|c| (c.id, c)).collect();

    let mut pairs: BTreeMap<(i64, i64), ProductionLine> = BTreeMap::new();
    let mut annotations = Vec::new();

    let mut shifts: Vec<&ShiftRecord> = sources
        .shifts
        .iter()
        .filter(|s| s.physician_id == physician_id && s.competencia == competencia && s.confirmed)
        .collect();
    shifts.sort_by_key(|s| (s.date, s.id));

    for shift in shifts {
        let rate = match resolve_rate(shift, &contracts, sources) {
            Ok(rate) => rate,
            Err(reason) => {
                warn!(
                    physician_id,
                    %competencia,
                    shift_id = shift.id,
                    contract_id = shift.contract_id,
                    %reason,
                    "skipping shift record"
                );
                annotations.push(Annotation::new(
                    AnnotationKind::PartialData,
                    format!("shift record {} on {} skipped: {reason}", shift.id, shift.date),
                    None,
                ));
                continue;
            }
        };

        let value = round_half_up(shift.quantity * rate.rate);
        let line = pairs
            .entry((shift.contract_id, shift.shift_type_id))
            .or_insert_with(|| ProductionLine {
                contract_id: shift.contract_id,
                company_id: rate.company_id,
                shift_type_id: shift.shift_type_id,
                quantity: Decimal::ZERO,
                value: Decimal::ZERO,
            });
        line.quantity += shift.quantity;
        line.value += value;
    }

    let lines: Vec<ProductionLine> = pairs.into_values().filter(|l| !l.value.is_zero()).collect();
    let direct = direct_lines(physician_id, competencia, sources);
    let gross_value = lines.iter().map(|l| l.value).sum::<Decimal>()
        + direct.iter().map(|l| l.value).sum::<Decimal>();

    debug!(
        physician_id,
        %competencia,
        lines = lines.len(),
        direct = direct.len(),
        %gross_value,
        "aggregated production"
    );

    ProductionSummary {
        gross_value,
        lines,
        direct,
        annotations,
    }
}

fn direct_lines(
    physician_id: i64,
    competencia: Competencia,
    sources: ProductionSources<'_>,
) -> Vec<DirectLine> {
    let mut procedures: Vec<&PrivateProcedure> = sources
        .procedures
        .iter()
        .filter(|p| {
            p.physician_id == physician_id && p.competencia == competencia && p.is_computable()
        })
        .collect();
    procedures.sort_by_key(|p| (p.procedure_date, p.id));

    let mut administrative: Vec<&AdministrativeProduction> = sources
        .administrative
        .iter()
        .filter(|a| {
            a.physician_id == physician_id && a.competencia == competencia && a.is_computable()
        })
        .collect();
    administrative.sort_by_key(|a| (a.start_date, a.id));

    let procedure_lines = procedures.into_iter().map(|p| DirectLine {
        kind: ItemKind::PrivateProcedure,
        source_id: p.id,
        description: format!("{} for {} on {}", p.procedure_type, p.patient_name, p.procedure_date),
        value: round_half_up(p.net_transfer_value),
    });
    let administrative_lines = administrative.into_iter().map(|a| DirectLine {
        kind: ItemKind::AdministrativeProduction,
        source_id: a.id,
        description: a.description.clone(),
        value: round_half_up(a.total_value),
    });

    procedure_lines
        .chain(administrative_lines)
        .filter(|l| !l.value.is_zero())
        .collect()
}

struct ResolvedRate {
    company_id: i64,
    rate: Decimal,
}

fn resolve_rate(
    shift: &ShiftRecord,
    contracts: &BTreeMap<i64, &Contract>,
    sources: ProductionSources<'_>,
) -> Result<ResolvedRate, String> {
    let contract = contracts
        .get(&shift.contract_id)
        .ok_or_else(|| format!("contract {} not found", shift.contract_id))?;

    if !linked_on(sources.links, contract.company_id, shift.date) {
        return Err(format!(
            "company {} not linked to the physician on that date",
            contract.company_id
        ));
    }
    if !contract.is_active_on(shift.date) {
        return Err(format!("contract {} inactive on that date", contract.id));
    }

    // Several active rates for one pair: the most recent one wins.
    sources
        .rates
        .iter()
        .filter(|r| {
            r.contract_id == contract.id
                && r.shift_type_id == shift.shift_type_id
                && r.is_active_on(shift.date)
        })
        .max_by_key(|r| (r.valid_from, r.id))
        .map(|r| ResolvedRate {
            company_id: contract.company_id,
            rate: r.rate,
        })
        .ok_or_else(|| {
            format!(
                "no active rate for shift type {} on contract {}",
                shift.shift_type_id, contract.id
            )
        })
}

fn linked_on(
    links: &[CompanyLink],
    company_id: i64,
    date: NaiveDate,
) -> bool {
    links
        .iter()
        .any(|l| l.company_id == company_id && l.is_active_on(date))
}
