use std::collections::BTreeMap;
use std::io::Read;

use chrono::NaiveDate;
use payroll_core::{
    AdjustmentEntry, AdministrativeProduction, BracketSetError, CompanyLink, Contract,
    ContractShiftRate, ContributorKind, ExternalFiscalBond, FiscalParameters,
    ManagementCompensationEntry, NewBracketTable, PayrollRepository, Physician, PrivateProcedure,
    RepositoryError, ShiftRecord,
};
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{debug, info};

use crate::intake::{
    BracketRow, FiscalParametersRow, IntakeError, RawAdjustmentRow,
    RawAdministrativeProductionRow, RawBracketRow, RawCompanyLinkRow, RawContractRow,
    RawFiscalBondRow, RawFiscalParametersRow, RawManagementRow, RawPhysicianRow,
    RawPrivateProcedureRow, RawShiftRateRow, RawShiftRecordRow,
};

/// Errors that can occur when loading CSV data.
#[derive(Debug, Error)]
pub enum LoaderError {
    #[error("CSV parse error: {0}")]
    CsvParse(String),

    /// `line` is 1-based and counts the header.
    #[error("line {line}: {source}")]
    Intake {
        line: usize,
        #[source]
        source: IntakeError,
    },

    #[error("{} table starting {start} is invalid: {source}", kind.as_str())]
    InvalidTable {
        kind: ContributorKind,
        start: NaiveDate,
        #[source]
        source: BracketSetError,
    },

    #[error(
        "{} table starting {start} already exists with different brackets; close it and load a new one",
        kind.as_str()
    )]
    TableMismatch {
        kind: ContributorKind,
        start: NaiveDate,
    },

    #[error("fiscal parameter set {0} has rows that disagree on company or validity")]
    InconsistentParameters(i64),

    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),
}

impl From<csv::Error> for LoaderError {
    fn from(err: csv::Error) -> Self {
        LoaderError::CsvParse(err.to_string())
    }
}

/// Deserialize raw rows and validate each into `T`.
pub fn parse_rows<Raw, T, R>(reader: R) -> Result<Vec<T>, LoaderError>
where
    Raw: DeserializeOwned,
    T: TryFrom<Raw, Error = IntakeError>,
    R: Read,
{
    let mut csv_reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(reader);
    let mut rows = Vec::new();

    for (i, result) in csv_reader.deserialize::<Raw>().enumerate() {
        let raw = result?;
        let row = T::try_from(raw).map_err(|source| LoaderError::Intake {
            line: i + 2,
            source,
        })?;
        rows.push(row);
    }

    Ok(rows)
}

/// Outcome of a bracket table load.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BracketLoadSummary {
    pub inserted: usize,
    /// Tables already present with identical brackets.
    pub unchanged: usize,
}

/// Loader for bracket tables.
///
/// Rows are grouped into tables by `(kind, validity_start)`. Stored tables
/// are never rewritten: reloading an identical table is a no-op, and a
/// table that differs from the stored one is rejected.
pub struct BracketTableLoader;

impl BracketTableLoader {
    pub fn parse<R: Read>(reader: R) -> Result<Vec<NewBracketTable>, LoaderError> {
        let rows: Vec<BracketRow> = parse_rows::<RawBracketRow, _, _>(reader)?;
        Self::group(rows)
    }

    fn group(rows: Vec<BracketRow>) -> Result<Vec<NewBracketTable>, LoaderError> {
        let mut groups: BTreeMap<(ContributorKind, NaiveDate), NewBracketTable> = BTreeMap::new();

        for row in rows {
            let table = groups
                .entry((row.kind, row.validity_start))
                .or_insert_with(|| NewBracketTable {
                    kind: row.kind,
                    validity_start: row.validity_start,
                    validity_end: row.validity_end,
                    dependent_deduction: row.dependent_deduction,
                    brackets: Vec::new(),
                });
            table.brackets.push(row.bracket);
        }

        groups
            .into_values()
            .map(|mut table| {
                table.brackets.sort_by_key(|b| b.index);
                table.validate().map_err(|source| LoaderError::InvalidTable {
                    kind: table.kind,
                    start: table.validity_start,
                    source,
                })?;
                Ok(table)
            })
            .collect()
    }

    pub async fn load<R: PayrollRepository + ?Sized>(
        repo: &R,
        tables: Vec<NewBracketTable>,
    ) -> Result<BracketLoadSummary, LoaderError> {
        let mut summary = BracketLoadSummary::default();

        for table in tables {
            let existing = repo
                .list_bracket_tables(table.kind)
                .await?
                .into_iter()
                .find(|t| t.validity_start == table.validity_start);

            match existing {
                Some(stored)
                    if stored.brackets == table.brackets
                        && stored.validity_end == table.validity_end
                        && stored.dependent_deduction == table.dependent_deduction =>
                {
                    debug!(
                        table_id = stored.id,
                        kind = table.kind.as_str(),
                        "bracket table already loaded"
                    );
                    summary.unchanged += 1;
                }
                Some(_) => {
                    return Err(LoaderError::TableMismatch {
                        kind: table.kind,
                        start: table.validity_start,
                    });
                }
                None => {
                    let stored = repo.insert_bracket_table(table).await?;
                    info!(
                        table_id = stored.id,
                        kind = stored.kind.as_str(),
                        validity_start = %stored.validity_start,
                        brackets = stored.brackets.len(),
                        "bracket table loaded"
                    );
                    summary.inserted += 1;
                }
            }
        }

        Ok(summary)
    }
}

/// Which entity a source CSV holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    FiscalParameters,
    Physicians,
    CompanyLinks,
    Contracts,
    ShiftRates,
    ShiftRecords,
    PrivateProcedures,
    AdministrativeProduction,
    Adjustments,
    FiscalBonds,
    ManagementEntries,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FiscalParameters => "fiscal-parameters",
            Self::Physicians => "physicians",
            Self::CompanyLinks => "company-links",
            Self::Contracts => "contracts",
            Self::ShiftRates => "shift-rates",
            Self::ShiftRecords => "shift-records",
            Self::PrivateProcedures => "private-procedures",
            Self::AdministrativeProduction => "administrative-production",
            Self::Adjustments => "adjustments",
            Self::FiscalBonds => "fiscal-bonds",
            Self::ManagementEntries => "management-entries",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "fiscal-parameters" => Some(Self::FiscalParameters),
            "physicians" => Some(Self::Physicians),
            "company-links" => Some(Self::CompanyLinks),
            "contracts" => Some(Self::Contracts),
            "shift-rates" => Some(Self::ShiftRates),
            "shift-records" => Some(Self::ShiftRecords),
            "private-procedures" => Some(Self::PrivateProcedures),
            "administrative-production" => Some(Self::AdministrativeProduction),
            "adjustments" => Some(Self::Adjustments),
            "fiscal-bonds" => Some(Self::FiscalBonds),
            "management-entries" => Some(Self::ManagementEntries),
            _ => None,
        }
    }
}

fn group_fiscal_parameters(
    rows: Vec<FiscalParametersRow>
) -> Result<Vec<FiscalParameters>, LoaderError> {
    let mut sets: BTreeMap<i64, FiscalParameters> = BTreeMap::new();

    for row in rows {
        let set = sets.entry(row.id).or_insert_with(|| FiscalParameters {
            id: row.id,
            company_id: row.company_id,
            tax_regime: row.tax_regime.clone(),
            validity_start: row.validity_start,
            validity_end: row.validity_end,
            rates: BTreeMap::new(),
        });
        if set.company_id != row.company_id
            || set.validity_start != row.validity_start
            || set.validity_end != row.validity_end
        {
            return Err(LoaderError::InconsistentParameters(row.id));
        }
        set.rates.insert(row.fee_kind, row.rate);
    }

    Ok(sets.into_values().collect())
}

/// Loader for the source entities a computation reads.
///
/// Each entity is inserted as-is; a duplicate id surfaces as a
/// [`RepositoryError::Conflict`].
pub struct SourceLoader;

impl SourceLoader {
    /// Parse `reader` as `kind` and insert every row. Returns the number of
    /// rows inserted.
    pub async fn load<R, Rd>(
        repo: &R,
        kind: SourceKind,
        reader: Rd,
    ) -> Result<usize, LoaderError>
    where
        R: PayrollRepository + ?Sized,
        Rd: Read,
    {
        let inserted = match kind {
            SourceKind::FiscalParameters => {
                let rows = parse_rows::<RawFiscalParametersRow, FiscalParametersRow, _>(reader)?;
                let sets = group_fiscal_parameters(rows)?;
                for set in &sets {
                    repo.insert_fiscal_parameters(set).await?;
                }
                sets.len()
            }
            SourceKind::Physicians => {
                let rows = parse_rows::<RawPhysicianRow, Physician, _>(reader)?;
                for row in &rows {
                    repo.insert_physician(row).await?;
                }
                rows.len()
            }
            SourceKind::CompanyLinks => {
                let rows = parse_rows::<RawCompanyLinkRow, CompanyLink, _>(reader)?;
                for row in &rows {
                    repo.insert_company_link(row).await?;
                }
                rows.len()
            }
            SourceKind::Contracts => {
                let rows = parse_rows::<RawContractRow, Contract, _>(reader)?;
                for row in &rows {
                    repo.insert_contract(row).await?;
                }
                rows.len()
            }
            SourceKind::ShiftRates => {
                let rows = parse_rows::<RawShiftRateRow, ContractShiftRate, _>(reader)?;
                for row in &rows {
                    repo.insert_shift_rate(row).await?;
                }
                rows.len()
            }
            SourceKind::ShiftRecords => {
                let rows = parse_rows::<RawShiftRecordRow, ShiftRecord, _>(reader)?;
                for row in &rows {
                    repo.insert_shift_record(row).await?;
                }
                rows.len()
            }
            SourceKind::PrivateProcedures => {
                let rows = parse_rows::<RawPrivateProcedureRow, PrivateProcedure, _>(reader)?;
                for row in &rows {
                    repo.insert_private_procedure(row).await?;
                }
                rows.len()
            }
            SourceKind::AdministrativeProduction => {
                let rows = parse_rows::<RawAdministrativeProductionRow, AdministrativeProduction, _>(
                    reader,
                )?;
                for row in &rows {
                    repo.insert_administrative_production(row).await?;
                }
                rows.len()
            }
            SourceKind::Adjustments => {
                let rows = parse_rows::<RawAdjustmentRow, AdjustmentEntry, _>(reader)?;
                for row in &rows {
                    repo.insert_adjustment(row).await?;
                }
                rows.len()
            }
            SourceKind::FiscalBonds => {
                let rows = parse_rows::<RawFiscalBondRow, ExternalFiscalBond, _>(reader)?;
                for row in &rows {
                    repo.insert_fiscal_bond(row).await?;
                }
                rows.len()
            }
            SourceKind::ManagementEntries => {
                let rows = parse_rows::<RawManagementRow, ManagementCompensationEntry, _>(reader)?;
                for row in &rows {
                    repo.insert_management_entry(row).await?;
                }
                rows.len()
            }
        };

        info!(kind = kind.as_str(), rows = inserted, "source rows loaded");
        Ok(inserted)
    }
}
