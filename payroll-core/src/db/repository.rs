use async_trait::async_trait;
use thiserror::Error;

use crate::models::{
    AdjustmentEntry, AdministrativeProduction, BracketTable, CompanyLink, Competencia,
    ComputationResult, Contract, ContractShiftRate, ContributorKind, ExternalFiscalBond,
    FiscalParameters, ManagementCompensationEntry, NewBracketTable, NewComputationResult,
    Physician, PrivateProcedure, ResultFamily, ShiftRecord,
};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RepositoryError {
    #[error("Record not found")]
    NotFound,

    #[error("Database error: {0}")]
    Database(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A write collided with an existing row (duplicate id or result version).
    #[error("Conflict: {0}")]
    Conflict(String),
}

/// Read access to the source entities plus the append-only result store.
///
/// List methods return every row matching the filter; temporal and
/// activity filtering is left to the calculation layer so that historical
/// rows resolve the same way on every replay.
#[async_trait]
pub trait PayrollRepository: Send + Sync {
    // Bracket tables
    async fn list_bracket_tables(
        &self,
        kind: ContributorKind,
    ) -> Result<Vec<BracketTable>, RepositoryError>;

    async fn insert_bracket_table(
        &self,
        table: NewBracketTable,
    ) -> Result<BracketTable, RepositoryError>;

    // Fiscal parameters
    async fn list_fiscal_parameters(
        &self,
        company_id: i64,
    ) -> Result<Vec<FiscalParameters>, RepositoryError>;

    async fn insert_fiscal_parameters(
        &self,
        parameters: &FiscalParameters,
    ) -> Result<(), RepositoryError>;

    // Physicians
    async fn get_physician(&self, id: i64) -> Result<Physician, RepositoryError>;
    async fn list_physicians(&self) -> Result<Vec<Physician>, RepositoryError>;
    async fn insert_physician(&self, physician: &Physician) -> Result<(), RepositoryError>;

    async fn list_company_links(
        &self,
        physician_id: i64,
    ) -> Result<Vec<CompanyLink>, RepositoryError>;

    async fn insert_company_link(&self, link: &CompanyLink) -> Result<(), RepositoryError>;

    // Contracts and production
    async fn list_contracts(&self, company_id: i64) -> Result<Vec<Contract>, RepositoryError>;
    async fn insert_contract(&self, contract: &Contract) -> Result<(), RepositoryError>;

    async fn list_shift_rates(
        &self,
        contract_id: i64,
    ) -> Result<Vec<ContractShiftRate>, RepositoryError>;

    async fn insert_shift_rate(&self, rate: &ContractShiftRate) -> Result<(), RepositoryError>;

    async fn list_shift_records(
        &self,
        physician_id: i64,
        competencia: Competencia,
    ) -> Result<Vec<ShiftRecord>, RepositoryError>;

    async fn insert_shift_record(&self, record: &ShiftRecord) -> Result<(), RepositoryError>;

    async fn list_private_procedures(
        &self,
        physician_id: i64,
        competencia: Competencia,
    ) -> Result<Vec<PrivateProcedure>, RepositoryError>;

    async fn insert_private_procedure(
        &self,
        procedure: &PrivateProcedure,
    ) -> Result<(), RepositoryError>;

    async fn list_administrative_production(
        &self,
        physician_id: i64,
        competencia: Competencia,
    ) -> Result<Vec<AdministrativeProduction>, RepositoryError>;

    async fn insert_administrative_production(
        &self,
        entry: &AdministrativeProduction,
    ) -> Result<(), RepositoryError>;

    // Adjustments
    async fn list_adjustments(
        &self,
        physician_id: i64,
        competencia: Competencia,
    ) -> Result<Vec<AdjustmentEntry>, RepositoryError>;

    async fn insert_adjustment(&self, entry: &AdjustmentEntry) -> Result<(), RepositoryError>;

    // External fiscal bonds
    async fn list_fiscal_bonds(
        &self,
        physician_id: i64,
    ) -> Result<Vec<ExternalFiscalBond>, RepositoryError>;

    async fn insert_fiscal_bond(&self, bond: &ExternalFiscalBond) -> Result<(), RepositoryError>;

    // Management compensation
    async fn list_management_entries(
        &self,
        physician_id: i64,
        competencia: Competencia,
    ) -> Result<Vec<ManagementCompensationEntry>, RepositoryError>;

    async fn insert_management_entry(
        &self,
        entry: &ManagementCompensationEntry,
    ) -> Result<(), RepositoryError>;

    // Results (append-only)

    /// Stores a new snapshot as the next version for its
    /// `(family, physician_id, competencia)` key.
    async fn append_result(
        &self,
        result: NewComputationResult,
    ) -> Result<ComputationResult, RepositoryError>;

    /// Every version for the key, ascending by version.
    async fn list_results(
        &self,
        family: ResultFamily,
        physician_id: i64,
        competencia: Competencia,
    ) -> Result<Vec<ComputationResult>, RepositoryError>;

    async fn latest_result(
        &self,
        family: ResultFamily,
        physician_id: i64,
        competencia: Competencia,
    ) -> Result<ComputationResult, RepositoryError> {
        self.list_results(family, physician_id, competencia)
            .await?
            .pop()
            .ok_or(RepositoryError::NotFound)
    }

    /// Whether any result of either family exists for the physician and competencia.
    async fn has_result(
        &self,
        physician_id: i64,
        competencia: Competencia,
    ) -> Result<bool, RepositoryError> {
        for family in [ResultFamily::Production, ResultFamily::ManagementCompensation] {
            if !self
                .list_results(family, physician_id, competencia)
                .await?
                .is_empty()
            {
                return Ok(true);
            }
        }
        Ok(false)
    }
}
