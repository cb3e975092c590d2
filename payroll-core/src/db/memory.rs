//! In-process repository, used by tests and by the `memory` backend.

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use super::factory::{DbConfig, RepositoryFactory};
use super::repository::{PayrollRepository, RepositoryError};
use crate::models::{
    AdjustmentEntry, AdministrativeProduction, BracketTable, CompanyLink, Competencia,
    ComputationResult, Contract, ContractShiftRate, ContributorKind, ExternalFiscalBond,
    FiscalParameters, ManagementCompensationEntry, NewBracketTable, NewComputationResult,
    Physician, PrivateProcedure, ResultFamily, ShiftRecord,
};

#[derive(Debug, Default)]
struct Store {
    bracket_tables: Vec<BracketTable>,
    fiscal_parameters: Vec<FiscalParameters>,
    physicians: Vec<Physician>,
    company_links: Vec<CompanyLink>,
    contracts: Vec<Contract>,
    shift_rates: Vec<ContractShiftRate>,
    shift_records: Vec<ShiftRecord>,
    private_procedures: Vec<PrivateProcedure>,
    administrative_production: Vec<AdministrativeProduction>,
    adjustments: Vec<AdjustmentEntry>,
    fiscal_bonds: Vec<ExternalFiscalBond>,
    management_entries: Vec<ManagementCompensationEntry>,
    results: Vec<ComputationResult>,
}

#[derive(Debug, Default)]
pub struct InMemoryRepository {
    store: RwLock<Store>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

fn ensure_unique<T>(
    rows: &[T],
    id: i64,
    id_of: impl Fn(&T) -> i64,
    what: &str,
) -> Result<(), RepositoryError> {
    if rows.iter().any(|row| id_of(row) == id) {
        return Err(RepositoryError::Conflict(format!("{what} {id} already exists")));
    }
    Ok(())
}

#[async_trait]
impl PayrollRepository for InMemoryRepository {
    async fn list_bracket_tables(
        &self,
        kind: ContributorKind,
    ) -> Result<Vec<BracketTable>, RepositoryError> {
        let store = self.store.read().await;
        Ok(store
            .bracket_tables
            .iter()
            .filter(|t| t.kind == kind)
            .cloned()
            .collect())
    }

    async fn insert_bracket_table(
        &self,
        table: NewBracketTable,
    ) -> Result<BracketTable, RepositoryError> {
        let mut store = self.store.write().await;
        let id = store.bracket_tables.iter().map(|t| t.id).max().unwrap_or(0) + 1;
        let stored = BracketTable {
            id,
            kind: table.kind,
            validity_start: table.validity_start,
            validity_end: table.validity_end,
            dependent_deduction: table.dependent_deduction,
            brackets: table.brackets,
        };
        store.bracket_tables.push(stored.clone());
        Ok(stored)
    }

    async fn list_fiscal_parameters(
        &self,
        company_id: i64,
    ) -> Result<Vec<FiscalParameters>, RepositoryError> {
        let store = self.store.read().await;
        Ok(store
            .fiscal_parameters
            .iter()
            .filter(|p| p.company_id == company_id)
            .cloned()
            .collect())
    }

    async fn insert_fiscal_parameters(
        &self,
        parameters: &FiscalParameters,
    ) -> Result<(), RepositoryError> {
        let mut store = self.store.write().await;
        ensure_unique(&store.fiscal_parameters, parameters.id, |p| p.id, "fiscal parameters")?;
        store.fiscal_parameters.push(parameters.clone());
        Ok(())
    }

    async fn get_physician(&self, id: i64) -> Result<Physician, RepositoryError> {
        let store = self.store.read().await;
        store
            .physicians
            .iter()
            .find(|p| p.id == id)
            .cloned()
            .ok_or(RepositoryError::NotFound)
    }

    async fn list_physicians(&self) -> Result<Vec<Physician>, RepositoryError> {
        Ok(self.store.read().await.physicians.clone())
    }

    async fn insert_physician(&self, physician: &Physician) -> Result<(), RepositoryError> {
        let mut store = self.store.write().await;
        ensure_unique(&store.physicians, physician.id, |p| p.id, "physician")?;
        store.physicians.push(physician.clone());
        Ok(())
    }

    async fn list_company_links(
        &self,
        physician_id: i64,
    ) -> Result<Vec<CompanyLink>, RepositoryError> {
        let store = self.store.read().await;
        Ok(store
            .company_links
            .iter()
            .filter(|l| l.physician_id == physician_id)
            .cloned()
            .collect())
    }

    async fn insert_company_link(&self, link: &CompanyLink) -> Result<(), RepositoryError> {
        let mut store = self.store.write().await;
        ensure_unique(&store.company_links, link.id, |l| l.id, "company link")?;
        store.company_links.push(link.clone());
        Ok(())
    }

    async fn list_contracts(&self, company_id: i64) -> Result<Vec<Contract>, RepositoryError> {
        let store = self.store.read().await;
        Ok(store
            .contracts
            .iter()
            .filter(|c| c.company_id == company_id)
            .cloned()
            .collect())
    }

    async fn insert_contract(&self, contract: &Contract) -> Result<(), RepositoryError> {
        let mut store = self.store.write().await;
        ensure_unique(&store.contracts, contract.id, |c| c.id, "contract")?;
        store.contracts.push(contract.clone());
        Ok(())
    }

    async fn list_shift_rates(
        &self,
        contract_id: i64,
    ) -> Result<Vec<ContractShiftRate>, RepositoryError> {
        let store = self.store.read().await;
        Ok(store
            .shift_rates
            .iter()
            .filter(|r| r.contract_id == contract_id)
            .cloned()
            .collect())
    }

    async fn insert_shift_rate(&self, rate: &ContractShiftRate) -> Result<(), RepositoryError> {
        let mut store = self.store.write().await;
        ensure_unique(&store.shift_rates, rate.id, |r| r.id, "shift rate")?;
        store.shift_rates.push(rate.clone());
        Ok(())
    }

    async fn list_shift_records(
        &self,
        physician_id: i64,
        competencia: Competencia,
    ) -> Result<Vec<ShiftRecord>, RepositoryError> {
        let store = self.store.read().await;
        Ok(store
            .shift_records
            .iter()
            .filter(|s| s.physician_id == physician_id && s.competencia == competencia)
            .cloned()
            .collect())
    }

    async fn insert_shift_record(&self, record: &ShiftRecord) -> Result<(), RepositoryError> {
        let mut store = self.store.write().await;
        ensure_unique(&store.shift_records, record.id, |s| s.id, "shift record")?;
        store.shift_records.push(record.clone());
        Ok(())
    }

    async fn list_private_procedures(
        &self,
        physician_id: i64,
        competencia: Competencia,
    ) -> Result<Vec<PrivateProcedure>, RepositoryError> {
        let store = self.store.read().await;
        Ok(store
            .private_procedures
            .iter()
            .filter(|p| p.physician_id == physician_id && p.competencia == competencia)
            .cloned()
            .collect())
    }

    async fn insert_private_procedure(
        &self,
        procedure: &PrivateProcedure,
    ) -> Result<(), RepositoryError> {
        let mut store = self.store.write().await;
        ensure_unique(&store.private_procedures, procedure.id, |p| p.id, "private procedure")?;
        store.private_procedures.push(procedure.clone());
        Ok(())
    }

    async fn list_administrative_production(
        &self,
        physician_id: i64,
        competencia: Competencia,
    ) -> Result<Vec<AdministrativeProduction>, RepositoryError> {
        let store = self.store.read().await;
        Ok(store
            .administrative_production
            .iter()
            .filter(|a| a.physician_id == physician_id && a.competencia == competencia)
            .cloned()
            .collect())
    }

    async fn insert_administrative_production(
        &self,
        entry: &AdministrativeProduction,
    ) -> Result<(), RepositoryError> {
        let mut store = self.store.write().await;
        ensure_unique(
            &store.administrative_production,
            entry.id,
            |a| a.id,
            "administrative production",
        )?;
        store.administrative_production.push(entry.clone());
        Ok(())
    }

    async fn list_adjustments(
        &self,
        physician_id: i64,
        competencia: Competencia,
    ) -> Result<Vec<AdjustmentEntry>, RepositoryError> {
        let store = self.store.read().await;
        Ok(store
            .adjustments
            .iter()
            .filter(|a| a.physician_id == physician_id && a.competencia == competencia)
            .cloned()
            .collect())
    }

    async fn insert_adjustment(&self, entry: &AdjustmentEntry) -> Result<(), RepositoryError> {
        let mut store = self.store.write().await;
        ensure_unique(&store.adjustments, entry.id, |a| a.id, "adjustment")?;
        store.adjustments.push(entry.clone());
        Ok(())
    }

    async fn list_fiscal_bonds(
        &self,
        physician_id: i64,
    ) -> Result<Vec<ExternalFiscalBond>, RepositoryError> {
        let store = self.store.read().await;
        Ok(store
            .fiscal_bonds
            .iter()
            .filter(|b| b.physician_id == physician_id)
            .cloned()
            .collect())
    }

    async fn insert_fiscal_bond(&self, bond: &ExternalFiscalBond) -> Result<(), RepositoryError> {
        let mut store = self.store.write().await;
        ensure_unique(&store.fiscal_bonds, bond.id, |b| b.id, "fiscal bond")?;
        store.fiscal_bonds.push(bond.clone());
        Ok(())
    }

    async fn list_management_entries(
        &self,
        physician_id: i64,
        competencia: Competencia,
    ) -> Result<Vec<ManagementCompensationEntry>, RepositoryError> {
        let store = self.store.read().await;
        Ok(store
            .management_entries
            .iter()
            .filter(|e| e.physician_id == physician_id && e.competencia == competencia)
            .cloned()
            .collect())
    }

    async fn insert_management_entry(
        &self,
        entry: &ManagementCompensationEntry,
    ) -> Result<(), RepositoryError> {
        let mut store = self.store.write().await;
        ensure_unique(&store.management_entries, entry.id, |e| e.id, "management entry")?;
        store.management_entries.push(entry.clone());
        Ok(())
    }

    async fn append_result(
        &self,
        result: NewComputationResult,
    ) -> Result<ComputationResult, RepositoryError> {
        // One write guard covers version assignment and insertion.
        let mut store = self.store.write().await;
        let version = store
            .results
            .iter()
            .filter(|r| {
                r.family == result.family
                    && r.physician_id == result.physician_id
                    && r.competencia == result.competencia
            })
            .map(|r| r.version)
            .max()
            .unwrap_or(0)
            + 1;
        let id = store.results.len() as i64 + 1;

        let stored = ComputationResult::from_new(result, id, version, Utc::now());
        store.results.push(stored.clone());
        Ok(stored)
    }

    async fn list_results(
        &self,
        family: ResultFamily,
        physician_id: i64,
        competencia: Competencia,
    ) -> Result<Vec<ComputationResult>, RepositoryError> {
        let store = self.store.read().await;
        let mut results: Vec<ComputationResult> = store
            .results
            .iter()
            .filter(|r| {
                r.family == family && r.physician_id == physician_id && r.competencia == competencia
            })
            .cloned()
            .collect();
        results.sort_by_key(|r| r.version);
        Ok(results)
    }
}

/// Factory for the `memory` backend; the connection string is ignored.
pub struct MemoryRepositoryFactory;

#[async_trait]
impl RepositoryFactory for MemoryRepositoryFactory {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn create(
        &self,
        _config: &DbConfig,
    ) -> Result<Box<dyn PayrollRepository>, RepositoryError> {
        Ok(Box::new(InMemoryRepository::new()))
    }
}
