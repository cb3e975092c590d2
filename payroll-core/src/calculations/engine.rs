//! Computation runs.
//!
//! A run loads the bracket tables once, then computes each requested
//! physician independently: everything happens in memory and only the
//! final append touches the store. A failing physician is reported and the
//! rest of the sweep carries on.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::NaiveDate;
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use super::adjustments::AdjustmentLedger;
use super::cancel::CancellationFlag;
use super::error::ComputationError;
use super::fees::company_fees;
use super::management::{ManagementAssembly, assemble_management};
use super::production::{ProductionSources, aggregate};
use super::resolver::BracketTableSet;
use super::writer::{ProductionAssembly, assemble_production, persist};
use crate::db::repository::{PayrollRepository, RepositoryError};
use crate::models::{
    Competencia, ComputationResult, ContributorKind, NewComputationResult, Physician,
    ResultFamily,
};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EngineConfigError {
    #[error("max_concurrency must be at least 1")]
    ZeroConcurrency,
}

/// Tunables for a [`PayrollEngine`].
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Upper bound on physicians computed at the same time in a sweep.
    pub max_concurrency: usize,
    /// Subtract the internal contribution from the withholding base before
    /// evaluating it.
    pub deduct_contribution_from_withholding: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 8,
            deduct_contribution_from_withholding: false,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), EngineConfigError> {
        if self.max_concurrency == 0 {
            return Err(EngineConfigError::ZeroConcurrency);
        }
        Ok(())
    }
}

/// What to compute. The reference date is always explicit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComputeRequest {
    pub competencia: Competencia,
    /// `None` sweeps every physician.
    pub physician_id: Option<i64>,
    pub family: ResultFamily,
    /// Date used to resolve bracket tables and fiscal parameters.
    pub reference_date: NaiveDate,
}

impl ComputeRequest {
    pub fn sweep(
        competencia: Competencia,
        family: ResultFamily,
        reference_date: NaiveDate,
    ) -> Self {
        Self {
            competencia,
            physician_id: None,
            family,
            reference_date,
        }
    }

    pub fn physician(
        competencia: Competencia,
        physician_id: i64,
        family: ResultFamily,
        reference_date: NaiveDate,
    ) -> Self {
        Self {
            competencia,
            physician_id: Some(physician_id),
            family,
            reference_date,
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct ComputeFailure {
    pub physician_id: i64,
    pub error: ComputationError,
}

/// Outcome of a run, successes and failures sorted by physician id.
#[derive(Debug, PartialEq, Eq)]
pub struct ComputeReport {
    pub competencia: Competencia,
    pub family: ResultFamily,
    pub successes: Vec<ComputationResult>,
    pub failures: Vec<ComputeFailure>,
    /// The run was cancelled; physicians not yet scheduled were skipped.
    pub cancelled: bool,
}

impl ComputeReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty() && !self.cancelled
    }
}

pub struct PayrollEngine {
    repository: Arc<dyn PayrollRepository>,
    config: EngineConfig,
}

impl PayrollEngine {
    pub fn new(
        repository: Arc<dyn PayrollRepository>,
        config: EngineConfig,
    ) -> Result<Self, EngineConfigError> {
        config.validate()?;
        Ok(Self { repository, config })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub async fn compute(
        &self,
        request: &ComputeRequest,
    ) -> Result<ComputeReport, ComputationError> {
        self.compute_with_cancellation(request, &CancellationFlag::new())
            .await
    }

    /// Runs `request`, checking `cancel` before scheduling each physician
    /// and before each write.
    ///
    /// # Errors
    ///
    /// Only failures that affect the whole run are returned here (loading
    /// bracket tables or the physician list). Per-physician failures are
    /// listed in the report.
    pub async fn compute_with_cancellation(
        &self,
        request: &ComputeRequest,
        cancel: &CancellationFlag,
    ) -> Result<ComputeReport, ComputationError> {
        let tables = Arc::new(self.load_tables().await?);

        let physician_ids: Vec<i64> = match request.physician_id {
            Some(id) => vec![id],
            None => {
                let mut ids: Vec<i64> = self
                    .repository
                    .list_physicians()
                    .await?
                    .into_iter()
                    .map(|p| p.id)
                    .collect();
                ids.sort_unstable();
                ids
            }
        };

        info!(
            competencia = %request.competencia,
            family = request.family.as_str(),
            reference_date = %request.reference_date,
            physicians = physician_ids.len(),
            "starting computation run"
        );

        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrency));
        let mut tasks = JoinSet::new();
        let mut scheduled = BTreeSet::new();
        let mut cancelled = false;

        for physician_id in physician_ids {
            if cancel.is_cancelled() {
                warn!(physician_id, "run cancelled; remaining physicians not scheduled");
                cancelled = true;
                break;
            }
            let Ok(permit) = semaphore.clone().acquire_owned().await else {
                break;
            };
            // Cancellation may have been raised while waiting for a permit.
            if cancel.is_cancelled() {
                cancelled = true;
                break;
            }

            let job = PhysicianJob {
                repository: Arc::clone(&self.repository),
                tables: Arc::clone(&tables),
                request: *request,
                physician_id,
                deduct_contribution_from_withholding: self
                    .config
                    .deduct_contribution_from_withholding,
                cancel: cancel.clone(),
            };
            scheduled.insert(physician_id);
            tasks.spawn(async move {
                let outcome = job.run().await;
                drop(permit);
                (physician_id, outcome)
            });
        }

        let mut successes = Vec::new();
        let mut failures = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((physician_id, Ok(result))) => {
                    scheduled.remove(&physician_id);
                    successes.push(result);
                }
                Ok((physician_id, Err(error))) => {
                    scheduled.remove(&physician_id);
                    error!(physician_id, %error, "physician computation failed");
                    failures.push(ComputeFailure { physician_id, error });
                }
                Err(join_error) => {
                    error!(%join_error, "physician task did not complete");
                }
            }
        }
        // Whatever is left never reported back.
        for physician_id in scheduled {
            failures.push(ComputeFailure {
                physician_id,
                error: ComputationError::Aborted,
            });
        }

        successes.sort_by_key(|r| r.physician_id);
        failures.sort_by_key(|f| f.physician_id);

        info!(
            competencia = %request.competencia,
            family = request.family.as_str(),
            successes = successes.len(),
            failures = failures.len(),
            cancelled,
            "computation run finished"
        );

        Ok(ComputeReport {
            competencia: request.competencia,
            family: request.family,
            successes,
            failures,
            cancelled: cancelled || cancel.is_cancelled(),
        })
    }

    async fn load_tables(&self) -> Result<BracketTableSet, ComputationError> {
        let mut tables = Vec::new();
        for kind in [
            ContributorKind::Employee,
            ContributorKind::FlatRate,
            ContributorKind::Withholding,
        ] {
            tables.extend(self.repository.list_bracket_tables(kind).await?);
        }
        debug!(tables = tables.len(), "loaded bracket tables");
        Ok(BracketTableSet::new(tables))
    }
}

/// One physician's computation, owned so it can run on its own task.
struct PhysicianJob {
    repository: Arc<dyn PayrollRepository>,
    tables: Arc<BracketTableSet>,
    request: ComputeRequest,
    physician_id: i64,
    deduct_contribution_from_withholding: bool,
    cancel: CancellationFlag,
}

impl PhysicianJob {
    async fn run(self) -> Result<ComputationResult, ComputationError> {
        let physician = match self.repository.get_physician(self.physician_id).await {
            Ok(p) => p,
            Err(RepositoryError::NotFound) => {
                return Err(ComputationError::PhysicianNotFound(self.physician_id));
            }
            Err(e) => return Err(e.into()),
        };

        let result = match self.request.family {
            ResultFamily::Production => self.production(&physician).await?,
            ResultFamily::ManagementCompensation => self.management(&physician).await?,
        };

        persist(self.repository.as_ref(), result, &self.cancel).await
    }

    /// Latest stored result of `family` for this physician and month. It is
    /// an external source for the family being computed.
    async fn other_family_result(
        &self,
        family: ResultFamily,
        physician_id: i64,
    ) -> Result<Option<ComputationResult>, ComputationError> {
        match self
            .repository
            .latest_result(family, physician_id, self.request.competencia)
            .await
        {
            Ok(result) => {
                debug!(
                    physician_id,
                    family = family.as_str(),
                    version = result.version,
                    "found result of the other family"
                );
                Ok(Some(result))
            }
            Err(RepositoryError::NotFound) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn production(
        &self,
        physician: &Physician,
    ) -> Result<NewComputationResult, ComputationError> {
        let ComputeRequest {
            competencia,
            reference_date,
            ..
        } = self.request;
        let repo = self.repository.as_ref();

        let contribution_table = self
            .tables
            .resolve(reference_date, ContributorKind::Employee)?;
        let withholding_table = self
            .tables
            .resolve(reference_date, ContributorKind::Withholding)?;

        let links = repo.list_company_links(physician.id).await?;
        let companies: BTreeSet<i64> = links
            .iter()
            .filter(|l| {
                l.linked_on <= competencia.last_day()
                    && l.unlinked_on.is_none_or(|off| off > competencia.first_day())
            })
            .map(|l| l.company_id)
            .collect();

        let mut contracts = Vec::new();
        for &company_id in &companies {
            contracts.extend(repo.list_contracts(company_id).await?);
        }
        let mut rates = Vec::new();
        for contract in contracts.iter().filter(|c| c.overlaps(competencia)) {
            rates.extend(repo.list_shift_rates(contract.id).await?);
        }
        let shifts = repo.list_shift_records(physician.id, competencia).await?;
        let procedures = repo.list_private_procedures(physician.id, competencia).await?;
        let administrative = repo
            .list_administrative_production(physician.id, competencia)
            .await?;

        let production = aggregate(
            physician.id,
            competencia,
            ProductionSources {
                links: &links,
                contracts: &contracts,
                rates: &rates,
                shifts: &shifts,
                procedures: &procedures,
                administrative: &administrative,
            },
        );

        let adjustments = AdjustmentLedger::fold(
            physician.id,
            competencia,
            &repo.list_adjustments(physician.id, competencia).await?,
        );
        let bonds = repo.list_fiscal_bonds(physician.id).await?;
        let other_family = self
            .other_family_result(ResultFamily::ManagementCompensation, physician.id)
            .await?;

        let value_by_company = production.value_by_company();
        let mut parameters = Vec::new();
        for &company_id in value_by_company.keys() {
            parameters.extend(repo.list_fiscal_parameters(company_id).await?);
        }
        let fees = company_fees(&value_by_company, &parameters, reference_date);

        Ok(assemble_production(ProductionAssembly {
            physician,
            competencia,
            reference_date,
            production,
            adjustments,
            bonds: &bonds,
            other_family: other_family.as_ref(),
            fees,
            contribution_table,
            withholding_table,
            deduct_contribution_from_withholding: self.deduct_contribution_from_withholding,
        }))
    }

    async fn management(
        &self,
        physician: &Physician,
    ) -> Result<NewComputationResult, ComputationError> {
        let ComputeRequest {
            competencia,
            reference_date,
            ..
        } = self.request;
        let repo = self.repository.as_ref();

        let contribution_table = self
            .tables
            .resolve(reference_date, ContributorKind::FlatRate)?;
        let withholding_table = self
            .tables
            .resolve(reference_date, ContributorKind::Withholding)?;

        let entries = repo
            .list_management_entries(physician.id, competencia)
            .await?;
        let bonds = repo.list_fiscal_bonds(physician.id).await?;
        let other_family = self
            .other_family_result(ResultFamily::Production, physician.id)
            .await?;

        Ok(assemble_management(ManagementAssembly {
            physician,
            competencia,
            reference_date,
            entries: &entries,
            bonds: &bonds,
            other_family: other_family.as_ref(),
            contribution_table,
            withholding_table,
            deduct_contribution_from_withholding: self.deduct_contribution_from_withholding,
        }))
    }
}
