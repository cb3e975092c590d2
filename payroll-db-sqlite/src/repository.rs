use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, SubsecRound, Utc};
use payroll_core::{
    AdjustmentEntry, AdjustmentKind, AdministrativeProduction, Annotation, AnnotationKind,
    Bracket, BracketTable, CompanyFeeKind, CompanyLink, Competencia, ComputationItem,
    ComputationResult, Contract, ContractShiftRate, ContributorKind, ExternalFiscalBond,
    FiscalParameters, ItemKind, ManagementCompensationEntry, NewBracketTable,
    NewComputationResult, PayrollRepository, Physician, PrivateProcedure, RepositoryError,
    ResultFamily, ShiftRecord,
};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, Sqlite, Transaction};
use tracing::{debug, warn};

use crate::decimal::{decimal_to_text, get_decimal, get_optional_decimal};

/// Attempts at assigning a result version before a conflict is reported.
const APPEND_ATTEMPTS: usize = 3;

pub struct SqliteRepository {
    pool: SqlitePool,
}

impl SqliteRepository {
    /// Open a database by bare file path, `:memory:`, or a `sqlite:` URL.
    ///
    /// File databases are created if missing. In-memory databases are held
    /// on a single connection that never expires, since each SQLite
    /// connection would otherwise see its own empty database.
    pub async fn new(database: &str) -> Result<Self> {
        let options = connect_options(database)
            .with_context(|| format!("Invalid database location: {}", database))?;

        let pool_options = if is_memory(database) {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new()
        };

        let pool = pool_options
            .connect_with(options)
            .await
            .with_context(|| format!("Failed to connect to database: {}", database))?;
        Ok(Self { pool })
    }

    pub async fn new_with_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("Failed to run database migrations")?;
        debug!("database migrations applied");
        Ok(())
    }

    /// Load and execute all SQL seed files from the specified directory.
    /// Files are executed in alphabetical order by filename.
    pub async fn run_seeds(
        &self,
        seeds_dir: &Path,
    ) -> Result<()> {
        let mut entries: Vec<_> = std::fs::read_dir(seeds_dir)
            .with_context(|| format!("Failed to read seeds directory '{}'", seeds_dir.display()))?
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().extension().is_some_and(|ext| ext == "sql"))
            .collect();

        entries.sort_by_key(|entry| entry.file_name());

        for entry in entries {
            let path = entry.path();
            let sql = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read seed file '{}'", path.display()))?;

            sqlx::raw_sql(&sql)
                .execute(&self.pool)
                .await
                .with_context(|| format!("Failed to execute seed file '{}'", path.display()))?;
            debug!(file = %path.display(), "seed file applied");
        }

        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn try_append(
        &self,
        result: &NewComputationResult,
    ) -> Result<ComputationResult, RepositoryError> {
        let mut tx = self.pool.begin().await.map_err(write_error)?;

        let version: i64 = sqlx::query_scalar(
            "SELECT COALESCE(MAX(version), 0) + 1 FROM computation_results
             WHERE family = ? AND physician_id = ? AND competencia = ?",
        )
        .bind(result.family.as_str())
        .bind(result.physician_id)
        .bind(result.competencia.to_string())
        .fetch_one(&mut *tx)
        .await
        .map_err(read_error)?;
        let version = u32::try_from(version)
            .map_err(|_| RepositoryError::Database(format!("Version {} out of range", version)))?;

        // Microseconds survive the TEXT round trip on every platform.
        let computed_at = Utc::now().trunc_subsecs(6);
        let inserted = sqlx::query(
            "INSERT INTO computation_results (
                family, physician_id, competencia, reference_date, version,
                gross_value, credits_total, debits_total,
                contribution_base, contribution_amount,
                external_contribution_base, external_contribution_withheld,
                internal_withholding_base, external_withholding_base,
                external_withholding_withheld,
                withholding_base, withholding_amount,
                company_fee_amount, net_value,
                contribution_table_id, withholding_table_id, computed_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(result.family.as_str())
        .bind(result.physician_id)
        .bind(result.competencia.to_string())
        .bind(result.reference_date)
        .bind(version)
        .bind(decimal_to_text(result.gross_value))
        .bind(decimal_to_text(result.credits_total))
        .bind(decimal_to_text(result.debits_total))
        .bind(decimal_to_text(result.contribution_base))
        .bind(decimal_to_text(result.contribution_amount))
        .bind(decimal_to_text(result.external_contribution_base))
        .bind(decimal_to_text(result.external_contribution_withheld))
        .bind(decimal_to_text(result.internal_withholding_base))
        .bind(decimal_to_text(result.external_withholding_base))
        .bind(decimal_to_text(result.external_withholding_withheld))
        .bind(decimal_to_text(result.withholding_base))
        .bind(decimal_to_text(result.withholding_amount))
        .bind(decimal_to_text(result.company_fee_amount))
        .bind(decimal_to_text(result.net_value))
        .bind(result.contribution_table_id)
        .bind(result.withholding_table_id)
        .bind(computed_at)
        .execute(&mut *tx)
        .await
        .map_err(write_error)?;
        let id = inserted.last_insert_rowid();

        insert_items(&mut tx, id, &result.items).await?;
        insert_annotations(&mut tx, id, &result.annotations).await?;

        tx.commit().await.map_err(write_error)?;

        Ok(ComputationResult::from_new(
            result.clone(),
            id,
            version,
            computed_at,
        ))
    }

    async fn load_result(
        &self,
        row: &SqliteRow,
    ) -> Result<ComputationResult, RepositoryError> {
        let id: i64 = column(row, "id")?;

        let items = sqlx::query(
            "SELECT sequence, kind, source_id, description, quantity, value
             FROM computation_items WHERE result_id = ? ORDER BY sequence",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await
        .map_err(read_error)?
        .iter()
        .map(row_to_item)
        .collect::<Result<Vec<_>, _>>()?;

        let annotations = sqlx::query(
            "SELECT kind, message, amount
             FROM computation_annotations WHERE result_id = ? ORDER BY position",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await
        .map_err(read_error)?
        .iter()
        .map(row_to_annotation)
        .collect::<Result<Vec<_>, _>>()?;

        let family_str: String = column(row, "family")?;
        let family = ResultFamily::parse(&family_str).ok_or_else(|| {
            RepositoryError::Database(format!("Invalid result family: {}", family_str))
        })?;

        Ok(ComputationResult {
            id,
            family,
            physician_id: column(row, "physician_id")?,
            competencia: get_competencia(row, "competencia")?,
            reference_date: column(row, "reference_date")?,
            version: column(row, "version")?,
            gross_value: get_decimal(row, "gross_value")?,
            credits_total: get_decimal(row, "credits_total")?,
            debits_total: get_decimal(row, "debits_total")?,
            contribution_base: get_decimal(row, "contribution_base")?,
            contribution_amount: get_decimal(row, "contribution_amount")?,
            external_contribution_base: get_decimal(row, "external_contribution_base")?,
            external_contribution_withheld: get_decimal(row, "external_contribution_withheld")?,
            internal_withholding_base: get_decimal(row, "internal_withholding_base")?,
            external_withholding_base: get_decimal(row, "external_withholding_base")?,
            external_withholding_withheld: get_decimal(row, "external_withholding_withheld")?,
            withholding_base: get_decimal(row, "withholding_base")?,
            withholding_amount: get_decimal(row, "withholding_amount")?,
            company_fee_amount: get_decimal(row, "company_fee_amount")?,
            net_value: get_decimal(row, "net_value")?,
            contribution_table_id: column(row, "contribution_table_id")?,
            withholding_table_id: column(row, "withholding_table_id")?,
            items,
            annotations,
            computed_at: row
                .try_get::<DateTime<Utc>, _>("computed_at")
                .map_err(|e| {
                    RepositoryError::Database(format!("Failed to get computed_at: {}", e))
                })?,
        })
    }
}

fn connect_options(database: &str) -> Result<SqliteConnectOptions> {
    let options = if database.starts_with("sqlite:") {
        SqliteConnectOptions::from_str(database)?
    } else if database == ":memory:" {
        SqliteConnectOptions::from_str("sqlite::memory:")?
    } else {
        SqliteConnectOptions::new().filename(database)
    };
    Ok(options.create_if_missing(true).foreign_keys(true))
}

fn is_memory(database: &str) -> bool {
    database.contains(":memory:") || database.contains("mode=memory")
}

fn read_error(e: sqlx::Error) -> RepositoryError {
    RepositoryError::Database(e.to_string())
}

/// Unique-constraint violations become [`RepositoryError::Conflict`].
fn write_error(e: sqlx::Error) -> RepositoryError {
    if e
        .as_database_error()
        .is_some_and(|db| db.is_unique_violation())
    {
        RepositoryError::Conflict(e.to_string())
    } else {
        RepositoryError::Database(e.to_string())
    }
}

fn column<'r, T>(
    row: &'r SqliteRow,
    name: &str,
) -> Result<T, RepositoryError>
where
    T: sqlx::Decode<'r, Sqlite> + sqlx::Type<Sqlite>,
{
    row.try_get(name)
        .map_err(|e| RepositoryError::Database(format!("Failed to get {}: {}", name, e)))
}

fn get_competencia(
    row: &SqliteRow,
    name: &str,
) -> Result<Competencia, RepositoryError> {
    let text: String = column(row, name)?;
    Competencia::from_str(&text).map_err(|e| RepositoryError::Database(e.to_string()))
}

fn get_optional_competencia(
    row: &SqliteRow,
    name: &str,
) -> Result<Option<Competencia>, RepositoryError> {
    let text: Option<String> = column(row, name)?;
    text.map(|t| Competencia::from_str(&t).map_err(|e| RepositoryError::Database(e.to_string())))
        .transpose()
}

fn row_to_bracket(row: &SqliteRow) -> Result<Bracket, RepositoryError> {
    Ok(Bracket {
        index: column(row, "idx")?,
        base_from: get_decimal(row, "base_from")?,
        base_to: get_optional_decimal(row, "base_to")?,
        rate: get_decimal(row, "rate")?,
        deduction: get_decimal(row, "deduction")?,
        contribution_ceiling: get_optional_decimal(row, "contribution_ceiling")?,
    })
}

fn row_to_physician(row: &SqliteRow) -> Result<Physician, RepositoryError> {
    Ok(Physician {
        id: column(row, "id")?,
        name: column(row, "name")?,
        dependents: column(row, "dependents")?,
    })
}

fn row_to_company_link(row: &SqliteRow) -> Result<CompanyLink, RepositoryError> {
    Ok(CompanyLink {
        id: column(row, "id")?,
        physician_id: column(row, "physician_id")?,
        company_id: column(row, "company_id")?,
        linked_on: column(row, "linked_on")?,
        unlinked_on: column(row, "unlinked_on")?,
    })
}

fn row_to_contract(row: &SqliteRow) -> Result<Contract, RepositoryError> {
    Ok(Contract {
        id: column(row, "id")?,
        company_id: column(row, "company_id")?,
        hospital_id: column(row, "hospital_id")?,
        number: column(row, "number")?,
        start_date: column(row, "start_date")?,
        end_date: column(row, "end_date")?,
        deactivated_on: column(row, "deactivated_on")?,
    })
}

fn row_to_shift_rate(row: &SqliteRow) -> Result<ContractShiftRate, RepositoryError> {
    Ok(ContractShiftRate {
        id: column(row, "id")?,
        contract_id: column(row, "contract_id")?,
        shift_type_id: column(row, "shift_type_id")?,
        rate: get_decimal(row, "rate")?,
        valid_from: column(row, "valid_from")?,
        valid_until: column(row, "valid_until")?,
    })
}

fn row_to_shift_record(row: &SqliteRow) -> Result<ShiftRecord, RepositoryError> {
    Ok(ShiftRecord {
        id: column(row, "id")?,
        physician_id: column(row, "physician_id")?,
        contract_id: column(row, "contract_id")?,
        shift_type_id: column(row, "shift_type_id")?,
        date: column(row, "date")?,
        competencia: get_competencia(row, "competencia")?,
        quantity: get_decimal(row, "quantity")?,
        confirmed: column(row, "confirmed")?,
    })
}

fn row_to_private_procedure(row: &SqliteRow) -> Result<PrivateProcedure, RepositoryError> {
    Ok(PrivateProcedure {
        id: column(row, "id")?,
        physician_id: column(row, "physician_id")?,
        company_id: column(row, "company_id")?,
        competencia: get_competencia(row, "competencia")?,
        procedure_date: column(row, "procedure_date")?,
        patient_name: column(row, "patient_name")?,
        procedure_type: column(row, "procedure_type")?,
        gross_value: get_decimal(row, "gross_value")?,
        net_transfer_value: get_decimal(row, "net_transfer_value")?,
        confirmed: column(row, "confirmed")?,
        active: column(row, "active")?,
    })
}

fn row_to_administrative_production(
    row: &SqliteRow
) -> Result<AdministrativeProduction, RepositoryError> {
    Ok(AdministrativeProduction {
        id: column(row, "id")?,
        physician_id: column(row, "physician_id")?,
        company_id: column(row, "company_id")?,
        competencia: get_competencia(row, "competencia")?,
        description: column(row, "description")?,
        start_date: column(row, "start_date")?,
        end_date: column(row, "end_date")?,
        total_value: get_decimal(row, "total_value")?,
        confirmed: column(row, "confirmed")?,
        active: column(row, "active")?,
    })
}

fn row_to_adjustment(row: &SqliteRow) -> Result<AdjustmentEntry, RepositoryError> {
    let kind_str: String = column(row, "kind")?;
    let kind = AdjustmentKind::parse(&kind_str).ok_or_else(|| {
        RepositoryError::Database(format!("Invalid adjustment kind: {}", kind_str))
    })?;

    Ok(AdjustmentEntry {
        id: column(row, "id")?,
        physician_id: column(row, "physician_id")?,
        company_id: column(row, "company_id")?,
        hospital_id: column(row, "hospital_id")?,
        kind,
        taxable: column(row, "taxable")?,
        recurring: column(row, "recurring")?,
        competencia: get_competencia(row, "competencia")?,
        value: get_decimal(row, "value")?,
        description: column(row, "description")?,
        created_at: row
            .try_get::<DateTime<Utc>, _>("created_at")
            .map_err(|e| RepositoryError::Database(format!("Failed to get created_at: {}", e)))?,
    })
}

fn row_to_fiscal_bond(row: &SqliteRow) -> Result<ExternalFiscalBond, RepositoryError> {
    Ok(ExternalFiscalBond {
        id: column(row, "id")?,
        physician_id: column(row, "physician_id")?,
        competencia_start: get_competencia(row, "competencia_start")?,
        competencia_end: get_optional_competencia(row, "competencia_end")?,
        responsible_tax_id: column(row, "responsible_tax_id")?,
        contribution_base: get_decimal(row, "contribution_base")?,
        contribution_withheld: get_decimal(row, "contribution_withheld")?,
        withholding_base: get_decimal(row, "withholding_base")?,
        withholding_amount: get_decimal(row, "withholding_amount")?,
        bond_kind: column(row, "bond_kind")?,
        active: column(row, "active")?,
    })
}

fn row_to_management_entry(row: &SqliteRow) -> Result<ManagementCompensationEntry, RepositoryError> {
    Ok(ManagementCompensationEntry {
        id: column(row, "id")?,
        physician_id: column(row, "physician_id")?,
        company_id: column(row, "company_id")?,
        competencia: get_competencia(row, "competencia")?,
        date: column(row, "date")?,
        description: column(row, "description")?,
        gross_value: get_decimal(row, "gross_value")?,
        taxable: column(row, "taxable")?,
        confirmed: column(row, "confirmed")?,
    })
}

fn row_to_item(row: &SqliteRow) -> Result<ComputationItem, RepositoryError> {
    let kind_str: String = column(row, "kind")?;
    let kind = ItemKind::parse(&kind_str)
        .ok_or_else(|| RepositoryError::Database(format!("Invalid item kind: {}", kind_str)))?;

    Ok(ComputationItem {
        sequence: column(row, "sequence")?,
        kind,
        source_id: column(row, "source_id")?,
        description: column(row, "description")?,
        quantity: get_optional_decimal(row, "quantity")?,
        value: get_decimal(row, "value")?,
    })
}

fn row_to_annotation(row: &SqliteRow) -> Result<Annotation, RepositoryError> {
    let kind_str: String = column(row, "kind")?;
    let kind = AnnotationKind::parse(&kind_str).ok_or_else(|| {
        RepositoryError::Database(format!("Invalid annotation kind: {}", kind_str))
    })?;

    Ok(Annotation {
        kind,
        message: column(row, "message")?,
        amount: get_optional_decimal(row, "amount")?,
    })
}

async fn insert_items(
    tx: &mut Transaction<'_, Sqlite>,
    result_id: i64,
    items: &[ComputationItem],
) -> Result<(), RepositoryError> {
    for item in items {
        sqlx::query(
            "INSERT INTO computation_items
                (result_id, sequence, kind, source_id, description, quantity, value)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(result_id)
        .bind(item.sequence)
        .bind(item.kind.as_str())
        .bind(item.source_id)
        .bind(&item.description)
        .bind(item.quantity.map(decimal_to_text))
        .bind(decimal_to_text(item.value))
        .execute(&mut **tx)
        .await
        .map_err(write_error)?;
    }
    Ok(())
}

async fn insert_annotations(
    tx: &mut Transaction<'_, Sqlite>,
    result_id: i64,
    annotations: &[Annotation],
) -> Result<(), RepositoryError> {
    for (position, annotation) in annotations.iter().enumerate() {
        sqlx::query(
            "INSERT INTO computation_annotations (result_id, position, kind, message, amount)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(result_id)
        .bind(position as i64)
        .bind(annotation.kind.as_str())
        .bind(&annotation.message)
        .bind(annotation.amount.map(decimal_to_text))
        .execute(&mut **tx)
        .await
        .map_err(write_error)?;
    }
    Ok(())
}

#[async_trait]
impl PayrollRepository for SqliteRepository {
    async fn list_bracket_tables(
        &self,
        kind: ContributorKind,
    ) -> Result<Vec<BracketTable>, RepositoryError> {
        let table_rows = sqlx::query(
            "SELECT id, validity_start, validity_end, dependent_deduction
             FROM bracket_tables WHERE kind = ? ORDER BY validity_start, id",
        )
        .bind(kind.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(read_error)?;

        let bracket_rows = sqlx::query(
            "SELECT b.table_id, b.idx, b.base_from, b.base_to, b.rate, b.deduction,
                    b.contribution_ceiling
             FROM brackets b JOIN bracket_tables t ON t.id = b.table_id
             WHERE t.kind = ? ORDER BY b.table_id, b.idx",
        )
        .bind(kind.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(read_error)?;

        let mut brackets: BTreeMap<i64, Vec<Bracket>> = BTreeMap::new();
        for row in &bracket_rows {
            let table_id: i64 = column(row, "table_id")?;
            brackets
                .entry(table_id)
                .or_default()
                .push(row_to_bracket(row)?);
        }

        table_rows
            .iter()
            .map(|row| {
                let id: i64 = column(row, "id")?;
                Ok(BracketTable {
                    id,
                    kind,
                    validity_start: column(row, "validity_start")?,
                    validity_end: column(row, "validity_end")?,
                    dependent_deduction: get_decimal(row, "dependent_deduction")?,
                    brackets: brackets.remove(&id).unwrap_or_default(),
                })
            })
            .collect()
    }

    async fn insert_bracket_table(
        &self,
        table: NewBracketTable,
    ) -> Result<BracketTable, RepositoryError> {
        let mut tx = self.pool.begin().await.map_err(write_error)?;

        let inserted = sqlx::query(
            "INSERT INTO bracket_tables (kind, validity_start, validity_end, dependent_deduction)
             VALUES (?, ?, ?, ?)",
        )
        .bind(table.kind.as_str())
        .bind(table.validity_start)
        .bind(table.validity_end)
        .bind(decimal_to_text(table.dependent_deduction))
        .execute(&mut *tx)
        .await
        .map_err(write_error)?;
        let id = inserted.last_insert_rowid();

        for bracket in &table.brackets {
            sqlx::query(
                "INSERT INTO brackets
                    (table_id, idx, base_from, base_to, rate, deduction, contribution_ceiling)
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(id)
            .bind(bracket.index)
            .bind(decimal_to_text(bracket.base_from))
            .bind(bracket.base_to.map(decimal_to_text))
            .bind(decimal_to_text(bracket.rate))
            .bind(decimal_to_text(bracket.deduction))
            .bind(bracket.contribution_ceiling.map(decimal_to_text))
            .execute(&mut *tx)
            .await
            .map_err(write_error)?;
        }

        tx.commit().await.map_err(write_error)?;

        Ok(BracketTable {
            id,
            kind: table.kind,
            validity_start: table.validity_start,
            validity_end: table.validity_end,
            dependent_deduction: table.dependent_deduction,
            brackets: table.brackets,
        })
    }

    async fn list_fiscal_parameters(
        &self,
        company_id: i64,
    ) -> Result<Vec<FiscalParameters>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, company_id, tax_regime, validity_start, validity_end
             FROM fiscal_parameters WHERE company_id = ? ORDER BY validity_start, id",
        )
        .bind(company_id)
        .fetch_all(&self.pool)
        .await
        .map_err(read_error)?;

        let rate_rows = sqlx::query(
            "SELECT r.parameters_id, r.fee_kind, r.rate
             FROM fiscal_parameter_rates r
             JOIN fiscal_parameters p ON p.id = r.parameters_id
             WHERE p.company_id = ?",
        )
        .bind(company_id)
        .fetch_all(&self.pool)
        .await
        .map_err(read_error)?;

        let mut rates: BTreeMap<i64, BTreeMap<CompanyFeeKind, _>> = BTreeMap::new();
        for row in &rate_rows {
            let kind_str: String = column(row, "fee_kind")?;
            let kind = CompanyFeeKind::parse(&kind_str).ok_or_else(|| {
                RepositoryError::Database(format!("Invalid fee kind: {}", kind_str))
            })?;
            rates
                .entry(column(row, "parameters_id")?)
                .or_default()
                .insert(kind, get_decimal(row, "rate")?);
        }

        rows.iter()
            .map(|row| {
                let id: i64 = column(row, "id")?;
                Ok(FiscalParameters {
                    id,
                    company_id: column(row, "company_id")?,
                    tax_regime: column(row, "tax_regime")?,
                    validity_start: column(row, "validity_start")?,
                    validity_end: column(row, "validity_end")?,
                    rates: rates.remove(&id).unwrap_or_default(),
                })
            })
            .collect()
    }

    async fn insert_fiscal_parameters(
        &self,
        parameters: &FiscalParameters,
    ) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await.map_err(write_error)?;

        sqlx::query(
            "INSERT INTO fiscal_parameters (id, company_id, tax_regime, validity_start, validity_end)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(parameters.id)
        .bind(parameters.company_id)
        .bind(&parameters.tax_regime)
        .bind(parameters.validity_start)
        .bind(parameters.validity_end)
        .execute(&mut *tx)
        .await
        .map_err(write_error)?;

        for (kind, rate) in &parameters.rates {
            sqlx::query(
                "INSERT INTO fiscal_parameter_rates (parameters_id, fee_kind, rate)
                 VALUES (?, ?, ?)",
            )
            .bind(parameters.id)
            .bind(kind.as_str())
            .bind(decimal_to_text(*rate))
            .execute(&mut *tx)
            .await
            .map_err(write_error)?;
        }

        tx.commit().await.map_err(write_error)
    }

    async fn get_physician(&self, id: i64) -> Result<Physician, RepositoryError> {
        let row = sqlx::query("SELECT id, name, dependents FROM physicians WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(read_error)?
            .ok_or(RepositoryError::NotFound)?;

        row_to_physician(&row)
    }

    async fn list_physicians(&self) -> Result<Vec<Physician>, RepositoryError> {
        let rows = sqlx::query("SELECT id, name, dependents FROM physicians ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .map_err(read_error)?;

        rows.iter().map(row_to_physician).collect()
    }

    async fn insert_physician(&self, physician: &Physician) -> Result<(), RepositoryError> {
        sqlx::query("INSERT INTO physicians (id, name, dependents) VALUES (?, ?, ?)")
            .bind(physician.id)
            .bind(&physician.name)
            .bind(physician.dependents)
            .execute(&self.pool)
            .await
            .map_err(write_error)?;
        Ok(())
    }

    async fn list_company_links(
        &self,
        physician_id: i64,
    ) -> Result<Vec<CompanyLink>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, physician_id, company_id, linked_on, unlinked_on
             FROM company_links WHERE physician_id = ? ORDER BY id",
        )
        .bind(physician_id)
        .fetch_all(&self.pool)
        .await
        .map_err(read_error)?;

        rows.iter().map(row_to_company_link).collect()
    }

    async fn insert_company_link(&self, link: &CompanyLink) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO company_links (id, physician_id, company_id, linked_on, unlinked_on)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(link.id)
        .bind(link.physician_id)
        .bind(link.company_id)
        .bind(link.linked_on)
        .bind(link.unlinked_on)
        .execute(&self.pool)
        .await
        .map_err(write_error)?;
        Ok(())
    }

    async fn list_contracts(&self, company_id: i64) -> Result<Vec<Contract>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, company_id, hospital_id, number, start_date, end_date, deactivated_on
             FROM contracts WHERE company_id = ? ORDER BY id",
        )
        .bind(company_id)
        .fetch_all(&self.pool)
        .await
        .map_err(read_error)?;

        rows.iter().map(row_to_contract).collect()
    }

    async fn insert_contract(&self, contract: &Contract) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO contracts
                (id, company_id, hospital_id, number, start_date, end_date, deactivated_on)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(contract.id)
        .bind(contract.company_id)
        .bind(contract.hospital_id)
        .bind(&contract.number)
        .bind(contract.start_date)
        .bind(contract.end_date)
        .bind(contract.deactivated_on)
        .execute(&self.pool)
        .await
        .map_err(write_error)?;
        Ok(())
    }

    async fn list_shift_rates(
        &self,
        contract_id: i64,
    ) -> Result<Vec<ContractShiftRate>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, contract_id, shift_type_id, rate, valid_from, valid_until
             FROM contract_shift_rates WHERE contract_id = ? ORDER BY id",
        )
        .bind(contract_id)
        .fetch_all(&self.pool)
        .await
        .map_err(read_error)?;

        rows.iter().map(row_to_shift_rate).collect()
    }

    async fn insert_shift_rate(&self, rate: &ContractShiftRate) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO contract_shift_rates
                (id, contract_id, shift_type_id, rate, valid_from, valid_until)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(rate.id)
        .bind(rate.contract_id)
        .bind(rate.shift_type_id)
        .bind(decimal_to_text(rate.rate))
        .bind(rate.valid_from)
        .bind(rate.valid_until)
        .execute(&self.pool)
        .await
        .map_err(write_error)?;
        Ok(())
    }

    async fn list_shift_records(
        &self,
        physician_id: i64,
        competencia: Competencia,
    ) -> Result<Vec<ShiftRecord>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, physician_id, contract_id, shift_type_id, date, competencia,
                    quantity, confirmed
             FROM shift_records WHERE physician_id = ? AND competencia = ? ORDER BY id",
        )
        .bind(physician_id)
        .bind(competencia.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(read_error)?;

        rows.iter().map(row_to_shift_record).collect()
    }

    async fn insert_shift_record(&self, record: &ShiftRecord) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO shift_records
                (id, physician_id, contract_id, shift_type_id, date, competencia,
                 quantity, confirmed)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(record.id)
        .bind(record.physician_id)
        .bind(record.contract_id)
        .bind(record.shift_type_id)
        .bind(record.date)
        .bind(record.competencia.to_string())
        .bind(decimal_to_text(record.quantity))
        .bind(record.confirmed)
        .execute(&self.pool)
        .await
        .map_err(write_error)?;
        Ok(())
    }

    async fn list_private_procedures(
        &self,
        physician_id: i64,
        competencia: Competencia,
    ) -> Result<Vec<PrivateProcedure>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, physician_id, company_id, competencia, procedure_date, patient_name,
                    procedure_type, gross_value, net_transfer_value, confirmed, active
             FROM private_procedures WHERE physician_id = ? AND competencia = ? ORDER BY id",
        )
        .bind(physician_id)
        .bind(competencia.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(read_error)?;

        rows.iter().map(row_to_private_procedure).collect()
    }

    async fn insert_private_procedure(
        &self,
        procedure: &PrivateProcedure,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO private_procedures
                (id, physician_id, company_id, competencia, procedure_date, patient_name,
                 procedure_type, gross_value, net_transfer_value, confirmed, active)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(procedure.id)
        .bind(procedure.physician_id)
        .bind(procedure.company_id)
        .bind(procedure.competencia.to_string())
        .bind(procedure.procedure_date)
        .bind(&procedure.patient_name)
        .bind(&procedure.procedure_type)
        .bind(decimal_to_text(procedure.gross_value))
        .bind(decimal_to_text(procedure.net_transfer_value))
        .bind(procedure.confirmed)
        .bind(procedure.active)
        .execute(&self.pool)
        .await
        .map_err(write_error)?;
        Ok(())
    }

    async fn list_administrative_production(
        &self,
        physician_id: i64,
        competencia: Competencia,
    ) -> Result<Vec<AdministrativeProduction>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, physician_id, company_id, competencia, description, start_date,
                    end_date, total_value, confirmed, active
             FROM administrative_production
             WHERE physician_id = ? AND competencia = ? ORDER BY id",
        )
        .bind(physician_id)
        .bind(competencia.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(read_error)?;

        rows.iter().map(row_to_administrative_production).collect()
    }

    async fn insert_administrative_production(
        &self,
        entry: &AdministrativeProduction,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO administrative_production
                (id, physician_id, company_id, competencia, description, start_date,
                 end_date, total_value, confirmed, active)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(entry.id)
        .bind(entry.physician_id)
        .bind(entry.company_id)
        .bind(entry.competencia.to_string())
        .bind(&entry.description)
        .bind(entry.start_date)
        .bind(entry.end_date)
        .bind(decimal_to_text(entry.total_value))
        .bind(entry.confirmed)
        .bind(entry.active)
        .execute(&self.pool)
        .await
        .map_err(write_error)?;
        Ok(())
    }

    async fn list_adjustments(
        &self,
        physician_id: i64,
        competencia: Competencia,
    ) -> Result<Vec<AdjustmentEntry>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, physician_id, company_id, hospital_id, kind, taxable, recurring,
                    competencia, value, description, created_at
             FROM adjustment_entries WHERE physician_id = ? AND competencia = ?
             ORDER BY created_at, id",
        )
        .bind(physician_id)
        .bind(competencia.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(read_error)?;

        rows.iter().map(row_to_adjustment).collect()
    }

    async fn insert_adjustment(&self, entry: &AdjustmentEntry) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO adjustment_entries
                (id, physician_id, company_id, hospital_id, kind, taxable, recurring,
                 competencia, value, description, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(entry.id)
        .bind(entry.physician_id)
        .bind(entry.company_id)
        .bind(entry.hospital_id)
        .bind(entry.kind.as_str())
        .bind(entry.taxable)
        .bind(entry.recurring)
        .bind(entry.competencia.to_string())
        .bind(decimal_to_text(entry.value))
        .bind(&entry.description)
        .bind(entry.created_at)
        .execute(&self.pool)
        .await
        .map_err(write_error)?;
        Ok(())
    }

    async fn list_fiscal_bonds(
        &self,
        physician_id: i64,
    ) -> Result<Vec<ExternalFiscalBond>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, physician_id, competencia_start, competencia_end, responsible_tax_id,
                    contribution_base, contribution_withheld, withholding_base,
                    withholding_amount, bond_kind, active
             FROM external_fiscal_bonds WHERE physician_id = ? ORDER BY id",
        )
        .bind(physician_id)
        .fetch_all(&self.pool)
        .await
        .map_err(read_error)?;

        rows.iter().map(row_to_fiscal_bond).collect()
    }

    async fn insert_fiscal_bond(&self, bond: &ExternalFiscalBond) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO external_fiscal_bonds
                (id, physician_id, competencia_start, competencia_end, responsible_tax_id,
                 contribution_base, contribution_withheld, withholding_base,
                 withholding_amount, bond_kind, active)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(bond.id)
        .bind(bond.physician_id)
        .bind(bond.competencia_start.to_string())
        .bind(bond.competencia_end.map(|c| c.to_string()))
        .bind(&bond.responsible_tax_id)
        .bind(decimal_to_text(bond.contribution_base))
        .bind(decimal_to_text(bond.contribution_withheld))
        .bind(decimal_to_text(bond.withholding_base))
        .bind(decimal_to_text(bond.withholding_amount))
        .bind(&bond.bond_kind)
        .bind(bond.active)
        .execute(&self.pool)
        .await
        .map_err(write_error)?;
        Ok(())
    }

    async fn list_management_entries(
        &self,
        physician_id: i64,
        competencia: Competencia,
    ) -> Result<Vec<ManagementCompensationEntry>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, physician_id, company_id, competencia, date, description,
                    gross_value, taxable, confirmed
             FROM management_entries WHERE physician_id = ? AND competencia = ? ORDER BY id",
        )
        .bind(physician_id)
        .bind(competencia.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(read_error)?;

        rows.iter().map(row_to_management_entry).collect()
    }

    async fn insert_management_entry(
        &self,
        entry: &ManagementCompensationEntry,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO management_entries
                (id, physician_id, company_id, competencia, date, description,
                 gross_value, taxable, confirmed)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(entry.id)
        .bind(entry.physician_id)
        .bind(entry.company_id)
        .bind(entry.competencia.to_string())
        .bind(entry.date)
        .bind(&entry.description)
        .bind(decimal_to_text(entry.gross_value))
        .bind(entry.taxable)
        .bind(entry.confirmed)
        .execute(&self.pool)
        .await
        .map_err(write_error)?;
        Ok(())
    }

    async fn append_result(
        &self,
        result: NewComputationResult,
    ) -> Result<ComputationResult, RepositoryError> {
        let mut attempt = 1;
        loop {
            match self.try_append(&result).await {
                Err(RepositoryError::Conflict(msg)) if attempt < APPEND_ATTEMPTS => {
                    warn!(
                        physician_id = result.physician_id,
                        competencia = %result.competencia,
                        attempt,
                        "result version collided, retrying: {}",
                        msg
                    );
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    async fn list_results(
        &self,
        family: ResultFamily,
        physician_id: i64,
        competencia: Competencia,
    ) -> Result<Vec<ComputationResult>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT * FROM computation_results
             WHERE family = ? AND physician_id = ? AND competencia = ?
             ORDER BY version",
        )
        .bind(family.as_str())
        .bind(physician_id)
        .bind(competencia.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(read_error)?;

        let mut results = Vec::with_capacity(rows.len());
        for row in &rows {
            results.push(self.load_result(row).await?);
        }
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;
    use rust_decimal_macros::dec;

    use super::*;

    async fn setup_test_db() -> SqliteRepository {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("Failed to create in-memory database");

        let repo = SqliteRepository::new_with_pool(pool).await;
        repo.run_migrations()
            .await
            .expect("Failed to run migrations");
        repo
    }

    fn date(
        y: i32,
        m: u32,
        d: u32,
    ) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn march() -> Competencia {
        Competencia::new(2024, 3).unwrap()
    }

    fn flat_table(kind: ContributorKind) -> NewBracketTable {
        NewBracketTable {
            kind,
            validity_start: date(2024, 1, 1),
            validity_end: None,
            dependent_deduction: dec!(189.59),
            brackets: vec![Bracket {
                index: 0,
                base_from: dec!(0),
                base_to: None,
                rate: dec!(0.11),
                deduction: dec!(0),
                contribution_ceiling: Some(dec!(550.00)),
            }],
        }
    }

    fn new_result(
        physician_id: i64,
        table_id: i64,
    ) -> NewComputationResult {
        NewComputationResult {
            family: ResultFamily::Production,
            physician_id,
            competencia: march(),
            reference_date: date(2024, 3, 1),
            gross_value: dec!(2400.00),
            credits_total: dec!(0),
            debits_total: dec!(0),
            contribution_base: dec!(2400.00),
            contribution_amount: dec!(264.00),
            external_contribution_base: dec!(0),
            external_contribution_withheld: dec!(0),
            internal_withholding_base: dec!(2400.00),
            external_withholding_base: dec!(300.00),
            external_withholding_withheld: dec!(15.00),
            withholding_base: dec!(2400.00),
            withholding_amount: dec!(240.00),
            company_fee_amount: dec!(0),
            net_value: dec!(1896.00),
            contribution_table_id: table_id,
            withholding_table_id: table_id,
            items: vec![ComputationItem {
                sequence: 1,
                kind: ItemKind::ProductionLine,
                source_id: Some(7),
                description: "contract 7 shift type 1".to_string(),
                quantity: Some(dec!(2)),
                value: dec!(2400.00),
            }],
            annotations: vec![Annotation::new(
                AnnotationKind::PartialData,
                "company 10 has no fiscal parameters",
                Some(dec!(2400.00)),
            )],
        }
    }

    async fn insert_test_physician(repo: &SqliteRepository) {
        repo.insert_physician(&Physician {
            id: 1,
            name: "Dr. Test".to_string(),
            dependents: 2,
        })
        .await
        .expect("Failed to insert physician");
    }

    #[tokio::test]
    async fn test_bracket_table_round_trip() {
        let repo = setup_test_db().await;

        let stored = repo
            .insert_bracket_table(flat_table(ContributorKind::Employee))
            .await
            .expect("Should insert table");
        let tables = repo
            .list_bracket_tables(ContributorKind::Employee)
            .await
            .expect("Should list tables");

        assert_eq!(tables, vec![stored]);
        assert_eq!(tables[0].brackets[0].contribution_ceiling, Some(dec!(550.00)));
        assert!(
            repo.list_bracket_tables(ContributorKind::Withholding)
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn test_second_open_table_of_a_kind_conflicts() {
        let repo = setup_test_db().await;
        repo.insert_bracket_table(flat_table(ContributorKind::Employee))
            .await
            .unwrap();

        let result = repo
            .insert_bracket_table(flat_table(ContributorKind::Employee))
            .await;

        assert!(matches!(result, Err(RepositoryError::Conflict(_))));
        // The failed insert left no partial brackets behind.
        assert_eq!(
            repo.list_bracket_tables(ContributorKind::Employee)
                .await
                .unwrap()
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn test_physician_lookup() {
        let repo = setup_test_db().await;
        insert_test_physician(&repo).await;

        let physician = repo.get_physician(1).await.expect("Should find physician");
        assert_eq!(physician.dependents, 2);
        assert_eq!(repo.get_physician(2).await, Err(RepositoryError::NotFound));
    }

    #[tokio::test]
    async fn test_duplicate_physician_conflicts() {
        let repo = setup_test_db().await;
        insert_test_physician(&repo).await;

        let result = repo
            .insert_physician(&Physician {
                id: 1,
                name: "Dr. Duplicate".to_string(),
                dependents: 0,
            })
            .await;

        assert!(matches!(result, Err(RepositoryError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_shift_records_filtered_by_competencia() {
        let repo = setup_test_db().await;
        insert_test_physician(&repo).await;

        let shifts = [
            (1, date(2024, 3, 5), march()),
            (2, date(2024, 4, 2), march().next()),
        ];
        for (id, day, competencia) in shifts {
            repo.insert_shift_record(&ShiftRecord {
                id,
                physician_id: 1,
                contract_id: 7,
                shift_type_id: 1,
                date: day,
                competencia,
                quantity: dec!(1.5),
                confirmed: true,
            })
            .await
            .unwrap();
        }

        let records = repo.list_shift_records(1, march()).await.unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, 1);
        assert_eq!(records[0].quantity, dec!(1.5));
        assert!(records[0].confirmed);
    }

    #[tokio::test]
    async fn test_direct_production_round_trip() {
        let repo = setup_test_db().await;
        insert_test_physician(&repo).await;

        repo.insert_private_procedure(&PrivateProcedure {
            id: 4,
            physician_id: 1,
            company_id: 10,
            competencia: march(),
            procedure_date: date(2024, 3, 18),
            patient_name: "M. Costa".to_string(),
            procedure_type: "endoscopy".to_string(),
            gross_value: dec!(900.00),
            net_transfer_value: dec!(540.00),
            confirmed: true,
            active: false,
        })
        .await
        .unwrap();
        repo.insert_administrative_production(&AdministrativeProduction {
            id: 2,
            physician_id: 1,
            company_id: 10,
            competencia: march(),
            description: "clinical board".to_string(),
            start_date: date(2024, 3, 1),
            end_date: None,
            total_value: dec!(1000.00),
            confirmed: true,
            active: true,
        })
        .await
        .unwrap();

        let procedures = repo.list_private_procedures(1, march()).await.unwrap();
        let administrative = repo.list_administrative_production(1, march()).await.unwrap();

        assert_eq!(procedures.len(), 1);
        assert_eq!(procedures[0].net_transfer_value, dec!(540.00));
        assert_eq!(procedures[0].net_transfer_value.scale(), 2);
        assert!(!procedures[0].active);
        assert_eq!(administrative[0].end_date, None);
        assert_eq!(administrative[0].total_value, dec!(1000.00));
        assert!(
            repo.list_private_procedures(1, march().next())
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn test_duplicate_private_procedure_conflicts() {
        let repo = setup_test_db().await;
        insert_test_physician(&repo).await;
        let procedure = PrivateProcedure {
            id: 4,
            physician_id: 1,
            company_id: 10,
            competencia: march(),
            procedure_date: date(2024, 3, 18),
            patient_name: "M. Costa".to_string(),
            procedure_type: "endoscopy".to_string(),
            gross_value: dec!(900.00),
            net_transfer_value: dec!(540.00),
            confirmed: true,
            active: true,
        };
        repo.insert_private_procedure(&procedure).await.unwrap();

        let result = repo.insert_private_procedure(&procedure).await;

        assert!(matches!(result, Err(RepositoryError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_fiscal_parameters_round_trip() {
        let repo = setup_test_db().await;
        let parameters = FiscalParameters {
            id: 3,
            company_id: 10,
            tax_regime: "presumed_profit".to_string(),
            validity_start: date(2024, 1, 1),
            validity_end: None,
            rates: BTreeMap::from([
                (CompanyFeeKind::AdministrativeFee, dec!(0.02)),
                (CompanyFeeKind::ServiceTax, dec!(0.05)),
            ]),
        };

        repo.insert_fiscal_parameters(&parameters).await.unwrap();

        assert_eq!(repo.list_fiscal_parameters(10).await.unwrap(), vec![parameters]);
        assert!(repo.list_fiscal_parameters(11).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_adjustments_ordered_by_creation() {
        let repo = setup_test_db().await;
        insert_test_physician(&repo).await;

        let created = |h| {
            date(2024, 3, 10)
                .and_hms_opt(h, 0, 0)
                .unwrap()
                .and_utc()
        };
        for (id, hour) in [(1, 12), (2, 9)] {
            repo.insert_adjustment(&AdjustmentEntry {
                id,
                physician_id: 1,
                company_id: 10,
                hospital_id: None,
                kind: AdjustmentKind::Credit,
                taxable: true,
                recurring: false,
                competencia: march(),
                value: dec!(50.00),
                description: "bonus".to_string(),
                created_at: created(hour),
            })
            .await
            .unwrap();
        }

        let entries = repo.list_adjustments(1, march()).await.unwrap();

        assert_eq!(entries.iter().map(|e| e.id).collect::<Vec<_>>(), vec![2, 1]);
        assert_eq!(entries[0].created_at, created(9));
    }

    #[tokio::test]
    async fn test_fiscal_bond_open_range_round_trip() {
        let repo = setup_test_db().await;
        insert_test_physician(&repo).await;
        let bond = ExternalFiscalBond {
            id: 4,
            physician_id: 1,
            competencia_start: march(),
            competencia_end: None,
            responsible_tax_id: "12.345.678/0001-90".to_string(),
            contribution_base: dec!(4000.00),
            contribution_withheld: dec!(440.00),
            withholding_base: dec!(4000.00),
            withholding_amount: dec!(263.87),
            bond_kind: "employment".to_string(),
            active: true,
        };

        repo.insert_fiscal_bond(&bond).await.unwrap();

        assert_eq!(repo.list_fiscal_bonds(1).await.unwrap(), vec![bond]);
    }

    #[tokio::test]
    async fn test_append_result_assigns_versions() {
        let repo = setup_test_db().await;
        let table = repo
            .insert_bracket_table(flat_table(ContributorKind::Employee))
            .await
            .unwrap();

        let first = repo.append_result(new_result(1, table.id)).await.unwrap();
        let second = repo.append_result(new_result(1, table.id)).await.unwrap();
        let other = repo.append_result(new_result(2, table.id)).await.unwrap();

        assert_eq!((first.version, second.version, other.version), (1, 2, 1));

        let history = repo
            .list_results(ResultFamily::Production, 1, march())
            .await
            .unwrap();
        assert_eq!(history, vec![first, second.clone()]);
        assert_eq!(
            repo.latest_result(ResultFamily::Production, 1, march())
                .await
                .unwrap(),
            second
        );
        assert!(repo.has_result(1, march()).await.unwrap());
        assert!(!repo.has_result(3, march()).await.unwrap());
    }

    #[tokio::test]
    async fn test_results_are_append_only() {
        let repo = setup_test_db().await;
        let table = repo
            .insert_bracket_table(flat_table(ContributorKind::Employee))
            .await
            .unwrap();
        let stored = repo.append_result(new_result(1, table.id)).await.unwrap();

        let update = sqlx::query("UPDATE computation_results SET net_value = '0' WHERE id = ?")
            .bind(stored.id)
            .execute(repo.pool())
            .await;
        let delete_item = sqlx::query("DELETE FROM computation_items WHERE result_id = ?")
            .bind(stored.id)
            .execute(repo.pool())
            .await;

        assert!(update.unwrap_err().to_string().contains("append-only"));
        assert!(delete_item.unwrap_err().to_string().contains("append-only"));
        assert_eq!(
            repo.latest_result(ResultFamily::Production, 1, march())
                .await
                .unwrap(),
            stored
        );
    }

    #[tokio::test]
    async fn test_referenced_bracket_table_cannot_be_deleted() {
        let repo = setup_test_db().await;
        let used = repo
            .insert_bracket_table(flat_table(ContributorKind::Employee))
            .await
            .unwrap();
        let unused = repo
            .insert_bracket_table(flat_table(ContributorKind::FlatRate))
            .await
            .unwrap();
        repo.append_result(new_result(1, used.id)).await.unwrap();

        let blocked = sqlx::query("DELETE FROM brackets WHERE table_id = ?")
            .bind(used.id)
            .execute(repo.pool())
            .await;
        assert!(blocked.unwrap_err().to_string().contains("referenced"));

        sqlx::query("DELETE FROM brackets WHERE table_id = ?")
            .bind(unused.id)
            .execute(repo.pool())
            .await
            .expect("Unreferenced brackets can be removed");
    }

    #[tokio::test]
    async fn test_referenced_fiscal_parameters_cannot_be_deleted() {
        let repo = setup_test_db().await;
        let table = repo
            .insert_bracket_table(flat_table(ContributorKind::Employee))
            .await
            .unwrap();
        repo.insert_fiscal_parameters(&FiscalParameters {
            id: 3,
            company_id: 10,
            tax_regime: "simple".to_string(),
            validity_start: date(2024, 1, 1),
            validity_end: None,
            rates: BTreeMap::from([(CompanyFeeKind::AdministrativeFee, dec!(0.05))]),
        })
        .await
        .unwrap();

        let mut result = new_result(1, table.id);
        result.items.push(ComputationItem {
            sequence: 2,
            kind: ItemKind::CompanyFee,
            source_id: Some(3),
            description: "administrative_fee for company 10".to_string(),
            quantity: None,
            value: dec!(120.00),
        });
        repo.append_result(result).await.unwrap();

        let blocked = sqlx::query("DELETE FROM fiscal_parameter_rates WHERE parameters_id = 3")
            .execute(repo.pool())
            .await;

        assert!(blocked.unwrap_err().to_string().contains("referenced"));
    }

    #[tokio::test]
    async fn test_new_opens_file_database_and_migrates() {
        let dir = std::env::temp_dir().join(format!("payroll-sqlite-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("payroll.db");
        let _ = std::fs::remove_file(&path);

        let repo = SqliteRepository::new(path.to_str().unwrap())
            .await
            .expect("Should create database file");
        repo.run_migrations().await.expect("Should migrate");
        insert_test_physician(&repo).await;

        assert!(path.exists());
        assert_eq!(repo.list_physicians().await.unwrap().len(), 1);

        repo.pool().close().await;
        let _ = std::fs::remove_dir_all(&dir);
    }
}
