//! Loading CSV fixtures into a migrated SQLite database and computing from them.

use std::sync::Arc;

use chrono::NaiveDate;
use payroll_core::{
    Competencia, ComputeRequest, ContributorKind, EngineConfig, PayrollEngine, PayrollRepository,
    ResultFamily,
};
use payroll_data::{BracketLoadSummary, BracketTableLoader, LoaderError, SourceKind, SourceLoader};
use payroll_db_sqlite::SqliteRepository;
use pretty_assertions::assert_eq;
use rust_decimal_macros::dec;
use sqlx::sqlite::SqlitePoolOptions;

const BRACKETS_CSV: &str = include_str!("../test-data/bracket_tables_2024.csv");
const PHYSICIANS_CSV: &str = include_str!("../test-data/physicians.csv");
const COMPANY_LINKS_CSV: &str = include_str!("../test-data/company_links.csv");
const CONTRACTS_CSV: &str = include_str!("../test-data/contracts.csv");
const SHIFT_RATES_CSV: &str = include_str!("../test-data/shift_rates.csv");
const SHIFT_RECORDS_CSV: &str = include_str!("../test-data/shift_records.csv");
const ADJUSTMENTS_CSV: &str = include_str!("../test-data/adjustments.csv");
const FISCAL_PARAMETERS_CSV: &str = include_str!("../test-data/fiscal_parameters.csv");
const PRIVATE_PROCEDURES_CSV: &str = include_str!("../test-data/private_procedures.csv");
const ADMINISTRATIVE_PRODUCTION_CSV: &str =
    include_str!("../test-data/administrative_production.csv");

/// Migrations only; no seed tables.
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

async fn load_fixtures(repo: &SqliteRepository) {
    let tables = BracketTableLoader::parse(BRACKETS_CSV.as_bytes()).expect("Failed to parse");
    BracketTableLoader::load(repo, tables)
        .await
        .expect("Failed to load brackets");

    for (kind, csv) in [
        (SourceKind::Physicians, PHYSICIANS_CSV),
        (SourceKind::CompanyLinks, COMPANY_LINKS_CSV),
        (SourceKind::Contracts, CONTRACTS_CSV),
        (SourceKind::ShiftRates, SHIFT_RATES_CSV),
        (SourceKind::ShiftRecords, SHIFT_RECORDS_CSV),
        (SourceKind::Adjustments, ADJUSTMENTS_CSV),
        (SourceKind::FiscalParameters, FISCAL_PARAMETERS_CSV),
    ] {
        SourceLoader::load(repo, kind, csv.as_bytes())
            .await
            .unwrap_or_else(|e| panic!("Failed to load {}: {e}", kind.as_str()));
    }
}

fn march() -> Competencia {
    Competencia::new(2024, 3).unwrap()
}

#[tokio::test]
async fn test_load_all_2024_tables() {
    let repo = setup_test_db().await;

    let tables = BracketTableLoader::parse(BRACKETS_CSV.as_bytes()).expect("Failed to parse CSV");
    let summary = BracketTableLoader::load(&repo, tables)
        .await
        .expect("Failed to load brackets");

    assert_eq!(summary, BracketLoadSummary { inserted: 3, unchanged: 0 });

    let withholding = repo
        .list_bracket_tables(ContributorKind::Withholding)
        .await
        .unwrap();
    assert_eq!(withholding.len(), 1);
    assert_eq!(withholding[0].brackets.len(), 5);
    assert_eq!(withholding[0].dependent_deduction, dec!(189.59));
    assert_eq!(withholding[0].brackets[4].base_to, None);
}

#[tokio::test]
async fn test_reload_of_tables_is_idempotent() {
    let repo = setup_test_db().await;

    for _ in 0..2 {
        let tables = BracketTableLoader::parse(BRACKETS_CSV.as_bytes()).unwrap();
        BracketTableLoader::load(&repo, tables).await.unwrap();
    }

    assert_eq!(
        repo.list_bracket_tables(ContributorKind::Employee)
            .await
            .unwrap()
            .len(),
        1
    );
}

#[tokio::test]
async fn test_orphan_shift_record_is_rejected_by_foreign_key() {
    let repo = setup_test_db().await;

    let result =
        SourceLoader::load(&repo, SourceKind::ShiftRecords, SHIFT_RECORDS_CSV.as_bytes()).await;

    assert!(matches!(result, Err(LoaderError::Repository(_))));
}

#[tokio::test]
async fn test_loaded_month_computes() {
    let repo = setup_test_db().await;
    load_fixtures(&repo).await;
    let repo = Arc::new(repo);
    let engine = PayrollEngine::new(repo.clone(), EngineConfig::default()).unwrap();

    let report = engine
        .compute(&ComputeRequest {
            competencia: march(),
            physician_id: None,
            family: ResultFamily::Production,
            reference_date: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
        })
        .await
        .expect("sweep should run");

    assert!(report.is_clean(), "{:#?}", report.failures);
    assert_eq!(report.successes.len(), 2);

    // Physician 1: confirmed shifts 1200 + 800; the unconfirmed one is ignored.
    let ana = &report.successes[0];
    assert_eq!(ana.physician_id, 1);
    assert_eq!(ana.gross_value, dec!(2000.00));
    assert_eq!(ana.contribution_amount, dec!(158.82));
    assert_eq!(ana.company_fee_amount, dec!(100.00));

    // Physician 2: three shifts at 600.
    let bruno = &report.successes[1];
    assert_eq!(bruno.gross_value, dec!(1800.00));

    let stored = repo
        .latest_result(ResultFamily::Production, 1, march())
        .await
        .unwrap();
    assert_eq!(&stored, ana);
}

#[tokio::test]
async fn test_direct_production_joins_gross_without_fees() {
    let repo = setup_test_db().await;
    load_fixtures(&repo).await;
    SourceLoader::load(
        &repo,
        SourceKind::PrivateProcedures,
        PRIVATE_PROCEDURES_CSV.as_bytes(),
    )
    .await
    .unwrap();
    SourceLoader::load(
        &repo,
        SourceKind::AdministrativeProduction,
        ADMINISTRATIVE_PRODUCTION_CSV.as_bytes(),
    )
    .await
    .unwrap();
    let engine = PayrollEngine::new(Arc::new(repo), EngineConfig::default()).unwrap();

    let report = engine
        .compute(&ComputeRequest {
            competencia: march(),
            physician_id: Some(2),
            family: ResultFamily::Production,
            reference_date: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
        })
        .await
        .unwrap();

    // 1800 of shifts, the confirmed procedure at its 200 net transfer and
    // 300 of board work. The administrative fee only applies to the shifts.
    let bruno = &report.successes[0];
    assert_eq!(bruno.gross_value, dec!(2300.00));
    assert_eq!(bruno.company_fee_amount, dec!(90.00));
}
