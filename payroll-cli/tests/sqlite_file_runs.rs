//! The binary's commands against a SQLite file reopened between runs.

use std::path::PathBuf;

use chrono::NaiveDate;
use payroll_cli::commands::{
    build_registry, open_repository, render_history, render_report, run_compute, run_history,
};
use payroll_core::db::DbConfig;
use payroll_core::{
    CancellationFlag, CompanyLink, Competencia, ComputeRequest, Contract, ContractShiftRate,
    EngineConfig, PayrollRepository, Physician, ResultFamily, ShiftRecord,
};
use pretty_assertions::assert_eq;
use rust_decimal_macros::dec;

fn date(
    y: i32,
    m: u32,
    d: u32,
) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn march() -> Competencia {
    "2024-03".parse().unwrap()
}

fn sqlite_config(path: &PathBuf) -> DbConfig {
    DbConfig {
        backend: "sqlite".to_string(),
        connection_string: path.display().to_string(),
    }
}

async fn insert_physician_month(repo: &dyn PayrollRepository) {
    repo.insert_physician(&Physician {
        id: 1,
        name: "Dr. File".to_string(),
        dependents: 0,
    })
    .await
    .unwrap();
    repo.insert_company_link(&CompanyLink {
        id: 1,
        physician_id: 1,
        company_id: 10,
        linked_on: date(2023, 1, 1),
        unlinked_on: None,
    })
    .await
    .unwrap();
    repo.insert_contract(&Contract {
        id: 1,
        company_id: 10,
        hospital_id: 100,
        number: Some("CT-7".to_string()),
        start_date: date(2024, 1, 1),
        end_date: None,
        deactivated_on: None,
    })
    .await
    .unwrap();
    repo.insert_shift_rate(&ContractShiftRate {
        id: 1,
        contract_id: 1,
        shift_type_id: 1,
        rate: dec!(600.00),
        valid_from: date(2024, 1, 1),
        valid_until: None,
    })
    .await
    .unwrap();
    repo.insert_shift_record(&ShiftRecord {
        id: 1,
        physician_id: 1,
        contract_id: 1,
        shift_type_id: 1,
        date: date(2024, 3, 12),
        competencia: march(),
        quantity: dec!(2),
        confirmed: true,
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn results_survive_reopening_and_accumulate_versions() {
    let path = std::env::temp_dir().join(format!(
        "payroll-cli-reopen-{}.db",
        std::process::id()
    ));
    let _ = std::fs::remove_file(&path);
    let config = sqlite_config(&path);
    let registry = build_registry();
    let request = ComputeRequest {
        competencia: march(),
        physician_id: None,
        family: ResultFamily::Production,
        reference_date: march().first_day(),
    };

    {
        let repo = open_repository(&registry, &config).await.unwrap();
        insert_physician_month(repo.as_ref()).await;
        let report = run_compute(repo, EngineConfig::default(), &request, &CancellationFlag::new())
            .await
            .unwrap();

        assert!(report.is_clean(), "{:#?}", report.failures);
        // 1200.00 falls in the first employee bracket: 7.5%.
        assert_eq!(report.successes[0].gross_value, dec!(1200.00));
        assert_eq!(report.successes[0].contribution_amount, dec!(90.00));

        let mut out = Vec::new();
        render_report(&report, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.ends_with("1 computed, 0 failed\n"), "{text}");
    }

    let repo = open_repository(&registry, &config).await.unwrap();
    run_compute(repo.clone(), EngineConfig::default(), &request, &CancellationFlag::new())
        .await
        .unwrap();
    let results = run_history(repo.as_ref(), ResultFamily::Production, 1, march())
        .await
        .unwrap();

    let versions: Vec<u32> = results.iter().map(|r| r.version).collect();
    assert_eq!(versions, vec![1, 2]);
    assert_eq!(results[0].contribution_amount, results[1].contribution_amount);

    let mut out = Vec::new();
    render_history(&results, &mut out).unwrap();
    let text = String::from_utf8(out).unwrap();
    assert!(text.contains("version 2 of physician 1 for 2024-03 (production)"), "{text}");

    drop(repo);
    let _ = std::fs::remove_file(&path);
}

#[tokio::test]
async fn management_run_without_entries_stores_a_zero_result() {
    let registry = build_registry();
    let repo = open_repository(&registry, &DbConfig::default()).await.unwrap();
    insert_physician_month(repo.as_ref()).await;

    let report = run_compute(
        repo.clone(),
        EngineConfig::default(),
        &ComputeRequest {
            competencia: march(),
            physician_id: Some(1),
            family: ResultFamily::ManagementCompensation,
            reference_date: march().first_day(),
        },
        &CancellationFlag::new(),
    )
    .await
    .unwrap();

    assert!(report.is_clean(), "{:#?}", report.failures);
    assert_eq!(report.successes[0].gross_value, dec!(0));
    assert_eq!(report.successes[0].net_value, dec!(0));
}
