use std::io::{self, Write};
use std::sync::Arc;

use anyhow::{Context, Result};
use payroll_core::db::{DbConfig, MemoryRepositoryFactory, RepositoryRegistry};
use payroll_core::{
    CancellationFlag, Competencia, ComputationResult, ComputeReport, ComputeRequest, EngineConfig,
    PayrollEngine, PayrollRepository, ResultFamily,
};
use payroll_db_sqlite::SqliteRepositoryFactory;
use rust_decimal::Decimal;
use tracing::info;

/// Every backend the binary can open.
pub fn build_registry() -> RepositoryRegistry {
    let mut registry = RepositoryRegistry::new();
    registry.register(Box::new(SqliteRepositoryFactory));
    registry.register(Box::new(MemoryRepositoryFactory));
    registry
}

pub async fn open_repository(
    registry: &RepositoryRegistry,
    config: &DbConfig,
) -> Result<Arc<dyn PayrollRepository>> {
    let repository = registry.create(config).await.with_context(|| {
        format!(
            "cannot open '{}' backend at '{}'",
            config.backend, config.connection_string
        )
    })?;
    Ok(Arc::from(repository))
}

/// Accepts `management` as shorthand for the management compensation family.
pub fn parse_family(s: &str) -> Result<ResultFamily, String> {
    match s.trim().to_ascii_lowercase().as_str() {
        "management" => Ok(ResultFamily::ManagementCompensation),
        other => ResultFamily::parse(other).ok_or_else(|| {
            format!("unknown family '{s}', expected production or management_compensation")
        }),
    }
}

pub async fn run_compute(
    repository: Arc<dyn PayrollRepository>,
    config: EngineConfig,
    request: &ComputeRequest,
    cancel: &CancellationFlag,
) -> Result<ComputeReport> {
    let engine = PayrollEngine::new(repository, config)?;
    let report = engine
        .compute_with_cancellation(request, cancel)
        .await
        .with_context(|| format!("computation of {} failed", request.competencia))?;

    info!(
        competencia = %report.competencia,
        family = report.family.as_str(),
        computed = report.successes.len(),
        failed = report.failures.len(),
        cancelled = report.cancelled,
        "computation run finished"
    );
    Ok(report)
}

pub async fn run_history(
    repository: &dyn PayrollRepository,
    family: ResultFamily,
    physician_id: i64,
    competencia: Competencia,
) -> Result<Vec<ComputationResult>> {
    repository
        .list_results(family, physician_id, competencia)
        .await
        .with_context(|| format!("cannot list results for physician {physician_id}"))
}

fn money(value: Decimal) -> String {
    format!("{:.2}", value)
}

pub fn render_report(
    report: &ComputeReport,
    out: &mut impl Write,
) -> io::Result<()> {
    writeln!(
        out,
        "competencia {} ({})",
        report.competencia,
        report.family.as_str()
    )?;

    if !report.successes.is_empty() {
        writeln!(
            out,
            "{:>9} {:>7} {:>12} {:>12} {:>12} {:>10} {:>12}  notes",
            "physician", "version", "gross", "contribution", "withholding", "fees", "net"
        )?;
        for result in &report.successes {
            let notes: Vec<&str> = result.annotations.iter().map(|a| a.kind.as_str()).collect();
            writeln!(
                out,
                "{:>9} {:>7} {:>12} {:>12} {:>12} {:>10} {:>12}  {}",
                result.physician_id,
                result.version,
                money(result.gross_value),
                money(result.contribution_amount),
                money(result.withholding_amount),
                money(result.company_fee_amount),
                money(result.net_value),
                notes.join(",")
            )?;
        }
    }

    if !report.failures.is_empty() {
        writeln!(out, "failures:")?;
        for failure in &report.failures {
            writeln!(out, "  physician {}: {}", failure.physician_id, failure.error)?;
        }
    }

    if report.cancelled {
        writeln!(out, "run cancelled; remaining physicians were skipped")?;
    }
    writeln!(
        out,
        "{} computed, {} failed",
        report.successes.len(),
        report.failures.len()
    )
}

pub fn render_history(
    results: &[ComputationResult],
    out: &mut impl Write,
) -> io::Result<()> {
    for result in results {
        writeln!(
            out,
            "version {} of physician {} for {} ({}), computed {}",
            result.version,
            result.physician_id,
            result.competencia,
            result.family.as_str(),
            result.computed_at.format("%Y-%m-%d %H:%M:%S UTC")
        )?;
        writeln!(
            out,
            "  reference date {}, tables {} (contribution) and {} (withholding)",
            result.reference_date, result.contribution_table_id, result.withholding_table_id
        )?;
        writeln!(
            out,
            "  gross {}  credits {}  debits {}",
            money(result.gross_value),
            money(result.credits_total),
            money(result.debits_total)
        )?;
        writeln!(
            out,
            "  contribution base {}  contribution {}  external base {}  external withheld {}",
            money(result.contribution_base),
            money(result.contribution_amount),
            money(result.external_contribution_base),
            money(result.external_contribution_withheld)
        )?;
        writeln!(
            out,
            "  withholding base {}  withholding {}  external base {}  external withheld {}",
            money(result.withholding_base),
            money(result.withholding_amount),
            money(result.external_withholding_base),
            money(result.external_withholding_withheld)
        )?;
        writeln!(
            out,
            "  fees {}  net {}",
            money(result.company_fee_amount),
            money(result.net_value)
        )?;
        for item in &result.items {
            let quantity = item.quantity.map(|q| format!(" x{q}")).unwrap_or_default();
            writeln!(
                out,
                "    {:>3} {:<25} {:>12}{}  {}",
                item.sequence,
                item.kind.as_str(),
                money(item.value),
                quantity,
                item.description
            )?;
        }
        for annotation in &result.annotations {
            match annotation.amount {
                Some(amount) => writeln!(
                    out,
                    "    ! {}: {} ({})",
                    annotation.kind.as_str(),
                    annotation.message,
                    money(amount)
                )?,
                None => writeln!(
                    out,
                    "    ! {}: {}",
                    annotation.kind.as_str(),
                    annotation.message
                )?,
            }
        }
    }
    Ok(())
}
