use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use payroll_cli::commands::{self, parse_family};
use payroll_cli::config::AppConfig;
use payroll_cli::logging::{self, LoggingOptions};
use payroll_core::{CancellationFlag, Competencia, ComputeRequest, ResultFamily};
use tracing::{debug, warn};

// ─── CLI definition ──────────────────────────────────────────────────────────

/// Monthly payroll tax computation for physicians.
///
/// Reads production, adjustments and external bonds for a competencia
/// (`YYYY-MM`), applies the bracket tables in force on the reference date,
/// and stores a new versioned result per physician.
#[derive(Debug, Parser)]
#[command(name = "payroll", version)]
struct Cli {
    /// TOML file with `[database]` and `[engine]` sections.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Database backend; overrides the config file.
    #[arg(long, global = true)]
    backend: Option<String>,

    /// Database connection string; overrides the config file.
    /// For SQLite this is a file path (e.g. `payroll.db`) or `:memory:`.
    #[arg(long, global = true)]
    db: Option<String>,

    /// Physicians computed at the same time; overrides the config file.
    #[arg(long, global = true)]
    max_concurrency: Option<usize>,

    /// Log filter, e.g. `debug` or `payroll_core=trace`. Overrides RUST_LOG.
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Append log lines to this file as well.
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    /// Keep log lines off stderr.
    #[arg(long, short, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Compute one physician, or every physician, for a competencia.
    Compute {
        competencia: Competencia,

        /// Only this physician; all physicians when omitted.
        #[arg(long)]
        physician: Option<i64>,

        /// `production` or `management_compensation` (or `management`).
        #[arg(long, default_value = "production", value_parser = parse_family)]
        family: ResultFamily,

        /// Date used to pick bracket tables; defaults to the first day of the
        /// competencia.
        #[arg(long)]
        reference_date: Option<NaiveDate>,
    },
    /// Print every stored version for a physician and competencia.
    History {
        competencia: Competencia,

        #[arg(long)]
        physician: i64,

        #[arg(long, default_value = "production", value_parser = parse_family)]
        family: ResultFamily,
    },
}

impl Cli {
    fn app_config(&self) -> anyhow::Result<AppConfig> {
        let mut config = AppConfig::load(self.config.as_deref())?;
        if let Some(backend) = &self.backend {
            config.database.backend = backend.clone();
        }
        if let Some(db) = &self.db {
            config.database.connection_string = db.clone();
        }
        if let Some(max_concurrency) = self.max_concurrency {
            config.engine.max_concurrency = max_concurrency;
        }
        config.engine.validate()?;
        Ok(config)
    }

    fn logging_options(&self) -> LoggingOptions {
        LoggingOptions {
            level: self.log_level.clone(),
            quiet: self.quiet,
            log_file: self.log_file.clone(),
        }
    }
}

// ─── entry point ─────────────────────────────────────────────────────────────

/// Raises `cancel` on Ctrl-C so a sweep stops scheduling physicians and
/// in-flight physicians skip their write.
fn cancel_on_interrupt(cancel: CancellationFlag) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling the run");
            cancel.cancel();
        }
    });
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    logging::init_logging(&cli.logging_options())?;
    let config = cli.app_config()?;

    debug!(backend = %config.database.backend, "opening repository");
    let registry = commands::build_registry();
    let repository = commands::open_repository(&registry, &config.database).await?;

    match cli.command {
        Command::Compute {
            competencia,
            physician,
            family,
            reference_date,
        } => {
            let request = ComputeRequest {
                competencia,
                physician_id: physician,
                family,
                reference_date: reference_date.unwrap_or_else(|| competencia.first_day()),
            };
            let cancel = CancellationFlag::new();
            cancel_on_interrupt(cancel.clone());

            let report =
                commands::run_compute(repository, config.engine, &request, &cancel).await?;
            let mut stdout = io::stdout().lock();
            commands::render_report(&report, &mut stdout)?;
            stdout.flush()?;

            if report.is_clean() {
                Ok(ExitCode::SUCCESS)
            } else {
                Ok(ExitCode::FAILURE)
            }
        }
        Command::History {
            competencia,
            physician,
            family,
        } => {
            let results =
                commands::run_history(repository.as_ref(), family, physician, competencia).await?;
            let mut stdout = io::stdout().lock();
            if results.is_empty() {
                writeln!(
                    stdout,
                    "no {} results for physician {physician} in {competencia}",
                    family.as_str()
                )?;
            } else {
                commands::render_history(&results, &mut stdout)?;
            }
            stdout.flush()?;
            Ok(ExitCode::SUCCESS)
        }
    }
}
