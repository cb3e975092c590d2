use std::fs::File;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use payroll_data::{BracketTableLoader, SourceKind, SourceLoader};
use payroll_db_sqlite::SqliteRepository;
use tracing_subscriber::EnvFilter;

/// Load bracket tables and source entities from CSV files into a database.
///
/// Source files are loaded in the order given, so parents (physicians,
/// contracts) must come before the rows that reference them.
#[derive(Parser, Debug)]
#[command(name = "payroll-loader")]
#[command(version, about, long_about = None)]
struct Args {
    /// SQLite database path, `:memory:`, or `sqlite:` URL (created if missing)
    #[arg(short, long, default_value = "payroll.db")]
    database: String,

    /// Create or upgrade the schema before loading anything
    #[arg(short, long)]
    migrate: bool,

    /// Directory of `*.sql` seed files, applied in file-name order
    #[arg(short, long)]
    seeds: Option<PathBuf>,

    /// CSV of bracket tables (kind, validity_start, validity_end,
    /// dependent_deduction, index, base_from, base_to, rate, deduction,
    /// contribution_ceiling)
    #[arg(short, long)]
    brackets: Option<PathBuf>,

    /// Source CSV as KIND=FILE, e.g. `physicians=physicians.csv`. Repeatable.
    /// Kinds: fiscal-parameters, physicians, company-links, contracts,
    /// shift-rates, shift-records, private-procedures, administrative-production,
    /// adjustments, fiscal-bonds, management-entries
    #[arg(short, long = "load", value_parser = parse_source)]
    sources: Vec<(SourceKind, PathBuf)>,
}

fn parse_source(arg: &str) -> Result<(SourceKind, PathBuf), String> {
    let (kind, path) = arg
        .split_once('=')
        .ok_or_else(|| format!("expected KIND=FILE, got '{arg}'"))?;
    let kind =
        SourceKind::parse(kind.trim()).ok_or_else(|| format!("unknown source kind '{kind}'"))?;
    Ok((kind, PathBuf::from(path.trim())))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let args = Args::parse();

    let repo = SqliteRepository::new(&args.database)
        .await
        .with_context(|| format!("Cannot open payroll database {}", args.database))?;

    if args.migrate {
        repo.run_migrations()
            .await
            .with_context(|| format!("Failed to migrate {}", args.database))?;
        println!("Schema of {} is up to date.", args.database);
    }

    if let Some(seeds_dir) = &args.seeds {
        repo.run_seeds(seeds_dir)
            .await
            .with_context(|| format!("Failed to apply seed files in {}", seeds_dir.display()))?;
        println!("Applied seed files in {}.", seeds_dir.display());
    }

    if let Some(path) = &args.brackets {
        println!("Loading bracket tables from: {}", path.display());
        let file =
            File::open(path).with_context(|| format!("Failed to open: {}", path.display()))?;
        let tables = BracketTableLoader::parse(file)
            .with_context(|| format!("Failed to parse CSV: {}", path.display()))?;
        let summary = BracketTableLoader::load(&repo, tables)
            .await
            .context("Failed to load bracket tables into database")?;
        println!(
            "Loaded {} bracket tables ({} already present).",
            summary.inserted, summary.unchanged
        );
    }

    for (kind, path) in &args.sources {
        println!("Loading {} from: {}", kind.as_str(), path.display());
        let file =
            File::open(path).with_context(|| format!("Failed to open: {}", path.display()))?;
        let inserted = SourceLoader::load(&repo, *kind, file)
            .await
            .with_context(|| format!("Failed to load {}", path.display()))?;
        println!("Loaded {} {} rows.", inserted, kind.as_str());
    }

    Ok(())
}
