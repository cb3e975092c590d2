use std::fs::File;
use std::io::{self, IsTerminal};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use chrono::Local;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::fmt::format::{FormatEvent, FormatFields, Writer};
use tracing_subscriber::fmt::FmtContext;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "info";

/// One line per event: local timestamp, level, target, fields.
struct LocalFmt;

fn level_colour(level: &Level) -> &'static str {
    match *level {
        Level::ERROR => "\x1b[1;31m",
        Level::WARN => "\x1b[1;33m",
        Level::INFO => "\x1b[1;32m",
        Level::DEBUG => "\x1b[1;34m",
        Level::TRACE => "\x1b[1;35m",
    }
}

impl<S, N> FormatEvent<S, N> for LocalFmt
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> std::fmt::Result {
        let meta = event.metadata();
        let timestamp = Local::now().format("%Y-%m-%dT%H:%M:%S%.3f%:z");

        if writer.has_ansi_escapes() {
            write!(
                writer,
                "\x1b[2m{timestamp}\x1b[0m {}{:>5}\x1b[0m ",
                level_colour(meta.level()),
                meta.level()
            )?;
            if !meta.target().is_empty() {
                write!(writer, "\x1b[36m{}\x1b[0m ", meta.target())?;
            }
        } else {
            write!(writer, "{timestamp} {:>5} ", meta.level())?;
            if !meta.target().is_empty() {
                write!(writer, "{} ", meta.target())?;
            }
        }

        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

/// How the `payroll` binary logs.
///
/// Human output (reports, history) goes to stdout, so log lines go to
/// stderr and can be silenced with `quiet` without losing the file copy.
#[derive(Debug, Clone, Default)]
pub struct LoggingOptions {
    /// An EnvFilter directive such as `debug` or `payroll_core=trace`.
    /// Takes precedence over `RUST_LOG`.
    pub level: Option<String>,
    pub quiet: bool,
    pub log_file: Option<PathBuf>,
}

impl LoggingOptions {
    fn filter(&self) -> Result<EnvFilter> {
        match &self.level {
            Some(level) => EnvFilter::try_new(level)
                .with_context(|| format!("invalid log level '{level}'")),
            None => Ok(EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))),
        }
    }
}

fn open_log_file(path: &Path) -> Result<File> {
    File::options()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("cannot open log file '{}'", path.display()))
}

/// Assembles the subscriber without installing it.
pub fn build_subscriber(
    options: &LoggingOptions,
) -> Result<impl Subscriber + Send + Sync + use<>> {
    let filter = options.filter()?;

    let stderr_layer = (!options.quiet).then(|| {
        tracing_subscriber::fmt::layer()
            .event_format(LocalFmt)
            .with_ansi(io::stderr().is_terminal())
            .with_writer(io::stderr)
    });

    let file_layer = match &options.log_file {
        Some(path) => {
            let file = open_log_file(path)?;
            Some(
                tracing_subscriber::fmt::layer()
                    .event_format(LocalFmt)
                    .with_ansi(false)
                    .with_writer(Mutex::new(file)),
            )
        }
        None => None,
    };

    Ok(tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer))
}

/// Installs the global subscriber. Call once at startup.
pub fn init_logging(options: &LoggingOptions) -> Result<()> {
    build_subscriber(options)?
        .try_init()
        .context("a global tracing subscriber is already installed")
}
