//! Logging setup on tracing + tracing-subscriber
//!
//! Console output (compact or JSON), an optional rolling log file, and
//! `RUST_LOG` for per-module overrides.

use std::fs;
use std::path::Path;

use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::filter::Directive;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

use crate::config::LoggingSettings;
use crate::error::{Error, Result};

type BoxedLayer<S> = Box<dyn Layer<S> + Send + Sync>;

/// Keeps the non-blocking file writer flushing until dropped
pub struct LogGuards {
    _file_guard: Option<WorkerGuard>,
}

/// Install the global subscriber for a `run`.
///
/// The returned guards must live until the process exits.
pub fn init_logging(settings: &LoggingSettings, verbose: u8, quiet: bool) -> Result<LogGuards> {
    let level = effective_level(settings, verbose, quiet);
    let filter = build_env_filter(level)?;
    let console = console_layer(settings.json_format);

    let (file, file_guard) = match settings.file.as_deref() {
        Some(log_file) => {
            let (layer, guard) = file_layer(log_file, settings)?;
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file)
        .try_init()
        .map_err(|e| Error::Config(format!("Failed to initialize logging: {}", e)))?;

    tracing::debug!(
        level = %level,
        file = ?settings.file,
        json = settings.json_format,
        "Logging initialized"
    );

    Ok(LogGuards {
        _file_guard: file_guard,
    })
}

/// Minimal console logging for short-lived subcommands
pub fn init_simple(level: Level) -> Result<()> {
    tracing_subscriber::registry()
        .with(build_env_filter(level)?)
        .with(fmt::layer().compact().with_writer(std::io::stderr))
        .try_init()
        .map_err(|e| Error::Config(format!("Failed to initialize logging: {}", e)))
}

/// `--quiet` wins over everything, `-v` over the configured level
fn effective_level(settings: &LoggingSettings, verbose: u8, quiet: bool) -> Level {
    if quiet {
        return Level::ERROR;
    }
    match verbose {
        0 => parse_level(&settings.level),
        1 => Level::DEBUG,
        _ => Level::TRACE,
    }
}

fn parse_level(level: &str) -> Level {
    match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" | "warning" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

fn parse_directive(raw: &str) -> Result<Directive> {
    raw.parse()
        .map_err(|e| Error::Config(format!("Invalid log directive '{}': {}", raw, e)))
}

fn build_env_filter(level: Level) -> Result<EnvFilter> {
    let base = level.to_string().to_lowercase();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&base))
        .add_directive(parse_directive(&format!("teneo_node={}", base))?)
        .add_directive(parse_directive("tokio_tungstenite=warn")?)
        .add_directive(parse_directive("tungstenite=warn")?)
        .add_directive(parse_directive("native_tls=warn")?);

    Ok(filter)
}

fn console_layer<S>(json: bool) -> BoxedLayer<S>
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
{
    if json {
        fmt::layer()
            .json()
            .with_target(true)
            .with_file(true)
            .with_line_number(true)
            .with_span_events(FmtSpan::CLOSE)
            .boxed()
    } else {
        fmt::layer().with_target(false).with_ansi(true).compact().boxed()
    }
}

fn file_layer<S>(log_file: &str, settings: &LoggingSettings) -> Result<(BoxedLayer<S>, WorkerGuard)>
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
{
    let path = Path::new(log_file);
    let directory = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    fs::create_dir_all(directory).map_err(|e| Error::IoWrite {
        path: directory.to_path_buf(),
        source: e,
    })?;

    let prefix = path
        .file_stem()
        .and_then(|n| n.to_str())
        .unwrap_or("node");

    // tracing-appender rotates by time only; small size budgets rotate hourly
    let rotation = if settings.max_file_size_mb > 0 && settings.max_file_size_mb < 10 {
        Rotation::HOURLY
    } else {
        Rotation::DAILY
    };

    let appender = RollingFileAppender::builder()
        .rotation(rotation)
        .filename_prefix(prefix)
        .filename_suffix("log")
        .max_log_files(settings.max_files.max(1) as usize)
        .build(directory)
        .map_err(|e| Error::Config(format!("Failed to create log file appender: {}", e)))?;

    let (writer, guard) = tracing_appender::non_blocking(appender);

    let layer = if settings.json_format {
        fmt::layer()
            .json()
            .with_writer(writer)
            .with_ansi(false)
            .boxed()
    } else {
        fmt::layer()
            .with_writer(writer)
            .with_ansi(false)
            .with_thread_ids(true)
            .with_line_number(true)
            .boxed()
    };

    Ok((layer, guard))
}
