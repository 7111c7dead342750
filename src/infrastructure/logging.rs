use crate::domain::settings::LogSettings;
use std::fs;
use std::str::FromStr;
use tracing::level_filters::LevelFilter;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Dependencies stay at `warn` so frame-level tracing of the driver does not
/// drown in runtime noise.
const DEPENDENCY_LEVEL: &str = "warn";

pub struct LoggingGuard {
    // Flushes the file writer on drop
    _file_guard: Option<WorkerGuard>,
}

fn parse_rotation(rotation: &str) -> Rotation {
    match rotation.to_lowercase().as_str() {
        "hourly" => Rotation::HOURLY,
        "minutely" => Rotation::MINUTELY,
        "never" => Rotation::NEVER,
        _ => Rotation::DAILY,
    }
}

/// Filter directives for a configured level: the driver crate at `level`,
/// everything else at [`DEPENDENCY_LEVEL`]. Unknown levels mean `info`.
fn driver_directives(level: &str) -> String {
    let level = LevelFilter::from_str(level.trim()).unwrap_or(LevelFilter::INFO);
    format!(
        "{},{}={}",
        DEPENDENCY_LEVEL,
        env!("CARGO_CRATE_NAME"),
        level.to_string().to_lowercase()
    )
}

/// `RUST_LOG` replaces the configured directives entirely.
fn level_filter(settings: &LogSettings) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(driver_directives(&settings.level)))
}

fn file_writer(
    settings: &LogSettings,
) -> anyhow::Result<(tracing_appender::non_blocking::NonBlocking, WorkerGuard)> {
    fs::create_dir_all(&settings.log_dir)?;
    let appender = RollingFileAppender::builder()
        .rotation(parse_rotation(&settings.rotation))
        .filename_prefix(&settings.file_name_prefix)
        .filename_suffix("log")
        .build(&settings.log_dir)?;
    Ok(tracing_appender::non_blocking(appender))
}

pub fn init_logger(settings: &LogSettings) -> anyhow::Result<LoggingGuard> {
    let console_layer = settings.console_logging_enabled.then(|| {
        fmt::layer()
            .with_writer(std::io::stdout)
            .with_file(settings.show_file_line)
            .with_line_number(settings.show_file_line)
            .with_thread_ids(settings.show_thread_ids)
            .with_target(settings.show_target)
            .with_ansi(settings.ansi_colors)
    });

    let (file_layer, file_guard) = if settings.file_logging_enabled {
        let (writer, guard) = file_writer(settings)?;
        let layer = fmt::layer()
            .with_writer(writer)
            .with_ansi(false)
            .with_file(settings.show_file_line)
            .with_line_number(settings.show_file_line)
            .with_thread_ids(settings.show_thread_ids)
            .with_target(settings.show_target);
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    tracing_subscriber::registry()
        .with(level_filter(settings))
        .with(console_layer)
        .with(file_layer)
        .try_init()?;

    tracing::info!(
        console = settings.console_logging_enabled,
        file = settings.file_logging_enabled,
        "Driver logging ready"
    );

    Ok(LoggingGuard {
        _file_guard: file_guard,
    })
}
