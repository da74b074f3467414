//! Tracing subscriber setup driven by [`LogSettings`].

use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{FileLogSettings, LogSettings};

/// Flushes buffered file logs when dropped. Hold it until `main` returns.
pub struct FileLogGuard {
    _worker: WorkerGuard,
}

/// Opens the daily-rolling writer, creating the log directory first.
pub fn file_writer(settings: &FileLogSettings) -> std::io::Result<(NonBlocking, FileLogGuard)> {
    std::fs::create_dir_all(&settings.dir)?;
    let appender = RollingFileAppender::new(Rotation::DAILY, &settings.dir, &settings.prefix);
    let (writer, worker) = tracing_appender::non_blocking(appender);
    Ok((writer, FileLogGuard { _worker: worker }))
}

/// Installs the global subscriber: human-readable stdout always, JSON lines
/// on disk when `settings.file` is set. A log directory that cannot be
/// created falls back to stdout only.
pub fn init_tracing(settings: &LogSettings) -> Option<FileLogGuard> {
    let filter = EnvFilter::try_new(&settings.level).unwrap_or_else(|_| EnvFilter::new("info"));

    let file = settings.file.as_ref().and_then(|file| match file_writer(file) {
        Ok(opened) => Some(opened),
        Err(err) => {
            eprintln!("file logging disabled, cannot use {}: {err}", file.dir.display());
            None
        }
    });
    let (file_layer, guard) = match file {
        Some((writer, guard)) => {
            let layer = fmt::layer()
                .json()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(true);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true))
        .with(file_layer)
        .init();

    guard
}
