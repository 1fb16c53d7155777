//! Diagnostic sink.
//!
//! Records go to an append-only file under the application log directory as
//! `[timestamp][LEVEL] message` lines. Standard output belongs to the
//! protocol stream, so this module never writes there, not even as a fallback.

use crate::{config::LoggingConfig, paths::AppDirs};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{Event, Subscriber};
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::time::{FormatTime, SystemTime as Rfc3339};
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::EnvFilter;

pub struct LoggingGuard {
    _file_guard: Option<WorkerGuard>,
    log_file: Option<PathBuf>,
}

impl LoggingGuard {
    /// Path of the log file, or `None` when records are being discarded.
    pub fn log_file(&self) -> Option<&Path> {
        self.log_file.as_deref()
    }
}

pub fn init_logging(config: &LoggingConfig, dirs: &AppDirs) -> Result<LoggingGuard, LoggingError> {
    let env_filter = EnvFilter::try_new(config.level.as_filter_directive()).map_err(|source| {
        LoggingError::ParseLevel {
            level: config.level.as_filter_directive().to_string(),
            source,
        }
    })?;

    let (writer, file_guard, log_file) = match build_file_writer(config, dirs.log_dir()) {
        Ok((file, guard)) => (
            BoxMakeWriter::new(file),
            Some(guard),
            Some(dirs.log_dir().join(config.file_name())),
        ),
        // Logging problems must stay invisible to the peer; drop records instead.
        Err(_) => (BoxMakeWriter::new(std::io::sink), None, None),
    };

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_ansi(false)
        .event_format(BracketFormat)
        .with_writer(writer)
        .try_init()
        .map_err(LoggingError::SubscriberInstall)?;

    Ok(LoggingGuard {
        _file_guard: file_guard,
        log_file,
    })
}

fn build_file_writer(
    config: &LoggingConfig,
    log_dir: &Path,
) -> Result<(NonBlocking, WorkerGuard), LoggingError> {
    fs::create_dir_all(log_dir).map_err(|source| LoggingError::CreateDirectory {
        path: log_dir.to_path_buf(),
        source,
    })?;

    let appender = RollingFileAppender::builder()
        .rotation(Rotation::NEVER)
        .filename_prefix(config.file_name())
        .build(log_dir)
        .map_err(|source| LoggingError::OpenFile {
            path: log_dir.join(config.file_name()),
            source,
        })?;
    Ok(tracing_appender::non_blocking(appender))
}

/// `[2024-05-01T10:00:00.000000Z][INFO] message key=value`
pub struct BracketFormat;

impl<S, N> FormatEvent<S, N> for BracketFormat
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        write!(writer, "[")?;
        Rfc3339.format_time(&mut writer)?;
        write!(writer, "][{}] ", event.metadata().level())?;
        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("failed to create log directory {path}: {source}")]
    CreateDirectory {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to open log file {path}: {source}")]
    OpenFile {
        path: PathBuf,
        source: tracing_appender::rolling::InitError,
    },
    #[error("failed to parse log level {level}: {source}")]
    ParseLevel {
        level: String,
        source: tracing_subscriber::filter::ParseError,
    },
    #[error("failed to install tracing subscriber: {0}")]
    SubscriberInstall(Box<dyn std::error::Error + Send + Sync>),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LogLevel;
    use std::io;
    use std::sync::{Arc, Mutex};
    use tracing_subscriber::fmt::MakeWriter;

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl<'a> MakeWriter<'a> for Captured {
        type Writer = Captured;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    #[test]
    fn filter_directive_is_lowercase() {
        assert_eq!(LogLevel::Info.as_filter_directive(), "info");
    }

    #[test]
    fn records_use_bracket_format() {
        let captured = Captured::default();
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .event_format(BracketFormat)
            .with_writer(captured.clone())
            .finish();

        tracing::subscriber::with_default(subscriber, || {
            tracing::warn!("module emitted {}", "status");
        });

        let text = String::from_utf8(captured.0.lock().unwrap().clone()).unwrap();
        assert!(text.starts_with('['), "got: {text}");
        assert!(text.contains("][WARN] module emitted status"), "got: {text}");
        assert!(text.ends_with('\n'));
        assert_eq!(text.lines().count(), 1);
    }

    #[test]
    fn file_writer_lands_in_log_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let config = LoggingConfig::default();
        let (_writer, _guard) =
            build_file_writer(&config, tmp.path()).expect("file writer should build");
        assert!(tmp.path().join("lxbridge.log").exists());
    }
}
