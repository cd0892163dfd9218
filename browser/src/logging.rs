use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::sync::{Arc, Mutex};

use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

use crate::config::{BrowserConfig, LogFormat};
use crate::error::{BrowserError, Result};

/// Installs the global subscriber. Records from the library's `log` calls
/// are forwarded into it.
pub fn init_logging(config: &BrowserConfig) -> Result<()> {
    let env_filter = build_env_filter(config)?;
    let writer = make_writer(config)?;

    let layer = match config.log_format {
        LogFormat::Json => fmt::layer()
            .json()
            .flatten_event(true)
            .with_current_span(false)
            .with_span_list(false)
            .with_target(true)
            .with_level(true)
            .with_timer(fmt::time::UtcTime::rfc_3339())
            .with_writer(writer)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_target(true)
            .with_ansi(false)
            .with_timer(fmt::time::UtcTime::rfc_3339())
            .with_writer(writer)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(layer)
        .try_init()
        .map_err(|err| BrowserError::Logger(err.to_string()))?;

    Ok(())
}

fn make_writer(config: &BrowserConfig) -> Result<BoxMakeWriter> {
    if let Some(path) = config.log_file() {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let shared = SharedFileWriter::new(file);
        return Ok(BoxMakeWriter::new(move || Box::new(shared.clone())));
    }

    Ok(BoxMakeWriter::new(|| Box::new(io::stderr())))
}

#[derive(Clone)]
struct SharedFileWriter {
    inner: Arc<Mutex<File>>,
}

impl SharedFileWriter {
    fn new(file: File) -> Self {
        Self {
            inner: Arc::new(Mutex::new(file)),
        }
    }
}

impl Write for SharedFileWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut guard = self
            .inner
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "log file lock poisoned"))?;
        guard.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut guard = self
            .inner
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "log file lock poisoned"))?;
        guard.flush()
    }
}

fn build_env_filter(config: &BrowserConfig) -> Result<EnvFilter> {
    let directive = config.log_level.as_deref().unwrap_or("warn");
    EnvFilter::try_new(directive)
        .map_err(|err| BrowserError::Logger(format!("invalid log level '{directive}': {err}")))
}
