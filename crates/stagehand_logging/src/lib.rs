//! Shared logging setup for Stagehand binaries.

use anyhow::{Context, Result};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const DEFAULT_LOG_FILTER: &str = "stagehand=info,stagehand_core=info,stagehand_db=info";
const KEEP_ROTATIONS: usize = 4;
const ROTATE_AT_BYTES: u64 = 10 * 1024 * 1024;

/// Logging configuration for a Stagehand binary.
pub struct LogConfig<'a> {
    pub app_name: &'a str,
    pub verbose: bool,
}

/// Initialize tracing with a size-rotated log file plus stderr output.
///
/// The file layer always logs at the `RUST_LOG`/default filter; the stderr
/// layer stays at `warn` unless `verbose` is set, so command output is not
/// drowned in intake chatter.
pub fn init_logging(config: LogConfig<'_>) -> Result<()> {
    let log_dir = ensure_logs_dir().context("Failed to ensure log directory")?;
    let file_writer = LogFileWriter::create(log_dir, config.app_name)
        .context("Failed to open log file")?;

    let file_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let console_filter = if config.verbose {
        file_filter.clone()
    } else {
        EnvFilter::new("warn")
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(file_writer)
                .with_ansi(false)
                .with_filter(file_filter),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_filter(console_filter),
        )
        .init();

    Ok(())
}

/// The Stagehand home directory: `$STAGEHAND_HOME` or `~/.stagehand`.
pub fn stagehand_home() -> PathBuf {
    if let Ok(override_path) = std::env::var("STAGEHAND_HOME") {
        return PathBuf::from(override_path);
    }
    dirs::home_dir()
        .expect("Could not determine home directory")
        .join(".stagehand")
}

/// The logs directory under the Stagehand home.
pub fn logs_dir() -> PathBuf {
    stagehand_home().join("logs")
}

/// Create the logs directory if needed and return it.
pub fn ensure_logs_dir() -> Result<PathBuf> {
    let logs = logs_dir();
    fs::create_dir_all(&logs)
        .with_context(|| format!("Failed to create logs directory: {}", logs.display()))?;
    Ok(logs)
}

/// Append-only log file that rotates by size: `app.log`, `app.log.1` (newest
/// rotation) up to `app.log.N`.
struct RotatingLog {
    dir: PathBuf,
    stem: String,
    file: File,
    written: u64,
}

impl RotatingLog {
    fn open(dir: PathBuf, stem: String) -> io::Result<Self> {
        fs::create_dir_all(&dir)?;
        let (file, written) = Self::open_active(&dir, &stem)?;
        let mut log = Self {
            dir,
            stem,
            file,
            written,
        };
        if log.written >= ROTATE_AT_BYTES {
            log.rotate()?;
        }
        Ok(log)
    }

    fn open_active(dir: &std::path::Path, stem: &str) -> io::Result<(File, u64)> {
        let path = dir.join(format!("{stem}.log"));
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let written = file.metadata()?.len();
        Ok((file, written))
    }

    fn rotation_path(&self, index: usize) -> PathBuf {
        self.dir.join(format!("{}.log.{index}", self.stem))
    }

    fn rotate(&mut self) -> io::Result<()> {
        let _ = self.file.flush();

        let oldest = self.rotation_path(KEEP_ROTATIONS);
        if oldest.exists() {
            fs::remove_file(&oldest)?;
        }
        for index in (1..KEEP_ROTATIONS).rev() {
            let src = self.rotation_path(index);
            if src.exists() {
                fs::rename(&src, self.rotation_path(index + 1))?;
            }
        }
        let active = self.dir.join(format!("{}.log", self.stem));
        if active.exists() {
            fs::rename(&active, self.rotation_path(1))?;
        }

        let (file, written) = Self::open_active(&self.dir, &self.stem)?;
        self.file = file;
        self.written = written;
        Ok(())
    }
}

impl Write for RotatingLog {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.written + buf.len() as u64 > ROTATE_AT_BYTES {
            self.rotate()?;
        }
        let bytes = self.file.write(buf)?;
        self.written += bytes as u64;
        Ok(bytes)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

/// `MakeWriter` handle over the shared rotating log.
#[derive(Clone)]
struct LogFileWriter {
    inner: Arc<Mutex<RotatingLog>>,
}

impl LogFileWriter {
    fn create(dir: PathBuf, app_name: &str) -> io::Result<Self> {
        let log = RotatingLog::open(dir, sanitize_name(app_name))?;
        Ok(Self {
            inner: Arc::new(Mutex::new(log)),
        })
    }
}

struct LogFileGuard {
    inner: Arc<Mutex<RotatingLog>>,
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for LogFileWriter {
    type Writer = LogFileGuard;

    fn make_writer(&'a self) -> Self::Writer {
        LogFileGuard {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl Write for LogFileGuard {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut log = self
            .inner
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "log writer lock poisoned"))?;
        log.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut log = self
            .inner
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "log writer lock poisoned"))?;
        log.flush()
    }
}

fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' {
                ch
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn sanitize_replaces_path_hostile_characters() {
        assert_eq!(sanitize_name("stagehand run"), "stagehand_run");
        assert_eq!(sanitize_name("a/b\\c"), "a_b_c");
        assert_eq!(sanitize_name("plain-name_1"), "plain-name_1");
    }

    #[test]
    fn rotation_shifts_older_files_up() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().to_path_buf();
        fs::write(dir.join("app.log"), b"active").unwrap();
        fs::write(dir.join("app.log.1"), b"previous").unwrap();

        let mut log = RotatingLog::open(dir.clone(), "app".to_string()).unwrap();
        log.rotate().unwrap();

        assert_eq!(fs::read(dir.join("app.log.1")).unwrap(), b"active");
        assert_eq!(fs::read(dir.join("app.log.2")).unwrap(), b"previous");
        assert_eq!(fs::read(dir.join("app.log")).unwrap(), b"");
    }

    #[test]
    fn writes_append_and_track_size() {
        let temp = TempDir::new().unwrap();
        let mut log = RotatingLog::open(temp.path().to_path_buf(), "sizes".to_string()).unwrap();

        log.write_all(b"one\n").unwrap();
        log.write_all(b"two\n").unwrap();
        log.flush().unwrap();

        assert_eq!(log.written, 8);
        assert_eq!(
            fs::read(temp.path().join("sizes.log")).unwrap(),
            b"one\ntwo\n"
        );
    }
}
