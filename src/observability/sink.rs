//! Log sinks.
//!
//! Both sinks plug into `tracing_subscriber` through [`MakeWriter`]:
//! - [`RotatingFileSink`]: append-only file, rotated by size, with backups
//!   pruned by count and age
//! - [`BufferSink`]: in-memory buffer for embedding and tests
//!
//! A formatted record is written with a single `write` call, so a record
//! never straddles two files.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Local, NaiveDateTime};
use tracing_subscriber::fmt::MakeWriter;

use crate::config::schema::LogConfig;

const BACKUP_TIME_FORMAT: &str = "%Y-%m-%dT%H-%M-%S%.3f";

/// Rotation policy for [`RotatingFileSink`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RotationPolicy {
    /// Rotate once a write would push the file past this many bytes.
    pub max_bytes: u64,
    /// Rotated files to keep. 0 keeps all.
    pub max_backups: usize,
    /// Rotated files older than this are removed. `None` keeps all.
    pub max_age: Option<Duration>,
}

impl From<&LogConfig> for RotationPolicy {
    fn from(config: &LogConfig) -> Self {
        Self {
            max_bytes: config.max_size_mb.saturating_mul(1024 * 1024),
            max_backups: config.max_backups,
            max_age: (config.max_age_days > 0)
                .then(|| Duration::from_secs(config.max_age_days.saturating_mul(24 * 60 * 60))),
        }
    }
}

/// Size-rotated log file shared by every writer handed out.
#[derive(Debug, Clone)]
pub struct RotatingFileSink {
    inner: Arc<Mutex<RotatingFile>>,
}

impl RotatingFileSink {
    /// Open (or create) the log file at `path`, appending to existing content.
    pub fn open(path: impl AsRef<Path>, policy: RotationPolicy) -> io::Result<Self> {
        let file = RotatingFile::open(path.as_ref().to_path_buf(), policy)?;
        Ok(Self {
            inner: Arc::new(Mutex::new(file)),
        })
    }

    /// Path of the active log file.
    pub fn path(&self) -> PathBuf {
        self.lock().path.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RotatingFile> {
        // A panic mid-write leaves the file usable; keep logging.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<'a> MakeWriter<'a> for RotatingFileSink {
    type Writer = RotatingWriter<'a>;

    fn make_writer(&'a self) -> Self::Writer {
        RotatingWriter { sink: self }
    }
}

/// Writer handle for one record.
pub struct RotatingWriter<'a> {
    sink: &'a RotatingFileSink,
}

impl Write for RotatingWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.sink.lock().write_record(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.sink.lock().file.flush()
    }
}

#[derive(Debug)]
struct RotatingFile {
    path: PathBuf,
    file: File,
    size: u64,
    policy: RotationPolicy,
}

impl RotatingFile {
    fn open(path: PathBuf, policy: RotationPolicy) -> io::Result<Self> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }
        let file = open_append(&path)?;
        let size = file.metadata()?.len();
        Ok(Self {
            path,
            file,
            size,
            policy,
        })
    }

    fn write_record(&mut self, buf: &[u8]) -> io::Result<()> {
        if self.size > 0 && self.size + buf.len() as u64 > self.policy.max_bytes {
            self.rotate()?;
        }
        self.file.write_all(buf)?;
        self.size += buf.len() as u64;
        Ok(())
    }

    fn rotate(&mut self) -> io::Result<()> {
        self.file.flush()?;
        fs::rename(&self.path, self.backup_path(Local::now()))?;
        self.file = open_append(&self.path)?;
        self.size = 0;
        self.prune();
        Ok(())
    }

    /// `logs/app.log` rotates to `logs/app-2024-01-02T03-04-05.678.log`.
    fn backup_path(&self, at: DateTime<Local>) -> PathBuf {
        let (stem, ext) = self.name_parts();
        let stamp = at.format(BACKUP_TIME_FORMAT);
        self.path.with_file_name(format!("{stem}-{stamp}{ext}"))
    }

    fn name_parts(&self) -> (String, String) {
        let stem = self
            .path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let ext = self
            .path
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_default();
        (stem, ext)
    }

    /// Rotated files, newest first.
    fn backups(&self) -> io::Result<Vec<(PathBuf, SystemTime)>> {
        let (stem, ext) = self.name_parts();
        let prefix = format!("{stem}-");
        let dir = match self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            Some(dir) => dir.to_path_buf(),
            None => PathBuf::from("."),
        };

        let mut backups = Vec::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if is_backup_name(&name, &prefix, &ext) {
                let modified = entry.metadata()?.modified()?;
                backups.push((entry.path(), modified));
            }
        }
        // Timestamps in the name sort lexically.
        backups.sort_by(|a, b| b.0.cmp(&a.0));
        Ok(backups)
    }

    fn prune(&self) {
        let Ok(backups) = self.backups() else {
            return;
        };
        let now = SystemTime::now();

        for (index, (path, modified)) in backups.into_iter().enumerate() {
            let over_count = self.policy.max_backups > 0 && index >= self.policy.max_backups;
            let too_old = self.policy.max_age.is_some_and(|max_age| {
                now.duration_since(modified).unwrap_or_default() > max_age
            });
            if over_count || too_old {
                // Best effort; a stale backup is not worth failing a write.
                let _ = fs::remove_file(path);
            }
        }
    }
}

/// Only `{stem}-{timestamp}{ext}` names count; `service-audit.log` next to
/// `service.log` is not ours to prune.
fn is_backup_name(name: &str, prefix: &str, ext: &str) -> bool {
    name.strip_prefix(prefix)
        .and_then(|rest| rest.strip_suffix(ext))
        .is_some_and(|stamp| NaiveDateTime::parse_from_str(stamp, BACKUP_TIME_FORMAT).is_ok())
}

fn open_append(path: &Path) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

/// In-memory sink.
#[derive(Debug, Clone, Default)]
pub struct BufferSink {
    buf: Arc<Mutex<Vec<u8>>>,
}

impl BufferSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything written so far.
    pub fn contents(&self) -> String {
        let buf = self.buf.lock().unwrap_or_else(PoisonError::into_inner);
        String::from_utf8_lossy(&buf).into_owned()
    }

    /// Written records, one per line.
    pub fn lines(&self) -> Vec<String> {
        self.contents().lines().map(str::to_owned).collect()
    }

    pub fn clear(&self) {
        self.buf.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }
}

impl<'a> MakeWriter<'a> for BufferSink {
    type Writer = BufferWriter;

    fn make_writer(&'a self) -> Self::Writer {
        BufferWriter {
            buf: Arc::clone(&self.buf),
        }
    }
}

/// Writer handle for [`BufferSink`].
pub struct BufferWriter {
    buf: Arc<Mutex<Vec<u8>>>,
}

impl Write for BufferWriter {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.buf
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
