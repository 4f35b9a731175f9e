//! # LogShelf
//!
//! LogShelf is a log file sink that writes continuously to a timestamped file
//! and rotates it when the bytes written since the last rotation exceed a
//! size limit, or when local midnight passes. Retired files are moved into a
//! dated archive tree (`<archive>/<YYYYMMDD>/`), optionally gzip compressed,
//! and archive directories older than a retention window are removed.
//!
//! Appending never blocks on rotation and never reports an error: rotation,
//! archiving and retention run on background threads, and when no file can
//! be opened the bytes go to standard output instead.
//!
//! ```text
//! logs/app-20250401-195512            <- active file
//! logs/app-20250401-183003            <- retired, archived on next rotation
//! archive/20250401/app-20250401-120000.gz
//! archive/20250331/app-20250331-000000.gz
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use {
//!    logshelf::{Compression, LogShelfBuilder, RotationSize, TimeZone},
//!    tracing_subscriber::util::SubscriberInitExt,
//! };
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!    let shelf = LogShelfBuilder::new()
//!        .directory("./logs")
//!        .file_name("app")
//!        .size_limit(RotationSize::MB(64))
//!        .archive_directory("./logs/archive")
//!        .compression(Compression::Gzip)
//!        .retention_days(14)
//!        .time_zone(TimeZone::Local)
//!        .build()?;
//!    let (non_blocking, _guard) = tracing_appender::non_blocking(shelf);
//!    tracing_subscriber::fmt()
//!        .with_writer(non_blocking)
//!        .with_ansi(false)
//!        .finish()
//!        .try_init()?;
//!
//!    tracing::info!("This is an info message");
//!
//!    Ok(())
//! }
//! ```
use {
    chrono::FixedOffset,
    std::{
        path::{Path, PathBuf},
        sync::Arc,
        time::Duration,
    },
};

mod archive;
mod error;
mod meta;
mod shelf;
mod sink;

pub use {error::LogShelfError, shelf::LogShelf};

/// Defines size thresholds for rotating log files in various units.
///
/// Once the bytes appended since the last rotation exceed the threshold, a
/// new log file is opened and the old one is handed to the archiver.
///
/// * `Bytes` - Direct byte count (e.g., 1048576 bytes)
/// * `KB` - Kilobytes (1 KB = 1024 bytes)
/// * `MB` - Megabytes (1 MB = 1024 KB)
/// * `GB` - Gigabytes (1 GB = 1024 MB)
#[derive(Debug, Clone)]
pub enum RotationSize {
    /// Raw byte count
    Bytes(u64),
    /// Kilobytes (1 KB = 1024 bytes)
    KB(u64),
    /// Megabytes (1 MB = 1024 KB = 1,048,576 bytes)
    MB(u64),
    /// Gigabytes (1 GB = 1024 MB = 1,073,741,824 bytes)
    GB(u64),
}

impl RotationSize {
    /// Get the threshold in bytes.
    fn bytes(&self) -> u64 {
        match self {
            RotationSize::Bytes(b) => *b,
            RotationSize::KB(kb) => kb.saturating_mul(1024),
            RotationSize::MB(mb) => mb.saturating_mul(1024 * 1024),
            RotationSize::GB(gb) => gb.saturating_mul(1024 * 1024 * 1024),
        }
    }
}

/// Specifies the compression algorithm applied to archived log files.
///
/// The compressed file is written next to its final location and only
/// renamed into place once the encoder finished, so an archive never holds a
/// truncated file and the original stays put when compression fails.
#[derive(Debug, Clone)]
pub enum Compression {
    /// Gzip compression. Archived files get the `.gz` extension.
    Gzip,
    /// XZ compression (requires the `xz` feature). Archived files get the
    /// `.xz` extension.
    #[cfg(feature = "xz")]
    XZ,
}

impl Compression {
    /// Get the extension for the compressed log file.
    fn get_extension(&self) -> &'static str {
        match self {
            Compression::Gzip => "gz",
            #[cfg(feature = "xz")]
            Compression::XZ => "xz",
        }
    }
}

/// Specifies the time zone used for file timestamps, archive directory dates,
/// retention ages and the midnight rotation.
///
/// # Examples
/// ```
/// use logshelf::TimeZone;
/// use chrono::FixedOffset;
///
/// // Use UTC time for global deployments
/// let utc = TimeZone::UTC;
///
/// // Use local system time zone (changes with system settings)
/// let local = TimeZone::Local;
///
/// // Use a fixed offset for a specific region (e.g., UTC+8 for China)
/// let china = TimeZone::Fix(FixedOffset::east_opt(8 * 3600).unwrap());
/// ```
#[derive(Debug, Clone)]
pub enum TimeZone {
    /// Use UTC time zone.
    UTC,
    /// Use the system's local time zone, re-read on every use so daylight
    /// saving changes are picked up.
    Local,
    /// Use a fixed time zone offset.
    Fix(FixedOffset),
}

/// Provides a fluent interface for configuring [`LogShelf`] instances.
///
/// # Default Configuration
///
/// * Files are written to the current working directory
/// * Files are named after the running executable (`.exe` stripped)
/// * No size-based rotation, only the daily rotation at midnight
/// * No archiving, so retired files stay in the write directory
/// * No compression and no retention
/// * Local system time zone
/// * Replaced files are released 10 seconds after the swap, and a failed
///   open holds off further rotation attempts for 10 seconds
///
/// # Examples
///
/// ```rust,no_run
/// use logshelf::{Compression, LogShelfBuilder, RotationSize};
///
/// let shelf = LogShelfBuilder::new()
///     .directory("/var/log/myapp")
///     .file_name("myapp")
///     .size_limit(RotationSize::MB(100))
///     .archive_directory("/var/log/myapp/archive")
///     .compression(Compression::Gzip)
///     .retention_days(30)
///     .build()
///     .unwrap();
///
/// shelf.append(b"service started\n");
/// ```
#[derive(Debug, Clone, Default)]
pub struct LogShelfBuilder {
    directory: Option<PathBuf>,
    file_name: Option<String>,
    size_limit: Option<u64>,
    archive_directory: Option<PathBuf>,
    compression: Option<Compression>,
    retention_days: Option<u32>,
    time_zone: Option<TimeZone>,
    file_mode: Option<u32>,
    close_grace: Option<Duration>,
    retry_interval: Option<Duration>,
}

impl LogShelfBuilder {
    /// Create a new builder with every option at its default.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the directory holding the active log file and the retired files
    /// that have not been archived yet.
    pub fn directory<P: AsRef<Path>>(self, directory: P) -> Self {
        Self {
            directory: Some(directory.as_ref().to_path_buf()),
            ..self
        }
    }

    /// Set the log file name prefix. Files are named
    /// `<file_name>-YYYYMMDD-HHMMSS`.
    pub fn file_name<S: Into<String>>(self, file_name: S) -> Self {
        Self {
            file_name: Some(file_name.into()),
            ..self
        }
    }

    /// Rotate once the bytes appended since the last rotation exceed `size`.
    /// A zero size leaves size-based rotation disabled.
    pub fn size_limit(self, size: RotationSize) -> Self {
        Self {
            size_limit: Some(size.bytes()).filter(|&b| b > 0),
            ..self
        }
    }

    /// Enable archiving: retired files are moved to
    /// `<directory>/<YYYYMMDD>/<file_name>-YYYYMMDD-HHMMSS`, where the date
    /// directory is the day the file was archived. An empty path leaves
    /// archiving disabled.
    pub fn archive_directory<P: AsRef<Path>>(self, directory: P) -> Self {
        let directory = directory.as_ref();
        Self {
            archive_directory: (!directory.as_os_str().is_empty()).then(|| directory.to_path_buf()),
            ..self
        }
    }

    /// Compress archived files.
    pub fn compression(self, compression: Compression) -> Self {
        Self {
            compression: Some(compression),
            ..self
        }
    }

    /// Delete archive date directories that are more than `days` whole days
    /// old. Without this call no archive is ever deleted; `0` keeps only the
    /// current day's directory. Has no effect unless archiving is enabled.
    pub fn retention_days(self, days: u32) -> Self {
        Self {
            retention_days: Some(days),
            ..self
        }
    }

    /// Set the time zone for file names, archive dates and the daily
    /// rotation.
    pub fn time_zone(self, time_zone: TimeZone) -> Self {
        Self {
            time_zone: Some(time_zone),
            ..self
        }
    }

    /// Set the file permissions for log files and compressed archives
    /// (Unix-like systems only), e.g. `0o640`.
    pub fn file_mode(self, mode: u32) -> Self {
        Self {
            file_mode: Some(mode),
            ..self
        }
    }

    /// How long a replaced file is kept open after the swap so appends that
    /// already picked it up can finish.
    pub fn close_grace(self, grace: Duration) -> Self {
        Self {
            close_grace: Some(grace),
            ..self
        }
    }

    /// How long a rotation whose new file could not be opened keeps further
    /// rotation attempts away.
    pub fn retry_interval(self, interval: Duration) -> Self {
        Self {
            retry_interval: Some(interval),
            ..self
        }
    }

    /// Build the log shelf.
    ///
    /// Opens the first log file (falling back to standard output if that
    /// fails), starts an archive pass in the background when archiving is
    /// enabled, and starts the daily rotation timer.
    pub fn build(self) -> Result<LogShelf, LogShelfError> {
        let directory = self
            .directory
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("."));
        let file_name = self.file_name.unwrap_or_else(meta::default_base_name);

        let mut meta = meta::LogShelfMeta::new(directory, file_name)?;
        meta.size_limit = self.size_limit;
        meta.archive_directory = self.archive_directory;
        meta.compression = self.compression;
        meta.retention_days = self.retention_days;
        meta.file_mode = self.file_mode;
        if let Some(time_zone) = self.time_zone {
            meta.time_zone = time_zone;
        }
        if let Some(grace) = self.close_grace {
            meta.close_grace = grace;
        }
        if let Some(interval) = self.retry_interval {
            meta.retry_interval = interval;
        }

        let path = meta.log_path(&meta.now());
        let initial = match meta.create_log_file(&path) {
            Ok(file) => sink::Target::file(file, path),
            Err(err) => {
                tracing::warn!(error = %err, "failed to open log file, writing to stdout");
                sink::Target::Stdout
            }
        };

        let archiving = meta.archive_directory.is_some();
        let shared = Arc::new(shelf::Shared::new(meta, initial));
        if archiving {
            shelf::spawn_maintenance(&shared)?;
        }
        let timer = shelf::DailyTimer::spawn(&shared)?;

        Ok(LogShelf {
            shared,
            timer: Some(timer),
        })
    }
}
