use {
    crate::{Compression, LogShelfError, TimeZone},
    chrono::{DateTime, FixedOffset, Local, NaiveDate, NaiveDateTime, TimeZone as _, Utc},
    regex::Regex,
    std::{
        fs::{self, Permissions},
        path::{Path, PathBuf},
        time::Duration,
    },
};

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

/// Timestamp suffix of every log file, e.g. `20240102-030405`.
pub(crate) const FILE_TIME_FORMAT: &str = "%Y%m%d-%H%M%S";
/// Name of every archive date directory, e.g. `20240102`.
pub(crate) const ARCHIVE_DATE_FORMAT: &str = "%Y%m%d";

pub(crate) const DEFAULT_CLOSE_GRACE: Duration = Duration::from_secs(10);
pub(crate) const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(10);

const SECONDS_PER_DAY: i64 = 24 * 3600;

/// Settings for the log shelf, resolved once by the builder.
#[derive(Debug, Clone)]
pub(crate) struct LogShelfMeta {
    /// Where the active and not yet archived log files live.
    pub(crate) directory: PathBuf,
    /// Prefix of every log file name.
    pub(crate) base_name: String,
    /// Bytes after which a rotation is triggered, `None` disables it.
    pub(crate) size_limit: Option<u64>,
    /// Root of the dated archive tree, `None` disables archiving and
    /// retention.
    pub(crate) archive_directory: Option<PathBuf>,
    pub(crate) compression: Option<Compression>,
    /// Archive directories older than this many days are deleted.
    pub(crate) retention_days: Option<u32>,
    pub(crate) time_zone: TimeZone,
    /// The file permissions to set on newly created log files and compressed
    /// archives (Unix-like systems only).
    pub(crate) file_mode: Option<u32>,
    /// How long a replaced file stays open for writers that already loaded it.
    pub(crate) close_grace: Duration,
    /// How long a failed rotation holds the guard before giving up.
    pub(crate) retry_interval: Duration,
    /// Matches `<base_name>-YYYYMMDD-HHMMSS` and captures the timestamp.
    pub(crate) file_pattern: Regex,
}

impl LogShelfMeta {
    pub(crate) fn new(directory: PathBuf, base_name: String) -> Result<Self, LogShelfError> {
        Ok(LogShelfMeta {
            file_pattern: file_pattern(&base_name)?,
            directory,
            base_name,
            size_limit: None,
            archive_directory: None,
            compression: None,
            retention_days: None,
            time_zone: TimeZone::Local,
            file_mode: None,
            close_grace: DEFAULT_CLOSE_GRACE,
            retry_interval: DEFAULT_RETRY_INTERVAL,
        })
    }

    /// Get the current time in the configured time zone.
    pub(crate) fn now(&self) -> DateTime<FixedOffset> {
        match &self.time_zone {
            TimeZone::UTC => Utc::now().fixed_offset(),
            TimeZone::Local => Local::now().fixed_offset(),
            TimeZone::Fix(offset) => Utc::now().with_timezone(offset),
        }
    }

    /// Path of the log file created at `datetime`.
    pub(crate) fn log_path(&self, datetime: &DateTime<FixedOffset>) -> PathBuf {
        self.directory
            .join(format!("{}-{}", self.base_name, datetime.format(FILE_TIME_FORMAT)))
    }

    /// Parse the creation time out of a log file name. Returns `None` for
    /// anything that is not exactly `<base_name>-YYYYMMDD-HHMMSS`.
    pub(crate) fn parse_log_name(&self, name: &str) -> Option<NaiveDateTime> {
        let captures = self.file_pattern.captures(name)?;
        NaiveDateTime::parse_from_str(captures.get(1)?.as_str(), FILE_TIME_FORMAT).ok()
    }

    /// Create (or reopen for appending) the log file at `log_path`, creating
    /// the write directory first.
    pub(crate) fn create_log_file(&self, log_path: &Path) -> Result<fs::File, LogShelfError> {
        fs::create_dir_all(&self.directory)
            .map_err(|err| LogShelfError::CreateDirectoryFailed(self.directory.clone(), err.to_string()))?;

        // Append so that a second rotation within the same second continues
        // the file instead of overwriting it.
        let log_file = fs::OpenOptions::new()
            .append(true)
            .create(true)
            .open(log_path)
            .map_err(|err| LogShelfError::CreateFileFailed(log_path.to_path_buf(), err.to_string()))?;

        self.set_permissions(log_path)?;

        Ok(log_file)
    }

    /// Set the permissions for a file based on the configured file mode.
    ///
    /// Only has an effect when a file mode has been configured and the
    /// process runs on a Unix-like system; elsewhere a warning is emitted
    /// and nothing changes.
    pub(crate) fn set_permissions(&self, path: &Path) -> Result<(), LogShelfError> {
        if let Some(mode) = self.file_mode {
            #[cfg(unix)]
            {
                fs::set_permissions(path, Permissions::from_mode(mode)).map_err(|err| {
                    LogShelfError::SetFilePermissionsError {
                        path: path.to_path_buf(),
                        error: err.to_string(),
                    }
                })?
            }
            #[cfg(not(unix))]
            {
                let _ = mode;
                tracing::warn!(path = %path.display(), "setting file permissions is not supported on this platform");
            }
        }
        Ok(())
    }
}

/// Build the regex matching log file names for `base_name`.
fn file_pattern(base_name: &str) -> Result<Regex, LogShelfError> {
    Regex::new(&format!(r"^{}-(\d{{8}}-\d{{6}})$", regex::escape(base_name)))
        .map_err(|err| LogShelfError::InternalError(err.to_string()))
}

/// Parse an archive directory name. Anything but exactly eight digits forming
/// a valid date is rejected.
pub(crate) fn parse_archive_date(name: &str) -> Option<NaiveDate> {
    if name.len() != 8 || !name.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    NaiveDate::parse_from_str(name, ARCHIVE_DATE_FORMAT).ok()
}

/// Whole days elapsed from midnight of `date` (in the offset of `now`) until
/// `now`, truncated toward zero.
pub(crate) fn age_in_days(now: &DateTime<FixedOffset>, date: NaiveDate) -> i64 {
    let midnight = date.and_time(chrono::NaiveTime::MIN);
    let start = match now.offset().from_local_datetime(&midnight).single() {
        Some(start) => start,
        None => return 0,
    };
    (now.timestamp() - start.timestamp()) / SECONDS_PER_DAY
}

/// Midnight that starts the day after `day`, in the offset of `now`.
pub(crate) fn midnight_after(now: &DateTime<FixedOffset>, day: NaiveDate) -> Option<DateTime<FixedOffset>> {
    let next = day.succ_opt()?.and_time(chrono::NaiveTime::MIN);
    now.offset().from_local_datetime(&next).single()
}

/// Time left until `target`, zero if it already passed.
pub(crate) fn until(now: &DateTime<FixedOffset>, target: &DateTime<FixedOffset>) -> Duration {
    (*target - *now).to_std().unwrap_or(Duration::ZERO)
}

/// Base name of the running executable with a trailing `.exe` removed.
pub(crate) fn default_base_name() -> String {
    let name = std::env::args_os()
        .next()
        .and_then(|arg0| Path::new(&arg0).file_name().map(|n| n.to_string_lossy().into_owned()))
        .unwrap_or_else(|| "log".to_string());
    strip_exe(&name).to_string()
}

fn strip_exe(name: &str) -> &str {
    match name.len().checked_sub(4) {
        Some(idx) if name.is_char_boundary(idx) && name[idx..].eq_ignore_ascii_case(".exe") => &name[..idx],
        _ => name,
    }
}
