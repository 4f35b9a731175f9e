use {
    crate::{
        meta::{self, LogShelfMeta, ARCHIVE_DATE_FORMAT},
        Compression, LogShelfError,
    },
    chrono::{DateTime, FixedOffset},
    flate2::write::GzEncoder,
    std::{
        ffi::OsStr,
        fs,
        io::{self, Write as _},
        path::{Path, PathBuf},
    },
};

impl LogShelfMeta {
    /// Run the retention sweep followed by the archive pass. Does nothing
    /// unless an archive directory is configured.
    pub(crate) fn maintain(&self, active: Option<&OsStr>) {
        let Some(archive_root) = &self.archive_directory else {
            return;
        };
        let now = self.now();
        if let Some(retention_days) = self.retention_days {
            self.sweep_archives(archive_root, retention_days, &now);
        }
        self.archive_retired(archive_root, active, &now);
    }

    /// Delete every `YYYYMMDD` directory under `archive_root` that is more
    /// than `retention_days` whole days old. Returns the removed directories.
    pub(crate) fn sweep_archives(
        &self,
        archive_root: &Path,
        retention_days: u32,
        now: &DateTime<FixedOffset>,
    ) -> Vec<PathBuf> {
        let entries = match fs::read_dir(archive_root) {
            Ok(entries) => entries,
            Err(err) => {
                if err.kind() != io::ErrorKind::NotFound {
                    tracing::warn!(dir = %archive_root.display(), error = %err, "failed to list archive directory");
                }
                return Vec::new();
            }
        };

        let mut removed = Vec::new();
        for entry in entries.flatten() {
            if !entry.file_type().is_ok_and(|t| t.is_dir()) {
                continue;
            }
            let Some(date) = entry.file_name().to_str().and_then(meta::parse_archive_date) else {
                continue;
            };
            if meta::age_in_days(now, date) <= i64::from(retention_days) {
                continue;
            }

            let path = entry.path();
            match fs::remove_dir_all(&path) {
                Ok(()) => {
                    tracing::debug!(dir = %path.display(), "removed expired archive directory");
                    removed.push(path);
                }
                Err(err) => {
                    let err = LogShelfError::RemoveDirectoryFailed(path, err.to_string());
                    tracing::warn!(error = %err, "retention sweep skipped a directory");
                }
            }
        }
        removed
    }

    /// Move every retired log file from the write directory into
    /// `<archive_root>/<today>/`. The file named `active` is never touched.
    /// Returns the paths of the created archive files.
    pub(crate) fn archive_retired(
        &self,
        archive_root: &Path,
        active: Option<&OsStr>,
        now: &DateTime<FixedOffset>,
    ) -> Vec<PathBuf> {
        let entries = match fs::read_dir(&self.directory) {
            Ok(entries) => entries,
            Err(err) => {
                tracing::warn!(dir = %self.directory.display(), error = %err, "failed to list log directory");
                return Vec::new();
            }
        };

        let archive_dir = archive_root.join(now.format(ARCHIVE_DATE_FORMAT).to_string());
        let mut archived = Vec::new();
        for entry in entries.flatten() {
            if !entry.file_type().is_ok_and(|t| t.is_file()) {
                continue;
            }
            let file_name = entry.file_name();
            if Some(file_name.as_os_str()) == active {
                continue;
            }
            let Some(name) = file_name.to_str() else {
                continue;
            };
            if self.parse_log_name(name).is_none() {
                continue;
            }

            match self.archive_file(&entry.path(), name, &archive_dir) {
                Ok(path) => {
                    tracing::debug!(from = %entry.path().display(), to = %path.display(), "archived log file");
                    archived.push(path);
                }
                Err(err) => tracing::warn!(error = %err, "failed to archive log file"),
            }
        }
        archived
    }

    /// Relocate one log file into `archive_dir`, compressing it if configured.
    fn archive_file(&self, origin: &Path, name: &str, archive_dir: &Path) -> Result<PathBuf, LogShelfError> {
        fs::create_dir_all(archive_dir)
            .map_err(|err| LogShelfError::CreateDirectoryFailed(archive_dir.to_path_buf(), err.to_string()))?;

        let Some(compression) = &self.compression else {
            let target = archive_dir.join(name);
            fs::rename(origin, &target).map_err(|err| LogShelfError::RenameFileError {
                from: origin.to_path_buf(),
                to: target.clone(),
                error: err.to_string(),
            })?;
            return Ok(target);
        };

        let target = archive_dir.join(format!("{name}.{}", compression.get_extension()));
        let partial = archive_dir.join(format!(".{name}.{}.part", compression.get_extension()));
        if let Err(err) = self.compress(compression, origin, &partial) {
            let _ = fs::remove_file(&partial);
            return Err(LogShelfError::CompressFailed {
                from: origin.to_path_buf(),
                to: target,
                error: err.to_string(),
            });
        }
        if let Err(err) = self.set_permissions(&partial) {
            let _ = fs::remove_file(&partial);
            return Err(err);
        }
        fs::rename(&partial, &target).map_err(|err| {
            let _ = fs::remove_file(&partial);
            LogShelfError::RenameFileError {
                from: partial.clone(),
                to: target.clone(),
                error: err.to_string(),
            }
        })?;

        fs::remove_file(origin)?;
        Ok(target)
    }

    /// Stream `origin` through the encoder into `destination`.
    fn compress(&self, compression: &Compression, origin: &Path, destination: &Path) -> Result<(), LogShelfError> {
        let infile = fs::File::open(origin)?;
        let mut reader = io::BufReader::new(infile);
        let outfile = fs::File::create(destination)?;
        let writer = io::BufWriter::new(outfile);

        match compression {
            Compression::Gzip => {
                let mut encoder = GzEncoder::new(writer, flate2::Compression::default());
                io::copy(&mut reader, &mut encoder)?;
                encoder.finish()?.flush()?;
            }
            #[cfg(feature = "xz")]
            Compression::XZ => {
                let mut writer = writer;
                lzma_rs::xz_compress(&mut reader, &mut writer)?;
                writer.flush()?;
            }
        }
        Ok(())
    }
}
