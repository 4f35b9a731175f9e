use {
    arc_swap::ArcSwap,
    std::{
        ffi::OsStr,
        fs,
        io::{self, Write as _},
        path::{Path, PathBuf},
        sync::{
            atomic::{AtomicU64, Ordering},
            Arc,
        },
    },
};

/// The destination currently receiving appended bytes.
#[derive(Debug)]
pub(crate) enum Target {
    /// An open log file together with the path it was opened at.
    File { file: fs::File, path: PathBuf },
    /// Standard output, used before the first file could be opened and after
    /// the sink was closed.
    Stdout,
}

impl Target {
    pub(crate) fn file(file: fs::File, path: PathBuf) -> Self {
        Target::File { file, path }
    }

    /// Flush written data to disk. A no-op for standard output.
    pub(crate) fn sync(&self) -> io::Result<()> {
        match self {
            Target::File { file, .. } => file.sync_all(),
            Target::Stdout => Ok(()),
        }
    }

    pub(crate) fn path(&self) -> Option<&Path> {
        match self {
            Target::File { path, .. } => Some(path),
            Target::Stdout => None,
        }
    }

    pub(crate) fn is_file(&self) -> bool {
        matches!(self, Target::File { .. })
    }

    fn write_all(&self, buf: &[u8]) -> io::Result<()> {
        match self {
            Target::File { file, .. } => {
                let mut file: &fs::File = file;
                file.write_all(buf)
            }
            Target::Stdout => io::stdout().lock().write_all(buf),
        }
    }

    fn flush(&self) -> io::Result<()> {
        match self {
            Target::File { file, .. } => {
                let mut file: &fs::File = file;
                file.flush()
            }
            Target::Stdout => io::stdout().lock().flush(),
        }
    }
}

/// Holds the active destination in an atomic slot plus the number of bytes
/// appended since the destination was last swapped.
///
/// Readers always observe a fully opened target. A writer that loaded the old
/// target before a swap keeps it alive until its write completes.
pub(crate) struct ActiveSink {
    target: ArcSwap<Target>,
    written: AtomicU64,
}

impl ActiveSink {
    pub(crate) fn new(target: Target) -> Self {
        ActiveSink {
            target: ArcSwap::from_pointee(target),
            written: AtomicU64::new(0),
        }
    }

    /// Count `buf` against the rotation counter, then write it to the active
    /// target. Returns the counter value including `buf`.
    ///
    /// A failing file write falls back to standard output so the bytes are
    /// not dropped.
    pub(crate) fn append(&self, buf: &[u8]) -> u64 {
        let total = self.written.fetch_add(buf.len() as u64, Ordering::AcqRel) + buf.len() as u64;
        let target = self.target.load();
        if target.write_all(buf).is_err() && target.is_file() {
            let _ = Target::Stdout.write_all(buf);
        }
        total
    }

    pub(crate) fn flush(&self) -> io::Result<()> {
        self.target.load().flush()
    }

    /// Reset the counter and install `next`, returning the previous target.
    pub(crate) fn replace(&self, next: Target) -> Arc<Target> {
        self.written.store(0, Ordering::Release);
        self.target.swap(Arc::new(next))
    }

    /// Detach the active file, leaving standard output in its place. Returns
    /// the detached target if it was a file, `None` if the sink was already
    /// closed.
    pub(crate) fn close(&self) -> Option<Arc<Target>> {
        if !self.target.load().is_file() {
            return None;
        }
        let previous = self.target.swap(Arc::new(Target::Stdout));
        previous.is_file().then_some(previous)
    }

    pub(crate) fn written(&self) -> u64 {
        self.written.load(Ordering::Acquire)
    }

    pub(crate) fn active_path(&self) -> Option<PathBuf> {
        self.target.load().path().map(Path::to_path_buf)
    }

    /// Final path component of the active file, used to keep the archiver
    /// away from it.
    pub(crate) fn active_file_name(&self) -> Option<Box<OsStr>> {
        self.target.load().path().and_then(Path::file_name).map(Box::from)
    }
}

#[cfg(test)]
mod tests {
    use {super::*, tempfile::TempDir};

    fn open(dir: &TempDir, name: &str) -> Target {
        let path = dir.path().join(name);
        let file = fs::OpenOptions::new().append(true).create(true).open(&path).unwrap();
        Target::file(file, path)
    }

    #[test]
    fn append_counts_bytes_before_writing() {
        let dir = TempDir::new().unwrap();
        let sink = ActiveSink::new(open(&dir, "a"));

        assert_eq!(sink.append(b"hello "), 6);
        assert_eq!(sink.append(b"world"), 11);
        assert_eq!(sink.written(), 11);
        assert_eq!(fs::read(dir.path().join("a")).unwrap(), b"hello world");
    }

    #[test]
    fn replace_resets_counter_and_redirects_writes() {
        let dir = TempDir::new().unwrap();
        let sink = ActiveSink::new(open(&dir, "a"));
        sink.append(b"first");

        let old = sink.replace(open(&dir, "b"));
        assert_eq!(old.path(), Some(dir.path().join("a").as_path()));
        assert_eq!(sink.written(), 0);

        sink.append(b"second");
        assert_eq!(fs::read(dir.path().join("a")).unwrap(), b"first");
        assert_eq!(fs::read(dir.path().join("b")).unwrap(), b"second");
        assert_eq!(sink.active_file_name().as_deref(), Some(OsStr::new("b")));
    }

    #[test]
    fn old_target_stays_writable_while_held() {
        let dir = TempDir::new().unwrap();
        let sink = ActiveSink::new(open(&dir, "a"));
        let held = sink.target.load_full();

        drop(sink.replace(open(&dir, "b")));
        held.write_all(b"late").unwrap();
        assert_eq!(fs::read(dir.path().join("a")).unwrap(), b"late");
    }

    #[test]
    fn close_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let sink = ActiveSink::new(open(&dir, "a"));

        let closed = sink.close();
        assert!(closed.is_some_and(|t| t.is_file()));
        assert!(sink.close().is_none());
        assert!(sink.active_path().is_none());
        assert!(sink.active_file_name().is_none());
    }
}
