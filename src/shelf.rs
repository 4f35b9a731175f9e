use {
    crate::{
        meta::{self, LogShelfMeta},
        sink::{ActiveSink, Target},
        LogShelfError,
    },
    chrono::{DateTime, FixedOffset, NaiveDate},
    std::{
        io,
        path::PathBuf,
        sync::{
            atomic::{AtomicBool, AtomicU64, Ordering},
            mpsc::{self, RecvTimeoutError},
            Arc,
        },
        thread,
        time::Duration,
    },
};

/// State shared between the caller-facing handle and the background workers.
pub(crate) struct Shared {
    pub(crate) meta: LogShelfMeta,
    pub(crate) sink: ActiveSink,
    /// Set while a rotation or maintenance pass runs.
    rotating: AtomicBool,
    /// Completed handle swaps.
    rotations: AtomicU64,
}

/// Clears the single-flight flag when the rotation that holds it ends.
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Shared {
    pub(crate) fn new(meta: LogShelfMeta, initial: Target) -> Self {
        Shared {
            meta,
            sink: ActiveSink::new(initial),
            rotating: AtomicBool::new(false),
            rotations: AtomicU64::new(0),
        }
    }

    /// Claim the single-flight flag without blocking.
    fn claim(&self) -> bool {
        self.rotating
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn begin(&self) -> Option<InFlight<'_>> {
        self.claim().then(|| InFlight(&self.rotating))
    }

    /// Rotation body. The caller must hold the single-flight flag.
    fn rotate_held(&self) -> Result<(), LogShelfError> {
        let path = self.meta.log_path(&self.meta.now());
        let file = match self.meta.create_log_file(&path) {
            Ok(file) => file,
            Err(err) => {
                tracing::warn!(error = %err, retry_in = ?self.meta.retry_interval, "failed to open new log file");
                // Hold the flag through the retry interval so a burst of
                // appends does not hammer the filesystem.
                thread::sleep(self.meta.retry_interval);
                return Err(err);
            }
        };

        let previous = self.sink.replace(Target::file(file, path.clone()));
        self.rotations.fetch_add(1, Ordering::AcqRel);
        tracing::debug!(path = %path.display(), "rotated log file");

        if previous.is_file() {
            thread::sleep(self.meta.close_grace);
            drop(previous);
        }

        self.meta.maintain(self.sink.active_file_name().as_deref());
        Ok(())
    }

    /// Rotate on the current thread if no other rotation is in flight.
    /// Returns `Ok(false)` if the flag was already taken.
    pub(crate) fn try_rotate(&self) -> Result<bool, LogShelfError> {
        let Some(_in_flight) = self.begin() else {
            return Ok(false);
        };
        self.rotate_held().map(|()| true)
    }
}

/// Spawn a worker that rotates if the flag can be claimed. Used by the size
/// trigger so that appends never wait on the filesystem.
fn spawn_rotation(shared: &Arc<Shared>) {
    if !shared.claim() {
        return;
    }
    let worker = Arc::clone(shared);
    let spawned = thread::Builder::new().name("logshelf-rotate".into()).spawn(move || {
        let _in_flight = InFlight(&worker.rotating);
        let _ = worker.rotate_held();
    });
    if let Err(err) = spawned {
        shared.rotating.store(false, Ordering::Release);
        tracing::warn!(error = %err, "failed to spawn rotation worker");
    }
}

/// Spawn the startup maintenance pass (retention + archive) under the
/// single-flight flag.
pub(crate) fn spawn_maintenance(shared: &Arc<Shared>) -> Result<(), LogShelfError> {
    let worker = Arc::clone(shared);
    thread::Builder::new()
        .name("logshelf-maintain".into())
        .spawn(move || {
            if let Some(_in_flight) = worker.begin() {
                worker.meta.maintain(worker.sink.active_file_name().as_deref());
            }
        })
        .map(|_| ())
        .map_err(|err| LogShelfError::SpawnWorkerFailed("logshelf-maintain", err.to_string()))
}

/// The perpetual midnight rotation worker. Dropping it signals the worker to
/// stop at its next wake-up; the thread is not joined.
pub(crate) struct DailyTimer {
    stop: Option<mpsc::Sender<()>>,
    handle: Option<thread::JoinHandle<()>>,
}

impl DailyTimer {
    pub(crate) fn spawn(shared: &Arc<Shared>) -> Result<Self, LogShelfError> {
        let (stop, stopped) = mpsc::channel();
        let worker = Arc::clone(shared);
        let handle = thread::Builder::new()
            .name("logshelf-daily".into())
            .spawn(move || run_daily(&worker, &stopped, || worker.meta.now()))
            .map_err(|err| LogShelfError::SpawnWorkerFailed("logshelf-daily", err.to_string()))?;
        Ok(DailyTimer {
            stop: Some(stop),
            handle: Some(handle),
        })
    }

    /// Stop the worker and wait for it to exit. Waits for a rotation that is
    /// already running to finish.
    pub(crate) fn stop(mut self) {
        self.stop.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for DailyTimer {
    fn drop(&mut self) {
        self.stop.take();
    }
}

/// Shortest pause between two attempts at the same midnight rotation.
const MIN_DAILY_RETRY: Duration = Duration::from_secs(1);

/// Outcome of one wake-up of the daily worker.
#[derive(Debug, PartialEq, Eq)]
enum DailyWake {
    /// Woke before midnight; sleep again.
    Early,
    /// The midnight was handled; the next one to wait for follows this day.
    Rotated(NaiveDate),
    /// The rotation did not happen; try the same midnight again later.
    Retry,
}

fn run_daily(
    shared: &Shared,
    stopped: &mpsc::Receiver<()>,
    now: impl Fn() -> DateTime<FixedOffset>,
) {
    let mut day = now().date_naive();
    let mut retrying = false;
    loop {
        let current = now();
        let Some(midnight) = meta::midnight_after(&current, day) else {
            return;
        };
        let wait = if retrying {
            shared.meta.retry_interval.max(MIN_DAILY_RETRY)
        } else {
            meta::until(&current, &midnight)
        };
        match stopped.recv_timeout(wait) {
            Err(RecvTimeoutError::Timeout) => {}
            Ok(()) | Err(RecvTimeoutError::Disconnected) => return,
        }
        match daily_wake(shared, &midnight, &now) {
            DailyWake::Early => {}
            DailyWake::Rotated(next) => {
                day = next;
                retrying = false;
            }
            DailyWake::Retry => retrying = true,
        }
    }
}

/// Rotate for `midnight` if it is due. A lost guard or a failed open keeps
/// the same midnight pending.
fn daily_wake(
    shared: &Shared,
    midnight: &DateTime<FixedOffset>,
    now: &impl Fn() -> DateTime<FixedOffset>,
) -> DailyWake {
    if now() < *midnight {
        return DailyWake::Early;
    }
    match shared.try_rotate() {
        Ok(true) => DailyWake::Rotated(midnight.date_naive().max(now().date_naive())),
        Ok(false) => {
            tracing::debug!("daily rotation postponed, another rotation is in flight");
            DailyWake::Retry
        }
        Err(err) => {
            tracing::warn!(error = %err, "daily rotation failed");
            DailyWake::Retry
        }
    }
}

/// A log file sink that rotates by size and at midnight, archives retired
/// files into dated directories and prunes expired archives.
///
/// Appends go through `&self`, so a `LogShelf` can be shared between threads
/// behind an `Arc` or used through `&LogShelf` as an [`io::Write`].
pub struct LogShelf {
    pub(crate) shared: Arc<Shared>,
    pub(crate) timer: Option<DailyTimer>,
}

impl LogShelf {
    /// Append `buf` to the active log file.
    ///
    /// Never fails: if no file is open the bytes go to standard output. When
    /// the bytes written since the last rotation exceed the size limit, a
    /// rotation is started in the background.
    pub fn append(&self, buf: &[u8]) {
        let total = self.shared.sink.append(buf);
        if let Some(limit) = self.shared.meta.size_limit {
            if total > limit && !self.shared.rotating.load(Ordering::Acquire) {
                spawn_rotation(&self.shared);
            }
        }
    }

    /// Rotate now on the calling thread, through the same guard as the size
    /// and daily triggers. Blocks for the close grace period and the archive
    /// pass.
    ///
    /// Returns `Ok(false)` without doing anything if another rotation is in
    /// flight.
    pub fn rotate(&self) -> Result<bool, LogShelfError> {
        self.shared.try_rotate()
    }

    /// Detach the active file and send further appends to standard output.
    /// Calling it again is a no-op.
    ///
    /// The daily timer keeps running; use [`LogShelf::shutdown`] to stop it.
    pub fn close(&self) -> Result<(), LogShelfError> {
        match self.shared.sink.close() {
            Some(previous) => Ok(previous.sync()?),
            None => Ok(()),
        }
    }

    /// Close the sink and stop the daily timer, waiting for it to exit.
    pub fn shutdown(mut self) -> Result<(), LogShelfError> {
        let closed = self.close();
        if let Some(timer) = self.timer.take() {
            timer.stop();
        }
        closed
    }

    /// Path of the file currently receiving appends, `None` after
    /// [`LogShelf::close`] or if no file could be opened.
    pub fn active_path(&self) -> Option<PathBuf> {
        self.shared.sink.active_path()
    }

    /// Number of completed rotations since the shelf was built.
    pub fn rotation_count(&self) -> u64 {
        self.shared.rotations.load(Ordering::Acquire)
    }

    /// Bytes appended since the last rotation.
    pub fn bytes_since_rotation(&self) -> u64 {
        self.shared.sink.written()
    }
}

impl io::Write for LogShelf {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        io::Write::write(&mut &*self, buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        io::Write::flush(&mut &*self)
    }
}

impl io::Write for &LogShelf {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.append(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.shared.sink.flush()
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        chrono::TimeZone as _,
        std::{fs, sync::atomic::AtomicUsize, time::Instant},
        tempfile::TempDir,
    };

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<FixedOffset> {
        FixedOffset::east_opt(0).unwrap().with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    fn shared(dir: &TempDir, size_limit: Option<u64>) -> Arc<Shared> {
        let mut meta = LogShelfMeta::new(dir.path().to_path_buf(), "unit".to_string()).unwrap();
        meta.size_limit = size_limit;
        meta.close_grace = Duration::ZERO;
        meta.retry_interval = Duration::ZERO;
        let path = dir.path().join("unit-initial");
        let file = fs::File::create(&path).unwrap();
        Arc::new(Shared::new(meta, Target::file(file, path)))
    }

    #[test]
    fn flag_admits_one_rotation_at_a_time() {
        let dir = TempDir::new().unwrap();
        let shared = shared(&dir, None);

        let held = shared.begin();
        assert!(held.is_some());
        assert!(shared.begin().is_none());
        assert!(!shared.try_rotate().unwrap());
        assert_eq!(shared.rotations.load(Ordering::Acquire), 0);

        drop(held);
        assert!(shared.try_rotate().unwrap());
        assert_eq!(shared.rotations.load(Ordering::Acquire), 1);
        assert!(!shared.rotating.load(Ordering::Acquire));
    }

    #[test]
    fn rotation_swaps_to_timestamped_file() {
        let dir = TempDir::new().unwrap();
        let shared = shared(&dir, None);
        shared.sink.append(b"before");

        assert!(shared.try_rotate().unwrap());

        let active = shared.sink.active_path().unwrap();
        let name = active.file_name().unwrap().to_str().unwrap();
        assert!(shared.meta.parse_log_name(name).is_some(), "{name}");
        assert_eq!(shared.sink.written(), 0);
        assert_eq!(fs::read(dir.path().join("unit-initial")).unwrap(), b"before");
    }

    #[test]
    fn failed_open_keeps_counter_and_releases_flag() {
        let dir = TempDir::new().unwrap();
        let mut meta = shared(&dir, Some(4)).meta.clone();
        // A regular file stands where the write directory should be.
        meta.directory = dir.path().join("unit-initial");
        let path = dir.path().join("unit-fallback");
        let file = fs::File::create(&path).unwrap();
        let broken = Shared::new(meta, Target::file(file, path));
        broken.sink.append(b"12345");

        assert!(broken.try_rotate().is_err());
        assert_eq!(broken.sink.written(), 5);
        assert!(!broken.rotating.load(Ordering::Acquire));
        assert_eq!(broken.rotations.load(Ordering::Acquire), 0);
    }

    #[test]
    fn dropping_timer_stops_worker() {
        let dir = TempDir::new().unwrap();
        let shared = shared(&dir, None);
        let timer = DailyTimer::spawn(&shared).unwrap();
        assert_eq!(Arc::strong_count(&shared), 2);

        timer.stop();
        assert_eq!(Arc::strong_count(&shared), 1);
    }

    #[test]
    fn midnight_wake_rotates_once() {
        let dir = TempDir::new().unwrap();
        let shared = shared(&dir, None);
        let midnight = utc(2024, 3, 16, 0, 0, 0);

        let wake = daily_wake(&shared, &midnight, &|| utc(2024, 3, 16, 0, 0, 1));

        assert_eq!(wake, DailyWake::Rotated(midnight.date_naive()));
        assert_eq!(shared.rotations.load(Ordering::Acquire), 1);
        assert!(!shared.rotating.load(Ordering::Acquire));
    }

    #[test]
    fn early_wake_does_not_rotate() {
        let dir = TempDir::new().unwrap();
        let shared = shared(&dir, None);
        let midnight = utc(2024, 3, 16, 0, 0, 0);

        let wake = daily_wake(&shared, &midnight, &|| utc(2024, 3, 15, 23, 59, 59));

        assert_eq!(wake, DailyWake::Early);
        assert_eq!(shared.rotations.load(Ordering::Acquire), 0);
    }

    #[test]
    fn wake_with_guard_held_keeps_midnight_pending() {
        let dir = TempDir::new().unwrap();
        let shared = shared(&dir, None);
        let midnight = utc(2024, 3, 16, 0, 0, 0);
        let late = || utc(2024, 3, 16, 0, 0, 5);

        let held = shared.begin();
        assert_eq!(daily_wake(&shared, &midnight, &late), DailyWake::Retry);
        assert_eq!(shared.rotations.load(Ordering::Acquire), 0);

        drop(held);
        assert_eq!(daily_wake(&shared, &midnight, &late), DailyWake::Rotated(midnight.date_naive()));
        assert_eq!(shared.rotations.load(Ordering::Acquire), 1);
    }

    #[test]
    fn failed_open_keeps_midnight_pending() {
        let dir = TempDir::new().unwrap();
        let mut meta = shared(&dir, None).meta.clone();
        meta.directory = dir.path().join("unit-initial");
        let path = dir.path().join("unit-fallback");
        let file = fs::File::create(&path).unwrap();
        let broken = Shared::new(meta, Target::file(file, path));
        let midnight = utc(2024, 3, 16, 0, 0, 0);

        let wake = daily_wake(&broken, &midnight, &|| utc(2024, 3, 16, 0, 0, 1));

        assert_eq!(wake, DailyWake::Retry);
        assert_eq!(broken.rotations.load(Ordering::Acquire), 0);
    }

    #[test]
    fn late_wake_skips_to_the_current_day() {
        let dir = TempDir::new().unwrap();
        let shared = shared(&dir, None);
        let midnight = utc(2024, 3, 16, 0, 0, 0);

        let wake = daily_wake(&shared, &midnight, &|| utc(2024, 3, 18, 9, 0, 0));

        assert_eq!(wake, DailyWake::Rotated(utc(2024, 3, 18, 0, 0, 0).date_naive()));
    }

    #[test]
    fn daily_worker_rotates_when_midnight_passes() {
        let dir = TempDir::new().unwrap();
        let shared = shared(&dir, None);
        let calls = AtomicUsize::new(0);
        // Start at noon, next look is 50ms before midnight, after that the
        // clock has moved past it.
        let clock = || match calls.fetch_add(1, Ordering::AcqRel) {
            0 => utc(2024, 3, 15, 12, 0, 0),
            1 => utc(2024, 3, 15, 23, 59, 59) + chrono::Duration::milliseconds(950),
            _ => utc(2024, 3, 16, 0, 0, 1),
        };
        let (stop, stopped) = mpsc::channel();
        let worker: &Shared = &shared;

        thread::scope(|scope| {
            scope.spawn(move || run_daily(worker, &stopped, clock));
            let deadline = Instant::now() + Duration::from_secs(10);
            while shared.rotations.load(Ordering::Acquire) == 0 {
                assert!(Instant::now() < deadline, "daily worker never rotated");
                thread::sleep(Duration::from_millis(10));
            }
            drop(stop);
        });

        assert_eq!(shared.rotations.load(Ordering::Acquire), 1);
    }
}
