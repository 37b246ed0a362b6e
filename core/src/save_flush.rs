//! Debounced save persistence
//!
//! The machine reports every save write through [`SaveWriter::request_flush`],
//! often hundreds of times per second while a game saves. Each request only
//! copies the image into memory; a background thread commits the latest
//! image to disk once the requests have been quiet for the debounce window.

use std::ffi::OsString;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, trace, warn};

use crate::clock::{Clock, SystemClock};

/// Quiet period required after the last request before writing.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_secs(2);
/// Upper bound on how long the flush thread sleeps between checks.
pub const DEFAULT_POLL: Duration = Duration::from_millis(100);

/// Debounce and poll intervals for a flusher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlushTiming {
    pub debounce: Duration,
    pub poll: Duration,
}

impl Default for FlushTiming {
    fn default() -> Self {
        Self {
            debounce: DEFAULT_DEBOUNCE,
            poll: DEFAULT_POLL,
        }
    }
}

/// What the flush thread should do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FlushDue {
    /// Nothing to write.
    Idle,
    /// A write is pending but the quiet period has not elapsed.
    Waiting(Duration),
    /// A write is pending and due.
    Ready,
}

struct FlushState {
    path: Option<PathBuf>,
    /// Full save image; capacity only ever grows.
    buffer: Vec<u8>,
    /// Length of the most recent image inside `buffer`.
    length: usize,
    /// Only the most recently modified range is meaningful.
    secondary: Vec<u8>,
    pending: bool,
    last_request: Option<Instant>,
    flush_version: u64,
    flushed_version: u64,
    flush_count: u64,
    failures: u32,
}

impl FlushState {
    fn new(path: Option<PathBuf>) -> Self {
        Self {
            path,
            buffer: Vec::new(),
            length: 0,
            secondary: Vec::new(),
            pending: false,
            last_request: None,
            flush_version: 0,
            flushed_version: 0,
            flush_count: 0,
            failures: 0,
        }
    }

    fn due(&self, now: Instant, debounce: Duration) -> FlushDue {
        if !self.pending || self.path.is_none() {
            return FlushDue::Idle;
        }
        let Some(last) = self.last_request else {
            return FlushDue::Idle;
        };
        let quiet = now.saturating_duration_since(last);
        if quiet >= debounce {
            FlushDue::Ready
        } else {
            FlushDue::Waiting(debounce - quiet)
        }
    }

    fn is_stale(&self) -> bool {
        self.flush_version != self.flushed_version
    }
}

struct Shared {
    state: Mutex<FlushState>,
    /// Held for a whole snapshot-write-commit cycle so writers never share the temp file.
    writing: Mutex<()>,
    wake: Condvar,
    running: AtomicBool,
    clock: Arc<dyn Clock>,
    timing: FlushTiming,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, FlushState> {
        self.state.lock().unwrap_or_else(|e| {
            warn!("Save flush state mutex poisoned; continuing");
            e.into_inner()
        })
    }

    /// Write the current image. Returns false if the write failed.
    fn flush(&self) -> bool {
        let _writing = self.writing.lock().unwrap_or_else(|e| {
            warn!("Save write mutex poisoned; continuing");
            e.into_inner()
        });

        let (path, data, version) = {
            let state = self.lock();
            if !state.pending {
                return true;
            }
            let Some(path) = state.path.clone() else {
                return false;
            };
            (path, state.buffer[..state.length].to_vec(), state.flush_version)
        };

        let result = write_atomic(&path, &data);

        let mut state = self.lock();
        match result {
            Ok(()) => {
                state.flushed_version = state.flushed_version.max(version);
                state.pending = state.flush_version != version;
                state.flush_count += 1;
                state.failures = 0;
                debug!(
                    "Flushed {} bytes to {} (version {})",
                    data.len(),
                    path.display(),
                    version
                );
                true
            }
            Err(e) => {
                state.failures += 1;
                if state.failures == 1 {
                    warn!("Failed to write save file {}: {}", path.display(), e);
                } else {
                    debug!(
                        "Save write to {} still failing ({} attempts): {}",
                        path.display(),
                        state.failures,
                        e
                    );
                }
                false
            }
        }
    }
}

/// Cloneable handle used by the machine's save-write hook and by the worker.
#[derive(Clone)]
pub struct SaveWriter {
    shared: Arc<Shared>,
}

impl SaveWriter {
    /// Record a save write.
    ///
    /// `image` is the full current save image; `write_offset..write_offset +
    /// write_len` is the range the machine just modified. Never touches disk.
    pub fn request_flush(&self, image: &[u8], write_offset: usize, write_len: usize) {
        let mut state = self.shared.lock();
        let len = image.len();

        if len > state.buffer.len() {
            state.buffer.resize(len, 0);
        }
        if len > state.secondary.len() {
            state.secondary.resize(len, 0);
        }

        state.buffer[..len].copy_from_slice(image);
        state.length = len;

        let start = write_offset.min(len);
        let end = write_offset.saturating_add(write_len).min(len);
        state.secondary[start..end].copy_from_slice(&image[start..end]);

        state.pending = true;
        state.last_request = Some(self.shared.clock.now());
        state.flush_version += 1;
        trace!(
            "Save flush requested: {} bytes, range {}..{}, version {}",
            len, start, end, state.flush_version
        );
        drop(state);

        self.shared.wake.notify_one();
    }

    /// Whether a requested image has not been written yet.
    pub fn needs_flush(&self) -> bool {
        self.shared.lock().pending
    }

    /// Write immediately if a flush is pending, ignoring the debounce window.
    pub fn check_flush(&self) -> bool {
        if self.needs_flush() {
            self.shared.flush()
        } else {
            true
        }
    }

    /// Copy the modified-range buffer into `dst`.
    ///
    /// Returns false (copying nothing) if `dst` is shorter than the buffer.
    pub fn copy_secondary(&self, dst: &mut [u8]) -> bool {
        let state = self.shared.lock();
        let len = state.secondary.len();
        if dst.len() < len {
            return false;
        }
        dst[..len].copy_from_slice(&state.secondary);
        true
    }

    pub fn path(&self) -> Option<PathBuf> {
        self.shared.lock().path.clone()
    }

    /// Point the store at a different file. `None` disables writing.
    pub fn set_path(&self, path: Option<PathBuf>) {
        let mut state = self.shared.lock();
        debug!("Save path set to {:?}", path);
        state.path = path;
        state.failures = 0;
        drop(state);
        self.shared.wake.notify_one();
    }

    /// Number of successful physical writes.
    pub fn flush_count(&self) -> u64 {
        self.shared.lock().flush_count
    }

    /// Version of the most recent request.
    pub fn flush_version(&self) -> u64 {
        self.shared.lock().flush_version
    }

    /// Version of the most recent successful write.
    pub fn flushed_version(&self) -> u64 {
        self.shared.lock().flushed_version
    }
}

/// Owns the flush thread for one persisted store.
///
/// Dropping the flusher stops the thread; if a requested image was never
/// written, one last write is attempted before the thread exits.
pub struct SaveFlusher {
    writer: SaveWriter,
    handle: Option<JoinHandle<()>>,
}

impl SaveFlusher {
    /// Spawn a flusher with default timing and the system clock.
    pub fn new(path: Option<PathBuf>) -> Self {
        Self::spawn(path, FlushTiming::default(), Arc::new(SystemClock))
    }

    pub fn spawn(path: Option<PathBuf>, timing: FlushTiming, clock: Arc<dyn Clock>) -> Self {
        let shared = Arc::new(Shared {
            state: Mutex::new(FlushState::new(path)),
            writing: Mutex::new(()),
            wake: Condvar::new(),
            running: AtomicBool::new(true),
            clock,
            timing,
        });

        let thread_shared = shared.clone();
        let handle = thread::Builder::new()
            .name("save-flush".into())
            .spawn(move || run(thread_shared))
            .expect("failed to spawn save flush thread");

        Self {
            writer: SaveWriter { shared },
            handle: Some(handle),
        }
    }

    pub fn writer(&self) -> &SaveWriter {
        &self.writer
    }

    /// Ask the thread to exit. Does not wait; see [`SaveFlusher::join`].
    pub fn stop(&self) {
        let shared = &self.writer.shared;
        let _state = shared.lock();
        shared.running.store(false, Ordering::Release);
        shared.wake.notify_all();
    }

    pub fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("Save flush thread panicked");
            }
        }
    }
}

impl Drop for SaveFlusher {
    fn drop(&mut self) {
        self.stop();
        self.join();
    }
}

fn run(shared: Arc<Shared>) {
    debug!("Save flush thread started");
    let FlushTiming { debounce, poll } = shared.timing;

    let mut state = shared.lock();
    while shared.running.load(Ordering::Acquire) {
        let wait = match state.due(shared.clock.now(), debounce) {
            FlushDue::Idle => poll,
            FlushDue::Waiting(remaining) => remaining.min(poll),
            FlushDue::Ready => {
                drop(state);
                let ok = shared.flush();
                state = shared.lock();
                if ok {
                    continue;
                }
                // Retry on the next wake.
                poll
            }
        };

        state = match shared.wake.wait_timeout(state, wait) {
            Ok((guard, _)) => guard,
            Err(e) => {
                warn!("Save flush condvar wait mutex poisoned; continuing");
                e.into_inner().0
            }
        };
    }

    let stale = state.is_stale() && state.pending;
    drop(state);

    if stale {
        debug!("Save flush thread stopping with unwritten data; flushing now");
        shared.flush();
    }
    debug!("Save flush thread finished");
}

/// Write `data` to a sibling temporary file, then rename it over `path`.
fn write_atomic(path: &Path, data: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let tmp_path = match path.file_name() {
        Some(name) => {
            let mut tmp_name = OsString::from(name);
            tmp_name.push(".tmp");
            path.with_file_name(tmp_name)
        }
        None => {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "save path has no file name",
            ));
        }
    };

    {
        let mut f = fs::File::create(&tmp_path)?;
        f.write_all(data)?;
        f.sync_all()?;
    }

    #[cfg(windows)]
    {
        if path.exists() {
            // Windows rename fails if destination exists.
            fs::remove_file(path)?;
        }
    }

    fs::rename(&tmp_path, path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn fast_timing() -> FlushTiming {
        FlushTiming {
            debounce: Duration::from_secs(2),
            poll: Duration::from_millis(10),
        }
    }

    fn spawn(path: Option<PathBuf>) -> (SaveFlusher, ManualClock) {
        let clock = ManualClock::new();
        let flusher = SaveFlusher::spawn(path, fast_timing(), Arc::new(clock.clone()));
        (flusher, clock)
    }

    fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        cond()
    }

    fn settle() {
        // Several poll intervals of real time.
        thread::sleep(Duration::from_millis(100));
    }

    #[test]
    fn burst_of_requests_coalesces_into_one_write() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("game.sav");
        let (flusher, clock) = spawn(Some(path.clone()));
        let writer = flusher.writer().clone();

        for i in 0..5u8 {
            writer.request_flush(&[i; 16], 0, 16);
            clock.advance(Duration::from_millis(300));
        }
        settle();
        assert_eq!(writer.flush_count(), 0);
        assert!(writer.needs_flush());

        clock.advance(Duration::from_secs(2));
        assert!(wait_until(Duration::from_secs(2), || writer.flush_count() == 1));
        assert_eq!(std::fs::read(&path).unwrap(), vec![4u8; 16]);

        settle();
        assert_eq!(writer.flush_count(), 1);
        assert!(!writer.needs_flush());
        assert_eq!(writer.flushed_version(), writer.flush_version());
    }

    #[test]
    fn requests_spaced_beyond_window_each_write() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("game.sav");
        let (flusher, clock) = spawn(Some(path.clone()));
        let writer = flusher.writer().clone();

        writer.request_flush(&[1, 1, 1, 1], 0, 4);
        clock.advance(Duration::from_millis(2100));
        assert!(wait_until(Duration::from_secs(2), || writer.flush_count() == 1));
        assert_eq!(std::fs::read(&path).unwrap(), vec![1, 1, 1, 1]);

        writer.request_flush(&[2, 2, 2, 2], 0, 4);
        clock.advance(Duration::from_millis(2100));
        assert!(wait_until(Duration::from_secs(2), || writer.flush_count() == 2));
        assert_eq!(std::fs::read(&path).unwrap(), vec![2, 2, 2, 2]);
    }

    #[test]
    fn write_happens_only_after_full_quiet_period() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("firmware.bin");
        let (flusher, clock) = spawn(Some(path.clone()));
        let writer = flusher.writer().clone();

        let first = vec![0u8; 1024];
        let mut second = vec![0u8; 1024];
        second[512..516].copy_from_slice(&[0xDE, 0xAD, 0xBE, 0xEF]);

        writer.request_flush(&first, 512, 4);
        clock.advance(Duration::from_millis(500));
        writer.request_flush(&second, 512, 4);

        clock.advance(Duration::from_millis(1999));
        settle();
        assert_eq!(writer.flush_count(), 0);
        assert!(!path.exists());

        clock.advance(Duration::from_millis(1));
        assert!(wait_until(Duration::from_secs(2), || writer.flush_count() == 1));
        assert_eq!(std::fs::read(&path).unwrap(), second);

        settle();
        assert_eq!(writer.flush_count(), 1);
    }

    #[test]
    fn unwritable_path_keeps_request_pending_and_retries() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"not a directory").unwrap();

        let (flusher, clock) = spawn(Some(blocker.join("game.sav")));
        let writer = flusher.writer().clone();

        writer.request_flush(&[7; 8], 0, 8);
        clock.advance(Duration::from_secs(3));
        settle();
        assert_eq!(writer.flush_count(), 0);
        assert!(writer.needs_flush());

        let good = dir.path().join("game.sav");
        writer.set_path(Some(good.clone()));
        assert!(wait_until(Duration::from_secs(2), || writer.flush_count() == 1));
        assert_eq!(std::fs::read(&good).unwrap(), vec![7; 8]);
    }

    #[test]
    fn stopping_flushes_unwritten_image() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("game.sav");
        let (flusher, _clock) = spawn(Some(path.clone()));

        flusher.writer().request_flush(&[9, 8, 7], 0, 3);
        drop(flusher);

        assert_eq!(std::fs::read(&path).unwrap(), vec![9, 8, 7]);
    }

    #[test]
    fn no_path_never_writes() {
        let (flusher, clock) = spawn(None);
        let writer = flusher.writer().clone();

        writer.request_flush(&[1, 2, 3], 0, 3);
        clock.advance(Duration::from_secs(5));
        settle();
        assert_eq!(writer.flush_count(), 0);
        assert!(writer.needs_flush());
        assert!(!writer.check_flush());
    }

    #[test]
    fn concurrent_flushes_leave_newest_image_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("game.sav");
        let (flusher, clock) = spawn(Some(path.clone()));
        let writer = flusher.writer().clone();

        thread::scope(|s| {
            for t in 0..4u8 {
                let writer = writer.clone();
                let clock = clock.clone();
                s.spawn(move || {
                    for i in 0..50u8 {
                        let image = [t.wrapping_mul(50).wrapping_add(i); 32];
                        writer.request_flush(&image, 0, image.len());
                        clock.advance(Duration::from_secs(3));
                        writer.check_flush();
                    }
                });
            }
        });

        assert!(writer.check_flush());
        assert!(!writer.needs_flush());
        assert_eq!(writer.flushed_version(), writer.flush_version());

        let mut last = [0u8; 32];
        assert!(writer.copy_secondary(&mut last));
        assert_eq!(std::fs::read(&path).unwrap(), last.to_vec());
    }

    #[test]
    fn check_flush_ignores_debounce() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("game.sav");
        let (flusher, _clock) = spawn(Some(path.clone()));
        let writer = flusher.writer().clone();

        writer.request_flush(&[5; 4], 0, 4);
        assert!(writer.check_flush());
        assert_eq!(writer.flush_count(), 1);
        assert!(!writer.needs_flush());
        assert_eq!(std::fs::read(&path).unwrap(), vec![5; 4]);
    }

    #[test]
    fn secondary_buffer_holds_only_modified_range() {
        let (flusher, _clock) = spawn(None);
        let writer = flusher.writer();

        writer.request_flush(&[1, 2, 3, 4, 5, 6, 7, 8], 2, 2);

        let mut dst = [0u8; 8];
        assert!(writer.copy_secondary(&mut dst));
        assert_eq!(dst, [0, 0, 3, 4, 0, 0, 0, 0]);

        let mut small = [0u8; 4];
        assert!(!writer.copy_secondary(&mut small));
        assert_eq!(small, [0; 4]);
    }

    #[test]
    fn out_of_range_write_is_clamped() {
        let (flusher, _clock) = spawn(None);
        let writer = flusher.writer();

        writer.request_flush(&[1, 2, 3, 4], 3, 10);

        let mut dst = [0u8; 4];
        assert!(writer.copy_secondary(&mut dst));
        assert_eq!(dst, [0, 0, 0, 4]);
    }

    #[test]
    fn image_length_tracks_latest_request() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("game.sav");
        let (flusher, _clock) = spawn(Some(path.clone()));
        let writer = flusher.writer();

        writer.request_flush(&[1; 4], 0, 4);
        writer.request_flush(&[2; 8], 0, 8);
        assert!(writer.check_flush());
        assert_eq!(std::fs::read(&path).unwrap(), vec![2; 8]);

        writer.request_flush(&[3; 2], 0, 2);
        assert!(writer.check_flush());
        assert_eq!(std::fs::read(&path).unwrap(), vec![3; 2]);
    }

    #[test]
    fn due_boundary_is_inclusive() {
        let now = Instant::now();
        let mut state = FlushState::new(Some(PathBuf::from("x.sav")));
        assert_eq!(state.due(now, DEFAULT_DEBOUNCE), FlushDue::Idle);

        state.pending = true;
        state.last_request = Some(now);
        assert_eq!(
            state.due(now + Duration::from_millis(1500), DEFAULT_DEBOUNCE),
            FlushDue::Waiting(Duration::from_millis(500))
        );
        assert_eq!(state.due(now + DEFAULT_DEBOUNCE, DEFAULT_DEBOUNCE), FlushDue::Ready);
    }
}
