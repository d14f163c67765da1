use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use tracing::{error, info, warn};

use super::config::RecorderConfig;
use super::filename::FilenameAllocator;
use super::queue::ByteQueue;
use super::state::{
    AtomicState, FeedOutcome, RecorderState, RecorderStatus, RecordingSummary, SessionCounters,
};
use super::writer::{SessionFile, WriterTask};
use crate::audio::wav::HEADER_LEN;
use crate::error::{RecorderError, RecorderResult};

const PROBE_FILE_NAME: &str = ".rec_probe.tmp";
const DROP_LOG_EVERY: u64 = 100;

/// Continuous WAV recorder.
///
/// One handle owns the queue and at most one active session. Producers call
/// [`Recorder::feed_audio`] from their real-time context; a dedicated writer
/// thread moves the bytes to disk and keeps the header current.
pub struct Recorder {
    config: RecorderConfig,
    queue: Arc<ByteQueue>,
    state: Arc<AtomicState>,
    counters: Arc<SessionCounters>,
    allocator: &'static FilenameAllocator,

    /// Serializes start/stop and guards the session slot
    inner: Mutex<Inner>,

    /// Held shared by producers while they push; taken exclusively to
    /// close ingestion so nothing lands in the queue after the final drain
    ingest: RwLock<()>,
}

#[derive(Default)]
struct Inner {
    session: Option<ActiveSession>,
    filename: Option<PathBuf>,
    started_at: Option<DateTime<Utc>>,
}

struct ActiveSession {
    file: Arc<Mutex<Option<SessionFile>>>,
    cancel: Arc<AtomicBool>,
    writer: thread::JoinHandle<()>,
    writer_done: mpsc::Receiver<()>,
    started_at: DateTime<Utc>,
}

impl Recorder {
    /// Create a recorder writing into `config.output_directory`.
    ///
    /// The directory must already exist and be writable.
    pub fn init(config: RecorderConfig) -> RecorderResult<Self> {
        config.validate()?;
        check_mounted(&config.output_directory)?;
        probe_writable(&config.output_directory)?;

        let queue = ByteQueue::with_capacity(config.queue_capacity_bytes).ok_or_else(|| {
            RecorderError::ResourceExhausted(format!(
                "cannot allocate {} byte queue",
                config.queue_capacity_bytes
            ))
        })?;

        info!(
            "Recorder initialized: {} ({}Hz, {} channels, {}-bit, queue {} bytes)",
            config.output_directory.display(),
            config.format.sample_rate,
            config.format.channels,
            config.format.bits_per_sample,
            config.queue_capacity_bytes
        );

        let recorder = Self {
            queue: Arc::new(queue),
            state: Arc::new(AtomicState::new(RecorderState::Idle)),
            counters: Arc::new(SessionCounters::default()),
            allocator: FilenameAllocator::global(),
            inner: Mutex::new(Inner::default()),
            ingest: RwLock::new(()),
            config,
        };

        if recorder.config.auto_start {
            recorder.start()?;
        }

        Ok(recorder)
    }

    /// Stop any active session and release the recorder
    pub fn deinit(self) -> RecorderResult<()> {
        let result = self.shutdown();
        info!("Recorder deinitialized");
        result
    }

    pub fn config(&self) -> &RecorderConfig {
        &self.config
    }

    /// Open a new `rec_N.wav` and begin accepting audio
    pub fn start(&self) -> RecorderResult<()> {
        let mut inner = self.inner.lock();

        let state = self.state.get();
        if state != RecorderState::Idle {
            warn!("Recorder not in idle state ({})", state);
            return Err(RecorderError::InvalidState {
                operation: "start",
                state,
            });
        }

        check_mounted(&self.config.output_directory)?;

        let session_file = self.create_session_file()?;
        self.queue.clear();
        self.counters.begin_session(HEADER_LEN);
        let path = session_file.path().to_path_buf();
        let file = Arc::new(Mutex::new(Some(session_file)));
        let cancel = Arc::new(AtomicBool::new(false));
        let (done_tx, writer_done) = mpsc::channel();

        let task = WriterTask {
            queue: Arc::clone(&self.queue),
            state: Arc::clone(&self.state),
            counters: Arc::clone(&self.counters),
            file: Arc::clone(&file),
            cancel: Arc::clone(&cancel),
            pop_timeout: self.config.pop_timeout(),
            max_consecutive_errors: self.config.max_consecutive_write_errors,
        };

        // Writer checks the state on every iteration, so flip it first
        self.state.set(RecorderState::Recording);

        let writer = match thread::Builder::new()
            .name("recorder-writer".to_string())
            .spawn(move || task.run(done_tx))
        {
            Ok(handle) => handle,
            Err(e) => {
                self.state.set(RecorderState::Idle);
                error!("Failed to create write task: {}", e);
                // Closes (and finalizes) the header-only file
                drop(file.lock().take());
                return Err(RecorderError::ResourceExhausted(format!(
                    "cannot spawn writer thread: {}",
                    e
                )));
            }
        };

        let started_at = Utc::now();
        inner.session = Some(ActiveSession {
            file,
            cancel,
            writer,
            writer_done,
            started_at,
        });
        inner.filename = Some(path.clone());
        inner.started_at = Some(started_at);

        info!("Recording started: {}", path.display());
        Ok(())
    }

    /// Finish the current recording and return its summary.
    ///
    /// Valid while recording, and after a storage failure put the recorder
    /// into `Error` (the file is still finalized; the state stays `Error`).
    pub fn stop(&self) -> RecorderResult<RecordingSummary> {
        let (session, filename, errored) = {
            let mut inner = self.inner.lock();
            let state = self.state.get();

            let stoppable = matches!(state, RecorderState::Recording | RecorderState::Error);
            let session = match inner.session.take() {
                Some(session) if stoppable => session,
                other => {
                    inner.session = other;
                    warn!("Recorder not recording ({})", state);
                    return Err(RecorderError::InvalidState {
                        operation: "stop",
                        state,
                    });
                }
            };

            session.cancel.store(true, Ordering::Release);

            // Close ingestion: once this returns no producer is mid-push
            let errored = {
                let _gate = self.ingest.write();
                !self
                    .state
                    .transition(RecorderState::Recording, RecorderState::Stopping)
            };

            (session, inner.filename.clone(), errored)
        };

        let result = self.finish_session(session, filename);

        if !errored {
            self.state.set(RecorderState::Idle);
        }

        match &result {
            Ok(summary) => info!(
                "Recording stopped: {} ({:.2} MB, {:.1}s)",
                summary.filename.display(),
                summary.data_size as f64 / (1024.0 * 1024.0),
                summary.duration_secs
            ),
            Err(e) => error!("Failed to finalize recording: {}", e),
        }

        result
    }

    /// Queue PCM bytes for the current recording.
    ///
    /// Never blocks longer than the push timeout unless this call hits the
    /// size cap, in which case the session is stopped synchronously.
    pub fn feed_audio(&self, bytes: &[u8]) -> RecorderResult<FeedOutcome> {
        if bytes.is_empty() {
            return Err(RecorderError::InvalidArgument(
                "audio buffer must not be empty".to_string(),
            ));
        }

        let outcome = {
            let _gate = self.ingest.read();
            if self.state.get() != RecorderState::Recording {
                return Ok(FeedOutcome::Ignored);
            }
            self.push_within_cap(bytes)
        };

        if let FeedOutcome::LimitReached { accepted } = outcome {
            if accepted {
                info!("Max file size reached, stopping recording");
            } else {
                warn!("Max file size reached, stopping recording");
            }
            match self.stop() {
                Ok(_) | Err(RecorderError::InvalidState { .. }) => {}
                Err(e) => error!("Auto-stop at size cap failed: {}", e),
            }
        }

        Ok(outcome)
    }

    fn push_within_cap(&self, bytes: &[u8]) -> FeedOutcome {
        let len = bytes.len() as u64;
        let cap = self.config.effective_max_data_size();

        let reserved = self
            .counters
            .accepted
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |accepted| {
                accepted.checked_add(len).filter(|&total| total <= cap)
            });

        let before = match reserved {
            Ok(before) => before,
            Err(_) => return FeedOutcome::LimitReached { accepted: false },
        };

        if !self.queue.push(bytes, self.config.push_timeout()) {
            self.counters.accepted.fetch_sub(len, Ordering::SeqCst);
            let drops = self.counters.dropped_chunks.fetch_add(1, Ordering::Relaxed) + 1;
            self.counters.dropped_bytes.fetch_add(len, Ordering::Relaxed);
            if drops == 1 || drops % DROP_LOG_EVERY == 0 {
                warn!("Ring buffer full, dropping audio data ({} drops so far)", drops);
            }
            return FeedOutcome::Dropped;
        }

        if before + len == cap {
            FeedOutcome::LimitReached { accepted: true }
        } else {
            FeedOutcome::Accepted
        }
    }

    pub fn get_state(&self) -> RecorderState {
        self.state.get()
    }

    /// Path of the current recording, or of the last one once stopped
    pub fn get_current_filename(&self) -> Option<PathBuf> {
        self.inner.lock().filename.clone()
    }

    /// File size of the current (or last) recording, header included
    pub fn get_bytes_written(&self) -> u64 {
        self.counters.bytes_written.load(Ordering::SeqCst)
    }

    /// PCM payload of the current (or last) recording
    pub fn get_data_size(&self) -> u64 {
        self.counters.data_size.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> RecorderStatus {
        let (filename, started_at) = {
            let inner = self.inner.lock();
            (inner.filename.clone(), inner.started_at)
        };

        RecorderStatus {
            state: self.state.get(),
            filename,
            bytes_written: self.counters.bytes_written.load(Ordering::SeqCst),
            data_size: self.counters.data_size.load(Ordering::SeqCst),
            queued_bytes: self.queue.len(),
            dropped_chunks: self.counters.dropped_chunks.load(Ordering::Relaxed),
            dropped_bytes: self.counters.dropped_bytes.load(Ordering::Relaxed),
            write_errors: self.counters.write_errors.load(Ordering::SeqCst),
            header_patches: self.counters.header_patches.load(Ordering::SeqCst),
            started_at,
        }
    }

    fn create_session_file(&self) -> RecorderResult<SessionFile> {
        loop {
            let path = self.allocator.allocate(&self.config.output_directory);
            info!("Opening file: {}", path.display());

            match SessionFile::create(
                &path,
                &self.config.format,
                self.config.header_patch_interval_bytes,
                Arc::clone(&self.counters),
            ) {
                Ok(file) => return Ok(file),
                // Lost a race with another writer; take the next name
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(e) => {
                    error!("Failed to open file: {} ({})", path.display(), e);
                    return Err(RecorderError::io(
                        format!("creating {}", path.display()),
                        e,
                    ));
                }
            }
        }
    }

    fn finish_session(
        &self,
        session: ActiveSession,
        filename: Option<PathBuf>,
    ) -> RecorderResult<RecordingSummary> {
        let grace = self.config.stop_grace();

        match session.writer_done.recv_timeout(grace) {
            Err(mpsc::RecvTimeoutError::Timeout) => {
                warn!(
                    "Write task still busy after {:?}; finalizing once its current write completes",
                    grace
                );
            }
            _ => {
                if session.writer.join().is_err() {
                    error!("Write task panicked");
                }
            }
        }

        // Taking the file under its lock means the writer can no longer append
        let taken = session.file.lock().take();
        let mut file = taken.ok_or_else(|| {
            RecorderError::io(
                "finalizing recording",
                io::Error::new(io::ErrorKind::NotFound, "session file missing"),
            )
        })?;

        let remaining = self.queue.drain_all();
        if !remaining.is_empty() {
            if let Err(e) = file.append(&remaining) {
                self.counters.write_errors.fetch_add(1, Ordering::SeqCst);
                error!(
                    "Failed to write {} buffered bytes on stop: {}",
                    remaining.len(),
                    e
                );
            }
        }

        let path = filename.unwrap_or_else(|| file.path().to_path_buf());
        let data_size = file
            .finalize()
            .map_err(|e| RecorderError::io(format!("finalizing {}", path.display()), e))?;

        info!(
            "WAV file finalized: {} ({:.2} MB)",
            path.display(),
            data_size as f64 / (1024.0 * 1024.0)
        );

        Ok(RecordingSummary {
            filename: path,
            data_size,
            bytes_written: self.counters.bytes_written.load(Ordering::SeqCst),
            duration_secs: self.config.format.duration_secs(data_size),
            started_at: session.started_at,
            stopped_at: Utc::now(),
            dropped_bytes: self.counters.dropped_bytes.load(Ordering::Relaxed),
            write_errors: self.counters.write_errors.load(Ordering::SeqCst),
        })
    }

    fn shutdown(&self) -> RecorderResult<()> {
        let active = self.inner.lock().session.is_some();
        if !active {
            return Ok(());
        }

        match self.stop() {
            Ok(_) | Err(RecorderError::InvalidState { .. }) => Ok(()),
            Err(e) => Err(e),
        }
    }
}

impl Drop for Recorder {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            warn!("Failed to stop recording on drop: {}", e);
        }
    }
}

fn check_mounted(dir: &Path) -> RecorderResult<()> {
    match fs::metadata(dir) {
        Ok(meta) if meta.is_dir() => Ok(()),
        Ok(_) => {
            error!("Output path is not a directory: {}", dir.display());
            Err(RecorderError::NotMounted(dir.to_path_buf()))
        }
        Err(e) => {
            error!("Output directory does not exist: {} ({})", dir.display(), e);
            Err(RecorderError::NotMounted(dir.to_path_buf()))
        }
    }
}

fn probe_writable(dir: &Path) -> RecorderResult<()> {
    let probe = dir.join(PROBE_FILE_NAME);

    fs::write(&probe, b"")
        .and_then(|_| fs::remove_file(&probe))
        .map_err(|e| {
            error!("Cannot create test file in {}: {}", dir.display(), e);
            RecorderError::io(format!("probing {}", dir.display()), e)
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::{File, OpenOptions};
    use std::time::{Duration, Instant};
    use tempfile::TempDir;

    fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(2));
        }
        condition()
    }

    fn session_file(recorder: &Recorder) -> Arc<Mutex<Option<SessionFile>>> {
        let inner = recorder.inner.lock();
        Arc::clone(&inner.session.as_ref().expect("active session").file)
    }

    fn swap_session_file(recorder: &Recorder, replacement: File) -> File {
        session_file(recorder)
            .lock()
            .as_mut()
            .expect("open file")
            .replace_file(replacement)
            .expect("previous file")
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_storage_failure_moves_to_error_and_stop_still_finalizes() {
        let dir = TempDir::new().unwrap();
        let recorder = Recorder::init(RecorderConfig::new(dir.path())).unwrap();
        recorder.start().unwrap();

        recorder.feed_audio(&[1u8; 1000]).unwrap();
        assert!(wait_until(|| recorder.get_data_size() == 1000));

        // Storage fills up: every following write fails with ENOSPC
        let full = OpenOptions::new().write(true).open("/dev/full").unwrap();
        let real = swap_session_file(&recorder, full);

        for expected in 1..=3u64 {
            assert_eq!(recorder.feed_audio(&[2u8; 256]).unwrap(), FeedOutcome::Accepted);
            assert!(
                wait_until(|| recorder.status().write_errors >= expected),
                "write {} never failed",
                expected
            );
        }

        assert!(wait_until(|| recorder.get_state() == RecorderState::Error));
        assert_eq!(recorder.status().write_errors, 3);
        assert_eq!(recorder.feed_audio(&[3u8; 256]).unwrap(), FeedOutcome::Ignored);
        assert!(matches!(
            recorder.start(),
            Err(RecorderError::InvalidState { state: RecorderState::Error, .. })
        ));

        // Space freed: stop closes out what reached the disk
        let full = swap_session_file(&recorder, real);
        drop(full);
        let summary = recorder.stop().unwrap();

        assert_eq!(summary.data_size, 1000);
        assert_eq!(summary.write_errors, 3);
        assert_eq!(recorder.get_state(), RecorderState::Error);

        let bytes = fs::read(&summary.filename).unwrap();
        assert_eq!(bytes.len(), 1044);
        assert_eq!(u32::from_le_bytes(bytes[40..44].try_into().unwrap()), 1000);

        assert!(matches!(
            recorder.start(),
            Err(RecorderError::InvalidState { state: RecorderState::Error, .. })
        ));
        assert!(matches!(
            recorder.stop(),
            Err(RecorderError::InvalidState { state: RecorderState::Error, .. })
        ));
    }

    #[test]
    fn test_feed_never_blocks_past_push_timeout_when_writer_stalls() {
        let dir = TempDir::new().unwrap();
        let mut config = RecorderConfig::new(dir.path());
        config.queue_capacity_bytes = 4096;
        config.push_timeout_ms = 20;
        let push_timeout = config.push_timeout();
        let recorder = Recorder::init(config).unwrap();
        recorder.start().unwrap();

        // Holding the file lock stalls the writer after at most one pop
        let file = session_file(&recorder);
        let stall = file.lock();

        let mut fed = 0u64;
        let mut dropped = 0u32;
        for chunk in 0..20u8 {
            let started = Instant::now();
            let outcome = recorder.feed_audio(&[chunk; 1024]).unwrap();
            let elapsed = started.elapsed();

            assert!(
                elapsed < push_timeout + Duration::from_millis(250),
                "feed blocked for {:?}",
                elapsed
            );
            match outcome {
                FeedOutcome::Accepted => {}
                FeedOutcome::Dropped => dropped += 1,
                other => panic!("unexpected outcome {:?}", other),
            }
            fed += 1024;
        }
        assert!(dropped > 0, "a stalled writer must cause drops");
        assert!(recorder.status().queued_bytes <= 4096);

        drop(stall);
        let summary = recorder.stop().unwrap();

        assert_eq!(summary.data_size + summary.dropped_bytes, fed);
        assert_eq!(recorder.status().dropped_chunks, dropped as u64);
        assert!(summary.data_size <= fed);
    }
}
