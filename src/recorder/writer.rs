use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::queue::ByteQueue;
use super::state::{AtomicState, RecorderState, SessionCounters};
use crate::audio::wav::{self, PcmFormat, HEADER_LEN};

const PROGRESS_LOG_INTERVAL: u64 = 1024 * 1024;

/// The open WAV file of one recording session
pub(crate) struct SessionFile {
    file: Option<File>,
    path: PathBuf,
    data_size: u64,
    last_patch_size: u64,
    patch_interval: u64,
    counters: Arc<SessionCounters>,
}

impl SessionFile {
    /// Create `path` (never overwriting) and write a zero-sized header
    pub(crate) fn create(
        path: &Path,
        format: &PcmFormat,
        patch_interval: u64,
        counters: Arc<SessionCounters>,
    ) -> io::Result<Self> {
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)?;

        wav::write_initial_header(&mut file, format)?;

        Ok(Self {
            file: Some(file),
            path: path.to_path_buf(),
            data_size: 0,
            last_patch_size: 0,
            patch_interval,
            counters,
        })
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    /// Append PCM bytes after the current payload.
    ///
    /// On failure the cursor is rewound to the last good payload end, so a
    /// partial write is overwritten by the next append.
    pub(crate) fn append(&mut self, bytes: &[u8]) -> io::Result<()> {
        let file = self.file.as_mut().ok_or_else(closed)?;

        if let Err(e) = file.write_all(bytes) {
            let _ = file.seek(SeekFrom::Start(HEADER_LEN + self.data_size));
            return Err(e);
        }

        let before = self.data_size;
        self.data_size += bytes.len() as u64;
        self.counters.data_size.store(self.data_size, Ordering::SeqCst);
        self.counters
            .bytes_written
            .store(HEADER_LEN + self.data_size, Ordering::SeqCst);

        if before / PROGRESS_LOG_INTERVAL != self.data_size / PROGRESS_LOG_INTERVAL {
            info!(
                "Recording: {:.1} MB captured",
                self.data_size as f64 / (1024.0 * 1024.0)
            );
        }

        Ok(())
    }

    /// Patch the header and sync once enough payload has accumulated.
    ///
    /// Returns whether a patch happened.
    pub(crate) fn patch_if_due(&mut self) -> io::Result<bool> {
        if self.data_size - self.last_patch_size < self.patch_interval {
            return Ok(false);
        }

        self.sync_header()?;
        debug!(
            "Updated WAV headers at {:.1} MB",
            self.data_size as f64 / (1024.0 * 1024.0)
        );
        Ok(true)
    }

    fn sync_header(&mut self) -> io::Result<()> {
        let file = self.file.as_mut().ok_or_else(closed)?;

        wav::patch_sizes(file, self.data_size)?;
        file.flush()?;
        file.sync_all()?;

        self.last_patch_size = self.data_size;
        self.counters.header_patches.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    /// Write the final sizes, sync and close
    pub(crate) fn finalize(mut self) -> io::Result<u64> {
        self.close()?;
        Ok(self.data_size)
    }

    /// Cut anything a failed write left past the payload, then patch and sync
    fn close(&mut self) -> io::Result<()> {
        let file = self.file.as_mut().ok_or_else(closed)?;
        file.set_len(HEADER_LEN + self.data_size)?;

        self.sync_header()?;
        self.file.take();
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn replace_file(&mut self, file: File) -> Option<File> {
        self.file.replace(file)
    }
}

impl Drop for SessionFile {
    fn drop(&mut self) {
        if self.file.is_some() {
            if let Err(e) = self.close() {
                warn!(
                    "Failed to finalize {} on drop: {}",
                    self.path.display(),
                    e
                );
            }
        }
    }
}

fn closed() -> io::Error {
    io::Error::new(io::ErrorKind::Other, "session file already closed")
}

/// Everything the writer thread needs for one session
pub(crate) struct WriterTask {
    pub(crate) queue: Arc<ByteQueue>,
    pub(crate) state: Arc<AtomicState>,
    pub(crate) counters: Arc<SessionCounters>,
    pub(crate) file: Arc<Mutex<Option<SessionFile>>>,
    pub(crate) cancel: Arc<AtomicBool>,
    pub(crate) pop_timeout: Duration,
    pub(crate) max_consecutive_errors: u32,
}

impl WriterTask {
    /// Drain the queue into the session file until cancelled.
    ///
    /// `done` is dropped when this returns, which is how `stop` observes exit.
    pub(crate) fn run(self, done: mpsc::Sender<()>) {
        let _done = done;
        let max_pop = self.queue.capacity();
        let mut consecutive_errors = 0u32;

        info!("Write task started");

        while !self.cancel.load(Ordering::Acquire)
            && self.state.get() == RecorderState::Recording
        {
            let chunk = self.queue.pop_up_to(max_pop, self.pop_timeout);
            if chunk.is_empty() {
                continue;
            }

            let mut guard = self.file.lock();
            let Some(file) = guard.as_mut() else {
                warn!(
                    "Session file finalized while {} bytes were in flight",
                    chunk.len()
                );
                break;
            };

            match file.append(&chunk).and_then(|_| file.patch_if_due()) {
                Ok(_) => consecutive_errors = 0,
                Err(e) => {
                    consecutive_errors += 1;
                    self.counters.write_errors.fetch_add(1, Ordering::SeqCst);
                    error!(
                        "Failed to write audio data to {} ({} bytes): {}",
                        file.path().display(),
                        chunk.len(),
                        e
                    );

                    if consecutive_errors >= self.max_consecutive_errors {
                        if self
                            .state
                            .transition(RecorderState::Recording, RecorderState::Error)
                        {
                            error!(
                                "{} consecutive write failures, recording marked as errored",
                                consecutive_errors
                            );
                        }
                        break;
                    }
                }
            }
        }

        info!("Write task stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::thread;
    use std::time::Instant;
    use tempfile::TempDir;

    fn session_file(dir: &TempDir, counters: Arc<SessionCounters>) -> SessionFile {
        SessionFile::create(
            &dir.path().join("rec_1.wav"),
            &PcmFormat::default(),
            32 * 1024,
            counters,
        )
        .unwrap()
    }

    fn data_size_field(bytes: &[u8]) -> u32 {
        u32::from_le_bytes(bytes[40..44].try_into().unwrap())
    }

    #[test]
    fn test_finalize_trims_bytes_past_payload() {
        let dir = TempDir::new().unwrap();
        let mut session = session_file(&dir, Arc::new(SessionCounters::default()));
        session.append(&[1u8; 100]).unwrap();
        let path = session.path().to_path_buf();

        // Tail left behind by a write that failed halfway
        let mut tail = OpenOptions::new().append(true).open(&path).unwrap();
        tail.write_all(&[0xEE; 50]).unwrap();
        drop(tail);

        assert_eq!(session.finalize().unwrap(), 100);

        let bytes = fs::read(&path).unwrap();
        assert_eq!(bytes.len(), 144);
        assert_eq!(data_size_field(&bytes), 100);
        assert!(bytes[44..].iter().all(|&b| b == 1));
    }

    #[test]
    fn test_patch_if_due_follows_interval() {
        let dir = TempDir::new().unwrap();
        let counters = Arc::new(SessionCounters::default());
        let mut session = session_file(&dir, Arc::clone(&counters));

        session.append(&[0u8; 1000]).unwrap();
        assert!(!session.patch_if_due().unwrap());

        session.append(&[0u8; 32 * 1024]).unwrap();
        assert!(session.patch_if_due().unwrap());
        assert!(!session.patch_if_due().unwrap());
        assert_eq!(counters.header_patches.load(Ordering::SeqCst), 1);

        let bytes = fs::read(session.path()).unwrap();
        assert_eq!(data_size_field(&bytes) as u64, 1000 + 32 * 1024);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_writer_enters_error_after_consecutive_failures() {
        let dir = TempDir::new().unwrap();
        let counters = Arc::new(SessionCounters::default());
        let mut session = session_file(&dir, Arc::clone(&counters));

        // Every write to /dev/full fails with ENOSPC
        let full = OpenOptions::new().write(true).open("/dev/full").unwrap();
        let real = session.replace_file(full).unwrap();

        let queue = Arc::new(ByteQueue::with_capacity(1024).unwrap());
        let state = Arc::new(AtomicState::new(RecorderState::Recording));
        let file = Arc::new(Mutex::new(Some(session)));
        let task = WriterTask {
            queue: Arc::clone(&queue),
            state: Arc::clone(&state),
            counters: Arc::clone(&counters),
            file: Arc::clone(&file),
            cancel: Arc::new(AtomicBool::new(false)),
            pop_timeout: Duration::from_millis(5),
            max_consecutive_errors: 3,
        };
        let (done_tx, done_rx) = mpsc::channel();
        let writer = thread::spawn(move || task.run(done_tx));

        for expected in 1..=3u64 {
            assert!(queue.push(&[7u8; 64], Duration::from_millis(100)));
            let deadline = Instant::now() + Duration::from_secs(5);
            while counters.write_errors.load(Ordering::SeqCst) < expected {
                assert!(Instant::now() < deadline, "write {} never failed", expected);
                thread::sleep(Duration::from_millis(1));
            }
        }

        assert_eq!(
            done_rx.recv_timeout(Duration::from_secs(5)),
            Err(mpsc::RecvTimeoutError::Disconnected)
        );
        writer.join().unwrap();

        assert_eq!(state.get(), RecorderState::Error);
        assert_eq!(counters.write_errors.load(Ordering::SeqCst), 3);
        assert_eq!(counters.data_size.load(Ordering::SeqCst), 0);

        // Storage is back: the session still closes into a valid empty WAV
        let mut session = file.lock().take().unwrap();
        session.replace_file(real);
        let path = session.path().to_path_buf();
        assert_eq!(session.finalize().unwrap(), 0);
        assert_eq!(fs::read(&path).unwrap().len(), 44);
    }
}
