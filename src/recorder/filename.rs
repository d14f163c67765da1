use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::debug;

/// Allocates `rec_{N}.wav` paths that do not exist yet.
///
/// The counter lives for the process lifetime and only moves forward, so a
/// name handed out once is never handed out again by the same allocator.
pub struct FilenameAllocator {
    next: AtomicU64,
}

static SESSION_COUNTER: FilenameAllocator = FilenameAllocator::starting_at(1);

impl FilenameAllocator {
    pub const fn starting_at(first: u64) -> Self {
        Self {
            next: AtomicU64::new(first),
        }
    }

    /// Process-wide allocator shared by every recorder
    pub fn global() -> &'static FilenameAllocator {
        &SESSION_COUNTER
    }

    pub fn allocate(&self, dir: &Path) -> PathBuf {
        loop {
            let n = self.next.fetch_add(1, Ordering::SeqCst);
            let candidate = dir.join(format!("rec_{}.wav", n));

            if !candidate.exists() {
                debug!("Allocated recording filename: {}", candidate.display());
                return candidate;
            }

            debug!("{} already exists, trying next counter", candidate.display());
        }
    }
}
