// Memory reclamation around large allocations (session creation, inference)

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;
use tracing::debug;

static RECLAIM_PASSES: AtomicUsize = AtomicUsize::new(0);

/// Return freed heap pages to the operating system.
///
/// On glibc, freed memory from large tensors stays mapped inside the allocator's
/// arenas until `malloc_trim` is called; on other targets this only counts the pass.
/// Returns true if memory was actually released.
pub fn reclaim() -> bool {
    RECLAIM_PASSES.fetch_add(1, Ordering::Relaxed);
    trim_heap()
}

#[cfg(all(target_os = "linux", target_env = "gnu"))]
fn trim_heap() -> bool {
    // SAFETY: malloc_trim only walks allocator-owned free lists and has no preconditions.
    unsafe { libc::malloc_trim(0) != 0 }
}

#[cfg(not(all(target_os = "linux", target_env = "gnu")))]
fn trim_heap() -> bool {
    false
}

/// Number of reclamation passes run since process start
pub fn reclaim_passes() -> usize {
    RECLAIM_PASSES.load(Ordering::Relaxed)
}

/// Guard that runs a reclamation pass when entered and again when dropped.
///
/// Drop runs on every exit path, including `?` returns and panic unwinding, so the
/// buffers of a failed call are released before the next request starts.
pub struct ReclaimScope {
    label: String,
    started: Instant,
}

impl ReclaimScope {
    pub fn enter(label: impl Into<String>) -> Self {
        let label = label.into();
        let released = reclaim();
        debug!("[RECLAIM] enter {} (released: {})", label, released);
        Self {
            label,
            started: Instant::now(),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

impl Drop for ReclaimScope {
    fn drop(&mut self) {
        let released = reclaim();
        debug!(
            "[RECLAIM] exit {} after {:.2}ms (released: {})",
            self.label,
            self.started.elapsed().as_secs_f64() * 1000.0,
            released
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_reclaims_on_enter_and_exit() {
        let before = reclaim_passes();
        {
            let scope = ReclaimScope::enter("test");
            assert_eq!(scope.label(), "test");
            assert!(reclaim_passes() >= before + 1);
        }
        assert!(reclaim_passes() >= before + 2);
    }

    #[test]
    fn test_scope_reclaims_on_unwind() {
        let before = reclaim_passes();
        let result = std::panic::catch_unwind(|| {
            let _scope = ReclaimScope::enter("panicking");
            panic!("boom");
        });
        assert!(result.is_err());
        assert!(reclaim_passes() >= before + 2);
    }
}
