use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use uuid::Uuid;

/// A worker's view of one job's cancel flag (spec.md §4.I "workers poll a
/// per-job cancel flag"). Cloneable and cheap — every clone shares the same
/// underlying bool.
#[derive(Clone)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Per-job cancel flags, keyed by job id. One registry is shared by the
/// pool (which creates/clears entries around dispatch) and whatever
/// surface accepts cancel requests (the API layer), following the same
/// `DashMap<key, Arc<_>>` registry shape as the platform's
/// `IndexerState::semaphore_registry`.
#[derive(Default)]
pub struct CancellationRegistry {
    flags: DashMap<Uuid, Arc<AtomicBool>>,
}

impl CancellationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a fresh, unset flag for `job_id`, overwriting any stale
    /// flag left over from a prior run of the same job id.
    pub fn register(&self, job_id: Uuid) -> CancellationToken {
        let flag = Arc::new(AtomicBool::new(false));
        self.flags.insert(job_id, flag.clone());
        CancellationToken(flag)
    }

    /// Request cancellation. Returns `true` if a flag existed to set —
    /// `false` means the job is not currently dispatched on this instance
    /// (it may be on another instance, or not yet running).
    pub fn cancel(&self, job_id: Uuid) -> bool {
        match self.flags.get(&job_id) {
            Some(flag) => {
                flag.store(true, Ordering::Relaxed);
                true
            }
            None => false,
        }
    }

    pub fn clear(&self, job_id: Uuid) {
        self.flags.remove(&job_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_before_register_is_a_no_op() {
        let registry = CancellationRegistry::new();
        let job_id = Uuid::new_v4();
        assert!(!registry.cancel(job_id));
    }

    #[test]
    fn registered_token_observes_cancel() {
        let registry = CancellationRegistry::new();
        let job_id = Uuid::new_v4();
        let token = registry.register(job_id);
        assert!(!token.is_cancelled());
        assert!(registry.cancel(job_id));
        assert!(token.is_cancelled());
    }

    #[test]
    fn clear_drops_the_flag() {
        let registry = CancellationRegistry::new();
        let job_id = Uuid::new_v4();
        registry.register(job_id);
        registry.clear(job_id);
        assert!(!registry.cancel(job_id));
    }
}
