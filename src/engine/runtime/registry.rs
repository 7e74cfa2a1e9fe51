//! Registry of accepted, not-yet-finished runs and their control handles.
//!
//! The map is the only state shared between workers and control calls. It
//! sits behind one mutex that is held for map operations only, never across
//! an await point.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio_util::sync::CancellationToken;

use crate::engine::error::EngineError;

const RUNNING: u8 = 0;
const PAUSE_REQUESTED: u8 = 1;
const PAUSING: u8 = 2;

static NEXT_HANDLE_ID: AtomicU64 = AtomicU64::new(1);

/// In-memory control record for one run. Never persisted.
///
/// Clones share the same signals.
#[derive(Debug, Clone)]
pub struct ControlHandle {
    handle_id: u64,
    run_id: String,
    agent_id: String,
    cancel: CancellationToken,
    pause: Arc<AtomicU8>,
    exited: CancellationToken,
}

impl ControlHandle {
    /// `cancel` should be a child of the process shutdown token so the run
    /// observes both signals.
    pub fn new(
        run_id: impl Into<String>,
        agent_id: impl Into<String>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            handle_id: NEXT_HANDLE_ID.fetch_add(1, Ordering::Relaxed),
            run_id: run_id.into(),
            agent_id: agent_id.into(),
            cancel,
            pause: Arc::new(AtomicU8::new(RUNNING)),
            exited: CancellationToken::new(),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once cancellation (per-run or shutdown) is requested.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await;
    }

    /// Ask the worker to pause at its next turn boundary. Idempotent.
    pub fn request_pause(&self) {
        let _ = self.pause.compare_exchange(
            RUNNING,
            PAUSE_REQUESTED,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    pub fn pause_requested(&self) -> bool {
        self.pause.load(Ordering::Acquire) == PAUSE_REQUESTED
    }

    /// Withdraw a pause request the worker has not acted on yet.
    pub fn withdraw_pause(&self) -> bool {
        self.pause
            .compare_exchange(
                PAUSE_REQUESTED,
                RUNNING,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Turn a pending pause request into a committed pause. Returns false if
    /// no request is pending, including one just withdrawn by a resume. Once
    /// this succeeds [`withdraw_pause`](Self::withdraw_pause) fails.
    pub fn commit_pause(&self) -> bool {
        self.pause
            .compare_exchange(PAUSE_REQUESTED, PAUSING, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Commit to a pause requested through the persisted status.
    pub fn commit_external_pause(&self) {
        self.pause.store(PAUSING, Ordering::Release);
    }

    pub fn is_pausing(&self) -> bool {
        self.pause.load(Ordering::Acquire) == PAUSING
    }

    /// Resolves once the worker owning this handle has exited.
    pub async fn exited(&self) {
        self.exited.cancelled().await;
    }

    pub fn has_exited(&self) -> bool {
        self.exited.is_cancelled()
    }
}

#[derive(Debug, Clone, Default)]
pub struct RunRegistry {
    handles: Arc<Mutex<HashMap<String, ControlHandle>>>,
}

impl RunRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, ControlHandle>> {
        self.handles.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert `handle` unless its run id is already registered.
    pub fn register(&self, handle: ControlHandle) -> Result<(), EngineError> {
        let mut handles = self.lock();
        if handles.contains_key(&handle.run_id) {
            return Err(EngineError::AlreadyActive {
                run_id: handle.run_id,
            });
        }
        handles.insert(handle.run_id.clone(), handle);
        Ok(())
    }

    /// Remove `handle` if it is still the registered one for its run, and
    /// signal its exit.
    pub fn deregister(&self, handle: &ControlHandle) {
        {
            let mut handles = self.lock();
            if handles
                .get(&handle.run_id)
                .is_some_and(|h| h.handle_id == handle.handle_id)
            {
                handles.remove(&handle.run_id);
            }
        }
        handle.exited.cancel();
    }

    pub fn get(&self, run_id: &str) -> Option<ControlHandle> {
        self.lock().get(run_id).cloned()
    }

    pub fn contains(&self, run_id: &str) -> bool {
        self.lock().contains_key(run_id)
    }

    pub fn list_active(&self) -> BTreeSet<String> {
        self.lock().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Returns false if the run is not registered.
    pub fn request_cancel(&self, run_id: &str) -> bool {
        match self.get(run_id) {
            Some(handle) => {
                handle.cancel();
                true
            }
            None => false,
        }
    }

    /// Returns true only if registered; the worker decides when to pause.
    pub fn request_pause(&self, run_id: &str) -> bool {
        match self.get(run_id) {
            Some(handle) => {
                handle.request_pause();
                true
            }
            None => false,
        }
    }

    /// Guard that deregisters `handle` when dropped.
    pub fn registration(&self, handle: &ControlHandle) -> Registration {
        Registration {
            registry: self.clone(),
            handle: handle.clone(),
        }
    }
}

/// Keeps a run registered for as long as its worker lives.
#[derive(Debug)]
pub struct Registration {
    registry: RunRegistry,
    handle: ControlHandle,
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.registry.deregister(&self.handle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(run_id: &str) -> ControlHandle {
        ControlHandle::new(run_id, "underwriter", CancellationToken::new())
    }

    #[test]
    fn test_register_rejects_duplicates() {
        let registry = RunRegistry::new();
        registry.register(handle("r1")).unwrap();
        let err = registry.register(handle("r1")).unwrap_err();
        assert!(matches!(err, EngineError::AlreadyActive { .. }));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_cancel_and_pause_only_when_registered() {
        let registry = RunRegistry::new();
        assert!(!registry.request_cancel("missing"));
        assert!(!registry.request_pause("missing"));

        let h = handle("r1");
        registry.register(h.clone()).unwrap();
        assert!(registry.request_pause("r1"));
        assert!(h.pause_requested());
        assert!(registry.request_cancel("r1"));
        assert!(h.is_cancelled());
    }

    #[test]
    fn test_shutdown_token_reaches_every_run() {
        let shutdown = CancellationToken::new();
        let a = ControlHandle::new("a", "underwriter", shutdown.child_token());
        let b = ControlHandle::new("b", "appraiser", shutdown.child_token());

        a.cancel();
        assert!(a.is_cancelled());
        assert!(!b.is_cancelled());
        assert!(!shutdown.is_cancelled());

        shutdown.cancel();
        assert!(b.is_cancelled());
    }

    #[test]
    fn test_pause_withdraw_and_commit() {
        let h = handle("r1");
        assert!(!h.withdraw_pause());

        h.request_pause();
        assert!(h.withdraw_pause());
        assert!(!h.pause_requested());

        h.request_pause();
        assert!(h.commit_pause());
        assert!(h.is_pausing());
        assert!(!h.withdraw_pause());
    }

    #[test]
    fn test_withdrawn_pause_cannot_be_committed() {
        let h = handle("r1");
        assert!(!h.commit_pause());

        // Worker sees the request, a resume withdraws it before the commit.
        h.request_pause();
        assert!(h.pause_requested());
        assert!(h.withdraw_pause());

        assert!(!h.commit_pause());
        assert!(!h.is_pausing());
        assert!(!h.pause_requested());
    }

    #[test]
    fn test_registration_guard_deregisters_and_signals_exit() {
        let registry = RunRegistry::new();
        let h = handle("r1");
        registry.register(h.clone()).unwrap();

        let guard = registry.registration(&h);
        assert_eq!(registry.list_active(), BTreeSet::from(["r1".to_string()]));
        drop(guard);

        assert!(registry.is_empty());
        assert!(h.has_exited());
    }

    #[test]
    fn test_stale_guard_leaves_newer_handle() {
        let registry = RunRegistry::new();
        let old = handle("r1");
        registry.register(old.clone()).unwrap();
        registry.deregister(&old);

        let new = handle("r1");
        registry.register(new).unwrap();
        registry.deregister(&old);
        assert!(registry.contains("r1"));
    }
}
