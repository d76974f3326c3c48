use crate::segment::SegmentBody;
use crate::{CacheError, Result};
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::Duration;

enum FutureState {
    Pending,
    Done(Result<Arc<SegmentBody>>),
}

struct Shared {
    state: Mutex<FutureState>,
    done: Condvar,
}

/// Handle on a body that is still being loaded.
///
/// Clones share the same slot; the first `set`, `fail` or `cancel` wins and
/// wakes every waiter.
#[derive(Clone)]
pub struct SegmentFuture {
    shared: Arc<Shared>,
}

impl SegmentFuture {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(FutureState::Pending),
                done: Condvar::new(),
            }),
        }
    }

    pub fn set(&self, body: Arc<SegmentBody>) -> bool {
        self.complete(Ok(body))
    }

    pub fn fail(&self, err: CacheError) -> bool {
        self.complete(Err(err))
    }

    pub fn cancel(&self) -> bool {
        self.complete(Err(CacheError::Cancelled))
    }

    fn complete(&self, outcome: Result<Arc<SegmentBody>>) -> bool {
        let mut state = self.shared.state.lock();
        if matches!(*state, FutureState::Done(_)) {
            return false;
        }
        *state = FutureState::Done(outcome);
        self.shared.done.notify_all();
        true
    }

    pub fn is_done(&self) -> bool {
        matches!(*self.shared.state.lock(), FutureState::Done(_))
    }

    /// Outcome if already known.
    pub fn try_get(&self) -> Option<Result<Arc<SegmentBody>>> {
        match &*self.shared.state.lock() {
            FutureState::Pending => None,
            FutureState::Done(outcome) => Some(outcome.clone()),
        }
    }

    pub fn wait(&self) -> Result<Arc<SegmentBody>> {
        let mut state = self.shared.state.lock();
        loop {
            if let FutureState::Done(outcome) = &*state {
                return outcome.clone();
            }
            self.shared.done.wait(&mut state);
        }
    }

    /// `None` if the load is still running after `timeout`.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Result<Arc<SegmentBody>>> {
        let mut state = self.shared.state.lock();
        if let FutureState::Pending = &*state {
            self.shared.done.wait_for(&mut state, timeout);
        }
        match &*state {
            FutureState::Pending => None,
            FutureState::Done(outcome) => Some(outcome.clone()),
        }
    }

    pub fn same_as(&self, other: &SegmentFuture) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }
}

impl Default for SegmentFuture {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SegmentFuture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SegmentFuture")
            .field("done", &self.is_done())
            .finish()
    }
}
