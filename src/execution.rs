//! Query executions and the ambient context commands run under.

use std::cell::RefCell;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_EXECUTION_ID: AtomicU64 = AtomicU64::new(1);

/// One query execution. In-flight segment loads are tied to the execution
/// that asked for them so they can be cancelled together.
#[derive(Debug)]
pub struct Execution {
    id: u64,
    cancelled: AtomicBool,
}

impl Execution {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            id: NEXT_EXECUTION_ID.fetch_add(1, Ordering::Relaxed),
            cancelled: AtomicBool::new(false),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

impl PartialEq for Execution {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Execution {}

impl fmt::Display for Execution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "execution#{}", self.id)
    }
}

/// Execution context installed on a thread while work runs on its behalf.
#[derive(Debug, Clone)]
pub struct Locus {
    pub execution: Arc<Execution>,
    pub component: String,
}

thread_local! {
    static LOCUS_STACK: RefCell<Vec<Locus>> = const { RefCell::new(Vec::new()) };
}

impl Locus {
    pub fn new(execution: Arc<Execution>, component: impl Into<String>) -> Self {
        Self {
            execution,
            component: component.into(),
        }
    }

    /// Installs `locus` until the guard drops.
    pub fn push(locus: Locus) -> LocusGuard {
        LOCUS_STACK.with(|stack| stack.borrow_mut().push(locus));
        LocusGuard { _private: () }
    }

    /// Innermost locus of the current thread.
    pub fn peek() -> Option<Locus> {
        LOCUS_STACK.with(|stack| stack.borrow().last().cloned())
    }

    /// Execution of the innermost locus.
    pub fn current_execution() -> Option<Arc<Execution>> {
        Self::peek().map(|l| l.execution)
    }

    /// Runs `f` with `locus` installed.
    pub fn execute<T>(locus: Locus, f: impl FnOnce() -> T) -> T {
        let _guard = Locus::push(locus);
        f()
    }
}

/// Pops the locus it was created for.
pub struct LocusGuard {
    _private: (),
}

impl Drop for LocusGuard {
    fn drop(&mut self) {
        LOCUS_STACK.with(|stack| {
            stack.borrow_mut().pop();
        });
    }
}
