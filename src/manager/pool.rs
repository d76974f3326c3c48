use crate::{CacheError, Result};
use crossbeam::channel::{bounded, unbounded, Receiver, Sender};
use parking_lot::Mutex;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::thread::{self, JoinHandle};
use tracing::{debug, warn};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Fixed-size thread pool with an unbounded backlog.
///
/// The only rejection is a pool that can no longer accept work; it is
/// reported as too many concurrent `what`, naming the config knob.
pub(crate) struct ExecutorPool {
    what: &'static str,
    knob: &'static str,
    sender: Mutex<Option<Sender<Job>>>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl ExecutorPool {
    pub(crate) fn new(what: &'static str, knob: &'static str, size: usize) -> Result<Self> {
        let (sender, receiver) = unbounded::<Job>();
        let mut threads = Vec::with_capacity(size);
        for i in 0..size {
            let receiver = receiver.clone();
            let handle = thread::Builder::new()
                .name(format!("segment-cache-{}-{}", what, i))
                .spawn(move || worker_loop(receiver))
                .map_err(|e| CacheError::Config(format!("cannot start {} thread: {}", what, e)))?;
            threads.push(handle);
        }
        debug!(what, size, "executor pool started");
        Ok(Self {
            what,
            knob,
            sender: Mutex::new(Some(sender)),
            threads: Mutex::new(threads),
        })
    }

    pub(crate) fn submit(&self, job: impl FnOnce() + Send + 'static) -> Result<()> {
        let guard = self.sender.lock();
        let Some(sender) = guard.as_ref() else {
            return Err(self.rejected());
        };
        sender.send(Box::new(job)).map_err(|_| self.rejected())
    }

    /// Runs `job` on the pool; its result arrives on the returned channel.
    pub(crate) fn submit_with_result<T: Send + 'static>(
        &self,
        job: impl FnOnce() -> T + Send + 'static,
    ) -> Result<Receiver<T>> {
        let (tx, rx) = bounded(1);
        self.submit(move || {
            let _ = tx.send(job());
        })?;
        Ok(rx)
    }

    fn rejected(&self) -> CacheError {
        CacheError::TooManyConcurrent {
            what: self.what,
            knob: self.knob,
        }
    }

    /// Stops taking work, lets queued jobs finish and joins the threads.
    pub(crate) fn shutdown(&self) {
        self.sender.lock().take();
        let threads: Vec<JoinHandle<()>> = self.threads.lock().drain(..).collect();
        let current = thread::current().id();
        for handle in threads {
            if handle.thread().id() == current {
                continue;
            }
            if handle.join().is_err() {
                warn!(what = self.what, "pool thread panicked");
            }
        }
    }
}

fn worker_loop(receiver: Receiver<Job>) {
    while let Ok(job) = receiver.recv() {
        if catch_unwind(AssertUnwindSafe(job)).is_err() {
            warn!("pool task panicked");
        }
    }
}
