use super::actor::ActorCore;
use crate::cache::{CompositeSegmentCache, SegmentCacheIndex, SegmentCacheIndexRegistry};
use crate::config::CacheConfig;
use crate::execution::Locus;
use crate::metrics::CacheMetrics;
use crate::{CacheError, Result};
use crossbeam::channel::Sender;
use parking_lot::Mutex;
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::debug;

/// Unit of work run on the cache actor thread.
pub trait Command: Send + 'static {
    type Output: Send + 'static;

    fn name(&self) -> &'static str;

    fn execute(self, ctx: &mut CommandContext<'_>) -> Result<Self::Output>;

    /// Execution context installed while the command runs.
    fn locus(&self) -> Option<Locus> {
        None
    }
}

/// What a command may touch while it holds the actor.
pub struct CommandContext<'a> {
    pub(crate) core: &'a mut ActorCore,
}

impl<'a> CommandContext<'a> {
    pub fn registry(&self) -> &SegmentCacheIndexRegistry {
        &self.core.registry
    }

    pub fn index(&self, schema_name: &str, schema_checksum: &str) -> Arc<Mutex<SegmentCacheIndex>> {
        self.core.registry.get_or_create(schema_name, schema_checksum)
    }

    pub fn config(&self) -> &CacheConfig {
        &self.core.config
    }

    pub fn metrics(&self) -> &CacheMetrics {
        &self.core.metrics
    }

    /// Handle for cache I/O tasks; never call it on the actor thread.
    pub fn composite(&self) -> CompositeSegmentCache {
        self.core.composite.clone()
    }

    pub fn submit_cache_io(&self, job: impl FnOnce() + Send + 'static) -> Result<()> {
        self.core.cache_io.submit(job)
    }
}

/// Command built from a closure.
pub struct FnCommand<F> {
    name: &'static str,
    locus: Option<Locus>,
    f: F,
}

impl<F> FnCommand<F> {
    pub fn new<T>(name: &'static str, f: F) -> Self
    where
        F: FnOnce(&mut CommandContext<'_>) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        Self {
            name,
            locus: None,
            f,
        }
    }

    pub fn with_locus(mut self, locus: Option<Locus>) -> Self {
        self.locus = locus;
        self
    }
}

impl<F, T> Command for FnCommand<F>
where
    F: FnOnce(&mut CommandContext<'_>) -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    type Output = T;

    fn name(&self) -> &'static str {
        self.name
    }

    fn execute(self, ctx: &mut CommandContext<'_>) -> Result<T> {
        (self.f)(ctx)
    }

    fn locus(&self) -> Option<Locus> {
        self.locus.clone()
    }
}

/// Type-erased command plus its reply slot, as carried by the mailbox.
pub(crate) trait QueuedCommand: Send {
    fn name(&self) -> &'static str;

    fn run(self: Box<Self>, ctx: &mut CommandContext<'_>);

    /// Releases the caller without running the command.
    fn abort(self: Box<Self>, err: CacheError);
}

pub(crate) struct Envelope<C: Command> {
    pub(crate) command: C,
    pub(crate) reply: Sender<Result<C::Output>>,
}

impl<C: Command> QueuedCommand for Envelope<C> {
    fn name(&self) -> &'static str {
        self.command.name()
    }

    fn run(self: Box<Self>, ctx: &mut CommandContext<'_>) {
        let Envelope { command, reply } = *self;
        let name = command.name();
        let _guard = command.locus().map(Locus::push);
        debug!(command = name, "executing command");
        let outcome = catch_unwind(AssertUnwindSafe(|| command.execute(ctx)))
            .unwrap_or_else(|panic| Err(CacheError::CommandPanicked(panic_message(panic))));
        // The caller may have given up; nothing to do then.
        let _ = reply.send(outcome);
    }

    fn abort(self: Box<Self>, err: CacheError) {
        let _ = self.reply.send(Err(err));
    }
}

pub(crate) fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
