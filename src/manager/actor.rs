use super::command::{panic_message, CommandContext, QueuedCommand};
use super::event::Event;
use super::pool::ExecutorPool;
use crate::cache::worker::mark_actor_thread;
use crate::cache::{CompositeSegmentCache, SegmentCacheIndexRegistry};
use crate::config::CacheConfig;
use crate::metrics::CacheMetrics;
use crate::segment::{SegmentConverter, SegmentHeader};
use crate::star::{Star, StarMeasure};
use crate::CacheError;
use crossbeam::channel::{Receiver, Sender};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Lifecycle of the cache actor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActorState {
    Running,
    /// Shutdown received; queued messages are being released.
    Draining,
    Stopped,
}

impl ActorState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => ActorState::Running,
            1 => ActorState::Draining,
            _ => ActorState::Stopped,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            ActorState::Running => 0,
            ActorState::Draining => 1,
            ActorState::Stopped => 2,
        }
    }
}

/// Actor state shared with submitters.
#[derive(Debug, Default)]
pub(crate) struct StateCell(AtomicU8);

impl StateCell {
    pub(crate) fn get(&self) -> ActorState {
        ActorState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub(crate) fn set(&self, state: ActorState) {
        self.0.store(state.as_u8(), Ordering::Release);
    }
}

pub(crate) enum Message {
    Command(Box<dyn QueuedCommand>),
    Event(Event),
    /// Poison pill; the sender is told once the mailbox is drained.
    Shutdown(Sender<()>),
}

/// Everything the actor thread owns.
pub(crate) struct ActorCore {
    pub(crate) registry: Arc<SegmentCacheIndexRegistry>,
    pub(crate) composite: CompositeSegmentCache,
    pub(crate) config: CacheConfig,
    pub(crate) metrics: CacheMetrics,
    pub(crate) cache_io: Arc<ExecutorPool>,
    pub(crate) stars: Vec<(Arc<Star>, Vec<StarMeasure>)>,
}

impl ActorCore {
    /// Converter for a header of a registered star.
    pub(crate) fn converter_for(&self, header: &SegmentHeader) -> Option<SegmentConverter> {
        self.stars.iter().find_map(|(star, measures)| {
            if !star.owns(header.fact()) {
                return None;
            }
            measures
                .iter()
                .find(|m| m.name == header.measure_name() && m.cube_name == header.cube_name())
                .map(|m| SegmentConverter::new(star.clone(), m.clone()))
        })
    }

    pub(crate) fn refresh_header_gauge(&self) {
        self.metrics
            .indexed_headers
            .set(self.registry.header_count() as i64);
    }

    fn handle_event(&mut self, event: Event) {
        self.metrics.events_total.with_label_values(&[event.kind()]).inc();
        debug!(event = event.kind(), measure = event.header().measure_name(), "handling event");
        match event {
            Event::LoadSucceeded { header, body } => {
                let index = self.registry.for_header(&header);
                let indexed = index.lock().load_succeeded(&header, body.clone());
                // Flushed or cancelled while loading: keep it out of the stores.
                if indexed && !self.config.disable_caching {
                    let composite = self.composite.clone();
                    self.spawn_io("put", move || composite.put(&header, body).map(|_| ()));
                }
            }
            Event::LoadFailed { header, error } => {
                let index = self.registry.for_header(&header);
                index.lock().load_failed(&header, error);
            }
            Event::SegmentRemove { header } => {
                let index = self.registry.for_header(&header);
                index.lock().remove(&header);
                let composite = self.composite.clone();
                self.spawn_io("remove", move || composite.remove(&header).map(|_| ()));
            }
            Event::ExternalSegmentCreated { header } => match self.converter_for(&header) {
                Some(converter) => {
                    let index = self.registry.for_header(&header);
                    index.lock().add(header, converter, false);
                }
                None => debug!(
                    cube = header.cube_name(),
                    measure = header.measure_name(),
                    "external segment for unregistered star ignored"
                ),
            },
            Event::ExternalSegmentDeleted { header } => {
                let index = self.registry.for_header(&header);
                index.lock().remove(&header);
            }
        }
        self.refresh_header_gauge();
    }

    /// Best-effort store call on the cache I/O pool; failures are logged.
    pub(crate) fn spawn_io(
        &self,
        operation: &'static str,
        job: impl FnOnce() -> crate::Result<()> + Send + 'static,
    ) {
        let submitted = self.cache_io.submit(move || {
            if let Err(err) = job() {
                warn!(operation, error = %err, "background cache operation failed");
            }
        });
        if let Err(err) = submitted {
            warn!(operation, error = %err, "background cache operation rejected");
        }
    }
}

pub(crate) struct Actor {
    pub(crate) core: ActorCore,
    pub(crate) receiver: Receiver<Message>,
    pub(crate) state: Arc<StateCell>,
}

impl Actor {
    pub(crate) fn run(mut self) {
        mark_actor_thread();
        info!("segment cache actor started");
        while let Ok(message) = self.receiver.recv() {
            match message {
                Message::Command(command) => {
                    self.core.metrics.commands_total.inc();
                    let mut ctx = CommandContext {
                        core: &mut self.core,
                    };
                    command.run(&mut ctx);
                }
                Message::Event(event) => {
                    let kind = event.kind();
                    let core = &mut self.core;
                    if let Err(panic) = catch_unwind(AssertUnwindSafe(|| core.handle_event(event))) {
                        warn!(event = kind, panic = %panic_message(panic), "event handler panicked");
                    }
                }
                Message::Shutdown(done) => {
                    self.drain();
                    let _ = done.send(());
                    break;
                }
            }
        }
        self.state.set(ActorState::Stopped);
        info!("segment cache actor stopped");
    }

    /// Releases every message queued behind the poison pill.
    fn drain(&mut self) {
        self.state.set(ActorState::Draining);
        info!("segment cache actor draining");
        let mut released = 0usize;
        while let Ok(message) = self.receiver.try_recv() {
            match message {
                Message::Command(command) => {
                    debug!(command = command.name(), "command released at shutdown");
                    command.abort(CacheError::ShutDown);
                    released += 1;
                }
                Message::Event(event) => {
                    debug!(event = event.kind(), "event dropped at shutdown");
                }
                Message::Shutdown(done) => {
                    let _ = done.send(());
                }
            }
        }
        if released > 0 {
            info!(released, "released queued commands");
        }
    }
}
