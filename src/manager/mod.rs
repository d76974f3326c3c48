//! Segment cache manager
//!
//! A single actor thread owns every index mutation. Callers talk to it
//! through one bounded mailbox:
//! - commands block the caller until the actor replies on a one-shot channel
//! - events are fire-and-forget and handled in arrival order
//!
//! Store I/O never runs on the actor thread: reads happen on the caller's
//! thread, write-through and eviction on the cache I/O pool.

pub mod actor;
pub mod command;
pub mod event;
pub mod flush;
mod pool;

// Re-exports
pub use actor::ActorState;
pub use command::{Command, CommandContext, FnCommand};
pub use event::Event;
pub use flush::{CacheRegion, FlushOutcome};

use crate::cache::{
    CacheEvent, CacheEventKind, CompositeSegmentCache, MemorySegmentCache, SegmentCache,
    SegmentCacheIndexRegistry, SegmentCacheListener, SegmentCacheWorker, SegmentFuture,
};
use crate::config::CacheConfig;
use crate::execution::{Execution, Locus};
use crate::metrics::CacheMetrics;
use crate::rollup::{rollup, RollupThresholds};
use crate::segment::{CellRequest, SegmentBody, SegmentConverter, SegmentHeader, SegmentWithData};
use crate::star::{Star, StarMeasure};
use crate::{CacheError, Result};
use actor::{Actor, ActorCore, Message, StateCell};
use command::Envelope;
use crossbeam::channel::{bounded, Receiver, Sender};
use parking_lot::Mutex;
use pool::ExecutorPool;
use std::collections::BTreeSet;
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use tracing::{debug, info, warn};

/// Result of asking to load a header.
#[derive(Debug, Clone)]
pub enum LoadClaim {
    /// The caller must load the body and report it with
    /// `load_succeeded`/`load_failed`; others wait on the future.
    Claimed(SegmentFuture),
    /// Someone else is loading it.
    InFlight(SegmentFuture),
    /// The body is already cached.
    Ready,
}

struct Inner {
    sender: Sender<Message>,
    state: Arc<StateCell>,
    config: CacheConfig,
    metrics: CacheMetrics,
    registry: Arc<SegmentCacheIndexRegistry>,
    composite: CompositeSegmentCache,
    sql_pool: ExecutorPool,
    cache_io: Arc<ExecutorPool>,
    listener: Arc<dyn SegmentCacheListener>,
    actor: Mutex<Option<JoinHandle<()>>>,
}

/// Turns store notifications from other processes into actor events.
struct ExternalChangeListener {
    manager: Weak<Inner>,
}

impl SegmentCacheListener for ExternalChangeListener {
    fn handle(&self, event: &CacheEvent) {
        if event.is_local {
            return;
        }
        let Some(inner) = self.manager.upgrade() else {
            return;
        };
        let manager = SegmentCacheManager { inner };
        let header = event.header.clone();
        let sent = match event.kind {
            CacheEventKind::EntryCreated => manager.external_segment_created(header),
            CacheEventKind::EntryDeleted => manager.external_segment_deleted(header),
        };
        if let Err(err) = sent {
            debug!(error = %err, "external cache event not delivered");
        }
    }
}

/// Handle on the segment cache. Clones share the same actor.
#[derive(Clone)]
pub struct SegmentCacheManager {
    inner: Arc<Inner>,
}

impl SegmentCacheManager {
    /// Starts the actor and both pools. The memory store comes first in the
    /// composite cache unless `disable_local_cache` is set.
    pub fn new(config: CacheConfig, external_caches: Vec<Arc<dyn SegmentCache>>) -> Result<Self> {
        config.validate()?;
        let mut workers = Vec::with_capacity(external_caches.len() + 1);
        if !config.disable_local_cache {
            workers.push(SegmentCacheWorker::new(Arc::new(MemorySegmentCache::new())));
        }
        workers.extend(external_caches.into_iter().map(SegmentCacheWorker::new));
        let composite = CompositeSegmentCache::new(workers);

        let metrics = CacheMetrics::new()?;
        let registry = Arc::new(SegmentCacheIndexRegistry::new());
        let sql_pool = ExecutorPool::new("SQL statements", "sql_threads", config.sql_threads)?;
        let cache_io = Arc::new(ExecutorPool::new(
            "cache I/O tasks",
            "cache_io_threads",
            config.cache_io_threads,
        )?);
        let (sender, receiver) = bounded(config.mailbox_capacity);
        let state = Arc::new(StateCell::default());

        let actor = Actor {
            core: ActorCore {
                registry: registry.clone(),
                composite: composite.clone(),
                config: config.clone(),
                metrics: metrics.clone(),
                cache_io: cache_io.clone(),
                stars: Vec::new(),
            },
            receiver,
            state: state.clone(),
        };
        let handle = thread::Builder::new()
            .name("segment-cache-actor".to_string())
            .spawn(move || actor.run())
            .map_err(|e| CacheError::Config(format!("cannot start cache actor: {}", e)))?;

        let inner = Arc::new_cyclic(|weak: &Weak<Inner>| Inner {
            sender,
            state,
            config,
            metrics,
            registry,
            composite,
            sql_pool,
            cache_io,
            listener: Arc::new(ExternalChangeListener {
                manager: weak.clone(),
            }),
            actor: Mutex::new(Some(handle)),
        });
        inner.composite.add_listener(inner.listener.clone());
        info!(
            workers = inner.composite.workers().len(),
            sql_threads = inner.config.sql_threads,
            cache_io_threads = inner.config.cache_io_threads,
            "segment cache manager started"
        );
        Ok(Self { inner })
    }

    pub fn state(&self) -> ActorState {
        self.inner.state.get()
    }

    /// Messages waiting in the actor's mailbox.
    pub fn queued_messages(&self) -> usize {
        self.inner.sender.len()
    }

    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    pub fn metrics(&self) -> &CacheMetrics {
        &self.inner.metrics
    }

    pub fn registry(&self) -> &Arc<SegmentCacheIndexRegistry> {
        &self.inner.registry
    }

    pub fn composite(&self) -> &CompositeSegmentCache {
        &self.inner.composite
    }

    fn ensure_running(&self) -> Result<()> {
        match self.state() {
            ActorState::Running => Ok(()),
            _ => Err(CacheError::ShutDown),
        }
    }

    /// Runs `command` on the actor and blocks until it replies.
    pub fn execute<C: Command>(&self, command: C) -> Result<C::Output> {
        self.ensure_running()?;
        let (reply, response) = bounded(1);
        self.inner
            .sender
            .send(Message::Command(Box::new(Envelope { command, reply })))
            .map_err(|_| CacheError::ShutDown)?;
        response.recv().map_err(|_| CacheError::ShutDown)?
    }

    fn send_event(&self, event: Event) -> Result<()> {
        self.ensure_running()?;
        self.inner
            .sender
            .send(Message::Event(event))
            .map_err(|_| CacheError::ShutDown)
    }

    pub fn load_succeeded(&self, header: SegmentHeader, body: SegmentBody) -> Result<()> {
        self.send_event(Event::LoadSucceeded {
            header,
            body: Arc::new(body),
        })
    }

    pub fn load_failed(&self, header: SegmentHeader, error: CacheError) -> Result<()> {
        self.send_event(Event::LoadFailed { header, error })
    }

    pub fn remove(&self, header: SegmentHeader) -> Result<()> {
        self.send_event(Event::SegmentRemove { header })
    }

    /// Ignored while caching is disabled.
    pub fn external_segment_created(&self, header: SegmentHeader) -> Result<()> {
        if self.inner.config.disable_caching {
            return Ok(());
        }
        self.send_event(Event::ExternalSegmentCreated { header })
    }

    /// Ignored while caching is disabled.
    pub fn external_segment_deleted(&self, header: SegmentHeader) -> Result<()> {
        if self.inner.config.disable_caching {
            return Ok(());
        }
        self.send_event(Event::ExternalSegmentDeleted { header })
    }

    /// Makes `star` known so store notifications and cached headers for it
    /// can be indexed. Headers already in the stores are indexed as ready;
    /// their count is returned.
    pub fn register_star(&self, star: Arc<Star>, measures: Vec<StarMeasure>) -> Result<usize> {
        let existing = self.inner.composite.get_segment_headers()?;
        self.execute(FnCommand::new("register_star", move |ctx: &mut CommandContext<'_>| {
            ctx.core.stars.retain(|(s, _)| s != &star);
            ctx.core.stars.push((star.clone(), measures));
            let mut added = 0;
            for header in existing.into_iter().filter(|h| star.owns(h.fact())) {
                if let Some(converter) = ctx.core.converter_for(&header) {
                    let index = ctx.index(header.schema_name(), header.schema_checksum());
                    if index.lock().add(header, converter, false) {
                        added += 1;
                    }
                }
            }
            ctx.core.refresh_header_gauge();
            Ok(added)
        }))
    }

    /// Claims the load of `header` unless it is indexed already.
    pub fn begin_load(&self, converter: SegmentConverter, header: SegmentHeader) -> Result<LoadClaim> {
        let locus = Locus::peek();
        if locus.as_ref().map_or(false, |l| l.execution.is_cancelled()) {
            return Err(CacheError::Cancelled);
        }
        self.execute(
            FnCommand::new("begin_load", move |ctx: &mut CommandContext<'_>| {
                let index = ctx.index(header.schema_name(), header.schema_checksum());
                let mut index = index.lock();
                let execution = Locus::current_execution();
                if index.contains(&header) {
                    return Ok(match index.get_future(execution.as_ref(), &header) {
                        Some(future) => LoadClaim::InFlight(future),
                        None => LoadClaim::Ready,
                    });
                }
                index.add(header.clone(), converter, true);
                let claim = index
                    .get_future(execution.as_ref(), &header)
                    .map(LoadClaim::Claimed)
                    .ok_or_else(|| CacheError::LoadFailed("pending entry vanished".to_string()));
                drop(index);
                ctx.core.refresh_header_gauge();
                claim
            })
            .with_locus(locus),
        )
    }

    /// Segment holding `request`'s cell, from the stores or from a load in
    /// flight. Never triggers SQL.
    pub fn peek(&self, request: &CellRequest) -> Result<Option<SegmentWithData>> {
        let fact = request.fact_key();
        let bitkey = request.bitkey();
        let values = request.values().to_vec();
        let compound = request.compound_predicates().to_vec();
        let locus = Locus::peek();
        let located = self.execute(
            FnCommand::new("locate", move |ctx: &mut CommandContext<'_>| {
                let index = ctx.index(&fact.schema_name, &fact.schema_checksum);
                let mut index = index.lock();
                let execution = Locus::current_execution();
                let headers = index.locate(&fact, &bitkey, &values, &compound);
                Ok(headers
                    .into_iter()
                    .filter_map(|h| {
                        let converter = index.converter(&h)?;
                        let future = index.get_future(execution.as_ref(), &h);
                        Some((h, converter, future))
                    })
                    .collect::<Vec<_>>())
            })
            .with_locus(locus),
        )?;

        for (header, converter, future) in located {
            let body = match self.inner.composite.get(&header)? {
                Some(body) => Some(body),
                None => match future {
                    Some(future) => match future.wait() {
                        Ok(body) => Some(body),
                        Err(err) => {
                            debug!(error = %err, "in-flight load did not complete");
                            None
                        }
                    },
                    None => None,
                },
            };
            if let Some(body) = body {
                self.inner.metrics.peek_hits.inc();
                return converter.convert(&header, &body).map(Some);
            }
        }
        self.inner.metrics.peek_misses.inc();
        Ok(None)
    }

    /// Flushes `region`, dropping or narrowing every overlapping header.
    pub fn flush(&self, region: CacheRegion) -> Result<FlushOutcome> {
        self.execute(FnCommand::new("flush", move |ctx: &mut CommandContext<'_>| {
            flush::flush(ctx, &region)
        }))
    }

    /// Groups of cached headers that can be rolled up into `request`'s cell.
    pub fn find_rollup_candidates(&self, request: &CellRequest) -> Result<Vec<Vec<SegmentHeader>>> {
        let fact = request.fact_key();
        let bitkey = request.bitkey();
        let coordinates = request.coordinates();
        let compound = request.compound_predicates().to_vec();
        self.execute(FnCommand::new(
            "find_rollup_candidates",
            move |ctx: &mut CommandContext<'_>| {
                let index = ctx.index(&fact.schema_name, &fact.schema_checksum);
                let candidates = index
                    .lock()
                    .find_rollup_candidates(&fact, &bitkey, &coordinates, &compound);
                Ok(candidates)
            },
        ))
    }

    /// Rolls `candidates` up to the columns of `request` and caches the
    /// result. `None` if a candidate body is no longer in the stores.
    pub fn rollup(
        &self,
        request: &CellRequest,
        candidates: &[SegmentHeader],
    ) -> Result<Option<SegmentWithData>> {
        let mut sources = Vec::with_capacity(candidates.len());
        for header in candidates {
            match self.inner.composite.get(header)? {
                Some(body) => sources.push((header.clone(), body)),
                None => return Ok(None),
            }
        }
        let keep: BTreeSet<String> = request
            .columns()
            .iter()
            .map(|c| c.expression.clone())
            .collect();
        let thresholds = RollupThresholds::from(&self.inner.config);
        let (header, body) = rollup(&sources, &keep, request.measure().aggregator, thresholds)?;
        debug!(
            sources = %crate::rollup::describe_sources(candidates),
            populated = body.populated_count(),
            "rolled up segment"
        );
        self.inner.metrics.rollups_total.inc();

        let converter = SegmentConverter::new(request.star().clone(), request.measure().clone());
        let segment = converter.convert(&header, &body)?;
        if !self.inner.config.disable_caching {
            let body = Arc::new(body);
            let indexed_header = header.clone();
            self.execute(FnCommand::new("register_rollup", move |ctx: &mut CommandContext<'_>| {
                let index = ctx.index(indexed_header.schema_name(), indexed_header.schema_checksum());
                let added = index.lock().add(indexed_header.clone(), converter, false);
                if added {
                    let composite = ctx.composite();
                    ctx.core.spawn_io("put", move || {
                        composite.put(&indexed_header, body).map(|_| ())
                    });
                    ctx.core.refresh_header_gauge();
                }
                Ok(())
            }))?;
        }
        Ok(Some(segment))
    }

    /// Marks `execution` cancelled and detaches it from every in-flight
    /// load; loads nobody waits for any more are cancelled. A cancelled
    /// execution cannot claim new loads.
    pub fn cancel(&self, execution: Arc<Execution>) -> Result<Vec<SegmentHeader>> {
        execution.cancel();
        self.execute(FnCommand::new("cancel", move |ctx: &mut CommandContext<'_>| {
            let mut cancelled = Vec::new();
            for index in ctx.registry().indexes() {
                cancelled.extend(index.lock().cancel(&execution));
            }
            ctx.core.refresh_header_gauge();
            Ok(cancelled)
        }))
    }

    /// Every indexed header.
    pub fn segment_headers(&self) -> Result<Vec<SegmentHeader>> {
        self.execute(FnCommand::new("segment_headers", |ctx: &mut CommandContext<'_>| {
            Ok(ctx
                .registry()
                .indexes()
                .iter()
                .flat_map(|index| index.lock().headers())
                .collect())
        }))
    }

    pub fn print_cache_state(&self) -> Result<String> {
        self.execute(FnCommand::new("print_cache_state", |ctx: &mut CommandContext<'_>| {
            let mut out = String::new();
            for index in ctx.registry().indexes() {
                index
                    .lock()
                    .print_cache_state(&mut out)
                    .map_err(|e| CacheError::CacheOperationFailed {
                        operation: "print_cache_state",
                        reason: e.to_string(),
                    })?;
            }
            Ok(out)
        }))
    }

    /// Runs `task` on the SQL pool.
    pub fn submit_sql<T: Send + 'static>(
        &self,
        task: impl FnOnce() -> T + Send + 'static,
    ) -> Result<Receiver<T>> {
        self.ensure_running()?;
        self.inner.sql_pool.submit_with_result(task)
    }

    /// Runs `task` on the cache I/O pool.
    pub fn submit_cache_io<T: Send + 'static>(
        &self,
        task: impl FnOnce() -> T + Send + 'static,
    ) -> Result<Receiver<T>> {
        self.ensure_running()?;
        self.inner.cache_io.submit_with_result(task)
    }

    /// Sends the poison pill, waits for the actor to drain, then stops both
    /// pools. Later calls are no-ops.
    pub fn shutdown(&self) -> Result<()> {
        let Some(handle) = self.inner.actor.lock().take() else {
            return Ok(());
        };
        let (done, drained) = bounded(1);
        if self.inner.sender.send(Message::Shutdown(done)).is_ok() {
            let _ = drained.recv();
        }
        if handle.join().is_err() {
            warn!("segment cache actor panicked");
        }
        self.inner.composite.remove_listener(&self.inner.listener);
        self.inner.sql_pool.shutdown();
        self.inner.cache_io.shutdown();
        info!("segment cache manager shut down");
        Ok(())
    }
}
