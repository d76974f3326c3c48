use crate::{CacheError, Result};
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

/// Counters kept by one segment cache manager.
///
/// Each manager owns its registry, so several managers can live in one
/// process without name clashes.
#[derive(Clone)]
pub struct CacheMetrics {
    registry: Registry,
    pub commands_total: IntCounter,
    pub events_total: IntCounterVec,
    pub peek_hits: IntCounter,
    pub peek_misses: IntCounter,
    pub flushed_headers: IntCounter,
    pub rollups_total: IntCounter,
    pub indexed_headers: IntGauge,
}

impl CacheMetrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();
        let commands_total = IntCounter::new(
            "segment_cache_commands_total",
            "Commands executed by the cache actor",
        )
        .map_err(metrics_error)?;
        let events_total = IntCounterVec::new(
            Opts::new("segment_cache_events_total", "Events handled by the cache actor"),
            &["kind"],
        )
        .map_err(metrics_error)?;
        let peek_hits = IntCounter::new("segment_cache_peek_hits_total", "Peeks answered from cache")
            .map_err(metrics_error)?;
        let peek_misses = IntCounter::new("segment_cache_peek_misses_total", "Peeks with no segment")
            .map_err(metrics_error)?;
        let flushed_headers = IntCounter::new(
            "segment_cache_flushed_headers_total",
            "Headers dropped or narrowed by flushes",
        )
        .map_err(metrics_error)?;
        let rollups_total = IntCounter::new("segment_cache_rollups_total", "Segments built by rollup")
            .map_err(metrics_error)?;
        let indexed_headers = IntGauge::new(
            "segment_cache_indexed_headers",
            "Headers currently held by the indexes",
        )
        .map_err(metrics_error)?;

        registry.register(Box::new(commands_total.clone())).map_err(metrics_error)?;
        registry.register(Box::new(events_total.clone())).map_err(metrics_error)?;
        registry.register(Box::new(peek_hits.clone())).map_err(metrics_error)?;
        registry.register(Box::new(peek_misses.clone())).map_err(metrics_error)?;
        registry.register(Box::new(flushed_headers.clone())).map_err(metrics_error)?;
        registry.register(Box::new(rollups_total.clone())).map_err(metrics_error)?;
        registry.register(Box::new(indexed_headers.clone())).map_err(metrics_error)?;

        Ok(Self {
            registry,
            commands_total,
            events_total,
            peek_hits,
            peek_misses,
            flushed_headers,
            rollups_total,
            indexed_headers,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Text exposition format of every metric in the registry.
    pub fn render(&self) -> String {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        if encoder.encode(&self.registry.gather(), &mut buffer).is_err() {
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}

fn metrics_error(err: prometheus::Error) -> CacheError {
    CacheError::Config(format!("metrics registry: {}", err))
}
