use crate::{CacheError, Result};
use serde::Deserialize;
use std::path::Path;
use std::str::FromStr;

/// Prefix of the environment variables read by [`CacheConfig::apply_env_overrides`].
pub const ENV_PREFIX: &str = "LUMA_SEGMENT_CACHE_";

/// Segment cache settings. Every field has a default, so a config file only
/// lists what it changes.
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct CacheConfig {
    /// Threads running SQL loads.
    pub sql_threads: usize,
    /// Threads talking to cache stores.
    pub cache_io_threads: usize,
    /// Actor mailbox slots; senders block when it is full.
    pub mailbox_capacity: usize,
    /// Leave the in-process memory store out of the composite cache.
    pub disable_local_cache: bool,
    /// Turn off write-through and external cache notifications.
    pub disable_caching: bool,
    pub choose_aggregate_by_volume: bool,
    pub rollup_density_ratio: f64,
    pub rollup_max_cell_count: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            sql_threads: num_cpus::get(),
            cache_io_threads: num_cpus::get(),
            mailbox_capacity: 1000,
            disable_local_cache: false,
            disable_caching: false,
            choose_aggregate_by_volume: false,
            rollup_density_ratio: 0.5,
            rollup_max_cell_count: 10_000_000,
        }
    }
}

impl CacheConfig {
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&contents)?;
        Ok(config)
    }

    pub fn from_toml_str(contents: &str) -> anyhow::Result<Self> {
        let config: CacheConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Overrides fields from `LUMA_SEGMENT_CACHE_*` variables, e.g.
    /// `LUMA_SEGMENT_CACHE_SQL_THREADS=8`.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        let var = |name: &str| lookup(&format!("{}{}", ENV_PREFIX, name));
        if let Some(v) = var("SQL_THREADS") {
            self.sql_threads = parse("SQL_THREADS", &v)?;
        }
        if let Some(v) = var("CACHE_IO_THREADS") {
            self.cache_io_threads = parse("CACHE_IO_THREADS", &v)?;
        }
        if let Some(v) = var("MAILBOX_CAPACITY") {
            self.mailbox_capacity = parse("MAILBOX_CAPACITY", &v)?;
        }
        if let Some(v) = var("DISABLE_LOCAL_CACHE") {
            self.disable_local_cache = parse("DISABLE_LOCAL_CACHE", &v)?;
        }
        if let Some(v) = var("DISABLE_CACHING") {
            self.disable_caching = parse("DISABLE_CACHING", &v)?;
        }
        if let Some(v) = var("CHOOSE_AGGREGATE_BY_VOLUME") {
            self.choose_aggregate_by_volume = parse("CHOOSE_AGGREGATE_BY_VOLUME", &v)?;
        }
        if let Some(v) = var("ROLLUP_DENSITY_RATIO") {
            self.rollup_density_ratio = parse("ROLLUP_DENSITY_RATIO", &v)?;
        }
        if let Some(v) = var("ROLLUP_MAX_CELL_COUNT") {
            self.rollup_max_cell_count = parse("ROLLUP_MAX_CELL_COUNT", &v)?;
        }
        self.validate()
    }

    pub fn validate(&self) -> Result<()> {
        if self.sql_threads == 0 {
            return Err(CacheError::Config("sql_threads must be at least 1".into()));
        }
        if self.cache_io_threads == 0 {
            return Err(CacheError::Config("cache_io_threads must be at least 1".into()));
        }
        if self.mailbox_capacity == 0 {
            return Err(CacheError::Config("mailbox_capacity must be at least 1".into()));
        }
        if !(0.0..=1.0).contains(&self.rollup_density_ratio) {
            return Err(CacheError::Config(format!(
                "rollup_density_ratio {} outside [0, 1]",
                self.rollup_density_ratio
            )));
        }
        Ok(())
    }
}

fn parse<T: FromStr>(name: &str, value: &str) -> Result<T> {
    value.trim().parse().map_err(|_| {
        CacheError::Config(format!("invalid value '{}' for {}{}", value, ENV_PREFIX, name))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_are_valid() {
        let config = CacheConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.mailbox_capacity, 1000);
        assert!(config.sql_threads >= 1);
    }

    #[test]
    fn test_overrides() {
        let vars: HashMap<String, String> = [
            ("LUMA_SEGMENT_CACHE_SQL_THREADS", "3"),
            ("LUMA_SEGMENT_CACHE_DISABLE_CACHING", "true"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        let mut config = CacheConfig::default();
        config.apply_overrides(|k| vars.get(k).cloned()).unwrap();
        assert_eq!(config.sql_threads, 3);
        assert!(config.disable_caching);
    }

    #[test]
    fn test_bad_override_rejected() {
        let mut config = CacheConfig::default();
        let err = config.apply_overrides(|k| {
            (k == "LUMA_SEGMENT_CACHE_ROLLUP_DENSITY_RATIO").then(|| "2.5".to_string())
        });
        assert!(matches!(err, Err(CacheError::Config(_))));
    }
}
