//! Segment cache index
//!
//! Which headers exist for a schema, whether their bodies are still loading,
//! and the region queries used by peek, flush and rollup planning. Only the
//! cache actor mutates an index.

use super::future::SegmentFuture;
use crate::execution::{Execution, Locus};
use crate::segment::{BitKey, Datum, FactKey, SegmentBody, SegmentColumn, SegmentConverter, SegmentHeader};
use crate::CacheError;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt::{self, Write};
use std::sync::Arc;

enum EntryState {
    Pending {
        future: SegmentFuture,
        clients: Vec<Arc<Execution>>,
    },
    Ready,
}

struct IndexEntry {
    converter: SegmentConverter,
    state: EntryState,
}

type ShapeKey = (FactKey, BitKey);

pub struct SegmentCacheIndex {
    schema_name: String,
    schema_checksum: String,
    entries: HashMap<SegmentHeader, IndexEntry>,
    /// Headers grouped by identity and constrained-column mask.
    shapes: HashMap<ShapeKey, Vec<SegmentHeader>>,
}

impl SegmentCacheIndex {
    pub fn new(schema_name: impl Into<String>, schema_checksum: impl Into<String>) -> Self {
        Self {
            schema_name: schema_name.into(),
            schema_checksum: schema_checksum.into(),
            entries: HashMap::new(),
            shapes: HashMap::new(),
        }
    }

    pub fn schema_name(&self) -> &str {
        &self.schema_name
    }

    pub fn schema_checksum(&self) -> &str {
        &self.schema_checksum
    }

    fn shape_of(header: &SegmentHeader) -> ShapeKey {
        (header.fact().clone(), header.constrained_columns_bitkey().clone())
    }

    /// Registers `header`. A pending entry gets a fresh future whose first
    /// client is the current execution, if any.
    ///
    /// Returns false if the header was already indexed; a pending entry is
    /// left pending since its body is on the way.
    pub fn add(&mut self, header: SegmentHeader, converter: SegmentConverter, is_pending: bool) -> bool {
        if self.entries.contains_key(&header) {
            return false;
        }
        let state = if is_pending {
            EntryState::Pending {
                future: SegmentFuture::new(),
                clients: Locus::current_execution()
                    .filter(|e| !e.is_cancelled())
                    .into_iter()
                    .collect(),
            }
        } else {
            EntryState::Ready
        };
        self.shapes
            .entry(Self::shape_of(&header))
            .or_default()
            .push(header.clone());
        self.entries.insert(header, IndexEntry { converter, state });
        true
    }

    fn detach(&mut self, header: &SegmentHeader) -> Option<IndexEntry> {
        let entry = self.entries.remove(header)?;
        let shape = Self::shape_of(header);
        if let Some(headers) = self.shapes.get_mut(&shape) {
            headers.retain(|h| h != header);
            if headers.is_empty() {
                self.shapes.remove(&shape);
            }
        }
        Some(entry)
    }

    /// Removing a pending entry cancels its future so waiters don't hang on
    /// a load whose result will be discarded.
    pub fn remove(&mut self, header: &SegmentHeader) -> bool {
        match self.detach(header) {
            Some(IndexEntry {
                state: EntryState::Pending { future, .. },
                ..
            }) => {
                future.cancel();
                true
            }
            Some(_) => true,
            None => false,
        }
    }

    /// Replaces `old` by `new`, keeping converter and load state.
    pub fn update(&mut self, old: &SegmentHeader, new: SegmentHeader) -> bool {
        if old == &new || self.entries.contains_key(&new) {
            return false;
        }
        let Some(entry) = self.detach(old) else {
            return false;
        };
        self.shapes
            .entry(Self::shape_of(&new))
            .or_default()
            .push(new.clone());
        self.entries.insert(new, entry);
        true
    }

    pub fn contains(&self, header: &SegmentHeader) -> bool {
        self.entries.contains_key(header)
    }

    pub fn is_pending(&self, header: &SegmentHeader) -> bool {
        matches!(
            self.entries.get(header).map(|e| &e.state),
            Some(EntryState::Pending { .. })
        )
    }

    pub fn converter(&self, header: &SegmentHeader) -> Option<SegmentConverter> {
        self.entries.get(header).map(|e| e.converter.clone())
    }

    pub fn header_count(&self) -> usize {
        self.entries.len()
    }

    /// All headers, ordered by their printed form.
    pub fn headers(&self) -> Vec<SegmentHeader> {
        let mut headers: Vec<SegmentHeader> = self.entries.keys().cloned().collect();
        headers.sort_by_cached_key(|h| h.to_string());
        headers
    }

    /// Headers of exactly this shape containing the cell at `values` (one
    /// value per constrained column, in bit order).
    pub fn locate(
        &self,
        fact: &FactKey,
        bitkey: &BitKey,
        values: &[Datum],
        compound_predicates: &[String],
    ) -> Vec<SegmentHeader> {
        let Some(headers) = self.shapes.get(&(fact.clone(), bitkey.clone())) else {
            return Vec::new();
        };
        headers
            .iter()
            .filter(|h| h.compound_predicates() == compound_predicates)
            .filter(|h| h.arity() == values.len())
            .filter(|h| {
                h.constrained_columns()
                    .iter()
                    .zip(values)
                    .all(|(c, v)| c.contains(v) && !h.is_excluded(c.expression(), v))
            })
            .cloned()
            .collect()
    }

    /// Headers of `fact_table` (optionally one measure) that may hold cells
    /// inside `region`. A column the header does not constrain always
    /// overlaps; an empty region overlaps everything.
    pub fn intersect_region(
        &self,
        fact_table: &str,
        measure: Option<&str>,
        region: &[SegmentColumn],
    ) -> Vec<SegmentHeader> {
        let mut found: Vec<SegmentHeader> = self
            .entries
            .keys()
            .filter(|h| h.fact_table() == fact_table)
            .filter(|h| measure.map_or(true, |m| h.measure_name() == m))
            .filter(|h| {
                region.iter().all(|r| match h.constrained_column(r.expression()) {
                    None => true,
                    Some(column) => column.intersects(r) && !fully_excluded(h, r),
                })
            })
            .cloned()
            .collect();
        found.sort_by_cached_key(|h| h.to_string());
        found
    }

    /// Future of a pending header; `execution` is recorded as a client
    /// unless it has been cancelled.
    pub fn get_future(
        &mut self,
        execution: Option<&Arc<Execution>>,
        header: &SegmentHeader,
    ) -> Option<SegmentFuture> {
        match self.entries.get_mut(header).map(|e| &mut e.state) {
            Some(EntryState::Pending { future, clients }) => {
                if let Some(execution) = execution.filter(|e| !e.is_cancelled()) {
                    if !clients.iter().any(|c| c.id() == execution.id()) {
                        clients.push(execution.clone());
                    }
                }
                Some(future.clone())
            }
            _ => None,
        }
    }

    /// Detaches `execution` from every pending load. Loads left without a
    /// client are cancelled and dropped; their headers are returned.
    pub fn cancel(&mut self, execution: &Execution) -> Vec<SegmentHeader> {
        let mut orphaned = Vec::new();
        for (header, entry) in self.entries.iter_mut() {
            if let EntryState::Pending { clients, .. } = &mut entry.state {
                let before = clients.len();
                clients.retain(|c| c.id() != execution.id());
                if before != clients.len() && clients.is_empty() {
                    orphaned.push(header.clone());
                }
            }
        }
        for header in &orphaned {
            self.remove(header);
        }
        orphaned
    }

    /// Completes a pending load. False if the header is no longer indexed.
    pub fn load_succeeded(&mut self, header: &SegmentHeader, body: Arc<SegmentBody>) -> bool {
        let Some(entry) = self.entries.get_mut(header) else {
            return false;
        };
        if let EntryState::Pending { future, .. } = &entry.state {
            future.set(body);
        }
        entry.state = EntryState::Ready;
        true
    }

    /// Fails a pending load and forgets the header.
    pub fn load_failed(&mut self, header: &SegmentHeader, err: CacheError) -> bool {
        match self.detach(header) {
            Some(IndexEntry {
                state: EntryState::Pending { future, .. },
                ..
            }) => {
                future.fail(err);
                true
            }
            Some(_) => true,
            None => false,
        }
    }

    /// Groups of ready headers that can be rolled up to answer the cell at
    /// `coordinates` (expression, value) whose mask is `bitkey`.
    ///
    /// A header with wildcard rolled-away columns answers alone. A header
    /// with one explicitly constrained rolled-away column joins a group;
    /// groups whose pairwise-disjoint values cover the column's cardinality
    /// are returned as well.
    pub fn find_rollup_candidates(
        &self,
        fact: &FactKey,
        bitkey: &BitKey,
        coordinates: &[(String, Datum)],
        compound_predicates: &[String],
    ) -> Vec<Vec<SegmentHeader>> {
        let mut singles: Vec<SegmentHeader> = Vec::new();
        // (mask, rolled-away column, kept columns) -> headers
        let mut partial: BTreeMap<(String, String, String), Vec<SegmentHeader>> = BTreeMap::new();

        for (header, entry) in &self.entries {
            if !matches!(entry.state, EntryState::Ready)
                || header.fact() != fact
                || header.compound_predicates() != compound_predicates
            {
                continue;
            }
            let mask = header.constrained_columns_bitkey();
            if !mask.is_superset_of(bitkey) || mask.cardinality() <= bitkey.cardinality() {
                continue;
            }
            let kept_ok = coordinates.iter().all(|(expr, value)| {
                header
                    .constrained_column(expr)
                    .map_or(false, |c| c.contains(value) && !header.is_excluded(expr, value))
            });
            if !kept_ok {
                continue;
            }
            let rolled: Vec<&SegmentColumn> = header
                .constrained_columns()
                .iter()
                .filter(|c| !coordinates.iter().any(|(expr, _)| expr == c.expression()))
                .collect();
            if rolled.iter().any(|c| header.excluded_region(c.expression()).is_some()) {
                continue;
            }
            if rolled.iter().all(|c| c.is_wildcard()) {
                singles.push(header.clone());
            } else if let [column] = rolled.as_slice() {
                if column.value_count().is_some() {
                    partial
                        .entry((
                            format!("{:?}", mask),
                            column.expression().to_string(),
                            kept_signature(header, coordinates),
                        ))
                        .or_default()
                        .push(header.clone());
                }
            }
        }

        singles.sort_by_cached_key(|h| (h.arity(), h.to_string()));
        let mut candidates: Vec<Vec<SegmentHeader>> = singles.into_iter().map(|h| vec![h]).collect();

        for ((_, expression, _), mut group) in partial {
            group.sort_by_cached_key(|h| h.to_string());
            let target = group
                .iter()
                .filter_map(|h| h.constrained_column(&expression).and_then(SegmentColumn::value_count))
                .max()
                .unwrap_or(0);
            let mut covered: BTreeSet<Datum> = BTreeSet::new();
            let mut chosen = Vec::new();
            for header in group {
                let Some(values) = header.constrained_column(&expression).and_then(SegmentColumn::values) else {
                    continue;
                };
                if values.iter().any(|v| covered.contains(v)) {
                    continue;
                }
                covered.extend(values.iter().cloned());
                chosen.push(header);
            }
            if !chosen.is_empty() && covered.len() as u64 >= target {
                candidates.push(chosen);
            }
        }
        candidates
    }

    pub fn print_cache_state(&self, out: &mut dyn Write) -> fmt::Result {
        writeln!(
            out,
            "SegmentCacheIndex[{}, checksum={}]: {} headers",
            self.schema_name,
            self.schema_checksum,
            self.entries.len()
        )?;
        for header in self.headers() {
            let state = match self.entries.get(&header).map(|e| &e.state) {
                Some(EntryState::Pending { clients, .. }) => format!("pending({} clients)", clients.len()),
                _ => "ready".to_string(),
            };
            let columns: Vec<String> = header
                .constrained_columns()
                .iter()
                .map(ToString::to_string)
                .collect();
            write!(
                out,
                "  {} {}.{} [{}]",
                state,
                header.cube_name(),
                header.measure_name(),
                columns.join(", ")
            )?;
            if !header.excluded_regions().is_empty() {
                let excluded: Vec<String> = header
                    .excluded_regions()
                    .iter()
                    .map(ToString::to_string)
                    .collect();
                write!(out, " excluding [{}]", excluded.join(", "))?;
            }
            writeln!(out)?;
        }
        Ok(())
    }
}

/// Constraints and exclusions of the columns a rollup keeps. Headers only
/// combine when these agree, since the merged body can hold one value set.
fn kept_signature(header: &SegmentHeader, coordinates: &[(String, Datum)]) -> String {
    let kept: Vec<String> = header
        .constrained_columns()
        .iter()
        .filter(|c| coordinates.iter().any(|(expr, _)| expr == c.expression()))
        .map(|c| match header.excluded_region(c.expression()) {
            Some(excluded) => format!("{} excluding {}", c, excluded),
            None => c.to_string(),
        })
        .collect();
    kept.join(", ")
}

/// True if every value of `region` is already carved out of `header`.
fn fully_excluded(header: &SegmentHeader, region: &SegmentColumn) -> bool {
    match (header.excluded_region(region.expression()), region.values()) {
        (Some(excluded), Some(values)) => values.iter().all(|v| excluded.contains(v)),
        (Some(excluded), None) => excluded.is_wildcard(),
        (None, _) => false,
    }
}

/// One index per (schema name, schema checksum), created on first use.
#[derive(Default)]
pub struct SegmentCacheIndexRegistry {
    indexes: DashMap<(String, String), Arc<Mutex<SegmentCacheIndex>>>,
}

impl SegmentCacheIndexRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_create(&self, schema_name: &str, schema_checksum: &str) -> Arc<Mutex<SegmentCacheIndex>> {
        self.indexes
            .entry((schema_name.to_string(), schema_checksum.to_string()))
            .or_insert_with(|| Arc::new(Mutex::new(SegmentCacheIndex::new(schema_name, schema_checksum))))
            .value()
            .clone()
    }

    pub fn get(&self, schema_name: &str, schema_checksum: &str) -> Option<Arc<Mutex<SegmentCacheIndex>>> {
        self.indexes
            .get(&(schema_name.to_string(), schema_checksum.to_string()))
            .map(|entry| entry.value().clone())
    }

    pub fn for_header(&self, header: &SegmentHeader) -> Arc<Mutex<SegmentCacheIndex>> {
        self.get_or_create(header.schema_name(), header.schema_checksum())
    }

    pub fn indexes(&self) -> Vec<Arc<Mutex<SegmentCacheIndex>>> {
        let mut all: Vec<_> = self
            .indexes
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        all.into_iter().map(|(_, index)| index).collect()
    }

    pub fn len(&self) -> usize {
        self.indexes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indexes.is_empty()
    }

    pub fn header_count(&self) -> usize {
        self.indexes().iter().map(|i| i.lock().header_count()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::Aggregator;
    use crate::segment::CellStorage;
    use crate::star::{Star, StarColumn, StarMeasure};

    fn converter() -> SegmentConverter {
        let star = Arc::new(Star::new(
            "FoodMart",
            "v1",
            "sales",
            vec![StarColumn::new(0, "state", "store.state")],
        ));
        SegmentConverter::new(star, StarMeasure::new("Unit Sales", "Sales", Aggregator::Sum))
    }

    fn header(states: Option<&[&str]>) -> SegmentHeader {
        let c = converter();
        let column = match states {
            None => SegmentColumn::wildcard("store.state"),
            Some(s) => SegmentColumn::of_values("store.state", s.iter().copied()),
        };
        SegmentHeader::new(
            c.star().fact_key(c.measure()),
            BitKey::from_positions(1, [0]),
            vec![column],
            vec![],
        )
    }

    fn body() -> Arc<SegmentBody> {
        Arc::new(SegmentBody::new(vec![], vec![], CellStorage::Sparse(Default::default())).unwrap())
    }

    #[test]
    fn test_locate_respects_values_and_exclusions() {
        let mut index = SegmentCacheIndex::new("FoodMart", "v1");
        let explicit = header(Some(&["CA", "OR"]));
        let wildcard = header(None).constrain(&[SegmentColumn::of_values("store.state", ["WA"])]);
        index.add(explicit.clone(), converter(), false);
        index.add(wildcard.clone(), converter(), false);
        let fact = explicit.fact().clone();
        let key = BitKey::from_positions(1, [0]);

        let hits = index.locate(&fact, &key, &[Datum::from("CA")], &[]);
        assert_eq!(hits.len(), 2);
        let hits = index.locate(&fact, &key, &[Datum::from("WA")], &[]);
        assert!(hits.is_empty());
        let hits = index.locate(&fact, &key, &[Datum::from("TX")], &[]);
        assert_eq!(hits, vec![wildcard]);
    }

    #[test]
    fn test_pending_lifecycle() {
        let mut index = SegmentCacheIndex::new("FoodMart", "v1");
        let h = header(None);
        assert!(index.add(h.clone(), converter(), true));
        assert!(!index.add(h.clone(), converter(), false));
        assert!(index.is_pending(&h));
        let future = index.get_future(None, &h).expect("pending");
        assert!(index.load_succeeded(&h, body()));
        assert!(future.is_done());
        assert!(!index.is_pending(&h));
        assert!(index.get_future(None, &h).is_none());
    }

    #[test]
    fn test_load_after_remove_is_noop() {
        let mut index = SegmentCacheIndex::new("FoodMart", "v1");
        let h = header(None);
        index.add(h.clone(), converter(), true);
        let future = index.get_future(None, &h).unwrap();
        assert!(index.remove(&h));
        assert_eq!(future.wait().unwrap_err(), CacheError::Cancelled);
        assert!(!index.load_succeeded(&h, body()));
        assert!(!index.load_failed(&h, CacheError::LoadFailed("x".into())));
    }

    #[test]
    fn test_cancel_drops_orphaned_loads() {
        let mut index = SegmentCacheIndex::new("FoodMart", "v1");
        let a = Execution::new();
        let b = Execution::new();
        let shared = header(Some(&["CA"]));
        let own = header(Some(&["OR"]));
        Locus::execute(Locus::new(a.clone(), "test"), || {
            index.add(shared.clone(), converter(), true);
            index.add(own.clone(), converter(), true);
        });
        index.get_future(Some(&b), &shared);

        let dropped = index.cancel(&a);
        assert_eq!(dropped, vec![own.clone()]);
        assert!(index.contains(&shared));
        assert!(!index.contains(&own));
    }

    #[test]
    fn test_cancelled_execution_is_not_a_client() {
        let mut index = SegmentCacheIndex::new("FoodMart", "v1");
        let h = header(None);
        let gone = Execution::new();
        gone.cancel();
        Locus::execute(Locus::new(gone.clone(), "test"), || {
            index.add(h.clone(), converter(), true);
        });
        assert!(index.get_future(Some(&gone), &h).is_some());
        let mut out = String::new();
        index.print_cache_state(&mut out).unwrap();
        assert!(out.contains("pending(0 clients)"));
        assert!(index.cancel(&gone).is_empty());
        assert!(index.contains(&h));
    }

    #[test]
    fn test_update_swaps_header() {
        let mut index = SegmentCacheIndex::new("FoodMart", "v1");
        let old = header(None);
        let new = old.constrain(&[SegmentColumn::of_values("store.state", ["CA"])]);
        index.add(old.clone(), converter(), false);
        assert!(index.update(&old, new.clone()));
        assert!(!index.contains(&old));
        assert!(index.contains(&new));
        assert_eq!(index.header_count(), 1);
    }

    #[test]
    fn test_registry_get_or_create() {
        let registry = SegmentCacheIndexRegistry::new();
        let a = registry.get_or_create("FoodMart", "v1");
        let b = registry.get_or_create("FoodMart", "v1");
        assert!(Arc::ptr_eq(&a, &b));
        registry.get_or_create("FoodMart", "v2");
        assert_eq!(registry.len(), 2);
        assert!(registry.get("Other", "v1").is_none());
    }

    fn two_column_header(state: &str, years: Option<&[i64]>) -> SegmentHeader {
        let c = converter();
        let year = match years {
            None => SegmentColumn::wildcard("time.year"),
            Some(y) => SegmentColumn::of_values("time.year", y.iter().copied()),
        };
        SegmentHeader::new(
            c.star().fact_key(c.measure()),
            BitKey::from_positions(2, [0, 1]),
            vec![
                SegmentColumn::of_values("store.state", [state]).with_value_count(2),
                year,
            ],
            vec![],
        )
    }

    #[test]
    fn test_rollup_group_needs_matching_kept_columns() {
        let mut index = SegmentCacheIndex::new("FoodMart", "v1");
        let ca = two_column_header("CA", None);
        let or_1997 = two_column_header("OR", Some(&[1997]));
        index.add(ca.clone(), converter(), false);
        index.add(or_1997, converter(), false);
        let fact = ca.fact().clone();
        let key = BitKey::from_positions(2, [1]);
        let at = vec![("time.year".to_string(), Datum::from(1997i64))];

        assert!(index.find_rollup_candidates(&fact, &key, &at, &[]).is_empty());

        let or_all = two_column_header("OR", None);
        index.add(or_all.clone(), converter(), false);
        let groups = index.find_rollup_candidates(&fact, &key, &at, &[]);
        assert_eq!(groups.len(), 1);
        let mut expected = vec![ca, or_all];
        expected.sort_by_cached_key(|h| h.to_string());
        assert_eq!(groups[0], expected);
    }

    #[test]
    fn test_print_cache_state() {
        let mut index = SegmentCacheIndex::new("FoodMart", "v1");
        index.add(header(Some(&["CA"])), converter(), true);
        let mut out = String::new();
        index.print_cache_state(&mut out).unwrap();
        assert!(out.contains("1 headers"));
        assert!(out.contains("pending(0 clients) Sales.Unit Sales [store.state={CA}]"));
    }
}
