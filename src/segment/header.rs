use super::bitkey::BitKey;
use super::datum::Datum;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::hash::{Hash, Hasher};

/// Constraint recorded in a header for one column.
///
/// `values == None` is a wildcard. `value_count` is the column's cardinality
/// in the database when known; it does not take part in equality.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentColumn {
    expression: String,
    values: Option<BTreeSet<Datum>>,
    value_count: Option<u64>,
}

impl SegmentColumn {
    pub fn new(expression: impl Into<String>, values: Option<BTreeSet<Datum>>) -> Self {
        Self {
            expression: expression.into(),
            values,
            value_count: None,
        }
    }

    pub fn wildcard(expression: impl Into<String>) -> Self {
        Self::new(expression, None)
    }

    pub fn of_values<I, D>(expression: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = D>,
        D: Into<Datum>,
    {
        Self::new(expression, Some(values.into_iter().map(Into::into).collect()))
    }

    pub fn with_value_count(mut self, value_count: u64) -> Self {
        self.value_count = Some(value_count);
        self
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    pub fn values(&self) -> Option<&BTreeSet<Datum>> {
        self.values.as_ref()
    }

    pub fn value_count(&self) -> Option<u64> {
        self.value_count
    }

    pub fn is_wildcard(&self) -> bool {
        self.values.is_none()
    }

    pub fn contains(&self, value: &Datum) -> bool {
        match &self.values {
            None => true,
            Some(values) => values.contains(value),
        }
    }

    pub fn intersects(&self, other: &SegmentColumn) -> bool {
        match (&self.values, &other.values) {
            (None, _) | (_, None) => true,
            (Some(a), Some(b)) => a.intersection(b).next().is_some(),
        }
    }

    /// Union of both constraints; a wildcard absorbs everything.
    pub fn merge(&self, other: &SegmentColumn) -> SegmentColumn {
        let values = match (&self.values, &other.values) {
            (Some(a), Some(b)) => Some(a.union(b).cloned().collect()),
            _ => None,
        };
        SegmentColumn {
            expression: self.expression.clone(),
            values,
            value_count: self.value_count.or(other.value_count),
        }
    }
}

impl PartialEq for SegmentColumn {
    fn eq(&self, other: &Self) -> bool {
        self.expression == other.expression && self.values == other.values
    }
}

impl Eq for SegmentColumn {}

impl Hash for SegmentColumn {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.expression.hash(state);
        self.values.hash(state);
    }
}

impl fmt::Display for SegmentColumn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.values {
            None => write!(f, "{}=*", self.expression),
            Some(values) => {
                write!(f, "{}={{", self.expression)?;
                for (i, v) in values.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", v)?;
                }
                write!(f, "}}")
            }
        }
    }
}

/// Schema, cube, measure and fact table a segment belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FactKey {
    pub schema_name: String,
    pub schema_checksum: String,
    pub cube_name: String,
    pub measure_name: String,
    pub fact_table: String,
}

/// Identity and shape of a segment; the cache key everywhere.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SegmentHeader {
    fact: FactKey,
    constrained_cols_bitkey: BitKey,
    constrained_columns: Vec<SegmentColumn>,
    compound_predicates: Vec<String>,
    /// Sorted by column expression, one entry per column.
    excluded_regions: Vec<SegmentColumn>,
}

impl SegmentHeader {
    /// `constrained_columns` must be in bit-position order of `bitkey`.
    pub fn new(
        fact: FactKey,
        bitkey: BitKey,
        constrained_columns: Vec<SegmentColumn>,
        compound_predicates: Vec<String>,
    ) -> Self {
        Self {
            fact,
            constrained_cols_bitkey: bitkey,
            constrained_columns,
            compound_predicates,
            excluded_regions: Vec::new(),
        }
    }

    pub fn with_excluded_regions(mut self, regions: Vec<SegmentColumn>) -> Self {
        let mut by_expr: BTreeMap<String, SegmentColumn> = BTreeMap::new();
        for region in regions {
            merge_region(&mut by_expr, region);
        }
        self.excluded_regions = by_expr.into_values().collect();
        self
    }

    pub fn fact(&self) -> &FactKey {
        &self.fact
    }

    pub fn schema_name(&self) -> &str {
        &self.fact.schema_name
    }

    pub fn schema_checksum(&self) -> &str {
        &self.fact.schema_checksum
    }

    pub fn cube_name(&self) -> &str {
        &self.fact.cube_name
    }

    pub fn measure_name(&self) -> &str {
        &self.fact.measure_name
    }

    pub fn fact_table(&self) -> &str {
        &self.fact.fact_table
    }

    pub fn constrained_columns_bitkey(&self) -> &BitKey {
        &self.constrained_cols_bitkey
    }

    pub fn constrained_columns(&self) -> &[SegmentColumn] {
        &self.constrained_columns
    }

    pub fn constrained_column(&self, expression: &str) -> Option<&SegmentColumn> {
        self.constrained_columns
            .iter()
            .find(|c| c.expression == expression)
    }

    pub fn column_index(&self, expression: &str) -> Option<usize> {
        self.constrained_columns
            .iter()
            .position(|c| c.expression == expression)
    }

    pub fn compound_predicates(&self) -> &[String] {
        &self.compound_predicates
    }

    pub fn excluded_regions(&self) -> &[SegmentColumn] {
        &self.excluded_regions
    }

    pub fn excluded_region(&self, expression: &str) -> Option<&SegmentColumn> {
        self.excluded_regions
            .iter()
            .find(|c| c.expression == expression)
    }

    pub fn arity(&self) -> usize {
        self.constrained_columns.len()
    }

    /// True if `value` of column `expression` was carved out by a flush.
    pub fn is_excluded(&self, expression: &str, value: &Datum) -> bool {
        self.excluded_region(expression)
            .map_or(false, |region| region.contains(value))
    }

    /// Header with one more excluded sub-region.
    ///
    /// Regions are merged per column, so the excluded space is the union of
    /// axis-aligned slabs. For a region spanning several columns this is not
    /// the N-dimensional complement; callers only constrain with
    /// single-column regions or single-column headers.
    pub fn constrain(&self, region: &[SegmentColumn]) -> SegmentHeader {
        let mut by_expr: BTreeMap<String, SegmentColumn> = self
            .excluded_regions
            .iter()
            .map(|c| (c.expression.clone(), c.clone()))
            .collect();
        for column in region {
            merge_region(&mut by_expr, column.clone());
        }
        SegmentHeader {
            excluded_regions: by_expr.into_values().collect(),
            ..self.clone()
        }
    }

    /// Stable identifier for external stores, SHA-256 over the header fields.
    pub fn unique_id(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.to_string().as_bytes());
        hex::encode(hasher.finalize())
    }
}

fn merge_region(by_expr: &mut BTreeMap<String, SegmentColumn>, region: SegmentColumn) {
    match by_expr.get(&region.expression) {
        Some(existing) => {
            let merged = existing.merge(&region);
            by_expr.insert(region.expression.clone(), merged);
        }
        None => {
            by_expr.insert(region.expression.clone(), region);
        }
    }
}

impl fmt::Display for SegmentHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "*Segment Header\nSchema:[{}]\nChecksum:[{}]\nCube:[{}]\nMeasure:[{}]\nFact:[{}]\nAxes:[",
            self.fact.schema_name,
            self.fact.schema_checksum,
            self.fact.cube_name,
            self.fact.measure_name,
            self.fact.fact_table
        )?;
        for (i, c) in self.constrained_columns.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", c)?;
        }
        write!(f, "]\nExcluded Regions:[")?;
        for (i, c) in self.excluded_regions.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", c)?;
        }
        write!(f, "]\nCompound Predicates:[{}]", self.compound_predicates.join(", "))?;
        write!(f, "\nID:[{:?}]", self.constrained_cols_bitkey)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fact() -> FactKey {
        FactKey {
            schema_name: "FoodMart".into(),
            schema_checksum: "abc".into(),
            cube_name: "Sales".into(),
            measure_name: "Unit Sales".into(),
            fact_table: "sales_fact_1997".into(),
        }
    }

    fn header() -> SegmentHeader {
        SegmentHeader::new(
            fact(),
            BitKey::from_positions(8, [1, 4]),
            vec![
                SegmentColumn::of_values("store.state", ["CA", "OR", "WA"]),
                SegmentColumn::wildcard("time.year"),
            ],
            vec![],
        )
    }

    #[test]
    fn test_equality_covers_excluded_regions() {
        let h = header();
        assert_eq!(h, header());
        let narrowed = h.constrain(&[SegmentColumn::of_values("store.state", ["CA"])]);
        assert_ne!(h, narrowed);
        assert_ne!(h.unique_id(), narrowed.unique_id());
    }

    #[test]
    fn test_constrain_merges_per_column() {
        let h = header()
            .constrain(&[SegmentColumn::of_values("store.state", ["CA"])])
            .constrain(&[SegmentColumn::of_values("store.state", ["OR"])]);
        assert_eq!(h.excluded_regions().len(), 1);
        assert!(h.is_excluded("store.state", &Datum::from("CA")));
        assert!(h.is_excluded("store.state", &Datum::from("OR")));
        assert!(!h.is_excluded("store.state", &Datum::from("WA")));
        assert!(!h.is_excluded("time.year", &Datum::from(1997)));
    }

    #[test]
    fn test_value_count_not_part_of_identity() {
        let a = SegmentColumn::wildcard("x").with_value_count(3);
        assert_eq!(a, SegmentColumn::wildcard("x"));
    }
}
