//! Star schema descriptors: the fact table, its constrainable columns and
//! the measures aggregated over it.

use crate::aggregator::Aggregator;
use crate::segment::{BitKey, FactKey};
use serde::{Deserialize, Serialize};

/// A column that segments can be constrained on.
///
/// `bit_position` is the column's slot in every constrained-column bit key
/// of the star.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StarColumn {
    pub bit_position: usize,
    pub name: String,
    pub expression: String,
}

impl StarColumn {
    pub fn new(bit_position: usize, name: impl Into<String>, expression: impl Into<String>) -> Self {
        Self {
            bit_position,
            name: name.into(),
            expression: expression.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StarMeasure {
    pub name: String,
    pub cube_name: String,
    pub aggregator: Aggregator,
}

impl StarMeasure {
    pub fn new(name: impl Into<String>, cube_name: impl Into<String>, aggregator: Aggregator) -> Self {
        Self {
            name: name.into(),
            cube_name: cube_name.into(),
            aggregator,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Star {
    pub schema_name: String,
    pub schema_checksum: String,
    pub fact_table: String,
    columns: Vec<StarColumn>,
}

impl Star {
    /// Columns are stored ordered by bit position.
    pub fn new(
        schema_name: impl Into<String>,
        schema_checksum: impl Into<String>,
        fact_table: impl Into<String>,
        mut columns: Vec<StarColumn>,
    ) -> Self {
        columns.sort_by_key(|c| c.bit_position);
        Self {
            schema_name: schema_name.into(),
            schema_checksum: schema_checksum.into(),
            fact_table: fact_table.into(),
            columns,
        }
    }

    pub fn columns(&self) -> &[StarColumn] {
        &self.columns
    }

    /// Length of this star's bit keys.
    pub fn column_count(&self) -> usize {
        self.columns
            .last()
            .map_or(0, |c| c.bit_position + 1)
    }

    pub fn column(&self, bit_position: usize) -> Option<&StarColumn> {
        self.columns.iter().find(|c| c.bit_position == bit_position)
    }

    pub fn column_by_expression(&self, expression: &str) -> Option<&StarColumn> {
        self.columns.iter().find(|c| c.expression == expression)
    }

    pub fn bitkey_of<'a>(&self, columns: impl IntoIterator<Item = &'a StarColumn>) -> BitKey {
        BitKey::from_positions(
            self.column_count(),
            columns.into_iter().map(|c| c.bit_position),
        )
    }

    /// Columns whose bits are set in `bitkey`, in bit order.
    pub fn columns_of(&self, bitkey: &BitKey) -> Vec<StarColumn> {
        bitkey
            .positions()
            .filter_map(|pos| self.column(pos).cloned())
            .collect()
    }

    pub fn fact_key(&self, measure: &StarMeasure) -> FactKey {
        FactKey {
            schema_name: self.schema_name.clone(),
            schema_checksum: self.schema_checksum.clone(),
            cube_name: measure.cube_name.clone(),
            measure_name: measure.name.clone(),
            fact_table: self.fact_table.clone(),
        }
    }

    /// True if headers with this identity belong to the star.
    pub fn owns(&self, fact: &FactKey) -> bool {
        fact.schema_name == self.schema_name
            && fact.schema_checksum == self.schema_checksum
            && fact.fact_table == self.fact_table
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_columns_sorted_and_bitkey() {
        let star = Star::new(
            "FoodMart",
            "v1",
            "sales_fact_1997",
            vec![
                StarColumn::new(3, "year", "time.year"),
                StarColumn::new(1, "state", "store.state"),
            ],
        );
        assert_eq!(star.columns()[0].expression, "store.state");
        assert_eq!(star.column_count(), 4);
        let key = star.bitkey_of(star.columns());
        assert_eq!(key.positions().collect::<Vec<_>>(), vec![1, 3]);
        assert_eq!(star.columns_of(&key).len(), 2);
    }
}
