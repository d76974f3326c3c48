use super::bitkey::BitKey;
use super::datum::Datum;
use super::header::FactKey;
use crate::star::{Star, StarColumn, StarMeasure};
use std::sync::Arc;

/// A single cell the query layer wants: one value per constrained column.
#[derive(Debug, Clone)]
pub struct CellRequest {
    star: Arc<Star>,
    measure: StarMeasure,
    columns: Vec<StarColumn>,
    values: Vec<Datum>,
    compound_predicates: Vec<String>,
}

impl CellRequest {
    pub fn new(star: Arc<Star>, measure: StarMeasure) -> Self {
        Self {
            star,
            measure,
            columns: Vec::new(),
            values: Vec::new(),
            compound_predicates: Vec::new(),
        }
    }

    /// Adds or replaces the constraint on `column`, keeping bit order.
    pub fn constrain(mut self, column: &StarColumn, value: impl Into<Datum>) -> Self {
        let value = value.into();
        match self
            .columns
            .binary_search_by_key(&column.bit_position, |c| c.bit_position)
        {
            Ok(i) => self.values[i] = value,
            Err(i) => {
                self.columns.insert(i, column.clone());
                self.values.insert(i, value);
            }
        }
        self
    }

    pub fn with_compound_predicate(mut self, signature: impl Into<String>) -> Self {
        self.compound_predicates.push(signature.into());
        self
    }

    pub fn star(&self) -> &Arc<Star> {
        &self.star
    }

    pub fn measure(&self) -> &StarMeasure {
        &self.measure
    }

    pub fn columns(&self) -> &[StarColumn] {
        &self.columns
    }

    pub fn values(&self) -> &[Datum] {
        &self.values
    }

    pub fn compound_predicates(&self) -> &[String] {
        &self.compound_predicates
    }

    pub fn bitkey(&self) -> BitKey {
        self.star.bitkey_of(&self.columns)
    }

    pub fn fact_key(&self) -> FactKey {
        self.star.fact_key(&self.measure)
    }

    /// (column expression, value) pairs in bit order.
    pub fn coordinates(&self) -> Vec<(String, Datum)> {
        self.columns
            .iter()
            .zip(&self.values)
            .map(|(c, v)| (c.expression.clone(), v.clone()))
            .collect()
    }
}
