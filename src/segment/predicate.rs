use super::datum::Datum;
use std::collections::BTreeSet;

/// Constraint on one star column.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ColumnPredicate {
    /// Every value, including null.
    True,
    /// An explicit value list.
    Values(BTreeSet<Datum>),
}

impl ColumnPredicate {
    pub fn values_of<I, D>(values: I) -> Self
    where
        I: IntoIterator<Item = D>,
        D: Into<Datum>,
    {
        ColumnPredicate::Values(values.into_iter().map(Into::into).collect())
    }

    pub fn evaluate(&self, value: &Datum) -> bool {
        match self {
            ColumnPredicate::True => true,
            ColumnPredicate::Values(values) => values.contains(value),
        }
    }

    pub fn is_wildcard(&self) -> bool {
        matches!(self, ColumnPredicate::True)
    }

    /// Explicit values, or `None` for a wildcard.
    pub fn values(&self) -> Option<&BTreeSet<Datum>> {
        match self {
            ColumnPredicate::True => None,
            ColumnPredicate::Values(values) => Some(values),
        }
    }

    pub fn from_values(values: Option<&BTreeSet<Datum>>) -> Self {
        match values {
            None => ColumnPredicate::True,
            Some(values) => ColumnPredicate::Values(values.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_evaluate() {
        let p = ColumnPredicate::values_of(["CA", "OR"]);
        assert!(p.evaluate(&Datum::from("CA")));
        assert!(!p.evaluate(&Datum::from("WA")));
        assert!(!p.evaluate(&Datum::Null));
        assert!(ColumnPredicate::True.evaluate(&Datum::Null));
    }
}
