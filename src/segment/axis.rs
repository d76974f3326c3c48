use super::datum::Datum;
use super::predicate::ColumnPredicate;
use std::collections::BTreeSet;
use std::sync::Arc;

static NULL_KEY: Datum = Datum::Null;

/// One dimension of a segment: sorted keys plus an optional null/other bucket.
///
/// Ordinals `0..keys.len()` address the explicit keys; when `has_null` is set
/// the null bucket takes ordinal `keys.len()`.
#[derive(Debug, Clone)]
pub struct SegmentAxis {
    predicate: ColumnPredicate,
    keys: Arc<[Datum]>,
    has_null: bool,
}

impl SegmentAxis {
    /// A null in `keys` folds into the null bucket.
    pub fn new(predicate: ColumnPredicate, mut keys: BTreeSet<Datum>, has_null: bool) -> Self {
        let had_null_key = keys.remove(&Datum::Null);
        Self {
            predicate,
            keys: keys.into_iter().collect::<Vec<_>>().into(),
            has_null: has_null || had_null_key,
        }
    }

    pub fn predicate(&self) -> &ColumnPredicate {
        &self.predicate
    }

    pub fn keys(&self) -> &[Datum] {
        &self.keys
    }

    pub fn has_null(&self) -> bool {
        self.has_null
    }

    /// Number of addressable ordinals, null bucket included.
    pub fn ordinal_count(&self) -> usize {
        self.keys.len() + usize::from(self.has_null)
    }

    pub fn offset_of(&self, key: &Datum) -> Option<usize> {
        if key.is_null() {
            return self.has_null.then_some(self.keys.len());
        }
        self.keys.binary_search(key).ok()
    }

    pub fn key_at(&self, ordinal: usize) -> Option<&Datum> {
        if ordinal < self.keys.len() {
            Some(&self.keys[ordinal])
        } else if self.has_null && ordinal == self.keys.len() {
            Some(&NULL_KEY)
        } else {
            None
        }
    }

    pub fn wants_value(&self, key: &Datum) -> bool {
        self.predicate.evaluate(key)
    }

    /// Axis restricted to the keys accepted by `keep`.
    pub fn restrict(&self, keep: impl Fn(&Datum) -> bool) -> SegmentAxis {
        let keys: BTreeSet<Datum> = self.keys.iter().filter(|k| keep(*k)).cloned().collect();
        let has_null = self.has_null && keep(&NULL_KEY);
        let predicate = match &self.predicate {
            ColumnPredicate::True => ColumnPredicate::True,
            ColumnPredicate::Values(values) => {
                ColumnPredicate::Values(values.iter().filter(|v| keep(*v)).cloned().collect())
            }
        };
        SegmentAxis::new(predicate, keys, has_null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn axis(keys: &[i64], has_null: bool) -> SegmentAxis {
        SegmentAxis::new(
            ColumnPredicate::True,
            keys.iter().map(|k| Datum::from(*k)).collect(),
            has_null,
        )
    }

    #[test]
    fn test_offsets_and_null_bucket() {
        let a = axis(&[30, 10, 20], true);
        assert_eq!(a.keys(), &[Datum::from(10), Datum::from(20), Datum::from(30)]);
        assert_eq!(a.offset_of(&Datum::from(20)), Some(1));
        assert_eq!(a.offset_of(&Datum::Null), Some(3));
        assert_eq!(a.ordinal_count(), 4);
        assert_eq!(a.key_at(3), Some(&Datum::Null));
        assert_eq!(a.key_at(4), None);
    }

    #[test]
    fn test_null_without_bucket_is_absent() {
        let a = axis(&[1, 2], false);
        assert_eq!(a.offset_of(&Datum::Null), None);
        assert_eq!(a.offset_of(&Datum::from(3)), None);
    }

    #[test]
    fn test_null_key_folds_into_flag() {
        let keys: BTreeSet<Datum> = vec![Datum::Null, Datum::from(1)].into_iter().collect();
        let a = SegmentAxis::new(ColumnPredicate::True, keys, false);
        assert!(a.has_null());
        assert_eq!(a.keys().len(), 1);
    }

    #[test]
    fn test_restrict() {
        let a = axis(&[1, 2, 3], true).restrict(|k| k != &Datum::from(2) && !k.is_null());
        assert_eq!(a.keys(), &[Datum::from(1), Datum::from(3)]);
        assert!(!a.has_null());
    }
}
