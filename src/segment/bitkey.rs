use roaring::RoaringBitmap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};

/// Fixed-length bit set keyed by column bit position.
///
/// Used for constrained-column masks on headers and requests and for the
/// grouping bit keys of a batched GROUP BY.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct BitKey {
    bits: RoaringBitmap,
    len: u32,
}

impl BitKey {
    pub fn new(len: usize) -> Self {
        Self {
            bits: RoaringBitmap::new(),
            len: len as u32,
        }
    }

    pub fn from_positions(len: usize, positions: impl IntoIterator<Item = usize>) -> Self {
        let mut key = Self::new(len);
        for pos in positions {
            key.set(pos);
        }
        key
    }

    /// Grows the key if `pos` lies past its end.
    pub fn set(&mut self, pos: usize) {
        if pos as u32 >= self.len {
            self.len = pos as u32 + 1;
        }
        self.bits.insert(pos as u32);
    }

    pub fn clear(&mut self, pos: usize) {
        self.bits.remove(pos as u32);
    }

    pub fn get(&self, pos: usize) -> bool {
        self.bits.contains(pos as u32)
    }

    pub fn len(&self) -> usize {
        self.len as usize
    }

    pub fn cardinality(&self) -> usize {
        self.bits.len() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.bits.is_empty()
    }

    /// Set positions in ascending order.
    pub fn positions(&self) -> impl Iterator<Item = usize> + '_ {
        self.bits.iter().map(|p| p as usize)
    }

    pub fn is_superset_of(&self, other: &BitKey) -> bool {
        other.bits.is_subset(&self.bits)
    }

    pub fn and_not(&self, other: &BitKey) -> BitKey {
        BitKey {
            bits: &self.bits - &other.bits,
            len: self.len.max(other.len),
        }
    }
}

// Equality ignores the declared length; two masks over the same columns are
// the same key regardless of how many columns the star has.
impl PartialEq for BitKey {
    fn eq(&self, other: &Self) -> bool {
        self.bits == other.bits
    }
}

impl Eq for BitKey {}

impl Hash for BitKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for pos in self.bits.iter() {
            pos.hash(state);
        }
    }
}

impl fmt::Debug for BitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, pos) in self.bits.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", pos)?;
        }
        write!(f, "}}")
    }
}

impl fmt::Display for BitKey {
    /// Renders bit 0 first, e.g. `0b101` style without the prefix.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for pos in 0..self.len {
            write!(f, "{}", if self.bits.contains(pos) { '1' } else { '0' })?;
        }
        Ok(())
    }
}
