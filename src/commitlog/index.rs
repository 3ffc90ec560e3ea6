use std::fmt;

/// Index is an index of an entry in the log; i.e. a log entry's index.
///
/// The log indexes entries starting from 1. Index 0 never holds an entry; it is the position
/// "before the first entry", which is where an empty log (or an empty snapshot) sits.
#[derive(Copy, Clone, Default, PartialOrd, PartialEq, Ord, Eq, Hash)]
pub struct Index(u64);

impl Index {
    pub const fn new(index: u64) -> Self {
        Index(index)
    }

    pub fn new_usize(index: usize) -> Self {
        Self::new(index as u64)
    }

    pub const fn zero() -> Self {
        Index(0)
    }

    pub const fn start_index() -> Self {
        Index(1)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    pub fn plus(&self, delta: u64) -> Index {
        Index(self.0 + delta)
    }

    /// Saturates at zero.
    pub fn minus(&self, delta: u64) -> Index {
        Index(self.0.saturating_sub(delta))
    }

    pub fn checked_minus(&self, delta: u64) -> Option<Index> {
        self.0.checked_sub(delta).map(Index)
    }

    /// Number of indexes in `(other, self]`, or 0 if `other >= self`.
    pub fn distance_from(&self, other: Index) -> u64 {
        self.0.saturating_sub(other.0)
    }
}

impl fmt::Debug for Index {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for Index {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
