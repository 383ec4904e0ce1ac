//! Ring ranges over the 32-bit hash space.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of positions on the ring.
pub const RING_SIZE: u64 = 1 << 32;

/// A half-open arc `(start, end]` of the ring.
///
/// When `start >= end` the arc wraps through zero. `start == end` covers
/// the whole ring, which is what a lone member owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RingRange {
    start: u32,
    end: u32,
}

impl RingRange {
    /// Creates the arc `(start, end]`.
    #[must_use]
    pub const fn new(start: u32, end: u32) -> Self {
        Self { start, end }
    }

    /// Creates an arc covering the whole ring.
    #[must_use]
    pub const fn full() -> Self {
        Self { start: 0, end: 0 }
    }

    /// Exclusive lower bound.
    #[must_use]
    pub const fn start(&self) -> u32 {
        self.start
    }

    /// Inclusive upper bound.
    #[must_use]
    pub const fn end(&self) -> u32 {
        self.end
    }

    /// Returns true if the arc wraps through zero (or covers the ring).
    #[must_use]
    pub const fn wraps(&self) -> bool {
        self.start >= self.end
    }

    /// Returns true if the arc covers the whole ring.
    #[must_use]
    pub const fn is_full(&self) -> bool {
        self.start == self.end
    }

    /// Returns true if `hash` lies in `(start, end]`.
    #[must_use]
    pub const fn in_range(&self, hash: u32) -> bool {
        if self.start < self.end {
            hash > self.start && hash <= self.end
        } else {
            hash > self.start || hash <= self.end
        }
    }

    /// Number of ring positions covered by the arc.
    #[must_use]
    pub const fn size(&self) -> u64 {
        if self.start < self.end {
            (self.end - self.start) as u64
        } else {
            RING_SIZE - (self.start - self.end) as u64
        }
    }
}

impl fmt::Display for RingRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(0x{:08x}, 0x{:08x}]", self.start, self.end)
    }
}

/// The set of arcs owned by one member.
///
/// A member placed on the ring at several positions owns one arc per
/// position. The arcs are kept sorted by start so equality is structural.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MultiRange {
    ranges: Vec<RingRange>,
}

impl MultiRange {
    /// Creates a range that owns nothing.
    #[must_use]
    pub const fn empty() -> Self {
        Self { ranges: Vec::new() }
    }

    /// Creates a range made of a single arc.
    #[must_use]
    pub fn single(range: RingRange) -> Self {
        Self {
            ranges: vec![range],
        }
    }

    /// Creates a range from a set of arcs.
    #[must_use]
    pub fn from_ranges(mut ranges: Vec<RingRange>) -> Self {
        ranges.sort_by_key(|r| (r.start, r.end));
        ranges.dedup();
        Self { ranges }
    }

    /// Returns the arcs making up this range.
    #[must_use]
    pub fn sub_ranges(&self) -> &[RingRange] {
        &self.ranges
    }

    /// Returns true if no arc is owned.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Returns true if any arc contains `hash`.
    #[must_use]
    pub fn in_range(&self, hash: u32) -> bool {
        self.ranges.iter().any(|r| r.in_range(hash))
    }

    /// Number of ring positions covered.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.ranges.iter().map(RingRange::size).sum()
    }
}

impl From<RingRange> for MultiRange {
    fn from(range: RingRange) -> Self {
        Self::single(range)
    }
}

impl fmt::Display for MultiRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.ranges.is_empty() {
            return write!(f, "<empty>");
        }
        for (i, range) in self.ranges.iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "{range}")?;
        }
        Ok(())
    }
}
