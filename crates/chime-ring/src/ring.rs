//! Member placement on the consistent-hash ring.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::error::{Result, RingError};
use crate::hash::stable_hash;
use crate::range::{MultiRange, RingRange, RING_SIZE};

/// Unique cluster member identifier.
pub type MemberId = String;

/// Virtual nodes per member for the default [`PositionStrategy`].
pub const DEFAULT_VIRTUAL_NODES: u32 = 30;

/// How members are placed on the ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum PositionStrategy {
    /// Each member is hashed onto `virtual_nodes` positions.
    ///
    /// Adding or removing a member only moves the keys adjacent to its
    /// positions.
    Hashed { virtual_nodes: u32 },
    /// Members sorted by id are spaced evenly around the ring.
    ///
    /// Perfectly balanced, but a membership change shifts every boundary.
    EvenlySpaced,
}

impl Default for PositionStrategy {
    fn default() -> Self {
        Self::Hashed {
            virtual_nodes: DEFAULT_VIRTUAL_NODES,
        }
    }
}

/// A member's current slice of the ring.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionAssignment {
    /// Owning member.
    pub member: MemberId,
    /// Arcs owned by the member.
    pub range: MultiRange,
    /// Incremented every time `range` changes.
    pub serial: u64,
}

/// Pure consistent-hash ring.
///
/// A key belongs to the first member position found walking clockwise from
/// its hash, so a member placed at `p` owns `(previous position, p]`.
#[derive(Debug, Clone)]
pub struct ConsistentRing {
    strategy: PositionStrategy,
    members: BTreeSet<MemberId>,
    /// Sorted by position; at most one member per position.
    positions: Vec<(u32, MemberId)>,
}

impl ConsistentRing {
    /// Creates an empty ring.
    #[must_use]
    pub const fn new(strategy: PositionStrategy) -> Self {
        Self {
            strategy,
            members: BTreeSet::new(),
            positions: Vec::new(),
        }
    }

    /// Creates a ring holding the given members.
    pub fn with_members<I, S>(strategy: PositionStrategy, members: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<MemberId>,
    {
        let mut ring = Self::new(strategy);
        ring.members = members.into_iter().map(Into::into).collect();
        ring.rebuild();
        ring
    }

    /// Returns the placement strategy.
    #[must_use]
    pub const fn strategy(&self) -> PositionStrategy {
        self.strategy
    }

    /// Adds a member.
    pub fn add_member(&mut self, member: impl Into<MemberId>) -> Result<()> {
        let member = member.into();
        if !self.members.insert(member.clone()) {
            return Err(RingError::DuplicateMember(member));
        }
        self.rebuild();
        Ok(())
    }

    /// Removes a member.
    pub fn remove_member(&mut self, member: &str) -> Result<()> {
        if !self.members.remove(member) {
            return Err(RingError::UnknownMember(member.to_owned()));
        }
        self.rebuild();
        Ok(())
    }

    /// Returns true if the member is on the ring.
    #[must_use]
    pub fn contains(&self, member: &str) -> bool {
        self.members.contains(member)
    }

    /// Iterates members in id order.
    pub fn members(&self) -> impl Iterator<Item = &MemberId> {
        self.members.iter()
    }

    /// Returns the number of members.
    #[must_use]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Returns true if the ring has no members.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Returns the member owning `hash`.
    #[must_use]
    pub fn owner_of(&self, hash: u32) -> Option<&MemberId> {
        if self.positions.is_empty() {
            return None;
        }
        let index = self.positions.partition_point(|(pos, _)| *pos < hash);
        let (_, member) = self
            .positions
            .get(index)
            .unwrap_or(&self.positions[0]);
        Some(member)
    }

    /// Returns the arcs owned by `member`.
    ///
    /// Unknown members, and members that lost every position to a
    /// tie-break, own an empty range.
    #[must_use]
    pub fn owner_range(&self, member: &str) -> MultiRange {
        let count = self.positions.len();
        let ranges = self
            .positions
            .iter()
            .enumerate()
            .filter(|(_, (_, owner))| owner == member)
            .map(|(i, (pos, _))| {
                let previous = self.positions[(i + count - 1) % count].0;
                RingRange::new(previous, *pos)
            })
            .collect();
        MultiRange::from_ranges(ranges)
    }

    /// Returns every member's range, keyed by member id.
    #[must_use]
    pub fn assignments(&self) -> BTreeMap<MemberId, MultiRange> {
        self.members
            .iter()
            .map(|m| (m.clone(), self.owner_range(m)))
            .collect()
    }

    fn rebuild(&mut self) {
        let raw = match self.strategy {
            PositionStrategy::Hashed { virtual_nodes } => {
                let nodes = virtual_nodes.max(1);
                self.members
                    .iter()
                    .flat_map(|m| {
                        (0..nodes).map(move |n| {
                            (stable_hash(format!("{m}/{n}").as_bytes()), m.clone())
                        })
                    })
                    .collect()
            }
            PositionStrategy::EvenlySpaced => {
                let step = RING_SIZE / self.members.len().max(1) as u64;
                self.members
                    .iter()
                    .enumerate()
                    .map(|(i, m)| (position_from_offset(i as u64 * step), m.clone()))
                    .collect()
            }
        };
        self.positions = resolve_positions(raw);
    }

    #[cfg(test)]
    pub(crate) fn from_raw_positions(positions: Vec<(u32, MemberId)>) -> Self {
        Self {
            strategy: PositionStrategy::default(),
            members: positions.iter().map(|(_, m)| m.clone()).collect(),
            positions: resolve_positions(positions),
        }
    }
}

#[allow(clippy::cast_possible_truncation)]
const fn position_from_offset(offset: u64) -> u32 {
    (offset % RING_SIZE) as u32
}

/// Sorts positions and settles collisions.
///
/// When several members land on the same position the lexicographically
/// smallest id keeps it. Every process applies the same rule, so no two
/// members ever believe they own the same arc.
fn resolve_positions(mut positions: Vec<(u32, MemberId)>) -> Vec<(u32, MemberId)> {
    positions.sort();
    positions.dedup_by_key(|(pos, _)| *pos);
    positions
}
