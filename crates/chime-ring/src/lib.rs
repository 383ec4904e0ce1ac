//! Consistent-hash ring partitioning for chime.
//!
//! Every member of a cluster owns a [`MultiRange`] of the 32-bit ring; a
//! reminder belongs to whichever member owns the hash of its target key.
//!
//! - [`RingRange`] / [`MultiRange`]: half-open `(start, end]` arcs with wraparound
//! - [`ConsistentRing`]: pure member-to-range assignment
//! - [`ClusterRing`]: an in-process ring provider that tracks range serial
//!   numbers and notifies subscribers when a member's range changes
//!
//! # Example
//!
//! ```
//! use chime_ring::{stable_hash, ClusterRing, PositionStrategy};
//!
//! let ring = ClusterRing::with_members(
//!     PositionStrategy::default(),
//!     ["silo-a", "silo-b", "silo-c"],
//! );
//! let hash = stable_hash(b"user/42");
//! let owner = ring.owner_of(hash).unwrap();
//! assert!(ring.range_of(&owner).in_range(hash));
//! ```

pub mod error;
pub mod hash;
pub mod provider;
pub mod range;
pub mod ring;

pub use error::{Result, RingError};
pub use hash::stable_hash;
pub use provider::{
    ClusterRing, MemberRing, OwnerResolver, RangeChange, RangeChangeListener, RingProvider,
    SubscriptionId,
};
pub use range::{MultiRange, RingRange, RING_SIZE};
pub use ring::{
    ConsistentRing, MemberId, PartitionAssignment, PositionStrategy, DEFAULT_VIRTUAL_NODES,
};
