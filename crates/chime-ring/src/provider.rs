//! Ring providers and range-change notification.

use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::Result;
use crate::range::MultiRange;
use crate::ring::{ConsistentRing, MemberId, PartitionAssignment, PositionStrategy};

/// Notification that a member's range changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeChange {
    /// Range before the change.
    pub old: MultiRange,
    /// Range after the change.
    pub new: MultiRange,
    /// True if the new range covers more of the ring than the old one.
    pub increased: bool,
    /// Range serial number after the change.
    pub serial: u64,
}

/// Receives range-change notifications.
pub trait RangeChangeListener: Send + Sync {
    /// Called once per change, in order.
    ///
    /// Must not block: implementations are expected to enqueue the change
    /// and process it elsewhere.
    fn range_changed(&self, change: RangeChange);
}

/// Handle returned by [`RingProvider::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// A member's view of the ring.
pub trait RingProvider: Send + Sync {
    /// Returns the range currently owned by this member.
    fn my_range(&self) -> MultiRange;

    /// Registers a listener for changes to this member's range.
    fn subscribe(&self, listener: Arc<dyn RangeChangeListener>) -> SubscriptionId;

    /// Removes a listener. Returns false if it was not registered.
    fn unsubscribe(&self, id: SubscriptionId) -> bool;
}

/// Resolves which member owns a hash.
pub trait OwnerResolver: Send + Sync {
    /// Returns the owning member, or `None` if the ring is empty.
    fn owner_of(&self, hash: u32) -> Option<MemberId>;
}

type Listeners = Vec<(SubscriptionId, Arc<dyn RangeChangeListener>)>;

struct ClusterState {
    ring: ConsistentRing,
    assignments: HashMap<MemberId, MultiRange>,
    /// Kept for departed members so a rejoin keeps counting upwards.
    serials: HashMap<MemberId, u64>,
}

/// In-process ring shared by every member of a (possibly simulated) cluster.
///
/// Membership changes recompute all assignments under one lock; each member
/// whose range changed gets its serial number bumped and its subscribers
/// notified, in order, after the lock is released.
pub struct ClusterRing {
    state: Mutex<ClusterState>,
    listeners: DashMap<MemberId, Listeners>,
    next_subscription: AtomicU64,
    /// Serialises notification delivery so listeners see changes in order.
    notify_lock: Mutex<()>,
}

impl ClusterRing {
    /// Creates an empty ring.
    #[must_use]
    pub fn new(strategy: PositionStrategy) -> Self {
        Self {
            state: Mutex::new(ClusterState {
                ring: ConsistentRing::new(strategy),
                assignments: HashMap::new(),
                serials: HashMap::new(),
            }),
            listeners: DashMap::new(),
            next_subscription: AtomicU64::new(1),
            notify_lock: Mutex::new(()),
        }
    }

    /// Creates a ring with an initial membership.
    pub fn with_members<I, S>(strategy: PositionStrategy, members: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<MemberId>,
    {
        let ring = ConsistentRing::with_members(strategy, members);
        let assignments: HashMap<_, _> = ring.assignments().into_iter().collect();
        let serials = assignments.keys().map(|m| (m.clone(), 1)).collect();
        Self {
            state: Mutex::new(ClusterState {
                ring,
                assignments,
                serials,
            }),
            listeners: DashMap::new(),
            next_subscription: AtomicU64::new(1),
            notify_lock: Mutex::new(()),
        }
    }

    /// Adds a member and notifies every member whose range changed.
    pub fn add_member(&self, member: impl Into<MemberId>) -> Result<()> {
        let member = member.into();
        self.update(|ring| ring.add_member(member.clone()))?;
        info!(member = %member, "Member joined ring");
        Ok(())
    }

    /// Removes a member and notifies every member whose range changed.
    pub fn remove_member(&self, member: &str) -> Result<()> {
        self.update(|ring| ring.remove_member(member))?;
        info!(member = %member, "Member left ring");
        Ok(())
    }

    /// Returns the current members in id order.
    #[must_use]
    pub fn members(&self) -> Vec<MemberId> {
        self.state.lock().ring.members().cloned().collect()
    }

    /// Returns the range owned by `member` (empty if not a member).
    #[must_use]
    pub fn range_of(&self, member: &str) -> MultiRange {
        self.state
            .lock()
            .assignments
            .get(member)
            .cloned()
            .unwrap_or_default()
    }

    /// Returns the current assignment of `member`.
    #[must_use]
    pub fn assignment(&self, member: &str) -> Option<PartitionAssignment> {
        let state = self.state.lock();
        let range = state.assignments.get(member)?.clone();
        Some(PartitionAssignment {
            member: member.to_owned(),
            range,
            serial: state.serials.get(member).copied().unwrap_or_default(),
        })
    }

    /// Returns the member owning `hash`.
    #[must_use]
    pub fn owner_of(&self, hash: u32) -> Option<MemberId> {
        self.state.lock().ring.owner_of(hash).cloned()
    }

    /// Returns a [`RingProvider`] scoped to one member.
    #[must_use]
    pub fn member_view(self: &Arc<Self>, member: impl Into<MemberId>) -> MemberRing {
        MemberRing {
            cluster: Arc::clone(self),
            member: member.into(),
        }
    }

    fn subscribe_member(
        &self,
        member: &str,
        listener: Arc<dyn RangeChangeListener>,
    ) -> SubscriptionId {
        let id = SubscriptionId(self.next_subscription.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .entry(member.to_owned())
            .or_default()
            .push((id, listener));
        id
    }

    fn unsubscribe_member(&self, member: &str, id: SubscriptionId) -> bool {
        self.listeners.get_mut(member).is_some_and(|mut listeners| {
            let before = listeners.len();
            listeners.retain(|(sub, _)| *sub != id);
            listeners.len() != before
        })
    }

    fn update<F>(&self, change: F) -> Result<()>
    where
        F: FnOnce(&mut ConsistentRing) -> Result<()>,
    {
        let _ordered = self.notify_lock.lock();

        let changes = {
            let mut state = self.state.lock();
            change(&mut state.ring)?;
            let next: HashMap<MemberId, MultiRange> =
                state.ring.assignments().into_iter().collect();

            let touched: BTreeSet<MemberId> = state
                .assignments
                .keys()
                .chain(next.keys())
                .cloned()
                .collect();

            let mut changes = Vec::new();
            for member in touched {
                let old = state.assignments.get(&member).cloned().unwrap_or_default();
                let new = next.get(&member).cloned().unwrap_or_default();
                if old == new {
                    continue;
                }
                let serial = state.serials.entry(member.clone()).or_default();
                *serial += 1;
                changes.push((
                    member,
                    RangeChange {
                        increased: new.size() > old.size(),
                        old,
                        new,
                        serial: *serial,
                    },
                ));
            }
            state.assignments = next;
            changes
        };

        for (member, change) in changes {
            debug!(
                member = %member,
                old = %change.old,
                new = %change.new,
                serial = change.serial,
                "Range changed"
            );
            let listeners: Vec<_> = self
                .listeners
                .get(&member)
                .map(|l| l.iter().map(|(_, listener)| Arc::clone(listener)).collect())
                .unwrap_or_default();
            for listener in listeners {
                listener.range_changed(change.clone());
            }
        }

        Ok(())
    }
}

impl OwnerResolver for ClusterRing {
    fn owner_of(&self, hash: u32) -> Option<MemberId> {
        Self::owner_of(self, hash)
    }
}

impl std::fmt::Debug for ClusterRing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("ClusterRing")
            .field("strategy", &state.ring.strategy())
            .field("members", &state.ring.len())
            .finish_non_exhaustive()
    }
}

/// One member's view of a [`ClusterRing`].
#[derive(Clone)]
pub struct MemberRing {
    cluster: Arc<ClusterRing>,
    member: MemberId,
}

impl MemberRing {
    /// Returns the member this view belongs to.
    #[must_use]
    pub fn member(&self) -> &str {
        &self.member
    }

    /// Returns the shared cluster ring.
    #[must_use]
    pub fn cluster(&self) -> &Arc<ClusterRing> {
        &self.cluster
    }
}

impl RingProvider for MemberRing {
    fn my_range(&self) -> MultiRange {
        self.cluster.range_of(&self.member)
    }

    fn subscribe(&self, listener: Arc<dyn RangeChangeListener>) -> SubscriptionId {
        self.cluster.subscribe_member(&self.member, listener)
    }

    fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.cluster.unsubscribe_member(&self.member, id)
    }
}

impl std::fmt::Debug for MemberRing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemberRing")
            .field("member", &self.member)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::range::RING_SIZE;

    #[derive(Default)]
    struct Recorder {
        changes: Mutex<Vec<RangeChange>>,
    }

    impl RangeChangeListener for Recorder {
        fn range_changed(&self, change: RangeChange) {
            self.changes.lock().push(change);
        }
    }

    #[test]
    fn joining_member_is_told_its_range_grew() {
        let ring = Arc::new(ClusterRing::new(PositionStrategy::default()));
        let view = ring.member_view("silo-a");
        let recorder = Arc::new(Recorder::default());
        view.subscribe(recorder.clone());

        assert!(view.my_range().is_empty());
        ring.add_member("silo-a").unwrap();

        let changes = recorder.changes.lock();
        assert_eq!(changes.len(), 1);
        assert!(changes[0].increased);
        assert!(changes[0].old.is_empty());
        assert_eq!(changes[0].new.size(), RING_SIZE);
        assert_eq!(changes[0].serial, 1);
        assert_eq!(view.my_range(), changes[0].new);
    }

    #[test]
    fn existing_member_shrinks_when_another_joins() {
        let ring = Arc::new(ClusterRing::with_members(PositionStrategy::default(), ["silo-a"]));
        let recorder = Arc::new(Recorder::default());
        ring.member_view("silo-a").subscribe(recorder.clone());

        ring.add_member("silo-b").unwrap();

        let changes = recorder.changes.lock();
        assert_eq!(changes.len(), 1);
        assert!(!changes[0].increased);
        assert_eq!(changes[0].serial, 2);
        assert_eq!(
            changes[0].new.size() + ring.range_of("silo-b").size(),
            RING_SIZE
        );
        assert_eq!(ring.assignment("silo-a").unwrap().serial, 2);
    }

    #[test]
    fn unsubscribed_listener_hears_nothing() {
        let ring = Arc::new(ClusterRing::with_members(PositionStrategy::default(), ["silo-a"]));
        let view = ring.member_view("silo-a");
        let recorder = Arc::new(Recorder::default());
        let id = view.subscribe(recorder.clone());

        assert!(view.unsubscribe(id));
        assert!(!view.unsubscribe(id));
        ring.add_member("silo-b").unwrap();

        assert!(recorder.changes.lock().is_empty());
    }

    #[test]
    fn departing_member_is_told_it_owns_nothing() {
        let ring = Arc::new(ClusterRing::with_members(
            PositionStrategy::default(),
            ["silo-a", "silo-b"],
        ));
        let recorder = Arc::new(Recorder::default());
        ring.member_view("silo-b").subscribe(recorder.clone());

        ring.remove_member("silo-b").unwrap();

        let changes = recorder.changes.lock();
        assert_eq!(changes.len(), 1);
        assert!(changes[0].new.is_empty());
        assert_eq!(ring.range_of("silo-a").size(), RING_SIZE);
        assert!(ring.assignment("silo-b").is_none());
    }

    #[test]
    fn owner_resolution_follows_membership() {
        let ring = ClusterRing::with_members(PositionStrategy::default(), ["silo-a", "silo-b"]);
        let hash = crate::stable_hash(b"target");
        let owner = ring.owner_of(hash).unwrap();
        assert!(ring.range_of(&owner).in_range(hash));

        ring.remove_member(&owner).unwrap();
        let survivor = ring.owner_of(hash).unwrap();
        assert_ne!(survivor, owner);
    }
}
