//! Operation counters shared by every clone of a tree handle.

use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

/// Snapshot of tree statistics at a point in time.
#[derive(Default, Debug, Clone, Copy)]
pub struct TreeStatsSnapshot {
    /// Lookups completed.
    pub reads: u64,
    /// Upserts completed.
    pub writes: u64,
    /// Split-recovery hops taken along right links, at any level.
    pub right_hops: u64,
    /// Leaf page splits performed.
    pub leaf_splits: u64,
    /// Internal page splits performed.
    pub internal_splits: u64,
    /// New roots installed.
    pub root_splits: u64,
    /// Ancestor stacks rebuilt after losing a root race.
    pub stack_rebuilds: u64,
}

/// Thread-safe statistics tracking for tree operations.
///
/// Counters are diagnostics, not synchronization; they use relaxed atomics
/// and may momentarily disagree with each other under load.
#[derive(Default)]
pub struct TreeStats {
    reads: AtomicU64,
    writes: AtomicU64,
    right_hops: AtomicU64,
    leaf_splits: AtomicU64,
    internal_splits: AtomicU64,
    root_splits: AtomicU64,
    stack_rebuilds: AtomicU64,
}

impl TreeStats {
    /// Returns the current count of completed lookups.
    pub fn reads(&self) -> u64 {
        self.reads.load(AtomicOrdering::Relaxed)
    }

    /// Returns the current count of completed upserts.
    pub fn writes(&self) -> u64 {
        self.writes.load(AtomicOrdering::Relaxed)
    }

    /// Returns the current count of right-link recovery hops.
    pub fn right_hops(&self) -> u64 {
        self.right_hops.load(AtomicOrdering::Relaxed)
    }

    /// Returns the current count of leaf page splits.
    pub fn leaf_splits(&self) -> u64 {
        self.leaf_splits.load(AtomicOrdering::Relaxed)
    }

    /// Returns the current count of internal page splits.
    pub fn internal_splits(&self) -> u64 {
        self.internal_splits.load(AtomicOrdering::Relaxed)
    }

    /// Returns the current count of installed roots.
    pub fn root_splits(&self) -> u64 {
        self.root_splits.load(AtomicOrdering::Relaxed)
    }

    /// Returns the current count of ancestor-stack rebuilds.
    pub fn stack_rebuilds(&self) -> u64 {
        self.stack_rebuilds.load(AtomicOrdering::Relaxed)
    }

    pub(crate) fn inc_reads(&self) {
        self.reads.fetch_add(1, AtomicOrdering::Relaxed);
    }

    pub(crate) fn inc_writes(&self) {
        self.writes.fetch_add(1, AtomicOrdering::Relaxed);
    }

    pub(crate) fn inc_right_hops(&self) {
        self.right_hops.fetch_add(1, AtomicOrdering::Relaxed);
    }

    pub(crate) fn inc_leaf_splits(&self) {
        self.leaf_splits.fetch_add(1, AtomicOrdering::Relaxed);
    }

    pub(crate) fn inc_internal_splits(&self) {
        self.internal_splits.fetch_add(1, AtomicOrdering::Relaxed);
    }

    pub(crate) fn inc_root_splits(&self) {
        self.root_splits.fetch_add(1, AtomicOrdering::Relaxed);
    }

    pub(crate) fn inc_stack_rebuilds(&self) {
        self.stack_rebuilds.fetch_add(1, AtomicOrdering::Relaxed);
    }

    /// Creates a snapshot of all current statistics.
    pub fn snapshot(&self) -> TreeStatsSnapshot {
        TreeStatsSnapshot {
            reads: self.reads(),
            writes: self.writes(),
            right_hops: self.right_hops(),
            leaf_splits: self.leaf_splits(),
            internal_splits: self.internal_splits(),
            root_splits: self.root_splits(),
            stack_rebuilds: self.stack_rebuilds(),
        }
    }

    /// Emits current statistics to the tracing infrastructure.
    pub fn emit_tracing(&self) {
        let snapshot = self.snapshot();
        tracing::info!(
            target: "bramble::stats",
            reads = snapshot.reads,
            writes = snapshot.writes,
            right_hops = snapshot.right_hops,
            leaf_splits = snapshot.leaf_splits,
            internal_splits = snapshot.internal_splits,
            root_splits = snapshot.root_splits,
            stack_rebuilds = snapshot.stack_rebuilds,
            "tree stats snapshot"
        );
    }
}
