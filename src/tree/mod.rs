//! The tree proper: lock-coupled traversal, upserts, split propagation.

use std::path::Path;
use std::sync::Arc;

use smallvec::SmallVec;

use crate::latch::{LatchRegistry, PageReadGuard};
use crate::node::Node;
use crate::pager::{Pager, PagerOptions};
use crate::stats::{TreeStats, TreeStatsSnapshot};
use crate::types::{BrambleError, Key, PageOffset, Result, Value};

mod walk;
pub use walk::Pages;


/// Ancestor offsets recorded on the way down, root first.
type AncestorStack = SmallVec<[PageOffset; 8]>;

/// An entry waiting to go into a page that turned out to be full.
#[derive(Clone, Copy)]
enum PendingEntry {
    Leaf(Key, Value),
    Child(Key, PageOffset),
}

impl PendingEntry {
    fn key(self) -> Key {
        match self {
            PendingEntry::Leaf(key, _) => key,
            PendingEntry::Child(key, _) => key,
        }
    }
}

/// Concurrent ordered index over a single backing file.
///
/// `Tree` is a cheap handle: clones share one file, one latch registry, and
/// one stats block, and any number of clones may read and write from
/// different threads at once. Every handle over a file must descend from
/// the same [`Tree::open`] call; opening the same path twice in one process
/// creates two registries that do not see each other's locks.
#[derive(Clone)]
pub struct Tree {
    inner: Arc<TreeInner>,
}

struct TreeInner {
    pager: Pager,
    latches: LatchRegistry,
    stats: TreeStats,
}

impl Tree {
    /// One-time initialization of a new backing file; must run before the
    /// first [`Tree::open`] of that path. Truncates an existing file.
    pub fn create_empty_file(path: &Path) -> Result<()> {
        Pager::create_empty_file(path)
    }

    /// Attaches to an existing backing file with default options.
    pub fn open(path: &Path) -> Result<Tree> {
        Tree::open_with(path, PagerOptions::default())
    }

    /// Attaches to an existing backing file.
    pub fn open_with(path: &Path, options: PagerOptions) -> Result<Tree> {
        let pager = Pager::open(path, options)?;
        Ok(Tree {
            inner: Arc::new(TreeInner {
                pager,
                latches: LatchRegistry::new(),
                stats: TreeStats::default(),
            }),
        })
    }

    /// Operation counters accumulated across every clone of this handle.
    pub fn stats(&self) -> TreeStatsSnapshot {
        self.inner.stats.snapshot()
    }

    /// Looks up `key`. Missing keys are `Ok(None)`.
    pub fn read(&self, key: Key) -> Result<Option<Value>> {
        let found = match self.descend(key, None)? {
            Some((_guard, leaf)) => leaf.value_for_key(key).copied(),
            None => None,
        };
        self.inner.stats.inc_reads();
        Ok(found)
    }

    /// Upserts `key`: overwrites the old value or inserts a new pair,
    /// splitting pages (and growing a new root) as needed. Last writer
    /// wins; there is no delete.
    pub fn write(&self, key: Key, value: Value) -> Result<()> {
        let mut ancestors = AncestorStack::new();
        let Some((read_guard, leaf)) = self.descend(key, Some(&mut ancestors))? else {
            return Err(BrambleError::Corruption("no route to a leaf for this key"));
        };

        // Upgrade to exclusive. The latch is dropped across the upgrade, so
        // the leaf must be re-read and re-validated: it may have split.
        let leaf_offset = leaf.offset();
        drop(read_guard);
        let mut guard = self.inner.latches.write(leaf_offset);
        let mut node = self.inner.pager.read_node(leaf_offset)?;
        while !node.covers(key) {
            let Some(sibling) = node.right() else { break };
            self.inner.stats.inc_right_hops();
            tracing::trace!(
                target: "bramble::tree",
                page = sibling.0,
                high_key = node.high_key(),
                key,
                "write chased a right link"
            );
            let next = self.inner.latches.write(sibling);
            drop(guard);
            guard = next;
            node = self.inner.pager.read_node(sibling)?;
        }

        if !node.is_full() || node.contains_key(key) {
            node.insert_or_update(key, value);
            self.inner.pager.write_node(&node)?;
            drop(guard);
            self.inner.stats.inc_writes();
            return Ok(());
        }

        // Full leaf, new key: split it, then send the separator upward.
        let (separator, new_child) =
            self.split_and_insert(&mut node, PendingEntry::Leaf(key, value))?;
        let split_offset = node.offset();
        drop(guard);
        self.propagate(ancestors, split_offset, separator, new_child)?;
        self.inner.stats.inc_writes();
        Ok(())
    }

    /// Starts a breadth-first walk over the tree's pages; see [`Pages`].
    pub fn pages(&self) -> Result<Pages<'_>> {
        Pages::new(self)
    }

    /// Read-locks the current root, looping until the slot and the locked
    /// offset agree; the root can move while we wait for its latch.
    fn lock_root_shared(&self) -> Result<(PageReadGuard, Node)> {
        let mut offset = self.inner.pager.root_offset()?;
        loop {
            let guard = self.inner.latches.read(offset);
            let current = self.inner.pager.root_offset()?;
            if current == offset {
                let node = self.inner.pager.read_node(offset)?;
                return Ok((guard, node));
            }
            drop(guard);
            offset = current;
        }
    }

    /// Lock-coupled descent to the leaf whose range holds `key`: stabilize
    /// on the root, then at each page first chase right links while the key
    /// sits at or above the high key, and finally couple into the routed
    /// child (child latch acquired before the parent latch drops). Records
    /// every internal page visited into `record` when given, root first.
    ///
    /// Returns `None` when a corrupt internal page leaves no route; callers
    /// choose whether that is a miss or an error.
    fn descend(
        &self,
        key: Key,
        mut record: Option<&mut AncestorStack>,
    ) -> Result<Option<(PageReadGuard, Node)>> {
        let (mut guard, mut node) = self.lock_root_shared()?;
        loop {
            while !node.covers(key) {
                let Some(sibling) = node.right() else { break };
                self.inner.stats.inc_right_hops();
                tracing::trace!(
                    target: "bramble::tree",
                    page = sibling.0,
                    high_key = node.high_key(),
                    key,
                    "descent chased a right link"
                );
                let next = self.inner.latches.read(sibling);
                drop(guard);
                guard = next;
                node = self.inner.pager.read_node(sibling)?;
            }
            if node.is_leaf() {
                return Ok(Some((guard, node)));
            }
            let Some(child) = node.child_for_key(key) else {
                return Ok(None);
            };
            if let Some(stack) = record.as_mut() {
                stack.push(node.offset());
            }
            let next = self.inner.latches.read(child);
            drop(guard);
            guard = next;
            node = self.inner.pager.read_node(child)?;
        }
    }

    /// Splits `page` (write-latched and full), placing the pending entry
    /// into whichever half covers its key, and persists the high half
    /// before the low one so the new right link never dangles. Returns the
    /// separator and the new page's offset for the parent level.
    fn split_and_insert(&self, page: &mut Node, pending: PendingEntry) -> Result<(Key, PageOffset)> {
        let new_offset = self.inner.pager.allocate_page()?;
        let (separator, mut high) = page.split(new_offset);
        let target = if pending.key() < separator { &mut *page } else { &mut high };
        match pending {
            PendingEntry::Leaf(key, value) => target.insert_or_update(key, value),
            PendingEntry::Child(key, child) => target.insert_child(key, child),
        }
        self.inner.pager.write_node(&high)?;
        self.inner.pager.write_node(page)?;
        if page.is_leaf() {
            self.inner.stats.inc_leaf_splits();
        } else {
            self.inner.stats.inc_internal_splits();
        }
        tracing::trace!(
            target: "bramble::tree",
            low = page.offset().0,
            high = new_offset.0,
            separator,
            kind = if page.is_leaf() { "leaf" } else { "internal" },
            "split page"
        );
        Ok((separator, new_offset))
    }

    /// Delivers `(separator, new_child)` to the parent level after a split,
    /// climbing while splits cascade. Holds at most one level's latches at
    /// a time: each split page is released before its parent is locked, and
    /// the right links cover the window in between.
    fn propagate(
        &self,
        mut ancestors: AncestorStack,
        mut split_offset: PageOffset,
        mut separator: Key,
        mut new_child: PageOffset,
    ) -> Result<()> {
        // Height of the page that most recently split, leaves being zero;
        // this is how many stack entries a rebuild must discard.
        let mut split_height = 0usize;
        loop {
            let parent_offset = match ancestors.pop() {
                Some(offset) => offset,
                None => {
                    if self.install_root(split_offset, separator, new_child)? {
                        return Ok(());
                    }
                    // Lost the race: the tree grew above us while we
                    // climbed. Find the true parent from the live root.
                    self.rebuild_ancestors(&mut ancestors, separator, split_height)?;
                    self.inner.stats.inc_stack_rebuilds();
                    continue;
                }
            };

            let mut guard = self.inner.latches.write(parent_offset);
            let mut parent = self.inner.pager.read_node(parent_offset)?;
            while !parent.covers(separator) {
                let Some(sibling) = parent.right() else { break };
                self.inner.stats.inc_right_hops();
                tracing::trace!(
                    target: "bramble::tree",
                    page = sibling.0,
                    high_key = parent.high_key(),
                    key = separator,
                    "propagation chased a right link"
                );
                let next = self.inner.latches.write(sibling);
                drop(guard);
                guard = next;
                parent = self.inner.pager.read_node(sibling)?;
            }

            if !parent.is_full() {
                parent.insert_child(separator, new_child);
                self.inner.pager.write_node(&parent)?;
                return Ok(());
            }

            let (promoted, new_right) =
                self.split_and_insert(&mut parent, PendingEntry::Child(separator, new_child))?;
            split_offset = parent.offset();
            separator = promoted;
            new_child = new_right;
            split_height += 1;
            drop(guard);
        }
    }

    /// Attempts the root split: persists a fresh internal root over the two
    /// halves and swaps the root slot iff it still names the old one.
    /// Returns `false` when another writer moved the root first; the caller
    /// must deliver its separator into the grown tree instead. The candidate
    /// page written by a lost attempt stays unreachable forever, which is
    /// the whole cost of losing (slots are never reclaimed).
    fn install_root(
        &self,
        old_root: PageOffset,
        separator: Key,
        new_child: PageOffset,
    ) -> Result<bool> {
        if self.inner.pager.root_offset()? != old_root {
            return Ok(false);
        }
        let offset = self.inner.pager.allocate_page()?;
        let root = Node::new_internal_root(offset, separator, old_root, new_child);
        let guard = self.inner.latches.write(offset);
        self.inner.pager.write_node(&root)?;
        let swapped = self.inner.pager.swap_root_if(old_root, offset)?;
        drop(guard);
        if swapped {
            self.inner.stats.inc_root_splits();
            tracing::debug!(
                target: "bramble::tree",
                old = old_root.0,
                new = offset.0,
                separator,
                "grew a new root"
            );
        }
        Ok(swapped)
    }

    /// Rebuilds the ancestor stack from the live root after a lost root
    /// race: re-descends toward `key` recording internal pages, then drops
    /// the entries at or below the split page's level so the next pop
    /// yields its parent.
    fn rebuild_ancestors(
        &self,
        ancestors: &mut AncestorStack,
        key: Key,
        split_height: usize,
    ) -> Result<()> {
        ancestors.clear();
        let Some((guard, _leaf)) = self.descend(key, Some(&mut *ancestors))? else {
            return Err(BrambleError::Corruption("no route to a leaf for this key"));
        };
        drop(guard);
        if ancestors.len() < split_height {
            return Err(BrambleError::Corruption("tree is shorter than a split in flight"));
        }
        let keep = ancestors.len() - split_height;
        ancestors.truncate(keep);
        tracing::debug!(
            target: "bramble::tree",
            key,
            split_height,
            depth = keep,
            "rebuilt ancestor stack from the live root"
        );
        Ok(())
    }
}
