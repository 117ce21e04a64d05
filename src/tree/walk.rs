use std::collections::VecDeque;

use crate::node::Node;
use crate::types::{PageOffset, Result};

use super::Tree;

/// Breadth-first walk over every page reachable from the root, top level
/// first. Each call to [`Pages::next`] latches, reads, and releases one
/// page, so a walk never blocks writers for longer than a single read; the
/// set of pages it sees under concurrent writes is a best-effort snapshot.
pub struct Pages<'a> {
    tree: &'a Tree,
    queue: VecDeque<PageOffset>,
}

impl<'a> Pages<'a> {
    pub(super) fn new(tree: &'a Tree) -> Result<Pages<'a>> {
        let root = tree.inner.pager.root_offset()?;
        let mut queue = VecDeque::new();
        queue.push_back(root);
        Ok(Pages { tree, queue })
    }

    /// Returns the next page, or `None` once the walk is exhausted.
    pub fn next(&mut self) -> Result<Option<Node>> {
        let Some(offset) = self.queue.pop_front() else {
            return Ok(None);
        };
        let guard = self.tree.inner.latches.read(offset);
        let node = self.tree.inner.pager.read_node(offset)?;
        drop(guard);
        if let Some(children) = node.children() {
            self.queue.extend(children.iter().copied());
        }
        Ok(Some(node))
    }
}
