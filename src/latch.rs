//! Per-page reader-writer locks, shared by every handle over one open file.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::lock_api::{ArcRwLockReadGuard, ArcRwLockWriteGuard};
use parking_lot::{Mutex, RawRwLock, RwLock};

use crate::types::PageOffset;

/// Owned shared-mode guard on a page latch.
pub type PageReadGuard = ArcRwLockReadGuard<RawRwLock, ()>;

/// Owned exclusive-mode guard on a page latch.
pub type PageWriteGuard = ArcRwLockWriteGuard<RawRwLock, ()>;

/// Map from page offset to that page's reader-writer lock.
///
/// One registry is created per open file and shared by every tree handle
/// cloned from that open, so an offset resolves to the same lock no matter
/// which handle asks. Guards are owned (`read_arc`/`write_arc`), which lets
/// a traversal acquire the next page's guard before letting the previous
/// one go.
///
/// Entries are created on first use and never removed; pages are never
/// reclaimed, so the map is bounded by the pages ever allocated.
#[derive(Default)]
pub struct LatchRegistry {
    latches: Mutex<HashMap<PageOffset, Arc<RwLock<()>>>>,
}

impl LatchRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the latch for `offset`, creating it on first request.
    pub fn latch_for(&self, offset: PageOffset) -> Arc<RwLock<()>> {
        self.latches.lock().entry(offset).or_default().clone()
    }

    /// Acquires the latch for `offset` in shared mode.
    pub fn read(&self, offset: PageOffset) -> PageReadGuard {
        self.latch_for(offset).read_arc()
    }

    /// Acquires the latch for `offset` in exclusive mode.
    pub fn write(&self, offset: PageOffset) -> PageWriteGuard {
        self.latch_for(offset).write_arc()
    }
}
