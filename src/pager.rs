//! The page store: fixed-size records in one flat file behind a header.

use std::fs::{File, OpenOptions};
use std::ops::Range;
use std::path::Path;

use parking_lot::{Mutex, RwLock};

use crate::io;
use crate::node::{Node, PAGE_LEN};
use crate::types::{BrambleError, PageOffset, Result};

/// Identifying bytes at the start of the header's magic slot.
pub const FILE_MAGIC: [u8; 4] = *b"BRMB";

/// On-disk format version this build reads and writes.
pub const FORMAT_VERSION: u16 = 1;

/// Byte offset of the first page record; the header owns everything below.
pub const PAGE_BASE: u64 = 100;

/// File header slots. The root and free-pointer slots are live state and
/// stay in the file, never cached; magic and version are written once.
mod header {
    use std::ops::Range;

    pub const ROOT: Range<usize> = 0..8;
    pub const FREE: Range<usize> = 8..16;
    pub const MAGIC: Range<usize> = 16..20;
    pub const VERSION: Range<usize> = 20..22;
    pub const LEN: usize = super::PAGE_BASE as usize;
}

/// Knobs for opening a page store.
#[derive(Debug, Clone, Copy, Default)]
pub struct PagerOptions {
    /// Follow every write with `sync_data`. Off by default: multi-page
    /// crash atomicity is out of scope either way, this only narrows the
    /// loss window.
    pub sync_on_write: bool,
}

/// Positioned-I/O page store over a single backing file.
///
/// Page records are read and written whole at their offsets; callers
/// serialize access per page through the latch registry. The header's two
/// live slots each carry their own lock here: the allocator mutex makes
/// free-pointer bumps atomic, and the root latch makes slot reads and
/// conditional swaps linearizable.
pub struct Pager {
    file: File,
    sync_on_write: bool,
    alloc: Mutex<()>,
    root: RwLock<()>,
}

impl Pager {
    /// One-time initialization of a backing file: writes the header and the
    /// empty root leaf. Truncates anything already at `path`.
    pub fn create_empty_file(path: &Path) -> Result<()> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        let mut head = [0u8; header::LEN];
        head[header::ROOT].copy_from_slice(&PAGE_BASE.to_ne_bytes());
        head[header::FREE].copy_from_slice(&(PAGE_BASE + PAGE_LEN as u64).to_ne_bytes());
        head[header::MAGIC].copy_from_slice(&FILE_MAGIC);
        head[header::VERSION].copy_from_slice(&FORMAT_VERSION.to_ne_bytes());
        io::write_all_at(&file, &head, 0)?;

        let root = Node::empty_root_leaf(PageOffset(PAGE_BASE));
        let mut buf = [0u8; PAGE_LEN];
        root.encode(&mut buf)?;
        io::write_all_at(&file, &buf, PAGE_BASE)?;
        file.sync_data()?;
        tracing::debug!(
            target: "bramble::pager",
            path = %path.display(),
            root = PAGE_BASE,
            "initialized backing file"
        );
        Ok(())
    }

    /// Opens an existing backing file read/write and validates its header.
    /// Never creates or truncates.
    pub fn open(path: &Path, options: PagerOptions) -> Result<Pager> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let mut head = [0u8; header::LEN];
        io::read_exact_at(&file, &mut head, 0).map_err(|err| match err.kind() {
            std::io::ErrorKind::UnexpectedEof => {
                BrambleError::Corruption("file is too short to hold a header")
            }
            _ => BrambleError::Io(err),
        })?;
        if head[header::MAGIC] != FILE_MAGIC {
            return Err(BrambleError::Corruption("bad file magic"));
        }
        let version =
            u16::from_ne_bytes([head[header::VERSION.start], head[header::VERSION.start + 1]]);
        if version != FORMAT_VERSION {
            return Err(BrambleError::Corruption("unsupported format version"));
        }
        let root = slot_value(&head, header::ROOT);
        let free = slot_value(&head, header::FREE);
        if !on_page_grid(root) {
            return Err(BrambleError::Corruption("root slot points off the page grid"));
        }
        if !on_page_grid(free) {
            return Err(BrambleError::Corruption("free pointer points off the page grid"));
        }
        tracing::debug!(
            target: "bramble::pager",
            path = %path.display(),
            root,
            free,
            "opened backing file"
        );
        Ok(Pager {
            file,
            sync_on_write: options.sync_on_write,
            alloc: Mutex::new(()),
            root: RwLock::new(()),
        })
    }

    /// Reads and decodes the record at `offset`.
    pub fn read_node(&self, offset: PageOffset) -> Result<Node> {
        if !on_page_grid(offset.0) {
            return Err(BrambleError::Invalid("offset does not name a page slot"));
        }
        let mut buf = [0u8; PAGE_LEN];
        io::read_exact_at(&self.file, &mut buf, offset.0).map_err(|err| match err.kind() {
            std::io::ErrorKind::UnexpectedEof => BrambleError::Corruption("page record is truncated"),
            _ => BrambleError::Io(err),
        })?;
        Node::decode(&buf, offset)
    }

    /// Serializes `node` and writes it at its own offset.
    pub fn write_node(&self, node: &Node) -> Result<()> {
        if !on_page_grid(node.offset().0) {
            return Err(BrambleError::Invalid("node offset does not name a page slot"));
        }
        let mut buf = [0u8; PAGE_LEN];
        node.encode(&mut buf)?;
        io::write_all_at(&self.file, &buf, node.offset().0)?;
        if self.sync_on_write {
            self.file.sync_data()?;
        }
        Ok(())
    }

    /// Hands out the next unused page slot and advances the free pointer.
    /// Slots are handed out exactly once, strictly ascending, and never
    /// reused; nothing is written to the new slot.
    pub fn allocate_page(&self) -> Result<PageOffset> {
        let _guard = self.alloc.lock();
        let next = self.read_slot(header::FREE)?;
        self.write_slot(header::FREE, next + PAGE_LEN as u64)?;
        tracing::trace!(target: "bramble::pager", offset = next, "allocated page slot");
        Ok(PageOffset(next))
    }

    /// Reads the root slot.
    pub fn root_offset(&self) -> Result<PageOffset> {
        let _guard = self.root.read();
        Ok(PageOffset(self.read_slot(header::ROOT)?))
    }

    /// Installs `new` as the root iff the slot still names `expected`,
    /// returning whether the swap happened. Linearizable against
    /// [`Pager::root_offset`] through the root latch.
    pub fn swap_root_if(&self, expected: PageOffset, new: PageOffset) -> Result<bool> {
        let _guard = self.root.write();
        if self.read_slot(header::ROOT)? != expected.0 {
            return Ok(false);
        }
        self.write_slot(header::ROOT, new.0)?;
        tracing::debug!(target: "bramble::pager", old = expected.0, new = new.0, "root moved");
        Ok(true)
    }

    fn read_slot(&self, slot: Range<usize>) -> Result<u64> {
        let mut buf = [0u8; 8];
        io::read_exact_at(&self.file, &mut buf, slot.start as u64)?;
        Ok(u64::from_ne_bytes(buf))
    }

    fn write_slot(&self, slot: Range<usize>, value: u64) -> Result<()> {
        io::write_all_at(&self.file, &value.to_ne_bytes(), slot.start as u64)?;
        if self.sync_on_write {
            self.file.sync_data()?;
        }
        Ok(())
    }
}

fn slot_value(head: &[u8], slot: Range<usize>) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&head[slot]);
    u64::from_ne_bytes(buf)
}

fn on_page_grid(offset: u64) -> bool {
    offset >= PAGE_BASE && (offset - PAGE_BASE) % PAGE_LEN as u64 == 0
}
