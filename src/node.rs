//! On-disk page records: layout, codec, and the in-page operations.

use std::ops::Range;

use crate::types::{BrambleError, Key, PageOffset, Result, Value, VALUE_LEN};

/// Half of a page's key capacity; the classic B-tree tuning constant.
pub const HALF_CAPACITY: usize = 64;

/// Maximum number of keys a page can hold.
pub const KEY_SLOTS: usize = 2 * HALF_CAPACITY;

/// Maximum number of children an internal page can hold.
pub const CHILD_SLOTS: usize = KEY_SLOTS + 1;

/// Flag bit marking a leaf page.
pub const FLAG_LEAF: u16 = 0x0001;

/// Flag bit marking the root page.
pub const FLAG_ROOT: u16 = 0x0008;

const KNOWN_FLAGS: u16 = FLAG_LEAF | FLAG_ROOT;

/// Byte layout of a serialized page record, format version 1.
///
/// Field order is fixed and integers are native-endian. Dead key and payload
/// slots are zeroed on encode and ignored on decode, so a record's bytes are
/// a deterministic function of its contents.
pub mod layout {
    use std::ops::Range;

    use super::{CHILD_SLOTS, KEY_SLOTS};
    use crate::types::VALUE_LEN;

    const KEYS_END: usize = 16 + 8 * KEY_SLOTS;
    const PAYLOAD_START: usize = KEYS_END + 26;
    const PAYLOAD_LEN: usize = VALUE_LEN * KEY_SLOTS;

    // The payload arm must fit whichever side is larger; today that is the
    // leaf values, and the child array rides in the same space.
    const _: () = assert!(PAYLOAD_LEN >= 8 * CHILD_SLOTS);

    /// The record's own byte offset in the file.
    pub const SELF_OFFSET: Range<usize> = 0..8;
    /// Number of live keys.
    pub const KEY_COUNT: Range<usize> = 8..16;
    /// Key array, `KEY_SLOTS` slots of `u64`.
    pub const KEYS: Range<usize> = 16..KEYS_END;
    /// Right-sibling offset, zero when rightmost.
    pub const RIGHT: Range<usize> = KEYS_END..KEYS_END + 8;
    /// Exclusive upper bound on reachable keys, zero when rightmost.
    pub const HIGH_KEY: Range<usize> = KEYS_END + 8..KEYS_END + 16;
    /// Page flag bits.
    pub const FLAGS: Range<usize> = KEYS_END + 16..KEYS_END + 18;
    /// Leaf value count or internal child count.
    pub const SLOT_COUNT: Range<usize> = KEYS_END + 18..KEYS_END + 26;
    /// Values (leaf) or children (internal), zero-padded to the larger arm.
    pub const PAYLOAD: Range<usize> = PAYLOAD_START..PAYLOAD_START + PAYLOAD_LEN;

    /// Total length in bytes of one serialized record.
    pub const RECORD_LEN: usize = PAYLOAD_START + PAYLOAD_LEN;
}

/// Total length in bytes of one serialized page record; pages occupy
/// consecutive slots of exactly this size.
pub const PAGE_LEN: usize = layout::RECORD_LEN;

/// Payload half of a page record; the LEAF flag selects the arm.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// One value per key, in key order.
    Leaf(Vec<Value>),
    /// `key_count + 1` child offsets.
    Internal(Vec<PageOffset>),
}

/// One page of the tree, decoded.
///
/// A node is a plain value: reading one snapshots the record, and mutations
/// reach the file only when the caller writes the node back while holding
/// the page's exclusive latch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    offset: PageOffset,
    right: Option<PageOffset>,
    high_key: Key,
    root: bool,
    keys: Vec<Key>,
    payload: Payload,
}

impl Node {
    /// Builds the empty root leaf a fresh file starts with.
    pub fn empty_root_leaf(offset: PageOffset) -> Node {
        Node {
            offset,
            right: None,
            high_key: 0,
            root: true,
            keys: Vec::new(),
            payload: Payload::Leaf(Vec::new()),
        }
    }

    /// Builds the internal root created by a root split: one separator over
    /// the two halves of the page that outgrew the old root.
    pub fn new_internal_root(
        offset: PageOffset,
        separator: Key,
        low: PageOffset,
        high: PageOffset,
    ) -> Node {
        Node {
            offset,
            right: None,
            high_key: 0,
            root: true,
            keys: vec![separator],
            payload: Payload::Internal(vec![low, high]),
        }
    }

    /// The record's byte offset in the backing file.
    pub fn offset(&self) -> PageOffset {
        self.offset
    }

    /// The right sibling, or `None` on the rightmost page of a level.
    pub fn right(&self) -> Option<PageOffset> {
        self.right
    }

    /// Exclusive upper bound on the keys reachable through this page;
    /// meaningless (zero) when the page is rightmost.
    pub fn high_key(&self) -> Key {
        self.high_key
    }

    /// True for the page the root slot names (advisory; the slot decides).
    pub fn is_root(&self) -> bool {
        self.root
    }

    /// True when the payload holds values rather than children.
    pub fn is_leaf(&self) -> bool {
        matches!(self.payload, Payload::Leaf(_))
    }

    /// Number of live keys.
    pub fn key_count(&self) -> usize {
        self.keys.len()
    }

    /// The live keys, strictly ascending.
    pub fn keys(&self) -> &[Key] {
        &self.keys
    }

    /// The values or children.
    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// The child offsets, or `None` on a leaf.
    pub fn children(&self) -> Option<&[PageOffset]> {
        match &self.payload {
            Payload::Internal(children) => Some(children),
            Payload::Leaf(_) => None,
        }
    }

    /// True when no further key fits without a split.
    pub fn is_full(&self) -> bool {
        self.keys.len() == KEY_SLOTS
    }

    /// True when the page holds `key` exactly.
    pub fn contains_key(&self, key: Key) -> bool {
        self.keys.binary_search(&key).is_ok()
    }

    /// True when `key` is inside this page's bound: rightmost pages cover
    /// everything, others cover keys strictly below the high key. A key at
    /// or above the high key lives somewhere along the right chain.
    pub fn covers(&self, key: Key) -> bool {
        self.right.is_none() || key < self.high_key
    }

    /// Routes a lookup key to the child that covers it.
    ///
    /// Binary-searches the first key `>= key` at index `i` and routes to
    /// child `i + 1` on an exact match, child `i` otherwise; a key above
    /// every separator routes to the last child. Returns `None` on a leaf,
    /// or when the computed slot is missing (possible only on a corrupt
    /// record); the caller decides whether that is a miss or an error.
    pub fn child_for_key(&self, key: Key) -> Option<PageOffset> {
        let Payload::Internal(children) = &self.payload else {
            return None;
        };
        let i = self.keys.partition_point(|&k| k < key);
        let slot = if i < self.keys.len() && self.keys[i] == key {
            i + 1
        } else {
            i
        };
        children.get(slot).copied()
    }

    /// Exact-match lookup in a leaf. Returns `None` on internal pages.
    pub fn value_for_key(&self, key: Key) -> Option<&Value> {
        let Payload::Leaf(values) = &self.payload else {
            return None;
        };
        self.keys.binary_search(&key).ok().map(|i| &values[i])
    }

    /// Upserts into a leaf: overwrites in place on an exact match (allowed
    /// even when full), otherwise inserts at the sorted position.
    ///
    /// Caller contract: the page is a leaf, and not full when `key` is new.
    pub fn insert_or_update(&mut self, key: Key, value: Value) {
        let Payload::Leaf(values) = &mut self.payload else {
            debug_assert!(false, "insert_or_update on an internal page");
            return;
        };
        match self.keys.binary_search(&key) {
            Ok(i) => values[i] = value,
            Err(i) => {
                debug_assert!(self.keys.len() < KEY_SLOTS, "insert into a full leaf");
                if self.keys.len() < KEY_SLOTS {
                    self.keys.insert(i, key);
                    values.insert(i, value);
                }
            }
        }
    }

    /// Inserts the separator and right-half child produced by a child's
    /// split: the separator lands at its sorted position `i`, the child at
    /// slot `i + 1`.
    ///
    /// Caller contract: the page is internal, not full, and the separator
    /// is not already present.
    pub fn insert_child(&mut self, key: Key, child: PageOffset) {
        let Payload::Internal(children) = &mut self.payload else {
            debug_assert!(false, "insert_child on a leaf page");
            return;
        };
        debug_assert!(self.keys.len() < KEY_SLOTS, "insert_child into a full page");
        if self.keys.len() == KEY_SLOTS {
            return;
        }
        match self.keys.binary_search(&key) {
            Ok(_) => debug_assert!(false, "separator is already present"),
            Err(i) => {
                self.keys.insert(i, key);
                children.insert(i + 1, child);
            }
        }
    }

    /// Splits the page around its positional midpoint, leaving the low half
    /// in `self` and returning `(promoted_key, high_half)`.
    ///
    /// A leaf keeps keys `[0, mid)` and promotes `keys[mid]`, which stays
    /// as the high half's minimum; an internal page keeps keys `[0, mid)`
    /// with children `[0, mid]` and promotes `keys[mid]` out of both halves.
    /// The high half inherits this page's right link and high key; `self`
    /// chains to `new_right_offset` bounded by the promoted key. The ROOT
    /// flag clears on both halves; installing a new root is the caller's
    /// move. Callers persist the returned half before `self` so no right
    /// link ever points at an unwritten record.
    pub fn split(&mut self, new_right_offset: PageOffset) -> (Key, Node) {
        debug_assert!(self.keys.len() >= 2, "split needs at least two keys");
        let mid = self.keys.len() / 2;
        let (promoted, high_keys, high_payload) = match &mut self.payload {
            Payload::Leaf(values) => {
                let high_keys = self.keys.split_off(mid);
                let high_values = values.split_off(mid);
                (high_keys[0], high_keys, Payload::Leaf(high_values))
            }
            Payload::Internal(children) => {
                let mut high_keys = self.keys.split_off(mid);
                let promoted = high_keys.remove(0);
                let high_children = children.split_off(mid + 1);
                (promoted, high_keys, Payload::Internal(high_children))
            }
        };
        let high = Node {
            offset: new_right_offset,
            right: self.right,
            high_key: self.high_key,
            root: false,
            keys: high_keys,
            payload: high_payload,
        };
        self.right = Some(new_right_offset);
        self.high_key = promoted;
        self.root = false;
        (promoted, high)
    }

    /// Serializes the record into `dst`, which must be exactly [`PAGE_LEN`]
    /// bytes long.
    pub fn encode(&self, dst: &mut [u8]) -> Result<()> {
        if dst.len() != PAGE_LEN {
            return Err(BrambleError::Invalid("encode buffer is not PAGE_LEN bytes"));
        }
        dst.fill(0);
        dst[layout::SELF_OFFSET].copy_from_slice(&self.offset.0.to_ne_bytes());
        dst[layout::KEY_COUNT].copy_from_slice(&(self.keys.len() as u64).to_ne_bytes());
        for (i, key) in self.keys.iter().enumerate() {
            let at = layout::KEYS.start + i * 8;
            dst[at..at + 8].copy_from_slice(&key.to_ne_bytes());
        }
        let right = self.right.map_or(0, |offset| offset.0);
        dst[layout::RIGHT].copy_from_slice(&right.to_ne_bytes());
        dst[layout::HIGH_KEY].copy_from_slice(&self.high_key.to_ne_bytes());
        let mut flags = 0u16;
        if self.is_leaf() {
            flags |= FLAG_LEAF;
        }
        if self.root {
            flags |= FLAG_ROOT;
        }
        dst[layout::FLAGS].copy_from_slice(&flags.to_ne_bytes());
        match &self.payload {
            Payload::Leaf(values) => {
                dst[layout::SLOT_COUNT].copy_from_slice(&(values.len() as u64).to_ne_bytes());
                for (i, value) in values.iter().enumerate() {
                    let at = layout::PAYLOAD.start + i * VALUE_LEN;
                    dst[at..at + VALUE_LEN].copy_from_slice(value.as_bytes());
                }
            }
            Payload::Internal(children) => {
                dst[layout::SLOT_COUNT].copy_from_slice(&(children.len() as u64).to_ne_bytes());
                for (i, child) in children.iter().enumerate() {
                    let at = layout::PAYLOAD.start + i * 8;
                    dst[at..at + 8].copy_from_slice(&child.0.to_ne_bytes());
                }
            }
        }
        Ok(())
    }

    /// Parses one record read from `offset`, validating every structural
    /// invariant the format promises: the self offset, key order, flag
    /// bits, the per-kind slot count, the high-key/right-link agreement,
    /// and non-null children.
    pub fn decode(src: &[u8], offset: PageOffset) -> Result<Node> {
        if src.len() != PAGE_LEN {
            return Err(BrambleError::Corruption("page record has the wrong length"));
        }
        if read_u64(src, layout::SELF_OFFSET) != offset.0 {
            return Err(BrambleError::Corruption(
                "page self-offset does not match its location",
            ));
        }
        let key_count = read_u64(src, layout::KEY_COUNT);
        if key_count > KEY_SLOTS as u64 {
            return Err(BrambleError::Corruption("key count exceeds page capacity"));
        }
        let key_count = key_count as usize;
        let mut keys = Vec::with_capacity(key_count);
        for i in 0..key_count {
            let at = layout::KEYS.start + i * 8;
            keys.push(read_u64(src, at..at + 8));
        }
        if !keys.windows(2).all(|pair| pair[0] < pair[1]) {
            return Err(BrambleError::Corruption("page keys are not strictly ascending"));
        }
        let right = match read_u64(src, layout::RIGHT) {
            0 => None,
            offset => Some(PageOffset(offset)),
        };
        let high_key = read_u64(src, layout::HIGH_KEY);
        if (high_key == 0) != right.is_none() {
            return Err(BrambleError::Corruption("high key and right link disagree"));
        }
        let flags = u16::from_ne_bytes([src[layout::FLAGS.start], src[layout::FLAGS.start + 1]]);
        if flags & !KNOWN_FLAGS != 0 {
            return Err(BrambleError::Corruption("unknown page flag bits"));
        }
        let slot_count = read_u64(src, layout::SLOT_COUNT);
        let payload = if flags & FLAG_LEAF != 0 {
            if slot_count != key_count as u64 {
                return Err(BrambleError::Corruption(
                    "leaf value count does not match key count",
                ));
            }
            let mut values = Vec::with_capacity(key_count);
            for i in 0..key_count {
                let at = layout::PAYLOAD.start + i * VALUE_LEN;
                let mut bytes = [0u8; VALUE_LEN];
                bytes.copy_from_slice(&src[at..at + VALUE_LEN]);
                values.push(Value(bytes));
            }
            Payload::Leaf(values)
        } else {
            if slot_count != key_count as u64 + 1 {
                return Err(BrambleError::Corruption(
                    "internal child count does not match key count",
                ));
            }
            let mut children = Vec::with_capacity(key_count + 1);
            for i in 0..key_count + 1 {
                let at = layout::PAYLOAD.start + i * 8;
                let child = read_u64(src, at..at + 8);
                if child == 0 {
                    return Err(BrambleError::Corruption("internal page stores a null child"));
                }
                children.push(PageOffset(child));
            }
            Payload::Internal(children)
        };
        Ok(Node {
            offset,
            right,
            high_key,
            root: flags & FLAG_ROOT != 0,
            keys,
            payload,
        })
    }
}

fn read_u64(src: &[u8], range: Range<usize>) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&src[range]);
    u64::from_ne_bytes(bytes)
}
