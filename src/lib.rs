//! Bramble is a disk-resident ordered index mapping `u64` keys to 16-byte
//! values, stored in a single flat file and safe to share across threads.
//!
//! Pages carry right-sibling links and high keys, so readers never block
//! behind a page split: a traversal that lands on a freshly split page
//! simply follows the right link to the half that now covers its key.
//! Writers lock one page at a time and climb with separators after a
//! split, growing a new root when the old one fills up.
//!
//! ```no_run
//! use std::path::Path;
//! use bramble::{Tree, Value};
//!
//! fn main() -> bramble::Result<()> {
//!     let path = Path::new("index.bramble");
//!     Tree::create_empty_file(path)?;
//!     let tree = Tree::open(path)?;
//!     tree.write(42, Value(*b"sixteen bytes!!!"))?;
//!     assert_eq!(tree.read(42)?, Some(Value(*b"sixteen bytes!!!")));
//!     assert_eq!(tree.read(7)?, None);
//!     Ok(())
//! }
//! ```

mod io;
pub mod latch;
pub mod node;
pub mod pager;
pub mod stats;
pub mod tree;
pub mod types;

pub use node::{Node, Payload};
pub use pager::{Pager, PagerOptions};
pub use stats::{TreeStats, TreeStatsSnapshot};
pub use tree::{Pages, Tree};
pub use types::{BrambleError, Key, PageOffset, Result, Value, VALUE_LEN};
