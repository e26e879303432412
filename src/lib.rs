//! # B+Tree Mutation Engine
//!
//! A concurrent, transactional B+tree keyed by any ordered type, designed so
//! that node storage can be swapped without touching the tree algorithms.
//!
//! ## Architecture
//!
//! The engine is composed of modular, swappable components:
//!
//! - **Node Layer** (`node`): Element-array node format shared by leaves and
//!   internal nodes
//! - **Storage Layer** (`storage`): The [`NodeStore`] abstraction, pinned
//!   lock-scoped node handles, and per-operation transactions
//! - **Tree Layer** (`tree`): Search, proactive-split insert, proactive-join
//!   delete, and bottom-up bulk rebuild
//! - **Policies** (`policy`): Caller hooks deciding what happens when a key
//!   is found or missing
//!
//! ## Usage
//!
//! ```rust
//! use bplustree_engine::{BPlusTree, TreeOptions};
//!
//! # fn main() -> bplustree_engine::Result<()> {
//! let tree: BPlusTree<u64, String> = BPlusTree::new(TreeOptions::with_node_sizes(4, 8))?;
//!
//! tree.add(1, "one".into())?;
//! tree.set(1, "uno".into())?;
//! assert_eq!(tree.get(&1)?, Some("uno".into()));
//!
//! tree.bulk_insert((2..100).map(|k| (k, k.to_string())).collect())?;
//! assert_eq!(tree.len(), 99);
//!
//! assert_eq!(tree.remove(&1)?, Some("uno".into()));
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod node;
pub mod ordered;
pub mod policy;
pub mod storage;
pub mod tree;
pub mod types;

pub use error::{Error, Result};
pub use types::{
    DuplicateHandling, InsertResult, LockType, NodeHandle, RemoveResult, TreeOptions,
};

// Re-export main public API
pub use storage::{MemStore, NodePin, NodeStore, NodeTransaction};
pub use tree::{BPlusTree, BulkInsertOptions, TreeStats};
