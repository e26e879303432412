//! Node storage collaborator contracts.
//!
//! The engine never touches a node except through a [`NodePin`] obtained
//! from a [`NodeStore`], and never restructures the tree except through a
//! [`NodeTransaction`]. The bundled [`MemStore`] keeps nodes in memory;
//! durable backends implement the same trait.

mod mem;
mod pin;
mod txn;

pub use mem::MemStore;
pub use pin::NodePin;
pub use txn::NodeTransaction;

use crate::error::Result;
use crate::node::Node;
use crate::types::{LockType, NodeHandle};

/// Storage collaborator contract.
///
/// Implementations keep each node behind its own reader/writer lock and
/// build pins with [`NodePin::acquire`]. `context` is the already-pinned
/// ancestor on whose behalf the lock is taken; stores may use it for lock
/// ordering diagnostics and must not require it.
pub trait NodeStore<K, V>: Send + Sync {
    /// Allocate a fresh handle backed by an empty slot
    fn create(&self) -> Result<NodeHandle>;

    /// Acquire a lock on the node at `handle`
    fn lock(
        &self,
        context: Option<&NodePin<K, V>>,
        handle: NodeHandle,
        lock_type: LockType,
    ) -> Result<NodePin<K, V>>;

    /// Install `node` as the content of `handle`
    fn update(&self, handle: NodeHandle, node: &Node<K, V>) -> Result<()>;

    /// Release the slot at `handle`
    fn destroy(&self, handle: NodeHandle) -> Result<()>;

    /// Fetch a snapshot of the node at `handle`, if present
    fn try_get_node(&self, handle: NodeHandle) -> Result<Option<Node<K, V>>>;

    /// Durability hook invoked after a completed bulk rebuild
    fn flush(&self) -> Result<()> {
        Ok(())
    }
}
