//! In-memory node store.

use crate::error::{Error, Result};
use crate::node::Node;
use crate::storage::{NodePin, NodeStore};
use crate::types::{LockType, NodeHandle};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Node store keeping every node in an in-memory slot map.
///
/// Each slot carries its own reader/writer lock; the slot map lock is held
/// only long enough to resolve a handle, never across a node lock wait.
pub struct MemStore<K, V> {
    slots: RwLock<HashMap<NodeHandle, Arc<RwLock<Node<K, V>>>>>,
    next_handle: AtomicU64,
}

impl<K: Ord + Clone, V: Clone> MemStore<K, V> {
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            slots: RwLock::new(HashMap::new()),
            next_handle: AtomicU64::new(1),
        }
    }

    /// Number of live slots
    pub fn len(&self) -> usize {
        self.slots.read().len()
    }

    /// Whether the store holds no slots
    pub fn is_empty(&self) -> bool {
        self.slots.read().is_empty()
    }

    fn slot(&self, handle: NodeHandle) -> Result<Arc<RwLock<Node<K, V>>>> {
        self.slots
            .read()
            .get(&handle)
            .cloned()
            .ok_or(Error::NodeNotFound(handle))
    }
}

impl<K: Ord + Clone, V: Clone> Default for MemStore<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> NodeStore<K, V> for MemStore<K, V>
where
    K: Ord + Clone + Send + Sync,
    V: Clone + Send + Sync,
{
    fn create(&self) -> Result<NodeHandle> {
        let handle = NodeHandle::new(self.next_handle.fetch_add(1, Ordering::Relaxed));
        let slot = Arc::new(RwLock::new(Node::new(handle, 0, true)));
        self.slots.write().insert(handle, slot);
        Ok(handle)
    }

    fn lock(
        &self,
        _context: Option<&NodePin<K, V>>,
        handle: NodeHandle,
        lock_type: LockType,
    ) -> Result<NodePin<K, V>> {
        let slot = self.slot(handle)?;
        Ok(NodePin::acquire(handle, &slot, lock_type))
    }

    fn update(&self, handle: NodeHandle, node: &Node<K, V>) -> Result<()> {
        let slot = self.slot(handle)?;
        *slot.write() = node.clone();
        Ok(())
    }

    fn destroy(&self, handle: NodeHandle) -> Result<()> {
        self.slots
            .write()
            .remove(&handle)
            .map(|_| ())
            .ok_or(Error::NodeNotFound(handle))
    }

    fn try_get_node(&self, handle: NodeHandle) -> Result<Option<Node<K, V>>> {
        match self.slots.read().get(&handle) {
            Some(slot) => Ok(Some(slot.read().clone())),
            None => Ok(None),
        }
    }
}
