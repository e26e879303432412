//! Node transactions.
//!
//! A [`NodeTransaction`] groups the node mutations performed by one tree
//! operation. Pins enrolled through [`NodeTransaction::begin_update`] snapshot
//! their pre-image and restore it when the transaction is dropped without a
//! commit. Nodes created inside the transaction are released again on
//! rollback, and nodes handed to [`NodeTransaction::destroy`] stay locked
//! until the commit actually removes them from the store.

use crate::error::Result;
use crate::node::Node;
use crate::storage::{NodePin, NodeStore};
use crate::types::{LockType, NodeHandle};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::trace;

/// Shared commit flag observed by every pin enrolled in a transaction.
#[derive(Default)]
pub(crate) struct TxnToken {
    pub(crate) committed: AtomicBool,
}

/// A unit of node mutations that commits or rolls back as a whole.
pub struct NodeTransaction<'a, K, V, S: NodeStore<K, V>> {
    storage: &'a S,
    token: Arc<TxnToken>,
    created: Vec<NodeHandle>,
    destroyed: Vec<NodePin<K, V>>,
}

impl<'a, K, V, S> NodeTransaction<'a, K, V, S>
where
    K: Ord + Clone,
    V: Clone,
    S: NodeStore<K, V>,
{
    pub fn new(storage: &'a S) -> Self {
        Self {
            storage,
            token: Arc::new(TxnToken::default()),
            created: Vec::new(),
            destroyed: Vec::new(),
        }
    }

    /// Enroll a pinned node for mutation and return its writable view.
    ///
    /// The first enrollment of a pin snapshots the node so an uncommitted
    /// drop restores it. Re-enrolling the same pin is a no-op.
    pub fn begin_update<'p>(&mut self, pin: &'p mut NodePin<K, V>) -> Result<&'p mut Node<K, V>> {
        pin.join_txn(self.token.clone())?;
        pin.node_mut()
    }

    /// Allocate a fresh node and return it pinned for exclusive use.
    ///
    /// The handle is reclaimed if the transaction rolls back.
    pub fn create(
        &mut self,
        context: &NodePin<K, V>,
        leaf: bool,
        size: usize,
    ) -> Result<NodePin<K, V>> {
        let handle = self.storage.create()?;
        self.created.push(handle);
        let mut pin = self.storage.lock(Some(context), handle, LockType::Insert)?;
        pin.attach_created(self.token.clone());
        *pin.node_mut()? = Node::new(handle, size, leaf);
        trace!(%handle, leaf, size, "created node");
        Ok(pin)
    }

    /// Schedule a pinned node for destruction at commit.
    ///
    /// The pin is retained so the node stays locked until the transaction
    /// resolves; rollback simply releases it unchanged.
    pub fn destroy(&mut self, pin: NodePin<K, V>) {
        trace!(handle = %pin.handle(), "destroying node");
        self.destroyed.push(pin);
    }

    pub fn add_value(&self, handle: NodeHandle, ordinal: usize) {
        trace!(%handle, ordinal, "add value");
    }

    pub fn update_value(&self, handle: NodeHandle, ordinal: usize) {
        trace!(%handle, ordinal, "update value");
    }

    pub fn remove_value(&self, handle: NodeHandle, ordinal: usize) {
        trace!(%handle, ordinal, "remove value");
    }

    /// Make every mutation in this transaction permanent.
    ///
    /// The token flip is the commit point: from then on enrolled pins keep
    /// their new contents and created handles are permanent. Storage
    /// destroys run after the flip, so a failing destroy strands an orphan
    /// slot instead of rolling live nodes back to pre-images that still
    /// reference removed siblings.
    pub fn commit(mut self) -> Result<()> {
        self.token.committed.store(true, Ordering::Release);
        self.created.clear();
        while let Some(pin) = self.destroyed.pop() {
            let handle = pin.handle();
            self.storage.destroy(handle)?;
            drop(pin);
        }
        Ok(())
    }
}

impl<K, V, S: NodeStore<K, V>> Drop for NodeTransaction<'_, K, V, S> {
    fn drop(&mut self) {
        if self.token.committed.load(Ordering::Acquire) {
            return;
        }
        // Rollback: pins restore themselves on drop; reclaim created handles.
        self.destroyed.clear();
        for handle in self.created.drain(..) {
            let _ = self.storage.destroy(handle);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::Element;
    use crate::storage::MemStore;

    fn seeded_store() -> (MemStore<u32, u32>, NodeHandle) {
        let store = MemStore::new();
        let handle = store.create().unwrap();
        let mut node = Node::new(handle, 4, true);
        node.insert(0, Element::value(1, 10)).unwrap();
        node.insert(1, Element::value(2, 20)).unwrap();
        node.freeze();
        store.update(handle, &node).unwrap();
        (store, handle)
    }

    #[test]
    fn test_commit_makes_update_durable() {
        let (store, handle) = seeded_store();
        {
            let mut pin = store.lock(None, handle, LockType::Update).unwrap();
            let mut txn = NodeTransaction::new(&store);
            let node = txn.begin_update(&mut pin).unwrap();
            node.set_value(0, &1, 99).unwrap();
            txn.commit().unwrap();
        }
        let node = store.try_get_node(handle).unwrap().unwrap();
        assert_eq!(*node.element(0).unwrap().payload().unwrap(), 99);
    }

    #[test]
    fn test_rollback_restores_node() {
        let (store, handle) = seeded_store();
        {
            let mut pin = store.lock(None, handle, LockType::Update).unwrap();
            let mut txn = NodeTransaction::new(&store);
            let node = txn.begin_update(&mut pin).unwrap();
            node.set_value(0, &1, 99).unwrap();
            node.remove(1).unwrap();
            // txn dropped without commit
            drop(txn);
        }
        let node = store.try_get_node(handle).unwrap().unwrap();
        assert_eq!(node.count(), 2);
        assert_eq!(*node.element(0).unwrap().payload().unwrap(), 10);
        assert!(node.is_readonly());
    }

    #[test]
    fn test_rollback_reclaims_created_nodes() {
        let (store, handle) = seeded_store();
        {
            let mut pin = store.lock(None, handle, LockType::Insert).unwrap();
            let mut txn = NodeTransaction::new(&store);
            txn.begin_update(&mut pin).unwrap();
            let fresh = txn.create(&pin, true, 4).unwrap();
            assert_eq!(store.len(), 2);
            drop(fresh);
            drop(txn);
        }
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_destroy_applies_only_at_commit() {
        let (store, handle) = seeded_store();
        let doomed = store.create().unwrap();
        assert_eq!(store.len(), 2);
        {
            let mut pin = store.lock(None, handle, LockType::Delete).unwrap();
            let doomed_pin = store.lock(Some(&pin), doomed, LockType::Delete).unwrap();
            let mut txn = NodeTransaction::new(&store);
            txn.begin_update(&mut pin).unwrap();
            txn.destroy(doomed_pin);
            assert_eq!(store.len(), 2);
            txn.commit().unwrap();
        }
        assert_eq!(store.len(), 1);
        assert!(store.try_get_node(doomed).unwrap().is_none());
    }

    /// Delegates to a [`MemStore`] but refuses every slot release.
    struct StuckSlotStore {
        inner: MemStore<u32, u32>,
    }

    impl NodeStore<u32, u32> for StuckSlotStore {
        fn create(&self) -> Result<NodeHandle> {
            self.inner.create()
        }

        fn lock(
            &self,
            context: Option<&NodePin<u32, u32>>,
            handle: NodeHandle,
            lock_type: LockType,
        ) -> Result<NodePin<u32, u32>> {
            self.inner.lock(context, handle, lock_type)
        }

        fn update(&self, handle: NodeHandle, node: &Node<u32, u32>) -> Result<()> {
            self.inner.update(handle, node)
        }

        fn destroy(&self, _handle: NodeHandle) -> Result<()> {
            Err(crate::error::Error::storage("injected destroy failure"))
        }

        fn try_get_node(&self, handle: NodeHandle) -> Result<Option<Node<u32, u32>>> {
            self.inner.try_get_node(handle)
        }
    }

    #[test]
    fn test_failed_destroy_does_not_roll_back_commit() {
        let store = StuckSlotStore {
            inner: MemStore::new(),
        };
        let handle = store.create().unwrap();
        let doomed = store.create().unwrap();
        {
            let mut node = Node::new(handle, 4, true);
            node.insert(0, Element::value(1, 10)).unwrap();
            node.freeze();
            store.update(handle, &node).unwrap();
        }
        {
            let mut pin = store.lock(None, handle, LockType::Delete).unwrap();
            let doomed_pin = store.lock(Some(&pin), doomed, LockType::Delete).unwrap();
            let mut txn = NodeTransaction::new(&store);
            let node = txn.begin_update(&mut pin).unwrap();
            node.set_value(0, &1, 99).unwrap();
            txn.destroy(doomed_pin);
            assert!(txn.commit().is_err());
        }
        // The mutation survived the failed release; the doomed slot leaks.
        let node = store.inner.try_get_node(handle).unwrap().unwrap();
        assert_eq!(*node.element(0).unwrap().payload().unwrap(), 99);
        assert_eq!(store.inner.len(), 2);
    }

    #[test]
    fn test_rollback_of_destroy_keeps_node() {
        let (store, handle) = seeded_store();
        let doomed = store.create().unwrap();
        {
            let pin = store.lock(None, handle, LockType::Delete).unwrap();
            let doomed_pin = store.lock(Some(&pin), doomed, LockType::Delete).unwrap();
            let mut txn = NodeTransaction::new(&store);
            txn.destroy(doomed_pin);
            drop(txn);
        }
        assert_eq!(store.len(), 2);
    }
}
