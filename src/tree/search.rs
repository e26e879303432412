//! Point and edge lookups.

use crate::error::{Error, Result};
use crate::policy::UpdateValue;
use crate::storage::{NodePin, NodeStore, NodeTransaction};
use crate::types::LockType;

use super::BPlusTree;

impl<K, V, S> BPlusTree<K, V, S>
where
    K: Ord + Clone,
    V: Clone,
    S: NodeStore<K, V>,
{
    /// Look up the value stored under `key`.
    pub fn get(&self, key: &K) -> Result<Option<V>> {
        let root = self.lock_root(LockType::Read)?;
        match self.seek(root, key, LockType::Read)? {
            Some((pin, ordinal)) => Ok(Some(pin.node().element(ordinal)?.payload()?.clone())),
            None => Ok(None),
        }
    }

    /// Smallest key and its value.
    pub fn first(&self) -> Result<Option<(K, V)>> {
        self.seek_to_edge(true)
    }

    /// Largest key and its value.
    pub fn last(&self) -> Result<Option<(K, V)>> {
        self.seek_to_edge(false)
    }

    /// Apply an update policy to the value under `key` in place.
    ///
    /// Returns `true` when the policy reported a change and the new value was
    /// committed; `false` when the key is absent or the policy declined.
    pub fn update_with<P: UpdateValue<K, V>>(&self, key: &K, policy: &mut P) -> Result<bool> {
        let root = self.lock_root(LockType::Update)?;
        let Some((mut pin, ordinal)) = self.seek(root, key, LockType::Update)? else {
            return Ok(false);
        };
        let mut value = pin.node().element(ordinal)?.payload()?.clone();
        if !policy.update_value(key, &mut value) {
            return Ok(false);
        }
        let handle = pin.handle();
        let mut txn = NodeTransaction::new(&self.storage);
        txn.begin_update(&mut pin)?.set_value(ordinal, key, value)?;
        txn.update_value(handle, ordinal);
        txn.commit()?;
        Ok(true)
    }

    /// Sum of leaf counts by full traversal. O(n) diagnostic; the hot path
    /// reads the maintained counter through [`BPlusTree::len`].
    pub fn count_values(&self) -> Result<usize> {
        let root = self.lock_root(LockType::Read)?;
        self.count_under(&root)
    }

    /// Descend from `start` to the leaf ordinal holding `key`, releasing
    /// every pin not returned. Lock coupling: the child is locked before the
    /// parent is dropped.
    pub(super) fn seek(
        &self,
        start: NodePin<K, V>,
        key: &K,
        lock_type: LockType,
    ) -> Result<Option<(NodePin<K, V>, usize)>> {
        let mut pin = start;
        loop {
            let (found, ordinal) = pin.node().search_key(key);
            if pin.node().is_leaf() {
                return Ok(if found { Some((pin, ordinal)) } else { None });
            }
            let child_handle = pin.node().element(ordinal)?.child_handle()?;
            let child = self.storage.lock(Some(&pin), child_handle, lock_type)?;
            pin = child;
        }
    }

    fn seek_to_edge(&self, first: bool) -> Result<Option<(K, V)>> {
        let root = self.lock_root(LockType::Read)?;
        let mut pin = root;
        loop {
            if pin.node().is_leaf() {
                if pin.node().count() == 0 {
                    return Ok(None);
                }
                let ordinal = if first { 0 } else { pin.node().count() - 1 };
                let element = pin.node().element(ordinal)?;
                let key = element
                    .key()
                    .cloned()
                    .ok_or(Error::AssertionFailed("leaf element missing key"))?;
                return Ok(Some((key, element.payload()?.clone())));
            }
            let ordinal = if first { 0 } else { pin.node().count() - 1 };
            let child_handle = pin.node().element(ordinal)?.child_handle()?;
            let child = self.storage.lock(Some(&pin), child_handle, LockType::Read)?;
            pin = child;
        }
    }

    fn count_under(&self, pin: &NodePin<K, V>) -> Result<usize> {
        if pin.node().is_leaf() {
            return Ok(pin.node().count());
        }
        let mut total = 0;
        for ix in 0..pin.node().count() {
            let handle = pin.node().element(ix)?.child_handle()?;
            let child = self.storage.lock(Some(pin), handle, LockType::Read)?;
            total += self.count_under(&child)?;
        }
        Ok(total)
    }
}
