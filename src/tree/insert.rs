//! Insert descent with proactive splitting.

use crate::error::{Error, Result};
use crate::node::Element;
use crate::policy::CreateOrUpdateValue;
use crate::storage::{NodePin, NodeStore, NodeTransaction};
use crate::types::{InsertResult, LockType};
use tracing::{debug, trace};

use super::BPlusTree;

impl<K, V, S> BPlusTree<K, V, S>
where
    K: Ord + Clone,
    V: Clone,
    S: NodeStore<K, V>,
{
    /// Insert or update `key` under the given policy.
    ///
    /// The descent never enters a full node: an overflowing node is split
    /// before recursing, comparing `key` to the separator to pick the half to
    /// continue into. The true root grows through the sentinel when it fills.
    pub fn insert_with<P: CreateOrUpdateValue<K, V>>(
        &self,
        key: &K,
        policy: &mut P,
    ) -> Result<InsertResult> {
        let root = self.lock_root(LockType::Insert)?;
        let result = self.insert_at(root, key, policy, None)?;
        if result == InsertResult::Inserted {
            self.adjust_count(1);
        }
        Ok(result)
    }

    fn insert_at<P: CreateOrUpdateValue<K, V>>(
        &self,
        pin: NodePin<K, V>,
        key: &K,
        policy: &mut P,
        parent: Option<(NodePin<K, V>, usize)>,
    ) -> Result<InsertResult> {
        let mut pin = pin;
        match parent {
            Some((mut ppin, pordinal)) if pin.node().is_full() => {
                if ppin.node().is_root() {
                    let grown = self.grow_root(pin, &mut ppin, false)?;
                    return self.insert_at(grown, key, policy, Some((ppin, pordinal)));
                }
                let (prev, next, split_key) = self.split_child(pin, &mut ppin, pordinal, false)?;
                return if *key >= split_key {
                    drop(prev);
                    self.insert_at(next, key, policy, Some((ppin, pordinal + 1)))
                } else {
                    drop(next);
                    self.insert_at(prev, key, policy, Some((ppin, pordinal)))
                };
            }
            parent => drop(parent),
        }

        let (found, ordinal) = pin.node().search_key(key);
        if pin.node().is_leaf() {
            if found {
                let mut value = pin.node().element(ordinal)?.payload()?.clone();
                if policy.update_value(key, &mut value)? {
                    let handle = pin.handle();
                    let mut txn = NodeTransaction::new(&self.storage);
                    txn.begin_update(&mut pin)?.set_value(ordinal, key, value)?;
                    txn.update_value(handle, ordinal);
                    txn.commit()?;
                    return Ok(InsertResult::Updated);
                }
                return Ok(InsertResult::Exists);
            }
            return match policy.create_value(key)? {
                Some(value) => {
                    let handle = pin.handle();
                    let mut txn = NodeTransaction::new(&self.storage);
                    txn.begin_update(&mut pin)?
                        .insert(ordinal, Element::value(key.clone(), value))?;
                    txn.add_value(handle, ordinal);
                    txn.commit()?;
                    Ok(InsertResult::Inserted)
                }
                None => Ok(InsertResult::NotFound),
            };
        }

        let ordinal = ordinal.min(pin.node().count() - 1);
        let child_handle = pin.node().element(ordinal)?.child_handle()?;
        let child = self.storage.lock(Some(&pin), child_handle, LockType::Insert)?;
        self.insert_at(child, key, policy, Some((pin, ordinal)))
    }

    /// Interpose a fresh internal node between the sentinel and the full
    /// true root, then split the old root into it. Returns the new root
    /// pinned; the sentinel pin stays with the caller.
    pub(super) fn grow_root(
        &self,
        pin: NodePin<K, V>,
        parent: &mut NodePin<K, V>,
        left_heavy: bool,
    ) -> Result<NodePin<K, V>> {
        let mut txn = NodeTransaction::new(&self.storage);
        let mut grown = txn.create(parent, false, self.options.maximum_child_nodes)?;
        txn.begin_update(parent)?
            .replace_child(0, pin.handle(), grown.handle())?;
        txn.begin_update(&mut grown)?
            .insert(0, Element::child(None, pin.handle()))?;
        debug!(old_root = %pin.handle(), new_root = %grown.handle(), "grew tree root");
        let (prev, next, _) = self.split_into(&mut txn, pin, &mut grown, 0, left_heavy)?;
        txn.commit()?;
        drop(prev);
        drop(next);
        Ok(grown)
    }

    /// Split the full node at `parent_ix` into two halves inside one
    /// transaction; returns both halves pinned plus the separator key.
    pub(super) fn split_child(
        &self,
        pin: NodePin<K, V>,
        parent: &mut NodePin<K, V>,
        parent_ix: usize,
        left_heavy: bool,
    ) -> Result<(NodePin<K, V>, NodePin<K, V>, K)> {
        let mut txn = NodeTransaction::new(&self.storage);
        let result = self.split_into(&mut txn, pin, parent, parent_ix, left_heavy)?;
        txn.commit()?;
        Ok(result)
    }

    fn split_into(
        &self,
        txn: &mut NodeTransaction<'_, K, V, S>,
        pin: NodePin<K, V>,
        parent: &mut NodePin<K, V>,
        parent_ix: usize,
        left_heavy: bool,
    ) -> Result<(NodePin<K, V>, NodePin<K, V>, K)> {
        let leaf = pin.node().is_leaf();
        let count = pin.node().count();
        let split_at = if left_heavy {
            count - self.options.minimum_for(leaf)
        } else {
            count >> 1
        };
        let split_key = pin
            .node()
            .element(split_at)?
            .key()
            .cloned()
            .ok_or(Error::AssertionFailed("split boundary has no key"))?;

        let size = self.options.size_for(leaf);
        let mut prev = txn.create(parent, leaf, size)?;
        let mut next = txn.create(parent, leaf, size)?;
        {
            let node = txn.begin_update(&mut prev)?;
            for ix in 0..split_at {
                let at = node.count();
                node.insert(at, pin.node().element(ix)?.clone())?;
            }
        }
        {
            let node = txn.begin_update(&mut next)?;
            let mut ix = split_at;
            if !leaf {
                // the separator moves to the parent; its child keeps the
                // unkeyed ordinal-zero slot
                let handle = pin.node().element(ix)?.child_handle()?;
                node.insert(0, Element::child(None, handle))?;
                ix += 1;
            }
            while ix < count {
                let at = node.count();
                node.insert(at, pin.node().element(ix)?.clone())?;
                ix += 1;
            }
        }
        let parent_node = txn.begin_update(parent)?;
        parent_node.replace_child(parent_ix, pin.handle(), prev.handle())?;
        parent_node.insert(
            parent_ix + 1,
            Element::child(Some(split_key.clone()), next.handle()),
        )?;
        trace!(
            split = %pin.handle(),
            prev = %prev.handle(),
            next = %next.handle(),
            left_heavy,
            "split node"
        );
        txn.destroy(pin);
        Ok((prev, next, split_key))
    }
}
