//! Delete descent with proactive join and root collapse.

use crate::error::{ensure, Error, Result};
use crate::node::{Element, Node};
use crate::policy::RemoveValue;
use crate::storage::{NodePin, NodeStore, NodeTransaction};
use crate::types::{LockType, RemoveResult};
use tracing::{debug, trace};

use super::BPlusTree;

impl<K, V, S> BPlusTree<K, V, S>
where
    K: Ord + Clone,
    V: Clone,
    S: NodeStore<K, V>,
{
    /// Remove `key` under the given policy.
    ///
    /// A node at or below its minimum is joined with a sibling before the
    /// descent passes it, and the delete restarts at the parent: after the
    /// join the key may live in the merged node or a rebuilt sibling. An
    /// internal true root reduced to a single child is collapsed away.
    pub fn delete_with<P: RemoveValue<K, V>>(
        &self,
        key: &K,
        policy: &mut P,
    ) -> Result<RemoveResult> {
        let root = self.lock_root(LockType::Delete)?;
        let result = self.delete_at(root, key, policy, None)?;
        if result == RemoveResult::Removed {
            self.adjust_count(-1);
        }
        Ok(result)
    }

    fn delete_at<P: RemoveValue<K, V>>(
        &self,
        pin: NodePin<K, V>,
        key: &K,
        policy: &mut P,
        parent: Option<(NodePin<K, V>, usize)>,
    ) -> Result<RemoveResult> {
        let mut pin = pin;
        if pin.node().count() == 0 {
            return Ok(RemoveResult::NotFound);
        }

        let minimum = self.options.minimum_for(pin.node().is_leaf());
        match parent {
            Some((mut ppin, pordinal))
                if !ppin.node().is_root() && pin.node().count() <= minimum =>
            {
                if pordinal + 1 < ppin.node().count() {
                    let right_handle = ppin.node().element(pordinal + 1)?.child_handle()?;
                    let right = self.storage.lock(Some(&ppin), right_handle, LockType::Delete)?;
                    self.join(pin, right, false, &mut ppin, pordinal)?;
                } else if pordinal > 0 {
                    let left_handle = ppin.node().element(pordinal - 1)?.child_handle()?;
                    let left = self.storage.lock(Some(&ppin), left_handle, LockType::Delete)?;
                    self.join(left, pin, true, &mut ppin, pordinal - 1)?;
                } else {
                    return Err(Error::AssertionFailed("no sibling available for join"));
                }
                // restart: the joined node or its sibling now holds the key
                return self.delete_at(ppin, key, policy, None);
            }
            Some((mut ppin, _))
                if ppin.node().is_root() && !pin.node().is_leaf() && pin.node().count() == 1 =>
            {
                let child_handle = pin.node().element(0)?.child_handle()?;
                let only_child = self.storage.lock(Some(&pin), child_handle, LockType::Delete)?;
                let mut txn = NodeTransaction::new(&self.storage);
                txn.begin_update(&mut ppin)?
                    .replace_child(0, pin.handle(), only_child.handle())?;
                debug!(demoted = %pin.handle(), promoted = %only_child.handle(), "collapsed tree root");
                txn.destroy(pin);
                txn.commit()?;
                drop(ppin);
                return self.delete_at(only_child, key, policy, None);
            }
            parent => drop(parent),
        }

        let (found, ordinal) = pin.node().search_key(key);
        if pin.node().is_leaf() {
            if !found {
                return Ok(RemoveResult::NotFound);
            }
            if !policy.remove_value(key, pin.node().element(ordinal)?.payload()?) {
                return Ok(RemoveResult::Ignored);
            }
            let handle = pin.handle();
            let mut txn = NodeTransaction::new(&self.storage);
            txn.begin_update(&mut pin)?.remove(ordinal)?;
            txn.remove_value(handle, ordinal);
            txn.commit()?;
            return Ok(RemoveResult::Removed);
        }

        let ordinal = ordinal.min(pin.node().count() - 1);
        let child_handle = pin.node().element(ordinal)?.child_handle()?;
        let child = self.storage.lock(Some(&pin), child_handle, LockType::Delete)?;
        self.delete_at(child, key, policy, Some((pin, ordinal)))
    }

    /// Join two adjacent siblings under their shared parent: merge them into
    /// one node when the combined count fits the fill threshold, otherwise
    /// redistribute with `move_to_bigger` deciding which side rounds up.
    fn join(
        &self,
        small: NodePin<K, V>,
        big: NodePin<K, V>,
        move_to_bigger: bool,
        parent: &mut NodePin<K, V>,
        small_ix: usize,
    ) -> Result<()> {
        let leaf = small.node().is_leaf();
        ensure(big.node().is_leaf() == leaf, "sibling kinds differ in join")?;
        let fill = self.options.fill_for(leaf);
        let minimum = self.options.minimum_for(leaf);
        let size = self.options.size_for(leaf);

        let big_ix = small_ix + 1;
        ensure(
            parent.node().element(small_ix)?.child_handle()? == small.handle(),
            "left sibling ordinal mismatch",
        )?;
        ensure(
            parent.node().element(big_ix)?.child_handle()? == big.handle(),
            "right sibling ordinal mismatch",
        )?;
        let big_zero_key = parent.node().element(big_ix)?.key().cloned();
        let total = small.node().count() + big.node().count();

        let mut txn = NodeTransaction::new(&self.storage);
        txn.begin_update(parent)?;

        if total <= fill || total <= minimum * 2 {
            let mut merged = txn.create(parent, leaf, size)?;
            {
                let node = txn.begin_update(&mut merged)?;
                copy_elements(
                    small.node(),
                    0,
                    small.node().count(),
                    node,
                    small.node().element(0)?.key(),
                )?;
                copy_elements(big.node(), 0, big.node().count(), node, big_zero_key.as_ref())?;
            }
            let parent_node = txn.begin_update(parent)?;
            parent_node.remove(big_ix)?;
            parent_node.replace_child(small_ix, small.handle(), merged.handle())?;
            trace!(
                left = %small.handle(),
                right = %big.handle(),
                merged = %merged.handle(),
                "merged siblings"
            );
            txn.destroy(small);
            txn.destroy(big);
            txn.commit()?;
        } else {
            let borrowing = (total + usize::from(!move_to_bigger)) / 2;
            let break_key = if borrowing < small.node().count() {
                small.node().element(borrowing)?.key().cloned()
            } else {
                big.node()
                    .element(borrowing - small.node().count())?
                    .key()
                    .cloned()
            }
            .ok_or(Error::AssertionFailed("redistribution boundary has no key"))?;

            let mut new_small = txn.create(parent, leaf, size)?;
            let mut new_big = txn.create(parent, leaf, size)?;
            {
                let node = txn.begin_update(&mut new_small)?;
                copy_elements(
                    small.node(),
                    0,
                    borrowing.min(small.node().count()),
                    node,
                    small.node().element(0)?.key(),
                )?;
                copy_elements(
                    big.node(),
                    0,
                    borrowing.saturating_sub(small.node().count()),
                    node,
                    big_zero_key.as_ref(),
                )?;
            }
            {
                let node = txn.begin_update(&mut new_big)?;
                copy_elements(
                    small.node(),
                    borrowing.min(small.node().count()),
                    small.node().count().saturating_sub(borrowing),
                    node,
                    None,
                )?;
                copy_elements(
                    big.node(),
                    borrowing.saturating_sub(small.node().count()),
                    (total - borrowing).min(big.node().count()),
                    node,
                    big_zero_key.as_ref(),
                )?;
            }
            let parent_node = txn.begin_update(parent)?;
            parent_node.replace_child(small_ix, small.handle(), new_small.handle())?;
            parent_node.replace_key(big_ix, Some(break_key))?;
            parent_node.replace_child(big_ix, big.handle(), new_big.handle())?;
            trace!(
                left = %small.handle(),
                right = %big.handle(),
                new_left = %new_small.handle(),
                new_right = %new_big.handle(),
                "redistributed siblings"
            );
            txn.destroy(small);
            txn.destroy(big);
            txn.commit()?;
        }
        Ok(())
    }
}

/// Append `count` elements of `src` starting at `src_index` onto `dest`,
/// re-deriving the unkeyed ordinal-zero convention for internal nodes: the
/// first element landing in an empty `dest` loses its key, and a copied
/// ordinal-zero source element regains its bounding key (`first_src_key`).
fn copy_elements<K: Ord + Clone, V: Clone>(
    src: &Node<K, V>,
    src_index: usize,
    count: usize,
    dest: &mut Node<K, V>,
    first_src_key: Option<&K>,
) -> Result<()> {
    for ix in 0..count {
        let mut item = src.element(src_index + ix)?.clone();
        if !src.is_leaf() {
            if dest.count() == 0 {
                item = Element::child(None, item.child_handle()?);
            } else if src_index + ix == 0 {
                item = Element::child(first_src_key.cloned(), item.child_handle()?);
            }
        }
        let at = dest.count();
        dest.insert(at, item)?;
    }
    Ok(())
}
