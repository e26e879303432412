//! Whole-tree bulk rebuild and sorted-batch insertion.

use crate::error::{Error, Result};
use crate::node::{Element, Node};
use crate::ordered::{dedup_sorted, merge_sorted, sorted_items};
use crate::storage::{NodePin, NodeStore, NodeTransaction};
use crate::types::{DuplicateHandling, LockType, NodeHandle};
use serde::{Deserialize, Serialize};
use std::sync::atomic::Ordering;
use tracing::debug;

use super::BPlusTree;

/// Options for [`BPlusTree::bulk_insert_with_options`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BulkInsertOptions {
    /// Skip the pre-sort when the input is already ascending by key.
    pub input_is_sorted: bool,
    /// Flush the storage collaborator once the rebuild has committed.
    pub commit_on_completion: bool,
    /// Discard the existing contents instead of merging with them.
    pub replace_contents: bool,
    /// Resolution for key collisions, within the input and against the
    /// existing contents.
    pub duplicate_handling: DuplicateHandling,
}

impl Default for BulkInsertOptions {
    fn default() -> Self {
        Self {
            input_is_sorted: false,
            commit_on_completion: true,
            replace_contents: false,
            duplicate_handling: DuplicateHandling::RaisesException,
        }
    }
}

/// Half-open key bound constraining how far a leaf fill loop may run.
///
/// During sorted-batch insertion the descent narrows the range at every
/// split and every internal step, so a batch positioned before a boundary
/// never inserts past it.
#[derive(Debug, Clone)]
pub(super) struct KeyRange<K> {
    min: Option<K>,
    max: Option<K>,
}

impl<K: Ord> KeyRange<K> {
    pub(super) fn new() -> Self {
        Self {
            min: None,
            max: None,
        }
    }

    fn set_min_key(&mut self, key: K) {
        self.min = Some(key);
    }

    fn set_max_key(&mut self, key: K) {
        self.max = Some(key);
    }

    fn contains(&self, key: &K) -> bool {
        if let Some(min) = &self.min {
            if key < min {
                return false;
            }
        }
        if let Some(max) = &self.max {
            if key >= max {
                return false;
            }
        }
        true
    }
}

/// Cursor over the sorted items consumed by [`BPlusTree::add_range`].
struct AddRangeBatch<K, V> {
    items: std::vec::IntoIter<(K, V)>,
    current: Option<(K, V)>,
    allow_update: bool,
}

impl<K, V> AddRangeBatch<K, V> {
    fn new(items: Vec<(K, V)>, allow_update: bool) -> Self {
        let mut items = items.into_iter();
        let current = items.next();
        Self {
            items,
            current,
            allow_update,
        }
    }

    fn is_complete(&self) -> bool {
        self.current.is_none()
    }

    fn take(&mut self) -> Result<(K, V)> {
        let item = self
            .current
            .take()
            .ok_or(Error::AssertionFailed("batch cursor exhausted"))?;
        self.current = self.items.next();
        Ok(item)
    }
}

impl<K, V, S> BPlusTree<K, V, S>
where
    K: Ord + Clone,
    V: Clone,
    S: NodeStore<K, V>,
{
    /// Rebuild the tree to include `items`, merged with the existing
    /// contents, with default options.
    pub fn bulk_insert(&self, items: Vec<(K, V)>) -> Result<usize> {
        self.bulk_insert_with_options(items, &BulkInsertOptions::default())
    }

    /// Rebuild the tree bottom-up from `items` and the existing contents.
    ///
    /// New nodes are written to a disjoint set of handles before the live
    /// root is touched; the sentinel's child reference is swapped in one
    /// transaction. Any failure before that swap destroys only the handles
    /// allocated so far and leaves the previous tree intact. Returns the
    /// number of values in the rebuilt tree.
    pub fn bulk_insert_with_options(
        &self,
        items: Vec<(K, V)>,
        options: &BulkInsertOptions,
    ) -> Result<usize> {
        let mut handles: Vec<NodeHandle> = Vec::new();
        match self.bulk_rebuild(&mut handles, items, options) {
            Ok(written) => Ok(written),
            Err(error) => {
                // best-effort cleanup; the triggering error wins
                for handle in handles {
                    let _ = self.storage.destroy(handle);
                }
                Err(error)
            }
        }
    }

    fn bulk_rebuild(
        &self,
        handles: &mut Vec<NodeHandle>,
        items: Vec<(K, V)>,
        options: &BulkInsertOptions,
    ) -> Result<usize> {
        let items = if options.input_is_sorted {
            items
        } else {
            sorted_items(items, options.duplicate_handling)?
        };

        let mut root = self.lock_root(LockType::Insert)?;
        let old_root_handle = root.node().element(0)?.child_handle()?;
        let old_root = self
            .storage
            .lock(Some(&root), old_root_handle, LockType::Insert)?;

        let merged = if old_root.node().count() == 0 || options.replace_contents {
            dedup_sorted(items, options.duplicate_handling)?
        } else {
            let mut existing = Vec::new();
            self.enumerate_contents(&old_root, &mut existing)?;
            merge_sorted(existing, items, options.duplicate_handling)?
        };

        let mut written = 0;
        let Some(new_root) = self.bulk_write(handles, &mut written, merged)? else {
            // nothing to write; the previous tree stands
            return Ok(0);
        };

        {
            let mut txn = NodeTransaction::new(&self.storage);
            txn.begin_update(&mut root)?
                .replace_child(0, old_root_handle, new_root)?;
            txn.commit()?;
        }
        self.count.store(written, Ordering::Release);
        debug!(written, new_root = %new_root, "swapped in rebuilt tree");

        // point of no return: failures past the swap must not destroy the
        // freshly written nodes
        handles.clear();
        self.delete_tree(old_root)?;

        if options.commit_on_completion {
            self.storage.flush()?;
        }
        Ok(written)
    }

    /// Single-pass bottom-up construction: leaves packed to capacity, a
    /// working stack of ancestors whose trailing child is always the most
    /// recently closed node. Returns the handle of the root-to-be, or `None`
    /// for an empty sequence.
    fn bulk_write(
        &self,
        handles: &mut Vec<NodeHandle>,
        written: &mut usize,
        items: Vec<(K, V)>,
    ) -> Result<Option<NodeHandle>> {
        let mut working: Vec<Node<K, V>> = Vec::new();
        let mut items = items.into_iter().peekable();
        let mut last_leaf: Option<Node<K, V>> = None;

        while items.peek().is_some() {
            let handle = self.storage.create()?;
            handles.push(handle);
            let mut leaf = Node::new(handle, self.options.maximum_value_nodes, true);
            while leaf.count() < leaf.size() {
                let Some((key, value)) = items.next() else { break };
                let at = leaf.count();
                leaf.insert(at, Element::value(key, value))?;
                *written += 1;
            }
            leaf.freeze();
            self.storage.update(handle, &leaf)?;

            if items.peek().is_none() && working.is_empty() {
                return Ok(Some(handle));
            }
            let first_key = leaf.element(0)?.key().cloned();
            let top = working.len() as isize - 1;
            self.insert_working(handles, &mut working, top, Element::child(first_key, handle))?;
            last_leaf = Some(leaf);
        }

        let Some(leaf) = last_leaf else {
            return Ok(None);
        };
        if leaf.count() < self.options.minimum_value_nodes {
            // trailing leaf joins the rebalance below
            working.push(leaf.clone_for_write());
        }

        // top up the rightmost edge from each node's left sibling
        for ix in 1..working.len() {
            let (upper, lower) = working.split_at_mut(ix);
            let parent = &mut upper[ix - 1];
            let node = &mut lower[0];
            let leaf_kind = node.is_leaf();
            let limit = self.options.minimum_for(leaf_kind);
            if node.count() >= limit {
                continue;
            }

            let prev_ix = parent.count() - 2;
            let prev_handle = parent.element(prev_ix)?.child_handle()?;
            let mut prev = self
                .storage
                .try_get_node(prev_handle)?
                .ok_or(Error::NodeNotFound(prev_handle))?
                .clone_for_write();

            if !leaf_kind {
                let bound = parent.element(parent.count() - 1)?.key().cloned();
                node.replace_key(0, bound)?;
            }
            while node.count() < limit {
                let item = prev.remove(prev.count() - 1)?;
                if node.count() + 1 == limit {
                    let separator = item.key().cloned();
                    if leaf_kind {
                        node.insert(0, item)?;
                    } else {
                        node.insert(0, Element::child(None, item.child_handle()?))?;
                    }
                    parent.replace_key(parent.count() - 1, separator)?;
                } else {
                    node.insert(0, item)?;
                }
            }
            prev.freeze();
            self.storage.update(prev_handle, &prev)?;
        }

        // persist the working stack, deepest level first
        for node in working.iter_mut().rev() {
            node.freeze();
            self.storage.update(node.handle(), node)?;
        }
        Ok(working.first().map(|node| node.handle()))
    }

    /// Append `child` at the tail of the working node at `index`, closing
    /// full levels and growing new ones above as needed.
    fn insert_working(
        &self,
        handles: &mut Vec<NodeHandle>,
        working: &mut Vec<Node<K, V>>,
        index: isize,
        child: Element<K, V>,
    ) -> Result<()> {
        let mut ix: usize;
        if index < 0 {
            let handle = self.storage.create()?;
            handles.push(handle);
            let mut top = Node::new(handle, self.options.maximum_child_nodes, false);
            if let Some(below) = working.first() {
                top.insert(0, Element::child(None, below.handle()))?;
            }
            working.insert(0, top);
            ix = 0;
        } else {
            ix = index as usize;
        }

        if working[ix].count() == working[ix].size() {
            working[ix].freeze();
            self.storage.update(working[ix].handle(), &working[ix])?;

            let handle = self.storage.create()?;
            handles.push(handle);
            let separator = child.key().cloned();
            let before = working.len();
            self.insert_working(handles, working, ix as isize - 1, Element::child(separator, handle))?;
            if working.len() > before {
                ix += 1;
            }
            working[ix] = Node::new(handle, self.options.maximum_child_nodes, false);
        }

        let node = &mut working[ix];
        if node.count() == 0 {
            node.insert(0, Element::child(None, child.child_handle()?))?;
        } else {
            let at = node.count();
            node.insert(at, child)?;
        }
        Ok(())
    }

    /// Deep-locking in-order traversal: every ancestor on the current path
    /// stays pinned while its subtree is read, so no writer can race the
    /// merge source.
    fn enumerate_contents(&self, pin: &NodePin<K, V>, out: &mut Vec<(K, V)>) -> Result<()> {
        if pin.node().is_leaf() {
            for element in pin.node().elements() {
                let key = element
                    .key()
                    .cloned()
                    .ok_or(Error::AssertionFailed("leaf element missing key"))?;
                out.push((key, element.payload()?.clone()));
            }
            return Ok(());
        }
        for ix in 0..pin.node().count() {
            let handle = pin.node().element(ix)?.child_handle()?;
            let child = self.storage.lock(Some(pin), handle, LockType::Read)?;
            self.enumerate_contents(&child, out)?;
        }
        Ok(())
    }

    /// Destroy a whole subtree, children before parents.
    fn delete_tree(&self, pin: NodePin<K, V>) -> Result<()> {
        let mut children = Vec::new();
        if !pin.node().is_leaf() {
            for ix in 0..pin.node().count() {
                children.push(pin.node().element(ix)?.child_handle()?);
            }
        }
        for handle in children {
            let child = self.storage.lock(Some(&pin), handle, LockType::Delete)?;
            self.delete_tree(child)?;
        }
        let mut txn = NodeTransaction::new(&self.storage);
        txn.destroy(pin);
        txn.commit()
    }

    /// Insert a pre-sortable batch in place, one leaf fill per root descent.
    ///
    /// Cheaper than itemwise insertion for clustered keys while leaving
    /// untouched parts of the tree alone, unlike a full rebuild. With
    /// `allow_update` false a collision with existing contents is a
    /// [`Error::DuplicateKey`]. Returns the number of items applied.
    pub fn add_range(&self, items: Vec<(K, V)>, allow_update: bool) -> Result<usize> {
        let duplicates = if allow_update {
            DuplicateHandling::LastValueWins
        } else {
            DuplicateHandling::RaisesException
        };
        let items = sorted_items(items, duplicates)?;
        let mut batch = AddRangeBatch::new(items, allow_update);
        let mut applied = 0;
        while !batch.is_complete() {
            let root = self.lock_root(LockType::Insert)?;
            let mut range = KeyRange::new();
            applied += self.add_range_at(root, &mut range, &mut batch, None)?;
        }
        Ok(applied)
    }

    fn add_range_at(
        &self,
        pin: NodePin<K, V>,
        range: &mut KeyRange<K>,
        batch: &mut AddRangeBatch<K, V>,
        parent: Option<(NodePin<K, V>, usize)>,
    ) -> Result<usize> {
        let mut pin = pin;
        match parent {
            Some((mut ppin, pordinal)) if pin.node().is_full() => {
                if ppin.node().is_root() {
                    let grown = self.grow_root(pin, &mut ppin, true)?;
                    return self.add_range_at(grown, range, batch, Some((ppin, pordinal)));
                }
                let (prev, next, split_key) = self.split_child(pin, &mut ppin, pordinal, true)?;
                let descend_right = match &batch.current {
                    Some((key, _)) => *key >= split_key,
                    None => false,
                };
                return if descend_right {
                    drop(prev);
                    range.set_min_key(split_key);
                    self.add_range_at(next, range, batch, Some((ppin, pordinal + 1)))
                } else {
                    drop(next);
                    range.set_max_key(split_key);
                    self.add_range_at(prev, range, batch, Some((ppin, pordinal)))
                };
            }
            parent => drop(parent),
        }

        let mut applied = 0;
        if pin.node().is_leaf() {
            let handle = pin.handle();
            let mut txn = NodeTransaction::new(&self.storage);
            let mut inserted = 0;
            {
                let node = txn.begin_update(&mut pin)?;
                loop {
                    if node.count() >= node.size() {
                        break;
                    }
                    let in_range = match &batch.current {
                        Some((key, _)) => range.contains(key),
                        None => false,
                    };
                    if !in_range {
                        break;
                    }
                    let (key, value) = batch.take()?;
                    let (exists, ordinal) = node.search_key(&key);
                    if exists {
                        if !batch.allow_update {
                            return Err(Error::DuplicateKey);
                        }
                        node.set_value(ordinal, &key, value)?;
                        txn.update_value(handle, ordinal);
                    } else {
                        node.insert(ordinal, Element::value(key, value))?;
                        txn.add_value(handle, ordinal);
                        inserted += 1;
                    }
                    applied += 1;
                }
            }
            txn.commit()?;
            if inserted > 0 {
                self.adjust_count(inserted);
            }
            return Ok(applied);
        }

        let ordinal = {
            let Some((key, _)) = &batch.current else {
                return Ok(applied);
            };
            let (_, ordinal) = pin.node().search_key(key);
            ordinal.min(pin.node().count() - 1)
        };
        if ordinal > 0 {
            if let Some(key) = pin.node().element(ordinal - 1)?.key() {
                range.set_min_key(key.clone());
            }
        }
        if ordinal + 1 < pin.node().count() {
            if let Some(key) = pin.node().element(ordinal + 1)?.key() {
                range.set_max_key(key.clone());
            }
        }
        let child_handle = pin.node().element(ordinal)?.child_handle()?;
        let child = self.storage.lock(Some(&pin), child_handle, LockType::Insert)?;
        applied += self.add_range_at(child, range, batch, Some((pin, ordinal)))?;
        Ok(applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemStore;
    use crate::types::TreeOptions;
    use std::sync::atomic::AtomicUsize;

    fn tree() -> BPlusTree<u32, u32> {
        BPlusTree::new(TreeOptions::with_node_sizes(2, 4)).unwrap()
    }

    fn pairs(range: std::ops::Range<u32>) -> Vec<(u32, u32)> {
        range.map(|k| (k, k * 10)).collect()
    }

    /// Wraps a [`MemStore`] and fails node creation once a budget of
    /// successful creates is spent.
    struct FlakyStore {
        inner: MemStore<u32, u32>,
        remaining_creates: AtomicUsize,
    }

    impl FlakyStore {
        fn new(budget: usize) -> Self {
            Self {
                inner: MemStore::new(),
                remaining_creates: AtomicUsize::new(budget),
            }
        }
    }

    impl NodeStore<u32, u32> for FlakyStore {
        fn create(&self) -> Result<NodeHandle> {
            self.remaining_creates
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
                .map_err(|_| Error::storage("injected create failure"))?;
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

        fn destroy(&self, handle: NodeHandle) -> Result<()> {
            self.inner.destroy(handle)
        }

        fn try_get_node(&self, handle: NodeHandle) -> Result<Option<Node<u32, u32>>> {
            self.inner.try_get_node(handle)
        }
    }

    #[test]
    fn test_bulk_insert_matches_itemwise() {
        let bulk = tree();
        let itemwise = tree();
        let mut items = pairs(0..100);
        items.reverse();
        assert_eq!(bulk.bulk_insert(items.clone()).unwrap(), 100);
        for (k, v) in &items {
            itemwise.add(*k, *v).unwrap();
        }
        assert_eq!(bulk.len(), itemwise.len());
        for (k, v) in items {
            assert_eq!(bulk.get(&k).unwrap(), Some(v));
        }
        let stats = bulk.check_integrity().unwrap();
        assert_eq!(stats.value_count, 100);
        assert!(stats.depth > 1);
    }

    #[test]
    fn test_bulk_insert_merges_with_existing() {
        let t = tree();
        for (k, v) in pairs(0..50).into_iter().filter(|(k, _)| k % 2 == 1) {
            t.add(k, v).unwrap();
        }
        let evens: Vec<_> = pairs(0..50).into_iter().filter(|(k, _)| k % 2 == 0).collect();
        assert_eq!(t.bulk_insert(evens).unwrap(), 50);
        assert_eq!(t.len(), 50);
        for (k, v) in pairs(0..50) {
            assert_eq!(t.get(&k).unwrap(), Some(v));
        }
        t.check_integrity().unwrap();
    }

    #[test]
    fn test_bulk_insert_replace_contents() {
        let t = tree();
        for (k, v) in pairs(0..20) {
            t.add(k, v).unwrap();
        }
        let options = BulkInsertOptions {
            replace_contents: true,
            ..BulkInsertOptions::default()
        };
        assert_eq!(t.bulk_insert_with_options(pairs(100..110), &options).unwrap(), 10);
        assert_eq!(t.len(), 10);
        assert_eq!(t.get(&5).unwrap(), None);
        assert_eq!(t.get(&105).unwrap(), Some(1050));
        t.check_integrity().unwrap();
    }

    #[test]
    fn test_bulk_insert_empty_input_is_noop() {
        let t = tree();
        for (k, v) in pairs(0..10) {
            t.add(k, v).unwrap();
        }
        let options = BulkInsertOptions {
            replace_contents: true,
            ..BulkInsertOptions::default()
        };
        assert_eq!(t.bulk_insert_with_options(Vec::new(), &options).unwrap(), 0);
        assert_eq!(t.len(), 10);
        assert_eq!(t.get(&3).unwrap(), Some(30));
    }

    #[test]
    fn test_bulk_insert_duplicate_handling() {
        let t = tree();
        t.add(7, 70).unwrap();
        let err = t.bulk_insert(vec![(7, 700)]).unwrap_err();
        assert!(matches!(err, Error::DuplicateKey));
        assert_eq!(t.get(&7).unwrap(), Some(70));

        let last_wins = BulkInsertOptions {
            duplicate_handling: DuplicateHandling::LastValueWins,
            ..BulkInsertOptions::default()
        };
        assert_eq!(t.bulk_insert_with_options(vec![(7, 700)], &last_wins).unwrap(), 1);
        assert_eq!(t.get(&7).unwrap(), Some(700));

        let first_wins = BulkInsertOptions {
            duplicate_handling: DuplicateHandling::FirstValueWins,
            ..BulkInsertOptions::default()
        };
        assert_eq!(t.bulk_insert_with_options(vec![(7, 7000)], &first_wins).unwrap(), 1);
        assert_eq!(t.get(&7).unwrap(), Some(700));
    }

    #[test]
    fn test_failed_rebuild_leaves_tree_intact() {
        // 2 creates cover the bootstrap sentinel and first leaf; itemwise
        // inserts on a small set need no further nodes
        let store = FlakyStore::new(2);
        let t: BPlusTree<u32, u32, FlakyStore> =
            BPlusTree::with_storage(TreeOptions::with_node_sizes(2, 4), store).unwrap();
        for (k, v) in pairs(0..3) {
            t.add(k, v).unwrap();
        }
        let slots_before = t.storage.inner.len();

        let err = t.bulk_insert(pairs(10..110)).unwrap_err();
        assert!(matches!(err, Error::Storage(_)));

        assert_eq!(t.len(), 3);
        for (k, v) in pairs(0..3) {
            assert_eq!(t.get(&k).unwrap(), Some(v));
        }
        assert_eq!(t.storage.inner.len(), slots_before);
    }

    #[test]
    fn test_add_range_sorted_batch() {
        let t = tree();
        let mut items = pairs(0..64);
        items.reverse();
        assert_eq!(t.add_range(items, false).unwrap(), 64);
        assert_eq!(t.len(), 64);
        for (k, v) in pairs(0..64) {
            assert_eq!(t.get(&k).unwrap(), Some(v));
        }
        t.check_integrity().unwrap();
    }

    #[test]
    fn test_add_range_duplicate_rejected_without_update() {
        let t = tree();
        t.add(5, 50).unwrap();
        let err = t.add_range(vec![(5, 500)], false).unwrap_err();
        assert!(matches!(err, Error::DuplicateKey));
        assert_eq!(t.get(&5).unwrap(), Some(50));

        assert_eq!(t.add_range(vec![(5, 500), (6, 60)], true).unwrap(), 2);
        assert_eq!(t.get(&5).unwrap(), Some(500));
        assert_eq!(t.get(&6).unwrap(), Some(60));
    }

    #[test]
    fn test_add_range_interleaves_with_existing() {
        let t = tree();
        for (k, v) in pairs(0..40).into_iter().step_by(3) {
            t.add(k, v).unwrap();
        }
        let before = t.len();
        let gaps: Vec<_> = pairs(0..40).into_iter().filter(|(k, _)| k % 3 != 0).collect();
        let expected = gaps.len();
        assert_eq!(t.add_range(gaps, false).unwrap(), expected);
        assert_eq!(t.len(), before + expected);
        for (k, v) in pairs(0..40) {
            assert_eq!(t.get(&k).unwrap(), Some(v));
        }
        t.check_integrity().unwrap();
    }

    #[test]
    fn test_bulk_insert_single_leaf() {
        let t = tree();
        assert_eq!(t.bulk_insert(pairs(0..3)).unwrap(), 3);
        assert_eq!(t.depth().unwrap(), 1);
        assert_eq!(t.first().unwrap(), Some((0, 0)));
        assert_eq!(t.last().unwrap(), Some((2, 20)));
        t.check_integrity().unwrap();
    }
}
