//! In-memory node and element model.
//!
//! A [`Node`] is one page of the tree: an ordered run of [`Element`]s plus a
//! leaf/internal flag, a capacity, and a mutable/read-only state. Leaf
//! elements carry values; internal elements carry child handles. Internal
//! nodes keep an empty (`None`) key at ordinal zero because the leftmost
//! child covers every key below the first real separator.

use crate::error::{Error, Result};
use crate::types::NodeHandle;
use std::cmp::Ordering;

/// Payload of one element: a stored value or a child reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload<V> {
    /// Leaf payload
    Value(V),
    /// Internal payload
    Child(NodeHandle),
}

/// One (key, value) or (key, child) slot within a node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element<K, V> {
    key: Option<K>,
    payload: Payload<V>,
}

impl<K, V> Element<K, V> {
    /// Create a leaf element
    pub fn value(key: K, value: V) -> Self {
        Self {
            key: Some(key),
            payload: Payload::Value(value),
        }
    }

    /// Create an internal element; a `None` key marks the ordinal-zero sentinel
    pub fn child(key: Option<K>, handle: NodeHandle) -> Self {
        Self {
            key,
            payload: Payload::Child(handle),
        }
    }

    /// The element key; `None` only for the internal ordinal-zero sentinel
    pub fn key(&self) -> Option<&K> {
        self.key.as_ref()
    }

    /// Whether this element references a child node
    pub fn is_node(&self) -> bool {
        matches!(self.payload, Payload::Child(_))
    }

    /// The referenced child handle
    pub fn child_handle(&self) -> Result<NodeHandle> {
        match self.payload {
            Payload::Child(handle) => Ok(handle),
            Payload::Value(_) => Err(Error::AssertionFailed("element holds a value, not a child")),
        }
    }

    /// The stored value
    pub fn payload(&self) -> Result<&V> {
        match &self.payload {
            Payload::Value(value) => Ok(value),
            Payload::Child(_) => Err(Error::AssertionFailed("element holds a child, not a value")),
        }
    }
}

/// One page of the tree
#[derive(Debug, Clone)]
pub struct Node<K, V> {
    handle: NodeHandle,
    elements: Vec<Element<K, V>>,
    size: usize,
    leaf: bool,
    root: bool,
    readonly: bool,
}

impl<K: Ord + Clone, V: Clone> Node<K, V> {
    /// Create an empty mutable node with the given capacity
    pub fn new(handle: NodeHandle, size: usize, leaf: bool) -> Self {
        Self {
            handle,
            elements: Vec::with_capacity(size),
            size,
            leaf,
            root: false,
            readonly: false,
        }
    }

    /// Create the sentinel root: a single-slot internal node whose one
    /// element always points at the true tree root
    pub fn new_root(handle: NodeHandle) -> Self {
        Self {
            handle,
            elements: Vec::with_capacity(1),
            size: 1,
            leaf: false,
            root: true,
            readonly: false,
        }
    }

    /// The storage handle owned by this node
    pub fn handle(&self) -> NodeHandle {
        self.handle
    }

    /// Number of elements
    pub fn count(&self) -> usize {
        self.elements.len()
    }

    /// Capacity
    pub fn size(&self) -> usize {
        self.size
    }

    /// Whether the node is at capacity
    pub fn is_full(&self) -> bool {
        self.elements.len() == self.size
    }

    /// Whether this node holds values rather than child references
    pub fn is_leaf(&self) -> bool {
        self.leaf
    }

    /// Whether this is the sentinel root
    pub fn is_root(&self) -> bool {
        self.root
    }

    /// Whether the node has been frozen for persistence
    pub fn is_readonly(&self) -> bool {
        self.readonly
    }

    /// Freeze the node; further mutation must go through clone-and-replace
    pub fn freeze(&mut self) {
        self.readonly = true;
    }

    /// Reopen a frozen node for mutation under a transaction
    pub(crate) fn thaw(&mut self) {
        self.readonly = false;
    }

    /// Mutable copy of a (possibly frozen) node, keeping the same handle
    pub fn clone_for_write(&self) -> Self {
        let mut node = self.clone();
        node.readonly = false;
        node
    }

    /// The element at `ordinal`
    pub fn element(&self, ordinal: usize) -> Result<&Element<K, V>> {
        self.elements
            .get(ordinal)
            .ok_or(Error::AssertionFailed("element ordinal out of range"))
    }

    /// Iterate the elements in key order
    pub fn elements(&self) -> impl Iterator<Item = &Element<K, V>> {
        self.elements.iter()
    }

    /// Binary-search for `key`, returning `(found, ordinal)`.
    ///
    /// On an exact hit the ordinal is the matching element (for internal
    /// nodes: the child covering keys at or above the separator). On a miss
    /// a leaf reports the insertion point, while an internal node reports
    /// the child whose range contains the key, one below the insertion
    /// point, which the `None` sentinel at ordinal zero keeps in range.
    pub fn search_key(&self, key: &K) -> (bool, usize) {
        let result = self.elements.binary_search_by(|e| match e.key() {
            None => Ordering::Less,
            Some(k) => k.cmp(key),
        });
        match result {
            Ok(ordinal) => (true, ordinal),
            Err(ordinal) if self.leaf => (false, ordinal),
            Err(ordinal) => (false, ordinal.saturating_sub(1)),
        }
    }

    fn writable(&self) -> Result<()> {
        if self.readonly {
            Err(Error::ReadOnlyNode(self.handle))
        } else {
            Ok(())
        }
    }

    /// Insert an element at `ordinal`, shifting later elements up
    pub fn insert(&mut self, ordinal: usize, element: Element<K, V>) -> Result<()> {
        self.writable()?;
        if self.elements.len() >= self.size {
            return Err(Error::AssertionFailed("insert into full node"));
        }
        if ordinal > self.elements.len() {
            return Err(Error::AssertionFailed("insert ordinal out of range"));
        }
        self.elements.insert(ordinal, element);
        Ok(())
    }

    /// Remove and return the element at `ordinal`
    pub fn remove(&mut self, ordinal: usize) -> Result<Element<K, V>> {
        self.writable()?;
        if ordinal >= self.elements.len() {
            return Err(Error::AssertionFailed("remove ordinal out of range"));
        }
        Ok(self.elements.remove(ordinal))
    }

    /// Replace the value stored at `ordinal`, which must hold `key`
    pub fn set_value(&mut self, ordinal: usize, key: &K, value: V) -> Result<()> {
        self.writable()?;
        let element = self
            .elements
            .get_mut(ordinal)
            .ok_or(Error::AssertionFailed("set_value ordinal out of range"))?;
        if element.key.as_ref() != Some(key) {
            return Err(Error::AssertionFailed("set_value key mismatch"));
        }
        match &mut element.payload {
            Payload::Value(slot) => {
                *slot = value;
                Ok(())
            }
            Payload::Child(_) => Err(Error::AssertionFailed("set_value on a child element")),
        }
    }

    /// Replace the key at `ordinal`, keeping the payload
    pub fn replace_key(&mut self, ordinal: usize, key: Option<K>) -> Result<()> {
        self.writable()?;
        let element = self
            .elements
            .get_mut(ordinal)
            .ok_or(Error::AssertionFailed("replace_key ordinal out of range"))?;
        element.key = key;
        Ok(())
    }

    /// Swap the child reference at `ordinal` from `old` to `new`
    pub fn replace_child(&mut self, ordinal: usize, old: NodeHandle, new: NodeHandle) -> Result<()> {
        self.writable()?;
        let element = self
            .elements
            .get_mut(ordinal)
            .ok_or(Error::AssertionFailed("replace_child ordinal out of range"))?;
        match &mut element.payload {
            Payload::Child(handle) if *handle == old => {
                *handle = new;
                Ok(())
            }
            Payload::Child(_) => Err(Error::AssertionFailed("replace_child handle mismatch")),
            Payload::Value(_) => Err(Error::AssertionFailed("replace_child on a value element")),
        }
    }
}
