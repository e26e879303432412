//! Lock-scoped node handles.

use crate::error::{Error, Result};
use crate::node::Node;
use crate::storage::txn::TxnToken;
use crate::types::{LockType, NodeHandle};
use parking_lot::{ArcRwLockReadGuard, ArcRwLockWriteGuard, RawRwLock, RwLock};
use std::sync::atomic::Ordering;
use std::sync::Arc;

enum PinGuard<K, V> {
    Read(ArcRwLockReadGuard<RawRwLock, Node<K, V>>),
    Write(ArcRwLockWriteGuard<RawRwLock, Node<K, V>>),
}

/// An owned, lock-scoped reference to a node.
///
/// Whoever holds the pin owns releasing it, exactly once, by dropping it;
/// pins passed into recursive calls transfer that ownership to the callee.
/// A pin joined to a transaction keeps the node's pre-image and writes it
/// back on drop if the transaction never committed, so an error unwinding
/// through the engine leaves every participating node unchanged.
pub struct NodePin<K, V> {
    handle: NodeHandle,
    lock_type: LockType,
    guard: PinGuard<K, V>,
    dirty: bool,
    undo: Option<Box<Node<K, V>>>,
    txn: Option<Arc<TxnToken>>,
}

impl<K: Ord + Clone, V: Clone> NodePin<K, V> {
    /// Acquire a pin on a storage slot, blocking until the lock is granted
    pub fn acquire(handle: NodeHandle, slot: &Arc<RwLock<Node<K, V>>>, lock_type: LockType) -> Self {
        let guard = if lock_type.is_exclusive() {
            PinGuard::Write(slot.write_arc())
        } else {
            PinGuard::Read(slot.read_arc())
        };
        Self {
            handle,
            lock_type,
            guard,
            dirty: false,
            undo: None,
            txn: None,
        }
    }

    /// The storage handle this pin covers
    pub fn handle(&self) -> NodeHandle {
        self.handle
    }

    /// The lock mode held
    pub fn lock_type(&self) -> LockType {
        self.lock_type
    }

    /// Read access to the pinned node
    pub fn node(&self) -> &Node<K, V> {
        match &self.guard {
            PinGuard::Read(guard) => guard,
            PinGuard::Write(guard) => guard,
        }
    }

    /// Mutable access to the pinned node.
    ///
    /// Only available while a transaction has joined the pin for update
    /// (or created the node); anything else is an engine bug.
    pub fn node_mut(&mut self) -> Result<&mut Node<K, V>> {
        if !self.dirty {
            return Err(Error::AssertionFailed("node not pinned for update"));
        }
        match &mut self.guard {
            PinGuard::Write(guard) => Ok(guard),
            PinGuard::Read(_) => Err(Error::AssertionFailed("mutation through a read pin")),
        }
    }

    /// Record the pre-image and mark the pin updatable under `token`.
    /// Frozen nodes are thawed in place; the handle survives, only the
    /// content is replaced, the clone-for-write path.
    pub(crate) fn join_txn(&mut self, token: Arc<TxnToken>) -> Result<()> {
        match &mut self.guard {
            PinGuard::Write(guard) => {
                let rejoining = self
                    .txn
                    .as_ref()
                    .is_some_and(|current| Arc::ptr_eq(current, &token));
                if !rejoining {
                    self.undo = Some(Box::new((**guard).clone()));
                    self.txn = Some(token);
                }
                if guard.is_readonly() {
                    guard.thaw();
                }
                self.dirty = true;
                Ok(())
            }
            PinGuard::Read(_) => Err(Error::AssertionFailed("begin_update on a read pin")),
        }
    }

    /// Mark a freshly created node writable under `token`; there is no
    /// pre-image, rollback destroys the handle instead.
    pub(crate) fn attach_created(&mut self, token: Arc<TxnToken>) {
        self.dirty = true;
        self.undo = None;
        self.txn = Some(token);
    }
}

impl<K, V> Drop for NodePin<K, V> {
    fn drop(&mut self) {
        if let Some(token) = &self.txn {
            if !token.committed.load(Ordering::Acquire) {
                if let (Some(undo), PinGuard::Write(guard)) = (self.undo.take(), &mut self.guard) {
                    **guard = *undo;
                }
            }
        }
    }
}
