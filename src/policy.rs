//! Per-call mutation policies.
//!
//! Every mutating tree operation is generic over a small capability contract
//! decided by the caller: whether a missing key is created, whether an
//! existing value may be replaced, and whether a matched value is actually
//! removed. The concrete policies here back the convenience methods on
//! [`BPlusTree`](crate::tree::BPlusTree); callers with richer needs supply
//! their own implementation or a closure.

use crate::error::{Error, Result};
use crate::types::DuplicateHandling;

/// Insert-or-update capability used by the insert descent.
pub trait CreateOrUpdateValue<K, V> {
    /// Produce the value to store for an absent `key`, or `None` to decline.
    fn create_value(&mut self, key: &K) -> Result<Option<V>>;

    /// Revise the stored value for an existing `key`; return `true` only if
    /// the value changed and must be rewritten.
    fn update_value(&mut self, key: &K, value: &mut V) -> Result<bool>;
}

/// Update-only capability used by the seek-and-update path.
pub trait UpdateValue<K, V> {
    /// Revise the stored value in place; return `true` if it changed.
    fn update_value(&mut self, key: &K, value: &mut V) -> bool;
}

impl<K, V, F> UpdateValue<K, V> for F
where
    F: FnMut(&K, &mut V) -> bool,
{
    fn update_value(&mut self, key: &K, value: &mut V) -> bool {
        self(key, value)
    }
}

/// Removal capability consulted when the delete descent reaches a match.
pub trait RemoveValue<K, V> {
    /// Return `true` to remove the matched element, `false` to leave it.
    fn remove_value(&mut self, key: &K, value: &V) -> bool;
}

impl<K, V, F> RemoveValue<K, V> for F
where
    F: FnMut(&K, &V) -> bool,
{
    fn remove_value(&mut self, key: &K, value: &V) -> bool {
        self(key, value)
    }
}

/// Stores a fixed value, resolving key collisions by `duplicates`:
/// raise, keep the existing value, or overwrite it.
pub struct InsertValue<V> {
    value: V,
    duplicates: DuplicateHandling,
}

impl<V> InsertValue<V> {
    pub fn new(value: V, duplicates: DuplicateHandling) -> Self {
        Self { value, duplicates }
    }
}

impl<K, V: Clone + PartialEq> CreateOrUpdateValue<K, V> for InsertValue<V> {
    fn create_value(&mut self, _key: &K) -> Result<Option<V>> {
        Ok(Some(self.value.clone()))
    }

    fn update_value(&mut self, _key: &K, value: &mut V) -> Result<bool> {
        match self.duplicates {
            DuplicateHandling::RaisesException => Err(Error::DuplicateKey),
            DuplicateHandling::FirstValueWins => Ok(false),
            DuplicateHandling::LastValueWins => {
                if *value == self.value {
                    Ok(false)
                } else {
                    *value = self.value.clone();
                    Ok(true)
                }
            }
        }
    }
}

/// Get-or-add: stores the given value when the key is absent, otherwise
/// captures the value already present.
pub struct FetchValue<V> {
    value: V,
    existing: Option<V>,
}

impl<V: Clone> FetchValue<V> {
    pub fn new(value: V) -> Self {
        Self {
            value,
            existing: None,
        }
    }

    /// The stored value after the operation: the pre-existing one if the key
    /// was present, otherwise the value that was inserted.
    pub fn into_value(self) -> V {
        self.existing.unwrap_or(self.value)
    }
}

impl<K, V: Clone> CreateOrUpdateValue<K, V> for FetchValue<V> {
    fn create_value(&mut self, _key: &K) -> Result<Option<V>> {
        Ok(Some(self.value.clone()))
    }

    fn update_value(&mut self, _key: &K, value: &mut V) -> Result<bool> {
        self.existing = Some(value.clone());
        Ok(false)
    }
}

/// Factory plus optional updater. Without an updater a key collision is a
/// duplicate-key error.
pub struct CreateOrUpdate<CF, UF> {
    create: CF,
    update: Option<UF>,
}

impl<CF, UF> CreateOrUpdate<CF, UF> {
    pub fn new(create: CF, update: Option<UF>) -> Self {
        Self { create, update }
    }
}

impl<K, V, CF, UF> CreateOrUpdateValue<K, V> for CreateOrUpdate<CF, UF>
where
    CF: FnMut(&K) -> V,
    UF: FnMut(&K, &mut V) -> bool,
{
    fn create_value(&mut self, key: &K) -> Result<Option<V>> {
        Ok(Some((self.create)(key)))
    }

    fn update_value(&mut self, key: &K, value: &mut V) -> Result<bool> {
        match self.update.as_mut() {
            Some(update) => Ok(update(key, value)),
            None => Err(Error::DuplicateKey),
        }
    }
}

/// Compare-and-replace: the stored value is replaced only when it equals the
/// expected value.
pub struct UpdateIfValue<V> {
    expected: V,
    replacement: V,
}

impl<V> UpdateIfValue<V> {
    pub fn new(replacement: V, expected: V) -> Self {
        Self {
            expected,
            replacement,
        }
    }
}

impl<K, V: Clone + PartialEq> UpdateValue<K, V> for UpdateIfValue<V> {
    fn update_value(&mut self, _key: &K, value: &mut V) -> bool {
        if *value != self.expected {
            return false;
        }
        *value = self.replacement.clone();
        true
    }
}

/// Unconditional removal that captures the removed value.
#[derive(Default)]
pub struct RemoveAlways<V> {
    removed: Option<V>,
}

impl<V> RemoveAlways<V> {
    pub fn new() -> Self {
        Self { removed: None }
    }

    pub fn into_removed(self) -> Option<V> {
        self.removed
    }
}

impl<K, V: Clone> RemoveValue<K, V> for RemoveAlways<V> {
    fn remove_value(&mut self, _key: &K, value: &V) -> bool {
        self.removed = Some(value.clone());
        true
    }
}

/// Removes only when the stored value equals the expected one.
pub struct RemoveIfValue<V> {
    expected: V,
}

impl<V> RemoveIfValue<V> {
    pub fn new(expected: V) -> Self {
        Self { expected }
    }
}

impl<K, V: PartialEq> RemoveValue<K, V> for RemoveIfValue<V> {
    fn remove_value(&mut self, _key: &K, value: &V) -> bool {
        *value == self.expected
    }
}
