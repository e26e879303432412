//! Ordering source for bulk load.
//!
//! Bulk rebuild consumes one ascending, duplicate-resolved sequence. The
//! helpers here impose that shape on arbitrary input and merge two already
//! sorted sequences under a [`DuplicateHandling`] policy.

use crate::error::{Error, Result};
use crate::types::DuplicateHandling;

/// Stable-sort `items` by key and resolve adjacent duplicates.
///
/// The stable sort preserves input order among equal keys, so
/// `FirstValueWins` keeps the earliest occurrence and `LastValueWins` the
/// latest.
pub fn sorted_items<K: Ord, V>(
    mut items: Vec<(K, V)>,
    duplicates: DuplicateHandling,
) -> Result<Vec<(K, V)>> {
    items.sort_by(|a, b| a.0.cmp(&b.0));
    dedup_sorted(items, duplicates)
}

/// Resolve adjacent duplicate keys in an already-sorted sequence.
pub fn dedup_sorted<K: Ord, V, I>(items: I, duplicates: DuplicateHandling) -> Result<Vec<(K, V)>>
where
    I: IntoIterator<Item = (K, V)>,
{
    let mut out: Vec<(K, V)> = Vec::new();
    for item in items {
        match out.last_mut() {
            Some(last) if last.0 == item.0 => match duplicates {
                DuplicateHandling::RaisesException => return Err(Error::DuplicateKey),
                DuplicateHandling::FirstValueWins => {}
                DuplicateHandling::LastValueWins => last.1 = item.1,
            },
            _ => out.push(item),
        }
    }
    Ok(out)
}

/// Merge two sorted sequences into one, resolving cross-sequence key
/// collisions.
///
/// On a collision `FirstValueWins` keeps the item from `first` and
/// `LastValueWins` the item from `second`; both inputs are assumed
/// individually duplicate-free.
pub fn merge_sorted<K: Ord, V, A, B>(
    first: A,
    second: B,
    duplicates: DuplicateHandling,
) -> Result<Vec<(K, V)>>
where
    A: IntoIterator<Item = (K, V)>,
    B: IntoIterator<Item = (K, V)>,
{
    let mut a = first.into_iter().peekable();
    let mut b = second.into_iter().peekable();
    let mut out = Vec::new();
    loop {
        let take_a = match (a.peek(), b.peek()) {
            (Some(x), Some(y)) => match x.0.cmp(&y.0) {
                std::cmp::Ordering::Less => true,
                std::cmp::Ordering::Greater => false,
                std::cmp::Ordering::Equal => match duplicates {
                    DuplicateHandling::RaisesException => return Err(Error::DuplicateKey),
                    DuplicateHandling::FirstValueWins => {
                        b.next();
                        true
                    }
                    DuplicateHandling::LastValueWins => {
                        a.next();
                        false
                    }
                },
            },
            (Some(_), None) => true,
            (None, Some(_)) => false,
            (None, None) => return Ok(out),
        };
        let item = if take_a { a.next() } else { b.next() };
        if let Some(item) = item {
            out.push(item);
        }
    }
}
