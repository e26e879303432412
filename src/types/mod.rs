//! Common types used throughout the tree engine.

mod handle;

pub use handle::NodeHandle;

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Default minimum elements per node
pub const DEFAULT_MINIMUM_NODES: usize = 8;

/// Default maximum elements per node
pub const DEFAULT_MAXIMUM_NODES: usize = 32;

/// Smallest allowed minimum fill; below this a node cannot lend to a sibling
pub const MIN_FILL: usize = 2;

/// Node size limits and fill thresholds for a tree instance.
///
/// Value nodes are leaves; child nodes are internal routing nodes. The fill
/// threshold controls when two siblings are merged rather than redistributed:
/// siblings whose combined count fits within the threshold collapse into one
/// node.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TreeOptions {
    /// Minimum elements per leaf node (non-root)
    pub minimum_value_nodes: usize,
    /// Maximum elements per leaf node
    pub maximum_value_nodes: usize,
    /// Minimum children per internal node (non-root)
    pub minimum_child_nodes: usize,
    /// Maximum children per internal node
    pub maximum_child_nodes: usize,
    /// Combined-count threshold below which two leaves are merged
    pub fill_value_nodes: usize,
    /// Combined-count threshold below which two internal nodes are merged
    pub fill_child_nodes: usize,
}

impl Default for TreeOptions {
    fn default() -> Self {
        Self::with_node_sizes(DEFAULT_MINIMUM_NODES, DEFAULT_MAXIMUM_NODES)
    }
}

impl TreeOptions {
    /// Create options using the same limits for leaf and internal nodes
    pub fn with_node_sizes(minimum: usize, maximum: usize) -> Self {
        let minimum = minimum.max(MIN_FILL);
        Self {
            minimum_value_nodes: minimum,
            maximum_value_nodes: maximum,
            minimum_child_nodes: minimum,
            maximum_child_nodes: maximum,
            fill_value_nodes: maximum,
            fill_child_nodes: maximum,
        }
    }

    /// Validate the configured limits
    pub fn validate(&self) -> Result<()> {
        for (min, max, what) in [
            (self.minimum_value_nodes, self.maximum_value_nodes, "value"),
            (self.minimum_child_nodes, self.maximum_child_nodes, "child"),
        ] {
            if min < MIN_FILL {
                return Err(Error::invalid_options(format!(
                    "minimum {what} nodes must be at least {MIN_FILL}"
                )));
            }
            if max < min * 2 {
                return Err(Error::invalid_options(format!(
                    "maximum {what} nodes must be at least twice the minimum"
                )));
            }
        }
        Ok(())
    }

    /// Capacity for a node of the given kind
    pub fn size_for(&self, leaf: bool) -> usize {
        if leaf {
            self.maximum_value_nodes
        } else {
            self.maximum_child_nodes
        }
    }

    /// Minimum fill for a node of the given kind
    pub fn minimum_for(&self, leaf: bool) -> usize {
        if leaf {
            self.minimum_value_nodes
        } else {
            self.minimum_child_nodes
        }
    }

    /// Merge threshold for a node of the given kind
    pub fn fill_for(&self, leaf: bool) -> usize {
        if leaf {
            self.fill_value_nodes
        } else {
            self.fill_child_nodes
        }
    }
}

/// Lock modes recognized by the storage collaborator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockType {
    /// Shared read access
    Read,
    /// Exclusive access for a value update in place
    Update,
    /// Exclusive access for insertion and structural changes
    Insert,
    /// Exclusive access for removal and structural changes
    Delete,
}

impl LockType {
    /// Whether this lock mode excludes all other holders
    pub fn is_exclusive(self) -> bool {
        !matches!(self, LockType::Read)
    }
}

/// Outcome of an insert-or-update operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertResult {
    /// The key was absent and the create policy supplied a value
    Inserted,
    /// The key existed and the update policy changed the stored value
    Updated,
    /// The key existed and the update policy declined to change it
    Exists,
    /// The key was absent and the create policy declined to supply a value
    NotFound,
}

/// Outcome of a delete operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveResult {
    /// The key was found and the removal policy accepted it
    Removed,
    /// The key was found but the removal policy declined
    Ignored,
    /// The key was not present
    NotFound,
}

/// Resolution for two equal keys meeting during a sort or merge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DuplicateHandling {
    /// Surface [`crate::Error::DuplicateKey`] to the caller
    RaisesException,
    /// Keep the first occurrence, discard later ones
    FirstValueWins,
    /// Keep the last occurrence, discard earlier ones
    LastValueWins,
}
