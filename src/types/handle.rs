//! Storage handle type.

use std::fmt;

/// Opaque identifier for a node's location in storage.
///
/// Handles are allocated by the storage collaborator and owned by exactly
/// one node at a time. Handle 0 is never allocated and serves as a
/// sentinel for "no node".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct NodeHandle(pub u64);

impl NodeHandle {
    /// Invalid handle, used as a sentinel value
    pub const INVALID: NodeHandle = NodeHandle(0);

    /// Create a new handle from a raw value
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the raw handle value
    pub const fn value(self) -> u64 {
        self.0
    }

    /// Check if this is a valid handle
    pub const fn is_valid(self) -> bool {
        self.0 != 0
    }
}

impl fmt::Display for NodeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Self::INVALID {
            write!(f, "INVALID")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

impl From<u64> for NodeHandle {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl From<NodeHandle> for u64 {
    fn from(id: NodeHandle) -> Self {
        id.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_basics() {
        let h = NodeHandle::new(42);
        assert_eq!(h.value(), 42);
        assert!(h.is_valid());
        assert!(!NodeHandle::INVALID.is_valid());
    }

    #[test]
    fn test_handle_display() {
        assert_eq!(format!("{}", NodeHandle::new(42)), "42");
        assert_eq!(format!("{}", NodeHandle::INVALID), "INVALID");
    }
}
