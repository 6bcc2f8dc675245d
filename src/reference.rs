use std::fmt::{Display, Formatter};

/// Handle to an expression node stored in an [`ExprGraph`][crate::graph::ExprGraph].
///
/// A handle is just the index of the node's slot. It does not own the node: ownership is
/// tracked by the node's reference count, which is changed explicitly via
/// [`capture`][crate::graph::ExprGraph::capture] and [`release`][crate::graph::ExprGraph::release].
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct ExprRef(u32);

impl ExprRef {
    pub const fn new(index: u32) -> Self {
        Self(index)
    }

    /// Return the internal representation of the reference.
    pub const fn get(self) -> u32 {
        self.0
    }

    /// Return the slot index of the reference.
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl Display for ExprRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "@{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(ExprRef::new(42).to_string(), "@42");
    }

    #[test]
    fn test_index() {
        let e = ExprRef::new(7);
        assert_eq!(e.get(), 7);
        assert_eq!(e.index(), 7);
    }
}
