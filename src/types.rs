//! Small value types shared across the engine.
//!
//! Newtype wrappers keep variable identities apart from node handles and plain integers,
//! and the analysis enums describe the results of curvature and monotonicity detection.

use std::fmt;

/// A problem variable, identified by its index in the host's variable storage.
///
/// Expressions never own variables: a variable node only refers to one, and everything
/// the engine needs to know about it (bounds, integrality) is obtained through
/// [`VarDomains`][crate::domain::VarDomains] or a leaf callback.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Var(u32);

impl Var {
    /// Creates a new variable with the given index.
    pub const fn new(id: u32) -> Self {
        Var(id)
    }

    /// Returns the raw variable index.
    pub const fn id(self) -> u32 {
        self.0
    }
}

impl fmt::Display for Var {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "x{}", self.0)
    }
}

impl From<Var> for u32 {
    fn from(var: Var) -> Self {
        var.0
    }
}

impl From<u32> for Var {
    fn from(id: u32) -> Self {
        Var(id)
    }
}

/// Curvature of an expression as a function of the variables below it.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Default)]
pub enum Curvature {
    #[default]
    Unknown,
    Convex,
    Concave,
    /// Both convex and concave.
    Linear,
}

impl Curvature {
    pub fn is_convex(self) -> bool {
        matches!(self, Curvature::Convex | Curvature::Linear)
    }

    pub fn is_concave(self) -> bool {
        matches!(self, Curvature::Concave | Curvature::Linear)
    }

    /// Curvature that holds for both `self` and `other`.
    pub fn meet(self, other: Curvature) -> Curvature {
        match (self.is_convex() && other.is_convex(), self.is_concave() && other.is_concave()) {
            (true, true) => Curvature::Linear,
            (true, false) => Curvature::Convex,
            (false, true) => Curvature::Concave,
            (false, false) => Curvature::Unknown,
        }
    }

    pub fn negate(self) -> Curvature {
        match self {
            Curvature::Convex => Curvature::Concave,
            Curvature::Concave => Curvature::Convex,
            c => c,
        }
    }

    /// Curvature of `coef * f` where `f` has curvature `self`.
    pub fn scale(self, coef: f64) -> Curvature {
        if coef == 0.0 {
            Curvature::Linear
        } else if coef > 0.0 {
            self
        } else {
            self.negate()
        }
    }
}

impl fmt::Display for Curvature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Curvature::Unknown => "unknown",
            Curvature::Convex => "convex",
            Curvature::Concave => "concave",
            Curvature::Linear => "linear",
        };
        write!(f, "{}", s)
    }
}

/// Monotonicity of an expression in one of its children.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Default)]
pub enum Monotonicity {
    #[default]
    Unknown,
    Increasing,
    Decreasing,
    Constant,
}

impl Monotonicity {
    pub fn negate(self) -> Monotonicity {
        match self {
            Monotonicity::Increasing => Monotonicity::Decreasing,
            Monotonicity::Decreasing => Monotonicity::Increasing,
            m => m,
        }
    }
}

/// Source of validity tags for cached node values.
///
/// Each query kind (evaluation, differentiation, propagation box) uses its own counter.
/// Tag `0` is never issued, so a node whose tag is `0` has no valid cache.
#[derive(Debug, Default, Clone)]
pub struct TagCounter {
    last: u64,
}

impl TagCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue a fresh tag, strictly greater than every tag issued before.
    pub fn next(&mut self) -> u64 {
        self.last += 1;
        self.last
    }

    /// The most recently issued tag (`0` if none).
    pub fn current(&self) -> u64 {
        self.last
    }
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;

    #[test]
    fn test_var_creation() {
        let v0 = Var::new(0);
        let v1 = Var::new(1);
        assert_eq!(v0.id(), 0);
        assert_eq!(v1.id(), 1);
        assert!(v0 < v1);
        assert_eq!(v1.to_string(), "x1");
    }

    #[test]
    fn test_curvature_meet() {
        use Curvature::*;
        assert_eq!(Linear.meet(Convex), Convex);
        assert_eq!(Linear.meet(Linear), Linear);
        assert_eq!(Convex.meet(Concave), Unknown);
        assert_eq!(Concave.meet(Concave), Concave);
        assert_eq!(Unknown.meet(Linear), Unknown);
    }

    #[test]
    fn test_curvature_scale() {
        assert_eq!(Curvature::Convex.scale(2.0), Curvature::Convex);
        assert_eq!(Curvature::Convex.scale(-1.0), Curvature::Concave);
        assert_eq!(Curvature::Unknown.scale(0.0), Curvature::Linear);
    }

    #[test]
    fn test_tag_counter() {
        let mut tags = TagCounter::new();
        assert_eq!(tags.current(), 0);
        let a = tags.next();
        let b = tags.next();
        assert!(a > 0);
        assert!(b > a);
        assert_eq!(tags.current(), b);
    }
}
