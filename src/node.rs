use std::any::Any;
use std::fmt;
use std::rc::Rc;

use crate::handler::HandlerId;
use crate::interval::Interval;
use crate::nlhdlr::NlhdlrId;
use crate::reference::ExprRef;
use crate::types::{Curvature, Monotonicity, Var};

/// Operator-specific payload of a node.
#[derive(Clone)]
pub enum ExprData {
    None,
    Value(f64),
    Var(Var),
    /// `constant + sum(coefs[i] * children[i])`
    Sum { coefs: Vec<f64>, constant: f64 },
    /// `coef * prod(children[i])`
    Product { coef: f64 },
    /// `children[0] ^ exponent`
    Pow { exponent: f64 },
    /// Payload of a handler registered outside this crate.
    Custom(Rc<dyn Any>),
}

impl fmt::Debug for ExprData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExprData::None => write!(f, "None"),
            ExprData::Value(v) => f.debug_tuple("Value").field(v).finish(),
            ExprData::Var(v) => f.debug_tuple("Var").field(v).finish(),
            ExprData::Sum { coefs, constant } => f
                .debug_struct("Sum")
                .field("coefs", coefs)
                .field("constant", constant)
                .finish(),
            ExprData::Product { coef } => f.debug_struct("Product").field("coef", coef).finish(),
            ExprData::Pow { exponent } => f.debug_struct("Pow").field("exponent", exponent).finish(),
            ExprData::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}

/// A nonlinear handler bound to a node for enforcement.
#[derive(Clone)]
pub struct Enforcement {
    pub nlhdlr: NlhdlrId,
    /// Handler-private data returned by detection.
    pub data: Rc<dyn Any>,
    /// The handler enforces `expr >= aux`.
    pub below: bool,
    /// The handler enforces `expr <= aux`.
    pub above: bool,
}

impl fmt::Debug for Enforcement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Enforcement")
            .field("nlhdlr", &self.nlhdlr)
            .field("below", &self.below)
            .field("above", &self.above)
            .finish()
    }
}

/// An expression node.
///
/// Besides its structure (handler, payload, children) a node caches the results of the last
/// evaluation, differentiation and interval propagation, each valid only for the tag stored
/// next to it.
#[derive(Debug)]
pub struct ExprNode {
    pub(crate) handler: HandlerId,
    pub(crate) data: ExprData,
    pub(crate) children: Vec<ExprRef>,
    pub(crate) refcount: u32,

    /// `None` is the invalid value (evaluation failed here or below).
    pub(crate) value: Option<f64>,
    pub(crate) value_tag: u64,
    pub(crate) derivative: f64,
    pub(crate) diff_tag: u64,
    pub(crate) activity: Interval,
    pub(crate) activity_tag: u64,
    pub(crate) in_queue: bool,

    pub(crate) curvature: Curvature,
    pub(crate) monotonicity: Vec<Monotonicity>,
    pub(crate) integral: bool,

    pub(crate) locks_pos: u32,
    pub(crate) locks_neg: u32,
    pub(crate) enforcements: Vec<Enforcement>,
    pub(crate) aux_var: Option<Var>,
}

impl ExprNode {
    pub(crate) fn new(handler: HandlerId, data: ExprData, children: Vec<ExprRef>) -> Self {
        Self {
            handler,
            data,
            children,
            refcount: 1,
            value: None,
            value_tag: 0,
            derivative: 0.0,
            diff_tag: 0,
            activity: Interval::ENTIRE,
            activity_tag: 0,
            in_queue: false,
            curvature: Curvature::Unknown,
            monotonicity: Vec::new(),
            integral: false,
            locks_pos: 0,
            locks_neg: 0,
            enforcements: Vec::new(),
            aux_var: None,
        }
    }

    pub fn handler(&self) -> HandlerId {
        self.handler
    }
    pub fn data(&self) -> &ExprData {
        &self.data
    }
    pub fn children(&self) -> &[ExprRef] {
        &self.children
    }
    pub fn refcount(&self) -> u32 {
        self.refcount
    }

    /// Value of the last evaluation, `None` if it was invalid.
    pub fn value(&self) -> Option<f64> {
        self.value
    }
    pub fn value_tag(&self) -> u64 {
        self.value_tag
    }
    pub fn derivative(&self) -> f64 {
        self.derivative
    }
    pub fn diff_tag(&self) -> u64 {
        self.diff_tag
    }
    pub fn activity(&self) -> Interval {
        self.activity
    }
    pub fn activity_tag(&self) -> u64 {
        self.activity_tag
    }

    pub fn curvature(&self) -> Curvature {
        self.curvature
    }
    pub fn monotonicity(&self, child: usize) -> Monotonicity {
        self.monotonicity.get(child).copied().unwrap_or_default()
    }
    pub fn is_integral(&self) -> bool {
        self.integral
    }

    pub fn locks(&self) -> (u32, u32) {
        (self.locks_pos, self.locks_neg)
    }
    pub fn enforcements(&self) -> &[Enforcement] {
        &self.enforcements
    }
    pub fn aux_var(&self) -> Option<Var> {
        self.aux_var
    }

    /// Forget everything derived from locks.
    pub(crate) fn clear_analysis(&mut self) {
        self.curvature = Curvature::Unknown;
        self.monotonicity.clear();
        self.integral = false;
        self.enforcements.clear();
    }
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;

    #[test]
    fn test_new_node() {
        let node = ExprNode::new(HandlerId::SUM, ExprData::Sum {
            coefs: vec![1.0, 2.0],
            constant: 3.0,
        }, vec![ExprRef::new(1), ExprRef::new(2)]);
        assert_eq!(node.refcount(), 1);
        assert_eq!(node.children().len(), 2);
        assert_eq!(node.value(), None);
        assert_eq!(node.activity_tag(), 0);
        assert!(node.activity().is_entire());
        assert_eq!(node.monotonicity(1), Monotonicity::Unknown);
    }

    #[test]
    fn test_data_debug() {
        let data = ExprData::Pow { exponent: 2.0 };
        assert_eq!(format!("{:?}", data), "Pow { exponent: 2.0 }");
        let data = ExprData::Custom(Rc::new(5u8));
        assert_eq!(format!("{:?}", data), "Custom(..)");
    }

    #[test]
    fn test_clear_analysis() {
        let mut node = ExprNode::new(HandlerId::VAR, ExprData::Var(Var::new(0)), vec![]);
        node.curvature = Curvature::Linear;
        node.integral = true;
        node.monotonicity = vec![Monotonicity::Increasing];
        node.clear_analysis();
        assert_eq!(node.curvature(), Curvature::Unknown);
        assert!(!node.is_integral());
        assert_eq!(node.monotonicity(0), Monotonicity::Unknown);
    }
}
