//! The expression DAG manager.
//!
//! [`ExprGraph`] owns the node arena and the handler registry. Nodes are addressed by
//! [`ExprRef`] handles and kept alive by explicit reference counts:
//!
//! - [`create`][ExprGraph::create] returns an owned reference (refcount 1) and captures every child;
//! - [`capture`][ExprGraph::capture] adds an owner;
//! - [`release`][ExprGraph::release] removes one, freeing the node and, transitively, every child
//!   whose count drops to zero.
//!
//! All methods take `&self`. Storage borrows are short and never held across handler callbacks,
//! so handlers may create and release nodes while the engine is calling them.
//!
//! ```
//! use nlexpr_rs::graph::ExprGraph;
//! use nlexpr_rs::types::Var;
//!
//! let graph = ExprGraph::default();
//! let x = graph.mk_var(Var::new(0));
//! let y = graph.mk_var(Var::new(1));
//! let sum = graph.mk_sum(&[x, y], &[2.0, 3.0], 1.0);
//! graph.release(x);
//! graph.release(y);
//!
//! let value = graph.evaluate(sum, &|v| if v.id() == 0 { 1.0 } else { 2.0 }, 0);
//! assert_eq!(value, Some(9.0));
//!
//! graph.release(sum);
//! assert_eq!(graph.num_nodes(), 0);
//! ```

use std::any::Any;
use std::cell::{Ref, RefCell, RefMut};
use std::fmt::Debug;
use std::rc::Rc;

use log::trace;

use crate::error::{ExprError, Result};
use crate::handler::{ExprHandler, HandlerId, HandlerRegistry};
use crate::interval::Interval;
use crate::node::{ExprData, ExprNode};
use crate::reference::ExprRef;
use crate::table::Arena;
use crate::types::Var;
use crate::walk::{Visitor, WalkOptions, WalkPos, WalkResult};

type Storage = Arena<ExprNode>;

pub struct ExprGraph {
    registry: HandlerRegistry,
    storage: RefCell<Storage>,
}

impl ExprGraph {
    pub fn new(registry: HandlerRegistry) -> Self {
        Self::with_capacity(registry, 10)
    }

    /// Create a graph with room for `2^bits` nodes before the arena grows.
    pub fn with_capacity(registry: HandlerRegistry, bits: usize) -> Self {
        Self {
            registry,
            storage: RefCell::new(Storage::new(bits)),
        }
    }
}

impl Default for ExprGraph {
    fn default() -> Self {
        ExprGraph::new(HandlerRegistry::new())
    }
}

impl Debug for ExprGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let storage = self.storage.borrow();
        f.debug_struct("ExprGraph")
            .field("capacity", &storage.capacity())
            .field("slots", &storage.len())
            .field("live", &storage.live())
            .field("registry", &self.registry)
            .finish()
    }
}

impl ExprGraph {
    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    pub fn handler(&self, id: HandlerId) -> &dyn ExprHandler {
        self.registry.get(id)
    }

    /// Number of live nodes.
    pub fn num_nodes(&self) -> usize {
        self.storage.borrow().live()
    }

    pub fn is_alive(&self, expr: ExprRef) -> bool {
        self.storage.borrow().is_occupied(expr.index())
    }

    /// Borrow a node for inspection. Drop the borrow before creating or releasing nodes.
    pub fn node(&self, expr: ExprRef) -> Ref<'_, ExprNode> {
        Ref::map(self.storage.borrow(), |s| s.get(expr.index()))
    }

    pub(crate) fn node_mut(&self, expr: ExprRef) -> RefMut<'_, ExprNode> {
        RefMut::map(self.storage.borrow_mut(), |s| s.get_mut(expr.index()))
    }

    /// Live node handles in slot order.
    pub fn nodes(&self) -> Vec<ExprRef> {
        self.storage
            .borrow()
            .iter()
            .map(|(i, _)| ExprRef::new(i as u32))
            .collect()
    }
}

// Construction and lifecycle
impl ExprGraph {
    fn check(&self, handler: HandlerId, data: &ExprData, children: &[ExprRef]) -> Result<()> {
        let name = || self.registry.name(handler).to_string();
        let arity = |expected: usize| {
            if children.len() == expected {
                Ok(())
            } else {
                Err(ExprError::Arity {
                    handler: name(),
                    expected,
                    got: children.len(),
                })
            }
        };
        let mismatch = || Err(ExprError::PayloadMismatch { handler: name() });

        match (handler, data) {
            (HandlerId::VALUE, ExprData::Value(_)) => arity(0),
            (HandlerId::VAR, ExprData::Var(_)) => arity(0),
            (HandlerId::SUM, ExprData::Sum { coefs, .. }) => arity(coefs.len()),
            (HandlerId::PRODUCT, ExprData::Product { .. }) => Ok(()),
            (HandlerId::POW, ExprData::Pow { exponent }) => {
                if !exponent.is_finite() {
                    return Err(ExprError::InvalidExponent(*exponent));
                }
                arity(1)
            }
            (HandlerId::VALUE | HandlerId::VAR | HandlerId::SUM | HandlerId::PRODUCT | HandlerId::POW, _) => {
                mismatch()
            }
            _ => Ok(()),
        }
    }

    /// Create a node, capturing each child. Returns an owned reference.
    pub fn try_create(&self, handler: HandlerId, data: ExprData, children: &[ExprRef]) -> Result<ExprRef> {
        self.check(handler, &data, children)?;
        for &child in children {
            self.capture(child);
        }
        let node = ExprNode::new(handler, data, children.to_vec());
        let index = self.storage.borrow_mut().insert(node);
        let expr = ExprRef::new(index as u32);
        trace!("created {} ({})", expr, self.registry.name(handler));
        Ok(expr)
    }

    /// Like [`try_create`][ExprGraph::try_create], panicking on malformed input.
    pub fn create(&self, handler: HandlerId, data: ExprData, children: &[ExprRef]) -> ExprRef {
        match self.try_create(handler, data, children) {
            Ok(expr) => expr,
            Err(e) => panic!("Malformed expression: {}", e),
        }
    }

    /// Create a node of the handler registered under `name`.
    pub fn create_by_name(&self, name: &str, data: ExprData, children: &[ExprRef]) -> Result<ExprRef> {
        let handler = self
            .registry
            .find(name)
            .ok_or_else(|| ExprError::UnknownHandler(name.to_string()))?;
        self.try_create(handler, data, children)
    }

    pub fn mk_value(&self, value: f64) -> ExprRef {
        self.create(HandlerId::VALUE, ExprData::Value(value), &[])
    }

    pub fn mk_var(&self, var: Var) -> ExprRef {
        self.create(HandlerId::VAR, ExprData::Var(var), &[])
    }

    /// `constant + sum(coefs[i] * children[i])`
    pub fn mk_sum(&self, children: &[ExprRef], coefs: &[f64], constant: f64) -> ExprRef {
        let data = ExprData::Sum {
            coefs: coefs.to_vec(),
            constant,
        };
        self.create(HandlerId::SUM, data, children)
    }

    /// `coef * prod(children[i])`
    pub fn mk_product(&self, children: &[ExprRef], coef: f64) -> ExprRef {
        self.create(HandlerId::PRODUCT, ExprData::Product { coef }, children)
    }

    /// `base ^ exponent`
    pub fn mk_pow(&self, base: ExprRef, exponent: f64) -> ExprRef {
        self.create(HandlerId::POW, ExprData::Pow { exponent }, &[base])
    }

    pub fn capture(&self, expr: ExprRef) {
        self.node_mut(expr).refcount += 1;
    }

    /// Decrement the refcount and return the new value.
    fn decref(&self, expr: ExprRef) -> u32 {
        let mut node = self.node_mut(expr);
        assert!(node.refcount > 0, "Releasing expression {} with refcount 0", expr);
        node.refcount -= 1;
        node.refcount
    }

    /// Drop one owner of `expr`, freeing every node that becomes unreferenced.
    pub fn release(&self, expr: ExprRef) {
        if self.decref(expr) > 0 {
            return;
        }
        let options = WalkOptions {
            revisit: true,
            capture_root: false,
        };
        self.walk_with(expr, &mut Releaser, options);
    }

    fn free(&self, expr: ExprRef) {
        let node = self.storage.borrow_mut().remove(expr.index());
        trace!("freed {} ({})", expr, self.registry.name(node.handler));
        // payload and enforcement data are dropped here, outside the storage borrow
        drop(node);
    }

    /// Append `child` to `parent`, capturing it. Sums get coefficient `1`.
    pub fn append_child(&self, parent: ExprRef, child: ExprRef) {
        self.append_sum_child_impl(parent, child, 1.0);
    }

    /// Append `coef * child` to the sum `sum`.
    pub fn append_sum_child(&self, sum: ExprRef, child: ExprRef, coef: f64) {
        assert!(self.is_sum(sum), "Expression {} is not a sum", sum);
        self.append_sum_child_impl(sum, child, coef);
    }

    fn append_sum_child_impl(&self, parent: ExprRef, child: ExprRef, coef: f64) {
        self.capture(child);
        let mut node = self.node_mut(parent);
        if let ExprData::Sum { coefs, .. } = &mut node.data {
            coefs.push(coef);
        }
        node.children.push(child);
        node.value_tag = 0;
        node.activity_tag = 0;
    }

    /// Replace the `index`-th child of `parent` by `new`, capturing `new` and releasing the old child.
    pub fn replace_child(&self, parent: ExprRef, index: usize, new: ExprRef) {
        let old = self.child(parent, index);
        if old == new {
            return;
        }
        self.capture(new);
        {
            let mut node = self.node_mut(parent);
            node.children[index] = new;
            node.value_tag = 0;
            node.activity_tag = 0;
        }
        self.release(old);
    }

    /// Release and remove all children of `expr`.
    pub fn remove_children(&self, expr: ExprRef) {
        let children = {
            let mut node = self.node_mut(expr);
            if let ExprData::Sum { coefs, .. } = &mut node.data {
                coefs.clear();
            }
            std::mem::take(&mut node.children)
        };
        for child in children {
            self.release(child);
        }
    }
}

/// Frees the nodes below a node whose refcount reached zero.
struct Releaser;

impl Visitor for Releaser {
    fn visiting_child(&mut self, graph: &ExprGraph, _: &WalkPos, child: ExprRef) -> WalkResult {
        if graph.decref(child) == 0 {
            WalkResult::Continue
        } else {
            WalkResult::SkipSubtree
        }
    }

    fn leave(&mut self, graph: &ExprGraph, pos: &WalkPos) -> WalkResult {
        graph.free(pos.expr);
        WalkResult::Continue
    }
}

// Accessors
impl ExprGraph {
    pub fn handler_id(&self, expr: ExprRef) -> HandlerId {
        self.node(expr).handler
    }

    pub fn handler_name(&self, expr: ExprRef) -> &str {
        self.registry.name(self.handler_id(expr))
    }

    pub fn refcount(&self, expr: ExprRef) -> u32 {
        self.node(expr).refcount
    }

    pub fn children(&self, expr: ExprRef) -> Vec<ExprRef> {
        self.node(expr).children.clone()
    }

    pub fn num_children(&self, expr: ExprRef) -> usize {
        self.node(expr).children.len()
    }

    pub fn child(&self, expr: ExprRef, index: usize) -> ExprRef {
        self.node(expr).children[index]
    }

    pub fn data(&self, expr: ExprRef) -> ExprData {
        self.node(expr).data.clone()
    }

    pub fn is_value(&self, expr: ExprRef) -> bool {
        self.handler_id(expr) == HandlerId::VALUE
    }
    pub fn is_var(&self, expr: ExprRef) -> bool {
        self.handler_id(expr) == HandlerId::VAR
    }
    pub fn is_sum(&self, expr: ExprRef) -> bool {
        self.handler_id(expr) == HandlerId::SUM
    }
    pub fn is_product(&self, expr: ExprRef) -> bool {
        self.handler_id(expr) == HandlerId::PRODUCT
    }
    pub fn is_pow(&self, expr: ExprRef) -> bool {
        self.handler_id(expr) == HandlerId::POW
    }

    /// The constant of a value node.
    pub fn value_of(&self, expr: ExprRef) -> f64 {
        match self.node(expr).data {
            ExprData::Value(v) => v,
            ref d => panic!("Expression {} is not a value: {:?}", expr, d),
        }
    }

    /// The variable of a variable node.
    pub fn var_of(&self, expr: ExprRef) -> Var {
        match self.node(expr).data {
            ExprData::Var(v) => v,
            ref d => panic!("Expression {} is not a variable: {:?}", expr, d),
        }
    }

    pub fn sum_coefs(&self, expr: ExprRef) -> Vec<f64> {
        match &self.node(expr).data {
            ExprData::Sum { coefs, .. } => coefs.clone(),
            d => panic!("Expression {} is not a sum: {:?}", expr, d),
        }
    }

    pub fn sum_constant(&self, expr: ExprRef) -> f64 {
        match self.node(expr).data {
            ExprData::Sum { constant, .. } => constant,
            ref d => panic!("Expression {} is not a sum: {:?}", expr, d),
        }
    }

    pub fn set_sum_constant(&self, expr: ExprRef, value: f64) {
        let mut node = self.node_mut(expr);
        match &mut node.data {
            ExprData::Sum { constant, .. } => *constant = value,
            d => panic!("Expression {} is not a sum: {:?}", expr, d),
        }
        node.value_tag = 0;
        node.activity_tag = 0;
    }

    /// Multiply every coefficient and the constant of a sum by `factor`.
    pub fn multiply_sum_by(&self, expr: ExprRef, factor: f64) {
        let mut node = self.node_mut(expr);
        match &mut node.data {
            ExprData::Sum { coefs, constant } => {
                coefs.iter_mut().for_each(|c| *c *= factor);
                *constant *= factor;
            }
            d => panic!("Expression {} is not a sum: {:?}", expr, d),
        }
        node.value_tag = 0;
        node.activity_tag = 0;
    }

    pub fn product_coef(&self, expr: ExprRef) -> f64 {
        match self.node(expr).data {
            ExprData::Product { coef } => coef,
            ref d => panic!("Expression {} is not a product: {:?}", expr, d),
        }
    }

    pub fn pow_exponent(&self, expr: ExprRef) -> f64 {
        match self.node(expr).data {
            ExprData::Pow { exponent } => exponent,
            ref d => panic!("Expression {} is not a power: {:?}", expr, d),
        }
    }

    /// Payload of a node created by an external handler.
    pub fn custom_data(&self, expr: ExprRef) -> Option<Rc<dyn Any>> {
        match &self.node(expr).data {
            ExprData::Custom(data) => Some(Rc::clone(data)),
            _ => None,
        }
    }

    /// Interval of the last forward/reverse propagation involving `expr`.
    pub fn activity(&self, expr: ExprRef) -> Interval {
        self.node(expr).activity
    }

    /// Partial derivative of the last differentiated root with respect to `expr`.
    pub fn derivative(&self, expr: ExprRef) -> f64 {
        self.node(expr).derivative
    }

    pub fn aux_var(&self, expr: ExprRef) -> Option<Var> {
        self.node(expr).aux_var
    }

    pub fn set_aux_var(&self, expr: ExprRef, var: Option<Var>) {
        self.node_mut(expr).aux_var = var;
    }

    pub fn locks(&self, expr: ExprRef) -> (u32, u32) {
        let node = self.node(expr);
        (node.locks_pos, node.locks_neg)
    }
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;

    #[test]
    fn test_create_and_release() {
        let graph = ExprGraph::default();
        let x = graph.mk_var(Var::new(0));
        assert_eq!(graph.refcount(x), 1);

        let p = graph.mk_pow(x, 2.0);
        assert_eq!(graph.refcount(x), 2);
        assert_eq!(graph.num_nodes(), 2);

        graph.release(x);
        assert_eq!(graph.refcount(x), 1);
        graph.release(p);
        assert_eq!(graph.num_nodes(), 0);
        assert!(!graph.is_alive(x));
    }

    #[test]
    fn test_shared_child_freed_once() {
        let graph = ExprGraph::default();
        let x = graph.mk_var(Var::new(0));
        let a = graph.mk_sum(&[x, x], &[1.0, 2.0], 0.0);
        let b = graph.mk_product(&[a, x], 1.0);
        graph.release(x);
        graph.release(a);
        assert_eq!(graph.refcount(x), 3);
        assert_eq!(graph.num_nodes(), 3);

        graph.release(b);
        assert_eq!(graph.num_nodes(), 0);
    }

    #[test]
    #[should_panic(expected = "with refcount 0")]
    fn test_over_release_panics() {
        let graph = ExprGraph::default();
        let x = graph.mk_var(Var::new(0));
        let s = graph.mk_sum(&[x], &[1.0], 0.0);
        graph.release(x);
        // s still holds x; force its count to zero, then release again
        graph.node_mut(x).refcount = 0;
        graph.release(x);
        graph.release(s);
    }

    #[test]
    fn test_arity_checked() {
        let graph = ExprGraph::default();
        let x = graph.mk_var(Var::new(0));
        let err = graph
            .try_create(HandlerId::POW, ExprData::Pow { exponent: 2.0 }, &[x, x])
            .unwrap_err();
        assert_eq!(
            err,
            ExprError::Arity {
                handler: "pow".to_string(),
                expected: 1,
                got: 2
            }
        );
        let err = graph
            .try_create(HandlerId::SUM, ExprData::Product { coef: 1.0 }, &[x])
            .unwrap_err();
        assert!(matches!(err, ExprError::PayloadMismatch { .. }));
        let err = graph.create_by_name("exp", ExprData::None, &[x]).unwrap_err();
        assert_eq!(err, ExprError::UnknownHandler("exp".to_string()));
        // failed creation captures nothing
        assert_eq!(graph.refcount(x), 1);
    }

    #[test]
    fn test_append_and_replace_child() {
        let graph = ExprGraph::default();
        let x = graph.mk_var(Var::new(0));
        let y = graph.mk_var(Var::new(1));
        let s = graph.mk_sum(&[x], &[2.0], 1.0);
        graph.append_sum_child(s, y, 3.0);
        assert_eq!(graph.children(s), vec![x, y]);
        assert_eq!(graph.sum_coefs(s), vec![2.0, 3.0]);
        assert_eq!(graph.refcount(y), 2);

        let z = graph.mk_var(Var::new(2));
        graph.replace_child(s, 0, z);
        assert_eq!(graph.children(s), vec![z, y]);
        assert_eq!(graph.refcount(x), 1);
        assert_eq!(graph.refcount(z), 2);

        for e in [x, y, z, s] {
            graph.release(e);
        }
        assert_eq!(graph.num_nodes(), 0);
    }

    #[test]
    fn test_append_child_to_product() {
        let graph = ExprGraph::default();
        let x = graph.mk_var(Var::new(0));
        let y = graph.mk_var(Var::new(1));
        let p = graph.mk_product(&[x, y], 2.0);
        let point = |v: Var| (v.id() + 2) as f64;
        assert_eq!(graph.evaluate(p, &point, 1), Some(12.0));

        graph.append_child(p, x);
        assert_eq!(graph.children(p), vec![x, y, x]);
        assert_eq!(graph.refcount(x), 3);
        assert_eq!(graph.evaluate(p, &point, 2), Some(24.0));

        for e in [x, y, p] {
            graph.release(e);
        }
        assert_eq!(graph.num_nodes(), 0);
    }

    #[test]
    fn test_replace_child_frees_old_subtree() {
        let graph = ExprGraph::default();
        let x = graph.mk_var(Var::new(0));
        let p = graph.mk_pow(x, 3.0);
        graph.release(x);
        let s = graph.mk_sum(&[p], &[1.0], 0.0);
        graph.release(p);
        assert_eq!(graph.num_nodes(), 3);

        let c = graph.mk_value(1.0);
        graph.replace_child(s, 0, c);
        graph.release(c);
        assert_eq!(graph.num_nodes(), 2);
        graph.release(s);
        assert_eq!(graph.num_nodes(), 0);
    }

    #[test]
    fn test_sum_helpers() {
        let graph = ExprGraph::default();
        let x = graph.mk_var(Var::new(0));
        let s = graph.mk_sum(&[x], &[2.0], 1.0);
        graph.multiply_sum_by(s, -2.0);
        assert_eq!(graph.sum_coefs(s), vec![-4.0]);
        assert_eq!(graph.sum_constant(s), -2.0);
        graph.set_sum_constant(s, 5.0);
        assert_eq!(graph.sum_constant(s), 5.0);
        graph.remove_children(s);
        assert_eq!(graph.num_children(s), 0);
        assert!(graph.sum_coefs(s).is_empty());
        assert_eq!(graph.refcount(x), 1);
    }
}
