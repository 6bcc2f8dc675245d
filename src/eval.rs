//! Point evaluation and reverse-mode differentiation.
//!
//! Values are cached on the nodes together with the tag of the evaluation that produced them.
//! Evaluating with a nonzero tag reuses every cached value carrying the same tag, so a caller
//! evaluating several expressions at one point issues one tag for all of them. Tag `0` always
//! recomputes.
//!
//! An undefined value (e.g. `0^-1`) is `None`; it makes every ancestor `None` without calling
//! their handlers.

use std::collections::BTreeMap;

use log::trace;

use crate::graph::ExprGraph;
use crate::handler::HandlerCaps;
use crate::reference::ExprRef;
use crate::types::Var;
use crate::walk::{Visitor, WalkPos, WalkResult};

struct Evaluator<'a> {
    point: &'a dyn Fn(Var) -> f64,
    tag: u64,
}

impl Evaluator<'_> {
    fn is_cached(&self, graph: &ExprGraph, expr: ExprRef) -> bool {
        self.tag != 0 && graph.node(expr).value_tag == self.tag
    }
}

impl Visitor for Evaluator<'_> {
    fn enter(&mut self, graph: &ExprGraph, pos: &WalkPos) -> WalkResult {
        if self.is_cached(graph, pos.expr) {
            WalkResult::SkipSubtree
        } else {
            WalkResult::Continue
        }
    }

    fn leave(&mut self, graph: &ExprGraph, pos: &WalkPos) -> WalkResult {
        let expr = pos.expr;
        if self.is_cached(graph, expr) {
            return WalkResult::Continue;
        }

        let children: Option<Vec<f64>> = graph.children(expr).into_iter().map(|c| graph.node(c).value).collect();
        let value = children.and_then(|values| {
            let handler = graph.handler(graph.handler_id(expr));
            handler.eval(graph, expr, &values, self.point).filter(|v| v.is_finite())
        });

        let mut node = graph.node_mut(expr);
        node.value = value;
        node.value_tag = self.tag;
        WalkResult::Continue
    }
}

impl ExprGraph {
    /// Value of `expr` at `point`, `None` if undefined there.
    pub fn evaluate(&self, expr: ExprRef, point: &dyn Fn(Var) -> f64, tag: u64) -> Option<f64> {
        let mut evaluator = Evaluator { point, tag };
        self.walk_unique(expr, &mut evaluator);
        self.node(expr).value
    }

    /// Evaluate `root` at `point` and store in every node below it the partial derivative of
    /// `root` with respect to that node (see [`derivative`][ExprGraph::derivative]).
    ///
    /// Returns the value of `root`, or `None` if the value or a partial derivative is undefined
    /// or some handler cannot differentiate.
    pub fn differentiate(&self, root: ExprRef, point: &dyn Fn(Var) -> f64, tag: u64) -> Option<f64> {
        let value = self.evaluate(root, point, tag)?;

        let order = self.post_order(root);
        for &e in &order {
            let mut node = self.node_mut(e);
            node.derivative = 0.0;
            node.diff_tag = tag;
        }
        self.node_mut(root).derivative = 1.0;

        // parents before children
        for &expr in order.iter().rev() {
            let children = self.children(expr);
            if children.is_empty() {
                continue;
            }
            let id = self.handler_id(expr);
            if !self.registry().has(id, HandlerCaps::BWDIFF) {
                trace!("cannot differentiate {} ({})", expr, self.handler_name(expr));
                return None;
            }
            let (d, value) = {
                let node = self.node(expr);
                (node.derivative, node.value?)
            };
            let values: Vec<f64> = children.iter().map(|&c| self.node(c).value).collect::<Option<_>>()?;
            for (i, &child) in children.iter().enumerate() {
                let partial = self.handler(id).bwdiff(self, expr, i, &values, value)?;
                self.node_mut(child).derivative += d * partial;
            }
        }
        Some(value)
    }

    /// Gradient of `root` at `point` with respect to its variables.
    pub fn gradient(&self, root: ExprRef, point: &dyn Fn(Var) -> f64, tag: u64) -> Option<BTreeMap<Var, f64>> {
        self.differentiate(root, point, tag)?;
        let mut gradient = BTreeMap::new();
        for e in self.post_order(root) {
            if self.is_var(e) {
                *gradient.entry(self.var_of(e)).or_insert(0.0) += self.derivative(e);
            }
        }
        Some(gradient)
    }
}
