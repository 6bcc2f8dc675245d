//! Nonlinear handlers: pluggable enforcement of expression nodes.
//!
//! A [`NlHandler`] recognizes nodes it can enforce in [`detect`][NlHandler::detect] and
//! returns private data for them. Detection binds handlers to a node, by decreasing priority,
//! until both sides the node's locks require are covered. Later queries (auxiliary evaluation,
//! interval propagation, estimation) are dispatched to every bound handler.
//!
//! The [`DefaultNlHandler`] enforces a node through its own expression handler.

use std::any::Any;
use std::fmt;
use std::rc::Rc;

use bitflags::bitflags;
use log::debug;

use crate::graph::ExprGraph;
use crate::handler::{Estimator, HandlerCaps};
use crate::interval::Interval;
use crate::node::Enforcement;
use crate::reference::ExprRef;
use crate::types::Var;
use crate::walk::{Visitor, WalkPos, WalkResult};

bitflags! {
    /// Optional callbacks implemented by a nonlinear handler.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct NlhdlrCaps: u32 {
        const INTEVAL     = 1 << 0;
        const REVERSEPROP = 1 << 1;
        const ESTIMATE    = 1 << 2;
    }
}

/// Index of a nonlinear handler in its registry.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct NlhdlrId(u32);

impl NlhdlrId {
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for NlhdlrId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "nl#{}", self.0)
    }
}

/// Outcome of a successful detection.
pub struct Detection {
    /// The handler enforces `expr >= aux`.
    pub below: bool,
    /// The handler enforces `expr <= aux`.
    pub above: bool,
    pub data: Rc<dyn Any>,
}

pub trait NlHandler {
    fn name(&self) -> &str;

    /// Handlers with higher priority are asked first.
    fn detect_priority(&self) -> i32 {
        0
    }

    fn caps(&self) -> NlhdlrCaps;

    /// Decide whether to handle `expr`, given the sides that still need enforcement.
    ///
    /// A handler may participate without enforcing any side, e.g. to contribute to interval
    /// propagation.
    fn detect(&self, graph: &ExprGraph, expr: ExprRef, below: bool, above: bool) -> Option<Detection>;

    /// Value of `expr` as seen by this handler at `point`, where auxiliary variables of the
    /// children take their values from `point` too.
    fn eval_aux(&self, graph: &ExprGraph, expr: ExprRef, data: &dyn Any, point: &dyn Fn(Var) -> f64) -> Option<f64>;

    fn interval(&self, graph: &ExprGraph, expr: ExprRef, data: &dyn Any, children: &[Interval]) -> Interval {
        let _ = (graph, expr, data, children);
        Interval::ENTIRE
    }

    fn reverse_prop(
        &self,
        graph: &ExprGraph,
        expr: ExprRef,
        data: &dyn Any,
        bounds: Interval,
        children: &[Interval],
    ) -> Option<Vec<Interval>> {
        let _ = (graph, expr, data, bounds, children);
        None
    }

    #[allow(clippy::too_many_arguments)]
    fn estimate(
        &self,
        graph: &ExprGraph,
        expr: ExprRef,
        data: &dyn Any,
        children: &[f64],
        bounds: &[Interval],
        overestimate: bool,
    ) -> Option<Estimator> {
        let _ = (graph, expr, data, children, bounds, overestimate);
        None
    }
}

/// Value of each child at `point`: its auxiliary variable's value if it has one, else its
/// evaluated value.
fn aux_children_values(graph: &ExprGraph, expr: ExprRef, point: &dyn Fn(Var) -> f64) -> Option<Vec<f64>> {
    graph
        .children(expr)
        .into_iter()
        .map(|c| match graph.aux_var(c) {
            Some(v) => Some(point(v)),
            None => graph.evaluate(c, point, 0),
        })
        .collect()
}

/// Enforces a node through the callbacks of its expression handler.
pub struct DefaultNlHandler;

impl NlHandler for DefaultNlHandler {
    fn name(&self) -> &str {
        "default"
    }

    fn caps(&self) -> NlhdlrCaps {
        NlhdlrCaps::all()
    }

    fn detect(&self, graph: &ExprGraph, expr: ExprRef, below: bool, above: bool) -> Option<Detection> {
        let caps = graph.registry().caps(graph.handler_id(expr));
        let enforces = caps.contains(HandlerCaps::ESTIMATE);
        if !enforces && !caps.intersects(HandlerCaps::INTEVAL | HandlerCaps::REVERSEPROP) {
            return None;
        }
        Some(Detection {
            below: enforces && below,
            above: enforces && above,
            data: Rc::new(()),
        })
    }

    fn eval_aux(&self, graph: &ExprGraph, expr: ExprRef, _: &dyn Any, point: &dyn Fn(Var) -> f64) -> Option<f64> {
        let values = aux_children_values(graph, expr, point)?;
        graph
            .handler(graph.handler_id(expr))
            .eval(graph, expr, &values, point)
            .filter(|v| v.is_finite())
    }

    fn interval(&self, graph: &ExprGraph, expr: ExprRef, _: &dyn Any, children: &[Interval]) -> Interval {
        let id = graph.handler_id(expr);
        if !graph.registry().has(id, HandlerCaps::INTEVAL) {
            return Interval::ENTIRE;
        }
        graph
            .handler(id)
            .interval(graph, expr, children, &mut |_| Interval::ENTIRE)
    }

    fn reverse_prop(
        &self,
        graph: &ExprGraph,
        expr: ExprRef,
        _: &dyn Any,
        bounds: Interval,
        children: &[Interval],
    ) -> Option<Vec<Interval>> {
        let id = graph.handler_id(expr);
        if !graph.registry().has(id, HandlerCaps::REVERSEPROP) {
            return None;
        }
        graph.handler(id).reverse_prop(graph, expr, bounds, children)
    }

    fn estimate(
        &self,
        graph: &ExprGraph,
        expr: ExprRef,
        _: &dyn Any,
        children: &[f64],
        bounds: &[Interval],
        overestimate: bool,
    ) -> Option<Estimator> {
        let id = graph.handler_id(expr);
        if !graph.registry().has(id, HandlerCaps::ESTIMATE) {
            return None;
        }
        graph.handler(id).estimate(graph, expr, children, bounds, overestimate)
    }
}

struct Detector {
    bound: usize,
}

impl Visitor for Detector {
    fn leave(&mut self, graph: &ExprGraph, pos: &WalkPos) -> WalkResult {
        let expr = pos.expr;
        let (locks_pos, locks_neg, detected) = {
            let node = graph.node(expr);
            (node.locks_pos, node.locks_neg, !node.enforcements.is_empty())
        };
        if graph.num_children(expr) == 0 || detected || (locks_pos == 0 && locks_neg == 0) {
            return WalkResult::Continue;
        }

        let mut need_below = locks_neg > 0;
        let mut need_above = locks_pos > 0;
        let mut enforcements = Vec::new();
        for &id in graph.registry().nlhdlrs_by_priority() {
            if !need_below && !need_above {
                break;
            }
            let nlhdlr = graph.registry().nlhdlr(id);
            let Some(detection) = nlhdlr.detect(graph, expr, need_below, need_above) else {
                continue;
            };
            debug!(
                "{} ({}) bound to {}: below {}, above {}",
                nlhdlr.name(),
                id,
                expr,
                detection.below,
                detection.above
            );
            need_below &= !detection.below;
            need_above &= !detection.above;
            enforcements.push(Enforcement {
                nlhdlr: id,
                data: detection.data,
                below: detection.below,
                above: detection.above,
            });
        }
        if need_below || need_above {
            debug!("{} is not fully enforced", expr);
        }
        self.bound += enforcements.len();
        graph.node_mut(expr).enforcements = enforcements;
        WalkResult::Continue
    }
}

impl ExprGraph {
    /// Bind nonlinear handlers to every locked non-leaf node below `root` that has none yet.
    ///
    /// Returns the number of bindings made.
    pub fn detect_enforcement(&self, root: ExprRef) -> usize {
        let mut detector = Detector { bound: 0 };
        self.walk_unique(root, &mut detector);
        detector.bound
    }

    /// Enforcements bound to `expr`.
    pub fn enforcements(&self, expr: ExprRef) -> Vec<Enforcement> {
        self.node(expr).enforcements.clone()
    }

    /// Value of `expr` at `point` as seen by each bound handler.
    pub fn eval_aux(&self, expr: ExprRef, point: &dyn Fn(Var) -> f64) -> Vec<(NlhdlrId, Option<f64>)> {
        self.enforcements(expr)
            .into_iter()
            .map(|e| (e.nlhdlr, self.registry().nlhdlr(e.nlhdlr).eval_aux(self, expr, e.data.as_ref(), point)))
            .collect()
    }

    /// Linear estimators of `expr` at `point` in the values of its children.
    ///
    /// Handlers enforcing `expr >= aux` give overestimators, those enforcing `expr <= aux`
    /// give underestimators. A node without bindings is estimated by its expression handler.
    pub fn estimate(&self, expr: ExprRef, point: &dyn Fn(Var) -> f64, overestimate: bool) -> Vec<Estimator> {
        let Some(values) = aux_children_values(self, expr, point) else {
            return Vec::new();
        };
        let bounds: Vec<Interval> = self.children(expr).iter().map(|&c| self.activity(c)).collect();

        let enforcements = self.enforcements(expr);
        if enforcements.is_empty() {
            let id = self.handler_id(expr);
            if !self.registry().has(id, HandlerCaps::ESTIMATE) {
                return Vec::new();
            }
            return self
                .handler(id)
                .estimate(self, expr, &values, &bounds, overestimate)
                .into_iter()
                .collect();
        }

        enforcements
            .into_iter()
            .filter(|e| if overestimate { e.below } else { e.above })
            .filter_map(|e| {
                let nlhdlr = self.registry().nlhdlr(e.nlhdlr);
                if !nlhdlr.caps().contains(NlhdlrCaps::ESTIMATE) {
                    return None;
                }
                nlhdlr.estimate(self, expr, e.data.as_ref(), &values, &bounds, overestimate)
            })
            .collect()
    }

    /// Branching candidates `(child, score)` for a violation of `expr`.
    pub fn branch_scores(&self, expr: ExprRef, violation: f64) -> Vec<(ExprRef, f64)> {
        let id = self.handler_id(expr);
        if !self.registry().has(id, HandlerCaps::BRANCHSCORE) {
            return Vec::new();
        }
        let children = self.children(expr);
        self.handler(id)
            .branch_score(self, expr, violation)
            .into_iter()
            .map(|(i, score)| (children[i], score))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;
    use crate::handler::HandlerRegistry;

    /// Claims every square and bounds it from below by zero.
    struct Squares;

    impl NlHandler for Squares {
        fn name(&self) -> &str {
            "squares"
        }
        fn detect_priority(&self) -> i32 {
            100
        }
        fn caps(&self) -> NlhdlrCaps {
            NlhdlrCaps::INTEVAL
        }
        fn detect(&self, graph: &ExprGraph, expr: ExprRef, below: bool, _: bool) -> Option<Detection> {
            if !graph.is_pow(expr) || graph.pow_exponent(expr) != 2.0 {
                return None;
            }
            Some(Detection {
                below,
                above: false,
                data: Rc::new(2.0f64),
            })
        }
        fn eval_aux(&self, graph: &ExprGraph, expr: ExprRef, data: &dyn Any, point: &dyn Fn(Var) -> f64) -> Option<f64> {
            let e = data.downcast_ref::<f64>()?;
            Some(graph.evaluate(graph.child(expr, 0), point, 0)?.powf(*e))
        }
        fn interval(&self, _: &ExprGraph, _: ExprRef, _: &dyn Any, _: &[Interval]) -> Interval {
            Interval::new(0.0, f64::INFINITY)
        }
    }

    #[test]
    fn test_detection_covers_sides() {
        let mut registry = HandlerRegistry::new();
        let squares = registry.register_nlhdlr(Squares).unwrap();
        let default = registry.find_nlhdlr("default").unwrap();
        assert_eq!(registry.nlhdlrs_by_priority()[0], squares);
        let graph = ExprGraph::new(registry);

        let x = graph.mk_var(Var::new(0));
        let sq = graph.mk_pow(x, 2.0);
        let root = graph.mk_sum(&[sq], &[1.0], 0.0);
        graph.add_locks(root, 1, 1);

        // root, sq (leaves are skipped); sq needs the default handler for the upper side
        assert_eq!(graph.detect_enforcement(root), 3);
        let bound = graph.enforcements(sq);
        assert_eq!(bound.len(), 2);
        assert_eq!((bound[0].nlhdlr, bound[0].below, bound[0].above), (squares, true, false));
        assert_eq!((bound[1].nlhdlr, bound[1].below, bound[1].above), (default, false, true));
        assert!(graph.enforcements(x).is_empty());

        // already detected
        assert_eq!(graph.detect_enforcement(root), 0);

        let point = |_: Var| 3.0;
        let values: Vec<Option<f64>> = graph.eval_aux(sq, &point).into_iter().map(|(_, v)| v).collect();
        assert_eq!(values, vec![Some(9.0), Some(9.0)]);

        graph.add_locks(root, -1, -1);
        assert!(graph.enforcements(sq).is_empty());
    }

    #[test]
    fn test_eval_aux_uses_child_aux_vars() {
        let graph = ExprGraph::default();
        let x = graph.mk_var(Var::new(0));
        let sq = graph.mk_pow(x, 2.0);
        let root = graph.mk_sum(&[sq, x], &[1.0, 1.0], 0.0);
        graph.set_aux_var(sq, Some(Var::new(5)));
        graph.add_locks(root, 1, 0);
        graph.detect_enforcement(root);

        let point = |v: Var| if v.id() == 5 { 10.0 } else { 2.0 };
        assert_eq!(graph.eval_aux(root, &point)[0].1, Some(12.0));
        assert_eq!(graph.evaluate(root, &point, 0), Some(6.0));
    }

    #[test]
    fn test_estimate_and_branch_scores() {
        let graph = ExprGraph::default();
        let x = graph.mk_var(Var::new(0));
        let y = graph.mk_var(Var::new(1));
        let s = graph.mk_sum(&[x, y], &[2.0, -1.0], 1.0);

        let point = |_: Var| 1.0;
        let under = graph.estimate(s, &point, false);
        assert_eq!(under.len(), 1);
        assert_eq!(under[0].coefs, vec![2.0, -1.0]);
        assert_eq!(under[0].constant, 1.0);

        let xy = graph.mk_product(&[x, y], 1.0);
        graph.node_mut(x).activity = Interval::new(0.0, 1.0);
        graph.node_mut(y).activity = Interval::new(0.0, 2.0);
        let scores = graph.branch_scores(xy, 0.5);
        assert_eq!(scores, vec![(x, 0.5), (y, 0.5)]);
    }
}
