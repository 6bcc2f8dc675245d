//! Curvature, integrality, monotonicity and locks.
//!
//! Curvature and integrality are combined bottom-up from the handler callbacks and cached on
//! the nodes. Monotonicity of a node in each of its children is computed when the node first
//! gains locks and kept until it loses all of them, so that removing locks walks the same
//! paths as adding them did.

use log::trace;

use crate::graph::ExprGraph;
use crate::handler::HandlerCaps;
use crate::reference::ExprRef;
use crate::types::{Curvature, Monotonicity, Var};
use crate::walk::{Visitor, WalkPos, WalkResult};

struct CurvatureVisitor;

impl Visitor for CurvatureVisitor {
    fn leave(&mut self, graph: &ExprGraph, pos: &WalkPos) -> WalkResult {
        let expr = pos.expr;
        let id = graph.handler_id(expr);
        let curvature = if graph.registry().has(id, HandlerCaps::CURVATURE) {
            let children: Vec<Curvature> = graph
                .children(expr)
                .iter()
                .map(|&c| graph.node(c).curvature)
                .collect();
            graph.handler(id).curvature(graph, expr, &children)
        } else {
            Curvature::Unknown
        };
        graph.node_mut(expr).curvature = curvature;
        WalkResult::Continue
    }
}

struct IntegralityVisitor<'a> {
    var_integral: &'a dyn Fn(Var) -> bool,
}

impl Visitor for IntegralityVisitor<'_> {
    fn leave(&mut self, graph: &ExprGraph, pos: &WalkPos) -> WalkResult {
        let expr = pos.expr;
        let id = graph.handler_id(expr);
        let integral = graph.registry().has(id, HandlerCaps::INTEGRALITY) && {
            let children: Vec<bool> = graph
                .children(expr)
                .iter()
                .map(|&c| graph.node(c).integral)
                .collect();
            graph.handler(id).integrality(graph, expr, &children, self.var_integral)
        };
        graph.node_mut(expr).integral = integral;
        WalkResult::Continue
    }
}

/// Applies lock deltas along every path from the root.
///
/// The top of `deltas` is the delta of the node being visited.
struct LockUpdater {
    deltas: Vec<(i32, i32)>,
}

fn add_count(count: u32, delta: i32) -> u32 {
    let updated = count as i64 + delta as i64;
    assert!(updated >= 0, "Lock count of an expression would become negative");
    updated as u32
}

impl Visitor for LockUpdater {
    fn enter(&mut self, graph: &ExprGraph, pos: &WalkPos) -> WalkResult {
        let Some(&(dpos, dneg)) = self.deltas.last() else {
            return WalkResult::Abort;
        };
        let gained = {
            let mut node = graph.node_mut(pos.expr);
            let was_unlocked = node.locks_pos == 0 && node.locks_neg == 0;
            node.locks_pos = add_count(node.locks_pos, dpos);
            node.locks_neg = add_count(node.locks_neg, dneg);
            was_unlocked && (node.locks_pos > 0 || node.locks_neg > 0)
        };
        if gained {
            graph.compute_monotonicity(pos.expr);
        }
        WalkResult::Continue
    }

    fn visiting_child(&mut self, graph: &ExprGraph, pos: &WalkPos, _: ExprRef) -> WalkResult {
        let Some(&(dpos, dneg)) = self.deltas.last() else {
            return WalkResult::Abort;
        };
        let delta = match graph.node(pos.expr).monotonicity(pos.child) {
            Monotonicity::Increasing => (dpos, dneg),
            Monotonicity::Decreasing => (dneg, dpos),
            Monotonicity::Unknown => (dpos + dneg, dpos + dneg),
            Monotonicity::Constant => (0, 0),
        };
        if delta == (0, 0) {
            return WalkResult::SkipSubtree;
        }
        self.deltas.push(delta);
        WalkResult::Continue
    }

    fn visited_child(&mut self, _: &ExprGraph, _: &WalkPos, _: ExprRef) -> WalkResult {
        self.deltas.pop();
        WalkResult::Continue
    }

    fn leave(&mut self, graph: &ExprGraph, pos: &WalkPos) -> WalkResult {
        let mut node = graph.node_mut(pos.expr);
        if node.locks_pos == 0 && node.locks_neg == 0 {
            node.clear_analysis();
        }
        WalkResult::Continue
    }
}

impl ExprGraph {
    /// Compute and cache the curvature of every node below `root`.
    pub fn compute_curvature(&self, root: ExprRef) -> Curvature {
        self.walk_unique(root, &mut CurvatureVisitor);
        self.node(root).curvature
    }

    /// Compute and cache whether every node below `root` takes only integral values when the
    /// variables for which `var_integral` holds are integral.
    pub fn compute_integrality(&self, root: ExprRef, var_integral: &dyn Fn(Var) -> bool) -> bool {
        self.walk_unique(root, &mut IntegralityVisitor { var_integral });
        self.node(root).integral
    }

    /// Recompute the monotonicity of `expr` in each of its children from the current activities.
    pub fn compute_monotonicity(&self, expr: ExprRef) {
        let id = self.handler_id(expr);
        let n = self.num_children(expr);
        let monotonicity: Vec<Monotonicity> = if self.registry().has(id, HandlerCaps::MONOTONICITY) {
            (0..n)
                .map(|i| self.handler(id).monotonicity(self, expr, i))
                .collect()
        } else {
            vec![Monotonicity::Unknown; n]
        };
        trace!("monotonicity of {}: {:?}", expr, monotonicity);
        self.node_mut(expr).monotonicity = monotonicity;
    }

    /// Add `pos` positive and `neg` negative locks to `root` and propagate them to the
    /// descendants according to monotonicity. Negative amounts remove locks.
    ///
    /// A positive lock on a node means some constraint bounds it from above, a negative lock
    /// from below. Nodes left without locks forget their analysis and enforcements.
    pub fn add_locks(&self, root: ExprRef, pos: i32, neg: i32) {
        if pos == 0 && neg == 0 {
            return;
        }
        let mut updater = LockUpdater { deltas: vec![(pos, neg)] };
        self.walk(root, &mut updater);
    }
}
