//! Forward and reverse interval propagation.
//!
//! A [`PropagationSession`] owns the box tags: each call to [`new_box`][PropagationSession::new_box]
//! declares that variable domains may have changed, which invalidates every cached activity
//! at once without touching the nodes.
//!
//! - [`forward`][PropagationSession::forward] encloses the range of an expression over the current
//!   box, bottom-up, reusing activities already computed for the box.
//! - [`reverse`][PropagationSession::reverse] pushes tightened activities down to the children
//!   through a FIFO queue of nodes whose activity changed, updating variable domains at the
//!   leaves.
//! - [`propagate`][PropagationSession::propagate] alternates both until nothing changes or the
//!   round limit is reached.
//!
//! An empty interval anywhere proves infeasibility; it is reported as [`Infeasible`].

use std::collections::VecDeque;

use log::{debug, trace};

use crate::config::PropagationConfig;
use crate::domain::{leaf_interval, round_integral, VarDomains};
use crate::error::Infeasible;
use crate::graph::ExprGraph;
use crate::handler::{HandlerCaps, HandlerId};
use crate::interval::Interval;
use crate::nlhdlr::NlhdlrCaps;
use crate::reference::ExprRef;
use crate::rounding::{add_up, sub_down};
use crate::types::TagCounter;
use crate::walk::{Visitor, WalkPos, WalkResult, WalkStatus};

/// Counters of one session.
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq)]
pub struct PropagationStats {
    pub rounds: u64,
    pub forward_nodes: u64,
    pub reverse_nodes: u64,
    pub tightenings: u64,
    pub cutoffs: u64,
}

/// Result of [`PropagationSession::propagate`].
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct PropagationResult {
    pub rounds: usize,
    pub tightenings: usize,
}

pub struct PropagationSession<'g> {
    graph: &'g ExprGraph,
    config: PropagationConfig,
    tags: TagCounter,
    box_tag: u64,
    queue: VecDeque<ExprRef>,
    stats: PropagationStats,
}

struct Forward<'a> {
    config: &'a PropagationConfig,
    domains: &'a dyn VarDomains,
    box_tag: u64,
    force: bool,
    computed: u64,
    infeasible: bool,
}

impl Forward<'_> {
    fn is_valid(&self, graph: &ExprGraph, expr: ExprRef) -> bool {
        !self.force && graph.node(expr).activity_tag == self.box_tag
    }

    fn compute(&self, graph: &ExprGraph, expr: ExprRef) -> Interval {
        let children: Vec<Interval> = graph.children(expr).iter().map(|&c| graph.activity(c)).collect();
        let enforcements = graph.enforcements(expr);
        let mut interval = Interval::ENTIRE;
        let mut by_nlhdlr = false;
        for e in &enforcements {
            let nlhdlr = graph.registry().nlhdlr(e.nlhdlr);
            if nlhdlr.caps().contains(NlhdlrCaps::INTEVAL) {
                interval = interval.intersect(&nlhdlr.interval(graph, expr, e.data.as_ref(), &children));
                by_nlhdlr = true;
            }
        }
        if by_nlhdlr {
            return interval;
        }

        let id = graph.handler_id(expr);
        if !graph.registry().has(id, HandlerCaps::INTEVAL) {
            return Interval::ENTIRE;
        }
        graph.registry().record(id, |s| s.interval_calls += 1);
        let mut leaf = |v| leaf_interval(self.domains, v, self.config);
        graph.handler(id).interval(graph, expr, &children, &mut leaf)
    }
}

impl Visitor for Forward<'_> {
    fn enter(&mut self, graph: &ExprGraph, pos: &WalkPos) -> WalkResult {
        if self.is_valid(graph, pos.expr) {
            WalkResult::SkipSubtree
        } else {
            WalkResult::Continue
        }
    }

    fn leave(&mut self, graph: &ExprGraph, pos: &WalkPos) -> WalkResult {
        let expr = pos.expr;
        if self.is_valid(graph, expr) {
            return WalkResult::Continue;
        }

        let mut interval = self.compute(graph, expr);
        {
            let node = graph.node(expr);
            if node.activity_tag == self.box_tag {
                interval = interval.intersect(&node.activity);
            }
        }
        if let Some(aux) = graph.aux_var(expr) {
            let b = self.domains.bounds(aux);
            let widened = Interval::new(sub_down(b.inf, self.config.aux_margin), add_up(b.sup, self.config.aux_margin));
            interval = interval.intersect(&widened);
        }
        self.computed += 1;

        let mut node = graph.node_mut(expr);
        node.activity = interval;
        node.activity_tag = self.box_tag;
        if interval.is_empty() {
            let id = node.handler;
            drop(node);
            debug!("forward propagation found {} ({}) infeasible", expr, graph.handler_name(expr));
            graph.registry().record(id, |s| s.cutoffs += 1);
            self.infeasible = true;
            return WalkResult::Abort;
        }
        WalkResult::Continue
    }
}

impl<'g> PropagationSession<'g> {
    pub fn new(graph: &'g ExprGraph, config: PropagationConfig) -> Self {
        Self {
            graph,
            config,
            tags: TagCounter::new(),
            box_tag: 0,
            queue: VecDeque::new(),
            stats: PropagationStats::default(),
        }
    }

    pub fn config(&self) -> &PropagationConfig {
        &self.config
    }

    pub fn stats(&self) -> PropagationStats {
        self.stats
    }

    pub fn box_tag(&self) -> u64 {
        self.box_tag
    }

    /// Start a new box: activities computed before are no longer valid.
    pub fn new_box(&mut self) -> u64 {
        self.box_tag = self.tags.next();
        self.box_tag
    }

    /// Enclosure of the range of `root` over the current box.
    ///
    /// Nodes whose activity is valid for the box are not recomputed unless `force` is set. A
    /// recomputed activity is intersected with the one already known for the box and with the
    /// bounds of the node's auxiliary variable.
    pub fn forward(&mut self, root: ExprRef, domains: &dyn VarDomains, force: bool) -> Result<Interval, Infeasible> {
        if self.box_tag == 0 {
            self.new_box();
        }
        let mut forward = Forward {
            config: &self.config,
            domains,
            box_tag: self.box_tag,
            force,
            computed: 0,
            infeasible: false,
        };
        let status = self.graph.walk_unique(root, &mut forward);
        self.stats.forward_nodes += forward.computed;
        if forward.infeasible {
            self.stats.cutoffs += 1;
            return Err(Infeasible);
        }
        debug_assert_eq!(status, WalkStatus::Completed);
        let activity = self.graph.activity(root);
        debug!("forward propagation of {}: {} ({} nodes computed)", root, activity, forward.computed);
        Ok(activity)
    }

    fn is_integral(&self, expr: ExprRef, domains: &dyn VarDomains) -> bool {
        if self.graph.is_var(expr) {
            domains.is_integral(self.graph.var_of(expr))
        } else {
            self.graph.node(expr).integral
        }
    }

    /// Whether `new` improves on `old` enough to be applied.
    fn is_improvement(&self, old: Interval, new: Interval, force: bool) -> bool {
        let tol = if force { 0.0 } else { self.config.bound_tolerance };
        let lower = new.inf > old.inf && (old.inf.is_infinite() || new.inf - old.inf > tol * old.inf.abs().max(1.0));
        let upper = new.sup < old.sup && (old.sup.is_infinite() || old.sup - new.sup > tol * old.sup.abs().max(1.0));
        lower || upper
    }

    /// Intersect the activity of `expr` with `bounds`.
    ///
    /// A tightened node updates the domain of its variable (for a variable node) and of its
    /// auxiliary variable, and is queued for reverse propagation if it has children. Small
    /// improvements are ignored unless `force` is set. Returns whether the activity changed.
    pub fn tighten(
        &mut self,
        expr: ExprRef,
        bounds: Interval,
        force: bool,
        domains: &mut dyn VarDomains,
    ) -> Result<bool, Infeasible> {
        let graph = self.graph;
        let old = {
            let node = graph.node(expr);
            if node.activity_tag == self.box_tag {
                node.activity
            } else {
                Interval::ENTIRE
            }
        };
        let bounds = if self.is_integral(expr, domains) {
            round_integral(bounds, self.config.integral_tolerance)
        } else {
            bounds
        };

        let new = old.intersect(&bounds);
        if new.is_empty() {
            debug!("{} cannot lie in both {} and {}", expr, old, bounds);
            graph.registry().record(graph.handler_id(expr), |s| s.cutoffs += 1);
            self.stats.cutoffs += 1;
            return Err(Infeasible);
        }
        if !self.is_improvement(old, new, force) {
            return Ok(false);
        }

        trace!("tightened {} from {} to {}", expr, old, new);
        {
            let mut node = graph.node_mut(expr);
            node.activity = new;
            node.activity_tag = self.box_tag;
        }
        graph.registry().record(graph.handler_id(expr), |s| s.tightenings += 1);
        self.stats.tightenings += 1;

        if graph.is_var(expr) {
            domains.tighten(graph.var_of(expr), new)?;
        }
        if let Some(aux) = graph.aux_var(expr) {
            domains.tighten(aux, new)?;
        }
        if graph.num_children(expr) > 0 {
            self.enqueue(expr);
        }
        Ok(true)
    }

    fn enqueue(&mut self, expr: ExprRef) {
        let mut node = self.graph.node_mut(expr);
        if !node.in_queue {
            node.in_queue = true;
            self.queue.push_back(expr);
        }
    }

    fn drain_queue(&mut self) {
        while let Some(expr) = self.queue.pop_front() {
            self.graph.node_mut(expr).in_queue = false;
        }
    }

    /// Candidate child intervals of `expr` from its bound handlers, or from its expression
    /// handler if none of them propagates.
    fn reverse_candidates(&self, expr: ExprRef, bounds: Interval, children: &[Interval]) -> Vec<Vec<Interval>> {
        let graph = self.graph;
        let mut candidates = Vec::new();
        let mut by_nlhdlr = false;
        for e in graph.enforcements(expr) {
            let nlhdlr = graph.registry().nlhdlr(e.nlhdlr);
            if nlhdlr.caps().contains(NlhdlrCaps::REVERSEPROP) {
                by_nlhdlr = true;
                candidates.extend(nlhdlr.reverse_prop(graph, expr, e.data.as_ref(), bounds, children));
            }
        }
        if by_nlhdlr {
            return candidates;
        }
        let id = graph.handler_id(expr);
        if graph.registry().has(id, HandlerCaps::REVERSEPROP) {
            graph.registry().record(id, |s| s.reverse_calls += 1);
            candidates.extend(graph.handler(id).reverse_prop(graph, expr, bounds, children));
        }
        candidates
    }

    /// Propagate the activities of `roots` and of every queued node down to the leaves.
    ///
    /// Only nodes tightened on the way are queued; see [`reverse_all`][Self::reverse_all] to
    /// start from every node. Returns the number of tightened nodes. On infeasibility the queue
    /// is dropped.
    pub fn reverse(
        &mut self,
        roots: &[ExprRef],
        domains: &mut dyn VarDomains,
        force: bool,
    ) -> Result<usize, Infeasible> {
        for &root in roots {
            if self.graph.num_children(root) > 0 {
                self.enqueue(root);
            }
        }

        let mut tightenings = 0;
        while let Some(expr) = self.queue.pop_front() {
            self.graph.node_mut(expr).in_queue = false;
            let children = self.graph.children(expr);
            if self.graph.handler_id(expr) == HandlerId::PRODUCT && children.len() > self.config.max_product_children {
                trace!("skipping product {} with {} factors", expr, children.len());
                continue;
            }
            self.stats.reverse_nodes += 1;

            let bounds = self.graph.activity(expr);
            let intervals: Vec<Interval> = children.iter().map(|&c| self.graph.activity(c)).collect();
            for candidate in self.reverse_candidates(expr, bounds, &intervals) {
                for (&child, &interval) in children.iter().zip(&candidate) {
                    match self.tighten(child, interval, force, domains) {
                        Ok(true) => tightenings += 1,
                        Ok(false) => {}
                        Err(e) => {
                            self.drain_queue();
                            return Err(e);
                        }
                    }
                }
            }
        }
        debug!("reverse propagation tightened {} nodes", tightenings);
        Ok(tightenings)
    }

    /// Like [`reverse`][Self::reverse], but first queues every inner node below `roots`,
    /// parents before children.
    ///
    /// A node whose activity was narrowed during forward propagation alone (by its auxiliary
    /// variable or a bound handler) then passes it on to its children. Activities must be valid
    /// for the current box.
    pub fn reverse_all(
        &mut self,
        roots: &[ExprRef],
        domains: &mut dyn VarDomains,
        force: bool,
    ) -> Result<usize, Infeasible> {
        for &root in roots {
            for expr in self.graph.post_order(root).into_iter().rev() {
                if self.graph.num_children(expr) > 0 {
                    self.enqueue(expr);
                }
            }
        }
        self.reverse(roots, domains, force)
    }

    /// Tighten variable domains from constraints `inf <= root <= sup` until a fixpoint or the
    /// round limit.
    pub fn propagate(
        &mut self,
        constraints: &[(ExprRef, Interval)],
        domains: &mut dyn VarDomains,
    ) -> Result<PropagationResult, Infeasible> {
        let roots: Vec<ExprRef> = constraints.iter().map(|&(root, _)| root).collect();
        let mut total = 0;
        let mut rounds = 0;
        while rounds < self.config.max_rounds {
            rounds += 1;
            self.stats.rounds += 1;
            self.new_box();

            for &(root, _) in constraints {
                self.forward(root, &*domains, false)?;
            }
            for &(root, bounds) in constraints {
                self.tighten(root, bounds, true, domains)?;
            }
            let tightened = self.reverse(&roots, domains, false)?;
            total += tightened;
            if tightened == 0 {
                break;
            }
        }
        debug!("propagation finished after {} rounds with {} tightenings", rounds, total);
        Ok(PropagationResult {
            rounds,
            tightenings: total,
        })
    }
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;
    use crate::domain::BoxDomains;
    use crate::types::Var;

    fn iv(inf: f64, sup: f64) -> Interval {
        Interval::new(inf, sup)
    }

    #[test]
    fn test_forward_sum() {
        let graph = ExprGraph::default();
        let (x, y) = (Var::new(0), Var::new(1));
        let ex = graph.mk_var(x);
        let ey = graph.mk_var(y);
        let s = graph.mk_sum(&[ex, ey], &[1.0, 1.0], 0.0);
        let domains = BoxDomains::new().with(x, 0.0, 2.0).with(y, 0.0, 3.0);

        let mut session = PropagationSession::new(&graph, PropagationConfig::default());
        let tag = session.new_box();
        assert_eq!(session.forward(s, &domains, false), Ok(iv(0.0, 5.0)));
        assert_eq!(graph.node(s).activity_tag(), tag);
        assert_eq!(session.stats().forward_nodes, 3);

        // valid for the box: nothing is recomputed
        assert_eq!(session.forward(s, &domains, false), Ok(iv(0.0, 5.0)));
        assert_eq!(session.stats().forward_nodes, 3);
    }

    #[test]
    fn test_reverse_sum() {
        let graph = ExprGraph::default();
        let (x, y) = (Var::new(0), Var::new(1));
        let ex = graph.mk_var(x);
        let ey = graph.mk_var(y);
        let s = graph.mk_sum(&[ex, ey], &[1.0, 1.0], 0.0);
        let mut domains = BoxDomains::new().with(x, 0.0, 2.0).with(y, 0.0, 10.0);

        let mut session = PropagationSession::new(&graph, PropagationConfig::default());
        session.new_box();
        assert_eq!(session.forward(s, &domains, false), Ok(iv(0.0, 12.0)));
        assert_eq!(session.tighten(s, iv(0.0, 4.0), true, &mut domains), Ok(true));
        assert_eq!(session.reverse(&[s], &mut domains, false), Ok(1));
        assert_eq!(domains.bounds(x), iv(0.0, 2.0));
        assert_eq!(domains.bounds(y), iv(0.0, 4.0));
        assert_eq!(graph.activity(ey), iv(0.0, 4.0));
    }

    #[test]
    fn test_propagate_no_further_tightening() {
        let graph = ExprGraph::default();
        let (x, y) = (Var::new(0), Var::new(1));
        let ex = graph.mk_var(x);
        let ey = graph.mk_var(y);
        let s = graph.mk_sum(&[ex, ey], &[1.0, 1.0], 0.0);
        let mut domains = BoxDomains::new().with(x, 0.0, 2.0).with(y, 0.0, 3.0);

        let mut session = PropagationSession::new(&graph, PropagationConfig::default());
        let result = session.propagate(&[(s, iv(0.0, 4.0))], &mut domains).unwrap();
        assert_eq!(result.tightenings, 0);
        assert_eq!(result.rounds, 1);
        assert!(domains.bounds(x).is_subset_of(&iv(0.0, 4.0)));
        assert!(domains.bounds(y).is_subset_of(&iv(0.0, 4.0)));
    }

    #[test]
    fn test_propagate_infeasible() {
        let graph = ExprGraph::default();
        let x = Var::new(0);
        let ex = graph.mk_var(x);
        let sq = graph.mk_pow(ex, 2.0);
        let mut domains = BoxDomains::new().with(x, -1.0, 1.0);

        let mut session = PropagationSession::new(&graph, PropagationConfig::default());
        assert_eq!(session.propagate(&[(sq, iv(2.0, 3.0))], &mut domains), Err(Infeasible));
        assert_eq!(session.stats().cutoffs, 1);
        assert!(!graph.node(sq).in_queue);
    }

    #[test]
    fn test_propagate_through_square() {
        let graph = ExprGraph::default();
        let (x, y) = (Var::new(0), Var::new(1));
        let ex = graph.mk_var(x);
        let ey = graph.mk_var(y);
        let sq = graph.mk_pow(ex, 2.0);
        // x^2 + y <= 4, y >= 0
        let s = graph.mk_sum(&[sq, ey], &[1.0, 1.0], 0.0);
        let mut domains = BoxDomains::new().with(y, 0.0, f64::INFINITY);

        let mut session = PropagationSession::new(&graph, PropagationConfig::default());
        let result = session.propagate(&[(s, iv(f64::NEG_INFINITY, 4.0))], &mut domains).unwrap();
        assert!(result.tightenings >= 2);
        let bx = domains.bounds(x);
        assert!(bx.inf >= -2.0 - 1e-9 && bx.inf <= -2.0);
        assert!(bx.sup <= 2.0 + 1e-9 && bx.sup >= 2.0);
        assert_eq!(domains.bounds(y), iv(0.0, 4.0));
    }

    #[test]
    fn test_integral_rounding() {
        let graph = ExprGraph::default();
        let (x, y) = (Var::new(0), Var::new(1));
        let ex = graph.mk_var(x);
        let ey = graph.mk_var(y);
        let s = graph.mk_sum(&[ex, ey], &[2.0, 1.0], 0.0);
        let mut domains = BoxDomains::new().with(x, 0.0, 10.0).with(y, 0.0, 10.0);
        domains.set_integral(x, true);

        let mut session = PropagationSession::new(&graph, PropagationConfig::default());
        session.propagate(&[(s, iv(0.0, 5.0))], &mut domains).unwrap();
        assert_eq!(domains.bounds(x), iv(0.0, 2.0));
        assert_eq!(domains.bounds(y), iv(0.0, 5.0));
    }

    #[test]
    fn test_aux_var_bounds_activity() {
        let graph = ExprGraph::default();
        let (x, aux) = (Var::new(0), Var::new(9));
        let ex = graph.mk_var(x);
        let s = graph.mk_sum(&[ex], &[3.0], 0.0);
        graph.set_aux_var(s, Some(aux));
        let domains = BoxDomains::new().with(x, 0.0, 10.0).with(aux, 1.0, 2.0);

        let config = PropagationConfig {
            aux_margin: 0.5,
            ..Default::default()
        };
        let mut session = PropagationSession::new(&graph, config);
        assert_eq!(session.forward(s, &domains, false), Ok(iv(0.5, 2.5)));
    }

    #[test]
    fn test_reverse_all_starts_from_inner_nodes() {
        let graph = ExprGraph::default();
        let (x, z, aux) = (Var::new(0), Var::new(1), Var::new(9));
        let ex = graph.mk_var(x);
        let ez = graph.mk_var(z);
        let a = graph.mk_sum(&[ex], &[3.0], 0.0);
        graph.set_aux_var(a, Some(aux));
        let r = graph.mk_sum(&[a, ez], &[1.0, 1.0], 0.0);
        let mut domains = BoxDomains::new().with(x, 0.0, 10.0).with(z, 0.0, 1.0).with(aux, 1.0, 2.0);

        let mut session = PropagationSession::new(&graph, PropagationConfig::default());
        session.new_box();
        let activity = session.forward(r, &domains, false).unwrap();
        assert!(activity.sup < 3.1);

        // the aux bounds on `a` never reach `x` from the root alone
        assert_eq!(session.reverse(&[r], &mut domains, false), Ok(0));
        assert_eq!(domains.bounds(x), iv(0.0, 10.0));

        assert_eq!(session.reverse_all(&[r], &mut domains, false), Ok(1));
        let bx = domains.bounds(x);
        assert!((bx.inf - 1.0 / 3.0).abs() < 1e-5, "{}", bx);
        assert!((bx.sup - 2.0 / 3.0).abs() < 1e-5, "{}", bx);
        assert!(!graph.node(a).in_queue);
    }

    #[test]
    fn test_large_products_are_skipped() {
        let graph = ExprGraph::default();
        let vars: Vec<ExprRef> = (0..3).map(|i| graph.mk_var(Var::new(i))).collect();
        let p = graph.mk_product(&vars, 1.0);
        let mut domains = BoxDomains::new()
            .with(Var::new(0), 1.0, 10.0)
            .with(Var::new(1), 1.0, 10.0)
            .with(Var::new(2), 1.0, 10.0);

        let config = PropagationConfig {
            max_product_children: 2,
            ..Default::default()
        };
        let mut session = PropagationSession::new(&graph, config);
        let result = session.propagate(&[(p, iv(0.0, 2.0))], &mut domains).unwrap();
        assert_eq!(result.tightenings, 0);
        assert_eq!(domains.bounds(Var::new(0)), iv(1.0, 10.0));
    }
}
