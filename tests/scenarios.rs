use std::cmp::Ordering;

use nlexpr_rs::config::PropagationConfig;
use nlexpr_rs::domain::{BoxDomains, VarDomains};
use nlexpr_rs::graph::ExprGraph;
use nlexpr_rs::handler::{ExprHandler, HandlerCaps, HandlerRegistry};
use nlexpr_rs::interval::Interval;
use nlexpr_rs::node::ExprData;
use nlexpr_rs::propagate::PropagationSession;
use nlexpr_rs::reference::ExprRef;
use nlexpr_rs::rounding::{next_down, next_up};
use nlexpr_rs::types::Var;
use test_log::test;

#[test]
fn simplify_cancels_terms() {
    let graph = ExprGraph::default();
    let (x, y) = (graph.mk_var(Var::new(0)), graph.mk_var(Var::new(1)));
    let raw = graph.mk_sum(&[x, y, x], &[2.0, 3.0, -2.0], 5.0);

    let s = graph.simplify(raw);
    assert!(graph.is_sum(s));
    assert_eq!(graph.children(s), vec![y]);
    assert_eq!(graph.sum_coefs(s), vec![3.0]);
    assert_eq!(graph.sum_constant(s), 5.0);

    for e in [raw, s, x, y] {
        graph.release(e);
    }
    assert_eq!(graph.num_nodes(), 0);
}

#[test]
fn propagate_sum_without_slack() {
    let graph = ExprGraph::default();
    let (x, y) = (Var::new(0), Var::new(1));
    let ex = graph.mk_var(x);
    let ey = graph.mk_var(y);
    let s = graph.mk_sum(&[ex, ey], &[1.0, 1.0], 0.0);
    let mut domains = BoxDomains::new().with(x, 0.0, 2.0).with(y, 0.0, 3.0);

    let mut session = PropagationSession::new(&graph, PropagationConfig::default());
    let tag = session.new_box();
    assert_eq!(session.forward(s, &domains, false), Ok(Interval::new(0.0, 5.0)));
    assert_eq!(graph.node(s).activity_tag(), tag);

    let candidates = graph
        .handler(graph.handler_id(s))
        .reverse_prop(&graph, s, Interval::new(0.0, 4.0), &[graph.activity(ex), graph.activity(ey)])
        .unwrap();
    assert!(candidates[0].sup >= 4.0 && candidates[0].inf <= -3.0);
    assert!(candidates[1].sup >= 4.0 && candidates[1].inf <= -2.0);

    assert_eq!(session.tighten(s, Interval::new(0.0, 4.0), true, &mut domains), Ok(true));
    assert_eq!(session.reverse(&[s], &mut domains, false), Ok(0));
    assert_eq!(domains.bounds(x), Interval::new(0.0, 2.0));
    assert_eq!(domains.bounds(y), Interval::new(0.0, 3.0));
}

#[test]
fn deep_chains_do_not_recurse() {
    const DEPTH: usize = 100_000;

    let graph = ExprGraph::default();
    let mut e = graph.mk_var(Var::new(0));
    for _ in 0..DEPTH {
        let next = graph.mk_sum(&[e], &[1.0], 1.0);
        graph.release(e);
        e = next;
    }
    assert_eq!(graph.num_nodes(), DEPTH + 1);
    assert_eq!(graph.evaluate(e, &|_| 2.0, 0), Some(DEPTH as f64 + 2.0));
    assert_eq!(graph.post_order(e).len(), DEPTH + 1);

    let s = graph.simplify(e);
    assert!(graph.is_sum(s));
    assert_eq!(graph.num_children(s), 1);
    assert_eq!(graph.sum_constant(s), DEPTH as f64);

    graph.release(s);
    graph.release(e);
    assert_eq!(graph.num_nodes(), 0);
}

/// `e_k = 2 e_{k-1} + x1` with `e_0 = x0`; every call builds fresh nodes.
fn doubling_chain(graph: &ExprGraph, depth: usize) -> ExprRef {
    let x1 = graph.mk_var(Var::new(1));
    let mut e = graph.mk_var(Var::new(0));
    for _ in 0..depth {
        let next = graph.mk_sum(&[e, x1], &[2.0, 1.0], 0.0);
        graph.release(e);
        e = next;
    }
    graph.release(x1);
    e
}

#[test]
fn deep_chains_compare_and_deduplicate() {
    const DEPTH: usize = 100_000;

    let graph = ExprGraph::default();
    let a = doubling_chain(&graph, DEPTH);
    let b = doubling_chain(&graph, DEPTH);
    assert_eq!(graph.num_nodes(), 2 * (DEPTH + 2));

    assert_eq!(graph.compare(a, b), Ordering::Equal);
    assert_eq!(graph.hash_expr(a), graph.hash_expr(b));

    let mut roots = [a, b];
    assert!(graph.deduplicate(&mut roots));
    assert_eq!(roots, [a, a]);
    assert_eq!(graph.num_nodes(), DEPTH + 2);

    for r in roots {
        graph.release(r);
    }
    assert_eq!(graph.num_nodes(), 0);
}

#[test]
fn deep_chains_propagate_and_lock() {
    const DEPTH: usize = 100_000;
    let depth = DEPTH as f64;

    let graph = ExprGraph::default();
    let x = Var::new(0);
    let mut e = graph.mk_var(x);
    for _ in 0..DEPTH {
        let next = graph.mk_sum(&[e], &[1.0], 1.0);
        graph.release(e);
        e = next;
    }

    let mut domains = BoxDomains::new().with(x, 0.0, 1.0);
    let mut session = PropagationSession::new(&graph, PropagationConfig::default());
    session.new_box();
    assert_eq!(session.forward(e, &domains, false), Ok(Interval::new(depth, depth + 1.0)));

    let result = session
        .propagate(&[(e, Interval::new(f64::NEG_INFINITY, depth + 0.5))], &mut domains)
        .unwrap();
    assert!(result.tightenings >= DEPTH);
    let bounds = domains.bounds(x);
    assert_eq!(bounds.inf, 0.0);
    assert!((bounds.sup - 0.5).abs() < 1e-9, "{}", bounds);

    let gradient = graph.gradient(e, &|_| 0.25, 1).unwrap();
    assert_eq!(gradient[&x], 1.0);

    graph.add_locks(e, 1, 0);
    let leaf = graph.post_order(e)[0];
    assert_eq!(graph.locks(leaf), (1, 0));
    assert!(graph.detect_enforcement(e) >= DEPTH);
    graph.add_locks(e, -1, 0);
    assert_eq!(graph.locks(leaf), (0, 0));
    assert_eq!(graph.locks(e), (0, 0));

    assert!(graph.to_infix(e).len() > DEPTH);

    graph.release(e);
    assert_eq!(graph.num_nodes(), 0);
}

struct Exp;

impl ExprHandler for Exp {
    fn name(&self) -> &str {
        "exp"
    }

    fn caps(&self) -> HandlerCaps {
        HandlerCaps::PRINT | HandlerCaps::INTEVAL | HandlerCaps::REVERSEPROP
    }

    fn eval(&self, _: &ExprGraph, _: ExprRef, children: &[f64], _: &dyn Fn(Var) -> f64) -> Option<f64> {
        Some(children[0].exp())
    }

    fn interval(
        &self,
        _: &ExprGraph,
        _: ExprRef,
        children: &[Interval],
        _: &mut dyn FnMut(Var) -> Interval,
    ) -> Interval {
        let c = children[0];
        Interval::new(next_down(c.inf.exp()).max(0.0), next_up(c.sup.exp()))
    }

    fn reverse_prop(&self, _: &ExprGraph, _: ExprRef, bounds: Interval, _: &[Interval]) -> Option<Vec<Interval>> {
        if bounds.sup <= 0.0 {
            return Some(vec![Interval::EMPTY]);
        }
        let inf = if bounds.inf > 0.0 { next_down(bounds.inf.ln()) } else { f64::NEG_INFINITY };
        Some(vec![Interval::new(inf, next_up(bounds.sup.ln()))])
    }
}

#[test]
fn custom_handler_takes_part_in_propagation() {
    let mut registry = HandlerRegistry::new();
    let id = registry.register(Exp).unwrap();
    assert!(registry.register(Exp).is_err());
    let graph = ExprGraph::new(registry);

    let x = Var::new(0);
    let ex = graph.mk_var(x);
    let e = graph.create(id, ExprData::None, &[ex]);
    assert_eq!(graph.to_infix(e), "exp(x0)");
    let by_name = graph.create_by_name("exp", ExprData::None, &[ex]).unwrap();
    assert_eq!(graph.handler_id(by_name), id);
    graph.release(by_name);

    // exp(x) <= 1 over x in [-5, 5]
    let mut domains = BoxDomains::new().with(x, -5.0, 5.0);
    let mut session = PropagationSession::new(&graph, PropagationConfig::default());
    session
        .propagate(&[(e, Interval::new(f64::NEG_INFINITY, 1.0))], &mut domains)
        .unwrap();
    let bx = domains.bounds(x);
    assert_eq!(bx.inf, -5.0);
    assert!(bx.sup >= 0.0 && bx.sup < 1e-9);
}
