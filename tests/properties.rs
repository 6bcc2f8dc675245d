mod common;

use std::cmp::Ordering;
use std::collections::HashMap;

use common::*;
use nlexpr_rs::config::PropagationConfig;
use nlexpr_rs::domain::{BoxDomains, VarDomains};
use nlexpr_rs::graph::ExprGraph;
use nlexpr_rs::interval::Interval;
use nlexpr_rs::propagate::PropagationSession;
use nlexpr_rs::reference::ExprRef;
use nlexpr_rs::types::Var;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use test_log::test;

fn close_to(interval: Interval, value: f64) -> bool {
    let slack = 1e-9 * (1.0 + value.abs());
    interval.inf - slack <= value && value <= interval.sup + slack
}

#[test]
fn simplify_is_idempotent() {
    let mut rng = ChaCha8Rng::seed_from_u64(42);
    let graph = ExprGraph::default();
    for _ in 0..200 {
        let raw = random_expr(&graph, &mut rng, 4);
        let once = graph.simplify(raw);
        let (twice, changed) = graph.simplify_changed(once);
        assert!(!changed, "{} simplified again to {}", graph.to_infix(once), graph.to_infix(twice));
        assert_eq!(graph.compare(once, twice), Ordering::Equal);
        release_all(&graph, &[raw, once, twice]);
    }
    assert_eq!(graph.num_nodes(), 0);
}

#[test]
fn simplify_preserves_values() {
    let mut rng = ChaCha8Rng::seed_from_u64(7);
    let graph = ExprGraph::default();
    for _ in 0..200 {
        let raw = random_expr(&graph, &mut rng, 4);
        let simplified = graph.simplify(raw);
        for _ in 0..5 {
            let point = random_point(&mut rng);
            // Simplification may only widen the domain: a defined raw value stays defined.
            let Some(expected) = value_at(&graph, raw, &point) else {
                continue;
            };
            let scale = magnitude(&graph, raw);
            let Some(actual) = graph.evaluate(simplified, &at(&point), 0) else {
                panic!(
                    "{} = {} but {} is undefined",
                    graph.to_infix(raw),
                    expected,
                    graph.to_infix(simplified)
                );
            };
            let tol = 1e-9 * (1.0 + scale.max(magnitude(&graph, simplified)));
            assert!(
                (expected - actual).abs() <= tol,
                "{} = {} but {} = {}",
                graph.to_infix(raw),
                expected,
                graph.to_infix(simplified),
                actual
            );
        }
        release_all(&graph, &[raw, simplified]);
    }
}

#[test]
fn refcounts_are_conserved() {
    let mut rng = ChaCha8Rng::seed_from_u64(3);
    let graph = ExprGraph::default();
    let raw: Vec<ExprRef> = (0..50).map(|_| random_expr(&graph, &mut rng, 5)).collect();
    let simplified: Vec<ExprRef> = raw.iter().map(|&r| graph.simplify(r)).collect();

    // Every reference is either a parent-child edge or one of the handles held here.
    let mut expected: HashMap<ExprRef, u32> = HashMap::new();
    for e in graph.nodes() {
        for c in graph.children(e) {
            *expected.entry(c).or_default() += 1;
        }
    }
    for &e in raw.iter().chain(&simplified) {
        *expected.entry(e).or_default() += 1;
    }
    for e in graph.nodes() {
        assert_eq!(graph.refcount(e), expected[&e], "refcount of {}", graph.to_infix(e));
    }

    release_all(&graph, &simplified);
    release_all(&graph, &raw);
    assert_eq!(graph.num_nodes(), 0);
}

#[test]
fn order_is_total() {
    let mut rng = ChaCha8Rng::seed_from_u64(11);
    let graph = ExprGraph::default();
    let exprs: Vec<ExprRef> = (0..16)
        .map(|_| {
            let raw = random_expr(&graph, &mut rng, 3);
            let s = graph.simplify(raw);
            graph.release(raw);
            s
        })
        .collect();

    for &a in &exprs {
        for &b in &exprs {
            let ab = graph.compare(a, b);
            assert_eq!(ab, graph.compare(b, a).reverse(), "{} vs {}", graph.to_infix(a), graph.to_infix(b));
            for &c in &exprs {
                if ab != Ordering::Greater && graph.compare(b, c) != Ordering::Greater {
                    assert_ne!(
                        graph.compare(a, c),
                        Ordering::Greater,
                        "{} <= {} <= {}",
                        graph.to_infix(a),
                        graph.to_infix(b),
                        graph.to_infix(c)
                    );
                }
            }
        }
    }
}

#[test]
fn simplified_sums_are_canonical() {
    let mut rng = ChaCha8Rng::seed_from_u64(5);
    let graph = ExprGraph::default();
    let mut sums = 0;
    for _ in 0..300 {
        let raw = random_expr(&graph, &mut rng, 4);
        let s = graph.simplify(raw);
        for e in graph.post_order(s) {
            if !graph.is_sum(e) {
                continue;
            }
            sums += 1;
            let children = graph.children(e);
            assert!(!children.is_empty());
            for &c in &children {
                assert!(!graph.is_sum(c), "sum child in {}", graph.to_infix(e));
                assert!(!graph.is_value(c), "value child in {}", graph.to_infix(e));
            }
            assert!(graph.sum_coefs(e).iter().all(|&w| w != 0.0));
            for pair in children.windows(2) {
                assert_eq!(graph.compare(pair[0], pair[1]), Ordering::Greater, "{}", graph.to_infix(e));
            }
            if children.len() == 1 {
                assert!(graph.sum_coefs(e)[0] != 1.0 || graph.sum_constant(e) != 0.0);
            }
        }
        release_all(&graph, &[raw, s]);
    }
    assert!(sums > 0);
}

#[test]
fn forward_propagation_is_sound() {
    let mut rng = ChaCha8Rng::seed_from_u64(17);
    let graph = ExprGraph::default();
    let domains = BoxDomains::new()
        .with(Var::new(0), -2.0, 2.0)
        .with(Var::new(1), -2.0, 2.0)
        .with(Var::new(2), -2.0, 2.0);
    let mut session = PropagationSession::new(&graph, PropagationConfig::default());

    for _ in 0..200 {
        let e = random_expr(&graph, &mut rng, 4);
        session.new_box();
        let activity = session.forward(e, &domains, false);
        for _ in 0..20 {
            let point = random_point(&mut rng);
            let Some(value) = value_at(&graph, e, &point) else {
                continue;
            };
            let Ok(activity) = activity else {
                panic!("{} = {} but declared infeasible", graph.to_infix(e), value);
            };
            assert!(
                close_to(activity, value),
                "{} = {} outside {}",
                graph.to_infix(e),
                value,
                activity
            );
        }
        graph.release(e);
    }
}

#[test]
fn reverse_propagation_keeps_feasible_points() {
    let mut rng = ChaCha8Rng::seed_from_u64(23);
    let graph = ExprGraph::default();

    for _ in 0..100 {
        let e = random_expr(&graph, &mut rng, 3);
        let mut domains = BoxDomains::new();
        for i in 0..NUM_VARS {
            domains.set_bounds(Var::new(i), -2.0, 2.0);
        }
        let Some(v0) = (0..20).find_map(|_| value_at(&graph, e, &random_point(&mut rng))) else {
            graph.release(e);
            continue;
        };
        let constraint = Interval::new(v0 - 1.0, v0 + 1.0);

        let mut session = PropagationSession::new(&graph, PropagationConfig::default());
        let result = session.propagate(&[(e, constraint)], &mut domains);
        assert!(result.is_ok(), "{} in {} declared infeasible", graph.to_infix(e), constraint);

        for _ in 0..100 {
            let point = random_point(&mut rng);
            let Some(value) = value_at(&graph, e, &point) else {
                continue;
            };
            if !constraint.contains(value) {
                continue;
            }
            for (i, &x) in point.iter().enumerate() {
                let bounds = domains.bounds(Var::new(i as u32));
                assert!(
                    close_to(bounds, x),
                    "feasible x{} = {} cut off by {} for {} in {}",
                    i,
                    x,
                    bounds,
                    graph.to_infix(e),
                    constraint
                );
            }
        }
        graph.release(e);
    }
}

#[test]
fn deduplication_is_correct() {
    let mut rng = ChaCha8Rng::seed_from_u64(31);
    let graph = ExprGraph::default();

    for _ in 0..50 {
        let mut roots: Vec<ExprRef> = (0..3)
            .map(|_| {
                let raw = random_expr(&graph, &mut rng, 3);
                let s = graph.simplify(raw);
                graph.release(raw);
                s
            })
            .collect();
        let points: Vec<Vec<f64>> = (0..5).map(|_| random_point(&mut rng)).collect();
        let before: Vec<Vec<Option<f64>>> = roots
            .iter()
            .map(|&r| points.iter().map(|p| graph.evaluate(r, &at(p), 0)).collect())
            .collect();

        graph.deduplicate(&mut roots);

        let mut nodes: Vec<ExprRef> = Vec::new();
        for &r in &roots {
            for e in graph.post_order(r) {
                if !nodes.contains(&e) {
                    nodes.push(e);
                }
            }
        }
        for (i, &a) in nodes.iter().enumerate() {
            for &b in &nodes[i + 1..] {
                assert_ne!(
                    graph.compare(a, b),
                    Ordering::Equal,
                    "{} and {} survived",
                    graph.to_infix(a),
                    graph.to_infix(b)
                );
            }
        }
        for (r, expected) in roots.iter().zip(&before) {
            let actual: Vec<Option<f64>> = points.iter().map(|p| graph.evaluate(*r, &at(p), 0)).collect();
            assert_eq!(&actual, expected);
        }
        release_all(&graph, &roots);
    }
    assert_eq!(graph.num_nodes(), 0);
}
