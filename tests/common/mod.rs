#![allow(dead_code)]

use nlexpr_rs::graph::ExprGraph;
use nlexpr_rs::reference::ExprRef;
use nlexpr_rs::types::Var;
use rand::Rng;
use rand_chacha::ChaCha8Rng;

pub const NUM_VARS: u32 = 3;

/// Exponents of generated powers: fractional ones are undefined on negative bases and negative
/// ones have a pole at zero.
pub const EXPONENTS: [f64; 6] = [0.5, 1.5, -1.0, -2.0, 2.0, 3.0];

/// Random raw expression over `NUM_VARS` variables, as an owned reference.
///
/// Every variable occurrence is a fresh node, so equal subexpressions are never shared.
pub fn random_expr(graph: &ExprGraph, rng: &mut ChaCha8Rng, depth: usize) -> ExprRef {
    if depth == 0 || rng.random_bool(0.3) {
        return if rng.random_bool(0.8) {
            graph.mk_var(Var::new(rng.random_range(0..NUM_VARS)))
        } else {
            graph.mk_value(rng.random_range(-3..=3) as f64)
        };
    }

    match rng.random_range(0..3) {
        0 => {
            let n = rng.random_range(1..=3);
            let children: Vec<ExprRef> = (0..n).map(|_| random_expr(graph, rng, depth - 1)).collect();
            let coefs: Vec<f64> = (0..n).map(|_| rng.random_range(-3..=3) as f64).collect();
            let constant = rng.random_range(-2..=2) as f64;
            let e = graph.mk_sum(&children, &coefs, constant);
            release_all(graph, &children);
            e
        }
        1 => {
            let children = [random_expr(graph, rng, depth - 1), random_expr(graph, rng, depth - 1)];
            let coef = [1.0, 2.0, -1.0][rng.random_range(0..3)];
            let e = graph.mk_product(&children, coef);
            release_all(graph, &children);
            e
        }
        _ => {
            let base = random_expr(graph, rng, depth - 1);
            let exponent = EXPONENTS[rng.random_range(0..EXPONENTS.len())];
            let e = graph.mk_pow(base, exponent);
            graph.release(base);
            e
        }
    }
}

/// Largest magnitude among the values cached by the last evaluation of `expr`.
pub fn magnitude(graph: &ExprGraph, expr: ExprRef) -> f64 {
    graph
        .post_order(expr)
        .into_iter()
        .filter_map(|e| graph.node(e).value())
        .fold(0.0, |m: f64, v| m.max(v.abs()))
}

/// Value of `expr` at `point`, if defined and finite.
pub fn value_at(graph: &ExprGraph, expr: ExprRef, point: &[f64]) -> Option<f64> {
    graph.evaluate(expr, &at(point), 0).filter(|v| v.is_finite())
}

pub fn release_all(graph: &ExprGraph, exprs: &[ExprRef]) {
    for &e in exprs {
        graph.release(e);
    }
}

/// Random point with every coordinate in `[-2, 2]`.
pub fn random_point(rng: &mut ChaCha8Rng) -> Vec<f64> {
    (0..NUM_VARS).map(|_| rng.random_range(-2.0..=2.0)).collect()
}

pub fn at(point: &[f64]) -> impl Fn(Var) -> f64 + '_ {
    move |v| point[v.id() as usize]
}
