//! Simplification and propagation benchmarks.
//!
//! Expressions are random sums of products and powers over a few variables, so simplification
//! has plenty of terms to merge and propagation has shared variables to tighten.
//!
//! Run with:
//! ```bash
//! cargo bench --bench simplify
//! ```

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use nlexpr_rs::config::PropagationConfig;
use nlexpr_rs::domain::BoxDomains;
use nlexpr_rs::graph::ExprGraph;
use nlexpr_rs::interval::Interval;
use nlexpr_rs::propagate::PropagationSession;
use nlexpr_rs::reference::ExprRef;
use nlexpr_rs::types::Var;
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;

const NUM_VARS: u32 = 8;

// ============================================================================
// Helper: random polynomial
// ============================================================================

/// Random sum of `terms` monomials `c * x_i * x_j` and `c * x_i^k`.
fn random_polynomial(graph: &ExprGraph, rng: &mut ChaCha8Rng, terms: usize) -> ExprRef {
    let mut children = Vec::with_capacity(terms);
    let mut coefs = Vec::with_capacity(terms);
    for _ in 0..terms {
        let x = graph.mk_var(Var::new(rng.random_range(0..NUM_VARS)));
        let term = if rng.random_bool(0.5) {
            let y = graph.mk_var(Var::new(rng.random_range(0..NUM_VARS)));
            let p = graph.mk_product(&[x, y], 1.0);
            graph.release(y);
            p
        } else {
            graph.mk_pow(x, rng.random_range(2..=3) as f64)
        };
        graph.release(x);
        children.push(term);
        coefs.push(rng.random_range(-5..=5) as f64);
    }
    let sum = graph.mk_sum(&children, &coefs, 0.0);
    for c in children {
        graph.release(c);
    }
    sum
}

// ============================================================================
// Simplification
// ============================================================================

fn bench_simplify(c: &mut Criterion) {
    let mut group = c.benchmark_group("simplify");
    group.sample_size(20);

    for terms in [10, 100, 1000] {
        group.throughput(Throughput::Elements(terms as u64));
        group.bench_with_input(BenchmarkId::new("random_polynomial", terms), &terms, |b, &terms| {
            let mut rng = ChaCha8Rng::seed_from_u64(42);
            b.iter(|| {
                let graph = ExprGraph::default();
                let raw = random_polynomial(&graph, &mut rng, terms);
                let simplified = graph.simplify(raw);
                let n = graph.num_children(simplified);
                graph.release(simplified);
                graph.release(raw);
                n
            });
        });
    }

    group.finish();
}

// ============================================================================
// Interval propagation
// ============================================================================

fn bench_propagate(c: &mut Criterion) {
    let mut group = c.benchmark_group("propagate");
    group.sample_size(20);

    for terms in [10, 100, 1000] {
        let graph = ExprGraph::default();
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let raw = random_polynomial(&graph, &mut rng, terms);
        let f = graph.simplify(raw);
        graph.release(raw);

        group.throughput(Throughput::Elements(terms as u64));
        group.bench_with_input(BenchmarkId::new("random_polynomial", terms), &f, |b, &f| {
            b.iter(|| {
                let mut domains = BoxDomains::new();
                for i in 0..NUM_VARS {
                    domains.set_bounds(Var::new(i), -10.0, 10.0);
                }
                let mut session = PropagationSession::new(&graph, PropagationConfig::default());
                session
                    .propagate(&[(f, Interval::new(f64::NEG_INFINITY, 1.0))], &mut domains)
                    .map(|r| r.tightenings)
            });
        });

        graph.release(f);
    }

    group.finish();
}

// ============================================================================
// Common subexpression elimination
// ============================================================================

fn bench_deduplicate(c: &mut Criterion) {
    let mut group = c.benchmark_group("deduplicate");
    group.sample_size(20);

    for terms in [10, 100, 1000] {
        group.bench_with_input(BenchmarkId::new("fresh_leaves", terms), &terms, |b, &terms| {
            let mut rng = ChaCha8Rng::seed_from_u64(11);
            b.iter(|| {
                let graph = ExprGraph::default();
                let mut roots = [
                    random_polynomial(&graph, &mut rng, terms),
                    random_polynomial(&graph, &mut rng, terms),
                ];
                graph.deduplicate(&mut roots);
                let n = graph.num_nodes();
                for r in roots {
                    graph.release(r);
                }
                n
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_simplify, bench_propagate, bench_deduplicate);

criterion_main!(benches);
