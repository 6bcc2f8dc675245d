//! Product `coef * prod(children[i])`.
//!
//! A simplified product has:
//! - at least two factors and coefficient 1,
//! - no factor that is a value, a product or a scaled single term,
//! - no two factors with equal base (`x` and `x^2` share the base `x`),
//! - factors sorted by decreasing order of their bases.
//!
//! A scaled product is expressed as `sum(0, coef * prod)`.

use std::cmp::Ordering;
use std::collections::VecDeque;
use std::fmt;

use log::debug;

use crate::compare::CompareSteps;
use crate::graph::ExprGraph;
use crate::handler::{Estimator, ExprHandler, HandlerCaps};
use crate::handlers::{PowHandler, SumHandler};
use crate::interval::Interval;
use crate::node::ExprData;
use crate::reference::ExprRef;
use crate::types::{Curvature, Monotonicity, Var};
use crate::utils::{fib_hash, hash_name, mix};
use crate::walk::WalkStage;

pub const PRODUCT_PRECEDENCE: u32 = 50000;

pub struct ProductHandler;

/// Split a factor into base and exponent (`x^e -> (x, e)`, `x -> (x, 1)`).
fn base_exponent(graph: &ExprGraph, factor: ExprRef) -> (ExprRef, f64) {
    match graph.data(factor) {
        ExprData::Pow { exponent } => (graph.child(factor, 0), exponent),
        _ => (factor, 1.0),
    }
}

/// Factors being collected by [`ProductHandler::simplify`].
struct Factors {
    /// Sorted by decreasing order of their bases.
    list: Vec<ExprRef>,
    /// Nodes created during the merge; released once the result is built.
    owned: Vec<ExprRef>,
    changed: bool,
}

impl Factors {
    /// Insert `factor` at its sorted position, or merge it with the factor of equal base.
    ///
    /// A merged factor is removed from the list and returned, to be processed again.
    fn merge(&mut self, graph: &ExprGraph, factor: ExprRef) -> Option<ExprRef> {
        let (base, exponent) = base_exponent(graph, factor);
        for i in 0..self.list.len() {
            let (other_base, other_exponent) = base_exponent(graph, self.list[i]);
            match graph.compare(other_base, base) {
                Ordering::Greater => continue,
                Ordering::Less => {
                    self.list.insert(i, factor);
                    self.changed = true;
                    return None;
                }
                Ordering::Equal => {
                    self.list.remove(i);
                    self.changed = true;
                    let pow = graph.mk_pow(other_base, other_exponent + exponent);
                    let merged = PowHandler.simplify(graph, pow);
                    graph.release(pow);
                    self.owned.push(merged);
                    return Some(merged);
                }
            }
        }
        self.list.push(factor);
        None
    }
}

impl ExprHandler for ProductHandler {
    fn name(&self) -> &str {
        "prod"
    }

    fn description(&self) -> &str {
        "product with coefficient"
    }

    fn precedence(&self) -> u32 {
        PRODUCT_PRECEDENCE
    }

    fn caps(&self) -> HandlerCaps {
        HandlerCaps::SIMPLIFY
            | HandlerCaps::COMPARE
            | HandlerCaps::PRINT
            | HandlerCaps::INTEVAL
            | HandlerCaps::REVERSEPROP
            | HandlerCaps::HASH
            | HandlerCaps::BWDIFF
            | HandlerCaps::CURVATURE
            | HandlerCaps::MONOTONICITY
            | HandlerCaps::INTEGRALITY
            | HandlerCaps::ESTIMATE
            | HandlerCaps::BRANCHSCORE
    }

    fn eval(&self, graph: &ExprGraph, expr: ExprRef, children: &[f64], _: &dyn Fn(Var) -> f64) -> Option<f64> {
        Some(children.iter().fold(graph.product_coef(expr), |acc, x| acc * x))
    }

    fn simplify(&self, graph: &ExprGraph, expr: ExprRef) -> ExprRef {
        let mut coef = graph.product_coef(expr);
        let mut queue: VecDeque<ExprRef> = graph.children(expr).into();
        let mut factors = Factors {
            list: Vec::with_capacity(queue.len()),
            owned: Vec::new(),
            changed: false,
        };

        while let Some(factor) = queue.pop_front() {
            match graph.data(factor) {
                ExprData::Value(v) => {
                    coef *= v;
                    factors.changed = true;
                }
                ExprData::Product { coef: c } => {
                    coef *= c;
                    factors.changed = true;
                    for g in graph.children(factor).into_iter().rev() {
                        queue.push_front(g);
                    }
                }
                ExprData::Sum { coefs, constant } if coefs.len() == 1 && constant == 0.0 => {
                    coef *= coefs[0];
                    factors.changed = true;
                    queue.push_front(graph.child(factor, 0));
                }
                _ => {
                    if let Some(merged) = factors.merge(graph, factor) {
                        queue.push_front(merged);
                    }
                }
            }
        }

        let result = if coef == 0.0 {
            graph.mk_value(0.0)
        } else if factors.list.is_empty() {
            graph.mk_value(coef)
        } else if factors.list.len() == 1 {
            let factor = factors.list[0];
            if coef == 1.0 {
                graph.capture(factor);
                factor
            } else {
                let sum = graph.mk_sum(&[factor], &[coef], 0.0);
                let simplified = SumHandler.simplify(graph, sum);
                graph.release(sum);
                simplified
            }
        } else if !factors.changed && coef == 1.0 {
            graph.capture(expr);
            expr
        } else {
            let product = graph.mk_product(&factors.list, 1.0);
            if coef == 1.0 {
                product
            } else {
                let sum = graph.mk_sum(&[product], &[coef], 0.0);
                graph.release(product);
                sum
            }
        };

        for e in factors.owned {
            graph.release(e);
        }
        if result != expr {
            debug!("product {} simplified to {}", expr, result);
        }
        result
    }

    fn compare(&self, graph: &ExprGraph, a: ExprRef, b: ExprRef, steps: &mut CompareSteps) {
        steps
            .children(graph, a, b)
            .floats(graph.product_coef(a), graph.product_coef(b));
    }

    fn print(
        &self,
        graph: &ExprGraph,
        expr: ExprRef,
        stage: WalkStage,
        child: usize,
        parent_precedence: u32,
        out: &mut dyn fmt::Write,
    ) -> fmt::Result {
        let parens = PRODUCT_PRECEDENCE <= parent_precedence;
        match stage {
            WalkStage::Enter => {
                if parens {
                    write!(out, "(")?;
                }
                let coef = graph.product_coef(expr);
                if coef == -1.0 {
                    write!(out, "-")
                } else if coef != 1.0 {
                    write!(out, "{}*", coef)
                } else {
                    Ok(())
                }
            }
            WalkStage::VisitingChild if child > 0 => write!(out, "*"),
            WalkStage::Leave if parens => write!(out, ")"),
            _ => Ok(()),
        }
    }

    fn interval(
        &self,
        graph: &ExprGraph,
        expr: ExprRef,
        children: &[Interval],
        _: &mut dyn FnMut(Var) -> Interval,
    ) -> Interval {
        children
            .iter()
            .fold(Interval::point(1.0), |acc, c| acc.mul(c))
            .mul_scalar(graph.product_coef(expr))
    }

    fn reverse_prop(
        &self,
        graph: &ExprGraph,
        expr: ExprRef,
        bounds: Interval,
        children: &[Interval],
    ) -> Option<Vec<Interval>> {
        if bounds.is_entire() {
            return None;
        }
        let coef = graph.product_coef(expr);
        let result = (0..children.len())
            .map(|i| {
                let others = children
                    .iter()
                    .enumerate()
                    .filter(|&(j, _)| j != i)
                    .fold(Interval::point(coef), |acc, (_, c)| acc.mul(c));
                if others.contains(0.0) {
                    Interval::ENTIRE
                } else {
                    bounds.div(&others)
                }
            })
            .collect();
        Some(result)
    }

    fn hash(&self, graph: &ExprGraph, expr: ExprRef, children: &[u64]) -> u64 {
        let seed = hash_name(self.name()) ^ fib_hash(graph.product_coef(expr));
        children.iter().fold(seed, |h, &c| mix(h, c))
    }

    fn bwdiff(&self, graph: &ExprGraph, expr: ExprRef, child: usize, children: &[f64], _: f64) -> Option<f64> {
        let partial = children
            .iter()
            .enumerate()
            .filter(|&(j, _)| j != child)
            .fold(graph.product_coef(expr), |acc, (_, x)| acc * x);
        Some(partial)
    }

    fn curvature(&self, graph: &ExprGraph, expr: ExprRef, children: &[Curvature]) -> Curvature {
        match children {
            [single] => single.scale(graph.product_coef(expr)),
            _ => Curvature::Unknown,
        }
    }

    fn monotonicity(&self, graph: &ExprGraph, expr: ExprRef, child: usize) -> Monotonicity {
        let others = graph
            .children(expr)
            .into_iter()
            .enumerate()
            .filter(|&(j, _)| j != child)
            .fold(Interval::point(graph.product_coef(expr)), |acc, (_, c)| {
                acc.mul(&graph.activity(c))
            });
        if others.is_point() && others.inf == 0.0 {
            Monotonicity::Constant
        } else if others.is_nonnegative() {
            Monotonicity::Increasing
        } else if others.is_nonpositive() {
            Monotonicity::Decreasing
        } else {
            Monotonicity::Unknown
        }
    }

    fn integrality(&self, graph: &ExprGraph, expr: ExprRef, children: &[bool], _: &dyn Fn(Var) -> bool) -> bool {
        graph.product_coef(expr).fract() == 0.0 && children.iter().all(|&b| b)
    }

    /// Linear for one factor, McCormick envelopes for two, nothing otherwise.
    fn estimate(
        &self,
        graph: &ExprGraph,
        expr: ExprRef,
        children: &[f64],
        bounds: &[Interval],
        overestimate: bool,
    ) -> Option<Estimator> {
        let coef = graph.product_coef(expr);
        match (children, bounds) {
            ([_], _) => Some(Estimator {
                coefs: vec![coef],
                constant: 0.0,
                local: false,
            }),
            ([x, y], [bx, by]) => {
                if [bx.inf, bx.sup, by.inf, by.sup].iter().any(|b| !b.is_finite()) {
                    return None;
                }
                // xy >= xl*y + yl*x - xl*yl, xy >= xu*y + yu*x - xu*yu (under),
                // xy <= xu*y + yl*x - xu*yl, xy <= xl*y + yu*x - xl*yu (over)
                let over = overestimate != (coef < 0.0);
                let candidates = if over {
                    [(by.inf, bx.sup, -bx.sup * by.inf), (by.sup, bx.inf, -bx.inf * by.sup)]
                } else {
                    [(by.inf, bx.inf, -bx.inf * by.inf), (by.sup, bx.sup, -bx.sup * by.sup)]
                };
                let at = |(cx, cy, c): (f64, f64, f64)| cx * x + cy * y + c;
                let (cx, cy, c) = if (at(candidates[0]) <= at(candidates[1])) == over {
                    candidates[0]
                } else {
                    candidates[1]
                };
                Some(Estimator {
                    coefs: vec![coef * cx, coef * cy],
                    constant: coef * c,
                    local: true,
                })
            }
            _ => None,
        }
    }

    /// Every factor that is not fixed gets the full violation.
    fn branch_score(&self, graph: &ExprGraph, expr: ExprRef, violation: f64) -> Vec<(usize, f64)> {
        graph
            .children(expr)
            .into_iter()
            .enumerate()
            .filter(|&(_, c)| !graph.activity(c).is_point())
            .map(|(i, _)| (i, violation))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;

    fn iv(inf: f64, sup: f64) -> Interval {
        Interval::new(inf, sup)
    }

    #[test]
    fn test_fold_values_and_flatten() {
        let graph = ExprGraph::default();
        let x = graph.mk_var(Var::new(0));
        let y = graph.mk_var(Var::new(1));
        let two = graph.mk_value(2.0);
        let inner = graph.mk_product(&[x, two], 3.0);
        let p = graph.mk_product(&[inner, y], 1.0);

        // 3 * (x * 2) * y  =>  6 * (y * x)
        let r = graph.simplify(p);
        assert!(graph.is_sum(r));
        assert_eq!(graph.sum_coefs(r), vec![6.0]);
        assert_eq!(graph.sum_constant(r), 0.0);
        let prod = graph.child(r, 0);
        assert!(graph.is_product(prod));
        assert_eq!(graph.product_coef(prod), 1.0);
        assert_eq!(graph.children(prod), vec![y, x]);
    }

    #[test]
    fn test_merge_equal_bases() {
        let graph = ExprGraph::default();
        let x = graph.mk_var(Var::new(0));
        let x2 = graph.mk_pow(x, 2.0);
        let p = graph.mk_product(&[x, x2], 1.0);

        let r = graph.simplify(p);
        assert!(graph.is_pow(r));
        assert_eq!(graph.pow_exponent(r), 3.0);
        assert_eq!(graph.child(r, 0), x);
    }

    #[test]
    fn test_merge_to_one() {
        let graph = ExprGraph::default();
        let x = graph.mk_var(Var::new(0));
        let y = graph.mk_var(Var::new(1));
        let inv = graph.mk_pow(x, -1.0);
        let p = graph.mk_product(&[x, inv, y], 2.0);

        // 2 * x * x^-1 * y  =>  2 * y
        let r = graph.simplify(p);
        assert!(graph.is_sum(r));
        assert_eq!(graph.children(r), vec![y]);
        assert_eq!(graph.sum_coefs(r), vec![2.0]);
    }

    #[test]
    fn test_zero_and_constant() {
        let graph = ExprGraph::default();
        let x = graph.mk_var(Var::new(0));
        let zero = graph.mk_value(0.0);
        let p = graph.mk_product(&[x, zero], 5.0);
        let r = graph.simplify(p);
        assert!(graph.is_value(r));
        assert_eq!(graph.value_of(r), 0.0);

        let three = graph.mk_value(3.0);
        let p = graph.mk_product(&[three], 2.0);
        let r = graph.simplify(p);
        assert_eq!(graph.value_of(r), 6.0);
    }

    #[test]
    fn test_single_factor_collapses() {
        let graph = ExprGraph::default();
        let x = graph.mk_var(Var::new(0));
        let p = graph.mk_product(&[x], 1.0);
        assert_eq!(graph.simplify(p), x);
    }

    #[test]
    fn test_simplified_product_is_reused() {
        let graph = ExprGraph::default();
        let x = graph.mk_var(Var::new(0));
        let y = graph.mk_var(Var::new(1));
        let p = graph.mk_product(&[y, x], 1.0);
        assert_eq!(graph.simplify(p), p);
    }

    #[test]
    fn test_interval_and_reverse() {
        let graph = ExprGraph::default();
        let x = graph.mk_var(Var::new(0));
        let y = graph.mk_var(Var::new(1));
        let p = graph.mk_product(&[x, y], 2.0);

        let r = ProductHandler.interval(&graph, p, &[iv(1.0, 2.0), iv(-1.0, 3.0)], &mut |_| Interval::ENTIRE);
        assert_eq!(r, iv(-4.0, 12.0));

        // 2xy in [2, 4], x in [1, 2], y in [-1, 3]: x bounds not derivable (y contains 0)
        let r = ProductHandler
            .reverse_prop(&graph, p, iv(2.0, 4.0), &[iv(1.0, 2.0), iv(-1.0, 3.0)])
            .unwrap();
        assert!(r[0].is_entire());
        assert_eq!(r[1], iv(0.5, 2.0));
    }

    #[test]
    fn test_bwdiff() {
        let graph = ExprGraph::default();
        let x = graph.mk_var(Var::new(0));
        let y = graph.mk_var(Var::new(1));
        let p = graph.mk_product(&[x, y], 3.0);
        assert_eq!(ProductHandler.bwdiff(&graph, p, 0, &[2.0, 5.0], 30.0), Some(15.0));
        assert_eq!(ProductHandler.bwdiff(&graph, p, 1, &[2.0, 5.0], 30.0), Some(6.0));
    }

    #[test]
    fn test_print() {
        let graph = ExprGraph::default();
        let x = graph.mk_var(Var::new(0));
        let y = graph.mk_var(Var::new(1));
        let p = graph.mk_product(&[x, y], -1.0);
        assert_eq!(graph.to_infix(p), "-x0*x1");
        let sq = graph.mk_pow(p, 2.0);
        assert_eq!(graph.to_infix(sq), "(-x0*x1)^2");
    }

    #[test]
    fn test_mccormick() {
        let graph = ExprGraph::default();
        let x = graph.mk_var(Var::new(0));
        let y = graph.mk_var(Var::new(1));
        let p = graph.mk_product(&[x, y], 1.0);
        let bounds = [iv(0.0, 2.0), iv(1.0, 3.0)];
        let point = [1.0, 2.0];

        let under = ProductHandler.estimate(&graph, p, &point, &bounds, false).unwrap();
        let over = ProductHandler.estimate(&graph, p, &point, &bounds, true).unwrap();
        assert!(under.local);
        // valid at the corners of the box
        for &vx in &[0.0, 2.0] {
            for &vy in &[1.0, 3.0] {
                assert!(under.eval(&[vx, vy]) <= vx * vy + 1e-12);
                assert!(over.eval(&[vx, vy]) >= vx * vy - 1e-12);
            }
        }
        assert!(under.eval(&point) <= 2.0 && over.eval(&point) >= 2.0);
    }
}
