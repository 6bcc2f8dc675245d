//! Weighted sum `constant + sum(coefs[i] * children[i])`.
//!
//! A simplified sum has:
//! - no child that is a sum or a value,
//! - no two children comparing equal,
//! - children sorted by decreasing order (the dominant term first),
//! - no zero coefficient,
//! - at least one child, and not exactly one child with coefficient 1 and constant 0.

use std::cmp::Ordering;
use std::fmt;

use log::debug;

use crate::compare::CompareSteps;
use crate::graph::ExprGraph;
use crate::handler::{Estimator, ExprHandler, HandlerCaps};
use crate::interval::Interval;
use crate::node::ExprData;
use crate::reference::ExprRef;
use crate::rounding::{add_down, sub_down};
use crate::types::{Curvature, Monotonicity, Var};
use crate::utils::{fib_hash, hash_name, mix};
use crate::walk::WalkStage;

pub const SUM_PRECEDENCE: u32 = 40000;

pub struct SumHandler;

/// Terms contributed by one child of a sum being simplified.
///
/// Values fold into `constant`; a child sum is distributed.
fn expand_term(graph: &ExprGraph, child: ExprRef, coef: f64, constant: &mut f64, changed: &mut bool) -> Vec<(ExprRef, f64)> {
    match graph.data(child) {
        ExprData::Value(v) => {
            *constant += coef * v;
            *changed = true;
            Vec::new()
        }
        ExprData::Sum { coefs, constant: c } => {
            *changed = true;
            *constant += coef * c;
            let grandchildren = graph.children(child);
            if grandchildren.len() == 1 && coef * coefs[0] == 1.0 {
                vec![(grandchildren[0], 1.0)]
            } else {
                grandchildren
                    .into_iter()
                    .zip(coefs)
                    .map(|(g, c)| (g, coef * c))
                    .filter(|&(_, c)| c != 0.0)
                    .collect()
            }
        }
        _ => vec![(child, coef)],
    }
}

/// Merge two term lists sorted by decreasing order, summing the coefficients of equal terms
/// and dropping terms whose coefficient becomes zero.
fn merge_terms(graph: &ExprGraph, terms: &mut Vec<(ExprRef, f64)>, new: Vec<(ExprRef, f64)>, changed: &mut bool) {
    if new.is_empty() {
        return;
    }
    if terms.is_empty() {
        *terms = new;
        return;
    }

    let old = std::mem::take(terms);
    let mut merged = Vec::with_capacity(old.len() + new.len());
    let (mut i, mut j) = (0, 0);
    while i < old.len() && j < new.len() {
        match graph.compare(old[i].0, new[j].0) {
            Ordering::Greater => {
                merged.push(old[i]);
                i += 1;
            }
            Ordering::Less => {
                merged.push(new[j]);
                j += 1;
                *changed = true;
            }
            Ordering::Equal => {
                let coef = old[i].1 + new[j].1;
                if coef != 0.0 {
                    merged.push((old[i].0, coef));
                }
                i += 1;
                j += 1;
                *changed = true;
            }
        }
    }
    merged.extend_from_slice(&old[i..]);
    merged.extend_from_slice(&new[j..]);
    *terms = merged;
}

/// Candidate child intervals for `constant + sum(coefs[i] * x[i]) in bounds`.
///
/// For child `i` the bound is `(bounds - constant - sum_{j != i} coefs[j] * x[j]) / coefs[i]`, with
/// the activity sums accumulated in downward rounding (the upper activity as a negated downward
/// sum). A side can only be used for child `i` if no other child is unbounded on it; if the
/// only unbounded contributor is `i` itself, the remaining activity gives its bound.
///
/// Returns `None` if nothing can be deduced.
pub fn reverse_weighted_sum(coefs: &[f64], constant: f64, bounds: Interval, children: &[Interval]) -> Option<Vec<Interval>> {
    if bounds.is_entire() {
        return None;
    }

    let scaled: Vec<Interval> = children.iter().zip(coefs).map(|(c, &w)| c.mul_scalar(w)).collect();

    let mut min_activity = constant;
    let mut neg_max_activity = -constant;
    let mut min_inf = 0usize;
    let mut max_inf = 0usize;
    for b in &scaled {
        if b.inf == f64::NEG_INFINITY {
            min_inf += 1;
        } else {
            min_activity = add_down(min_activity, b.inf);
        }
        if b.sup == f64::INFINITY {
            max_inf += 1;
        } else {
            neg_max_activity = add_down(neg_max_activity, -b.sup);
        }
    }
    let max_activity = -neg_max_activity;

    if (min_inf >= 2 || bounds.sup == f64::INFINITY) && (max_inf >= 2 || bounds.inf == f64::NEG_INFINITY) {
        return None;
    }

    let result = scaled
        .iter()
        .zip(coefs)
        .map(|(b, &w)| {
            let mut child = Interval::ENTIRE;
            if bounds.sup < f64::INFINITY {
                if b.inf == f64::NEG_INFINITY {
                    if min_inf == 1 {
                        child.sup = -sub_down(min_activity, bounds.sup);
                    }
                } else if min_inf == 0 {
                    child.sup = -sub_down(sub_down(min_activity, bounds.sup), b.inf);
                }
            }
            if bounds.inf > f64::NEG_INFINITY {
                if b.sup == f64::INFINITY {
                    if max_inf == 1 {
                        child.inf = sub_down(bounds.inf, max_activity);
                    }
                } else if max_inf == 0 {
                    child.inf = add_down(sub_down(bounds.inf, max_activity), b.sup);
                }
            }
            child.div_scalar(w)
        })
        .collect();
    Some(result)
}

impl ExprHandler for SumHandler {
    fn name(&self) -> &str {
        "sum"
    }

    fn description(&self) -> &str {
        "weighted sum with constant"
    }

    fn precedence(&self) -> u32 {
        SUM_PRECEDENCE
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
    }

    fn eval(&self, graph: &ExprGraph, expr: ExprRef, children: &[f64], _: &dyn Fn(Var) -> f64) -> Option<f64> {
        let coefs = graph.sum_coefs(expr);
        let constant = graph.sum_constant(expr);
        Some(coefs.iter().zip(children).fold(constant, |acc, (c, x)| acc + c * x))
    }

    fn simplify(&self, graph: &ExprGraph, expr: ExprRef) -> ExprRef {
        let children = graph.children(expr);
        let coefs = graph.sum_coefs(expr);
        let mut constant = graph.sum_constant(expr);
        let mut changed = false;

        let mut terms: Vec<(ExprRef, f64)> = Vec::with_capacity(children.len());
        for (&child, &coef) in children.iter().zip(&coefs) {
            if coef == 0.0 {
                changed = true;
                continue;
            }
            let expanded = expand_term(graph, child, coef, &mut constant, &mut changed);
            merge_terms(graph, &mut terms, expanded, &mut changed);
        }

        if terms.is_empty() {
            debug!("sum {} collapsed to constant {}", expr, constant);
            return graph.mk_value(constant);
        }
        if terms.len() == 1 && terms[0].1 == 1.0 && constant == 0.0 {
            let (child, _) = terms[0];
            debug!("sum {} collapsed to its child {}", expr, child);
            graph.capture(child);
            return child;
        }
        if !changed {
            graph.capture(expr);
            return expr;
        }

        let (children, coefs): (Vec<ExprRef>, Vec<f64>) = terms.into_iter().unzip();
        graph.mk_sum(&children, &coefs, constant)
    }

    /// Terms pairwise (child, then coefficient), then the number of terms, then the constant.
    fn compare(&self, graph: &ExprGraph, a: ExprRef, b: ExprRef, steps: &mut CompareSteps) {
        let (ca, cb) = (graph.children(a), graph.children(b));
        let (wa, wb) = (graph.sum_coefs(a), graph.sum_coefs(b));
        for i in 0..ca.len().min(cb.len()) {
            steps.exprs(ca[i], cb[i]).floats(wa[i], wb[i]);
        }
        steps
            .order(ca.len().cmp(&cb.len()))
            .floats(graph.sum_constant(a), graph.sum_constant(b));
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
        let parens = SUM_PRECEDENCE <= parent_precedence;
        match stage {
            WalkStage::Enter => {
                if parens {
                    write!(out, "(")?;
                }
                let constant = graph.sum_constant(expr);
                if constant != 0.0 {
                    write!(out, "{}", constant)?;
                }
                Ok(())
            }
            WalkStage::VisitingChild => {
                let coef = graph.sum_coefs(expr)[child];
                let first = child == 0 && graph.sum_constant(expr) == 0.0;
                if coef == 1.0 {
                    if !first {
                        write!(out, "+")?;
                    }
                    Ok(())
                } else if coef == -1.0 {
                    write!(out, "-")
                } else if first {
                    write!(out, "{}*", coef)
                } else {
                    write!(out, "{:+}*", coef)
                }
            }
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
        let coefs = graph.sum_coefs(expr);
        children
            .iter()
            .zip(&coefs)
            .fold(Interval::point(graph.sum_constant(expr)), |acc, (c, &w)| {
                acc.add(&c.mul_scalar(w))
            })
    }

    fn reverse_prop(
        &self,
        graph: &ExprGraph,
        expr: ExprRef,
        bounds: Interval,
        children: &[Interval],
    ) -> Option<Vec<Interval>> {
        reverse_weighted_sum(&graph.sum_coefs(expr), graph.sum_constant(expr), bounds, children)
    }

    fn hash(&self, graph: &ExprGraph, expr: ExprRef, children: &[u64]) -> u64 {
        let coefs = graph.sum_coefs(expr);
        let seed = hash_name(self.name()) ^ fib_hash(graph.sum_constant(expr));
        coefs
            .iter()
            .zip(children)
            .fold(seed, |h, (&w, &c)| mix(h, mix(fib_hash(w), c)))
    }

    fn bwdiff(&self, graph: &ExprGraph, expr: ExprRef, child: usize, _: &[f64], _: f64) -> Option<f64> {
        Some(graph.sum_coefs(expr)[child])
    }

    fn curvature(&self, graph: &ExprGraph, expr: ExprRef, children: &[Curvature]) -> Curvature {
        let coefs = graph.sum_coefs(expr);
        children
            .iter()
            .zip(&coefs)
            .fold(Curvature::Linear, |acc, (c, &w)| acc.meet(c.scale(w)))
    }

    fn monotonicity(&self, graph: &ExprGraph, expr: ExprRef, child: usize) -> Monotonicity {
        let coef = graph.sum_coefs(expr)[child];
        if coef > 0.0 {
            Monotonicity::Increasing
        } else if coef < 0.0 {
            Monotonicity::Decreasing
        } else {
            Monotonicity::Constant
        }
    }

    fn integrality(&self, graph: &ExprGraph, expr: ExprRef, children: &[bool], _: &dyn Fn(Var) -> bool) -> bool {
        let coefs = graph.sum_coefs(expr);
        graph.sum_constant(expr).fract() == 0.0
            && coefs.iter().zip(children).all(|(w, &integral)| integral && w.fract() == 0.0)
    }

    fn estimate(&self, graph: &ExprGraph, expr: ExprRef, _: &[f64], _: &[Interval], _: bool) -> Option<Estimator> {
        Some(Estimator {
            coefs: graph.sum_coefs(expr),
            constant: graph.sum_constant(expr),
            local: false,
        })
    }
}
