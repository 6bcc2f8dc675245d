//! Power `base ^ exponent` with a constant exponent.

use std::fmt;

use log::debug;

use crate::compare::CompareSteps;
use crate::graph::ExprGraph;
use crate::handler::{Estimator, ExprHandler, HandlerCaps};
use crate::handlers::{ProductHandler, SumHandler};
use crate::interval::Interval;
use crate::node::ExprData;
use crate::reference::ExprRef;
use crate::types::{Curvature, Monotonicity, Var};
use crate::utils::{fib_hash, hash_name, mix};
use crate::walk::WalkStage;

pub const POW_PRECEDENCE: u32 = 55000;

/// Exponents this close to an integer are rounded by simplification.
const INTEGRAL_EPS: f64 = 1e-9;

/// Squares of sums with more terms than this are not expanded.
pub const MAX_EXPAND_TERMS: usize = 10;

pub struct PowHandler;

fn is_integral(e: f64) -> bool {
    e.fract() == 0.0
}

/// `x^e`, or `None` where it is undefined over the reals.
fn pow_value(x: f64, e: f64) -> Option<f64> {
    if (x < 0.0 && !is_integral(e)) || (x == 0.0 && e < 0.0) {
        return None;
    }
    let v = x.powf(e);
    v.is_finite().then_some(v)
}

/// Shape of `t -> t^e` over the part of `domain` where it is defined.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
struct Shape {
    convex: bool,
    concave: bool,
    increasing: bool,
    decreasing: bool,
}

fn shape(e: f64, domain: Interval) -> Option<Shape> {
    let nonneg = domain.inf >= 0.0;
    let nonpos = domain.sup <= 0.0;
    let even = is_integral(e) && e % 2.0 == 0.0;
    let shape = if is_integral(e) && e > 0.0 {
        if even {
            Shape {
                convex: true,
                increasing: nonneg,
                decreasing: nonpos,
                ..Default::default()
            }
        } else {
            Shape {
                convex: nonneg,
                concave: nonpos,
                increasing: true,
                ..Default::default()
            }
        }
    } else if is_integral(e) {
        if domain.inf > 0.0 {
            Shape {
                convex: true,
                decreasing: true,
                ..Default::default()
            }
        } else if domain.sup < 0.0 {
            Shape {
                convex: even,
                concave: !even,
                increasing: even,
                decreasing: !even,
            }
        } else {
            return None;
        }
    } else if e > 1.0 {
        Shape {
            convex: true,
            increasing: true,
            ..Default::default()
        }
    } else if e > 0.0 {
        Shape {
            concave: true,
            increasing: true,
            ..Default::default()
        }
    } else {
        Shape {
            convex: true,
            decreasing: true,
            ..Default::default()
        }
    };
    Some(shape)
}

impl PowHandler {
    /// Simplify a freshly created `pow(base, exponent)` and release it.
    fn simplify_new(&self, graph: &ExprGraph, base: ExprRef, exponent: f64) -> ExprRef {
        let pow = graph.mk_pow(base, exponent);
        let simplified = self.simplify(graph, pow);
        graph.release(pow);
        simplified
    }

    /// `coef * simplify(base ^ exponent)`, simplified as a sum.
    fn scaled_pow(&self, graph: &ExprGraph, base: ExprRef, exponent: f64, coef: f64) -> ExprRef {
        let inner = self.simplify_new(graph, base, exponent);
        let sum = graph.mk_sum(&[inner], &[coef], 0.0);
        graph.release(inner);
        let simplified = SumHandler.simplify(graph, sum);
        graph.release(sum);
        simplified
    }

    /// `(c + sum_i a_i x_i)^2` expanded into
    /// `c^2 + sum_i a_i^2 x_i^2 + sum_{j<i} 2 a_i a_j x_i x_j + sum_i 2 c a_i x_i`.
    fn expand_square(&self, graph: &ExprGraph, base: ExprRef, coefs: &[f64], constant: f64) -> ExprRef {
        let terms = graph.children(base);
        let mut children = Vec::with_capacity(terms.len() * (terms.len() + 3) / 2);
        let mut weights = Vec::with_capacity(children.capacity());
        let mut owned = Vec::new();
        for i in 0..terms.len() {
            for j in 0..=i {
                let product = graph.mk_product(&[terms[i], terms[j]], 1.0);
                let simplified = ProductHandler.simplify(graph, product);
                graph.release(product);
                owned.push(simplified);
                children.push(simplified);
                weights.push(if i == j { coefs[i] * coefs[i] } else { 2.0 * coefs[i] * coefs[j] });
            }
        }
        if constant != 0.0 {
            for (&t, &a) in terms.iter().zip(coefs) {
                children.push(t);
                weights.push(2.0 * constant * a);
            }
        }

        let sum = graph.mk_sum(&children, &weights, constant * constant);
        for e in owned {
            graph.release(e);
        }
        let simplified = SumHandler.simplify(graph, sum);
        graph.release(sum);
        simplified
    }
}

impl ExprHandler for PowHandler {
    fn name(&self) -> &str {
        "pow"
    }

    fn description(&self) -> &str {
        "power with constant exponent"
    }

    fn precedence(&self) -> u32 {
        POW_PRECEDENCE
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
        pow_value(children[0], graph.pow_exponent(expr))
    }

    fn simplify(&self, graph: &ExprGraph, expr: ExprRef) -> ExprRef {
        let base = graph.child(expr, 0);
        let mut exponent = graph.pow_exponent(expr);
        let rounded = exponent != exponent.round() && (exponent - exponent.round()).abs() < INTEGRAL_EPS;
        if rounded {
            exponent = exponent.round();
        }

        if exponent == 0.0 {
            return graph.mk_value(1.0);
        }
        if exponent == 1.0 {
            graph.capture(base);
            return base;
        }

        let integral = is_integral(exponent);
        match graph.data(base) {
            ExprData::Value(v) => {
                if let Some(r) = pow_value(v, exponent) {
                    return graph.mk_value(r);
                }
            }
            ExprData::Product { coef } if integral => {
                debug!("distributing exponent {} of {} over product {}", exponent, expr, base);
                let factors: Vec<ExprRef> = graph
                    .children(base)
                    .into_iter()
                    .map(|f| self.simplify_new(graph, f, exponent))
                    .collect();
                let product = graph.mk_product(&factors, coef.powf(exponent));
                for f in factors {
                    graph.release(f);
                }
                let simplified = ProductHandler.simplify(graph, product);
                graph.release(product);
                return simplified;
            }
            ExprData::Sum { coefs, constant } if integral && coefs.len() == 1 && constant == 0.0 => {
                return self.scaled_pow(graph, graph.child(base, 0), exponent, coefs[0].powf(exponent));
            }
            ExprData::Sum { coefs, constant } if exponent == 2.0 && coefs.len() <= MAX_EXPAND_TERMS => {
                debug!("expanding square {} of sum {}", expr, base);
                return self.expand_square(graph, base, &coefs, constant);
            }
            ExprData::Sum { coefs, constant } if !integral && coefs.len() == 1 && constant == 0.0 && coefs[0] > 0.0 => {
                return self.scaled_pow(graph, graph.child(base, 0), exponent, coefs[0].powf(exponent));
            }
            ExprData::Pow { exponent: inner } if integral => {
                return self.simplify_new(graph, graph.child(base, 0), inner * exponent);
            }
            _ => {}
        }

        if rounded {
            graph.mk_pow(base, exponent)
        } else {
            graph.capture(expr);
            expr
        }
    }

    fn compare(&self, graph: &ExprGraph, a: ExprRef, b: ExprRef, steps: &mut CompareSteps) {
        steps
            .exprs(graph.child(a, 0), graph.child(b, 0))
            .floats(graph.pow_exponent(a), graph.pow_exponent(b));
    }

    fn print(
        &self,
        graph: &ExprGraph,
        expr: ExprRef,
        stage: WalkStage,
        _: usize,
        parent_precedence: u32,
        out: &mut dyn fmt::Write,
    ) -> fmt::Result {
        let parens = POW_PRECEDENCE <= parent_precedence;
        match stage {
            WalkStage::Enter if parens => write!(out, "("),
            WalkStage::Leave => {
                let e = graph.pow_exponent(expr);
                if e < 0.0 {
                    write!(out, "^({})", e)?;
                } else {
                    write!(out, "^{}", e)?;
                }
                if parens {
                    write!(out, ")")?;
                }
                Ok(())
            }
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
        children[0].pow_scalar(graph.pow_exponent(expr))
    }

    fn reverse_prop(
        &self,
        graph: &ExprGraph,
        expr: ExprRef,
        bounds: Interval,
        children: &[Interval],
    ) -> Option<Vec<Interval>> {
        let e = graph.pow_exponent(expr);
        let child = children[0];
        if bounds.is_entire() {
            // a fractional power is only defined for a nonnegative base
            if !is_integral(e) && child.inf < 0.0 {
                return Some(vec![Interval::new(0.0, child.sup)]);
            }
            return None;
        }
        Some(vec![child.pow_scalar_inverse(e, &bounds)])
    }

    fn hash(&self, graph: &ExprGraph, expr: ExprRef, children: &[u64]) -> u64 {
        let seed = hash_name(self.name()) ^ fib_hash(graph.pow_exponent(expr));
        mix(seed, children[0])
    }

    fn bwdiff(&self, graph: &ExprGraph, expr: ExprRef, _: usize, children: &[f64], _: f64) -> Option<f64> {
        let e = graph.pow_exponent(expr);
        let x = children[0];
        if x == 0.0 && e < 1.0 {
            return None;
        }
        pow_value(x, e - 1.0).map(|v| e * v)
    }

    fn curvature(&self, graph: &ExprGraph, expr: ExprRef, children: &[Curvature]) -> Curvature {
        let e = graph.pow_exponent(expr);
        let Some(f) = shape(e, graph.activity(graph.child(expr, 0))) else {
            return Curvature::Unknown;
        };
        let c = children[0];
        let convex = f.convex
            && (c == Curvature::Linear
                || (c == Curvature::Convex && f.increasing)
                || (c == Curvature::Concave && f.decreasing));
        let concave = f.concave
            && (c == Curvature::Linear
                || (c == Curvature::Concave && f.increasing)
                || (c == Curvature::Convex && f.decreasing));
        match (convex, concave) {
            (true, true) => Curvature::Linear,
            (true, false) => Curvature::Convex,
            (false, true) => Curvature::Concave,
            (false, false) => Curvature::Unknown,
        }
    }

    fn monotonicity(&self, graph: &ExprGraph, expr: ExprRef, _: usize) -> Monotonicity {
        let e = graph.pow_exponent(expr);
        match shape(e, graph.activity(graph.child(expr, 0))) {
            Some(f) if f.increasing => Monotonicity::Increasing,
            Some(f) if f.decreasing => Monotonicity::Decreasing,
            _ => Monotonicity::Unknown,
        }
    }

    fn integrality(&self, graph: &ExprGraph, expr: ExprRef, children: &[bool], _: &dyn Fn(Var) -> bool) -> bool {
        let e = graph.pow_exponent(expr);
        is_integral(e) && e > 0.0 && children[0]
    }

    /// Tangent on the convex (concave) side, secant over the bounds on the other side.
    fn estimate(
        &self,
        graph: &ExprGraph,
        expr: ExprRef,
        children: &[f64],
        bounds: &[Interval],
        overestimate: bool,
    ) -> Option<Estimator> {
        let e = graph.pow_exponent(expr);
        let b = bounds[0];
        let f = shape(e, b)?;
        let x0 = children[0];

        let tangent = (f.convex && !overestimate) || (f.concave && overestimate);
        let secant = (f.convex && overestimate) || (f.concave && !overestimate);
        if tangent {
            let fx = pow_value(x0, e)?;
            let slope = self.bwdiff(graph, expr, 0, children, fx)?;
            let global = is_integral(e) && e > 0.0 && e % 2.0 == 0.0;
            Some(Estimator {
                coefs: vec![slope],
                constant: fx - slope * x0,
                local: !global,
            })
        } else if secant {
            if !b.inf.is_finite() || !b.sup.is_finite() {
                return None;
            }
            let (fl, fu) = (pow_value(b.inf, e)?, pow_value(b.sup, e)?);
            if b.is_point() {
                return Some(Estimator {
                    coefs: vec![0.0],
                    constant: fl,
                    local: true,
                });
            }
            let slope = (fu - fl) / (b.sup - b.inf);
            Some(Estimator {
                coefs: vec![slope],
                constant: fl - slope * b.inf,
                local: true,
            })
        } else {
            None
        }
    }

    fn branch_score(&self, graph: &ExprGraph, expr: ExprRef, violation: f64) -> Vec<(usize, f64)> {
        if graph.activity(graph.child(expr, 0)).is_point() {
            Vec::new()
        } else {
            vec![(0, violation)]
        }
    }
}
