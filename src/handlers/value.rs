use std::fmt;

use crate::compare::CompareSteps;
use crate::graph::ExprGraph;
use crate::handler::{Estimator, ExprHandler, HandlerCaps};
use crate::interval::Interval;
use crate::reference::ExprRef;
use crate::types::{Curvature, Var};
use crate::utils::{fib_hash, hash_name};
use crate::walk::WalkStage;

pub const VALUE_PRECEDENCE: u32 = 10000;

/// Constant value.
pub struct ValueHandler;

impl ExprHandler for ValueHandler {
    fn name(&self) -> &str {
        "val"
    }

    fn description(&self) -> &str {
        "constant value"
    }

    fn precedence(&self) -> u32 {
        VALUE_PRECEDENCE
    }

    fn caps(&self) -> HandlerCaps {
        HandlerCaps::COMPARE
            | HandlerCaps::PRINT
            | HandlerCaps::INTEVAL
            | HandlerCaps::HASH
            | HandlerCaps::CURVATURE
            | HandlerCaps::INTEGRALITY
            | HandlerCaps::ESTIMATE
    }

    fn eval(&self, graph: &ExprGraph, expr: ExprRef, _: &[f64], _: &dyn Fn(Var) -> f64) -> Option<f64> {
        Some(graph.value_of(expr))
    }

    fn compare(&self, graph: &ExprGraph, a: ExprRef, b: ExprRef, steps: &mut CompareSteps) {
        steps.floats(graph.value_of(a), graph.value_of(b));
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
        if stage != WalkStage::Enter {
            return Ok(());
        }
        let v = graph.value_of(expr);
        if v < 0.0 && VALUE_PRECEDENCE <= parent_precedence {
            write!(out, "({})", v)
        } else {
            write!(out, "{}", v)
        }
    }

    fn interval(
        &self,
        graph: &ExprGraph,
        expr: ExprRef,
        _: &[Interval],
        _: &mut dyn FnMut(Var) -> Interval,
    ) -> Interval {
        Interval::point(graph.value_of(expr))
    }

    fn hash(&self, graph: &ExprGraph, expr: ExprRef, _: &[u64]) -> u64 {
        hash_name(self.name()) ^ fib_hash(graph.value_of(expr))
    }

    fn curvature(&self, _: &ExprGraph, _: ExprRef, _: &[Curvature]) -> Curvature {
        Curvature::Linear
    }

    fn integrality(&self, graph: &ExprGraph, expr: ExprRef, _: &[bool], _: &dyn Fn(Var) -> bool) -> bool {
        graph.value_of(expr).fract() == 0.0
    }

    fn estimate(
        &self,
        graph: &ExprGraph,
        expr: ExprRef,
        _: &[f64],
        _: &[Interval],
        _: bool,
    ) -> Option<Estimator> {
        Some(Estimator {
            coefs: Vec::new(),
            constant: graph.value_of(expr),
            local: false,
        })
    }
}
