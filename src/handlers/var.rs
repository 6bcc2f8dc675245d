use std::fmt;

use crate::compare::CompareSteps;
use crate::graph::ExprGraph;
use crate::handler::{ExprHandler, HandlerCaps};
use crate::interval::Interval;
use crate::reference::ExprRef;
use crate::types::{Curvature, Var};
use crate::utils::{fib_hash_u64, hash_name};
use crate::walk::WalkStage;

/// Problem variable. Its interval comes from the leaf callback of forward propagation.
pub struct VarHandler;

impl ExprHandler for VarHandler {
    fn name(&self) -> &str {
        "var"
    }

    fn description(&self) -> &str {
        "variable"
    }

    fn caps(&self) -> HandlerCaps {
        HandlerCaps::COMPARE
            | HandlerCaps::PRINT
            | HandlerCaps::INTEVAL
            | HandlerCaps::HASH
            | HandlerCaps::CURVATURE
            | HandlerCaps::INTEGRALITY
    }

    fn eval(&self, graph: &ExprGraph, expr: ExprRef, _: &[f64], point: &dyn Fn(Var) -> f64) -> Option<f64> {
        Some(point(graph.var_of(expr)))
    }

    fn compare(&self, graph: &ExprGraph, a: ExprRef, b: ExprRef, steps: &mut CompareSteps) {
        steps.order(graph.var_of(a).cmp(&graph.var_of(b)));
    }

    fn print(&self, graph: &ExprGraph, expr: ExprRef, stage: WalkStage, _: usize, _: u32, out: &mut dyn fmt::Write) -> fmt::Result {
        if stage == WalkStage::Enter {
            write!(out, "{}", graph.var_of(expr))
        } else {
            Ok(())
        }
    }

    fn interval(
        &self,
        graph: &ExprGraph,
        expr: ExprRef,
        _: &[Interval],
        leaf: &mut dyn FnMut(Var) -> Interval,
    ) -> Interval {
        leaf(graph.var_of(expr))
    }

    fn hash(&self, graph: &ExprGraph, expr: ExprRef, _: &[u64]) -> u64 {
        hash_name(self.name()) ^ fib_hash_u64(graph.var_of(expr).id() as u64)
    }

    fn curvature(&self, _: &ExprGraph, _: ExprRef, _: &[Curvature]) -> Curvature {
        Curvature::Linear
    }

    fn integrality(&self, graph: &ExprGraph, expr: ExprRef, _: &[bool], var_integral: &dyn Fn(Var) -> bool) -> bool {
        var_integral(graph.var_of(expr))
    }
}
