//! Total order over simplified expressions.
//!
//! Nodes of the same type are ordered by their handler's comparator. Nodes of different types
//! are ordered by a fixed chain `value < sum < product < pow < var < others`, where a compound
//! node on the left is compared as if the right-hand node were a one-term node of its own type
//! (`x` as `sum(0, 1*x)`, `prod(1, x)` or `x^1`). Non-builtin handlers of different types are
//! ordered by name.
//!
//! The order drives sorting and merging during simplification and equality tests during
//! common-subexpression elimination.
//!
//! Handler comparators describe a comparison as a list of [`CompareStep`]s instead of
//! recursing; [`ExprGraph::compare`] expands them with an explicit stack.

use std::cmp::Ordering;

use crate::graph::ExprGraph;
use crate::handler::{HandlerCaps, HandlerId};
use crate::reference::ExprRef;

fn rank(id: HandlerId) -> u8 {
    match id {
        HandlerId::VALUE => 0,
        HandlerId::SUM => 1,
        HandlerId::PRODUCT => 2,
        HandlerId::POW => 3,
        HandlerId::VAR => 4,
        _ => 5,
    }
}

fn cmp_f64(a: f64, b: f64) -> Ordering {
    a.partial_cmp(&b).unwrap_or(Ordering::Equal)
}

/// One step of a lexicographic comparison.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum CompareStep {
    /// Compare two subexpressions.
    Exprs(ExprRef, ExprRef),
    /// An ordering already known, typically of payloads.
    Order(Ordering),
}

/// Steps of a comparison, in the order they decide it.
///
/// Comparators never compare subexpressions themselves: they push [`CompareStep::Exprs`] and
/// the engine expands it later with an explicit stack, so comparison depth is not bounded by
/// the call stack. The result is the first step that is not equal.
#[derive(Debug, Default)]
pub struct CompareSteps {
    steps: Vec<CompareStep>,
}

impl CompareSteps {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn exprs(&mut self, a: ExprRef, b: ExprRef) -> &mut Self {
        if a != b {
            self.steps.push(CompareStep::Exprs(a, b));
        }
        self
    }

    pub fn order(&mut self, ord: Ordering) -> &mut Self {
        if ord != Ordering::Equal {
            self.steps.push(CompareStep::Order(ord));
        }
        self
    }

    /// Order of two floats; NaN compares equal to everything.
    pub fn floats(&mut self, a: f64, b: f64) -> &mut Self {
        self.order(cmp_f64(a, b))
    }

    /// Children pairwise, then the number of children.
    pub fn children(&mut self, graph: &ExprGraph, a: ExprRef, b: ExprRef) -> &mut Self {
        let (ca, cb) = (graph.children(a), graph.children(b));
        for (&x, &y) in ca.iter().zip(&cb) {
            self.exprs(x, y);
        }
        self.order(ca.len().cmp(&cb.len()))
    }

    pub fn as_slice(&self) -> &[CompareStep] {
        &self.steps
    }

    fn clear(&mut self) {
        self.steps.clear();
    }
}

impl ExprGraph {
    /// Compare two simplified expressions.
    pub fn compare(&self, a: ExprRef, b: ExprRef) -> Ordering {
        // Pending steps, each with whether its result must be reversed.
        let mut work: Vec<(CompareStep, bool)> = vec![(CompareStep::Exprs(a, b), false)];
        let mut steps = CompareSteps::new();

        while let Some((step, reversed)) = work.pop() {
            match step {
                CompareStep::Order(ord) => {
                    let ord = if reversed { ord.reverse() } else { ord };
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                CompareStep::Exprs(x, y) => {
                    if x == y {
                        continue;
                    }
                    steps.clear();
                    let swapped = self.expand_compare(x, y, &mut steps);
                    let reversed = reversed != swapped;
                    work.extend(steps.as_slice().iter().rev().map(|&s| (s, reversed)));
                }
            }
        }
        Ordering::Equal
    }

    /// Push the steps deciding `a` against `b`. Returns `true` if the steps compare `b` against
    /// `a` instead.
    fn expand_compare(&self, a: ExprRef, b: ExprRef, steps: &mut CompareSteps) -> bool {
        let (ha, hb) = (self.handler_id(a), self.handler_id(b));

        if ha == hb {
            if self.registry().has(ha, HandlerCaps::COMPARE) {
                self.handler(ha).compare(self, a, b, steps);
            } else {
                steps.children(self, a, b);
            }
            return false;
        }

        if rank(ha) > rank(hb) {
            self.expand_mixed(b, a, steps);
            true
        } else {
            self.expand_mixed(a, b, steps);
            false
        }
    }

    /// Steps for nodes of different types, `a` not ranked above `b`.
    fn expand_mixed(&self, a: ExprRef, b: ExprRef, steps: &mut CompareSteps) {
        match self.handler_id(a) {
            HandlerId::VALUE => {
                steps.order(Ordering::Less);
            }
            HandlerId::SUM => {
                let children = self.children(a);
                let Some(&dominant) = children.first() else {
                    steps.order(Ordering::Less);
                    return;
                };
                steps
                    .exprs(dominant, b)
                    .floats(self.sum_coefs(a)[0], 1.0)
                    .order(children.len().cmp(&1))
                    .floats(self.sum_constant(a), 0.0);
            }
            HandlerId::PRODUCT => {
                let children = self.children(a);
                let Some(&dominant) = children.first() else {
                    steps.order(Ordering::Less);
                    return;
                };
                steps
                    .exprs(dominant, b)
                    .order(children.len().cmp(&1))
                    .floats(self.product_coef(a), 1.0);
            }
            HandlerId::POW => {
                steps.exprs(self.child(a, 0), b).floats(self.pow_exponent(a), 1.0);
            }
            HandlerId::VAR => {
                steps.order(Ordering::Less);
            }
            _ => {
                steps.order(self.handler_name(a).cmp(self.handler_name(b)));
            }
        }
    }
}
