//! Expression handlers and their registry.
//!
//! An [`ExprHandler`] supplies the operator-specific behavior of one node type. Only
//! [`eval`][ExprHandler::eval] is mandatory; every other callback is optional and announced
//! through [`HandlerCaps`]. The engine checks the capability flags before dispatching and falls
//! back to generic behavior when a callback is absent.
//!
//! The [`HandlerRegistry`] is an explicit value: it is built once, handed to an
//! [`ExprGraph`], and never changes afterwards except for its statistics counters.

use std::cell::Cell;
use std::collections::HashMap;
use std::fmt;

use bitflags::bitflags;
use log::debug;

use crate::compare::CompareSteps;
use crate::error::{ExprError, Result};
use crate::graph::ExprGraph;
use crate::handlers::{PowHandler, ProductHandler, SumHandler, ValueHandler, VarHandler};
use crate::hash::default_hash;
use crate::interval::Interval;
use crate::nlhdlr::{DefaultNlHandler, NlHandler, NlhdlrId};
use crate::print::write_call_syntax;
use crate::reference::ExprRef;
use crate::types::{Curvature, Monotonicity, Var};
use crate::walk::WalkStage;

bitflags! {
    /// Optional callbacks implemented by a handler.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct HandlerCaps: u32 {
        const SIMPLIFY     = 1 << 0;
        const COMPARE      = 1 << 1;
        const PRINT        = 1 << 2;
        const INTEVAL      = 1 << 3;
        const REVERSEPROP  = 1 << 4;
        const HASH         = 1 << 5;
        const BWDIFF       = 1 << 6;
        const CURVATURE    = 1 << 7;
        const MONOTONICITY = 1 << 8;
        const INTEGRALITY  = 1 << 9;
        const ESTIMATE     = 1 << 10;
        const BRANCHSCORE  = 1 << 11;
    }
}

/// Index of a handler in its registry.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct HandlerId(u32);

impl HandlerId {
    pub const VALUE: HandlerId = HandlerId(0);
    pub const VAR: HandlerId = HandlerId(1);
    pub const SUM: HandlerId = HandlerId(2);
    pub const PRODUCT: HandlerId = HandlerId(3);
    pub const POW: HandlerId = HandlerId(4);

    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for HandlerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Linear estimator `constant + sum(coefs[i] * children[i])` of a node's value.
#[derive(Debug, Clone, PartialEq)]
pub struct Estimator {
    pub coefs: Vec<f64>,
    pub constant: f64,
    /// Valid only for the current children bounds.
    pub local: bool,
}

impl Estimator {
    pub fn eval(&self, children: &[f64]) -> f64 {
        self.coefs
            .iter()
            .zip(children)
            .fold(self.constant, |acc, (c, x)| acc + c * x)
    }
}

/// Callback table of one expression type.
///
/// Callbacks receive the graph and the node; payload and children are read through the graph.
/// A callback must not hold a borrow obtained from [`ExprGraph::node`] while creating or
/// releasing nodes.
pub trait ExprHandler {
    /// Unique name of the handler.
    fn name(&self) -> &str;

    fn description(&self) -> &str {
        ""
    }

    /// Printing precedence; a child whose precedence is not greater than its parent's is
    /// parenthesized.
    fn precedence(&self) -> u32 {
        0
    }

    fn caps(&self) -> HandlerCaps;

    /// Value of `expr` given the values of its children, `None` if undefined there.
    fn eval(&self, graph: &ExprGraph, expr: ExprRef, children: &[f64], point: &dyn Fn(Var) -> f64) -> Option<f64>;

    /// Simplified form of `expr` (whose children are already simplified), as a new owned reference.
    fn simplify(&self, graph: &ExprGraph, expr: ExprRef) -> ExprRef {
        graph.capture(expr);
        expr
    }

    /// Push the steps ordering two simplified nodes of this type.
    fn compare(&self, graph: &ExprGraph, a: ExprRef, b: ExprRef, steps: &mut CompareSteps) {
        steps.children(graph, a, b);
    }

    /// Print the part of `expr` belonging to `stage`; `child` is the current child index.
    fn print(
        &self,
        graph: &ExprGraph,
        expr: ExprRef,
        stage: WalkStage,
        child: usize,
        parent_precedence: u32,
        out: &mut dyn fmt::Write,
    ) -> fmt::Result {
        let _ = (graph, expr, parent_precedence);
        write_call_syntax(self.name(), stage, child, out)
    }

    /// Enclosure of the range of `expr` given enclosures of its children.
    fn interval(
        &self,
        graph: &ExprGraph,
        expr: ExprRef,
        children: &[Interval],
        leaf: &mut dyn FnMut(Var) -> Interval,
    ) -> Interval {
        let _ = (graph, expr, children, leaf);
        Interval::ENTIRE
    }

    /// Candidate intervals for the children given that `expr` lies in `bounds`.
    ///
    /// Returns one interval per child (the engine intersects them with the current ones), or
    /// `None` if nothing can be deduced.
    fn reverse_prop(
        &self,
        graph: &ExprGraph,
        expr: ExprRef,
        bounds: Interval,
        children: &[Interval],
    ) -> Option<Vec<Interval>> {
        let _ = (graph, expr, bounds, children);
        None
    }

    /// Structural hash of `expr` from the hashes of its children.
    fn hash(&self, graph: &ExprGraph, expr: ExprRef, children: &[u64]) -> u64 {
        let _ = (graph, expr);
        default_hash(self.name(), children)
    }

    /// Partial derivative of `expr` with respect to its `child`-th child.
    fn bwdiff(&self, graph: &ExprGraph, expr: ExprRef, child: usize, children: &[f64], value: f64) -> Option<f64> {
        let _ = (graph, expr, child, children, value);
        None
    }

    fn curvature(&self, graph: &ExprGraph, expr: ExprRef, children: &[Curvature]) -> Curvature {
        let _ = (graph, expr, children);
        Curvature::Unknown
    }

    fn monotonicity(&self, graph: &ExprGraph, expr: ExprRef, child: usize) -> Monotonicity {
        let _ = (graph, expr, child);
        Monotonicity::Unknown
    }

    fn integrality(
        &self,
        graph: &ExprGraph,
        expr: ExprRef,
        children: &[bool],
        var_integral: &dyn Fn(Var) -> bool,
    ) -> bool {
        let _ = (graph, expr, children, var_integral);
        false
    }

    /// Linear under- (`overestimate == false`) or overestimator at the given children values.
    fn estimate(
        &self,
        graph: &ExprGraph,
        expr: ExprRef,
        children: &[f64],
        bounds: &[Interval],
        overestimate: bool,
    ) -> Option<Estimator> {
        let _ = (graph, expr, children, bounds, overestimate);
        None
    }

    /// Branching scores `(child index, score)` for a violation of `expr`.
    fn branch_score(&self, graph: &ExprGraph, expr: ExprRef, violation: f64) -> Vec<(usize, f64)> {
        let _ = (graph, expr, violation);
        Vec::new()
    }
}

/// Accumulated per-handler counters.
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq)]
pub struct HandlerStats {
    pub simplify_calls: u64,
    pub simplified: u64,
    pub interval_calls: u64,
    pub reverse_calls: u64,
    pub cutoffs: u64,
    pub tightenings: u64,
}

/// Registry of expression handlers and nonlinear handlers.
///
/// The five built-in handlers are always present, at the ids named by the
/// [`HandlerId`] constants.
pub struct HandlerRegistry {
    handlers: Vec<Box<dyn ExprHandler>>,
    stats: Vec<Cell<HandlerStats>>,
    by_name: HashMap<String, HandlerId>,
    nlhdlrs: Vec<Box<dyn NlHandler>>,
    nlhdlr_order: Vec<NlhdlrId>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        let mut registry = Self {
            handlers: Vec::new(),
            stats: Vec::new(),
            by_name: HashMap::new(),
            nlhdlrs: Vec::new(),
            nlhdlr_order: Vec::new(),
        };
        for (id, result) in [
            (HandlerId::VALUE, registry.register(ValueHandler)),
            (HandlerId::VAR, registry.register(VarHandler)),
            (HandlerId::SUM, registry.register(SumHandler)),
            (HandlerId::PRODUCT, registry.register(ProductHandler)),
            (HandlerId::POW, registry.register(PowHandler)),
        ] {
            assert_eq!(result, Ok(id), "Built-in handler registered out of order");
        }
        if let Err(e) = registry.register_nlhdlr(DefaultNlHandler) {
            panic!("Cannot register the default nonlinear handler: {}", e);
        }
        registry
    }

    /// Register an expression handler under its unique name.
    pub fn register(&mut self, handler: impl ExprHandler + 'static) -> Result<HandlerId> {
        let name = handler.name().to_string();
        if self.by_name.contains_key(&name) {
            return Err(ExprError::DuplicateHandler(name));
        }
        let id = HandlerId(self.handlers.len() as u32);
        debug!("registered expression handler '{}' as {}", name, id);
        self.handlers.push(Box::new(handler));
        self.stats.push(Cell::new(HandlerStats::default()));
        self.by_name.insert(name, id);
        Ok(id)
    }

    /// Register a nonlinear handler; detection tries handlers by decreasing priority.
    pub fn register_nlhdlr(&mut self, nlhdlr: impl NlHandler + 'static) -> Result<NlhdlrId> {
        let name = nlhdlr.name().to_string();
        if self.nlhdlrs.iter().any(|h| h.name() == name) {
            return Err(ExprError::DuplicateNlHandler(name));
        }
        let id = NlhdlrId::new(self.nlhdlrs.len() as u32);
        debug!("registered nonlinear handler '{}' as {}", name, id);
        self.nlhdlrs.push(Box::new(nlhdlr));
        self.nlhdlr_order.push(id);
        let nlhdlrs = &self.nlhdlrs;
        self.nlhdlr_order
            .sort_by_key(|id| std::cmp::Reverse(nlhdlrs[id.index()].detect_priority()));
        Ok(id)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    pub fn get(&self, id: HandlerId) -> &dyn ExprHandler {
        self.handlers[id.index()].as_ref()
    }

    pub fn find(&self, name: &str) -> Option<HandlerId> {
        self.by_name.get(name).copied()
    }

    pub fn name(&self, id: HandlerId) -> &str {
        self.get(id).name()
    }

    pub fn caps(&self, id: HandlerId) -> HandlerCaps {
        self.get(id).caps()
    }

    pub fn has(&self, id: HandlerId, caps: HandlerCaps) -> bool {
        self.caps(id).contains(caps)
    }

    pub fn iter(&self) -> impl Iterator<Item = (HandlerId, &dyn ExprHandler)> {
        self.handlers
            .iter()
            .enumerate()
            .map(|(i, h)| (HandlerId(i as u32), h.as_ref()))
    }

    pub fn stats(&self, id: HandlerId) -> HandlerStats {
        self.stats[id.index()].get()
    }

    pub(crate) fn record(&self, id: HandlerId, f: impl FnOnce(&mut HandlerStats)) {
        let cell = &self.stats[id.index()];
        let mut stats = cell.get();
        f(&mut stats);
        cell.set(stats);
    }

    pub fn nlhdlr(&self, id: NlhdlrId) -> &dyn NlHandler {
        self.nlhdlrs[id.index()].as_ref()
    }

    pub fn find_nlhdlr(&self, name: &str) -> Option<NlhdlrId> {
        self.nlhdlrs
            .iter()
            .position(|h| h.name() == name)
            .map(|i| NlhdlrId::new(i as u32))
    }

    /// Nonlinear handlers in detection order.
    pub fn nlhdlrs_by_priority(&self) -> &[NlhdlrId] {
        &self.nlhdlr_order
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("handlers", &self.handlers.iter().map(|h| h.name()).collect::<Vec<_>>())
            .field("nlhdlrs", &self.nlhdlrs.iter().map(|h| h.name()).collect::<Vec<_>>())
            .finish()
    }
}
