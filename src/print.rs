//! Infix printing.
//!
//! Each handler prints its own part of an expression at each walk stage. A child is
//! parenthesized by its handler when its precedence does not exceed its parent's.
//! Handlers without a print callback use function-call syntax `name(a, b)`.

use std::fmt;

use crate::graph::ExprGraph;
use crate::handler::HandlerCaps;
use crate::reference::ExprRef;
use crate::walk::{Visitor, WalkPos, WalkResult, WalkStage};

/// Function-call syntax for one stage of `name(child, child, ...)`.
pub fn write_call_syntax(name: &str, stage: WalkStage, child: usize, out: &mut dyn fmt::Write) -> fmt::Result {
    match stage {
        WalkStage::Enter => write!(out, "{}(", name),
        WalkStage::VisitingChild if child > 0 => write!(out, ", "),
        WalkStage::Leave => write!(out, ")"),
        _ => Ok(()),
    }
}

struct Printer<'a, 'w> {
    out: &'a mut (dyn fmt::Write + 'w),
    result: fmt::Result,
}

impl Printer<'_, '_> {
    fn print(&mut self, graph: &ExprGraph, pos: &WalkPos, stage: WalkStage) -> WalkResult {
        let id = graph.handler_id(pos.expr);
        let parent_precedence = pos
            .parent
            .map(|p| graph.handler(graph.handler_id(p)).precedence())
            .unwrap_or(0);
        let result = if graph.registry().has(id, HandlerCaps::PRINT) {
            graph
                .handler(id)
                .print(graph, pos.expr, stage, pos.child, parent_precedence, &mut *self.out)
        } else {
            write_call_syntax(graph.handler_name(pos.expr), stage, pos.child, &mut *self.out)
        };
        match result {
            Ok(()) => WalkResult::Continue,
            Err(e) => {
                self.result = Err(e);
                WalkResult::Abort
            }
        }
    }
}

impl Visitor for Printer<'_, '_> {
    fn enter(&mut self, graph: &ExprGraph, pos: &WalkPos) -> WalkResult {
        self.print(graph, pos, WalkStage::Enter)
    }

    fn visiting_child(&mut self, graph: &ExprGraph, pos: &WalkPos, _: ExprRef) -> WalkResult {
        self.print(graph, pos, WalkStage::VisitingChild)
    }

    fn visited_child(&mut self, graph: &ExprGraph, pos: &WalkPos, _: ExprRef) -> WalkResult {
        self.print(graph, pos, WalkStage::VisitedChild)
    }

    fn leave(&mut self, graph: &ExprGraph, pos: &WalkPos) -> WalkResult {
        self.print(graph, pos, WalkStage::Leave)
    }
}

/// Infix form of an expression, see [`ExprGraph::display`].
pub struct ExprDisplay<'a> {
    graph: &'a ExprGraph,
    expr: ExprRef,
}

impl fmt::Display for ExprDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.graph.print_to(self.expr, f)
    }
}

impl ExprGraph {
    /// Write the infix form of `expr`. Shared subexpressions are printed at every occurrence.
    pub fn print_to(&self, expr: ExprRef, out: &mut dyn fmt::Write) -> fmt::Result {
        let mut printer = Printer { out, result: Ok(()) };
        self.walk(expr, &mut printer);
        printer.result
    }

    pub fn display(&self, expr: ExprRef) -> ExprDisplay<'_> {
        ExprDisplay { graph: self, expr }
    }

    pub fn to_infix(&self, expr: ExprRef) -> String {
        self.display(expr).to_string()
    }
}
