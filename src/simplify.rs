//! Bottom-up simplification.
//!
//! The driver walks the DAG once. After a child has been simplified it is replaced in its parent
//! by its simplified form; when a node is left, its handler's `simplify` callback turns it into
//! a simplified node given simplified children. Handlers without the callback keep the node as
//! it is.
//!
//! A node reachable along several paths is simplified once: results are memoized per node, and
//! the memo keeps both the original and the simplified node alive until the walk has finished,
//! so no node index can be reused while the memo refers to it.

use std::collections::HashMap;

use log::debug;

use crate::graph::ExprGraph;
use crate::handler::HandlerCaps;
use crate::reference::ExprRef;
use crate::walk::{Visitor, WalkPos, WalkResult};

#[derive(Default)]
struct Simplifier {
    memo: HashMap<ExprRef, ExprRef>,
    changed: bool,
}

impl Visitor for Simplifier {
    fn enter(&mut self, _: &ExprGraph, pos: &WalkPos) -> WalkResult {
        if self.memo.contains_key(&pos.expr) {
            WalkResult::SkipSubtree
        } else {
            WalkResult::Continue
        }
    }

    fn visited_child(&mut self, graph: &ExprGraph, pos: &WalkPos, child: ExprRef) -> WalkResult {
        if let Some(&simplified) = self.memo.get(&child) {
            if simplified != child {
                graph.replace_child(pos.expr, pos.child, simplified);
                self.changed = true;
            }
        }
        WalkResult::Continue
    }

    fn leave(&mut self, graph: &ExprGraph, pos: &WalkPos) -> WalkResult {
        let expr = pos.expr;
        if self.memo.contains_key(&expr) {
            return WalkResult::Continue;
        }

        let id = graph.handler_id(expr);
        let simplified = if graph.registry().has(id, HandlerCaps::SIMPLIFY) {
            let simplified = graph.handler(id).simplify(graph, expr);
            graph.registry().record(id, |s| {
                s.simplify_calls += 1;
                if simplified != expr {
                    s.simplified += 1;
                }
            });
            simplified
        } else {
            graph.capture(expr);
            expr
        };
        if simplified != expr {
            self.changed = true;
        }

        graph.capture(expr);
        self.memo.insert(expr, simplified);
        WalkResult::Continue
    }
}

impl ExprGraph {
    /// Simplified form of `root`, as a new owned reference.
    ///
    /// Children of non-simplified nodes below `root` are replaced in place by their simplified
    /// forms, which evaluate to the same values. The caller still owns `root`.
    pub fn simplify(&self, root: ExprRef) -> ExprRef {
        self.simplify_changed(root).0
    }

    /// Like [`simplify`][ExprGraph::simplify], also reporting whether anything was rewritten.
    pub fn simplify_changed(&self, root: ExprRef) -> (ExprRef, bool) {
        let mut simplifier = Simplifier::default();
        self.walk(root, &mut simplifier);

        let result = simplifier.memo[&root];
        self.capture(result);
        let rewritten = simplifier.memo.len();
        for (original, simplified) in simplifier.memo {
            self.release(simplified);
            self.release(original);
        }
        debug!(
            "simplified {} to {} ({} nodes visited, changed: {})",
            root, result, rewritten, simplifier.changed
        );
        (result, simplifier.changed)
    }
}
