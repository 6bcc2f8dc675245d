//! Iterative depth-first traversal of expression DAGs.
//!
//! Every DAG algorithm in the crate (release, evaluation, simplification, hashing, propagation,
//! printing) is a [`Visitor`] driven by [`ExprGraph::walk`]. The walker keeps its frames in a
//! vector, so the depth of an expression is limited by memory, not by the call stack.
//!
//! For a node, the visitor sees:
//!
//! ```text
//! enter(node)
//!   for each child:
//!     visiting_child(node, child)
//!     ... walk of child ...
//!     visited_child(node, child)
//! leave(node)
//! ```
//!
//! Each callback returns a [`WalkResult`]:
//! - `SkipSubtree` from `enter` skips all children (`leave` still runs),
//!   from `visiting_child` skips that child, from `visited_child` skips the remaining siblings;
//! - `Abort` stops the walk immediately.
//!
//! Children are read from the graph at each step, so `visited_child` may replace the child
//! it was given.

use std::collections::HashSet;

use crate::graph::ExprGraph;
use crate::reference::ExprRef;

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum WalkStage {
    Enter,
    VisitingChild,
    VisitedChild,
    Leave,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum WalkResult {
    Continue,
    SkipSubtree,
    Abort,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum WalkStatus {
    Completed,
    Aborted,
}

/// Position of the walk: the current node, the parent that led to it, and the index of the
/// child being visited (meaningful in the child stages).
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct WalkPos {
    pub expr: ExprRef,
    pub parent: Option<ExprRef>,
    pub child: usize,
    pub depth: usize,
}

/// Callbacks of a walk. All default to [`WalkResult::Continue`].
pub trait Visitor {
    fn enter(&mut self, graph: &ExprGraph, pos: &WalkPos) -> WalkResult {
        let _ = (graph, pos);
        WalkResult::Continue
    }

    fn visiting_child(&mut self, graph: &ExprGraph, pos: &WalkPos, child: ExprRef) -> WalkResult {
        let _ = (graph, pos, child);
        WalkResult::Continue
    }

    fn visited_child(&mut self, graph: &ExprGraph, pos: &WalkPos, child: ExprRef) -> WalkResult {
        let _ = (graph, pos, child);
        WalkResult::Continue
    }

    fn leave(&mut self, graph: &ExprGraph, pos: &WalkPos) -> WalkResult {
        let _ = (graph, pos);
        WalkResult::Continue
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct WalkOptions {
    /// Visit a shared node once per path (`true`) or only the first time it is reached (`false`).
    ///
    /// Without revisits, a child that has already been left is skipped without any callback.
    pub revisit: bool,
    pub(crate) capture_root: bool,
}

impl WalkOptions {
    /// Visit every node once.
    pub fn unique() -> Self {
        Self {
            revisit: false,
            capture_root: true,
        }
    }
}

impl Default for WalkOptions {
    fn default() -> Self {
        Self {
            revisit: true,
            capture_root: true,
        }
    }
}

impl ExprGraph {
    /// Walk the DAG below `root`, visiting shared nodes once per path.
    pub fn walk<V: Visitor + ?Sized>(&self, root: ExprRef, visitor: &mut V) -> WalkStatus {
        self.walk_with(root, visitor, WalkOptions::default())
    }

    /// Walk the DAG below `root`, visiting every node once.
    pub fn walk_unique<V: Visitor + ?Sized>(&self, root: ExprRef, visitor: &mut V) -> WalkStatus {
        self.walk_with(root, visitor, WalkOptions::unique())
    }

    pub fn walk_with<V: Visitor + ?Sized>(&self, root: ExprRef, visitor: &mut V, options: WalkOptions) -> WalkStatus {
        if options.capture_root {
            self.capture(root);
        }

        let mut visited: HashSet<ExprRef> = HashSet::new();
        let mut stack = vec![WalkPos {
            expr: root,
            parent: None,
            child: 0,
            depth: 0,
        }];
        let mut stage = WalkStage::Enter;

        let status = loop {
            let Some(&pos) = stack.last() else {
                break WalkStatus::Completed;
            };

            match stage {
                WalkStage::Enter => match visitor.enter(self, &pos) {
                    WalkResult::Abort => break WalkStatus::Aborted,
                    WalkResult::SkipSubtree => stage = WalkStage::Leave,
                    WalkResult::Continue => stage = self.advance(&mut stack, &visited, options.revisit),
                },

                WalkStage::VisitingChild => {
                    let child = self.child(pos.expr, pos.child);
                    match visitor.visiting_child(self, &pos, child) {
                        WalkResult::Abort => break WalkStatus::Aborted,
                        WalkResult::SkipSubtree => {
                            bump_child(&mut stack);
                            stage = self.advance(&mut stack, &visited, options.revisit);
                        }
                        WalkResult::Continue => {
                            stack.push(WalkPos {
                                expr: child,
                                parent: Some(pos.expr),
                                child: 0,
                                depth: pos.depth + 1,
                            });
                            stage = WalkStage::Enter;
                        }
                    }
                }

                WalkStage::VisitedChild => {
                    let child = self.child(pos.expr, pos.child);
                    match visitor.visited_child(self, &pos, child) {
                        WalkResult::Abort => break WalkStatus::Aborted,
                        WalkResult::SkipSubtree => stage = WalkStage::Leave,
                        WalkResult::Continue => {
                            bump_child(&mut stack);
                            stage = self.advance(&mut stack, &visited, options.revisit);
                        }
                    }
                }

                WalkStage::Leave => {
                    let result = visitor.leave(self, &pos);
                    if !options.revisit {
                        visited.insert(pos.expr);
                    }
                    stack.pop();
                    if result == WalkResult::Abort {
                        break WalkStatus::Aborted;
                    }
                    stage = WalkStage::VisitedChild;
                }
            }
        };

        if options.capture_root {
            self.release(root);
        }
        status
    }

    /// Move the top frame to its next child to visit and return the resulting stage.
    fn advance(&self, stack: &mut [WalkPos], visited: &HashSet<ExprRef>, revisit: bool) -> WalkStage {
        let Some(top) = stack.last_mut() else {
            return WalkStage::Leave;
        };
        let n = self.num_children(top.expr);
        if !revisit {
            while top.child < n && visited.contains(&self.child(top.expr, top.child)) {
                top.child += 1;
            }
        }
        if top.child < n {
            WalkStage::VisitingChild
        } else {
            WalkStage::Leave
        }
    }

    /// Nodes below `root` (inclusive) in post-order, each exactly once.
    ///
    /// Every node appears after all of its children, so the reversed list is a topological
    /// order from the root down.
    pub fn post_order(&self, root: ExprRef) -> Vec<ExprRef> {
        struct Collect(Vec<ExprRef>);
        impl Visitor for Collect {
            fn leave(&mut self, _: &ExprGraph, pos: &WalkPos) -> WalkResult {
                self.0.push(pos.expr);
                WalkResult::Continue
            }
        }
        let mut collect = Collect(Vec::new());
        self.walk_unique(root, &mut collect);
        collect.0
    }
}

fn bump_child(stack: &mut [WalkPos]) {
    if let Some(top) = stack.last_mut() {
        top.child += 1;
    }
}
