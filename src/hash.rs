//! Structural hashing and common-subexpression elimination.
//!
//! The hash of a node combines its handler's hash of the payload with the hashes of its
//! children, so structurally equal expressions hash equally regardless of node identity.
//! Hashes are memoized per node for the lifetime of an [`ExprHasher`].

use std::collections::HashMap;

use log::debug;

use crate::graph::ExprGraph;
use crate::handler::HandlerCaps;
use crate::reference::ExprRef;
use crate::utils::{hash_name, mix};
use crate::walk::{Visitor, WalkPos, WalkResult};

/// Hash of a node from its handler name and its children's hashes.
pub fn default_hash(name: &str, children: &[u64]) -> u64 {
    children.iter().fold(hash_name(name), |h, &c| mix(h, c))
}

/// Memoizing structural hasher.
///
/// The memo is keyed by node handle: it must not outlive the nodes it has hashed.
#[derive(Debug, Default)]
pub struct ExprHasher {
    memo: HashMap<ExprRef, u64>,
}

impl ExprHasher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn hash(&mut self, graph: &ExprGraph, expr: ExprRef) -> u64 {
        if let Some(&h) = self.memo.get(&expr) {
            return h;
        }
        graph.walk_unique(expr, self);
        self.memo[&expr]
    }

    /// Memoized hash of `expr`, if computed.
    pub fn get(&self, expr: ExprRef) -> Option<u64> {
        self.memo.get(&expr).copied()
    }
}

impl Visitor for ExprHasher {
    fn enter(&mut self, _: &ExprGraph, pos: &WalkPos) -> WalkResult {
        if self.memo.contains_key(&pos.expr) {
            WalkResult::SkipSubtree
        } else {
            WalkResult::Continue
        }
    }

    fn leave(&mut self, graph: &ExprGraph, pos: &WalkPos) -> WalkResult {
        let expr = pos.expr;
        if self.memo.contains_key(&expr) {
            return WalkResult::Continue;
        }
        let children: Vec<u64> = graph.children(expr).iter().map(|c| self.memo[c]).collect();
        let id = graph.handler_id(expr);
        let h = if graph.registry().has(id, HandlerCaps::HASH) {
            graph.handler(id).hash(graph, expr, &children)
        } else {
            default_hash(graph.handler_name(expr), &children)
        };
        self.memo.insert(expr, h);
        WalkResult::Continue
    }
}

/// Representatives of the equivalence classes seen so far, bucketed by hash.
struct Classes {
    hasher: ExprHasher,
    buckets: HashMap<u64, Vec<ExprRef>>,
    replaced: usize,
}

impl Classes {
    /// The representative equal to `expr`; `expr` itself becomes one if there is none.
    fn representative(&mut self, graph: &ExprGraph, expr: ExprRef) -> ExprRef {
        let h = self.hasher.hash(graph, expr);
        let bucket = self.buckets.entry(h).or_default();
        if let Some(&rep) = bucket
            .iter()
            .find(|&&c| c == expr || graph.compare(c, expr).is_eq())
        {
            return rep;
        }
        graph.capture(expr);
        bucket.push(expr);
        expr
    }
}

impl Visitor for Classes {
    fn visiting_child(&mut self, graph: &ExprGraph, pos: &WalkPos, child: ExprRef) -> WalkResult {
        let rep = self.representative(graph, child);
        if rep == child {
            return WalkResult::Continue;
        }
        debug!("replacing {} by equal {} below {}", child, rep, pos.expr);
        graph.replace_child(pos.expr, pos.child, rep);
        self.replaced += 1;
        WalkResult::SkipSubtree
    }
}

impl ExprGraph {
    /// Structural hash of `expr`.
    pub fn hash_expr(&self, expr: ExprRef) -> u64 {
        ExprHasher::new().hash(self, expr)
    }

    /// Replace structurally equal subexpressions of `roots` by a single shared node.
    ///
    /// The first occurrence of each class (roots first, then in depth-first order) is kept.
    /// A root equal to an earlier one is replaced in the slice: the old reference is released
    /// and the caller receives an owned reference to the representative. Returns whether
    /// anything was replaced.
    pub fn deduplicate(&self, roots: &mut [ExprRef]) -> bool {
        let mut classes = Classes {
            hasher: ExprHasher::new(),
            buckets: HashMap::new(),
            replaced: 0,
        };

        for root in roots.iter_mut() {
            let rep = classes.representative(self, *root);
            if rep != *root {
                debug!("replacing root {} by equal {}", root, rep);
                self.capture(rep);
                self.release(*root);
                *root = rep;
                classes.replaced += 1;
            }
        }
        for &root in roots.iter() {
            self.walk_unique(root, &mut classes);
        }

        for rep in classes.buckets.into_values().flatten() {
            self.release(rep);
        }
        debug!("deduplication replaced {} subexpressions", classes.replaced);
        classes.replaced > 0
    }
}
