//! Debug utilities for inspecting expression DAGs.
//!
//! These are primarily useful in tests and during development.

use std::fmt::{self, Write};

use crate::graph::ExprGraph;
use crate::interval::Interval;
use crate::node::ExprData;
use crate::reference::ExprRef;
use crate::types::Curvature;

/// Snapshot of a single node.
#[derive(Debug, Clone)]
pub struct NodeInfo {
    pub expr: ExprRef,
    pub handler: String,
    pub data: ExprData,
    pub children: Vec<ExprRef>,
    pub refcount: u32,
    pub value: Option<f64>,
    pub activity: Interval,
    pub activity_tag: u64,
    pub curvature: Curvature,
    pub locks: (u32, u32),
}

impl fmt::Display for NodeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {:?} [", self.expr, self.handler, self.data)?;
        for (i, c) in self.children.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", c)?;
        }
        write!(
            f,
            "] rc={} activity={}@{} locks={:?}",
            self.refcount, self.activity, self.activity_tag, self.locks
        )
    }
}

/// All nodes below a root, children before parents.
#[derive(Debug, Clone)]
pub struct ExprTree {
    pub root: ExprRef,
    pub nodes: Vec<NodeInfo>,
}

impl fmt::Display for ExprTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Expression (root = {}, {} nodes):", self.root, self.nodes.len())?;
        for node in &self.nodes {
            writeln!(f, "  {}", node)?;
        }
        Ok(())
    }
}

impl ExprGraph {
    pub fn node_info(&self, expr: ExprRef) -> NodeInfo {
        let node = self.node(expr);
        NodeInfo {
            expr,
            handler: self.registry().name(node.handler()).to_string(),
            data: node.data().clone(),
            children: node.children().to_vec(),
            refcount: node.refcount(),
            value: node.value(),
            activity: node.activity(),
            activity_tag: node.activity_tag(),
            curvature: node.curvature(),
            locks: node.locks(),
        }
    }

    /// Every node below `root`, each once, in post-order.
    pub fn debug_tree(&self, root: ExprRef) -> ExprTree {
        let nodes = self.post_order(root).into_iter().map(|e| self.node_info(e)).collect();
        ExprTree { root, nodes }
    }

    pub fn debug_string(&self, root: ExprRef) -> String {
        self.debug_tree(root).to_string()
    }

    /// Summary of every live node in the graph.
    pub fn dump_state(&self) -> String {
        let mut result = String::new();
        let _ = writeln!(result, "=== Expression graph ===");
        let _ = writeln!(result, "Nodes: count={}", self.num_nodes());
        for expr in self.nodes() {
            let _ = writeln!(result, "  {}", self.node_info(expr));
        }
        result
    }
}
