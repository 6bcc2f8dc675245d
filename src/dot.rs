//! Expression DAG to DOT (Graphviz) conversion.
//!
//! Every node reachable from the given roots is drawn once, so shared subexpressions are
//! visible as nodes with several incoming edges.
//!
//! # DOT Format
//!
//! - **Leaves** (values and variables) share the bottom rank
//! - **Operator nodes** are labeled with their handler and payload (`sum 1`, `prod -2`, `pow 3`)
//! - **Edges** go from a node to its children, in child order; sum edges are labeled with their
//!   coefficient unless it is `1`
//! - **Roots** are rectangles at the top (source rank)
//!
//! # Examples
//!
//! ```
//! use nlexpr_rs::graph::ExprGraph;
//! use nlexpr_rs::types::Var;
//!
//! let graph = ExprGraph::default();
//! let x = graph.mk_var(Var::new(0));
//! let sq = graph.mk_pow(x, 2.0);
//! let f = graph.mk_sum(&[sq, x], &[1.0, -3.0], 2.0);
//!
//! let dot = graph.to_dot(&[f]).unwrap();
//! assert!(dot.contains("label=\"-3\""));
//! // Write to file and render with: dot -Tpng output.dot -o output.png
//! ```

use std::fmt::Write as _;

use crate::graph::ExprGraph;
use crate::node::ExprData;
use crate::reference::ExprRef;

/// Configuration options for DOT output generation.
#[derive(Debug, Clone)]
pub struct DotConfig {
    /// Shape for operator nodes (default: "ellipse")
    pub node_shape: &'static str,
    /// Shape for values and variables (default: "box")
    pub leaf_shape: &'static str,
    /// Shape for root markers (default: "rect")
    pub root_shape: &'static str,
    /// Append the cached activity to each label (default: false)
    pub show_activity: bool,
}

impl Default for DotConfig {
    fn default() -> Self {
        Self {
            node_shape: "ellipse",
            leaf_shape: "box",
            root_shape: "rect",
            show_activity: false,
        }
    }
}

fn escape(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

impl ExprGraph {
    fn dot_label(&self, expr: ExprRef) -> String {
        match self.data(expr) {
            ExprData::Value(v) => format!("{}", v),
            ExprData::Var(v) => format!("{}", v),
            ExprData::Sum { constant, .. } => format!("{} {}", self.handler_name(expr), constant),
            ExprData::Product { coef } => format!("{} {}", self.handler_name(expr), coef),
            ExprData::Pow { exponent } => format!("{} {}", self.handler_name(expr), exponent),
            ExprData::None | ExprData::Custom(_) => self.handler_name(expr).to_string(),
        }
    }

    /// Converts the DAG below `roots` to DOT format.
    pub fn to_dot(&self, roots: &[ExprRef]) -> Result<String, std::fmt::Error> {
        self.to_dot_with_config(roots, &DotConfig::default())
    }

    /// Converts the DAG below `roots` to DOT format with custom configuration.
    ///
    /// ```
    /// use nlexpr_rs::dot::DotConfig;
    /// use nlexpr_rs::graph::ExprGraph;
    /// use nlexpr_rs::types::Var;
    ///
    /// let graph = ExprGraph::default();
    /// let x = graph.mk_var(Var::new(0));
    /// let config = DotConfig {
    ///     show_activity: true,
    ///     ..DotConfig::default()
    /// };
    /// let dot = graph.to_dot_with_config(&[x], &config).unwrap();
    /// assert!(dot.contains("[-inf, inf]"));
    /// ```
    pub fn to_dot_with_config(&self, roots: &[ExprRef], config: &DotConfig) -> Result<String, std::fmt::Error> {
        let mut dot = String::new();
        writeln!(dot, "digraph {{")?;
        writeln!(dot, "node [shape={}];", config.node_shape)?;

        let mut nodes = Vec::new();
        for &root in roots {
            for e in self.post_order(root) {
                if !nodes.contains(&e) {
                    nodes.push(e);
                }
            }
        }
        let (leaves, operators): (Vec<ExprRef>, Vec<ExprRef>) =
            nodes.iter().copied().partition(|&e| self.num_children(e) == 0);

        let label = |e: ExprRef| {
            let mut label = self.dot_label(e);
            if config.show_activity {
                label = format!("{}\\n{}", label, self.activity(e));
            }
            escape(&label)
        };

        writeln!(dot, "{{ rank=sink")?;
        for &e in &leaves {
            writeln!(dot, "{} [shape={}, label=\"{}\"];", e.index(), config.leaf_shape, label(e))?;
        }
        writeln!(dot, "}}")?;

        for &e in &operators {
            writeln!(dot, "{} [label=\"{}\"];", e.index(), label(e))?;
        }
        for &e in &operators {
            let coefs = if self.is_sum(e) { self.sum_coefs(e) } else { Vec::new() };
            for (i, child) in self.children(e).into_iter().enumerate() {
                match coefs.get(i) {
                    Some(&c) if c != 1.0 => writeln!(dot, "{} -> {} [label=\"{}\"];", e.index(), child.index(), c)?,
                    _ => writeln!(dot, "{} -> {};", e.index(), child.index())?,
                }
            }
        }

        writeln!(dot, "{{ rank=source")?;
        for (i, root) in roots.iter().enumerate() {
            writeln!(dot, "r{} [shape={}, label=\"{}\"];", i, config.root_shape, root)?;
        }
        writeln!(dot, "}}")?;
        for (i, root) in roots.iter().enumerate() {
            writeln!(dot, "r{} -> {};", i, root.index())?;
        }

        writeln!(dot, "}}")?;
        Ok(dot)
    }
}
