//! # nlexpr-rs: Nonlinear expression DAGs in Rust
//!
//! **`nlexpr-rs`** is a manager-centric library for the algebraic expressions of nonlinear
//! constraints, as found in the expression layer of a constraint integer programming solver.
//! It represents expressions as a DAG with shared subexpressions, rewrites them into a unique
//! simplified form, and tightens variable domains by interval propagation in both directions.
//!
//! ## Key Features
//!
//! - **Manager-Centric Architecture**: All operations go through the [`ExprGraph`][crate::graph::ExprGraph]
//!   manager, which owns the node arena and the handler registry. Nodes are addressed by lightweight
//!   [`ExprRef`][crate::reference::ExprRef] handles and kept alive by explicit reference counts.
//! - **Pluggable Operators**: Each node type is an [`ExprHandler`][crate::handler::ExprHandler]. Only
//!   evaluation is mandatory; everything else (simplification, comparison, printing, interval
//!   evaluation, reverse propagation, hashing, differentiation, curvature, estimation) is optional
//!   and announced through capability flags.
//! - **Canonical Simplification**: Sums, products and powers are rewritten bottom-up into a normal
//!   form ordered by a total order over simplified expressions, so equal expressions become identical.
//! - **Sound Interval Propagation**: Forward and reverse propagation round every bound outward, so
//!   floating-point error can only widen an interval.
//! - **Iterative Traversal**: Every DAG algorithm is a [`Visitor`][crate::walk::Visitor] driven by one
//!   explicit-stack walker, and comparison expands handler-supplied
//!   [`CompareStep`][crate::compare::CompareStep]s on its own stack, so deep expressions do not
//!   exhaust the call stack.
//!
//! ## Basic Usage
//!
//! ```rust
//! use nlexpr_rs::config::PropagationConfig;
//! use nlexpr_rs::domain::{BoxDomains, VarDomains};
//! use nlexpr_rs::graph::ExprGraph;
//! use nlexpr_rs::interval::Interval;
//! use nlexpr_rs::propagate::PropagationSession;
//! use nlexpr_rs::types::Var;
//!
//! // 1. Initialize the manager
//! let graph = ExprGraph::default();
//!
//! // 2. Build 5 + 2x + 3y - 2x
//! let (x, y) = (Var::new(0), Var::new(1));
//! let ex = graph.mk_var(x);
//! let ey = graph.mk_var(y);
//! let raw = graph.mk_sum(&[ex, ey, ex], &[2.0, 3.0, -2.0], 5.0);
//!
//! // 3. Simplify it
//! let f = graph.simplify(raw);
//! graph.release(raw);
//! assert_eq!(graph.to_infix(f), "5+3*x1");
//!
//! // 4. Propagate the constraint f <= 11 over the box y in [0, 10]
//! let mut domains = BoxDomains::new().with(y, 0.0, 10.0);
//! let mut session = PropagationSession::new(&graph, PropagationConfig::default());
//! session.propagate(&[(f, Interval::new(f64::NEG_INFINITY, 11.0))], &mut domains).unwrap();
//! assert_eq!(domains.bounds(y), Interval::new(0.0, 2.0));
//! ```
//!
//! ## Core Components
//!
//! - **[`graph`]**: The [`ExprGraph`][crate::graph::ExprGraph] manager: construction and refcounting.
//! - **[`walk`]**: The iterative walker underlying every other component.
//! - **[`simplify`]** and **[`compare`]**: Canonical simplification and the total order behind it.
//! - **[`propagate`]**: Forward and reverse interval propagation.
//! - **[`hash`]**: Structural hashing and common-subexpression elimination.
//! - **[`handlers`]**: The built-in value, variable, sum, product and power handlers.

pub mod analysis;
pub mod compare;
pub mod config;
pub mod debug;
pub mod domain;
pub mod dot;
pub mod error;
pub mod eval;
pub mod graph;
pub mod handler;
pub mod handlers;
pub mod hash;
pub mod interval;
pub mod nlhdlr;
pub mod node;
pub mod print;
pub mod propagate;
pub mod reference;
pub mod rounding;
pub mod simplify;
pub mod table;
pub mod types;
pub mod utils;
pub mod walk;
