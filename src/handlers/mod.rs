//! Built-in expression handlers: constants, variables, weighted sums, products and powers.
//!
//! These five handlers are registered in every [`HandlerRegistry`][crate::handler::HandlerRegistry]
//! and define the canonical forms produced by [`ExprGraph::simplify`][crate::graph::ExprGraph::simplify].

mod pow;
mod product;
mod sum;
mod value;
mod var;

pub use pow::PowHandler;
pub use product::ProductHandler;
pub use sum::{reverse_weighted_sum, SumHandler};
pub use value::ValueHandler;
pub use var::VarHandler;
