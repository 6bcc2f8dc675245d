use thiserror::Error;

/// Errors raised while registering handlers or building expressions.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ExprError {
    #[error("expression handler '{0}' is already registered")]
    DuplicateHandler(String),

    #[error("no expression handler named '{0}'")]
    UnknownHandler(String),

    #[error("nonlinear handler '{0}' is already registered")]
    DuplicateNlHandler(String),

    #[error("handler '{handler}' expects {expected} children, got {got}")]
    Arity {
        handler: String,
        expected: usize,
        got: usize,
    },

    #[error("payload does not match handler '{handler}'")]
    PayloadMismatch { handler: String },

    #[error("invalid exponent {0}")]
    InvalidExponent(f64),
}

/// Result type alias for expression construction.
pub type Result<T> = std::result::Result<T, ExprError>;

/// Interval propagation proved that no point of the current box is feasible.
#[derive(Debug, Error, Copy, Clone, Eq, PartialEq)]
#[error("infeasible: an expression has an empty interval")]
pub struct Infeasible;
