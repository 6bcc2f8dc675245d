//! Configuration of interval propagation.
//!
//! All knobs have defaults, so a TOML file only has to name what it changes:
//!
//! ```
//! use nlexpr_rs::config::{PropagationConfig, RelaxPolicy};
//!
//! let config = PropagationConfig::from_toml_str(r#"
//!     relax = "relative"
//!     relax_amount = 1e-6
//!     max_rounds = 5
//! "#).unwrap();
//!
//! assert_eq!(config.relax, RelaxPolicy::Relative);
//! assert_eq!(config.max_rounds, 5);
//! assert_eq!(config.max_product_children, 10);
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::interval::Interval;
use crate::rounding::{add_up, sub_down};

/// Configuration error
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// How leaf (variable) bounds are widened before forward propagation.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RelaxPolicy {
    /// Use the bounds as they are.
    #[default]
    None,
    /// Widen each finite bound by `relax_amount`.
    Absolute,
    /// Widen each finite bound by `relax_amount * max(1, |bound|)`.
    Relative,
}

impl RelaxPolicy {
    /// Widen `bounds` according to the policy, rounding outward.
    ///
    /// Integral variables are never relaxed, and a bound never crosses zero: a
    /// nonnegative lower bound stays nonnegative, a nonpositive upper bound stays nonpositive.
    pub fn relax(self, bounds: Interval, amount: f64, integral: bool) -> Interval {
        if integral || bounds.is_empty() {
            return bounds;
        }
        let (dlo, dhi) = match self {
            RelaxPolicy::None => return bounds,
            RelaxPolicy::Absolute => (amount, amount),
            RelaxPolicy::Relative => (
                amount * bounds.inf.abs().max(1.0),
                amount * bounds.sup.abs().max(1.0),
            ),
        };
        let mut inf = bounds.inf;
        if inf.is_finite() {
            let relaxed = sub_down(inf, dlo);
            inf = if inf >= 0.0 { relaxed.max(0.0) } else { relaxed };
        }
        let mut sup = bounds.sup;
        if sup.is_finite() {
            let relaxed = add_up(sup, dhi);
            sup = if sup <= 0.0 { relaxed.min(0.0) } else { relaxed };
        }
        Interval::new(inf, sup)
    }
}

/// Parameters of forward/reverse interval propagation.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default, rename_all = "snake_case")]
pub struct PropagationConfig {
    /// Widening applied to variable bounds by the leaf interval source.
    pub relax: RelaxPolicy,
    /// Amount used by `relax`.
    pub relax_amount: f64,
    /// Safety margin added around auxiliary-variable bounds.
    pub aux_margin: f64,
    /// Minimal relative bound improvement for a non-forced tightening to be applied.
    pub bound_tolerance: f64,
    /// Tolerance used when rounding bounds of integral variables inward.
    pub integral_tolerance: f64,
    /// Maximal number of forward/reverse rounds in [`propagate`][crate::propagate::PropagationSession::propagate].
    pub max_rounds: usize,
    /// Products with more children are not reverse-propagated.
    pub max_product_children: usize,
}

impl Default for PropagationConfig {
    fn default() -> Self {
        Self {
            relax: RelaxPolicy::None,
            relax_amount: 1e-9,
            aux_margin: 1e-6,
            bound_tolerance: 1e-6,
            integral_tolerance: 1e-6,
            max_rounds: 10,
            max_product_children: 10,
        }
    }
}

impl PropagationConfig {
    /// Creates a new default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns error if file doesn't exist, contains invalid TOML, or fails validation.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    /// Parses configuration from a TOML string.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let non_negative = [
            ("relax_amount", self.relax_amount),
            ("aux_margin", self.aux_margin),
            ("bound_tolerance", self.bound_tolerance),
            ("integral_tolerance", self.integral_tolerance),
        ];
        for (name, value) in non_negative {
            if !(value >= 0.0 && value.is_finite()) {
                return Err(ConfigError::Invalid(format!(
                    "{} must be a finite non-negative number, got {}",
                    name, value
                )));
            }
        }
        if self.max_rounds == 0 {
            return Err(ConfigError::Invalid("max_rounds must be positive".to_string()));
        }
        Ok(())
    }
}
