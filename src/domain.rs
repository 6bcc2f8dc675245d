//! Variable domains seen by interval propagation.
//!
//! Propagation never stores variable bounds itself: it reads them through [`VarDomains`] when
//! it reaches a leaf and writes tightened bounds back through the same trait.

use std::collections::{HashMap, HashSet};

use log::trace;

use crate::config::PropagationConfig;
use crate::error::Infeasible;
use crate::interval::Interval;
use crate::types::Var;

/// Storage of variable bounds.
pub trait VarDomains {
    /// Current bounds of `var`.
    fn bounds(&self, var: Var) -> Interval;

    fn is_integral(&self, var: Var) -> bool {
        let _ = var;
        false
    }

    /// Intersect the domain of `var` with `bounds`.
    ///
    /// Returns whether the domain changed, or [`Infeasible`] if it became empty.
    fn tighten(&mut self, var: Var, bounds: Interval) -> Result<bool, Infeasible>;
}

/// Interval of a variable as seen by forward propagation: its bounds, widened according to
/// the relaxation policy unless the variable is integral.
pub fn leaf_interval(domains: &dyn VarDomains, var: Var, config: &PropagationConfig) -> Interval {
    config
        .relax
        .relax(domains.bounds(var), config.relax_amount, domains.is_integral(var))
}

/// Round `bounds` inward to integers, tolerating values within `tolerance` of an integer.
pub fn round_integral(bounds: Interval, tolerance: f64) -> Interval {
    Interval::new((bounds.inf - tolerance).ceil(), (bounds.sup + tolerance).floor())
}

/// A box of variable bounds in a hash map; unknown variables are unbounded.
#[derive(Debug, Default, Clone)]
pub struct BoxDomains {
    bounds: HashMap<Var, Interval>,
    integral: HashSet<Var>,
}

impl BoxDomains {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_bounds(&mut self, var: Var, inf: f64, sup: f64) {
        self.bounds.insert(var, Interval::new(inf, sup));
    }

    pub fn set_integral(&mut self, var: Var, integral: bool) {
        if integral {
            self.integral.insert(var);
        } else {
            self.integral.remove(&var);
        }
    }

    /// Builder-style [`set_bounds`][BoxDomains::set_bounds].
    pub fn with(mut self, var: Var, inf: f64, sup: f64) -> Self {
        self.set_bounds(var, inf, sup);
        self
    }

    pub fn vars(&self) -> impl Iterator<Item = (Var, Interval)> + '_ {
        self.bounds.iter().map(|(&v, &b)| (v, b))
    }
}

impl VarDomains for BoxDomains {
    fn bounds(&self, var: Var) -> Interval {
        self.bounds.get(&var).copied().unwrap_or(Interval::ENTIRE)
    }

    fn is_integral(&self, var: Var) -> bool {
        self.integral.contains(&var)
    }

    fn tighten(&mut self, var: Var, bounds: Interval) -> Result<bool, Infeasible> {
        let old = self.bounds(var);
        let new = old.intersect(&bounds);
        if new.is_empty() {
            trace!("domain of {} became empty: {} and {}", var, old, bounds);
            return Err(Infeasible);
        }
        if new == old {
            return Ok(false);
        }
        trace!("tightened {} from {} to {}", var, old, new);
        self.bounds.insert(var, new);
        Ok(true)
    }
}
