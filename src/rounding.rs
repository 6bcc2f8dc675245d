//! Directed rounding for interval arithmetic.
//!
//! Rust exposes no control over the FPU rounding mode, so every operation is computed in
//! round-to-nearest and then corrected with an error-free transformation: if the exact result
//! lies below (above) the rounded one, the rounded value is moved one ulp down (up).
//! Upward rounding is always obtained by negating a downward-rounded result on negated inputs.
//!
//! Power functions go through libm, which has no exactness guarantee; their results are
//! widened by a relative slack before the final ulp step.

/// Below this magnitude the error terms of the transformations may underflow,
/// so results are stepped unconditionally.
const TINY: f64 = 1e-290;

/// Relative slack applied to libm power results.
const POW_SLACK: f64 = 4.0 * f64::EPSILON;

/// The smallest `f64` strictly greater than `x`.
pub fn next_up(x: f64) -> f64 {
    if x.is_nan() || x == f64::INFINITY {
        return x;
    }
    if x == 0.0 {
        return f64::from_bits(1);
    }
    let bits = x.to_bits();
    if x > 0.0 {
        f64::from_bits(bits + 1)
    } else {
        f64::from_bits(bits - 1)
    }
}

/// The largest `f64` strictly less than `x`.
pub fn next_down(x: f64) -> f64 {
    -next_up(-x)
}

/// Knuth's TwoSum: `a + b == s + err` exactly.
fn two_sum(a: f64, b: f64) -> (f64, f64) {
    let s = a + b;
    let bb = s - a;
    let err = (a - (s - bb)) + (b - bb);
    (s, err)
}

/// `a + b` rounded toward negative infinity.
pub fn add_down(a: f64, b: f64) -> f64 {
    let s = a + b;
    if !s.is_finite() {
        if s == f64::INFINITY && a.is_finite() && b.is_finite() {
            return f64::MAX;
        }
        return s;
    }
    let (s, err) = two_sum(a, b);
    if err < 0.0 {
        next_down(s)
    } else {
        s
    }
}

/// `a + b` rounded toward positive infinity.
pub fn add_up(a: f64, b: f64) -> f64 {
    -add_down(-a, -b)
}

/// `a - b` rounded toward negative infinity.
pub fn sub_down(a: f64, b: f64) -> f64 {
    add_down(a, -b)
}

/// `a - b` rounded toward positive infinity.
pub fn sub_up(a: f64, b: f64) -> f64 {
    add_up(a, -b)
}

/// `a * b` rounded toward negative infinity, with `0 * inf == 0`.
pub fn mul_down(a: f64, b: f64) -> f64 {
    if a == 0.0 || b == 0.0 {
        return 0.0;
    }
    let p = a * b;
    if !p.is_finite() {
        if p == f64::INFINITY && a.is_finite() && b.is_finite() {
            return f64::MAX;
        }
        return p;
    }
    if p.abs() < TINY {
        return next_down(p);
    }
    let err = a.mul_add(b, -p);
    if err < 0.0 {
        next_down(p)
    } else {
        p
    }
}

/// `a * b` rounded toward positive infinity, with `0 * inf == 0`.
pub fn mul_up(a: f64, b: f64) -> f64 {
    -mul_down(-a, b)
}

/// `a / b` rounded toward negative infinity. `b` must be nonzero.
pub fn div_down(a: f64, b: f64) -> f64 {
    debug_assert!(b != 0.0, "division by zero");
    if a == 0.0 {
        return 0.0;
    }
    let q = a / b;
    if !q.is_finite() {
        if q == f64::INFINITY && a.is_finite() && b.is_finite() {
            return f64::MAX;
        }
        return q;
    }
    if b.is_infinite() {
        // finite / inf is exactly zero in the limit
        return q;
    }
    if q.abs() < TINY || a.abs() < TINY {
        return next_down(q);
    }
    // a == q * b + r exactly, so a / b == q + r / b
    let r = (-q).mul_add(b, a);
    if r != 0.0 && (r < 0.0) != (b < 0.0) {
        next_down(q)
    } else {
        q
    }
}

/// `a / b` rounded toward positive infinity. `b` must be nonzero.
pub fn div_up(a: f64, b: f64) -> f64 {
    -div_down(-a, b)
}

fn widen_down(v: f64, rel: f64) -> f64 {
    if !v.is_finite() {
        return v;
    }
    next_down(v - v.abs() * rel)
}

fn widen_up(v: f64, rel: f64) -> f64 {
    -widen_down(-v, rel)
}

/// Exact special cases of `x^e`, if any.
fn pow_exact(x: f64, e: f64) -> Option<f64> {
    if e == 0.0 || x == 1.0 {
        Some(1.0)
    } else if e == 1.0 {
        Some(x)
    } else if x == 0.0 && e > 0.0 {
        Some(0.0)
    } else {
        None
    }
}

/// A lower bound on `x^e`.
pub fn pow_down(x: f64, e: f64) -> f64 {
    if let Some(v) = pow_exact(x, e) {
        return v;
    }
    let v = widen_down(x.powf(e), POW_SLACK);
    // even powers and powers of nonnegative bases are nonnegative
    if (x >= 0.0 || e % 2.0 == 0.0) && v < 0.0 {
        0.0
    } else {
        v
    }
}

/// An upper bound on `x^e`.
pub fn pow_up(x: f64, e: f64) -> f64 {
    if let Some(v) = pow_exact(x, e) {
        return v;
    }
    widen_up(x.powf(e), POW_SLACK)
}

/// Slack for `y^(1/e)`: the rounding error of `1/e` is amplified by `|ln(result)|`.
fn root_slack(v: f64) -> f64 {
    if v > 0.0 && v.is_finite() {
        (4.0 + v.ln().abs()) * f64::EPSILON
    } else {
        POW_SLACK
    }
}

/// A lower bound on `y^(1/e)` for `y >= 0`.
pub fn root_down(y: f64, e: f64) -> f64 {
    debug_assert!(y >= 0.0);
    if e == 1.0 || y == 0.0 || y == 1.0 || y.is_infinite() {
        return y;
    }
    let v = y.powf(1.0 / e);
    widen_down(v, root_slack(v)).max(0.0)
}

/// An upper bound on `y^(1/e)` for `y >= 0`.
pub fn root_up(y: f64, e: f64) -> f64 {
    debug_assert!(y >= 0.0);
    if e == 1.0 || y == 0.0 || y == 1.0 || y.is_infinite() {
        return y;
    }
    let v = y.powf(1.0 / e);
    widen_up(v, root_slack(v))
}
