//! Closed intervals over the extended reals with outward rounding.
//!
//! An interval `[inf, sup]` is empty iff `inf > sup`. Unbounded sides are stored as
//! `f64::NEG_INFINITY` / `f64::INFINITY`. Every operation rounds the lower bound down and the
//! upper bound up (see [`rounding`][crate::rounding]), so a computed interval always encloses
//! the exact result.

use std::fmt;

use crate::rounding::*;

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Interval {
    pub inf: f64,
    pub sup: f64,
}

impl Interval {
    pub const ENTIRE: Interval = Interval {
        inf: f64::NEG_INFINITY,
        sup: f64::INFINITY,
    };

    pub const EMPTY: Interval = Interval {
        inf: f64::INFINITY,
        sup: f64::NEG_INFINITY,
    };

    pub const fn new(inf: f64, sup: f64) -> Self {
        Self { inf, sup }
    }

    pub const fn point(value: f64) -> Self {
        Self {
            inf: value,
            sup: value,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.inf > self.sup
    }

    pub fn is_entire(&self) -> bool {
        self.inf == f64::NEG_INFINITY && self.sup == f64::INFINITY
    }

    pub fn is_point(&self) -> bool {
        self.inf == self.sup
    }

    pub fn contains(&self, x: f64) -> bool {
        self.inf <= x && x <= self.sup
    }

    pub fn is_subset_of(&self, other: &Interval) -> bool {
        self.is_empty() || (other.inf <= self.inf && self.sup <= other.sup)
    }

    pub fn is_nonnegative(&self) -> bool {
        self.inf >= 0.0
    }

    pub fn is_nonpositive(&self) -> bool {
        self.sup <= 0.0
    }

    pub fn width(&self) -> f64 {
        if self.is_empty() {
            0.0
        } else {
            sub_up(self.sup, self.inf)
        }
    }

    /// Largest absolute value of a point in the interval.
    pub fn magnitude(&self) -> f64 {
        self.inf.abs().max(self.sup.abs())
    }

    pub fn intersect(&self, other: &Interval) -> Interval {
        let result = Interval::new(self.inf.max(other.inf), self.sup.min(other.sup));
        if result.is_empty() {
            Interval::EMPTY
        } else {
            result
        }
    }

    /// Smallest interval containing both.
    pub fn hull(&self, other: &Interval) -> Interval {
        if self.is_empty() {
            *other
        } else if other.is_empty() {
            *self
        } else {
            Interval::new(self.inf.min(other.inf), self.sup.max(other.sup))
        }
    }

    pub fn neg(&self) -> Interval {
        if self.is_empty() {
            return Interval::EMPTY;
        }
        Interval::new(-self.sup, -self.inf)
    }

    pub fn add(&self, other: &Interval) -> Interval {
        if self.is_empty() || other.is_empty() {
            return Interval::EMPTY;
        }
        Interval::new(add_down(self.inf, other.inf), add_up(self.sup, other.sup))
    }

    pub fn sub(&self, other: &Interval) -> Interval {
        self.add(&other.neg())
    }

    pub fn add_scalar(&self, c: f64) -> Interval {
        self.add(&Interval::point(c))
    }

    pub fn mul_scalar(&self, c: f64) -> Interval {
        if self.is_empty() {
            return Interval::EMPTY;
        }
        if c == 0.0 {
            Interval::point(0.0)
        } else if c > 0.0 {
            Interval::new(mul_down(self.inf, c), mul_up(self.sup, c))
        } else {
            Interval::new(mul_down(self.sup, c), mul_up(self.inf, c))
        }
    }

    pub fn div_scalar(&self, c: f64) -> Interval {
        if self.is_empty() {
            return Interval::EMPTY;
        }
        if c == 0.0 {
            Interval::ENTIRE
        } else if c > 0.0 {
            Interval::new(div_down(self.inf, c), div_up(self.sup, c))
        } else {
            Interval::new(div_down(self.sup, c), div_up(self.inf, c))
        }
    }

    pub fn mul(&self, other: &Interval) -> Interval {
        if self.is_empty() || other.is_empty() {
            return Interval::EMPTY;
        }
        if self.is_point() {
            return other.mul_scalar(self.inf);
        }
        if other.is_point() {
            return self.mul_scalar(other.inf);
        }
        let (a, b, c, d) = (self.inf, self.sup, other.inf, other.sup);
        let inf = mul_down(a, c)
            .min(mul_down(a, d))
            .min(mul_down(b, c))
            .min(mul_down(b, d));
        let sup = mul_up(a, c).max(mul_up(a, d)).max(mul_up(b, c)).max(mul_up(b, d));
        Interval::new(inf, sup)
    }

    /// `1 / self`. Unbounded on the side of a zero endpoint; `ENTIRE` if zero is interior.
    pub fn reciprocal(&self) -> Interval {
        if self.is_empty() {
            return Interval::EMPTY;
        }
        if self.inf > 0.0 || self.sup < 0.0 {
            Interval::new(div_down(1.0, self.sup), div_up(1.0, self.inf))
        } else if self.inf == 0.0 && self.sup > 0.0 {
            Interval::new(div_down(1.0, self.sup), f64::INFINITY)
        } else if self.sup == 0.0 && self.inf < 0.0 {
            Interval::new(f64::NEG_INFINITY, div_up(1.0, self.inf))
        } else {
            Interval::ENTIRE
        }
    }

    pub fn div(&self, other: &Interval) -> Interval {
        if self.is_empty() || other.is_empty() {
            return Interval::EMPTY;
        }
        if other.is_point() {
            return self.div_scalar(other.inf);
        }
        if other.contains(0.0) {
            return Interval::ENTIRE;
        }
        let (a, b, c, d) = (self.inf, self.sup, other.inf, other.sup);
        let inf = div_down(a, c)
            .min(div_down(a, d))
            .min(div_down(b, c))
            .min(div_down(b, d));
        let sup = div_up(a, c).max(div_up(a, d)).max(div_up(b, c)).max(div_up(b, d));
        Interval::new(inf, sup)
    }

    pub fn square(&self) -> Interval {
        if self.is_empty() {
            return Interval::EMPTY;
        }
        if self.inf >= 0.0 {
            Interval::new(mul_down(self.inf, self.inf), mul_up(self.sup, self.sup))
        } else if self.sup <= 0.0 {
            Interval::new(mul_down(self.sup, self.sup), mul_up(self.inf, self.inf))
        } else {
            let m = self.magnitude();
            Interval::new(0.0, mul_up(m, m))
        }
    }

    /// `self^e` for a constant exponent.
    ///
    /// Integral exponents accept any base. For fractional exponents the base is restricted to
    /// its nonnegative part (and the result is empty if there is none).
    pub fn pow_scalar(&self, e: f64) -> Interval {
        if self.is_empty() {
            return Interval::EMPTY;
        }
        if e == 0.0 {
            return Interval::point(1.0);
        }
        if e == 1.0 {
            return *self;
        }
        if e == 2.0 {
            return self.square();
        }
        if e < 0.0 {
            return self.pow_scalar(-e).reciprocal();
        }

        if e.fract() == 0.0 {
            if e % 2.0 == 0.0 {
                // even: symmetric around zero
                let m = self.magnitude();
                let inf = if self.inf >= 0.0 {
                    pow_down(self.inf, e)
                } else if self.sup <= 0.0 {
                    pow_down(-self.sup, e)
                } else {
                    0.0
                };
                Interval::new(inf, pow_up(m, e))
            } else {
                // odd: increasing everywhere
                Interval::new(pow_down(self.inf, e), pow_up(self.sup, e))
            }
        } else {
            let base = self.intersect(&Interval::new(0.0, f64::INFINITY));
            if base.is_empty() {
                return Interval::EMPTY;
            }
            Interval::new(pow_down(base.inf, e), pow_up(base.sup, e))
        }
    }

    /// Points `x` of `self` such that `x^e` may lie in `image`, as an enclosing interval.
    ///
    /// Inverse of [`pow_scalar`][Interval::pow_scalar]: returns a subset of `self` containing
    /// every `x in self` with `x^e in image`.
    pub fn pow_scalar_inverse(&self, e: f64, image: &Interval) -> Interval {
        if self.is_empty() || image.is_empty() {
            return Interval::EMPTY;
        }
        if e == 0.0 {
            return if image.contains(1.0) {
                *self
            } else {
                Interval::EMPTY
            };
        }
        if e == 1.0 {
            return self.intersect(image);
        }
        if e < 0.0 {
            // x^e == 1 / x^(-e)
            return self.pow_scalar_inverse(-e, &image.reciprocal());
        }

        let is_integral = e.fract() == 0.0;
        if is_integral && e % 2.0 != 0.0 {
            // odd: sign-preserving bijection
            let inf = signed_root_down(image.inf, e);
            let sup = signed_root_up(image.sup, e);
            return self.intersect(&Interval::new(inf, sup));
        }

        // even or fractional: x^e >= 0
        let y = image.intersect(&Interval::new(0.0, f64::INFINITY));
        if y.is_empty() {
            return Interval::EMPTY;
        }
        let lo = root_down(y.inf, e);
        let hi = root_up(y.sup, e);
        let positive = self.intersect(&Interval::new(lo, hi));
        if !is_integral {
            return positive;
        }
        let negative = self.intersect(&Interval::new(-hi, -lo));
        positive.hull(&negative)
    }
}

fn signed_root_down(y: f64, e: f64) -> f64 {
    if y >= 0.0 {
        root_down(y, e)
    } else {
        -root_up(-y, e)
    }
}

fn signed_root_up(y: f64, e: f64) -> f64 {
    -signed_root_down(-y, e)
}

impl Default for Interval {
    fn default() -> Self {
        Interval::ENTIRE
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            write!(f, "[]")
        } else {
            write!(f, "[{}, {}]", self.inf, self.sup)
        }
    }
}
