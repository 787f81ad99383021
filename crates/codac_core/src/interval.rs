//! Closed intervals of the extended real line, with sound outward rounding.
//!
//! The scalar type underlying every domain of the library. Basic arithmetic
//! detects exactly-representable results through error-free residual checks
//! and only widens by one ulp when the floating-point result is inexact;
//! transcendental operations always widen around the faithfully-rounded
//! result, except at a few hard exact points (`cos 0`, `exp 0`, `log 1`, ...).
//!
//! The empty set is the canonical pair `[+oo, -oo]`; no bound is ever NaN.

pub mod boxes;
pub mod bwd;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, AddAssign, Div, DivAssign, Mul, MulAssign, Neg, Sub, SubAssign};

/// Shorthand for `f64::INFINITY`.
pub const OO: f64 = f64::INFINITY;

/// Largest float strictly below `x` (identity on `-oo`).
pub fn previous_float(x: f64) -> f64 {
    if x == f64::NEG_INFINITY {
        x
    } else {
        x.next_down()
    }
}

/// Smallest float strictly above `x` (identity on `+oo`).
pub fn next_float(x: f64) -> f64 {
    if x == f64::INFINITY {
        x
    } else {
        x.next_up()
    }
}

/// A closed, connected subset of the extended reals, possibly empty or
/// unbounded.
#[derive(Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Interval {
    lb: f64,
    ub: f64,
}

// Rounded endpoint arithmetic. `*_dn` rounds towards -oo, `*_up` towards +oo.
// Results of finite operations stay exact when the f64 result is exact.

fn add_dn(a: f64, b: f64) -> f64 {
    let r = a + b;
    if r.is_nan() {
        // oo + -oo only happens on conservative endpoint combinations
        return f64::NEG_INFINITY;
    }
    if r == f64::INFINITY && a.is_finite() && b.is_finite() {
        return f64::MAX;
    }
    if r.is_infinite() || (r - a == b && r - b == a) {
        r
    } else {
        r.next_down()
    }
}

fn add_up(a: f64, b: f64) -> f64 {
    let r = a + b;
    if r.is_nan() {
        return f64::INFINITY;
    }
    if r == f64::NEG_INFINITY && a.is_finite() && b.is_finite() {
        return f64::MIN;
    }
    if r.is_infinite() || (r - a == b && r - b == a) {
        r
    } else {
        r.next_up()
    }
}

fn sub_dn(a: f64, b: f64) -> f64 {
    add_dn(a, -b)
}

fn sub_up(a: f64, b: f64) -> f64 {
    add_up(a, -b)
}

// Endpoint products apply the interval convention 0 * oo = 0.

fn mul_dn(x: f64, y: f64) -> f64 {
    if x == 0.0 || y == 0.0 {
        return 0.0;
    }
    let r = x * y;
    if r == f64::INFINITY && x.is_finite() && y.is_finite() {
        return f64::MAX;
    }
    if r.is_infinite() || x.mul_add(y, -r) == 0.0 {
        r
    } else {
        r.next_down()
    }
}

fn mul_up(x: f64, y: f64) -> f64 {
    if x == 0.0 || y == 0.0 {
        return 0.0;
    }
    let r = x * y;
    if r == f64::NEG_INFINITY && x.is_finite() && y.is_finite() {
        return f64::MIN;
    }
    if r.is_infinite() || x.mul_add(y, -r) == 0.0 {
        r
    } else {
        r.next_up()
    }
}

fn div_dn(x: f64, y: f64) -> f64 {
    if x == 0.0 && y != 0.0 {
        return 0.0;
    }
    let r = x / y;
    if r.is_nan() {
        // oo/oo endpoint combination: conservative
        return f64::NEG_INFINITY;
    }
    if r == f64::INFINITY && x.is_finite() {
        return f64::MAX;
    }
    if r.is_infinite() || (y.is_finite() && r.mul_add(y, -x) == 0.0) {
        r
    } else {
        r.next_down()
    }
}

fn div_up(x: f64, y: f64) -> f64 {
    if x == 0.0 && y != 0.0 {
        return 0.0;
    }
    let r = x / y;
    if r.is_nan() {
        return f64::INFINITY;
    }
    if r == f64::NEG_INFINITY && x.is_finite() {
        return f64::MIN;
    }
    if r.is_infinite() || (y.is_finite() && r.mul_add(y, -x) == 0.0) {
        r
    } else {
        r.next_up()
    }
}

impl Interval {
    pub const EMPTY: Interval = Interval {
        lb: f64::INFINITY,
        ub: f64::NEG_INFINITY,
    };

    pub const ENTIRE: Interval = Interval {
        lb: f64::NEG_INFINITY,
        ub: f64::INFINITY,
    };

    pub const ZERO: Interval = Interval { lb: 0.0, ub: 0.0 };
    pub const ONE: Interval = Interval { lb: 1.0, ub: 1.0 };

    /// Enclosure of pi/2.
    pub const HALF_PI: Interval = Interval {
        lb: 1.5707963267948966,
        ub: 1.570796326794897,
    };

    /// Enclosure of pi.
    pub const PI: Interval = Interval {
        lb: 3.141592653589793,
        ub: 3.1415926535897936,
    };

    /// Enclosure of 2 pi.
    pub const TWO_PI: Interval = Interval {
        lb: 6.283185307179586,
        ub: 6.283185307179587,
    };

    /// `[lb, ub]`. Panics if `lb > ub` or a bound is NaN.
    pub fn new(lb: f64, ub: f64) -> Self {
        assert!(!lb.is_nan() && !ub.is_nan(), "interval bound is NaN");
        assert!(lb <= ub, "invalid interval bounds [{lb}, {ub}]");
        Self { lb, ub }
    }

    /// Degenerate interval `[x, x]`.
    pub fn point(x: f64) -> Self {
        assert!(!x.is_nan(), "interval bound is NaN");
        Self { lb: x, ub: x }
    }

    pub(crate) fn checked(lb: f64, ub: f64) -> Self {
        if lb.is_nan() || ub.is_nan() || lb > ub {
            Self::EMPTY
        } else {
            Self { lb, ub }
        }
    }

    pub fn lb(&self) -> f64 {
        self.lb
    }

    pub fn ub(&self) -> f64 {
        self.ub
    }

    pub fn is_empty(&self) -> bool {
        self.lb > self.ub
    }

    pub fn is_degenerated(&self) -> bool {
        !self.is_empty() && self.lb == self.ub
    }

    pub fn is_unbounded(&self) -> bool {
        !self.is_empty() && (self.lb == f64::NEG_INFINITY || self.ub == f64::INFINITY)
    }

    pub fn contains(&self, x: f64) -> bool {
        !self.is_empty() && self.lb <= x && x <= self.ub
    }

    pub fn interior_contains(&self, x: f64) -> bool {
        !self.is_empty() && self.lb < x && x < self.ub
    }

    pub fn is_subset(&self, other: &Interval) -> bool {
        self.is_empty() || (!other.is_empty() && other.lb <= self.lb && self.ub <= other.ub)
    }

    pub fn is_superset(&self, other: &Interval) -> bool {
        other.is_subset(self)
    }

    pub fn intersects(&self, other: &Interval) -> bool {
        !self.is_empty() && !other.is_empty() && self.lb <= other.ub && other.lb <= self.ub
    }

    pub fn is_disjoint(&self, other: &Interval) -> bool {
        !self.intersects(other)
    }

    /// Midpoint. `0` for the entire line, finite saturation for half-lines.
    pub fn mid(&self) -> f64 {
        assert!(!self.is_empty(), "midpoint of an empty interval");
        if self.lb == f64::NEG_INFINITY {
            if self.ub == f64::INFINITY {
                0.0
            } else {
                f64::MIN
            }
        } else if self.ub == f64::INFINITY {
            f64::MAX
        } else {
            let m = self.lb / 2.0 + self.ub / 2.0;
            if m.is_finite() {
                m
            } else {
                0.0
            }
        }
    }

    pub fn diam(&self) -> f64 {
        if self.is_empty() {
            0.0
        } else {
            sub_up(self.ub, self.lb)
        }
    }

    pub fn rad(&self) -> f64 {
        self.diam() / 2.0
    }

    /// Magnitude: largest absolute value of the interval.
    pub fn mag(&self) -> f64 {
        assert!(!self.is_empty());
        self.lb.abs().max(self.ub.abs())
    }

    /// Mignitude: smallest absolute value of the interval.
    pub fn mig(&self) -> f64 {
        assert!(!self.is_empty());
        if self.contains(0.0) {
            0.0
        } else {
            self.lb.abs().min(self.ub.abs())
        }
    }

    /// Intersection.
    pub fn inter(&self, other: &Interval) -> Interval {
        if self.is_empty() || other.is_empty() {
            return Self::EMPTY;
        }
        Self::checked(self.lb.max(other.lb), self.ub.min(other.ub))
    }

    /// Interval hull of the union.
    pub fn hull(&self, other: &Interval) -> Interval {
        if self.is_empty() {
            return *other;
        }
        if other.is_empty() {
            return *self;
        }
        Self {
            lb: self.lb.min(other.lb),
            ub: self.ub.max(other.ub),
        }
    }

    pub fn inflate(&self, r: f64) -> Interval {
        assert!(r >= 0.0);
        if self.is_empty() {
            return *self;
        }
        Self {
            lb: sub_dn(self.lb, r),
            ub: add_up(self.ub, r),
        }
    }

    /// Splits at `lb + ratio * diam`; both halves share the cut point.
    pub fn bisect(&self, ratio: f64) -> (Interval, Interval) {
        assert!(!self.is_empty() && ratio > 0.0 && ratio < 1.0);
        assert!(self.lb < self.ub, "cannot bisect a degenerate interval");
        let cut = if self.lb == f64::NEG_INFINITY {
            if self.ub == f64::INFINITY {
                0.0
            } else {
                self.ub - 1.0
            }
        } else if self.ub == f64::INFINITY {
            self.lb + 1.0
        } else {
            self.lb + ratio * (self.ub - self.lb)
        };
        let cut = cut.clamp(self.lb, self.ub);
        (
            Self {
                lb: self.lb,
                ub: cut,
            },
            Self {
                lb: cut,
                ub: self.ub,
            },
        )
    }
}

impl Default for Interval {
    /// The entire real line.
    fn default() -> Self {
        Self::ENTIRE
    }
}

impl fmt::Debug for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            write!(f, "[ empty ]")
        } else {
            write!(f, "[{}, {}]", self.lb, self.ub)
        }
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl From<f64> for Interval {
    fn from(x: f64) -> Self {
        Self::point(x)
    }
}

impl From<i32> for Interval {
    fn from(x: i32) -> Self {
        Self::point(x as f64)
    }
}

impl Neg for Interval {
    type Output = Interval;
    fn neg(self) -> Interval {
        if self.is_empty() {
            return self;
        }
        Interval {
            lb: -self.ub,
            ub: -self.lb,
        }
    }
}

impl Add for Interval {
    type Output = Interval;
    fn add(self, rhs: Interval) -> Interval {
        if self.is_empty() || rhs.is_empty() {
            return Interval::EMPTY;
        }
        Interval {
            lb: add_dn(self.lb, rhs.lb),
            ub: add_up(self.ub, rhs.ub),
        }
    }
}

impl Sub for Interval {
    type Output = Interval;
    fn sub(self, rhs: Interval) -> Interval {
        if self.is_empty() || rhs.is_empty() {
            return Interval::EMPTY;
        }
        Interval {
            lb: sub_dn(self.lb, rhs.ub),
            ub: sub_up(self.ub, rhs.lb),
        }
    }
}

impl Mul for Interval {
    type Output = Interval;
    fn mul(self, rhs: Interval) -> Interval {
        if self.is_empty() || rhs.is_empty() {
            return Interval::EMPTY;
        }
        let (a, b, c, d) = (self.lb, self.ub, rhs.lb, rhs.ub);
        let lo = mul_dn(a, c).min(mul_dn(a, d)).min(mul_dn(b, c)).min(mul_dn(b, d));
        let hi = mul_up(a, c).max(mul_up(a, d)).max(mul_up(b, c)).max(mul_up(b, d));
        Interval { lb: lo, ub: hi }
    }
}

impl Div for Interval {
    type Output = Interval;
    fn div(self, rhs: Interval) -> Interval {
        if self.is_empty() || rhs.is_empty() {
            return Interval::EMPTY;
        }
        let (a, b, c, d) = (self.lb, self.ub, rhs.lb, rhs.ub);
        if c == 0.0 && d == 0.0 {
            return if self.contains(0.0) {
                Interval::ENTIRE
            } else {
                Interval::EMPTY
            };
        }
        if rhs.interior_contains(0.0) {
            // Hull of the two quotient rays
            return if a == 0.0 && b == 0.0 {
                Interval::ZERO
            } else {
                Interval::ENTIRE
            };
        }
        if c == 0.0 {
            // d > 0
            return if a >= 0.0 {
                Interval {
                    lb: div_dn(a, d),
                    ub: f64::INFINITY,
                }
            } else if b <= 0.0 {
                Interval {
                    lb: f64::NEG_INFINITY,
                    ub: div_up(b, d),
                }
            } else {
                Interval::ENTIRE
            };
        }
        if d == 0.0 {
            // c < 0
            return if a >= 0.0 {
                Interval {
                    lb: f64::NEG_INFINITY,
                    ub: div_up(a, c),
                }
            } else if b <= 0.0 {
                Interval {
                    lb: div_dn(b, c),
                    ub: f64::INFINITY,
                }
            } else {
                Interval::ENTIRE
            };
        }
        let lo = div_dn(a, c).min(div_dn(a, d)).min(div_dn(b, c)).min(div_dn(b, d));
        let hi = div_up(a, c).max(div_up(a, d)).max(div_up(b, c)).max(div_up(b, d));
        Interval { lb: lo, ub: hi }
    }
}

macro_rules! impl_assign_ops {
    ($($trait_:ident $method:ident $op:tt,)*) => {$(
        impl $trait_ for Interval {
            fn $method(&mut self, rhs: Interval) {
                *self = *self $op rhs;
            }
        }
    )*};
}

impl_assign_ops! {
    AddAssign add_assign +,
    SubAssign sub_assign -,
    MulAssign mul_assign *,
    DivAssign div_assign /,
}

macro_rules! impl_f64_ops {
    ($($trait_:ident $method:ident,)*) => {$(
        impl $trait_<f64> for Interval {
            type Output = Interval;
            fn $method(self, rhs: f64) -> Interval {
                self.$method(Interval::point(rhs))
            }
        }
        impl $trait_<Interval> for f64 {
            type Output = Interval;
            fn $method(self, rhs: Interval) -> Interval {
                Interval::point(self).$method(rhs)
            }
        }
    )*};
}

impl_f64_ops! {
    Add add,
    Sub sub,
    Mul mul,
    Div div,
}

impl num_traits::Zero for Interval {
    fn zero() -> Self {
        Self::ZERO
    }
    fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }
}

impl num_traits::One for Interval {
    fn one() -> Self {
        Self::ONE
    }
}

// --- Forward operations ---

/// `x^2`.
pub fn sqr(x: Interval) -> Interval {
    if x.is_empty() {
        return x;
    }
    let lo = x.mig();
    let hi = x.mag();
    Interval {
        lb: mul_dn(lo, lo),
        ub: mul_up(hi, hi),
    }
}

fn sqrt_up(a: f64) -> f64 {
    let r = a.sqrt();
    if r.is_infinite() || r.mul_add(r, -a) == 0.0 {
        r
    } else {
        r.next_up()
    }
}

fn sqrt_dn(a: f64) -> f64 {
    let r = a.sqrt();
    if r.is_infinite() || r.mul_add(r, -a) == 0.0 {
        r
    } else {
        r.next_down()
    }
}

/// Square root over the nonnegative part of `x`.
pub fn sqrt(x: Interval) -> Interval {
    let x = x.inter(&Interval::new(0.0, OO));
    if x.is_empty() {
        return x;
    }
    Interval {
        lb: sqrt_dn(x.lb).max(0.0),
        ub: sqrt_up(x.ub),
    }
}

/// Integer power.
pub fn pow_int(x: Interval, n: i32) -> Interval {
    if x.is_empty() {
        return x;
    }
    if n == 0 {
        return Interval::ONE;
    }
    if n < 0 {
        return Interval::ONE / pow_int(x, -n);
    }
    if n % 2 == 0 {
        // even: minimum at the mignitude
        let lo = x.mig();
        let hi = x.mag();
        let mut plo = 1.0;
        let mut phi = 1.0;
        for _ in 0..n {
            plo = mul_dn(plo, lo);
            phi = mul_up(phi, hi);
        }
        Interval { lb: plo, ub: phi }
    } else {
        let mut r = Interval::ONE;
        for _ in 0..n {
            r = r * x;
        }
        // odd powers are monotone; the product loop already yields the hull
        r
    }
}

/// Real-exponent power, `x > 0` branch (`pow_int` handles integer exponents).
pub fn pow_real(x: Interval, d: f64) -> Interval {
    if d == d.trunc() && d.abs() < i32::MAX as f64 {
        return pow_int(x, d as i32);
    }
    exp(Interval::point(d) * log(x))
}

/// Interval-exponent power `exp(y ln x)`; integer rule on degenerate
/// integer exponents.
pub fn pow(x: Interval, y: Interval) -> Interval {
    if y.is_degenerated() {
        return pow_real(x, y.lb());
    }
    exp(y * log(x))
}

/// `n`-th root, sign-symmetric for odd `n`.
pub fn root(x: Interval, n: i32) -> Interval {
    if x.is_empty() || n == 0 {
        return Interval::EMPTY;
    }
    if n == 1 {
        return x;
    }
    if n % 2 == 0 {
        pow_real(x.inter(&Interval::new(0.0, OO)), 1.0 / n as f64)
    } else {
        let xp = x.inter(&Interval::new(0.0, OO));
        let xn = x.inter(&Interval::new(-OO, 0.0));
        let rp = pow_real(xp, 1.0 / n as f64);
        let rn = -pow_real(-xn, 1.0 / n as f64);
        rp.hull(&rn)
    }
}

// Monotone transcendental helper: widen the faithfully-rounded endpoints.
fn lib_dn(r: f64) -> f64 {
    if r.is_infinite() {
        r
    } else {
        r.next_down()
    }
}

fn lib_up(r: f64) -> f64 {
    if r.is_infinite() {
        r
    } else {
        r.next_up()
    }
}

pub fn exp(x: Interval) -> Interval {
    if x.is_empty() {
        return x;
    }
    let lo = if x.lb == 0.0 {
        1.0
    } else if x.lb == f64::NEG_INFINITY {
        0.0
    } else {
        lib_dn(x.lb.exp()).max(0.0)
    };
    let hi = if x.ub == 0.0 {
        1.0
    } else {
        lib_up(x.ub.exp())
    };
    Interval { lb: lo, ub: hi }
}

/// Natural logarithm over the positive part of `x`.
pub fn log(x: Interval) -> Interval {
    let x = x.inter(&Interval::new(0.0, OO));
    if x.is_empty() {
        return x;
    }
    let lo = if x.lb == 0.0 {
        f64::NEG_INFINITY
    } else if x.lb == 1.0 {
        0.0
    } else {
        lib_dn(x.lb.ln())
    };
    let hi = if x.ub == 1.0 { 0.0 } else { lib_up(x.ub.ln()) };
    Interval::checked(lo, hi)
}

const FRAC_1_2PI: f64 = 0.15915494309189535;

// Whether [a, b] contains a point 2k*pi + offset for some integer k,
// over-approximated outwards so a barely-contained extremum is never missed.
fn contains_period_point(a: f64, b: f64, offset: f64) -> bool {
    if b - a >= Interval::TWO_PI.ub {
        return true;
    }
    let qa = ((a - offset) * FRAC_1_2PI).next_down().ceil();
    let qb = ((b - offset) * FRAC_1_2PI).next_up().floor();
    qb >= qa
}

pub fn cos(x: Interval) -> Interval {
    if x.is_empty() {
        return x;
    }
    if x.is_unbounded() || x.diam() >= Interval::TWO_PI.ub {
        return Interval::new(-1.0, 1.0);
    }
    if x.is_degenerated() && x.lb == 0.0 {
        return Interval::ONE;
    }
    let hi = if contains_period_point(x.lb, x.ub, 0.0) {
        1.0
    } else {
        lib_up(x.lb.cos().max(x.ub.cos())).min(1.0)
    };
    let lo = if contains_period_point(x.lb, x.ub, std::f64::consts::PI) {
        -1.0
    } else {
        lib_dn(x.lb.cos().min(x.ub.cos())).max(-1.0)
    };
    Interval { lb: lo, ub: hi }
}

pub fn sin(x: Interval) -> Interval {
    if x.is_empty() {
        return x;
    }
    if x.is_unbounded() || x.diam() >= Interval::TWO_PI.ub {
        return Interval::new(-1.0, 1.0);
    }
    if x.is_degenerated() && x.lb == 0.0 {
        return Interval::ZERO;
    }
    let hi = if contains_period_point(x.lb, x.ub, std::f64::consts::FRAC_PI_2) {
        1.0
    } else {
        lib_up(x.lb.sin().max(x.ub.sin())).min(1.0)
    };
    let lo = if contains_period_point(x.lb, x.ub, -std::f64::consts::FRAC_PI_2) {
        -1.0
    } else {
        lib_dn(x.lb.sin().min(x.ub.sin())).max(-1.0)
    };
    Interval { lb: lo, ub: hi }
}

pub fn tan(x: Interval) -> Interval {
    if x.is_empty() {
        return x;
    }
    // Discontinuous at pi/2 + k*pi
    if x.is_unbounded()
        || x.diam() >= Interval::PI.ub
        || contains_period_point(x.lb, x.ub, std::f64::consts::FRAC_PI_2)
        || contains_period_point(x.lb, x.ub, -std::f64::consts::FRAC_PI_2)
    {
        return Interval::ENTIRE;
    }
    if x.is_degenerated() && x.lb == 0.0 {
        return Interval::ZERO;
    }
    Interval::checked(lib_dn(x.lb.tan()), lib_up(x.ub.tan()))
}

pub fn acos(x: Interval) -> Interval {
    let x = x.inter(&Interval::new(-1.0, 1.0));
    if x.is_empty() {
        return x;
    }
    // decreasing
    Interval::checked(lib_dn(x.ub.acos()).max(0.0), lib_up(x.lb.acos()).min(Interval::PI.ub))
}

pub fn asin(x: Interval) -> Interval {
    let x = x.inter(&Interval::new(-1.0, 1.0));
    if x.is_empty() {
        return x;
    }
    let lo = if x.lb == 0.0 { 0.0 } else { lib_dn(x.lb.asin()) };
    let hi = if x.ub == 0.0 { 0.0 } else { lib_up(x.ub.asin()) };
    Interval::checked(lo.max(-Interval::HALF_PI.ub), hi.min(Interval::HALF_PI.ub))
}

pub fn atan(x: Interval) -> Interval {
    if x.is_empty() {
        return x;
    }
    let lo = if x.lb == 0.0 {
        0.0
    } else if x.lb == f64::NEG_INFINITY {
        -Interval::HALF_PI.ub
    } else {
        lib_dn(x.lb.atan())
    };
    let hi = if x.ub == 0.0 {
        0.0
    } else if x.ub == f64::INFINITY {
        Interval::HALF_PI.ub
    } else {
        lib_up(x.ub.atan())
    };
    Interval { lb: lo, ub: hi }
}

/// Angle of the point `(x2, x1)` (codomain `[-pi, pi]`), i.e. `atan2(y, x)`
/// with `y = x1` and `x = x2`.
pub fn atan2(y: Interval, x: Interval) -> Interval {
    if y.is_empty() || x.is_empty() {
        return Interval::EMPTY;
    }
    if x.contains(0.0) && y.contains(0.0) {
        return Interval::new(-Interval::PI.ub, Interval::PI.ub);
    }
    if x.lb() < 0.0 && y.contains(0.0) {
        // branch cut along the negative x-axis
        return Interval::new(-Interval::PI.ub, Interval::PI.ub);
    }
    let mut lo = f64::INFINITY;
    let mut hi = f64::NEG_INFINITY;
    for yy in [y.lb, y.ub] {
        for xx in [x.lb, x.ub] {
            let v = yy.atan2(xx);
            if !v.is_nan() {
                lo = lo.min(v);
                hi = hi.max(v);
            }
        }
    }
    if x.contains(0.0) {
        if y.ub > 0.0 {
            lo = lo.min(Interval::HALF_PI.lb);
            hi = hi.max(Interval::HALF_PI.ub);
        }
        if y.lb < 0.0 {
            lo = lo.min(-Interval::HALF_PI.ub);
            hi = hi.max(-Interval::HALF_PI.lb);
        }
    }
    if y.contains(0.0) && x.ub > 0.0 {
        lo = lo.min(0.0);
        hi = hi.max(0.0);
    }
    Interval::checked(lib_dn(lo), lib_up(hi))
}

pub fn cosh(x: Interval) -> Interval {
    if x.is_empty() {
        return x;
    }
    let lo = x.mig();
    let hi = x.mag();
    let lb = if lo == 0.0 { 1.0 } else { lib_dn(lo.cosh()).max(1.0) };
    let ub = if hi.is_infinite() {
        f64::INFINITY
    } else {
        lib_up(hi.cosh())
    };
    Interval { lb, ub }
}

pub fn sinh(x: Interval) -> Interval {
    if x.is_empty() {
        return x;
    }
    let lo = if x.lb == 0.0 {
        0.0
    } else if x.lb.is_infinite() {
        x.lb
    } else {
        lib_dn(x.lb.sinh())
    };
    let hi = if x.ub == 0.0 {
        0.0
    } else if x.ub.is_infinite() {
        x.ub
    } else {
        lib_up(x.ub.sinh())
    };
    Interval { lb: lo, ub: hi }
}

pub fn tanh(x: Interval) -> Interval {
    if x.is_empty() {
        return x;
    }
    let lo = if x.lb == 0.0 { 0.0 } else { lib_dn(x.lb.tanh()).max(-1.0) };
    let hi = if x.ub == 0.0 { 0.0 } else { lib_up(x.ub.tanh()).min(1.0) };
    Interval { lb: lo, ub: hi }
}

pub fn acosh(x: Interval) -> Interval {
    let x = x.inter(&Interval::new(1.0, OO));
    if x.is_empty() {
        return x;
    }
    let lo = if x.lb == 1.0 { 0.0 } else { lib_dn(x.lb.acosh()).max(0.0) };
    let hi = if x.ub.is_infinite() {
        f64::INFINITY
    } else {
        lib_up(x.ub.acosh())
    };
    Interval { lb: lo, ub: hi }
}

pub fn asinh(x: Interval) -> Interval {
    if x.is_empty() {
        return x;
    }
    let lo = if x.lb == 0.0 {
        0.0
    } else if x.lb.is_infinite() {
        x.lb
    } else {
        lib_dn(x.lb.asinh())
    };
    let hi = if x.ub == 0.0 {
        0.0
    } else if x.ub.is_infinite() {
        x.ub
    } else {
        lib_up(x.ub.asinh())
    };
    Interval { lb: lo, ub: hi }
}

pub fn atanh(x: Interval) -> Interval {
    let x = x.inter(&Interval::new(-1.0, 1.0));
    if x.is_empty() {
        return x;
    }
    let lo = if x.lb == -1.0 {
        f64::NEG_INFINITY
    } else if x.lb == 0.0 {
        0.0
    } else {
        lib_dn(x.lb.atanh())
    };
    let hi = if x.ub == 1.0 {
        f64::INFINITY
    } else if x.ub == 0.0 {
        0.0
    } else {
        lib_up(x.ub.atanh())
    };
    Interval { lb: lo, ub: hi }
}

pub fn abs(x: Interval) -> Interval {
    if x.is_empty() {
        return x;
    }
    Interval {
        lb: x.mig(),
        ub: x.mag(),
    }
}

/// `-1`, `1`, or `[-1, 1]` when `x` straddles zero.
pub fn sign(x: Interval) -> Interval {
    if x.is_empty() {
        return x;
    }
    if x.lb > 0.0 {
        Interval::ONE
    } else if x.ub < 0.0 {
        -Interval::ONE
    } else {
        Interval::new(-1.0, 1.0)
    }
}

pub fn floor(x: Interval) -> Interval {
    if x.is_empty() {
        return x;
    }
    Interval {
        lb: x.lb.floor(),
        ub: x.ub.floor(),
    }
}

pub fn ceil(x: Interval) -> Interval {
    if x.is_empty() {
        return x;
    }
    Interval {
        lb: x.lb.ceil(),
        ub: x.ub.ceil(),
    }
}

pub fn min(x: Interval, y: Interval) -> Interval {
    if x.is_empty() || y.is_empty() {
        return Interval::EMPTY;
    }
    Interval {
        lb: x.lb.min(y.lb),
        ub: x.ub.min(y.ub),
    }
}

pub fn max(x: Interval, y: Interval) -> Interval {
    if x.is_empty() || y.is_empty() {
        return Interval::EMPTY;
    }
    Interval {
        lb: x.lb.max(y.lb),
        ub: x.ub.max(y.ub),
    }
}

/// Switch operator: `a` where the mask is nonpositive, `b` where it is
/// positive, their hull when the mask straddles zero.
pub fn chi(mask: Interval, a: Interval, b: Interval) -> Interval {
    if mask.is_empty() {
        return Interval::EMPTY;
    }
    if mask.ub <= 0.0 {
        a
    } else if mask.lb > 0.0 {
        b
    } else {
        a.hull(&b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_arithmetic_stays_exact() {
        let a = Interval::new(1.0, 2.0);
        let b = Interval::new(-0.5, 3.0);
        assert_eq!(a + b, Interval::new(0.5, 5.0));
        assert_eq!(a - b, Interval::new(-2.0, 2.5));
        assert_eq!(a * b, Interval::new(-1.0, 6.0));
        assert_eq!(Interval::new(1.0, 4.0) / Interval::new(2.0, 2.0), Interval::new(0.5, 2.0));
        assert_eq!(sqr(Interval::new(-3.0, 2.0)), Interval::new(0.0, 9.0));
        assert_eq!(sqrt(Interval::new(0.0, 4.0)), Interval::new(0.0, 2.0));
    }

    #[test]
    fn inexact_arithmetic_widens_outward() {
        let r = Interval::point(1.0) / Interval::point(3.0);
        assert!(r.lb() < r.ub());
        assert!(r.contains(1.0 / 3.0));
        assert!(r.diam() < 1e-15);
    }

    #[test]
    fn empty_propagates() {
        assert!((Interval::EMPTY + Interval::ONE).is_empty());
        assert!(sqrt(Interval::new(-2.0, -1.0)).is_empty());
        assert!(log(Interval::new(-2.0, -1.0)).is_empty());
    }

    #[test]
    fn division_cases() {
        assert_eq!(Interval::new(1.0, 2.0) / Interval::new(-1.0, 1.0), Interval::ENTIRE);
        assert_eq!(
            Interval::new(1.0, 2.0) / Interval::new(0.0, 1.0),
            Interval::new(1.0, OO)
        );
        assert_eq!(
            Interval::new(-2.0, -1.0) / Interval::new(0.0, 1.0),
            Interval::new(-OO, -1.0)
        );
        assert!((Interval::new(1.0, 2.0) / Interval::ZERO).is_empty());
        assert_eq!(Interval::ZERO / Interval::ZERO, Interval::ENTIRE);
    }

    #[test]
    fn zero_times_unbounded_is_zero() {
        assert_eq!(Interval::ZERO * Interval::ENTIRE, Interval::ZERO);
        assert_eq!(
            Interval::new(0.0, 1.0) * Interval::new(2.0, OO),
            Interval::new(0.0, OO)
        );
    }

    #[test]
    fn trigonometric_enclosures() {
        assert_eq!(cos(Interval::ZERO), Interval::ONE);
        assert_eq!(sin(Interval::ZERO), Interval::ZERO);
        assert_eq!(cos(Interval::ENTIRE), Interval::new(-1.0, 1.0));
        // [0, pi] spans the maximum at 0 and the minimum at pi
        let c = cos(Interval::new(0.0, 3.2));
        assert_eq!(c, Interval::new(-1.0, 1.0));
        let s = sin(Interval::new(0.0, 2.0));
        assert_eq!(s.ub(), 1.0);
        assert!(s.lb() <= 0.0 && s.lb() > -1e-15);
        assert!(sin(Interval::point(std::f64::consts::FRAC_PI_2)).contains(1.0));
    }

    #[test]
    fn tan_branches() {
        assert_eq!(tan(Interval::new(0.0, 2.0)), Interval::ENTIRE);
        let t = tan(Interval::new(-0.5, 0.5));
        assert!(t.contains((0.5f64).tan()) && t.contains(-(0.5f64).tan()));
        assert!(!t.is_unbounded());
    }

    #[test]
    fn powers_and_roots() {
        assert_eq!(pow_int(Interval::new(-2.0, 3.0), 2), Interval::new(0.0, 9.0));
        assert_eq!(pow_int(Interval::new(-2.0, 3.0), 3), Interval::new(-8.0, 27.0));
        assert_eq!(pow_int(Interval::new(2.0, 4.0), -1), Interval::new(0.25, 0.5));
        assert!(root(Interval::new(-8.0, 27.0), 3).contains(-2.0));
        assert!(root(Interval::new(-8.0, 27.0), 3).contains(3.0));
        assert!(pow(Interval::point(3.0), Interval::point(2.0)) == Interval::new(9.0, 9.0));
    }

    #[test]
    fn sign_floor_ceil_chi() {
        assert_eq!(sign(Interval::new(-1.0, 2.0)), Interval::new(-1.0, 1.0));
        assert_eq!(sign(Interval::new(0.0, 0.0)), Interval::new(-1.0, 1.0));
        assert_eq!(floor(Interval::new(-1.5, 2.7)), Interval::new(-2.0, 2.0));
        assert_eq!(ceil(Interval::new(-1.5, 2.7)), Interval::new(-1.0, 3.0));
        let a = Interval::new(1.0, 2.0);
        let b = Interval::new(5.0, 6.0);
        assert_eq!(chi(Interval::new(-3.0, -1.0), a, b), a);
        assert_eq!(chi(Interval::new(1.0, 2.0), a, b), b);
        assert_eq!(chi(Interval::new(-1.0, 1.0), a, b), Interval::new(1.0, 6.0));
    }

    #[test]
    fn atan2_quadrants() {
        let q1 = atan2(Interval::new(1.0, 2.0), Interval::new(1.0, 2.0));
        assert!(q1.is_subset(&Interval::new(0.0, Interval::HALF_PI.ub)));
        let cut = atan2(Interval::new(-1.0, 1.0), Interval::new(-2.0, -1.0));
        assert_eq!(cut, Interval::new(-Interval::PI.ub, Interval::PI.ub));
        assert!(atan2(Interval::point(1.0), Interval::point(0.0)).contains(std::f64::consts::FRAC_PI_2));
    }

    #[test]
    fn hull_inter_bisect() {
        let a = Interval::new(0.0, 2.0);
        let b = Interval::new(1.0, 5.0);
        assert_eq!(a.hull(&b), Interval::new(0.0, 5.0));
        assert_eq!(a.inter(&b), Interval::new(1.0, 2.0));
        assert!(a.inter(&Interval::new(3.0, 4.0)).is_empty());
        let (l, r) = Interval::new(0.0, 10.0).bisect(0.5);
        assert_eq!(l.ub(), r.lb());
        assert_eq!(l.hull(&r), Interval::new(0.0, 10.0));
    }

    #[test]
    fn mid_of_unbounded() {
        assert_eq!(Interval::ENTIRE.mid(), 0.0);
        assert_eq!(Interval::new(0.0, OO).mid(), f64::MAX);
        assert_eq!(Interval::new(-OO, 0.0).mid(), f64::MIN);
    }
}
