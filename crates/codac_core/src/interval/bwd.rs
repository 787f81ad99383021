//! Reverse interval operations.
//!
//! Each `bwd_*` contracts the inputs of its forward counterpart given a
//! tightened output `y`, without discarding any real solution: after
//! `bwd_op(y, x...)`, every real tuple satisfying `op(x...) in y` that was
//! in the input boxes is still there.

use super::*;

pub fn bwd_add(y: Interval, x1: &mut Interval, x2: &mut Interval) {
    *x1 = x1.inter(&(y - *x2));
    *x2 = x2.inter(&(y - *x1));
}

pub fn bwd_sub(y: Interval, x1: &mut Interval, x2: &mut Interval) {
    *x1 = x1.inter(&(y + *x2));
    *x2 = x2.inter(&(*x1 - y));
}

pub fn bwd_neg(y: Interval, x: &mut Interval) {
    *x = x.inter(&-y);
}

pub fn bwd_mul(y: Interval, x1: &mut Interval, x2: &mut Interval) {
    // x1 = y / x2 holds whenever x2 is nonzero; the quotient hull is a
    // sound (if loose) enclosure when 0 is inside x2.
    if !(x2.contains(0.0) && y.contains(0.0)) {
        *x1 = x1.inter(&(y / *x2));
    }
    if !(x1.contains(0.0) && y.contains(0.0)) {
        *x2 = x2.inter(&(y / *x1));
    }
    if (*x1 * *x2).inter(&y).is_empty() {
        *x1 = Interval::EMPTY;
        *x2 = Interval::EMPTY;
    }
}

pub fn bwd_div(y: Interval, x1: &mut Interval, x2: &mut Interval) {
    *x1 = x1.inter(&(y * *x2));
    if !(y.contains(0.0) && x1.contains(0.0)) {
        *x2 = x2.inter(&(*x1 / y));
    }
}

pub fn bwd_sqr(y: Interval, x: &mut Interval) {
    let r = sqrt(y.inter(&Interval::new(0.0, OO)));
    if r.is_empty() {
        *x = Interval::EMPTY;
        return;
    }
    let pos = x.inter(&r);
    let neg = x.inter(&-r);
    *x = pos.hull(&neg);
}

pub fn bwd_sqrt(y: Interval, x: &mut Interval) {
    let y = y.inter(&Interval::new(0.0, OO));
    *x = x.inter(&sqr(y));
}

pub fn bwd_pow_int(y: Interval, x: &mut Interval, n: i32) {
    if n == 0 {
        if !y.contains(1.0) {
            *x = Interval::EMPTY;
        }
        return;
    }
    if n < 0 {
        let mut inv = Interval::ONE / *x;
        bwd_pow_int(y, &mut inv, -n);
        *x = x.inter(&(Interval::ONE / inv));
        return;
    }
    let r = root(y, n);
    if n % 2 == 1 {
        *x = x.inter(&r);
    } else {
        let pos = x.inter(&r);
        let neg = x.inter(&-r);
        *x = pos.hull(&neg);
    }
}

/// Exponent contraction is only possible when `p` is degenerate; the
/// general case is a sound no-op on `p`.
pub fn bwd_pow(y: Interval, x: &mut Interval, p: &mut Interval) {
    if p.is_degenerated() {
        let d = p.lb();
        if d == d.trunc() && d.abs() < i32::MAX as f64 {
            bwd_pow_int(y, x, d as i32);
        } else {
            // x = y^(1/d) on the positive branch
            *x = x.inter(&exp(log(y) / Interval::point(d)));
        }
    }
    if (pow(*x, *p)).inter(&y).is_empty() {
        *x = Interval::EMPTY;
        *p = Interval::EMPTY;
    }
}

pub fn bwd_root(y: Interval, x: &mut Interval, n: i32) {
    if n == 0 {
        return;
    }
    *x = x.inter(&pow_int(y, n));
}

pub fn bwd_exp(y: Interval, x: &mut Interval) {
    let y = y.inter(&Interval::new(0.0, OO));
    *x = x.inter(&log(y));
}

pub fn bwd_log(y: Interval, x: &mut Interval) {
    *x = x.inter(&exp(y));
}

// Periodic inversion helper: hull of { s + k*period } intersected with x,
// for the two base solutions s of the monotone branch inverse.
pub(crate) fn periodic_inter(x: Interval, base: Interval, period: f64) -> Interval {
    if x.is_empty() || base.is_empty() {
        return Interval::EMPTY;
    }
    if x.is_unbounded() || x.diam() > 64.0 * period {
        return x;
    }
    if x.lb().abs() > 1e15 || x.ub().abs() > 1e15 {
        // period counting loses integer precision this far out
        return x;
    }
    let k_min = ((x.lb() - base.ub()) / period).floor() as i64;
    let k_max = ((x.ub() - base.lb()) / period).ceil() as i64;
    let mut out = Interval::EMPTY;
    for k in k_min..=k_max {
        let shifted = base + Interval::point(k as f64) * Interval::point(period);
        out = out.hull(&x.inter(&shifted));
    }
    out
}

pub fn bwd_cos(y: Interval, x: &mut Interval) {
    let y = y.inter(&Interval::new(-1.0, 1.0));
    if y.is_empty() {
        *x = Interval::EMPTY;
        return;
    }
    // Solutions in [0, pi] and their mirror in [-pi, 0], 2*pi periodic
    let a = acos(y);
    let pos = periodic_inter(*x, a, Interval::TWO_PI.lb());
    let neg = periodic_inter(*x, -a, Interval::TWO_PI.lb());
    *x = pos.hull(&neg);
}

pub fn bwd_sin(y: Interval, x: &mut Interval) {
    let y = y.inter(&Interval::new(-1.0, 1.0));
    if y.is_empty() {
        *x = Interval::EMPTY;
        return;
    }
    // Solutions in [-pi/2, pi/2] and their mirror around pi/2
    let a = asin(y);
    let mirror = Interval::PI - a;
    let main = periodic_inter(*x, a, Interval::TWO_PI.lb());
    let alt = periodic_inter(*x, mirror, Interval::TWO_PI.lb());
    *x = main.hull(&alt);
}

pub fn bwd_tan(y: Interval, x: &mut Interval) {
    let a = atan(y);
    *x = periodic_inter(*x, a, Interval::PI.lb());
}

pub fn bwd_acos(y: Interval, x: &mut Interval) {
    let y = y.inter(&Interval::new(0.0, Interval::PI.ub()));
    *x = x.inter(&cos(y));
}

pub fn bwd_asin(y: Interval, x: &mut Interval) {
    let y = y.inter(&Interval::new(-Interval::HALF_PI.ub(), Interval::HALF_PI.ub()));
    *x = x.inter(&sin(y));
}

pub fn bwd_atan(y: Interval, x: &mut Interval) {
    let y = y.inter(&Interval::new(-Interval::HALF_PI.ub(), Interval::HALF_PI.ub()));
    *x = x.inter(&tan(y));
}

pub fn bwd_atan2(y: Interval, x1: &mut Interval, x2: &mut Interval) {
    if y.is_empty() {
        *x1 = Interval::EMPTY;
        *x2 = Interval::EMPTY;
        return;
    }
    // Sign information from the angle
    if y.is_subset(&Interval::new(0.0, Interval::PI.ub())) && y.lb() > 0.0 {
        *x1 = x1.inter(&Interval::new(0.0, OO));
    }
    if y.is_subset(&Interval::new(-Interval::PI.ub(), 0.0)) && y.ub() < 0.0 {
        *x1 = x1.inter(&Interval::new(-OO, 0.0));
    }
    if y.is_subset(&Interval::new(-Interval::HALF_PI.lb(), Interval::HALF_PI.lb())) {
        *x2 = x2.inter(&Interval::new(0.0, OO));
    }
    if y.lb() > Interval::HALF_PI.ub() || y.ub() < -Interval::HALF_PI.ub() {
        *x2 = x2.inter(&Interval::new(-OO, 0.0));
    }
    // Slope relation x1 = x2 * tan(y), valid on any branch where tan is
    // continuous over y
    let t = tan(y);
    if !t.is_unbounded() && !t.is_empty() {
        *x1 = x1.inter(&(*x2 * t));
        if !(t.contains(0.0) && x1.contains(0.0)) {
            *x2 = x2.inter(&(*x1 / t));
        }
    }
}

pub fn bwd_cosh(y: Interval, x: &mut Interval) {
    let r = acosh(y);
    if r.is_empty() {
        *x = Interval::EMPTY;
        return;
    }
    let pos = x.inter(&r);
    let neg = x.inter(&-r);
    *x = pos.hull(&neg);
}

pub fn bwd_sinh(y: Interval, x: &mut Interval) {
    *x = x.inter(&asinh(y));
}

pub fn bwd_tanh(y: Interval, x: &mut Interval) {
    *x = x.inter(&atanh(y));
}

pub fn bwd_acosh(y: Interval, x: &mut Interval) {
    let y = y.inter(&Interval::new(0.0, OO));
    *x = x.inter(&cosh(y));
}

pub fn bwd_asinh(y: Interval, x: &mut Interval) {
    *x = x.inter(&sinh(y));
}

pub fn bwd_atanh(y: Interval, x: &mut Interval) {
    *x = x.inter(&tanh(y));
}

pub fn bwd_abs(y: Interval, x: &mut Interval) {
    let y = y.inter(&Interval::new(0.0, OO));
    if y.is_empty() {
        *x = Interval::EMPTY;
        return;
    }
    let pos = x.inter(&y);
    let neg = x.inter(&-y);
    *x = pos.hull(&neg);
}

pub fn bwd_sign(y: Interval, x: &mut Interval) {
    if y.is_empty() {
        *x = Interval::EMPTY;
        return;
    }
    if !y.contains(1.0) {
        // sign can never be positive
        *x = x.inter(&Interval::new(-OO, 0.0));
    }
    if !y.contains(-1.0) {
        *x = x.inter(&Interval::new(0.0, OO));
    }
}

pub fn bwd_floor(y: Interval, x: &mut Interval) {
    if y.is_empty() {
        *x = Interval::EMPTY;
        return;
    }
    *x = x.inter(&Interval::new(y.lb().ceil(), y.ub().floor() + 1.0));
}

pub fn bwd_ceil(y: Interval, x: &mut Interval) {
    if y.is_empty() {
        *x = Interval::EMPTY;
        return;
    }
    *x = x.inter(&Interval::new(y.lb().ceil() - 1.0, y.ub().floor()));
}

pub fn bwd_min(y: Interval, x1: &mut Interval, x2: &mut Interval) {
    if y.is_empty() {
        *x1 = Interval::EMPTY;
        *x2 = Interval::EMPTY;
        return;
    }
    *x1 = x1.inter(&Interval::new(y.lb(), OO));
    *x2 = x2.inter(&Interval::new(y.lb(), OO));
    // If one side cannot attain the minimum, the other must
    if x2.is_empty() || x2.lb() > y.ub() {
        *x1 = x1.inter(&y);
    }
    if x1.is_empty() || x1.lb() > y.ub() {
        *x2 = x2.inter(&y);
    }
}

pub fn bwd_max(y: Interval, x1: &mut Interval, x2: &mut Interval) {
    if y.is_empty() {
        *x1 = Interval::EMPTY;
        *x2 = Interval::EMPTY;
        return;
    }
    *x1 = x1.inter(&Interval::new(-OO, y.ub()));
    *x2 = x2.inter(&Interval::new(-OO, y.ub()));
    if x2.is_empty() || x2.ub() < y.lb() {
        *x1 = x1.inter(&y);
    }
    if x1.is_empty() || x1.ub() < y.lb() {
        *x2 = x2.inter(&y);
    }
}

pub fn bwd_chi(y: Interval, mask: &mut Interval, a: &mut Interval, b: &mut Interval) {
    if y.is_empty() {
        *mask = Interval::EMPTY;
        *a = Interval::EMPTY;
        *b = Interval::EMPTY;
        return;
    }
    if mask.ub() <= 0.0 {
        *a = a.inter(&y);
    }
    if mask.lb() > 0.0 {
        *b = b.inter(&y);
    }
    if a.inter(&y).is_empty() {
        *mask = mask.inter(&Interval::new(f64::MIN_POSITIVE, OO));
    }
    if b.inter(&y).is_empty() {
        *mask = mask.inter(&Interval::new(-OO, 0.0));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bwd_add_sub() {
        let mut x1 = Interval::new(0.0, 10.0);
        let mut x2 = Interval::new(0.0, 10.0);
        bwd_add(Interval::new(2.0, 3.0), &mut x1, &mut x2);
        assert_eq!(x1, Interval::new(0.0, 3.0));
        assert_eq!(x2, Interval::new(0.0, 3.0));

        let mut x1 = Interval::new(-10.0, 10.0);
        let mut x2 = Interval::new(1.0, 2.0);
        bwd_sub(Interval::point(0.0), &mut x1, &mut x2);
        assert_eq!(x1, Interval::new(1.0, 2.0));
    }

    #[test]
    fn bwd_mul_div_cases() {
        let mut x1 = Interval::new(0.0, 10.0);
        let mut x2 = Interval::new(2.0, 2.0);
        bwd_mul(Interval::new(4.0, 6.0), &mut x1, &mut x2);
        assert_eq!(x1, Interval::new(2.0, 3.0));

        // Inconsistent product empties both
        let mut x1 = Interval::new(1.0, 2.0);
        let mut x2 = Interval::new(1.0, 2.0);
        bwd_mul(Interval::new(10.0, 11.0), &mut x1, &mut x2);
        assert!(x1.is_empty() && x2.is_empty());

        let mut num = Interval::new(-10.0, 10.0);
        let mut den = Interval::new(2.0, 4.0);
        bwd_div(Interval::new(1.0, 1.0), &mut num, &mut den);
        assert_eq!(num, Interval::new(2.0, 4.0));
    }

    #[test]
    fn bwd_sqr_both_branches() {
        let mut x = Interval::new(-10.0, 10.0);
        bwd_sqr(Interval::new(4.0, 9.0), &mut x);
        assert_eq!(x, Interval::new(-3.0, 3.0));

        let mut x = Interval::new(0.5, 10.0);
        bwd_sqr(Interval::new(4.0, 9.0), &mut x);
        assert_eq!(x, Interval::new(2.0, 3.0));

        let mut x = Interval::new(-10.0, 10.0);
        bwd_sqr(Interval::new(-3.0, -2.0), &mut x);
        assert!(x.is_empty());
    }

    #[test]
    fn bwd_trigonometric_branches() {
        // cos(x) = 0 near pi/2 with x around [1, 2]
        let mut x = Interval::new(1.0, 2.0);
        bwd_cos(Interval::point(0.0), &mut x);
        assert!(x.contains(std::f64::consts::FRAC_PI_2));
        assert!(x.diam() < 1e-9);

        // sin(x) = 1 has solutions pi/2 + 2k*pi
        let mut x = Interval::new(0.0, 7.0);
        bwd_sin(Interval::point(1.0), &mut x);
        assert!(x.contains(std::f64::consts::FRAC_PI_2));
        assert!(x.ub() > 6.0); // 5*pi/2 is also a solution

        let mut x = Interval::new(3.0, 4.0);
        bwd_sin(Interval::point(1.0), &mut x);
        assert!(x.is_empty());
    }

    #[test]
    fn bwd_exp_log_roundtrip() {
        let mut x = Interval::new(-10.0, 10.0);
        bwd_exp(Interval::new(1.0, std::f64::consts::E), &mut x);
        assert!(x.contains(0.0) && x.contains(1.0));
        assert!(x.lb() > -1e-9 && x.ub() < 1.0 + 1e-9);
    }

    #[test]
    fn bwd_minmax_and_sign() {
        let mut x1 = Interval::new(-10.0, 10.0);
        let mut x2 = Interval::new(5.0, 10.0);
        bwd_min(Interval::new(1.0, 2.0), &mut x1, &mut x2);
        // x2 cannot attain the minimum, so x1 must
        assert_eq!(x1, Interval::new(1.0, 2.0));

        let mut x = Interval::new(-5.0, 5.0);
        bwd_sign(Interval::point(1.0), &mut x);
        assert_eq!(x, Interval::new(0.0, 5.0));
    }

    #[test]
    fn bwd_chi_branches() {
        let mut m = Interval::new(-2.0, -1.0);
        let mut a = Interval::new(0.0, 10.0);
        let mut b = Interval::new(0.0, 10.0);
        bwd_chi(Interval::new(3.0, 4.0), &mut m, &mut a, &mut b);
        assert_eq!(a, Interval::new(3.0, 4.0));
        assert_eq!(b, Interval::new(0.0, 10.0));

        let mut m = Interval::new(-2.0, 2.0);
        let mut a = Interval::new(20.0, 30.0);
        let mut b = Interval::new(0.0, 10.0);
        bwd_chi(Interval::new(3.0, 4.0), &mut m, &mut a, &mut b);
        assert!(m.lb() > 0.0); // only the positive branch can produce y
    }
}
