//! Minimal convex polygon support for slice envelopes.
//!
//! The reachable region of a scalar slice under a differential inclusion is
//! a convex polygon in the `(t, x)` plane: the codomain band clipped by the
//! four envelope lines spanned by the gates and the derivative bounds.

use crate::interval::Interval;

const EPS: f64 = 1e-12;

/// Convex polygon as a counter-clockwise vertex list. An empty list is the
/// empty set; one or two vertices are degenerate (point/segment) cases.
#[derive(Clone, Debug, Default)]
pub struct ConvexPolygon {
    pts: Vec<[f64; 2]>,
}

impl ConvexPolygon {
    /// Rectangle `t × x`; both intervals must be bounded.
    pub fn from_box(t: Interval, x: Interval) -> Self {
        assert!(!t.is_empty() && !x.is_empty());
        assert!(!t.is_unbounded() && !x.is_unbounded(), "unbounded polygon box");
        Self {
            pts: vec![
                [t.lb(), x.lb()],
                [t.ub(), x.lb()],
                [t.ub(), x.ub()],
                [t.lb(), x.ub()],
            ],
        }
    }

    pub fn from_points(pts: Vec<[f64; 2]>) -> Self {
        Self { pts }
    }

    pub fn is_empty(&self) -> bool {
        self.pts.is_empty()
    }

    pub fn vertices(&self) -> &[[f64; 2]] {
        &self.pts
    }

    /// Clips against the half-plane `a·t + b·x <= c` (Sutherland–Hodgman).
    pub fn clip(&mut self, a: f64, b: f64, c: f64) {
        if self.pts.is_empty() {
            return;
        }
        let inside = |p: &[f64; 2]| a * p[0] + b * p[1] <= c + EPS;
        let mut out: Vec<[f64; 2]> = Vec::with_capacity(self.pts.len() + 1);
        let n = self.pts.len();
        for i in 0..n {
            let p = self.pts[i];
            let q = self.pts[(i + 1) % n];
            let pin = inside(&p);
            let qin = inside(&q);
            if pin {
                out.push(p);
            }
            if pin != qin {
                // intersection of the edge with the clipping line
                let fp = a * p[0] + b * p[1] - c;
                let fq = a * q[0] + b * q[1] - c;
                let s = fp / (fp - fq);
                out.push([p[0] + s * (q[0] - p[0]), p[1] + s * (q[1] - p[1])]);
            }
        }
        dedup_ring(&mut out);
        self.pts = out;
    }

    /// Bounding box `(t, x)`.
    pub fn bounding_box(&self) -> (Interval, Interval) {
        if self.pts.is_empty() {
            return (Interval::EMPTY, Interval::EMPTY);
        }
        let mut t = (f64::INFINITY, f64::NEG_INFINITY);
        let mut x = (f64::INFINITY, f64::NEG_INFINITY);
        for p in &self.pts {
            t.0 = t.0.min(p[0]);
            t.1 = t.1.max(p[0]);
            x.0 = x.0.min(p[1]);
            x.1 = x.1.max(p[1]);
        }
        (Interval::new(t.0, t.1), Interval::new(x.0, x.1))
    }
}

fn dedup_ring(pts: &mut Vec<[f64; 2]>) {
    if pts.len() < 2 {
        return;
    }
    let mut out: Vec<[f64; 2]> = Vec::with_capacity(pts.len());
    for p in pts.iter() {
        if out
            .last()
            .map(|q| (q[0] - p[0]).abs() > EPS || (q[1] - p[1]).abs() > EPS)
            .unwrap_or(true)
        {
            out.push(*p);
        }
    }
    if out.len() > 1 {
        let first = out[0];
        let last = *out.last().unwrap();
        if (first[0] - last[0]).abs() <= EPS && (first[1] - last[1]).abs() <= EPS {
            out.pop();
        }
    }
    *pts = out;
}

/// Reachable region of a scalar slice `[t0, t1]` with input gate `ig`,
/// output gate `og`, codomain `cod` and derivative enclosure `v`.
///
/// Returns `None` when a bound involved is infinite; callers then fall back
/// to the interval envelope.
pub fn slice_polygon(
    t0: f64,
    t1: f64,
    ig: Interval,
    og: Interval,
    cod: Interval,
    v: Interval,
) -> Option<ConvexPolygon> {
    if ig.is_empty() || og.is_empty() || cod.is_empty() || v.is_empty() {
        return Some(ConvexPolygon::default());
    }
    if ig.is_unbounded() || og.is_unbounded() || cod.is_unbounded() || v.is_unbounded() {
        return None;
    }
    if !t0.is_finite() || !t1.is_finite() {
        return None;
    }
    let mut p = ConvexPolygon::from_box(Interval::new(t0, t1), cod);
    // x <= ig.ub + (t - t0) v.ub
    p.clip(-v.ub(), 1.0, ig.ub() - v.ub() * t0);
    // x >= ig.lb + (t - t0) v.lb
    p.clip(v.lb(), -1.0, -ig.lb() + v.lb() * t0);
    // x <= og.ub - (t1 - t) v.lb
    p.clip(-v.lb(), 1.0, og.ub() - v.lb() * t1);
    // x >= og.lb - (t1 - t) v.ub
    p.clip(v.ub(), -1.0, -og.lb() + v.ub() * t1);
    Some(p)
}
