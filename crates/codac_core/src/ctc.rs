//! Contractors: box-narrowing operators preserving every solution of their
//! constraint, and the combinators composing them.

use crate::expr::{Value, ValueKind};
use crate::function::{AnalyticFunction, ExprKind};
use crate::interval::boxes::{cart_prod, empty_box, BoxOps, IntervalMatrix, IntervalVector, Vector};
use crate::interval::bwd::periodic_inter;
use crate::interval::{self as iv, Interval};
use crate::linear::gauss_seidel;
use crate::sep::Sep;
use std::rc::Rc;
use tracing::{debug, trace};

/// A contractor narrows a box to a subset still containing every solution
/// of its constraint.
pub trait Ctc {
    fn contract(&self, x: &mut IntervalVector);

    /// Dimension of the boxes this contractor operates on.
    fn size(&self) -> usize;
}

pub(crate) fn split_box(x: &IntervalVector, kinds: &[ValueKind]) -> Vec<Value> {
    let mut out = Vec::with_capacity(kinds.len());
    let mut p = 0;
    for k in kinds {
        match k {
            ValueKind::Scalar => {
                out.push(Value::Scalar(x[p]));
                p += 1;
            }
            ValueKind::Vector(n) => {
                out.push(Value::Vector(IntervalVector::from_fn(*n, |i, _| x[p + i])));
                p += n;
            }
            ValueKind::Matrix(r, c) => {
                out.push(Value::Matrix(IntervalMatrix::from_fn(*r, *c, |i, j| {
                    x[p + j * r + i]
                })));
                p += r * c;
            }
        }
    }
    assert!(p == x.len(), "box size does not match the function inputs");
    out
}

pub(crate) fn join_box(vals: &[Value], x: &mut IntervalVector) {
    let mut p = 0;
    for v in vals {
        for c in v.components() {
            x[p] = c;
            p += 1;
        }
    }
    assert!(p == x.len());
}

/// Inverse contractor: narrows `x` to `x ∩ f⁻¹(y)` by a forward/backward
/// sweep through the expression graph, refined by an interval Gauss–Seidel
/// step on the centered form when the Jacobian is square.
pub struct CtcInverse<T: ExprKind> {
    f: AnalyticFunction<T>,
    y: T::Domain,
}

impl<T: ExprKind> CtcInverse<T> {
    pub fn new(f: AnalyticFunction<T>, y: T::Domain) -> Self {
        Self { f, y }
    }

    pub fn function(&self) -> &AnalyticFunction<T> {
        &self.f
    }

    pub fn target(&self) -> &T::Domain {
        &self.y
    }

    /// Contracts a tuple of scalar domains (convenience for multi-argument
    /// scalar functions).
    pub fn contract_scalars(&self, xs: &mut [&mut Interval]) {
        let mut b = IntervalVector::from_iterator(xs.len(), xs.iter().map(|x| **x));
        self.contract(&mut b);
        for (i, x) in xs.iter_mut().enumerate() {
            **x = b[i];
        }
    }
}

impl<T: ExprKind> Ctc for CtcInverse<T> {
    fn contract(&self, x: &mut IntervalVector) {
        assert!(x.len() == self.f.input_size(), "box size does not match the function inputs");
        if x.is_empty_box() {
            x.set_empty();
            return;
        }
        let kinds = self.f.arg_kinds();
        let vals = split_box(x, &kinds);
        let mut map = self.f.eval_valuations(&vals, false);
        let y_val = T::value_from_domain(&self.y);

        let (root_a, root_m, root_da, root_def) = {
            let v = &map[&self.f.root_slot()];
            (v.a.clone(), v.m.clone(), v.da.clone(), v.def_domain)
        };
        let contracted = self.f.backward(&mut map, &y_val);
        if contracted.iter().any(|v| v.is_empty()) {
            x.set_empty();
            return;
        }
        join_box(&contracted, x);

        // Centered refinement: da · (x - mid x) ⊆ (y ∩ a) - m
        if let (Some(da), true) = (root_da, root_def) {
            if da.nrows() == da.ncols() && da.nrows() == x.len() {
                let ya = y_val.intersect(&root_a);
                if ya.is_empty() {
                    x.set_empty();
                    return;
                }
                let rhs = IntervalVector::from_iterator(
                    ya.size(),
                    ya.components()
                        .iter()
                        .zip(root_m.components().iter())
                        .map(|(y, m)| *y - *m),
                );
                let mid = x.mid_vector();
                let mut delta = IntervalVector::from_fn(x.len(), |i, _| {
                    x[i] - Interval::point(mid[i])
                });
                gauss_seidel(&da, &rhs, &mut delta);
                if delta.is_empty_box() {
                    x.set_empty();
                    return;
                }
                for i in 0..x.len() {
                    x[i] = x[i].inter(&(Interval::point(mid[i]) + delta[i]));
                }
            }
        }
        if x.is_empty_box() {
            x.set_empty();
        }
    }

    fn size(&self) -> usize {
        self.f.input_size()
    }
}

/// Complement contractor: narrows `x` to `x ∩ f⁻¹(yᶜ)`, iterating over the
/// complement components of `y`.
pub struct CtcInverseNotIn<T: ExprKind> {
    f: AnalyticFunction<T>,
    complement: Vec<Value>,
}

fn scalar_complement(y: Interval) -> Vec<Interval> {
    let mut out = Vec::new();
    if y.is_empty() {
        out.push(Interval::ENTIRE);
        return out;
    }
    if y.lb() > f64::NEG_INFINITY {
        out.push(Interval::new(f64::NEG_INFINITY, y.lb()));
    }
    if y.ub() < f64::INFINITY {
        out.push(Interval::new(y.ub(), f64::INFINITY));
    }
    out
}

impl CtcInverseNotIn<crate::function::ScalarType> {
    pub fn new(f: AnalyticFunction<crate::function::ScalarType>, y: Interval) -> Self {
        let complement = scalar_complement(y).into_iter().map(Value::Scalar).collect();
        Self { f, complement }
    }
}

impl CtcInverseNotIn<crate::function::VectorType> {
    pub fn new(f: AnalyticFunction<crate::function::VectorType>, y: IntervalVector) -> Self {
        // complement of a box: one block per face
        let n = y.len();
        let mut complement = Vec::new();
        for i in 0..n {
            for ray in scalar_complement(y[i]) {
                let mut b = IntervalVector::from_element(n, Interval::ENTIRE);
                b[i] = ray;
                complement.push(Value::Vector(b));
            }
        }
        Self { f, complement }
    }
}

impl<T: ExprKind> Ctc for CtcInverseNotIn<T> {
    fn contract(&self, x: &mut IntervalVector) {
        assert!(x.len() == self.f.input_size(), "box size does not match the function inputs");
        let mut hull: Option<IntervalVector> = None;
        let kinds = self.f.arg_kinds();
        for comp in &self.complement {
            let mut xi = x.clone();
            let vals = split_box(&xi, &kinds);
            let mut map = self.f.eval_valuations(&vals, false);
            let contracted = self.f.backward(&mut map, comp);
            if contracted.iter().any(|v| v.is_empty()) {
                continue;
            }
            join_box(&contracted, &mut xi);
            hull = Some(match hull {
                None => xi,
                Some(h) => h.hull_box(&xi),
            });
        }
        match hull {
            None => x.set_empty(),
            Some(h) => x.inter_assign(&h),
        }
    }

    fn size(&self) -> usize {
        self.f.input_size()
    }
}

// --- Combinators ---

/// Sequential intersection of contractors.
pub struct CtcInter {
    children: Vec<Rc<dyn Ctc>>,
}

impl CtcInter {
    pub fn new(children: Vec<Rc<dyn Ctc>>) -> Self {
        assert!(!children.is_empty());
        let n = children[0].size();
        assert!(children.iter().all(|c| c.size() == n), "mismatched contractor sizes");
        Self { children }
    }
}

impl Ctc for CtcInter {
    fn contract(&self, x: &mut IntervalVector) {
        for c in &self.children {
            c.contract(x);
            if x.is_empty_box() {
                x.set_empty();
                return;
            }
        }
    }

    fn size(&self) -> usize {
        self.children[0].size()
    }
}

/// Union of contractors: each applied to a copy, results hulled.
pub struct CtcUnion {
    children: Vec<Rc<dyn Ctc>>,
}

impl CtcUnion {
    pub fn new(children: Vec<Rc<dyn Ctc>>) -> Self {
        assert!(!children.is_empty());
        let n = children[0].size();
        assert!(children.iter().all(|c| c.size() == n), "mismatched contractor sizes");
        Self { children }
    }
}

impl Ctc for CtcUnion {
    fn contract(&self, x: &mut IntervalVector) {
        let mut hull = empty_box(x.len());
        for c in &self.children {
            let mut xi = x.clone();
            c.contract(&mut xi);
            if !xi.is_empty_box() {
                hull = hull.hull_box(&xi);
            }
        }
        *x = x.inter_box(&hull);
        if x.is_empty_box() {
            x.set_empty();
        }
    }

    fn size(&self) -> usize {
        self.children[0].size()
    }
}

/// Contractor for the complement of a separated set.
pub struct CtcNot {
    s: Rc<dyn Sep>,
}

impl CtcNot {
    pub fn new(s: Rc<dyn Sep>) -> Self {
        Self { s }
    }
}

impl Ctc for CtcNot {
    fn contract(&self, x: &mut IntervalVector) {
        *x = self.s.separate(x).inner;
    }

    fn size(&self) -> usize {
        self.s.size()
    }
}

const DEFAULT_FIXPOINT_RATIO: f64 = 0.1;

/// Iterates a contractor until the contraction becomes insignificant: every
/// dimension keeps more than a `1 - ratio` share of its previous diameter.
pub struct CtcFixpoint {
    c: Rc<dyn Ctc>,
    ratio: f64,
}

impl CtcFixpoint {
    pub fn new(c: Rc<dyn Ctc>) -> Self {
        Self::with_ratio(c, DEFAULT_FIXPOINT_RATIO)
    }

    pub fn with_ratio(c: Rc<dyn Ctc>, ratio: f64) -> Self {
        assert!(ratio > 0.0 && ratio < 1.0);
        Self { c, ratio }
    }
}

fn significant_change(before: &IntervalVector, after: &IntervalVector, ratio: f64) -> bool {
    before.iter().zip(after.iter()).any(|(b, a)| {
        let db = b.diam();
        let da = a.diam();
        if db.is_infinite() {
            da.is_finite()
        } else {
            da < db * (1.0 - ratio)
        }
    })
}

impl Ctc for CtcFixpoint {
    fn contract(&self, x: &mut IntervalVector) {
        let mut iterations = 0usize;
        loop {
            let before = x.clone();
            self.c.contract(x);
            iterations += 1;
            if x.is_empty_box() {
                x.set_empty();
                break;
            }
            if *x == before || !significant_change(&before, x, self.ratio) {
                break;
            }
        }
        trace!(iterations, "fixpoint reached");
    }

    fn size(&self) -> usize {
        self.c.size()
    }
}

/// Contracts disjoint coordinate blocks with independent contractors.
pub struct CtcCartProd {
    children: Vec<Rc<dyn Ctc>>,
}

impl CtcCartProd {
    pub fn new(children: Vec<Rc<dyn Ctc>>) -> Self {
        assert!(!children.is_empty());
        Self { children }
    }
}

impl Ctc for CtcCartProd {
    fn contract(&self, x: &mut IntervalVector) {
        let mut p = 0;
        for c in &self.children {
            let n = c.size();
            let mut block = IntervalVector::from_fn(n, |i, _| x[p + i]);
            c.contract(&mut block);
            for i in 0..n {
                x[p + i] = block[i];
            }
            p += n;
        }
        assert!(p == x.len(), "box size does not match the product of contractor sizes");
    }

    fn size(&self) -> usize {
        self.children.iter().map(|c| c.size()).sum()
    }
}

/// Projection of a contracted set onto its leading coordinates: the hidden
/// tail dimensions are explored by alternating contraction and bisection of
/// a bounded guess column.
pub struct CtcProj {
    c: Rc<dyn Ctc>,
    y: IntervalVector,
    eps: f64,
}

impl CtcProj {
    pub fn new(c: Rc<dyn Ctc>, y: IntervalVector, eps: f64) -> Self {
        assert!(eps > 0.0);
        assert!(c.size() > y.len(), "nothing left to project onto");
        assert!(!y.is_unbounded_box(), "the projected column must be bounded");
        Self { c, y, eps }
    }

    fn x_size(&self) -> usize {
        self.c.size() - self.y.len()
    }
}

impl Ctc for CtcProj {
    fn contract(&self, x: &mut IntervalVector) {
        let n = self.x_size();
        assert!(x.len() == n);
        let mut result = empty_box(n);
        let mut stack = vec![cart_prod(x, &self.y)];
        let mut explored = 0usize;
        while let Some(mut w) = stack.pop() {
            explored += 1;
            self.c.contract(&mut w);
            if w.is_empty_box() {
                continue;
            }
            // widest hidden dimension
            let mut yi_max = 0;
            let mut d = f64::NEG_INFINITY;
            for i in 0..self.y.len() {
                let di = w[n + i].diam();
                if di > d {
                    d = di;
                    yi_max = i;
                }
            }
            if d > self.eps {
                let (a, b) = w.bisect_at(n + yi_max, 0.5);
                stack.push(a);
                stack.push(b);
            } else {
                let leaf = IntervalVector::from_fn(n, |i, _| w[i]);
                result = result.hull_box(&leaf);
            }
        }
        debug!(explored, "projection column explored");
        *x = x.inter_box(&result);
        if x.is_empty_box() {
            x.set_empty();
        }
    }

    fn size(&self) -> usize {
        self.x_size()
    }
}

/// Contractor for a set given a contractor for its boundary and a
/// point-membership test: boxes cleared by the boundary contractor are
/// classified by testing one of their points.
pub struct CtcBoundary {
    boundary: Rc<dyn Ctc>,
    inside: Box<dyn Fn(&Vector) -> bool>,
}

impl CtcBoundary {
    pub fn new(boundary: Rc<dyn Ctc>, inside: Box<dyn Fn(&Vector) -> bool>) -> Self {
        Self { boundary, inside }
    }
}

impl Ctc for CtcBoundary {
    fn contract(&self, x: &mut IntervalVector) {
        let mut xb = x.clone();
        self.boundary.contract(&mut xb);
        let mut keep = xb.clone();
        for b in x.diff(&xb) {
            // no boundary crosses b: one sample decides the whole box
            if (self.inside)(&b.mid_vector()) {
                keep = keep.hull_box(&b);
            }
        }
        *x = keep;
        if x.is_empty_box() {
            x.set_empty();
        }
    }

    fn size(&self) -> usize {
        self.boundary.size()
    }
}

/// Polar constraint contractor on boxes `(x, y, rho, theta)`: enforces
/// `x = rho cos(theta)` and `y = rho sin(theta)` with `rho >= 0`.
///
/// Both directions use the monotone interval forms directly, so the
/// forward image `rho * cos(theta)` stays tight where a backward sweep
/// through a `sqrt`/`atan2` decomposition loses the angular coupling.
pub struct CtcPolar;

impl Ctc for CtcPolar {
    fn contract(&self, b: &mut IntervalVector) {
        assert!(b.len() == 4, "a (x, y, rho, theta) box is expected");
        let mut x = b[0];
        let mut y = b[1];
        let mut rho = b[2].inter(&Interval::new(0.0, f64::INFINITY));
        let mut theta = b[3];

        x = x.inter(&(rho * iv::cos(theta)));
        y = y.inter(&(rho * iv::sin(theta)));
        rho = rho.inter(&iv::sqrt(iv::sqr(x) + iv::sqr(y)));
        theta = periodic_inter(theta, iv::atan2(y, x), Interval::TWO_PI.lb());

        if x.is_empty() || y.is_empty() || rho.is_empty() || theta.is_empty() {
            b.set_empty();
            return;
        }
        b[0] = x;
        b[1] = y;
        b[2] = rho;
        b[3] = theta;
    }

    fn size(&self) -> usize {
        4
    }
}

const TUBE_FIXPOINT_RATIO: f64 = 0.1;
const TUBE_FIXPOINT_MAX_ITER: usize = 50;

impl<T: ExprKind> CtcInverse<T> {
    /// Applies the contractor to every slice and gate of a tube, iterating
    /// per slice until the contraction becomes insignificant.
    pub fn contract_tube<V: crate::tube::TubeValue>(&self, x: &mut crate::tube::SlicedTube<V>) {
        assert!(
            x.size() == self.f.input_size(),
            "tube dimension does not match the function inputs"
        );
        for i in 0..x.nb_slices() {
            let value = x.slice_value(i);
            let comps = value.comps();
            let mut b = IntervalVector::from_row_slice(&comps);
            for _ in 0..TUBE_FIXPOINT_MAX_ITER {
                let before = b.clone();
                self.contract(&mut b);
                if b.is_empty_box() || !significant_change(&before, &b, TUBE_FIXPOINT_RATIO) {
                    break;
                }
            }
            let out: Vec<Interval> = b.iter().copied().collect();
            x.set_ith_slice(value.from_comps(&out), i);
        }
    }
}
