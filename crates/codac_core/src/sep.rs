//! Separators: paired inner/outer contractors distinguishing feasible from
//! infeasible points.
//!
//! For an input box `x`, a separator returns `{inner, outer}` with
//! `inner ∪ outer = x`; every point of `x` violating the constraint lies in
//! `inner`, every point satisfying it lies in `outer`.

use crate::ctc::{Ctc, CtcInverse, CtcInverseNotIn};
use crate::expr::Value;
use crate::function::{AnalyticFunction, ExprKind, ScalarType, VectorType};
use crate::interval::boxes::{cart_prod, empty_box, BoxOps, IntervalVector};
use crate::interval::Interval;
use std::rc::Rc;
use tracing::debug;

/// Result of a separation: both boxes are subsets of the input and their
/// union covers it.
#[derive(Clone, Debug, PartialEq)]
pub struct BoxPair {
    pub inner: IntervalVector,
    pub outer: IntervalVector,
}

pub trait Sep {
    fn separate(&self, x: &IntervalVector) -> BoxPair;

    /// Dimension of the boxes this separator operates on.
    fn size(&self) -> usize;
}

/// Separator from two complementary contractors.
pub struct SepCtcPair {
    ctc_in: Rc<dyn Ctc>,
    ctc_out: Rc<dyn Ctc>,
}

impl SepCtcPair {
    pub fn new(ctc_in: Rc<dyn Ctc>, ctc_out: Rc<dyn Ctc>) -> Self {
        assert!(ctc_in.size() == ctc_out.size(), "mismatched contractor sizes");
        Self { ctc_in, ctc_out }
    }
}

impl Sep for SepCtcPair {
    fn separate(&self, x: &IntervalVector) -> BoxPair {
        let mut inner = x.clone();
        self.ctc_in.contract(&mut inner);
        let mut outer = x.clone();
        self.ctc_out.contract(&mut outer);
        BoxPair { inner, outer }
    }

    fn size(&self) -> usize {
        self.ctc_in.size()
    }
}

/// Separator of the set `f⁻¹(y)`.
pub struct SepInverse<T: ExprKind> {
    ctc_out: CtcInverse<T>,
    ctc_in: CtcInverseNotIn<T>,
}

impl SepInverse<ScalarType> {
    pub fn new(f: AnalyticFunction<ScalarType>, y: Interval) -> Self {
        Self {
            ctc_out: CtcInverse::new(f.clone(), y),
            ctc_in: CtcInverseNotIn::<ScalarType>::new(f, y),
        }
    }
}

impl SepInverse<VectorType> {
    pub fn new(f: AnalyticFunction<VectorType>, y: IntervalVector) -> Self {
        Self {
            ctc_out: CtcInverse::new(f.clone(), y.clone()),
            ctc_in: CtcInverseNotIn::<VectorType>::new(f, y),
        }
    }
}

impl<T: ExprKind> Sep for SepInverse<T> {
    fn separate(&self, x: &IntervalVector) -> BoxPair {
        let mut inner = x.clone();
        self.ctc_in.contract(&mut inner);
        let mut outer = x.clone();
        self.ctc_out.contract(&mut outer);
        BoxPair { inner, outer }
    }

    fn size(&self) -> usize {
        self.ctc_out.size()
    }
}

/// Separator of an intersection of sets.
pub struct SepInter {
    children: Vec<Rc<dyn Sep>>,
}

impl SepInter {
    pub fn new(children: Vec<Rc<dyn Sep>>) -> Self {
        assert!(!children.is_empty());
        let n = children[0].size();
        assert!(children.iter().all(|s| s.size() == n), "mismatched separator sizes");
        Self { children }
    }
}

impl Sep for SepInter {
    fn separate(&self, x: &IntervalVector) -> BoxPair {
        let mut outer = x.clone();
        let mut inner = empty_box(x.len());
        for s in &self.children {
            let p = s.separate(x);
            outer = outer.inter_box(&p.outer);
            inner = inner.hull_box(&p.inner);
        }
        BoxPair { inner, outer }
    }

    fn size(&self) -> usize {
        self.children[0].size()
    }
}

/// Separator of a union of sets.
pub struct SepUnion {
    children: Vec<Rc<dyn Sep>>,
}

impl SepUnion {
    pub fn new(children: Vec<Rc<dyn Sep>>) -> Self {
        assert!(!children.is_empty());
        let n = children[0].size();
        assert!(children.iter().all(|s| s.size() == n), "mismatched separator sizes");
        Self { children }
    }
}

impl Sep for SepUnion {
    fn separate(&self, x: &IntervalVector) -> BoxPair {
        let mut outer = empty_box(x.len());
        let mut inner = x.clone();
        for s in &self.children {
            let p = s.separate(x);
            outer = outer.hull_box(&p.outer);
            inner = inner.inter_box(&p.inner);
        }
        BoxPair { inner, outer }
    }

    fn size(&self) -> usize {
        self.children[0].size()
    }
}

/// Complement separator: swaps the inner and outer roles.
pub struct SepNot {
    s: Rc<dyn Sep>,
}

impl SepNot {
    pub fn new(s: Rc<dyn Sep>) -> Self {
        Self { s }
    }
}

impl Sep for SepNot {
    fn separate(&self, x: &IntervalVector) -> BoxPair {
        let p = self.s.separate(x);
        BoxPair {
            inner: p.outer,
            outer: p.inner,
        }
    }

    fn size(&self) -> usize {
        self.s.size()
    }
}

/// Separator of independent coordinate blocks.
pub struct SepCartProd {
    children: Vec<Rc<dyn Sep>>,
}

impl SepCartProd {
    pub fn new(children: Vec<Rc<dyn Sep>>) -> Self {
        assert!(!children.is_empty());
        Self { children }
    }
}

impl Sep for SepCartProd {
    fn separate(&self, x: &IntervalVector) -> BoxPair {
        let mut outer = x.clone();
        let mut inner = empty_box(x.len());
        let mut p = 0;
        for s in &self.children {
            let n = s.size();
            let block = IntervalVector::from_fn(n, |i, _| x[p + i]);
            let bp = s.separate(&block);
            for i in 0..n {
                outer[p + i] = outer[p + i].inter(&bp.outer[i]);
            }
            // a block violating its set makes the whole point infeasible
            let mut inner_i = x.clone();
            for i in 0..n {
                inner_i[p + i] = bp.inner[i];
            }
            inner = inner.hull_box(&inner_i);
            p += n;
        }
        assert!(p == x.len(), "box size does not match the product of separator sizes");
        BoxPair { inner, outer }
    }

    fn size(&self) -> usize {
        self.children.iter().map(|s| s.size()).sum()
    }
}

/// Separator of a projected set: explores the projected column with a stack
/// of guesses, bisecting along the hidden dimensions only.
pub struct SepProj {
    s: Rc<dyn Sep>,
    y: IntervalVector,
    default_eps: f64,
}

impl SepProj {
    pub fn new(s: Rc<dyn Sep>, y: IntervalVector, default_eps: f64) -> Self {
        assert!(default_eps > 0.0);
        assert!(s.size() > y.len(), "nothing left to project onto");
        assert!(!y.is_unbounded_box(), "the projected column must be bounded");
        Self { s, y, default_eps }
    }

    fn x_size(&self) -> usize {
        self.s.size() - self.y.len()
    }

    fn extract_x(&self, w: &IntervalVector) -> IntervalVector {
        IntervalVector::from_fn(self.x_size(), |i, _| w[i])
    }

    fn extract_y(&self, w: &IntervalVector) -> IntervalVector {
        IntervalVector::from_fn(self.y.len(), |i, _| w[self.x_size() + i])
    }

    pub fn separate_eps(&self, x: &IntervalVector, eps: f64) -> BoxPair {
        assert!(eps > 0.0);
        assert!(x.len() == self.x_size());

        let mut stack = vec![cart_prod(x, &self.y)];
        let mut result_out = empty_box(x.len());
        let mut result_in = x.clone();
        let mut explored = 0usize;

        // The stack explores along the y-column to be projected, performing
        // bisections along y when necessary
        while let Some(w) = stack.pop() {
            explored += 1;
            let w_sep = self.s.separate(&w);

            if self.extract_x(&w) == *x {
                result_in = result_in.inter_box(&self.extract_x(&w_sep.inner));
            }

            if !w_sep.outer.is_empty_box() {
                let y_out = self.extract_y(&w_sep.outer);
                let yi_max = y_out.max_diam_index();
                if y_out[yi_max].diam() > eps {
                    let (a, b) = w_sep.outer.bisect_at(self.x_size() + yi_max, 0.5);
                    stack.push(a);
                    stack.push(b);
                } else {
                    // only leaves are considered for the outer result
                    result_out = result_out.hull_box(&self.extract_x(&w_sep.outer));
                }

                if !result_in.is_empty_box() {
                    // inner probing at the y-midpoint of the remaining guess
                    let y_mid = y_out.mid_vector();
                    let w_mid = cart_prod(
                        x,
                        &IntervalVector::from_fn(y_mid.len(), |i, _| Interval::point(y_mid[i])),
                    );
                    let w_sep_mid = self.s.separate(&w_mid);
                    result_in = result_in.inter_box(&self.extract_x(&w_sep_mid.inner));
                }
            }
        }
        debug!(explored, "projection column explored");

        // keep the partition property on the input box
        let outer = x.inter_box(&result_out);
        let inner = x.inter_box(&result_in);
        BoxPair { inner, outer }
    }
}

impl Sep for SepProj {
    fn separate(&self, x: &IntervalVector) -> BoxPair {
        self.separate_eps(x, self.default_eps)
    }

    fn size(&self) -> usize {
        self.x_size()
    }
}

/// Pull-back separator: separates `x` through a transform `f` and its
/// inverse mapping `f_inv`.
pub struct SepTransform {
    s: Rc<dyn Sep>,
    f: AnalyticFunction<VectorType>,
    f_inv: AnalyticFunction<VectorType>,
}

impl SepTransform {
    pub fn new(
        s: Rc<dyn Sep>,
        f: AnalyticFunction<VectorType>,
        f_inv: AnalyticFunction<VectorType>,
    ) -> Self {
        Self { s, f, f_inv }
    }
}

impl Sep for SepTransform {
    fn separate(&self, x: &IntervalVector) -> BoxPair {
        let y = self.f.eval(&[x.into()]);
        let p = self.s.separate(&y);

        // Every point of x lands in one of the two image parts, so the
        // pulled-back pair still covers x.
        let mut inner = x.clone();
        if p.inner.is_empty_box() {
            inner.set_empty();
        } else {
            CtcInverse::new(self.f.clone(), p.inner.clone()).contract(&mut inner);
            let back = self.f_inv.eval(&[Value::from(&p.inner)]);
            inner.inter_assign(&back);
        }

        let mut outer = x.clone();
        if p.outer.is_empty_box() {
            outer.set_empty();
        } else {
            CtcInverse::new(self.f.clone(), p.outer.clone()).contract(&mut outer);
            let back = self.f_inv.eval(&[Value::from(&p.outer)]);
            outer.inter_assign(&back);
        }
        BoxPair { inner, outer }
    }

    fn size(&self) -> usize {
        self.f.input_size()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{self, VectorVar};
    use crate::interval::boxes::boxn;

    fn disk_sep(radius: f64) -> SepInverse<ScalarType> {
        let v = VectorVar::new(2);
        let f = AnalyticFunction::new(&[&v], expr::sqr(v.at(0)) + expr::sqr(v.at(1)));
        SepInverse::<ScalarType>::new(f, Interval::new(-crate::interval::OO, radius * radius))
    }

    fn check_partition(p: &BoxPair, x: &IntervalVector) {
        assert!(p.inner.is_subset_box(x));
        assert!(p.outer.is_subset_box(x));
        let mut cover = p.inner.hull_box(&p.outer);
        if cover.is_empty_box() {
            cover = empty_box(x.len());
        }
        for b in x.diff(&cover) {
            assert!(b.volume() == 0.0, "partition does not cover the input box");
        }
    }

    #[test]
    fn inverse_separator_classifies() {
        let s = disk_sep(2.0);

        // box inside the disk: inner empties
        let x = boxn(&[Interval::new(-0.5, 0.5), Interval::new(-0.5, 0.5)]);
        let p = s.separate(&x);
        assert!(p.inner.is_empty_box());
        assert_eq!(p.outer, x);
        check_partition(&p, &x);

        // box outside: outer empties
        let x = boxn(&[Interval::new(3.0, 4.0), Interval::new(3.0, 4.0)]);
        let p = s.separate(&x);
        assert!(p.outer.is_empty_box());
        assert_eq!(p.inner, x);

        // box straddling the boundary: both parts non-trivial
        let x = boxn(&[Interval::new(0.0, 4.0), Interval::new(0.0, 4.0)]);
        let p = s.separate(&x);
        assert!(!p.inner.is_empty_box() && !p.outer.is_empty_box());
        check_partition(&p, &x);
        // feasible point stays in outer
        assert!(p.outer.contains_pt(&crate::interval::boxes::Vector::from_vec(vec![1.0, 1.0])));
    }

    #[test]
    fn union_and_inter_separators() {
        let s1: Rc<dyn Sep> = Rc::new(disk_sep(2.0));
        let s2: Rc<dyn Sep> = Rc::new(disk_sep(1.0));
        let x = boxn(&[Interval::new(-3.0, 3.0), Interval::new(-3.0, 3.0)]);

        let u = SepUnion::new(vec![s1.clone(), s2.clone()]);
        let pu = u.separate(&x);
        check_partition(&pu, &x);
        // union of the disks is the big disk
        assert!(pu.outer[0].ub() <= 2.0 + 1e-9);

        let i = SepInter::new(vec![s1, s2]);
        let pi = i.separate(&x);
        check_partition(&pi, &x);
        assert!(pi.outer[0].ub() <= 1.0 + 1e-9);
    }

    #[test]
    fn not_swaps_roles() {
        let s: Rc<dyn Sep> = Rc::new(disk_sep(2.0));
        let n = SepNot::new(s.clone());
        let x = boxn(&[Interval::new(-0.5, 0.5), Interval::new(-0.5, 0.5)]);
        let p = s.separate(&x);
        let q = n.separate(&x);
        assert_eq!(p.inner, q.outer);
        assert_eq!(p.outer, q.inner);
    }

    #[test]
    fn proj_of_annulus() {
        // S = {(x, y) : x^2 + y^2 in [1, 4]} projected onto x is [-2, 2]
        let v = VectorVar::new(2);
        let f = AnalyticFunction::new(&[&v], expr::sqr(v.at(0)) + expr::sqr(v.at(1)));
        let s: Rc<dyn Sep> = Rc::new(SepInverse::<ScalarType>::new(f, Interval::new(1.0, 4.0)));
        let proj = SepProj::new(s, boxn(&[Interval::new(-5.0, 5.0)]), 0.01);
        let x = boxn(&[Interval::new(-5.0, 5.0)]);
        let p = proj.separate(&x);
        // outer encloses the projection
        assert!(p.outer[0].contains(0.0));
        assert!(p.outer[0].ub() >= 2.0 - 0.1 && p.outer[0].ub() <= 2.0 + 0.1);
        assert!(p.outer[0].lb() <= -2.0 + 0.1);
        // points beyond the projection are classified infeasible
        assert!(p.inner[0].contains(4.0));
    }

    #[test]
    fn cart_prod_separator() {
        let x1 = crate::expr::ScalarVar::new();
        let f1 = AnalyticFunction::new(&[&x1], &x1);
        let s1: Rc<dyn Sep> = Rc::new(SepInverse::<ScalarType>::new(f1, Interval::new(0.0, 1.0)));
        let x2 = crate::expr::ScalarVar::new();
        let f2 = AnalyticFunction::new(&[&x2], &x2);
        let s2: Rc<dyn Sep> = Rc::new(SepInverse::<ScalarType>::new(f2, Interval::new(5.0, 6.0)));
        let sp = SepCartProd::new(vec![s1, s2]);
        let x = boxn(&[Interval::new(-10.0, 10.0), Interval::new(-10.0, 10.0)]);
        let p = sp.separate(&x);
        assert_eq!(p.outer, boxn(&[Interval::new(0.0, 1.0), Interval::new(5.0, 6.0)]));
        check_partition(&p, &x);
    }
}
