//! Interval vectors and matrices, backed by nalgebra containers.

use super::Interval;
use nalgebra::{DMatrix, DVector};

pub type IntervalVector = DVector<Interval>;
pub type IntervalMatrix = DMatrix<Interval>;
pub type Vector = DVector<f64>;
pub type Matrix = DMatrix<f64>;

/// Box of dimension `n`, every component the whole real line.
pub fn entire(n: usize) -> IntervalVector {
    IntervalVector::from_element(n, Interval::ENTIRE)
}

/// Empty box of dimension `n`.
pub fn empty_box(n: usize) -> IntervalVector {
    IntervalVector::from_element(n, Interval::EMPTY)
}

pub fn constant(n: usize, x: Interval) -> IntervalVector {
    IntervalVector::from_element(n, x)
}

/// Box from a list of components.
pub fn boxn(components: &[Interval]) -> IntervalVector {
    IntervalVector::from_row_slice(components)
}

/// Concatenation of two boxes.
pub fn cart_prod(a: &IntervalVector, b: &IntervalVector) -> IntervalVector {
    let mut out = Vec::with_capacity(a.len() + b.len());
    out.extend(a.iter().copied());
    out.extend(b.iter().copied());
    IntervalVector::from_vec(out)
}

/// Set-oriented operations on interval vectors.
pub trait BoxOps: Sized {
    fn is_empty_box(&self) -> bool;
    fn set_empty(&mut self);
    fn inter_box(&self, other: &Self) -> Self;
    fn hull_box(&self, other: &Self) -> Self;
    fn inter_assign(&mut self, other: &Self);
    fn contains_pt(&self, pt: &Vector) -> bool;
    fn is_subset_box(&self, other: &Self) -> bool;
    fn is_unbounded_box(&self) -> bool;
    fn mid_vector(&self) -> Vector;
    fn volume(&self) -> f64;
    fn max_diam(&self) -> f64;
    fn max_diam_index(&self) -> usize;
    fn bisect_at(&self, i: usize, ratio: f64) -> (Self, Self);
    fn inflate_box(&self, r: f64) -> Self;
    /// Complementary boxes of `self \ inner`, `inner` being intersected
    /// with `self` first. The remaining `self & inner` part is not
    /// returned.
    fn diff(&self, inner: &Self) -> Vec<Self>;
}

impl BoxOps for IntervalVector {
    fn is_empty_box(&self) -> bool {
        self.iter().any(|c| c.is_empty())
    }

    fn set_empty(&mut self) {
        for c in self.iter_mut() {
            *c = Interval::EMPTY;
        }
    }

    fn inter_box(&self, other: &Self) -> Self {
        assert_eq!(self.len(), other.len());
        Self::from_iterator(self.len(), self.iter().zip(other.iter()).map(|(a, b)| a.inter(b)))
    }

    fn hull_box(&self, other: &Self) -> Self {
        assert_eq!(self.len(), other.len());
        if self.is_empty_box() {
            return other.clone();
        }
        if other.is_empty_box() {
            return self.clone();
        }
        Self::from_iterator(self.len(), self.iter().zip(other.iter()).map(|(a, b)| a.hull(b)))
    }

    fn inter_assign(&mut self, other: &Self) {
        assert_eq!(self.len(), other.len());
        for (a, b) in self.iter_mut().zip(other.iter()) {
            *a = a.inter(b);
        }
    }

    fn contains_pt(&self, pt: &Vector) -> bool {
        assert_eq!(self.len(), pt.len());
        self.iter().zip(pt.iter()).all(|(c, &x)| c.contains(x))
    }

    fn is_subset_box(&self, other: &Self) -> bool {
        assert_eq!(self.len(), other.len());
        self.is_empty_box() || self.iter().zip(other.iter()).all(|(a, b)| a.is_subset(b))
    }

    fn is_unbounded_box(&self) -> bool {
        !self.is_empty_box() && self.iter().any(|c| c.is_unbounded())
    }

    fn mid_vector(&self) -> Vector {
        Vector::from_iterator(self.len(), self.iter().map(|c| c.mid()))
    }

    fn volume(&self) -> f64 {
        if self.is_empty_box() {
            return 0.0;
        }
        self.iter().map(|c| c.diam()).product()
    }

    fn max_diam(&self) -> f64 {
        self.iter().map(|c| c.diam()).fold(0.0, f64::max)
    }

    fn max_diam_index(&self) -> usize {
        let mut best = 0;
        let mut best_diam = f64::NEG_INFINITY;
        for (i, c) in self.iter().enumerate() {
            let d = c.diam();
            if d > best_diam {
                best_diam = d;
                best = i;
            }
        }
        best
    }

    fn bisect_at(&self, i: usize, ratio: f64) -> (Self, Self) {
        assert!(i < self.len());
        let (l, r) = self[i].bisect(ratio);
        let mut left = self.clone();
        let mut right = self.clone();
        left[i] = l;
        right[i] = r;
        (left, right)
    }

    fn inflate_box(&self, r: f64) -> Self {
        Self::from_iterator(self.len(), self.iter().map(|c| c.inflate(r)))
    }

    fn diff(&self, inner: &Self) -> Vec<Self> {
        assert_eq!(self.len(), inner.len());
        let mut out = Vec::new();
        if self.is_empty_box() {
            return out;
        }
        let mut cur = self.clone();
        for i in 0..self.len() {
            let a = cur[i];
            let b = a.inter(&inner[i]);
            if b.is_empty() {
                out.push(cur);
                return out;
            }
            if a.lb() < b.lb() {
                let mut left = cur.clone();
                left[i] = Interval::new(a.lb(), b.lb());
                out.push(left);
            }
            if b.ub() < a.ub() {
                let mut right = cur.clone();
                right[i] = Interval::new(b.ub(), a.ub());
                out.push(right);
            }
            cur[i] = b;
        }
        out
    }
}

/// Matrix counterparts of the box operations actually used by the engine.
pub trait MatrixOps {
    fn mid_matrix(&self) -> Matrix;
    fn is_empty_mat(&self) -> bool;
    fn inter_mat(&self, other: &Self) -> Self;
    fn hull_mat(&self, other: &Self) -> Self;
}

impl MatrixOps for IntervalMatrix {
    fn mid_matrix(&self) -> Matrix {
        Matrix::from_iterator(self.nrows(), self.ncols(), self.iter().map(|c| c.mid()))
    }

    fn is_empty_mat(&self) -> bool {
        self.iter().any(|c| c.is_empty())
    }

    fn inter_mat(&self, other: &Self) -> Self {
        assert_eq!(self.shape(), other.shape());
        Self::from_iterator(
            self.nrows(),
            self.ncols(),
            self.iter().zip(other.iter()).map(|(a, b)| a.inter(b)),
        )
    }

    fn hull_mat(&self, other: &Self) -> Self {
        assert_eq!(self.shape(), other.shape());
        if self.is_empty_mat() {
            return other.clone();
        }
        if other.is_empty_mat() {
            return self.clone();
        }
        Self::from_iterator(
            self.nrows(),
            self.ncols(),
            self.iter().zip(other.iter()).map(|(a, b)| a.hull(b)),
        )
    }
}

/// Interval hull of a real vector.
pub fn vector_hull(v: &Vector) -> IntervalVector {
    IntervalVector::from_iterator(v.len(), v.iter().map(|&x| Interval::point(x)))
}

/// Interval hull of a real matrix.
pub fn matrix_hull(m: &Matrix) -> IntervalMatrix {
    IntervalMatrix::from_iterator(m.nrows(), m.ncols(), m.iter().map(|&x| Interval::point(x)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn b2(a: (f64, f64), b: (f64, f64)) -> IntervalVector {
        boxn(&[Interval::new(a.0, a.1), Interval::new(b.0, b.1)])
    }

    #[test]
    fn matrix_vector_product_over_intervals() {
        let m = IntervalMatrix::from_row_slice(
            2,
            2,
            &[
                Interval::point(0.0),
                Interval::point(2.0),
                Interval::point(-1.0),
                Interval::point(0.0),
            ],
        );
        let x = boxn(&[Interval::new(0.0, 1.0), Interval::new(2.0, 3.0)]);
        let y = &m * &x;
        assert_eq!(y[0], Interval::new(4.0, 6.0));
        assert_eq!(y[1], Interval::new(-1.0, 0.0));
    }

    #[test]
    fn set_operations() {
        let a = b2((0.0, 2.0), (0.0, 2.0));
        let b = b2((1.0, 3.0), (1.0, 3.0));
        assert_eq!(a.inter_box(&b), b2((1.0, 2.0), (1.0, 2.0)));
        assert_eq!(a.hull_box(&b), b2((0.0, 3.0), (0.0, 3.0)));
        assert!(!a.is_empty_box());
        assert!(a.inter_box(&b2((5.0, 6.0), (5.0, 6.0))).is_empty_box());
        assert_eq!(a.volume(), 4.0);
        assert!(a.contains_pt(&Vector::from_vec(vec![1.0, 1.0])));
    }

    #[test]
    fn bisection() {
        let a = b2((0.0, 4.0), (0.0, 1.0));
        assert_eq!(a.max_diam_index(), 0);
        let (l, r) = a.bisect_at(0, 0.5);
        assert_eq!(l[0], crate::interval::Interval::new(0.0, 2.0));
        assert_eq!(r[0], crate::interval::Interval::new(2.0, 4.0));
        assert_eq!(l[1], a[1]);
    }

    #[test]
    fn diff_boxes_cover_complement() {
        let outer = b2((0.0, 4.0), (0.0, 4.0));
        let inner = b2((1.0, 2.0), (1.0, 2.0));
        let parts = outer.diff(&inner);
        assert_eq!(parts.len(), 4);
        // every part is inside outer and disjoint from the interior of inner
        for p in &parts {
            assert!(p.is_subset_box(&outer));
            let i = p.inter_box(&inner);
            assert!(i.is_empty_box() || i.volume() == 0.0);
        }
        // complement of a disjoint box is the whole original
        let parts = outer.diff(&b2((10.0, 11.0), (10.0, 11.0)));
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0], outer);
    }
}
