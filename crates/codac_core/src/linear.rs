//! Interval linear narrowing: midpoint-preconditioned Gauss–Seidel.

use crate::interval::boxes::{matrix_hull, BoxOps, IntervalMatrix, IntervalVector, MatrixOps};
use crate::interval::Interval;

const MAX_SWEEPS: usize = 20;

/// Narrows `x` under the constraint `A x ⊆ b`, preconditioning by the
/// approximate inverse of `mid(A)`. No-op when the midpoint matrix is
/// singular.
pub fn gauss_seidel(a: &IntervalMatrix, b: &IntervalVector, x: &mut IntervalVector) {
    assert!(a.nrows() == a.ncols(), "square system expected");
    assert!(a.nrows() == b.len() && b.len() == x.len());

    let mid = a.mid_matrix();
    let minv = match mid.try_inverse() {
        Some(m) => m,
        None => return,
    };
    let pre = matrix_hull(&minv);
    let ap = &pre * a;
    let bp = &pre * b;

    for _ in 0..MAX_SWEEPS {
        let before = x.clone();
        for i in 0..x.len() {
            let aii = ap[(i, i)];
            if aii.contains(0.0) || aii.is_empty() {
                continue;
            }
            let mut s = bp[i];
            for j in 0..x.len() {
                if j != i {
                    s = s - ap[(i, j)] * x[j];
                }
            }
            x[i] = x[i].inter(&(s / aii));
        }
        if x.is_empty_box() {
            x.set_empty();
            return;
        }
        if *x == before {
            return;
        }
    }
}
