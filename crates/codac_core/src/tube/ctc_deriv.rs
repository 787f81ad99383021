//! Differential-inclusion contractor: couples a tube and its derivative
//! tube, slice by slice.

use super::sliced_tube::{SliceRef, SlicedTube, TubeValue};
use super::TimePropag;
use crate::geom::slice_polygon;
use crate::interval::Interval;
use tracing::trace;

/// Contractor enforcing `ẋ ∈ v` between a tube `x` and its derivative
/// tube `v`, both registered on the same time domain.
///
/// On each slice, the reachable set is bounded by the input gate
/// extrapolated forward and the output gate extrapolated backward; on
/// scalar slices the codomain is tightened to the convex-polygon hull of
/// that envelope.
pub struct CtcDeriv {
    propag: TimePropag,
}

impl Default for CtcDeriv {
    fn default() -> Self {
        Self::new()
    }
}

impl CtcDeriv {
    pub fn new() -> Self {
        Self::with(TimePropag::FwdBwd)
    }

    pub fn with(propag: TimePropag) -> Self {
        Self { propag }
    }

    pub fn contract<T: TubeValue>(&self, x: &mut SlicedTube<T>, v: &SlicedTube<T>) {
        assert!(x.tdomain() == v.tdomain(), "tubes on different time domains");
        let n = x.nb_slices();
        let regular: Vec<usize> = (0..n).filter(|&i| !x.tslice_of(i).is_gate()).collect();
        self.contract_indices(x, v, &regular);
    }

    pub(crate) fn contract_indices<T: TubeValue>(
        &self,
        x: &mut SlicedTube<T>,
        v: &SlicedTube<T>,
        regular: &[usize],
    ) {
        match self.propag {
            TimePropag::Fwd => {
                for &k in regular {
                    contract_one(x, v, k);
                }
            }
            TimePropag::Bwd => {
                for &k in regular.iter().rev() {
                    contract_one(x, v, k);
                }
            }
            TimePropag::FwdBwd => {
                for &k in regular {
                    contract_one(x, v, k);
                }
                for &k in regular.iter().rev() {
                    contract_one(x, v, k);
                }
            }
        }
        trace!(slices = regular.len(), "derivative contraction pass done");
    }

    /// Single-slice contraction through the slice handles.
    pub fn contract_slice<T: TubeValue>(&self, sx: &SliceRef<T>, sv: &SliceRef<T>) {
        assert!(
            sx.index() == sv.index(),
            "value and derivative slices must be aligned"
        );
        let mut x = sx.tube_handle();
        let v = sv.tube_handle();
        assert!(x.tdomain() == v.tdomain(), "tubes on different time domains");
        contract_one(&mut x, &v, sx.index());
    }
}

fn contract_one<T: TubeValue>(x: &mut SlicedTube<T>, v: &SlicedTube<T>, k: usize) {
    let ts = x.tslice_of(k);
    debug_assert!(!ts.is_gate());
    let dt = Interval::point(ts.ub()) - Interval::point(ts.lb());
    let span = Interval::new(0.0, dt.ub());
    let vc = v.slice_value(k);

    let ig = x.input_gate_of(k);
    let og = x.output_gate_of(k);

    // gate contraction through the inclusion
    let og_new = og.inter_v(&ig.add_v(&vc.scale_v(dt)));
    let ig_new = ig.inter_v(&og_new.sub_v(&vc.scale_v(dt)));

    if k > 0 && x.tslice_of(k - 1).is_gate() {
        x.set_ith_slice(ig_new.clone(), k - 1);
    }
    if k + 1 < x.nb_slices() && x.tslice_of(k + 1).is_gate() {
        x.set_ith_slice(og_new.clone(), k + 1);
    }

    // codomain contraction: polygon hull per scalar component, interval
    // envelope fallback on unbounded data
    let cod = x.slice_value(k);
    let ig_c = ig_new.comps();
    let og_c = og_new.comps();
    let v_c = vc.comps();
    let mut out = Vec::with_capacity(ig_c.len());
    for (i, c) in cod.comps().iter().enumerate() {
        let contracted = match slice_polygon(ts.lb(), ts.ub(), ig_c[i], og_c[i], *c, v_c[i]) {
            Some(p) => {
                let (_, xr) = p.bounding_box();
                c.inter(&xr)
            }
            None => {
                let fwd = ig_c[i] + span * v_c[i];
                let bwd = og_c[i] - span * v_c[i];
                c.inter(&fwd).inter(&bwd)
            }
        };
        out.push(contracted);
    }
    x.set_ith_slice(cod.from_comps(&out), k);
}
