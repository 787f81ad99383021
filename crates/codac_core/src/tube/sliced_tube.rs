//! Sliced tubes: one interval value per time slice of a shared `TDomain`.

use super::tdomain::{SliceInit, SliceStore, TDomain, TSlice};
use super::TimePropag;
use crate::function::{AnalyticFunction, ScalarType, VectorType};
use crate::geom::{slice_polygon, ConvexPolygon};
use crate::interval::boxes::IntervalVector;
use crate::interval::Interval;
use itertools::izip;
use std::cell::RefCell;
use std::rc::{Rc, Weak};

/// Codomain algebra required from tube values (`Interval` for scalar
/// tubes, `IntervalVector` for vector tubes).
pub trait TubeValue: Clone + PartialEq + std::fmt::Debug + 'static {
    fn dim(&self) -> usize;
    fn entire_like(&self) -> Self;
    fn empty_like(&self) -> Self;
    fn is_empty_v(&self) -> bool;
    fn is_unbounded_v(&self) -> bool;
    fn inter_v(&self, o: &Self) -> Self;
    fn hull_v(&self, o: &Self) -> Self;
    fn add_v(&self, o: &Self) -> Self;
    fn sub_v(&self, o: &Self) -> Self;
    fn scale_v(&self, k: Interval) -> Self;
    fn inflate_v(&self, r: f64) -> Self;
    fn is_subset_v(&self, o: &Self) -> bool;
    fn intersects_v(&self, o: &Self) -> bool;
    fn volume_v(&self) -> f64;
    fn comps(&self) -> Vec<Interval>;
    /// Rebuild from components, `self` providing the shape.
    fn from_comps(&self, comps: &[Interval]) -> Self;
}

impl TubeValue for Interval {
    fn dim(&self) -> usize {
        1
    }
    fn entire_like(&self) -> Self {
        Interval::ENTIRE
    }
    fn empty_like(&self) -> Self {
        Interval::EMPTY
    }
    fn is_empty_v(&self) -> bool {
        self.is_empty()
    }
    fn is_unbounded_v(&self) -> bool {
        self.is_unbounded()
    }
    fn inter_v(&self, o: &Self) -> Self {
        self.inter(o)
    }
    fn hull_v(&self, o: &Self) -> Self {
        self.hull(o)
    }
    fn add_v(&self, o: &Self) -> Self {
        *self + *o
    }
    fn sub_v(&self, o: &Self) -> Self {
        *self - *o
    }
    fn scale_v(&self, k: Interval) -> Self {
        *self * k
    }
    fn inflate_v(&self, r: f64) -> Self {
        self.inflate(r)
    }
    fn is_subset_v(&self, o: &Self) -> bool {
        self.is_subset(o)
    }
    fn intersects_v(&self, o: &Self) -> bool {
        self.intersects(o)
    }
    fn volume_v(&self) -> f64 {
        self.diam()
    }
    fn comps(&self) -> Vec<Interval> {
        vec![*self]
    }
    fn from_comps(&self, comps: &[Interval]) -> Self {
        comps[0]
    }
}

impl TubeValue for IntervalVector {
    fn dim(&self) -> usize {
        self.len()
    }
    fn entire_like(&self) -> Self {
        IntervalVector::from_element(self.len(), Interval::ENTIRE)
    }
    fn empty_like(&self) -> Self {
        IntervalVector::from_element(self.len(), Interval::EMPTY)
    }
    fn is_empty_v(&self) -> bool {
        self.iter().any(|c| c.is_empty())
    }
    fn is_unbounded_v(&self) -> bool {
        !self.is_empty_v() && self.iter().any(|c| c.is_unbounded())
    }
    fn inter_v(&self, o: &Self) -> Self {
        IntervalVector::from_iterator(self.len(), self.iter().zip(o.iter()).map(|(a, b)| a.inter(b)))
    }
    fn hull_v(&self, o: &Self) -> Self {
        IntervalVector::from_iterator(self.len(), self.iter().zip(o.iter()).map(|(a, b)| a.hull(b)))
    }
    fn add_v(&self, o: &Self) -> Self {
        IntervalVector::from_iterator(self.len(), self.iter().zip(o.iter()).map(|(a, b)| *a + *b))
    }
    fn sub_v(&self, o: &Self) -> Self {
        IntervalVector::from_iterator(self.len(), self.iter().zip(o.iter()).map(|(a, b)| *a - *b))
    }
    fn scale_v(&self, k: Interval) -> Self {
        self.map(|c| c * k)
    }
    fn inflate_v(&self, r: f64) -> Self {
        self.map(|c| c.inflate(r))
    }
    fn is_subset_v(&self, o: &Self) -> bool {
        self.is_empty_v() || self.iter().zip(o.iter()).all(|(a, b)| a.is_subset(b))
    }
    fn intersects_v(&self, o: &Self) -> bool {
        self.iter().zip(o.iter()).all(|(a, b)| a.intersects(b))
    }
    fn volume_v(&self) -> f64 {
        if self.is_empty_v() {
            return 0.0;
        }
        self.iter().map(|c| c.diam()).product()
    }
    fn comps(&self) -> Vec<Interval> {
        self.iter().copied().collect()
    }
    fn from_comps(&self, comps: &[Interval]) -> Self {
        IntervalVector::from_row_slice(comps)
    }
}

impl<T: TubeValue> SliceStore for Vec<T> {
    fn insert_value(&mut self, pos: usize, init: SliceInit) {
        let v = match init {
            SliceInit::CopyOf(i) => self[i].clone(),
            SliceInit::InterOf(a, b) => self[a].inter_v(&self[b]),
            SliceInit::AllReals => self[0].entire_like(),
        };
        self.insert(pos, v);
    }
}

/// A tube: one codomain per time slice of its `TDomain`. Tubes sharing a
/// `TDomain` share slicing exactly; sampling the domain updates every
/// registered tube.
pub struct SlicedTube<T: TubeValue> {
    tdomain: TDomain,
    slices: Rc<RefCell<Vec<T>>>,
}

impl<T: TubeValue> Clone for SlicedTube<T> {
    /// Deep copy, registered on the same time domain.
    fn clone(&self) -> Self {
        Self::from_values(self.tdomain.clone(), self.slices.borrow().clone())
    }
}

impl<T: TubeValue> PartialEq for SlicedTube<T> {
    fn eq(&self, other: &Self) -> bool {
        self.tdomain == other.tdomain && *self.slices.borrow() == *other.slices.borrow()
    }
}

impl<T: TubeValue> std::fmt::Debug for SlicedTube<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "SlicedTube({:?}, {} slices, codomain {:?})",
            self.t0_tf(),
            self.nb_slices(),
            self.codomain()
        )
    }
}

impl<T: TubeValue> SlicedTube<T> {
    /// Constant tube over a time domain.
    pub fn new(tdomain: &TDomain, value: T) -> Self {
        Self::from_values(tdomain.clone(), vec![value; tdomain.nb_tslices()])
    }

    pub(crate) fn from_values(tdomain: TDomain, values: Vec<T>) -> Self {
        assert!(values.len() == tdomain.nb_tslices());
        let slices = Rc::new(RefCell::new(values));
        let weak: Weak<RefCell<dyn SliceStore>> = {
            let w: Weak<RefCell<Vec<T>>> = Rc::downgrade(&slices);
            w
        };
        tdomain.register(weak);
        Self { tdomain, slices }
    }

    /// Shallow handle on the same storage (slice references).
    pub(crate) fn handle(&self) -> Self {
        Self {
            tdomain: self.tdomain.clone(),
            slices: self.slices.clone(),
        }
    }

    pub fn tdomain(&self) -> &TDomain {
        &self.tdomain
    }

    pub fn t0_tf(&self) -> Interval {
        self.tdomain.t0_tf()
    }

    pub fn nb_slices(&self) -> usize {
        self.slices.borrow().len()
    }

    /// Dimension of the codomain values.
    pub fn size(&self) -> usize {
        self.slices.borrow()[0].dim()
    }

    pub fn all_reals_value(&self) -> T {
        self.slices.borrow()[0].entire_like()
    }

    pub fn empty_value(&self) -> T {
        self.slices.borrow()[0].empty_like()
    }

    pub fn slice_value(&self, i: usize) -> T {
        self.slices.borrow()[i].clone()
    }

    pub fn set_slice_value(&mut self, i: usize, v: T) {
        self.slices.borrow_mut()[i] = v;
    }

    pub(crate) fn tslice_of(&self, i: usize) -> TSlice {
        self.tdomain.tslice_at(i)
    }

    /// The tube is empty when every slice is empty.
    pub fn is_empty(&self) -> bool {
        self.slices.borrow().iter().all(|s| s.is_empty_v())
    }

    pub fn is_unbounded(&self) -> bool {
        self.slices.borrow().iter().any(|s| s.is_unbounded_v())
    }

    /// Union of the slice codomains.
    pub fn codomain(&self) -> T {
        let slices = self.slices.borrow();
        let mut out = slices[0].empty_like();
        for s in slices.iter() {
            out = out.hull_v(s);
        }
        out
    }

    /// Sum over the non-gate slices of the slice durations times their
    /// codomain volumes.
    pub fn volume(&self) -> f64 {
        let slices = self.slices.borrow();
        let mut vol = 0.0;
        for (ts, s) in izip!(self.tdomain.tslices(), slices.iter()) {
            if !ts.is_gate() {
                vol += ts.t0_tf().diam() * s.volume_v();
            }
        }
        vol
    }

    // --- Evaluations ---

    /// Value at time `t`; the whole codomain space outside the domain. At a
    /// slice boundary without gate, the intersection of both neighbors.
    pub fn at(&self, t: f64) -> T {
        match self.tdomain.tslice(t) {
            None => self.all_reals_value(),
            Some(idx) => {
                let slices = self.slices.borrow();
                let ts = self.tdomain.tslice_at(idx);
                let mut v = slices[idx].clone();
                if !ts.is_gate() && idx > 0 && ts.lb() == t {
                    v = v.inter_v(&slices[idx - 1]);
                }
                v
            }
        }
    }

    /// Union of the slice codomains over `t`; the whole codomain space when
    /// `t` exceeds the time domain.
    pub fn over(&self, t: Interval) -> T {
        if t.is_empty() {
            return self.empty_value();
        }
        if !t.is_subset(&self.t0_tf()) {
            return self.all_reals_value();
        }
        if t.is_degenerated() {
            return self.at(t.lb());
        }
        let slices = self.slices.borrow();
        let mut out = slices[0].empty_like();
        for (ts, s) in izip!(self.tdomain.tslices(), slices.iter()) {
            let inter = ts.t0_tf().inter(&t);
            if inter.is_empty() {
                continue;
            }
            if ts.is_gate() || !inter.is_degenerated() {
                out = out.hull_v(s);
            }
        }
        out
    }

    /// Pair of enclosures of the lower and upper bounds over `t`.
    pub fn enclosed_bounds(&self, t: Interval) -> (T, T) {
        let slices = self.slices.borrow();
        let proto = slices[0].clone();
        let mut lb: Option<T> = None;
        let mut ub: Option<T> = None;
        for (i, s) in slices.iter().enumerate() {
            let ts = self.tdomain.tslice_at(i);
            let inter = ts.t0_tf().inter(&t);
            if inter.is_empty() || s.is_empty_v() {
                continue;
            }
            if !ts.is_gate() && inter.is_degenerated() {
                continue;
            }
            let comps = s.comps();
            let lbs: Vec<Interval> = comps.iter().map(|c| Interval::point(c.lb())).collect();
            let ubs: Vec<Interval> = comps.iter().map(|c| Interval::point(c.ub())).collect();
            let lbv = proto.from_comps(&lbs);
            let ubv = proto.from_comps(&ubs);
            lb = Some(match lb {
                None => lbv,
                Some(h) => h.hull_v(&lbv),
            });
            ub = Some(match ub {
                None => ubv,
                Some(h) => h.hull_v(&ubv),
            });
        }
        (
            lb.unwrap_or_else(|| proto.empty_like()),
            ub.unwrap_or_else(|| proto.empty_like()),
        )
    }

    /// Smallest time interval enclosing the preimage of `y` within
    /// `search`.
    pub fn invert(&self, y: &T, search: Interval) -> Interval {
        let mut out = Interval::EMPTY;
        for span in self.invert_all(y, search) {
            out = out.hull(&span);
        }
        out
    }

    /// Maximal connected time intervals whose image intersects `y`.
    pub fn invert_all(&self, y: &T, search: Interval) -> Vec<Interval> {
        let slices = self.slices.borrow();
        let mut out: Vec<Interval> = Vec::new();
        for (i, s) in slices.iter().enumerate() {
            let ts = self.tdomain.tslice_at(i);
            let span = ts.t0_tf().inter(&search);
            if span.is_empty() || !s.intersects_v(y) {
                continue;
            }
            match out.last_mut() {
                Some(last) if last.ub() >= span.lb() => *last = last.hull(&span),
                _ => out.push(span),
            }
        }
        out
    }

    /// Derivative-aware inversion: the slopes of `v` restrict where the
    /// preimage of `y` can live inside each slice.
    pub fn invert_with_deriv(&self, y: &T, v: &SlicedTube<T>, search: Interval) -> Interval {
        assert!(self.tdomain == *v.tdomain(), "tubes on different time domains");
        let mut out = Interval::EMPTY;
        for i in 0..self.nb_slices() {
            let ts = self.tdomain.tslice_at(i);
            let span = ts.t0_tf().inter(&search);
            if span.is_empty() {
                continue;
            }
            let s = self.slice_value(i);
            if ts.is_gate() {
                if s.intersects_v(y) {
                    out = out.hull(&span);
                }
                continue;
            }
            let ig = self.input_gate_of(i).comps();
            let og = self.output_gate_of(i).comps();
            let vc = v.slice_value(i).comps();
            let y_c = y.comps();
            let mut tau = span;
            let mut consistent = true;
            for (c, comp) in s.comps().iter().enumerate() {
                match slice_polygon(ts.lb(), ts.ub(), ig[c], og[c], *comp, vc[c]) {
                    Some(mut p) => {
                        if y_c[c].ub() < f64::INFINITY {
                            p.clip(0.0, 1.0, y_c[c].ub());
                        }
                        if y_c[c].lb() > f64::NEG_INFINITY {
                            p.clip(0.0, -1.0, -y_c[c].lb());
                        }
                        if p.is_empty() {
                            consistent = false;
                            break;
                        }
                        let (ti, _) = p.bounding_box();
                        tau = tau.inter(&ti);
                    }
                    None => {
                        if comp.inter(&y_c[c]).is_empty() {
                            consistent = false;
                            break;
                        }
                    }
                }
            }
            if consistent && !tau.is_empty() {
                out = out.hull(&tau);
            }
        }
        out
    }

    // --- Assignments ---

    /// Sets every slice and gate.
    pub fn set(&mut self, value: T) {
        for s in self.slices.borrow_mut().iter_mut() {
            *s = value.clone();
        }
    }

    /// Sets the value at time `t`, sampling a gate there.
    pub fn set_at(&mut self, value: T, t: f64) {
        let idx = self.tdomain.sample(t, true);
        self.slices.borrow_mut()[idx] = value;
    }

    /// Sets the codomain over a time interval, sampling its bounds.
    pub fn set_over(&mut self, value: T, span: Interval) {
        assert!(!span.is_empty());
        self.tdomain.sample(span.lb(), false);
        self.tdomain.sample(span.ub(), false);
        let n = self.tdomain.nb_tslices();
        for i in 0..n {
            let ts = self.tdomain.tslice_at(i);
            if ts.t0_tf().is_subset(&span) {
                self.slices.borrow_mut()[i] = value.clone();
            }
        }
    }

    pub fn set_ith_slice(&mut self, value: T, i: usize) {
        self.slices.borrow_mut()[i] = value;
    }

    pub fn set_empty(&mut self) {
        let empty = self.empty_value();
        self.set(empty);
    }

    pub fn inflate(&mut self, r: f64) {
        for s in self.slices.borrow_mut().iter_mut() {
            *s = s.inflate_v(r);
        }
    }

    /// Slice-wise intersection with another tube on the same domain.
    pub fn inter_assign(&mut self, other: &Self) {
        assert!(self.tdomain == *other.tdomain(), "tubes on different time domains");
        let other_vals = other.slices.borrow();
        for (s, o) in self.slices.borrow_mut().iter_mut().zip(other_vals.iter()) {
            *s = s.inter_v(o);
        }
    }

    // --- Slice handles ---

    pub fn first_slice(&self) -> SliceRef<T> {
        SliceRef {
            tube: self.handle(),
            idx: 0,
        }
    }

    pub fn last_slice(&self) -> SliceRef<T> {
        SliceRef {
            tube: self.handle(),
            idx: self.nb_slices() - 1,
        }
    }

    pub fn slice(&self, idx: usize) -> SliceRef<T> {
        assert!(idx < self.nb_slices());
        SliceRef {
            tube: self.handle(),
            idx,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = SliceRef<T>> {
        let h = self.handle();
        (0..self.nb_slices()).map(move |idx| SliceRef {
            tube: h.handle(),
            idx,
        })
    }

    /// Non-gate slice handles in time order.
    pub fn regular_slices(&self) -> Vec<SliceRef<T>> {
        self.iter().filter(|s| !s.is_gate()).collect()
    }

    pub(crate) fn input_gate_of(&self, idx: usize) -> T {
        let slices = self.slices.borrow();
        if idx == 0 {
            slices[0].clone()
        } else {
            slices[idx].inter_v(&slices[idx - 1])
        }
    }

    pub(crate) fn output_gate_of(&self, idx: usize) -> T {
        let slices = self.slices.borrow();
        if idx + 1 == slices.len() {
            slices[idx].clone()
        } else {
            slices[idx].inter_v(&slices[idx + 1])
        }
    }
}

impl SlicedTube<Interval> {
    /// Tube enclosing an analytic function of time, slice by slice.
    pub fn from_function(tdomain: &TDomain, f: &AnalyticFunction<ScalarType>) -> Self {
        assert!(f.input_size() == 1, "a function of time only is expected");
        let values = tdomain
            .tslices()
            .iter()
            .map(|ts| f.eval(&[ts.t0_tf().into()]))
            .collect();
        Self::from_values(tdomain.clone(), values)
    }

    /// Reachable region of a non-gate slice under the derivative tube `v`.
    pub fn polygon_slice(&self, idx: usize, v: &SlicedTube<Interval>) -> Option<ConvexPolygon> {
        assert!(self.tdomain == *v.tdomain(), "tubes on different time domains");
        let ts = self.tdomain.tslice_at(idx);
        assert!(!ts.is_gate(), "polygon of a gate slice");
        slice_polygon(
            ts.lb(),
            ts.ub(),
            self.input_gate_of(idx),
            self.output_gate_of(idx),
            self.slice_value(idx),
            v.slice_value(idx),
        )
    }
}

impl SlicedTube<IntervalVector> {
    pub fn from_function(tdomain: &TDomain, f: &AnalyticFunction<VectorType>) -> Self {
        assert!(f.input_size() == 1, "a function of time only is expected");
        let values = tdomain
            .tslices()
            .iter()
            .map(|ts| f.eval(&[ts.t0_tf().into()]))
            .collect();
        Self::from_values(tdomain.clone(), values)
    }
}

/// Handle on one slice of a tube. Structural changes of the domain
/// (sampling) shift indices; handles are meant for local, immediate use.
pub struct SliceRef<T: TubeValue> {
    tube: SlicedTube<T>,
    idx: usize,
}

impl<T: TubeValue> Clone for SliceRef<T> {
    /// Another handle on the same slice (the tube storage is shared, not
    /// copied).
    fn clone(&self) -> Self {
        Self {
            tube: self.tube.handle(),
            idx: self.idx,
        }
    }
}

impl<T: TubeValue> SliceRef<T> {
    pub fn index(&self) -> usize {
        self.idx
    }

    pub(crate) fn tube_handle(&self) -> SlicedTube<T> {
        self.tube.handle()
    }

    pub fn t0_tf(&self) -> Interval {
        self.tube.tslice_of(self.idx).t0_tf()
    }

    pub fn is_gate(&self) -> bool {
        self.tube.tslice_of(self.idx).is_gate()
    }

    pub fn codomain(&self) -> T {
        self.tube.slice_value(self.idx)
    }

    pub fn set(&self, value: T) {
        self.tube.slices.borrow_mut()[self.idx] = value;
    }

    pub fn input_gate(&self) -> T {
        self.tube.input_gate_of(self.idx)
    }

    pub fn output_gate(&self) -> T {
        self.tube.output_gate_of(self.idx)
    }

    pub fn next_slice(&self) -> Option<SliceRef<T>> {
        if self.idx + 1 < self.tube.nb_slices() {
            Some(SliceRef {
                tube: self.tube.handle(),
                idx: self.idx + 1,
            })
        } else {
            None
        }
    }

    pub fn prev_slice(&self) -> Option<SliceRef<T>> {
        if self.idx > 0 {
            Some(SliceRef {
                tube: self.tube.handle(),
                idx: self.idx - 1,
            })
        } else {
            None
        }
    }

    /// Derivative-aware evaluation over `t` restricted to this slice: the
    /// value is bounded by both gates extrapolated through `v`.
    pub fn eval_with_deriv(&self, t: Interval, v: &SliceRef<T>) -> T {
        let ts = self.t0_tf();
        let t = t.inter(&ts);
        if t.is_empty() {
            return self.codomain().empty_like();
        }
        let ig = self.input_gate();
        let og = self.output_gate();
        let vc = v.codomain();
        let fwd = ig.add_v(&vc.scale_v(t - Interval::point(ts.lb())));
        let bwd = og.sub_v(&vc.scale_v(Interval::point(ts.ub()) - t));
        self.codomain().inter_v(&fwd).inter_v(&bwd)
    }
}

// --- Integrals ---

/// Piecewise-linear cumulative bounds of one scalar component of a tube,
/// measured from the domain start. `cl` encloses the running integral of
/// the slice lower bounds, `cu` of the upper bounds; both are kept as
/// intervals so directed rounding stays sound in either use.
pub(crate) struct Cumulative {
    times: Vec<f64>,
    cl: Vec<Interval>,
    cu: Vec<Interval>,
    slopes: Vec<Interval>,
}

impl Cumulative {
    pub(crate) fn of_component<T: TubeValue>(tube: &SlicedTube<T>, comp: usize) -> Cumulative {
        let mut times = Vec::new();
        let mut cl = vec![Interval::ZERO];
        let mut cu = vec![Interval::ZERO];
        let mut slopes = Vec::new();
        let n = tube.nb_slices();
        for i in 0..n {
            let ts = tube.tslice_of(i);
            if ts.is_gate() {
                continue;
            }
            if times.is_empty() {
                times.push(ts.lb());
            }
            let c = tube.slice_value(i).comps()[comp];
            let dt = Interval::point(ts.ub()) - Interval::point(ts.lb());
            let (lo, hi) = if c.is_empty() {
                (Interval::EMPTY, Interval::EMPTY)
            } else {
                (Interval::point(c.lb()), Interval::point(c.ub()))
            };
            slopes.push(c);
            cl.push(*cl.last().unwrap() + lo * dt);
            cu.push(*cu.last().unwrap() + hi * dt);
            times.push(ts.ub());
        }
        Cumulative {
            times,
            cl,
            cu,
            slopes,
        }
    }

    fn locate(&self, t: f64) -> usize {
        // index of the piece containing t
        let mut k = 0;
        while k + 2 < self.times.len() && self.times[k + 1] <= t {
            k += 1;
        }
        k
    }

    pub(crate) fn cl_at(&self, t: f64) -> Interval {
        let k = self.locate(t);
        let s = self.slopes[k];
        let lo = if s.is_empty() {
            Interval::EMPTY
        } else {
            Interval::point(s.lb())
        };
        self.cl[k] + lo * (Interval::point(t) - Interval::point(self.times[k]))
    }

    pub(crate) fn cu_at(&self, t: f64) -> Interval {
        let k = self.locate(t);
        let s = self.slopes[k];
        let hi = if s.is_empty() {
            Interval::EMPTY
        } else {
            Interval::point(s.ub())
        };
        self.cu[k] + hi * (Interval::point(t) - Interval::point(self.times[k]))
    }

    fn extrema(&self, vals: &[Interval], at: impl Fn(f64) -> Interval, span: Interval) -> Interval {
        let mut out = at(span.lb()).hull(&at(span.ub()));
        for (k, &t) in self.times.iter().enumerate() {
            if span.interior_contains(t) {
                out = out.hull(&vals[k]);
            }
        }
        out
    }

    /// Range of the lower cumulative over a time interval.
    pub(crate) fn cl_range(&self, span: Interval) -> Interval {
        self.extrema(&self.cl, |t| self.cl_at(t), span)
    }

    pub(crate) fn cu_range(&self, span: Interval) -> Interval {
        self.extrema(&self.cu, |t| self.cu_at(t), span)
    }

    pub(crate) fn is_valid(&self) -> bool {
        !self.times.is_empty()
            && self.cl.iter().all(|x| !x.is_empty() && !x.is_unbounded())
            && self.cu.iter().all(|x| !x.is_empty() && !x.is_unbounded())
    }
}

impl<T: TubeValue> SlicedTube<T> {
    fn cumulatives(&self) -> Option<Vec<Cumulative>> {
        if self.t0_tf().is_unbounded() {
            return None;
        }
        let cums: Vec<Cumulative> = (0..self.size())
            .map(|c| Cumulative::of_component(self, c))
            .collect();
        if cums.iter().all(|c| c.is_valid()) {
            Some(cums)
        } else {
            None
        }
    }

    /// Pair of cumulative-bound enclosures `(∫ lower, ∫ upper)` from `t0`
    /// over the dates of `t`.
    pub fn partial_integral(&self, t: Interval) -> (T, T) {
        let proto = self.slice_value(0);
        let t = t.inter(&self.t0_tf());
        if t.is_empty() {
            return (proto.empty_like(), proto.empty_like());
        }
        match self.cumulatives() {
            None => (proto.entire_like(), proto.entire_like()),
            Some(cums) => {
                let mut lo_comps = Vec::new();
                let mut hi_comps = Vec::new();
                for c in &cums {
                    lo_comps.push(c.cl_range(t));
                    hi_comps.push(c.cu_range(t));
                }
                (proto.from_comps(&lo_comps), proto.from_comps(&hi_comps))
            }
        }
    }

    /// Enclosure of `∫_{t0}^{t} x dτ` over the dates of `t`.
    pub fn integral(&self, t: Interval) -> T {
        let (lo, hi) = self.partial_integral(t);
        if lo.is_empty_v() || hi.is_empty_v() {
            return self.empty_value();
        }
        let comps: Vec<Interval> = lo
            .comps()
            .iter()
            .zip(hi.comps().iter())
            .map(|(l, u)| Interval::new(l.lb(), u.ub()))
            .collect();
        self.slice_value(0).from_comps(&comps)
    }

    /// Enclosure of `∫_{t1}^{t2} x dτ`.
    pub fn integral_between(&self, t1: Interval, t2: Interval) -> T {
        let (l1, u1) = self.partial_integral(t1);
        let (l2, u2) = self.partial_integral(t2);
        if l1.is_empty_v() || l2.is_empty_v() {
            return self.empty_value();
        }
        let comps: Vec<Interval> = l1
            .comps()
            .iter()
            .zip(l2.comps())
            .zip(u1.comps().iter().zip(u2.comps()))
            .map(|((a1, a2), (b1, b2))| {
                let lo = a2 - *a1;
                let hi = b2 - *b1;
                Interval::new(lo.lb(), hi.ub())
            })
            .collect();
        self.slice_value(0).from_comps(&comps)
    }

    /// Antiderivative tube starting from `x0` at `t0`, by forward
    /// propagation of the differential inclusion.
    pub fn primitive(&self, x0: T) -> SlicedTube<T> {
        assert!(!self.t0_tf().is_unbounded(), "unbounded time domain");
        let mut p = SlicedTube::new(&self.tdomain, x0.entire_like());
        p.set_at(x0, self.t0_tf().lb());
        super::ctc_deriv::CtcDeriv::with(TimePropag::Fwd).contract(&mut p, self);
        p
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{self, ScalarVar};
    use crate::interval::boxes::constant;
    use crate::interval::{next_float, previous_float, OO};
    use crate::tube::tdomain::{create_tdomain, create_tdomain_over, create_tdomain_sampled};
    use approx::assert_relative_eq;

    fn iv(lb: f64, ub: f64) -> Interval {
        Interval::new(lb, ub)
    }

    #[test]
    fn sampling_and_values() {
        let td = create_tdomain();
        assert_eq!(td.nb_tslices(), 1);
        let mut x = SlicedTube::new(&td, constant(1, Interval::ENTIRE));
        x.set_over(constant(1, iv(1.0, 5.0)), iv(0.0, 1.0));
        x.set_over(constant(1, iv(2.0, 8.0)), iv(1.0, 2.0));
        x.set_over(constant(1, iv(6.0, 9.0)), iv(2.0, 3.0));

        let v: Vec<SliceRef<IntervalVector>> = x.iter().collect();
        assert_eq!(v[0].t0_tf(), iv(-OO, 0.0));
        assert_eq!(v[0].codomain(), constant(1, Interval::ENTIRE));
        assert_eq!(v[1].t0_tf(), iv(0.0, 1.0));
        assert_eq!(v[1].codomain(), constant(1, iv(1.0, 5.0)));
        assert_eq!(v[2].t0_tf(), iv(1.0, 2.0));
        assert_eq!(v[3].t0_tf(), iv(2.0, 3.0));
        assert_eq!(v[4].t0_tf(), iv(3.0, OO));

        assert_eq!(td.nb_tslices(), 5);
        assert_eq!(x.over(iv(0.0, 3.0)), constant(1, iv(1.0, 9.0)));
        assert_eq!(x.at(-1.0), constant(1, Interval::ENTIRE));
        assert_eq!(x.at(0.5), constant(1, iv(1.0, 5.0)));
        assert_eq!(x.at(1.5), constant(1, iv(2.0, 8.0)));
        assert_eq!(x.at(2.5), constant(1, iv(6.0, 9.0)));
        // no gates: values at slice boundaries are intersections
        assert_eq!(x.at(1.0), constant(1, iv(2.0, 5.0)));
        assert_eq!(x.at(2.0), constant(1, iv(6.0, 8.0)));
        assert_eq!(x.at(3.0), constant(1, iv(6.0, 9.0)));
        assert_eq!(x.at(999.0), constant(1, Interval::ENTIRE));

        // chained slice handles
        let s0 = x.first_slice();
        assert_eq!(s0.t0_tf(), iv(-OO, 0.0));
        let s1 = s0.next_slice().unwrap();
        assert_eq!(s1.t0_tf(), iv(0.0, 1.0));
        assert_eq!(s1.codomain(), constant(1, iv(1.0, 5.0)));

        // further sampling preserves the values
        td.sample(1.3, false);
        assert_eq!(td.nb_tslices(), 6);
        let v: Vec<SliceRef<IntervalVector>> = x.iter().collect();
        assert_eq!(v[2].t0_tf(), iv(1.0, 1.3));
        assert_eq!(v[2].codomain(), constant(1, iv(2.0, 8.0)));
        assert_eq!(v[3].t0_tf(), iv(1.3, 2.0));
        assert_eq!(v[3].codomain(), constant(1, iv(2.0, 8.0)));
    }

    #[test]
    fn basic_tube() {
        let td = create_tdomain_sampled(iv(0.0, 1.0), 0.1, false);
        let mut x = SlicedTube::new(&td, constant(3, Interval::ENTIRE));

        assert_eq!(x.size(), 3);
        assert!(*x.tdomain() == td);
        assert_eq!(x.t0_tf(), iv(0.0, 1.0));
        assert_eq!(x.nb_slices(), td.nb_tslices());
        assert_eq!(x.nb_slices(), 10);
        assert_eq!(x.first_slice().t0_tf(), iv(0.0, 0.1));
        let last = x.last_slice().t0_tf();
        assert_relative_eq!(last.lb(), 0.9, epsilon = 1e-12);
        assert_eq!(last.ub(), 1.0);
        assert_eq!(x.codomain(), constant(3, Interval::ENTIRE));
        x.set(constant(3, iv(-10.0, 10.0)));
        assert_eq!(x.codomain(), constant(3, iv(-10.0, 10.0)));

        assert_eq!(td.nb_tubes(), 1);
        assert_eq!(x.over(Interval::ENTIRE), constant(3, Interval::ENTIRE));
        assert_eq!(x.over(iv(-1.0, 1.0)), constant(3, Interval::ENTIRE));
        assert_eq!(x.over(td.t0_tf()), x.codomain());
        assert_eq!(x.at(-42.0), constant(3, Interval::ENTIRE));

        // affectation at a date samples a gate
        assert_eq!(td.nb_tslices(), 10);
        x.set_at(constant(3, iv(2.0, 3.0)), -42.0);
        assert_eq!(td.nb_tslices(), 12);

        let v: Vec<SliceRef<IntervalVector>> = x.iter().collect();
        assert_eq!(v[0].t0_tf(), Interval::point(-42.0));
        assert_eq!(v[0].codomain(), constant(3, iv(2.0, 3.0)));
        assert_eq!(v[1].t0_tf(), iv(-42.0, 0.0));
        assert_eq!(v[1].codomain(), constant(3, Interval::ENTIRE));
        assert_eq!(v[2].t0_tf(), iv(0.0, 0.1));
        assert_eq!(v[2].codomain(), constant(3, iv(-10.0, 10.0)));

        assert_eq!(x.at(-42.0), constant(3, iv(2.0, 3.0)));
        assert_eq!(x.at(previous_float(-42.0)), constant(3, Interval::ENTIRE));
        assert_eq!(x.at(next_float(-42.0)), constant(3, Interval::ENTIRE));

        // affectation over an interval
        x.set_over(constant(3, iv(9.0, 10.0)), iv(44.0, 55.0));
        assert_eq!(td.nb_tslices(), 14);
        assert_eq!(x.over(iv(44.0, 55.0)), constant(3, iv(9.0, 10.0)));
        assert_eq!(x.at(previous_float(44.0)), constant(3, Interval::ENTIRE));
        assert_eq!(x.at(next_float(55.0)), constant(3, Interval::ENTIRE));
    }

    #[test]
    fn gate_structure() {
        let td = create_tdomain_sampled(iv(0.0, 1.0), 0.1, false);
        let mut x = SlicedTube::new(&td, constant(2, Interval::ENTIRE));
        for s in x.iter() {
            x.set_ith_slice(constant(2, s.t0_tf()), s.index());
        }
        let v: Vec<SliceRef<IntervalVector>> = x.iter().collect();
        assert_eq!(v[0].t0_tf(), iv(0.0, 0.1));
        assert_eq!(v[0].input_gate(), constant(2, iv(0.0, 0.1))); // nothing before
        assert_eq!(v[0].codomain(), constant(2, iv(0.0, 0.1)));
        assert_eq!(v[0].output_gate(), constant(2, Interval::point(0.1)));

        assert_eq!(v[9].input_gate(), v[8].output_gate());
        let ig = v[9].input_gate();
        assert_relative_eq!(ig[0].lb(), 0.9, epsilon = 1e-12);
        assert!(ig[0].is_degenerated());
    }

    #[test]
    fn tube_from_function() {
        let td = create_tdomain_sampled(iv(0.0, 5.0), 0.01, true);
        let t = ScalarVar::new();
        let f = crate::function::AnalyticFunction::new(&[&t], 5.0 * expr::sin(2.0 * &t) + &t);
        let x = SlicedTube::<Interval>::from_function(&td, &f);
        assert!(!x.is_empty());
        // contains the true trajectory
        for k in 0..50 {
            let tk = 5.0 * (k as f64) / 49.0;
            assert!(x.at(tk).contains(5.0 * (2.0 * tk).sin() + tk));
        }
    }

    #[test]
    fn tube_evaluation_from_function() {
        let td = create_tdomain_sampled(iv(0.0, 5.0), 0.1, true);
        let t = ScalarVar::new();
        let f = crate::function::AnalyticFunction::new(&[&t], 10.0 * expr::cos(&t) + &t);
        let a = SlicedTube::<Interval>::from_function(&td, &f);
        let r = a.over(iv(1.0, 2.0));
        // encloses the true range [10 cos 2 + 2, 10 cos 1 + 1]
        assert!(r.lb() <= 10.0 * (2.0f64).cos() + 2.0);
        assert!(r.ub() >= 10.0 * (1.0f64).cos() + 1.0);
        assert!(r.lb() >= -2.8 && r.ub() <= 6.9);
    }

    #[test]
    fn copies_are_independent() {
        let td = create_tdomain_sampled(iv(0.0, 5.0), 0.01, true);
        let y = SlicedTube::new(&td, Interval::point(2.0));
        let x1 = SlicedTube::new(&td, iv(-1.0, 1.0));
        let x2 = SlicedTube::new(&td, Interval::point(1.0));
        let mut cx1 = x1.clone();
        let mut cx2 = x2.clone();

        // slice-wise backward addition through all slices
        let n = cx1.nb_slices();
        for i in 0..n {
            let mut a = cx1.slice_value(i);
            let mut b = cx2.slice_value(i);
            crate::interval::bwd::bwd_add(y.slice_value(i), &mut a, &mut b);
            cx1.set_ith_slice(a, i);
            cx2.set_ith_slice(b, i);
        }

        assert_eq!(cx1.codomain(), Interval::point(1.0));
        assert_eq!(cx2.codomain(), Interval::point(1.0));
        assert_eq!(y.codomain(), Interval::point(2.0));
        assert_eq!(x1.codomain(), iv(-1.0, 1.0));
    }

    #[test]
    fn tdomain_outlives_scope() {
        let x;
        {
            let td = create_tdomain_over(iv(0.0, 1.0));
            x = SlicedTube::new(&td, Interval::ENTIRE);
            assert!(*x.tdomain() == td);
        }
        assert_eq!(x.tdomain().t0_tf(), iv(0.0, 1.0));
    }

    #[test]
    fn tube_count_follows_drops() {
        let td = create_tdomain();
        assert_eq!(td.nb_tubes(), 0);
        let _x = SlicedTube::new(&td, constant(2, Interval::ENTIRE));
        assert_eq!(td.nb_tubes(), 1);
        {
            let _v = SlicedTube::new(&td, constant(3, Interval::ENTIRE));
            assert_eq!(td.nb_tubes(), 2);
        }
        assert_eq!(td.nb_tubes(), 1);
    }

    #[test]
    fn inversion() {
        let td = create_tdomain_sampled(iv(0.0, 10.0), 1.0, false);
        let mut x = SlicedTube::new(&td, iv(-10.0, 10.0));
        x.set_over(iv(5.0, 6.0), iv(2.0, 3.0));
        x.set_over(iv(-2.0, -1.0), iv(3.0, 7.0));
        x.set_over(iv(5.0, 6.0), iv(7.0, 8.0));
        x.set_over(iv(0.0, 1.0), iv(0.0, 2.0));
        x.set_over(iv(0.0, 1.0), iv(8.0, 10.0));

        let hits = x.invert_all(&iv(5.0, 5.5), iv(0.0, 10.0));
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0], iv(2.0, 3.0));
        assert_eq!(hits[1], iv(7.0, 8.0));
        assert_eq!(x.invert(&iv(5.0, 5.5), iv(0.0, 10.0)), iv(2.0, 8.0));
        assert!(x.invert(&iv(20.0, 21.0), iv(0.0, 10.0)).is_empty());
    }

    #[test]
    fn integral_of_constant_slope_bounds() {
        // v(t) = [-1, 1] over [0, 5]: cumulative from 0 grows like [-t, t]
        let td = create_tdomain_sampled(iv(0.0, 5.0), 0.5, false);
        let v = SlicedTube::new(&td, iv(-1.0, 1.0));
        let i = v.integral(Interval::point(5.0));
        assert_eq!(i, iv(-5.0, 5.0));
        let (plo, phi) = v.partial_integral(iv(0.0, 5.0));
        assert_eq!(plo, iv(-5.0, 0.0));
        assert_eq!(phi, iv(0.0, 5.0));
        let between = v.integral_between(Interval::point(1.0), Interval::point(3.0));
        assert_eq!(between, iv(-2.0, 2.0));
    }

    #[test]
    fn primitive_of_derivative_envelope() {
        // v = [-1, 1], x(0) = 0, dt = 0.01 over [0, 5]: the integral of
        // the primitive over [0, 5] is [-25/2, 25/2]
        let td = create_tdomain_sampled(iv(0.0, 5.0), 0.01, false);
        let v = SlicedTube::new(&td, iv(-1.0, 1.0));
        let x = v.primitive(Interval::point(0.0));
        // x(t) is close to [-t, t]
        let at2 = x.at(2.0);
        assert!(at2.is_superset(&iv(-2.0, 2.0)));
        assert!(at2.diam() <= 4.0 + 0.05);
        let total = x.integral(Interval::point(5.0));
        assert!(total.is_superset(&iv(-12.5, 12.5)));
        assert!(total.diam() <= 25.0 + 0.2);
    }

    #[test]
    fn derivative_aware_inversion() {
        // degenerate reachable segment: x(t) = -t over [-1, 3]
        let td = create_tdomain_over(iv(-1.0, 3.0));
        let mut x = SlicedTube::new(&td, iv(-5.0, 3.0));
        let v = SlicedTube::new(&td, iv(-1.0, 1.0));
        x.set_at(iv(1.0, 3.0), -1.0);
        x.set_at(iv(-4.0, -3.0), 3.0);
        crate::tube::CtcDeriv::new().contract(&mut x, &v);

        let y = iv(-1.0, -0.5);
        let plain = x.invert(&y, iv(-1.0, 3.0));
        let tight = x.invert_with_deriv(&y, &v, iv(-1.0, 3.0));
        assert!(tight.is_subset(&plain));
        assert!(plain.diam() >= 3.9);
        assert!(tight.contains(0.75));
        assert!(tight.diam() <= 0.6);
    }

    #[test]
    fn eval_with_derivative_on_slice() {
        let td = create_tdomain_over(iv(-1.0, 3.0));
        let mut x = SlicedTube::new(&td, iv(-5.0, 3.0));
        let v = SlicedTube::new(&td, Interval::point(-1.0));
        x.set_at(iv(-1.0, 3.0), -1.0);
        x.set_at(iv(-5.0, 0.5), 3.0);

        let ctc = crate::tube::CtcDeriv::new();
        ctc.contract(&mut x, &v);

        let sx = x.regular_slices()[0].clone();
        let sv = v.regular_slices()[0].clone();
        assert_eq!(sx.input_gate(), iv(-1.0, 3.0));
        assert_eq!(sx.output_gate(), iv(-5.0, -1.0));
        assert_eq!(sx.eval_with_deriv(Interval::point(2.0), &sv), iv(-4.0, 0.0));
        assert_eq!(sx.eval_with_deriv(iv(-1.0, 3.0), &sv), iv(-5.0, 3.0));
    }
}
