//! Trajectories: sampled (interpolated) and analytic time-to-value maps,
//! usable as plain data, as tube initializers, and as the
//! *trajectory-at-time* operator inside expression graphs.

use crate::expr::{traj_at, ScalarVar, TrajFn, Value, ValueKind};
use crate::function::{AnalyticFunction, ScalarType, VectorType};
use crate::interval::boxes::{IntervalVector, Vector};
use crate::interval::Interval;
use crate::tube::{SlicedTube, TDomain};
use serde::{Deserialize, Serialize};
use std::rc::Rc;

/// Value types a trajectory can carry (`f64` or `Vector`).
pub trait TrajValue: Clone + PartialEq + std::fmt::Debug + 'static {
    type Dom: crate::tube::TubeValue;

    fn dim(&self) -> usize;
    fn hull_pt(&self) -> Self::Dom;
    fn lerp(a: &Self, b: &Self, alpha: f64) -> Self;
    fn scalars(&self) -> Vec<f64>;
    fn from_scalars(v: &[f64]) -> Self;
}

impl TrajValue for f64 {
    type Dom = Interval;

    fn dim(&self) -> usize {
        1
    }
    fn hull_pt(&self) -> Interval {
        Interval::point(*self)
    }
    fn lerp(a: &Self, b: &Self, alpha: f64) -> Self {
        a + alpha * (b - a)
    }
    fn scalars(&self) -> Vec<f64> {
        vec![*self]
    }
    fn from_scalars(v: &[f64]) -> Self {
        v[0]
    }
}

impl TrajValue for Vector {
    type Dom = IntervalVector;

    fn dim(&self) -> usize {
        self.len()
    }
    fn hull_pt(&self) -> IntervalVector {
        IntervalVector::from_iterator(self.len(), self.iter().map(|&x| Interval::point(x)))
    }
    fn lerp(a: &Self, b: &Self, alpha: f64) -> Self {
        a + (b - a) * alpha
    }
    fn scalars(&self) -> Vec<f64> {
        self.iter().copied().collect()
    }
    fn from_scalars(v: &[f64]) -> Self {
        Vector::from_row_slice(v)
    }
}

/// Sampled trajectory: sorted `(t, value)` samples with linear
/// interpolation between them.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Default)]
pub struct SampledTraj<T: TrajValue> {
    samples: Vec<(f64, T)>,
}

impl<T: TrajValue> SampledTraj<T> {
    pub fn new() -> Self {
        Self { samples: Vec::new() }
    }

    /// Builds from unsorted samples; duplicated dates keep the last value.
    pub fn from_samples(mut samples: Vec<(f64, T)>) -> Self {
        assert!(samples.iter().all(|(t, _)| t.is_finite()), "sample at an infinite date");
        samples.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap());
        samples.dedup_by(|a, b| a.0 == b.0);
        Self { samples }
    }

    /// Inserts or replaces the sample at `t`.
    pub fn push(&mut self, t: f64, value: T) {
        assert!(t.is_finite(), "sample at an infinite date");
        match self.samples.binary_search_by(|s| s.0.partial_cmp(&t).unwrap()) {
            Ok(i) => self.samples[i].1 = value,
            Err(i) => self.samples.insert(i, (t, value)),
        }
    }

    pub fn nb_samples(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn samples(&self) -> &[(f64, T)] {
        &self.samples
    }

    /// Dimension of the values (1 when scalar).
    pub fn size(&self) -> usize {
        self.samples.first().map(|(_, v)| v.dim()).unwrap_or(0)
    }

    pub fn tdomain(&self) -> Interval {
        match (self.samples.first(), self.samples.last()) {
            (Some((a, _)), Some((b, _))) => Interval::new(*a, *b),
            _ => Interval::EMPTY,
        }
    }

    /// Interval hull of the sampled values.
    pub fn codomain(&self) -> T::Dom {
        use crate::tube::TubeValue;
        let mut it = self.samples.iter();
        let first = match it.next() {
            Some((_, v)) => v.hull_pt(),
            None => panic!("codomain of an empty trajectory"),
        };
        it.fold(first, |h, (_, v)| h.hull_v(&v.hull_pt()))
    }

    /// Linear interpolation at `t`; `None` outside the time domain.
    pub fn at(&self, t: f64) -> Option<T> {
        if !self.tdomain().contains(t) {
            return None;
        }
        let i = self
            .samples
            .partition_point(|s| s.0 < t);
        if i < self.samples.len() && self.samples[i].0 == t {
            return Some(self.samples[i].1.clone());
        }
        let (t0, v0) = &self.samples[i - 1];
        let (t1, v1) = &self.samples[i];
        let alpha = (t - t0) / (t1 - t0);
        Some(T::lerp(v0, v1, alpha))
    }

    /// Hull of the interpolated values over `t` (the trajectory is
    /// piecewise linear, so sample values and interpolated bounds suffice).
    pub fn enclosure(&self, t: Interval) -> Option<T::Dom> {
        use crate::tube::TubeValue;
        let t = t.inter(&self.tdomain());
        if t.is_empty() {
            return None;
        }
        let mut hull = self.at(t.lb())?.hull_pt();
        hull = hull.hull_v(&self.at(t.ub())?.hull_pt());
        for (ts, v) in &self.samples {
            if t.interior_contains(*ts) {
                hull = hull.hull_v(&v.hull_pt());
            }
        }
        Some(hull)
    }

    /// Resampled copy with timestep `dt`.
    pub fn sampled(&self, dt: f64) -> Self {
        assert!(dt > 0.0);
        let dom = self.tdomain();
        assert!(!dom.is_empty(), "resampling an empty trajectory");
        let mut out = Vec::new();
        let mut t = dom.lb();
        while t < dom.ub() {
            out.push((t, self.at(t).unwrap()));
            t += dt;
        }
        out.push((dom.ub(), self.at(dom.ub()).unwrap()));
        Self::from_samples(out)
    }

    /// Restriction to a sub-domain, with clean interpolated end samples.
    pub fn truncate_tdomain(&mut self, span: Interval) {
        assert!(
            span.is_subset(&self.tdomain()),
            "truncation beyond the trajectory domain"
        );
        let lb_val = self.at(span.lb()).unwrap();
        let ub_val = self.at(span.ub()).unwrap();
        self.samples.retain(|(t, _)| span.contains(*t));
        self.push(span.lb(), lb_val);
        self.push(span.ub(), ub_val);
    }
}

impl TrajFn for SampledTraj<f64> {
    fn traj_kind(&self) -> ValueKind {
        ValueKind::Scalar
    }

    fn enclosure(&self, t: Interval) -> Value {
        // dates outside the sampled domain carry no information
        if !t.is_subset(&self.tdomain()) {
            return Value::Scalar(Interval::ENTIRE);
        }
        match SampledTraj::enclosure(self, t) {
            Some(h) => Value::Scalar(h),
            None => Value::Scalar(Interval::ENTIRE),
        }
    }

    fn time_domain(&self) -> Interval {
        self.tdomain()
    }
}

impl TrajFn for SampledTraj<Vector> {
    fn traj_kind(&self) -> ValueKind {
        ValueKind::Vector(self.size())
    }

    fn enclosure(&self, t: Interval) -> Value {
        if !t.is_subset(&self.tdomain()) {
            return Value::Vector(IntervalVector::from_element(self.size(), Interval::ENTIRE));
        }
        match SampledTraj::enclosure(self, t) {
            Some(h) => Value::Vector(h),
            None => Value::Vector(IntervalVector::from_element(self.size(), Interval::ENTIRE)),
        }
    }

    fn time_domain(&self) -> Interval {
        self.tdomain()
    }
}

impl SampledTraj<f64> {
    /// The trajectory as an analytic function of time, through the
    /// trajectory-at-time operator.
    pub fn as_function(&self) -> AnalyticFunction<ScalarType> {
        let t = ScalarVar::new();
        let e = traj_at(Rc::new(self.clone()) as Rc<dyn TrajFn>, &t).into_scalar();
        AnalyticFunction::new(&[&t], e)
    }
}

impl SampledTraj<Vector> {
    pub fn as_function(&self) -> AnalyticFunction<VectorType> {
        let t = ScalarVar::new();
        let e = traj_at(Rc::new(self.clone()) as Rc<dyn TrajFn>, &t).into_vector();
        AnalyticFunction::new(&[&t], e)
    }
}

impl SlicedTube<Interval> {
    /// Tube enclosing a sampled trajectory, slice by slice.
    pub fn from_sampled_traj(tdomain: &TDomain, traj: &SampledTraj<f64>) -> Self {
        let values = tdomain
            .tslices()
            .iter()
            .map(|ts| match ts.t0_tf().is_subset(&traj.tdomain()) {
                true => SampledTraj::enclosure(traj, ts.t0_tf()).unwrap_or(Interval::ENTIRE),
                false => Interval::ENTIRE,
            })
            .collect();
        Self::from_values(tdomain.clone(), values)
    }
}

impl SlicedTube<IntervalVector> {
    pub fn from_sampled_traj(tdomain: &TDomain, traj: &SampledTraj<Vector>) -> Self {
        let n = traj.size();
        let values = tdomain
            .tslices()
            .iter()
            .map(|ts| match ts.t0_tf().is_subset(&traj.tdomain()) {
                true => SampledTraj::enclosure(traj, ts.t0_tf())
                    .unwrap_or_else(|| IntervalVector::from_element(n, Interval::ENTIRE)),
                false => IntervalVector::from_element(n, Interval::ENTIRE),
            })
            .collect();
        Self::from_values(tdomain.clone(), values)
    }
}

/// Analytic trajectory: a function of time restricted to a time domain.
#[derive(Clone)]
pub struct AnalyticTraj {
    f: AnalyticFunction<ScalarType>,
    tdomain: Interval,
}

impl AnalyticTraj {
    pub fn new(f: AnalyticFunction<ScalarType>, tdomain: Interval) -> Self {
        assert!(f.input_size() == 1, "a function of time only is expected");
        assert!(!tdomain.is_empty());
        Self { f, tdomain }
    }

    pub fn tdomain(&self) -> Interval {
        self.tdomain
    }

    pub fn at(&self, t: f64) -> f64 {
        assert!(self.tdomain.contains(t), "date outside the trajectory domain");
        self.f.real_eval(&[Interval::point(t).into()])
    }

    /// Guaranteed enclosure over `t`.
    pub fn over(&self, t: Interval) -> Interval {
        let t = t.inter(&self.tdomain);
        if t.is_empty() {
            return Interval::EMPTY;
        }
        self.f.eval(&[t.into()])
    }

    /// Discretization into a sampled trajectory.
    pub fn sampled(&self, dt: f64) -> SampledTraj<f64> {
        assert!(dt > 0.0 && !self.tdomain.is_unbounded());
        let mut out = Vec::new();
        let mut t = self.tdomain.lb();
        while t < self.tdomain.ub() {
            out.push((t, self.at(t)));
            t += dt;
        }
        out.push((self.tdomain.ub(), self.at(self.tdomain.ub())));
        SampledTraj::from_samples(out)
    }
}

impl TrajFn for AnalyticTraj {
    fn traj_kind(&self) -> ValueKind {
        ValueKind::Scalar
    }

    fn enclosure(&self, t: Interval) -> Value {
        let t = t.inter(&self.tdomain);
        if t.is_empty() {
            return Value::Scalar(Interval::ENTIRE);
        }
        Value::Scalar(self.f.eval(&[t.into()]))
    }

    fn time_domain(&self) -> Interval {
        self.tdomain
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr;
    use approx::assert_relative_eq;

    fn v2(a: f64, b: f64) -> Vector {
        Vector::from_vec(vec![a, b])
    }

    #[test]
    fn sampled_vector_trajectory() {
        let x = SampledTraj::from_samples(vec![
            (0.25, v2(-0.5, 0.5)),
            (1.0, v2(0.0, 0.0)),
            (2.0, v2(1.0, 0.0)),
            (3.0, v2(1.0, 1.0)),
            (4.0, v2(-1.0, 1.0)),
            (5.0, v2(-1.0, -1.0)),
            (6.0, v2(2.0, -1.0)),
        ]);

        assert_eq!(x.tdomain(), Interval::new(0.25, 6.0));
        assert_eq!(x.size(), 2);
        assert_eq!(x.nb_samples(), 7);
        assert!(!x.is_empty());
        let cod = x.codomain();
        assert_eq!(cod[0], Interval::new(-1.0, 2.0));
        assert_eq!(cod[1], Interval::new(-1.0, 1.0));

        assert_eq!(x.at(0.25).unwrap(), v2(-0.5, 0.5));
        assert_eq!(x.at(1.0).unwrap(), v2(0.0, 0.0));
        assert_eq!(x.at(6.0).unwrap(), v2(2.0, -1.0));
        assert!(x.at(0.1).is_none());

        // interpolations
        let p = x.at(0.75).unwrap();
        assert_relative_eq!(p[0], -1.0 / 6.0, epsilon = 1e-12);
        assert_relative_eq!(p[1], 1.0 / 6.0, epsilon = 1e-12);
        assert_eq!(x.at(1.5).unwrap(), v2(0.5, 0.0));
        assert_eq!(x.at(5.5).unwrap(), v2(0.5, -1.0));

        let e = x.enclosure(Interval::new(1.0, 4.0)).unwrap();
        assert_eq!(e[0], Interval::new(-1.0, 1.0));
        assert_eq!(e[1], Interval::new(0.0, 1.0));
    }

    #[test]
    fn resampling_preserves_shape() {
        let x = SampledTraj::from_samples(vec![
            (0.25, v2(-0.5, 0.5)),
            (1.0, v2(0.0, 0.0)),
            (2.0, v2(1.0, 0.0)),
            (3.0, v2(1.0, 1.0)),
            (4.0, v2(-1.0, 1.0)),
            (5.0, v2(-1.0, -1.0)),
            (6.0, v2(2.0, -1.0)),
        ]);
        let s = x.sampled(0.1);
        assert_eq!(s.tdomain(), x.tdomain());
        assert!(s.nb_samples() > 5 * x.nb_samples());
        assert_eq!(s.codomain(), x.codomain());
        let p = s.at(1.5).unwrap();
        assert_relative_eq!(p[0], 0.5, epsilon = 1e-9);
        assert_relative_eq!(p[1], 0.0, epsilon = 1e-9);
    }

    #[test]
    fn truncation() {
        let mut x = SampledTraj::from_samples(vec![(0.0, 0.0), (1.0, 2.0), (2.0, 4.0)]);
        x.truncate_tdomain(Interval::new(0.5, 1.5));
        assert_eq!(x.tdomain(), Interval::new(0.5, 1.5));
        assert_relative_eq!(x.at(0.5).unwrap(), 1.0, epsilon = 1e-12);
        assert_relative_eq!(x.at(1.5).unwrap(), 3.0, epsilon = 1e-12);
    }

    #[test]
    fn trajectory_as_function() {
        let x = SampledTraj::from_samples(vec![(0.0, 0.0), (1.0, 2.0), (2.0, 0.0)]);
        let f = x.as_function();
        let out = f.eval(&[Interval::new(0.5, 1.5).into()]);
        assert_eq!(out, Interval::new(1.0, 2.0));
        // outside the trajectory domain: no information
        let out = f.eval(&[Interval::new(-1.0, 0.5).into()]);
        assert_eq!(out, Interval::ENTIRE);
    }

    #[test]
    fn tube_from_sampled_trajectory() {
        let traj = SampledTraj::from_samples(vec![(0.0, 0.0), (1.0, 1.0), (2.0, 0.0)]);
        let td = crate::tube::create_tdomain_sampled(Interval::new(0.0, 2.0), 0.5, false);
        let x = SlicedTube::<Interval>::from_sampled_traj(&td, &traj);
        assert!(x.at(0.25).contains(0.25));
        assert!(x.at(1.0).contains(1.0));
        assert!(x.at(1.75).contains(0.25));
        assert_eq!(x.codomain(), Interval::new(0.0, 1.0));
    }

    #[test]
    fn analytic_trajectory() {
        let t = ScalarVar::new();
        let f = AnalyticFunction::new(&[&t], expr::sqr(&t));
        let tr = AnalyticTraj::new(f, Interval::new(0.0, 2.0));
        assert_relative_eq!(tr.at(1.5), 2.25, epsilon = 1e-12);
        assert!(tr.over(Interval::new(0.0, 2.0)).is_superset(&Interval::new(0.0, 4.0)));
        let s = tr.sampled(0.1);
        assert_eq!(s.tdomain(), Interval::new(0.0, 2.0));
        assert_relative_eq!(s.at(1.0).unwrap(), 1.0, epsilon = 1e-9);
    }
}
