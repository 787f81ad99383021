//! Generic paver: recursive bisection of a box driven by a contractor or a
//! separator, producing a paving tree of inside/outside/boundary regions.
//!
//! The exploration uses an explicit stack bounded by a maximum depth, so
//! pathological domains cannot blow the call stack.

use crate::ctc::Ctc;
use crate::function::{AnalyticFunction, ScalarType, VectorType};
use crate::interval::boxes::{BoxOps, IntervalVector};
use crate::interval::Interval;
use crate::sep::{Sep, SepInverse};
use serde::{Deserialize, Serialize};
use tracing::debug;

const BISECTION_RATIO: f64 = 0.49;

/// Region classification of a paving node.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub enum PavingLabel {
    Inside,
    Outside,
    Boundary,
    Unknown,
}

/// Paver tuning knobs; `eps` is per-call.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct PaverSettings {
    /// Maximum bisection depth; undecided boxes at the bound are labeled
    /// boundary.
    pub max_depth: usize,
}

impl Default for PaverSettings {
    fn default() -> Self {
        Self { max_depth: 40 }
    }
}

#[derive(Clone, Debug)]
pub struct PavingNode {
    pub region: IntervalVector,
    pub label: PavingLabel,
    pub children: Vec<usize>,
}

/// Tree of labeled boxes covering the initial domain. Leaves carry the
/// inside/outside/boundary classification; internal nodes are unknown.
#[derive(Clone, Debug, Default)]
pub struct Paving {
    nodes: Vec<PavingNode>,
}

impl Paving {
    fn push(&mut self, region: IntervalVector, label: PavingLabel) -> usize {
        self.nodes.push(PavingNode {
            region,
            label,
            children: Vec::new(),
        });
        self.nodes.len() - 1
    }

    pub fn root(&self) -> &PavingNode {
        &self.nodes[0]
    }

    pub fn nodes(&self) -> &[PavingNode] {
        &self.nodes
    }

    pub fn leaves(&self) -> impl Iterator<Item = &PavingNode> {
        self.nodes.iter().filter(|n| n.children.is_empty())
    }

    /// View restricted to the leaves of one label.
    pub fn subpaving(&self, label: PavingLabel) -> Subpaving {
        Subpaving {
            boxes: self
                .leaves()
                .filter(|n| n.label == label)
                .map(|n| n.region.clone())
                .collect(),
        }
    }
}

/// Flat list of boxes sharing one classification.
#[derive(Clone, Debug)]
pub struct Subpaving {
    pub boxes: Vec<IntervalVector>,
}

impl Subpaving {
    pub fn is_empty(&self) -> bool {
        self.boxes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.boxes.len()
    }

    pub fn volume(&self) -> f64 {
        self.boxes.iter().map(|b| b.volume()).sum()
    }

    pub fn contains_pt(&self, pt: &crate::interval::boxes::Vector) -> bool {
        self.boxes.iter().any(|b| b.contains_pt(pt))
    }

    /// Interval hull of the whole view.
    pub fn hull(&self) -> Option<IntervalVector> {
        let mut it = self.boxes.iter();
        let first = it.next()?.clone();
        Some(it.fold(first, |h, b| h.hull_box(b)))
    }
}

/// Paving driven by a contractor: emptied regions are outside, small
/// remainders are boundary.
pub fn pave_ctc(x0: &IntervalVector, c: &dyn Ctc, eps: f64) -> Paving {
    pave_ctc_with(x0, c, eps, PaverSettings::default())
}

pub fn pave_ctc_with(
    x0: &IntervalVector,
    c: &dyn Ctc,
    eps: f64,
    settings: PaverSettings,
) -> Paving {
    assert!(eps > 0.0);
    let mut paving = Paving::default();
    let root = paving.push(x0.clone(), PavingLabel::Unknown);
    let mut stack = vec![(root, 0usize)];

    while let Some((idx, depth)) = stack.pop() {
        let mut contracted = paving.nodes[idx].region.clone();
        c.contract(&mut contracted);

        if contracted.is_empty_box() {
            paving.nodes[idx].label = PavingLabel::Outside;
            continue;
        }

        // removed parts are certified outside
        let removed = paving.nodes[idx].region.diff(&contracted);
        let mut children = Vec::new();
        for b in removed {
            children.push(paving.push(b, PavingLabel::Outside));
        }

        if contracted.max_diam() <= eps || depth >= settings.max_depth {
            children.push(paving.push(contracted, PavingLabel::Boundary));
        } else {
            let i = contracted.max_diam_index();
            let (l, r) = contracted.bisect_at(i, BISECTION_RATIO);
            let li = paving.push(l, PavingLabel::Unknown);
            let ri = paving.push(r, PavingLabel::Unknown);
            stack.push((li, depth + 1));
            stack.push((ri, depth + 1));
            children.push(li);
            children.push(ri);
        }
        paving.nodes[idx].children = children;
    }
    debug!(nodes = paving.nodes.len(), "paving complete");
    paving
}

/// Paving driven by a separator: a box is inside when the inner box
/// empties, outside when the outer box empties, boundary when small.
pub fn pave_sep(x0: &IntervalVector, s: &dyn Sep, eps: f64) -> Paving {
    pave_sep_with(x0, s, eps, PaverSettings::default())
}

pub fn pave_sep_with(
    x0: &IntervalVector,
    s: &dyn Sep,
    eps: f64,
    settings: PaverSettings,
) -> Paving {
    assert!(eps > 0.0);
    let mut paving = Paving::default();
    let root = paving.push(x0.clone(), PavingLabel::Unknown);
    let mut stack = vec![(root, 0usize)];

    while let Some((idx, depth)) = stack.pop() {
        let region = paving.nodes[idx].region.clone();
        let p = s.separate(&region);

        if p.inner.is_empty_box() {
            paving.nodes[idx].label = PavingLabel::Inside;
            continue;
        }
        if p.outer.is_empty_box() {
            paving.nodes[idx].label = PavingLabel::Outside;
            continue;
        }

        let mut children = Vec::new();
        // region \ inner contains only feasible points
        for b in region.diff(&p.inner) {
            children.push(paving.push(b, PavingLabel::Inside));
        }
        // region \ outer contains only infeasible points
        for b in region.diff(&p.outer) {
            children.push(paving.push(b, PavingLabel::Outside));
        }

        let undecided = p.inner.inter_box(&p.outer);
        if undecided.is_empty_box() {
            paving.nodes[idx].children = children;
            continue;
        }
        if undecided.max_diam() <= eps || depth >= settings.max_depth {
            children.push(paving.push(undecided, PavingLabel::Boundary));
        } else {
            let i = undecided.max_diam_index();
            let (l, r) = undecided.bisect_at(i, BISECTION_RATIO);
            let li = paving.push(l, PavingLabel::Unknown);
            let ri = paving.push(r, PavingLabel::Unknown);
            stack.push((li, depth + 1));
            stack.push((ri, depth + 1));
            children.push(li);
            children.push(ri);
        }
        paving.nodes[idx].children = children;
    }
    debug!(nodes = paving.nodes.len(), "paving complete");
    paving
}

/// Set inversion via interval analysis: paves with the separator of
/// `f⁻¹(y)`.
pub fn sivia(
    x0: &IntervalVector,
    f: AnalyticFunction<ScalarType>,
    y: Interval,
    eps: f64,
) -> Paving {
    pave_sep(x0, &SepInverse::<ScalarType>::new(f, y), eps)
}

/// `sivia` for vector-valued functions.
pub fn sivia_box(
    x0: &IntervalVector,
    f: AnalyticFunction<VectorType>,
    y: IntervalVector,
    eps: f64,
) -> Paving {
    pave_sep(x0, &SepInverse::<VectorType>::new(f, y), eps)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ctc::CtcInverse;
    use crate::expr::{self, VectorVar};
    use crate::interval::boxes::{boxn, Vector};

    fn circle_fn() -> AnalyticFunction<ScalarType> {
        let v = VectorVar::new(2);
        AnalyticFunction::new(&[&v], expr::sqr(v.at(0)) + expr::sqr(v.at(1)))
    }

    #[test_log::test]
    fn pave_circle_with_contractor() {
        let c = CtcInverse::new(circle_fn(), Interval::point(4.0));
        let x0 = boxn(&[Interval::new(-5.0, 5.0), Interval::new(-5.0, 5.0)]);
        let paving = pave_ctc(&x0, &c, 0.2);

        let boundary = paving.subpaving(PavingLabel::Boundary);
        assert!(!boundary.is_empty());
        // circle points are retained by the boundary
        for k in 0..16 {
            let a = 2.0 * std::f64::consts::PI * (k as f64) / 16.0;
            let pt = Vector::from_vec(vec![2.0 * a.cos(), 2.0 * a.sin()]);
            assert!(boundary.contains_pt(&pt), "missing circle point {pt:?}");
        }
        // boundary boxes are small
        for b in &boundary.boxes {
            assert!(b.max_diam() <= 0.2 + 1e-9);
        }
        // the origin is certified outside (far from the circle)
        let outside = paving.subpaving(PavingLabel::Outside);
        assert!(outside.contains_pt(&Vector::from_vec(vec![0.0, 0.0])));
    }

    #[test]
    fn pave_disk_with_separator() {
        let s = SepInverse::<ScalarType>::new(circle_fn(), Interval::new(-crate::interval::OO, 4.0));
        let x0 = boxn(&[Interval::new(-5.0, 5.0), Interval::new(-5.0, 5.0)]);
        let paving = pave_sep(&x0, &s, 0.2);

        let inside = paving.subpaving(PavingLabel::Inside);
        let outside = paving.subpaving(PavingLabel::Outside);
        assert!(inside.contains_pt(&Vector::from_vec(vec![0.0, 0.0])));
        assert!(outside.contains_pt(&Vector::from_vec(vec![4.0, 4.0])));

        // volumes approximate the disk of radius 2 and its complement
        let disk_area = std::f64::consts::PI * 4.0;
        assert!(inside.volume() <= disk_area);
        assert!(inside.volume() >= disk_area - 6.0);
        assert!(outside.volume() <= 100.0 - disk_area + 6.0);
    }

    #[test]
    fn sivia_ellipse_boundary() {
        // f(x) = (x1/7)^2 + (x2/3)^2 = 1
        let v = VectorVar::new(2);
        let f = AnalyticFunction::new(
            &[&v],
            expr::sqr(v.at(0) / 7.0) + expr::sqr(v.at(1) / 3.0),
        );
        let x0 = boxn(&[Interval::new(-10.0, 10.0), Interval::new(-10.0, 10.0)]);
        let paving = sivia(&x0, f.clone(), Interval::point(1.0), 0.1);

        let boundary = paving.subpaving(PavingLabel::Boundary);
        assert!(!boundary.is_empty());

        // ellipse points are all covered by the boundary subpaving
        for k in 0..32 {
            let a = 2.0 * std::f64::consts::PI * (k as f64) / 32.0;
            let pt = Vector::from_vec(vec![7.0 * a.cos(), 3.0 * a.sin()]);
            assert!(boundary.contains_pt(&pt), "missing ellipse point {pt:?}");
        }
        // boundary boxes stay close to the curve (Hausdorff-style check)
        for b in &boundary.boxes {
            assert!(b.max_diam() <= 0.1 + 1e-9);
            let img = f.eval(&[b.into()]);
            assert!(
                img.inflate(0.5).contains(1.0),
                "boundary box too far from the ellipse: {b:?}"
            );
        }
    }

    #[test]
    fn depth_bound_terminates() {
        // a contractor that never contracts: the depth bound must stop the
        // exploration
        struct Noop;
        impl Ctc for Noop {
            fn contract(&self, _x: &mut IntervalVector) {}
            fn size(&self) -> usize {
                1
            }
        }
        let x0 = boxn(&[Interval::new(0.0, 1.0)]);
        let paving = pave_ctc_with(&x0, &Noop, 1e-30, PaverSettings { max_depth: 8 });
        assert!(paving.nodes().len() < 1200);
        assert!(paving.leaves().all(|n| n.label == PavingLabel::Boundary));
    }
}
