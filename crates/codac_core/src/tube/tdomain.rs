//! Time domains: ordered lists of time slices shared by registered tubes.

use crate::interval::Interval;
use std::cell::RefCell;
use std::rc::{Rc, Weak};

/// One element of a time domain: a finite or semi-infinite time interval,
/// possibly degenerate (a *gate*) to pin a tube value at one instant.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TSlice {
    t: Interval,
    gate: bool,
}

impl TSlice {
    pub fn t0_tf(&self) -> Interval {
        self.t
    }

    pub fn is_gate(&self) -> bool {
        self.gate
    }

    pub fn lb(&self) -> f64 {
        self.t.lb()
    }

    pub fn ub(&self) -> f64 {
        self.t.ub()
    }
}

/// How a tube initializes the codomain of a structurally-new slice.
#[derive(Clone, Copy, Debug)]
pub(crate) enum SliceInit {
    /// Copy of an existing slice (splits).
    CopyOf(usize),
    /// Intersection of two neighbor slices (gate inserted at an existing
    /// boundary).
    InterOf(usize, usize),
    /// The whole codomain space (domain extensions carry no information).
    AllReals,
}

/// Storage handle of one registered tube, notified of structural changes.
pub(crate) trait SliceStore {
    fn insert_value(&mut self, pos: usize, init: SliceInit);
}

pub(crate) struct TDomainData {
    pub(crate) tslices: Vec<TSlice>,
    tubes: Vec<Weak<RefCell<dyn SliceStore>>>,
}

impl TDomainData {
    fn insert(&mut self, pos: usize, ts: TSlice, init: SliceInit) {
        self.tslices.insert(pos, ts);
        self.tubes.retain(|w| w.upgrade().is_some());
        for w in &self.tubes {
            if let Some(store) = w.upgrade() {
                store.borrow_mut().insert_value(pos, init);
            }
        }
    }
}

/// Shared handle on a time domain. All tubes registered on the same
/// `TDomain` share its slicing exactly; sampling one samples them all.
#[derive(Clone)]
pub struct TDomain {
    data: Rc<RefCell<TDomainData>>,
}

impl PartialEq for TDomain {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.data, &other.data)
    }
}

impl std::fmt::Debug for TDomain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "TDomain({:?})", self.t0_tf())
    }
}

/// Unbounded time domain with a single slice.
pub fn create_tdomain() -> TDomain {
    create_tdomain_over(Interval::ENTIRE)
}

/// Time domain `[t0, tf]` with a single slice.
pub fn create_tdomain_over(t0_tf: Interval) -> TDomain {
    assert!(!t0_tf.is_empty(), "empty time domain");
    TDomain {
        data: Rc::new(RefCell::new(TDomainData {
            tslices: vec![TSlice {
                t: t0_tf,
                gate: t0_tf.is_degenerated(),
            }],
            tubes: Vec::new(),
        })),
    }
}

/// Time domain `[t0, tf]` uniformly sampled with timestep `dt`, optionally
/// with gate slices at every sample point (bounds included).
///
/// The slice list is built in one pass; no tube is registered yet, so no
/// per-sample propagation is needed.
pub fn create_tdomain_sampled(t0_tf: Interval, dt: f64, with_gates: bool) -> TDomain {
    assert!(dt > 0.0, "negative or null timestep");
    assert!(!t0_tf.is_empty() && !t0_tf.is_unbounded());
    if t0_tf.is_degenerated() {
        return create_tdomain_over(t0_tf);
    }
    let gate = |t: f64| TSlice {
        t: Interval::point(t),
        gate: true,
    };
    let span = |a: f64, b: f64| TSlice {
        t: Interval::new(a, b),
        gate: false,
    };
    let mut tslices = Vec::new();
    if with_gates {
        tslices.push(gate(t0_tf.lb()));
    }
    let mut prev = t0_tf.lb();
    let mut k = 1usize;
    loop {
        let t = t0_tf.lb() + (k as f64) * dt;
        if t >= t0_tf.ub() - dt * 1e-9 {
            break;
        }
        tslices.push(span(prev, t));
        if with_gates {
            tslices.push(gate(t));
        }
        prev = t;
        k += 1;
    }
    tslices.push(span(prev, t0_tf.ub()));
    if with_gates {
        tslices.push(gate(t0_tf.ub()));
    }
    TDomain {
        data: Rc::new(RefCell::new(TDomainData {
            tslices,
            tubes: Vec::new(),
        })),
    }
}

impl TDomain {
    pub fn t0_tf(&self) -> Interval {
        let d = self.data.borrow();
        let lb = d.tslices.first().unwrap().lb();
        let ub = d.tslices.last().unwrap().ub();
        Interval::new(lb, ub)
    }

    pub fn nb_tslices(&self) -> usize {
        self.data.borrow().tslices.len()
    }

    /// Number of tubes currently registered; dropped tubes are pruned.
    pub fn nb_tubes(&self) -> usize {
        let mut d = self.data.borrow_mut();
        d.tubes.retain(|w| w.upgrade().is_some());
        d.tubes.len()
    }

    pub fn tslices(&self) -> Vec<TSlice> {
        self.data.borrow().tslices.clone()
    }

    pub fn tslice_at(&self, i: usize) -> TSlice {
        self.data.borrow().tslices[i]
    }

    pub(crate) fn register(&self, store: Weak<RefCell<dyn SliceStore>>) {
        self.data.borrow_mut().tubes.push(store);
    }

    /// Index of the slice containing `t`: gates are preferred; at a shared
    /// boundary the later slice wins, except at the final time.
    pub fn tslice(&self, t: f64) -> Option<usize> {
        if !t.is_finite() {
            return None;
        }
        let d = self.data.borrow();
        for (i, s) in d.tslices.iter().enumerate() {
            if s.gate && s.lb() == t {
                return Some(i);
            }
        }
        for (i, s) in d.tslices.iter().enumerate() {
            if !s.gate && s.lb() <= t && t < s.ub() {
                return Some(i);
            }
        }
        let last = d.tslices.len() - 1;
        if d.tslices[last].ub() == t {
            return Some(last);
        }
        None
    }

    /// Splits the slice containing `t` at `t`, inserting a gate slice when
    /// requested. Registered tubes get the new slices initialized from the
    /// parent codomain. Sampling an existing gate is a no-op; sampling
    /// outside the current domain extends it. Returns the index of the
    /// created gate, or of the slice starting at `t`.
    pub fn sample(&self, t: f64, with_gate: bool) -> usize {
        assert!(t.is_finite(), "sampling at an infinite date");
        let t0_tf = self.t0_tf();

        if t > t0_tf.ub() {
            // extend beyond tf
            let last = self.nb_tslices() - 1;
            let ts = TSlice {
                t: Interval::new(t0_tf.ub(), t),
                gate: false,
            };
            self.data.borrow_mut().insert(last + 1, ts, SliceInit::AllReals);
            if with_gate {
                let pos = last + 2;
                let g = TSlice {
                    t: Interval::point(t),
                    gate: true,
                };
                self.data.borrow_mut().insert(pos, g, SliceInit::AllReals);
                return pos;
            }
            return last + 1;
        }
        if t < t0_tf.lb() {
            let ts = TSlice {
                t: Interval::new(t, t0_tf.lb()),
                gate: false,
            };
            self.data.borrow_mut().insert(0, ts, SliceInit::AllReals);
            if with_gate {
                let g = TSlice {
                    t: Interval::point(t),
                    gate: true,
                };
                self.data.borrow_mut().insert(0, g, SliceInit::AllReals);
                return 0;
            }
            return 0;
        }

        let idx = self.tslice(t).expect("date inside the domain");
        {
            let d = self.data.borrow();
            if d.tslices[idx].gate {
                return idx; // no more action
            }
        }
        let s = self.tslice_at(idx);

        if t == s.lb() || t == s.ub() {
            // existing boundary: only a gate can be added
            if !with_gate {
                return idx;
            }
            let pos = if t == s.lb() { idx } else { idx + 1 };
            let g = TSlice {
                t: Interval::point(t),
                gate: true,
            };
            let init = if pos == 0 {
                SliceInit::CopyOf(0)
            } else if pos == self.nb_tslices() {
                SliceInit::CopyOf(pos - 1)
            } else {
                SliceInit::InterOf(pos - 1, pos)
            };
            self.data.borrow_mut().insert(pos, g, init);
            return pos;
        }

        // interior split
        {
            let mut d = self.data.borrow_mut();
            d.tslices[idx].t = Interval::new(s.lb(), t);
        }
        let right = TSlice {
            t: Interval::new(t, s.ub()),
            gate: false,
        };
        self.data.borrow_mut().insert(idx + 1, right, SliceInit::CopyOf(idx));
        if with_gate {
            let g = TSlice {
                t: Interval::point(t),
                gate: true,
            };
            self.data.borrow_mut().insert(idx + 1, g, SliceInit::CopyOf(idx));
            idx + 1
        } else {
            idx + 1
        }
    }

    /// Uniform sampling of a sub-interval.
    pub fn sample_interval(&self, span: Interval, dt: f64, with_gate: bool) {
        assert!(dt > 0.0 && !span.is_empty() && !span.is_unbounded());
        let mut t = span.lb();
        while t <= span.ub() + dt * 1e-9 {
            self.sample(t.min(span.ub()), with_gate);
            t += dt;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interval::OO;

    #[test]
    fn unbounded_default_domain() {
        let td = create_tdomain();
        assert_eq!(td.nb_tslices(), 1);
        assert_eq!(td.t0_tf(), Interval::ENTIRE);
    }

    #[test]
    fn degenerate_domain() {
        let td = create_tdomain_over(Interval::point(1.0));
        assert_eq!(td.nb_tslices(), 1);
        assert_eq!(td.t0_tf(), Interval::point(1.0));
        assert_eq!(td.nb_tubes(), 0);
    }

    #[test]
    fn sample_interval_on_unbounded_domain() {
        let td = create_tdomain();
        td.sample_interval(Interval::new(0.0, 1.0), 0.5, false);
        assert_eq!(td.nb_tslices(), 4);
        assert_eq!(td.t0_tf(), Interval::ENTIRE);
        let v = td.tslices();
        assert_eq!(v[0].t0_tf(), Interval::new(-OO, 0.0));
        assert_eq!(v[1].t0_tf(), Interval::new(0.0, 0.5));
        assert_eq!(v[2].t0_tf(), Interval::new(0.5, 1.0));
        assert_eq!(v[3].t0_tf(), Interval::new(1.0, OO));

        assert_eq!(td.tslice(-10.0), Some(0));
        assert_eq!(td.tslice(-120.0), Some(0));
        assert_eq!(td.tslice(0.2), Some(1));
        assert_eq!(td.tslice(5540.2), Some(3));
        assert_eq!(td.tslice(f64::NEG_INFINITY), None);
        assert_eq!(td.tslice(OO), None);
    }

    #[test]
    fn domain_with_gates() {
        let td = create_tdomain_sampled(Interval::new(0.0, 1.0), 0.5, true);
        assert_eq!(td.nb_tslices(), 5);
        assert_eq!(td.t0_tf(), Interval::new(0.0, 1.0));
        let v = td.tslices();
        assert_eq!(v[0].t0_tf(), Interval::point(0.0));
        assert_eq!(v[1].t0_tf(), Interval::new(0.0, 0.5));
        assert_eq!(v[2].t0_tf(), Interval::point(0.5));
        assert_eq!(v[3].t0_tf(), Interval::new(0.5, 1.0));
        assert_eq!(v[4].t0_tf(), Interval::point(1.0));

        assert_eq!(td.tslice(0.0), Some(0));
        assert_eq!(td.tslice(0.1), Some(1));
        assert_eq!(td.tslice(0.5), Some(2));
        assert_eq!(td.tslice(0.6), Some(3));
        assert_eq!(td.tslice(1.0), Some(4));
    }

    #[test]
    fn repeated_sampling() {
        let td = create_tdomain();
        td.sample(1.0, false);
        assert_eq!(td.nb_tslices(), 2);
        td.sample(10.0, false);
        assert_eq!(td.nb_tslices(), 3);
        td.sample(10.0, true); // second sampling adds the gate
        assert_eq!(td.nb_tslices(), 4);
        td.sample(10.0, true); // no more action
        assert_eq!(td.nb_tslices(), 4);

        let v = td.tslices();
        assert_eq!(v[0].t0_tf(), Interval::new(-OO, 1.0));
        assert_eq!(v[1].t0_tf(), Interval::new(1.0, 10.0));
        assert_eq!(v[2].t0_tf(), Interval::point(10.0));
        assert!(v[2].is_gate());
        assert_eq!(v[3].t0_tf(), Interval::new(10.0, OO));
    }

    #[test]
    fn sampling_outside_extends_the_domain() {
        let td = create_tdomain_over(Interval::new(0.0, 0.5));
        assert_eq!(td.nb_tslices(), 1);
        td.sample(1.0, false);
        assert_eq!(td.t0_tf(), Interval::new(0.0, 1.0));
        assert_eq!(td.nb_tslices(), 2);
        td.sample(1.0, false);
        assert_eq!(td.nb_tslices(), 2);
        td.sample(1.0, true);
        assert_eq!(td.nb_tslices(), 3);
        let it = td.sample(10.0, true);
        assert_eq!(td.t0_tf(), Interval::new(0.0, 10.0));
        assert_eq!(td.nb_tslices(), 5);
        assert_eq!(td.tslice_at(it).t0_tf(), Interval::point(10.0));
        let it = td.sample(15.0, false);
        assert_eq!(td.t0_tf(), Interval::new(0.0, 15.0));
        assert_eq!(td.nb_tslices(), 6);
        assert_eq!(td.tslice_at(it).t0_tf(), Interval::new(10.0, 15.0));
    }
}
