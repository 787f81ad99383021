//! Sliced tubes: time-indexed interval-valued trajectories over a shared
//! time domain, with the contractors coupling a tube and its derivative.

pub mod ctc_deriv;
pub mod ctc_eval;
pub mod sliced_tube;
pub mod tdomain;

pub use ctc_deriv::CtcDeriv;
pub use ctc_eval::CtcEval;
pub use sliced_tube::{SliceRef, SlicedTube, TubeValue};
pub use tdomain::{create_tdomain, create_tdomain_over, create_tdomain_sampled, TDomain, TSlice};

/// Temporal propagation direction of tube contractors.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum TimePropag {
    Fwd,
    Bwd,
    FwdBwd,
}
