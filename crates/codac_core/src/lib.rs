pub mod ctc;
pub mod expr;
pub mod function;
pub mod geom;
pub mod interval;
pub mod linear;
pub mod paver;
pub mod sep;
pub mod serialization;
pub mod trajectory;
pub mod tube;
/// The `codac_core` crate provides the constraint-propagation engine over
/// interval domains: expression graphs with forward/backward interval
/// evaluation, the contractor/separator algebra, and sliced tubes for
/// time-varying quantities under differential inclusions.
///
/// Key components:
/// - **Intervals**: sound outward-rounded scalar arithmetic, nalgebra-backed
///   boxes and interval matrices.
/// - **Expression graphs**: shared-ownership operator DAGs evaluated in
///   natural, centered or default mode, with reverse contracting passes.
/// - **Contractors/Separators**: `CtcInverse` and friends, combined by
///   intersection, union, fixed point, projection and boundary wrapping.
/// - **Tubes**: sliced interval trajectories with gates, integrals, and the
///   `CtcDeriv`/`CtcEval` dynamic contractors.
/// - **Paver**: contractor- or separator-driven subdivision into
///   inside/outside/boundary subpavings (`sivia`).
pub mod prelude {
    pub use crate::ctc::{
        Ctc, CtcBoundary, CtcCartProd, CtcFixpoint, CtcInter, CtcInverse, CtcInverseNotIn,
        CtcNot, CtcPolar, CtcProj, CtcUnion,
    };
    pub use crate::expr::{
        self, abs, acos, acosh, asin, asinh, atan, atan2, atanh, ceil, chi, cos, cosh, cross,
        det, exp, extend, flatten, floor, log, mat, matmul, max, min, pow, root, sign, sin,
        sinh, sqr, sqrt, tan, tanh, transpose, vec, ExprValue, MatrixExpr, MatrixVar,
        ScalarExpr, ScalarVar, Value, VectorExpr, VectorVar,
    };
    pub use crate::function::{
        AnalyticFunction, EvalMode, MatrixType, ScalarType, VectorType,
    };
    pub use crate::interval::boxes::{
        boxn, cart_prod, constant, empty_box, entire, BoxOps, IntervalMatrix, IntervalVector,
        Matrix, MatrixOps, Vector,
    };
    pub use crate::interval::{next_float, previous_float, Interval, OO};
    pub use crate::paver::{
        pave_ctc, pave_sep, sivia, sivia_box, Paving, PavingLabel, PaverSettings, Subpaving,
    };
    pub use crate::sep::{BoxPair, Sep, SepCartProd, SepCtcPair, SepInter, SepInverse, SepNot,
        SepProj, SepTransform, SepUnion,
    };
    pub use crate::serialization::{
        deserialize_scalar_traj, deserialize_vector_traj, load_scalar_traj_from_file,
        load_vector_traj_from_file, save_traj_to_file, serialize_traj, SerializeError,
    };
    pub use crate::trajectory::{AnalyticTraj, SampledTraj, TrajValue};
    pub use crate::tube::{
        create_tdomain, create_tdomain_over, create_tdomain_sampled, CtcDeriv, CtcEval,
        SliceRef, SlicedTube, TDomain, TSlice, TimePropag, TubeValue,
    };
}
