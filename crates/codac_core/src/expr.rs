//! Analytic expression graphs.
//!
//! Expressions are immutable DAGs of operator nodes with shared ownership of
//! children (`Rc`); cycles are impossible since operators only consume
//! existing nodes. Structural sharing is intentional: the evaluator caches
//! valuations per node id so a shared sub-DAG is evaluated once.
//!
//! Construction goes through the typed wrappers [`ScalarExpr`],
//! [`VectorExpr`] and [`MatrixExpr`], the `std::ops` overloads and the free
//! functions of this module (`sin`, `sqr`, `vec`, ...).

use crate::interval::boxes::{matrix_hull, vector_hull, IntervalMatrix, IntervalVector, Matrix, Vector};
use crate::interval::Interval;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

pub type ExprId = u64;
pub type VarId = u64;

static NEXT_ID: AtomicU64 = AtomicU64::new(0);

fn fresh_id() -> u64 {
    NEXT_ID.fetch_add(1, Ordering::Relaxed)
}

/// Result kind of an expression node.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ValueKind {
    Scalar,
    Vector(usize),
    Matrix(usize, usize),
}

impl ValueKind {
    /// Number of scalar components.
    pub fn size(&self) -> usize {
        match self {
            ValueKind::Scalar => 1,
            ValueKind::Vector(n) => *n,
            ValueKind::Matrix(r, c) => r * c,
        }
    }
}

/// A point or interval value of any kind, used both as evaluation input and
/// output.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Scalar(Interval),
    Vector(IntervalVector),
    Matrix(IntervalMatrix),
}

impl Value {
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Scalar(_) => ValueKind::Scalar,
            Value::Vector(v) => ValueKind::Vector(v.len()),
            Value::Matrix(m) => ValueKind::Matrix(m.nrows(), m.ncols()),
        }
    }

    pub fn size(&self) -> usize {
        self.kind().size()
    }

    pub fn scalar(&self) -> Interval {
        match self {
            Value::Scalar(x) => *x,
            _ => panic!("scalar value expected"),
        }
    }

    pub fn vector(&self) -> &IntervalVector {
        match self {
            Value::Vector(v) => v,
            _ => panic!("vector value expected"),
        }
    }

    pub fn matrix(&self) -> &IntervalMatrix {
        match self {
            Value::Matrix(m) => m,
            _ => panic!("matrix value expected"),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Value::Scalar(x) => x.is_empty(),
            Value::Vector(v) => v.iter().any(|c| c.is_empty()),
            Value::Matrix(m) => m.iter().any(|c| c.is_empty()),
        }
    }

    /// Degenerate value at the midpoint.
    pub fn mid_value(&self) -> Value {
        match self {
            Value::Scalar(x) => Value::Scalar(Interval::point(x.mid())),
            Value::Vector(v) => {
                Value::Vector(IntervalVector::from_iterator(v.len(), v.iter().map(|c| Interval::point(c.mid()))))
            }
            Value::Matrix(m) => Value::Matrix(IntervalMatrix::from_iterator(
                m.nrows(),
                m.ncols(),
                m.iter().map(|c| Interval::point(c.mid())),
            )),
        }
    }

    /// Scalar components in storage order.
    pub fn components(&self) -> Vec<Interval> {
        match self {
            Value::Scalar(x) => vec![*x],
            Value::Vector(v) => v.iter().copied().collect(),
            Value::Matrix(m) => m.iter().copied().collect(),
        }
    }

    pub fn intersect(&self, other: &Value) -> Value {
        match (self, other) {
            (Value::Scalar(a), Value::Scalar(b)) => Value::Scalar(a.inter(b)),
            (Value::Vector(a), Value::Vector(b)) => {
                assert_eq!(a.len(), b.len());
                Value::Vector(IntervalVector::from_iterator(
                    a.len(),
                    a.iter().zip(b.iter()).map(|(x, y)| x.inter(y)),
                ))
            }
            (Value::Matrix(a), Value::Matrix(b)) => {
                assert_eq!(a.shape(), b.shape());
                Value::Matrix(IntervalMatrix::from_iterator(
                    a.nrows(),
                    a.ncols(),
                    a.iter().zip(b.iter()).map(|(x, y)| x.inter(y)),
                ))
            }
            _ => panic!("kind mismatch in intersection"),
        }
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Scalar(Interval::point(x))
    }
}

impl From<i32> for Value {
    fn from(x: i32) -> Self {
        Value::Scalar(Interval::point(x as f64))
    }
}

impl From<Interval> for Value {
    fn from(x: Interval) -> Self {
        Value::Scalar(x)
    }
}

impl From<IntervalVector> for Value {
    fn from(v: IntervalVector) -> Self {
        Value::Vector(v)
    }
}

impl From<&IntervalVector> for Value {
    fn from(v: &IntervalVector) -> Self {
        Value::Vector(v.clone())
    }
}

impl From<Vector> for Value {
    fn from(v: Vector) -> Self {
        Value::Vector(vector_hull(&v))
    }
}

impl From<IntervalMatrix> for Value {
    fn from(m: IntervalMatrix) -> Self {
        Value::Matrix(m)
    }
}

impl From<Matrix> for Value {
    fn from(m: Matrix) -> Self {
        Value::Matrix(matrix_hull(&m))
    }
}

/// Interface of trajectory objects usable as the *trajectory-at-time*
/// operator; implemented by the trajectory module.
pub trait TrajFn {
    fn traj_kind(&self) -> ValueKind;
    /// Enclosure of the trajectory over the time enclosure `t`.
    fn enclosure(&self, t: Interval) -> Value;
    fn time_domain(&self) -> Interval;
}

pub type NodeRef = Rc<ExprNode>;

/// Operator applied by a node. One variant per operator kind; the
/// evaluators are match statements over this enum.
pub enum Op {
    Var(VarId),
    ConstScalar(Interval),
    ConstVector(IntervalVector),
    ConstMatrix(IntervalMatrix),
    Add(NodeRef, NodeRef),
    Sub(NodeRef, NodeRef),
    Neg(NodeRef),
    Mul(NodeRef, NodeRef),
    Div(NodeRef, NodeRef),
    Sqr(NodeRef),
    Sqrt(NodeRef),
    Pow(NodeRef, NodeRef),
    Root(NodeRef, i32),
    Exp(NodeRef),
    Log(NodeRef),
    Cos(NodeRef),
    Sin(NodeRef),
    Tan(NodeRef),
    Acos(NodeRef),
    Asin(NodeRef),
    Atan(NodeRef),
    Atan2(NodeRef, NodeRef),
    Cosh(NodeRef),
    Sinh(NodeRef),
    Tanh(NodeRef),
    Acosh(NodeRef),
    Asinh(NodeRef),
    Atanh(NodeRef),
    Abs(NodeRef),
    Sign(NodeRef),
    Floor(NodeRef),
    Ceil(NodeRef),
    Min(NodeRef, NodeRef),
    Max(NodeRef, NodeRef),
    Chi(NodeRef, NodeRef, NodeRef),
    /// Vector component extraction.
    Component(NodeRef, usize),
    /// Matrix entry extraction.
    MatComponent(NodeRef, usize, usize),
    /// Contiguous sub-vector `[i, j]`, both included.
    Subvector(NodeRef, usize, usize),
    /// Vector built from scalar components.
    VecOf(Vec<NodeRef>),
    /// Concatenation of two vectors.
    Extend(NodeRef, NodeRef),
    /// Matrix built from column vectors.
    MatOf(Vec<NodeRef>),
    Det(NodeRef),
    Cross(NodeRef, NodeRef),
    Transpose(NodeRef),
    /// Column-major flattening of a matrix into a vector.
    Flatten(NodeRef),
    /// Trajectory evaluated at a scalar time expression.
    Traj(Rc<dyn TrajFn>, NodeRef),
}

/// Immutable DAG node.
pub struct ExprNode {
    pub id: ExprId,
    pub kind: ValueKind,
    pub has_vars: bool,
    pub op: Op,
}

fn node(kind: ValueKind, has_vars: bool, op: Op) -> NodeRef {
    Rc::new(ExprNode {
        id: fresh_id(),
        kind,
        has_vars,
        op,
    })
}

pub(crate) fn op_children(op: &Op) -> Vec<&NodeRef> {
    match op {
        Op::Var(_) | Op::ConstScalar(_) | Op::ConstVector(_) | Op::ConstMatrix(_) => vec![],
        Op::Neg(a)
        | Op::Sqr(a)
        | Op::Sqrt(a)
        | Op::Root(a, _)
        | Op::Exp(a)
        | Op::Log(a)
        | Op::Cos(a)
        | Op::Sin(a)
        | Op::Tan(a)
        | Op::Acos(a)
        | Op::Asin(a)
        | Op::Atan(a)
        | Op::Cosh(a)
        | Op::Sinh(a)
        | Op::Tanh(a)
        | Op::Acosh(a)
        | Op::Asinh(a)
        | Op::Atanh(a)
        | Op::Abs(a)
        | Op::Sign(a)
        | Op::Floor(a)
        | Op::Ceil(a)
        | Op::Component(a, _)
        | Op::MatComponent(a, _, _)
        | Op::Subvector(a, _, _)
        | Op::Det(a)
        | Op::Transpose(a)
        | Op::Flatten(a)
        | Op::Traj(_, a) => vec![a],
        Op::Add(a, b)
        | Op::Sub(a, b)
        | Op::Mul(a, b)
        | Op::Div(a, b)
        | Op::Pow(a, b)
        | Op::Atan2(a, b)
        | Op::Min(a, b)
        | Op::Max(a, b)
        | Op::Extend(a, b)
        | Op::Cross(a, b) => vec![a, b],
        Op::Chi(a, b, c) => vec![a, b, c],
        Op::VecOf(v) | Op::MatOf(v) => v.iter().collect(),
    }
}

impl ExprNode {
    pub fn children(&self) -> Vec<&NodeRef> {
        op_children(&self.op)
    }

    /// Ids of all variables appearing in the sub-DAG.
    pub fn collect_vars(&self, out: &mut Vec<VarId>) {
        if let Op::Var(id) = self.op {
            if !out.contains(&id) {
                out.push(id);
            }
        }
        for c in self.children() {
            c.collect_vars(out);
        }
    }
}

// --- Variables ---

/// Scalar decision variable; clones share the same identity.
#[derive(Clone)]
pub struct ScalarVar {
    node: NodeRef,
}

impl ScalarVar {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        let id = fresh_id();
        Self {
            node: node(ValueKind::Scalar, true, Op::Var(id)),
        }
    }

    pub fn id(&self) -> VarId {
        match self.node.op {
            Op::Var(id) => id,
            _ => unreachable!(),
        }
    }

    pub fn size(&self) -> usize {
        1
    }
}

/// Vector decision variable of dimension `n`.
#[derive(Clone)]
pub struct VectorVar {
    node: NodeRef,
}

impl VectorVar {
    pub fn new(n: usize) -> Self {
        assert!(n > 0, "vector variable of null size");
        let id = fresh_id();
        Self {
            node: node(ValueKind::Vector(n), true, Op::Var(id)),
        }
    }

    pub fn id(&self) -> VarId {
        match self.node.op {
            Op::Var(id) => id,
            _ => unreachable!(),
        }
    }

    pub fn size(&self) -> usize {
        self.node.kind.size()
    }

    /// Scalar component `i`.
    pub fn at(&self, i: usize) -> ScalarExpr {
        VectorExpr(self.node.clone()).at(i)
    }

    /// Sub-vector from component `i` to `j`, both included.
    pub fn subvector(&self, i: usize, j: usize) -> VectorExpr {
        VectorExpr(self.node.clone()).subvector(i, j)
    }
}

/// Matrix decision variable of shape `(r, c)`.
#[derive(Clone)]
pub struct MatrixVar {
    node: NodeRef,
}

impl MatrixVar {
    pub fn new(r: usize, c: usize) -> Self {
        assert!(r > 0 && c > 0, "matrix variable of null size");
        let id = fresh_id();
        Self {
            node: node(ValueKind::Matrix(r, c), true, Op::Var(id)),
        }
    }

    pub fn id(&self) -> VarId {
        match self.node.op {
            Op::Var(id) => id,
            _ => unreachable!(),
        }
    }

    pub fn size(&self) -> usize {
        self.node.kind.size()
    }

    pub fn shape(&self) -> (usize, usize) {
        match self.node.kind {
            ValueKind::Matrix(r, c) => (r, c),
            _ => unreachable!(),
        }
    }

    /// Scalar entry `(i, j)`.
    pub fn at(&self, i: usize, j: usize) -> ScalarExpr {
        MatrixExpr(self.node.clone()).at(i, j)
    }
}

/// Erased variable view used in function argument lists.
pub trait VarLike {
    fn var_id(&self) -> VarId;
    fn var_kind(&self) -> ValueKind;
}

impl VarLike for ScalarVar {
    fn var_id(&self) -> VarId {
        self.id()
    }
    fn var_kind(&self) -> ValueKind {
        ValueKind::Scalar
    }
}

impl VarLike for VectorVar {
    fn var_id(&self) -> VarId {
        self.id()
    }
    fn var_kind(&self) -> ValueKind {
        self.node.kind
    }
}

impl VarLike for MatrixVar {
    fn var_id(&self) -> VarId {
        self.id()
    }
    fn var_kind(&self) -> ValueKind {
        self.node.kind
    }
}

// --- Typed expression wrappers ---

#[derive(Clone)]
pub struct ScalarExpr(pub NodeRef);

#[derive(Clone)]
pub struct VectorExpr(pub NodeRef);

#[derive(Clone)]
pub struct MatrixExpr(pub NodeRef);

impl ScalarExpr {
    pub fn node(&self) -> &NodeRef {
        &self.0
    }
}

impl VectorExpr {
    pub fn node(&self) -> &NodeRef {
        &self.0
    }

    pub fn size(&self) -> usize {
        self.0.kind.size()
    }

    pub fn at(&self, i: usize) -> ScalarExpr {
        assert!(i < self.size(), "component index out of range");
        ScalarExpr(node(ValueKind::Scalar, self.0.has_vars, Op::Component(self.0.clone(), i)))
    }

    pub fn subvector(&self, i: usize, j: usize) -> VectorExpr {
        assert!(i <= j && j < self.size(), "invalid sub-vector range");
        VectorExpr(node(
            ValueKind::Vector(j - i + 1),
            self.0.has_vars,
            Op::Subvector(self.0.clone(), i, j),
        ))
    }
}

impl MatrixExpr {
    pub fn node(&self) -> &NodeRef {
        &self.0
    }

    pub fn shape(&self) -> (usize, usize) {
        match self.0.kind {
            ValueKind::Matrix(r, c) => (r, c),
            _ => unreachable!(),
        }
    }

    pub fn at(&self, i: usize, j: usize) -> ScalarExpr {
        let (r, c) = self.shape();
        assert!(i < r && j < c, "matrix entry out of range");
        ScalarExpr(node(ValueKind::Scalar, self.0.has_vars, Op::MatComponent(self.0.clone(), i, j)))
    }
}

// --- Conversions into expressions ---

impl From<&ScalarVar> for ScalarExpr {
    fn from(v: &ScalarVar) -> Self {
        ScalarExpr(v.node.clone())
    }
}

impl From<ScalarVar> for ScalarExpr {
    fn from(v: ScalarVar) -> Self {
        ScalarExpr(v.node)
    }
}

impl From<f64> for ScalarExpr {
    fn from(x: f64) -> Self {
        ScalarExpr(node(ValueKind::Scalar, false, Op::ConstScalar(Interval::point(x))))
    }
}

impl From<i32> for ScalarExpr {
    fn from(x: i32) -> Self {
        (x as f64).into()
    }
}

impl From<Interval> for ScalarExpr {
    fn from(x: Interval) -> Self {
        ScalarExpr(node(ValueKind::Scalar, false, Op::ConstScalar(x)))
    }
}

impl From<&VectorVar> for VectorExpr {
    fn from(v: &VectorVar) -> Self {
        VectorExpr(v.node.clone())
    }
}

impl From<VectorVar> for VectorExpr {
    fn from(v: VectorVar) -> Self {
        VectorExpr(v.node)
    }
}

impl From<IntervalVector> for VectorExpr {
    fn from(v: IntervalVector) -> Self {
        let n = v.len();
        VectorExpr(node(ValueKind::Vector(n), false, Op::ConstVector(v)))
    }
}

impl From<Vector> for VectorExpr {
    fn from(v: Vector) -> Self {
        vector_hull(&v).into()
    }
}

impl From<&MatrixVar> for MatrixExpr {
    fn from(v: &MatrixVar) -> Self {
        MatrixExpr(v.node.clone())
    }
}

impl From<IntervalMatrix> for MatrixExpr {
    fn from(m: IntervalMatrix) -> Self {
        let k = ValueKind::Matrix(m.nrows(), m.ncols());
        MatrixExpr(node(k, false, Op::ConstMatrix(m)))
    }
}

impl From<Matrix> for MatrixExpr {
    fn from(m: Matrix) -> Self {
        matrix_hull(&m).into()
    }
}

// --- Scalar operator overloads ---

fn scalar_binary(op: fn(NodeRef, NodeRef) -> Op, a: ScalarExpr, b: ScalarExpr) -> ScalarExpr {
    let has_vars = a.0.has_vars || b.0.has_vars;
    ScalarExpr(node(ValueKind::Scalar, has_vars, op(a.0, b.0)))
}

// One concrete impl per operand pair keeps trait resolution unambiguous
// alongside the mixed scalar/vector/matrix products below.
macro_rules! scalar_binop_impl {
    ($Trait:ident, $method:ident, $variant:ident, $Lhs:ty, $Rhs:ty) => {
        impl std::ops::$Trait<$Rhs> for $Lhs {
            type Output = ScalarExpr;
            fn $method(self, rhs: $Rhs) -> ScalarExpr {
                scalar_binary(Op::$variant, self.into(), rhs.into())
            }
        }
    };
}

macro_rules! scalar_binop {
    ($Trait:ident, $method:ident, $variant:ident) => {
        scalar_binop_impl!($Trait, $method, $variant, ScalarExpr, ScalarExpr);
        scalar_binop_impl!($Trait, $method, $variant, ScalarExpr, &ScalarVar);
        scalar_binop_impl!($Trait, $method, $variant, ScalarExpr, f64);
        scalar_binop_impl!($Trait, $method, $variant, ScalarExpr, i32);
        scalar_binop_impl!($Trait, $method, $variant, ScalarExpr, Interval);
        scalar_binop_impl!($Trait, $method, $variant, &ScalarVar, ScalarExpr);
        scalar_binop_impl!($Trait, $method, $variant, &ScalarVar, &ScalarVar);
        scalar_binop_impl!($Trait, $method, $variant, &ScalarVar, f64);
        scalar_binop_impl!($Trait, $method, $variant, &ScalarVar, i32);
        scalar_binop_impl!($Trait, $method, $variant, &ScalarVar, Interval);
        scalar_binop_impl!($Trait, $method, $variant, f64, ScalarExpr);
        scalar_binop_impl!($Trait, $method, $variant, f64, &ScalarVar);
        scalar_binop_impl!($Trait, $method, $variant, Interval, ScalarExpr);
        scalar_binop_impl!($Trait, $method, $variant, Interval, &ScalarVar);
    };
}

scalar_binop!(Add, add, Add);
scalar_binop!(Sub, sub, Sub);
scalar_binop!(Mul, mul, Mul);
scalar_binop!(Div, div, Div);

impl std::ops::Neg for ScalarExpr {
    type Output = ScalarExpr;
    fn neg(self) -> ScalarExpr {
        let has_vars = self.0.has_vars;
        ScalarExpr(node(ValueKind::Scalar, has_vars, Op::Neg(self.0)))
    }
}

impl std::ops::Neg for &ScalarVar {
    type Output = ScalarExpr;
    fn neg(self) -> ScalarExpr {
        -ScalarExpr::from(self)
    }
}

// --- Vector operator overloads ---

fn vector_binary(op: fn(NodeRef, NodeRef) -> Op, a: VectorExpr, b: VectorExpr) -> VectorExpr {
    assert_eq!(a.size(), b.size(), "vector size mismatch");
    let kind = a.0.kind;
    let has_vars = a.0.has_vars || b.0.has_vars;
    VectorExpr(node(kind, has_vars, op(a.0, b.0)))
}

macro_rules! vector_addsub_impl {
    ($Trait:ident, $method:ident, $variant:ident, $Lhs:ty, $Rhs:ty) => {
        impl std::ops::$Trait<$Rhs> for $Lhs {
            type Output = VectorExpr;
            fn $method(self, rhs: $Rhs) -> VectorExpr {
                vector_binary(Op::$variant, self.into(), rhs.into())
            }
        }
    };
}

macro_rules! vector_addsub {
    ($Trait:ident, $method:ident, $variant:ident) => {
        vector_addsub_impl!($Trait, $method, $variant, VectorExpr, VectorExpr);
        vector_addsub_impl!($Trait, $method, $variant, VectorExpr, &VectorVar);
        vector_addsub_impl!($Trait, $method, $variant, VectorExpr, IntervalVector);
        vector_addsub_impl!($Trait, $method, $variant, VectorExpr, Vector);
        vector_addsub_impl!($Trait, $method, $variant, &VectorVar, VectorExpr);
        vector_addsub_impl!($Trait, $method, $variant, &VectorVar, &VectorVar);
        vector_addsub_impl!($Trait, $method, $variant, &VectorVar, IntervalVector);
        vector_addsub_impl!($Trait, $method, $variant, &VectorVar, Vector);
    };
}

vector_addsub!(Add, add, Add);
vector_addsub!(Sub, sub, Sub);

impl std::ops::Neg for VectorExpr {
    type Output = VectorExpr;
    fn neg(self) -> VectorExpr {
        let kind = self.0.kind;
        let has_vars = self.0.has_vars;
        VectorExpr(node(kind, has_vars, Op::Neg(self.0)))
    }
}

impl std::ops::Neg for &VectorVar {
    type Output = VectorExpr;
    fn neg(self) -> VectorExpr {
        -VectorExpr::from(self)
    }
}

/// Scalar–vector scaling, normalized to `Mul(scalar, vector)`.
fn scale_vector(s: ScalarExpr, v: VectorExpr) -> VectorExpr {
    let kind = v.0.kind;
    let has_vars = s.0.has_vars || v.0.has_vars;
    VectorExpr(node(kind, has_vars, Op::Mul(s.0, v.0)))
}

macro_rules! scalar_times_vector {
    ($($lhs:ty),*) => {$(
        impl std::ops::Mul<VectorExpr> for $lhs {
            type Output = VectorExpr;
            fn mul(self, rhs: VectorExpr) -> VectorExpr {
                scale_vector(self.into(), rhs)
            }
        }

        impl std::ops::Mul<&VectorVar> for $lhs {
            type Output = VectorExpr;
            fn mul(self, rhs: &VectorVar) -> VectorExpr {
                scale_vector(self.into(), rhs.into())
            }
        }
    )*};
}

scalar_times_vector!(f64, Interval, ScalarExpr);

impl std::ops::Mul<VectorExpr> for &ScalarVar {
    type Output = VectorExpr;
    fn mul(self, rhs: VectorExpr) -> VectorExpr {
        scale_vector(self.into(), rhs)
    }
}

impl std::ops::Mul<ScalarExpr> for VectorExpr {
    type Output = VectorExpr;
    fn mul(self, rhs: ScalarExpr) -> VectorExpr {
        scale_vector(rhs, self)
    }
}

impl std::ops::Div<ScalarExpr> for VectorExpr {
    type Output = VectorExpr;
    fn div(self, rhs: ScalarExpr) -> VectorExpr {
        let kind = self.0.kind;
        let has_vars = self.0.has_vars || rhs.0.has_vars;
        VectorExpr(node(kind, has_vars, Op::Div(self.0, rhs.0)))
    }
}

impl std::ops::Div<f64> for VectorExpr {
    type Output = VectorExpr;
    fn div(self, rhs: f64) -> VectorExpr {
        self / ScalarExpr::from(rhs)
    }
}

// --- Matrix products ---

fn matvec(m: MatrixExpr, v: VectorExpr) -> VectorExpr {
    let (r, c) = m.shape();
    assert_eq!(c, v.size(), "matrix-vector size mismatch");
    let has_vars = m.0.has_vars || v.0.has_vars;
    VectorExpr(node(ValueKind::Vector(r), has_vars, Op::Mul(m.0, v.0)))
}

impl std::ops::Mul<VectorExpr> for MatrixExpr {
    type Output = VectorExpr;
    fn mul(self, rhs: VectorExpr) -> VectorExpr {
        matvec(self, rhs)
    }
}

impl std::ops::Mul<&VectorVar> for MatrixExpr {
    type Output = VectorExpr;
    fn mul(self, rhs: &VectorVar) -> VectorExpr {
        matvec(self, rhs.into())
    }
}

impl std::ops::Mul<&VectorVar> for &MatrixVar {
    type Output = VectorExpr;
    fn mul(self, rhs: &VectorVar) -> VectorExpr {
        matvec(self.into(), rhs.into())
    }
}

impl std::ops::Mul<VectorExpr> for &MatrixVar {
    type Output = VectorExpr;
    fn mul(self, rhs: VectorExpr) -> VectorExpr {
        matvec(self.into(), rhs)
    }
}

/// Matrix–matrix product.
pub fn matmul(a: impl Into<MatrixExpr>, b: impl Into<MatrixExpr>) -> MatrixExpr {
    let a = a.into();
    let b = b.into();
    let (ra, ca) = a.shape();
    let (rb, cb) = b.shape();
    assert_eq!(ca, rb, "matrix product size mismatch");
    let has_vars = a.0.has_vars || b.0.has_vars;
    MatrixExpr(node(ValueKind::Matrix(ra, cb), has_vars, Op::Mul(a.0, b.0)))
}

// --- Free operator functions ---

macro_rules! scalar_unary_fn {
    ($($name:ident $variant:ident,)*) => {$(
        pub fn $name(x: impl Into<ScalarExpr>) -> ScalarExpr {
            let x = x.into();
            let has_vars = x.0.has_vars;
            ScalarExpr(node(ValueKind::Scalar, has_vars, Op::$variant(x.0)))
        }
    )*};
}

scalar_unary_fn! {
    sqr Sqr,
    sqrt Sqrt,
    exp Exp,
    log Log,
    cos Cos,
    sin Sin,
    tan Tan,
    acos Acos,
    asin Asin,
    atan Atan,
    cosh Cosh,
    sinh Sinh,
    tanh Tanh,
    acosh Acosh,
    asinh Asinh,
    atanh Atanh,
    abs Abs,
    sign Sign,
    floor Floor,
    ceil Ceil,
}

pub fn pow(x: impl Into<ScalarExpr>, p: impl Into<ScalarExpr>) -> ScalarExpr {
    let x = x.into();
    let p = p.into();
    scalar_binary(Op::Pow, x, p)
}

pub fn root(x: impl Into<ScalarExpr>, n: i32) -> ScalarExpr {
    let x = x.into();
    let has_vars = x.0.has_vars;
    ScalarExpr(node(ValueKind::Scalar, has_vars, Op::Root(x.0, n)))
}

pub fn atan2(y: impl Into<ScalarExpr>, x: impl Into<ScalarExpr>) -> ScalarExpr {
    scalar_binary(Op::Atan2, y.into(), x.into())
}

pub fn min(a: impl Into<ScalarExpr>, b: impl Into<ScalarExpr>) -> ScalarExpr {
    scalar_binary(Op::Min, a.into(), b.into())
}

pub fn max(a: impl Into<ScalarExpr>, b: impl Into<ScalarExpr>) -> ScalarExpr {
    scalar_binary(Op::Max, a.into(), b.into())
}

/// Switch operator: `a` where `mask <= 0`, `b` where `mask > 0`.
pub fn chi(
    mask: impl Into<ScalarExpr>,
    a: impl Into<ScalarExpr>,
    b: impl Into<ScalarExpr>,
) -> ScalarExpr {
    let mask = mask.into();
    let a = a.into();
    let b = b.into();
    let has_vars = mask.0.has_vars || a.0.has_vars || b.0.has_vars;
    ScalarExpr(node(ValueKind::Scalar, has_vars, Op::Chi(mask.0, a.0, b.0)))
}

/// Conversion of heterogeneous component lists into `vec`/`mat` builders.
pub trait IntoScalarExprList {
    fn into_exprs(self) -> Vec<ScalarExpr>;
}

macro_rules! impl_into_scalar_list {
    ($(($($t:ident $i:tt),+))*) => {$(
        impl<$($t: Into<ScalarExpr>),+> IntoScalarExprList for ($($t,)+) {
            fn into_exprs(self) -> Vec<ScalarExpr> {
                vec![$(self.$i.into()),+]
            }
        }
    )*};
}

impl_into_scalar_list! {
    (A 0)
    (A 0, B 1)
    (A 0, B 1, C 2)
    (A 0, B 1, C 2, D 3)
    (A 0, B 1, C 2, D 3, E 4)
    (A 0, B 1, C 2, D 3, E 4, F 5)
}

/// Vector expression from scalar components: `vec((x, y, z))`.
pub fn vec(components: impl IntoScalarExprList) -> VectorExpr {
    let comps = components.into_exprs();
    assert!(!comps.is_empty(), "vec of no component");
    let n = comps.len();
    let has_vars = comps.iter().any(|c| c.0.has_vars);
    let nodes = comps.into_iter().map(|c| c.0).collect();
    VectorExpr(node(ValueKind::Vector(n), has_vars, Op::VecOf(nodes)))
}

/// Concatenation of two vector expressions.
pub fn extend(a: impl Into<VectorExpr>, b: impl Into<VectorExpr>) -> VectorExpr {
    let a = a.into();
    let b = b.into();
    let n = a.size() + b.size();
    let has_vars = a.0.has_vars || b.0.has_vars;
    VectorExpr(node(ValueKind::Vector(n), has_vars, Op::Extend(a.0, b.0)))
}

/// Matrix expression from column vectors of equal size.
pub fn mat(columns: Vec<VectorExpr>) -> MatrixExpr {
    assert!(!columns.is_empty(), "mat of no column");
    let r = columns[0].size();
    assert!(columns.iter().all(|c| c.size() == r), "mat of ragged columns");
    let c = columns.len();
    let has_vars = columns.iter().any(|col| col.0.has_vars);
    let nodes = columns.into_iter().map(|col| col.0).collect();
    MatrixExpr(node(ValueKind::Matrix(r, c), has_vars, Op::MatOf(nodes)))
}

/// Determinant of a square matrix expression (supported up to 3x3).
pub fn det(m: impl Into<MatrixExpr>) -> ScalarExpr {
    let m = m.into();
    let (r, c) = m.shape();
    assert!(r == c && r <= 3, "determinant restricted to square matrices up to 3x3");
    let has_vars = m.0.has_vars;
    ScalarExpr(node(ValueKind::Scalar, has_vars, Op::Det(m.0)))
}

/// Cross product of two 3-vectors.
pub fn cross(a: impl Into<VectorExpr>, b: impl Into<VectorExpr>) -> VectorExpr {
    let a = a.into();
    let b = b.into();
    assert!(a.size() == 3 && b.size() == 3, "cross product of non 3-vectors");
    let has_vars = a.0.has_vars || b.0.has_vars;
    VectorExpr(node(ValueKind::Vector(3), has_vars, Op::Cross(a.0, b.0)))
}

pub fn transpose(m: impl Into<MatrixExpr>) -> MatrixExpr {
    let m = m.into();
    let (r, c) = m.shape();
    let has_vars = m.0.has_vars;
    MatrixExpr(node(ValueKind::Matrix(c, r), has_vars, Op::Transpose(m.0)))
}

/// Column-major flattening of a matrix into a vector.
pub fn flatten(m: impl Into<MatrixExpr>) -> VectorExpr {
    let m = m.into();
    let (r, c) = m.shape();
    let has_vars = m.0.has_vars;
    VectorExpr(node(ValueKind::Vector(r * c), has_vars, Op::Flatten(m.0)))
}

/// Trajectory evaluated at a scalar time expression.
pub fn traj_at(tr: Rc<dyn TrajFn>, t: impl Into<ScalarExpr>) -> ExprValue {
    let t = t.into();
    let kind = tr.traj_kind();
    let has_vars = t.0.has_vars;
    let n = node(kind, has_vars, Op::Traj(tr, t.0));
    match kind {
        ValueKind::Scalar => ExprValue::Scalar(ScalarExpr(n)),
        ValueKind::Vector(_) => ExprValue::Vector(VectorExpr(n)),
        ValueKind::Matrix(..) => panic!("matrix trajectories are not supported"),
    }
}

/// An expression of any kind, used for function composition arguments.
#[derive(Clone)]
pub enum ExprValue {
    Scalar(ScalarExpr),
    Vector(VectorExpr),
    Matrix(MatrixExpr),
}

impl ExprValue {
    pub fn node(&self) -> &NodeRef {
        match self {
            ExprValue::Scalar(e) => &e.0,
            ExprValue::Vector(e) => &e.0,
            ExprValue::Matrix(e) => &e.0,
        }
    }

    pub fn kind(&self) -> ValueKind {
        self.node().kind
    }

    pub fn into_scalar(self) -> ScalarExpr {
        match self {
            ExprValue::Scalar(e) => e,
            _ => panic!("scalar expression expected"),
        }
    }

    pub fn into_vector(self) -> VectorExpr {
        match self {
            ExprValue::Vector(e) => e,
            _ => panic!("vector expression expected"),
        }
    }
}

macro_rules! into_expr_value {
    ($($t:ty => $variant:ident / $inner:ty,)*) => {$(
        impl From<$t> for ExprValue {
            fn from(x: $t) -> Self {
                ExprValue::$variant(<$inner>::from(x))
            }
        }
    )*};
}

into_expr_value! {
    ScalarExpr => Scalar / ScalarExpr,
    &ScalarVar => Scalar / ScalarExpr,
    f64 => Scalar / ScalarExpr,
    Interval => Scalar / ScalarExpr,
    VectorExpr => Vector / VectorExpr,
    &VectorVar => Vector / VectorExpr,
    IntervalVector => Vector / VectorExpr,
    Vector => Vector / VectorExpr,
    MatrixExpr => Matrix / MatrixExpr,
    &MatrixVar => Matrix / MatrixExpr,
    IntervalMatrix => Matrix / MatrixExpr,
    Matrix => Matrix / MatrixExpr,
}

/// Deep copy of `root` with variables substituted by the given expression
/// nodes. Sharing is preserved through the memo table, so a shared sub-DAG
/// stays shared in the rewritten graph.
pub fn substitute(
    root: &NodeRef,
    bindings: &HashMap<VarId, NodeRef>,
    memo: &mut HashMap<ExprId, NodeRef>,
) -> NodeRef {
    if let Some(done) = memo.get(&root.id) {
        return done.clone();
    }
    let out = match &root.op {
        Op::Var(id) => match bindings.get(id) {
            Some(n) => {
                assert_eq!(n.kind, root.kind, "composition argument of wrong kind");
                n.clone()
            }
            None => root.clone(),
        },
        Op::ConstScalar(_) | Op::ConstVector(_) | Op::ConstMatrix(_) => root.clone(),
        op => {
            let sub = |n: &NodeRef, memo: &mut HashMap<ExprId, NodeRef>| substitute(n, bindings, memo);
            let new_op = match op {
                Op::Add(a, b) => Op::Add(sub(a, memo), sub(b, memo)),
                Op::Sub(a, b) => Op::Sub(sub(a, memo), sub(b, memo)),
                Op::Neg(a) => Op::Neg(sub(a, memo)),
                Op::Mul(a, b) => Op::Mul(sub(a, memo), sub(b, memo)),
                Op::Div(a, b) => Op::Div(sub(a, memo), sub(b, memo)),
                Op::Sqr(a) => Op::Sqr(sub(a, memo)),
                Op::Sqrt(a) => Op::Sqrt(sub(a, memo)),
                Op::Pow(a, b) => Op::Pow(sub(a, memo), sub(b, memo)),
                Op::Root(a, n) => Op::Root(sub(a, memo), *n),
                Op::Exp(a) => Op::Exp(sub(a, memo)),
                Op::Log(a) => Op::Log(sub(a, memo)),
                Op::Cos(a) => Op::Cos(sub(a, memo)),
                Op::Sin(a) => Op::Sin(sub(a, memo)),
                Op::Tan(a) => Op::Tan(sub(a, memo)),
                Op::Acos(a) => Op::Acos(sub(a, memo)),
                Op::Asin(a) => Op::Asin(sub(a, memo)),
                Op::Atan(a) => Op::Atan(sub(a, memo)),
                Op::Atan2(a, b) => Op::Atan2(sub(a, memo), sub(b, memo)),
                Op::Cosh(a) => Op::Cosh(sub(a, memo)),
                Op::Sinh(a) => Op::Sinh(sub(a, memo)),
                Op::Tanh(a) => Op::Tanh(sub(a, memo)),
                Op::Acosh(a) => Op::Acosh(sub(a, memo)),
                Op::Asinh(a) => Op::Asinh(sub(a, memo)),
                Op::Atanh(a) => Op::Atanh(sub(a, memo)),
                Op::Abs(a) => Op::Abs(sub(a, memo)),
                Op::Sign(a) => Op::Sign(sub(a, memo)),
                Op::Floor(a) => Op::Floor(sub(a, memo)),
                Op::Ceil(a) => Op::Ceil(sub(a, memo)),
                Op::Min(a, b) => Op::Min(sub(a, memo), sub(b, memo)),
                Op::Max(a, b) => Op::Max(sub(a, memo), sub(b, memo)),
                Op::Chi(a, b, c) => Op::Chi(sub(a, memo), sub(b, memo), sub(c, memo)),
                Op::Component(a, i) => Op::Component(sub(a, memo), *i),
                Op::MatComponent(a, i, j) => Op::MatComponent(sub(a, memo), *i, *j),
                Op::Subvector(a, i, j) => Op::Subvector(sub(a, memo), *i, *j),
                Op::VecOf(v) => Op::VecOf(v.iter().map(|n| sub(n, memo)).collect()),
                Op::Extend(a, b) => Op::Extend(sub(a, memo), sub(b, memo)),
                Op::MatOf(v) => Op::MatOf(v.iter().map(|n| sub(n, memo)).collect()),
                Op::Det(a) => Op::Det(sub(a, memo)),
                Op::Cross(a, b) => Op::Cross(sub(a, memo), sub(b, memo)),
                Op::Transpose(a) => Op::Transpose(sub(a, memo)),
                Op::Flatten(a) => Op::Flatten(sub(a, memo)),
                Op::Traj(tr, a) => Op::Traj(tr.clone(), sub(a, memo)),
                Op::Var(_) | Op::ConstScalar(_) | Op::ConstVector(_) | Op::ConstMatrix(_) => {
                    unreachable!()
                }
            };
            let has_vars = op_children(&new_op).iter().any(|c| c.has_vars);
            node(root.kind, has_vars, new_op)
        }
    };
    memo.insert(root.id, out.clone());
    out
}
