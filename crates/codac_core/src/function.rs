//! Analytic functions over expression graphs: natural, centered and default
//! interval evaluation, reverse-mode backward contraction, differentiation.
//!
//! Evaluation state lives in a per-call map keyed by node id, so the
//! immutable DAG needs no interior mutability and shared sub-expressions
//! are evaluated exactly once per call.

use crate::expr::{
    op_children, ExprId, ExprValue, NodeRef, Op, ScalarExpr, Value, ValueKind, VarId, VarLike,
    VectorExpr, MatrixExpr, ScalarVar, VectorVar, MatrixVar, substitute,
};
use crate::interval::boxes::{IntervalMatrix, IntervalVector, Matrix, Vector};
use crate::interval::{self as iv, bwd as ibwd, Interval};
use std::collections::HashMap;
use std::marker::PhantomData;

/// Evaluation mode of an analytic function.
///
/// `Default` intersects the natural and centered forms when the centered
/// model is available and falls back to the natural form otherwise.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum EvalMode {
    Natural,
    Centered,
    Default,
}

/// Cached per-node evaluation result: midpoint model `m`, natural hull `a`,
/// Jacobian `da` w.r.t. the flattened inputs (when the centered form is
/// available) and the definition-domain flag.
#[derive(Clone)]
pub(crate) struct Valuation {
    pub m: Value,
    pub a: Value,
    pub da: Option<IntervalMatrix>,
    pub def_domain: bool,
}

pub(crate) type ValuesMap = HashMap<ExprId, Valuation>;

fn empty_value(kind: ValueKind) -> Value {
    match kind {
        ValueKind::Scalar => Value::Scalar(Interval::EMPTY),
        ValueKind::Vector(n) => Value::Vector(IntervalVector::from_element(n, Interval::EMPTY)),
        ValueKind::Matrix(r, c) => {
            Value::Matrix(IntervalMatrix::from_element(r, c, Interval::EMPTY))
        }
    }
}

fn mat_scale(m: &IntervalMatrix, s: Interval) -> IntervalMatrix {
    m.map(|e| e * s)
}

// --- Output kinds ---

pub struct ScalarType;
pub struct VectorType;
pub struct MatrixType;

/// Output kind of an [`AnalyticFunction`], mapping node kinds to concrete
/// domain types.
pub trait ExprKind {
    type Domain: Clone + PartialEq + std::fmt::Debug;
    type Real;

    fn domain_from_value(v: Value) -> Self::Domain;
    fn value_from_domain(d: &Self::Domain) -> Value;
    fn empty_domain(kind: ValueKind) -> Self::Domain;
    fn mid_of(d: &Self::Domain) -> Self::Real;
}

impl ExprKind for ScalarType {
    type Domain = Interval;
    type Real = f64;

    fn domain_from_value(v: Value) -> Interval {
        v.scalar()
    }

    fn value_from_domain(d: &Interval) -> Value {
        Value::Scalar(*d)
    }

    fn empty_domain(_: ValueKind) -> Interval {
        Interval::EMPTY
    }

    fn mid_of(d: &Interval) -> f64 {
        d.mid()
    }
}

impl ExprKind for VectorType {
    type Domain = IntervalVector;
    type Real = Vector;

    fn domain_from_value(v: Value) -> IntervalVector {
        match v {
            Value::Vector(x) => x,
            _ => panic!("vector output expected"),
        }
    }

    fn value_from_domain(d: &IntervalVector) -> Value {
        Value::Vector(d.clone())
    }

    fn empty_domain(kind: ValueKind) -> IntervalVector {
        IntervalVector::from_element(kind.size(), Interval::EMPTY)
    }

    fn mid_of(d: &IntervalVector) -> Vector {
        Vector::from_iterator(d.len(), d.iter().map(|c| c.mid()))
    }
}

impl ExprKind for MatrixType {
    type Domain = IntervalMatrix;
    type Real = Matrix;

    fn domain_from_value(v: Value) -> IntervalMatrix {
        match v {
            Value::Matrix(x) => x,
            _ => panic!("matrix output expected"),
        }
    }

    fn value_from_domain(d: &IntervalMatrix) -> Value {
        Value::Matrix(d.clone())
    }

    fn empty_domain(kind: ValueKind) -> IntervalMatrix {
        match kind {
            ValueKind::Matrix(r, c) => IntervalMatrix::from_element(r, c, Interval::EMPTY),
            _ => panic!("matrix kind expected"),
        }
    }

    fn mid_of(d: &IntervalMatrix) -> Matrix {
        Matrix::from_iterator(d.nrows(), d.ncols(), d.iter().map(|c| c.mid()))
    }
}

/// Expressions usable as a function body, determining the function's output
/// kind.
pub trait FunctionExpr {
    type Kind: ExprKind;
    fn into_node(self) -> NodeRef;
}

impl FunctionExpr for ScalarExpr {
    type Kind = ScalarType;
    fn into_node(self) -> NodeRef {
        self.0
    }
}

impl FunctionExpr for &ScalarVar {
    type Kind = ScalarType;
    fn into_node(self) -> NodeRef {
        ScalarExpr::from(self).0
    }
}

impl FunctionExpr for f64 {
    type Kind = ScalarType;
    fn into_node(self) -> NodeRef {
        ScalarExpr::from(self).0
    }
}

impl FunctionExpr for i32 {
    type Kind = ScalarType;
    fn into_node(self) -> NodeRef {
        ScalarExpr::from(self).0
    }
}

impl FunctionExpr for Interval {
    type Kind = ScalarType;
    fn into_node(self) -> NodeRef {
        ScalarExpr::from(self).0
    }
}

impl FunctionExpr for VectorExpr {
    type Kind = VectorType;
    fn into_node(self) -> NodeRef {
        self.0
    }
}

impl FunctionExpr for &VectorVar {
    type Kind = VectorType;
    fn into_node(self) -> NodeRef {
        VectorExpr::from(self).0
    }
}

impl FunctionExpr for IntervalVector {
    type Kind = VectorType;
    fn into_node(self) -> NodeRef {
        VectorExpr::from(self).0
    }
}

impl FunctionExpr for Vector {
    type Kind = VectorType;
    fn into_node(self) -> NodeRef {
        VectorExpr::from(self).0
    }
}

impl FunctionExpr for MatrixExpr {
    type Kind = MatrixType;
    fn into_node(self) -> NodeRef {
        self.0
    }
}

impl FunctionExpr for &MatrixVar {
    type Kind = MatrixType;
    fn into_node(self) -> NodeRef {
        MatrixExpr::from(self).0
    }
}

#[derive(Clone, Copy, Debug)]
struct ArgDecl {
    id: VarId,
    kind: ValueKind,
}

/// A function of interval arguments defined by an expression graph.
pub struct AnalyticFunction<T: ExprKind> {
    args: Vec<ArgDecl>,
    root: NodeRef,
    _kind: PhantomData<T>,
}

impl<T: ExprKind> Clone for AnalyticFunction<T> {
    fn clone(&self) -> Self {
        Self {
            args: self.args.clone(),
            root: self.root.clone(),
            _kind: PhantomData,
        }
    }
}

impl<T: ExprKind> AnalyticFunction<T> {
    /// Builds a function from an ordered argument list and a body
    /// expression. Panics if the body references a variable outside the
    /// argument list.
    pub fn new<E: FunctionExpr<Kind = T>>(args: &[&dyn VarLike], body: E) -> Self {
        let root = body.into_node();
        let args: Vec<ArgDecl> = args
            .iter()
            .map(|v| ArgDecl {
                id: v.var_id(),
                kind: v.var_kind(),
            })
            .collect();
        let mut referenced = Vec::new();
        root.collect_vars(&mut referenced);
        for id in &referenced {
            assert!(
                args.iter().any(|a| a.id == *id),
                "expression references a variable that is not a function argument"
            );
        }
        Self {
            args,
            root,
            _kind: PhantomData,
        }
    }

    /// Total number of scalar inputs.
    pub fn input_size(&self) -> usize {
        self.args.iter().map(|a| a.kind.size()).sum()
    }

    pub fn output_kind(&self) -> ValueKind {
        self.root.kind
    }

    pub(crate) fn arg_kinds(&self) -> Vec<ValueKind> {
        self.args.iter().map(|a| a.kind).collect()
    }

    pub fn output_size(&self) -> usize {
        self.root.kind.size()
    }

    pub(crate) fn root(&self) -> &NodeRef {
        &self.root
    }

    // Variable roots are stored under their variable id, not the node id.
    pub(crate) fn root_slot(&self) -> ExprId {
        match self.root.op {
            Op::Var(id) => var_slot(id),
            _ => self.root.id,
        }
    }

    fn check_args(&self, x: &[Value]) {
        assert!(
            x.len() == self.args.len(),
            "invalid arguments: wrong number of input arguments"
        );
        for (v, a) in x.iter().zip(self.args.iter()) {
            assert!(
                v.kind() == a.kind,
                "provided arguments do not match function inputs"
            );
        }
    }

    fn seed(&self, map: &mut ValuesMap, x: &[Value], natural: bool) {
        let total = self.input_size();
        let mut offset = 0;
        for (v, a) in x.iter().zip(self.args.iter()) {
            let size = a.kind.size();
            let da = if natural {
                None
            } else {
                Some(IntervalMatrix::from_fn(size, total, |r, c| {
                    if c == offset + r {
                        Interval::ONE
                    } else {
                        Interval::ZERO
                    }
                }))
            };
            map.insert(
                var_slot(a.id),
                Valuation {
                    m: v.mid_value(),
                    a: v.clone(),
                    da,
                    def_domain: true,
                },
            );
            offset += size;
        }
    }

    pub(crate) fn eval_valuations(&self, x: &[Value], natural: bool) -> ValuesMap {
        self.check_args(x);
        let mut map = ValuesMap::new();
        self.seed(&mut map, x, natural);
        fwd(&self.root, &mut map, self.input_size(), natural);
        map
    }

    /// Evaluation in an explicit mode.
    pub fn eval_mode(&self, mode: EvalMode, x: &[Value]) -> T::Domain {
        match mode {
            EvalMode::Natural => {
                let map = self.eval_valuations(x, true);
                T::domain_from_value(map[&self.root_slot()].a.clone())
            }
            EvalMode::Centered => {
                let map = self.eval_valuations(x, false);
                let v = &map[&self.root_slot()];
                if !v.def_domain {
                    return T::empty_domain(self.root.kind);
                }
                let da = v
                    .da
                    .as_ref()
                    .expect("centered form not available for this expression");
                T::domain_from_value(centered_enclosure(&v.m, da, x))
            }
            EvalMode::Default => {
                let map = self.eval_valuations(x, false);
                let v = &map[&self.root_slot()];
                match (&v.da, v.def_domain) {
                    (Some(da), true) => {
                        let c = centered_enclosure(&v.m, da, x);
                        T::domain_from_value(v.a.intersect(&c))
                    }
                    _ => T::domain_from_value(v.a.clone()),
                }
            }
        }
    }

    /// Default-mode evaluation.
    pub fn eval(&self, x: &[Value]) -> T::Domain {
        self.eval_mode(EvalMode::Default, x)
    }

    /// Midpoint of the default-mode evaluation.
    pub fn real_eval(&self, x: &[Value]) -> T::Real {
        T::mid_of(&self.eval(x))
    }

    /// Jacobian w.r.t. the flattened inputs, evaluated over the box.
    pub fn diff(&self, x: &[Value]) -> IntervalMatrix {
        let map = self.eval_valuations(x, false);
        let v = &map[&self.root_slot()];
        v.da
            .clone()
            .expect("centered form not available for this expression")
    }

    /// Composition: the function applied to sub-expressions, yielding a new
    /// expression with this function's variables substituted.
    pub fn call(&self, args: &[ExprValue]) -> ExprValue {
        assert!(
            args.len() == self.args.len(),
            "invalid arguments: wrong number of input arguments"
        );
        let mut bindings = HashMap::new();
        for (e, a) in args.iter().zip(self.args.iter()) {
            assert!(
                e.kind() == a.kind,
                "composition arguments do not match function inputs"
            );
            bindings.insert(a.id, e.node().clone());
        }
        let mut memo = HashMap::new();
        let out = substitute(&self.root, &bindings, &mut memo);
        match out.kind {
            ValueKind::Scalar => ExprValue::Scalar(ScalarExpr(out)),
            ValueKind::Vector(_) => ExprValue::Vector(VectorExpr(out)),
            ValueKind::Matrix(..) => ExprValue::Matrix(MatrixExpr(out)),
        }
    }

    /// Backward pass: intersects the root valuation with `y`, propagates
    /// through the DAG in reverse and returns the contracted argument
    /// values.
    pub(crate) fn backward(&self, map: &mut ValuesMap, y: &Value) -> Vec<Value> {
        {
            let root = map.get_mut(&self.root_slot()).expect("forward pass missing");
            root.a = root.a.intersect(y);
        }
        bwd(&self.root, map);
        self.args
            .iter()
            .map(|a| map[&var_slot(a.id)].a.clone())
            .collect()
    }
}

// Variables are stored in the valuation map under their variable id rather
// than a node id, so distinct leaf nodes of the same variable share one slot.
fn var_slot(id: VarId) -> ExprId {
    id
}

fn centered_enclosure(m: &Value, da: &IntervalMatrix, x: &[Value]) -> Value {
    let flat: Vec<Interval> = x.iter().flat_map(|v| v.components()).collect();
    let n = flat.len();
    assert!(da.ncols() == n, "input size mismatch with the Jacobian width");
    let dx = IntervalVector::from_iterator(n, flat.iter().map(|c| *c - Interval::point(c.mid())));
    let delta = da * dx;
    match m {
        Value::Scalar(mm) => Value::Scalar(*mm + delta[0]),
        Value::Vector(mv) => Value::Vector(IntervalVector::from_iterator(
            mv.len(),
            mv.iter().zip(delta.iter()).map(|(a, b)| *a + *b),
        )),
        Value::Matrix(_) => panic!("centered form not available for matrix expressions"),
    }
}

// --- Forward evaluation ---

fn fwd(node: &NodeRef, map: &mut ValuesMap, n_in: usize, natural: bool) {
    let slot = match node.op {
        Op::Var(id) => var_slot(id),
        _ => node.id,
    };
    if map.contains_key(&slot) {
        return;
    }
    for c in op_children(&node.op) {
        fwd(c, map, n_in, natural);
    }
    let v = eval_op(node, map, n_in, natural);
    map.insert(slot, v);
}

fn get<'a>(map: &'a ValuesMap, n: &NodeRef) -> &'a Valuation {
    let slot = match n.op {
        Op::Var(id) => var_slot(id),
        _ => n.id,
    };
    map.get(&slot)
        .expect("variable does not belong to the function arguments")
}

struct ScalarRule {
    a: Interval,
    m: Interval,
    /// Derivative factors w.r.t. each child, evaluated over the box.
    dk: Option<Vec<Interval>>,
    def: bool,
}

fn combine_scalar(children: &[&Valuation], rule: ScalarRule, n_in: usize, natural: bool) -> Valuation {
    let def = rule.def && children.iter().all(|c| c.def_domain);
    let da = if natural {
        None
    } else {
        match rule.dk {
            None => None,
            Some(ks) => {
                let mut acc: Option<IntervalMatrix> = None;
                for (k, c) in ks.iter().zip(children.iter()) {
                    match &c.da {
                        None => {
                            acc = None;
                            break;
                        }
                        Some(d) => {
                            let term = mat_scale(d, *k);
                            acc = Some(match acc {
                                None => term,
                                Some(t) => t + term,
                            });
                        }
                    }
                }
                // zero-ary case: constants have a null Jacobian
                if children.is_empty() {
                    acc = Some(IntervalMatrix::from_element(1, n_in, Interval::ZERO));
                }
                acc
            }
        }
    };
    Valuation {
        m: Value::Scalar(if natural { rule.a } else { rule.m }),
        a: Value::Scalar(rule.a),
        da,
        def_domain: def,
    }
}

fn unary_rule(
    c: &Valuation,
    f: impl Fn(Interval) -> Interval,
    dk: Option<Interval>,
    def: bool,
) -> ScalarRule {
    ScalarRule {
        a: f(c.a.scalar()),
        m: f(c.m.scalar()),
        dk: dk.map(|k| vec![k]),
        def,
    }
}

fn binary_rule(
    c1: &Valuation,
    c2: &Valuation,
    f: impl Fn(Interval, Interval) -> Interval,
    dk: Option<(Interval, Interval)>,
    def: bool,
) -> ScalarRule {
    ScalarRule {
        a: f(c1.a.scalar(), c2.a.scalar()),
        m: f(c1.m.scalar(), c2.m.scalar()),
        dk: dk.map(|(k1, k2)| vec![k1, k2]),
        def,
    }
}

fn vector_map2(
    c1: &Valuation,
    c2: &Valuation,
    f: impl Fn(Interval, Interval) -> Interval,
    da: Option<IntervalMatrix>,
    natural: bool,
) -> Valuation {
    let a1 = c1.a.vector();
    let a2 = c2.a.vector();
    let a = IntervalVector::from_iterator(a1.len(), a1.iter().zip(a2.iter()).map(|(x, y)| f(*x, *y)));
    let m = if natural {
        a.clone()
    } else {
        let m1 = c1.m.vector();
        let m2 = c2.m.vector();
        IntervalVector::from_iterator(m1.len(), m1.iter().zip(m2.iter()).map(|(x, y)| f(*x, *y)))
    };
    Valuation {
        m: Value::Vector(m),
        a: Value::Vector(a),
        da: if natural { None } else { da },
        def_domain: c1.def_domain && c2.def_domain,
    }
}

fn eval_op(node: &NodeRef, map: &ValuesMap, n_in: usize, natural: bool) -> Valuation {
    match &node.op {
        Op::Var(_) => panic!("variable does not belong to the function arguments"),

        // A constant keeps its full interval in the midpoint model: its
        // uncertainty does not depend on the inputs.
        Op::ConstScalar(x) => combine_scalar(
            &[],
            ScalarRule {
                a: *x,
                m: *x,
                dk: Some(vec![]),
                def: true,
            },
            n_in,
            natural,
        ),

        Op::ConstVector(v) => Valuation {
            m: Value::Vector(v.clone()),
            a: Value::Vector(v.clone()),
            da: if natural {
                None
            } else {
                Some(IntervalMatrix::from_element(v.len(), n_in, Interval::ZERO))
            },
            def_domain: true,
        },

        Op::ConstMatrix(m) => Valuation {
            m: Value::Matrix(m.clone()),
            a: Value::Matrix(m.clone()),
            da: None,
            def_domain: true,
        },

        Op::Add(a, b) => {
            let c1 = get(map, a);
            let c2 = get(map, b);
            match node.kind {
                ValueKind::Scalar => combine_scalar(
                    &[c1, c2],
                    binary_rule(c1, c2, |x, y| x + y, Some((Interval::ONE, Interval::ONE)), true),
                    n_in,
                    natural,
                ),
                ValueKind::Vector(_) => {
                    let da = match (&c1.da, &c2.da) {
                        (Some(d1), Some(d2)) => Some(d1 + d2),
                        _ => None,
                    };
                    vector_map2(c1, c2, |x, y| x + y, da, natural)
                }
                ValueKind::Matrix(..) => Valuation {
                    m: Value::Matrix(c1.m.matrix() + c2.m.matrix()),
                    a: Value::Matrix(c1.a.matrix() + c2.a.matrix()),
                    da: None,
                    def_domain: c1.def_domain && c2.def_domain,
                },
            }
        }

        Op::Sub(a, b) => {
            let c1 = get(map, a);
            let c2 = get(map, b);
            match node.kind {
                ValueKind::Scalar => combine_scalar(
                    &[c1, c2],
                    binary_rule(c1, c2, |x, y| x - y, Some((Interval::ONE, -Interval::ONE)), true),
                    n_in,
                    natural,
                ),
                ValueKind::Vector(_) => {
                    let da = match (&c1.da, &c2.da) {
                        (Some(d1), Some(d2)) => Some(d1 - d2),
                        _ => None,
                    };
                    vector_map2(c1, c2, |x, y| x - y, da, natural)
                }
                ValueKind::Matrix(..) => Valuation {
                    m: Value::Matrix(c1.m.matrix() - c2.m.matrix()),
                    a: Value::Matrix(c1.a.matrix() - c2.a.matrix()),
                    da: None,
                    def_domain: c1.def_domain && c2.def_domain,
                },
            }
        }

        Op::Neg(a) => {
            let c = get(map, a);
            match node.kind {
                ValueKind::Scalar => combine_scalar(
                    &[c],
                    unary_rule(c, |x| -x, Some(-Interval::ONE), true),
                    n_in,
                    natural,
                ),
                ValueKind::Vector(_) => Valuation {
                    m: Value::Vector(c.m.vector().map(|x| -x)),
                    a: Value::Vector(c.a.vector().map(|x| -x)),
                    da: if natural { None } else { c.da.as_ref().map(|d| d.map(|x| -x)) },
                    def_domain: c.def_domain,
                },
                ValueKind::Matrix(..) => Valuation {
                    m: Value::Matrix(c.m.matrix().map(|x| -x)),
                    a: Value::Matrix(c.a.matrix().map(|x| -x)),
                    da: None,
                    def_domain: c.def_domain,
                },
            }
        }

        Op::Mul(a, b) => eval_mul(map, a, b, n_in, natural),
        Op::Div(a, b) => eval_div(map, a, b, n_in, natural),

        Op::Sqr(a) => {
            let c = get(map, a);
            let x = c.a.scalar();
            combine_scalar(
                &[c],
                unary_rule(c, iv::sqr, Some(Interval::point(2.0) * x), true),
                n_in,
                natural,
            )
        }

        Op::Sqrt(a) => {
            let c = get(map, a);
            let x = c.a.scalar();
            let def = !x.is_empty() && x.lb() > 0.0;
            combine_scalar(
                &[c],
                unary_rule(
                    c,
                    iv::sqrt,
                    Some(Interval::ONE / (Interval::point(2.0) * iv::sqrt(x))),
                    def,
                ),
                n_in,
                natural,
            )
        }

        Op::Pow(x, p) => eval_pow(map, x, p, n_in, natural),

        Op::Root(a, n) => {
            let c = get(map, a);
            let x = c.a.scalar();
            let def = !x.is_empty() && x.lb() > 0.0;
            let ninv = Interval::ONE / Interval::point(*n as f64);
            let dk = ninv * iv::pow(x, ninv - Interval::ONE);
            combine_scalar(
                &[c],
                unary_rule(c, |v| iv::root(v, *n), Some(dk), def),
                n_in,
                natural,
            )
        }

        Op::Exp(a) => {
            let c = get(map, a);
            let x = c.a.scalar();
            combine_scalar(&[c], unary_rule(c, iv::exp, Some(iv::exp(x)), true), n_in, natural)
        }

        Op::Log(a) => {
            let c = get(map, a);
            let x = c.a.scalar();
            let def = !x.is_empty() && x.lb() > 0.0;
            combine_scalar(
                &[c],
                unary_rule(c, iv::log, Some(Interval::ONE / x), def),
                n_in,
                natural,
            )
        }

        Op::Cos(a) => {
            let c = get(map, a);
            let x = c.a.scalar();
            combine_scalar(&[c], unary_rule(c, iv::cos, Some(-iv::sin(x)), true), n_in, natural)
        }

        Op::Sin(a) => {
            let c = get(map, a);
            let x = c.a.scalar();
            combine_scalar(&[c], unary_rule(c, iv::sin, Some(iv::cos(x)), true), n_in, natural)
        }

        Op::Tan(a) => {
            let c = get(map, a);
            let x = c.a.scalar();
            let t = iv::tan(x);
            let def = !t.is_empty() && !t.is_unbounded();
            combine_scalar(
                &[c],
                unary_rule(c, iv::tan, Some(Interval::ONE + iv::sqr(t)), def),
                n_in,
                natural,
            )
        }

        Op::Acos(a) => {
            let c = get(map, a);
            let x = c.a.scalar();
            let def = !x.is_empty() && x.lb() > -1.0 && x.ub() < 1.0;
            let dk = -Interval::ONE / iv::sqrt(Interval::ONE - iv::sqr(x));
            combine_scalar(&[c], unary_rule(c, iv::acos, Some(dk), def), n_in, natural)
        }

        Op::Asin(a) => {
            let c = get(map, a);
            let x = c.a.scalar();
            let def = !x.is_empty() && x.lb() > -1.0 && x.ub() < 1.0;
            let dk = Interval::ONE / iv::sqrt(Interval::ONE - iv::sqr(x));
            combine_scalar(&[c], unary_rule(c, iv::asin, Some(dk), def), n_in, natural)
        }

        Op::Atan(a) => {
            let c = get(map, a);
            let x = c.a.scalar();
            let dk = Interval::ONE / (Interval::ONE + iv::sqr(x));
            combine_scalar(&[c], unary_rule(c, iv::atan, Some(dk), true), n_in, natural)
        }

        Op::Atan2(y, x) => {
            let cy = get(map, y);
            let cx = get(map, x);
            let ya = cy.a.scalar();
            let xa = cx.a.scalar();
            let sq = iv::sqr(xa) + iv::sqr(ya);
            let def = !sq.is_empty() && !sq.contains(0.0);
            combine_scalar(
                &[cy, cx],
                binary_rule(cy, cx, iv::atan2, Some((xa / sq, -ya / sq)), def),
                n_in,
                natural,
            )
        }

        Op::Cosh(a) => {
            let c = get(map, a);
            let x = c.a.scalar();
            combine_scalar(&[c], unary_rule(c, iv::cosh, Some(iv::sinh(x)), true), n_in, natural)
        }

        Op::Sinh(a) => {
            let c = get(map, a);
            let x = c.a.scalar();
            combine_scalar(&[c], unary_rule(c, iv::sinh, Some(iv::cosh(x)), true), n_in, natural)
        }

        Op::Tanh(a) => {
            let c = get(map, a);
            let x = c.a.scalar();
            let dk = Interval::ONE - iv::sqr(iv::tanh(x));
            combine_scalar(&[c], unary_rule(c, iv::tanh, Some(dk), true), n_in, natural)
        }

        Op::Acosh(a) => {
            let c = get(map, a);
            let x = c.a.scalar();
            let def = !x.is_empty() && x.lb() > 1.0;
            let dk = Interval::ONE / iv::sqrt(iv::sqr(x) - Interval::ONE);
            combine_scalar(&[c], unary_rule(c, iv::acosh, Some(dk), def), n_in, natural)
        }

        Op::Asinh(a) => {
            let c = get(map, a);
            let x = c.a.scalar();
            let dk = Interval::ONE / iv::sqrt(Interval::ONE + iv::sqr(x));
            combine_scalar(&[c], unary_rule(c, iv::asinh, Some(dk), true), n_in, natural)
        }

        Op::Atanh(a) => {
            let c = get(map, a);
            let x = c.a.scalar();
            let def = !x.is_empty() && x.lb() > -1.0 && x.ub() < 1.0;
            let dk = Interval::ONE / (Interval::ONE - iv::sqr(x));
            combine_scalar(&[c], unary_rule(c, iv::atanh, Some(dk), def), n_in, natural)
        }

        Op::Abs(a) => {
            let c = get(map, a);
            let x = c.a.scalar();
            let def = !x.is_empty() && !x.contains(0.0);
            combine_scalar(&[c], unary_rule(c, iv::abs, Some(iv::sign(x)), def), n_in, natural)
        }

        Op::Sign(a) => {
            let c = get(map, a);
            let x = c.a.scalar();
            let def = !x.is_empty() && !x.contains(0.0);
            combine_scalar(&[c], unary_rule(c, iv::sign, Some(Interval::ZERO), def), n_in, natural)
        }

        Op::Floor(a) => {
            let c = get(map, a);
            let x = c.a.scalar();
            let def = iv::floor(x).is_degenerated();
            combine_scalar(&[c], unary_rule(c, iv::floor, Some(Interval::ZERO), def), n_in, natural)
        }

        Op::Ceil(a) => {
            let c = get(map, a);
            let x = c.a.scalar();
            let def = iv::ceil(x).is_degenerated();
            combine_scalar(&[c], unary_rule(c, iv::ceil, Some(Interval::ZERO), def), n_in, natural)
        }

        Op::Min(a, b) => {
            let c1 = get(map, a);
            let c2 = get(map, b);
            let x1 = c1.a.scalar();
            let x2 = c2.a.scalar();
            let dk = if x1.is_empty() || x2.is_empty() {
                None
            } else if x1.ub() < x2.lb() {
                Some((Interval::ONE, Interval::ZERO))
            } else if x2.ub() < x1.lb() {
                Some((Interval::ZERO, Interval::ONE))
            } else {
                None
            };
            combine_scalar(&[c1, c2], binary_rule(c1, c2, iv::min, dk, true), n_in, natural)
        }

        Op::Max(a, b) => {
            let c1 = get(map, a);
            let c2 = get(map, b);
            let x1 = c1.a.scalar();
            let x2 = c2.a.scalar();
            let dk = if x1.is_empty() || x2.is_empty() {
                None
            } else if x1.lb() > x2.ub() {
                Some((Interval::ONE, Interval::ZERO))
            } else if x2.lb() > x1.ub() {
                Some((Interval::ZERO, Interval::ONE))
            } else {
                None
            };
            combine_scalar(&[c1, c2], binary_rule(c1, c2, iv::max, dk, true), n_in, natural)
        }

        Op::Chi(mask, a, b) => {
            let cm = get(map, mask);
            let ca = get(map, a);
            let cb = get(map, b);
            let mv = cm.a.scalar();
            let def = cm.def_domain && ca.def_domain && cb.def_domain;
            let (aval, mval, da) = if !mv.is_empty() && mv.ub() <= 0.0 {
                (ca.a.scalar(), ca.m.scalar(), ca.da.clone())
            } else if !mv.is_empty() && mv.lb() > 0.0 {
                (cb.a.scalar(), cb.m.scalar(), cb.da.clone())
            } else {
                (
                    iv::chi(mv, ca.a.scalar(), cb.a.scalar()),
                    iv::chi(cm.m.scalar(), ca.m.scalar(), cb.m.scalar()),
                    None,
                )
            };
            Valuation {
                m: Value::Scalar(if natural { aval } else { mval }),
                a: Value::Scalar(aval),
                da: if natural { None } else { da },
                def_domain: def,
            }
        }

        Op::Component(v, i) => {
            let c = get(map, v);
            let a = c.a.vector()[*i];
            let m = c.m.vector()[*i];
            Valuation {
                m: Value::Scalar(if natural { a } else { m }),
                a: Value::Scalar(a),
                da: if natural {
                    None
                } else {
                    c.da.as_ref().map(|d| IntervalMatrix::from_fn(1, n_in, |_, j| d[(*i, j)]))
                },
                def_domain: c.def_domain,
            }
        }

        Op::MatComponent(mref, i, j) => {
            let c = get(map, mref);
            let a = c.a.matrix()[(*i, *j)];
            let m = c.m.matrix()[(*i, *j)];
            Valuation {
                m: Value::Scalar(if natural { a } else { m }),
                a: Value::Scalar(a),
                da: None,
                def_domain: c.def_domain,
            }
        }

        Op::Subvector(v, i, j) => {
            let c = get(map, v);
            let n = j - i + 1;
            let a = IntervalVector::from_fn(n, |r, _| c.a.vector()[i + r]);
            let m = IntervalVector::from_fn(n, |r, _| c.m.vector()[i + r]);
            Valuation {
                m: Value::Vector(if natural { a.clone() } else { m }),
                a: Value::Vector(a),
                da: if natural {
                    None
                } else {
                    c.da
                        .as_ref()
                        .map(|d| IntervalMatrix::from_fn(n, n_in, |r, col| d[(i + r, col)]))
                },
                def_domain: c.def_domain,
            }
        }

        Op::VecOf(elems) => {
            let vals: Vec<&Valuation> = elems.iter().map(|e| get(map, e)).collect();
            let n = vals.len();
            let a = IntervalVector::from_fn(n, |r, _| vals[r].a.scalar());
            let m = IntervalVector::from_fn(n, |r, _| vals[r].m.scalar());
            let def = vals.iter().all(|v| v.def_domain);
            let da = if natural || vals.iter().any(|v| v.da.is_none()) {
                None
            } else {
                Some(IntervalMatrix::from_fn(n, n_in, |r, col| {
                    vals[r].da.as_ref().unwrap()[(0, col)]
                }))
            };
            Valuation {
                m: Value::Vector(if natural { a.clone() } else { m }),
                a: Value::Vector(a),
                da,
                def_domain: def,
            }
        }

        Op::Extend(a, b) => {
            let c1 = get(map, a);
            let c2 = get(map, b);
            let n1 = c1.a.size();
            let n = n1 + c2.a.size();
            let pick = |v1: &IntervalVector, v2: &IntervalVector, r: usize| {
                if r < n1 {
                    v1[r]
                } else {
                    v2[r - n1]
                }
            };
            let a_ = IntervalVector::from_fn(n, |r, _| pick(c1.a.vector(), c2.a.vector(), r));
            let m_ = IntervalVector::from_fn(n, |r, _| pick(c1.m.vector(), c2.m.vector(), r));
            let da = match (&c1.da, &c2.da) {
                (Some(d1), Some(d2)) if !natural => Some(IntervalMatrix::from_fn(n, n_in, |r, col| {
                    if r < n1 {
                        d1[(r, col)]
                    } else {
                        d2[(r - n1, col)]
                    }
                })),
                _ => None,
            };
            Valuation {
                m: Value::Vector(if natural { a_.clone() } else { m_ }),
                a: Value::Vector(a_),
                da,
                def_domain: c1.def_domain && c2.def_domain,
            }
        }

        Op::MatOf(cols) => {
            let vals: Vec<&Valuation> = cols.iter().map(|c| get(map, c)).collect();
            let r = vals[0].a.size();
            let c = vals.len();
            let a = IntervalMatrix::from_fn(r, c, |i, j| vals[j].a.vector()[i]);
            let m = IntervalMatrix::from_fn(r, c, |i, j| vals[j].m.vector()[i]);
            Valuation {
                m: Value::Matrix(if natural { a.clone() } else { m }),
                a: Value::Matrix(a),
                da: None,
                def_domain: vals.iter().all(|v| v.def_domain),
            }
        }

        Op::Det(a) => {
            let c = get(map, a);
            let da = det_value(c.a.matrix());
            let dm = det_value(c.m.matrix());
            Valuation {
                m: Value::Scalar(if natural { da } else { dm }),
                a: Value::Scalar(da),
                da: None,
                def_domain: c.def_domain,
            }
        }

        Op::Cross(a, b) => {
            let c1 = get(map, a);
            let c2 = get(map, b);
            let a_ = cross_value(c1.a.vector(), c2.a.vector());
            let m_ = cross_value(c1.m.vector(), c2.m.vector());
            Valuation {
                m: Value::Vector(if natural { a_.clone() } else { m_ }),
                a: Value::Vector(a_),
                da: None,
                def_domain: c1.def_domain && c2.def_domain,
            }
        }

        Op::Transpose(a) => {
            let c = get(map, a);
            Valuation {
                m: Value::Matrix(c.m.matrix().transpose()),
                a: Value::Matrix(c.a.matrix().transpose()),
                da: None,
                def_domain: c.def_domain,
            }
        }

        Op::Flatten(a) => {
            let c = get(map, a);
            let am = c.a.matrix();
            let n = am.len();
            let a_ = IntervalVector::from_iterator(n, am.iter().copied());
            let m_ = IntervalVector::from_iterator(n, c.m.matrix().iter().copied());
            Valuation {
                m: Value::Vector(if natural { a_.clone() } else { m_ }),
                a: Value::Vector(a_),
                da: None,
                def_domain: c.def_domain,
            }
        }

        Op::Traj(tr, t) => {
            let c = get(map, t);
            let ta = c.a.scalar();
            let a = tr.enclosure(ta);
            let m = tr.enclosure(c.m.scalar());
            let def = c.def_domain && !ta.is_empty() && ta.is_subset(&tr.time_domain());
            Valuation {
                m: if natural { a.clone() } else { m },
                a,
                da: None,
                def_domain: def,
            }
        }
    }
}

fn det_value(m: &IntervalMatrix) -> Interval {
    match m.nrows() {
        1 => m[(0, 0)],
        2 => m[(0, 0)] * m[(1, 1)] - m[(0, 1)] * m[(1, 0)],
        3 => {
            m[(0, 0)] * (m[(1, 1)] * m[(2, 2)] - m[(1, 2)] * m[(2, 1)])
                - m[(0, 1)] * (m[(1, 0)] * m[(2, 2)] - m[(1, 2)] * m[(2, 0)])
                + m[(0, 2)] * (m[(1, 0)] * m[(2, 1)] - m[(1, 1)] * m[(2, 0)])
        }
        _ => panic!("determinant restricted to square matrices up to 3x3"),
    }
}

fn cross_value(a: &IntervalVector, b: &IntervalVector) -> IntervalVector {
    IntervalVector::from_vec(vec![
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ])
}

fn eval_mul(
    map: &ValuesMap,
    a: &NodeRef,
    b: &NodeRef,
    n_in: usize,
    natural: bool,
) -> Valuation {
    let c1 = get(map, a);
    let c2 = get(map, b);
    match (a.kind, b.kind) {
        (ValueKind::Scalar, ValueKind::Scalar) => combine_scalar(
            &[c1, c2],
            binary_rule(c1, c2, |x, y| x * y, Some((c2.a.scalar(), c1.a.scalar())), true),
            n_in,
            natural,
        ),
        (ValueKind::Scalar, ValueKind::Vector(_)) => {
            let s = c1.a.scalar();
            let sm = c1.m.scalar();
            let v = c2.a.vector();
            let a_ = v.map(|x| x * s);
            let m_ = c2.m.vector().map(|x| x * sm);
            let da = match (&c1.da, &c2.da) {
                (Some(ds), Some(dv)) if !natural => Some(IntervalMatrix::from_fn(
                    v.len(),
                    n_in,
                    |i, j| s * dv[(i, j)] + v[i] * ds[(0, j)],
                )),
                _ => None,
            };
            Valuation {
                m: Value::Vector(if natural { a_.clone() } else { m_ }),
                a: Value::Vector(a_),
                da,
                def_domain: c1.def_domain && c2.def_domain,
            }
        }
        (ValueKind::Matrix(..), ValueKind::Vector(_)) => {
            let ma = c1.a.matrix();
            let va = c2.a.vector();
            let a_ = ma * va;
            let m_ = c1.m.matrix() * c2.m.vector();
            // The Jacobian only composes when the matrix side is constant
            let da = match &c2.da {
                Some(dv) if !natural && !a.has_vars => Some(ma * dv),
                _ => None,
            };
            Valuation {
                m: Value::Vector(if natural { a_.clone() } else { m_ }),
                a: Value::Vector(a_),
                da,
                def_domain: c1.def_domain && c2.def_domain,
            }
        }
        (ValueKind::Matrix(..), ValueKind::Matrix(..)) => Valuation {
            m: Value::Matrix(c1.m.matrix() * c2.m.matrix()),
            a: Value::Matrix(c1.a.matrix() * c2.a.matrix()),
            da: None,
            def_domain: c1.def_domain && c2.def_domain,
        },
        _ => panic!("unsupported operand kinds for multiplication"),
    }
}

fn eval_div(
    map: &ValuesMap,
    a: &NodeRef,
    b: &NodeRef,
    n_in: usize,
    natural: bool,
) -> Valuation {
    let c1 = get(map, a);
    let c2 = get(map, b);
    match (a.kind, b.kind) {
        (ValueKind::Scalar, ValueKind::Scalar) => {
            let x1 = c1.a.scalar();
            let x2 = c2.a.scalar();
            let def = !x2.is_empty() && !x2.contains(0.0);
            combine_scalar(
                &[c1, c2],
                binary_rule(
                    c1,
                    c2,
                    |x, y| x / y,
                    Some((Interval::ONE / x2, -x1 / iv::sqr(x2))),
                    def,
                ),
                n_in,
                natural,
            )
        }
        (ValueKind::Vector(_), ValueKind::Scalar) => {
            let s = c2.a.scalar();
            let sm = c2.m.scalar();
            let v = c1.a.vector();
            let def = c1.def_domain && c2.def_domain && !s.is_empty() && !s.contains(0.0);
            let a_ = v.map(|x| x / s);
            let m_ = c1.m.vector().map(|x| x / sm);
            let da = match (&c1.da, &c2.da) {
                (Some(dv), Some(ds)) if !natural => Some(IntervalMatrix::from_fn(
                    v.len(),
                    n_in,
                    |i, j| dv[(i, j)] / s - v[i] * ds[(0, j)] / iv::sqr(s),
                )),
                _ => None,
            };
            Valuation {
                m: Value::Vector(if natural { a_.clone() } else { m_ }),
                a: Value::Vector(a_),
                da,
                def_domain: def,
            }
        }
        _ => panic!("unsupported operand kinds for division"),
    }
}

fn eval_pow(map: &ValuesMap, x: &NodeRef, p: &NodeRef, n_in: usize, natural: bool) -> Valuation {
    let cx = get(map, x);
    let cp = get(map, p);
    let xa = cx.a.scalar();
    let pa = cp.a.scalar();
    if !p.has_vars && pa.is_degenerated() {
        let d = pa.lb();
        if d == d.trunc() && d.abs() < i32::MAX as f64 {
            let n = d as i32;
            let def = if n >= 0 { true } else { !xa.is_empty() && !xa.contains(0.0) };
            let dk = Interval::point(d) * iv::pow_int(xa, n - 1);
            return combine_scalar(
                &[cx, cp],
                binary_rule(cx, cp, |v, _| iv::pow_int(v, n), Some((dk, Interval::ZERO)), def),
                n_in,
                natural,
            );
        }
        let def = !xa.is_empty() && xa.lb() > 0.0;
        let dk = Interval::point(d) * iv::pow_real(xa, d - 1.0);
        return combine_scalar(
            &[cx, cp],
            binary_rule(cx, cp, |v, _| iv::pow_real(v, d), Some((dk, Interval::ZERO)), def),
            n_in,
            natural,
        );
    }
    // General case: x^p = exp(p ln x), defined for x > 0
    let def = !xa.is_empty() && xa.lb() > 0.0;
    let k1 = pa * iv::pow(xa, pa - Interval::ONE);
    let k2 = iv::log(xa) * iv::pow(xa, pa);
    combine_scalar(
        &[cx, cp],
        binary_rule(cx, cp, iv::pow, Some((k1, k2)), def),
        n_in,
        natural,
    )
}

// --- Backward evaluation ---

fn stored(map: &ValuesMap, n: &NodeRef) -> Value {
    get(map, n).a.clone()
}

fn store(map: &mut ValuesMap, n: &NodeRef, v: Value) {
    let slot = match n.op {
        Op::Var(id) => id,
        _ => n.id,
    };
    map.get_mut(&slot).unwrap().a = v;
}

fn store_scalar(map: &mut ValuesMap, n: &NodeRef, v: Interval) {
    store(map, n, Value::Scalar(v));
}

/// Reverse pass: the node's stored hull has been tightened; propagate into
/// the children, then recurse. Shared nodes are revisited with an
/// intersection-merge through their stored hull.
fn bwd(node: &NodeRef, map: &mut ValuesMap) {
    match &node.op {
        Op::Var(_) | Op::ConstScalar(_) | Op::ConstVector(_) | Op::ConstMatrix(_) => return,

        Op::Add(a, b) => match node.kind {
            ValueKind::Scalar => {
                let y = stored(map, node).scalar();
                let mut x1 = stored(map, a).scalar();
                let mut x2 = stored(map, b).scalar();
                ibwd::bwd_add(y, &mut x1, &mut x2);
                store_scalar(map, a, x1);
                store_scalar(map, b, x2);
            }
            ValueKind::Vector(_) | ValueKind::Matrix(..) => {
                let y = stored(map, node).components();
                let mut x1 = stored(map, a);
                let mut x2 = stored(map, b);
                bwd_componentwise2(&y, &mut x1, &mut x2, ibwd::bwd_add);
                store(map, a, x1);
                store(map, b, x2);
            }
        },

        Op::Sub(a, b) => match node.kind {
            ValueKind::Scalar => {
                let y = stored(map, node).scalar();
                let mut x1 = stored(map, a).scalar();
                let mut x2 = stored(map, b).scalar();
                ibwd::bwd_sub(y, &mut x1, &mut x2);
                store_scalar(map, a, x1);
                store_scalar(map, b, x2);
            }
            ValueKind::Vector(_) | ValueKind::Matrix(..) => {
                let y = stored(map, node).components();
                let mut x1 = stored(map, a);
                let mut x2 = stored(map, b);
                bwd_componentwise2(&y, &mut x1, &mut x2, ibwd::bwd_sub);
                store(map, a, x1);
                store(map, b, x2);
            }
        },

        Op::Neg(a) => {
            let y = stored(map, node).components();
            let mut x = stored(map, a);
            bwd_componentwise1(&y, &mut x, ibwd::bwd_neg);
            store(map, a, x);
        }

        Op::Mul(a, b) => bwd_mul(node, map, a, b),
        Op::Div(a, b) => bwd_div(node, map, a, b),

        Op::Sqr(a) => bwd_unary(node, map, a, ibwd::bwd_sqr),
        Op::Sqrt(a) => bwd_unary(node, map, a, ibwd::bwd_sqrt),

        Op::Pow(x, p) => {
            let y = stored(map, node).scalar();
            let mut xv = stored(map, x).scalar();
            let mut pv = stored(map, p).scalar();
            ibwd::bwd_pow(y, &mut xv, &mut pv);
            store_scalar(map, x, xv);
            store_scalar(map, p, pv);
        }

        Op::Root(a, n) => {
            let y = stored(map, node).scalar();
            let mut x = stored(map, a).scalar();
            ibwd::bwd_root(y, &mut x, *n);
            store_scalar(map, a, x);
        }

        Op::Exp(a) => bwd_unary(node, map, a, ibwd::bwd_exp),
        Op::Log(a) => bwd_unary(node, map, a, ibwd::bwd_log),
        Op::Cos(a) => bwd_unary(node, map, a, ibwd::bwd_cos),
        Op::Sin(a) => bwd_unary(node, map, a, ibwd::bwd_sin),
        Op::Tan(a) => bwd_unary(node, map, a, ibwd::bwd_tan),
        Op::Acos(a) => bwd_unary(node, map, a, ibwd::bwd_acos),
        Op::Asin(a) => bwd_unary(node, map, a, ibwd::bwd_asin),
        Op::Atan(a) => bwd_unary(node, map, a, ibwd::bwd_atan),

        Op::Atan2(y_, x_) => {
            let y = stored(map, node).scalar();
            let mut yv = stored(map, y_).scalar();
            let mut xv = stored(map, x_).scalar();
            ibwd::bwd_atan2(y, &mut yv, &mut xv);
            store_scalar(map, y_, yv);
            store_scalar(map, x_, xv);
        }

        Op::Cosh(a) => bwd_unary(node, map, a, ibwd::bwd_cosh),
        Op::Sinh(a) => bwd_unary(node, map, a, ibwd::bwd_sinh),
        Op::Tanh(a) => bwd_unary(node, map, a, ibwd::bwd_tanh),
        Op::Acosh(a) => bwd_unary(node, map, a, ibwd::bwd_acosh),
        Op::Asinh(a) => bwd_unary(node, map, a, ibwd::bwd_asinh),
        Op::Atanh(a) => bwd_unary(node, map, a, ibwd::bwd_atanh),
        Op::Abs(a) => bwd_unary(node, map, a, ibwd::bwd_abs),
        Op::Sign(a) => bwd_unary(node, map, a, ibwd::bwd_sign),
        Op::Floor(a) => bwd_unary(node, map, a, ibwd::bwd_floor),
        Op::Ceil(a) => bwd_unary(node, map, a, ibwd::bwd_ceil),

        Op::Min(a, b) => {
            let y = stored(map, node).scalar();
            let mut x1 = stored(map, a).scalar();
            let mut x2 = stored(map, b).scalar();
            ibwd::bwd_min(y, &mut x1, &mut x2);
            store_scalar(map, a, x1);
            store_scalar(map, b, x2);
        }

        Op::Max(a, b) => {
            let y = stored(map, node).scalar();
            let mut x1 = stored(map, a).scalar();
            let mut x2 = stored(map, b).scalar();
            ibwd::bwd_max(y, &mut x1, &mut x2);
            store_scalar(map, a, x1);
            store_scalar(map, b, x2);
        }

        Op::Chi(mask, a, b) => {
            let y = stored(map, node).scalar();
            let mut mv = stored(map, mask).scalar();
            let mut av = stored(map, a).scalar();
            let mut bv = stored(map, b).scalar();
            ibwd::bwd_chi(y, &mut mv, &mut av, &mut bv);
            store_scalar(map, mask, mv);
            store_scalar(map, a, av);
            store_scalar(map, b, bv);
        }

        Op::Component(v, i) => {
            let y = stored(map, node).scalar();
            let mut x = stored(map, v);
            if let Value::Vector(xv) = &mut x {
                xv[*i] = xv[*i].inter(&y);
            }
            store(map, v, x);
        }

        Op::MatComponent(mref, i, j) => {
            let y = stored(map, node).scalar();
            let mut x = stored(map, mref);
            if let Value::Matrix(xm) = &mut x {
                xm[(*i, *j)] = xm[(*i, *j)].inter(&y);
            }
            store(map, mref, x);
        }

        Op::Subvector(v, i, _) => {
            let y = stored(map, node);
            let mut x = stored(map, v);
            if let (Value::Vector(yv), Value::Vector(xv)) = (&y, &mut x) {
                for (r, c) in yv.iter().enumerate() {
                    xv[i + r] = xv[i + r].inter(c);
                }
            }
            store(map, v, x);
        }

        Op::VecOf(elems) => {
            let y = stored(map, node);
            let yv = y.vector();
            for (i, e) in elems.iter().enumerate() {
                let x = stored(map, e).scalar();
                store_scalar(map, e, x.inter(&yv[i]));
            }
        }

        Op::Extend(a, b) => {
            let y = stored(map, node);
            let yv = y.vector();
            let mut x1 = stored(map, a);
            let n1 = x1.size();
            let mut x2 = stored(map, b);
            if let Value::Vector(v) = &mut x1 {
                for r in 0..n1 {
                    v[r] = v[r].inter(&yv[r]);
                }
            }
            if let Value::Vector(v) = &mut x2 {
                for r in 0..v.len() {
                    v[r] = v[r].inter(&yv[n1 + r]);
                }
            }
            store(map, a, x1);
            store(map, b, x2);
        }

        Op::MatOf(cols) => {
            let y = stored(map, node);
            let ym = y.matrix().clone();
            for (j, cnode) in cols.iter().enumerate() {
                let mut x = stored(map, cnode);
                if let Value::Vector(v) = &mut x {
                    for i in 0..v.len() {
                        v[i] = v[i].inter(&ym[(i, j)]);
                    }
                }
                store(map, cnode, x);
            }
        }

        Op::Det(a) => {
            let y = stored(map, node).scalar();
            let mut x = stored(map, a);
            if let Value::Matrix(m) = &mut x {
                if m.nrows() == 2 {
                    let mut t1 = m[(0, 0)] * m[(1, 1)];
                    let mut t2 = m[(0, 1)] * m[(1, 0)];
                    ibwd::bwd_sub(y, &mut t1, &mut t2);
                    let (mut a00, mut a11) = (m[(0, 0)], m[(1, 1)]);
                    ibwd::bwd_mul(t1, &mut a00, &mut a11);
                    let (mut a01, mut a10) = (m[(0, 1)], m[(1, 0)]);
                    ibwd::bwd_mul(t2, &mut a01, &mut a10);
                    m[(0, 0)] = a00;
                    m[(1, 1)] = a11;
                    m[(0, 1)] = a01;
                    m[(1, 0)] = a10;
                }
            }
            store(map, a, x);
        }

        Op::Cross(..) => {}

        Op::Transpose(a) => {
            let y = stored(map, node);
            let yt = y.matrix().transpose();
            let mut x = stored(map, a);
            if let Value::Matrix(m) = &mut x {
                for (xc, yc) in m.iter_mut().zip(yt.iter()) {
                    *xc = xc.inter(yc);
                }
            }
            store(map, a, x);
        }

        Op::Flatten(a) => {
            let y = stored(map, node);
            let yv = y.vector().clone();
            let mut x = stored(map, a);
            if let Value::Matrix(m) = &mut x {
                for (i, xc) in m.iter_mut().enumerate() {
                    *xc = xc.inter(&yv[i]);
                }
            }
            store(map, a, x);
        }

        Op::Traj(..) => {
            // no reverse rule for trajectory sampling
        }
    }
    for c in op_children(&node.op) {
        bwd(c, map);
    }
}

fn bwd_unary(node: &NodeRef, map: &mut ValuesMap, a: &NodeRef, f: fn(Interval, &mut Interval)) {
    let y = stored(map, node).scalar();
    let mut x = stored(map, a).scalar();
    f(y, &mut x);
    store_scalar(map, a, x);
}

fn bwd_componentwise1(y: &[Interval], x: &mut Value, f: fn(Interval, &mut Interval)) {
    let mut comps = x.components();
    for (c, yc) in comps.iter_mut().zip(y.iter()) {
        f(*yc, c);
    }
    rebuild(x, &comps);
}

fn bwd_componentwise2(
    y: &[Interval],
    x1: &mut Value,
    x2: &mut Value,
    f: fn(Interval, &mut Interval, &mut Interval),
) {
    let mut c1 = x1.components();
    let mut c2 = x2.components();
    for i in 0..y.len() {
        f(y[i], &mut c1[i], &mut c2[i]);
    }
    rebuild(x1, &c1);
    rebuild(x2, &c2);
}

fn rebuild(v: &mut Value, comps: &[Interval]) {
    match v {
        Value::Scalar(x) => *x = comps[0],
        Value::Vector(x) => {
            for (i, c) in comps.iter().enumerate() {
                x[i] = *c;
            }
        }
        Value::Matrix(x) => {
            for (i, c) in comps.iter().enumerate() {
                x[i] = *c;
            }
        }
    }
}

fn bwd_mul(node: &NodeRef, map: &mut ValuesMap, a: &NodeRef, b: &NodeRef) {
    match (a.kind, b.kind) {
        (ValueKind::Scalar, ValueKind::Scalar) => {
            let y = stored(map, node).scalar();
            let mut x1 = stored(map, a).scalar();
            let mut x2 = stored(map, b).scalar();
            ibwd::bwd_mul(y, &mut x1, &mut x2);
            store_scalar(map, a, x1);
            store_scalar(map, b, x2);
        }
        (ValueKind::Scalar, ValueKind::Vector(_)) => {
            let y = stored(map, node);
            let yv = y.vector().clone();
            let mut s = stored(map, a).scalar();
            let mut v = stored(map, b);
            if let Value::Vector(vv) = &mut v {
                for i in 0..vv.len() {
                    ibwd::bwd_mul(yv[i], &mut s, &mut vv[i]);
                }
            }
            store_scalar(map, a, s);
            store(map, b, v);
        }
        (ValueKind::Matrix(..), ValueKind::Vector(_)) => {
            let y = stored(map, node);
            let yv = y.vector().clone();
            let mut mval = stored(map, a);
            let mut vval = stored(map, b);
            if let (Value::Matrix(m), Value::Vector(v)) = (&mut mval, &mut vval) {
                bwd_matvec(&yv, m, v);
            }
            store(map, a, mval);
            store(map, b, vval);
        }
        (ValueKind::Matrix(..), ValueKind::Matrix(..)) => {
            // no reverse rule: sound no-op
        }
        _ => unreachable!(),
    }
}

/// One HC4 sweep through each row sum of `y = M v`.
fn bwd_matvec(y: &IntervalVector, m: &mut IntervalMatrix, v: &mut IntervalVector) {
    let (rows, cols) = m.shape();
    for i in 0..rows {
        let mut terms: Vec<Interval> = (0..cols).map(|j| m[(i, j)] * v[j]).collect();
        // contract each term against the row total
        for j in 0..cols {
            let others: Interval = terms
                .iter()
                .enumerate()
                .filter(|(k, _)| *k != j)
                .fold(Interval::ZERO, |acc, (_, t)| acc + *t);
            terms[j] = terms[j].inter(&(y[i] - others));
        }
        for j in 0..cols {
            let mut mij = m[(i, j)];
            let mut vj = v[j];
            ibwd::bwd_mul(terms[j], &mut mij, &mut vj);
            m[(i, j)] = mij;
            v[j] = vj;
        }
    }
}

fn bwd_div(node: &NodeRef, map: &mut ValuesMap, a: &NodeRef, b: &NodeRef) {
    match (a.kind, b.kind) {
        (ValueKind::Scalar, ValueKind::Scalar) => {
            let y = stored(map, node).scalar();
            let mut x1 = stored(map, a).scalar();
            let mut x2 = stored(map, b).scalar();
            ibwd::bwd_div(y, &mut x1, &mut x2);
            store_scalar(map, a, x1);
            store_scalar(map, b, x2);
        }
        (ValueKind::Vector(_), ValueKind::Scalar) => {
            let y = stored(map, node);
            let yv = y.vector().clone();
            let mut v = stored(map, a);
            let mut s = stored(map, b).scalar();
            if let Value::Vector(vv) = &mut v {
                for i in 0..vv.len() {
                    ibwd::bwd_div(yv[i], &mut vv[i], &mut s);
                }
            }
            store(map, a, v);
            store_scalar(map, b, s);
        }
        _ => unreachable!(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{self, ScalarVar, VectorVar, MatrixVar};
    use crate::interval::boxes::boxn;
    use approx::assert_relative_eq;

    fn s(x: f64) -> Value {
        Value::from(x)
    }

    #[test]
    fn natural_centered_default_agree_on_points() {
        let x = ScalarVar::new();
        let f = AnalyticFunction::new(&[&x], &x + &x + 2.0);
        for m in [EvalMode::Natural, EvalMode::Centered, EvalMode::Default] {
            assert!(f.eval_mode(m, &[s(2.0)]).contains(6.0));
        }
        let f = AnalyticFunction::new(&[&x], expr::pow(&x, 2.0));
        assert!(f.eval(&[s(3.0)]).contains(9.0));
        let f = AnalyticFunction::new(&[&x], expr::cos(&x));
        assert_eq!(f.eval_mode(EvalMode::Natural, &[s(0.0)]), Interval::ONE);
    }

    #[test]
    fn multi_arg_functions() {
        let x1 = ScalarVar::new();
        let x2 = ScalarVar::new();
        let f = AnalyticFunction::new(&[&x1, &x2], &x1 + &x2);
        assert!(f.eval(&[s(5.0), s(6.0)]).contains(11.0));
        assert_eq!(f.input_size(), 2);

        let f = AnalyticFunction::new(&[&x1], Interval::new(4.0, 5.0));
        assert_eq!(f.eval(&[s(0.0)]), Interval::new(4.0, 5.0));
    }

    #[test]
    fn vector_output() {
        let x = ScalarVar::new();
        let f = AnalyticFunction::new(&[&x], expr::vec((&x, sqr_of(&x))));
        let out = f.eval(&[s(2.0)]);
        assert!(out[0].contains(2.0));
        assert!(out[1].contains(4.0));
        assert_eq!(f.output_size(), 2);
    }

    fn sqr_of(x: &ScalarVar) -> crate::expr::ScalarExpr {
        expr::sqr(x)
    }

    #[test]
    fn centered_tighter_on_narrow_boxes() {
        // f(x) = x^2 - x on a narrow box around 2
        let x = ScalarVar::new();
        let f = AnalyticFunction::new(&[&x], expr::sqr(&x) - &x);
        let dom = Interval::new(1.99, 2.01);
        let nat = f.eval_mode(EvalMode::Natural, &[dom.into()]);
        let cen = f.eval_mode(EvalMode::Centered, &[dom.into()]);
        let def = f.eval_mode(EvalMode::Default, &[dom.into()]);
        assert!(cen.diam() <= nat.diam());
        assert!(def.is_subset(&nat));
        // true range endpoints at f(1.99), f(2.01)
        assert!(def.contains(2.0 * 2.0 - 2.0));
    }

    #[test]
    fn soundness_on_random_samples() {
        use rand::{Rng, SeedableRng};
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);
        let x = ScalarVar::new();
        let f = AnalyticFunction::new(&[&x], &x * expr::cos(&x) + expr::sqrt(expr::sqr(&x)));
        for _ in 0..100 {
            let lo = rng.gen_range(-4.0..4.0);
            let w = rng.gen_range(0.0..2.0);
            let dom = Interval::new(lo, lo + w);
            for m in [EvalMode::Natural, EvalMode::Default] {
                let out = f.eval_mode(m, &[dom.into()]);
                for k in 0..10 {
                    let t = lo + w * (k as f64) / 9.0;
                    let truth = t * t.cos() + (t * t).sqrt();
                    assert!(out.contains(truth), "{truth} not in {out:?} for {dom:?}");
                }
            }
        }
    }

    #[test]
    fn sqrt_definition_domain() {
        let x = ScalarVar::new();
        let f = AnalyticFunction::new(&[&x], expr::sqrt(&x));
        assert!(f.eval_mode(EvalMode::Natural, &[s(0.0)]).contains(0.0));
        // the derivative of sqrt is undefined at 0: empty centered form
        assert!(f.eval_mode(EvalMode::Centered, &[s(0.0)]).is_empty());
        // default mode falls back to the natural form
        assert!(f.eval(&[s(0.0)]).contains(0.0));
        let near = f.eval_mode(EvalMode::Centered, &[s(1e-10)]);
        assert!(!near.is_empty());
    }

    #[test]
    fn diff_returns_jacobian() {
        let x = ScalarVar::new();
        let f = AnalyticFunction::new(&[&x], expr::sqr(&x));
        let j = f.diff(&[s(3.0)]);
        assert_eq!(j.shape(), (1, 1));
        assert!(j[(0, 0)].contains(6.0));

        let v = VectorVar::new(2);
        let g = AnalyticFunction::new(&[&v], expr::vec((v.at(0) * v.at(1), v.at(0))));
        let j = g.diff(&[Value::Vector(boxn(&[Interval::point(2.0), Interval::point(5.0)]))]);
        assert_eq!(j.shape(), (2, 2));
        assert!(j[(0, 0)].contains(5.0));
        assert!(j[(0, 1)].contains(2.0));
        assert!(j[(1, 0)].contains(1.0));
        assert!(j[(1, 1)].contains(0.0));
    }

    #[test]
    fn real_eval_midpoint() {
        let x = ScalarVar::new();
        let f = AnalyticFunction::new(&[&x], &x * 2.0);
        assert_relative_eq!(f.real_eval(&[s(3.0)]), 6.0, epsilon = 1e-12);
    }

    #[test]
    fn subvector_composition() {
        let p = VectorVar::new(2);
        let x = VectorVar::new(4);
        let f = AnalyticFunction::new(&[&p], p.at(0) * p.at(1));
        let g = AnalyticFunction::new(
            &[&x],
            f.call(&[x.subvector(0, 1).into()]).into_scalar()
                + f.call(&[x.subvector(2, 3).into()]).into_scalar(),
        );
        let a = Value::Vector(boxn(&[
            Interval::point(1.0),
            Interval::point(2.0),
            Interval::point(3.0),
            Interval::point(4.0),
        ]));
        assert!(g.eval_mode(EvalMode::Natural, &[a.clone()]).contains(14.0));
        assert!(g.eval_mode(EvalMode::Centered, &[a.clone()]).contains(14.0));
        assert!(g.eval(&[a]).contains(14.0));
    }

    #[test]
    fn matrix_expressions() {
        let x = VectorVar::new(2);
        let m = crate::interval::boxes::Matrix::from_row_slice(2, 2, &[0.0, 2.0, -1.0, 0.0]);
        let f = AnalyticFunction::new(&[&x], MatrixExpr::from(m) * &x);
        let out = f.eval(&[Value::Vector(boxn(&[
            Interval::new(0.0, 1.0),
            Interval::new(2.0, 3.0),
        ]))]);
        assert_eq!(out[0], Interval::new(4.0, 6.0));
        assert_eq!(out[1], Interval::new(-1.0, 0.0));
    }

    #[test]
    fn matrix_var_determinant() {
        let a = MatrixVar::new(2, 2);
        let f = AnalyticFunction::new(
            &[&a],
            a.at(0, 0) * a.at(1, 1) - a.at(1, 0) * a.at(0, 1),
        );
        let m = crate::interval::boxes::Matrix::from_row_slice(2, 2, &[1.0, 2.0, 3.0, 4.0]);
        assert!(f.eval(&[Value::from(m)]).contains(-2.0));

        let g = AnalyticFunction::new(&[&a], expr::det(&a));
        let mi = IntervalMatrix::from_row_slice(
            2,
            2,
            &[
                Interval::new(0.0, 1.0),
                Interval::new(1.0, 2.0),
                Interval::new(2.0, 3.0),
                Interval::new(3.0, 4.0),
            ],
        );
        assert_eq!(g.eval_mode(EvalMode::Natural, &[Value::Matrix(mi)]), Interval::new(-6.0, 2.0));
    }

    #[test]
    fn min_max_sign_behavior() {
        let x1 = ScalarVar::new();
        let x2 = ScalarVar::new();
        let f = AnalyticFunction::new(&[&x1, &x2], 2.0 * expr::max(&x1, &x2 + 1.0));
        assert!(f.eval(&[s(0.0), s(1.0)]).contains(4.0));
        assert!(f.eval(&[s(3.0), s(1.0)]).contains(6.0));

        let g = AnalyticFunction::new(&[&x1], 2.0 * expr::sign(&x1 + 1.0));
        assert!(g.eval(&[s(0.0)]).contains(2.0));
        assert_eq!(g.eval(&[s(-1.0)]), Interval::new(-2.0, 2.0));
        assert!(g.eval(&[s(-2.0)]).contains(-2.0));
    }

    #[test]
    fn backward_pass_contracts_args() {
        // f(a, b) = a - b, target 0: both contract to their intersection
        let a = ScalarVar::new();
        let b = ScalarVar::new();
        let f = AnalyticFunction::new(&[&a, &b], &a - &b);
        let args = vec![
            Value::Scalar(Interval::new(1.0, 5.0)),
            Value::Scalar(Interval::new(3.0, 9.0)),
        ];
        let mut map = f.eval_valuations(&args, true);
        let out = f.backward(&mut map, &Value::Scalar(Interval::ZERO));
        assert_eq!(out[0].scalar(), Interval::new(3.0, 5.0));
        assert_eq!(out[1].scalar(), Interval::new(3.0, 5.0));
    }

    #[test]
    fn backward_merges_shared_nodes() {
        // f(x) = sqr(x) + sqr(x): shared sub-expression contracted twice
        let x = ScalarVar::new();
        let shared = expr::sqr(&x);
        let f = AnalyticFunction::new(&[&x], shared.clone() + shared);
        let args = vec![Value::Scalar(Interval::new(0.0, 10.0))];
        let mut map = f.eval_valuations(&args, true);
        let out = f.backward(&mut map, &Value::Scalar(Interval::new(0.0, 8.0)));
        // sqr(x) <= 4, so x <= 2
        assert!(out[0].scalar().ub() <= 2.0 + 1e-12);
    }

    #[test]
    #[should_panic]
    fn arity_mismatch_is_fatal() {
        let x = ScalarVar::new();
        let f = AnalyticFunction::new(&[&x], &x + 1.0);
        let _ = f.eval(&[s(1.0), s(2.0)]);
    }

    #[test]
    #[should_panic]
    fn foreign_variable_is_fatal() {
        let x = ScalarVar::new();
        let y = ScalarVar::new();
        let _ = AnalyticFunction::new(&[&x], &x + &y);
    }

    #[test]
    fn emptiness_propagates_to_root() {
        let x = ScalarVar::new();
        let f = AnalyticFunction::new(&[&x], expr::sqrt(&x) + 1.0);
        let out = f.eval_mode(EvalMode::Natural, &[Value::Scalar(Interval::new(-5.0, -2.0))]);
        assert!(out.is_empty());
    }
}
