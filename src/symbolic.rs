//! Symbolic differentiation and the tree-walking reference evaluator.
//!
//! [`derive`] rewrites an expression into a brand-new tree for one partial
//! derivative, sharing subtrees of the original by id (`exp(u)` appears in
//! its own derivative as the same node, not a copy). Derivatives are built
//! through the arena's simplifying constructors, so vanished partials fold
//! away instead of accumulating `x * 0` noise.
//!
//! [`TreeEvaluator`] is the broadcast baseline: it copies each data row into
//! a small buffer and re-walks the unmodified scalar tree per row. Orders of
//! magnitude slower than the tape or the compiled kernel, and the yardstick
//! both are checked against.

use crate::expr::{ExprArena, Func, Node, NodeId};
use crate::float::Float;
use crate::opcode::{self, OpCode};
use crate::validate::{validate, UnsupportedNodeError};

/// Build `∂/∂θ[param]` of the subtree rooted at `root` as a new tree in the
/// same arena.
///
/// Structural recursion with the usual closed-form rules: sum, product and
/// quotient rules for the operators, chain rule through every function
/// call. The formulas mirror [`opcode::reverse_partials`] term for term —
/// including `Pow`'s `b·r/a` base-partial convention — so the symbolic and
/// reverse-mode Jacobians agree beyond mere algebraic equivalence.
pub fn derive<F: Float>(arena: &mut ExprArena<F>, root: NodeId, param: usize) -> NodeId {
    match *arena.node(root) {
        Node::Const(_) | Node::Var(_) => arena.constant(F::zero()),
        Node::Param(i) => {
            if i == param {
                arena.constant(F::one())
            } else {
                arena.constant(F::zero())
            }
        }
        Node::Neg(a) => {
            let da = derive(arena, a, param);
            arena.neg(da)
        }
        Node::Bin(op, a, b) => {
            let da = derive(arena, a, param);
            let db = derive(arena, b, param);
            match op {
                crate::expr::BinOp::Add => arena.add(da, db),
                crate::expr::BinOp::Sub => arena.sub(da, db),
                crate::expr::BinOp::Mul => {
                    // (ab)' = a'b + ab'
                    let t1 = arena.mul(da, b);
                    let t2 = arena.mul(a, db);
                    arena.add(t1, t2)
                }
                crate::expr::BinOp::Div => {
                    // (a/b)' = (a'b - ab') / b²
                    let t1 = arena.mul(da, b);
                    let t2 = arena.mul(a, db);
                    let num = arena.sub(t1, t2);
                    let den = arena.mul(b, b);
                    arena.div(num, den)
                }
            }
        }
        Node::Call(f, a, b) => derive_call(arena, root, f, a, b, param),
    }
}

fn derive_call<F: Float>(
    arena: &mut ExprArena<F>,
    call: NodeId,
    f: Func,
    a: NodeId,
    b: Option<NodeId>,
    param: usize,
) -> NodeId {
    let da = derive(arena, a, param);
    match f {
        Func::Pow => {
            // d a^b = a'·b·r/a + b'·r·ln(a), with r the call node itself.
            let b = b.expect("validated: pow is binary");
            let db = derive(arena, b, param);
            let br = arena.mul(b, call);
            let ratio = arena.div(br, a);
            let t1 = arena.mul(da, ratio);
            let ln_a = arena.call(Func::Log, a);
            let r_ln = arena.mul(call, ln_a);
            let t2 = arena.mul(db, r_ln);
            arena.add(t1, t2)
        }
        Func::Log => arena.div(da, a),
        Func::Exp => arena.mul(da, call),
        Func::Sqrt => {
            // u' / (2·sqrt(u))
            let two = arena.constant(F::from(2.0).unwrap());
            let den = arena.mul(two, call);
            arena.div(da, den)
        }
        Func::Cbrt => {
            // u' / (3·cbrt(u)²)
            let three = arena.constant(F::from(3.0).unwrap());
            let sq = arena.mul(call, call);
            let den = arena.mul(three, sq);
            arena.div(da, den)
        }
        Func::Sin => {
            let cos = arena.call(Func::Cos, a);
            arena.mul(da, cos)
        }
        Func::Cos => {
            let sin = arena.call(Func::Sin, a);
            let t = arena.mul(da, sin);
            arena.neg(t)
        }
        Func::Cosh => {
            let sinh = arena.call(Func::Sinh, a);
            arena.mul(da, sinh)
        }
        Func::Sinh => {
            let cosh = arena.call(Func::Cosh, a);
            arena.mul(da, cosh)
        }
        Func::Tanh => {
            // u' / cosh(u)²
            let cosh = arena.call(Func::Cosh, a);
            let den = arena.mul(cosh, cosh);
            arena.div(da, den)
        }
        Func::Abs => {
            let sgn = arena.call(Func::Sign, a);
            arena.mul(da, sgn)
        }
        Func::Sign => arena.constant(F::zero()),
        Func::Logistic => {
            let prime = arena.call(Func::LogisticPrime, a);
            arena.mul(da, prime)
        }
        Func::InvLogistic => {
            let prime = arena.call(Func::InvLogisticPrime, a);
            arena.mul(da, prime)
        }
        Func::LogisticPrime => {
            // d s(1-s) = s(1-s)·(1-2s), reusing the call node for s(1-s)
            let s = arena.call(Func::Logistic, a);
            let two = arena.constant(F::from(2.0).unwrap());
            let two_s = arena.mul(two, s);
            let one = arena.constant(F::one());
            let fac = arena.sub(one, two_s);
            let t = arena.mul(call, fac);
            arena.mul(da, t)
        }
        Func::InvLogisticPrime => {
            // d 1/(a(1-a)) = (2a-1)·r², reusing the call node for r
            let two = arena.constant(F::from(2.0).unwrap());
            let two_a = arena.mul(two, a);
            let one = arena.constant(F::one());
            let fac = arena.sub(two_a, one);
            let r_sq = arena.mul(call, call);
            let t = arena.mul(fac, r_sq);
            arena.mul(da, t)
        }
    }
}

/// One derivative tree per θ index: `[∂f/∂θ0, …, ∂f/∂θ(n_params-1)]`.
pub fn gradient<F: Float>(
    arena: &mut ExprArena<F>,
    root: NodeId,
    n_params: usize,
) -> Vec<NodeId> {
    (0..n_params).map(|p| derive(arena, root, p)).collect()
}

/// Tree-walking evaluator: broadcasts a scalar expression over data rows.
///
/// The reference back end. Each call copies the current row into an internal
/// buffer and recursively evaluates the unmodified tree (and, for Jacobians,
/// one symbolically derived tree per parameter) against it.
pub struct TreeEvaluator<'a, F: Float> {
    arena: &'a ExprArena<F>,
    root: NodeId,
    grads: Vec<NodeId>,
    xbuf: Vec<F>,
}

impl<'a, F: Float> TreeEvaluator<'a, F> {
    /// Evaluation-only instance (no derivative trees).
    pub fn new(arena: &'a ExprArena<F>, root: NodeId) -> Result<Self, UnsupportedNodeError> {
        validate(arena, root)?;
        Ok(TreeEvaluator {
            arena,
            root,
            grads: Vec::new(),
            xbuf: Vec::new(),
        })
    }

    /// Instance with one symbolic derivative tree per parameter, enabling
    /// [`evaluate_with_jacobian`](Self::evaluate_with_jacobian).
    ///
    /// Extends the arena with the derivative trees, then holds it immutably.
    pub fn with_gradient(
        arena: &'a mut ExprArena<F>,
        root: NodeId,
        n_params: usize,
    ) -> Result<Self, UnsupportedNodeError> {
        validate(arena, root)?;
        let grads = gradient(arena, root, n_params);
        Ok(TreeEvaluator {
            arena: &*arena,
            root,
            grads,
            xbuf: Vec::new(),
        })
    }

    /// Number of parameters this instance differentiates over.
    #[inline]
    pub fn n_params(&self) -> usize {
        self.grads.len()
    }

    /// Evaluate `f(θ, x)` for every row of the column-sliced dataset.
    pub fn evaluate(&mut self, theta: &[F], columns: &[&[F]], n_rows: usize) -> Vec<F> {
        let mut out = vec![F::zero(); n_rows];
        for (row, slot) in out.iter_mut().enumerate() {
            self.load_row(columns, row);
            *slot = eval_node(self.arena, self.root, theta, &self.xbuf);
        }
        out
    }

    /// Evaluate `f` and fill the flat row-major `∂f/∂θ` matrix
    /// (`n_rows × n_params`), zeroing it first.
    ///
    /// Requires construction via [`with_gradient`](Self::with_gradient).
    pub fn evaluate_with_jacobian(
        &mut self,
        theta: &[F],
        columns: &[&[F]],
        n_rows: usize,
        jac_theta: &mut [F],
    ) -> Vec<F> {
        let np = self.grads.len();
        assert!(np > 0, "constructed without gradient trees");
        assert_eq!(
            jac_theta.len(),
            n_rows * np,
            "jac_theta length must be n_rows * n_params"
        );
        jac_theta.fill(F::zero());

        let mut out = vec![F::zero(); n_rows];
        for (row, slot) in out.iter_mut().enumerate() {
            self.load_row(columns, row);
            *slot = eval_node(self.arena, self.root, theta, &self.xbuf);
            for (p, &g) in self.grads.iter().enumerate() {
                jac_theta[row * np + p] = eval_node(self.arena, g, theta, &self.xbuf);
            }
        }
        out
    }

    fn load_row(&mut self, columns: &[&[F]], row: usize) {
        self.xbuf.clear();
        self.xbuf.extend(columns.iter().map(|c| c[row]));
    }
}

/// Recursive scalar evaluation of one node against `(θ, x)`.
///
/// Delegates every operator and function to [`opcode::eval_forward`] so the
/// numeric formulas are shared with the other back ends.
fn eval_node<F: Float>(arena: &ExprArena<F>, id: NodeId, theta: &[F], x: &[F]) -> F {
    match *arena.node(id) {
        Node::Const(v) => v,
        Node::Param(i) => theta[i],
        Node::Var(i) => x[i],
        Node::Neg(a) => opcode::eval_forward(OpCode::Neg, eval_node(arena, a, theta, x), F::zero()),
        Node::Bin(op, a, b) => {
            let va = eval_node(arena, a, theta, x);
            let vb = eval_node(arena, b, theta, x);
            opcode::eval_forward(OpCode::from_bin(op), va, vb)
        }
        Node::Call(f, a, b) => {
            let va = eval_node(arena, a, theta, x);
            let vb = match b {
                Some(b) => eval_node(arena, b, theta, x),
                None => F::zero(),
            };
            opcode::eval_forward(OpCode::from_func(f), va, vb)
        }
    }
}
