//! Expression IR for scalar parametric functions `f(θ, x)`.
//!
//! Nodes live in an append-only arena and refer to their children by integer
//! id, so a node id always post-dates the ids it references. Sharing the same
//! id from two parents is legal (the tree is really a DAG); derived artifacts
//! duplicate shared subtrees per occurrence and rely on `+=` Jacobian
//! accumulation, so sharing never changes results.
//!
//! The arena's builder methods are simplifying smart constructors: they fold
//! constant operands and short-circuit the identity patterns `x + 0`,
//! `x - 0`, `x * 1`, `x * 0`, `x / 1`, `pow(x, 1)`, `pow(x, 0)`. This keeps
//! symbolically derived trees (see [`crate::symbolic::derive`]) small without
//! a separate simplification pass. [`ExprArena::push`] bypasses all of it.

use std::fmt;

use crate::float::Float;
use crate::opcode::{self, OpCode};

/// Index of a node in an [`ExprArena`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct NodeId(pub(crate) u32);

impl NodeId {
    /// Position of the node in its arena.
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Binary arithmetic operators.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
}

/// The closed set of elementary functions callable from an expression.
///
/// All functions are unary except [`Func::Pow`], which takes base and
/// exponent. The logistic family exists because sigmoidal model formulas and
/// their derivatives are pervasive in nonlinear regression:
/// `Logistic(z) = 1/(1+e^{-z})`, `InvLogistic` is its inverse (the logit),
/// and the `*Prime` variants are their first derivatives as functions in
/// their own right.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Func {
    Log,
    Exp,
    Sqrt,
    Cbrt,
    Sin,
    Cos,
    Cosh,
    Sinh,
    Tanh,
    Pow,
    Abs,
    Sign,
    Logistic,
    InvLogistic,
    LogisticPrime,
    InvLogisticPrime,
}

impl Func {
    /// Number of arguments the function takes.
    #[inline]
    pub fn arity(self) -> usize {
        match self {
            Func::Pow => 2,
            _ => 1,
        }
    }

    /// Lower-case name, as it appears in formula text and error messages.
    pub fn name(self) -> &'static str {
        match self {
            Func::Log => "log",
            Func::Exp => "exp",
            Func::Sqrt => "sqrt",
            Func::Cbrt => "cbrt",
            Func::Sin => "sin",
            Func::Cos => "cos",
            Func::Cosh => "cosh",
            Func::Sinh => "sinh",
            Func::Tanh => "tanh",
            Func::Pow => "pow",
            Func::Abs => "abs",
            Func::Sign => "sign",
            Func::Logistic => "logistic",
            Func::InvLogistic => "invlogistic",
            Func::LogisticPrime => "logistic_prime",
            Func::InvLogisticPrime => "invlogistic_prime",
        }
    }
}

/// A single IR node.
///
/// Exactly two free vectors may be indexed: `Param` reads `θ[i]`, `Var`
/// reads `x[i]`. Indices are plain `usize` literals — there is no way to
/// express a computed index, so the validator never has to reject one.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Node<F> {
    /// Scalar constant.
    Const(F),
    /// Reference into the parameter vector θ.
    Param(usize),
    /// Reference into the input row x.
    Var(usize),
    /// Arithmetic negation (the only unary operator).
    Neg(NodeId),
    /// Binary arithmetic.
    Bin(BinOp, NodeId, NodeId),
    /// Elementary function call. The second argument is `Some` only for
    /// binary functions ([`Func::Pow`]); the validator rejects mismatches.
    Call(Func, NodeId, Option<NodeId>),
}

/// Append-only arena owning the nodes of one or more expressions.
///
/// Building derivatives extends the same arena, sharing subtrees of the
/// original expression by id.
#[derive(Clone, Debug, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ExprArena<F> {
    nodes: Vec<Node<F>>,
}

impl<F: Float> ExprArena<F> {
    /// Create an empty arena.
    pub fn new() -> Self {
        ExprArena { nodes: Vec::new() }
    }

    /// Append a node without any simplification.
    ///
    /// Used by tests to construct shapes the smart constructors would fold
    /// away (or refuse to build); regular callers should prefer the typed
    /// builders below.
    #[inline]
    pub fn push(&mut self, node: Node<F>) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(node);
        id
    }

    /// Node stored at `id`. Panics if `id` is out of bounds.
    #[inline]
    pub fn node(&self, id: NodeId) -> &Node<F> {
        &self.nodes[id.index()]
    }

    /// Number of nodes in the arena.
    #[inline]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// True if the arena holds no nodes.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    // ── Leaves ──

    /// Scalar constant.
    pub fn constant(&mut self, value: F) -> NodeId {
        self.push(Node::Const(value))
    }

    /// Reference to `θ[index]`.
    pub fn param(&mut self, index: usize) -> NodeId {
        self.push(Node::Param(index))
    }

    /// Reference to `x[index]`.
    pub fn var(&mut self, index: usize) -> NodeId {
        self.push(Node::Var(index))
    }

    // ── Operators (simplifying) ──

    /// `-a`, folding constants and double negation.
    pub fn neg(&mut self, a: NodeId) -> NodeId {
        match *self.node(a) {
            Node::Const(x) => self.constant(-x),
            Node::Neg(inner) => inner,
            _ => self.push(Node::Neg(a)),
        }
    }

    /// `a + b`, folding constants and `x + 0`.
    pub fn add(&mut self, a: NodeId, b: NodeId) -> NodeId {
        match (self.node(a), self.node(b)) {
            (&Node::Const(x), &Node::Const(y)) => self.constant(x + y),
            (_, &Node::Const(z)) if z == F::zero() => a,
            (&Node::Const(z), _) if z == F::zero() => b,
            _ => self.push(Node::Bin(BinOp::Add, a, b)),
        }
    }

    /// `a - b`, folding constants, `x - 0`, and `0 - x`.
    pub fn sub(&mut self, a: NodeId, b: NodeId) -> NodeId {
        match (self.node(a), self.node(b)) {
            (&Node::Const(x), &Node::Const(y)) => self.constant(x - y),
            (_, &Node::Const(z)) if z == F::zero() => a,
            (&Node::Const(z), _) if z == F::zero() => self.neg(b),
            _ => self.push(Node::Bin(BinOp::Sub, a, b)),
        }
    }

    /// `a * b`, folding constants, `x * 1`, and `x * 0`.
    ///
    /// `x * 0 → 0` is a symbolic rewrite, not a guarded runtime fold: it
    /// drops the subtree even where it would evaluate to NaN or Inf. This is
    /// the convention derivative trees need (a vanished partial must vanish
    /// structurally), and it matches how the whole simplifier treats
    /// expressions as formulas rather than IEEE traces.
    pub fn mul(&mut self, a: NodeId, b: NodeId) -> NodeId {
        match (self.node(a), self.node(b)) {
            (&Node::Const(x), &Node::Const(y)) => self.constant(x * y),
            (_, &Node::Const(z)) if z == F::one() => a,
            (&Node::Const(z), _) if z == F::one() => b,
            (_, &Node::Const(z)) if z == F::zero() => self.constant(F::zero()),
            (&Node::Const(z), _) if z == F::zero() => self.constant(F::zero()),
            _ => self.push(Node::Bin(BinOp::Mul, a, b)),
        }
    }

    /// `a / b`, folding constants, `x / 1`, and `0 / x`.
    pub fn div(&mut self, a: NodeId, b: NodeId) -> NodeId {
        match (self.node(a), self.node(b)) {
            (&Node::Const(x), &Node::Const(y)) => self.constant(x / y),
            (_, &Node::Const(z)) if z == F::one() => a,
            (&Node::Const(z), _) if z == F::zero() => self.constant(F::zero()),
            _ => self.push(Node::Bin(BinOp::Div, a, b)),
        }
    }

    // ── Function calls (simplifying) ──

    /// Unary function call `f(a)`, folding a constant argument.
    ///
    /// Panics if `f` is not unary; use [`ExprArena::pow`] for `Pow`.
    pub fn call(&mut self, f: Func, a: NodeId) -> NodeId {
        assert_eq!(f.arity(), 1, "{} is not unary", f.name());
        if let Node::Const(x) = *self.node(a) {
            return self.constant(opcode::eval_forward(OpCode::from_func(f), x, F::zero()));
        }
        self.push(Node::Call(f, a, None))
    }

    /// `pow(a, b)`, folding constants, `pow(x, 1)`, and `pow(x, 0)`.
    pub fn pow(&mut self, a: NodeId, b: NodeId) -> NodeId {
        match (self.node(a), self.node(b)) {
            (&Node::Const(x), &Node::Const(y)) => self.constant(x.powf(y)),
            (_, &Node::Const(z)) if z == F::one() => a,
            (_, &Node::Const(z)) if z == F::zero() => self.constant(F::one()),
            _ => self.push(Node::Call(Func::Pow, a, Some(b))),
        }
    }

    /// Textual form of the subtree rooted at `id`, e.g.
    /// `(theta[0] * exp(x[0]))`.
    pub fn display(&self, id: NodeId) -> DisplayNode<'_, F> {
        DisplayNode { arena: self, id }
    }
}

/// Borrowed `Display` adapter for a subtree; see [`ExprArena::display`].
pub struct DisplayNode<'a, F> {
    arena: &'a ExprArena<F>,
    id: NodeId,
}

impl<F: Float> fmt::Display for DisplayNode<'_, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_node(self.arena, self.id, f)
    }
}

fn write_node<F: Float>(
    arena: &ExprArena<F>,
    id: NodeId,
    f: &mut fmt::Formatter<'_>,
) -> fmt::Result {
    if id.index() >= arena.len() {
        return write!(f, "<dangling #{}>", id.index());
    }
    match *arena.node(id) {
        Node::Const(v) => write!(f, "{}", v),
        Node::Param(i) => write!(f, "theta[{}]", i),
        Node::Var(i) => write!(f, "x[{}]", i),
        Node::Neg(a) => {
            write!(f, "(-")?;
            write_node(arena, a, f)?;
            write!(f, ")")
        }
        Node::Bin(op, a, b) => {
            let sym = match op {
                BinOp::Add => "+",
                BinOp::Sub => "-",
                BinOp::Mul => "*",
                BinOp::Div => "/",
            };
            write!(f, "(")?;
            write_node(arena, a, f)?;
            write!(f, " {} ", sym)?;
            write_node(arena, b, f)?;
            write!(f, ")")
        }
        Node::Call(func, a, b) => {
            write!(f, "{}(", func.name())?;
            write_node(arena, a, f)?;
            if let Some(b) = b {
                write!(f, ", ")?;
                write_node(arena, b, f)?;
            }
            write!(f, ")")
        }
    }
}
