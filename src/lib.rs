//! Symbolic-expression automatic differentiation for nonlinear model fitting.
//!
//! The engine represents scalar parametric functions `f(θ, x)` as an
//! arena-allocated expression tree and offers three interchangeable ways to
//! evaluate `f` and its Jacobian `∂f/∂θ` over batches of data rows:
//!
//! - [`TreeEvaluator`] — walks the tree once per row; paired with the
//!   symbolic differentiator ([`derive`]/[`gradient`]) it is the slow,
//!   obviously-correct baseline.
//! - [`TapeInterpreter`] — flattens the tree into a postorder [`Tape`] and
//!   runs batched, non-recursive forward and reverse sweeps over it.
//! - [`JacobianKernel`] — compiles the tree once into a resolved-slot
//!   instruction program with buffers sized for a fixed row count, then
//!   replays it with different parameters without touching the tree again.
//!
//! All three agree on `f` and on `∂f/∂θ` to floating-point tolerance; the
//! per-opcode formulas live in one place ([`opcode`]) so the back ends
//! cannot drift apart.
//!
//! Evaluator instances own their scratch buffers and must not be shared
//! across threads mid-call; distinct instances are fully independent. With
//! the `parallel` feature, [`parallel`] provides row-partitioned helpers
//! that build one interpreter per worker.

pub mod expr;
pub mod float;
pub mod interpreter;
pub mod kernel;
pub mod opcode;
pub mod symbolic;
pub mod tape;
pub mod validate;

#[cfg(feature = "parallel")]
pub mod parallel;

pub use expr::{BinOp, ExprArena, Func, Node, NodeId};
pub use float::Float;
pub use interpreter::TapeInterpreter;
pub use kernel::JacobianKernel;
pub use symbolic::{derive, gradient, TreeEvaluator};
pub use tape::{flatten, Tape, TapeEntry};
pub use validate::{duplicated_params, validate, UnsupportedNodeError};

/// Type alias for an expression arena over `f64`.
pub type ExprArena64 = ExprArena<f64>;
/// Type alias for an expression arena over `f32`.
pub type ExprArena32 = ExprArena<f32>;
