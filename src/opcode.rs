//! Flat operation codes shared by the tape interpreter and the compiled
//! Jacobian kernel.
//!
//! [`eval_forward`] and [`reverse_partials`] are the single home of every
//! per-opcode numeric formula. Both evaluator back ends (and, through
//! [`OpCode::from_bin`]/[`OpCode::from_func`], the tree walker) call these,
//! which is what makes cross-evaluator agreement a structural property
//! rather than a test-enforced hope.
//!
//! IEEE-754 semantics throughout: division by zero, `log` of a non-positive
//! value and friends produce NaN/Inf and propagate; they are never errors.

use crate::expr::{BinOp, Func};
use crate::float::Float;

/// Sentinel for an unused second operand slot.
pub const UNUSED: u32 = u32::MAX;

/// Elementary operation codes.
///
/// One variant per IR node kind, with the three leaf kinds (`Const`,
/// `Param`, `Var`) made explicit so a tape entry is self-describing.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum OpCode {
    // ── Leaves ──
    /// Scalar constant; payload stored alongside the entry.
    Const,
    /// `θ[idx]` (leaf; reverse pass accumulates into the θ-Jacobian).
    Param,
    /// `x[idx]` (leaf; reverse pass accumulates into the x-Jacobian).
    Var,

    // ── Arithmetic ──
    Add,
    Sub,
    Mul,
    Div,
    Neg,

    // ── Exp / log ──
    Log,
    Exp,
    Sqrt,
    Cbrt,

    // ── Trig / hyperbolic ──
    Sin,
    Cos,
    Cosh,
    Sinh,
    Tanh,

    // ── Misc ──
    Pow,
    Abs,
    /// NaN-propagating sign; derivative defined as 0 everywhere.
    Sign,

    // ── Logistic family ──
    Logistic,
    InvLogistic,
    LogisticPrime,
    InvLogisticPrime,
}

impl OpCode {
    /// Opcode for a binary arithmetic operator.
    #[inline]
    pub fn from_bin(op: BinOp) -> Self {
        match op {
            BinOp::Add => OpCode::Add,
            BinOp::Sub => OpCode::Sub,
            BinOp::Mul => OpCode::Mul,
            BinOp::Div => OpCode::Div,
        }
    }

    /// Opcode for an elementary function.
    #[inline]
    pub fn from_func(f: Func) -> Self {
        match f {
            Func::Log => OpCode::Log,
            Func::Exp => OpCode::Exp,
            Func::Sqrt => OpCode::Sqrt,
            Func::Cbrt => OpCode::Cbrt,
            Func::Sin => OpCode::Sin,
            Func::Cos => OpCode::Cos,
            Func::Cosh => OpCode::Cosh,
            Func::Sinh => OpCode::Sinh,
            Func::Tanh => OpCode::Tanh,
            Func::Pow => OpCode::Pow,
            Func::Abs => OpCode::Abs,
            Func::Sign => OpCode::Sign,
            Func::Logistic => OpCode::Logistic,
            Func::InvLogistic => OpCode::InvLogistic,
            Func::LogisticPrime => OpCode::LogisticPrime,
            Func::InvLogisticPrime => OpCode::InvLogisticPrime,
        }
    }

    /// Number of arguments the opcode consumes (0 for leaves).
    #[inline]
    pub fn argc(self) -> usize {
        match self {
            OpCode::Const | OpCode::Param | OpCode::Var => 0,
            OpCode::Add | OpCode::Sub | OpCode::Mul | OpCode::Div | OpCode::Pow => 2,
            _ => 1,
        }
    }
}

/// NaN-propagating sign: `+1` for positives, `-1` for negatives, `0` at
/// zero, NaN for NaN.
#[inline]
pub fn sign<F: Float>(a: F) -> F {
    if a > F::zero() {
        F::one()
    } else if a < F::zero() {
        -F::one()
    } else if a == F::zero() {
        F::zero()
    } else {
        F::nan()
    }
}

/// Standard logistic `1 / (1 + e^{-a})`.
#[inline]
pub fn logistic<F: Float>(a: F) -> F {
    F::one() / (F::one() + (-a).exp())
}

/// Evaluate a single opcode in the forward direction.
///
/// For binary opcodes `a` and `b` are the two operand values; for unary
/// opcodes `b` is ignored. Leaf opcodes are materialized directly from
/// θ/X/constants by the back ends and must not reach this function.
#[inline]
pub fn eval_forward<F: Float>(op: OpCode, a: F, b: F) -> F {
    let one = F::one();
    match op {
        OpCode::Const | OpCode::Param | OpCode::Var => {
            unreachable!("leaf opcodes are materialized by the evaluator, not re-evaluated")
        }

        OpCode::Add => a + b,
        OpCode::Sub => a - b,
        OpCode::Mul => a * b,
        OpCode::Div => a / b,
        OpCode::Neg => -a,

        OpCode::Log => a.ln(),
        OpCode::Exp => a.exp(),
        OpCode::Sqrt => a.sqrt(),
        OpCode::Cbrt => a.cbrt(),

        OpCode::Sin => a.sin(),
        OpCode::Cos => a.cos(),
        OpCode::Cosh => a.cosh(),
        OpCode::Sinh => a.sinh(),
        OpCode::Tanh => a.tanh(),

        OpCode::Pow => a.powf(b),
        OpCode::Abs => a.abs(),
        OpCode::Sign => sign(a),

        OpCode::Logistic => logistic(a),
        OpCode::InvLogistic => (a / (one - a)).ln(),
        OpCode::LogisticPrime => {
            let s = logistic(a);
            s * (one - s)
        }
        OpCode::InvLogisticPrime => one / (a * (one - a)),
    }
}

/// Reverse-mode partial derivatives for a single opcode.
///
/// Returns `(∂r/∂a, ∂r/∂b)`; the second partial is zero for unary opcodes.
/// `a`, `b` are the operand values, `r` the already-computed result.
///
/// Two conventions fixed here (and therefore everywhere):
/// - `Pow`'s base partial is computed as `b·r/a` — algebraically equal to
///   `b·a^(b-1)` but numerically different near poles; this form is the
///   implemented convention.
/// - `Sign`'s derivative is 0 everywhere; the non-differentiable point at
///   zero is ignored.
#[inline]
pub fn reverse_partials<F: Float>(op: OpCode, a: F, b: F, r: F) -> (F, F) {
    let zero = F::zero();
    let one = F::one();
    match op {
        OpCode::Const | OpCode::Param | OpCode::Var => (zero, zero),

        OpCode::Add => (one, one),
        OpCode::Sub => (one, -one),
        OpCode::Mul => (b, a),
        OpCode::Div => {
            let inv = one / b;
            (inv, -a * inv * inv)
        }
        OpCode::Neg => (-one, zero),

        OpCode::Log => (one / a, zero),
        OpCode::Exp => (r, zero), // d/da e^a = e^a = r
        OpCode::Sqrt => {
            let two = one + one;
            (one / (two * r), zero)
        }
        OpCode::Cbrt => {
            let three = F::from(3.0).unwrap();
            (one / (three * r * r), zero)
        }

        OpCode::Sin => (a.cos(), zero),
        OpCode::Cos => (-a.sin(), zero),
        OpCode::Cosh => (a.sinh(), zero),
        OpCode::Sinh => (a.cosh(), zero),
        OpCode::Tanh => {
            let c = a.cosh();
            (one / (c * c), zero)
        }

        OpCode::Pow => {
            // d/da a^b = b·r/a (implemented convention), d/db a^b = r·ln(a)
            (b * r / a, r * a.ln())
        }
        OpCode::Abs => (sign(a), zero),
        OpCode::Sign => (zero, zero),

        OpCode::Logistic => (r * (one - r), zero),
        OpCode::InvLogistic => (one / (a * (one - a)), zero),
        OpCode::LogisticPrime => {
            // d/da s(1-s) = s(1-s)(1-2s) with s = logistic(a)
            let s = logistic(a);
            let two = one + one;
            (s * (one - s) * (one - two * s), zero)
        }
        OpCode::InvLogisticPrime => {
            // d/da 1/(a(1-a)) = (2a-1)/(a²(1-a)²) = (2a-1)·r²
            let two = one + one;
            ((two * a - one) * r * r, zero)
        }
    }
}
