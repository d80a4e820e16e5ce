//! Compiled Jacobian kernel: a resolved-slot instruction program.
//!
//! [`JacobianKernel::compile`] lowers an expression into two straight-line
//! instruction lists with every operand resolved to a concrete buffer slot
//! at compile time. Execution is then a tight loop over instructions with
//! plain index arithmetic, no tree walk and no per-node dispatch beyond the
//! opcode itself. Value and adjoint buffers are sized `slots × n_rows` at
//! compile time, so the row count is fixed per kernel.
//!
//! The per-opcode numeric formulas come from [`opcode::eval_forward`] and
//! [`opcode::reverse_partials`], shared with the tape interpreter.

use crate::expr::{ExprArena, Node, NodeId};
use crate::float::Float;
use crate::opcode::{self, OpCode};
use crate::validate::{validate, UnsupportedNodeError};

/// Forward instruction over row-major slot buffers.
#[derive(Debug, Clone, Copy)]
enum FwdInstr<F> {
    Const { dst: u32, value: F },
    Param { dst: u32, idx: u32 },
    Var { dst: u32, idx: u32 },
    Op { op: OpCode, dst: u32, a: u32, b: u32 },
}

/// Reverse instruction. `Backprop` pushes a node's adjoint into its
/// children; `Accumulate` folds a parameter leaf's adjoint into the
/// Jacobian column.
#[derive(Debug, Clone, Copy)]
enum RevInstr {
    Backprop { op: OpCode, node: u32, a: u32, b: u32 },
    Accumulate { node: u32, idx: u32 },
}

/// Expression compiled to a fixed-shape `f` + `∂f/∂θ` evaluator.
///
/// Equivalent to the tape interpreter on the same expression, trading its
/// flexibility (any row count, x-Jacobians) for resolved operands and
/// buffers laid out for the one dataset shape it was compiled against.
#[derive(Debug)]
pub struct JacobianKernel<F: Float> {
    fwd: Vec<FwdInstr<F>>,
    rev: Vec<RevInstr>,
    root: u32,
    n_params: usize,
    n_cols: usize,
    n_rows: usize,
    values: Vec<F>,
    adjoints: Vec<F>,
}

impl<F: Float> JacobianKernel<F> {
    /// Compile the subtree at `root` for a dataset of exactly `n_rows` rows.
    ///
    /// Shared subtrees are emitted once per occurrence, each with its own
    /// slot. Parameter indices must lie below `n_params`; out-of-range ones
    /// are rejected rather than silently widening the Jacobian.
    pub fn compile(
        arena: &ExprArena<F>,
        root: NodeId,
        n_params: usize,
        n_rows: usize,
    ) -> Result<Self, UnsupportedNodeError> {
        validate(arena, root)?;

        let mut fwd = Vec::new();
        let mut rev = Vec::new();
        let mut n_cols = 0usize;
        let root_slot = emit(arena, root, n_params, &mut fwd, &mut rev, &mut n_cols)?;

        let slots = fwd.len();
        Ok(JacobianKernel {
            fwd,
            rev,
            root: root_slot,
            n_params,
            n_cols,
            n_rows,
            values: vec![F::zero(); slots * n_rows],
            adjoints: vec![F::zero(); slots * n_rows],
        })
    }

    /// Row count the kernel was compiled for.
    #[inline]
    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    /// Number of forward instructions (one buffer slot each).
    #[inline]
    pub fn n_slots(&self) -> usize {
        self.fwd.len()
    }

    /// Run the kernel: fill `f_out` with `f(θ, x)` per row and, when
    /// `jac_out` is given, the flat row-major `n_rows × n_params`
    /// θ-Jacobian (cleared first).
    pub fn call(
        &mut self,
        theta: &[F],
        columns: &[&[F]],
        f_out: &mut [F],
        jac_out: Option<&mut [F]>,
    ) {
        let n = self.n_rows;
        assert_eq!(f_out.len(), n, "f_out length must match compiled row count");
        assert!(
            columns.len() >= self.n_cols,
            "expression reads x[{}] but only {} columns supplied",
            self.n_cols.saturating_sub(1),
            columns.len()
        );
        for (i, col) in columns.iter().enumerate().take(self.n_cols) {
            assert_eq!(col.len(), n, "column {i} length must match compiled row count");
        }
        assert!(
            theta.len() >= self.n_params,
            "kernel compiled for {} parameters, got {}",
            self.n_params,
            theta.len()
        );

        self.forward(theta, columns);
        let root = self.root as usize;
        f_out.copy_from_slice(&self.values[root * n..(root + 1) * n]);

        if let Some(jac) = jac_out {
            assert_eq!(
                jac.len(),
                n * self.n_params,
                "jac_out length must be n_rows * n_params"
            );
            jac.fill(F::zero());
            self.reverse(jac);
        }
    }

    fn forward(&mut self, theta: &[F], columns: &[&[F]]) {
        let n = self.n_rows;
        for instr in &self.fwd {
            match *instr {
                FwdInstr::Const { dst, value } => {
                    let dst = dst as usize * n;
                    self.values[dst..dst + n].fill(value);
                }
                FwdInstr::Param { dst, idx } => {
                    let dst = dst as usize * n;
                    self.values[dst..dst + n].fill(theta[idx as usize]);
                }
                FwdInstr::Var { dst, idx } => {
                    let dst = dst as usize * n;
                    self.values[dst..dst + n].copy_from_slice(columns[idx as usize]);
                }
                FwdInstr::Op { op, dst, a, b } => {
                    let dst = dst as usize * n;
                    let a = a as usize * n;
                    let b = if b == opcode::UNUSED { a } else { b as usize * n };
                    for k in 0..n {
                        let va = self.values[a + k];
                        let vb = self.values[b + k];
                        self.values[dst + k] = opcode::eval_forward(op, va, vb);
                    }
                }
            }
        }
    }

    fn reverse(&mut self, jac: &mut [F]) {
        let n = self.n_rows;
        let np = self.n_params;

        self.adjoints.fill(F::zero());
        let root = self.root as usize * n;
        self.adjoints[root..root + n].fill(F::one());

        // Reverse program order is decreasing slot order, so every node's
        // adjoint is final before it backpropagates.
        for instr in self.rev.iter().rev() {
            match *instr {
                RevInstr::Backprop { op, node, a, b } => {
                    let node = node as usize * n;
                    let a = a as usize * n;
                    for k in 0..n {
                        let adj = self.adjoints[node + k];
                        let va = self.values[a + k];
                        let (vb, bo) = if b == opcode::UNUSED {
                            (F::zero(), a)
                        } else {
                            let bo = b as usize * n;
                            (self.values[bo + k], bo)
                        };
                        let r = self.values[node + k];
                        let (pa, pb) = opcode::reverse_partials(op, va, vb, r);
                        self.adjoints[a + k] = self.adjoints[a + k] + adj * pa;
                        if b != opcode::UNUSED {
                            self.adjoints[bo + k] = self.adjoints[bo + k] + adj * pb;
                        }
                    }
                }
                RevInstr::Accumulate { node, idx } => {
                    let node = node as usize * n;
                    let idx = idx as usize;
                    for k in 0..n {
                        jac[k * np + idx] = jac[k * np + idx] + self.adjoints[node + k];
                    }
                }
            }
        }
    }
}

/// Emit the slot program for one subtree, returning its result slot.
///
/// Both programs share node order: the reverse list gets one instruction
/// per non-leaf (`Backprop`) or parameter leaf (`Accumulate`), appended in
/// emission order and executed reversed.
fn emit<F: Float>(
    arena: &ExprArena<F>,
    id: NodeId,
    n_params: usize,
    fwd: &mut Vec<FwdInstr<F>>,
    rev: &mut Vec<RevInstr>,
    n_cols: &mut usize,
) -> Result<u32, UnsupportedNodeError> {
    let slot = match *arena.node(id) {
        Node::Const(value) => {
            let dst = fwd.len() as u32;
            fwd.push(FwdInstr::Const { dst, value });
            dst
        }
        Node::Param(idx) => {
            if idx >= n_params {
                return Err(UnsupportedNodeError::new(
                    arena.display(id).to_string(),
                    "parameter index out of range for this kernel",
                ));
            }
            let dst = fwd.len() as u32;
            fwd.push(FwdInstr::Param { dst, idx: idx as u32 });
            rev.push(RevInstr::Accumulate { node: dst, idx: idx as u32 });
            dst
        }
        Node::Var(idx) => {
            *n_cols = (*n_cols).max(idx + 1);
            let dst = fwd.len() as u32;
            fwd.push(FwdInstr::Var { dst, idx: idx as u32 });
            dst
        }
        Node::Neg(a) => {
            let a = emit(arena, a, n_params, fwd, rev, n_cols)?;
            push_op(fwd, rev, OpCode::Neg, a, opcode::UNUSED)
        }
        Node::Bin(op, a, b) => {
            let a = emit(arena, a, n_params, fwd, rev, n_cols)?;
            let b = emit(arena, b, n_params, fwd, rev, n_cols)?;
            push_op(fwd, rev, OpCode::from_bin(op), a, b)
        }
        Node::Call(f, a, b) => {
            let a = emit(arena, a, n_params, fwd, rev, n_cols)?;
            let b = match b {
                Some(b) => emit(arena, b, n_params, fwd, rev, n_cols)?,
                None => opcode::UNUSED,
            };
            push_op(fwd, rev, OpCode::from_func(f), a, b)
        }
    };
    Ok(slot)
}

fn push_op<F: Float>(
    fwd: &mut Vec<FwdInstr<F>>,
    rev: &mut Vec<RevInstr>,
    op: OpCode,
    a: u32,
    b: u32,
) -> u32 {
    let dst = fwd.len() as u32;
    fwd.push(FwdInstr::Op { op, dst, a, b });
    rev.push(RevInstr::Backprop { op, node: dst, a, b });
    dst
}
