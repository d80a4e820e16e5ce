//! Batched tape interpreter: forward evaluation and reverse-mode Jacobians.
//!
//! Rows are processed in batches; within a batch, execution is column-major:
//! each tape entry's loop runs over the whole batch before the next entry is
//! touched, so every inner loop is one uniform arithmetic operation over
//! contiguous buffers. The interpreter owns one value and one adjoint buffer
//! of `tape length × batch` and reuses them across calls — a single instance
//! must therefore not be shared across concurrent calls; make one instance
//! per worker instead (see [`crate::parallel`]).

use crate::expr::{ExprArena, NodeId};
use crate::float::Float;
use crate::opcode::{self, OpCode};
use crate::tape::{flatten, Tape};
use crate::validate::{validate, UnsupportedNodeError};

/// Tape-based evaluator for one expression over one dataset.
///
/// The dataset (column slices) and batch size are fixed at construction;
/// `θ` varies per call.
pub struct TapeInterpreter<F: Float> {
    tape: Tape<F>,
    columns: Vec<Vec<F>>,
    n_rows: usize,
    batch: usize,
    values: Vec<F>,
    adjoints: Vec<F>,
    /// Minimum θ length required, 0 if no parameter is referenced.
    min_theta: usize,
}

impl<F: Float> TapeInterpreter<F> {
    /// Validate and flatten `root`, snapshot the dataset, and preallocate
    /// the batch buffers.
    ///
    /// `batch_size` is clipped to the row count; the final batch may be
    /// short. Panics if a column's length disagrees with `n_rows` or the
    /// expression references a variable the dataset does not provide —
    /// those are caller shape bugs, not expression errors.
    pub fn new(
        arena: &ExprArena<F>,
        root: NodeId,
        columns: &[&[F]],
        n_rows: usize,
        batch_size: usize,
    ) -> Result<Self, UnsupportedNodeError> {
        validate(arena, root)?;
        Ok(Self::from_tape(flatten(arena, root), columns, n_rows, batch_size))
    }

    /// Build an interpreter around an already-flattened tape, for instance
    /// one restored from storage.
    ///
    /// Same shape checks as [`TapeInterpreter::new`]; a structurally corrupt
    /// tape panics rather than producing a wrong Jacobian.
    pub fn from_tape(tape: Tape<F>, columns: &[&[F]], n_rows: usize, batch_size: usize) -> Self {
        check_tape(&tape);

        for (i, col) in columns.iter().enumerate() {
            assert_eq!(col.len(), n_rows, "column {} has the wrong length", i);
        }
        if let Some(max_var) = tape.max_var() {
            assert!(
                max_var < columns.len(),
                "expression reads x[{}] but only {} columns were supplied",
                max_var,
                columns.len()
            );
        }

        let batch = batch_size.max(1).min(n_rows.max(1));
        let n = tape.len();
        TapeInterpreter {
            min_theta: tape.max_param().map_or(0, |p| p + 1),
            tape,
            columns: columns.iter().map(|c| c.to_vec()).collect(),
            n_rows,
            batch,
            values: vec![F::zero(); n * batch],
            adjoints: vec![F::zero(); n * batch],
        }
    }

    /// Number of dataset rows.
    #[inline]
    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    /// The flattened tape this interpreter runs.
    #[inline]
    pub fn tape(&self) -> &Tape<F> {
        &self.tape
    }

    /// Evaluate `f(θ, x)` for every row.
    pub fn evaluate(&mut self, theta: &[F]) -> Vec<F> {
        assert!(
            theta.len() >= self.min_theta,
            "theta has {} entries but the expression reads theta[{}]",
            theta.len(),
            self.min_theta - 1
        );

        let mut out = vec![F::zero(); self.n_rows];
        let root = self.tape.len() - 1;
        let mut start = 0;
        while start < self.n_rows {
            let width = self.batch.min(self.n_rows - start);
            self.forward_batch(start, width, theta);
            let base = root * self.batch;
            out[start..start + width].copy_from_slice(&self.values[base..base + width]);
            start += width;
        }
        out
    }

    /// Evaluate `f` and accumulate the requested Jacobians.
    ///
    /// `jac_theta` is the flat row-major `∂f/∂θ` matrix
    /// (`n_rows × n_params`), `jac_x` the flat row-major `∂f/∂x` matrix
    /// (`n_rows × n_cols`). Both are caller-allocated; whichever is
    /// requested is zeroed here before accumulation. A parameter index that
    /// occurs several times accumulates — multi-use θ entries are legal.
    /// On a zero-row dataset a requested Jacobian must be the empty slice.
    pub fn evaluate_with_jacobian(
        &mut self,
        theta: &[F],
        mut jac_theta: Option<&mut [F]>,
        mut jac_x: Option<&mut [F]>,
    ) -> Vec<F> {
        assert!(
            theta.len() >= self.min_theta,
            "theta has {} entries but the expression reads theta[{}]",
            theta.len(),
            self.min_theta - 1
        );

        let n_params = match jac_theta.as_deref_mut() {
            Some(jt) if self.n_rows == 0 => {
                assert!(
                    jt.is_empty(),
                    "jac_theta must be empty for a zero-row dataset"
                );
                0
            }
            Some(jt) => {
                assert!(
                    jt.len() % self.n_rows == 0,
                    "jac_theta length {} is not a multiple of n_rows {}",
                    jt.len(),
                    self.n_rows
                );
                let np = jt.len() / self.n_rows;
                assert!(
                    np >= self.min_theta,
                    "jac_theta has {} columns but the expression reads theta[{}]",
                    np,
                    self.min_theta - 1
                );
                jt.fill(F::zero());
                np
            }
            None => 0,
        };
        let n_cols = match jac_x.as_deref_mut() {
            Some(jx) if self.n_rows == 0 => {
                assert!(jx.is_empty(), "jac_x must be empty for a zero-row dataset");
                0
            }
            Some(jx) => {
                assert!(
                    jx.len() % self.n_rows == 0,
                    "jac_x length {} is not a multiple of n_rows {}",
                    jx.len(),
                    self.n_rows
                );
                let nc = jx.len() / self.n_rows;
                assert!(
                    nc >= self.columns.len(),
                    "jac_x has {} columns but the dataset has {}",
                    nc,
                    self.columns.len()
                );
                jx.fill(F::zero());
                nc
            }
            None => 0,
        };

        let mut out = vec![F::zero(); self.n_rows];
        let root = self.tape.len() - 1;
        let mut start = 0;
        while start < self.n_rows {
            let width = self.batch.min(self.n_rows - start);
            self.forward_batch(start, width, theta);
            let base = root * self.batch;
            out[start..start + width].copy_from_slice(&self.values[base..base + width]);
            self.reverse_batch(
                start,
                width,
                n_params,
                n_cols,
                jac_theta.as_deref_mut(),
                jac_x.as_deref_mut(),
            );
            start += width;
        }
        out
    }

    /// Forward sweep over one batch: increasing tape order, each entry's
    /// value buffer computed from its children's already-computed buffers.
    fn forward_batch(&mut self, start: usize, width: usize, theta: &[F]) {
        let b = self.batch;
        for i in 0..self.tape.len() {
            let e = self.tape.entries()[i];
            let (lo, hi) = self.values.split_at_mut(i * b);
            let dst = &mut hi[..width];
            match e.op {
                OpCode::Const => dst.fill(e.value),
                OpCode::Param => dst.fill(theta[e.idx as usize]),
                OpCode::Var => {
                    let col = &self.columns[e.idx as usize];
                    dst.copy_from_slice(&col[start..start + width]);
                }
                op => {
                    let [a, bb] = self.tape.args(i);
                    let va = &lo[a * b..a * b + width];
                    if e.argc == 1 {
                        for k in 0..width {
                            dst[k] = opcode::eval_forward(op, va[k], F::zero());
                        }
                    } else {
                        let vb = &lo[bb * b..bb * b + width];
                        for k in 0..width {
                            dst[k] = opcode::eval_forward(op, va[k], vb[k]);
                        }
                    }
                }
            }
        }
    }

    /// Reverse sweep over one batch: seed the root adjoint with 1, walk the
    /// tape in decreasing order pushing adjoints into children, and drain
    /// leaf adjoints into the requested Jacobians.
    fn reverse_batch(
        &mut self,
        start: usize,
        width: usize,
        n_params: usize,
        n_cols: usize,
        mut jac_theta: Option<&mut [F]>,
        mut jac_x: Option<&mut [F]>,
    ) {
        let b = self.batch;
        let n = self.tape.len();
        self.adjoints[..n * b].fill(F::zero());
        let root_base = (n - 1) * b;
        self.adjoints[root_base..root_base + width].fill(F::one());

        for i in (0..n).rev() {
            let e = self.tape.entries()[i];
            match e.op {
                OpCode::Const => {}
                OpCode::Param => {
                    if let Some(jt) = jac_theta.as_deref_mut() {
                        let idx = e.idx as usize;
                        let adj = &self.adjoints[i * b..i * b + width];
                        for k in 0..width {
                            let cell = (start + k) * n_params + idx;
                            jt[cell] = jt[cell] + adj[k];
                        }
                    }
                }
                OpCode::Var => {
                    if let Some(jx) = jac_x.as_deref_mut() {
                        let idx = e.idx as usize;
                        let adj = &self.adjoints[i * b..i * b + width];
                        for k in 0..width {
                            let cell = (start + k) * n_cols + idx;
                            jx[cell] = jx[cell] + adj[k];
                        }
                    }
                }
                op => {
                    let [a, bb] = self.tape.args(i);
                    let (lo, hi) = self.adjoints.split_at_mut(i * b);
                    let adj = &hi[..width];
                    let r = &self.values[i * b..i * b + width];
                    let va = &self.values[a * b..a * b + width];
                    if e.argc == 1 {
                        let aa = &mut lo[a * b..a * b + width];
                        for k in 0..width {
                            let (da, _) = opcode::reverse_partials(op, va[k], F::zero(), r[k]);
                            aa[k] = aa[k] + da * adj[k];
                        }
                    } else {
                        let vb = &self.values[bb * b..bb * b + width];
                        // a < bb in postorder, so split once more for two
                        // disjoint mutable child chunks.
                        let (l2, h2) = lo.split_at_mut(bb * b);
                        let aa = &mut l2[a * b..a * b + width];
                        let ab = &mut h2[..width];
                        for k in 0..width {
                            let (da, db) = opcode::reverse_partials(op, va[k], vb[k], r[k]);
                            aa[k] = aa[k] + da * adj[k];
                            ab[k] = ab[k] + db * adj[k];
                        }
                    }
                }
            }
        }
    }
}

/// Structural sanity check: entry argument counts must match their opcodes
/// and child walks must stay inside the tape. A failure here is a
/// programming-logic error (a corrupt tape), so it aborts loudly rather
/// than risking a silently wrong Jacobian.
fn check_tape<F: Float>(tape: &Tape<F>) {
    assert!(!tape.is_empty(), "empty tape");
    for (i, e) in tape.entries().iter().enumerate() {
        assert_eq!(
            e.argc as usize,
            e.op.argc(),
            "tape entry {} ({:?}) has argc {}",
            i,
            e.op,
            e.argc
        );
        if e.argc > 0 {
            let args = tape.args(i);
            let mut span = 1u32;
            for &p in args.iter().take(e.argc as usize) {
                assert!(p < i, "tape entry {} has a forward child reference", i);
                span += tape.entries()[p].len;
            }
            assert_eq!(
                span, e.len,
                "tape entry {} has an inconsistent subtree length",
                i
            );
        }
    }
}
