//! Row-partitioned parallel evaluation on top of the tape interpreter.
//!
//! Rows are independent, so the dataset is split into contiguous chunks and
//! each rayon worker runs its own [`TapeInterpreter`] over its slice of the
//! columns. Results are stitched back in row order, making the output
//! bit-identical to a serial run.

use rayon::prelude::*;

use crate::expr::{ExprArena, NodeId};
use crate::float::Float;
use crate::interpreter::TapeInterpreter;
use crate::validate::{validate, UnsupportedNodeError};

fn chunk_len(n_rows: usize) -> usize {
    let threads = rayon::current_num_threads().max(1);
    ((n_rows + threads - 1) / threads).max(1)
}

fn chunk_columns<'c, F>(columns: &[&'c [F]], start: usize, end: usize) -> Vec<&'c [F]> {
    columns.iter().map(|c| &c[start..end]).collect()
}

/// Evaluate `f(θ, x)` over all rows in parallel.
pub fn evaluate_par<F: Float>(
    arena: &ExprArena<F>,
    root: NodeId,
    theta: &[F],
    columns: &[&[F]],
    n_rows: usize,
    batch_size: usize,
) -> Result<Vec<F>, UnsupportedNodeError> {
    validate(arena, root)?;
    let chunk = chunk_len(n_rows);

    let parts: Result<Vec<Vec<F>>, UnsupportedNodeError> = (0..n_rows)
        .step_by(chunk)
        .collect::<Vec<_>>()
        .into_par_iter()
        .map(|start| {
            let end = (start + chunk).min(n_rows);
            let cols = chunk_columns(columns, start, end);
            let mut interp = TapeInterpreter::new(arena, root, &cols, end - start, batch_size)?;
            Ok(interp.evaluate(theta))
        })
        .collect();

    let mut out = Vec::with_capacity(n_rows);
    for part in parts? {
        out.extend(part);
    }
    Ok(out)
}

/// Evaluate `f` and its Jacobians over all rows in parallel.
///
/// `jac_theta` (`n_rows × n_params`, flat row-major) and `jac_x`
/// (`n_rows × n_cols`) are optional and zeroed before being filled. Row-major
/// layout keeps each chunk's Jacobian rows contiguous, so chunks write
/// disjoint regions.
pub fn evaluate_with_jacobian_par<F: Float>(
    arena: &ExprArena<F>,
    root: NodeId,
    theta: &[F],
    columns: &[&[F]],
    n_rows: usize,
    batch_size: usize,
    mut jac_theta: Option<&mut [F]>,
    mut jac_x: Option<&mut [F]>,
) -> Result<Vec<F>, UnsupportedNodeError> {
    validate(arena, root)?;
    let chunk = chunk_len(n_rows);

    let n_params = width_of(jac_theta.as_deref(), n_rows, "jac_theta");
    let n_cols = width_of(jac_x.as_deref(), n_rows, "jac_x");

    let parts: Result<Vec<(Vec<F>, Vec<F>, Vec<F>)>, UnsupportedNodeError> = (0..n_rows)
        .step_by(chunk)
        .collect::<Vec<_>>()
        .into_par_iter()
        .map(|start| {
            let end = (start + chunk).min(n_rows);
            let rows = end - start;
            let cols = chunk_columns(columns, start, end);
            let mut interp = TapeInterpreter::new(arena, root, &cols, rows, batch_size)?;
            let mut jt = vec![F::zero(); rows * n_params];
            let mut jx = vec![F::zero(); rows * n_cols];
            let values = interp.evaluate_with_jacobian(
                theta,
                if n_params > 0 { Some(&mut jt) } else { None },
                if n_cols > 0 { Some(&mut jx) } else { None },
            );
            Ok((values, jt, jx))
        })
        .collect();

    let mut out = Vec::with_capacity(n_rows);
    let mut t_off = 0usize;
    let mut x_off = 0usize;
    for (values, jt, jx) in parts? {
        out.extend(values);
        if let Some(dst) = jac_theta.as_deref_mut() {
            dst[t_off..t_off + jt.len()].copy_from_slice(&jt);
            t_off += jt.len();
        }
        if let Some(dst) = jac_x.as_deref_mut() {
            dst[x_off..x_off + jx.len()].copy_from_slice(&jx);
            x_off += jx.len();
        }
    }
    Ok(out)
}

fn width_of<F>(jac: Option<&[F]>, n_rows: usize, what: &str) -> usize {
    match jac {
        None => 0,
        Some(j) if n_rows == 0 => {
            assert!(j.is_empty(), "{what} must be empty for a zero-row dataset");
            0
        }
        Some(j) => {
            assert!(
                j.len() % n_rows == 0,
                "{what} length must be a multiple of n_rows"
            );
            j.len() / n_rows
        }
    }
}
