mod common;

use platypus::{ExprArena, TapeInterpreter};

use common::{as_slices, Lcg};

/// Batch size is a throughput knob, never a semantic one: every row sees the
/// same per-element operation sequence regardless of how rows are grouped,
/// so outputs are bit-identical across batch sizes.
#[test]
fn results_are_invariant_under_batch_size() {
    let mut arena = ExprArena::new();
    let root = common::model(&mut arena);

    let mut rng = Lcg::new(1234);
    let n_rows = 100;
    let columns = common::random_columns(&mut rng, common::N_COLS, n_rows);
    let cols = as_slices(&columns);
    let theta = common::random_theta(&mut rng, common::N_PARAMS);

    let mut reference: Option<(Vec<f64>, Vec<f64>, Vec<f64>)> = None;
    for batch in [1, 7, 64, 100, 1000] {
        let mut interp = TapeInterpreter::new(&arena, root, &cols, n_rows, batch).unwrap();
        let mut jt = vec![0.0; n_rows * common::N_PARAMS];
        let mut jx = vec![0.0; n_rows * common::N_COLS];
        let f = interp.evaluate_with_jacobian(&theta, Some(&mut jt), Some(&mut jx));

        match &reference {
            None => reference = Some((f, jt, jx)),
            Some((rf, rjt, rjx)) => {
                assert_eq!(&f, rf, "values differ at batch size {}", batch);
                assert_eq!(&jt, rjt, "theta jacobian differs at batch size {}", batch);
                assert_eq!(&jx, rjx, "x jacobian differs at batch size {}", batch);
            }
        }
    }
}

/// A batch size larger than the row count is clipped, and a final short
/// batch (97 = 8·12 + 1) is handled like any other.
#[test]
fn short_final_batch_and_oversized_batch() {
    let mut arena = ExprArena::new();
    let root = common::model(&mut arena);

    let mut rng = Lcg::new(5);
    let n_rows = 97;
    let columns = common::random_columns(&mut rng, common::N_COLS, n_rows);
    let cols = as_slices(&columns);
    let theta = common::random_theta(&mut rng, common::N_PARAMS);

    let mut a = TapeInterpreter::new(&arena, root, &cols, n_rows, 8).unwrap();
    let mut b = TapeInterpreter::new(&arena, root, &cols, n_rows, 10_000).unwrap();
    assert_eq!(a.evaluate(&theta), b.evaluate(&theta));
}

/// Zero rows is a valid dataset; zero batch size is bumped to one.
#[test]
fn degenerate_shapes() {
    let mut arena: ExprArena<f64> = ExprArena::new();
    let t0 = arena.param(0);
    let x0 = arena.var(0);
    let root = arena.mul(t0, x0);

    let empty: [f64; 0] = [];
    let cols: [&[f64]; 1] = [&empty];
    let mut interp = TapeInterpreter::new(&arena, root, &cols, 0, 0).unwrap();
    assert!(interp.evaluate(&[2.0]).is_empty());

    // Requesting Jacobians over zero rows is legal; the matrices are empty.
    let mut jt: [f64; 0] = [];
    let mut jx: [f64; 0] = [];
    let f = interp.evaluate_with_jacobian(&[2.0], Some(&mut jt), Some(&mut jx));
    assert!(f.is_empty());

    let col = [1.0, 2.0];
    let cols: [&[f64]; 1] = [&col];
    let mut interp = TapeInterpreter::new(&arena, root, &cols, 2, 0).unwrap();
    assert_eq!(interp.evaluate(&[2.0]), vec![2.0, 4.0]);
}
