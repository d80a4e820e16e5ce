mod common;

use approx::assert_relative_eq;
use platypus::{ExprArena, Func, TapeInterpreter};

use common::{as_slices, central_diff, Lcg};

#[test]
fn scaled_input_value_and_jacobians() {
    // f = θ0·x0 at θ0 = 3, x0 = 2.
    let mut arena: ExprArena<f64> = ExprArena::new();
    let t0 = arena.param(0);
    let x0 = arena.var(0);
    let root = arena.mul(t0, x0);

    let col = [2.0];
    let cols: [&[f64]; 1] = [&col];
    let mut interp = TapeInterpreter::new(&arena, root, &cols, 1, 8).unwrap();

    let mut jt = [0.0; 1];
    let mut jx = [0.0; 1];
    let f = interp.evaluate_with_jacobian(&[3.0], Some(&mut jt), Some(&mut jx));

    assert_relative_eq!(f[0], 6.0);
    assert_relative_eq!(jt[0], 2.0); // ∂f/∂θ0 = x0
    assert_relative_eq!(jx[0], 3.0); // ∂f/∂x0 = θ0
}

#[test]
fn parameter_free_expression_has_zero_theta_jacobian() {
    // f = exp(x0) reads no parameter at all.
    let mut arena: ExprArena<f64> = ExprArena::new();
    let x0 = arena.var(0);
    let root = arena.call(Func::Exp, x0);

    let col = [0.0, 1.0, -1.0];
    let cols: [&[f64]; 1] = [&col];
    let mut interp = TapeInterpreter::new(&arena, root, &cols, 3, 2).unwrap();

    let mut jt = [f64::NAN; 3]; // 3 rows × 1 requested parameter
    let f = interp.evaluate_with_jacobian(&[], Some(&mut jt), None);

    for (row, &x) in col.iter().enumerate() {
        assert_relative_eq!(f[row], x.exp());
        assert_eq!(jt[row], 0.0);
    }
}

#[test]
fn pow_with_parameter_base() {
    // f = θ0^x0 at θ0 = 2, x0 = 3: f = 8, ∂f/∂θ0 = x0·f/θ0 = 12.
    let mut arena: ExprArena<f64> = ExprArena::new();
    let t0 = arena.param(0);
    let x0 = arena.var(0);
    let root = arena.pow(t0, x0);

    let col = [3.0];
    let cols: [&[f64]; 1] = [&col];
    let mut interp = TapeInterpreter::new(&arena, root, &cols, 1, 4).unwrap();

    let mut jt = [0.0; 1];
    let f = interp.evaluate_with_jacobian(&[2.0], Some(&mut jt), None);

    assert_relative_eq!(f[0], 8.0);
    assert_relative_eq!(jt[0], 12.0);
}

#[test]
fn multi_use_parameter_accumulates() {
    // f = θ0·x0 + θ0·θ0: ∂f/∂θ0 = x0 + 2θ0.
    let mut arena: ExprArena<f64> = ExprArena::new();
    let t0 = arena.param(0);
    let x0 = arena.var(0);
    let a = arena.mul(t0, x0);
    let b = arena.mul(t0, t0);
    let root = arena.add(a, b);

    let col = [2.0];
    let cols: [&[f64]; 1] = [&col];
    let mut interp = TapeInterpreter::new(&arena, root, &cols, 1, 1).unwrap();

    let mut jt = [0.0; 1];
    let f = interp.evaluate_with_jacobian(&[3.0], Some(&mut jt), None);

    assert_relative_eq!(f[0], 15.0);
    assert_relative_eq!(jt[0], 8.0);
}

#[test]
fn evaluate_matches_evaluate_with_jacobian() {
    let mut arena = ExprArena::new();
    let root = common::model(&mut arena);

    let mut rng = Lcg::new(7);
    let n_rows = 37;
    let columns = common::random_columns(&mut rng, common::N_COLS, n_rows);
    let cols = as_slices(&columns);
    let theta = common::random_theta(&mut rng, common::N_PARAMS);

    let mut interp = TapeInterpreter::new(&arena, root, &cols, n_rows, 8).unwrap();
    let plain = interp.evaluate(&theta);
    let mut jt = vec![0.0; n_rows * common::N_PARAMS];
    let with_jac = interp.evaluate_with_jacobian(&theta, Some(&mut jt), None);

    assert_eq!(plain, with_jac);
}

#[test]
fn theta_jacobian_matches_finite_differences() {
    let mut arena = ExprArena::new();
    let root = common::model(&mut arena);

    let mut rng = Lcg::new(42);
    let n_rows = 25;
    let columns = common::random_columns(&mut rng, common::N_COLS, n_rows);
    let cols = as_slices(&columns);
    let theta = common::random_theta(&mut rng, common::N_PARAMS);

    let mut interp = TapeInterpreter::new(&arena, root, &cols, n_rows, 6).unwrap();
    let mut jt = vec![0.0; n_rows * common::N_PARAMS];
    interp.evaluate_with_jacobian(&theta, Some(&mut jt), None);

    for p in 0..common::N_PARAMS {
        let mut hi = theta.clone();
        let mut lo = theta.clone();
        hi[p] += 1e-6;
        lo[p] -= 1e-6;
        let fh = interp.evaluate(&hi);
        let fl = interp.evaluate(&lo);
        let fd_col: Vec<f64> = fh.iter().zip(&fl).map(|(h, l)| (h - l) / 2e-6).collect();
        for row in 0..n_rows {
            assert_relative_eq!(
                jt[row * common::N_PARAMS + p],
                fd_col[row],
                max_relative = 1e-5,
                epsilon = 1e-7
            );
        }
    }
}

#[test]
fn x_jacobian_matches_finite_differences() {
    // Smooth in x (no abs/cbrt kinks near the sampled range).
    let mut arena: ExprArena<f64> = ExprArena::new();
    let t0 = arena.param(0);
    let t1 = arena.param(1);
    let x0 = arena.var(0);
    let x1 = arena.var(1);
    let m = arena.mul(t1, x0);
    let e = arena.call(Func::Exp, m);
    let a = arena.mul(t0, e);
    let lz = arena.mul(x0, x1);
    let l = arena.call(Func::Logistic, lz);
    let root = arena.add(a, l);

    let mut rng = Lcg::new(11);
    let n_rows = 10;
    let columns = common::random_columns(&mut rng, 2, n_rows);
    let theta = [0.7, -0.4];

    let cols = as_slices(&columns);
    let mut interp = TapeInterpreter::new(&arena, root, &cols, n_rows, 4).unwrap();
    let mut jx = vec![0.0; n_rows * 2];
    interp.evaluate_with_jacobian(&theta, None, Some(&mut jx));

    for row in 0..n_rows {
        for c in 0..2 {
            let point = [columns[0][row], columns[1][row]];
            let fd = central_diff(
                |x| {
                    let xc0 = [x[0]];
                    let xc1 = [x[1]];
                    let one_row: [&[f64]; 2] = [&xc0, &xc1];
                    let mut i1 = TapeInterpreter::new(&arena, root, &one_row, 1, 1).unwrap();
                    i1.evaluate(&theta)[0]
                },
                &point,
                c,
                1e-6,
            );
            assert_relative_eq!(jx[row * 2 + c], fd, max_relative = 1e-5, epsilon = 1e-8);
        }
    }
}

#[test]
fn nan_propagates_instead_of_erroring() {
    // log of a negative input is NaN and flows through untouched.
    let mut arena: ExprArena<f64> = ExprArena::new();
    let x0 = arena.var(0);
    let l = arena.call(Func::Log, x0);
    let t0 = arena.param(0);
    let root = arena.mul(t0, l);

    let col = [-1.0, 1.0];
    let cols: [&[f64]; 1] = [&col];
    let mut interp = TapeInterpreter::new(&arena, root, &cols, 2, 2).unwrap();
    let mut jt = [0.0; 2];
    let f = interp.evaluate_with_jacobian(&[2.0], Some(&mut jt), None);

    assert!(f[0].is_nan());
    assert!(jt[0].is_nan());
    assert_relative_eq!(f[1], 0.0);
    assert_relative_eq!(jt[1], 0.0);
}

#[test]
#[should_panic(expected = "column 0 has the wrong length")]
fn mismatched_column_length_panics() {
    let mut arena: ExprArena<f64> = ExprArena::new();
    let x0 = arena.var(0);
    let root = arena.call(Func::Exp, x0);
    let col = [1.0, 2.0];
    let cols: [&[f64]; 1] = [&col];
    let _ = TapeInterpreter::new(&arena, root, &cols, 3, 1);
}

#[test]
#[should_panic(expected = "only 1 columns were supplied")]
fn missing_variable_column_panics() {
    let mut arena: ExprArena<f64> = ExprArena::new();
    let x1 = arena.var(1);
    let root = arena.call(Func::Exp, x1);
    let col = [1.0];
    let cols: [&[f64]; 1] = [&col];
    let _ = TapeInterpreter::new(&arena, root, &cols, 1, 1);
}
