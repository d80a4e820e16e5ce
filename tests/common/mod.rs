#![allow(dead_code)]

use platypus::{ExprArena, Func, NodeId};

pub const N_PARAMS: usize = 5;
pub const N_COLS: usize = 2;

/// Kitchen-sink regression model exercising every elementary function,
/// multi-use parameters (θ0, θ2, θ4 each appear several times) and one
/// shared subtree (`u` feeds both `invlogistic` and `invlogistic_prime`).
///
/// Domains are safe for θ ∈ (0.5, 1.5) and x ∈ (0, 1).
pub fn model(arena: &mut ExprArena<f64>) -> NodeId {
    let t0 = arena.param(0);
    let t1 = arena.param(1);
    let t2 = arena.param(2);
    let t3 = arena.param(3);
    let t4 = arena.param(4);
    let x0 = arena.var(0);
    let x1 = arena.var(1);

    // θ0·e^{-θ1·x0}
    let m = arena.mul(t1, x0);
    let neg = arena.neg(m);
    let e = arena.call(Func::Exp, neg);
    let term1 = arena.mul(t0, e);

    // logistic(θ2·x1)
    let lz = arena.mul(t2, x1);
    let term2 = arena.call(Func::Logistic, lz);

    // sqrt(1 + x0²)·sin(θ3)
    let one = arena.constant(1.0);
    let xx = arena.mul(x0, x0);
    let s = arena.add(one, xx);
    let sq = arena.call(Func::Sqrt, s);
    let sn = arena.call(Func::Sin, t3);
    let term3 = arena.mul(sq, sn);

    // (x1 + 2)^θ4
    let two = arena.constant(2.0);
    let base = arena.add(x1, two);
    let term4 = arena.pow(base, t4);

    // tanh(θ0·x1)
    let tz = arena.mul(t0, x1);
    let term5 = arena.call(Func::Tanh, tz);

    // log(x0 + 1.5)·cosh(θ1·x0)
    let c15 = arena.constant(1.5);
    let lx = arena.add(x0, c15);
    let lg = arena.call(Func::Log, lx);
    let cz = arena.mul(t1, x0);
    let ch = arena.call(Func::Cosh, cz);
    let term6 = arena.mul(lg, ch);

    // sinh(θ2·x0)·cos(θ3·x1)
    let sz = arena.mul(t2, x0);
    let sh = arena.call(Func::Sinh, sz);
    let ca = arena.mul(t3, x1);
    let cs = arena.call(Func::Cos, ca);
    let term7 = arena.mul(sh, cs);

    // logistic_prime(θ2 - x0)
    let d = arena.sub(t2, x0);
    let term8 = arena.call(Func::LogisticPrime, d);

    // u = logistic(θ4 + x1), shared by the next two terms
    let a = arena.add(t4, x1);
    let u = arena.call(Func::Logistic, a);
    let term9 = arena.call(Func::InvLogistic, u);
    let ip = arena.call(Func::InvLogisticPrime, u);
    let sc = arena.constant(0.05);
    let term10 = arena.mul(sc, ip);

    // cbrt(x0 + 2) and abs(θ0 + 1), both away from their kinks
    let two2 = arena.constant(2.0);
    let cb_in = arena.add(x0, two2);
    let term11 = arena.call(Func::Cbrt, cb_in);
    let one2 = arena.constant(1.0);
    let ab_in = arena.add(t0, one2);
    let term12 = arena.call(Func::Abs, ab_in);

    let mut acc = term1;
    for t in [
        term2, term3, term4, term5, term6, term7, term8, term9, term10, term11, term12,
    ] {
        acc = arena.add(acc, t);
    }
    acc
}

/// Deterministic pseudo-random source so failures reproduce exactly.
pub struct Lcg(u64);

impl Lcg {
    pub fn new(seed: u64) -> Self {
        Lcg(seed)
    }

    pub fn next_f64(&mut self) -> f64 {
        self.0 = self
            .0
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        (self.0 >> 11) as f64 / (1u64 << 53) as f64
    }

    pub fn in_range(&mut self, lo: f64, hi: f64) -> f64 {
        lo + (hi - lo) * self.next_f64()
    }
}

pub fn random_theta(rng: &mut Lcg, n: usize) -> Vec<f64> {
    (0..n).map(|_| rng.in_range(0.5, 1.5)).collect()
}

pub fn random_columns(rng: &mut Lcg, n_cols: usize, n_rows: usize) -> Vec<Vec<f64>> {
    (0..n_cols)
        .map(|_| (0..n_rows).map(|_| rng.in_range(0.0, 1.0)).collect())
        .collect()
}

pub fn as_slices(columns: &[Vec<f64>]) -> Vec<&[f64]> {
    columns.iter().map(|c| c.as_slice()).collect()
}

/// Central finite difference of `f` in coordinate `i` of `point`.
pub fn central_diff<G: FnMut(&[f64]) -> f64>(
    mut f: G,
    point: &[f64],
    i: usize,
    eps: f64,
) -> f64 {
    let mut hi = point.to_vec();
    let mut lo = point.to_vec();
    hi[i] += eps;
    lo[i] -= eps;
    (f(&hi) - f(&lo)) / (2.0 * eps)
}
