//! Complex-valued linear least-squares back-ends: `min ||A x - b||` for a
//! dense M x N matrix `A` (M >= N) and right-hand side `b`. Selected by
//! [`LlsAlgorithm`], matching the `llssolver` configuration key.
//!
//! SVD here is a pragmatic simplification: rather than a full bidiagonal
//! SVD of `A`, singular values/vectors are obtained from a Jacobi
//! eigendecomposition of the Hermitian normal matrix `A^H A`, which is
//! exactly what this crate needs (a rank-truncated pseudo-inverse) without
//! needing the left singular vectors `U`.

use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use num_complex::Complex64;
use serde::{Deserialize, Serialize};

#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    strum_macros::EnumString,
    strum_macros::Display,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "lowercase")]
pub enum LlsAlgorithm {
    Qr,
    #[strum(serialize = "normalequations")]
    NormalEquations,
    Svd,
}

#[derive(Clone, Debug)]
pub enum LlsOutcome {
    Solved(Array1<Complex64>),
    /// The chosen method detected rank deficiency (a zero pivot or a
    /// singular/near-singular normal matrix).
    RankDeficient,
}

const RANK_DEFICIENT_EPS: f64 = 1e-10;
/// Relative (to the largest singular value squared) truncation threshold
/// used by the SVD back-end.
const SVD_TRUNCATION_TOLERANCE: f64 = 1e-8;

pub fn solve(
    algorithm: LlsAlgorithm,
    a: ArrayView2<Complex64>,
    b: ArrayView1<Complex64>,
) -> LlsOutcome {
    assert_eq!(a.nrows(), b.len(), "A and b have incompatible shapes");
    match algorithm {
        LlsAlgorithm::Qr => solve_qr(a, b),
        LlsAlgorithm::NormalEquations => solve_normal_equations(a, b),
        LlsAlgorithm::Svd => solve_svd(a, b),
    }
}

fn hermitian_dot(u: &ArrayView1<Complex64>, v: &ArrayView1<Complex64>) -> Complex64 {
    u.iter().zip(v.iter()).map(|(a, b)| a.conj() * b).sum()
}

fn col_norm(v: &ArrayView1<Complex64>) -> f64 {
    v.iter().map(|c| c.norm_sqr()).sum::<f64>().sqrt()
}

/// Modified Gram-Schmidt QR factorisation, then back-substitution on
/// `R x = Q^H b`.
fn solve_qr(a: ArrayView2<Complex64>, b: ArrayView1<Complex64>) -> LlsOutcome {
    let (m, n) = a.dim();
    let mut q = Array2::<Complex64>::zeros((m, n));
    let mut r = Array2::<Complex64>::zeros((n, n));

    for j in 0..n {
        let mut v = a.column(j).to_owned();
        for i in 0..j {
            let qi = q.column(i);
            let rij = hermitian_dot(&qi, &v.view());
            r[[i, j]] = rij;
            for k in 0..m {
                v[k] -= rij * qi[k];
            }
        }
        let norm = col_norm(&v.view());
        if norm < RANK_DEFICIENT_EPS {
            return LlsOutcome::RankDeficient;
        }
        r[[j, j]] = Complex64::new(norm, 0.0);
        for k in 0..m {
            q[[k, j]] = v[k] / norm;
        }
    }

    let mut qtb = Array1::<Complex64>::zeros(n);
    for i in 0..n {
        qtb[i] = hermitian_dot(&q.column(i), &b);
    }

    let mut x = Array1::<Complex64>::zeros(n);
    for k in (0..n).rev() {
        let mut acc = qtb[k];
        for j in (k + 1)..n {
            acc -= r[[k, j]] * x[j];
        }
        x[k] = acc / r[[k, k]];
    }
    LlsOutcome::Solved(x)
}

fn normal_matrix(a: ArrayView2<Complex64>) -> Array2<Complex64> {
    let n = a.ncols();
    let mut g = Array2::<Complex64>::zeros((n, n));
    for i in 0..n {
        for j in 0..n {
            g[[i, j]] = hermitian_dot(&a.column(i), &a.column(j));
        }
    }
    g
}

fn normal_rhs(a: ArrayView2<Complex64>, b: ArrayView1<Complex64>) -> Array1<Complex64> {
    let n = a.ncols();
    let mut rhs = Array1::<Complex64>::zeros(n);
    for i in 0..n {
        rhs[i] = hermitian_dot(&a.column(i), &b);
    }
    rhs
}

/// Complex Cholesky factorisation `G = L L^H` of a Hermitian
/// positive-(semi)definite matrix, then forward/back substitution.
fn solve_normal_equations(a: ArrayView2<Complex64>, b: ArrayView1<Complex64>) -> LlsOutcome {
    let n = a.ncols();
    let g = normal_matrix(a);
    let rhs = normal_rhs(a, b);

    let mut l = Array2::<Complex64>::zeros((n, n));
    for j in 0..n {
        let mut diag = g[[j, j]].re;
        for k in 0..j {
            diag -= l[[j, k]].norm_sqr();
        }
        if diag <= RANK_DEFICIENT_EPS {
            return LlsOutcome::RankDeficient;
        }
        let ljj = diag.sqrt();
        l[[j, j]] = Complex64::new(ljj, 0.0);
        for i in (j + 1)..n {
            let mut s = g[[i, j]];
            for k in 0..j {
                s -= l[[i, k]] * l[[j, k]].conj();
            }
            l[[i, j]] = s / ljj;
        }
    }

    // L y = rhs
    let mut y = Array1::<Complex64>::zeros(n);
    for i in 0..n {
        let mut acc = rhs[i];
        for k in 0..i {
            acc -= l[[i, k]] * y[k];
        }
        y[i] = acc / l[[i, i]];
    }
    // L^H x = y
    let mut x = Array1::<Complex64>::zeros(n);
    for i in (0..n).rev() {
        let mut acc = y[i];
        for k in (i + 1)..n {
            acc -= l[[k, i]].conj() * x[k];
        }
        x[i] = acc / l[[i, i]];
    }
    LlsOutcome::Solved(x)
}

/// Cyclic Jacobi eigenvalue algorithm for a Hermitian matrix. Each
/// off-diagonal element is first phase-rotated to be real (via a diagonal
/// unitary), then eliminated with a standard real Jacobi rotation; the
/// composition of both is accumulated into the eigenvector matrix.
fn jacobi_eigen(mut a: Array2<Complex64>) -> (Array1<f64>, Array2<Complex64>) {
    let n = a.nrows();
    let mut v = Array2::<Complex64>::zeros((n, n));
    for i in 0..n {
        v[[i, i]] = Complex64::new(1.0, 0.0);
    }

    const MAX_SWEEPS: usize = 100;
    for _ in 0..MAX_SWEEPS {
        let off_norm: f64 = (0..n)
            .flat_map(|p| ((p + 1)..n).map(move |q| (p, q)))
            .map(|(p, q)| a[[p, q]].norm_sqr())
            .sum();
        if off_norm.sqrt() < 1e-13 {
            break;
        }
        for p in 0..n {
            for q in (p + 1)..n {
                let apq = a[[p, q]];
                let mag = apq.norm();
                if mag < 1e-300 {
                    continue;
                }
                let conj_phase = apq.conj() / mag;
                let phase = apq / mag;
                // D^H A D: scale row/col q so that a[p,q] becomes real positive.
                for i in 0..n {
                    a[[i, q]] *= conj_phase;
                }
                for i in 0..n {
                    a[[q, i]] *= phase;
                }
                for i in 0..n {
                    v[[i, q]] *= conj_phase;
                }

                let app = a[[p, p]].re;
                let aqq = a[[q, q]].re;
                let apq_re = a[[p, q]].re;
                if apq_re.abs() < 1e-300 {
                    continue;
                }
                let theta = (aqq - app) / (2.0 * apq_re);
                let t = theta.signum() / (theta.abs() + (1.0 + theta * theta).sqrt());
                let c = 1.0 / (1.0 + t * t).sqrt();
                let s = t * c;

                for i in 0..n {
                    if i == p || i == q {
                        continue;
                    }
                    let aip = a[[i, p]];
                    let aiq = a[[i, q]];
                    let new_ip = aip * c - aiq * s;
                    let new_iq = aip * s + aiq * c;
                    a[[i, p]] = new_ip;
                    a[[i, q]] = new_iq;
                    a[[p, i]] = new_ip.conj();
                    a[[q, i]] = new_iq.conj();
                }
                let new_app = c * c * app - 2.0 * s * c * apq_re + s * s * aqq;
                let new_aqq = s * s * app + 2.0 * s * c * apq_re + c * c * aqq;
                a[[p, p]] = Complex64::new(new_app, 0.0);
                a[[q, q]] = Complex64::new(new_aqq, 0.0);
                a[[p, q]] = Complex64::new(0.0, 0.0);
                a[[q, p]] = Complex64::new(0.0, 0.0);

                for i in 0..n {
                    let vip = v[[i, p]];
                    let viq = v[[i, q]];
                    v[[i, p]] = vip * c - viq * s;
                    v[[i, q]] = vip * s + viq * c;
                }
            }
        }
    }

    let eigenvalues = Array1::from_iter((0..n).map(|i| a[[i, i]].re));
    (eigenvalues, v)
}

fn solve_svd(a: ArrayView2<Complex64>, b: ArrayView1<Complex64>) -> LlsOutcome {
    let n = a.ncols();
    let g = normal_matrix(a);
    let rhs = normal_rhs(a, b);
    let (eigenvalues, v) = jacobi_eigen(g);

    let max_eig = eigenvalues.iter().cloned().fold(0.0_f64, f64::max);
    if max_eig <= RANK_DEFICIENT_EPS {
        return LlsOutcome::RankDeficient;
    }
    let threshold = SVD_TRUNCATION_TOLERANCE * max_eig;

    let mut x = Array1::<Complex64>::zeros(n);
    let mut kept_any = false;
    for i in 0..n {
        let lambda = eigenvalues[i];
        if lambda <= threshold {
            continue;
        }
        kept_any = true;
        let vi = v.column(i);
        let coeff = hermitian_dot(&vi, &rhs.view()) / lambda;
        for k in 0..n {
            x[k] += coeff * vi[k];
        }
    }
    if !kept_any {
        return LlsOutcome::RankDeficient;
    }
    LlsOutcome::Solved(x)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn make_system() -> (Array2<Complex64>, Array1<Complex64>, Array1<Complex64>) {
        // A well-conditioned 4x2 complex system with a known solution.
        let x_true = Array1::from(vec![Complex64::new(1.5, -0.5), Complex64::new(-0.2, 0.9)]);
        let a = Array2::from_shape_vec(
            (4, 2),
            vec![
                Complex64::new(1.0, 0.0),
                Complex64::new(0.0, 1.0),
                Complex64::new(2.0, -1.0),
                Complex64::new(1.0, 1.0),
                Complex64::new(0.5, 0.5),
                Complex64::new(-1.0, 0.0),
                Complex64::new(1.0, -2.0),
                Complex64::new(0.3, 0.1),
            ],
        )
        .unwrap();
        let b = a.dot(&x_true);
        (a, b, x_true)
    }

    #[test]
    fn qr_recovers_known_solution() {
        let (a, b, x_true) = make_system();
        match solve(LlsAlgorithm::Qr, a.view(), b.view()) {
            LlsOutcome::Solved(x) => {
                for (g, e) in x.iter().zip(x_true.iter()) {
                    assert_relative_eq!(g.re, e.re, epsilon = 1e-8);
                    assert_relative_eq!(g.im, e.im, epsilon = 1e-8);
                }
            }
            LlsOutcome::RankDeficient => panic!("unexpectedly rank deficient"),
        }
    }

    #[test]
    fn normal_equations_recovers_known_solution() {
        let (a, b, x_true) = make_system();
        match solve(LlsAlgorithm::NormalEquations, a.view(), b.view()) {
            LlsOutcome::Solved(x) => {
                for (g, e) in x.iter().zip(x_true.iter()) {
                    assert_relative_eq!(g.re, e.re, epsilon = 1e-6);
                    assert_relative_eq!(g.im, e.im, epsilon = 1e-6);
                }
            }
            LlsOutcome::RankDeficient => panic!("unexpectedly rank deficient"),
        }
    }

    #[test]
    fn svd_recovers_known_solution() {
        let (a, b, x_true) = make_system();
        match solve(LlsAlgorithm::Svd, a.view(), b.view()) {
            LlsOutcome::Solved(x) => {
                for (g, e) in x.iter().zip(x_true.iter()) {
                    assert_relative_eq!(g.re, e.re, epsilon = 1e-6);
                    assert_relative_eq!(g.im, e.im, epsilon = 1e-6);
                }
            }
            LlsOutcome::RankDeficient => panic!("unexpectedly rank deficient"),
        }
    }

    #[test]
    fn rank_deficient_system_is_detected() {
        // Second column is a scalar multiple of the first: rank 1, not 2.
        let a = Array2::from_shape_vec(
            (3, 2),
            vec![
                Complex64::new(1.0, 0.0),
                Complex64::new(2.0, 0.0),
                Complex64::new(0.0, 1.0),
                Complex64::new(0.0, 2.0),
                Complex64::new(1.0, 1.0),
                Complex64::new(2.0, 2.0),
            ],
        )
        .unwrap();
        let b = Array1::from(vec![
            Complex64::new(1.0, 0.0),
            Complex64::new(0.0, 1.0),
            Complex64::new(1.0, 1.0),
        ]);
        assert!(matches!(
            solve(LlsAlgorithm::Qr, a.view(), b.view()),
            LlsOutcome::RankDeficient
        ));
        assert!(matches!(
            solve(LlsAlgorithm::NormalEquations, a.view(), b.view()),
            LlsOutcome::RankDeficient
        ));
    }
}
