//! Dyson-equation solver on the DLR imaginary-time grid.
//!
//! Solves `G = G0 + G0 * Sigma * G`, with `*` the imaginary-time
//! convolution, by assembling the value-space system
//! `(I - C(G0) C(Sigma)) G = G0` and factorizing it. The free propagator
//! part is precomputed once, so sweeping over self-energies only pays for
//! one convolution matrix and one dense solve per call.

use crate::convolution::ConvTensor;
use crate::error::{Error, Result};
use crate::imtime::ImTimeOps;
use crate::kernel::Statistic;
use crate::linalg::{self, LuFactors};
use nalgebra::DMatrix;
use ndarray::ArrayD;

/// Solver for the Dyson equation at a fixed free propagator. Immutable
/// after construction; matrix-valued Green's functions are handled through
/// the block-Kronecker expansion of the convolution matrices.
#[derive(Clone, Debug)]
pub struct DysonSolver {
    ops: ImTimeOps,
    conv: ConvTensor,
    beta: f64,
    n_orb: usize,
    g0: ArrayD<f64>,
    g0_cmat: DMatrix<f64>,
}

impl DysonSolver {
    /// Builds a solver from the free propagator's values on the DLR
    /// imaginary-time grid, shape `[r]` or `[r, n, n]`.
    ///
    /// # Errors
    ///
    /// Fails when the shape of `g0` does not match the operator.
    pub fn new(
        ops: &ImTimeOps,
        statistic: Statistic,
        beta: f64,
        g0: &ArrayD<f64>,
    ) -> Result<Self> {
        if !beta.is_finite() || beta <= 0.0 {
            return Err(Error::InvalidParameter(format!(
                "inverse temperature must be positive and finite, got {beta}"
            )));
        }
        let conv = ConvTensor::new(ops, statistic);
        let g0c = ops.vals2coefs(g0)?;
        let g0_cmat = conv.conv_matrix(beta, &g0c)?;
        let n_orb = if g0.ndim() == 1 { 1 } else { g0.shape()[1] };

        Ok(Self {
            ops: ops.clone(),
            conv,
            beta,
            n_orb,
            g0: g0.clone(),
            g0_cmat,
        })
    }

    /// Solves the Dyson equation for a self-energy given as values on the
    /// DLR imaginary-time grid, returning the full propagator on the same
    /// grid.
    ///
    /// # Errors
    ///
    /// Fails when the self-energy shape differs from the free propagator,
    /// or the assembled system is singular (which a physical self-energy
    /// does not produce).
    pub fn solve(&self, sigma: &ArrayD<f64>) -> Result<ArrayD<f64>> {
        if sigma.shape() != self.g0.shape() {
            return Err(Error::InvalidParameter(format!(
                "self-energy shape {:?} does not match the propagator shape {:?}",
                sigma.shape(),
                self.g0.shape()
            )));
        }
        let sc = self.ops.vals2coefs(sigma)?;
        let smat = self.conv.conv_matrix(self.beta, &sc)?;

        let rn = self.ops.rank() * self.n_orb;
        let sys = DMatrix::identity(rn, rn) - &self.g0_cmat * smat;
        let lu = LuFactors::factorize(sys)?;

        let mut x = linalg::flatten_leading(&self.g0);
        // the orbital row index folds into the system dimension, the
        // orbital column index rides along as extra right-hand sides
        let n = self.n_orb;
        let mut rhs = DMatrix::from_fn(rn, n, |row, b| x[(row / n, (row % n) * n + b)]);
        lu.solve_in_place(&mut rhs);
        for i in 0..self.ops.rank() {
            for a in 0..n {
                for b in 0..n {
                    x[(i, a * n + b)] = rhs[(i * n + a, b)];
                }
            }
        }
        Ok(linalg::unflatten_leading(&x, self.g0.raw_dim()))
    }

    /// Inverse temperature the solver was built for.
    #[must_use]
    pub const fn beta(&self) -> f64 {
        self.beta
    }

    /// Free-propagator values the solver was built from.
    #[must_use]
    pub const fn g0(&self) -> &ArrayD<f64> {
        &self.g0
    }

    /// The convolution tensor shared by all solves.
    #[must_use]
    pub const fn conv(&self) -> &ConvTensor {
        &self.conv
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::freq::dlr_freq;
    use crate::imfreq::ImFreqOps;
    use crate::kernel;
    use float_cmp::assert_approx_eq;
    use ndarray::{Array1, IxDyn};
    use num_complex::Complex64;

    fn setup(lambda: f64) -> ImTimeOps {
        let rf = dlr_freq(lambda, 1e-10, false).unwrap();
        ImTimeOps::new(lambda, &rf, false).unwrap()
    }

    fn pole_vals(ops: &ImTimeOps, om: f64) -> ArrayD<f64> {
        Array1::from_iter(ops.nodes().iter().map(|&t| kernel::k_it(t, om))).into_dyn()
    }

    #[test]
    fn zero_self_energy_returns_the_free_propagator() {
        let ops = setup(100.0);
        let beta = 40.0;
        let g0 = pole_vals(&ops, 12.0);
        let solver = DysonSolver::new(&ops, Statistic::Fermion, beta, &g0).unwrap();
        let g = solver.solve(&ArrayD::zeros(g0.raw_dim())).unwrap();
        for (a, b) in g.iter().zip(g0.iter()) {
            assert_approx_eq!(f64, *a, *b, epsilon = 1e-14);
        }
    }

    #[test]
    fn solution_satisfies_the_equation_it_came_from() {
        let ops = setup(100.0);
        let beta = 100.0;
        let g0 = pole_vals(&ops, 30.0);
        let sigma = pole_vals(&ops, -20.0);
        let solver = DysonSolver::new(&ops, Statistic::Fermion, beta, &g0).unwrap();
        let g = solver.solve(&sigma).unwrap();

        // residual of G - G0 - G0 * Sigma * G in the same discrete algebra
        let conv = solver.conv();
        let sc = ops.vals2coefs(&sigma).unwrap();
        let gc = ops.vals2coefs(&g).unwrap();
        let sg = conv.convolve(beta, &sc, &gc).unwrap();
        let g0c = ops.vals2coefs(&g0).unwrap();
        let sgc = ops.vals2coefs(&sg).unwrap();
        let g0sg = conv.convolve(beta, &g0c, &sgc).unwrap();

        let mut resid = 0.0_f64;
        for i in 0..ops.rank() {
            resid = resid.max((g[[i]] - g0[[i]] - g0sg[[i]]).abs());
        }
        assert!(resid <= 1e-9, "Dyson residual {resid}");
    }

    #[test]
    fn frequency_domain_identity_holds() {
        // G0 and Sigma single poles; the solution must obey
        // 1/G0 - 1/G = Sigma on the Matsubara axis
        let lambda = 100.0;
        let beta = 100.0;
        let ops = setup(lambda);
        let rf = ops.rf().to_vec();
        let ifops = ImFreqOps::new(lambda, &rf, Statistic::Fermion, false).unwrap();

        let g0 = pole_vals(&ops, 0.3 * beta);
        let sigma = pole_vals(&ops, -0.2 * beta);
        let solver = DysonSolver::new(&ops, Statistic::Fermion, beta, &g0).unwrap();
        let g = solver.solve(&sigma).unwrap();

        // move everything to the frequency domain through the shared
        // coefficients
        let to_if = |vals: &ArrayD<f64>, n: i64| -> Complex64 {
            let c = ops.vals2coefs(vals).unwrap();
            let cc = c
                .mapv(|x| Complex64::new(x, 0.0))
                .into_dimensionality::<ndarray::Ix1>()
                .unwrap();
            ifops.coefs2eval(beta, &cc, n).unwrap().into_scalar()
        };

        let mut worst = 0.0_f64;
        for n in -50..50 {
            let g0w = to_if(&g0, n);
            let gw = to_if(&g, n);
            let sw = to_if(&sigma, n);
            let lhs = g0w.inv() - gw.inv();
            worst = worst.max((lhs - sw).norm());
        }
        assert!(worst <= 1e-8, "frequency-domain identity violated by {worst}");
    }

    #[test]
    fn matrix_valued_dyson_keeps_block_structure() {
        let ops = setup(60.0);
        let beta = 20.0;
        let r = ops.rank();

        let mut g0 = ArrayD::zeros(IxDyn(&[r, 2, 2]));
        let mut sigma = ArrayD::zeros(IxDyn(&[r, 2, 2]));
        for (i, &t) in ops.nodes().iter().enumerate() {
            g0[[i, 0, 0]] = kernel::k_it(t, 8.0);
            g0[[i, 1, 1]] = kernel::k_it(t, -5.0);
            sigma[[i, 0, 0]] = 0.4 * kernel::k_it(t, 2.0);
            sigma[[i, 1, 1]] = 0.1 * kernel::k_it(t, -1.0);
        }

        let solver = DysonSolver::new(&ops, Statistic::Fermion, beta, &g0).unwrap();
        let g = solver.solve(&sigma).unwrap();

        // diagonal inputs give a diagonal solution, and each diagonal entry
        // solves its own scalar Dyson equation
        for i in 0..r {
            assert_approx_eq!(f64, g[[i, 0, 1]], 0.0, epsilon = 1e-12);
            assert_approx_eq!(f64, g[[i, 1, 0]], 0.0, epsilon = 1e-12);
        }
        for orb in 0..2 {
            let g0s = Array1::from_iter((0..r).map(|i| g0[[i, orb, orb]])).into_dyn();
            let sgs = Array1::from_iter((0..r).map(|i| sigma[[i, orb, orb]])).into_dyn();
            let scalar = DysonSolver::new(&ops, Statistic::Fermion, beta, &g0s)
                .unwrap()
                .solve(&sgs)
                .unwrap();
            for i in 0..r {
                assert_approx_eq!(f64, g[[i, orb, orb]], scalar[[i]], epsilon = 1e-10);
            }
        }
    }

    #[test]
    fn shape_mismatch_is_rejected() {
        let ops = setup(30.0);
        let g0 = pole_vals(&ops, 3.0);
        let solver = DysonSolver::new(&ops, Statistic::Fermion, 1.0, &g0).unwrap();
        let bad = ArrayD::<f64>::zeros(IxDyn(&[ops.rank(), 2, 2]));
        assert!(solver.solve(&bad).is_err());
    }
}
