//! Imaginary-time convolution in the discrete Lehmann representation.
//!
//! The convolution of two kernel columns has a closed form built from
//! kernel values at the same imaginary time, so the convolution of two
//! expansions is again rank-r data: a dense r x r x r tensor maps the
//! coefficient vectors of `f` and `g` to the values of `f * g` on the DLR
//! imaginary-time grid. The tensor depends on the statistic through the
//! (anti-)periodic extension of `f` and is built once per operator.

use crate::error::{Error, Result};
use crate::imtime::ImTimeOps;
use crate::kernel::{self, Statistic};
use itertools::Itertools;
use nalgebra::DMatrix;
use ndarray::{Array3, ArrayD, Axis, Ix2};

/// Dense convolution tensor on the DLR imaginary-time grid, together with
/// the coefficient map needed to express convolution as a value-space
/// matrix. Immutable once built.
#[derive(Clone, Debug)]
pub struct ConvTensor {
    statistic: Statistic,
    tensor: Array3<f64>,
    it2cf_inv: DMatrix<f64>,
}

impl ConvTensor {
    /// Builds the tensor for an imaginary-time operator and a statistic.
    #[must_use]
    pub fn new(ops: &ImTimeOps, statistic: Statistic) -> Self {
        let r = ops.rank();
        let it = ops.nodes();
        let rf = ops.rf();
        let tensor = Array3::from_shape_fn((r, r, r), |(i, j, k)| {
            conv_kernel(statistic, it[i], rf[j], rf[k], j == k)
        });
        Self {
            statistic,
            tensor,
            it2cf_inv: ops.it2cf().inverse(),
        }
    }

    /// Statistic the tensor was built for.
    #[must_use]
    pub const fn statistic(&self) -> Statistic {
        self.statistic
    }

    /// The raw tensor; entry `(i, j, k)` is the value at the `i`-th time
    /// node of the convolution of the `j`-th and `k`-th basis columns.
    #[must_use]
    pub const fn tensor(&self) -> &Array3<f64> {
        &self.tensor
    }

    /// Convolution `h(tau) = int_0^beta f(tau - tau') g(tau') dtau'` from
    /// the DLR coefficients of `f` and `g`, returned as values on the DLR
    /// imaginary-time grid.
    ///
    /// Both inputs are either coefficient vectors of shape `[r]` or
    /// matrix-valued stacks of shape `[r, n, n]`, in which case the orbital
    /// blocks are multiplied.
    ///
    /// # Errors
    ///
    /// Fails when the shapes disagree, the leading dimension is not the
    /// rank, or the trailing axes are not square.
    pub fn convolve(&self, beta: f64, fc: &ArrayD<f64>, gc: &ArrayD<f64>) -> Result<ArrayD<f64>> {
        if fc.shape() != gc.shape() {
            return Err(Error::InvalidParameter(format!(
                "convolution operands have mismatched shapes {:?} and {:?}",
                fc.shape(),
                gc.shape()
            )));
        }
        let r = self.check_operand(fc)?;

        let mut h = ArrayD::zeros(fc.raw_dim());
        if fc.ndim() == 1 {
            for i in 0..r {
                let slab = self.tensor.index_axis(Axis(0), i);
                let mut acc = 0.0;
                for (j, k) in (0..r).cartesian_product(0..r) {
                    acc += slab[[j, k]] * fc[[j]] * gc[[k]];
                }
                h[[i]] = beta * acc;
            }
        } else {
            let n = fc.shape()[1];
            for (j, k) in (0..r).cartesian_product(0..r) {
                let fj = fc.index_axis(Axis(0), j).into_dimensionality::<Ix2>().unwrap();
                let gk = gc.index_axis(Axis(0), k).into_dimensionality::<Ix2>().unwrap();
                let prod = fj.dot(&gk);
                for i in 0..r {
                    let w = beta * self.tensor[[i, j, k]];
                    for a in 0..n {
                        for b in 0..n {
                            h[[i, a, b]] += w * prod[[a, b]];
                        }
                    }
                }
            }
        }
        Ok(h)
    }

    /// Value-space convolution matrix `C(f)`: applied to the values of `g`
    /// on the DLR imaginary-time grid it yields the values of `f * g` on
    /// the same grid. For matrix-valued `f` the result is the
    /// block-Kronecker expansion of shape `(r n) x (r n)`.
    ///
    /// Useful when many `g` are convolved against one fixed `f`, as in
    /// repeated Dyson iterations.
    ///
    /// # Errors
    ///
    /// Fails when the leading dimension is not the rank or the trailing
    /// axes are not square.
    pub fn conv_matrix(&self, beta: f64, fc: &ArrayD<f64>) -> Result<DMatrix<f64>> {
        let r = self.check_operand(fc)?;
        let n = if fc.ndim() == 1 { 1 } else { fc.shape()[1] };
        let std = fc.as_standard_layout();
        let fflat = std.view().into_shape((r, n, n)).unwrap();

        // coefficient-side contraction of the tensor with f
        let mut m = DMatrix::zeros(r * n, r * n);
        for (i, k) in (0..r).cartesian_product(0..r) {
            for a in 0..n {
                for c in 0..n {
                    let mut acc = 0.0;
                    for j in 0..r {
                        acc += self.tensor[[i, j, k]] * fflat[[j, a, c]];
                    }
                    m[(i * n + a, k * n + c)] = beta * acc;
                }
            }
        }

        // fold the value-to-coefficient map of g into the k index
        let mut out = DMatrix::zeros(r * n, r * n);
        for (row, kp) in (0..r * n).cartesian_product(0..r) {
            for c in 0..n {
                let mut acc = 0.0;
                for k in 0..r {
                    acc += m[(row, k * n + c)] * self.it2cf_inv[(k, kp)];
                }
                out[(row, kp * n + c)] = acc;
            }
        }
        Ok(out)
    }

    // validates [r] or [r, n, n] operand shape and returns the rank
    fn check_operand(&self, c: &ArrayD<f64>) -> Result<usize> {
        let r = self.tensor.shape()[0];
        let shape = c.shape();
        let found = shape.first().copied().unwrap_or(0);
        if found != r {
            return Err(Error::DimensionMismatch { expected: r, found });
        }
        match shape.len() {
            1 => Ok(r),
            3 if shape[1] == shape[2] => Ok(r),
            _ => Err(Error::InvalidParameter(format!(
                "convolution operands must have shape [r] or [r, n, n], got {shape:?}"
            ))),
        }
    }
}

// value at relative time t of the convolution of the kernel columns at
// frequencies omj and omk; `diag` marks the analytic limit omk -> omj
fn conv_kernel(statistic: Statistic, t: f64, omj: f64, omk: f64, diag: bool) -> f64 {
    match statistic {
        Statistic::Fermion => {
            if diag {
                kernel::k_it(t, omj) * tshift(t, omj)
            } else {
                (kernel::k_it(t, omk) - kernel::k_it(t, omj)) / (omj - omk)
            }
        }
        Statistic::Boson => {
            let (thj, thk) = ((0.5 * omj).tanh(), (0.5 * omk).tanh());
            if diag {
                let s = sech(0.5 * omj);
                kernel::k_it(t, omj) * (tshift(t, omj) * thj + 0.5 * s * s)
            } else {
                (kernel::k_it(t, omk) * thj - kernel::k_it(t, omj) * thk) / (omj - omk)
            }
        }
    }
}

// t - K(1, om), evaluated without cancellation on both relative branches
// via K(1, om) = 1 - K(0, om)
fn tshift(t: f64, om: f64) -> f64 {
    if t >= 0.0 {
        t - kernel::k_it(1.0, om)
    } else {
        t + kernel::k_it(0.0, om)
    }
}

// 2 exp(-|x|) / (1 + exp(-2|x|)) never overflows
fn sech(x: f64) -> f64 {
    let e = (-x.abs()).exp();
    2.0 * e / (1.0 + e * e)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::freq::dlr_freq;
    use float_cmp::assert_approx_eq;
    use gauss_quad::GaussLegendre;
    use ndarray::Array1;

    fn test_ops(lambda: f64) -> ImTimeOps {
        let rf = dlr_freq(lambda, 1e-11, false).unwrap();
        ImTimeOps::new(lambda, &rf, false).unwrap()
    }

    // brute-force convolution of two kernel columns by panel quadrature,
    // with the (anti-)periodic extension of the first factor
    fn brute_conv(statistic: Statistic, t: f64, oma: f64, omb: f64) -> f64 {
        let rule = GaussLegendre::init(64);
        let tp = kernel::phys_from_rel(1.0, t);
        let xi = match statistic {
            Statistic::Fermion => -1.0,
            Statistic::Boson => 1.0,
        };
        let head = rule.integrate(0.0, tp, |s| kernel::k_it(tp - s, oma) * kernel::k_it(s, omb));
        let tail = rule.integrate(tp, 1.0, |s| {
            kernel::k_it(tp - s + 1.0, oma) * kernel::k_it(s, omb)
        });
        head + xi * tail
    }

    #[test]
    fn basis_convolution_matches_quadrature() {
        let ops = test_ops(20.0);
        let r = ops.rank();
        for &statistic in &[Statistic::Fermion, Statistic::Boson] {
            let conv = ConvTensor::new(&ops, statistic);
            let mut fc = Array1::zeros(r).into_dyn();
            let mut gc = Array1::zeros(r).into_dyn();
            fc[[2]] = 1.0;
            gc[[r - 3]] = 1.0;
            let h = conv.convolve(1.0, &fc, &gc).unwrap();

            for (i, &t) in ops.nodes().iter().enumerate().step_by(7) {
                let want = brute_conv(statistic, t, ops.rf()[2], ops.rf()[r - 3]);
                assert_approx_eq!(f64, h[[i]], want, epsilon = 1e-10);
            }
        }
    }

    #[test]
    fn diagonal_limit_is_smooth() {
        let ops = test_ops(20.0);
        let conv = ConvTensor::new(&ops, Statistic::Fermion);
        let r = ops.rank();
        let mut fc = Array1::zeros(r).into_dyn();
        let mut gc = Array1::zeros(r).into_dyn();
        fc[[4]] = 1.0;
        gc[[4]] = 1.0;
        let h = conv.convolve(1.0, &fc, &gc).unwrap();
        for (i, &t) in ops.nodes().iter().enumerate().step_by(11) {
            let want = brute_conv(Statistic::Fermion, t, ops.rf()[4], ops.rf()[4]);
            assert_approx_eq!(f64, h[[i]], want, epsilon = 1e-10);
        }
    }

    #[test]
    fn scalar_convolution_commutes() {
        let ops = test_ops(30.0);
        let conv = ConvTensor::new(&ops, Statistic::Fermion);
        let r = ops.rank();
        let fc = Array1::from_iter((0..r).map(|i| ((i * 7 % 5) as f64 - 2.0) * 0.3)).into_dyn();
        let gc = Array1::from_iter((0..r).map(|i| ((i * 3 % 7) as f64 - 3.0) * 0.2)).into_dyn();
        let fg = conv.convolve(2.0, &fc, &gc).unwrap();
        let gf = conv.convolve(2.0, &gc, &fc).unwrap();
        for (a, b) in fg.iter().zip(gf.iter()) {
            assert_approx_eq!(f64, *a, *b, epsilon = 1e-11);
        }
    }

    #[test]
    fn convolution_matrix_agrees_with_the_tensor() {
        let ops = test_ops(30.0);
        let conv = ConvTensor::new(&ops, Statistic::Boson);
        let r = ops.rank();
        let fc = Array1::from_iter((0..r).map(|i| (0.1 * i as f64).sin())).into_dyn();
        let gc = Array1::from_iter((0..r).map(|i| (0.2 * i as f64).cos())).into_dyn();
        let beta = 3.0;

        let direct = conv.convolve(beta, &fc, &gc).unwrap();

        let gvals = ops.coefs2vals(&gc).unwrap();
        let cmat = conv.conv_matrix(beta, &fc).unwrap();
        let gv = nalgebra::DVector::from_iterator(r, gvals.iter().copied());
        let applied = cmat * gv;
        for i in 0..r {
            assert_approx_eq!(f64, direct[[i]], applied[i], epsilon = 1e-10);
        }
    }

    #[test]
    fn block_diagonal_orbitals_reduce_to_scalars() {
        let ops = test_ops(20.0);
        let conv = ConvTensor::new(&ops, Statistic::Fermion);
        let r = ops.rank();
        let f1 = Array1::from_iter((0..r).map(|i| (0.3 * i as f64).sin())).into_dyn();
        let f2 = Array1::from_iter((0..r).map(|i| (0.1 * i as f64 + 1.0).cos())).into_dyn();
        let g1 = Array1::from_iter((0..r).map(|i| 0.5 - 0.01 * i as f64)).into_dyn();
        let g2 = Array1::from_iter((0..r).map(|i| (0.07 * i as f64).sin())).into_dyn();

        let mut fm = ArrayD::zeros(ndarray::IxDyn(&[r, 2, 2]));
        let mut gm = ArrayD::zeros(ndarray::IxDyn(&[r, 2, 2]));
        for i in 0..r {
            fm[[i, 0, 0]] = f1[[i]];
            fm[[i, 1, 1]] = f2[[i]];
            gm[[i, 0, 0]] = g1[[i]];
            gm[[i, 1, 1]] = g2[[i]];
        }

        let beta = 1.5;
        let hm = conv.convolve(beta, &fm, &gm).unwrap();
        let h1 = conv.convolve(beta, &f1, &g1).unwrap();
        let h2 = conv.convolve(beta, &f2, &g2).unwrap();
        for i in 0..r {
            assert_approx_eq!(f64, hm[[i, 0, 0]], h1[[i]], epsilon = 1e-12);
            assert_approx_eq!(f64, hm[[i, 1, 1]], h2[[i]], epsilon = 1e-12);
            assert_approx_eq!(f64, hm[[i, 0, 1]], 0.0, epsilon = 1e-12);
            assert_approx_eq!(f64, hm[[i, 1, 0]], 0.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn mismatched_operands_are_rejected() {
        let ops = test_ops(20.0);
        let conv = ConvTensor::new(&ops, Statistic::Fermion);
        let r = ops.rank();
        let good = Array1::<f64>::zeros(r).into_dyn();
        let bad = Array1::<f64>::zeros(r + 1).into_dyn();
        assert!(conv.convolve(1.0, &good, &bad).is_err());
        assert!(matches!(
            conv.convolve(1.0, &bad, &bad),
            Err(Error::DimensionMismatch { .. })
        ));
        let rect = ArrayD::<f64>::zeros(ndarray::IxDyn(&[r, 2, 3]));
        assert!(matches!(
            conv.conv_matrix(1.0, &rect),
            Err(Error::InvalidParameter(_))
        ));
    }
}
