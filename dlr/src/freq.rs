//! Selection of the discrete Lehmann real-frequency support points.

use crate::error::{Error, Result};
use crate::fine::{FineGrid, FineParams};
use crate::kernel;
use crate::rgs::{pivoted_rgs, pivoted_rgs_sym};
use nalgebra::DMatrix;

/// Builds the DLR real-frequency nodes for a cutoff and a target accuracy.
///
/// The fine kernel matrix is scaled row-wise by the quadrature weights so
/// that pivoting happens in the L2 geometry, and the rank-revealing sweep
/// runs over the frequency columns. With `symmetrize` the selected set is
/// exactly mirror-symmetric, `rf[i] == -rf[r - 1 - i]`.
///
/// The returned frequencies are dimensionless (`beta * omega`), sorted
/// ascending.
///
/// # Errors
///
/// Fails for an invalid cutoff or a tolerance outside `(0, 1)`.
pub fn dlr_freq(lambda: f64, eps: f64, symmetrize: bool) -> Result<Vec<f64>> {
    let fine = FineGrid::new(FineParams::new(lambda)?);
    build_rf(&fine, eps, symmetrize)
}

/// Frequency selection on an already-built fine grid.
///
/// # Errors
///
/// Fails when `eps` lies outside `(0, 1)`.
pub fn build_rf(fine: &FineGrid, eps: f64, symmetrize: bool) -> Result<Vec<f64>> {
    if !(0.0..1.0).contains(&eps) || eps == 0.0 {
        return Err(Error::InvalidParameter(format!(
            "tolerance eps must lie in (0, 1), got {eps}"
        )));
    }
    if eps <= 1e-14 {
        tracing::warn!(eps, "tolerance at or below double precision; accuracy may not be reached");
    }

    let tau = fine.tau();
    let omega = fine.omega();
    let weight = fine.weight();
    // frequency columns of the weighted kernel become the rows under sweep
    let kmat = DMatrix::from_fn(omega.len(), tau.len(), |j, i| {
        weight[i] * kernel::k_it(tau[i], omega[j])
    });

    let res = if symmetrize {
        pivoted_rgs_sym(&kmat, eps, None)
    } else {
        pivoted_rgs(&kmat, eps, None)
    };

    let mut piv = res.piv;
    piv.sort_unstable();
    Ok(piv.into_iter().map(|j| omega[j]).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rank_stays_in_the_expected_window() {
        let rf = dlr_freq(1000.0, 1e-10, false).unwrap();
        let r = rf.len();
        assert!((30..=80).contains(&r), "rank {r} outside [30, 80]");
        assert!(rf.first().unwrap() >= &-1000.0);
        assert!(rf.last().unwrap() <= &1000.0);
        assert!(rf.iter().any(|&w| w < 0.0));
        assert!(rf.iter().any(|&w| w > 0.0));
        // sorted and duplicate-free
        for w in rf.windows(2) {
            assert!(w[0] < w[1]);
        }
    }

    #[test]
    fn symmetrized_set_mirrors_exactly() {
        let rf = dlr_freq(1000.0, 1e-10, true).unwrap();
        let r = rf.len();
        assert_eq!(r % 2, 0);
        for i in 0..r {
            assert_eq!(rf[i], -rf[r - 1 - i]);
        }
    }

    #[test]
    fn symmetrized_rank_stays_close_to_unsymmetrized() {
        let plain = dlr_freq(1000.0, 1e-10, false).unwrap();
        let sym = dlr_freq(1000.0, 1e-10, true).unwrap();
        let diff = plain.len() as i64 - sym.len() as i64;
        assert!(diff.abs() <= 2, "rank difference {diff}");
    }

    #[test]
    fn rank_grows_with_accuracy() {
        let coarse = dlr_freq(100.0, 1e-4, false).unwrap();
        let tight = dlr_freq(100.0, 1e-12, false).unwrap();
        assert!(coarse.len() < tight.len());
    }

    #[test]
    fn bad_tolerances_are_rejected() {
        assert!(dlr_freq(100.0, 0.0, false).is_err());
        assert!(dlr_freq(100.0, 1.0, false).is_err());
        assert!(dlr_freq(100.0, -0.5, false).is_err());
        assert!(dlr_freq(-1.0, 1e-10, false).is_err());
    }
}
