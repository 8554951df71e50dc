//! Imaginary-time transform operator of the discrete Lehmann representation.
//!
//! The operator stores the DLR frequencies, the interpolation nodes picked
//! from the fine imaginary-time grid, and the factorized value-coefficient
//! map. Green's-function data is carried in plain `ndarray` arrays with the
//! DLR axis leading and an arbitrary trailing (orbital) shape; the operator
//! never keeps references to caller data. Imaginary-time values carry no
//! factor of the inverse temperature.

use crate::error::{Error, Result};
use crate::fine::{FineGrid, FineParams};
use crate::kernel;
use crate::linalg::{self, LuFactors};
use crate::rgs::{pivoted_rgs, pivoted_rgs_sym};
use nalgebra::DMatrix;
use ndarray::{Array, ArrayBase, Axis, Data, Dimension, Ix1, RemoveAxis};
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};

const FORMAT_TAG: &str = "dlr::imtime_ops";

/// Transform operator between DLR coefficients and values on the DLR
/// imaginary-time grid. Immutable after construction.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ImTimeOps {
    lambda: f64,
    rf: Vec<f64>,
    it: Vec<f64>,
    cf2it: DMatrix<f64>,
    it2cf: LuFactors<f64>,
    symmetrized: bool,
}

impl ImTimeOps {
    /// Builds the operator for the given cutoff and DLR frequencies.
    ///
    /// The interpolation nodes are selected from the fine grid by the same
    /// pivoted sweep that chose the frequencies, at a rank fixed by
    /// `rf.len()`; with `symmetrize` the nodes are chosen in mirror pairs
    /// under `tau <-> beta - tau`, which requires a mirror-symmetric
    /// frequency set of even rank.
    ///
    /// # Errors
    ///
    /// Fails for an invalid cutoff, an empty or odd-rank-symmetrized
    /// frequency set, or (never for grids this crate builds itself) a
    /// degenerate node selection.
    pub fn new(lambda: f64, rf: &[f64], symmetrize: bool) -> Result<Self> {
        let fine = FineGrid::new(FineParams::new(lambda)?);
        let r = rf.len();
        if r == 0 {
            return Err(Error::InvalidParameter(
                "the DLR frequency set must not be empty".to_owned(),
            ));
        }

        let tau = fine.tau();
        let kmat = DMatrix::from_fn(tau.len(), r, |i, j| kernel::k_it(tau[i], rf[j]));
        // the rank is fixed by the frequency selection; the tolerance only
        // guards against pathological input
        let sel = if symmetrize {
            pivoted_rgs_sym(&kmat, 1e-100, Some(r))
        } else {
            pivoted_rgs(&kmat, 1e-100, Some(r))
        };
        if sel.piv.len() > r {
            return Err(Error::InvalidParameter(
                "symmetrized node selection needs a mirror-symmetric frequency set of even rank"
                    .to_owned(),
            ));
        }
        if sel.piv.len() < r {
            return Err(Error::SingularFactor(format!(
                "time-node selection found only {} of {r} nodes",
                sel.piv.len()
            )));
        }

        let mut piv = sel.piv;
        piv.sort_unstable();
        let it: Vec<f64> = piv.into_iter().map(|i| tau[i]).collect();
        let cf2it = DMatrix::from_fn(r, r, |i, j| kernel::k_it(it[i], rf[j]));
        let it2cf = LuFactors::factorize(cf2it.clone())?;

        Ok(Self {
            lambda,
            rf: rf.to_vec(),
            it,
            cf2it,
            it2cf,
            symmetrized: symmetrize,
        })
    }

    /// Expansion rank.
    #[must_use]
    pub fn rank(&self) -> usize {
        self.rf.len()
    }

    /// Cutoff the operator was built for.
    #[must_use]
    pub const fn lambda(&self) -> f64 {
        self.lambda
    }

    /// DLR frequencies, dimensionless and ascending.
    #[must_use]
    pub fn rf(&self) -> &[f64] {
        &self.rf
    }

    /// DLR imaginary-time nodes in relative format, ascending in physical
    /// time.
    #[must_use]
    pub fn nodes(&self) -> &[f64] {
        &self.it
    }

    /// Coefficient-to-value matrix `K(t_i, om_j)`.
    #[must_use]
    pub const fn cf2it(&self) -> &DMatrix<f64> {
        &self.cf2it
    }

    /// Factorized value-to-coefficient map.
    #[must_use]
    pub const fn it2cf(&self) -> &LuFactors<f64> {
        &self.it2cf
    }

    /// Whether the node set was selected in mirror pairs.
    #[must_use]
    pub const fn symmetrized(&self) -> bool {
        self.symmetrized
    }

    /// Transforms values on the DLR imaginary-time grid into DLR
    /// coefficients. The leading axis is the DLR axis; trailing axes pass
    /// through untouched.
    ///
    /// # Errors
    ///
    /// Fails when the leading dimension is not the rank.
    pub fn vals2coefs<S, D>(&self, g: &ArrayBase<S, D>) -> Result<Array<f64, D>>
    where
        S: Data<Elem = f64>,
        D: Dimension,
    {
        self.check_leading(g.shape())?;
        let mut b = linalg::flatten_leading(g);
        self.it2cf.solve_in_place(&mut b);
        Ok(linalg::unflatten_leading(&b, g.raw_dim()))
    }

    /// Transforms DLR coefficients into values on the DLR imaginary-time
    /// grid.
    ///
    /// # Errors
    ///
    /// Fails when the leading dimension is not the rank.
    pub fn coefs2vals<S, D>(&self, c: &ArrayBase<S, D>) -> Result<Array<f64, D>>
    where
        S: Data<Elem = f64>,
        D: Dimension,
    {
        self.check_leading(c.shape())?;
        let vals = &self.cf2it * linalg::flatten_leading(c);
        Ok(linalg::unflatten_leading(&vals, c.raw_dim()))
    }

    /// Evaluates the DLR expansion at an arbitrary relative imaginary time
    /// in `[-1, 1]`, contracting the leading axis.
    ///
    /// # Errors
    ///
    /// Fails when the leading dimension is not the rank or the evaluation
    /// point is outside the relative-format domain.
    pub fn coefs2eval<S, D>(&self, c: &ArrayBase<S, D>, t: f64) -> Result<Array<f64, D::Smaller>>
    where
        S: Data<Elem = f64>,
        D: Dimension + RemoveAxis,
    {
        self.check_leading(c.shape())?;
        if !(-1.0..=1.0).contains(&t) {
            return Err(Error::InvalidParameter(format!(
                "relative imaginary time {t} outside [-1, 1]"
            )));
        }
        let mut out = Array::zeros(c.raw_dim().remove_axis(Axis(0)));
        for (l, &om) in self.rf.iter().enumerate() {
            out.scaled_add(kernel::k_it(t, om), &c.index_axis(Axis(0), l));
        }
        Ok(out)
    }

    /// Values of the reflected Green's function `tau -> beta - tau` on the
    /// DLR imaginary-time grid, from values on the same grid.
    ///
    /// # Errors
    ///
    /// Fails when the leading dimension is not the rank.
    pub fn reflect<S, D>(&self, g: &ArrayBase<S, D>) -> Result<Array<f64, D>>
    where
        S: Data<Elem = f64>,
        D: Dimension,
    {
        let c = self.vals2coefs(g)?;
        let vals = self.reflection_kernel() * linalg::flatten_leading(&c);
        Ok(linalg::unflatten_leading(&vals, g.raw_dim()))
    }

    /// Coefficient-space reflection matrix: maps the DLR coefficients of a
    /// Green's function to those of its reflection `tau -> beta - tau`.
    #[must_use]
    pub fn reflection_matrix(&self) -> DMatrix<f64> {
        self.it2cf.solve(&self.reflection_kernel())
    }

    // kernel at the reflected nodes; in relative format the reflection of a
    // node is its negation
    fn reflection_kernel(&self) -> DMatrix<f64> {
        let r = self.rank();
        DMatrix::from_fn(r, r, |i, j| kernel::k_it(-self.it[i], self.rf[j]))
    }

    /// Inner product `int_0^beta f(tau) g(tau) dtau` of two scalar-valued
    /// expansions, from their DLR coefficients and the closed-form kernel
    /// overlaps.
    ///
    /// # Errors
    ///
    /// Fails when either coefficient vector does not have length `rank`.
    pub fn innerprod<S1, S2>(
        &self,
        beta: f64,
        fc: &ArrayBase<S1, Ix1>,
        gc: &ArrayBase<S2, Ix1>,
    ) -> Result<f64>
    where
        S1: Data<Elem = f64>,
        S2: Data<Elem = f64>,
    {
        self.check_leading(fc.shape())?;
        self.check_leading(gc.shape())?;
        let mut acc = 0.0;
        for (j, &f) in fc.iter().enumerate() {
            for (k, &g) in gc.iter().enumerate() {
                acc += f * g * kernel::k_it_overlap(self.rf[j], self.rf[k]);
            }
        }
        Ok(beta * acc)
    }

    /// Persists the operator, format tag first.
    ///
    /// # Errors
    ///
    /// Fails when the underlying writer or the encoder fails.
    pub fn write(&self, mut writer: impl Write) -> Result<()> {
        bincode::serialize_into(&mut writer, FORMAT_TAG)?;
        bincode::serialize_into(writer, self)?;
        Ok(())
    }

    /// Reloads an operator persisted by [`Self::write`]. Every stored
    /// field, the factorization included, is restored bit for bit.
    ///
    /// # Errors
    ///
    /// Fails on a decoding error or an unknown format tag.
    pub fn read(mut reader: impl Read) -> Result<Self> {
        let tag: String = bincode::deserialize_from(&mut reader)?;
        if tag != FORMAT_TAG {
            return Err(Error::UnknownFormatTag(tag));
        }
        Ok(bincode::deserialize_from(reader)?)
    }

    fn check_leading(&self, shape: &[usize]) -> Result<()> {
        let found = shape.first().copied().unwrap_or(0);
        if found == self.rank() {
            Ok(())
        } else {
            Err(Error::DimensionMismatch {
                expected: self.rank(),
                found,
            })
        }
    }
}
