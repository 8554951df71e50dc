//! Imaginary-frequency transform operator of the discrete Lehmann
//! representation.
//!
//! Mirrors the imaginary-time operator on the Matsubara axis. Values on the
//! imaginary-frequency grid carry one factor of the inverse temperature, as
//! is standard in Matsubara analysis, so every transform here takes `beta`.

use crate::error::{Error, Result};
use crate::fine::FineParams;
use crate::kernel::{self, Statistic};
use crate::linalg::{self, LuFactors};
use crate::rgs::{pivoted_rgs, pivoted_rgs_sym};
use nalgebra::DMatrix;
use ndarray::{Array, ArrayBase, Axis, Data, Dimension, RemoveAxis};
use num_complex::Complex64;
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};

const FORMAT_TAG: &str = "dlr::imfreq_ops";

/// Transform operator between DLR coefficients and values on the DLR
/// Matsubara grid. Immutable after construction.
///
/// For the symmetrized bosonic variant the node count may exceed the rank
/// by one; the over-determined value-to-coefficient map is then solved in
/// the least-squares sense through a thin QR factorization instead of a
/// stored LU.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ImFreqOps {
    lambda: f64,
    statistic: Statistic,
    rf: Vec<f64>,
    nif: Vec<i64>,
    cf2if: DMatrix<Complex64>,
    if2cf: Option<LuFactors<Complex64>>,
    symmetrized: bool,
}

impl ImFreqOps {
    /// Builds the operator for the given cutoff, DLR frequencies and
    /// statistic.
    ///
    /// The Matsubara candidate window is `[-n_max, n_max)` for fermions and
    /// `[-n_max, n_max]` for bosons. With `symmetrize` the nodes are chosen
    /// in pairs under `n <-> -n - s`; for bosons the self-symmetric `n = 0`
    /// row can push the node count to rank + 1, and the
    /// coefficient-to-value columns absorb a `tanh(om/2)` factor that keeps
    /// the `n = 0` value finite for small frequencies.
    ///
    /// # Errors
    ///
    /// Fails for an invalid cutoff or an empty frequency set.
    pub fn new(lambda: f64, rf: &[f64], statistic: Statistic, symmetrize: bool) -> Result<Self> {
        let params = FineParams::new(lambda)?;
        let r = rf.len();
        if r == 0 {
            return Err(Error::InvalidParameter(
                "the DLR frequency set must not be empty".to_owned(),
            ));
        }

        let ns: Vec<i64> = match statistic {
            Statistic::Fermion => (-params.nmax..params.nmax).collect(),
            Statistic::Boson => (-params.nmax..=params.nmax).collect(),
        };
        let kmat = DMatrix::from_fn(ns.len(), r, |i, j| kernel::k_if(ns[i], rf[j], statistic));
        let sel = if symmetrize {
            pivoted_rgs_sym(&kmat, 1e-100, Some(r))
        } else {
            pivoted_rgs(&kmat, 1e-100, Some(r))
        };
        if sel.piv.len() < r {
            return Err(Error::SingularFactor(format!(
                "frequency-node selection found only {} of {r} nodes",
                sel.piv.len()
            )));
        }

        let mut piv = sel.piv;
        piv.sort_unstable();
        let nif: Vec<i64> = piv.into_iter().map(|i| ns[i]).collect();

        let scale = |j: usize| col_scale(rf[j], statistic, symmetrize);
        let cf2if = DMatrix::from_fn(nif.len(), r, |i, j| {
            kernel::k_if(nif[i], rf[j], statistic) * scale(j)
        });
        let if2cf = (nif.len() == r)
            .then(|| LuFactors::factorize(cf2if.clone()))
            .transpose()?;

        Ok(Self {
            lambda,
            statistic,
            rf: rf.to_vec(),
            nif,
            cf2if,
            if2cf,
            symmetrized: symmetrize,
        })
    }

    /// Expansion rank.
    #[must_use]
    pub fn rank(&self) -> usize {
        self.rf.len()
    }

    /// Number of Matsubara sampling nodes; equals the rank except for the
    /// symmetrized bosonic case, where it may be rank + 1.
    #[must_use]
    pub fn n_nodes(&self) -> usize {
        self.nif.len()
    }

    /// Cutoff the operator was built for.
    #[must_use]
    pub const fn lambda(&self) -> f64 {
        self.lambda
    }

    /// Statistic the Matsubara grid belongs to.
    #[must_use]
    pub const fn statistic(&self) -> Statistic {
        self.statistic
    }

    /// DLR frequencies, dimensionless and ascending.
    #[must_use]
    pub fn rf(&self) -> &[f64] {
        &self.rf
    }

    /// Matsubara indices of the sampling nodes, ascending.
    #[must_use]
    pub fn nodes(&self) -> &[i64] {
        &self.nif
    }

    /// Coefficient-to-value matrix.
    #[must_use]
    pub const fn cf2if(&self) -> &DMatrix<Complex64> {
        &self.cf2if
    }

    /// Factorized value-to-coefficient map; absent when the system is
    /// over-determined.
    #[must_use]
    pub const fn if2cf(&self) -> Option<&LuFactors<Complex64>> {
        self.if2cf.as_ref()
    }

    /// Whether the node set was selected in mirror pairs.
    #[must_use]
    pub const fn symmetrized(&self) -> bool {
        self.symmetrized
    }

    /// Transforms values on the DLR Matsubara grid into DLR coefficients.
    /// The factor of `beta` carried by the values is divided out on input.
    ///
    /// # Errors
    ///
    /// Fails when the leading dimension is not the node count, or the
    /// least-squares factorization degenerates.
    pub fn vals2coefs<S, D>(&self, beta: f64, g: &ArrayBase<S, D>) -> Result<Array<Complex64, D>>
    where
        S: Data<Elem = Complex64>,
        D: Dimension,
    {
        check_leading(self.n_nodes(), g.shape())?;
        let mut b = linalg::flatten_leading(g);
        b.unscale_mut(beta);
        let x = match &self.if2cf {
            Some(lu) => {
                lu.solve_in_place(&mut b);
                b
            }
            None => linalg::lstsq(&self.cf2if, &b)?,
        };
        let mut dim = g.raw_dim();
        dim[0] = self.rank();
        Ok(linalg::unflatten_leading(&x, dim))
    }

    /// Transforms DLR coefficients into values on the DLR Matsubara grid,
    /// multiplying in the factor of `beta` the values carry.
    ///
    /// # Errors
    ///
    /// Fails when the leading dimension is not the rank.
    pub fn coefs2vals<S, D>(&self, beta: f64, c: &ArrayBase<S, D>) -> Result<Array<Complex64, D>>
    where
        S: Data<Elem = Complex64>,
        D: Dimension,
    {
        check_leading(self.rank(), c.shape())?;
        let mut vals = &self.cf2if * linalg::flatten_leading(c);
        vals.scale_mut(beta);
        let mut dim = c.raw_dim();
        dim[0] = self.n_nodes();
        Ok(linalg::unflatten_leading(&vals, dim))
    }

    /// Evaluates the DLR expansion at an arbitrary Matsubara index,
    /// contracting the leading axis.
    ///
    /// # Errors
    ///
    /// Fails when the leading dimension is not the rank.
    pub fn coefs2eval<S, D>(
        &self,
        beta: f64,
        c: &ArrayBase<S, D>,
        n: i64,
    ) -> Result<Array<Complex64, D::Smaller>>
    where
        S: Data<Elem = Complex64>,
        D: Dimension + RemoveAxis,
    {
        check_leading(self.rank(), c.shape())?;
        let mut out = Array::zeros(c.raw_dim().remove_axis(Axis(0)));
        for (l, &om) in self.rf.iter().enumerate() {
            let k = kernel::k_if(n, om, self.statistic)
                * col_scale(om, self.statistic, self.symmetrized);
            out.scaled_add(k * beta, &c.index_axis(Axis(0), l));
        }
        Ok(out)
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
}

// basis-change factor of the symmetrized bosonic variant; the identity for
// everything else
fn col_scale(om: f64, statistic: Statistic, symmetrized: bool) -> f64 {
    if symmetrized && statistic == Statistic::Boson {
        (0.5 * om).tanh()
    } else {
        1.0
    }
}

fn check_leading(expected: usize, shape: &[usize]) -> Result<()> {
    let found = shape.first().copied().unwrap_or(0);
    if found == expected {
        Ok(())
    } else {
        Err(Error::DimensionMismatch { expected, found })
    }
}
