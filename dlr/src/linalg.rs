//! Thin seam over the dense linear algebra the transforms are built on.
//!
//! Matrix products and dot products come straight from `nalgebra`. The LU
//! factorization is kept in LAPACK's packed layout (`getrf`/`getrs` pair)
//! instead of `nalgebra`'s opaque decomposition type because the persisted
//! operator stores the packed factor together with the pivot vector, and a
//! reloaded operator must reproduce solves bit for bit.

use crate::error::{Error, Result};
use nalgebra::{ComplexField, DMatrix, Scalar};
use ndarray::{Array, ArrayBase, Data, Dimension};
use serde::{Deserialize, Serialize};

/// Packed LU factorization with partial pivoting.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(bound(
    serialize = "T: Serialize",
    deserialize = "T: serde::de::DeserializeOwned"
))]
pub struct LuFactors<T: Scalar> {
    lu: DMatrix<T>,
    piv: Vec<usize>,
}

impl<T> LuFactors<T>
where
    T: ComplexField<RealField = f64> + Copy,
{
    /// Factorizes a square matrix, `getrf` style.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SingularFactor`] when a pivot column is exactly
    /// zero below the diagonal.
    pub fn factorize(mut a: DMatrix<T>) -> Result<Self> {
        let n = a.nrows();
        assert_eq!(n, a.ncols(), "LU factorization needs a square matrix");

        let mut piv = Vec::with_capacity(n);
        for k in 0..n {
            let mut p = k;
            let mut best = a[(k, k)].modulus();
            for i in k + 1..n {
                let v = a[(i, k)].modulus();
                if v > best {
                    best = v;
                    p = i;
                }
            }
            if best == 0.0 {
                return Err(Error::SingularFactor(format!(
                    "zero pivot in column {k} of an LU factorization"
                )));
            }
            if p != k {
                a.swap_rows(k, p);
            }
            piv.push(p);

            let inv = T::one() / a[(k, k)];
            for i in k + 1..n {
                let l = a[(i, k)] * inv;
                a[(i, k)] = l;
                for j in k + 1..n {
                    let u = a[(k, j)];
                    a[(i, j)] -= l * u;
                }
            }
        }

        Ok(Self { lu: a, piv })
    }

    /// Solves the factorized system against every column of `b` in place,
    /// `getrs` style.
    pub fn solve_in_place(&self, b: &mut DMatrix<T>) {
        let n = self.lu.nrows();
        assert_eq!(b.nrows(), n, "right-hand side has the wrong row count");

        for k in 0..n {
            let p = self.piv[k];
            if p != k {
                b.swap_rows(k, p);
            }
        }
        // unit lower-triangular sweep
        for k in 0..n {
            for i in k + 1..n {
                let l = self.lu[(i, k)];
                for c in 0..b.ncols() {
                    let bk = b[(k, c)];
                    b[(i, c)] -= l * bk;
                }
            }
        }
        // upper-triangular back substitution
        for k in (0..n).rev() {
            let inv = T::one() / self.lu[(k, k)];
            for c in 0..b.ncols() {
                b[(k, c)] *= inv;
            }
            for i in 0..k {
                let u = self.lu[(i, k)];
                for c in 0..b.ncols() {
                    let bk = b[(k, c)];
                    b[(i, c)] -= u * bk;
                }
            }
        }
    }

    /// Solves against `b`, returning a fresh matrix.
    #[must_use]
    pub fn solve(&self, b: &DMatrix<T>) -> DMatrix<T> {
        let mut x = b.clone();
        self.solve_in_place(&mut x);
        x
    }

    /// Inverse of the factorized matrix, obtained by solving against the
    /// identity.
    #[must_use]
    pub fn inverse(&self) -> DMatrix<T> {
        self.solve(&DMatrix::identity(self.lu.nrows(), self.lu.nrows()))
    }

    /// The packed `L - I + U` factor.
    #[must_use]
    pub const fn packed(&self) -> &DMatrix<T> {
        &self.lu
    }

    /// Row interchanges applied during factorization; `piv[k]` is the row
    /// swapped with row `k`.
    #[must_use]
    pub fn pivots(&self) -> &[usize] {
        &self.piv
    }
}

/// Flattens the trailing axes of a multi-index array into the column
/// ("multi-RHS") dimension of a dense matrix, keeping the leading axis as
/// rows.
pub(crate) fn flatten_leading<T, S, D>(a: &ArrayBase<S, D>) -> DMatrix<T>
where
    T: Scalar + Copy,
    S: Data<Elem = T>,
    D: Dimension,
{
    let rows = a.shape()[0];
    let cols = a.len() / rows;
    let std = a.as_standard_layout();
    let flat = std.view().into_shape((rows, cols)).unwrap();
    DMatrix::from_fn(rows, cols, |i, j| flat[[i, j]])
}

/// Inverse of [`flatten_leading`]: restores the trailing shape around the
/// row-major matrix content.
pub(crate) fn unflatten_leading<T, D>(m: &DMatrix<T>, dim: D) -> Array<T, D>
where
    T: Scalar + Copy,
    D: Dimension,
{
    let mut data = Vec::with_capacity(m.nrows() * m.ncols());
    for i in 0..m.nrows() {
        for j in 0..m.ncols() {
            data.push(m[(i, j)]);
        }
    }
    Array::from_shape_vec(dim, data).unwrap()
}

/// Least-squares solution of an over-determined system through a thin QR
/// factorization.
///
/// # Errors
///
/// Returns [`Error::SingularFactor`] when the triangular factor is
/// rank-deficient.
pub fn lstsq<T>(a: &DMatrix<T>, b: &DMatrix<T>) -> Result<DMatrix<T>>
where
    T: ComplexField<RealField = f64> + Copy,
{
    let qr = a.clone().qr();
    let rhs = qr.q().adjoint() * b;
    qr.r()
        .solve_upper_triangular(&rhs)
        .ok_or_else(|| Error::SingularFactor("rank-deficient least-squares system".to_owned()))
}
