//! Rank-revealing pivoted Gram-Schmidt with reorthogonalization.
//!
//! Works on the rows of a dense matrix. Every remaining row is
//! orthogonalized against each accepted direction once as it is created,
//! and a second full sweep runs over the pivot row right before it is
//! normalized; the second pass is what keeps the basis orthonormal to
//! machine precision at the tolerances this crate operates at.

use nalgebra::{ComplexField, DMatrix, DVector};

/// Outcome of a pivoted Gram-Schmidt run.
pub struct RgsResult<T: nalgebra::Scalar> {
    /// Row-orthonormal matrix; row `i` spans the pivot sequence up to `i`.
    pub q: DMatrix<T>,
    /// Residual norm at each accepted step.
    pub norms: Vec<f64>,
    /// Row indices of the input matrix in the order they were selected.
    pub piv: Vec<usize>,
}

/// Pivoted reorthogonalized Gram-Schmidt on the rows of `a`.
///
/// Selection stops when the residual norm of the pivot drops below `eps`
/// times the first pivot norm, or when `max_rank` rows are selected. On
/// equal norms the lowest remaining row index wins.
#[must_use]
pub fn pivoted_rgs<T>(a: &DMatrix<T>, eps: f64, max_rank: Option<usize>) -> RgsResult<T>
where
    T: ComplexField<RealField = f64> + Copy,
{
    let m = a.nrows();
    let rmax = max_rank.unwrap_or(m).min(m);

    let mut rows: Vec<DVector<T>> = (0..m).map(|i| a.row(i).transpose()).collect();
    let mut remaining: Vec<usize> = (0..m).collect();
    let mut q: Vec<DVector<T>> = Vec::new();
    let mut piv = Vec::new();
    let mut norms = Vec::new();
    let mut first_norm = 0.0_f64;

    while piv.len() < rmax && !remaining.is_empty() {
        // `remaining` stays sorted, so the strict comparison implements the
        // lowest-index tie-break
        let mut sel = 0;
        let mut best = -1.0;
        for (pos, &i) in remaining.iter().enumerate() {
            let nrm2 = rows[i].norm_squared();
            if nrm2 > best {
                best = nrm2;
                sel = pos;
            }
        }
        let i = remaining.remove(sel);

        reorthogonalize(&mut rows[i], &q);
        let nrm = rows[i].norm();
        if piv.is_empty() {
            first_norm = nrm;
        }
        if nrm == 0.0 || nrm < eps * first_norm {
            break;
        }
        rows[i].unscale_mut(nrm);

        let qnew = rows[i].clone();
        for &j in &remaining {
            let c = qnew.dotc(&rows[j]);
            rows[j].axpy(-c, &qnew, T::one());
        }
        norms.push(nrm);
        piv.push(i);
        q.push(qnew);
    }

    RgsResult {
        q: rows_to_matrix(&q, a.ncols()),
        norms,
        piv,
    }
}

/// Symmetric variant: rows come in mirror pairs `(i, m - 1 - i)` which are
/// selected jointly, so the pivot set inherits the mirror symmetry of the
/// underlying grid. The centre row of an odd-row matrix is self-paired and
/// selected alone.
///
/// Pairs are ranked by the Euclidean norm of their stacked residuals;
/// stopping and tie-breaking follow [`pivoted_rgs`]. A pair crossing
/// `max_rank` is still taken whole, so the selected count may exceed the
/// target by one.
#[must_use]
pub fn pivoted_rgs_sym<T>(a: &DMatrix<T>, eps: f64, max_rank: Option<usize>) -> RgsResult<T>
where
    T: ComplexField<RealField = f64> + Copy,
{
    let m = a.nrows();
    let rmax = max_rank.unwrap_or(m).min(m);
    let center = (m % 2 == 1).then_some(m / 2);

    let mut rows: Vec<DVector<T>> = (0..m).map(|i| a.row(i).transpose()).collect();
    // pair representatives, ascending
    let mut remaining: Vec<usize> = (0..(m + 1) / 2).collect();
    let mut q: Vec<DVector<T>> = Vec::new();
    let mut piv = Vec::new();
    let mut norms = Vec::new();
    let mut first_norm = 0.0_f64;
    let mut started = false;

    while piv.len() < rmax && !remaining.is_empty() {
        let mut sel = 0;
        let mut best = -1.0;
        for (pos, &i) in remaining.iter().enumerate() {
            let mut nrm2 = rows[i].norm_squared();
            if Some(i) != center {
                nrm2 += rows[m - 1 - i].norm_squared();
            }
            if nrm2 > best {
                best = nrm2;
                sel = pos;
            }
        }
        let i = remaining.remove(sel);

        // both members get their second sweep before the stopping decision
        reorthogonalize(&mut rows[i], &q);
        let mut pair_nrm2 = rows[i].norm_squared();
        if Some(i) != center {
            reorthogonalize(&mut rows[m - 1 - i], &q);
            pair_nrm2 += rows[m - 1 - i].norm_squared();
        }
        let pivot_norm = pair_nrm2.sqrt();
        if !started {
            first_norm = pivot_norm;
            started = true;
        }
        if pivot_norm == 0.0 || pivot_norm < eps * first_norm {
            break;
        }

        let members: &[usize] = if Some(i) == center {
            &[m / 2]
        } else {
            &[i, m - 1 - i]
        };
        let first_new = q.len();
        for &row in members {
            // the second member still has to be orthogonalized against the
            // first, which entered `q` in the previous round of this loop
            reorthogonalize(&mut rows[row], &q[first_new..]);
            let nrm = rows[row].norm();
            if nrm == 0.0 {
                continue;
            }
            rows[row].unscale_mut(nrm);
            let qnew = rows[row].clone();
            for &j in &remaining {
                let c = qnew.dotc(&rows[j]);
                rows[j].axpy(-c, &qnew, T::one());
                if Some(j) != center {
                    let c = qnew.dotc(&rows[m - 1 - j]);
                    rows[m - 1 - j].axpy(-c, &qnew, T::one());
                }
            }
            norms.push(nrm);
            piv.push(row);
            q.push(qnew);
        }
    }

    RgsResult {
        q: rows_to_matrix(&q, a.ncols()),
        norms,
        piv,
    }
}

fn reorthogonalize<T>(v: &mut DVector<T>, q: &[DVector<T>])
where
    T: ComplexField<RealField = f64> + Copy,
{
    for qv in q {
        let c = qv.dotc(v);
        v.axpy(-c, qv, T::one());
    }
}

fn rows_to_matrix<T>(q: &[DVector<T>], ncols: usize) -> DMatrix<T>
where
    T: ComplexField<RealField = f64> + Copy,
{
    DMatrix::from_fn(q.len(), ncols, |i, j| q[i][j])
}
