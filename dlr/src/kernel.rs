//! Analytic-continuation kernel primitives.
//!
//! The kernel relates a spectral density on the real-frequency axis to an
//! imaginary-time Green's function. Imaginary time is carried in the
//! *relative* format throughout: dimensionless `t` in `[-1, 1]`, where
//! `t in (0, 1/2]` encodes the physical time `t * beta` and negative values
//! encode the distance to `beta` without cancellation, `tau = beta * (1 + t)`.
//! Frequencies are dimensionless as well, `om = beta * omega`.

use num_complex::Complex64;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Particle statistic of a Green's function.
///
/// The discriminants are fixed because the serialized operator stores the
/// statistic as this integer.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum Statistic {
    /// Bosonic Matsubara frequencies `2 n pi / beta`.
    Boson = 0,
    /// Fermionic Matsubara frequencies `(2 n + 1) pi / beta`.
    Fermion = 1,
}

impl Statistic {
    /// Offset `s` in the Matsubara index `2 n + s`.
    #[must_use]
    pub const fn offset(self) -> i64 {
        match self {
            Self::Boson => 0,
            Self::Fermion => 1,
        }
    }
}

/// Imaginary-time kernel `K(t, om)` in relative format.
///
/// Both branches keep numerator and denominator bounded, so the value is
/// finite for every finite `om` and `|K| <= 1` on the whole domain.
#[must_use]
pub fn k_it(t: f64, om: f64) -> f64 {
    if t >= 0.0 {
        k_it_abs(t, om)
    } else {
        k_it_abs(-t, -om)
    }
}

fn k_it_abs(t: f64, om: f64) -> f64 {
    if om >= 0.0 {
        (-t * om).exp() / (1.0 + (-om).exp())
    } else {
        ((1.0 - t) * om).exp() / (1.0 + om.exp())
    }
}

/// Imaginary-frequency kernel `K(i nu_n, om) = -1 / ((2n + s) pi i - om)`
/// at the `n`-th Matsubara frequency of the given statistic.
#[must_use]
pub fn k_if(n: i64, om: f64, statistic: Statistic) -> Complex64 {
    let nu = (2 * n + statistic.offset()) as f64 * PI;
    Complex64::new(om, -nu).inv()
}

/// Overlap `int_0^1 K(t, oma) K(t, omb) dt` of two imaginary-time kernel
/// columns, in closed form.
///
/// The four sign cases mirror the kernel branches so that every
/// exponential stays bounded; the removable singularity at
/// `oma + omb = 0` is crossed with `exp_m1`.
#[must_use]
pub(crate) fn k_it_overlap(oma: f64, omb: f64) -> f64 {
    let s = oma + omb;
    let scale = denom(oma) * denom(omb);
    match (oma >= 0.0, omb >= 0.0) {
        (true, true) => em1x(-s) / scale,
        (false, false) => em1x(s) / scale,
        (true, false) => mixed(oma, omb) / scale,
        (false, true) => mixed(omb, oma) / scale,
    }
}

// 1 + exp(-|om|)
fn denom(om: f64) -> f64 {
    1.0 + (-om.abs()).exp()
}

// (exp(x) - 1) / x, continued through the removable singularity at 0
fn em1x(x: f64) -> f64 {
    if x == 0.0 {
        1.0
    } else {
        x.exp_m1() / x
    }
}

// (exp(omb) - exp(-oma)) / (oma + omb) for oma >= 0 > omb; the sign of the
// sum is unconstrained here, so nearly-cancelling sums go through exp_m1
fn mixed(oma: f64, omb: f64) -> f64 {
    let s = oma + omb;
    if s.abs() < 1.0 {
        (-oma).exp() * em1x(s)
    } else {
        (omb.exp() - (-oma).exp()) / s
    }
}

/// Convert a physical imaginary time `tau in [0, beta]` to relative format.
#[must_use]
pub fn rel_from_phys(beta: f64, tau: f64) -> f64 {
    if tau <= 0.5 * beta {
        tau / beta
    } else {
        (tau - beta) / beta
    }
}

/// Convert a relative imaginary time back to a physical one in `[0, beta]`.
///
/// Times encoded as negative relative values land near `beta`; the absolute
/// precision of the result is limited there, which is why the relative
/// format is the primary representation.
#[must_use]
pub fn phys_from_rel(beta: f64, t: f64) -> f64 {
    if t >= 0.0 {
        beta * t
    } else {
        beta * (1.0 + t)
    }
}

/// `n` equispaced points on `[0, beta)`, returned in relative format.
///
/// The interval is half-open: the endpoint `beta` is the same state as `0`
/// up to (anti-)periodicity and has no distinct relative encoding.
#[must_use]
pub fn equispaced_rel(n: usize) -> Vec<f64> {
    (0..n)
        .map(|i| {
            let t = i as f64 / n as f64;
            if t <= 0.5 {
                t
            } else {
                t - 1.0
            }
        })
        .collect()
}
