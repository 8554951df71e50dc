//! Discrete Lehmann representation (DLR) of imaginary-time Green's
//! functions.
//!
//! Given a dimensionless cutoff `lambda` and a target accuracy `eps`, the
//! crate selects a rank-r set of real frequencies by a rank-revealing
//! pivoted Gram-Schmidt sweep over a finely discretized analytic-
//! continuation kernel, and builds transform operators between three
//! representations of the same Green's function: DLR coefficients, values
//! on the DLR imaginary-time grid and values on the DLR Matsubara grid.
//! On top of the transforms it provides pointwise evaluation, reflection,
//! inner products, imaginary-time convolution and a Dyson-equation solver.
//!
//! ```
//! use dlr::freq::dlr_freq;
//! use dlr::imtime::ImTimeOps;
//!
//! let rf = dlr_freq(100.0, 1e-10, false)?;
//! let ops = ImTimeOps::new(100.0, &rf, false)?;
//! assert!(ops.rank() >= 10 && ops.rank() <= 80);
//! # Ok::<(), dlr::error::Error>(())
//! ```

pub mod convolution;
pub mod dyson;
pub mod error;
pub mod fine;
pub mod freq;
pub mod imfreq;
pub mod imtime;
pub mod kernel;
pub mod linalg;
pub mod rgs;
