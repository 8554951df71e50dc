//! Error types used by this crate.

use thiserror::Error;

/// Catch-all error for this crate.
#[derive(Debug, Error)]
pub enum Error {
    /// A caller-supplied parameter is outside its admissible range.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    /// A caller-supplied array does not have the leading dimension the
    /// operator was built for.
    #[error("dimension mismatch: expected leading dimension {expected}, got {found}")]
    DimensionMismatch {
        /// Leading dimension the operator expects.
        expected: usize,
        /// Leading dimension of the array that was passed in.
        found: usize,
    },
    /// A value-to-coefficient factorization turned out singular. The node
    /// selection never produces degenerate node sets, so this indicates a
    /// bug in this crate rather than a caller error.
    #[error("internal error: {0}")]
    SingularFactor(String),
    /// Failure while encoding or decoding a persisted operator.
    #[error(transparent)]
    Serialization(#[from] bincode::Error),
    /// A persisted operator carries a format tag this version does not know.
    #[error("unknown format tag `{0}`")]
    UnknownFormatTag(String),
}

/// Type alias for `Result` with this crate's [`enum@Error`].
pub type Result<T> = std::result::Result<T, Error>;
