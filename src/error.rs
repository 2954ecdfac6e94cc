use thiserror::Error;

/// Fatal errors surfaced by the sampler (spec §7).
///
/// Recoverable conditions — numeric degeneracy and non-convergence — are *not*
/// represented here; they are handled locally with a `warn!` per spec §7.
#[derive(Debug, Error)]
pub enum SamplerError {
    /// A configuration that cannot be sampled from: non-positive Student-t dof,
    /// empty discrete support, unordered prior limits, zero chains / zero chunk
    /// size, unknown partition index or parameter name, a blocked parameter that
    /// does not exist, or a likelihood/description dimensionality mismatch.
    #[error("invalid configuration: {reason}")]
    InvalidConfiguration { reason: String },

    /// A resume whose dimensionality or chain count disagrees with the current
    /// configuration.
    #[error("checkpoint mismatch: expected {expected}, found {found}")]
    CheckpointMismatch { expected: String, found: String },

    /// Fatal chunk/checkpoint I/O.
    #[error("storage i/o failure: {0}")]
    Io(#[from] std::io::Error),

    /// Fatal chunk/checkpoint (de)serialization.
    #[error("storage serialization failure: {0}")]
    Serde(#[from] serde_json::Error),
}

impl SamplerError {
    /// Convenience constructor for [`SamplerError::InvalidConfiguration`].
    pub(crate) fn config(reason: impl Into<String>) -> Self {
        SamplerError::InvalidConfiguration {
            reason: reason.into(),
        }
    }
}
