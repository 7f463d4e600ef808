//! Engine error type.

/// Errors surfaced by engine operations.
///
/// Per-entity cycle failures are caught at the cycle loop and reported as
/// `monitor:error` events; they never abort processing of other entities.
#[derive(Debug, Clone, thiserror::Error)]
pub enum EngineError {
    #[error("unknown entity: {0}")]
    UnknownEntity(String),

    #[error("insufficient samples for {entity}: have {have}, need {need}")]
    InsufficientSamples {
        entity: String,
        have: usize,
        need: usize,
    },

    #[error("non-monotonic sample timestamp for {0}")]
    NonMonotonicSample(String),

    #[error("data source error: {0}")]
    Source(String),

    #[error("analytics error: {0}")]
    Analytics(String),
}
