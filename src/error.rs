/// Errors surfaced by the overlay engine.
///
/// Missing sensor inputs and degenerate projections are not errors; they show
/// up as [`Status`](crate::Status) bits and `None` projections respectively.
#[derive(Debug, thiserror::Error)]
pub enum ArError {
    #[error("Parameter not found: {0}")]
    KeyNotFound(&'static str),

    #[error("Parameter {key} holds a different value type")]
    TypeMismatch { key: &'static str },

    #[error("Resource acquisition failed: {0}")]
    ResourceAcquisitionFailed(String),

    #[error("Invalid value for {key}: {reason}")]
    InvalidParameter { key: &'static str, reason: String },

    #[error("Failed to spawn {name} thread: {source}")]
    ThreadSpawn {
        name: &'static str,
        #[source]
        source: std::io::Error,
    },
}
