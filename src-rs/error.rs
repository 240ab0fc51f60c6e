//! Error types for the crop pipeline and its collaborators.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CropError {
    /// Displayed size is not laid out yet (zero, negative or non-finite).
    #[error("image has no usable displayed size ({width}x{height}); wait for layout before cropping")]
    DegenerateImage { width: f64, height: f64 },

    /// Drawing surface could not be acquired for the output raster.
    #[error("could not acquire a {width}x{height} drawing surface: {reason}")]
    RenderContextUnavailable {
        width: u32,
        height: u32,
        reason: String,
    },

    /// Mapped region rounds to zero pixels on one axis.
    #[error("selected region is empty in native pixels")]
    EmptyRegion,

    #[error("selection {width}x{height} is below the minimum crop size")]
    SelectionTooSmall { width: f64, height: f64 },

    #[error("a crop is already in progress")]
    CropInProgress,

    #[error("failed to decode image: {0}")]
    Decode(#[source] image::ImageError),

    #[error("failed to encode image: {0}")]
    Encode(#[source] image::ImageError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CropError {
    /// Message shown to the user for failures of a single crop attempt.
    pub fn user_message(&self) -> &'static str {
        match self {
            CropError::SelectionTooSmall { .. } => "Select a larger area to crop.",
            CropError::CropInProgress => "Please wait for the current crop to finish.",
            _ => "Could not process image, try again.",
        }
    }
}

#[derive(Debug, Error)]
pub enum SolveError {
    #[error("no solver executable configured or found on PATH")]
    Unavailable,

    #[error("failed to start solver `{bin}`: {source}")]
    Spawn {
        bin: String,
        #[source]
        source: std::io::Error,
    },

    #[error("solver timed out after {0}s")]
    Timeout(u64),

    #[error("solver exited with status {code}")]
    Failed { code: i32 },

    #[error("solver returned an empty response")]
    EmptyResponse,

    #[error("solver response was not a valid solution: {0}")]
    MalformedResponse(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SolveError {
    pub fn user_message(&self) -> &'static str {
        match self {
            SolveError::Unavailable => "The solver is not available right now.",
            SolveError::Timeout(_) => "The solver took too long to answer, try again.",
            _ => "Failed to solve the problem, try again.",
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid store key: {0:?}")]
    InvalidKey(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
