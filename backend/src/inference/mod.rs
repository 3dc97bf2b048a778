pub mod classifier;
pub mod extractor;
pub mod fetch;
pub mod network;
pub mod pipeline;
pub mod preprocess;

use shared::Category;

#[derive(Debug, thiserror::Error)]
pub enum InferenceError {
    #[error("Failed to decode image: {0}")]
    Decode(#[from] image::ImageError),
    #[error("Uploaded image is empty")]
    EmptyImage,
    #[error("Preprocessing error: {0}")]
    Preprocessing(String),
    #[error("Shape mismatch: expected {expected} features, got {actual}")]
    ShapeMismatch { expected: usize, actual: usize },
    #[error("Unexpected model output: {0}")]
    UnexpectedOutput(String),
    #[error("Model error: {0}")]
    Model(#[from] tch::TchError),
}

impl InferenceError {
    /// Whether the failure is caused by the uploaded bytes rather than the service.
    pub fn is_client_error(&self) -> bool {
        matches!(self, InferenceError::Decode(_) | InferenceError::EmptyImage)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub category: Category,
    /// Percentage in [0, 100], rounded to two decimals.
    pub confidence: f64,
    pub probabilities: Vec<f32>,
}

/// Runs one encoded image through the full pipeline.
pub trait Predictor: Send + Sync {
    fn predict(&self, image: &[u8]) -> Result<Prediction, InferenceError>;
}
