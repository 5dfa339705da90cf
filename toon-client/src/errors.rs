use toon::ValidationError;

pub type Result<T> = std::result::Result<T, ToonError>;

#[derive(thiserror::Error, Debug)]
pub enum ToonError {
    /// The language model could not be reached, refused the credentials, or said nothing
    #[error("Scene generation failed: {0}")]
    Generation(String),
    #[error("Invalid scenes: {0}")]
    Validation(#[from] ValidationError),
    /// The image model could not be reached, refused the request, or sent back something unusable
    #[error("Image request failed: {0}")]
    ImageRequest(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Configuration error: {0}")]
    Config(String),
}
