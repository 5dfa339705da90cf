use crate::basic_models::SCENE_COUNT;
use crate::sentence_style::SentenceForm;

/// Everything that can be wrong with a prompt or a set of scenes before it is accepted.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Prompt is empty")]
    EmptyPrompt,
    #[error("Unsupported model {model:?}, expected one of: {allowed}")]
    UnsupportedModel { model: String, allowed: String },
    #[error("Response is not valid scene JSON: {0}")]
    Malformed(String),
    #[error("Must have exactly {expected} scenes, got {actual}", expected = SCENE_COUNT)]
    WrongCount { actual: usize },
    #[error("Unexpected scene key: {0}")]
    UnexpectedKey(String),
    #[error("Missing required scene: {0}")]
    MissingScene(String),
    #[error("scene_{position} is missing the `{field}` field")]
    MissingField { position: usize, field: &'static str },
    #[error("scene_{position} has a blank `{field}` field")]
    BlankField { position: usize, field: &'static str },
    #[error("Scene number must be between 1 and {max}, got {0}", max = SCENE_COUNT)]
    PositionOutOfRange(usize),
    #[error("scene_{position} should be {expected} sentence: {script:?}")]
    SentenceStyle {
        position: usize,
        expected: SentenceForm,
        script: String,
    },
}
