pub mod basic_models;
pub mod sentence_style;
pub mod validation;

pub use basic_models::{GeneratedImage, Scene, SceneCollection, ScenePosition, SCENE_COUNT};
pub use sentence_style::{SentenceForm, Strictness};
pub use validation::ValidationError;
