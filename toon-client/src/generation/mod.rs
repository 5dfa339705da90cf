pub mod illustrate;
pub mod llm;
pub mod report;
pub mod scenes;

pub use illustrate::{Dispatcher, ImageBackend, ImageRequest, OpenAiImages};
pub use llm::{ChatBackend, OpenAiChat};
pub use report::{DispatchReport, SceneOutcome, Summary};
pub use scenes::{check_request, SceneGenerator};
