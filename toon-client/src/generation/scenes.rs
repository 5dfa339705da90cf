use toon::{SceneCollection, Strictness, ValidationError, SCENE_COUNT};

use super::llm::ChatBackend;
use crate::config::ChatModel;
use crate::errors::Result;

/// Turns an advertising script into a validated storyboard with a single LLM call.
pub struct SceneGenerator<C> {
    backend: C,
    strictness: Strictness,
}

impl<C: ChatBackend> SceneGenerator<C> {
    pub fn new(backend: C, strictness: Strictness) -> Self {
        Self {
            backend,
            strictness,
        }
    }

    /// Generate 18 scenes from `prompt` with the named model.
    ///
    /// The prompt and model are checked before anything goes over the network.
    /// There is one attempt: a transport failure is a `Generation` error and a
    /// reply that does not fit the schema is a `Validation` error.
    pub async fn generate(&self, prompt: &str, model: &str) -> Result<SceneCollection> {
        let model = check_request(prompt, model)?;

        tracing::info!("Generating {} scenes with {} ..", SCENE_COUNT, model);
        let request = scenes_prompt(prompt);
        tracing::debug!("Prompt: {}", request);
        let reply = self.backend.complete(model, &request).await?;
        tracing::debug!("Reply: {}", reply);

        let collection = SceneCollection::from_json(strip_code_fence(&reply))?;
        collection.enforce_sentence_style(self.strictness)?;
        tracing::info!("Generated {} scenes", collection.len());
        Ok(collection)
    }
}

/// Reject an empty script or a model off the list, before any client is built.
pub fn check_request(prompt: &str, model: &str) -> Result<ChatModel> {
    if prompt.trim().is_empty() {
        return Err(ValidationError::EmptyPrompt.into());
    }
    Ok(ChatModel::parse(model)?)
}

/// Fill the scene template with the user's script.
pub fn scenes_prompt(input: &str) -> String {
    let prompt_template = include_str!("../prompts/generate-scenes.md");
    prompt_template.replace("{input}", input.trim())
}

/// Models like to wrap JSON in a Markdown fence even when told not to.
pub fn strip_code_fence(reply: &str) -> &str {
    reply
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fences_are_stripped() {
        assert_eq!(strip_code_fence("```json\n{\"a\": 1}\n```"), "{\"a\": 1}");
        assert_eq!(strip_code_fence("```\n{}\n```\n"), "{}");
        assert_eq!(strip_code_fence("  {} "), "{}");
    }

    #[test]
    fn prompt_embeds_the_script_and_the_rule() {
        let prompt = scenes_prompt("  비문증 광고 대본  ");
        assert!(prompt.ends_with("비문증 광고 대본\n"));
        assert!(prompt.contains("Odd scenes"));
        assert!(!prompt.contains("{input}"));
    }
}
