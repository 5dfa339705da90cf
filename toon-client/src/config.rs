use std::path::Path;
use std::time::Duration;

use async_openai::config::OpenAIConfig;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, VariantNames};
use toon::{Strictness, ValidationError};

use crate::errors::{Result, ToonError};

/// The image API allows 5 requests a minute, so one every 12 seconds stays under it.
pub const DEFAULT_PACING_SECONDS: u64 = 12;

/// Everything the generator and dispatcher need, loaded once at startup and passed in.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Only ever read from the environment or the config file, never written back out
    #[serde(skip_serializing)]
    pub openai_api_key: Option<String>,
    pub openai_api_base: Option<String>,
    pub chat_model: ChatModel,
    pub strictness: Strictness,
    pub image: ImageSettings,
    pub pacing_seconds: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            openai_api_key: None,
            openai_api_base: None,
            chat_model: ChatModel::default(),
            strictness: Strictness::default(),
            image: ImageSettings::default(),
            pacing_seconds: DEFAULT_PACING_SECONDS,
        }
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("openai_api_key", &self.openai_api_key.as_ref().map(|_| "<redacted>"))
            .field("openai_api_base", &self.openai_api_base)
            .field("chat_model", &self.chat_model)
            .field("strictness", &self.strictness)
            .field("image", &self.image)
            .field("pacing_seconds", &self.pacing_seconds)
            .finish()
    }
}

impl Config {
    /// Load the configuration from an optional YAML file, then the environment.
    ///
    /// `OPENAI_API_KEY` and `OPENAI_API_BASE` from the environment (or `.env`)
    /// take precedence over the file.
    pub fn load(yml_path: Option<&Path>) -> Result<Self> {
        let mut config = match yml_path {
            Some(path) => Self::from_yaml(&std::fs::read_to_string(path)?)?,
            None => Self::default(),
        };
        config.apply_env();
        Ok(config)
    }

    /// Take the API key and base URL from the environment when they are set there.
    pub fn apply_env(&mut self) {
        if let Ok(key) = dotenvy::var("OPENAI_API_KEY") {
            self.openai_api_key = Some(key);
        }
        if let Ok(base) = dotenvy::var("OPENAI_API_BASE") {
            self.openai_api_base = Some(base);
        }
    }

    pub fn from_yaml(yml: &str) -> Result<Self> {
        serde_yaml::from_str(yml).map_err(|e| ToonError::Config(e.to_string()))
    }

    pub fn api_key(&self) -> Result<&str> {
        self.openai_api_key
            .as_deref()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| {
                ToonError::Config("OPENAI_API_KEY not found in the environment".to_string())
            })
    }

    pub fn pacing(&self) -> Duration {
        Duration::from_secs(self.pacing_seconds)
    }

    /// Client configuration for the hosted OpenAI endpoints.
    pub fn openai_config(&self) -> Result<OpenAIConfig> {
        let mut openai = OpenAIConfig::new().with_api_key(self.api_key()?);
        if let Some(base) = &self.openai_api_base {
            openai = openai.with_api_base(base);
        }
        Ok(openai)
    }
}

/// The chat models scenes may be generated with.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Display,
    EnumString,
    VariantNames,
    Serialize,
    Deserialize,
)]
pub enum ChatModel {
    #[default]
    #[strum(to_string = "gpt-4o-mini")]
    #[serde(rename = "gpt-4o-mini")]
    Gpt4oMini,
    #[strum(to_string = "gpt-4o")]
    #[serde(rename = "gpt-4o")]
    Gpt4o,
    #[strum(to_string = "gpt-3.5-turbo")]
    #[serde(rename = "gpt-3.5-turbo")]
    Gpt35Turbo,
}

impl ChatModel {
    /// Look up a model by name, rejecting anything not on the list.
    pub fn parse(name: &str) -> std::result::Result<Self, ValidationError> {
        name.trim()
            .parse()
            .map_err(|_| ValidationError::UnsupportedModel {
                model: name.to_string(),
                allowed: Self::VARIANTS.join(", "),
            })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageSettings {
    pub model: String,
    pub quality: ImageQuality,
    pub size: ImageSize,
    pub style: ImageStyle,
}

impl Default for ImageSettings {
    fn default() -> Self {
        Self {
            model: "dall-e-3".to_string(),
            quality: ImageQuality::Standard,
            size: ImageSize::Square,
            style: ImageStyle::Vivid,
        }
    }
}

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Display, EnumString, VariantNames, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ImageQuality {
    #[default]
    Standard,
    Hd,
}

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Display, EnumString, VariantNames, Serialize, Deserialize,
)]
pub enum ImageSize {
    #[default]
    #[strum(to_string = "1024x1024")]
    #[serde(rename = "1024x1024")]
    Square,
    #[strum(to_string = "1792x1024")]
    #[serde(rename = "1792x1024")]
    Landscape,
    #[strum(to_string = "1024x1792")]
    #[serde(rename = "1024x1792")]
    Portrait,
}

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Display, EnumString, VariantNames, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ImageStyle {
    #[default]
    Vivid,
    Natural,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_allow_list() {
        assert_eq!(ChatModel::parse("gpt-4o").unwrap(), ChatModel::Gpt4o);
        assert_eq!(ChatModel::parse(" gpt-4o-mini ").unwrap(), ChatModel::Gpt4oMini);
        let err = ChatModel::parse("gpt-2").unwrap_err();
        assert_eq!(
            err,
            ValidationError::UnsupportedModel {
                model: "gpt-2".to_string(),
                allowed: "gpt-4o-mini, gpt-4o, gpt-3.5-turbo".to_string(),
            }
        );
    }

    #[test]
    fn yaml_overrides_defaults() {
        let config = Config::from_yaml(
            "chat_model: gpt-4o\nstrictness: strict\npacing_seconds: 15\nimage:\n  quality: hd\n  size: 1024x1792\n",
        )
        .unwrap();
        assert_eq!(config.chat_model, ChatModel::Gpt4o);
        assert_eq!(config.strictness, Strictness::Strict);
        assert_eq!(config.pacing(), Duration::from_secs(15));
        assert_eq!(config.image.quality, ImageQuality::Hd);
        assert_eq!(config.image.size, ImageSize::Portrait);
        // untouched fields keep their defaults
        assert_eq!(config.image.model, "dall-e-3");
        assert_eq!(config.image.style, ImageStyle::Vivid);
    }

    #[test]
    fn missing_key_is_a_config_error() {
        let config = Config::default();
        assert!(matches!(config.api_key(), Err(ToonError::Config(_))));
        assert_eq!(config.pacing(), Duration::from_secs(DEFAULT_PACING_SECONDS));
    }

    #[test]
    fn debug_hides_the_key() {
        let config = Config {
            openai_api_key: Some("sk-secret".to_string()),
            ..Default::default()
        };
        assert!(!format!("{config:?}").contains("sk-secret"));
    }

    #[test]
    fn image_options_parse_from_cli_spelling() {
        assert_eq!("1792x1024".parse::<ImageSize>().unwrap(), ImageSize::Landscape);
        assert_eq!("hd".parse::<ImageQuality>().unwrap(), ImageQuality::Hd);
        assert_eq!("natural".parse::<ImageStyle>().unwrap(), ImageStyle::Natural);
        assert_eq!(ImageSize::Portrait.to_string(), "1024x1792");
    }
}
