use std::path::{Path, PathBuf};
use std::time::Duration;

use async_openai::config::OpenAIConfig;
use async_openai::types::{self as openai, CreateImageRequestArgs, ResponseFormat};
use async_trait::async_trait;
use base64::Engine;
use tokio::sync::Mutex;
use tokio::time::Instant;
use toon::{GeneratedImage, SceneCollection, ScenePosition, SCENE_COUNT};

use super::report::DispatchReport;
use crate::config::{Config, ImageQuality, ImageSettings, ImageSize, ImageStyle};
use crate::errors::{Result, ToonError};

/// One request to an image model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRequest {
    pub position: ScenePosition,
    pub prompt: String,
    pub settings: ImageSettings,
}

/// Anything that can turn a prompt into image bytes.
#[async_trait]
pub trait ImageBackend: Send + Sync {
    async fn render(&self, request: &ImageRequest) -> Result<Vec<u8>>;
}

#[async_trait]
impl<T: ImageBackend + ?Sized> ImageBackend for &T {
    async fn render(&self, request: &ImageRequest) -> Result<Vec<u8>> {
        (**self).render(request).await
    }
}

/// The hosted OpenAI image API. URL results are downloaded with a plain HTTP client.
#[derive(Clone)]
pub struct OpenAiImages {
    client: async_openai::Client<OpenAIConfig>,
    http: reqwest::Client,
}

impl OpenAiImages {
    pub fn new(config: &Config) -> Result<Self> {
        Ok(Self {
            client: async_openai::Client::with_config(config.openai_config()?),
            http: reqwest::Client::new(),
        })
    }
}

#[async_trait]
impl ImageBackend for OpenAiImages {
    async fn render(&self, request: &ImageRequest) -> Result<Vec<u8>> {
        let settings = &request.settings;
        let openai_request = CreateImageRequestArgs::default()
            .n(1)
            .model(match settings.model.as_str() {
                "dall-e-3" => openai::ImageModel::DallE3,
                "dall-e-2" => openai::ImageModel::DallE2,
                other => openai::ImageModel::Other(other.to_string()),
            })
            .quality(match settings.quality {
                ImageQuality::Standard => openai::ImageQuality::Standard,
                ImageQuality::Hd => openai::ImageQuality::HD,
            })
            .size(match settings.size {
                ImageSize::Square => openai::ImageSize::S1024x1024,
                ImageSize::Landscape => openai::ImageSize::S1792x1024,
                ImageSize::Portrait => openai::ImageSize::S1024x1792,
            })
            .style(match settings.style {
                ImageStyle::Vivid => openai::ImageStyle::Vivid,
                ImageStyle::Natural => openai::ImageStyle::Natural,
            })
            .response_format(ResponseFormat::Url)
            .prompt(&request.prompt)
            .build()
            .map_err(|e| ToonError::ImageRequest(e.to_string()))?;
        let response = self
            .client
            .images()
            .create(openai_request)
            .await
            .map_err(|e| ToonError::ImageRequest(e.to_string()))?;
        let image = response
            .data
            .first()
            .ok_or_else(|| ToonError::ImageRequest("No image in response".to_string()))?;

        match &**image {
            openai::Image::Url { url, .. } => {
                // Now go fetch that image
                tracing::debug!("Fetching image from {}", url);
                let download = self
                    .http
                    .get(url)
                    .send()
                    .await
                    .and_then(|response| response.error_for_status())
                    .map_err(|e| ToonError::ImageRequest(e.to_string()))?;
                let bytes = download
                    .bytes()
                    .await
                    .map_err(|e| ToonError::ImageRequest(e.to_string()))?;
                Ok(bytes.to_vec())
            }
            openai::Image::B64Json { b64_json, .. } => base64::engine::general_purpose::STANDARD
                .decode(b64_json.as_bytes())
                .map_err(|e| ToonError::ImageRequest(e.to_string())),
        }
    }
}

/// Sends image requests one at a time, never closer together than the pacing interval.
///
/// The interval is measured from the end of one request to the start of the
/// next, across every call on the same dispatcher, so a retry right after a
/// batch is paced the same as the scenes inside it.
pub struct Dispatcher<B> {
    backend: B,
    settings: ImageSettings,
    pacing: Duration,
    // When the previous request finished. Held for the whole request, which
    // keeps requests from concurrent callers strictly one after another.
    last_request: Mutex<Option<Instant>>,
}

impl<B: ImageBackend> Dispatcher<B> {
    pub fn new(backend: B, settings: ImageSettings, pacing: Duration) -> Self {
        Self {
            backend,
            settings,
            pacing,
            last_request: Mutex::new(None),
        }
    }

    pub fn from_config(backend: B, config: &Config) -> Self {
        Self::new(backend, config.image.clone(), config.pacing())
    }

    pub fn settings(&self) -> &ImageSettings {
        &self.settings
    }

    /// Render a single scene into `output_dir`, creating it if needed.
    pub async fn dispatch_one(
        &self,
        collection: &SceneCollection,
        position: ScenePosition,
        output_dir: &Path,
    ) -> Result<GeneratedImage> {
        tokio::fs::create_dir_all(output_dir).await?;
        self.paced_render(collection, position, output_dir).await
    }

    /// Render every scene in order.
    ///
    /// Only a problem with the output directory fails the whole batch. A
    /// scene that fails is logged and recorded in the report, and the batch
    /// moves on to the next one.
    pub async fn dispatch_all(
        &self,
        collection: &SceneCollection,
        output_dir: &Path,
    ) -> Result<DispatchReport> {
        self.dispatch_positions(collection, ScenePosition::all().collect(), output_dir)
            .await
    }

    /// Try the failed scenes of an earlier report again, for up to `rounds` rounds.
    ///
    /// Returns the earlier report with the new outcomes folded in.
    pub async fn retry_failed(
        &self,
        collection: &SceneCollection,
        previous: &DispatchReport,
        output_dir: &Path,
        rounds: usize,
    ) -> Result<DispatchReport> {
        let mut report = previous.clone();
        for round in 1..=rounds {
            let failed = report.failed_positions();
            if failed.is_empty() {
                break;
            }
            tracing::info!("Retry {}/{}: {} scenes", round, rounds, failed.len());
            let retried = self
                .dispatch_positions(collection, failed, output_dir)
                .await?;
            report.merge(retried);
        }
        Ok(report)
    }

    async fn dispatch_positions(
        &self,
        collection: &SceneCollection,
        positions: Vec<ScenePosition>,
        output_dir: &Path,
    ) -> Result<DispatchReport> {
        tokio::fs::create_dir_all(output_dir).await?;
        tracing::info!(
            "Processing {} scenes, one request every {}s",
            positions.len(),
            self.pacing.as_secs()
        );

        let mut report = DispatchReport::new(self.settings.clone());
        for position in positions {
            tracing::info!("Processing scene {}/{} ..", position, SCENE_COUNT);
            match self.paced_render(collection, position, output_dir).await {
                Ok(image) => {
                    tracing::info!("Scene {} completed: {}", position, image.path.display());
                    report.record_success(image);
                }
                Err(e) => {
                    tracing::error!("Scene {} failed: {}", position, e);
                    report.record_failure(position, e);
                }
            }
        }
        Ok(report)
    }

    async fn paced_render(
        &self,
        collection: &SceneCollection,
        position: ScenePosition,
        output_dir: &Path,
    ) -> Result<GeneratedImage> {
        let mut last_request = self.last_request.lock().await;
        if let Some(finished) = *last_request {
            let resume_at = finished + self.pacing;
            if resume_at > Instant::now() {
                tracing::info!(
                    "Waiting {}s to respect the rate limit ..",
                    self.pacing.as_secs()
                );
                tokio::time::sleep_until(resume_at).await;
            }
        }
        let result = self.render(collection, position, output_dir).await;
        *last_request = Some(Instant::now());
        result
    }

    async fn render(
        &self,
        collection: &SceneCollection,
        position: ScenePosition,
        output_dir: &Path,
    ) -> Result<GeneratedImage> {
        let request = ImageRequest {
            position,
            prompt: illustration_prompt(collection, position),
            settings: self.settings.clone(),
        };
        let bytes = self.backend.render(&request).await?;
        let format = image::guess_format(&bytes)
            .map_err(|e| ToonError::ImageRequest(format!("Response is not an image: {e}")))?;
        tracing::debug!("Scene {}: {} bytes of {:?}", position, bytes.len(), format);

        let path = output_dir.join(image_file_name(position, chrono::Local::now()));
        persist_image(&path, &bytes).await?;
        Ok(GeneratedImage { position, path })
    }
}

/// The prompt for one scene: the whole story for context, then the scene itself.
pub fn illustration_prompt(collection: &SceneCollection, position: ScenePosition) -> String {
    let scene = collection.get(position);
    let prompt_template = include_str!("../prompts/illustrate-scene.md");
    fill_template(
        prompt_template,
        &[
            ("context", collection.story_context().as_str()),
            ("script", scene.script.as_str()),
            ("keyword", scene.main_keyword.as_str()),
            ("position", position.to_string().as_str()),
            ("count", SCENE_COUNT.to_string().as_str()),
        ],
    )
}

/// Replace each `{name}` in `template` with its value in one pass.
///
/// Substituted text is never scanned again, so braces in a script stay as written.
/// Braces that don't name a value are kept.
fn fill_template(template: &str, values: &[(&str, &str)]) -> String {
    let mut filled = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find('{') {
        filled.push_str(&rest[..start]);
        let tail = &rest[start + 1..];
        let found = values
            .iter()
            .find(|(name, _)| tail.starts_with(name) && tail[name.len()..].starts_with('}'));
        match found {
            Some((name, value)) => {
                filled.push_str(value);
                rest = &tail[name.len() + 1..];
            }
            None => {
                filled.push('{');
                rest = tail;
            }
        }
    }
    filled.push_str(rest);
    filled
}

/// `scene_<n>_<YYYYmmdd_HHMMSS>.png`
pub fn image_file_name<Tz: chrono::TimeZone>(
    position: ScenePosition,
    at: chrono::DateTime<Tz>,
) -> String
where
    Tz::Offset: std::fmt::Display,
{
    format!("scene_{}_{}.png", position, at.format("%Y%m%d_%H%M%S"))
}

/// Write the image next to its destination, then move it into place,
/// so a failed write never leaves a half-written image behind.
pub async fn persist_image(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut partial = path.as_os_str().to_owned();
    partial.push(".part");
    let partial = PathBuf::from(partial);

    let written = async {
        tokio::fs::write(&partial, bytes).await?;
        tokio::fs::rename(&partial, path).await
    }
    .await;
    if let Err(e) = written {
        if let Err(cleanup) = tokio::fs::remove_file(&partial).await {
            tracing::debug!("Nothing to clean up at {}: {}", partial.display(), cleanup);
        }
        return Err(e.into());
    }
    Ok(())
}
