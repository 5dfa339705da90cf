use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use toon::{GeneratedImage, ScenePosition};

use crate::config::ImageSettings;
use crate::errors::Result;

pub const REPORT_FILE_NAME: &str = "generation_report.json";

/// What happened to each scene of one image batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchReport {
    pub timestamp: String,
    pub settings: ImageSettings,
    pub outcomes: BTreeMap<ScenePosition, SceneOutcome>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum SceneOutcome {
    Generated { path: PathBuf },
    Failed { error: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub success_rate: f64,
    pub generated_files: Vec<PathBuf>,
    pub failed_positions: Vec<ScenePosition>,
}

impl DispatchReport {
    pub fn new(settings: ImageSettings) -> Self {
        Self {
            timestamp: chrono::Local::now().to_rfc3339(),
            settings,
            outcomes: BTreeMap::new(),
        }
    }

    pub fn record_success(&mut self, image: GeneratedImage) {
        self.outcomes
            .insert(image.position, SceneOutcome::Generated { path: image.path });
    }

    pub fn record_failure(&mut self, position: ScenePosition, error: impl ToString) {
        self.outcomes.insert(
            position,
            SceneOutcome::Failed {
                error: error.to_string(),
            },
        );
    }

    /// Fold a later attempt into this report; its outcomes replace ours scene by scene.
    pub fn merge(&mut self, later: DispatchReport) {
        self.timestamp = later.timestamp;
        self.outcomes.extend(later.outcomes);
    }

    pub fn generated(&self) -> Vec<GeneratedImage> {
        self.outcomes
            .iter()
            .filter_map(|(position, outcome)| match outcome {
                SceneOutcome::Generated { path } => Some(GeneratedImage {
                    position: *position,
                    path: path.clone(),
                }),
                SceneOutcome::Failed { .. } => None,
            })
            .collect()
    }

    pub fn failed_positions(&self) -> Vec<ScenePosition> {
        self.outcomes
            .iter()
            .filter(|(_, outcome)| matches!(outcome, SceneOutcome::Failed { .. }))
            .map(|(position, _)| *position)
            .collect()
    }

    pub fn summary(&self) -> Summary {
        let generated_files: Vec<PathBuf> =
            self.generated().into_iter().map(|image| image.path).collect();
        let failed_positions = self.failed_positions();
        let total = self.outcomes.len();
        let succeeded = generated_files.len();
        Summary {
            total,
            succeeded,
            failed: failed_positions.len(),
            success_rate: if total > 0 {
                succeeded as f64 / total as f64 * 100.0
            } else {
                0.0
            },
            generated_files,
            failed_positions,
        }
    }

    /// Write the report, with its summary, as `generation_report.json` in `output_dir`.
    pub async fn save(&self, output_dir: &Path) -> Result<PathBuf> {
        #[derive(Serialize)]
        struct SavedReport<'a> {
            #[serde(flatten)]
            report: &'a DispatchReport,
            summary: Summary,
        }

        let path = output_dir.join(REPORT_FILE_NAME);
        let json = serde_json::to_string_pretty(&SavedReport {
            report: self,
            summary: self.summary(),
        })?;
        tokio::fs::write(&path, json).await?;
        tracing::info!("Saved generation report to {}", path.display());
        Ok(path)
    }

    /// Read back a report written by [`DispatchReport::save`].
    pub async fn load(output_dir: &Path) -> Result<Self> {
        let json = tokio::fs::read_to_string(output_dir.join(REPORT_FILE_NAME)).await?;
        Ok(serde_json::from_str(&json)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn position(n: usize) -> ScenePosition {
        ScenePosition::new(n).unwrap()
    }

    #[test]
    fn summary_counts_outcomes() {
        let mut report = DispatchReport::new(ImageSettings::default());
        report.record_success(GeneratedImage {
            position: position(1),
            path: "scene_1.png".into(),
        });
        report.record_failure(position(2), "rate limited");
        report.record_success(GeneratedImage {
            position: position(3),
            path: "scene_3.png".into(),
        });
        report.record_failure(position(4), "timeout");

        let summary = report.summary();
        assert_eq!(summary.total, 4);
        assert_eq!(summary.succeeded, 2);
        assert_eq!(summary.failed, 2);
        assert_eq!(summary.success_rate, 50.0);
        assert_eq!(summary.failed_positions, vec![position(2), position(4)]);
    }

    #[test]
    fn merge_replaces_failures() {
        let mut report = DispatchReport::new(ImageSettings::default());
        report.record_failure(position(5), "boom");
        report.record_success(GeneratedImage {
            position: position(6),
            path: "scene_6.png".into(),
        });

        let mut retry = DispatchReport::new(ImageSettings::default());
        retry.record_success(GeneratedImage {
            position: position(5),
            path: "scene_5.png".into(),
        });
        report.merge(retry);

        assert!(report.failed_positions().is_empty());
        assert_eq!(report.generated().len(), 2);
    }

    #[tokio::test]
    async fn save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let mut report = DispatchReport::new(ImageSettings::default());
        report.record_failure(position(7), "Image request failed: 500");
        report.record_success(GeneratedImage {
            position: position(8),
            path: dir.path().join("scene_8.png"),
        });

        let path = report.save(dir.path()).await.unwrap();
        let saved: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(saved["summary"]["failed"], 1);
        assert_eq!(saved["outcomes"]["7"]["status"], "failed");

        let loaded = DispatchReport::load(dir.path()).await.unwrap();
        assert_eq!(loaded, report);
    }
}
