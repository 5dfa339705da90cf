use std::collections::BTreeMap;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tokio::io::AsyncWriteExt;
use toon::{SceneCollection, ScenePosition};
use toon_client::generation::DispatchReport;

/// Scene collections and their images on local disk.
///
/// ```text
/// <root>/scenes/scenes_<id>.json
/// <root>/images/<id>/scene_<n>_<timestamp>.png
/// <root>/images/<id>/generation_report.json
/// ```
///
/// Ids are timestamps (`YYYYmmdd_HHMMSS`, with a `_<k>` suffix on collision),
/// and anything else coming in from a URL is refused before it touches a path.
#[derive(Clone, Debug)]
pub struct SceneStore {
    root: PathBuf,
}

impl SceneStore {
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        for dir in ["scenes", "images"] {
            tokio::fs::create_dir_all(root.join(dir))
                .await
                .with_context(|| format!("Creating {}", root.join(dir).display()))?;
        }
        Ok(Self { root })
    }

    fn scenes_path(&self, id: &str) -> PathBuf {
        self.root.join("scenes").join(format!("scenes_{}.json", id))
    }

    /// Save a new collection and return its id.
    pub async fn save(&self, collection: &SceneCollection) -> Result<String> {
        let json = collection.to_json_pretty()?;
        let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S").to_string();
        let mut attempt = 0;
        loop {
            let id = match attempt {
                0 => stamp.clone(),
                n => format!("{}_{}", stamp, n),
            };
            attempt += 1;
            let path = self.scenes_path(&id);
            let file = match tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(file) => file,
                Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e).with_context(|| format!("Creating {}", path.display())),
            };
            fill_or_remove(file, &path, json.as_bytes())
                .await
                .with_context(|| format!("Writing {}", path.display()))?;
            tracing::info!("Saved scenes to {}", path.display());
            return Ok(id);
        }
    }

    /// The collection saved under `id`, if there is one.
    pub async fn load(&self, id: &str) -> Result<Option<SceneCollection>> {
        if !is_valid_id(id) {
            return Ok(None);
        }
        let path = self.scenes_path(id);
        let json = match tokio::fs::read_to_string(&path).await {
            Ok(json) => json,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e).with_context(|| format!("Reading {}", path.display())),
        };
        let collection = SceneCollection::from_json(&json)
            .with_context(|| format!("Loading scenes from {}", path.display()))?;
        Ok(Some(collection))
    }

    /// Every saved id, newest first.
    pub async fn list(&self) -> Result<Vec<String>> {
        let mut ids = vec![];
        let mut entries = tokio::fs::read_dir(self.root.join("scenes")).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let id = name
                .to_str()
                .and_then(|n| n.strip_prefix("scenes_"))
                .and_then(|n| n.strip_suffix(".json"));
            if let Some(id) = id.filter(|id| is_valid_id(id)) {
                ids.push(id.to_string());
            }
        }
        ids.sort_by(|a, b| b.cmp(a));
        Ok(ids)
    }

    /// Where images for `id` are written.
    pub fn images_dir(&self, id: &str) -> Option<PathBuf> {
        is_valid_id(id).then(|| self.root.join("images").join(id))
    }

    /// The newest image file name for each scene that has one.
    pub async fn latest_images(&self, id: &str) -> Result<BTreeMap<ScenePosition, String>> {
        let mut latest = BTreeMap::new();
        let Some(dir) = self.images_dir(id) else {
            return Ok(latest);
        };
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(latest),
            Err(e) => return Err(e).with_context(|| format!("Listing {}", dir.display())),
        };
        while let Some(entry) = entries.next_entry().await? {
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if let Some(position) = image_position(&name) {
                // Timestamps are fixed width, so the largest name is the newest
                let newest = latest.entry(position).or_insert_with(String::new);
                if name > *newest {
                    *newest = name;
                }
            }
        }
        Ok(latest)
    }

    /// The newest image of every scene, packed into one ZIP archive.
    ///
    /// `None` when nothing has been drawn for `id` yet.
    pub async fn images_zip(&self, id: &str) -> Result<Option<Vec<u8>>> {
        let latest = self.latest_images(id).await?;
        let Some(dir) = self.images_dir(id).filter(|_| !latest.is_empty()) else {
            return Ok(None);
        };
        let mut files = Vec::with_capacity(latest.len());
        for name in latest.into_values() {
            let bytes = tokio::fs::read(dir.join(&name))
                .await
                .with_context(|| format!("Reading {}", name))?;
            files.push((name, bytes));
        }
        let archive = tokio::task::spawn_blocking(move || zip_files(files)).await??;
        Ok(Some(archive))
    }

    /// The path of a generated image, or `None` if either part does not name one.
    pub fn image_path(&self, id: &str, file: &str) -> Option<PathBuf> {
        image_position(file)?;
        Some(self.images_dir(id)?.join(file))
    }

    /// The report of the last batch for `id`.
    pub async fn report(&self, id: &str) -> Option<DispatchReport> {
        let dir = self.images_dir(id)?;
        match DispatchReport::load(&dir).await {
            Ok(report) => Some(report),
            Err(e) => {
                tracing::debug!("No report for {}: {}", id, e);
                None
            }
        }
    }
}

/// Write a freshly created file, removing it again if the write fails
/// so a truncated collection never shows up in the list.
async fn fill_or_remove(
    mut file: tokio::fs::File,
    path: &Path,
    bytes: &[u8],
) -> std::io::Result<()> {
    let written = async {
        file.write_all(bytes).await?;
        file.flush().await
    }
    .await;
    if let Err(e) = written {
        drop(file);
        if let Err(cleanup) = tokio::fs::remove_file(path).await {
            tracing::warn!("Could not remove {}: {}", path.display(), cleanup);
        }
        return Err(e);
    }
    Ok(())
}

fn zip_files(files: Vec<(String, Vec<u8>)>) -> Result<Vec<u8>> {
    let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    // PNGs are already compressed
    let options =
        zip::write::SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);
    for (name, bytes) in files {
        writer.start_file(name, options)?;
        writer.write_all(&bytes)?;
    }
    Ok(writer.finish()?.into_inner())
}

/// Whether the image `name` was written after the batch behind `report` started.
///
/// Both stamps are local time, and image names only keep whole seconds.
pub fn drawn_since(name: &str, report: &DispatchReport) -> bool {
    let Some(stamp) = image_stamp(name) else {
        return false;
    };
    match chrono::DateTime::parse_from_rfc3339(&report.timestamp) {
        Ok(started) => {
            let started = started
                .with_timezone(&chrono::Local)
                .format("%Y%m%d_%H%M%S")
                .to_string();
            stamp >= started.as_str()
        }
        Err(e) => {
            tracing::debug!("Unreadable report timestamp {:?}: {}", report.timestamp, e);
            false
        }
    }
}

/// Ids are only ever digits and underscores.
pub fn is_valid_id(id: &str) -> bool {
    !id.is_empty() && id.len() <= 64 && id.bytes().all(|b| b.is_ascii_digit() || b == b'_')
}

fn split_image_name(name: &str) -> Option<(ScenePosition, &str)> {
    let (scene, stamp) = name
        .strip_suffix(".png")?
        .strip_prefix("scene_")?
        .split_once('_')?;
    if !is_valid_id(stamp) {
        return None;
    }
    Some((ScenePosition::from_key(&format!("scene_{}", scene))?, stamp))
}

/// The scene an image file belongs to, when `name` is `scene_<n>_<timestamp>.png`.
pub fn image_position(name: &str) -> Option<ScenePosition> {
    split_image_name(name).map(|(position, _)| position)
}

fn image_stamp(name: &str) -> Option<&str> {
    split_image_name(name).map(|(_, stamp)| stamp)
}
