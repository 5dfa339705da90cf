//! Simulated language and image models.
#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::time::Instant;
use toon::{SceneCollection, ScenePosition, SCENE_COUNT};
use toon_client::config::ChatModel;
use toon_client::generation::{ChatBackend, ImageBackend, ImageRequest};
use toon_client::{Result, ToonError};

pub const PNG_BYTES: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR";

/// Scenes that follow the odd/even convention.
pub fn scenes_json() -> Value {
    let mut scenes = serde_json::Map::new();
    for n in 1..=SCENE_COUNT {
        let script = if n % 2 == 1 {
            format!("{n}번째로 친구가 이거 먹어보라 해서")
        } else {
            format!("{n}번째로 눈이 편해지더라고요")
        };
        scenes.insert(
            format!("scene_{n}"),
            json!({ "script": script, "main_keyword": format!("장면{n}") }),
        );
    }
    json!({ "scenes": scenes })
}

pub fn collection() -> SceneCollection {
    SceneCollection::from_json(&scenes_json().to_string()).unwrap()
}

/// A chat model that always gives the same reply and counts how often it was asked.
pub struct CannedChat {
    pub reply: std::result::Result<String, String>,
    pub calls: AtomicUsize,
    pub last_prompt: Mutex<Option<(ChatModel, String)>>,
}

impl CannedChat {
    pub fn replying(reply: impl Into<String>) -> Self {
        Self {
            reply: Ok(reply.into()),
            calls: AtomicUsize::new(0),
            last_prompt: Mutex::new(None),
        }
    }

    pub fn failing(error: impl Into<String>) -> Self {
        Self {
            reply: Err(error.into()),
            calls: AtomicUsize::new(0),
            last_prompt: Mutex::new(None),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChatBackend for CannedChat {
    async fn complete(&self, model: ChatModel, prompt: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_prompt.lock().unwrap() = Some((model, prompt.to_string()));
        self.reply.clone().map_err(ToonError::Generation)
    }
}

/// An image model that records when each request started and fails on chosen scenes.
#[derive(Default)]
pub struct RecordingImages {
    pub failing: Mutex<HashSet<usize>>,
    pub requests: Mutex<Vec<(ScenePosition, Instant)>>,
}

impl RecordingImages {
    pub fn failing_on(positions: &[usize]) -> Self {
        Self {
            failing: Mutex::new(positions.iter().copied().collect()),
            requests: Mutex::new(vec![]),
        }
    }

    /// Let every scene succeed from now on.
    pub fn heal(&self) {
        self.failing.lock().unwrap().clear();
    }

    pub fn requested_positions(&self) -> Vec<usize> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .map(|(position, _)| position.get())
            .collect()
    }

    pub fn start_times(&self) -> Vec<Instant> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .map(|(_, started)| *started)
            .collect()
    }
}

#[async_trait]
impl ImageBackend for RecordingImages {
    async fn render(&self, request: &ImageRequest) -> Result<Vec<u8>> {
        self.requests
            .lock()
            .unwrap()
            .push((request.position, Instant::now()));
        if self.failing.lock().unwrap().contains(&request.position.get()) {
            return Err(ToonError::ImageRequest(format!(
                "429 Too Many Requests for scene {}",
                request.position
            )));
        }
        Ok(PNG_BYTES.to_vec())
    }
}
