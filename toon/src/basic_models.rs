use std::collections::HashMap;
use std::path::PathBuf;

use serde::ser::{SerializeMap, SerializeStruct};
use serde::{Deserialize, Serialize, Serializer};

use crate::sentence_style::{SentenceForm, Strictness};
use crate::validation::ValidationError;

/// Every storyboard has exactly this many scenes.
pub const SCENE_COUNT: usize = 18;

/// A 1-based scene number, always within `1..=SCENE_COUNT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "usize", into = "usize")]
pub struct ScenePosition(usize);

impl ScenePosition {
    pub fn new(position: usize) -> Result<Self, ValidationError> {
        if (1..=SCENE_COUNT).contains(&position) {
            Ok(Self(position))
        } else {
            Err(ValidationError::PositionOutOfRange(position))
        }
    }

    /// All positions, in order.
    pub fn all() -> impl Iterator<Item = ScenePosition> {
        (1..=SCENE_COUNT).map(ScenePosition)
    }

    pub fn get(self) -> usize {
        self.0
    }

    pub fn is_odd(self) -> bool {
        self.0 % 2 == 1
    }

    /// Odd scenes trail off into the next one, even scenes finish the thought.
    pub fn expected_form(self) -> SentenceForm {
        if self.is_odd() {
            SentenceForm::Open
        } else {
            SentenceForm::Closed
        }
    }

    /// The JSON key for this scene, `scene_<n>`.
    pub fn key(self) -> String {
        format!("scene_{}", self.0)
    }

    /// Parse a JSON key. Only the canonical spelling is accepted, so `scene_07` is not `scene_7`.
    pub fn from_key(key: &str) -> Option<Self> {
        let position = Self::new(key.strip_prefix("scene_")?.parse().ok()?).ok()?;
        (position.key() == key).then_some(position)
    }
}

impl TryFrom<usize> for ScenePosition {
    type Error = ValidationError;

    fn try_from(value: usize) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ScenePosition> for usize {
    fn from(position: ScenePosition) -> Self {
        position.0
    }
}

impl std::str::FromStr for ScenePosition {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let position = s
            .trim()
            .parse::<usize>()
            .map_err(|_| ValidationError::Malformed(format!("not a scene number: {s:?}")))?;
        Self::new(position)
    }
}

impl std::fmt::Display for ScenePosition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(&self.0, f)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scene {
    /// The line spoken in this scene
    pub script: String,
    /// A compound keyword used as the hint for the image of this scene
    pub main_keyword: String,
}

/// Scenes as they come off the wire, before anything is checked.
///
/// Fields are optional here so a missing one can be reported by name.
#[derive(Debug, Deserialize)]
pub struct RawCollection {
    pub scenes: HashMap<String, RawScene>,
}

#[derive(Debug, Deserialize)]
pub struct RawScene {
    pub script: Option<String>,
    pub main_keyword: Option<String>,
}

/// The full storyboard: exactly 18 scenes, in order.
///
/// There is no way to build one except through validation, and no way to change it afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "RawCollection")]
pub struct SceneCollection {
    // scenes[i] is position i + 1
    scenes: Vec<Scene>,
}

impl SceneCollection {
    /// Parse and validate the `{"scenes": {"scene_1": ...}}` layout.
    pub fn from_json(json: &str) -> Result<Self, ValidationError> {
        let raw: RawCollection =
            serde_json::from_str(json).map_err(|e| ValidationError::Malformed(e.to_string()))?;
        Self::try_from(raw)
    }

    /// Pretty JSON in the same layout, keys in scene order.
    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn get(&self, position: ScenePosition) -> &Scene {
        &self.scenes[position.get() - 1]
    }

    pub fn len(&self) -> usize {
        self.scenes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scenes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ScenePosition, &Scene)> {
        ScenePosition::all().zip(self.scenes.iter())
    }

    /// The whole story as text, one line per scene, to give an image model the full arc.
    pub fn story_context(&self) -> String {
        let mut context = format!("COMPLETE STORY CONTEXT (All {} Scenes):\n", SCENE_COUNT);
        for (position, scene) in self.iter() {
            context.push_str(&format!(
                "Scene {}: {} (keyword: {})\n",
                position, scene.script, scene.main_keyword
            ));
        }
        context
    }

    /// Every scene whose script does not end the way its position calls for.
    pub fn sentence_style_violations(&self) -> Vec<ValidationError> {
        self.iter()
            .filter(|(position, scene)| SentenceForm::of(&scene.script) != position.expected_form())
            .map(|(position, scene)| ValidationError::SentenceStyle {
                position: position.get(),
                expected: position.expected_form(),
                script: scene.script.clone(),
            })
            .collect()
    }

    /// Apply the sentence convention: strict rejects on the first violation, lenient only warns.
    pub fn enforce_sentence_style(&self, strictness: Strictness) -> Result<(), ValidationError> {
        for violation in self.sentence_style_violations() {
            match strictness {
                Strictness::Strict => return Err(violation),
                Strictness::Lenient => tracing::warn!("{}", violation),
            }
        }
        Ok(())
    }
}

impl TryFrom<RawCollection> for SceneCollection {
    type Error = ValidationError;

    fn try_from(raw: RawCollection) -> Result<Self, Self::Error> {
        if raw.scenes.len() != SCENE_COUNT {
            return Err(ValidationError::WrongCount {
                actual: raw.scenes.len(),
            });
        }
        let mut slots: Vec<Option<RawScene>> = (0..SCENE_COUNT).map(|_| None).collect();
        for (key, scene) in raw.scenes {
            let position =
                ScenePosition::from_key(&key).ok_or(ValidationError::UnexpectedKey(key))?;
            slots[position.get() - 1] = Some(scene);
        }

        let mut scenes = Vec::with_capacity(SCENE_COUNT);
        for (position, slot) in ScenePosition::all().zip(slots) {
            let raw_scene = slot.ok_or_else(|| ValidationError::MissingScene(position.key()))?;
            scenes.push(Scene {
                script: required(position, "script", raw_scene.script)?,
                main_keyword: required(position, "main_keyword", raw_scene.main_keyword)?,
            });
        }
        Ok(Self { scenes })
    }
}

fn required(
    position: ScenePosition,
    field: &'static str,
    value: Option<String>,
) -> Result<String, ValidationError> {
    let value = value.ok_or(ValidationError::MissingField {
        position: position.get(),
        field,
    })?;
    if value.trim().is_empty() {
        return Err(ValidationError::BlankField {
            position: position.get(),
            field,
        });
    }
    Ok(value)
}

/// Serialized as a map so the file keeps the `scene_<n>` keys, but in scene order
/// rather than the lexical order a sorted map would give (`scene_1`, `scene_10`, ...).
impl Serialize for SceneCollection {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        struct Ordered<'a>(&'a SceneCollection);

        impl Serialize for Ordered<'_> {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                let mut map = serializer.serialize_map(Some(self.0.len()))?;
                for (position, scene) in self.0.iter() {
                    map.serialize_entry(&position.key(), scene)?;
                }
                map.end()
            }
        }

        let mut state = serializer.serialize_struct("SceneCollection", 1)?;
        state.serialize_field("scenes", &Ordered(self))?;
        state.end()
    }
}

/// An image the dispatcher managed to write for a scene.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedImage {
    pub position: ScenePosition,
    pub path: PathBuf,
}
