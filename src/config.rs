use std::collections::BTreeMap;
use std::path::Path;

use derive_builder::Builder;
use serde::Deserialize;

use crate::TtsError;

/// Inference knobs passed to every synthesis call.
///
/// ```rust
/// use chat_tts::SynthesisOptionsBuilder;
///
/// let options = SynthesisOptionsBuilder::default()
///     .length_scale(1.2)
///     .build()
///     .unwrap();
/// assert_eq!(options.noise_scale, 0.667);
/// ```
#[derive(Debug, Clone, PartialEq, Builder, Deserialize)]
#[builder(default)]
#[serde(default)]
pub struct SynthesisOptions {
    /// Phoneme duration multiplier. Larger is slower speech.
    pub length_scale: f32,
    /// Generator noise. Controls variation in timbre.
    pub noise_scale: f32,
    /// Duration predictor noise. Controls variation in rhythm.
    pub noise_w: f32,
}

impl Default for SynthesisOptions {
    fn default() -> Self {
        Self {
            length_scale: 1.0,
            noise_scale: 0.667,
            noise_w: 0.8,
        }
    }
}

/// Plugin behaviour, usually read from a JSON file next to the host's
/// plugin scripts. Every field is optional.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct PluginConfig {
    /// Synthesis worker threads. `0` synthesizes on the thread delivering
    /// the message, stalling delivery until playback is handed off.
    pub worker_threads: usize,
    /// Seed for voice assignment. `None` seeds from OS entropy.
    pub voice_seed: Option<u64>,
    /// Only these users are spoken. Empty allows everyone.
    pub approved_users: Vec<String>,
    /// Sound file (relative to the sound assets directory) played on every message.
    pub message_sound: Option<String>,
    /// Sound file (relative to the sound assets directory) played once on load.
    pub startup_sound: Option<String>,
    /// Lowercase word -> sound file played when a message contains the word.
    pub keyword_sounds: BTreeMap<String, String>,
    pub synthesis: SynthesisOptions,
}

impl Default for PluginConfig {
    fn default() -> Self {
        Self {
            worker_threads: 2,
            voice_seed: None,
            approved_users: Vec::new(),
            message_sound: None,
            startup_sound: None,
            keyword_sounds: BTreeMap::new(),
            synthesis: SynthesisOptions::default(),
        }
    }
}

impl PluginConfig {
    /// Load the config from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self, TtsError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self, TtsError> {
        serde_json::from_str(content)
            .map_err(|e| TtsError::Config(format!("Failed to parse plugin config: {e}")))
    }

    /// Whether `user` may be spoken.
    pub fn is_approved(&self, user: &str) -> bool {
        self.approved_users.is_empty()
            || self
                .approved_users
                .iter()
                .any(|approved| approved.eq_ignore_ascii_case(user))
    }

    /// Sound file of the first configured keyword found in `message`.
    ///
    /// Matching is case-insensitive on whole words. At most one sound plays
    /// per message, taking keywords in sorted order.
    pub fn keyword_sound_for<'a>(&'a self, message: &str) -> Option<&'a str> {
        if self.keyword_sounds.is_empty() {
            return None;
        }

        let words: Vec<String> = message
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .map(str::to_lowercase)
            .collect();

        self.keyword_sounds
            .iter()
            .find(|(keyword, _)| words.iter().any(|w| w == &keyword.to_lowercase()))
            .map(|(_, sound)| sound.as_str())
    }
}
