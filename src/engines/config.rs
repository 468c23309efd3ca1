//! Voice package configuration files.
//!
//! Parsing these is the engine-specific half of package validation: the
//! catalog only admits a package whose config parses and passes `validate()`.

use std::collections::HashMap;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::TtsError;

fn one() -> u32 {
    1
}

fn default_espeak_voice() -> String {
    "en-us".to_string()
}

fn default_true() -> bool {
    true
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, TtsError> {
    let content = std::fs::read_to_string(path)?;
    serde_json::from_str(&content)
        .map_err(|e| TtsError::Config(format!("Failed to parse JSON: {e}")))
}

/// Sidecar config of a Piper single-file voice (`name.onnx.json`).
#[derive(Debug, Clone, Deserialize)]
pub struct PiperVoiceConfig {
    pub audio: PiperAudioConfig,
    #[serde(default = "one")]
    pub num_speakers: u32,
    pub espeak: PiperEspeakConfig,
    pub phoneme_id_map: HashMap<String, Vec<i64>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PiperAudioConfig {
    pub sample_rate: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PiperEspeakConfig {
    pub voice: String,
}

impl PiperVoiceConfig {
    pub fn load(path: &Path) -> Result<Self, TtsError> {
        let config: Self = read_json(path)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), TtsError> {
        if self.audio.sample_rate == 0 {
            return Err(TtsError::Config("'audio.sample_rate' must be positive".to_string()));
        }
        if self.num_speakers == 0 {
            return Err(TtsError::Config("'num_speakers' must be at least 1".to_string()));
        }
        if self.espeak.voice.trim().is_empty() {
            return Err(TtsError::Config("'espeak.voice' is empty".to_string()));
        }
        if self.phoneme_id_map.is_empty() {
            return Err(TtsError::Config("'phoneme_id_map' is empty".to_string()));
        }
        Ok(())
    }
}

/// `config.json` of a VITS directory voice.
#[derive(Debug, Clone, Deserialize)]
pub struct VitsVoiceConfig {
    pub sample_rate: u32,
    #[serde(default = "one")]
    pub num_speakers: u32,
    #[serde(default = "default_espeak_voice")]
    pub espeak_voice: String,
    /// Intersperse the pad token between phonemes.
    #[serde(default = "default_true")]
    pub add_blank: bool,
}

impl VitsVoiceConfig {
    pub fn load(path: &Path) -> Result<Self, TtsError> {
        let config: Self = read_json(path)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), TtsError> {
        if self.sample_rate == 0 {
            return Err(TtsError::Config("'sample_rate' must be positive".to_string()));
        }
        if self.num_speakers == 0 {
            return Err(TtsError::Config("'num_speakers' must be at least 1".to_string()));
        }
        if self.espeak_voice.trim().is_empty() {
            return Err(TtsError::Config("'espeak_voice' is empty".to_string()));
        }
        Ok(())
    }
}
