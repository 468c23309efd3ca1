use std::path::PathBuf;

#[derive(thiserror::Error, Debug)]
pub enum TtsError {
    #[error("Invalid voice package {}: {reason}", .path.display())]
    InvalidVoicePackage { path: PathBuf, reason: String },
    #[error("No voices available. Install voice packages into the TTS assets directory.")]
    NoVoicesAvailable,
    #[error("Failed to load voice '{name}': {reason}")]
    VoiceLoad { name: String, reason: String },
    #[error("Synthesis failed: {0}")]
    Synthesis(String),
    #[error("Invalid config: {0}")]
    Config(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),
    #[error(
        "espeak-ng not found. Install: Linux: `sudo apt-get install espeak-ng`, \
         macOS: `brew install espeak-ng`, Windows: https://espeak-ng.org/download"
    )]
    EspeakNotFound,
    #[error("Phonemization failed: {0}")]
    PhonemizerFailed(String),
    #[cfg(feature = "onnx")]
    #[error("ONNX runtime error: {0}")]
    Ort(#[from] ort::Error),
    #[cfg(feature = "onnx")]
    #[error("Array shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),
}

impl TtsError {
    /// Re-tag an engine failure raised while synthesizing.
    pub(crate) fn into_synthesis(self) -> Self {
        match self {
            TtsError::Synthesis(_) => self,
            other => TtsError::Synthesis(other.to_string()),
        }
    }

    /// Re-tag an engine failure raised while loading voice `name`.
    pub(crate) fn into_voice_load(self, name: &str) -> Self {
        match self {
            TtsError::VoiceLoad { .. } => self,
            other => TtsError::VoiceLoad {
                name: name.to_string(),
                reason: other.to_string(),
            },
        }
    }
}
