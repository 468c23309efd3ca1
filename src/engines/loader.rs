use std::path::PathBuf;

use super::piper::PiperEngine;
use super::vits::VitsEngine;
use super::{Batch, Streaming};
use crate::cache::EngineLoader;
use crate::catalog::{PackageShape, VoiceDescriptor};
use crate::{SynthesisEngine, TtsError};

/// Parameters for constructing ONNX voice engines.
#[derive(Debug, Clone, Default)]
pub struct OnnxLoaderParams {
    /// Number of CPU threads per model.
    /// `None` uses the ORT default (typically all available cores).
    pub num_threads: Option<usize>,
    /// espeak-ng executable. `None` uses `espeak-ng` from PATH.
    pub espeak_bin: Option<PathBuf>,
}

/// Loads Piper single-file voices as streaming engines and VITS directory
/// voices as batch engines.
#[derive(Debug, Clone, Default)]
pub struct OnnxEngineLoader {
    params: OnnxLoaderParams,
}

impl OnnxEngineLoader {
    pub fn new(params: OnnxLoaderParams) -> Self {
        Self { params }
    }
}

impl EngineLoader for OnnxEngineLoader {
    fn load(&self, voice: &VoiceDescriptor) -> Result<Box<dyn SynthesisEngine>, TtsError> {
        match voice.shape {
            PackageShape::SingleFile => Ok(Box::new(Streaming(PiperEngine::load(
                voice,
                &self.params,
            )?))),
            PackageShape::Directory => {
                Ok(Box::new(Batch(VitsEngine::load(voice, &self.params)?)))
            }
        }
    }
}
