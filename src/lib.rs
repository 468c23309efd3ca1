//! # chat-tts
//!
//! Text-to-speech for incoming chat messages. Every chatter gets a stable
//! pseudo-identity voice picked at random from the installed voice packages,
//! and every message is synthesized into a normalized mono buffer that the
//! host plays back.
//!
//! ## Features
//!
//! - **Voice catalog**: discovers Piper single-file voices (`name.onnx` +
//!   `name.onnx.json`) and VITS directory voices (`model.onnx`, `tokens.txt`,
//!   `espeak-ng-data/`, `config.json`)
//! - **Lazy loading**: voice models are loaded on first use and cached
//! - **Stable voices**: each user keeps the same voice and speaker index for
//!   the lifetime of the process
//! - **Two engine shapes**: streaming 16-bit PCM engines and batch float
//!   engines behind one [`SynthesisEngine`] trait
//!
//! ## Quick Start
//!
//! ```toml
//! [dependencies]
//! chat-tts = { version = "0.1", features = ["onnx"] }
//! ```
//!
//! ```ignore
//! use std::sync::Arc;
//! use chat_tts::{engines::OnnxEngineLoader, ChatMessage, ChatTts, PluginConfig};
//!
//! let plugin = ChatTts::new(host, Arc::new(OnnxEngineLoader::default()), PluginConfig::default());
//! plugin.on_load()?;
//! plugin.on_message(ChatMessage::new("some_user", "Hello, world!"));
//! plugin.shutdown();
//! # Ok::<(), chat_tts::TtsError>(())
//! ```

pub mod assignment;
pub mod audio;
pub mod cache;
pub mod catalog;
pub mod config;
pub mod engines;
pub mod error;
pub mod pipeline;
pub mod plugin;

pub use assignment::{SpeakerAssignment, UserVoiceAssignment};
pub use cache::{EngineLoader, LoadedVoice, VoiceCache};
pub use catalog::{PackageShape, VoiceCatalog, VoiceDescriptor};
pub use config::{PluginConfig, SynthesisOptions, SynthesisOptionsBuilder};
pub use error::TtsError;
pub use pipeline::SynthesisPipeline;
pub use plugin::{ChatMessage, ChatTts, Host, PlaybackHandoff};

use std::path::Path;

/// A synthesized block of audio.
///
/// Samples are normalized floats, nominally in `[-1.0, 1.0)`.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    /// Raw audio samples as f32 values
    pub samples: Vec<f32>,
    /// Sample rate of the audio in Hz
    pub sample_rate: u32,
    /// Interleaved channel count (always 1 for synthesized speech)
    pub channel_count: u16,
}

impl AudioBuffer {
    /// Wrap mono samples.
    pub fn mono(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
            channel_count: 1,
        }
    }

    /// Write the audio to a 32-bit float WAV file.
    pub fn write_wav(&self, path: &Path) -> Result<(), TtsError> {
        let spec = hound::WavSpec {
            channels: self.channel_count,
            sample_rate: self.sample_rate,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        };
        let mut writer = hound::WavWriter::create(path, spec)?;
        for &sample in &self.samples {
            writer.write_sample(sample)?;
        }
        writer.finalize()?;
        Ok(())
    }

    /// Duration of the audio in seconds.
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 || self.channel_count == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / (self.sample_rate as f64 * self.channel_count as f64)
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Common interface for text-to-speech synthesis engines.
///
/// Every loaded voice is driven through this trait, whichever shape the
/// underlying engine has. See [`engines::Streaming`] and [`engines::Batch`]
/// for the two adapters that implement it.
pub trait SynthesisEngine: Send {
    /// Output sample rate in Hz.
    fn sample_rate(&self) -> u32;

    /// Number of speakers the model was trained with (at least 1).
    fn speaker_count(&self) -> u32;

    /// Synthesize speech from the given text with the given speaker.
    fn synthesize(
        &mut self,
        text: &str,
        speaker: u32,
        options: &SynthesisOptions,
    ) -> Result<AudioBuffer, TtsError>;

    /// Synthesize speech from the given text and write to a WAV file.
    ///
    /// Default implementation calls `synthesize()` then `AudioBuffer::write_wav()`.
    fn synthesize_to_file(
        &mut self,
        text: &str,
        speaker: u32,
        options: &SynthesisOptions,
        wav_path: &Path,
    ) -> Result<(), TtsError> {
        self.synthesize(text, speaker, options)?.write_wav(wav_path)
    }
}
