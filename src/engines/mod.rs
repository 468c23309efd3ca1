//! Speech synthesis engines.
//!
//! Engines come in two shapes. A [`StreamingSynthesis`] engine yields raw
//! 16-bit PCM chunks as it works through the text; a [`BatchSynthesis`]
//! engine returns one finished float buffer. The [`Streaming`] and [`Batch`]
//! adapters put either shape behind [`SynthesisEngine`], so nothing above
//! this module branches on which engine a voice uses.
//!
//! # Available Engines
//!
//! Enable engines via Cargo features:
//! - `onnx` - Piper single-file voices (streaming) and VITS directory voices
//!   (batch), both ONNX format, espeak-ng required

pub mod config;
pub mod phonemizer;
pub mod tokens;

#[cfg(feature = "onnx")]
mod loader;
#[cfg(feature = "onnx")]
pub mod piper;
#[cfg(feature = "onnx")]
mod session;
#[cfg(feature = "onnx")]
pub mod vits;

#[cfg(feature = "onnx")]
pub use loader::{OnnxEngineLoader, OnnxLoaderParams};

use crate::audio::pcm16_to_f32;
use crate::{AudioBuffer, SynthesisEngine, SynthesisOptions, TtsError};

/// Lazy, finite sequence of little-endian 16-bit PCM chunks.
pub type PcmChunks<'a> = Box<dyn Iterator<Item = Result<Vec<u8>, TtsError>> + 'a>;

/// An engine that produces audio incrementally as 16-bit PCM.
pub trait StreamingSynthesis: Send {
    fn sample_rate(&self) -> u32;

    fn speaker_count(&self) -> u32;

    /// Start synthesizing `text`. Chunks are produced as the iterator is pulled.
    fn synthesize_stream_raw(
        &mut self,
        text: &str,
        speaker: u32,
        options: &SynthesisOptions,
    ) -> Result<PcmChunks<'_>, TtsError>;
}

/// Complete output of a [`BatchSynthesis`] call.
#[derive(Debug, Clone)]
pub struct BatchOutput {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub speaker_count: u32,
}

/// An engine that returns the whole utterance at once as float samples.
pub trait BatchSynthesis: Send {
    fn sample_rate(&self) -> u32;

    fn speaker_count(&self) -> u32;

    fn synthesize_batch(
        &mut self,
        text: &str,
        speaker: u32,
        options: &SynthesisOptions,
    ) -> Result<BatchOutput, TtsError>;
}

/// Adapts a [`StreamingSynthesis`] engine to [`SynthesisEngine`].
///
/// The stream is drained completely before conversion; if any chunk fails
/// the whole call fails and nothing is returned.
pub struct Streaming<E>(pub E);

impl<E: StreamingSynthesis> SynthesisEngine for Streaming<E> {
    fn sample_rate(&self) -> u32 {
        self.0.sample_rate()
    }

    fn speaker_count(&self) -> u32 {
        self.0.speaker_count()
    }

    fn synthesize(
        &mut self,
        text: &str,
        speaker: u32,
        options: &SynthesisOptions,
    ) -> Result<AudioBuffer, TtsError> {
        let sample_rate = self.0.sample_rate();

        let mut pcm = Vec::new();
        for chunk in self.0.synthesize_stream_raw(text, speaker, options)? {
            pcm.extend_from_slice(&chunk?);
        }

        Ok(AudioBuffer::mono(pcm16_to_f32(&pcm)?, sample_rate))
    }
}

/// Adapts a [`BatchSynthesis`] engine to [`SynthesisEngine`].
pub struct Batch<E>(pub E);

impl<E: BatchSynthesis> SynthesisEngine for Batch<E> {
    fn sample_rate(&self) -> u32 {
        self.0.sample_rate()
    }

    fn speaker_count(&self) -> u32 {
        self.0.speaker_count()
    }

    fn synthesize(
        &mut self,
        text: &str,
        speaker: u32,
        options: &SynthesisOptions,
    ) -> Result<AudioBuffer, TtsError> {
        let output = self.0.synthesize_batch(text, speaker, options)?;
        Ok(AudioBuffer::mono(output.samples, output.sample_rate))
    }
}
