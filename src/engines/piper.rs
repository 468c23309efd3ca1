//! Piper voices: one `.onnx` model with a `.onnx.json` sidecar.
//!
//! Piper is driven as a streaming engine. Each sentence is a separate
//! inference, run only when the caller pulls the next chunk, and comes out
//! as peak-normalized 16-bit PCM.

use ndarray::Array2;
use ort::inputs;
use ort::session::Session;
use ort::value::TensorRef;

use super::config::PiperVoiceConfig;
use super::loader::OnnxLoaderParams;
use super::phonemizer::{phonemize_sentences, EspeakConfig};
use super::session::{has_input, init_session};
use super::tokens::PhonemeTable;
use super::{PcmChunks, StreamingSynthesis};
use crate::audio::f32_to_pcm16;
use crate::catalog::VoiceDescriptor;
use crate::{SynthesisOptions, TtsError};

pub struct PiperEngine {
    session: Session,
    phonemes: PhonemeTable,
    espeak_voice: String,
    espeak: EspeakConfig,
    sample_rate: u32,
    speaker_count: u32,
    /// Multi-speaker models take a `sid` input.
    has_sid: bool,
}

impl PiperEngine {
    pub fn load(voice: &VoiceDescriptor, params: &OnnxLoaderParams) -> Result<Self, TtsError> {
        let config = PiperVoiceConfig::load(&voice.config_path)?;
        log::info!("Loading Piper model from {}", voice.model_path.display());

        let session = init_session(&voice.model_path, params.num_threads)?;
        let has_sid = has_input(&session, "sid");
        if config.num_speakers > 1 && !has_sid {
            log::warn!(
                "Piper voice '{}' declares {} speakers but the model has no 'sid' input",
                voice.name,
                config.num_speakers
            );
        }

        Ok(Self {
            session,
            phonemes: PhonemeTable::from_id_map(&config.phoneme_id_map),
            espeak_voice: config.espeak.voice,
            espeak: EspeakConfig {
                bin_path: params.espeak_bin.clone(),
                data_path: None,
            },
            sample_rate: config.audio.sample_rate,
            speaker_count: if has_sid { config.num_speakers } else { 1 },
            has_sid,
        })
    }

    /// Run ONNX inference on one sentence of phoneme ids.
    fn infer(
        &mut self,
        ids: &[i64],
        speaker: u32,
        options: &SynthesisOptions,
    ) -> Result<Vec<f32>, TtsError> {
        let input = Array2::from_shape_vec((1, ids.len()), ids.to_vec())?;
        let lengths = ndarray::arr1(&[ids.len() as i64]);
        let scales = ndarray::arr1(&[options.noise_scale, options.length_scale, options.noise_w]);

        let output = if self.has_sid {
            let sid = ndarray::arr1(&[speaker as i64]);
            let inputs = inputs![
                "input" => TensorRef::from_array_view(input.view())?,
                "input_lengths" => TensorRef::from_array_view(lengths.view())?,
                "scales" => TensorRef::from_array_view(scales.view())?,
                "sid" => TensorRef::from_array_view(sid.view())?,
            ];
            self.session.run(inputs)?
        } else {
            let inputs = inputs![
                "input" => TensorRef::from_array_view(input.view())?,
                "input_lengths" => TensorRef::from_array_view(lengths.view())?,
                "scales" => TensorRef::from_array_view(scales.view())?,
            ];
            self.session.run(inputs)?
        };

        let first_output = output
            .iter()
            .next()
            .ok_or_else(|| TtsError::Synthesis("No output from Piper model".to_string()))?;
        let audio = first_output.1.try_extract_array::<f32>()?;
        Ok(audio.iter().copied().collect())
    }
}

impl StreamingSynthesis for PiperEngine {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn speaker_count(&self) -> u32 {
        self.speaker_count
    }

    fn synthesize_stream_raw(
        &mut self,
        text: &str,
        speaker: u32,
        options: &SynthesisOptions,
    ) -> Result<PcmChunks<'_>, TtsError> {
        let sentences: Vec<Vec<i64>> =
            phonemize_sentences(text, &self.espeak_voice, &self.espeak)?
                .iter()
                .map(|ipa| self.phonemes.encode(ipa))
                .filter(|ids| self.phonemes.has_phonemes(ids))
                .collect();
        if sentences.is_empty() {
            log::warn!("No phoneme tokens produced for text: {text:?}");
        }

        let options = options.clone();
        Ok(Box::new(sentences.into_iter().map(move |ids| {
            let audio = self.infer(&ids, speaker, &options)?;
            Ok(f32_to_pcm16(&audio))
        })))
    }
}
