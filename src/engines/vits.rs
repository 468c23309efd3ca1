//! VITS directory voices (`model.onnx`, `tokens.txt`, `espeak-ng-data/`,
//! `config.json`), as exported for multi-speaker models such as VCTK.
//!
//! Driven as a batch engine: all sentences are synthesized up front and
//! joined into one float buffer.

use std::path::Path;

use ndarray::Array2;
use ort::inputs;
use ort::session::Session;
use ort::value::TensorRef;

use super::config::VitsVoiceConfig;
use super::loader::OnnxLoaderParams;
use super::phonemizer::{phonemize_sentences, EspeakConfig};
use super::session::{has_input, init_session};
use super::tokens::PhonemeTable;
use super::{BatchOutput, BatchSynthesis};
use crate::audio::append_with_crossfade;
use crate::catalog::{VoiceDescriptor, DIR_ESPEAK_DATA, DIR_TOKENS_FILE};
use crate::{SynthesisOptions, TtsError};

/// Sentence joins are crossfaded over 1/100 s.
const CROSSFADE_DIVISOR: u32 = 100;

pub struct VitsEngine {
    session: Session,
    phonemes: PhonemeTable,
    espeak_voice: String,
    espeak: EspeakConfig,
    sample_rate: u32,
    speaker_count: u32,
    has_sid: bool,
}

impl VitsEngine {
    pub fn load(voice: &VoiceDescriptor, params: &OnnxLoaderParams) -> Result<Self, TtsError> {
        let config = VitsVoiceConfig::load(&voice.config_path)?;
        let tokens_path = voice.auxiliary_path(DIR_TOKENS_FILE).ok_or_else(|| {
            TtsError::Config(format!("voice '{}' has no {DIR_TOKENS_FILE}", voice.name))
        })?;
        let phonemes = PhonemeTable::from_tokens_file(tokens_path, config.add_blank)?;

        log::info!("Loading VITS model from {}", voice.model_path.display());
        let session = init_session(&voice.model_path, params.num_threads)?;
        let has_sid = has_input(&session, "sid");

        Ok(Self {
            session,
            phonemes,
            espeak_voice: config.espeak_voice,
            espeak: EspeakConfig {
                bin_path: params.espeak_bin.clone(),
                data_path: voice.auxiliary_path(DIR_ESPEAK_DATA).map(Path::to_path_buf),
            },
            sample_rate: config.sample_rate,
            speaker_count: if has_sid { config.num_speakers } else { 1 },
            has_sid,
        })
    }

    fn infer(
        &mut self,
        ids: &[i64],
        speaker: u32,
        options: &SynthesisOptions,
    ) -> Result<Vec<f32>, TtsError> {
        let x = Array2::from_shape_vec((1, ids.len()), ids.to_vec())?;
        let x_length = ndarray::arr1(&[ids.len() as i64]);
        let noise_scale = ndarray::arr1(&[options.noise_scale]);
        let length_scale = ndarray::arr1(&[options.length_scale]);
        let noise_scale_w = ndarray::arr1(&[options.noise_w]);

        let output = if self.has_sid {
            let sid = ndarray::arr1(&[speaker as i64]);
            let inputs = inputs![
                "x" => TensorRef::from_array_view(x.view())?,
                "x_length" => TensorRef::from_array_view(x_length.view())?,
                "noise_scale" => TensorRef::from_array_view(noise_scale.view())?,
                "length_scale" => TensorRef::from_array_view(length_scale.view())?,
                "noise_scale_w" => TensorRef::from_array_view(noise_scale_w.view())?,
                "sid" => TensorRef::from_array_view(sid.view())?,
            ];
            self.session.run(inputs)?
        } else {
            let inputs = inputs![
                "x" => TensorRef::from_array_view(x.view())?,
                "x_length" => TensorRef::from_array_view(x_length.view())?,
                "noise_scale" => TensorRef::from_array_view(noise_scale.view())?,
                "length_scale" => TensorRef::from_array_view(length_scale.view())?,
                "noise_scale_w" => TensorRef::from_array_view(noise_scale_w.view())?,
            ];
            self.session.run(inputs)?
        };

        let first_output = output
            .iter()
            .next()
            .ok_or_else(|| TtsError::Synthesis("No output from VITS model".to_string()))?;
        let waveform = first_output.1.try_extract_array::<f32>()?;
        Ok(waveform.iter().copied().collect())
    }
}

impl BatchSynthesis for VitsEngine {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn speaker_count(&self) -> u32 {
        self.speaker_count
    }

    fn synthesize_batch(
        &mut self,
        text: &str,
        speaker: u32,
        options: &SynthesisOptions,
    ) -> Result<BatchOutput, TtsError> {
        let sentences = phonemize_sentences(text, &self.espeak_voice, &self.espeak)?;
        let crossfade = (self.sample_rate / CROSSFADE_DIVISOR) as usize;

        let mut combined = Vec::new();
        for ipa in &sentences {
            let ids = self.phonemes.encode(ipa);
            if !self.phonemes.has_phonemes(&ids) {
                continue;
            }
            let audio = self.infer(&ids, speaker, options)?;
            append_with_crossfade(&mut combined, &audio, crossfade);
        }

        if combined.is_empty() {
            log::warn!("No audio produced for text: {text:?}");
        }

        Ok(BatchOutput {
            samples: combined,
            sample_rate: self.sample_rate,
            speaker_count: self.speaker_count,
        })
    }
}
