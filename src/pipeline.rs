use std::sync::Arc;

use crate::assignment::{SpeakerAssignment, UserVoiceAssignment};
use crate::cache::{EngineLoader, VoiceCache};
use crate::catalog::VoiceCatalog;
use crate::{AudioBuffer, SynthesisOptions, TtsError};

/// Turns a user's chat text into audio in that user's voice.
///
/// Owns the voice cache and the assignment table; both are safe to use from
/// several worker threads at once. Different voices synthesize in parallel,
/// calls on the same voice queue behind each other.
pub struct SynthesisPipeline {
    cache: VoiceCache,
    assignments: UserVoiceAssignment,
    options: SynthesisOptions,
}

impl SynthesisPipeline {
    pub fn new(catalog: Arc<VoiceCatalog>, loader: Arc<dyn EngineLoader>) -> Self {
        Self::with_assignments(catalog, loader, UserVoiceAssignment::new())
    }

    pub fn with_assignments(
        catalog: Arc<VoiceCatalog>,
        loader: Arc<dyn EngineLoader>,
        assignments: UserVoiceAssignment,
    ) -> Self {
        Self {
            cache: VoiceCache::new(catalog, loader),
            assignments,
            options: SynthesisOptions::default(),
        }
    }

    pub fn with_options(mut self, options: SynthesisOptions) -> Self {
        self.options = options;
        self
    }

    /// Synthesize `text` in `user`'s voice.
    ///
    /// Fails with [`TtsError::NoVoicesAvailable`] on an empty catalog,
    /// [`TtsError::VoiceLoad`] when the voice cannot be loaded and
    /// [`TtsError::Synthesis`] when the engine fails. Nothing is retried.
    pub fn synthesize(&self, user: &str, text: &str) -> Result<AudioBuffer, TtsError> {
        let SpeakerAssignment {
            voice_name,
            speaker_index,
        } = self.assignments.resolve(user, &self.cache)?;
        let voice = self.cache.get(&voice_name)?;

        log::debug!(
            "Synthesizing {} chars for '{}' with voice '{}' speaker {}",
            text.chars().count(),
            user,
            voice_name,
            speaker_index
        );
        let audio = voice.synthesize(text, speaker_index, &self.options)?;
        log::debug!(
            "Synthesized {:.2}s of audio at {} Hz",
            audio.duration_secs(),
            audio.sample_rate
        );
        Ok(audio)
    }

    pub fn catalog(&self) -> &Arc<VoiceCatalog> {
        self.cache.catalog()
    }

    pub fn cache(&self) -> &VoiceCache {
        &self.cache
    }

    pub fn assignments(&self) -> &UserVoiceAssignment {
        &self.assignments
    }

    pub fn options(&self) -> &SynthesisOptions {
        &self.options
    }

    /// Drop loaded voices and forget all user assignments.
    pub fn clear(&self) {
        self.cache.clear();
        self.assignments.clear();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::*;
    use crate::cache::tests::CountingLoader;
    use crate::catalog::VoiceDescriptor;
    use crate::engines::testing::ChunkedStub;
    use crate::engines::Streaming;
    use crate::SynthesisEngine;

    fn le_bytes(samples: &[i16]) -> Vec<u8> {
        samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }

    fn pipeline(voices: Vec<VoiceDescriptor>) -> (SynthesisPipeline, Arc<CountingLoader>) {
        let loader = Arc::new(CountingLoader::default());
        let pipeline = SynthesisPipeline::with_assignments(
            Arc::new(VoiceCatalog::from_descriptors(voices)),
            loader.clone(),
            UserVoiceAssignment::with_seed(3),
        );
        (pipeline, loader)
    }

    #[test]
    fn batch_voice_produces_mono_buffer() {
        let (pipeline, loader) = pipeline(vec![VoiceDescriptor::stub("alice", 3)]);

        let audio = pipeline.synthesize("u1", "hello").unwrap();
        let assigned = pipeline.assignments().get("u1").unwrap();

        assert_eq!(assigned.voice_name, "alice");
        assert_eq!(audio.samples.len(), 5);
        assert_eq!(audio.samples[0], assigned.speaker_index as f32 / 10.0);
        assert_eq!(audio.sample_rate, 22050);
        assert_eq!(audio.channel_count, 1);
        assert_eq!(loader.loads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn same_user_keeps_voice_across_messages() {
        let (pipeline, loader) = pipeline(vec![
            VoiceDescriptor::stub("alice", 3),
            VoiceDescriptor::stub("bob", 1),
        ]);

        let first = pipeline.synthesize("u1", "one").unwrap();
        let assigned = pipeline.assignments().get("u1").unwrap();
        let second = pipeline.synthesize("u1", "two").unwrap();

        assert_eq!(pipeline.assignments().get("u1").unwrap(), assigned);
        assert_eq!(first.samples[0], second.samples[0]);
        assert_eq!(loader.loads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn streaming_voice_is_converted_from_pcm() {
        let loader = |voice: &VoiceDescriptor| -> Result<Box<dyn SynthesisEngine>, TtsError> {
            Ok(Box::new(Streaming(ChunkedStub {
                sample_rate: voice.sample_rate,
                speakers: 1,
                chunks: vec![le_bytes(&[0, 16384]), le_bytes(&[-16384, 32767, -32768])],
                fail_at: None,
            })))
        };
        let pipeline = SynthesisPipeline::new(
            Arc::new(VoiceCatalog::from_descriptors([VoiceDescriptor::stub(
                "piper", 1,
            )])),
            Arc::new(loader),
        );

        let audio = pipeline.synthesize("u1", "hello").unwrap();
        assert_eq!(
            audio.samples,
            vec![0.0, 0.5, -0.5, 32767.0 / 32768.0, -1.0]
        );
    }

    #[test]
    fn empty_catalog_propagates_no_voices() {
        let (pipeline, loader) = pipeline(Vec::new());
        assert!(matches!(
            pipeline.synthesize("u1", "hello"),
            Err(TtsError::NoVoicesAvailable)
        ));
        assert_eq!(loader.loads.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn engine_failure_is_synthesis_error() {
        let (pipeline, _) = pipeline(vec![VoiceDescriptor::stub("bob", 1)]);
        assert!(matches!(
            pipeline.synthesize("u1", "fail"),
            Err(TtsError::Synthesis(_))
        ));
        // The voice stays loaded and usable.
        assert!(pipeline.synthesize("u1", "fine").is_ok());
    }

    #[test]
    fn load_failure_is_voice_load_error() {
        let loader = Arc::new(CountingLoader {
            fail: true,
            ..Default::default()
        });
        let pipeline = SynthesisPipeline::new(
            Arc::new(VoiceCatalog::from_descriptors([VoiceDescriptor::stub("bob", 1)])),
            loader,
        );
        assert!(matches!(
            pipeline.synthesize("u1", "hello"),
            Err(TtsError::VoiceLoad { .. })
        ));
        assert_eq!(pipeline.cache().loaded_count(), 0);
    }

    #[test]
    fn users_synthesize_concurrently() {
        let (pipeline, loader) = pipeline(vec![
            VoiceDescriptor::stub("alice", 3),
            VoiceDescriptor::stub("bob", 1),
        ]);
        let pipeline = Arc::new(pipeline);

        let handles: Vec<_> = (0..16)
            .map(|i| {
                let pipeline = Arc::clone(&pipeline);
                std::thread::spawn(move || pipeline.synthesize(&format!("user{}", i % 4), "hey"))
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap().unwrap().samples.len(), 3);
        }

        assert_eq!(pipeline.assignments().len(), 4);
        assert!(loader.loads.load(Ordering::SeqCst) <= 2);
    }

    #[test]
    fn clear_resets_tables() {
        let (pipeline, _) = pipeline(vec![VoiceDescriptor::stub("bob", 1)]);
        pipeline.synthesize("u1", "hello").unwrap();

        pipeline.clear();
        assert!(pipeline.assignments().is_empty());
        assert_eq!(pipeline.cache().loaded_count(), 0);
    }
}
