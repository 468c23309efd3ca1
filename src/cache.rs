//! Lazily loaded voice models.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use crate::catalog::{VoiceCatalog, VoiceDescriptor};
use crate::{AudioBuffer, SynthesisEngine, SynthesisOptions, TtsError};

/// Constructs the engine for a voice package.
///
/// This is the seam where concrete engines plug in; tests supply stubs.
pub trait EngineLoader: Send + Sync {
    fn load(&self, voice: &VoiceDescriptor) -> Result<Box<dyn SynthesisEngine>, TtsError>;
}

impl<F> EngineLoader for F
where
    F: Fn(&VoiceDescriptor) -> Result<Box<dyn SynthesisEngine>, TtsError> + Send + Sync,
{
    fn load(&self, voice: &VoiceDescriptor) -> Result<Box<dyn SynthesisEngine>, TtsError> {
        self(voice)
    }
}

/// A voice whose model is in memory.
///
/// Calls into the engine are serialized, so one `LoadedVoice` can be shared
/// freely between synthesis workers.
pub struct LoadedVoice {
    name: String,
    sample_rate: u32,
    speaker_count: u32,
    engine: Mutex<Box<dyn SynthesisEngine>>,
}

impl LoadedVoice {
    pub fn new(name: impl Into<String>, engine: Box<dyn SynthesisEngine>) -> Self {
        Self {
            name: name.into(),
            sample_rate: engine.sample_rate(),
            speaker_count: engine.speaker_count().max(1),
            engine: Mutex::new(engine),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn speaker_count(&self) -> u32 {
        self.speaker_count
    }

    /// Run the engine. Blocks while another caller is using this voice.
    pub fn synthesize(
        &self,
        text: &str,
        speaker: u32,
        options: &SynthesisOptions,
    ) -> Result<AudioBuffer, TtsError> {
        if speaker >= self.speaker_count {
            return Err(TtsError::Synthesis(format!(
                "speaker {speaker} out of range for voice '{}' ({} speakers)",
                self.name, self.speaker_count
            )));
        }
        let mut engine = self.engine.lock().unwrap_or_else(PoisonError::into_inner);
        engine
            .synthesize(text, speaker, options)
            .map_err(TtsError::into_synthesis)
    }
}

impl std::fmt::Debug for LoadedVoice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedVoice")
            .field("name", &self.name)
            .field("sample_rate", &self.sample_rate)
            .field("speaker_count", &self.speaker_count)
            .finish_non_exhaustive()
    }
}

/// Memoizes loaded voices by name. Entries live until [`VoiceCache::clear`].
pub struct VoiceCache {
    catalog: Arc<VoiceCatalog>,
    loader: Arc<dyn EngineLoader>,
    loaded: RwLock<HashMap<String, Arc<LoadedVoice>>>,
    /// Per-name guards held only while a voice is being constructed.
    loading: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl VoiceCache {
    pub fn new(catalog: Arc<VoiceCatalog>, loader: Arc<dyn EngineLoader>) -> Self {
        Self {
            catalog,
            loader,
            loaded: RwLock::new(HashMap::new()),
            loading: Mutex::new(HashMap::new()),
        }
    }

    /// Get the loaded voice `name`, loading it on first use.
    ///
    /// Concurrent first requests for the same name construct one engine; the
    /// others wait for it. A failed load is not cached, so the next request
    /// tries again.
    pub fn get(&self, name: &str) -> Result<Arc<LoadedVoice>, TtsError> {
        if let Some(voice) = self.lookup(name) {
            return Ok(voice);
        }

        let descriptor = self.catalog.get(name).ok_or_else(|| TtsError::VoiceLoad {
            name: name.to_string(),
            reason: "not in the voice catalog".to_string(),
        })?;

        let guard = {
            let mut loading = self.loading.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(loading.entry(name.to_string()).or_default())
        };
        let _construction = guard.lock().unwrap_or_else(PoisonError::into_inner);

        // Someone else may have finished loading while we waited.
        if let Some(voice) = self.lookup(name) {
            return Ok(voice);
        }

        log::info!(
            "Loading voice '{}' from {}",
            name,
            descriptor.model_path.display()
        );
        let engine = self
            .loader
            .load(descriptor)
            .map_err(|e| e.into_voice_load(name))?;
        let voice = Arc::new(LoadedVoice::new(name, engine));
        if voice.speaker_count() != descriptor.speaker_count {
            log::warn!(
                "Voice '{}' reports {} speakers, its config says {}",
                name,
                voice.speaker_count(),
                descriptor.speaker_count
            );
        }

        self.loaded
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), Arc::clone(&voice));
        Ok(voice)
    }

    fn lookup(&self, name: &str) -> Option<Arc<LoadedVoice>> {
        self.loaded
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    pub fn is_loaded(&self, name: &str) -> bool {
        self.lookup(name).is_some()
    }

    pub fn loaded_count(&self) -> usize {
        self.loaded.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn catalog(&self) -> &Arc<VoiceCatalog> {
        &self.catalog
    }

    /// Drop every loaded voice. Handles still held elsewhere stay valid.
    pub fn clear(&self) {
        self.loaded
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.loading
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Barrier;
    use std::time::Duration;

    use super::*;
    use crate::engines::testing::{EchoStub, OverlapStub};
    use crate::engines::Batch;

    /// Loader building echo engines, counting constructions.
    #[derive(Default)]
    pub(crate) struct CountingLoader {
        pub loads: AtomicUsize,
        pub delay: Option<Duration>,
        pub fail: bool,
    }

    impl EngineLoader for CountingLoader {
        fn load(&self, voice: &VoiceDescriptor) -> Result<Box<dyn SynthesisEngine>, TtsError> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                std::thread::sleep(delay);
            }
            if self.fail {
                return Err(TtsError::Config("corrupt model".to_string()));
            }
            Ok(Box::new(Batch(EchoStub {
                sample_rate: voice.sample_rate,
                speakers: voice.speaker_count,
            })))
        }
    }

    fn catalog() -> Arc<VoiceCatalog> {
        Arc::new(VoiceCatalog::from_descriptors([
            VoiceDescriptor::stub("alice", 3),
            VoiceDescriptor::stub("bob", 1),
        ]))
    }

    #[test]
    fn second_get_returns_same_handle() {
        let loader = Arc::new(CountingLoader::default());
        let cache = VoiceCache::new(catalog(), loader.clone());

        let first = cache.get("alice").unwrap();
        let second = cache.get("alice").unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(loader.loads.load(Ordering::SeqCst), 1);
        assert_eq!(first.speaker_count(), 3);
        assert_eq!(first.sample_rate(), 22050);
    }

    #[test]
    fn concurrent_first_loads_construct_once() {
        let loader = Arc::new(CountingLoader {
            delay: Some(Duration::from_millis(50)),
            ..Default::default()
        });
        let cache = Arc::new(VoiceCache::new(catalog(), loader.clone()));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                std::thread::spawn(move || cache.get("alice").unwrap())
            })
            .collect();
        let voices: Vec<Arc<LoadedVoice>> =
            handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(loader.loads.load(Ordering::SeqCst), 1);
        assert!(voices.iter().all(|v| Arc::ptr_eq(v, &voices[0])));
    }

    #[test]
    fn different_voices_load_separately() {
        let loader = Arc::new(CountingLoader::default());
        let cache = VoiceCache::new(catalog(), loader.clone());

        cache.get("alice").unwrap();
        cache.get("bob").unwrap();
        assert_eq!(loader.loads.load(Ordering::SeqCst), 2);
        assert_eq!(cache.loaded_count(), 2);
    }

    #[test]
    fn unknown_voice_is_load_error() {
        let loader = Arc::new(CountingLoader::default());
        let cache = VoiceCache::new(catalog(), loader.clone());

        let err = cache.get("carol").unwrap_err();
        assert!(matches!(err, TtsError::VoiceLoad { ref name, .. } if name == "carol"));
        assert_eq!(loader.loads.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn failed_load_is_retried_next_time() {
        let loader = Arc::new(CountingLoader {
            fail: true,
            ..Default::default()
        });
        let cache = VoiceCache::new(catalog(), loader.clone());

        assert!(matches!(cache.get("bob"), Err(TtsError::VoiceLoad { .. })));
        assert!(!cache.is_loaded("bob"));
        assert!(cache.get("bob").is_err());
        assert_eq!(loader.loads.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn closures_are_loaders() {
        let loader = |voice: &VoiceDescriptor| -> Result<Box<dyn SynthesisEngine>, TtsError> {
            Ok(Box::new(Batch(EchoStub {
                sample_rate: 8000,
                speakers: voice.speaker_count,
            })))
        };
        let cache = VoiceCache::new(catalog(), Arc::new(loader));
        assert_eq!(cache.get("bob").unwrap().sample_rate(), 8000);
    }

    #[test]
    fn clear_forces_reload() {
        let loader = Arc::new(CountingLoader::default());
        let cache = VoiceCache::new(catalog(), loader.clone());

        let before = cache.get("alice").unwrap();
        cache.clear();
        let after = cache.get("alice").unwrap();

        assert!(!Arc::ptr_eq(&before, &after));
        assert_eq!(loader.loads.load(Ordering::SeqCst), 2);
    }

    /// A cache whose every voice reports into the same overlap counters.
    fn overlap_cache(peak: &Arc<AtomicUsize>) -> Arc<VoiceCache> {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::clone(peak);
        let loader = move |_: &VoiceDescriptor| -> Result<Box<dyn SynthesisEngine>, TtsError> {
            Ok(Box::new(Batch(OverlapStub {
                in_flight: Arc::clone(&in_flight),
                peak: Arc::clone(&peak),
                hold: Duration::from_millis(40),
            })))
        };
        Arc::new(VoiceCache::new(catalog(), Arc::new(loader)))
    }

    fn synthesize_together(cache: &Arc<VoiceCache>, voices: &[&'static str]) {
        let barrier = Arc::new(Barrier::new(voices.len()));
        let handles: Vec<_> = voices
            .iter()
            .map(|&name| {
                let cache = Arc::clone(cache);
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    let voice = cache.get(name).unwrap();
                    barrier.wait();
                    for _ in 0..2 {
                        voice
                            .synthesize("hi", 0, &SynthesisOptions::default())
                            .unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
    }

    #[test]
    fn one_voice_never_runs_two_calls_at_once() {
        let peak = Arc::new(AtomicUsize::new(0));
        let cache = overlap_cache(&peak);

        synthesize_together(&cache, &["bob", "bob", "bob", "bob"]);
        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn different_voices_synthesize_in_parallel() {
        let peak = Arc::new(AtomicUsize::new(0));
        let cache = overlap_cache(&peak);

        synthesize_together(&cache, &["alice", "bob"]);
        assert_eq!(peak.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn out_of_range_speaker_is_rejected() {
        let cache = VoiceCache::new(catalog(), Arc::new(CountingLoader::default()));
        let voice = cache.get("alice").unwrap();

        let err = voice
            .synthesize("hi", 3, &SynthesisOptions::default())
            .unwrap_err();
        assert!(matches!(err, TtsError::Synthesis(_)));
    }

    #[test]
    fn engine_errors_surface_as_synthesis_errors() {
        let cache = VoiceCache::new(catalog(), Arc::new(CountingLoader::default()));
        let voice = cache.get("bob").unwrap();

        let err = voice
            .synthesize("fail", 0, &SynthesisOptions::default())
            .unwrap_err();
        assert!(matches!(err, TtsError::Synthesis(_)));
    }
}
