//! Glue between the notification host and the synthesis pipeline.
//!
//! The host calls [`ChatTts::on_load`] once its plugins are loaded and
//! [`ChatTts::on_message`] for every chat message. Synthesis runs on a small
//! worker pool so message delivery never waits for a model.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;

use crossbeam::channel::{unbounded, Receiver, Sender};

use crate::assignment::UserVoiceAssignment;
use crate::cache::EngineLoader;
use crate::catalog::VoiceCatalog;
use crate::config::PluginConfig;
use crate::pipeline::SynthesisPipeline;
use crate::TtsError;

/// A chat message as delivered by the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub user: String,
    pub message: String,
}

impl ChatMessage {
    pub fn new(user: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            message: message.into(),
        }
    }
}

/// Fire-and-forget playback primitives provided by the host.
pub trait PlaybackHandoff: Send + Sync {
    /// Play a sound file once.
    fn play_oneshot_file(&self, path: &Path);

    /// Play interleaved float samples once.
    fn play_oneshot_memory(&self, samples: Vec<f32>, sample_rate: u32, channel_count: u16);
}

/// Everything the plugin needs from the host.
pub trait Host: PlaybackHandoff {
    /// Directory holding the installed voice packages.
    fn tts_assets_path(&self) -> PathBuf;

    /// Directory holding sound effects.
    fn sound_assets_path(&self) -> PathBuf;
}

/// The chat text-to-speech plugin.
pub struct ChatTts {
    host: Arc<dyn Host>,
    loader: Arc<dyn EngineLoader>,
    config: PluginConfig,
    runtime: Mutex<Option<Runtime>>,
}

struct Runtime {
    pipeline: Arc<SynthesisPipeline>,
    /// `None` when synthesizing inline on the delivering thread.
    jobs: Option<Sender<ChatMessage>>,
    workers: Vec<JoinHandle<()>>,
}

impl ChatTts {
    pub fn new(host: Arc<dyn Host>, loader: Arc<dyn EngineLoader>, config: PluginConfig) -> Self {
        Self {
            host,
            loader,
            config,
            runtime: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &PluginConfig {
        &self.config
    }

    /// Discover voices and start the workers. Returns the number of voices.
    ///
    /// Calling it again reloads: queued messages finish first, then the
    /// loaded voices and user assignments are dropped.
    pub fn on_load(&self) -> Result<usize, TtsError> {
        self.shutdown();

        let assets_dir = self.host.tts_assets_path();
        let catalog = Arc::new(VoiceCatalog::build(&assets_dir)?);
        let voices = catalog.len();
        if voices == 0 {
            log::warn!(
                "No voices found in {}, chat messages will not be spoken",
                assets_dir.display()
            );
        }

        let assignments = match self.config.voice_seed {
            Some(seed) => UserVoiceAssignment::with_seed(seed),
            None => UserVoiceAssignment::new(),
        };
        let pipeline = Arc::new(
            SynthesisPipeline::with_assignments(catalog, Arc::clone(&self.loader), assignments)
                .with_options(self.config.synthesis.clone()),
        );

        let runtime = Runtime::start(pipeline, &self.host, self.config.worker_threads)?;
        *self.lock_runtime() = Some(runtime);
        log::info!(
            "Chat TTS ready with {} voices and {} workers",
            voices,
            self.config.worker_threads
        );

        if let Some(sound) = &self.config.startup_sound {
            self.play_sound(sound);
        }
        Ok(voices)
    }

    /// Handle one chat message. Never fails; problems are logged and the
    /// message is dropped.
    pub fn on_message(&self, msg: ChatMessage) {
        if let Some(sound) = &self.config.message_sound {
            self.play_sound(sound);
        }
        if let Some(sound) = self.config.keyword_sound_for(&msg.message) {
            self.play_sound(sound);
        }

        if !self.config.is_approved(&msg.user) {
            log::debug!("Not speaking message from unapproved user '{}'", msg.user);
            return;
        }
        if msg.message.trim().is_empty() {
            return;
        }

        // Release the runtime lock before doing any work.
        let dispatch = self
            .lock_runtime()
            .as_ref()
            .map(|runtime| (Arc::clone(&runtime.pipeline), runtime.jobs.clone()));

        match dispatch {
            None => log::warn!(
                "Message from '{}' arrived before the plugin was loaded, dropping",
                msg.user
            ),
            Some((pipeline, None)) => speak(&pipeline, self.host.as_ref(), &msg),
            Some((_, Some(jobs))) => {
                if let Err(err) = jobs.send(msg) {
                    log::error!(
                        "Synthesis workers are gone, dropping message from '{}'",
                        err.0.user
                    );
                }
            }
        }
    }

    /// Stop the workers after the queued messages are spoken and clear all
    /// voice state. Does nothing if not loaded.
    pub fn shutdown(&self) {
        let runtime = self.lock_runtime().take();
        if let Some(runtime) = runtime {
            runtime.stop();
        }
    }

    /// The live pipeline, if loaded.
    pub fn pipeline(&self) -> Option<Arc<SynthesisPipeline>> {
        self.lock_runtime()
            .as_ref()
            .map(|runtime| Arc::clone(&runtime.pipeline))
    }

    fn play_sound(&self, file_name: &str) {
        let path = self.host.sound_assets_path().join(file_name);
        if path.is_file() {
            self.host.play_oneshot_file(&path);
        } else {
            log::debug!("Sound {} not found, skipping", path.display());
        }
    }

    fn lock_runtime(&self) -> MutexGuard<'_, Option<Runtime>> {
        self.runtime.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for ChatTts {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl Runtime {
    fn start(
        pipeline: Arc<SynthesisPipeline>,
        host: &Arc<dyn Host>,
        worker_threads: usize,
    ) -> Result<Self, TtsError> {
        if worker_threads == 0 {
            return Ok(Self {
                pipeline,
                jobs: None,
                workers: Vec::new(),
            });
        }

        let (jobs, queue) = unbounded();
        let mut workers = Vec::with_capacity(worker_threads);
        for i in 0..worker_threads {
            let queue: Receiver<ChatMessage> = queue.clone();
            let pipeline = Arc::clone(&pipeline);
            let host = Arc::clone(host);
            let worker = std::thread::Builder::new()
                .name(format!("chat-tts-worker-{i}"))
                .spawn(move || {
                    for msg in queue.iter() {
                        speak(&pipeline, host.as_ref(), &msg);
                    }
                })?;
            workers.push(worker);
        }

        Ok(Self {
            pipeline,
            jobs: Some(jobs),
            workers,
        })
    }

    fn stop(mut self) {
        // Closing the queue lets the workers drain it and exit.
        self.jobs = None;
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                log::error!("A synthesis worker panicked");
            }
        }
        self.pipeline.clear();
    }
}

/// Synthesize one message and hand the audio to the host.
///
/// A panicking engine drops the message instead of unwinding into the host
/// or killing the worker.
fn speak(pipeline: &SynthesisPipeline, host: &dyn Host, msg: &ChatMessage) {
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| deliver(pipeline, host, msg)));
    if let Err(payload) = outcome {
        log::error!(
            "Dropping message from '{}': synthesis panicked: {}",
            msg.user,
            panic_message(payload.as_ref())
        );
    }
}

fn deliver(pipeline: &SynthesisPipeline, host: &dyn Host, msg: &ChatMessage) {
    match pipeline.synthesize(&msg.user, &msg.message) {
        Ok(audio) if audio.is_empty() => {
            log::debug!("No audio produced for message from '{}'", msg.user);
        }
        Ok(audio) => {
            host.play_oneshot_memory(audio.samples, audio.sample_rate, audio.channel_count);
        }
        Err(TtsError::NoVoicesAvailable) => {
            log::debug!("No voices installed, dropping message from '{}'", msg.user);
        }
        Err(err) => log::error!("Dropping message from '{}': {err}", msg.user),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}
