//! Discovery of installed voice packages.
//!
//! A voice package is one of:
//!
//! ```text
//! assets/
//! ├── en_US-lessac-medium.onnx        # single-file shape (Piper)
//! ├── en_US-lessac-medium.onnx.json
//! └── vctk/                           # directory shape (VITS)
//!     ├── model.onnx
//!     ├── tokens.txt
//!     ├── espeak-ng-data/
//!     └── config.json
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use crate::engines::config::{PiperVoiceConfig, VitsVoiceConfig};
use crate::TtsError;

/// Extension of single-file voice models.
pub const MODEL_EXTENSION: &str = "onnx";
/// Appended to a single-file model's full file name to get its config.
pub const SIDECAR_SUFFIX: &str = ".json";

pub const DIR_MODEL_FILE: &str = "model.onnx";
pub const DIR_TOKENS_FILE: &str = "tokens.txt";
pub const DIR_ESPEAK_DATA: &str = "espeak-ng-data";
pub const DIR_CONFIG_FILE: &str = "config.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PackageShape {
    /// `name.onnx` with a `name.onnx.json` sidecar.
    SingleFile,
    /// `name/` holding model, tokens, espeak-ng data and config.
    Directory,
}

/// One validated voice package on disk.
#[derive(Debug, Clone, PartialEq)]
pub struct VoiceDescriptor {
    pub name: String,
    pub shape: PackageShape,
    pub model_path: PathBuf,
    pub config_path: PathBuf,
    /// Further members the engine needs (tokens, espeak-ng data).
    pub auxiliary_paths: BTreeSet<PathBuf>,
    pub speaker_count: u32,
    pub sample_rate: u32,
}

impl VoiceDescriptor {
    /// Look up an auxiliary member by file name.
    pub fn auxiliary_path(&self, file_name: &str) -> Option<&Path> {
        self.auxiliary_paths
            .iter()
            .find(|p| p.file_name() == Some(OsStr::new(file_name)))
            .map(PathBuf::as_path)
    }

    #[cfg(test)]
    pub(crate) fn stub(name: &str, speaker_count: u32) -> Self {
        Self {
            name: name.to_string(),
            shape: PackageShape::SingleFile,
            model_path: PathBuf::from(format!("{name}.onnx")),
            config_path: PathBuf::from(format!("{name}.onnx.json")),
            auxiliary_paths: BTreeSet::new(),
            speaker_count,
            sample_rate: 22050,
        }
    }
}

/// Read-only registry of the voices found at startup, keyed by name.
#[derive(Debug, Default)]
pub struct VoiceCatalog {
    voices: BTreeMap<String, VoiceDescriptor>,
    rejected: Vec<TtsError>,
}

impl VoiceCatalog {
    /// Scan the immediate entries of `assets_dir` for voice packages.
    ///
    /// Invalid or partial packages are logged and skipped. A missing assets
    /// directory gives an empty catalog. Only failing to list an existing
    /// directory is an error.
    pub fn build(assets_dir: &Path) -> Result<Self, TtsError> {
        let mut catalog = Self::default();
        if !assets_dir.is_dir() {
            log::warn!(
                "TTS assets directory {} does not exist, no voices available",
                assets_dir.display()
            );
            return Ok(catalog);
        }

        let mut entries = Vec::new();
        for entry in std::fs::read_dir(assets_dir)? {
            entries.push(entry?.path());
        }
        entries.sort();

        for path in entries {
            match inspect_candidate(&path) {
                None => {}
                Some(Ok(voice)) => catalog.admit(voice),
                Some(Err(err)) => {
                    log::warn!("Skipping voice package: {err}");
                    catalog.rejected.push(err);
                }
            }
        }

        log::info!(
            "Found {} voices in {}",
            catalog.voices.len(),
            assets_dir.display()
        );
        Ok(catalog)
    }

    /// Build a catalog from already validated descriptors.
    pub fn from_descriptors(voices: impl IntoIterator<Item = VoiceDescriptor>) -> Self {
        let mut catalog = Self::default();
        for voice in voices {
            catalog.admit(voice);
        }
        catalog
    }

    fn admit(&mut self, voice: VoiceDescriptor) {
        if self.voices.contains_key(&voice.name) {
            let err = invalid(&voice.model_path, format!("duplicate voice name '{}'", voice.name));
            log::warn!("Skipping voice package: {err}");
            self.rejected.push(err);
            return;
        }
        log::debug!(
            "Registered voice '{}' ({:?}, {} speakers)",
            voice.name,
            voice.shape,
            voice.speaker_count
        );
        self.voices.insert(voice.name.clone(), voice);
    }

    pub fn get(&self, name: &str) -> Option<&VoiceDescriptor> {
        self.voices.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.voices.contains_key(name)
    }

    /// Voice names in sorted order.
    pub fn names(&self) -> Vec<&str> {
        self.voices.keys().map(String::as_str).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &VoiceDescriptor> {
        self.voices.values()
    }

    pub fn len(&self) -> usize {
        self.voices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.voices.is_empty()
    }

    /// Diagnostics for the packages skipped by [`VoiceCatalog::build`].
    pub fn rejected(&self) -> &[TtsError] {
        &self.rejected
    }
}

fn invalid(path: &Path, reason: impl Into<String>) -> TtsError {
    TtsError::InvalidVoicePackage {
        path: path.to_path_buf(),
        reason: reason.into(),
    }
}

/// `None` when the entry is not a package candidate at all.
fn inspect_candidate(path: &Path) -> Option<Result<VoiceDescriptor, TtsError>> {
    let file_name = path.file_name()?.to_str()?;
    if file_name.starts_with('.') {
        return None;
    }

    if path.is_dir() {
        Some(inspect_directory(path, file_name))
    } else if path.extension().and_then(|e| e.to_str()) == Some(MODEL_EXTENSION) {
        let name = path.file_stem()?.to_str()?;
        Some(inspect_single_file(path, name))
    } else {
        None
    }
}

fn inspect_single_file(model_path: &Path, name: &str) -> Result<VoiceDescriptor, TtsError> {
    let mut config_path = model_path.as_os_str().to_owned();
    config_path.push(SIDECAR_SUFFIX);
    let config_path = PathBuf::from(config_path);

    if !config_path.is_file() {
        return Err(invalid(
            model_path,
            format!("missing config {}", config_path.display()),
        ));
    }

    let config = PiperVoiceConfig::load(&config_path)
        .map_err(|e| invalid(model_path, e.to_string()))?;

    Ok(VoiceDescriptor {
        name: name.to_string(),
        shape: PackageShape::SingleFile,
        model_path: model_path.to_path_buf(),
        config_path,
        auxiliary_paths: BTreeSet::new(),
        speaker_count: config.num_speakers,
        sample_rate: config.audio.sample_rate,
    })
}

fn inspect_directory(dir: &Path, name: &str) -> Result<VoiceDescriptor, TtsError> {
    let model_path = dir.join(DIR_MODEL_FILE);
    let tokens_path = dir.join(DIR_TOKENS_FILE);
    let espeak_path = dir.join(DIR_ESPEAK_DATA);
    let config_path = dir.join(DIR_CONFIG_FILE);

    let mut missing = Vec::new();
    if !model_path.is_file() {
        missing.push(DIR_MODEL_FILE.to_string());
    }
    if !tokens_path.is_file() {
        missing.push(DIR_TOKENS_FILE.to_string());
    }
    if !espeak_path.is_dir() {
        missing.push(format!("{DIR_ESPEAK_DATA}/"));
    }
    if !config_path.is_file() {
        missing.push(DIR_CONFIG_FILE.to_string());
    }
    if !missing.is_empty() {
        return Err(invalid(dir, format!("missing {}", missing.join(", "))));
    }

    let config =
        VitsVoiceConfig::load(&config_path).map_err(|e| invalid(dir, e.to_string()))?;

    Ok(VoiceDescriptor {
        name: name.to_string(),
        shape: PackageShape::Directory,
        model_path,
        config_path,
        auxiliary_paths: BTreeSet::from([tokens_path, espeak_path]),
        speaker_count: config.num_speakers,
        sample_rate: config.sample_rate,
    })
}
