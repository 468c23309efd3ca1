use std::collections::HashMap;
use std::path::Path;

use crate::TtsError;

/// Padding symbol, interspersed between phonemes.
pub const PAD: char = '_';
/// Beginning-of-sentence symbol.
pub const BOS: char = '^';
/// End-of-sentence symbol.
pub const EOS: char = '$';

/// Phoneme character to model token id lookup.
#[derive(Debug, Clone, Default)]
pub struct PhonemeTable {
    ids: HashMap<char, Vec<i64>>,
    add_blank: bool,
}

impl PhonemeTable {
    /// Build from a Piper `phoneme_id_map`.
    ///
    /// Keys that are not exactly one character are ignored.
    pub fn from_id_map(map: &HashMap<String, Vec<i64>>) -> Self {
        let mut ids = HashMap::with_capacity(map.len());
        for (key, value) in map {
            let mut chars = key.chars();
            match (chars.next(), chars.next()) {
                (Some(ch), None) => {
                    ids.insert(ch, value.clone());
                }
                _ => log::debug!("Skipping multi-character phoneme key {key:?}"),
            }
        }
        Self {
            ids,
            add_blank: true,
        }
    }

    /// Load a `tokens.txt` file of `<symbol> <id>` lines.
    pub fn from_tokens_file(path: &Path, add_blank: bool) -> Result<Self, TtsError> {
        let content = std::fs::read_to_string(path)?;
        let mut table = Self::parse_tokens(&content)?;
        table.add_blank = add_blank;
        Ok(table)
    }

    fn parse_tokens(content: &str) -> Result<Self, TtsError> {
        let mut ids = HashMap::new();
        for (index, line) in content.lines().enumerate() {
            let line_no = index + 1;
            let line = line.trim_end_matches('\r');
            if line.is_empty() {
                continue;
            }
            // The symbol may itself be a space, so split on the last one.
            let (symbol, id) = line.rsplit_once(' ').ok_or_else(|| {
                TtsError::Config(format!("tokens.txt line {line_no}: expected '<symbol> <id>'"))
            })?;
            let id: i64 = id.trim().parse().map_err(|_| {
                TtsError::Config(format!("tokens.txt line {line_no}: invalid id {id:?}"))
            })?;
            let symbol = if symbol.is_empty() { " " } else { symbol };
            let mut chars = symbol.chars();
            if let (Some(ch), None) = (chars.next(), chars.next()) {
                ids.insert(ch, vec![id]);
            }
        }

        if ids.is_empty() {
            return Err(TtsError::Config("tokens.txt has no tokens".to_string()));
        }
        Ok(Self {
            ids,
            add_blank: true,
        })
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Encode one sentence of IPA into token ids.
    ///
    /// Produces `BOS (phoneme PAD)* EOS`, without the pads when blanks are
    /// disabled. Phonemes missing from the table are dropped.
    pub fn encode(&self, ipa: &str) -> Vec<i64> {
        let pad = if self.add_blank {
            self.ids.get(&PAD).map(Vec::as_slice).unwrap_or(&[])
        } else {
            &[]
        };

        let mut ids = Vec::with_capacity(ipa.len() * 2 + 2);
        if let Some(bos) = self.ids.get(&BOS) {
            ids.extend_from_slice(bos);
        }
        for ch in ipa.chars() {
            if let Some(phoneme) = self.ids.get(&ch) {
                ids.extend_from_slice(phoneme);
                ids.extend_from_slice(pad);
            }
        }
        if let Some(eos) = self.ids.get(&EOS) {
            ids.extend_from_slice(eos);
        }
        ids
    }

    /// Whether `ids` carries any phoneme beyond the sentence markers.
    pub fn has_phonemes(&self, ids: &[i64]) -> bool {
        let bos = self.ids.get(&BOS).map_or(0, Vec::len);
        let eos = self.ids.get(&EOS).map_or(0, Vec::len);
        ids.len() > bos + eos
    }
}
