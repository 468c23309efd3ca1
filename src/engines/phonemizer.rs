use std::borrow::Cow;
use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Stdio};

use crate::TtsError;

/// Where to find espeak-ng.
///
/// Both fields fall back to the system installation when `None`.
#[derive(Debug, Clone, Default)]
pub struct EspeakConfig {
    /// espeak-ng executable. Defaults to `espeak-ng` from PATH.
    pub bin_path: Option<PathBuf>,
    /// An `espeak-ng-data` directory, e.g. the one bundled in a voice package.
    pub data_path: Option<PathBuf>,
}

impl EspeakConfig {
    fn command(&self) -> Command {
        let mut command = match &self.bin_path {
            Some(bin) => Command::new(bin),
            None => Command::new("espeak-ng"),
        };
        if let Some(data) = &self.data_path {
            // --path names the directory that contains espeak-ng-data.
            let root = data.parent().unwrap_or(data.as_path());
            command.arg("--path").arg(root);
        }
        command
    }
}

/// Convert text to one IPA string per sentence via espeak-ng.
pub fn phonemize_sentences(
    text: &str,
    voice: &str,
    espeak: &EspeakConfig,
) -> Result<Vec<String>, TtsError> {
    let sentences = split_sentences(text);
    if sentences.is_empty() {
        return Ok(Vec::new());
    }

    let batched_input = sentences.join("\n");
    let output = run_espeak(&batched_input, voice, espeak)?;
    let lines: Vec<&str> = output.lines().collect();

    // espeak-ng should emit one line per input line for stdin mode.
    // If this assumption breaks, fall back to per-sentence invocation.
    if lines.len() != sentences.len() {
        log::debug!(
            "espeak-ng returned {} lines for {} sentences, phonemizing one by one",
            lines.len(),
            sentences.len()
        );
        return sentences
            .iter()
            .map(|sentence| {
                let output = run_espeak(sentence, voice, espeak)?;
                Ok(clean_ipa(&output))
            })
            .collect();
    }

    Ok(lines.iter().map(|line| clean_ipa(line)).collect())
}

/// Split text into sentences at `.`, `!`, `?` and line breaks.
///
/// The terminal punctuation stays with its sentence. Decimal and thousands
/// separators between digits do not split.
pub fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();

    for (idx, ch) in text.char_indices() {
        match ch {
            '\n' | '\r' => flush_sentence(&mut sentences, &mut current),
            '.' | '!' | '?' => {
                current.push(ch);
                if !is_numeric_connector_between_digits(text, idx, ch.len_utf8(), ch) {
                    flush_sentence(&mut sentences, &mut current);
                }
            }
            ch if ch.is_whitespace() => {
                if !current.is_empty() && !current.ends_with(' ') {
                    current.push(' ');
                }
            }
            _ => current.push(ch),
        }
    }

    flush_sentence(&mut sentences, &mut current);
    sentences
}

fn flush_sentence(sentences: &mut Vec<String>, current: &mut String) {
    let trimmed = current.trim();
    // A lone run of punctuation carries nothing to speak.
    if !trimmed.is_empty() && trimmed.chars().any(char::is_alphanumeric) {
        sentences.push(trimmed.to_string());
    }
    current.clear();
}

fn is_numeric_connector_between_digits(text: &str, idx: usize, ch_len: usize, ch: char) -> bool {
    if !matches!(ch, '.' | ',') {
        return false;
    }

    let prev = text[..idx].chars().next_back();
    let next = text[idx + ch_len..].chars().next();

    matches!(
        (prev, next),
        (Some(left), Some(right)) if left.is_ascii_digit() && right.is_ascii_digit()
    )
}

fn run_espeak(input: &str, voice: &str, espeak: &EspeakConfig) -> Result<String, TtsError> {
    let mut child = espeak
        .command()
        .args(["--ipa", "--stdin", "-q", "-v", voice])
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                TtsError::EspeakNotFound
            } else {
                TtsError::Io(e)
            }
        })?;

    if let Some(mut stdin) = child.stdin.take() {
        // espeak-ng treats stdin as line-oriented input; an unterminated last
        // line can lose its final token.
        let stdin_payload = canonicalize_espeak_stdin_payload(input);
        stdin
            .write_all(stdin_payload.as_bytes())
            .map_err(TtsError::Io)?;
    }

    let output = child.wait_with_output().map_err(TtsError::Io)?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(TtsError::PhonemizerFailed(format!(
            "espeak-ng exited with code {:?}: {stderr}",
            output.status.code()
        )));
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

fn canonicalize_espeak_stdin_payload(input: &str) -> Cow<'_, str> {
    if input.ends_with('\n') {
        Cow::Borrowed(input)
    } else {
        Cow::Owned(format!("{input}\n"))
    }
}

/// Join espeak-ng output lines and drop its `_` tie markers.
fn clean_ipa(ipa: &str) -> String {
    ipa.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
        .replace('_', "")
}
