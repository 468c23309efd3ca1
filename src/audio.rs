//! Sample format conversion shared by the engines and the pipeline.

use crate::TtsError;

/// Scale factor mapping the full 16-bit range onto `[-1.0, 1.0)`.
pub const PCM16_SCALE: f32 = 32768.0;

/// Peak floor used when normalizing float audio to 16-bit PCM, so near-silent
/// output is not amplified into noise.
const NORMALIZE_PEAK_FLOOR: f32 = 0.01;

/// Convert little-endian signed 16-bit PCM bytes to floats via `s / 32768.0`.
///
/// Sample order is preserved. An odd byte count means the stream was cut in
/// the middle of a sample and is rejected.
pub fn pcm16_to_f32(bytes: &[u8]) -> Result<Vec<f32>, TtsError> {
    if bytes.len() % 2 != 0 {
        return Err(TtsError::Synthesis(format!(
            "PCM stream length {} is not a whole number of 16-bit samples",
            bytes.len()
        )));
    }

    Ok(bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32 / PCM16_SCALE)
        .collect())
}

/// Peak-normalize float audio and encode it as little-endian 16-bit PCM.
pub fn f32_to_pcm16(samples: &[f32]) -> Vec<u8> {
    let peak = samples
        .iter()
        .fold(0.0f32, |acc, s| acc.max(s.abs()))
        .max(NORMALIZE_PEAK_FLOOR);
    let gain = i16::MAX as f32 / peak;

    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        let scaled = (sample * gain).clamp(i16::MIN as f32, i16::MAX as f32) as i16;
        bytes.extend_from_slice(&scaled.to_le_bytes());
    }
    bytes
}

/// Append `src` to `dst`, blending the first `crossfade_samples` of `src`
/// into the tail of `dst`.
pub fn append_with_crossfade(dst: &mut Vec<f32>, src: &[f32], crossfade_samples: usize) {
    let overlap = crossfade_samples.min(dst.len()).min(src.len());
    if overlap == 0 {
        dst.extend_from_slice(src);
        return;
    }

    let dst_start = dst.len() - overlap;
    for i in 0..overlap {
        let t = (i + 1) as f32 / (overlap as f32 + 1.0);
        let left = dst[dst_start + i] * (1.0 - t);
        let right = src[i] * t;
        dst[dst_start + i] = left + right;
    }

    dst.extend_from_slice(&src[overlap..]);
}
