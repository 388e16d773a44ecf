//! Conversions for signed 16-bit little-endian interleaved PCM.
//!
//! Format conversion happens at I/O boundaries only; the pipeline treats
//! chunk payloads as opaque bytes and converts here when a stage needs
//! samples or durations.

use crate::shared::constants::SAMPLE_WIDTH_BYTES;

/// Bytes occupied by one second of audio.
pub fn bytes_per_second(sample_rate: u32, channels: u16) -> usize {
    sample_rate as usize * channels as usize * SAMPLE_WIDTH_BYTES
}

/// Bytes occupied by one interleaved sample frame (all channels).
pub fn frame_bytes(channels: u16) -> usize {
    channels as usize * SAMPLE_WIDTH_BYTES
}

pub fn bytes_to_secs(bytes: usize, sample_rate: u32, channels: u16) -> f64 {
    bytes as f64 / bytes_per_second(sample_rate, channels) as f64
}

pub fn ms_to_bytes(ms: u64, sample_rate: u32, channels: u16) -> usize {
    let bytes = bytes_per_second(sample_rate, channels) * ms as usize / 1000;
    align_to_frame(bytes, channels)
}

pub fn samples_to_ms(samples: usize, sample_rate: u32) -> u64 {
    (samples as u64 * 1000) / sample_rate as u64
}

/// Rounds a byte count down to a whole interleaved sample frame.
pub fn align_to_frame(bytes: usize, channels: u16) -> usize {
    bytes - bytes % frame_bytes(channels)
}

/// Decodes interleaved s16le bytes to mono f32 samples in [-1.0, 1.0],
/// averaging channels. A trailing partial frame is ignored.
pub fn to_mono_f32(pcm: &[u8], channels: u16) -> Vec<f32> {
    let frame = frame_bytes(channels);
    if frame == 0 {
        return Vec::new();
    }
    let frames = pcm.len() / frame;
    let mut out = Vec::with_capacity(frames);
    for i in 0..frames {
        let mut acc = 0.0f32;
        for ch in 0..channels as usize {
            let at = i * frame + ch * SAMPLE_WIDTH_BYTES;
            let sample = i16::from_le_bytes([pcm[at], pcm[at + 1]]);
            acc += sample as f32 / 32768.0;
        }
        out.push(acc / channels as f32);
    }
    out
}

/// Encodes mono f32 samples in [-1.0, 1.0] to s16le bytes.
pub fn from_mono_f32(samples: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * SAMPLE_WIDTH_BYTES);
    for s in samples {
        let clamped = (s.clamp(-1.0, 1.0) * 32767.0) as i16;
        out.extend_from_slice(&clamped.to_le_bytes());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_bytes_per_second_mono_16k() {
        assert_eq!(bytes_per_second(16000, 1), 32000);
    }

    #[test]
    fn test_bytes_per_second_stereo_48k() {
        assert_eq!(bytes_per_second(48000, 2), 192000);
    }

    #[test]
    fn test_bytes_to_secs() {
        assert_relative_eq!(bytes_to_secs(32000, 16000, 1), 1.0);
        assert_relative_eq!(bytes_to_secs(16000, 16000, 1), 0.5);
    }

    #[test]
    fn test_ms_to_bytes_is_frame_aligned() {
        let bytes = ms_to_bytes(33, 16000, 2);
        assert_eq!(bytes % frame_bytes(2), 0);
    }

    #[test]
    fn test_samples_to_ms() {
        assert_eq!(samples_to_ms(16000, 16000), 1000);
        assert_eq!(samples_to_ms(800, 16000), 50);
    }

    #[test]
    fn test_mono_roundtrip() {
        let samples = vec![0.0f32, 0.5, -0.5, 0.25];
        let bytes = from_mono_f32(&samples);
        let decoded = to_mono_f32(&bytes, 1);
        assert_eq!(decoded.len(), samples.len());
        for (a, b) in samples.iter().zip(&decoded) {
            assert_relative_eq!(a, b, epsilon = 1e-3);
        }
    }

    #[test]
    fn test_to_mono_averages_channels() {
        // One stereo frame: left = 0.5, right = -0.5 → mono 0.0
        let left = (0.5f32 * 32767.0) as i16;
        let right = (-0.5f32 * 32767.0) as i16;
        let mut pcm = Vec::new();
        pcm.extend_from_slice(&left.to_le_bytes());
        pcm.extend_from_slice(&right.to_le_bytes());
        let mono = to_mono_f32(&pcm, 2);
        assert_eq!(mono.len(), 1);
        assert_relative_eq!(mono[0], 0.0, epsilon = 1e-3);
    }

    #[test]
    fn test_to_mono_ignores_trailing_partial_frame() {
        let pcm = [0u8, 0, 0, 0, 7]; // two mono samples + one stray byte
        assert_eq!(to_mono_f32(&pcm, 1).len(), 2);
    }
}
