use thiserror::Error;

use crate::shared::pcm;

#[derive(Error, Debug)]
pub enum AudioChunkError {
    #[error("chunk end time {end}s must be after start time {start}s")]
    InvalidTimeRange { start: f64, end: f64 },
    #[error("payload of {actual} bytes does not match {expected} expected for {duration:.3}s")]
    PayloadMismatch {
        actual: usize,
        expected: usize,
        duration: f64,
    },
}

/// A timestamped slice of raw audio: interleaved s16le PCM bytes with
/// session-relative start/end times.
///
/// Immutable once constructed; chunks are passed by value from the capture
/// stage to the recognition stage and never mutated.
#[derive(Clone, Debug)]
pub struct AudioChunk {
    data: Vec<u8>,
    sample_rate: u32,
    channels: u16,
    start_time: f64,
    end_time: f64,
}

impl AudioChunk {
    /// Builds a chunk, validating that `end > start` and that the payload
    /// length is consistent with rate × channels × sample width × duration
    /// (± one interleaved frame of rounding slack).
    pub fn new(
        data: Vec<u8>,
        sample_rate: u32,
        channels: u16,
        start_time: f64,
        end_time: f64,
    ) -> Result<Self, AudioChunkError> {
        if end_time <= start_time {
            return Err(AudioChunkError::InvalidTimeRange {
                start: start_time,
                end: end_time,
            });
        }
        let duration = end_time - start_time;
        let expected = (duration * sample_rate as f64).round() as usize * pcm::frame_bytes(channels);
        if data.len().abs_diff(expected) > pcm::frame_bytes(channels) {
            return Err(AudioChunkError::PayloadMismatch {
                actual: data.len(),
                expected,
                duration,
            });
        }
        Ok(Self {
            data,
            sample_rate,
            channels,
            start_time,
            end_time,
        })
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn start_time(&self) -> f64 {
        self.start_time
    }

    pub fn end_time(&self) -> f64 {
        self.end_time
    }

    pub fn duration(&self) -> f64 {
        self.end_time - self.start_time
    }

    /// Start time in whole milliseconds, as handed to the engine.
    pub fn timestamp_ms(&self) -> u64 {
        (self.start_time * 1000.0) as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn silence_bytes(secs: f64, sample_rate: u32, channels: u16) -> Vec<u8> {
        vec![0u8; (secs * sample_rate as f64) as usize * pcm::frame_bytes(channels)]
    }

    #[test]
    fn test_new_valid_chunk() {
        let chunk = AudioChunk::new(silence_bytes(0.5, 16000, 1), 16000, 1, 1.0, 1.5).unwrap();
        assert_eq!(chunk.data().len(), 16000);
        assert_eq!(chunk.sample_rate(), 16000);
        assert_eq!(chunk.channels(), 1);
        assert_relative_eq!(chunk.duration(), 0.5);
        assert_eq!(chunk.timestamp_ms(), 1000);
    }

    #[test]
    fn test_end_not_after_start_rejected() {
        let err = AudioChunk::new(silence_bytes(0.5, 16000, 1), 16000, 1, 2.0, 2.0).unwrap_err();
        assert!(matches!(err, AudioChunkError::InvalidTimeRange { .. }));
    }

    #[test]
    fn test_payload_length_mismatch_rejected() {
        // Claims one second but carries half a second of bytes.
        let err = AudioChunk::new(silence_bytes(0.5, 16000, 1), 16000, 1, 0.0, 1.0).unwrap_err();
        assert!(matches!(err, AudioChunkError::PayloadMismatch { .. }));
    }

    #[test]
    fn test_one_frame_rounding_slack_accepted() {
        let mut data = silence_bytes(0.5, 16000, 1);
        data.extend_from_slice(&[0, 0]); // one extra mono frame
        assert!(AudioChunk::new(data, 16000, 1, 0.0, 0.5).is_ok());
    }

    #[test]
    fn test_stereo_payload_accounting() {
        let chunk = AudioChunk::new(silence_bytes(0.25, 48000, 2), 48000, 2, 0.0, 0.25).unwrap();
        assert_eq!(chunk.data().len(), 48000);
    }
}
