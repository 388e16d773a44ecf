use crate::engine::domain::speech_detector::{SpeechDetector, SpeechSpan};

pub const DEFAULT_FRAME_MS: u64 = 20;
pub const DEFAULT_RMS_THRESHOLD: f32 = 0.015;
/// Voiced frames tolerated to bridge a short dip before a span closes.
pub const DEFAULT_HANGOVER_FRAMES: usize = 3;

/// Frame-energy voice activity detector.
///
/// Splits the input into fixed-length frames, marks a frame voiced when its
/// RMS exceeds the threshold, and merges voiced frames into spans. A span
/// stays open across up to `hangover_frames` unvoiced frames so brief
/// intra-word dips do not fragment an utterance.
pub struct EnergySpeechDetector {
    frame_ms: u64,
    rms_threshold: f32,
    hangover_frames: usize,
}

impl EnergySpeechDetector {
    pub fn new(frame_ms: u64, rms_threshold: f32, hangover_frames: usize) -> Self {
        Self {
            frame_ms: frame_ms.max(1),
            rms_threshold,
            hangover_frames,
        }
    }
}

impl Default for EnergySpeechDetector {
    fn default() -> Self {
        Self::new(
            DEFAULT_FRAME_MS,
            DEFAULT_RMS_THRESHOLD,
            DEFAULT_HANGOVER_FRAMES,
        )
    }
}

fn rms(frame: &[f32]) -> f32 {
    if frame.is_empty() {
        return 0.0;
    }
    let sum: f32 = frame.iter().map(|s| s * s).sum();
    (sum / frame.len() as f32).sqrt()
}

impl SpeechDetector for EnergySpeechDetector {
    fn detect(&mut self, samples: &[f32], sample_rate: u32) -> Vec<SpeechSpan> {
        let frame_len = (sample_rate as u64 * self.frame_ms / 1000).max(1) as usize;
        let mut spans = Vec::new();
        let mut open: Option<(usize, usize)> = None; // (start, last voiced end)
        let mut silent_run = 0usize;

        for (i, frame) in samples.chunks(frame_len).enumerate() {
            let start = i * frame_len;
            let end = start + frame.len();
            if rms(frame) >= self.rms_threshold {
                match open {
                    Some((span_start, _)) => open = Some((span_start, end)),
                    None => open = Some((start, end)),
                }
                silent_run = 0;
            } else if let Some((span_start, span_end)) = open {
                silent_run += 1;
                if silent_run > self.hangover_frames {
                    spans.push(SpeechSpan::new(span_start, span_end));
                    open = None;
                    silent_run = 0;
                }
            }
        }

        if let Some((span_start, span_end)) = open {
            spans.push(SpeechSpan::new(span_start, span_end));
        }
        spans
    }
}
