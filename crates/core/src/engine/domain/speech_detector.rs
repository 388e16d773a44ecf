/// A half-open range of mono sample indices identified as containing
/// voice activity.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SpeechSpan {
    pub start_sample: usize,
    pub end_sample: usize,
}

impl SpeechSpan {
    pub fn new(start_sample: usize, end_sample: usize) -> Self {
        debug_assert!(end_sample > start_sample, "span must be non-empty");
        Self {
            start_sample,
            end_sample,
        }
    }

    pub fn len(&self) -> usize {
        self.end_sample - self.start_sample
    }

    pub fn is_empty(&self) -> bool {
        self.end_sample <= self.start_sample
    }
}

/// Domain interface for voice activity detection.
///
/// Implementations scan mono samples and report the spans that carry
/// speech, ordered and disjoint. The windowing policy uses the gaps between
/// spans to pick utterance boundaries and the last span's end to strip
/// trailing silence.
pub trait SpeechDetector: Send {
    fn detect(&mut self, samples: &[f32], sample_rate: u32) -> Vec<SpeechSpan>;
}
