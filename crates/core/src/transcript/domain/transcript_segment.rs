/// A timestamped piece of recognized text with a confidence score.
///
/// Times are session-relative seconds. Within one session, segments handed
/// to the sink never regress in start time.
#[derive(Clone, Debug, PartialEq)]
pub struct TranscriptSegment {
    pub text: String,
    pub start_time: f64,
    pub end_time: f64,
    pub language: String,
    pub confidence: f32,
}

impl TranscriptSegment {
    pub fn new(
        text: impl Into<String>,
        start_time: f64,
        end_time: f64,
        language: impl Into<String>,
        confidence: f32,
    ) -> Self {
        debug_assert!(
            end_time >= start_time,
            "segment end must not precede start"
        );
        Self {
            text: text.into(),
            start_time,
            end_time,
            language: language.into(),
            confidence,
        }
    }

    pub fn duration(&self) -> f64 {
        self.end_time - self.start_time
    }

    /// Returns a copy shifted forward by `offset` seconds.
    pub fn shifted(&self, offset: f64) -> Self {
        Self {
            start_time: self.start_time + offset,
            end_time: self.end_time + offset,
            ..self.clone()
        }
    }
}
