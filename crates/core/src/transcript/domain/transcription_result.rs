use crate::engine::domain::transcription_engine::EngineMetadata;

use super::transcript_segment::TranscriptSegment;

/// Aggregate outcome of one completed session run.
///
/// Built exactly once, at successful completion, from the ordered segments
/// the delivery stage accumulated; never produced for a cancelled run.
#[derive(Clone, Debug)]
pub struct TranscriptionResult {
    /// Segment texts joined in order with inner whitespace collapsed.
    pub text: String,
    pub segments: Vec<TranscriptSegment>,
    pub engine: String,
    pub model: String,
    pub device: String,
    pub precision: String,
    /// End time of the last segment in seconds; 0 when no speech was found.
    pub duration: f64,
    /// Non-fatal conditions observed during the run, in order.
    pub warnings: Vec<String>,
}

impl TranscriptionResult {
    pub fn from_segments(
        segments: Vec<TranscriptSegment>,
        metadata: EngineMetadata,
        warnings: Vec<String>,
    ) -> Self {
        let joined = segments
            .iter()
            .map(|s| s.text.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        let duration = segments.last().map(|s| s.end_time).unwrap_or(0.0);
        Self {
            text: collapse_whitespace(&joined),
            segments,
            engine: metadata.engine,
            model: metadata.model,
            device: metadata.device,
            precision: metadata.precision,
            duration,
            warnings,
        }
    }
}

/// Collapses runs of whitespace to single spaces and trims the ends.
pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
