use super::transcript_segment::TranscriptSegment;
use super::transcription_result::TranscriptionResult;

pub type SinkError = Box<dyn std::error::Error + Send + Sync>;

/// Receives transcript output from a running session.
///
/// `handle_segment` is called once per produced segment, in order, as soon
/// as each becomes available; `complete` is called exactly once at normal
/// termination and not at all when the run was cancelled or failed. A sink
/// shared by several concurrent sessions must be reentrant.
pub trait TranscriptSink: Send {
    fn handle_segment(&mut self, segment: &TranscriptSegment) -> Result<(), SinkError>;

    fn complete(&mut self, result: TranscriptionResult) -> Result<(), SinkError>;
}
