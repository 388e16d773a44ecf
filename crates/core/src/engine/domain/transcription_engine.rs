use thiserror::Error;

use crate::transcript::domain::transcript_segment::TranscriptSegment;

use super::options::TranscriptionOptions;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("engine has not been started for a session")]
    NotStarted,
    #[error("model not found: {0}")]
    ModelNotFound(String),
    #[error("failed to load model: {0}")]
    ModelLoad(String),
    #[error("inference failed: {0}")]
    Inference(String),
    #[error("unknown engine kind: {0}")]
    UnknownKind(String),
}

/// Identification an engine exposes for result reporting.
#[derive(Clone, Debug)]
pub struct EngineMetadata {
    pub engine: String,
    pub model: String,
    pub device: String,
    pub precision: String,
}

impl Default for EngineMetadata {
    fn default() -> Self {
        Self {
            engine: "unknown".to_string(),
            model: "unknown".to_string(),
            device: "unknown".to_string(),
            precision: "unknown".to_string(),
        }
    }
}

/// A stateful, push-based recognizer driven by the recognition stage.
///
/// Lifecycle: `start` opens a session (and may lazily perform expensive
/// one-time initialization such as loading a model — it runs on the
/// recognition worker thread, never on the orchestrator's control path);
/// `push_audio` appends raw audio and may process opportunistically;
/// `flush` forces whatever remains buffered through the model; and
/// `poll_segments` drains newly produced segments. `start` is callable
/// again after a flush for the next session run.
///
/// A failure from `start`/`push_audio`/`flush` is fatal for the current
/// run, but must leave the internal buffer coherent.
pub trait TranscriptionEngine: Send {
    fn start(&mut self, options: &TranscriptionOptions) -> Result<(), EngineError>;

    /// Appends interleaved s16le PCM. `timestamp_ms` is the chunk's
    /// session-relative start time; engines tracking their own stream
    /// offset may ignore it. Must not block indefinitely.
    fn push_audio(&mut self, pcm: &[u8], timestamp_ms: u64) -> Result<(), EngineError>;

    /// Processes remaining buffered audio even if it would normally be held
    /// back waiting for more context.
    fn flush(&mut self) -> Result<(), EngineError>;

    /// Returns and clears segments produced since the last call.
    /// Non-blocking; returns an empty vec when nothing is new.
    fn poll_segments(&mut self) -> Vec<TranscriptSegment>;

    fn metadata(&self) -> EngineMetadata {
        EngineMetadata::default()
    }
}
