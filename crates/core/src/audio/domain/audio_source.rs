use super::audio_chunk::AudioChunk;

pub type SourceError = Box<dyn std::error::Error + Send + Sync>;

/// Produces a lazy, possibly unbounded sequence of audio chunks.
///
/// Implementations handle capture details (device drivers, file decoding,
/// resampling) while the pipeline works with the abstract `AudioChunk`
/// type. The iterator is pulled from the capture worker thread, so a slow
/// downstream consumer throttles the source naturally.
pub trait AudioSource: Send {
    /// Returns an iterator over chunks in capture order.
    fn chunks(&mut self) -> Box<dyn Iterator<Item = Result<AudioChunk, SourceError>> + '_>;

    /// Best-effort teardown called once the capture stage exits. Errors are
    /// swallowed by the caller; the default does nothing.
    fn stop(&mut self) {}
}
