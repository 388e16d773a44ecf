use crate::engine::domain::speech_detector::SpeechDetector;
use crate::engine::domain::transcription_engine::EngineError;
use crate::shared::pcm;
use crate::transcript::domain::transcript_segment::TranscriptSegment;

use super::pcm_buffer::PcmBuffer;

/// Tuning for the sliding recognition window, all sizes in bytes of
/// interleaved s16le PCM.
#[derive(Clone, Debug)]
pub struct SegmenterConfig {
    pub sample_rate: u32,
    pub channels: u16,
    /// Most bytes considered in one processing round (chronological head).
    pub window_bytes: usize,
    /// Rounds consuming fewer bytes than this are skipped unless flushing.
    pub min_process_bytes: usize,
    /// Shortest inter-span silence that marks an utterance boundary.
    pub min_silence_ms: u64,
    /// Kept after a span end so a closing phoneme is not truncated.
    pub trailing_pad_ms: u64,
    /// Context retained after a round; older remainder is aged out.
    pub max_tail_bytes: usize,
    /// Hard cap on buffered bytes; the oldest excess is dropped on push.
    pub max_buffer_bytes: usize,
}

impl SegmenterConfig {
    pub fn for_stream(sample_rate: u32, channels: u16) -> Self {
        let bps = pcm::bytes_per_second(sample_rate, channels);
        Self {
            sample_rate,
            channels,
            window_bytes: 10 * bps,
            min_process_bytes: bps,
            min_silence_ms: 500,
            trailing_pad_ms: 200,
            max_tail_bytes: 10 * bps,
            max_buffer_bytes: 30 * bps,
        }
    }
}

/// Decides, per processing round, how much buffered audio to hand to the
/// model, based on detected speech boundaries.
///
/// Audio is only ever consumed from the chronological head of the buffer,
/// so emitted segments are non-decreasing in start time. The cumulative
/// stream offset counts every byte that ever left the head — consumed,
/// aged out, or overflowed — which keeps segment timestamps stream-relative
/// even though the buffer slides underneath them.
pub struct StreamSegmenter {
    config: SegmenterConfig,
    detector: Box<dyn SpeechDetector>,
    buffer: PcmBuffer,
    stream_offset: f64,
}

impl StreamSegmenter {
    pub fn new(config: SegmenterConfig, detector: Box<dyn SpeechDetector>) -> Self {
        Self {
            config,
            detector,
            buffer: PcmBuffer::new(),
            stream_offset: 0.0,
        }
    }

    pub fn buffered_bytes(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Seconds of audio that have left the head of the buffer so far.
    pub fn stream_offset(&self) -> f64 {
        self.stream_offset
    }

    pub fn reset(&mut self) {
        self.buffer.clear();
        self.stream_offset = 0.0;
    }

    /// Appends audio, evicting the oldest bytes when the hard cap is
    /// exceeded. Evicted audio is gone for good, so the event is logged and
    /// the stream offset advanced by exactly the dropped duration.
    pub fn push(&mut self, pcm: &[u8]) {
        self.buffer.push(pcm);
        if self.buffer.len() > self.config.max_buffer_bytes {
            let excess = self.buffer.len() - self.config.max_buffer_bytes;
            let dropped = self.buffer.drop_front(excess);
            let dropped_secs = self.bytes_to_secs(dropped);
            self.stream_offset += dropped_secs;
            log::warn!(
                "audio buffer overflow: dropped oldest {dropped} bytes ({dropped_secs:.2}s)"
            );
        }
    }

    /// Runs one processing round: picks a consumable head slice per the
    /// windowing policy, hands exactly those bytes to `recognize`, and maps
    /// the returned segment times into stream time. Returns an empty vec
    /// when the round was skipped.
    ///
    /// `recognize` receives the consumed slice and reports segments with
    /// times local to it.
    pub fn process<F>(
        &mut self,
        force: bool,
        mut recognize: F,
    ) -> Result<Vec<TranscriptSegment>, EngineError>
    where
        F: FnMut(&[u8]) -> Result<Vec<TranscriptSegment>, EngineError>,
    {
        if self.buffer.is_empty() {
            return Ok(Vec::new());
        }
        if self.buffer.len() < self.config.min_process_bytes && !force {
            return Ok(Vec::new());
        }

        let consumed = match self.plan_consumption(force) {
            Some(n) => n,
            None => return Ok(Vec::new()),
        };

        let offset = self.stream_offset;
        let local = recognize(&self.buffer.as_slice()[..consumed])?;
        let segments = local.into_iter().map(|s| s.shifted(offset)).collect();

        self.stream_offset += self.bytes_to_secs(consumed);
        self.buffer.drop_front(consumed);
        self.slide();

        Ok(segments)
    }

    /// Applies steps 2–6 of the windowing policy: speech-span detection over
    /// the leading window, silence-gap split candidate, tail truncation,
    /// and the minimum-consumption check.
    fn plan_consumption(&mut self, force: bool) -> Option<usize> {
        let frame = pcm::frame_bytes(self.config.channels);
        let window_len = pcm::align_to_frame(
            self.buffer.len().min(self.config.window_bytes),
            self.config.channels,
        );
        if window_len == 0 {
            return None;
        }

        let window = &self.buffer.as_slice()[..window_len];
        let samples = pcm::to_mono_f32(window, self.config.channels);
        let spans = self.detector.detect(&samples, self.config.sample_rate);

        let pad_bytes = pcm::ms_to_bytes(
            self.config.trailing_pad_ms,
            self.config.sample_rate,
            self.config.channels,
        );

        // First inter-span gap at or above the silence threshold wins.
        let mut split_point = None;
        for pair in spans.windows(2) {
            let gap_samples = pair[1].start_sample.saturating_sub(pair[0].end_sample);
            if pcm::samples_to_ms(gap_samples, self.config.sample_rate)
                >= self.config.min_silence_ms
            {
                split_point = Some((pair[0].end_sample * frame + pad_bytes).min(window_len));
                break;
            }
        }

        // Trailing silence past the last span is withheld from the model.
        let tail_point = spans
            .last()
            .map(|s| (s.end_sample * frame + pad_bytes).min(window_len));

        let consumed = match (tail_point, split_point) {
            // No speech detected: the whole window is eligible, letting the
            // model deal with silence itself.
            (None, _) => window_len,
            (Some(tail), None) => tail,
            (Some(tail), Some(split)) => tail.min(split),
        };
        let consumed = pcm::align_to_frame(consumed, self.config.channels);

        if consumed == 0 {
            return None;
        }
        // A found split below the threshold is forgotten until more audio
        // arrives; flushing overrides the hold.
        if consumed < self.config.min_process_bytes && !force {
            log::debug!(
                "holding {consumed} consumable bytes below the {} byte threshold",
                self.config.min_process_bytes
            );
            return None;
        }
        Some(consumed)
    }

    /// Ages out buffered remainder beyond the retained-context cap. The
    /// dropped bytes were kept only as context behind the consumed point,
    /// so this is not speech loss, but the offset must still advance.
    fn slide(&mut self) {
        if self.buffer.len() > self.config.max_tail_bytes {
            let excess = self.buffer.len() - self.config.max_tail_bytes;
            let dropped = self.buffer.drop_front(excess);
            self.stream_offset += self.bytes_to_secs(dropped);
            log::debug!("window slide dropped {dropped} bytes of retained context");
        }
    }

    fn bytes_to_secs(&self, bytes: usize) -> f64 {
        pcm::bytes_to_secs(bytes, self.config.sample_rate, self.config.channels)
    }
}
