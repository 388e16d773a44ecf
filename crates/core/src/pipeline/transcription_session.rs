use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, SendTimeoutError, Sender};
use thiserror::Error;

use crate::audio::domain::audio_chunk::AudioChunk;
use crate::audio::domain::audio_source::AudioSource;
use crate::engine::domain::options::{OptionsError, TranscriptionOptions};
use crate::engine::domain::transcription_engine::{
    EngineError, EngineMetadata, TranscriptionEngine,
};
use crate::transcript::domain::text_polisher::TextPolisher;
use crate::transcript::domain::transcript_segment::TranscriptSegment;
use crate::transcript::domain::transcript_sink::TranscriptSink;
use crate::transcript::domain::transcription_result::TranscriptionResult;

pub const AUDIO_QUEUE_CAPACITY: usize = 256;
pub const SEGMENT_QUEUE_CAPACITY: usize = 32;
/// Workers never block longer than this on a queue before re-checking the
/// cancellation flag, so `stop()` is observed within about one interval.
pub const POLL_INTERVAL: Duration = Duration::from_millis(50);
/// How long `stop()` waits for each worker before leaving it to `join()`.
pub const WORKER_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

const JOIN_POLL: Duration = Duration::from_millis(5);

pub type StageError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("session is already running")]
    AlreadyRunning,
    #[error("invalid options: {0}")]
    InvalidOptions(#[from] OptionsError),
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("audio source failed: {0}")]
    Source(#[source] StageError),
    #[error("transcript sink failed: {0}")]
    Sink(#[source] StageError),
    #[error("{0} worker thread panicked")]
    StagePanicked(&'static str),
}

enum AudioMessage {
    Chunk(AudioChunk),
    Stop,
}

enum SegmentMessage {
    Segment(TranscriptSegment),
    Stop,
}

/// State every worker shares: the cancellation flag and the slot holding
/// the first error any stage observed. Recording an error also raises the
/// flag, so the other stages wind down within one poll interval.
#[derive(Clone)]
struct StageShared {
    cancelled: Arc<AtomicBool>,
    first_error: Arc<Mutex<Option<SessionError>>>,
}

impl StageShared {
    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    fn has_error(&self) -> bool {
        self.first_error.lock().unwrap().is_some()
    }

    fn record(&self, error: SessionError) {
        let mut slot = self.first_error.lock().unwrap();
        if slot.is_none() {
            log::error!("session stage failed: {error}");
            *slot = Some(error);
        } else {
            log::debug!("suppressing later stage error: {error}");
        }
        self.cancelled.store(true, Ordering::Relaxed);
    }
}

struct Worker {
    name: &'static str,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct SessionControl {
    workers: Vec<Worker>,
    audio_tx: Option<Sender<AudioMessage>>,
    segment_tx: Option<Sender<SegmentMessage>>,
}

/// Orchestrates one transcription run across three workers — capture,
/// recognition, delivery — connected by two bounded queues.
///
/// Layout: `source → [audio queue] → engine → [segment queue] → sink`
///
/// A full queue throttles the producer side (bounded-wait enqueue that
/// re-checks cancellation), so a slow engine slows capture naturally and a
/// slow sink slows recognition. The session object is reusable: once a run
/// has fully joined, `start` may be called again.
pub struct TranscriptionSession {
    control: Mutex<SessionControl>,
    cancelled: Arc<AtomicBool>,
    first_error: Arc<Mutex<Option<SessionError>>>,
}

impl Default for TranscriptionSession {
    fn default() -> Self {
        Self::new()
    }
}

impl TranscriptionSession {
    pub fn new() -> Self {
        Self {
            control: Mutex::new(SessionControl::default()),
            cancelled: Arc::new(AtomicBool::new(false)),
            first_error: Arc::new(Mutex::new(None)),
        }
    }

    /// Launches the three workers for a new run.
    ///
    /// Fails with `AlreadyRunning` while any worker from a previous run is
    /// still alive. `engine_kind` is echoed into the final result's
    /// metadata; `polisher` post-processes the aggregated text when given.
    pub fn start(
        &self,
        source: Box<dyn AudioSource>,
        engine: Box<dyn TranscriptionEngine>,
        sink: Box<dyn TranscriptSink>,
        options: TranscriptionOptions,
        engine_kind: &str,
        polisher: Option<Box<dyn TextPolisher>>,
    ) -> Result<(), SessionError> {
        let mut control = self.control.lock().unwrap();

        if control.workers.iter().any(|w| !w.handle.is_finished()) {
            return Err(SessionError::AlreadyRunning);
        }
        // Reap handles left over from a completed run.
        for worker in control.workers.drain(..) {
            let _ = worker.handle.join();
        }

        options.validate()?;

        self.cancelled.store(false, Ordering::Relaxed);
        *self.first_error.lock().unwrap() = None;

        let (audio_tx, audio_rx) = bounded(AUDIO_QUEUE_CAPACITY);
        let (segment_tx, segment_rx) = bounded(SEGMENT_QUEUE_CAPACITY);
        control.audio_tx = Some(audio_tx.clone());
        control.segment_tx = Some(segment_tx.clone());

        let mut metadata = engine.metadata();
        metadata.engine = engine_kind.to_string();

        let shared = self.shared();

        let capture_shared = shared.clone();
        control.workers.push(Worker {
            name: "capture",
            handle: std::thread::spawn(move || run_capture(source, audio_tx, capture_shared)),
        });

        let recognition_shared = shared.clone();
        control.workers.push(Worker {
            name: "recognition",
            handle: std::thread::spawn(move || {
                run_recognition(engine, options, audio_rx, segment_tx, recognition_shared)
            }),
        });

        control.workers.push(Worker {
            name: "delivery",
            handle: std::thread::spawn(move || {
                run_delivery(sink, polisher, segment_rx, metadata, shared)
            }),
        });

        Ok(())
    }

    /// Requests cancellation and waits a bounded time for each worker.
    ///
    /// Idempotent. The stop markers are enqueued best-effort only to wake a
    /// worker currently blocked on a dequeue; the flag is what guarantees
    /// termination. A worker that outlives its timeout is logged and kept
    /// so a later `join` (or `start`) still observes it.
    pub fn stop(&self) {
        let workers = {
            let mut control = self.control.lock().unwrap();
            self.cancelled.store(true, Ordering::Relaxed);
            if let Some(tx) = &control.audio_tx {
                let _ = tx.try_send(AudioMessage::Stop);
            }
            if let Some(tx) = &control.segment_tx {
                let _ = tx.try_send(SegmentMessage::Stop);
            }
            std::mem::take(&mut control.workers)
        }; // lock released before joining, or a stop inside a worker would deadlock

        let mut lingering = Vec::new();
        for Worker { name, handle } in workers {
            match join_with_timeout(handle, WORKER_JOIN_TIMEOUT) {
                Ok(Ok(())) => {}
                Ok(Err(_)) => self.shared().record(SessionError::StagePanicked(name)),
                Err(handle) => {
                    log::warn!("{name} worker did not stop within {WORKER_JOIN_TIMEOUT:?}");
                    lingering.push(Worker { name, handle });
                }
            }
        }
        if !lingering.is_empty() {
            self.control.lock().unwrap().workers.extend(lingering);
        }
    }

    /// Waits for all workers, then surfaces the single recorded error, if
    /// any. With a timeout, the deadline is shared across the workers.
    pub fn join(&self, timeout: Option<Duration>) -> Result<(), SessionError> {
        let workers = std::mem::take(&mut self.control.lock().unwrap().workers);
        let deadline = timeout.map(|t| Instant::now() + t);

        let mut lingering = Vec::new();
        for Worker { name, handle } in workers {
            let joined = match deadline {
                None => Ok(handle.join()),
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    join_with_timeout(handle, remaining)
                }
            };
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(_)) => self.shared().record(SessionError::StagePanicked(name)),
                Err(handle) => {
                    log::warn!("{name} worker still running at join timeout");
                    lingering.push(Worker { name, handle });
                }
            }
        }
        if !lingering.is_empty() {
            self.control.lock().unwrap().workers.extend(lingering);
        }

        match self.first_error.lock().unwrap().take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn shared(&self) -> StageShared {
        StageShared {
            cancelled: self.cancelled.clone(),
            first_error: self.first_error.clone(),
        }
    }
}

/// Bounded-wait enqueue: retries the wait while the queue is full, giving
/// up when cancellation is requested or the receiver is gone. Returns
/// whether the message was delivered.
fn send_until_cancelled<T>(tx: &Sender<T>, mut message: T, cancelled: &AtomicBool) -> bool {
    loop {
        if cancelled.load(Ordering::Relaxed) {
            return false;
        }
        match tx.send_timeout(message, POLL_INTERVAL) {
            Ok(()) => return true,
            Err(SendTimeoutError::Timeout(returned)) => message = returned,
            Err(SendTimeoutError::Disconnected(_)) => return false,
        }
    }
}

fn join_with_timeout(
    handle: JoinHandle<()>,
    timeout: Duration,
) -> Result<std::thread::Result<()>, JoinHandle<()>> {
    let deadline = Instant::now() + timeout;
    while !handle.is_finished() {
        if Instant::now() >= deadline {
            return Err(handle);
        }
        std::thread::sleep(JOIN_POLL);
    }
    Ok(handle.join())
}

fn run_capture(mut source: Box<dyn AudioSource>, tx: Sender<AudioMessage>, shared: StageShared) {
    if let Err(error) = capture_loop(source.as_mut(), &tx, &shared) {
        shared.record(error);
    }
    // Wake downstream no matter how the loop ended. The receiver is either
    // draining or already gone, so a blocking send cannot hang.
    let _ = tx.send(AudioMessage::Stop);
    source.stop();
    log::debug!("capture worker exiting");
}

fn capture_loop(
    source: &mut dyn AudioSource,
    tx: &Sender<AudioMessage>,
    shared: &StageShared,
) -> Result<(), SessionError> {
    for chunk in source.chunks() {
        if shared.is_cancelled() {
            return Ok(());
        }
        let chunk = chunk.map_err(SessionError::Source)?;
        if !send_until_cancelled(tx, AudioMessage::Chunk(chunk), &shared.cancelled) {
            return Ok(());
        }
    }
    Ok(())
}

fn run_recognition(
    mut engine: Box<dyn TranscriptionEngine>,
    options: TranscriptionOptions,
    rx: Receiver<AudioMessage>,
    tx: Sender<SegmentMessage>,
    shared: StageShared,
) {
    if let Err(error) = recognition_loop(engine.as_mut(), &options, &rx, &tx, &shared) {
        shared.record(error);
    }
    let _ = tx.send(SegmentMessage::Stop);
    log::debug!("recognition worker exiting");
}

fn recognition_loop(
    engine: &mut dyn TranscriptionEngine,
    options: &TranscriptionOptions,
    rx: &Receiver<AudioMessage>,
    tx: &Sender<SegmentMessage>,
    shared: &StageShared,
) -> Result<(), SessionError> {
    engine.start(options)?;
    loop {
        if shared.is_cancelled() {
            return Ok(());
        }
        match rx.recv_timeout(POLL_INTERVAL) {
            Ok(AudioMessage::Chunk(chunk)) => {
                engine.push_audio(chunk.data(), chunk.timestamp_ms())?;
                forward_segments(engine, tx, shared);
            }
            Ok(AudioMessage::Stop) => {
                // End of input: force residual buffered audio through.
                engine.flush()?;
                forward_segments(engine, tx, shared);
                return Ok(());
            }
            // Poll even without new audio — an engine may finish a window
            // on its own time.
            Err(RecvTimeoutError::Timeout) => forward_segments(engine, tx, shared),
            Err(RecvTimeoutError::Disconnected) => return Ok(()),
        }
    }
}

fn forward_segments(
    engine: &mut dyn TranscriptionEngine,
    tx: &Sender<SegmentMessage>,
    shared: &StageShared,
) {
    for segment in engine.poll_segments() {
        if !send_until_cancelled(tx, SegmentMessage::Segment(segment), &shared.cancelled) {
            return;
        }
    }
}

#[derive(PartialEq)]
enum DeliveryOutcome {
    /// The stop marker arrived: upstream finished (cleanly or not).
    Finished,
    /// Cancellation, or upstream vanished without a stop marker.
    Interrupted,
}

fn run_delivery(
    mut sink: Box<dyn TranscriptSink>,
    polisher: Option<Box<dyn TextPolisher>>,
    rx: Receiver<SegmentMessage>,
    metadata: EngineMetadata,
    shared: StageShared,
) {
    let mut collected = Vec::new();
    match delivery_loop(sink.as_mut(), &rx, &shared, &mut collected) {
        Err(error) => shared.record(error),
        Ok(outcome) => {
            // A cancelled run produces no result (deliberate stop), and a
            // failed run surfaces its error from join() instead.
            if outcome != DeliveryOutcome::Finished
                || shared.has_error()
                || shared.is_cancelled()
            {
                log::debug!("delivery worker skipping result assembly");
            } else {
                let mut result =
                    TranscriptionResult::from_segments(collected, metadata, Vec::new());
                if let Some(polisher) = polisher.as_deref() {
                    match polisher.polish(&result.text) {
                        Ok(polished) => result.text = polished,
                        Err(error) => {
                            // Non-fatal: keep the unpolished text.
                            log::warn!("text polisher failed: {error}");
                            result.warnings.push(format!("text polishing failed: {error}"));
                        }
                    }
                }
                if let Err(error) = sink.complete(result) {
                    shared.record(SessionError::Sink(error));
                }
            }
        }
    }
    log::debug!("delivery worker exiting");
}

fn delivery_loop(
    sink: &mut dyn TranscriptSink,
    rx: &Receiver<SegmentMessage>,
    shared: &StageShared,
    collected: &mut Vec<TranscriptSegment>,
) -> Result<DeliveryOutcome, SessionError> {
    loop {
        match rx.recv_timeout(POLL_INTERVAL) {
            Ok(SegmentMessage::Segment(segment)) => {
                // Streaming delivery: each segment goes out as soon as it
                // arrives, not batched at the end.
                sink.handle_segment(&segment).map_err(SessionError::Sink)?;
                collected.push(segment);
            }
            Ok(SegmentMessage::Stop) => return Ok(DeliveryOutcome::Finished),
            Err(RecvTimeoutError::Timeout) => {
                if shared.is_cancelled() {
                    return Ok(DeliveryOutcome::Interrupted);
                }
            }
            Err(RecvTimeoutError::Disconnected) => return Ok(DeliveryOutcome::Interrupted),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::pcm;
    use std::sync::atomic::AtomicUsize;

    // ─── Stubs ───

    fn chunk(index: usize) -> AudioChunk {
        let start = index as f64 * 0.1;
        AudioChunk::new(vec![0u8; 3200], 16000, 1, start, start + 0.1).unwrap()
    }

    struct ScriptedSource {
        chunks: Vec<Result<AudioChunk, crate::audio::domain::audio_source::SourceError>>,
        stopped: Arc<AtomicBool>,
    }

    impl ScriptedSource {
        fn of(count: usize) -> (Box<Self>, Arc<AtomicBool>) {
            let stopped = Arc::new(AtomicBool::new(false));
            let source = Box::new(Self {
                chunks: (0..count).map(|i| Ok(chunk(i))).collect(),
                stopped: stopped.clone(),
            });
            (source, stopped)
        }
    }

    impl AudioSource for ScriptedSource {
        fn chunks(
            &mut self,
        ) -> Box<
            dyn Iterator<
                    Item = Result<AudioChunk, crate::audio::domain::audio_source::SourceError>,
                > + '_,
        > {
            Box::new(self.chunks.drain(..))
        }

        fn stop(&mut self) {
            self.stopped.store(true, Ordering::Relaxed);
        }
    }

    /// Never runs out of chunks; used to prove stop() stays bounded.
    struct EndlessSource;

    impl AudioSource for EndlessSource {
        fn chunks(
            &mut self,
        ) -> Box<
            dyn Iterator<
                    Item = Result<AudioChunk, crate::audio::domain::audio_source::SourceError>,
                > + '_,
        > {
            Box::new(std::iter::repeat_with(
                || -> Result<AudioChunk, crate::audio::domain::audio_source::SourceError> {
                    std::thread::sleep(Duration::from_millis(1));
                    Ok(chunk(0))
                },
            ))
        }
    }

    /// Emits one labeled segment per pushed chunk.
    struct EchoEngine {
        label: String,
        counter: usize,
        pending: Vec<TranscriptSegment>,
    }

    impl EchoEngine {
        fn new(label: &str) -> Box<Self> {
            Box::new(Self {
                label: label.to_string(),
                counter: 0,
                pending: Vec::new(),
            })
        }
    }

    impl TranscriptionEngine for EchoEngine {
        fn start(&mut self, _: &TranscriptionOptions) -> Result<(), EngineError> {
            self.counter = 0;
            self.pending.clear();
            Ok(())
        }

        fn push_audio(&mut self, _: &[u8], _: u64) -> Result<(), EngineError> {
            let start = self.counter as f64 * 0.1;
            self.pending.push(TranscriptSegment::new(
                format!("{}{}", self.label, self.counter),
                start,
                start + 0.1,
                "en",
                1.0,
            ));
            self.counter += 1;
            Ok(())
        }

        fn flush(&mut self) -> Result<(), EngineError> {
            Ok(())
        }

        fn poll_segments(&mut self) -> Vec<TranscriptSegment> {
            std::mem::take(&mut self.pending)
        }
    }

    /// Fails `push_audio` after a configurable number of successes.
    struct FailingEngine {
        remaining_ok: usize,
        inner: EchoEngine,
    }

    impl TranscriptionEngine for FailingEngine {
        fn start(&mut self, options: &TranscriptionOptions) -> Result<(), EngineError> {
            self.inner.start(options)
        }

        fn push_audio(&mut self, pcm: &[u8], ts: u64) -> Result<(), EngineError> {
            if self.remaining_ok == 0 {
                return Err(EngineError::Inference("synthetic failure".to_string()));
            }
            self.remaining_ok -= 1;
            self.inner.push_audio(pcm, ts)
        }

        fn flush(&mut self) -> Result<(), EngineError> {
            self.inner.flush()
        }

        fn poll_segments(&mut self) -> Vec<TranscriptSegment> {
            self.inner.poll_segments()
        }
    }

    struct PanickingEngine;

    impl TranscriptionEngine for PanickingEngine {
        fn start(&mut self, _: &TranscriptionOptions) -> Result<(), EngineError> {
            Ok(())
        }
        fn push_audio(&mut self, _: &[u8], _: u64) -> Result<(), EngineError> {
            panic!("engine blew up");
        }
        fn flush(&mut self) -> Result<(), EngineError> {
            Ok(())
        }
        fn poll_segments(&mut self) -> Vec<TranscriptSegment> {
            Vec::new()
        }
    }

    #[derive(Clone, Default)]
    struct SinkState {
        segments: Arc<Mutex<Vec<TranscriptSegment>>>,
        result: Arc<Mutex<Option<TranscriptionResult>>>,
        completions: Arc<AtomicUsize>,
    }

    struct CollectingSink {
        state: SinkState,
        /// Per-segment artificial latency, to exercise backpressure.
        delay: Duration,
        fail_segments: bool,
    }

    impl CollectingSink {
        fn new() -> (Box<Self>, SinkState) {
            let state = SinkState::default();
            (
                Box::new(Self {
                    state: state.clone(),
                    delay: Duration::ZERO,
                    fail_segments: false,
                }),
                state,
            )
        }

        fn slow(delay: Duration) -> (Box<Self>, SinkState) {
            let (mut sink, state) = Self::new();
            sink.delay = delay;
            (sink, state)
        }

        fn failing() -> (Box<Self>, SinkState) {
            let (mut sink, state) = Self::new();
            sink.fail_segments = true;
            (sink, state)
        }
    }

    impl TranscriptSink for CollectingSink {
        fn handle_segment(
            &mut self,
            segment: &TranscriptSegment,
        ) -> Result<(), crate::transcript::domain::transcript_sink::SinkError> {
            if self.fail_segments {
                return Err("sink rejected segment".into());
            }
            if !self.delay.is_zero() {
                std::thread::sleep(self.delay);
            }
            self.state.segments.lock().unwrap().push(segment.clone());
            Ok(())
        }

        fn complete(
            &mut self,
            result: TranscriptionResult,
        ) -> Result<(), crate::transcript::domain::transcript_sink::SinkError> {
            self.state.completions.fetch_add(1, Ordering::Relaxed);
            *self.state.result.lock().unwrap() = Some(result);
            Ok(())
        }
    }

    struct UppercasePolisher;

    impl TextPolisher for UppercasePolisher {
        fn polish(
            &self,
            text: &str,
        ) -> Result<String, crate::transcript::domain::text_polisher::PolishError> {
            Ok(text.to_uppercase())
        }
    }

    struct BrokenPolisher;

    impl TextPolisher for BrokenPolisher {
        fn polish(
            &self,
            _: &str,
        ) -> Result<String, crate::transcript::domain::text_polisher::PolishError> {
            Err("polish service unavailable".into())
        }
    }

    fn run_to_completion(
        source: Box<dyn AudioSource>,
        engine: Box<dyn TranscriptionEngine>,
        sink: Box<dyn TranscriptSink>,
        polisher: Option<Box<dyn TextPolisher>>,
    ) -> Result<(), SessionError> {
        let session = TranscriptionSession::new();
        session.start(
            source,
            engine,
            sink,
            TranscriptionOptions::default(),
            "echo",
            polisher,
        )?;
        session.join(None)
    }

    // ─── Tests ───

    #[test]
    fn test_completed_run_calls_complete_exactly_once() {
        let (source, stopped) = ScriptedSource::of(5);
        let (sink, state) = CollectingSink::new();

        run_to_completion(source, EchoEngine::new("e"), sink, None).unwrap();

        assert_eq!(state.completions.load(Ordering::Relaxed), 1);
        assert_eq!(state.segments.lock().unwrap().len(), 5);
        let result = state.result.lock().unwrap().clone().unwrap();
        assert_eq!(result.text, "e0 e1 e2 e3 e4");
        assert_eq!(result.segments.len(), 5);
        assert!(stopped.load(Ordering::Relaxed), "source not stopped");
    }

    #[test]
    fn test_delivered_segments_never_regress_in_start_time() {
        let (source, _) = ScriptedSource::of(20);
        let (sink, state) = CollectingSink::new();

        run_to_completion(source, EchoEngine::new("s"), sink, None).unwrap();

        let segments = state.segments.lock().unwrap();
        assert_eq!(segments.len(), 20);
        for pair in segments.windows(2) {
            assert!(pair[0].start_time <= pair[1].start_time);
        }
    }

    #[test]
    fn test_result_metadata_and_duration() {
        let (source, _) = ScriptedSource::of(3);
        let (sink, state) = CollectingSink::new();

        run_to_completion(source, EchoEngine::new("m"), sink, None).unwrap();

        let result = state.result.lock().unwrap().clone().unwrap();
        assert_eq!(result.engine, "echo");
        assert_eq!(result.model, "unknown");
        assert_eq!(result.device, "unknown");
        // Last echo segment ends at 0.3s.
        approx::assert_relative_eq!(result.duration, 0.3, epsilon = 1e-9);
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn test_start_while_running_is_rejected() {
        let session = TranscriptionSession::new();
        let (sink, _) = CollectingSink::new();
        session
            .start(
                Box::new(EndlessSource),
                EchoEngine::new("a"),
                sink,
                TranscriptionOptions::default(),
                "echo",
                None,
            )
            .unwrap();

        let (sink2, _) = CollectingSink::new();
        let err = session
            .start(
                Box::new(EndlessSource),
                EchoEngine::new("b"),
                sink2,
                TranscriptionOptions::default(),
                "echo",
                None,
            )
            .unwrap_err();
        assert!(matches!(err, SessionError::AlreadyRunning));

        session.stop();
        session.join(None).unwrap();

        // After a fully joined run the session is reusable.
        let (source, _) = ScriptedSource::of(1);
        let (sink3, state) = CollectingSink::new();
        session
            .start(
                source,
                EchoEngine::new("c"),
                sink3,
                TranscriptionOptions::default(),
                "echo",
                None,
            )
            .unwrap();
        session.join(None).unwrap();
        assert_eq!(state.completions.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_stop_is_prompt_and_silent_for_endless_source() {
        let session = TranscriptionSession::new();
        let (sink, state) = CollectingSink::new();
        session
            .start(
                Box::new(EndlessSource),
                EchoEngine::new("x"),
                sink,
                TranscriptionOptions::default(),
                "echo",
                None,
            )
            .unwrap();

        std::thread::sleep(Duration::from_millis(100));

        let began = Instant::now();
        session.stop();
        let outcome = session.join(Some(Duration::from_secs(5)));
        assert!(began.elapsed() < 3 * WORKER_JOIN_TIMEOUT);

        // Deliberate stop: no error, no result.
        outcome.unwrap();
        assert_eq!(state.completions.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_stop_is_idempotent() {
        let session = TranscriptionSession::new();
        let (sink, _) = CollectingSink::new();
        session
            .start(
                Box::new(EndlessSource),
                EchoEngine::new("x"),
                sink,
                TranscriptionOptions::default(),
                "echo",
                None,
            )
            .unwrap();
        session.stop();
        session.stop();
        session.join(None).unwrap();
    }

    #[test]
    fn test_engine_error_surfaces_from_join_without_completion() {
        let (source, _) = ScriptedSource::of(10);
        let (sink, state) = CollectingSink::new();
        let engine = Box::new(FailingEngine {
            remaining_ok: 2,
            inner: *EchoEngine::new("f"),
        });

        let err = run_to_completion(source, engine, sink, None).unwrap_err();

        assert!(matches!(
            err,
            SessionError::Engine(EngineError::Inference(_))
        ));
        assert_eq!(state.completions.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_source_error_propagates_opaquely() {
        let stopped = Arc::new(AtomicBool::new(false));
        let source = Box::new(ScriptedSource {
            chunks: vec![Ok(chunk(0)), Err("device unplugged".into())],
            stopped: stopped.clone(),
        });
        let (sink, state) = CollectingSink::new();

        let err = run_to_completion(source, EchoEngine::new("s"), sink, None).unwrap_err();

        assert!(matches!(err, SessionError::Source(_)));
        assert_eq!(state.completions.load(Ordering::Relaxed), 0);
        assert!(stopped.load(Ordering::Relaxed));
    }

    #[test]
    fn test_sink_error_propagates_and_suppresses_completion() {
        let (source, _) = ScriptedSource::of(5);
        let (sink, state) = CollectingSink::failing();

        let err = run_to_completion(source, EchoEngine::new("k"), sink, None).unwrap_err();

        assert!(matches!(err, SessionError::Sink(_)));
        assert_eq!(state.completions.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_worker_panic_is_coalesced_into_join_error() {
        let (source, _) = ScriptedSource::of(3);
        let (sink, state) = CollectingSink::new();

        let err =
            run_to_completion(source, Box::new(PanickingEngine), sink, None).unwrap_err();

        assert!(matches!(err, SessionError::StagePanicked("recognition")));
        assert_eq!(state.completions.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_invalid_options_fail_before_spawning() {
        let session = TranscriptionSession::new();
        let (source, _) = ScriptedSource::of(1);
        let (sink, _) = CollectingSink::new();
        let options = TranscriptionOptions {
            beam_size: Some(0),
            ..Default::default()
        };

        let err = session
            .start(source, EchoEngine::new("o"), sink, options, "echo", None)
            .unwrap_err();
        assert!(matches!(err, SessionError::InvalidOptions(_)));

        // Nothing was spawned, so a valid start goes through immediately.
        let (source, _) = ScriptedSource::of(1);
        let (sink, _) = CollectingSink::new();
        session
            .start(
                source,
                EchoEngine::new("o"),
                sink,
                TranscriptionOptions::default(),
                "echo",
                None,
            )
            .unwrap();
        session.join(None).unwrap();
    }

    #[test]
    fn test_polisher_transforms_final_text() {
        let (source, _) = ScriptedSource::of(2);
        let (sink, state) = CollectingSink::new();

        run_to_completion(
            source,
            EchoEngine::new("p"),
            sink,
            Some(Box::new(UppercasePolisher)),
        )
        .unwrap();

        let result = state.result.lock().unwrap().clone().unwrap();
        assert_eq!(result.text, "P0 P1");
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn test_polisher_failure_is_nonfatal_warning() {
        let (source, _) = ScriptedSource::of(2);
        let (sink, state) = CollectingSink::new();

        run_to_completion(
            source,
            EchoEngine::new("w"),
            sink,
            Some(Box::new(BrokenPolisher)),
        )
        .unwrap();

        let result = state.result.lock().unwrap().clone().unwrap();
        assert_eq!(result.text, "w0 w1");
        assert_eq!(result.warnings.len(), 1);
        assert!(result.warnings[0].contains("polish"));
        assert_eq!(state.completions.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_slow_sink_backpressure_loses_nothing() {
        let (source, _) = ScriptedSource::of(60);
        let (sink, state) = CollectingSink::slow(Duration::from_millis(2));

        run_to_completion(source, EchoEngine::new("b"), sink, None).unwrap();

        let segments = state.segments.lock().unwrap();
        assert_eq!(segments.len(), 60);
        for (i, segment) in segments.iter().enumerate() {
            assert_eq!(segment.text, format!("b{i}"));
        }
    }

    #[test]
    fn test_concurrent_sessions_do_not_interleave() {
        let session_a = TranscriptionSession::new();
        let session_b = TranscriptionSession::new();
        let (source_a, _) = ScriptedSource::of(25);
        let (source_b, _) = ScriptedSource::of(25);
        let (sink_a, state_a) = CollectingSink::new();
        let (sink_b, state_b) = CollectingSink::new();

        session_a
            .start(
                source_a,
                EchoEngine::new("a"),
                sink_a,
                TranscriptionOptions::default(),
                "echo",
                None,
            )
            .unwrap();
        session_b
            .start(
                source_b,
                EchoEngine::new("b"),
                sink_b,
                TranscriptionOptions::default(),
                "echo",
                None,
            )
            .unwrap();

        session_a.join(None).unwrap();
        session_b.join(None).unwrap();

        let result_a = state_a.result.lock().unwrap().clone().unwrap();
        let result_b = state_b.result.lock().unwrap().clone().unwrap();
        assert!(result_a.text.split_whitespace().all(|w| w.starts_with('a')));
        assert!(result_b.text.split_whitespace().all(|w| w.starts_with('b')));
        assert_eq!(result_a.segments.len(), 25);
        assert_eq!(result_b.segments.len(), 25);
    }

    #[test]
    fn test_join_timeout_zero_reports_lingering_worker() {
        let session = TranscriptionSession::new();
        let (sink, _) = CollectingSink::new();
        session
            .start(
                Box::new(EndlessSource),
                EchoEngine::new("z"),
                sink,
                TranscriptionOptions::default(),
                "echo",
                None,
            )
            .unwrap();

        // Workers are still running; a zero deadline cannot reap them.
        session.join(Some(Duration::ZERO)).unwrap();
        let err = session
            .start(
                Box::new(EndlessSource),
                EchoEngine::new("z"),
                CollectingSink::new().0,
                TranscriptionOptions::default(),
                "echo",
                None,
            )
            .unwrap_err();
        assert!(matches!(err, SessionError::AlreadyRunning));

        session.stop();
        session.join(None).unwrap();
    }

    #[test]
    fn test_chunk_payload_matches_claimed_duration() {
        let c = chunk(3);
        assert_eq!(
            c.data().len(),
            pcm::ms_to_bytes(100, c.sample_rate(), c.channels())
        );
    }
}
