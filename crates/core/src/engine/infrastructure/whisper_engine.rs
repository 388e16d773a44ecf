use std::path::{Path, PathBuf};

use whisper_rs::{FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters};

use crate::engine::domain::options::{sanitize_params, EngineConfig, TranscriptionOptions};
use crate::engine::domain::transcription_engine::{
    EngineError, EngineMetadata, TranscriptionEngine,
};
use crate::engine::infrastructure::energy_speech_detector::EnergySpeechDetector;
use crate::engine::infrastructure::model_resolver;
use crate::engine::infrastructure::stream_segmenter::{SegmenterConfig, StreamSegmenter};
use crate::shared::constants::{WHISPER_MODEL_FILENAME, WHISPER_MODEL_URL, WHISPER_SAMPLE_RATE};
use crate::shared::pcm;
use crate::transcript::domain::transcript_segment::TranscriptSegment;

/// Streaming transcription engine over whisper.cpp via whisper-rs.
///
/// Audio pushed in must be 16 kHz mono s16le, the format the Whisper family
/// expects. Incoming bytes accumulate in a `StreamSegmenter`; each push
/// runs one windowing round, so segments appear as soon as an utterance
/// boundary clears the processing threshold, and `flush` drains the rest.
///
/// The model context is loaded lazily on the first `start`, which runs on
/// the recognition worker thread, keeping the expensive load off the
/// orchestrator's control path.
pub struct WhisperEngine {
    config: EngineConfig,
    model_path: PathBuf,
    context: Option<WhisperContext>,
    segmenter: StreamSegmenter,
    pending: Vec<TranscriptSegment>,
    options: TranscriptionOptions,
    started: bool,
}

impl WhisperEngine {
    pub fn new(mut config: EngineConfig) -> Result<Self, EngineError> {
        config.params = sanitize_params(std::mem::take(&mut config.params));
        let model_path = resolve_model(&config)?;
        let segmenter_config = SegmenterConfig::for_stream(WHISPER_SAMPLE_RATE, 1);
        Ok(Self {
            config,
            model_path,
            context: None,
            segmenter: StreamSegmenter::new(
                segmenter_config,
                Box::new(EnergySpeechDetector::default()),
            ),
            pending: Vec::new(),
            options: TranscriptionOptions::default(),
            started: false,
        })
    }

    pub fn model_path(&self) -> &Path {
        &self.model_path
    }

    fn run_rounds(&mut self, force: bool) -> Result<(), EngineError> {
        let context = self.context.as_ref().ok_or(EngineError::NotStarted)?;
        let options = &self.options;
        loop {
            let before = self.segmenter.buffered_bytes();
            let segments = self
                .segmenter
                .process(force, |pcm| run_model(context, options, pcm))?;
            self.pending.extend(segments);
            // A non-forced push processes at most one round; a flush keeps
            // going until the buffer is drained or stops shrinking.
            if !force || self.segmenter.is_empty() || self.segmenter.buffered_bytes() == before {
                return Ok(());
            }
        }
    }
}

impl TranscriptionEngine for WhisperEngine {
    fn start(&mut self, options: &TranscriptionOptions) -> Result<(), EngineError> {
        if self.context.is_none() {
            let path = self
                .model_path
                .to_str()
                .ok_or_else(|| EngineError::ModelLoad("invalid model path".to_string()))?;
            let context =
                WhisperContext::new_with_params(path, WhisperContextParameters::default())
                    .map_err(|e| EngineError::ModelLoad(e.to_string()))?;
            log::info!("loaded whisper model from {}", self.model_path.display());
            self.context = Some(context);
        }
        let mut options = options.clone();
        options.params = sanitize_params(options.params);
        self.options = options;
        self.segmenter.reset();
        self.pending.clear();
        self.started = true;
        Ok(())
    }

    fn push_audio(&mut self, pcm: &[u8], _timestamp_ms: u64) -> Result<(), EngineError> {
        if !self.started {
            return Err(EngineError::NotStarted);
        }
        if let Some(max) = self.options.max_duration {
            if self.segmenter.stream_offset() >= max {
                log::debug!("max duration {max:.1}s reached, ignoring further audio");
                return Ok(());
            }
        }
        self.segmenter.push(pcm);
        self.run_rounds(false)
    }

    fn flush(&mut self) -> Result<(), EngineError> {
        if !self.started {
            return Err(EngineError::NotStarted);
        }
        self.run_rounds(true)
    }

    fn poll_segments(&mut self) -> Vec<TranscriptSegment> {
        std::mem::take(&mut self.pending)
    }

    fn metadata(&self) -> EngineMetadata {
        let model = self
            .model_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "unknown".to_string());
        EngineMetadata {
            engine: "whisper".to_string(),
            model,
            device: self.config.device.as_str().to_string(),
            precision: self.config.precision.as_str().to_string(),
        }
    }
}

/// Resolves the configured model identifier to a file on disk: a direct
/// path wins; otherwise the cache is consulted, downloading only when a
/// URL is known (a `model_url` parameter, or the bundled default for the
/// stock model name).
fn resolve_model(config: &EngineConfig) -> Result<PathBuf, EngineError> {
    let direct = Path::new(&config.model);
    if direct.exists() {
        return Ok(direct.to_path_buf());
    }
    let url = config
        .params
        .get("model_url")
        .map(String::as_str)
        .or((config.model == WHISPER_MODEL_FILENAME).then_some(WHISPER_MODEL_URL));
    model_resolver::resolve(&config.model, url, config.cache_dir.as_deref(), None).map_err(|e| {
        match e {
            model_resolver::ModelResolveError::NotCached(name) => EngineError::ModelNotFound(name),
            other => EngineError::ModelLoad(other.to_string()),
        }
    })
}

fn run_model(
    context: &WhisperContext,
    options: &TranscriptionOptions,
    pcm: &[u8],
) -> Result<Vec<TranscriptSegment>, EngineError> {
    let samples = pcm::to_mono_f32(pcm, 1);
    if samples.is_empty() {
        return Ok(Vec::new());
    }

    let mut state = context
        .create_state()
        .map_err(|e| EngineError::Inference(format!("failed to create state: {e}")))?;

    let strategy = match options.beam_size {
        Some(beam) if beam > 1 => SamplingStrategy::BeamSearch {
            beam_size: beam as i32,
            patience: -1.0,
        },
        _ => SamplingStrategy::Greedy { best_of: 0 },
    };
    let mut params = FullParams::new(strategy);
    params.set_language(options.language.as_deref());
    params.set_translate(false);
    params.set_token_timestamps(true);
    params.set_print_special(false);
    params.set_print_progress(false);
    params.set_print_realtime(false);
    params.set_print_timestamps(false);
    params.set_n_threads(num_cpus().min(4) as i32);
    if let Some(temperature) = options.temperature {
        params.set_temperature(temperature);
    }
    if let Some(ref prompt) = options.initial_prompt {
        params.set_initial_prompt(prompt);
    }

    state
        .full(params, &samples)
        .map_err(|e| EngineError::Inference(e.to_string()))?;

    let language = options
        .language
        .clone()
        .unwrap_or_else(|| "auto".to_string());

    let mut segments = Vec::new();
    let num_segments = state.full_n_segments();

    for seg_idx in 0..num_segments {
        let segment = match state.get_segment(seg_idx) {
            Some(s) => s,
            None => continue,
        };

        let mut text = String::new();
        let mut start_time: Option<f64> = None;
        let mut end_time: Option<f64> = None;
        let mut prob_sum = 0.0f32;
        let mut prob_count = 0u32;

        let n_tokens = segment.n_tokens();
        for tok_idx in 0..n_tokens {
            let token = match segment.get_token(tok_idx) {
                Some(t) => t,
                None => continue,
            };

            let piece = match token.to_str() {
                Ok(t) => t,
                Err(_) => continue,
            };

            // Skip special tokens ([_BEG_], <|endoftext|>, ...)
            let trimmed = piece.trim();
            if trimmed.is_empty() || trimmed.starts_with('[') || trimmed.starts_with('<') {
                continue;
            }

            let token_data = token.token_data();
            // Token timestamps are in centiseconds (10ms units)
            let t0 = token_data.t0 as f64 / 100.0;
            let t1 = token_data.t1 as f64 / 100.0;
            if t1 > t0 {
                start_time.get_or_insert(t0);
                end_time = Some(end_time.map_or(t1, |e: f64| e.max(t1)));
            }

            text.push_str(piece);
            prob_sum += token.token_probability();
            prob_count += 1;
        }

        let text = text.trim().to_string();
        let (Some(start), Some(end)) = (start_time, end_time) else {
            continue;
        };
        if text.is_empty() {
            continue;
        }

        let confidence = if prob_count > 0 {
            prob_sum / prob_count as f32
        } else {
            0.0
        };
        segments.push(TranscriptSegment::new(
            text,
            start,
            end,
            language.clone(),
            confidence,
        ));
    }

    Ok(segments)
}

fn num_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}
