use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum OptionsError {
    #[error("beam size must be at least 1, got {0}")]
    InvalidBeamSize(u32),
    #[error("temperature must be within 0.0..=2.0, got {0}")]
    InvalidTemperature(f32),
    #[error("max duration must be positive, got {0}")]
    InvalidMaxDuration(f64),
    #[error("unknown device: {0}")]
    UnknownDevice(String),
    #[error("unknown precision: {0}")]
    UnknownPrecision(String),
}

/// Per-session transcription settings.
#[derive(Clone, Debug, Default)]
pub struct TranscriptionOptions {
    /// Target language tag (e.g. "en"); `None` lets the engine detect.
    pub language: Option<String>,
    /// Optional cap on transcribed duration in seconds.
    pub max_duration: Option<f64>,
    /// Beam width for decoding; ≥ 1 when set.
    pub beam_size: Option<u32>,
    /// Sampling temperature; 0.0..=2.0 when set.
    pub temperature: Option<f32>,
    /// Text prepended to bias decoding.
    pub initial_prompt: Option<String>,
    /// Free-form engine parameters; blank keys and values are stripped.
    pub params: HashMap<String, String>,
}

impl TranscriptionOptions {
    pub fn validate(&self) -> Result<(), OptionsError> {
        if let Some(beam) = self.beam_size {
            if beam < 1 {
                return Err(OptionsError::InvalidBeamSize(beam));
            }
        }
        if let Some(temp) = self.temperature {
            if !(0.0..=2.0).contains(&temp) {
                return Err(OptionsError::InvalidTemperature(temp));
            }
        }
        if let Some(max) = self.max_duration {
            if max <= 0.0 {
                return Err(OptionsError::InvalidMaxDuration(max));
            }
        }
        Ok(())
    }
}

/// Inference device selector.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Device {
    #[default]
    Auto,
    Cpu,
    Cuda,
}

impl Device {
    pub fn as_str(&self) -> &'static str {
        match self {
            Device::Auto => "auto",
            Device::Cpu => "cpu",
            Device::Cuda => "cuda",
        }
    }
}

impl FromStr for Device {
    type Err = OptionsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(Device::Auto),
            "cpu" => Ok(Device::Cpu),
            "cuda" => Ok(Device::Cuda),
            other => Err(OptionsError::UnknownDevice(other.to_string())),
        }
    }
}

/// Numeric precision the model runs at.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Precision {
    #[default]
    Float32,
    Float16,
    Int8,
}

impl Precision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Precision::Float32 => "float32",
            Precision::Float16 => "float16",
            Precision::Int8 => "int8",
        }
    }
}

impl FromStr for Precision {
    type Err = OptionsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "float32" | "fp32" => Ok(Precision::Float32),
            "float16" | "fp16" => Ok(Precision::Float16),
            "int8" => Ok(Precision::Int8),
            other => Err(OptionsError::UnknownPrecision(other.to_string())),
        }
    }
}

/// How a concrete engine instance is built.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Model identifier: a filesystem path or a resolvable model name.
    pub model: String,
    pub device: Device,
    pub precision: Precision,
    /// Overrides the platform model cache location.
    pub cache_dir: Option<PathBuf>,
    /// Free-form engine parameters; blank keys and values are stripped.
    pub params: HashMap<String, String>,
}

impl EngineConfig {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            device: Device::default(),
            precision: Precision::default(),
            cache_dir: None,
            params: HashMap::new(),
        }
    }
}

/// Drops entries whose key or value is empty or whitespace-only.
pub fn sanitize_params(params: HashMap<String, String>) -> HashMap<String, String> {
    params
        .into_iter()
        .filter(|(k, v)| !k.trim().is_empty() && !v.trim().is_empty())
        .collect()
}
