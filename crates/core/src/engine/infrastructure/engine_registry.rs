use std::collections::HashMap;

use crate::engine::domain::options::EngineConfig;
use crate::engine::domain::transcription_engine::{EngineError, TranscriptionEngine};

use super::whisper_engine::WhisperEngine;

pub type EngineConstructor =
    Box<dyn Fn(&EngineConfig) -> Result<Box<dyn TranscriptionEngine>, EngineError> + Send + Sync>;

/// Constructed-once map from engine kind to constructor.
///
/// Owned by whatever composes a session rather than living as a process
/// global, so tests and embedders can register their own kinds without
/// cross-talk.
#[derive(Default)]
pub struct EngineRegistry {
    constructors: HashMap<String, EngineConstructor>,
}

impl EngineRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-populated with the engines this crate ships.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register("whisper", |config| {
            let engine = WhisperEngine::new(config.clone())?;
            Ok(Box::new(engine) as Box<dyn TranscriptionEngine>)
        });
        registry
    }

    pub fn register<F>(&mut self, kind: impl Into<String>, constructor: F)
    where
        F: Fn(&EngineConfig) -> Result<Box<dyn TranscriptionEngine>, EngineError>
            + Send
            + Sync
            + 'static,
    {
        self.constructors.insert(kind.into(), Box::new(constructor));
    }

    pub fn create(
        &self,
        kind: &str,
        config: &EngineConfig,
    ) -> Result<Box<dyn TranscriptionEngine>, EngineError> {
        let constructor = self
            .constructors
            .get(kind)
            .ok_or_else(|| EngineError::UnknownKind(kind.to_string()))?;
        constructor(config)
    }

    /// Registered kinds in sorted order.
    pub fn kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.constructors.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        kinds
    }
}
