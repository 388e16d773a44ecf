pub mod options;
pub mod speech_detector;
pub mod transcription_engine;
