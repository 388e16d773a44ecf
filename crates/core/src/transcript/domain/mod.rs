pub mod text_polisher;
pub mod transcript_segment;
pub mod transcript_sink;
pub mod transcription_result;
