pub mod transcription_session;
