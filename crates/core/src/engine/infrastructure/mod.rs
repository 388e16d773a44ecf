pub mod energy_speech_detector;
pub mod engine_registry;
pub mod model_resolver;
pub mod pcm_buffer;
pub mod stream_segmenter;
pub mod whisper_engine;
