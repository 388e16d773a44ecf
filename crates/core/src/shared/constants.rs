/// Sample rate expected by the Whisper family of models.
pub const WHISPER_SAMPLE_RATE: u32 = 16000;

/// Bytes per sample for signed 16-bit little-endian PCM.
pub const SAMPLE_WIDTH_BYTES: usize = 2;

pub const WHISPER_MODEL_FILENAME: &str = "ggml-tiny.en.bin";
pub const WHISPER_MODEL_URL: &str =
    "https://huggingface.co/ggerganov/whisper.cpp/resolve/main/ggml-tiny.en.bin";
