pub mod audio;
pub mod engine;
pub mod pipeline;
pub mod shared;
pub mod transcript;
