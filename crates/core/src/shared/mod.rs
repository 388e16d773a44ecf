pub mod constants;
pub mod pcm;
