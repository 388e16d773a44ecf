pub type PolishError = Box<dyn std::error::Error + Send + Sync>;

/// Optional post-processing applied to the normalized full text before the
/// final result is assembled (punctuation restoration, LLM cleanup, ...).
///
/// Absence is equivalent to the identity transform. A failing polisher is
/// non-fatal: the session keeps the unpolished text and records a warning.
pub trait TextPolisher: Send {
    fn polish(&self, text: &str) -> Result<String, PolishError>;
}
