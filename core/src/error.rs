use thiserror::Error;

/// Failures that surface to the caller of the engine.
///
/// Recoverable conditions never appear here: malformed frames are skipped by
/// the decoder, heuristic ambiguity defaults to a `result` step, approval
/// timeouts resolve as synthetic rejections, and summary failures fall back
/// to a transcript-derived message.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("stream transport failed: {source}")]
    Stream {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    #[error("authentication rejected")]
    Unauthorized,
    #[error("session store failed: {message}")]
    Store { message: String },
}

impl EngineError {
    pub(crate) fn stream(source: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Stream {
            source: Box::new(source),
        }
    }

    /// For store implementations wrapping their backend failures.
    pub fn store(message: impl Into<String>) -> Self {
        Self::Store {
            message: message.into(),
        }
    }
}

/// External summarizer failure. Always recovered by the caller.
#[derive(Debug, Error)]
#[error("summary generation failed: {0}")]
pub struct SummaryError(pub String);
