//! Transformation oracle capability
//!
//! The controller only ever sees `generate(context) -> source`. Which model
//! sits behind it, and how it is reached, is not its concern.

pub mod gemini;
pub mod scripted;

use async_trait::async_trait;
use thiserror::Error;

pub use gemini::GeminiOracle;
pub use scripted::ScriptedOracle;

#[derive(Debug, Error)]
pub enum OracleError {
    #[error("no API key configured; set GEMINI_API_KEY or run `lazarus setup`")]
    MissingApiKey,
    #[error("request failed: {0}")]
    Transport(String),
    #[error("oracle returned HTTP {status}: {body}")]
    Http { status: u16, body: String },
    #[error("rate limited after {retries} retries")]
    RateLimited { retries: u32 },
    #[error("malformed oracle response: {0}")]
    MalformedResponse(String),
    #[error("oracle returned no candidate source")]
    EmptyCandidate,
}

impl From<reqwest::Error> for OracleError {
    fn from(err: reqwest::Error) -> Self {
        OracleError::Transport(err.to_string())
    }
}

/// Produces candidate source text from a textual context.
///
/// No correctness or latency guarantees; every answer is re-verified.
#[async_trait]
pub trait TransformationOracle: Send + Sync {
    async fn generate(&self, context: &str) -> Result<String, OracleError>;
}
