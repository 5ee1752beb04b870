//! Error types for mock resolution and rendering.

use serde_json::{json, Value};
use std::path::PathBuf;

/// Errors raised while turning a call into mock responses.
#[derive(Debug, thiserror::Error)]
pub enum MockError {
    /// The handler identity cannot be mapped onto the mock store.
    #[error("invalid handler identity `{0}`")]
    InvalidHandler(String),

    /// Neither the exact mock file nor any fallback resolved.
    #[error("No suitable mock file was found for {}", .0.display())]
    MockNotFound(PathBuf),

    /// The mock file resolved but could not be read.
    #[error("failed to read mock file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Template compilation or evaluation failed.
    #[error("failed to render mock template: {0}")]
    Render(String),

    /// The rendered text is not the JSON shape the call expects.
    #[error("invalid mock response ({reason}): {text}")]
    Decode { reason: String, text: String },
}

impl MockError {
    pub(crate) fn decode(reason: impl Into<String>, text: &str) -> Self {
        MockError::Decode {
            reason: reason.into(),
            text: text.to_string(),
        }
    }

    /// Payload delivered to the caller in place of a mock response.
    pub fn to_payload(&self) -> Value {
        json!({ "error": self.to_string() })
    }

    /// Whether this error means no mock exists, as opposed to a broken one.
    pub fn is_not_found(&self) -> bool {
        matches!(self, MockError::MockNotFound(_))
    }
}
