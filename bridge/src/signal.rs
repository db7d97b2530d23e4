//! Interpretation of the client's opening bytes.
//!
//! The trigger is advisory: whatever arrives, a capture cycle follows.  The
//! classification only decides how the request is logged.

/// What the client sent before waiting for its frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerSignal {
    /// Starts with the configured trigger text.
    Recognized,
    /// Nothing, or only whitespace / a bare newline.
    Empty,
    /// Anything else; logged and serviced anyway.
    Unexpected(String),
}

impl TriggerSignal {
    pub fn interpret(data: &[u8], expected: &str) -> Self {
        let text = String::from_utf8_lossy(data);
        let text = text.trim();
        if text.is_empty() {
            Self::Empty
        } else if text.starts_with(expected) {
            Self::Recognized
        } else {
            Self::Unexpected(text.to_string())
        }
    }
}
