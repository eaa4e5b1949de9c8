//! Instance identity extraction
//!
//! The routing test app answers `Hello, <app> at index: <n>!`. Some builds
//! append status lines that repeat the marker, so only the last marker is
//! authoritative.

use std::fmt;
use thiserror::Error;

/// Marker preceding the instance index in a response body
pub const INDEX_MARKER: &str = "index: ";

/// Terminator following the instance index
pub const INDEX_TERMINATOR: char = '!';

/// Index of the backend replica that produced a response
///
/// Two responses reporting the same index are treated as coming from the
/// same instance. Nothing cross-checks this against a container identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceIndex(pub u32);

impl InstanceIndex {
    pub const fn get(self) -> u32 {
        self.0
    }
}

impl From<u32> for InstanceIndex {
    fn from(index: u32) -> Self {
        Self(index)
    }
}

impl fmt::Display for InstanceIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Response body does not follow the `index: <n>!` contract
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("marker {:?} not found in response body", INDEX_MARKER)]
    MissingMarker,

    #[error("no {:?} after the last {:?} marker", INDEX_TERMINATOR, INDEX_MARKER)]
    MissingTerminator,

    #[error("invalid instance index {text:?} (expected decimal digits)")]
    InvalidIndex { text: String },
}

/// Parse the instance index following the last marker in `body`
///
/// Only ASCII digits are accepted between marker and terminator. Signs,
/// whitespace and values that overflow `u32` are rejected rather than
/// defaulted, so a mis-parse can never look like index 0.
pub fn extract_index(body: &str) -> Result<InstanceIndex, ParseError> {
    let start = body
        .rfind(INDEX_MARKER)
        .ok_or(ParseError::MissingMarker)?
        + INDEX_MARKER.len();

    let rest = &body[start..];
    let end = rest
        .find(INDEX_TERMINATOR)
        .ok_or(ParseError::MissingTerminator)?;
    let digits = &rest[..end];

    let invalid = || ParseError::InvalidIndex {
        text: digits.to_string(),
    };

    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }

    digits.parse::<u32>().map(InstanceIndex).map_err(|_| invalid())
}

/// Readiness marker: the app is routable and answering
pub fn greeting(app: &str) -> String {
    format!("Hello, {}", app)
}

/// Greeting of a specific instance of `app`
pub fn greeting_at(app: &str, index: InstanceIndex) -> String {
    format!("Hello, {} at {}{}", app, INDEX_MARKER, index)
}
