use crate::harness::PollError;
use crate::oauth::OAuthError;
use crate::platform::PlatformError;
use common::ParseError;
use std::fmt;
use thiserror::Error;

/// Scenario-level failures
#[derive(Error, Debug)]
pub enum ConformanceError {
    #[error("Setup failed: {0}")]
    Setup(String),

    #[error("Platform error: {0}")]
    Platform(#[from] PlatformError),

    #[error("OAuth error: {0}")]
    OAuth(#[from] OAuthError),

    #[error("Property '{property}' failed: expected {expected}; {detail}")]
    Assertion {
        property: String,
        expected: String,
        detail: String,
    },

    #[error("Response format violated: {0}")]
    Format(#[from] ParseError),

    #[error("Teardown failed: {0}")]
    Teardown(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("HTTP client error: {0}")]
    Client(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ConformanceError {
    /// Shorthand for a failed property check
    pub fn assertion(
        property: impl Into<String>,
        expected: impl Into<String>,
        detail: impl Into<String>,
    ) -> Self {
        ConformanceError::Assertion {
            property: property.into(),
            expected: expected.into(),
            detail: detail.into(),
        }
    }
}

pub type ScenarioResult<T = ()> = Result<T, ConformanceError>;

/// Turns a polling failure into an assertion failure naming the property
pub trait PollResultExt<T> {
    fn property(self, property: &str, expected: impl Into<String>) -> ScenarioResult<T>;
}

impl<T, V: fmt::Debug> PollResultExt<T> for Result<T, PollError<V>> {
    fn property(self, property: &str, expected: impl Into<String>) -> ScenarioResult<T> {
        self.map_err(|e| ConformanceError::assertion(property, expected, e.to_string()))
    }
}
