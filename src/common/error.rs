//! Error types for the bridge.

use thiserror::Error;

/// Configuration-related errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    IoError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {message}")]
    ParseError { message: String },

    #[error("Config validation failed: {message}")]
    ValidationError { message: String },

    #[error("Unknown message handler '{name}' in pipeline.{direction}")]
    UnknownHandler { name: String, direction: String },
}

/// Errors raised by a network adapter.
///
/// These never escape the per-event path: the core turns them into a
/// dropped side effect and a log line.
#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("{operation} rejected with status {status}: {message}")]
    Status {
        operation: &'static str,
        status: u16,
        message: String,
    },

    #[error("Unexpected response for {operation}: {message}")]
    InvalidResponse {
        operation: &'static str,
        message: String,
    },

    #[error("{0}")]
    Other(String),
}

/// Media relay failures. All of them drop the image event.
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("Failed to fetch '{locator}': {message}")]
    Fetch { locator: String, message: String },

    #[error("Failed to decode image: {0}")]
    Decode(#[source] image::ImageError),

    #[error("Failed to encode image: {0}")]
    Encode(#[source] image::ImageError),

    #[error("Image task failed: {0}")]
    Task(String),
}

/// Malformed inbound event.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EventError {
    #[error("{kind} event has an empty sender")]
    EmptySender { kind: &'static str },

    #[error("image locator '{locator}' is not a resolvable URL")]
    BadLocator { locator: String },
}

/// Fatal failures while bringing the bridge up.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("{step} failed: {source}")]
    Step {
        step: &'static str,
        #[source]
        source: AdapterError,
    },
}

impl StartupError {
    pub fn step(step: &'static str, source: AdapterError) -> Self {
        Self::Step { step, source }
    }
}

/// Result type alias for adapter operations.
pub type AdapterResult<T> = std::result::Result<T, AdapterError>;

/// Result type alias for media operations.
pub type MediaResult<T> = std::result::Result<T, MediaError>;
