//! Error types with fix suggestions

use thiserror::Error;

/// Trait for errors that provide fix suggestions
pub trait FixSuggestion {
    fn fix_suggestion(&self) -> Option<&str>;
}

/// All error variants are part of the public API.
#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Template error: {0}")]
    Template(String),

    #[error("Invalid HTTP method: {0}")]
    InvalidMethod(String),

    #[error("Invalid URL '{url}': {details}")]
    InvalidUrl { url: String, details: String },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Session error: {0}")]
    Session(String),

    #[error("Callback error: {0}")]
    Callback(String),

    #[error("Batch file error: {0}")]
    Batch(String),

    #[error("CSV error: {0}")]
    Csv(String),

    #[error("YAML parse error: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<reqwest::Error> for QueueError {
    fn from(err: reqwest::Error) -> Self {
        QueueError::Transport(err.to_string())
    }
}

impl FixSuggestion for QueueError {
    fn fix_suggestion(&self) -> Option<&str> {
        match self {
            QueueError::Template(_) => {
                Some("Provide a value for every ${name} placeholder in the URL template")
            }
            QueueError::InvalidMethod(_) => {
                Some("Use one of: GET, POST, PUT, PATCH, DELETE, HEAD")
            }
            QueueError::InvalidUrl { .. } => {
                Some("Check the URL template resolves to an absolute http(s) URL")
            }
            QueueError::Transport(_) => Some("Check network connectivity and the target host"),
            QueueError::Session(_) => Some("Check the HTTP client configuration"),
            QueueError::Callback(_) => {
                Some("Known callbacks: to_json, to_text, log, pages, save_json, save_text, save_csv")
            }
            QueueError::Batch(_) => Some("Check the batch file against the documented schema"),
            QueueError::Csv(_) => {
                Some("CSV data must be a JSON array of uniform arrays or objects")
            }
            QueueError::YamlParse(_) => Some("Check YAML syntax: indentation and quoting"),
            QueueError::Json(_) => Some("Ensure the response body is valid JSON"),
            QueueError::Io(_) => Some("Check file path and permissions"),
        }
    }
}
