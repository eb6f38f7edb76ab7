//! Backend error types.

use thiserror::Error;

/// The backend operation that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendPhase {
    Image,
    Create,
    Start,
    Stop,
    Remove,
    List,
    Inspect,
}

impl BackendPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendPhase::Image => "image",
            BackendPhase::Create => "create",
            BackendPhase::Start => "start",
            BackendPhase::Stop => "stop",
            BackendPhase::Remove => "remove",
            BackendPhase::List => "list",
            BackendPhase::Inspect => "inspect",
        }
    }
}

impl std::fmt::Display for BackendPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failed execution-backend call, tagged with the phase it failed in.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{phase} failed: {message}")]
pub struct BackendError {
    pub phase: BackendPhase,
    pub message: String,
}

impl BackendError {
    pub fn new(phase: BackendPhase, message: impl Into<String>) -> Self {
        Self {
            phase,
            message: message.into(),
        }
    }
}

pub type BackendResult<T> = Result<T, BackendError>;
