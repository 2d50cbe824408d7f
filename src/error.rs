//! Error taxonomy for building and consuming shared configuration links.

use thiserror::Error;

/// Errors surfaced to the UI layer.
///
/// Display strings are safe to show to the user; they never carry key
/// material or plaintext.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ShareError {
    /// No field was selected (or every selected field was empty).
    #[error("select at least one setting to share")]
    EmptySelection,

    /// Blank password on an outgoing share or a prompt submission.
    #[error("a password is required")]
    EmptyPassword,

    /// The fragment is present but does not decode into an envelope.
    #[error("this link is not a valid shared configuration: {0}")]
    MalformedEnvelope(String),

    /// Authentication tag check failed.
    #[error("incorrect password")]
    WrongPasswordOrCorrupted,

    /// Payload could not be turned into bytes or back. The detail is a
    /// short category, never payload content.
    #[error("unsupported or damaged shared configuration ({0})")]
    SerializationError(String),
}

impl ShareError {
    /// Whether the prompt loop should ask for another password.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ShareError::WrongPasswordOrCorrupted | ShareError::EmptyPassword
        )
    }
}

pub type Result<T> = std::result::Result<T, ShareError>;
