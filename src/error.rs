use thiserror::Error;

/// Failures surfaced by the runtime API.
///
/// Malformed payloads and unknown topics are deliberately absent: those
/// degrade to empty values or dropped routes instead of errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RuntimeError {
    #[error("virtual pin {0} out of range")]
    PinOutOfRange(usize),

    #[error("timer table full")]
    TimerTableFull,

    #[error("timer period must be greater than zero")]
    InvalidTimerPeriod,

    #[error("topic exceeds {} bytes", crate::MAX_TOPIC_LEN)]
    TopicTooLong,

    #[error("transport not connected")]
    NotConnected,

    #[error("publish to {0} failed")]
    PublishFailed(alloc::string::String),

    #[error("storage error: {0}")]
    Storage(alloc::string::String),

    #[error("configuration error: {0}")]
    Config(alloc::string::String),
}

pub type Result<T> = core::result::Result<T, RuntimeError>;
