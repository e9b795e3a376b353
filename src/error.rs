use thiserror::Error;

/// Failure taxonomy of the push channel. Expected failures are reported
/// through the error callback, never thrown across the public boundary.
#[derive(Debug, Clone, Error)]
pub enum PushError {
    #[error("connection failed: {0}")]
    Connect(String),

    #[error("reconnection gave up after {attempts} attempts")]
    ReconnectExhausted { attempts: u32 },

    #[error("invoke of {command} failed: {reason}")]
    Invoke { command: String, reason: String },
}

/// Problems while normalizing a push frame. Frames that cannot be
/// normalized are logged and dropped by the caller.
#[derive(Debug, Clone, Error)]
pub enum DecodeError {
    #[error("frame is not valid JSON: {0}")]
    Malformed(String),

    #[error("frame has no event name")]
    MissingEventName,

    #[error("unknown event {0:?}")]
    UnknownEvent(String),

    #[error("{event} payload carries no point identifier")]
    MissingPoint { event: &'static str },

    #[error("{event} payload is missing {field}")]
    MissingField { event: &'static str, field: &'static str },
}
