//! Errors surfaced by session collaborators and the live session view.

/// Errors that can occur while loading or watching a session.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SessionError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("HTTP {status} from {url}")]
    Http { status: u16, url: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("subscription failed: {0}")]
    Subscribe(String),

    #[error("session view closed")]
    Closed,
}

pub type Result<T> = core::result::Result<T, SessionError>;
