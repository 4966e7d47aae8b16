//! Server-level error types.
//!
//! Request-level failures (unknown lobby, full roster, ...) are
//! [`lobby_types::LobbyError`]s and travel back to clients as `error` events.
//! `ServerError` covers what can go wrong around them: binding, the transport
//! and game registration.

use thiserror::Error;

/// Errors raised while setting up or running the server itself.
#[derive(Error, Debug)]
pub enum ServerError {
    /// Binding, accepting or handshake failures
    #[error("Network error: {0}")]
    Network(String),

    /// Two game modules were registered under the same id
    #[error("Game id registered twice: {0}")]
    DuplicateGame(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
