//! Error taxonomy.
//!
//! Only [`SessionError`] ends a session. Everything else is recovered where it
//! happens: malformed frames are dropped, handler failures are logged, stale
//! responses are ignored.

use std::io;

use crate::bridge::protocol::ActorId;

/// Fatal session errors, returned from `run()`.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The channel could not be established. Not retried: restarting is the
    /// supervisor's job.
    #[error("failed to connect to channel '{name}': {source}")]
    Connection {
        name: String,
        #[source]
        source: io::Error,
    },

    /// The channel broke mid-session.
    #[error("channel I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Non-value outcome of a suspended wait.
///
/// Not an error in the failure sense: a handler parked on a prompt must be
/// able to tell "the player answered" apart from "the player is gone".
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum WaitError {
    #[error("actor {0} was invalidated")]
    ActorInvalidated(ActorId),

    /// The session ended. Only waits with no owning actor see this.
    #[error("session closed")]
    SessionClosed,

    /// The game mode exited and the session stays open for the next load.
    /// Only waits with no owning actor see this.
    #[error("game mode exited")]
    GameModeExited,
}

/// Queuing an outbound action after the session has ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("session is not connected")]
pub struct SendError;

/// Result type returned by handler bodies.
pub type HandlerResult = anyhow::Result<()>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_error_names_the_channel() {
        let err = SessionError::Connection {
            name: "gamemode-bridge".to_string(),
            source: io::Error::new(io::ErrorKind::NotFound, "no such endpoint"),
        };
        assert_eq!(
            err.to_string(),
            "failed to connect to channel 'gamemode-bridge': no such endpoint"
        );
    }

    #[test]
    fn wait_error_messages() {
        assert_eq!(
            WaitError::ActorInvalidated(ActorId::new(2)).to_string(),
            "actor 2 was invalidated"
        );
        assert_eq!(WaitError::SessionClosed.to_string(), "session closed");
        assert_eq!(WaitError::GameModeExited.to_string(), "game mode exited");
    }

    #[test]
    fn wait_error_converts_into_handler_error() {
        fn handler() -> HandlerResult {
            Err(WaitError::SessionClosed)?
        }
        let err = handler().unwrap_err();
        assert!(err.downcast_ref::<WaitError>().is_some());
    }
}
