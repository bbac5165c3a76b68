//! gamemode-bridge: write game-server game modes as ordinary async Rust.
//!
//! The game server hosts a thin plugin that forwards its callbacks over a
//! local channel; this crate is the other end. Events arrive one at a time,
//! handler bodies run on a single-threaded scheduler and may suspend on
//! timers, native calls and player prompts, and every suspension is resumed
//! exactly once: with a value, or with an error when the player it belongs
//! to disconnects or the session ends.
//!
//! Start with [`GameModeBuilder`].

pub mod bridge;
pub mod builder;
pub mod commands;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod logging;
pub mod registry;
pub mod scheduler;
pub mod server;
pub mod server_log_layer;
pub mod session;
pub mod version;

pub use bridge::protocol::{ActorId, CorrelationToken, DisconnectReason, Event, EventKind, OutboundAction};
pub use builder::{GameMode, GameModeBuilder};
pub use commands::{CommandInvocation, CommandScope, CommandSource};
pub use config::{BridgeConfig, ExitBehaviour, LogConfig, LogFormat, LogLevel};
pub use dispatcher::{CallbackArgs, Dispatcher};
pub use error::{HandlerResult, SendError, SessionError, WaitError};
pub use server::Server;
pub use session::{Session, SessionState};
pub use version::{BRIDGE_VERSION, PROTOCOL_VERSION};
