//! IPC bridge for bridge-server communication.
//!
//! This module provides the wire protocol, codec and transport for the
//! channel between the game-mode process (us) and the game server.
//!
//! # Architecture
//!
//! - **protocol**: Message types (Event, OutboundAction, ActorId, CorrelationToken)
//! - **codec**: JSON payloads inside length-prefixed frames
//! - **transport**: Named channel endpoints and framed read/write halves

pub mod codec;
pub mod protocol;
pub mod transport;
