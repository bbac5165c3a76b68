//! Version information sent in the Start handshake.

use crate::bridge::protocol::OutboundAction;

/// Bridge version from Cargo.toml
pub const BRIDGE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Wire protocol revision. Bumped on any incompatible change to the event or
/// action taxonomy.
pub const PROTOCOL_VERSION: u32 = 1;

/// The handshake action, always the first frame on a new channel.
pub fn start_action() -> OutboundAction {
    OutboundAction::Start {
        protocol: PROTOCOL_VERSION,
        version: BRIDGE_VERSION.to_string(),
    }
}
