//! Wire protocol types for bridge-server communication.
//!
//! Two directions on one channel:
//! - **Events** (server → bridge): Initialized, Tick, player lifecycle, RCON,
//!   generic callbacks, correlated responses
//! - **Outbound actions** (bridge → server): Start handshake, native
//!   invocations, Shutdown

use serde::{Deserialize, Serialize};

/// Opaque handle of an entity living in the server process (a connected player).
///
/// Scoped to one session. The bridge never assumes the entity is still alive;
/// a disconnect invalidates every wait registered against the handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActorId(u32);

impl ActorId {
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    pub fn get(&self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for ActorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Single-use key linking a later `Response` event to the continuation awaiting it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationToken(u64);

impl CorrelationToken {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn get(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for CorrelationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Why a player left. Encoded as the server's numeric reason code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "u8", into = "u8")]
pub enum DisconnectReason {
    TimedOut,
    Quit,
    Kicked,
    Other(u8),
}

impl From<u8> for DisconnectReason {
    fn from(code: u8) -> Self {
        match code {
            0 => Self::TimedOut,
            1 => Self::Quit,
            2 => Self::Kicked,
            other => Self::Other(other),
        }
    }
}

impl From<DisconnectReason> for u8 {
    fn from(reason: DisconnectReason) -> Self {
        match reason {
            DisconnectReason::TimedOut => 0,
            DisconnectReason::Quit => 1,
            DisconnectReason::Kicked => 2,
            DisconnectReason::Other(code) => code,
        }
    }
}

impl std::fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TimedOut => f.write_str("timed out"),
            Self::Quit => f.write_str("quit"),
            Self::Kicked => f.write_str("kicked"),
            Self::Other(code) => write!(f, "code {}", code),
        }
    }
}

/// Events pushed by the server, in arrival order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// The game mode has been (re)loaded by the server.
    Initialized,

    /// The game mode is being unloaded.
    Exit,

    Tick,

    PlayerConnected {
        player: ActorId,
    },

    PlayerDisconnected {
        player: ActorId,
        reason: DisconnectReason,
    },

    RconCommand {
        command: String,
    },

    /// Any other server callback, forwarded by name.
    Callback {
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        player: Option<ActorId>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        args: Vec<serde_json::Value>,
    },

    /// Answer to a request that carried a correlation token.
    Response {
        token: CorrelationToken,
        #[serde(default)]
        result: serde_json::Value,
    },
}

/// Event discriminant used as the dispatcher's routing key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Initialized,
    Exit,
    Tick,
    PlayerConnected,
    PlayerDisconnected,
    RconCommand,
    Callback,
    Response,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initialized => "initialized",
            Self::Exit => "exit",
            Self::Tick => "tick",
            Self::PlayerConnected => "player_connected",
            Self::PlayerDisconnected => "player_disconnected",
            Self::RconCommand => "rcon_command",
            Self::Callback => "callback",
            Self::Response => "response",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Initialized => EventKind::Initialized,
            Self::Exit => EventKind::Exit,
            Self::Tick => EventKind::Tick,
            Self::PlayerConnected { .. } => EventKind::PlayerConnected,
            Self::PlayerDisconnected { .. } => EventKind::PlayerDisconnected,
            Self::RconCommand { .. } => EventKind::RconCommand,
            Self::Callback { .. } => EventKind::Callback,
            Self::Response { .. } => EventKind::Response,
        }
    }

    /// The actor this event is about, if any.
    pub fn actor(&self) -> Option<ActorId> {
        match self {
            Self::PlayerConnected { player } | Self::PlayerDisconnected { player, .. } => {
                Some(*player)
            }
            Self::Callback { player, .. } => *player,
            _ => None,
        }
    }
}

/// Actions sent from the bridge to the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundAction {
    /// Handshake, sent once right after the channel is established (must be first message).
    Start { protocol: u32, version: String },

    /// Invoke a native function in the server.
    ///
    /// When `reply_token` is set the server answers with a `Response` event
    /// carrying the same token and the native's return value.
    InvokeNative {
        name: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        args: Vec<serde_json::Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reply_token: Option<CorrelationToken>,
    },

    Shutdown,
}

impl OutboundAction {
    pub fn native(name: impl Into<String>, args: Vec<serde_json::Value>) -> Self {
        Self::InvokeNative {
            name: name.into(),
            args,
            reply_token: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn initialized_serializes() {
        insta::assert_json_snapshot!(Event::Initialized, @r#"
        {
          "type": "initialized"
        }
        "#);
    }

    #[test]
    fn player_disconnected_serializes_reason_code() {
        let event = Event::PlayerDisconnected {
            player: ActorId::new(3),
            reason: DisconnectReason::Kicked,
        };
        insta::assert_json_snapshot!(event, @r#"
        {
          "type": "player_disconnected",
          "player": 3,
          "reason": 2
        }
        "#);
    }

    #[test]
    fn callback_omits_empty_fields() {
        let event = Event::Callback {
            name: "OnPlayerSpawn".to_string(),
            player: None,
            args: vec![],
        };
        insta::assert_json_snapshot!(event, @r#"
        {
          "type": "callback",
          "name": "OnPlayerSpawn"
        }
        "#);
    }

    #[test]
    fn invoke_native_with_reply_token_serializes() {
        let action = OutboundAction::InvokeNative {
            name: "GetPlayerPos".to_string(),
            args: vec![json!(0)],
            reply_token: Some(CorrelationToken::new(7)),
        };
        insta::assert_json_snapshot!(action, @r#"
        {
          "type": "invoke_native",
          "name": "GetPlayerPos",
          "args": [
            0
          ],
          "reply_token": 7
        }
        "#);
    }

    #[test]
    fn shutdown_serializes() {
        insta::assert_json_snapshot!(OutboundAction::Shutdown, @r#"
        {
          "type": "shutdown"
        }
        "#);
    }

    #[test]
    fn response_without_result_defaults_to_null() {
        let event: Event = serde_json::from_value(json!({"type": "response", "token": 9})).unwrap();
        assert_eq!(
            event,
            Event::Response {
                token: CorrelationToken::new(9),
                result: serde_json::Value::Null,
            }
        );
    }

    #[test]
    fn unknown_reason_code_is_preserved() {
        let event: Event = serde_json::from_value(
            json!({"type": "player_disconnected", "player": 1, "reason": 42}),
        )
        .unwrap();
        match event {
            Event::PlayerDisconnected { reason, .. } => {
                assert_eq!(reason, DisconnectReason::Other(42));
                assert_eq!(u8::from(reason), 42);
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn event_actor_and_kind() {
        let event = Event::Callback {
            name: "OnPlayerCommandText".to_string(),
            player: Some(ActorId::new(4)),
            args: vec![json!("/help")],
        };
        assert_eq!(event.kind(), EventKind::Callback);
        assert_eq!(event.actor(), Some(ActorId::new(4)));
        assert_eq!(Event::Tick.actor(), None);
        assert_eq!(
            Event::PlayerConnected { player: ActorId::new(1) }.actor(),
            Some(ActorId::new(1))
        );
    }
}
