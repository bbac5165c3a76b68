//! Command routing for RCON input and player chat commands.
//!
//! A player command arrives as the `OnPlayerCommandText` callback whose first
//! argument is the raw text (`/name args...`). RCON commands arrive as plain
//! text without the slash. Names are matched case-insensitively.

use std::collections::HashMap;
use std::rc::Rc;
use std::str::{FromStr, SplitWhitespace};

use futures::future::LocalBoxFuture;

use crate::bridge::protocol::{ActorId, Event};
use crate::error::HandlerResult;
use crate::server::Server;

/// Callback name the server uses for player chat commands.
pub const PLAYER_COMMAND_CALLBACK: &str = "OnPlayerCommandText";

/// Who may invoke a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandScope {
    Player,
    Rcon,
    Any,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandSource {
    Rcon,
    Player(ActorId),
}

impl CommandScope {
    fn admits(self, source: CommandSource) -> bool {
        matches!(
            (self, source),
            (Self::Any, _) | (Self::Rcon, CommandSource::Rcon) | (Self::Player, CommandSource::Player(_))
        )
    }
}

/// A parsed command ready for its handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandInvocation {
    pub source: CommandSource,
    /// Lowercased command name, without the slash.
    pub name: String,
    /// Everything after the name, trimmed.
    pub args: String,
}

impl CommandInvocation {
    /// Parse raw command text. Player text must start with `/`.
    pub fn parse(text: &str, source: CommandSource) -> Option<Self> {
        let text = match source {
            CommandSource::Player(_) => text.trim_start().strip_prefix('/')?,
            CommandSource::Rcon => text,
        };
        let text = text.trim();
        let (name, args) = match text.split_once(char::is_whitespace) {
            Some((name, args)) => (name, args.trim()),
            None => (text, ""),
        };
        if name.is_empty() {
            return None;
        }
        Some(Self {
            source,
            name: name.to_lowercase(),
            args: args.to_string(),
        })
    }

    pub fn player(&self) -> Option<ActorId> {
        match self.source {
            CommandSource::Player(player) => Some(player),
            CommandSource::Rcon => None,
        }
    }

    pub fn words(&self) -> SplitWhitespace<'_> {
        self.args.split_whitespace()
    }

    /// Parse the `index`th whitespace-separated argument.
    pub fn arg<T: FromStr>(&self, index: usize) -> Option<T> {
        self.words().nth(index)?.parse().ok()
    }
}

pub type CommandHandler =
    Rc<dyn Fn(Server, CommandInvocation) -> LocalBoxFuture<'static, HandlerResult>>;

struct RegisteredCommand {
    scope: CommandScope,
    handler: CommandHandler,
}

#[derive(Default)]
pub struct CommandRegistry {
    commands: HashMap<String, RegisteredCommand>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: &str, scope: CommandScope, handler: CommandHandler) {
        let key = name.trim_start_matches('/').to_lowercase();
        if self
            .commands
            .insert(key.clone(), RegisteredCommand { scope, handler })
            .is_some()
        {
            tracing::warn!(command = %key, "Command registered twice, keeping the latest");
        }
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Find the handler for a command-bearing event, if any.
    pub fn route(&self, event: &Event) -> Option<(CommandHandler, CommandInvocation)> {
        let invocation = match event {
            Event::RconCommand { command } => {
                CommandInvocation::parse(command, CommandSource::Rcon)?
            }
            Event::Callback {
                name,
                player: Some(player),
                args,
            } if name == PLAYER_COMMAND_CALLBACK => {
                let text = args.first()?.as_str()?;
                CommandInvocation::parse(text, CommandSource::Player(*player))?
            }
            _ => return None,
        };

        let Some(command) = self.commands.get(&invocation.name) else {
            tracing::debug!(command = %invocation.name, "Unknown command");
            return None;
        };
        if !command.scope.admits(invocation.source) {
            tracing::debug!(
                command = %invocation.name,
                source = ?invocation.source,
                "Command not available from this source"
            );
            return None;
        }
        Some((Rc::clone(&command.handler), invocation))
    }
}
