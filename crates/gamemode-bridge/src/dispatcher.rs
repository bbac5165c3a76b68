//! Event dispatcher.
//!
//! Routes each decoded event first to the registry (responses, disconnects,
//! timers), then to every handler registered for its kind, then to the
//! command router. Handler bodies are spawned on the scheduler in
//! registration order; the dispatcher itself never blocks.

use std::collections::HashMap;
use std::future::Future;
use std::rc::Rc;

use futures::FutureExt;
use futures::future::{self, LocalBoxFuture};
use serde_json::Value;

use crate::bridge::protocol::{ActorId, DisconnectReason, Event, EventKind};
use crate::commands::{CommandHandler, CommandInvocation, CommandRegistry, CommandScope};
use crate::error::HandlerResult;
use crate::scheduler::{Scheduler, TaskLabel};
use crate::server::Server;

pub type Handler = Rc<dyn Fn(Server, Event) -> LocalBoxFuture<'static, HandlerResult>>;

/// A named server callback as seen by its handler.
#[derive(Debug, Clone, PartialEq)]
pub struct CallbackArgs {
    pub name: String,
    pub player: Option<ActorId>,
    pub args: Vec<Value>,
}

fn skip() -> LocalBoxFuture<'static, HandlerResult> {
    future::ready(Ok(())).boxed_local()
}

#[derive(Default)]
pub struct Dispatcher {
    handlers: HashMap<EventKind, Vec<Handler>>,
    callbacks: HashMap<String, Vec<Handler>>,
    commands: CommandRegistry,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a raw handler for every event of `kind`.
    pub fn register(&mut self, kind: EventKind, handler: Handler) {
        self.handlers.entry(kind).or_default().push(handler);
    }

    pub fn on_initialized<F, Fut>(&mut self, f: F)
    where
        F: Fn(Server) -> Fut + 'static,
        Fut: Future<Output = HandlerResult> + 'static,
    {
        self.register(
            EventKind::Initialized,
            Rc::new(move |server, _| f(server).boxed_local()),
        );
    }

    pub fn on_exit<F, Fut>(&mut self, f: F)
    where
        F: Fn(Server) -> Fut + 'static,
        Fut: Future<Output = HandlerResult> + 'static,
    {
        self.register(
            EventKind::Exit,
            Rc::new(move |server, _| f(server).boxed_local()),
        );
    }

    pub fn on_tick<F, Fut>(&mut self, f: F)
    where
        F: Fn(Server) -> Fut + 'static,
        Fut: Future<Output = HandlerResult> + 'static,
    {
        self.register(
            EventKind::Tick,
            Rc::new(move |server, _| f(server).boxed_local()),
        );
    }

    pub fn on_player_connected<F, Fut>(&mut self, f: F)
    where
        F: Fn(Server, ActorId) -> Fut + 'static,
        Fut: Future<Output = HandlerResult> + 'static,
    {
        self.register(
            EventKind::PlayerConnected,
            Rc::new(move |server, event| match event {
                Event::PlayerConnected { player } => f(server, player).boxed_local(),
                _ => skip(),
            }),
        );
    }

    pub fn on_player_disconnected<F, Fut>(&mut self, f: F)
    where
        F: Fn(Server, ActorId, DisconnectReason) -> Fut + 'static,
        Fut: Future<Output = HandlerResult> + 'static,
    {
        self.register(
            EventKind::PlayerDisconnected,
            Rc::new(move |server, event| match event {
                Event::PlayerDisconnected { player, reason } => {
                    f(server, player, reason).boxed_local()
                }
                _ => skip(),
            }),
        );
    }

    pub fn on_rcon_command<F, Fut>(&mut self, f: F)
    where
        F: Fn(Server, String) -> Fut + 'static,
        Fut: Future<Output = HandlerResult> + 'static,
    {
        self.register(
            EventKind::RconCommand,
            Rc::new(move |server, event| match event {
                Event::RconCommand { command } => f(server, command).boxed_local(),
                _ => skip(),
            }),
        );
    }

    /// Handler for the server callback called `name` (exact match).
    pub fn on_callback<F, Fut>(&mut self, name: &str, f: F)
    where
        F: Fn(Server, CallbackArgs) -> Fut + 'static,
        Fut: Future<Output = HandlerResult> + 'static,
    {
        let handler: Handler = Rc::new(move |server, event| match event {
            Event::Callback { name, player, args } => {
                f(server, CallbackArgs { name, player, args }).boxed_local()
            }
            _ => skip(),
        });
        self.callbacks
            .entry(name.to_string())
            .or_default()
            .push(handler);
    }

    /// Handler for every server callback, whatever its name.
    pub fn on_any_callback<F, Fut>(&mut self, f: F)
    where
        F: Fn(Server, CallbackArgs) -> Fut + 'static,
        Fut: Future<Output = HandlerResult> + 'static,
    {
        self.register(
            EventKind::Callback,
            Rc::new(move |server, event| match event {
                Event::Callback { name, player, args } => {
                    f(server, CallbackArgs { name, player, args }).boxed_local()
                }
                _ => skip(),
            }),
        );
    }

    pub fn register_command<F, Fut>(&mut self, name: &str, scope: CommandScope, f: F)
    where
        F: Fn(Server, CommandInvocation) -> Fut + 'static,
        Fut: Future<Output = HandlerResult> + 'static,
    {
        let handler: CommandHandler =
            Rc::new(move |server, invocation| f(server, invocation).boxed_local());
        self.commands.register(name, scope, handler);
    }

    pub fn handler_count(&self, kind: EventKind) -> usize {
        self.handlers.get(&kind).map(Vec::len).unwrap_or(0)
    }

    pub fn commands(&self) -> &CommandRegistry {
        &self.commands
    }

    /// Route one event. Spawns handler tasks but does not poll them.
    pub fn dispatch(&self, event: Event, scheduler: &mut Scheduler) {
        let kind = event.kind();
        let actor = event.actor();

        match &event {
            Event::Tick => {
                let fired = scheduler.fire_timers();
                if fired > 0 {
                    tracing::trace!(fired, "Timers fired");
                }
            }
            Event::Response { token, result } => {
                if !scheduler.resolve(*token, result.clone()) {
                    tracing::debug!(%token, "Ignoring response with no pending wait");
                }
            }
            Event::PlayerConnected { player } => {
                if scheduler.revive(*player) {
                    tracing::warn!(%player, "Actor handle reused after disconnect");
                }
            }
            Event::PlayerDisconnected { player, reason } => {
                let resumed = scheduler.invalidate(*player);
                tracing::debug!(%player, %reason, resumed, "Actor invalidated");
            }
            _ => {}
        }

        let label = TaskLabel::new(kind, actor);
        for handler in self.handlers.get(&kind).into_iter().flatten() {
            let task = handler(scheduler.server(actor), event.clone());
            scheduler.spawn(label.clone(), task);
        }

        if let Event::Callback { name, .. } = &event {
            for handler in self.callbacks.get(name).into_iter().flatten() {
                let task = handler(scheduler.server(actor), event.clone());
                scheduler.spawn(label.clone().with_detail(name.clone()), task);
            }
        }

        if let Some((handler, invocation)) = self.commands.route(&event) {
            tracing::debug!(command = %invocation.name, source = ?invocation.source, "Command invoked");
            let label = label.with_detail(format!("command {}", invocation.name));
            let task = handler(scheduler.server(invocation.player()), invocation);
            scheduler.spawn(label, task);
        }
    }
}
