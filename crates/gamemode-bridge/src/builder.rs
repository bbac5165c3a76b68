//! Entry point for game-mode binaries.

use tracing_subscriber::fmt::writer::BoxMakeWriter;

use crate::config::{BridgeConfig, ExitBehaviour, LogFormat, LogLevel};
use crate::dispatcher::Dispatcher;
use crate::error::SessionError;
use crate::logging;
use crate::session::Session;
use crate::version::BRIDGE_VERSION;

/// A game mode registers its handlers once, before the session starts.
pub trait GameMode: 'static {
    fn register(&self, events: &mut Dispatcher);
}

impl<F> GameMode for F
where
    F: Fn(&mut Dispatcher) + 'static,
{
    fn register(&self, events: &mut Dispatcher) {
        self(events)
    }
}

/// Configures and runs a session.
///
/// ```no_run
/// # async fn run() -> Result<(), gamemode_bridge::SessionError> {
/// use gamemode_bridge::{Dispatcher, GameModeBuilder};
///
/// GameModeBuilder::from_env()
///     .redirect_console_output()
///     .use_game_mode(|events: &mut Dispatcher| {
///         events.on_initialized(|server| async move {
///             server.print("loaded")?;
///             Ok(())
///         });
///     })
///     .run()
///     .await
/// # }
/// ```
pub struct GameModeBuilder {
    config: BridgeConfig,
    log_writer: Option<BoxMakeWriter>,
    game_modes: Vec<Box<dyn GameMode>>,
}

impl Default for GameModeBuilder {
    fn default() -> Self {
        Self::with_config(BridgeConfig::default())
    }
}

impl GameModeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from [`BridgeConfig::from_env`].
    pub fn from_env() -> Self {
        Self::with_config(BridgeConfig::from_env())
    }

    pub fn with_config(config: BridgeConfig) -> Self {
        Self {
            config,
            log_writer: Some(logging::stderr_writer()),
            game_modes: Vec::new(),
        }
    }

    pub fn use_pipe(mut self, name: impl Into<String>) -> Self {
        self.config.pipe_name = name.into();
        self
    }

    pub fn redirect_console_output(mut self) -> Self {
        self.config.redirect_console_output = true;
        self
    }

    pub fn use_log_level(mut self, level: LogLevel) -> Self {
        self.config.log.level = level;
        self
    }

    pub fn use_log_format(mut self, format: LogFormat) -> Self {
        self.config.log.format = format;
        self
    }

    /// Write bridge log lines to `writer` instead of stderr. `None` disables
    /// them; console redirection is unaffected.
    pub fn use_log_writer(mut self, writer: Option<BoxMakeWriter>) -> Self {
        self.log_writer = writer;
        self
    }

    pub fn use_exit_behaviour(mut self, behaviour: ExitBehaviour) -> Self {
        self.config.exit_behaviour = behaviour;
        self
    }

    /// Add a game mode. Several may be added; their handlers run in the
    /// order the game modes were added.
    pub fn use_game_mode(mut self, game_mode: impl GameMode) -> Self {
        self.game_modes.push(Box::new(game_mode));
        self
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn build_dispatcher(&self) -> Dispatcher {
        let mut dispatcher = Dispatcher::new();
        for game_mode in &self.game_modes {
            game_mode.register(&mut dispatcher);
        }
        dispatcher
    }

    /// Initialise logging, connect, and run the session to completion.
    ///
    /// Must be driven on a current-thread runtime (handler futures are not
    /// `Send`).
    pub async fn run(mut self) -> Result<(), SessionError> {
        let console = logging::init_tracing(
            &self.config.log,
            self.log_writer.take(),
            self.config.redirect_console_output,
        );
        tracing::info!(
            version = BRIDGE_VERSION,
            channel = %self.config.pipe_name,
            "Starting game mode"
        );
        if self.game_modes.is_empty() {
            tracing::warn!("No game mode registered, events will be ignored");
        }

        let dispatcher = self.build_dispatcher();
        let mut session = Session::connect(&self.config, dispatcher).await?;
        if let Some(console) = console {
            session = session.with_console(console);
        }
        session.run().await
    }
}
