//! Session: owns the channel and runs the event loop.
//!
//! One session per process. The loop reads a frame, decodes it, dispatches
//! it, runs woken handler bodies to quiescence and flushes the actions they
//! queued, then reads the next frame. Handler bodies therefore never observe
//! two frames at once, and actions reach the server in the order handlers
//! produced them.

use futures::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};

use crate::bridge::codec;
use crate::bridge::protocol::{Event, OutboundAction};
use crate::bridge::transport::{self, Channel, FrameReader, FrameWriter};
use crate::config::{BridgeConfig, ExitBehaviour};
use crate::dispatcher::Dispatcher;
use crate::error::SessionError;
use crate::scheduler::Scheduler;
use crate::server::Server;
use crate::server_log_layer::ServerLogHandle;
use crate::version;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Disconnected,
    Connected,
    ShuttingDown,
}

/// Why the event loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Close {
    /// A handler called `Server::shut_down`.
    Requested,
    /// The server unloaded the game mode.
    Exit,
    /// The server closed the channel.
    EndOfStream,
}

enum Incoming {
    Wake,
    Frame(Option<std::io::Result<tokio_util::bytes::BytesMut>>),
}

pub struct Session {
    name: String,
    max_frame_length: usize,
    state: SessionState,
    reader: FrameReader,
    writer: FrameWriter,
    scheduler: Scheduler,
    dispatcher: Dispatcher,
    outbound_tx: mpsc::UnboundedSender<OutboundAction>,
    outbound_rx: mpsc::UnboundedReceiver<OutboundAction>,
    exit_behaviour: ExitBehaviour,
    console: Option<ServerLogHandle>,
}

impl Session {
    /// Connect to the configured channel. Connection failures are returned,
    /// never retried.
    pub async fn connect(config: &BridgeConfig, dispatcher: Dispatcher) -> Result<Self, SessionError> {
        let channel = transport::connect(&config.pipe_name, config.max_frame_length)
            .await
            .map_err(|source| SessionError::Connection {
                name: config.pipe_name.clone(),
                source,
            })?;
        Ok(Self::from_channel(channel, dispatcher, config.exit_behaviour))
    }

    pub fn from_channel(channel: Channel, dispatcher: Dispatcher, exit_behaviour: ExitBehaviour) -> Self {
        let name = channel.name().to_string();
        let max_frame_length = channel.max_frame_length();
        let (reader, writer) = channel.into_parts();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        Self {
            name,
            max_frame_length,
            state: SessionState::Connected,
            reader,
            writer,
            scheduler: Scheduler::new(outbound_tx.clone()),
            dispatcher,
            outbound_tx,
            outbound_rx,
            exit_behaviour,
            console: None,
        }
    }

    /// Mirror INFO-and-above log lines to the server console while running.
    pub fn with_console(mut self, handle: ServerLogHandle) -> Self {
        self.console = Some(handle);
        self
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Handle on this session outside any handler.
    pub fn server(&self) -> Server {
        self.scheduler.server(None)
    }

    /// Run until shutdown is requested, the game mode exits, or the server
    /// closes the channel. Outstanding waits are resumed with a non-value
    /// outcome before this returns.
    pub async fn run(&mut self) -> Result<(), SessionError> {
        if self.state != SessionState::Connected {
            return Err(SessionError::Io(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "session already closed",
            )));
        }

        info!(channel = %self.name, "Session started");
        if let Some(console) = &self.console {
            console.attach(self.outbound_tx.clone());
        }

        let result = self.event_loop().await;
        let close = match &result {
            Ok(close) => Some(*close),
            Err(_) => None,
        };
        self.close(close).await;

        match result {
            Ok(close) => {
                info!(channel = %self.name, reason = ?close, "Session closed");
                Ok(())
            }
            Err(e) => {
                error!(channel = %self.name, error = %e, "Session failed");
                Err(e)
            }
        }
    }

    async fn event_loop(&mut self) -> Result<Close, SessionError> {
        self.write(version::start_action()).await?;
        SinkExt::<tokio_util::bytes::Bytes>::flush(&mut self.writer).await?;

        let ready = self.scheduler.ready_queue();
        loop {
            if self.scheduler.shutdown_requested() {
                return Ok(Close::Requested);
            }

            let incoming = tokio::select! {
                biased;
                _ = ready.notified() => Incoming::Wake,
                frame = self.reader.next() => Incoming::Frame(frame),
            };

            match incoming {
                Incoming::Wake => {
                    self.scheduler.run_until_stalled();
                }
                Incoming::Frame(Some(Ok(frame))) => {
                    if let Some(close) = self.handle_frame(&frame) {
                        self.flush().await?;
                        return Ok(close);
                    }
                }
                Incoming::Frame(Some(Err(e))) => {
                    return Err(SessionError::Io(e));
                }
                Incoming::Frame(None) => {
                    debug!("Server closed the channel");
                    return Ok(Close::EndOfStream);
                }
            }

            self.flush().await?;
        }
    }

    /// Decode and dispatch one frame, then run handlers to quiescence.
    fn handle_frame(&mut self, frame: &[u8]) -> Option<Close> {
        self.scheduler
            .set_clock(tokio::time::Instant::now().into_std());

        let event = match codec::decode_event(frame) {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, frame_len = frame.len(), "Discarding malformed frame");
                return None;
            }
        };
        trace!(kind = %event.kind(), actor = ?event.actor(), "Event received");

        let exit = matches!(event, Event::Exit);
        self.dispatcher.dispatch(event, &mut self.scheduler);
        self.scheduler.run_until_stalled();

        if !exit {
            return None;
        }
        match self.exit_behaviour {
            ExitBehaviour::ShutDown => Some(Close::Exit),
            ExitBehaviour::Restart => {
                let resumed = self.scheduler.invalidate_all();
                self.scheduler.run_until_stalled();
                info!(resumed, "Game mode exited, waiting for the next load");
                None
            }
        }
    }

    /// Write every queued action, then flush the transport once.
    async fn flush(&mut self) -> Result<(), SessionError> {
        let mut written = 0;
        while let Ok(action) = self.outbound_rx.try_recv() {
            self.write(action).await?;
            written += 1;
        }
        if written > 0 {
            SinkExt::<tokio_util::bytes::Bytes>::flush(&mut self.writer).await?;
            trace!(written, "Flushed outbound actions");
        }
        Ok(())
    }

    /// Queue one action on the writer. Actions that cannot be framed are
    /// dropped and logged; only transport failures are fatal.
    async fn write(&mut self, action: OutboundAction) -> Result<(), SessionError> {
        match codec::encode_action(&action) {
            Ok(bytes) if bytes.len() > self.max_frame_length => error!(
                frame_len = bytes.len(),
                max_frame_length = self.max_frame_length,
                "Dropping action larger than the frame limit"
            ),
            Ok(bytes) => self.writer.feed(bytes).await?,
            Err(e) => error!(error = %e, "Dropping action that failed to encode"),
        }
        Ok(())
    }

    /// Resume outstanding waits, give handlers one last chance to queue
    /// actions, and close the channel. Best effort: the server may be gone.
    async fn close(&mut self, close: Option<Close>) {
        self.state = SessionState::ShuttingDown;

        let resumed = self.scheduler.shutdown();
        debug!(resumed, "Outstanding waits resumed for shutdown");

        if let Some(console) = &self.console {
            console.detach();
        }

        if close.is_some() {
            if close == Some(Close::Requested) {
                let _ = self.outbound_tx.send(OutboundAction::Shutdown);
            }
            if let Err(e) = self.flush().await {
                debug!(error = %e, "Final flush failed");
            }
        } else {
            let mut dropped = 0;
            while self.outbound_rx.try_recv().is_ok() {
                dropped += 1;
            }
            if dropped > 0 {
                debug!(dropped, "Discarded actions queued after channel failure");
            }
        }
        if let Err(e) = SinkExt::<tokio_util::bytes::Bytes>::close(&mut self.writer).await {
            debug!(error = %e, "Closing the channel failed");
        }

        self.state = SessionState::Disconnected;
    }
}
