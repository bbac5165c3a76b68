//! Tracing layer that mirrors log lines onto the server console.
//!
//! INFO-and-above events are shipped as `print` native invocations through
//! the session's outbound queue. The layer is installed before the session
//! exists, so it holds a [`ServerLogHandle`] the session attaches on start and
//! detaches on close; while detached, events are dropped.

use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::mpsc;
use tracing::{Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer};

use crate::bridge::protocol::OutboundAction;

/// Targets whose events never reach the console: they log while frames are
/// being written, so forwarding them would feed back into the channel.
const SUPPRESSED_TARGETS: &[&str] = &["gamemode_bridge::bridge", "gamemode_bridge::session"];

#[derive(Clone, Default)]
pub struct ServerLogHandle {
    tx: Arc<Mutex<Option<mpsc::UnboundedSender<OutboundAction>>>>,
}

impl ServerLogHandle {
    pub fn attach(&self, tx: mpsc::UnboundedSender<OutboundAction>) {
        *self.tx.lock().unwrap_or_else(PoisonError::into_inner) = Some(tx);
    }

    pub fn detach(&self) {
        self.tx.lock().unwrap_or_else(PoisonError::into_inner).take();
    }

    pub fn is_attached(&self) -> bool {
        self.tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    fn forward(&self, line: String) {
        let guard = self.tx.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(tx) = guard.as_ref() {
            let _ = tx.send(OutboundAction::native(
                "print",
                vec![serde_json::Value::String(line)],
            ));
        }
    }
}

pub struct ServerLogLayer {
    handle: ServerLogHandle,
}

impl ServerLogLayer {
    pub fn new() -> (Self, ServerLogHandle) {
        let handle = ServerLogHandle::default();
        (
            Self {
                handle: handle.clone(),
            },
            handle,
        )
    }

    fn format_line(level: &Level, message: &str) -> String {
        match *level {
            Level::ERROR => format!("[error] {message}"),
            Level::WARN => format!("[warn] {message}"),
            _ => message.to_string(),
        }
    }
}

impl<S> Layer<S> for ServerLogLayer
where
    S: Subscriber,
{
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        if *metadata.level() > Level::INFO {
            return;
        }
        let target = metadata.target();
        if SUPPRESSED_TARGETS
            .iter()
            .any(|prefix| target.starts_with(prefix))
        {
            return;
        }

        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);
        if visitor.message.is_empty() {
            return;
        }
        self.handle
            .forward(Self::format_line(metadata.level(), &visitor.message));
    }
}

#[derive(Default)]
struct MessageVisitor {
    message: String,
}

impl tracing::field::Visit for MessageVisitor {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{:?}", value);
            if self.message.starts_with('"') && self.message.ends_with('"') {
                self.message = self.message[1..self.message.len() - 1].to_string();
            }
        }
    }

    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tracing_subscriber::layer::SubscriberExt;

    fn drain(rx: &mut mpsc::UnboundedReceiver<OutboundAction>) -> Vec<OutboundAction> {
        let mut out = Vec::new();
        while let Ok(action) = rx.try_recv() {
            out.push(action);
        }
        out
    }

    #[test]
    fn forwards_info_and_above_while_attached() {
        let (layer, handle) = ServerLogLayer::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let subscriber = tracing_subscriber::registry().with(layer);

        tracing::subscriber::with_default(subscriber, || {
            tracing::info!("before attach");
            handle.attach(tx);
            tracing::debug!("too quiet");
            tracing::info!(player = 3, "The game mode has loaded.");
            tracing::warn!("Server is lagging");
            tracing::error!("Handler failed");
            handle.detach();
            tracing::info!("after detach");
        });

        assert_eq!(
            drain(&mut rx),
            vec![
                OutboundAction::native("print", vec![json!("The game mode has loaded.")]),
                OutboundAction::native("print", vec![json!("[warn] Server is lagging")]),
                OutboundAction::native("print", vec![json!("[error] Handler failed")]),
            ]
        );
        assert!(!handle.is_attached());
    }

    #[test]
    fn channel_targets_are_not_forwarded() {
        let (layer, handle) = ServerLogLayer::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        handle.attach(tx);
        let subscriber = tracing_subscriber::registry().with(layer);

        tracing::subscriber::with_default(subscriber, || {
            tracing::info!(target: "gamemode_bridge::bridge::codec", "frame written");
            tracing::warn!(target: "gamemode_bridge::session", "discarding malformed frame");
            tracing::info!(target: "testmode", "kept");
        });

        assert_eq!(
            drain(&mut rx),
            vec![OutboundAction::native("print", vec![json!("kept")])]
        );
    }
}
