//! Tracing initialisation.

use tracing::Subscriber;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{LogConfig, LogFormat, LogLevel};
use crate::server_log_layer::{ServerLogHandle, ServerLogLayer};

/// Filter used when `RUST_LOG` is not set.
pub fn default_filter(level: LogLevel) -> String {
    // Per-frame codec chatter stays off unless explicitly asked for.
    let codec = match level {
        LogLevel::Trace => "trace",
        _ => "off",
    };
    format!(
        "{level},gamemode_bridge::bridge::codec={codec}",
        level = level.as_str()
    )
}

/// Writer used when the caller does not supply one.
pub fn stderr_writer() -> BoxMakeWriter {
    BoxMakeWriter::new(std::io::stderr)
}

/// Compose the subscriber: `filter`, formatted output to `writer` (none when
/// `writer` is `None`), and the console layer if given.
pub fn build_subscriber(
    filter: EnvFilter,
    format: LogFormat,
    writer: Option<BoxMakeWriter>,
    server_layer: Option<ServerLogLayer>,
) -> impl Subscriber + Send + Sync + 'static {
    let fmt_layer: Option<Box<dyn Layer<Registry> + Send + Sync>> = writer.map(|writer| match format {
        LogFormat::Json => fmt::layer().json().with_writer(writer).boxed(),
        LogFormat::Text => fmt::layer().with_writer(writer).boxed(),
    });

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(filter)
        .with(server_layer)
}

/// Install the global subscriber: `RUST_LOG` if set, otherwise the configured
/// level; text or JSON on `writer`. With `redirect_console` the returned
/// handle must be attached to the session to forward lines to the server
/// console.
///
/// A second call is a no-op (the first subscriber stays installed).
pub fn init_tracing(
    config: &LogConfig,
    writer: Option<BoxMakeWriter>,
    redirect_console: bool,
) -> Option<ServerLogHandle> {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        EnvFilter::new(default_filter(config.level))
    };

    let (server_layer, handle) = if redirect_console {
        let (layer, handle) = ServerLogLayer::new();
        (Some(layer), Some(handle))
    } else {
        (None, None)
    };

    let _ = build_subscriber(filter, config.format, writer, server_layer).try_init();
    handle
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl Captured {
        fn text(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    impl io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn captured_writer() -> (Captured, BoxMakeWriter) {
        let captured = Captured::default();
        let sink = captured.clone();
        (captured, BoxMakeWriter::new(move || sink.clone()))
    }

    #[test]
    fn default_filter_follows_level() {
        assert_eq!(
            default_filter(LogLevel::Info),
            "info,gamemode_bridge::bridge::codec=off"
        );
        assert_eq!(
            default_filter(LogLevel::Trace),
            "trace,gamemode_bridge::bridge::codec=trace"
        );
    }

    #[test]
    fn default_filter_parses() {
        for level in [
            LogLevel::Trace,
            LogLevel::Debug,
            LogLevel::Info,
            LogLevel::Warn,
            LogLevel::Error,
        ] {
            assert!(EnvFilter::try_new(default_filter(level)).is_ok());
        }
    }

    #[test]
    fn custom_writer_receives_filtered_lines() {
        let (captured, writer) = captured_writer();
        let subscriber = build_subscriber(
            EnvFilter::new(default_filter(LogLevel::Info)),
            LogFormat::Text,
            Some(writer),
            None,
        );

        tracing::subscriber::with_default(subscriber, || {
            tracing::debug!("hidden");
            tracing::info!(player = 4, "Player connected");
        });

        let text = captured.text();
        assert!(text.contains("Player connected"));
        assert!(!text.contains("hidden"));
    }

    #[test]
    fn json_format_writes_one_object_per_line() {
        let (captured, writer) = captured_writer();
        let subscriber = build_subscriber(EnvFilter::new("info"), LogFormat::Json, Some(writer), None);

        tracing::subscriber::with_default(subscriber, || {
            tracing::info!("loaded");
        });

        let text = captured.text();
        let line: serde_json::Value = serde_json::from_str(text.trim()).unwrap();
        assert_eq!(line["fields"]["message"], "loaded");
    }

    #[test]
    fn no_writer_still_feeds_the_console() {
        let (layer, handle) = ServerLogLayer::new();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        handle.attach(tx);
        let subscriber = build_subscriber(EnvFilter::new("info"), LogFormat::Text, None, Some(layer));

        tracing::subscriber::with_default(subscriber, || {
            tracing::info!(target: "testmode", "to the console only");
        });

        assert!(rx.try_recv().is_ok());
    }
}
