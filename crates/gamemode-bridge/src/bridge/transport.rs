//! Byte-stream channel to the server process.
//!
//! Platform-specific endpoints for a channel name:
//! - **Path**: filesystem socket (any name containing `/`, and the default on non-Linux Unix)
//! - **Abstract**: Linux abstract namespace (no filesystem, auto-cleanup)
//! - **Pipe**: Windows named pipe `\\.\pipe\<name>`
//!
//! The channel only knows about frames; it never looks inside them.

use std::io;
#[cfg(unix)]
use std::path::PathBuf;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{FramedRead, FramedWrite, LengthDelimitedCodec};

use super::codec::frame_codec;

pub type FrameReader = FramedRead<Box<dyn AsyncRead + Unpin + Send>, LengthDelimitedCodec>;
pub type FrameWriter = FramedWrite<Box<dyn AsyncWrite + Unpin + Send>, LengthDelimitedCodec>;

/// Where a channel name points to on this platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    #[cfg(unix)]
    Path(PathBuf),
    #[cfg(target_os = "linux")]
    Abstract(String),
    #[cfg(windows)]
    Pipe(String),
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            #[cfg(unix)]
            Self::Path(path) => write!(f, "{}", path.display()),
            #[cfg(target_os = "linux")]
            Self::Abstract(name) => write!(f, "@{}", name),
            #[cfg(windows)]
            Self::Pipe(path) => f.write_str(path),
        }
    }
}

/// Resolve a channel name using the platform default.
pub fn resolve_endpoint(name: &str) -> Endpoint {
    #[cfg(unix)]
    {
        if name.contains('/') {
            return Endpoint::Path(PathBuf::from(name));
        }

        #[cfg(target_os = "linux")]
        {
            Endpoint::Abstract(name.to_string())
        }

        #[cfg(not(target_os = "linux"))]
        {
            Endpoint::Path(std::env::temp_dir().join(format!("{}.sock", name)))
        }
    }

    #[cfg(windows)]
    {
        Endpoint::Pipe(format!(r"\\.\pipe\{}", name))
    }
}

/// A connected, framed channel to the server.
pub struct Channel {
    name: String,
    max_frame_length: usize,
    reader: FrameReader,
    writer: FrameWriter,
}

impl Channel {
    /// Wrap any bidirectional byte stream (sockets, pipes, in-memory duplex).
    pub fn from_stream<S>(name: impl Into<String>, stream: S, max_frame_length: usize) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        Self::from_halves(name, read_half, write_half, max_frame_length)
    }

    pub fn from_halves<R, W>(
        name: impl Into<String>,
        reader: R,
        writer: W,
        max_frame_length: usize,
    ) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let reader: Box<dyn AsyncRead + Unpin + Send> = Box::new(reader);
        let writer: Box<dyn AsyncWrite + Unpin + Send> = Box::new(writer);
        Self {
            name: name.into(),
            max_frame_length,
            reader: FramedRead::new(reader, frame_codec(max_frame_length)),
            writer: FramedWrite::new(writer, frame_codec(max_frame_length)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Largest frame accepted in either direction.
    pub fn max_frame_length(&self) -> usize {
        self.max_frame_length
    }

    /// Returns the read and write halves for independent use.
    pub fn into_parts(self) -> (FrameReader, FrameWriter) {
        (self.reader, self.writer)
    }
}

/// Connect to the server listening on the endpoint for `name`.
pub async fn connect(name: &str, max_frame_length: usize) -> io::Result<Channel> {
    let endpoint = resolve_endpoint(name);
    tracing::debug!(%endpoint, "Connecting to server channel");

    match endpoint {
        #[cfg(unix)]
        Endpoint::Path(path) => {
            let stream = tokio::net::UnixStream::connect(&path).await?;
            let (read_half, write_half) = stream.into_split();
            Ok(Channel::from_halves(
                name,
                read_half,
                write_half,
                max_frame_length,
            ))
        }
        #[cfg(target_os = "linux")]
        Endpoint::Abstract(abstract_name) => {
            use std::os::linux::net::SocketAddrExt;
            use std::os::unix::net::SocketAddr;

            let addr = SocketAddr::from_abstract_name(abstract_name.as_bytes())?;
            // tokio doesn't support abstract sockets directly
            let std_stream = std::os::unix::net::UnixStream::connect_addr(&addr)?;
            std_stream.set_nonblocking(true)?;
            let stream = tokio::net::UnixStream::from_std(std_stream)?;
            let (read_half, write_half) = stream.into_split();
            Ok(Channel::from_halves(
                name,
                read_half,
                write_half,
                max_frame_length,
            ))
        }
        #[cfg(windows)]
        Endpoint::Pipe(path) => {
            use tokio::net::windows::named_pipe::ClientOptions;

            let client = ClientOptions::new().open(&path)?;
            Ok(Channel::from_stream(name, client, max_frame_length))
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::bridge::codec::DEFAULT_MAX_FRAME_LENGTH;
    use futures::{SinkExt, StreamExt};
    use tokio_util::bytes::Bytes;

    #[test]
    fn name_with_slash_is_a_path() {
        assert_eq!(
            resolve_endpoint("/run/game/bridge.sock"),
            Endpoint::Path(PathBuf::from("/run/game/bridge.sock"))
        );
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn bare_name_is_abstract_on_linux() {
        let endpoint = resolve_endpoint("gamemode-bridge");
        assert_eq!(endpoint, Endpoint::Abstract("gamemode-bridge".to_string()));
        assert_eq!(endpoint.to_string(), "@gamemode-bridge");
    }

    #[tokio::test]
    async fn connect_to_missing_socket_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nobody-home.sock");
        let result = connect(path.to_str().unwrap(), DEFAULT_MAX_FRAME_LENGTH).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn connect_exchanges_frames_over_filesystem_socket() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bridge.sock");
        let listener = tokio::net::UnixListener::bind(&path).unwrap();

        let channel = connect(path.to_str().unwrap(), DEFAULT_MAX_FRAME_LENGTH)
            .await
            .unwrap();
        let (server_stream, _) = listener.accept().await.unwrap();
        let (mut server_reader, mut server_writer) =
            Channel::from_stream("server", server_stream, DEFAULT_MAX_FRAME_LENGTH).into_parts();

        let (mut reader, mut writer) = channel.into_parts();
        writer.send(Bytes::from_static(b"hello")).await.unwrap();

        let frame = server_reader.next().await.unwrap().unwrap();
        assert_eq!(&frame[..], b"hello");

        server_writer.send(Bytes::from_static(b"world")).await.unwrap();
        let frame = reader.next().await.unwrap().unwrap();
        assert_eq!(&frame[..], b"world");
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn connect_over_abstract_socket() {
        use std::os::linux::net::SocketAddrExt;
        use std::os::unix::net::{SocketAddr, UnixListener as StdUnixListener};

        let name = format!("gamemode-bridge-test-{}", std::process::id());
        let addr = SocketAddr::from_abstract_name(name.as_bytes()).unwrap();
        let std_listener = StdUnixListener::bind_addr(&addr).unwrap();
        std_listener.set_nonblocking(true).unwrap();
        let listener = tokio::net::UnixListener::from_std(std_listener).unwrap();

        let channel = connect(&name, DEFAULT_MAX_FRAME_LENGTH).await.unwrap();
        assert_eq!(channel.name(), name);
        let (stream, _) = listener.accept().await.unwrap();
        drop(stream);

        let (mut reader, _writer) = channel.into_parts();
        assert!(reader.next().await.is_none());
    }
}
