//! Platform-specific pipe/socket connection.
//!
//! - Unix: Unix Domain Socket
//! - Windows: Named Pipe
//!
//! # Example
//!
//! ```ignore
//! use presence_ipc::transport::{LocatorConfig, PipeDialer, SocketLocator};
//!
//! let locator = SocketLocator::new(LocatorConfig::from_env(), PipeDialer);
//! let (candidate, stream) = locator.locate().await?;
//! ```

use std::io;
use std::path::Path;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use super::locator::{BoxFuture, Dialer};

/// Dialer for the peer's real listening socket.
#[derive(Debug, Clone, Copy, Default)]
pub struct PipeDialer;

impl Dialer for PipeDialer {
    type Stream = PipeStream;

    fn dial<'a>(&'a self, path: &'a Path) -> BoxFuture<'a, io::Result<PipeStream>> {
        Box::pin(PipeStream::connect(path))
    }
}

// ============================================================================
// Unix Implementation
// ============================================================================

#[cfg(unix)]
mod unix_impl {
    use super::*;
    use tokio::net::UnixStream;

    /// Unix Domain Socket stream (connected).
    #[derive(Debug)]
    pub struct PipeStream {
        stream: UnixStream,
    }

    impl PipeStream {
        /// Connect to a Unix socket path.
        pub async fn connect(path: &Path) -> io::Result<Self> {
            let stream = UnixStream::connect(path).await?;
            Ok(Self { stream })
        }

        /// Get a reference to the underlying stream.
        pub fn inner(&self) -> &UnixStream {
            &self.stream
        }
    }

    impl AsyncRead for PipeStream {
        fn poll_read(
            mut self: Pin<&mut Self>,
            cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            Pin::new(&mut self.stream).poll_read(cx, buf)
        }
    }

    impl AsyncWrite for PipeStream {
        fn poll_write(
            mut self: Pin<&mut Self>,
            cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            Pin::new(&mut self.stream).poll_write(cx, buf)
        }

        fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Pin::new(&mut self.stream).poll_flush(cx)
        }

        fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Pin::new(&mut self.stream).poll_shutdown(cx)
        }
    }
}

// ============================================================================
// Windows Implementation
// ============================================================================

#[cfg(windows)]
mod windows_impl {
    use super::*;
    use tokio::net::windows::named_pipe::{ClientOptions, NamedPipeClient};

    /// Windows Named Pipe stream (connected).
    #[derive(Debug)]
    pub struct PipeStream {
        pipe: NamedPipeClient,
    }

    impl PipeStream {
        /// Open a client end of a named pipe.
        ///
        /// Fails immediately if no server instance is listening.
        pub async fn connect(path: &Path) -> io::Result<Self> {
            let pipe = ClientOptions::new().open(path)?;
            Ok(Self { pipe })
        }

        /// Get a reference to the underlying pipe.
        pub fn inner(&self) -> &NamedPipeClient {
            &self.pipe
        }
    }

    impl AsyncRead for PipeStream {
        fn poll_read(
            mut self: Pin<&mut Self>,
            cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            Pin::new(&mut self.pipe).poll_read(cx, buf)
        }
    }

    impl AsyncWrite for PipeStream {
        fn poll_write(
            mut self: Pin<&mut Self>,
            cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            Pin::new(&mut self.pipe).poll_write(cx, buf)
        }

        fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Pin::new(&mut self.pipe).poll_flush(cx)
        }

        fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Pin::new(&mut self.pipe).poll_shutdown(cx)
        }
    }
}

// ============================================================================
// Platform-independent re-exports
// ============================================================================

#[cfg(unix)]
pub use unix_impl::PipeStream;

#[cfg(windows)]
pub use windows_impl::PipeStream;

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::UnixListener;

    fn socket_path(tag: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("presence-ipc-{}-{}.sock", tag, std::process::id()))
    }

    #[tokio::test]
    async fn test_dial_connects_to_listener() {
        let path = socket_path("dial");
        let _ = std::fs::remove_file(&path);
        let listener = UnixListener::bind(&path).unwrap();

        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 4];
            stream.read_exact(&mut buf).await.unwrap();
            buf
        });

        let mut stream = PipeDialer.dial(&path).await.unwrap();
        stream.write_all(b"ping").await.unwrap();

        assert_eq!(&server.await.unwrap(), b"ping");
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn test_dial_missing_socket_fails() {
        let path = socket_path("missing");
        let _ = std::fs::remove_file(&path);

        assert!(PipeDialer.dial(&path).await.is_err());
    }
}
