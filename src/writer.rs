//! Dedicated writer task for serialized frame sending.
//!
//! A single task owns the write half of the connection and receives fully
//! encoded frames over a bounded mpsc channel. Concurrent senders therefore
//! never interleave partial writes.
//!
//! # Architecture
//!
//! ```text
//! send()    ─┐
//! read loop ─┼─► mpsc::Sender<WriterCommand> ─► Writer Task ─► Socket
//! close()   ─┘
//! ```
//!
//! Frames that are ready at the same time are batched into a single
//! vectored write.

use std::io::IoSlice;

use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::error::{IpcError, Result};

/// Default channel capacity.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 64;

/// Maximum frames to batch in a single write operation.
const MAX_BATCH_SIZE: usize = 32;

/// Work item for the writer task.
#[derive(Debug)]
enum WriterCommand {
    /// Write one encoded frame.
    Frame(Bytes),
    /// Flush, shut the write half down and stop.
    Shutdown(oneshot::Sender<Result<()>>),
}

/// Handle for sending frames to the writer task.
///
/// This is cheaply cloneable; the read loop holds one for PONG replies.
#[derive(Debug, Clone)]
pub struct WriterHandle {
    tx: mpsc::Sender<WriterCommand>,
}

impl WriterHandle {
    /// Queue an encoded frame.
    ///
    /// Waits while the channel is full. Fails with
    /// [`IpcError::ConnectionClosed`] once the writer task has stopped.
    pub async fn send(&self, frame: Bytes) -> Result<()> {
        self.tx
            .send(WriterCommand::Frame(frame))
            .await
            .map_err(|_| IpcError::ConnectionClosed)
    }

    /// Write everything queued so far, then shut the write half down.
    ///
    /// Resolves once the shutdown has been performed.
    pub async fn shutdown(&self) -> Result<()> {
        let (done_tx, done_rx) = oneshot::channel();
        self.tx
            .send(WriterCommand::Shutdown(done_tx))
            .await
            .map_err(|_| IpcError::ConnectionClosed)?;
        done_rx.await.map_err(|_| IpcError::ConnectionClosed)?
    }
}

/// Spawn the writer task and return a handle for sending frames.
///
/// The task ends when every handle is dropped, after a shutdown request, or
/// on the first write error.
pub fn spawn_writer_task<W>(writer: W, capacity: usize) -> (WriterHandle, JoinHandle<Result<()>>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let task = tokio::spawn(async move {
        let result = writer_loop(rx, writer).await;
        if let Err(e) = &result {
            tracing::error!("Writer task stopped: {}", e);
        }
        result
    });
    (WriterHandle { tx }, task)
}

/// Main writer loop.
async fn writer_loop<W>(mut rx: mpsc::Receiver<WriterCommand>, mut writer: W) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    loop {
        let first = match rx.recv().await {
            Some(WriterCommand::Frame(frame)) => frame,
            Some(WriterCommand::Shutdown(done)) => {
                let _ = done.send(shutdown(&mut writer).await);
                return Ok(());
            }
            // All handles dropped
            None => return Ok(()),
        };

        // Collect additional ready frames (non-blocking)
        let mut batch = Vec::with_capacity(MAX_BATCH_SIZE);
        batch.push(first);
        let mut pending_shutdown = None;

        while batch.len() < MAX_BATCH_SIZE {
            match rx.try_recv() {
                Ok(WriterCommand::Frame(frame)) => batch.push(frame),
                Ok(WriterCommand::Shutdown(done)) => {
                    pending_shutdown = Some(done);
                    break;
                }
                Err(_) => break,
            }
        }

        write_batch(&mut writer, &batch).await?;

        if let Some(done) = pending_shutdown {
            let _ = done.send(shutdown(&mut writer).await);
            return Ok(());
        }
    }
}

async fn shutdown<W>(writer: &mut W) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.flush().await?;
    writer.shutdown().await?;
    Ok(())
}

/// Write a batch of frames using scatter/gather I/O (write_vectored).
async fn write_batch<W>(writer: &mut W, batch: &[Bytes]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let total_size: usize = batch.iter().map(Bytes::len).sum();
    let mut total_written = 0;

    while total_written < total_size {
        let slices = remaining_slices(batch, total_written);
        let written = writer.write_vectored(&slices).await?;
        if written == 0 {
            return Err(IpcError::Io(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                "write_vectored returned 0",
            )));
        }
        total_written += written;
    }

    writer.flush().await?;
    Ok(())
}

/// Build IoSlice array for the data left after `skip_bytes` were written.
fn remaining_slices(batch: &[Bytes], skip_bytes: usize) -> Vec<IoSlice<'_>> {
    let mut slices = Vec::with_capacity(batch.len());
    let mut offset = 0;

    for frame in batch {
        let end = offset + frame.len();
        if skip_bytes < end && !frame.is_empty() {
            let start = skip_bytes.saturating_sub(offset);
            slices.push(IoSlice::new(&frame[start..]));
        }
        offset = end;
    }

    slices
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::time::Duration;
    use tokio::io::{duplex, AsyncReadExt};

    #[tokio::test]
    async fn test_writer_handle_send() {
        let (client, mut server) = duplex(4096);
        let (handle, _task) = spawn_writer_task(client, DEFAULT_CHANNEL_CAPACITY);

        handle.send(Bytes::from_static(b"hello")).await.unwrap();

        let mut buf = [0u8; 5];
        server.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello");
    }

    #[tokio::test]
    async fn test_frames_written_in_order() {
        let (client, mut server) = duplex(4096);
        let (handle, _task) = spawn_writer_task(client, DEFAULT_CHANNEL_CAPACITY);

        for i in 0..10u8 {
            handle.send(Bytes::from(vec![i; 3])).await.unwrap();
        }

        let mut buf = [0u8; 30];
        server.read_exact(&mut buf).await.unwrap();
        for (i, chunk) in buf.chunks(3).enumerate() {
            assert_eq!(chunk, &[i as u8; 3]);
        }
    }

    #[tokio::test]
    async fn test_concurrent_senders_do_not_interleave() {
        let (client, mut server) = duplex(64 * 1024);
        let (handle, _task) = spawn_writer_task(client, 4);

        let mut senders = Vec::new();
        for i in 0..8u8 {
            let handle = handle.clone();
            senders.push(tokio::spawn(async move {
                for _ in 0..16 {
                    handle.send(Bytes::from(vec![i; 100])).await.unwrap();
                }
            }));
        }
        for sender in senders {
            sender.await.unwrap();
        }

        let mut buf = vec![0u8; 8 * 16 * 100];
        server.read_exact(&mut buf).await.unwrap();
        for chunk in buf.chunks(100) {
            assert!(chunk.iter().all(|&b| b == chunk[0]));
        }
    }

    #[tokio::test]
    async fn test_shutdown_flushes_and_closes() {
        let (client, mut server) = duplex(4096);
        let (handle, task) = spawn_writer_task(client, DEFAULT_CHANNEL_CAPACITY);

        handle.send(Bytes::from_static(b"last")).await.unwrap();
        handle.shutdown().await.unwrap();

        let mut buf = Vec::new();
        server.read_to_end(&mut buf).await.unwrap();
        assert_eq!(buf, b"last");

        assert!(task.await.unwrap().is_ok());
        assert!(matches!(
            handle.send(Bytes::from_static(b"x")).await,
            Err(IpcError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_writer_shutdown_on_channel_close() {
        let (client, _server) = duplex(4096);
        let (handle, task) = spawn_writer_task(client, DEFAULT_CHANNEL_CAPACITY);

        drop(handle);

        let result = tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_write_batch_multiple() {
        let mut buf = Cursor::new(Vec::new());
        let batch: Vec<Bytes> = (0..5).map(|_| Bytes::from_static(b"abc")).collect();

        write_batch(&mut buf, &batch).await.unwrap();

        assert_eq!(buf.into_inner(), b"abcabcabcabcabc");
    }

    #[test]
    fn test_remaining_slices_partial() {
        let batch = vec![Bytes::from_static(b"hello"), Bytes::from_static(b"world")];

        assert_eq!(remaining_slices(&batch, 0).len(), 2);

        let slices = remaining_slices(&batch, 3);
        assert_eq!(slices.len(), 2);
        assert_eq!(&*slices[0], b"lo");

        let slices = remaining_slices(&batch, 5);
        assert_eq!(slices.len(), 1);
        assert_eq!(&*slices[0], b"world");
    }
}
