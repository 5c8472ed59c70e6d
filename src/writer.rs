//! Dedicated writer task for sending frames.
//!
//! Every connection owns one writer task fed by an mpsc channel, so frames
//! produced by concurrent call or dispatch tasks are never interleaved on the
//! stream. Frames that are already queued when the task wakes are written
//! together in one `write_all`.
//!
//! # Architecture
//!
//! ```text
//! Call/dispatch 1 ─┐
//! Call/dispatch 2 ─┼─► mpsc::Sender<WriterCommand> ─► Writer Task ─► Stream
//! Call/dispatch N ─┘
//! ```

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{FerryError, Result};
use crate::protocol::{Message, HEADER_SIZE};

/// Default channel capacity.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Maximum frames to batch in a single write operation.
const MAX_BATCH_SIZE: usize = 64;

/// A frame ready to be written to the stream.
#[derive(Debug)]
pub struct OutboundFrame {
    /// Pre-encoded header (19 bytes).
    pub header: [u8; HEADER_SIZE],
    /// Body bytes.
    pub body: Bytes,
}

impl OutboundFrame {
    /// Total size of this frame (header + body).
    #[inline]
    pub fn size(&self) -> usize {
        HEADER_SIZE + self.body.len()
    }
}

impl From<Message> for OutboundFrame {
    fn from(message: Message) -> Self {
        Self {
            header: message.header.encode(),
            body: message.body,
        }
    }
}

enum WriterCommand {
    Frame(OutboundFrame),
    Shutdown,
}

/// Configuration for the writer task.
#[derive(Debug, Clone)]
pub struct WriterConfig {
    /// Channel capacity for the frame queue.
    pub channel_capacity: usize,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

/// Handle for sending frames to the writer task.
///
/// This is cheaply cloneable and can be shared across tasks.
#[derive(Clone)]
pub struct WriterHandle {
    tx: mpsc::Sender<WriterCommand>,
}

impl WriterHandle {
    /// Queue a message for writing.
    ///
    /// Fails with [`FerryError::ConnectionClosed`] once the writer task is gone.
    pub async fn send(&self, message: Message) -> Result<()> {
        self.tx
            .send(WriterCommand::Frame(message.into()))
            .await
            .map_err(|_| FerryError::ConnectionClosed)
    }

    /// Flush queued frames, then shut down the write half.
    pub async fn shutdown(&self) -> Result<()> {
        self.tx
            .send(WriterCommand::Shutdown)
            .await
            .map_err(|_| FerryError::ConnectionClosed)
    }

    /// Whether the writer task has exited.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Spawn the writer task and return a handle for sending frames.
///
/// The returned `JoinHandle` resolves after a shutdown command, once every
/// handle is dropped, or on the first write error. The write half is shut
/// down in the first two cases.
pub fn spawn_writer_task<W>(writer: W, config: WriterConfig) -> (WriterHandle, JoinHandle<Result<()>>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel(config.channel_capacity.max(1));
    let task = tokio::spawn(writer_loop(rx, writer));
    (WriterHandle { tx }, task)
}

async fn writer_loop<W>(mut rx: mpsc::Receiver<WriterCommand>, mut writer: W) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut buf = BytesMut::new();

    loop {
        let first = match rx.recv().await {
            Some(WriterCommand::Frame(frame)) => frame,
            Some(WriterCommand::Shutdown) => {
                writer.shutdown().await?;
                return Ok(());
            }
            None => {
                // Every handle is gone.
                writer.shutdown().await?;
                return Ok(());
            }
        };

        buf.reserve(first.size());
        append(&mut buf, &first);

        let mut shutdown = false;
        let mut batched = 1;
        while batched < MAX_BATCH_SIZE {
            match rx.try_recv() {
                Ok(WriterCommand::Frame(frame)) => {
                    append(&mut buf, &frame);
                    batched += 1;
                }
                Ok(WriterCommand::Shutdown) => {
                    shutdown = true;
                    break;
                }
                Err(_) => break,
            }
        }

        let result = async {
            writer.write_all(&buf).await?;
            writer.flush().await
        }
        .await;
        buf.clear();

        if let Err(e) = result {
            tracing::error!("frame write failed: {}", e);
            return Err(e.into());
        }

        if shutdown {
            writer.shutdown().await?;
            return Ok(());
        }
    }
}

fn append(buf: &mut BytesMut, frame: &OutboundFrame) {
    buf.extend_from_slice(&frame.header);
    buf.extend_from_slice(&frame.body);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{read_frame, Header};
    use tokio::io::{duplex, AsyncReadExt};

    fn message(seq: u64, body: &'static [u8]) -> Message {
        Message::new(
            Header::request(seq, body.len() as u32),
            Bytes::from_static(body),
        )
    }

    #[test]
    fn test_outbound_frame_from_message() {
        let frame = OutboundFrame::from(message(42, b"hello"));
        assert_eq!(frame.header.len(), HEADER_SIZE);
        assert_eq!(frame.size(), HEADER_SIZE + 5);
        assert_eq!(Header::decode(&frame.header).unwrap().seq, 42);
    }

    #[tokio::test]
    async fn test_frames_arrive_in_order() {
        let (client, mut server) = duplex(64 * 1024);
        let (handle, _task) = spawn_writer_task(client, WriterConfig::default());

        for seq in 0..10u64 {
            handle.send(message(seq, b"payload")).await.unwrap();
        }

        for seq in 0..10u64 {
            let got = read_frame(&mut server).await.unwrap();
            assert_eq!(got.seq(), seq);
            assert_eq!(got.body(), b"payload");
        }
    }

    #[tokio::test]
    async fn test_concurrent_senders_do_not_interleave() {
        let (client, mut server) = duplex(64 * 1024);
        let (handle, _task) = spawn_writer_task(client, WriterConfig::default());

        let mut tasks = Vec::new();
        for seq in 0..32u64 {
            let handle = handle.clone();
            tasks.push(tokio::spawn(async move {
                handle.send(message(seq, b"0123456789abcdef")).await.unwrap();
            }));
        }
        for t in tasks {
            t.await.unwrap();
        }

        let mut seen = Vec::new();
        for _ in 0..32 {
            let got = read_frame(&mut server).await.unwrap();
            assert_eq!(got.body(), b"0123456789abcdef");
            seen.push(got.seq());
        }
        seen.sort_unstable();
        assert_eq!(seen, (0..32).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_shutdown_closes_write_half() {
        let (client, mut server) = duplex(4096);
        let (handle, task) = spawn_writer_task(client, WriterConfig::default());

        handle.send(message(1, b"last")).await.unwrap();
        handle.shutdown().await.unwrap();
        task.await.unwrap().unwrap();

        let got = read_frame(&mut server).await.unwrap();
        assert_eq!(got.body(), b"last");

        let mut rest = Vec::new();
        server.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
        assert!(handle.is_closed());
    }

    #[tokio::test]
    async fn test_dropping_handles_closes_write_half() {
        let (client, mut server) = duplex(4096);
        let (handle, task) = spawn_writer_task(client, WriterConfig::default());

        handle.send(message(3, b"bye")).await.unwrap();
        drop(handle);
        task.await.unwrap().unwrap();

        assert_eq!(read_frame(&mut server).await.unwrap().body(), b"bye");
        let mut rest = Vec::new();
        server.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
    }

    #[tokio::test]
    async fn test_send_after_exit_fails() {
        let (client, _server) = duplex(64);
        let (handle, task) = spawn_writer_task(client, WriterConfig::default());
        handle.shutdown().await.unwrap();
        task.await.unwrap().unwrap();

        let err = handle.send(message(1, b"x")).await.unwrap_err();
        assert!(matches!(err, FerryError::ConnectionClosed));
    }
}
