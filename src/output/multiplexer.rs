//! Single-writer output multiplexer.
//!
//! Any number of producers (one per process stream) send frames through a
//! bounded channel. One writer owns both sinks and writes each frame with a
//! single `write_all`, so lines from different sources never interleave
//! mid-line. Sinks are blocking `std::io::Write`, so the writer lives on
//! the blocking pool.

use std::io::Write;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{trace, warn};

use super::frame::{LineFramer, OutputFrame, StreamKind};
use super::sink::Sink;

/// Capacity of the frame channel between producers and the writer.
pub(crate) const FRAME_CHANNEL_BUFFER: usize = 256;

/// Bytes read from a process pipe per chunk.
pub(crate) const READ_CHUNK_SIZE: usize = 8 * 1024;

enum Message {
    Frame(OutputFrame),
    Flush(oneshot::Sender<()>),
}

/// Handle to the shared output sinks.
///
/// Cloning is cheap; the writer stops once every clone is dropped.
/// Must be created inside a tokio runtime.
#[derive(Clone)]
pub struct Multiplexer {
    tx: mpsc::Sender<Message>,
}

impl Multiplexer {
    /// Multiplex onto the given stdout and stderr sinks.
    pub fn new(stdout: impl Write + Send + 'static, stderr: impl Write + Send + 'static) -> Self {
        let (tx, rx) = mpsc::channel(FRAME_CHANNEL_BUFFER);
        let (stdout, stderr): (Sink, Sink) = (Box::new(stdout), Box::new(stderr));
        tokio::task::spawn_blocking(move || write_frames(rx, stdout, stderr));
        Self { tx }
    }

    /// Multiplex onto the process's own stdout and stderr.
    pub fn stdio() -> Self {
        Self::new(std::io::stdout(), std::io::stderr())
    }

    /// Queue one frame for writing.
    pub async fn emit(&self, frame: OutputFrame) {
        if self.tx.send(Message::Frame(frame)).await.is_err() {
            trace!("output writer stopped, frame dropped");
        }
    }

    /// Wait until every frame queued before this call has been written.
    pub async fn flush(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.tx.send(Message::Flush(ack_tx)).await.is_ok() {
            let _ = ack_rx.await;
        }
    }

    /// Continuously read `reader` until EOF, framing its bytes as `source`.
    ///
    /// The returned task finishes after the final partial line is emitted.
    pub fn drain<R>(&self, source: Arc<str>, stream: StreamKind, mut reader: R) -> JoinHandle<()>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let mux = self.clone();
        tokio::spawn(async move {
            let mut framer = LineFramer::new(source, stream);
            let mut buf = vec![0u8; READ_CHUNK_SIZE];
            loop {
                match reader.read(&mut buf).await {
                    Ok(0) => break,
                    Ok(n) => {
                        for frame in framer.push(&buf[..n]) {
                            mux.emit(frame).await;
                        }
                    }
                    Err(e) => {
                        warn!(source = %framer.source(), error = %e, "reading process output failed");
                        break;
                    }
                }
            }
            if let Some(frame) = framer.finish() {
                mux.emit(frame).await;
            }
        })
    }
}

fn write_frames(mut rx: mpsc::Receiver<Message>, mut stdout: Sink, mut stderr: Sink) {
    while let Some(message) = rx.blocking_recv() {
        match message {
            Message::Frame(frame) => {
                let sink = match frame.stream {
                    StreamKind::Stdout => &mut stdout,
                    StreamKind::Stderr => &mut stderr,
                };
                let line = frame.render();
                if let Err(e) = sink.write_all(line.as_bytes()).and_then(|_| sink.flush()) {
                    warn!(source = %frame.source, error = %e, "writing output frame failed");
                }
            }
            Message::Flush(ack) => {
                let _ = stdout.flush();
                let _ = stderr.flush();
                let _ = ack.send(());
            }
        }
    }
}
