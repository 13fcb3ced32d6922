//! Per-connection reader and writer workers.
//!
//! Every admitted client gets two workers over its WebSocket:
//!
//! - the **reader** forwards each inbound text or binary message to
//!   [`Hub::broadcast`] until the peer closes, the socket errors, or the hub
//!   stops;
//! - the **writer** drains the client's outbound queue onto the socket until
//!   the queue closes (the hub dropped the client) or a write fails.
//!
//! [`run`] supervises both. Whichever finishes first ends the client: the hub
//! is told to unregister it, and the other worker is stopped. Each half of the
//! socket is owned by exactly one worker, so neither can close it twice.

use std::fmt;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, info, trace, warn};

use crate::hub::{ClientKey, Hub};
use crate::types::Frame;

/// Time the writer gets to flush queued frames after the reader has ended.
pub const WRITER_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Why the reader stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// The peer sent a close frame.
    Closed,
    /// The stream ended without a close frame.
    EndOfStream,
    /// Reading from the socket failed.
    Failed,
    /// The hub is no longer accepting broadcasts.
    HubClosed,
}

/// Why the writer stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The outbound queue was closed by the hub.
    QueueClosed,
    /// Writing to the socket failed.
    Failed,
}

/// Drives one admitted client until its connection ends.
pub async fn run(socket: WebSocket, key: ClientKey, outbound: mpsc::Receiver<Frame>, hub: Hub) {
    let (sink, stream) = socket.split();
    let mut writer = tokio::spawn(write_loop(sink, outbound));

    info!(client = %key, "WebSocket client connected");

    tokio::select! {
        outcome = read_loop(stream, &hub) => {
            debug!(client = %key, outcome = ?outcome, "Reader finished");
            if hub.unregister(key.clone()).await.is_err() {
                debug!(client = %key, "Hub already stopped");
            }
            // Unregistering closes the queue, so the writer flushes and exits.
            match timeout(WRITER_SHUTDOWN_GRACE, &mut writer).await {
                Ok(Ok(outcome)) => trace!(client = %key, outcome = ?outcome, "Writer finished"),
                Ok(Err(err)) => warn!(client = %key, error = %err, "Writer task failed"),
                Err(_) => {
                    debug!(client = %key, "Writer did not finish in time, aborting");
                    writer.abort();
                }
            }
        }
        result = &mut writer => {
            match result {
                Ok(outcome) => debug!(client = %key, outcome = ?outcome, "Writer finished"),
                Err(err) => warn!(client = %key, error = %err, "Writer task failed"),
            }
            // A no-op when the hub itself evicted this client.
            if hub.unregister(key.clone()).await.is_err() {
                debug!(client = %key, "Hub already stopped");
            }
        }
    }

    info!(client = %key, "WebSocket client disconnected");
}

/// Forwards inbound messages to the hub until the connection ends.
///
/// Ping and pong frames are skipped; the WebSocket layer answers pings itself.
pub async fn read_loop<S, E>(mut stream: S, hub: &Hub) -> ReadOutcome
where
    S: Stream<Item = Result<Message, E>> + Unpin,
    E: fmt::Display,
{
    while let Some(message) = stream.next().await {
        let message = match message {
            Ok(Message::Close(close)) => {
                debug!(close = ?close, "Client sent close frame");
                return ReadOutcome::Closed;
            }
            Ok(message) => message,
            Err(err) => {
                debug!(error = %err, "WebSocket read failed");
                return ReadOutcome::Failed;
            }
        };

        let Some(frame) = Frame::from_message(message) else {
            trace!("Skipping control frame");
            continue;
        };

        trace!(frame_len = frame.payload_len(), "Forwarding frame to hub");
        if hub.broadcast(frame).await.is_err() {
            return ReadOutcome::HubClosed;
        }
    }

    ReadOutcome::EndOfStream
}

/// Writes queued frames to the socket until the queue closes or a write fails.
///
/// When the queue closes the sink is closed as well, which sends a close frame.
pub async fn write_loop<K>(mut sink: K, mut outbound: mpsc::Receiver<Frame>) -> WriteOutcome
where
    K: Sink<Message> + Unpin,
    K::Error: fmt::Display,
{
    while let Some(frame) = outbound.recv().await {
        if let Err(err) = sink.send(frame.into()).await {
            debug!(error = %err, "WebSocket write failed");
            return WriteOutcome::Failed;
        }
    }

    if let Err(err) = sink.close().await {
        trace!(error = %err, "Closing WebSocket after queue closed");
    }
    WriteOutcome::QueueClosed
}
