//! Client session: read and write pumps for one WebSocket
//!
//! Each session runs two loops under one supervising future:
//! - the write loop drains the connection's outbound buffer, batching
//!   whatever is queued into one newline-delimited frame, and sends keepalive
//!   pings
//! - the read loop discards client payloads, extends its deadline on every
//!   pong, and ends the session on error, close or silence
//!
//! The reader ends by requesting unregistration; the hub then closes the
//! buffer and the writer finishes with a Close frame. If the writer fails
//! first it cancels the session token, which stops the reader.

use axum::extract::ws::{Message, WebSocket};
use futures::{Sink, SinkExt, Stream, StreamExt};
use hris_common::config::SessionConfig;
use std::fmt::Display;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::{interval_at, sleep, timeout, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::hub::{Connection, Hub, UserId};

/// Outbound write failures
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Write deadline exceeded")]
    WriteTimeout,
}

/// Why the read loop stopped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    /// Client sent a Close frame
    ClientClosed,
    /// No pong within the read deadline
    DeadlineExceeded,
    /// Transport reported an error (includes oversized messages)
    TransportError(String),
    /// Stream ended without a Close frame
    StreamEnded,
    /// Session or server shutdown
    Cancelled,
}

/// Timing parameters shared by both pumps
#[derive(Debug, Clone)]
pub struct PumpSettings {
    pub write_wait: Duration,
    pub pong_wait: Duration,
    pub ping_period: Duration,
    /// Upper bound on payloads folded into one frame
    pub max_batch: usize,
}

impl From<&SessionConfig> for PumpSettings {
    fn from(config: &SessionConfig) -> Self {
        Self {
            write_wait: config.write_wait(),
            pong_wait: config.pong_wait(),
            ping_period: config.ping_period(),
            max_batch: config.send_buffer,
        }
    }
}

/// Run one upgraded WebSocket until either side ends it
///
/// `shutdown` is the server-wide token; a child token scopes this session.
pub async fn run_session(
    socket: WebSocket,
    hub: Hub,
    user_id: UserId,
    config: SessionConfig,
    shutdown: CancellationToken,
) {
    let settings = PumpSettings::from(&config);
    let (connection, buffer) = Connection::new(user_id, config.send_buffer);
    let key = connection.key();
    hub.register(connection);

    let session_token = shutdown.child_token();
    let (sink, stream) = socket.split();

    let mut writer = tokio::spawn(write_loop(
        sink,
        buffer,
        settings.clone(),
        session_token.clone(),
    ));

    let outcome = read_loop(stream, settings.pong_wait, session_token.clone()).await;
    match &outcome {
        ReadOutcome::TransportError(e) => {
            warn!(user_id, connection = %key.id, error = %e, "WebSocket read error")
        }
        other => debug!(user_id, connection = %key.id, outcome = ?other, "Read loop finished"),
    }

    hub.unregister(key);

    // Writer finishes once the hub closes the buffer (or the token fires)
    if timeout(settings.write_wait, &mut writer).await.is_err() {
        debug!(user_id, connection = %key.id, "Writer did not finish in time, aborting");
        session_token.cancel();
        writer.abort();
    }

    info!(user_id, connection = %key.id, "Session closed");
}

/// Drain the outbound buffer into the transport, with keepalive pings
///
/// Exits on write error, when the buffer is closed (after sending Close), or
/// on cancellation (after flushing what is already queued). Cancels `cancel`
/// on exit so the read loop stops too.
pub async fn write_loop<S>(
    mut sink: S,
    mut buffer: mpsc::Receiver<Vec<u8>>,
    settings: PumpSettings,
    cancel: CancellationToken,
) where
    S: Sink<Message> + Unpin,
    S::Error: Display,
{
    let mut ticker = interval_at(Instant::now() + settings.ping_period, settings.ping_period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            payload = buffer.recv() => match payload {
                Some(first) => {
                    let frame = batch_frame(first, &mut buffer, settings.max_batch);
                    if let Err(e) = send_with_deadline(&mut sink, frame, settings.write_wait).await {
                        debug!(error = %e, "Write failed, closing session");
                        break;
                    }
                }
                None => {
                    // Hub closed the buffer
                    let _ = send_with_deadline(&mut sink, Message::Close(None), settings.write_wait).await;
                    break;
                }
            },
            _ = ticker.tick() => {
                if let Err(e) = send_with_deadline(&mut sink, Message::Ping(Vec::new()), settings.write_wait).await {
                    debug!(error = %e, "Ping failed, closing session");
                    break;
                }
            }
            _ = cancel.cancelled() => {
                flush_and_close(&mut sink, &mut buffer, &settings).await;
                break;
            }
        }
    }

    cancel.cancel();
    let _ = timeout(settings.write_wait, sink.close()).await;
}

/// Read from the transport until error, close, deadline or cancellation
///
/// Inbound payloads are not processed. Only pongs extend the deadline.
pub async fn read_loop<S, E>(
    mut stream: S,
    pong_wait: Duration,
    cancel: CancellationToken,
) -> ReadOutcome
where
    S: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    let deadline = sleep(pong_wait);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return ReadOutcome::Cancelled,
            _ = &mut deadline => return ReadOutcome::DeadlineExceeded,
            message = stream.next() => match message {
                Some(Ok(Message::Pong(_))) => {
                    deadline.as_mut().reset(Instant::now() + pong_wait);
                }
                Some(Ok(Message::Close(_))) => return ReadOutcome::ClientClosed,
                Some(Ok(_)) => {}
                Some(Err(e)) => return ReadOutcome::TransportError(e.to_string()),
                None => return ReadOutcome::StreamEnded,
            },
        }
    }
}

/// Fold everything already queued (up to `max_batch` extra payloads) into one frame
fn batch_frame(first: Vec<u8>, buffer: &mut mpsc::Receiver<Vec<u8>>, max_batch: usize) -> Message {
    let mut frame = first;

    for _ in 0..max_batch {
        match buffer.try_recv() {
            Ok(next) => {
                frame.push(b'\n');
                frame.extend_from_slice(&next);
            }
            Err(_) => break,
        }
    }

    match String::from_utf8(frame) {
        Ok(text) => Message::Text(text),
        Err(e) => Message::Binary(e.into_bytes()),
    }
}

async fn flush_and_close<S>(sink: &mut S, buffer: &mut mpsc::Receiver<Vec<u8>>, settings: &PumpSettings)
where
    S: Sink<Message> + Unpin,
    S::Error: Display,
{
    if let Ok(first) = buffer.try_recv() {
        let frame = batch_frame(first, buffer, settings.max_batch);
        if let Err(e) = send_with_deadline(sink, frame, settings.write_wait).await {
            debug!(error = %e, "Flush on shutdown failed");
            return;
        }
    }
    let _ = send_with_deadline(sink, Message::Close(None), settings.write_wait).await;
}

async fn send_with_deadline<S>(
    sink: &mut S,
    message: Message,
    write_wait: Duration,
) -> Result<(), SessionError>
where
    S: Sink<Message> + Unpin,
    S::Error: Display,
{
    match timeout(write_wait, sink.send(message)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(SessionError::Transport(e.to_string())),
        Err(_) => Err(SessionError::WriteTimeout),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::channel::mpsc as fmpsc;

    fn settings() -> PumpSettings {
        PumpSettings {
            write_wait: Duration::from_secs(1),
            pong_wait: Duration::from_secs(60),
            ping_period: Duration::from_secs(54),
            max_batch: 16,
        }
    }

    #[tokio::test]
    async fn test_write_loop_batches_queued_payloads() {
        let (tx, rx) = mpsc::channel(8);
        tx.send(b"{\"id\":1}".to_vec()).await.unwrap();
        tx.send(b"{\"id\":2}".to_vec()).await.unwrap();
        tx.send(b"{\"id\":3}".to_vec()).await.unwrap();

        let (sink, mut frames) = fmpsc::unbounded::<Message>();
        let cancel = CancellationToken::new();
        let writer = tokio::spawn(write_loop(sink, rx, settings(), cancel.clone()));

        match frames.next().await.unwrap() {
            Message::Text(text) => assert_eq!(text, "{\"id\":1}\n{\"id\":2}\n{\"id\":3}"),
            other => panic!("expected text frame, got {:?}", other),
        }

        // Closing the buffer ends the writer with a Close frame
        drop(tx);
        assert!(matches!(frames.next().await.unwrap(), Message::Close(None)));
        writer.await.unwrap();
        assert!(cancel.is_cancelled(), "writer exit should stop the reader");
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_loop_sends_keepalive_ping() {
        let (_tx, rx) = mpsc::channel::<Vec<u8>>(1);
        let (sink, mut frames) = fmpsc::unbounded::<Message>();
        let cancel = CancellationToken::new();
        let started = Instant::now();
        let settings = PumpSettings {
            ping_period: Duration::from_millis(90),
            ..settings()
        };

        let writer = tokio::spawn(write_loop(sink, rx, settings, cancel.clone()));

        assert!(matches!(frames.next().await.unwrap(), Message::Ping(_)));
        assert!(started.elapsed() >= Duration::from_millis(90));

        cancel.cancel();
        writer.await.unwrap();
    }

    #[tokio::test]
    async fn test_write_loop_flushes_on_cancel() {
        let (tx, rx) = mpsc::channel(4);
        let (sink, mut frames) = fmpsc::unbounded::<Message>();
        let cancel = CancellationToken::new();

        tx.send(b"last words".to_vec()).await.unwrap();
        cancel.cancel();
        write_loop(sink, rx, settings(), cancel).await;

        let mut received = Vec::new();
        while let Some(frame) = frames.next().await {
            received.push(frame);
        }
        assert!(received.contains(&Message::Text("last words".to_string())));
        assert_eq!(received.last(), Some(&Message::Close(None)));
    }

    #[tokio::test]
    async fn test_write_loop_exits_on_write_error() {
        let (tx, rx) = mpsc::channel(4);
        let (sink, frames) = fmpsc::unbounded::<Message>();
        drop(frames);

        tx.send(b"undeliverable".to_vec()).await.unwrap();
        let cancel = CancellationToken::new();
        write_loop(sink, rx, settings(), cancel.clone()).await;

        assert!(cancel.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_loop_pong_extends_deadline() {
        let (tx, stream) = fmpsc::unbounded::<Result<Message, String>>();
        let keep_open = tx.clone();
        let started = Instant::now();

        tokio::spawn(async move {
            for _ in 0..3 {
                sleep(Duration::from_millis(80)).await;
                let _ = tx.unbounded_send(Ok(Message::Pong(Vec::new())));
            }
        });

        let outcome = read_loop(stream, Duration::from_millis(100), CancellationToken::new()).await;

        assert_eq!(outcome, ReadOutcome::DeadlineExceeded);
        assert!(started.elapsed() >= Duration::from_millis(340));
        drop(keep_open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_loop_ignores_payloads_for_deadline() {
        let (tx, stream) = fmpsc::unbounded::<Result<Message, String>>();
        let started = Instant::now();

        let sender = tokio::spawn(async move {
            for _ in 0..5 {
                sleep(Duration::from_millis(30)).await;
                let _ = tx.unbounded_send(Ok(Message::Text("chatter".to_string())));
            }
            tx
        });

        let outcome = read_loop(stream, Duration::from_millis(100), CancellationToken::new()).await;

        assert_eq!(outcome, ReadOutcome::DeadlineExceeded);
        assert!(started.elapsed() < Duration::from_millis(150));
        drop(sender);
    }

    #[tokio::test]
    async fn test_read_loop_outcomes() {
        let closed = futures::stream::iter(vec![
            Ok::<_, String>(Message::Text("hi".to_string())),
            Ok(Message::Close(None)),
        ]);
        assert_eq!(
            read_loop(closed, Duration::from_secs(5), CancellationToken::new()).await,
            ReadOutcome::ClientClosed
        );

        let failed = futures::stream::iter(vec![Err::<Message, _>("message too long".to_string())]);
        assert_eq!(
            read_loop(failed, Duration::from_secs(5), CancellationToken::new()).await,
            ReadOutcome::TransportError("message too long".to_string())
        );

        let ended = futures::stream::iter(Vec::<Result<Message, String>>::new());
        assert_eq!(
            read_loop(ended, Duration::from_secs(5), CancellationToken::new()).await,
            ReadOutcome::StreamEnded
        );
    }

    #[tokio::test]
    async fn test_read_loop_stops_on_cancel() {
        let (_tx, stream) = fmpsc::unbounded::<Result<Message, String>>();
        let cancel = CancellationToken::new();
        cancel.cancel();

        assert_eq!(
            read_loop(stream, Duration::from_secs(5), cancel).await,
            ReadOutcome::Cancelled
        );
    }
}
