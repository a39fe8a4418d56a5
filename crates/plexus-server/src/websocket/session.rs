//! One WebSocket connection from upgrade through disconnect.

use std::sync::Arc;
use std::time::Duration;

use ::metrics::{counter, gauge};
use axum::body::Bytes;
use axum::extract::ws::{Message, WebSocket};
use futures::{Sink, SinkExt, StreamExt};
use plexus_core::PeerId;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::connection::PeerConnection;
use super::heartbeat::{HeartbeatResult, run_heartbeat};
use crate::broker::{Broker, PeerTransport};
use crate::metrics as names;

/// Longest the writer waits to deliver a Close frame on shutdown.
const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Per-connection transport limits.
#[derive(Clone, Copy, Debug)]
pub struct SessionLimits {
    /// Outbound queue capacity.
    pub max_send_queue: usize,
    /// Ping interval.
    pub heartbeat_interval: Duration,
    /// Silence after which the connection is closed.
    pub heartbeat_timeout: Duration,
}

/// Drive one peer session.
///
/// 1. Registers the peer with the broker (which may ack immediately)
/// 2. Writer task: queue → socket, plus periodic pings
/// 3. Heartbeat task: closes the connection once it goes silent
/// 4. Reader loop: text frames → router; everything inbound counts as liveness
/// 5. Disconnects from the broker when any of them ends, or on `closed`
#[instrument(skip_all, fields(peer_id = %peer_id))]
pub async fn run_peer_session(
    ws: WebSocket,
    peer_id: PeerId,
    broker: Arc<Broker>,
    limits: SessionLimits,
    closed: CancellationToken,
) {
    let (ws_tx, mut ws_rx) = ws.split();
    let (send_tx, send_rx) = mpsc::channel::<Arc<str>>(limits.max_send_queue.max(1));
    let connection = Arc::new(PeerConnection::new(peer_id.clone(), send_tx, closed));

    counter!(names::WS_CONNECTIONS_TOTAL).increment(1);
    gauge!(names::WS_CONNECTIONS_ACTIVE).increment(1.0);
    let _ = broker.connect(peer_id.clone(), Arc::clone(&connection) as Arc<dyn PeerTransport>);

    let writer_conn = Arc::clone(&connection);
    let heartbeat_interval = limits.heartbeat_interval;
    let writer = tokio::spawn(async move {
        write_loop(ws_tx, send_rx, heartbeat_interval, writer_conn.closed().clone()).await;
        // Whatever stopped the writer also ends the reader.
        writer_conn.close();
    });

    let heartbeat_conn = Arc::clone(&connection);
    let heartbeat_timeout = limits.heartbeat_timeout;
    let heartbeat = tokio::spawn(async move {
        let cancel = heartbeat_conn.closed().clone();
        let result = run_heartbeat(
            Arc::clone(&heartbeat_conn),
            heartbeat_interval,
            heartbeat_timeout,
            cancel,
        )
        .await;
        if result == HeartbeatResult::TimedOut {
            warn!(timeout = ?heartbeat_timeout, "peer unresponsive, closing");
            heartbeat_conn.close();
        }
    });

    loop {
        tokio::select! {
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        connection.mark_alive();
                        let _ = broker.handle_frame(&peer_id, text.as_str());
                    }
                    Some(Ok(Message::Binary(data))) => {
                        connection.mark_alive();
                        debug!(len = data.len(), "ignoring binary frame");
                    }
                    Some(Ok(Message::Ping(_) | Message::Pong(_))) => connection.mark_alive(),
                    Some(Ok(Message::Close(_))) => {
                        debug!("peer sent close frame");
                        break;
                    }
                    Some(Err(e)) => {
                        debug!(error = %e, "websocket read error");
                        break;
                    }
                    None => break,
                }
            }
            () = connection.closed().cancelled() => break,
        }
    }

    let _ = broker.disconnect(&peer_id);
    connection.close();
    let _ = writer.await;
    let _ = heartbeat.await;

    info!(age_secs = connection.age().as_secs(), "session ended");
    counter!(names::WS_DISCONNECTIONS_TOTAL).increment(1);
    gauge!(names::WS_CONNECTIONS_ACTIVE).decrement(1.0);
}

/// Drain the outbound queue into `sink`, pinging every `ping_interval`.
///
/// Ends when the queue closes, a send fails, or `closed` fires. A send
/// stalled on a peer that stopped reading is abandoned as soon as `closed`
/// fires, and the final Close frame gets at most [`CLOSE_GRACE`].
async fn write_loop<S>(
    mut sink: S,
    mut queue: mpsc::Receiver<Arc<str>>,
    ping_interval: Duration,
    closed: CancellationToken,
) where
    S: Sink<Message> + Unpin,
{
    let mut ping = tokio::time::interval(ping_interval);
    // Skip the immediate first tick
    let _ = ping.tick().await;

    loop {
        let outbound = tokio::select! {
            frame = queue.recv() => match frame {
                Some(frame) => Message::Text(frame.to_string().into()),
                None => break,
            },
            _ = ping.tick() => Message::Ping(Bytes::new()),
            () = closed.cancelled() => {
                let _ = tokio::time::timeout(CLOSE_GRACE, sink.send(Message::Close(None))).await;
                break;
            }
        };
        let sent = tokio::select! {
            result = sink.send(outbound) => result.is_ok(),
            () = closed.cancelled() => false,
        };
        if !sent {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::convert::Infallible;
    use std::pin::Pin;
    use std::task::{Context, Poll};

    use super::*;

    /// A peer that never reads: every send stays pending.
    struct StalledSink;

    impl Sink<Message> for StalledSink {
        type Error = Infallible;

        fn poll_ready(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Infallible>> {
            Poll::Pending
        }

        fn start_send(self: Pin<&mut Self>, _item: Message) -> Result<(), Infallible> {
            Ok(())
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Infallible>> {
            Poll::Pending
        }

        fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Infallible>> {
            Poll::Ready(Ok(()))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn close_interrupts_stalled_send() {
        let (tx, rx) = mpsc::channel(4);
        let closed = CancellationToken::new();
        let writer = tokio::spawn(write_loop(
            StalledSink,
            rx,
            Duration::from_secs(30),
            closed.clone(),
        ));

        tx.send(Arc::from("hello")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!writer.is_finished(), "send should still be pending");

        closed.cancel();
        tokio::time::timeout(Duration::from_secs(5), writer)
            .await
            .expect("writer outlived close")
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn forwards_frames_in_order_then_closes() {
        let (sink, mut written) = futures::channel::mpsc::unbounded::<Message>();
        let (tx, rx) = mpsc::channel(4);
        let closed = CancellationToken::new();
        let writer = tokio::spawn(write_loop(sink, rx, Duration::from_secs(30), closed.clone()));

        tx.send(Arc::from("one")).await.unwrap();
        tx.send(Arc::from("two")).await.unwrap();
        for expected in ["one", "two"] {
            match written.next().await {
                Some(Message::Text(text)) => assert_eq!(text.as_str(), expected),
                other => panic!("expected text frame, got {other:?}"),
            }
        }

        closed.cancel();
        writer.await.unwrap();
        assert!(matches!(written.next().await, Some(Message::Close(None))));
    }

    #[tokio::test(start_paused = true)]
    async fn pings_on_interval() {
        let (sink, mut written) = futures::channel::mpsc::unbounded::<Message>();
        let (_tx, rx) = mpsc::channel::<Arc<str>>(4);
        let closed = CancellationToken::new();
        let _writer = tokio::spawn(write_loop(sink, rx, Duration::from_millis(100), closed.clone()));

        let first = tokio::time::timeout(Duration::from_secs(1), written.next())
            .await
            .expect("no ping");
        assert!(matches!(first, Some(Message::Ping(_))));
        closed.cancel();
    }
}
