//! WebSocket transport for the gateway
//!
//! One reader loop per socket feeds frames to the gateway in arrival order.
//! A writer task owns the sink and drains both the connection's event
//! channel and a control channel (pings, close frames). A ping task closes
//! connections that stop answering pings.

use axum::extract::ws::{CloseFrame, Message, WebSocket, close_code};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use std::borrow::Cow;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, interval, sleep, timeout};
use tracing::{debug, error, info, warn};

use super::{Gateway, ServerEvent};

/// Close code sent when a connection does not authenticate in time
pub const AUTH_TIMEOUT_CLOSE_CODE: u16 = 4008;

const WRITER_GRACE: Duration = Duration::from_secs(1);

/// Run one WebSocket connection until it closes, then unbind it
pub async fn serve_socket(socket: WebSocket, gateway: Gateway, ip_address: String) {
    let (sink, mut stream) = socket.split();
    let (mut connection, events) = gateway.open(ip_address);
    let (control_tx, control_rx) = mpsc::unbounded_channel::<Message>();

    let mut writer = tokio::spawn(writer_task(sink, events, control_rx));

    let settings = gateway.settings().clone();
    let (pong_tx, pong_rx) = mpsc::unbounded_channel::<()>();
    let (dead_tx, mut dead_rx) = oneshot::channel::<()>();
    let pinger = tokio::spawn(ping_task(
        control_tx.clone(),
        pong_rx,
        dead_tx,
        settings.ping_interval().max(Duration::from_secs(1)),
        settings.pong_timeout(),
    ));

    let auth_deadline = sleep(settings.auth_timeout());
    tokio::pin!(auth_deadline);

    loop {
        tokio::select! {
            frame = stream.next() => {
                let message = match frame {
                    Some(Ok(message)) => message,
                    Some(Err(e)) => {
                        warn!(connection_id = %connection.id(), "WebSocket receive error: {}", e);
                        break;
                    }
                    None => {
                        debug!(connection_id = %connection.id(), "WebSocket stream ended");
                        break;
                    }
                };

                let was_authenticated = connection.is_authenticated();
                match message {
                    Message::Text(text) => gateway.handle_frame(&mut connection, &text).await,
                    Message::Binary(data) => match std::str::from_utf8(&data) {
                        Ok(text) => gateway.handle_frame(&mut connection, text).await,
                        Err(_) => gateway.handle_frame(&mut connection, "").await,
                    },
                    Message::Pong(_) => {
                        let _ = pong_tx.send(());
                    }
                    // Answered by the protocol layer
                    Message::Ping(_) => {}
                    Message::Close(frame) => {
                        info!(connection_id = %connection.id(), reason = ?frame, "Client initiated close");
                        break;
                    }
                }

                // Logging out restarts the authentication window
                if was_authenticated && !connection.is_authenticated() {
                    auth_deadline
                        .as_mut()
                        .reset(Instant::now() + settings.auth_timeout());
                }
            }
            _ = &mut auth_deadline, if !connection.is_authenticated() => {
                info!(connection_id = %connection.id(), "Authentication timeout, closing connection");
                let _ = control_tx.send(Message::Close(Some(CloseFrame {
                    code: AUTH_TIMEOUT_CLOSE_CODE,
                    reason: Cow::from("Authentication timeout"),
                })));
                break;
            }
            _ = &mut dead_rx => {
                debug!(connection_id = %connection.id(), "Heartbeat lost");
                break;
            }
        }
    }

    gateway.close(&mut connection).await;

    pinger.abort();
    drop(control_tx);
    drop(connection);
    if timeout(WRITER_GRACE, &mut writer).await.is_err() {
        writer.abort();
    }
}

async fn writer_task(
    mut sink: SplitSink<WebSocket, Message>,
    mut events: mpsc::UnboundedReceiver<ServerEvent>,
    mut control: mpsc::UnboundedReceiver<Message>,
) {
    loop {
        let message = tokio::select! {
            Some(event) = events.recv() => match event.to_frame() {
                Ok(frame) => Message::Text(frame),
                Err(e) => {
                    error!("Failed to serialize {}: {}", event.name(), e);
                    continue;
                }
            },
            Some(message) = control.recv() => message,
            else => break,
        };

        let closing = matches!(message, Message::Close(_));
        if sink.send(message).await.is_err() || closing {
            break;
        }
    }
    let _ = sink.close().await;
}

async fn ping_task(
    control: mpsc::UnboundedSender<Message>,
    mut pongs: mpsc::UnboundedReceiver<()>,
    dead: oneshot::Sender<()>,
    every: Duration,
    pong_timeout: Duration,
) {
    let mut ticker = interval(every);
    ticker.tick().await;

    loop {
        ticker.tick().await;
        if control.send(Message::Ping(b"ping".to_vec())).is_err() {
            return;
        }

        match timeout(pong_timeout, pongs.recv()).await {
            Ok(Some(())) => {}
            _ => {
                warn!("Pong timeout, closing connection");
                let _ = control.send(Message::Close(Some(CloseFrame {
                    code: close_code::AWAY,
                    reason: Cow::from("Pong timeout"),
                })));
                let _ = dead.send(());
                return;
            }
        }
    }
}
