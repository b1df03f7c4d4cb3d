//! WebSocket listener using tokio-tungstenite.
//!
//! Each accepted connection is one viewer. Frames carry one JSON message
//! each; see `webterm_core::messages` for the schema.

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, error, info, warn};
use webterm_core::{
    decode_binary_frame, decode_frame, encode_frame, ClientMessage, ServerMessage, TermError,
    TermResult,
};

/// Pause after a failed `accept` before trying again.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

pub type WsStream = WebSocketStream<TcpStream>;
pub type WsSink = SplitSink<WsStream, Message>;
pub type WsSource = SplitStream<WsStream>;

/// A handle to an accepted WebSocket connection.
pub struct WebSocketConnection {
    pub ws_stream: WsStream,
    pub remote_addr: SocketAddr,
}

/// One inbound frame from a viewer.
#[derive(Debug)]
pub enum Inbound {
    Message(ClientMessage),
    /// The frame could not be decoded; the connection is still usable.
    Malformed(TermError),
}

/// Start the WebSocket listener.
///
/// Returns the bound address and a receiver that yields accepted connections.
pub async fn start_listener(
    bind_addr: SocketAddr,
) -> TermResult<(SocketAddr, mpsc::Receiver<WebSocketConnection>)> {
    let tcp_listener = TcpListener::bind(bind_addr)
        .await
        .map_err(|e| TermError::Transport(format!("WS bind failed: {e}")))?;
    let local_addr = tcp_listener.local_addr()?;

    info!(addr = %local_addr, "WebSocket listener started");

    let (tx, rx) = mpsc::channel::<WebSocketConnection>(64);
    tokio::spawn(accept_loop(tcp_listener, tx));
    Ok((local_addr, rx))
}

/// Accept TCP connections and upgrade each on its own task. A failed
/// accept (e.g. EMFILE) waits `ACCEPT_BACKOFF` before the next attempt.
/// Stops once nobody holds the receiver.
async fn accept_loop(listener: TcpListener, tx: mpsc::Sender<WebSocketConnection>) {
    while !tx.is_closed() {
        match listener.accept().await {
            Ok((stream, remote_addr)) => {
                tokio::spawn(upgrade(stream, remote_addr, tx.clone()));
            }
            Err(e) => {
                error!(error = %e, "TCP accept failed");
                tokio::time::sleep(ACCEPT_BACKOFF).await;
            }
        }
    }
    debug!("WebSocket accept loop stopped");
}

async fn upgrade(
    stream: TcpStream,
    remote_addr: SocketAddr,
    tx: mpsc::Sender<WebSocketConnection>,
) {
    let ws_stream = match tokio_tungstenite::accept_async(stream).await {
        Ok(ws_stream) => ws_stream,
        Err(e) => {
            warn!(remote = %remote_addr, error = %e, "WebSocket handshake failed");
            return;
        }
    };
    debug!(remote = %remote_addr, "WebSocket connection accepted");
    if tx.send(WebSocketConnection { ws_stream, remote_addr }).await.is_err() {
        warn!(remote = %remote_addr, "no server is accepting viewers");
    }
}

/// Send one message to a viewer.
pub async fn ws_send(sink: &mut WsSink, message: &ServerMessage) -> TermResult<()> {
    let text = encode_frame(message)?;
    sink.send(Message::Text(text.into()))
        .await
        .map_err(|e| TermError::Transport(format!("WS send failed: {e}")))
}

/// Receive the next viewer message.
///
/// Returns `None` once the connection is closed. Pings are answered by
/// tungstenite itself.
pub async fn ws_recv(source: &mut WsSource) -> TermResult<Option<Inbound>> {
    loop {
        let decoded = match source.next().await {
            Some(Ok(Message::Text(text))) => decode_frame::<ClientMessage>(&text),
            Some(Ok(Message::Binary(data))) => decode_binary_frame::<ClientMessage>(&data),
            Some(Ok(Message::Close(_))) | None => return Ok(None),
            Some(Ok(_)) => continue,
            Some(Err(e)) => {
                return Err(TermError::Transport(format!("WS recv failed: {e}")));
            }
        };
        return Ok(Some(match decoded {
            Ok(message) => Inbound::Message(message),
            Err(e) => Inbound::Malformed(e),
        }));
    }
}
