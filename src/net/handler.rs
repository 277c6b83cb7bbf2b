//! Connection handler module
//!
//! Handles the lifecycle of client connections including:
//! - WebSocket upgrade and session registration
//! - A writer task draining the session's outbound queue
//! - The read loop feeding binary frames to the dispatcher
//! - Teardown: despawn, leave notice, session removal

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::error::Elapsed;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{accept_async, WebSocketStream};
use tracing::{debug, info, trace, warn};

use crate::error::{NetworkError, ProtocolError, Result, ServerError};
use crate::net::buffer::MAX_PACKET_SIZE;
use crate::net::session::{Session, SessionId};
use crate::protocol::packets;
use crate::AppState;

/// How long queued frames may take to flush after the read loop ends
const WRITER_DRAIN_SECS: u64 = 5;

type WsSink = SplitSink<WebSocketStream<TcpStream>, Message>;
type WsSource = SplitStream<WebSocketStream<TcpStream>>;

/// Connection handler for processing client connections
pub struct ConnectionHandler {
    /// Shared application state
    state: Arc<AppState>,
}

impl ConnectionHandler {
    /// Create a new connection handler
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    /// Handle a WebSocket connection from accept to teardown
    pub async fn handle_websocket(&self, stream: TcpStream, addr: SocketAddr) -> Result<()> {
        debug!(address = %addr, "Handling WebSocket connection");

        // Set TCP options before upgrade
        stream.set_nodelay(true)?;

        // Perform WebSocket handshake
        let ws_stream = accept_async(stream)
            .await
            .map_err(|e| ServerError::Network(NetworkError::WebSocket(e.to_string())))?;

        let (mut sink, source) = ws_stream.split();

        let (outbound_tx, outbound_rx) = mpsc::channel(self.state.config.outbound_queue);
        let session = match self
            .state
            .sessions
            .create_session_with_channel(addr, outbound_tx)
        {
            Ok(session) => session,
            Err(e) => {
                let notice = packets::build_disconnect("Server is full");
                let _ = sink.send(Message::Binary(notice.to_vec())).await;
                let _ = sink.close().await;
                return Err(e);
            }
        };

        info!(session_id = session.id, address = %addr, "WebSocket connection established");

        let writer = tokio::spawn(write_loop(sink, outbound_rx, session.id));

        let result = self.read_loop(source, &session).await;

        let reason = match &result {
            Ok(()) => session
                .close_reason()
                .unwrap_or_else(|| "Connection closed".to_string()),
            Err(e) => {
                if let ServerError::Protocol(p) = e {
                    let _ = session.try_send(packets::build_disconnect(&p.to_string()));
                }
                leave_reason(e).to_string()
            }
        };
        self.state.dispatcher.leave(&session, &reason);

        let session_id = session.id;
        // The writer finishes once the last sender (held by the session) is gone
        drop(session);
        match timeout(Duration::from_secs(WRITER_DRAIN_SECS), writer).await {
            Ok(_) => trace!(session_id = session_id, "Writer finished"),
            Err(_) => debug!(session_id = session_id, "Writer did not drain in time"),
        }

        debug!(session_id = session_id, reason = %reason, "Connection handler ending");
        result
    }

    /// Read frames until the peer goes away, a frame is rejected or a close is requested
    async fn read_loop(&self, mut source: WsSource, session: &Session) -> Result<()> {
        let read_timeout = self.state.config.read_timeout();

        loop {
            let next = tokio::select! {
                _ = session.closed() => {
                    debug!(session_id = session.id, "Close requested");
                    return Ok(());
                }
                next = next_message(&mut source, read_timeout) => next,
            };

            let message = match next {
                Err(_) => return Err(NetworkError::Timeout.into()),
                Ok(None) => return Ok(()),
                Ok(Some(Err(e))) => return Err(NetworkError::WebSocket(e.to_string()).into()),
                Ok(Some(Ok(message))) => message,
            };

            match message {
                Message::Binary(data) => {
                    if data.len() > MAX_PACKET_SIZE {
                        return Err(ProtocolError::MessageTooLarge {
                            size: data.len(),
                            max: MAX_PACKET_SIZE,
                        }
                        .into());
                    }
                    self.state.dispatcher.dispatch(session, &data)?;
                }
                Message::Ping(_) | Message::Pong(_) => {
                    trace!(session_id = session.id, "WebSocket control frame");
                }
                Message::Close(_) => {
                    debug!(session_id = session.id, "WebSocket close message received");
                    return Ok(());
                }
                Message::Text(_) | Message::Frame(_) => {
                    return Err(ProtocolError::NonBinaryFrame.into());
                }
            }
        }
    }
}

/// Next inbound message, bounded by the read deadline when one is set
async fn next_message(
    source: &mut WsSource,
    read_timeout: Option<Duration>,
) -> std::result::Result<Option<std::result::Result<Message, WsError>>, Elapsed> {
    match read_timeout {
        Some(limit) => timeout(limit, source.next()).await,
        None => Ok(source.next().await),
    }
}

/// Forward queued frames to the socket until the queue closes
async fn write_loop(mut sink: WsSink, mut outbound_rx: mpsc::Receiver<Bytes>, session_id: SessionId) {
    while let Some(frame) = outbound_rx.recv().await {
        trace!(session_id = session_id, len = frame.len(), "Sending frame");
        if let Err(e) = sink.send(Message::Binary(frame.to_vec())).await {
            debug!(session_id = session_id, error = %e, "WebSocket write failed");
            // Senders now see a closed queue and report the connection as lost
            outbound_rx.close();
            return;
        }
    }
    if let Err(e) = sink.close().await {
        trace!(session_id = session_id, error = %e, "Error during WebSocket close");
    }
}

/// Reason shown to other players when a connection ends with an error
fn leave_reason(error: &ServerError) -> &'static str {
    match error {
        ServerError::Network(NetworkError::Timeout) => "Timed out",
        ServerError::Protocol(_) => "Protocol error",
        e if e.is_connection_lost() => "Connection lost",
        _ => {
            warn!(error = %error, "Connection ended with error");
            "Connection error"
        }
    }
}
