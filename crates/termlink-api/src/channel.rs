//! Persistent bidirectional channel to a terminal.
//!
//! A [`Channel`] is the consumer end of one open WebSocket: inbound JSON
//! frames arrive through [`Channel::next`], outbound frames go through a
//! cloneable [`ChannelSender`], and dropping or closing the channel tears
//! the socket down. The socket itself is driven by a background pump task.
//!
//! Malformed inbound frames are logged and skipped; the socket stays open.
//! The channel does not reconnect -- that policy belongs to the caller.
//!
//! # Example
//!
//! ```rust,ignore
//! use termlink_api::channel::{open_websocket, identity_frame};
//!
//! let url = Url::parse("wss://relay.example/ws/terminal/7/")?;
//! let greeting = vec![serde_json::json!({"type": "authenticate", "terminal_id": 7})];
//! let mut channel = open_websocket(&url, None, greeting, identity_frame).await?;
//!
//! while let Some(event) = channel.next().await {
//!     println!("{event:?}");
//! }
//! ```

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{self, ClientRequestBuilder, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};
use url::Url;

use crate::error::Error;

// ── Channel capacities ───────────────────────────────────────────────

const FRAME_CHANNEL_CAPACITY: usize = 256;
const OUTBOUND_CHANNEL_CAPACITY: usize = 64;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Rewrites an inbound JSON object into the canonical `{type, ...}` shape,
/// or drops it by returning `None`.
pub type FrameMapper = fn(Value) -> Option<Value>;

/// Mapper for transports whose frames are already canonical.
pub fn identity_frame(frame: Value) -> Option<Value> {
    Some(frame)
}

// ── Events ───────────────────────────────────────────────────────────

/// Why the remote side ended the channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseReason {
    /// WebSocket close code, when the peer sent a close frame.
    pub code: Option<u16>,
    pub reason: String,
}

/// Something the channel observed.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    /// A well-formed inbound JSON object, already in canonical shape.
    Frame(Value),
    /// The peer closed the socket or the connection broke. Always the last event.
    Closed(CloseReason),
}

// ── Channel / sender / peer ──────────────────────────────────────────

/// Consumer end of an open channel.
pub struct Channel {
    events: mpsc::Receiver<ChannelEvent>,
    sender: ChannelSender,
    cancel: CancellationToken,
}

/// Cloneable handle for writing frames to an open channel.
#[derive(Debug, Clone)]
pub struct ChannelSender {
    tx: mpsc::Sender<Value>,
}

/// Producer end of a channel: whatever drives the socket holds this.
///
/// Public so alternative transports (and test doubles) can feed a
/// [`Channel`] without a real socket.
pub struct ChannelPeer {
    pub events: mpsc::Sender<ChannelEvent>,
    pub outbound: mpsc::Receiver<Value>,
    pub cancel: CancellationToken,
}

impl Channel {
    /// Create a connected consumer/producer pair.
    pub fn pair() -> (Channel, ChannelPeer) {
        let (events_tx, events_rx) = mpsc::channel(FRAME_CHANNEL_CAPACITY);
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();

        let channel = Channel {
            events: events_rx,
            sender: ChannelSender { tx: outbound_tx },
            cancel: cancel.clone(),
        };
        let peer = ChannelPeer {
            events: events_tx,
            outbound: outbound_rx,
            cancel,
        };
        (channel, peer)
    }

    /// Wait for the next event. `None` once the producer is gone.
    pub async fn next(&mut self) -> Option<ChannelEvent> {
        self.events.recv().await
    }

    /// A handle for sending frames.
    pub fn sender(&self) -> ChannelSender {
        self.sender.clone()
    }

    /// Token that fires when the channel is closed locally.
    pub fn close_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Close the channel from this side. No `Closed` event follows.
    pub fn close(&self) {
        self.cancel.cancel();
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl ChannelSender {
    /// Queue a frame for sending.
    pub async fn send(&self, frame: Value) -> Result<(), Error> {
        self.tx.send(frame).await.map_err(|_| Error::ChannelClosed)
    }

    /// Queue a frame without waiting for buffer space.
    pub fn try_send(&self, frame: Value) -> Result<(), Error> {
        self.tx.try_send(frame).map_err(|_| Error::ChannelClosed)
    }
}

// ── WebSocket implementation ─────────────────────────────────────────

/// Open a WebSocket, send the `greeting` frames in order, and spawn the
/// pump that drives it.
///
/// If `bearer` is provided it is sent as an `Authorization` header on the
/// upgrade request.
pub async fn open_websocket(
    url: &Url,
    bearer: Option<&SecretString>,
    greeting: Vec<Value>,
    mapper: FrameMapper,
) -> Result<Channel, Error> {
    info!(url = %url, "Connecting to WebSocket");

    let uri: tungstenite::http::Uri = url
        .as_str()
        .parse()
        .map_err(|e: tungstenite::http::uri::InvalidUri| Error::WebSocketConnect(e.to_string()))?;

    let mut request = ClientRequestBuilder::new(uri);
    if let Some(token) = bearer {
        request = request.with_header("Authorization", format!("Bearer {}", token.expose_secret()));
    }

    let (ws_stream, _response) = tokio_tungstenite::connect_async(request)
        .await
        .map_err(|e| Error::WebSocketConnect(e.to_string()))?;

    let (mut write, read) = ws_stream.split();

    for frame in greeting {
        write
            .send(Message::Text(frame.to_string().into()))
            .await
            .map_err(|e| Error::WebSocketConnect(e.to_string()))?;
    }

    info!("WebSocket connected");

    let (channel, peer) = Channel::pair();
    tokio::spawn(pump(write, read, peer, mapper));
    Ok(channel)
}

/// Drive one socket until it closes or the consumer cancels.
async fn pump(
    mut write: SplitSink<WsStream, Message>,
    mut read: SplitStream<WsStream>,
    mut peer: ChannelPeer,
    mapper: FrameMapper,
) {
    let reason = loop {
        tokio::select! {
            biased;
            () = peer.cancel.cancelled() => {
                let _ = write.send(Message::Close(None)).await;
                debug!("WebSocket closed locally");
                return;
            }
            outbound = peer.outbound.recv() => {
                let Some(frame) = outbound else {
                    let _ = write.send(Message::Close(None)).await;
                    return;
                };
                if let Err(e) = write.send(Message::Text(frame.to_string().into())).await {
                    break CloseReason { code: None, reason: e.to_string() };
                }
            }
            frame = read.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(value) = parse_frame(&text, mapper) {
                            if peer.events.send(ChannelEvent::Frame(value)).await.is_err() {
                                return;
                            }
                        }
                    }
                    Some(Ok(Message::Ping(_))) => {
                        // tungstenite queues the pong itself
                        trace!("WebSocket ping");
                    }
                    Some(Ok(Message::Close(frame))) => {
                        break match frame {
                            Some(cf) => CloseReason {
                                code: Some(u16::from(cf.code)),
                                reason: cf.reason.as_str().to_owned(),
                            },
                            None => CloseReason { code: None, reason: "close frame without payload".into() },
                        };
                    }
                    Some(Err(e)) => {
                        break CloseReason { code: None, reason: e.to_string() };
                    }
                    None => {
                        break CloseReason { code: None, reason: "stream ended".into() };
                    }
                    Some(Ok(_)) => {
                        // Binary, Pong, Frame -- ignore
                    }
                }
            }
        }
    };

    info!(code = ?reason.code, reason = %reason.reason, "WebSocket closed by peer");
    let _ = peer.events.send(ChannelEvent::Closed(reason)).await;
}

// ── Frame parsing ────────────────────────────────────────────────────

/// Decode one text frame. Anything that is not a JSON object is dropped.
pub(crate) fn parse_frame(text: &str, mapper: FrameMapper) -> Option<Value> {
    match serde_json::from_str::<Value>(text) {
        Ok(value @ Value::Object(_)) => mapper(value),
        Ok(other) => {
            debug!(frame = %other, "Dropping non-object frame");
            None
        }
        Err(e) => {
            debug!(error = %e, "Dropping malformed frame");
            None
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────
