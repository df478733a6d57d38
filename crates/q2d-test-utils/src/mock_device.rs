//! Raw WebSocket device for exercising the server's device link.
//!
//! Unlike the real client, `MockDevice` never answers pings on its own: a
//! ping is only answered while a `recv_*` call is polling the socket. Tests
//! simulate a hung controller by simply not reading.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use q2d_core::protocol::{Codec, Message};

/// A test device connected to the server's device channel.
pub struct MockDevice {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl MockDevice {
    /// Connect to `url`. Panics if the handshake fails.
    pub async fn connect(url: &str) -> Self {
        let (ws, _response) = connect_async(url)
            .await
            .unwrap_or_else(|e| panic!("mock device failed to connect to {url}: {e}"));
        Self { ws }
    }

    /// Receive the next protocol message, skipping control frames.
    ///
    /// Returns `None` on timeout, close, or a frame that is not a valid
    /// message.
    pub async fn recv_message(&mut self, timeout: Duration) -> Option<Message> {
        let text = self.recv_text(timeout).await?;
        Codec::decode(&text).ok()
    }

    /// Receive the next text frame, skipping control frames.
    pub async fn recv_text(&mut self, timeout: Duration) -> Option<String> {
        let read = async {
            while let Some(frame) = self.ws.next().await {
                match frame {
                    Ok(WsMessage::Text(text)) => return Some(text.as_str().to_string()),
                    Ok(WsMessage::Close(_)) | Err(_) => return None,
                    Ok(_) => continue,
                }
            }
            None
        };
        tokio::time::timeout(timeout, read).await.ok().flatten()
    }

    /// Wait until the server closes the connection.
    ///
    /// Returns `false` if the connection is still open after `timeout`.
    /// Text frames received meanwhile are discarded.
    pub async fn wait_closed(&mut self, timeout: Duration) -> bool {
        let drain = async {
            loop {
                match self.ws.next().await {
                    None | Some(Err(_)) | Some(Ok(WsMessage::Close(_))) => return,
                    Some(Ok(_)) => continue,
                }
            }
        };
        tokio::time::timeout(timeout, drain).await.is_ok()
    }

    /// Send a protocol message.
    pub async fn send(&mut self, msg: &Message) {
        let frame = Codec::encode(msg).expect("message encodes");
        self.send_raw(&frame).await;
    }

    /// Send an arbitrary text frame.
    pub async fn send_raw(&mut self, text: &str) {
        self.ws
            .send(WsMessage::Text(text.to_string().into()))
            .await
            .expect("mock device send");
    }

    /// Close the connection from the device side.
    pub async fn close(mut self) {
        let _ = self.ws.close(None).await;
    }
}
