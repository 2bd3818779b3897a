//! WebSocket client side of the signaling protocol.

use crate::error::{Error, Result};
use crate::protocol::{ClientMessage, ServerMessage};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

pub struct SignalingClient {
    tx: mpsc::UnboundedSender<ClientMessage>,
    rx: mpsc::Receiver<ServerMessage>,
}

impl SignalingClient {
    pub async fn connect(url: &str) -> Result<Self> {
        let (ws_stream, _) = connect_async(url).await?;
        info!("Connected to signaling server at {}", url);
        let (mut write, mut read) = ws_stream.split();

        let (tx, rx) = mpsc::channel(100);
        let (outgoing_tx, mut outgoing_rx) = mpsc::unbounded_channel::<ClientMessage>();

        // Handle outgoing messages; the socket closes once every sender is gone
        tokio::spawn(async move {
            while let Some(msg) = outgoing_rx.recv().await {
                let json = match serde_json::to_string(&msg) {
                    Ok(json) => json,
                    Err(e) => {
                        warn!("Failed to encode {}: {}", msg.name(), e);
                        continue;
                    }
                };
                if let Err(e) = write.send(Message::Text(json)).await {
                    debug!("Signaling write failed: {}", e);
                    break;
                }
            }
            let _ = write.close().await;
        });

        // Handle incoming messages
        tokio::spawn(async move {
            while let Some(frame) = read.next().await {
                let text = match frame {
                    Ok(Message::Text(text)) => text,
                    Ok(Message::Close(_)) => break,
                    Ok(_) => continue,
                    Err(e) => {
                        warn!("Signaling read failed: {}", e);
                        break;
                    }
                };
                match serde_json::from_str::<ServerMessage>(&text) {
                    Ok(msg) => {
                        if tx.send(msg).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!("Ignoring malformed server message: {}", e),
                }
            }
            debug!("Signaling reader finished");
        });

        Ok(Self {
            tx: outgoing_tx,
            rx,
        })
    }

    pub fn send(&self, msg: ClientMessage) -> Result<()> {
        self.tx
            .send(msg)
            .map_err(|e| Error::Signaling(format!("Failed to send message: {}", e)))
    }

    /// Next server message, or `None` once the connection is gone.
    pub async fn receive(&mut self) -> Option<ServerMessage> {
        self.rx.recv().await
    }

    pub fn sender(&self) -> mpsc::UnboundedSender<ClientMessage> {
        self.tx.clone()
    }

    /// Split into the halves a session consumes.
    pub fn into_parts(
        self,
    ) -> (
        mpsc::UnboundedSender<ClientMessage>,
        mpsc::Receiver<ServerMessage>,
    ) {
        (self.tx, self.rx)
    }
}
