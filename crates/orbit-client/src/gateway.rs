use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, warn};
use url::Url;

use orbit_types::events::{Acknowledgement, GatewayCommand, ServerEnvelope, SocketEvent};

use crate::error::ClientError;

/// Client end of the realtime gateway.
///
/// Every event that carries an ack id is acknowledged as soon as it has been
/// read, before it is handed to the caller.
pub struct GatewayListener {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl GatewayListener {
    pub async fn connect(url: &Url) -> Result<Self, ClientError> {
        let (stream, _) = connect_async(url.as_str()).await?;
        debug!("connected to gateway at {}", url.host_str().unwrap_or("?"));
        Ok(Self { stream })
    }

    /// The next event, or `None` once the server closes the connection.
    pub async fn next_event(&mut self) -> Result<Option<SocketEvent>, ClientError> {
        while let Some(frame) = self.stream.next().await {
            match frame? {
                Message::Text(text) => {
                    let envelope: ServerEnvelope = match serde_json::from_str(&text) {
                        Ok(envelope) => envelope,
                        Err(e) => {
                            warn!("unreadable gateway frame: {}", e);
                            continue;
                        }
                    };
                    if let Some(ack_id) = envelope.ack_id {
                        let ack = GatewayCommand::ack(ack_id, Acknowledgement::ok());
                        let text = serde_json::to_string(&ack)?;
                        self.stream.send(Message::Text(text.into())).await?;
                    }
                    return Ok(Some(envelope.event));
                }
                Message::Close(_) => return Ok(None),
                // Pings are answered by tungstenite itself.
                _ => {}
            }
        }
        Ok(None)
    }

    /// Forward every event into `events` until either side goes away.
    pub fn spawn(mut self, events: mpsc::UnboundedSender<SocketEvent>) -> JoinHandle<Result<(), ClientError>> {
        tokio::spawn(async move {
            while let Some(event) = self.next_event().await? {
                if events.send(event).is_err() {
                    break;
                }
            }
            Ok(())
        })
    }

    pub async fn close(mut self) -> Result<(), ClientError> {
        self.stream.close(None).await?;
        Ok(())
    }
}
