//! Transport seam for session drivers.
//!
//! The driver only ever sees a [`TransportPipe`] — a pair of text-frame
//! channels. `WsTransport` backs it with a real WebSocket; `PipeTransport`
//! backs it with in-process channels so the driver's full lifecycle is
//! testable without a network.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

use sh_domain::{Error, Result};

/// One established connection: JSON text frames in both directions.
/// Dropping the pipe (or either channel half closing) ends the connection.
pub struct TransportPipe {
    pub outbound: mpsc::Sender<String>,
    pub inbound: mpsc::Receiver<String>,
}

#[async_trait]
pub trait SessionTransport: Send + Sync {
    /// Dial one connection. Each call yields a fresh pipe.
    async fn connect(&self) -> Result<TransportPipe>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// WebSocket transport
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Dials the provider's realtime endpoint with the model as a query
/// parameter and the api key as a bearer header.
pub struct WsTransport {
    ws_url: String,
    api_key: Option<String>,
    model: String,
}

impl WsTransport {
    pub fn new(ws_url: &str, api_key: Option<&str>, model: &str) -> Self {
        Self {
            ws_url: ws_url.to_owned(),
            api_key: api_key.map(str::to_owned),
            model: model.to_owned(),
        }
    }

    fn build_url(&self) -> String {
        let sep = if self.ws_url.contains('?') { "&" } else { "?" };
        format!("{}{sep}model={}", self.ws_url, self.model)
    }
}

#[async_trait]
impl SessionTransport for WsTransport {
    async fn connect(&self) -> Result<TransportPipe> {
        use tokio_tungstenite::tungstenite::client::IntoClientRequest;

        let url = self.build_url();
        let mut request = url
            .clone()
            .into_client_request()
            .map_err(|e| Error::Http(format!("bad ws url {url}: {e}")))?;
        if let Some(key) = &self.api_key {
            let value = format!("Bearer {key}")
                .parse()
                .map_err(|_| Error::Http("api key is not a valid header value".into()))?;
            request.headers_mut().insert("Authorization", value);
        }

        let (ws, _response) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| Error::Http(format!("connecting {url}: {e}")))?;
        let (mut sink, mut stream) = ws.split();

        let (outbound_tx, mut outbound_rx) = mpsc::channel::<String>(64);
        let (inbound_tx, inbound_rx) = mpsc::channel::<String>(256);

        // Writer task: forwards outbound frames to the socket.
        tokio::spawn(async move {
            while let Some(text) = outbound_rx.recv().await {
                if sink.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
            let _ = sink.close().await;
        });

        // Reader task: forwards text frames inbound; ends on close/error.
        tokio::spawn(async move {
            while let Some(Ok(msg)) = stream.next().await {
                match msg {
                    Message::Text(text) => {
                        if inbound_tx.send(text.to_string()).await.is_err() {
                            break;
                        }
                    }
                    Message::Close(_) => break,
                    // WS-level ping/pong is handled by tungstenite.
                    _ => {}
                }
            }
        });

        Ok(TransportPipe {
            outbound: outbound_tx,
            inbound: inbound_rx,
        })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// In-process transport (tests)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The provider side of one accepted in-process connection.
pub struct PipeEnd {
    /// Frames the driver sent.
    pub from_driver: mpsc::Receiver<String>,
    /// Push frames to the driver.
    pub to_driver: mpsc::Sender<String>,
}

impl PipeEnd {
    /// Send a typed server event to the driver.
    pub async fn send_event(&self, event: &crate::protocol::ServerEvent) {
        let _ = self
            .to_driver
            .send(serde_json::to_string(event).expect("serializable event"))
            .await;
    }

    /// Receive and parse the next client event, with a timeout.
    pub async fn next_client_event(&mut self) -> Option<crate::protocol::ClientEvent> {
        loop {
            let text = tokio::time::timeout(
                std::time::Duration::from_secs(5),
                self.from_driver.recv(),
            )
            .await
            .ok()??;
            match serde_json::from_str(&text) {
                Ok(event) => return Some(event),
                Err(_) => continue,
            }
        }
    }
}

/// In-memory transport: every `connect()` call produces a new pipe and
/// hands its provider side to the test over the accept channel.
pub struct PipeTransport {
    accept_tx: mpsc::Sender<PipeEnd>,
    /// When true, the next `connect` call fails (to exercise backoff).
    fail_next: parking_lot::Mutex<u32>,
}

impl PipeTransport {
    pub fn new() -> (Self, mpsc::Receiver<PipeEnd>) {
        let (accept_tx, accept_rx) = mpsc::channel(8);
        (
            Self {
                accept_tx,
                fail_next: parking_lot::Mutex::new(0),
            },
            accept_rx,
        )
    }

    /// Make the next `n` connect attempts fail.
    pub fn fail_next_connects(&self, n: u32) {
        *self.fail_next.lock() = n;
    }
}

#[async_trait]
impl SessionTransport for PipeTransport {
    async fn connect(&self) -> Result<TransportPipe> {
        {
            let mut remaining = self.fail_next.lock();
            if *remaining > 0 {
                *remaining -= 1;
                return Err(Error::Http("simulated connect failure".into()));
            }
        }

        let (driver_out_tx, driver_out_rx) = mpsc::channel(64);
        let (provider_out_tx, provider_out_rx) = mpsc::channel(256);

        let end = PipeEnd {
            from_driver: driver_out_rx,
            to_driver: provider_out_tx,
        };
        self.accept_tx
            .send(end)
            .await
            .map_err(|_| Error::Http("test harness dropped the accept channel".into()))?;

        Ok(TransportPipe {
            outbound: driver_out_tx,
            inbound: provider_out_rx,
        })
    }
}
