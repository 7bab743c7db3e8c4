use anyhow::{anyhow, Result};
use futures_util::stream::SplitStream;
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use super::connection::Event;

pub type EventSender = mpsc::UnboundedSender<Event>;

/// Frames queued for the writer task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outgoing {
    Text(String),
    Pong(Vec<u8>),
    Close,
}

/// Handle to an open transport session
///
/// Dropping the session stops both of its tasks, so a discarded session never
/// keeps reading from a peer that went silent.
pub struct Session {
    tx: mpsc::UnboundedSender<Outgoing>,
    writer: Option<JoinHandle<()>>,
    reader: Option<JoinHandle<()>>,
}

impl Session {
    pub fn new(
        tx: mpsc::UnboundedSender<Outgoing>,
        writer: Option<JoinHandle<()>>,
        reader: Option<JoinHandle<()>>,
    ) -> Self {
        Self { tx, writer, reader }
    }

    pub fn is_open(&self) -> bool {
        !self.tx.is_closed()
    }

    pub fn send_text(&self, text: String) -> bool {
        self.tx.send(Outgoing::Text(text)).is_ok()
    }

    /// Queue a close frame and give the writer up to `wait` to flush it
    pub async fn close(mut self, wait: Duration) {
        let _ = self.tx.send(Outgoing::Close);
        if let Some(writer) = self.writer.take() {
            if tokio::time::timeout(wait, writer).await.is_err() {
                log::warn!("[Transport] Close frame not flushed within {}ms", wait.as_millis());
            }
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Some(writer) = self.writer.take() {
            writer.abort();
        }
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("open", &self.is_open())
            .finish()
    }
}

/// Opens sessions and reports their lifecycle as events tagged with `epoch`
///
/// `open` returns `Err` only when the attempt cannot even begin; every later
/// outcome (`Opened`, `Message`, `Closed`, `Error`) arrives on `events`.
pub trait Transport: Send + Sync + 'static {
    fn open(&self, url: &str, epoch: u64, events: EventSender) -> Result<()>;
}

/// WebSocket transport over tokio-tungstenite (rustls for `wss://`)
#[derive(Debug, Clone, Copy)]
pub struct WsTransport;

impl WsTransport {
    pub fn new() -> Self {
        let _ = rustls::crypto::ring::default_provider().install_default();
        Self
    }
}

impl Default for WsTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for WsTransport {
    fn open(&self, url: &str, epoch: u64, events: EventSender) -> Result<()> {
        let request = url
            .into_client_request()
            .map_err(|e| anyhow!("Invalid server URL '{}': {}", url, e))?;

        tokio::spawn(async move {
            match connect_async(request).await {
                Ok((stream, _)) => run_session(stream, epoch, events).await,
                Err(e) => {
                    let _ = events.send(Event::Error {
                        epoch,
                        reason: format!("Failed to connect to WebSocket: {}", e),
                    });
                }
            }
        });

        Ok(())
    }
}

async fn run_session(
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    epoch: u64,
    events: EventSender,
) {
    let (mut ws_sender, ws_receiver) = stream.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Outgoing>();

    let writer_events = events.clone();
    let writer = tokio::spawn(async move {
        while let Some(outgoing) = rx.recv().await {
            let (message, closing) = match outgoing {
                Outgoing::Text(text) => (Message::Text(text), false),
                Outgoing::Pong(data) => (Message::Pong(data), false),
                Outgoing::Close => (Message::Close(None), true),
            };

            if let Err(e) = ws_sender.send(message).await {
                let _ = writer_events.send(Event::Error {
                    epoch,
                    reason: format!("Failed to send: {}", e),
                });
                break;
            }
            if closing {
                break;
            }
        }
    });

    // The reader must not keep the queue alive on its own
    let pong_tx = tx.downgrade();
    let (ready_tx, ready_rx) = oneshot::channel::<()>();
    let reader_events = events.clone();
    let reader = tokio::spawn(async move {
        // Hold frames back until `Opened` has been delivered
        if ready_rx.await.is_ok() {
            read_frames(ws_receiver, pong_tx, epoch, reader_events).await;
        }
    });

    let session = Session::new(tx, Some(writer), Some(reader));
    if events.send(Event::Opened { epoch, session }).is_ok() {
        let _ = ready_tx.send(());
    }
}

async fn read_frames(
    mut ws_receiver: SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>,
    pong_tx: mpsc::WeakUnboundedSender<Outgoing>,
    epoch: u64,
    events: EventSender,
) {
    while let Some(message) = ws_receiver.next().await {
        match message {
            Ok(Message::Text(text)) => {
                if events.send(Event::Message { epoch, text }).is_err() {
                    return;
                }
            }
            Ok(Message::Binary(data)) => match String::from_utf8(data) {
                Ok(text) => {
                    if events.send(Event::Message { epoch, text }).is_err() {
                        return;
                    }
                }
                Err(_) => log::warn!("[Transport] Dropping non UTF-8 binary frame"),
            },
            Ok(Message::Ping(data)) => {
                if let Some(tx) = pong_tx.upgrade() {
                    let _ = tx.send(Outgoing::Pong(data));
                }
            }
            Ok(Message::Close(frame)) => {
                log::debug!("[Transport] Close frame received: {:?}", frame);
                let _ = events.send(Event::Closed { epoch });
                return;
            }
            Ok(_) => {}
            Err(e) => {
                let _ = events.send(Event::Error {
                    epoch,
                    reason: format!("WebSocket error: {}", e),
                });
                return;
            }
        }
    }

    let _ = events.send(Event::Closed { epoch });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_invalid_url_fails_to_begin() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let result = WsTransport::new().open("not a url", 1, tx);
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_refused_connection_reports_error_event() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let (tx, mut rx) = mpsc::unbounded_channel();
        WsTransport::new()
            .open(&format!("ws://127.0.0.1:{port}"), 7, tx)
            .unwrap();

        match rx.recv().await {
            Some(Event::Error { epoch, .. }) => assert_eq!(epoch, 7),
            other => panic!("expected error event, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_session_close_flushes_and_reports_closed() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let writer = tokio::spawn(async move {
            while let Some(outgoing) = rx.recv().await {
                if outgoing == Outgoing::Close {
                    break;
                }
            }
        });

        let session = Session::new(tx, Some(writer), None);
        assert!(session.is_open());
        assert!(session.send_text("hello".to_string()));
        session.close(Duration::from_secs(1)).await;
    }

    #[test]
    fn test_session_not_open_after_receiver_dropped() {
        let (tx, rx) = mpsc::unbounded_channel();
        let session = Session::new(tx, None, None);
        drop(rx);

        assert!(!session.is_open());
        assert!(!session.send_text("lost".to_string()));
    }

    #[tokio::test]
    async fn test_dropping_session_stops_reader() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let (alive_tx, alive_rx) = oneshot::channel::<()>();
        let reader = tokio::spawn(async move {
            let _alive = alive_tx;
            std::future::pending::<()>().await;
        });

        drop(Session::new(tx, None, Some(reader)));

        // The sender is dropped only when the reader task is torn down
        assert!(alive_rx.await.is_err());
    }
}
