use super::Channel;
use crate::delegate::Delegate;
use crate::{Error, Result};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::{HeaderName, HeaderValue, AUTHORIZATION};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Close code reported when the stream ends without a close frame
const CLOSE_ABNORMAL: u16 = 1006;

#[derive(Default)]
struct WebSocketEvents {
    on_message: Delegate<String>,
    on_closed: Delegate<(u16, String)>,
    on_error: Delegate<String>,
}

/// Text channel over a WebSocket connection
///
/// Created unopened so listeners can be attached before any frame can
/// arrive. Frames sent before [`open`](Self::open) are queued and written
/// once the handshake completes.
pub struct WebSocketChannel {
    url: String,
    headers: Vec<(String, String)>,
    outbound: mpsc::UnboundedSender<Message>,
    queued: Mutex<Option<mpsc::UnboundedReceiver<Message>>>,
    events: Arc<WebSocketEvents>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl WebSocketChannel {
    /// Create a channel for `url` (ws:// or wss://)
    pub fn new(url: impl Into<String>) -> Self {
        let (outbound, queued) = mpsc::unbounded_channel();
        Self {
            url: url.into(),
            headers: Vec::new(),
            outbound,
            queued: Mutex::new(Some(queued)),
            events: Arc::new(WebSocketEvents::default()),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Add a header to the upgrade request
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Authenticate the upgrade request with a bearer token
    pub fn with_bearer_token(self, token: &str) -> Self {
        self.with_header(AUTHORIZATION.as_str(), format!("Bearer {}", token))
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Fires with `(code, reason)` once the connection is closed by either side
    pub fn on_closed(&self) -> &Delegate<(u16, String)> {
        &self.events.on_closed
    }

    /// Fires when the handshake or the connection fails
    pub fn on_error(&self) -> &Delegate<String> {
        &self.events.on_error
    }

    /// Perform the handshake and start the reader and writer tasks
    pub async fn open(&self) -> Result<()> {
        let queued = self
            .queued
            .lock()
            .take()
            .ok_or_else(|| Error::ChannelError("WebSocket channel already opened".to_string()))?;

        info!("Connecting to {}", self.url);

        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| Error::WebSocketError(format!("Invalid request for {}: {}", self.url, e)))?;
        for (name, value) in &self.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| Error::WebSocketError(format!("Invalid header name {}: {}", name, e)))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| Error::WebSocketError(format!("Invalid header value: {}", e)))?;
            request.headers_mut().insert(name, value);
        }

        let (ws_stream, _) = match connect_async(request).await {
            Ok(connected) => connected,
            Err(e) => {
                let message = format!("Failed to connect to {}: {}", self.url, e);
                self.events.on_error.broadcast(&message);
                return Err(Error::WebSocketError(message));
            }
        };

        info!("Connected to {}", self.url);

        let (write, read) = ws_stream.split();
        let mut tasks = self.tasks.lock();
        tasks.push(tokio::spawn(sender_task(write, queued)));
        tasks.push(tokio::spawn(receiver_task(read, Arc::clone(&self.events))));
        Ok(())
    }
}

async fn sender_task(
    mut write: futures::stream::SplitSink<WsStream, Message>,
    mut queued: mpsc::UnboundedReceiver<Message>,
) {
    while let Some(message) = queued.recv().await {
        let closing = matches!(message, Message::Close(_));
        if let Err(e) = write.send(message).await {
            error!("Failed to send WebSocket message: {}", e);
            break;
        }
        if closing {
            break;
        }
    }

    debug!("Sender task terminated");
}

async fn receiver_task(
    mut read: futures::stream::SplitStream<WsStream>,
    events: Arc<WebSocketEvents>,
) {
    let mut reported = false;

    while let Some(message) = read.next().await {
        match message {
            Ok(Message::Text(text)) => events.on_message.broadcast(&text),
            Ok(Message::Close(frame)) => {
                let (code, reason) = frame
                    .map(|f| (u16::from(f.code), f.reason.to_string()))
                    .unwrap_or((CLOSE_ABNORMAL, String::new()));
                info!("WebSocket closed: {} {}", code, reason);
                events.on_closed.broadcast(&(code, reason));
                reported = true;
                break;
            }
            Ok(Message::Binary(data)) => {
                warn!("Ignoring {} byte binary frame", data.len());
            }
            Ok(_) => {}
            Err(e) => {
                error!("WebSocket error: {}", e);
                events.on_error.broadcast(&e.to_string());
                reported = true;
                break;
            }
        }
    }

    if !reported {
        events
            .on_closed
            .broadcast(&(CLOSE_ABNORMAL, "Connection lost".to_string()));
    }

    debug!("Receiver task terminated");
}

impl Channel for WebSocketChannel {
    fn send(&self, message: &str) -> Result<()> {
        self.outbound
            .send(Message::Text(message.to_string()))
            .map_err(|_| Error::ChannelError(format!("WebSocket to {} is closed", self.url)))
    }

    fn close(&self, code: u16, reason: &str) {
        let frame = CloseFrame {
            code: CloseCode::from(code),
            reason: reason.to_string().into(),
        };
        if self.outbound.send(Message::Close(Some(frame))).is_err() {
            debug!("WebSocket to {} already closed", self.url);
        }
    }

    fn on_message(&self) -> &Delegate<String> {
        &self.events.on_message
    }
}

impl Drop for WebSocketChannel {
    fn drop(&mut self) {
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_open_failure_reports_error() {
        let channel = WebSocketChannel::new("ws://127.0.0.1:1/relay");
        let errors = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&errors);
        channel.on_error().add(move |e| sink.lock().push(e.clone()));

        let result = channel.open().await;
        assert!(matches!(result, Err(Error::WebSocketError(_))));
        assert_eq!(errors.lock().len(), 1);

        // the queue was consumed by the first attempt
        assert!(matches!(channel.open().await, Err(Error::ChannelError(_))));
    }

    #[tokio::test]
    async fn test_invalid_url_is_rejected() {
        let channel = WebSocketChannel::new("not a url");
        assert!(channel.open().await.is_err());
    }

    #[test]
    fn test_sends_before_open_are_queued() {
        let channel = WebSocketChannel::new("ws://localhost:9000").with_bearer_token("abc");
        assert!(channel.send("{\"jsonrpc\":\"2.0\"}").is_ok());
        assert_eq!(channel.headers[0].1, "Bearer abc");
        assert_eq!(channel.url(), "ws://localhost:9000");
    }
}
