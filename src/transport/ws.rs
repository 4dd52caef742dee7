//! The websocket transport, a thin driver around a tokio-tungstenite client
//! socket.
//!
//! Two tasks service the connection: a reader pumping incoming frames into
//! the engine sink and a writer draining the outbound channel. The writer
//! only flushes once the channel runs empty so adjacent frames share a
//! syscall.

use futures_util::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use http::{HeaderMap, HeaderValue};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{
    WebSocketStream,
    tungstenite::{self, Message, Utf8Bytes, client::IntoClientRequest},
};
use url::Url;

use crate::packet::RawFrame;
use crate::str::Str;
use crate::transport::{EventSink, Transport, TransportEvent, TransportType};

/// The built in websocket transport
#[derive(Debug, Default)]
pub struct WsTransport {
    write_tx: Option<mpsc::UnboundedSender<RawFrame>>,
    task: Option<JoinHandle<()>>,
}

impl Transport for WsTransport {
    fn kind(&self) -> TransportType {
        TransportType::Websocket
    }

    fn open(&mut self, url: Url, headers: &HeaderMap, cookies: &[String], sink: EventSink) {
        let (write_tx, write_rx) = mpsc::unbounded_channel();
        self.write_tx = Some(write_tx);
        let headers = headers.clone();
        let cookie = cookies.join("; ");
        self.task = Some(tokio::spawn(async move {
            let req = match client_request(&url, headers, &cookie) {
                Ok(req) => req,
                Err(e) => return sink.send(TransportEvent::Error(e)),
            };
            let ws = match tokio_tungstenite::connect_async(req).await {
                Ok((ws, _res)) => ws,
                Err(e) => return sink.send(TransportEvent::Error(e.to_string().into())),
            };
            tracing::debug!(url = %url, "websocket connected");
            sink.send(TransportEvent::Opened);
            let (tx, rx) = ws.split();
            forward_to_peer(tx, write_rx);
            forward_to_engine(rx, &sink).await;
        }));
    }

    fn set_url(&mut self, _url: Url) {
        // a websocket keeps the url it connected with
    }

    fn send_text(&mut self, data: Str) {
        if let Some(tx) = &self.write_tx {
            tx.send(RawFrame::Text(data)).ok();
        }
    }

    fn send_binary(&mut self, data: bytes::Bytes) {
        if let Some(tx) = &self.write_tx {
            tx.send(RawFrame::Binary(data)).ok();
        }
    }

    fn close(&mut self) {
        // dropping the sender lets the writer drain what is queued, send a
        // close frame and exit on its own
        self.write_tx = None;
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for WsTransport {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Build the websocket handshake request with the session headers attached
fn client_request(
    url: &Url,
    headers: HeaderMap,
    cookie: &str,
) -> Result<http::Request<()>, Str> {
    let mut req = url
        .as_str()
        .into_client_request()
        .map_err(|e| Str::from(e.to_string()))?;
    req.headers_mut().extend(headers);
    if !cookie.is_empty() {
        let value = HeaderValue::from_str(cookie).map_err(|e| Str::from(e.to_string()))?;
        req.headers_mut().insert(http::header::COOKIE, value);
    }
    Ok(req)
}

/// Forwards all frames received from the websocket to the engine
async fn forward_to_engine<S>(mut rx: SplitStream<WebSocketStream<S>>, sink: &EventSink)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    while let Some(msg) = rx.next().await {
        match msg {
            Ok(Message::Text(data)) => {
                // SAFETY: tungstenite guarantees that text frames are valid utf8
                let data = unsafe { Str::from_bytes_unchecked(data.into()) };
                sink.send(TransportEvent::Text(data));
            }
            Ok(Message::Binary(data)) => sink.send(TransportEvent::Binary(data)),
            Ok(Message::Close(frame)) => {
                let reason = frame
                    .map(|f| f.reason.as_str().to_string())
                    .unwrap_or_default();
                sink.send(TransportEvent::Closed(reason.into()));
                return;
            }
            // ping and pong frames are answered by tungstenite itself
            Ok(_) => (),
            Err(e) => {
                sink.send(TransportEvent::Error(e.to_string().into()));
                return;
            }
        }
    }
    sink.send(TransportEvent::Closed("websocket stream ended".into()));
}

/// Forwards all frames waiting to be sent to the websocket
///
/// The websocket stream is flushed only when the outbound channel is drained
fn forward_to_peer<S>(
    mut tx: SplitSink<WebSocketStream<S>, Message>,
    mut rx: mpsc::UnboundedReceiver<RawFrame>,
) -> JoinHandle<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if feed(&mut tx, frame).await.is_err() {
                return;
            }
            while let Ok(frame) = rx.try_recv() {
                if feed(&mut tx, frame).await.is_err() {
                    return;
                }
            }
            tx.flush().await.ok();
        }
        // the transport was closed, leave gracefully
        tx.send(Message::Close(None)).await.ok();
    })
}

async fn feed<S>(
    tx: &mut SplitSink<WebSocketStream<S>, Message>,
    frame: RawFrame,
) -> Result<(), tungstenite::Error>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    match frame {
        RawFrame::Text(data) => {
            tx.feed(Message::Text(Utf8Bytes::from(String::from(data)))).await
        }
        RawFrame::Binary(data) => tx.feed(Message::Binary(data)).await,
    }
}
