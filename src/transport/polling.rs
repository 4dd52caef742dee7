//! The http long-polling transport.
//!
//! Two tasks service the connection: a GET loop that keeps exactly one poll
//! request in flight and splits each returned body into frames, and a POST
//! loop that batches queued frames into one payload per request. POSTs are
//! naturally serialized, a new batch only goes out once the previous request
//! completed.

use std::sync::Arc;

use bytes::Bytes;
use futures_util::future::BoxFuture;
use http::{HeaderMap, HeaderValue, Method, Request, StatusCode, header};
use http_body_util::Full;
use hyper_util::client::legacy::{Client, connect::HttpConnector};
use hyper_util::rt::TokioExecutor;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use url::Url;

use crate::payload;
use crate::str::Str;
use crate::transport::{EventSink, Transport, TransportEvent, TransportType};

/// Boxed error returned by a [`PollingSvc`]
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// The minimal http client surface the polling transport drives.
///
/// It is implemented for the hyper-util legacy client over plain http, an
/// embedder can substitute anything able to run a request to completion to
/// add tls, proxies or a test double.
pub trait PollingSvc: Send + Sync + 'static {
    /// Run one request to completion, yielding the response status and the
    /// collected body
    fn fetch(
        &self,
        req: Request<Full<Bytes>>,
    ) -> BoxFuture<'static, Result<(StatusCode, Bytes), BoxError>>;
}

impl PollingSvc for Client<HttpConnector, Full<Bytes>> {
    fn fetch(
        &self,
        req: Request<Full<Bytes>>,
    ) -> BoxFuture<'static, Result<(StatusCode, Bytes), BoxError>> {
        use http_body_util::BodyExt;
        let fut = self.request(req);
        Box::pin(async move {
            let res = fut.await?;
            let status = res.status();
            let body = res.into_body().collect().await?.to_bytes();
            Ok((status, body))
        })
    }
}

/// The built in http long-polling transport
pub struct PollingTransport<S = Client<HttpConnector, Full<Bytes>>> {
    svc: Arc<S>,
    url_tx: Option<watch::Sender<Url>>,
    write_tx: Option<mpsc::UnboundedSender<Str>>,
    poll_task: Option<JoinHandle<()>>,
}

impl<S: PollingSvc> PollingTransport<S> {
    /// Create a polling transport over a custom http client
    pub fn new(svc: S) -> Self {
        Self {
            svc: Arc::new(svc),
            url_tx: None,
            write_tx: None,
            poll_task: None,
        }
    }
}

impl Default for PollingTransport {
    fn default() -> Self {
        Self::new(Client::builder(TokioExecutor::new()).build_http())
    }
}

impl<S: PollingSvc> Transport for PollingTransport<S> {
    fn kind(&self) -> TransportType {
        TransportType::Polling
    }

    fn open(&mut self, url: Url, headers: &HeaderMap, cookies: &[String], sink: EventSink) {
        let headers = match session_headers(headers, cookies) {
            Ok(headers) => headers,
            Err(e) => return sink.send(TransportEvent::Error(e)),
        };
        let (url_tx, url_rx) = watch::channel(url);
        let (write_tx, write_rx) = mpsc::unbounded_channel();
        self.url_tx = Some(url_tx);
        self.write_tx = Some(write_tx);

        self.poll_task = Some(tokio::spawn(poll_loop(
            self.svc.clone(),
            url_rx.clone(),
            headers.clone(),
            sink.clone(),
        )));
        // the post loop exits on its own once the write channel is dropped,
        // delivering what was already queued
        tokio::spawn(post_loop(
            self.svc.clone(),
            url_rx,
            headers,
            write_rx,
            sink.clone(),
        ));
        sink.send(TransportEvent::Opened);
    }

    fn set_url(&mut self, url: Url) {
        if let Some(tx) = &self.url_tx {
            tx.send(url).ok();
        }
    }

    fn send_text(&mut self, data: Str) {
        if let Some(tx) = &self.write_tx {
            tx.send(data).ok();
        }
    }

    fn send_binary(&mut self, _data: Bytes) {
        // binary packets reach a polling connection in their b64 text
        // rendition, there is no raw binary framing to fall back to
        tracing::debug!("binary frame dropped, the polling transport only carries text");
    }

    fn close(&mut self) {
        self.write_tx = None;
        if let Some(task) = self.poll_task.take() {
            task.abort();
        }
    }
}

impl<S> Drop for PollingTransport<S> {
    fn drop(&mut self) {
        if let Some(task) = self.poll_task.take() {
            task.abort();
        }
    }
}

/// Merge the configured extra headers and cookie pairs into the header set
/// sent with every request
fn session_headers(extra: &HeaderMap, cookies: &[String]) -> Result<HeaderMap, Str> {
    let mut headers = extra.clone();
    if !cookies.is_empty() {
        let value = HeaderValue::from_str(&cookies.join("; "))
            .map_err(|e| Str::from(e.to_string()))?;
        headers.insert(header::COOKIE, value);
    }
    Ok(headers)
}

fn request(
    url: &Url,
    headers: &HeaderMap,
    body: Option<String>,
) -> Result<Request<Full<Bytes>>, http::Error> {
    let mut builder = Request::builder().uri(url.as_str());
    for (name, value) in headers {
        builder = builder.header(name, value);
    }
    match body {
        Some(body) => builder
            .method(Method::POST)
            .header(header::CONTENT_TYPE, "text/plain;charset=UTF-8")
            .body(Full::new(Bytes::from(body))),
        None => builder.method(Method::GET).body(Full::default()),
    }
}

/// Keep exactly one poll request in flight and forward every decoded frame
/// to the engine
async fn poll_loop<S: PollingSvc>(
    svc: Arc<S>,
    url_rx: watch::Receiver<Url>,
    headers: HeaderMap,
    sink: EventSink,
) {
    loop {
        let url = url_rx.borrow().clone();
        let req = match request(&url, &headers, None) {
            Ok(req) => req,
            Err(e) => return sink.send(TransportEvent::Error(e.to_string().into())),
        };
        match svc.fetch(req).await {
            Ok((status, body)) if status.is_success() => {
                let body = match Str::from_utf8_bytes(body) {
                    Ok(body) => body,
                    Err(e) => return sink.send(TransportEvent::Error(e.to_string().into())),
                };
                match payload::decode(&body) {
                    Ok(frames) => {
                        for frame in frames {
                            sink.send(TransportEvent::Text(frame));
                        }
                    }
                    // a desynchronized length prefix poisons only this body,
                    // the next poll starts from a clean request
                    Err(e) => tracing::debug!("dropping malformed polling body: {e}"),
                }
            }
            Ok((status, _)) => {
                return sink.send(TransportEvent::Error(
                    format!("polling request failed with status {status}").into(),
                ));
            }
            Err(e) => return sink.send(TransportEvent::Error(e.to_string().into())),
        }
    }
}

/// Drain the outbound channel into serialized POST requests, one payload per
/// request
async fn post_loop<S: PollingSvc>(
    svc: Arc<S>,
    url_rx: watch::Receiver<Url>,
    headers: HeaderMap,
    mut rx: mpsc::UnboundedReceiver<Str>,
    sink: EventSink,
) {
    while let Some(frame) = rx.recv().await {
        let mut frames = vec![frame];
        while let Ok(frame) = rx.try_recv() {
            frames.push(frame);
        }
        let body = payload::encode(frames.iter().map(|f| f.as_str()));
        let url = url_rx.borrow().clone();
        let req = match request(&url, &headers, Some(body)) {
            Ok(req) => req,
            Err(e) => return sink.send(TransportEvent::Error(e.to_string().into())),
        };
        match svc.fetch(req).await {
            Ok((status, _)) if status.is_success() => (),
            Ok((status, _)) => {
                return sink.send(TransportEvent::Error(
                    format!("polling post failed with status {status}").into(),
                ));
            }
            Err(e) => return sink.send(TransportEvent::Error(e.to_string().into())),
        }
    }
}
