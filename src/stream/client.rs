//! WebSocket channel to the classification service.
//!
//! [`StreamClient::connect`] opens the socket and splits it into two tasks:
//!
//! * a **writer** draining a bounded queue of outbound frames;
//! * a **reader** decoding inbound JSON and handing it to the
//!   [`MessageHandler`].
//!
//! Windows are fire-and-forget: [`WindowSender::send_window`] never waits
//! and never retries.  [`StreamClient::shutdown`] runs the end-of-stream
//! handshake and closes the connection exactly once.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::config::ServerConfig;
use crate::stream::protocol::{encode_pcm16le, InboundMessage, END_SENTINEL};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("failed to connect to {url}: {source}")]
    Connect {
        url: String,
        #[source]
        source: tokio_tungstenite::tungstenite::Error,
    },
}

// ---------------------------------------------------------------------------
// MessageHandler
// ---------------------------------------------------------------------------

/// Receives every decoded inbound message, on the reader task.
///
/// Any `Fn(InboundMessage) + Send + Sync` closure is a handler.
pub trait MessageHandler: Send + Sync {
    fn on_message(&self, message: InboundMessage);

    /// Called for a text frame that is not a valid [`InboundMessage`].  The
    /// channel stays open.
    fn on_decode_error(&self, text: &str, err: &serde_json::Error) {
        log::warn!("discarding undecodable message ({err}): {text:.120}");
    }
}

impl<F> MessageHandler for F
where
    F: Fn(InboundMessage) + Send + Sync,
{
    fn on_message(&self, message: InboundMessage) {
        self(message)
    }
}

// ---------------------------------------------------------------------------
// Shared channel state
// ---------------------------------------------------------------------------

struct Shared {
    open: AtomicBool,
    closing: AtomicBool,
    /// Armed by `shutdown`; fired by the reader on `status == "ended"`.
    ended: Mutex<Option<oneshot::Sender<()>>>,
    handler: Arc<dyn MessageHandler>,
}

impl Shared {
    fn accepts_windows(&self) -> bool {
        self.open.load(Ordering::SeqCst) && !self.closing.load(Ordering::SeqCst)
    }

    fn mark_closed(&self) {
        if self.open.swap(false, Ordering::SeqCst) {
            log::info!("stream channel closed");
        }
        // wakes a pending handshake; there is nobody left to acknowledge it
        self.take_ended();
    }

    fn take_ended(&self) -> Option<oneshot::Sender<()>> {
        self.ended.lock().ok().and_then(|mut slot| slot.take())
    }

    fn dispatch(&self, text: &str) {
        let message = match InboundMessage::decode(text) {
            Ok(m) => m,
            Err(err) => {
                self.handler.on_decode_error(text, &err);
                return;
            }
        };

        if self.closing.load(Ordering::SeqCst) {
            if message.is_ended() {
                if let Some(tx) = self.take_ended() {
                    let _ = tx.send(());
                }
            } else {
                log::debug!("dropping message received during shutdown");
            }
            return;
        }

        if let Some(error) = &message.error {
            log::warn!(
                "service error ({}): {error}",
                message.error_type.as_deref().unwrap_or("unknown")
            );
        }
        self.handler.on_message(message);
    }
}

// ---------------------------------------------------------------------------
// WindowSender
// ---------------------------------------------------------------------------

/// Cloneable handle for queueing windows from the pump task.
#[derive(Clone)]
pub struct WindowSender {
    outbound: mpsc::Sender<Message>,
    shared: Arc<Shared>,
}

impl WindowSender {
    /// Queue one window as a binary frame.
    ///
    /// Returns `false` (and drops the window) when the channel is not open or
    /// the outbound queue is full.
    pub fn send_window(&self, samples: &[i16]) -> bool {
        if !self.shared.accepts_windows() {
            return false;
        }
        match self.outbound.try_send(Message::Binary(encode_pcm16le(samples))) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                log::warn!("outbound queue full, dropping window");
                false
            }
            Err(TrySendError::Closed(_)) => {
                self.shared.mark_closed();
                false
            }
        }
    }

    pub fn is_open(&self) -> bool {
        self.shared.accepts_windows()
    }
}

// ---------------------------------------------------------------------------
// StreamClient
// ---------------------------------------------------------------------------

pub struct StreamClient {
    sender: WindowSender,
    writer: JoinHandle<()>,
    reader: JoinHandle<()>,
    shutdown_timeout: Duration,
}

impl StreamClient {
    /// Open the WebSocket and start the reader and writer tasks.
    ///
    /// Must be called from within a tokio runtime.
    pub async fn connect(
        config: &ServerConfig,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<Self, StreamError> {
        let (socket, _response) =
            connect_async(config.url.as_str())
                .await
                .map_err(|source| StreamError::Connect {
                    url: config.url.clone(),
                    source,
                })?;
        log::info!("connected to {}", config.url);

        let (sink, stream) = socket.split();
        let (outbound, outbound_rx) = mpsc::channel(config.send_queue.max(1));
        let shared = Arc::new(Shared {
            open: AtomicBool::new(true),
            closing: AtomicBool::new(false),
            ended: Mutex::new(None),
            handler,
        });

        let writer = tokio::spawn(write_loop(sink, outbound_rx, Arc::clone(&shared)));
        let reader = tokio::spawn(read_loop(stream, Arc::clone(&shared)));

        Ok(Self {
            sender: WindowSender { outbound, shared },
            writer,
            reader,
            shutdown_timeout: config.shutdown_timeout(),
        })
    }

    pub fn sender(&self) -> WindowSender {
        self.sender.clone()
    }

    pub fn send_window(&self, samples: &[i16]) -> bool {
        self.sender.send_window(samples)
    }

    pub fn is_open(&self) -> bool {
        self.sender.is_open()
    }

    /// Drop the connection without the end-of-stream handshake.
    pub fn abort(self) {
        self.sender.shared.open.store(false, Ordering::SeqCst);
        self.writer.abort();
        self.reader.abort();
    }

    /// Run the end-of-stream handshake and close the connection.
    ///
    /// Sends [`END_SENTINEL`] and waits for the `ended` acknowledgement or
    /// the shutdown timeout, whichever comes first.  An acknowledged stream
    /// is closed with a close frame; otherwise the socket is dropped.  A
    /// channel that is already closed is released with no network I/O.
    pub async fn shutdown(self) {
        let StreamClient {
            sender: WindowSender { outbound, shared },
            mut writer,
            reader,
            shutdown_timeout,
        } = self;

        if !shared.open.load(Ordering::SeqCst) {
            log::debug!("channel already closed, skipping end-of-stream handshake");
            writer.abort();
            reader.abort();
            return;
        }

        let deadline = Instant::now() + shutdown_timeout;
        let (ended_tx, ended_rx) = oneshot::channel();
        if let Ok(mut slot) = shared.ended.lock() {
            *slot = Some(ended_tx);
        }
        shared.closing.store(true, Ordering::SeqCst);

        // queued windows go out ahead of the sentinel
        let queued = tokio::time::timeout_at(
            deadline,
            outbound.send(Message::Text(END_SENTINEL.to_string())),
        )
        .await;
        if !matches!(queued, Ok(Ok(()))) {
            log::debug!("could not queue end-of-stream sentinel");
        }

        let acknowledged = tokio::select! {
            ack = ended_rx => ack.is_ok(),
            _ = tokio::time::sleep_until(deadline) => false,
        };
        shared.open.store(false, Ordering::SeqCst);

        if acknowledged {
            log::info!("service acknowledged end of stream");
            // the writer closes the sink once its queue is dropped
            drop(outbound);
            match tokio::time::timeout_at(deadline, &mut writer).await {
                Ok(Err(err)) => log::debug!("writer task ended abnormally: {err}"),
                Ok(Ok(())) => {}
                Err(_) => {
                    log::debug!("close frame not flushed before deadline");
                    writer.abort();
                }
            }
        } else {
            log::info!(
                "no end-of-stream acknowledgement within {} ms, closing",
                shutdown_timeout.as_millis()
            );
            writer.abort();
        }
        reader.abort();
    }
}

async fn write_loop(
    mut sink: SplitSink<Socket, Message>,
    mut outbound: mpsc::Receiver<Message>,
    shared: Arc<Shared>,
) {
    while let Some(message) = outbound.recv().await {
        if let Err(err) = sink.send(message).await {
            log::warn!("websocket send failed: {err}");
            shared.mark_closed();
            return;
        }
    }
    if let Err(err) = sink.close().await {
        log::debug!("websocket close: {err}");
    }
}

async fn read_loop(mut stream: SplitStream<Socket>, shared: Arc<Shared>) {
    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Text(text)) => shared.dispatch(&text),
            Ok(Message::Close(frame)) => {
                log::info!("service closed the stream: {frame:?}");
                break;
            }
            // binary frames, pings and pongs carry nothing for us
            Ok(_) => {}
            Err(err) => {
                log::warn!("websocket receive failed: {err}");
                break;
            }
        }
    }
    shared.mark_closed();
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::future::Future;
    use tokio::net::TcpListener;
    use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};

    /// Accept one connection on an ephemeral port and hand it to `serve`.
    pub(crate) async fn one_shot_server<F, Fut>(serve: F) -> String
    where
        F: FnOnce(WebSocketStream<TcpStream>) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.expect("accept");
            let ws = tokio_tungstenite::accept_async(tcp).await.expect("handshake");
            serve(ws).await;
        });
        format!("ws://{addr}/ws/stream")
    }

    /// What the test server saw from the client.
    #[derive(Debug, Default)]
    pub(crate) struct Seen {
        pub binary_lens: Vec<usize>,
        pub saw_end: bool,
        pub saw_close: bool,
    }

    /// Record frames until the client goes away, acknowledging `__END__`
    /// when `ack` is set.
    pub(crate) async fn record(
        mut ws: WebSocketStream<TcpStream>,
        ack: bool,
        done: oneshot::Sender<Seen>,
    ) {
        let mut seen = Seen::default();
        while let Some(Ok(msg)) = ws.next().await {
            match msg {
                Message::Binary(b) => seen.binary_lens.push(b.len()),
                Message::Text(t) if t == END_SENTINEL => {
                    seen.saw_end = true;
                    if ack {
                        let _ = ws
                            .send(Message::Text(
                                r#"{"status":"ended","message":"Recording stopped successfully"}"#.into(),
                            ))
                            .await;
                    }
                }
                Message::Close(_) => seen.saw_close = true,
                _ => {}
            }
        }
        let _ = done.send(seen);
    }

    fn config(url: String, timeout_ms: u64) -> ServerConfig {
        ServerConfig {
            url,
            shutdown_timeout_ms: timeout_ms,
            ..ServerConfig::default()
        }
    }

    fn collecting_handler() -> (Arc<dyn MessageHandler>, UnboundedReceiver<InboundMessage>) {
        let (tx, rx) = unbounded_channel();
        let handler = move |m: InboundMessage| {
            let _ = tx.send(m);
        };
        (Arc::new(handler), rx)
    }

    async fn wait_closed(client: &StreamClient) {
        for _ in 0..100 {
            if !client.is_open() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("channel never reported closed");
    }

    #[tokio::test]
    async fn classification_is_forwarded_unchanged() {
        const RESULT: &str = r#"{"classification":{"is_scam":true,"confidence":0.8},"transcript":"send the gift cards"}"#;
        let url = one_shot_server(|mut ws| async move {
            ws.send(Message::Text(RESULT.into())).await.expect("send");
            while ws.next().await.is_some() {}
        })
        .await;

        let (handler, mut rx) = collecting_handler();
        let client = StreamClient::connect(&config(url, 2_000), handler)
            .await
            .expect("connect");

        let got = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("message in time")
            .expect("handler alive");
        assert_eq!(got, InboundMessage::decode(RESULT).unwrap());
        assert!(client.is_open());
        client.shutdown().await;
    }

    #[tokio::test]
    async fn undecodable_message_keeps_channel_open() {
        struct Recorder {
            messages: mpsc::UnboundedSender<InboundMessage>,
            errors: mpsc::UnboundedSender<String>,
        }
        impl MessageHandler for Recorder {
            fn on_message(&self, message: InboundMessage) {
                let _ = self.messages.send(message);
            }
            fn on_decode_error(&self, text: &str, _err: &serde_json::Error) {
                let _ = self.errors.send(text.to_string());
            }
        }

        let url = one_shot_server(|mut ws| async move {
            ws.send(Message::Text("{not json".into())).await.expect("send");
            ws.send(Message::Text(r#"{"transcript":"hello"}"#.into()))
                .await
                .expect("send");
            while ws.next().await.is_some() {}
        })
        .await;

        let (mtx, mut mrx) = unbounded_channel();
        let (etx, mut erx) = unbounded_channel();
        let handler = Arc::new(Recorder {
            messages: mtx,
            errors: etx,
        });
        let client = StreamClient::connect(&config(url, 2_000), handler)
            .await
            .expect("connect");

        let bad = tokio::time::timeout(Duration::from_secs(2), erx.recv())
            .await
            .expect("error in time");
        assert_eq!(bad.as_deref(), Some("{not json"));
        let good = tokio::time::timeout(Duration::from_secs(2), mrx.recv())
            .await
            .expect("message in time")
            .expect("handler alive");
        assert_eq!(good.transcript.as_deref(), Some("hello"));
        assert!(client.is_open());
        client.shutdown().await;
    }

    #[tokio::test]
    async fn acknowledged_shutdown_closes_cleanly_before_timeout() {
        let (done_tx, done_rx) = oneshot::channel();
        let url = one_shot_server(move |ws| record(ws, true, done_tx)).await;

        let (handler, mut rx) = collecting_handler();
        let client = StreamClient::connect(&config(url, 2_000), handler)
            .await
            .expect("connect");
        assert!(client.send_window(&vec![100_i16; 80_000]));

        let started = std::time::Instant::now();
        client.shutdown().await;
        assert!(started.elapsed() < Duration::from_millis(1_500));

        let seen = tokio::time::timeout(Duration::from_secs(2), done_rx)
            .await
            .expect("server finished")
            .expect("server report");
        assert_eq!(seen.binary_lens, vec![160_000]);
        assert!(seen.saw_end);
        assert!(seen.saw_close);
        // the acknowledgement is consumed by the handshake
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn final_result_during_handshake_is_not_forwarded() {
        let url = one_shot_server(|mut ws| async move {
            while let Some(Ok(msg)) = ws.next().await {
                if matches!(&msg, Message::Text(t) if t == END_SENTINEL) {
                    let _ = ws
                        .send(Message::Text(
                            r#"{"transcript":"last words","final":true}"#.into(),
                        ))
                        .await;
                    let _ = ws.send(Message::Text(r#"{"status":"ended"}"#.into())).await;
                }
            }
        })
        .await;

        let (handler, mut rx) = collecting_handler();
        let client = StreamClient::connect(&config(url, 2_000), handler)
            .await
            .expect("connect");

        let started = std::time::Instant::now();
        client.shutdown().await;
        assert!(started.elapsed() < Duration::from_millis(1_500));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn unacknowledged_shutdown_resolves_at_timeout() {
        let (done_tx, done_rx) = oneshot::channel();
        let url = one_shot_server(move |ws| record(ws, false, done_tx)).await;

        let (handler, _rx) = collecting_handler();
        let client = StreamClient::connect(&config(url, 200), handler)
            .await
            .expect("connect");

        let started = std::time::Instant::now();
        client.shutdown().await;
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(190), "{elapsed:?}");
        assert!(elapsed < Duration::from_millis(1_000), "{elapsed:?}");

        let seen = tokio::time::timeout(Duration::from_secs(2), done_rx)
            .await
            .expect("server finished")
            .expect("server report");
        assert!(seen.saw_end);
        assert!(!seen.saw_close);
    }

    #[tokio::test]
    async fn closed_channel_drops_windows_and_skips_handshake() {
        let url = one_shot_server(|mut ws| async move {
            let _ = ws.close(None).await;
            while ws.next().await.is_some() {}
        })
        .await;

        let (handler, _rx) = collecting_handler();
        let client = StreamClient::connect(&config(url, 2_000), handler)
            .await
            .expect("connect");
        wait_closed(&client).await;

        assert!(!client.send_window(&[1, 2, 3]));
        let started = std::time::Instant::now();
        client.shutdown().await;
        assert!(started.elapsed() < Duration::from_millis(100));
    }

    #[tokio::test]
    async fn refused_connection_is_a_connect_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        drop(listener);

        let (handler, _rx) = collecting_handler();
        let result = StreamClient::connect(&config(format!("ws://{addr}/ws/stream"), 2_000), handler).await;
        assert!(matches!(result, Err(StreamError::Connect { .. })));
    }
}
