//! In-memory broker for driving a real event loop in tests.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite, DuplexStream};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::Role;
use tracing_subscriber::EnvFilter;
use url::Url;

use crate::protocol::{Frame, Topics};

use super::Connection;

const STEP_TIMEOUT: Duration = Duration::from_secs(5);

/// Routes crate logs to the test output, filtered by `RUST_LOG`.
pub(crate) fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub(crate) fn test_url() -> Url {
    Url::parse("ws://localhost:8085").expect("test url")
}

/// Polls `condition` until it holds, failing the test after a few seconds.
pub(crate) async fn wait_for(mut condition: impl FnMut() -> bool) {
    timeout(STEP_TIMEOUT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached");
}

/// Binds a local listener and returns its `ws://` URL.
pub(crate) async fn tcp_listener() -> (Url, TcpListener) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    let url = Url::parse(&format!("ws://{addr}")).expect("listener url");
    (url, listener)
}

/// Creates a connection already attached to an in-memory broker.
pub(crate) async fn attached_pair() -> (Connection, BrokerSide) {
    let connection = Connection::new(test_url());
    let broker = BrokerSide::attach(&connection).await;
    (connection, broker)
}

/// The broker end of a channel, in memory by default.
pub(crate) struct BrokerSide<S = DuplexStream> {
    ws: WebSocketStream<S>,
}

impl BrokerSide {
    /// Attaches a fresh in-memory channel to `connection`.
    pub(crate) async fn attach(connection: &Connection) -> Self {
        init_tracing();
        let (client_io, server_io) = tokio::io::duplex(64 * 1024);
        let client = WebSocketStream::from_raw_socket(client_io, Role::Client, None).await;
        let server = WebSocketStream::from_raw_socket(server_io, Role::Server, None).await;
        connection.attach(client);
        Self { ws: server }
    }
}

impl BrokerSide<TcpStream> {
    /// Accepts the next client on `listener` and completes its handshake.
    pub(crate) async fn accept(listener: &TcpListener) -> Self {
        init_tracing();
        let (stream, _) = timeout(STEP_TIMEOUT, listener.accept())
            .await
            .expect("client in time")
            .expect("accept");
        let ws = tokio_tungstenite::accept_async(stream)
            .await
            .expect("handshake");
        Self { ws }
    }
}

impl<S> BrokerSide<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{

    /// Reads the next text frame written by the client.
    pub(crate) async fn next_frame(&mut self) -> Frame {
        timeout(STEP_TIMEOUT, async {
            loop {
                match self.ws.next().await {
                    Some(Ok(Message::Text(text))) => {
                        return Frame::decode(&text).expect("client frame");
                    }
                    Some(Ok(_)) => continue,
                    other => panic!("channel ended while waiting for a frame: {other:?}"),
                }
            }
        })
        .await
        .expect("frame in time")
    }

    /// Reads frames until one is addressed with `request` in its topics.
    pub(crate) async fn next_request(&mut self, request: &str) -> Frame {
        loop {
            let frame = self.next_frame().await;
            if frame.topics.get_str("request") == Some(request) {
                return frame;
            }
        }
    }

    /// Sends a `{topics, contents}` frame to the client.
    pub(crate) async fn send_frame(&mut self, topics: Topics, contents: Value) {
        let Value::Object(contents) = contents else {
            panic!("contents must be an object");
        };
        let text = Frame::new(topics, contents).encode().expect("encode");
        self.send_text(&text).await;
    }

    /// Sends raw text to the client.
    pub(crate) async fn send_text(&mut self, text: &str) {
        self.ws
            .send(Message::Text(text.into()))
            .await
            .expect("broker send");
    }

    /// Closes the channel from the broker side.
    pub(crate) async fn close(mut self) {
        let _ = self.ws.close(None).await;
        let _ = timeout(STEP_TIMEOUT, async {
            while let Some(Ok(_)) = self.ws.next().await {}
        })
        .await;
    }

    /// Waits until the client closes the channel.
    pub(crate) async fn wait_closed(&mut self) {
        timeout(STEP_TIMEOUT, async {
            loop {
                match self.ws.next().await {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => continue,
                }
            }
        })
        .await
        .expect("close in time");
    }
}
