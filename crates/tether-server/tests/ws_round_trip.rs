//! Full round trip over real sockets: fetch a page, attach its peer over the
//! WebSocket bridge, receive the commands buffered while the page was built,
//! and answer a query.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;

use tether_core::protocol::{decode_outbound, encode_inbound};
use tether_core::{InboundMessage, OutboundBody, SessionId};
use tether_server::application::{PageBuilder, PageRequest};
use tether_server::domain::{PageTemplate, ServerConfig};
use tether_server::infrastructure::serve;
use tether_server::Tether;

const WAIT: Duration = Duration::from_secs(5);

/// Issues one execute and one query while the page is being built, and
/// forwards the query's answer to the test.
struct ScriptedPage {
    answers: mpsc::UnboundedSender<String>,
}

#[async_trait]
impl PageBuilder for ScriptedPage {
    async fn build(
        &self,
        tether: Arc<Tether>,
        _request: &PageRequest,
        session: &SessionId,
        page: &mut PageTemplate,
    ) {
        page.title = "scripted".into();
        tether.execute(session, "setup()").unwrap();
        let answer = tether.query(session, "navigator.userAgent");
        let answers = self.answers.clone();
        tokio::spawn(async move {
            if let Ok(value) = answer.await {
                let _ = answers.send(value);
            }
        });
    }
}

async fn start() -> (
    SocketAddr,
    Arc<Tether>,
    Arc<AtomicBool>,
    mpsc::UnboundedReceiver<String>,
) {
    let (answers, answer_rx) = mpsc::unbounded_channel();
    let tether = Arc::new(
        Tether::new(ServerConfig::default()).with_page_builder(Arc::new(ScriptedPage { answers })),
    );
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let running = Arc::new(AtomicBool::new(true));
    tokio::spawn(serve(listener, Arc::clone(&tether), Arc::clone(&running)));
    (addr, tether, running, answer_rx)
}

async fn fetch_page(addr: SocketAddr) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(b"GET / HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
        .await
        .unwrap();
    let mut raw = String::new();
    timeout(WAIT, stream.read_to_string(&mut raw))
        .await
        .unwrap()
        .unwrap();
    raw
}

fn session_of(html: &str) -> SessionId {
    let start = html.find("session: \"").unwrap() + "session: \"".len();
    let end = start + html[start..].find('"').unwrap();
    SessionId::from(&html[start..end])
}

#[tokio::test]
async fn test_page_then_bridge_round_trip() {
    // Arrange
    let (addr, tether, running, mut answers) = start().await;
    let response = fetch_page(addr).await;
    assert!(response.starts_with("HTTP/1.1 200 OK"), "{response}");
    let session = session_of(&response);
    assert!(tether.registry().get(&session).is_some());

    let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/bridge"))
        .await
        .unwrap();

    // Act: say hello, then collect the two buffered frames.
    let hello = encode_inbound(&InboundMessage::Hello {
        session: session.clone(),
    })
    .unwrap();
    ws.send(Message::Text(hello)).await.unwrap();

    let mut frames = Vec::new();
    while frames.len() < 2 {
        match timeout(WAIT, ws.next()).await.unwrap().unwrap().unwrap() {
            Message::Text(text) => frames.push(decode_outbound(&text).unwrap()),
            _ => continue,
        }
    }

    // Assert: issue order survives the buffer.
    assert_eq!(frames[0].command(), "setup()");
    assert!(matches!(frames[0].body, OutboundBody::Execute { .. }));
    assert_eq!(frames[1].command(), "navigator.userAgent");
    assert!(frames.iter().all(|f| f.session == session));

    // Act: answer the query.
    let answer = encode_inbound(&InboundMessage::Callback {
        session: session.clone(),
        id: frames[1].callback().unwrap(),
        result: Some("test-agent/1.0".into()),
    })
    .unwrap();
    ws.send(Message::Text(answer)).await.unwrap();

    // Assert
    let value = timeout(WAIT, answers.recv()).await.unwrap().unwrap();
    assert_eq!(value, "test-agent/1.0");

    // Closing the socket tears the session down.
    ws.close(None).await.unwrap();
    timeout(WAIT, async {
        while tether.registry().get(&session).is_some() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .unwrap();

    running.store(false, Ordering::Relaxed);
}

#[tokio::test]
async fn test_upgrade_on_other_path_is_refused() {
    let (addr, _tether, running, _answers) = start().await;

    let result = tokio_tungstenite::connect_async(format!("ws://{addr}/elsewhere")).await;

    assert!(result.is_err());
    running.store(false, Ordering::Relaxed);
}

#[tokio::test]
async fn test_non_get_page_request_is_rejected() {
    // Arrange
    let (addr, tether, running, _answers) = start().await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    // Act
    stream
        .write_all(b"POST / HTTP/1.1\r\nHost: localhost\r\nContent-Length: 0\r\nConnection: close\r\n\r\n")
        .await
        .unwrap();
    let mut raw = String::new();
    timeout(WAIT, stream.read_to_string(&mut raw))
        .await
        .unwrap()
        .unwrap();

    // Assert
    assert!(raw.starts_with("HTTP/1.1 405"), "{raw}");
    assert!(tether.registry().is_empty());
    running.store(false, Ordering::Relaxed);
}
