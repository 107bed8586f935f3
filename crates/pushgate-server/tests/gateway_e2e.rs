//! End-to-end: real gateway over loopback, stub identity service, WebSocket client.

use futures_util::StreamExt;
use pushgate_core::{Directive, TicketClaims};
use pushgate_server::config::{ConfigFile, Overrides, ServerConfig};
use pushgate_server::registry::ConnectionRegistry;
use pushgate_server::routing::Dispatcher;
use pushgate_server::stub::{self, StubDirectory, CHECK_TICKET_PATH};
use pushgate_server::GatewayServer;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn start_identity(directory: StubDirectory) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, stub::router(directory)).await.unwrap();
    });
    format!("http://{addr}{CHECK_TICKET_PATH}")
}

fn identities() -> StubDirectory {
    StubDirectory::default()
        .with_ticket("t1", TicketClaims::new("127.0.0.1", "u1"))
        .with_ticket("t2", TicketClaims::new("127.0.0.1", "u1"))
        .with_ticket("elsewhere", TicketClaims::new("1.2.3.4", "u2"))
}

struct Gateway {
    addr: SocketAddr,
    registry: Arc<ConnectionRegistry>,
    dispatcher: Arc<Dispatcher>,
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

impl Gateway {
    fn ws_url(&self, ticket: Option<&str>) -> String {
        match ticket {
            Some(t) => format!("ws://{}/ws?ticket={t}", self.addr),
            None => format!("ws://{}/ws", self.addr),
        }
    }

    async fn connect(&self, ticket: &str) -> Client {
        let (ws, _) = tokio_tungstenite::connect_async(self.ws_url(Some(ticket)))
            .await
            .unwrap();
        ws
    }

    async fn wait_for_sessions(&self, expected: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while self.registry.session_count().await != expected {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("session count never reached {expected}"));
    }
}

async fn start_gateway(identity_url: String, enforce_origin: bool, keepalive_secs: u64) -> Gateway {
    let overrides = Overrides {
        identity_url: Some(identity_url),
        // Nothing listens here; the consumer just keeps retrying.
        broker_host: Some("127.0.0.1:1".into()),
        broker_queue: Some("output".into()),
        enforce_origin: Some(enforce_origin),
        keepalive_secs: Some(keepalive_secs),
        ..Overrides::default()
    };
    let config = ServerConfig::resolve(ConfigFile::default(), overrides).unwrap();
    let server = GatewayServer::new(config).unwrap();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let registry = server.registry();
    let dispatcher = server.dispatcher();
    let shutdown = server.shutdown_token();
    let task = tokio::spawn(async move {
        server.serve(listener).await.unwrap();
    });

    Gateway {
        addr,
        registry,
        dispatcher,
        shutdown,
        task,
    }
}

async fn next_text(ws: &mut Client) -> String {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Text(text))) => return text,
                Some(Ok(_)) => continue,
                other => panic!("connection ended: {other:?}"),
            }
        }
    })
    .await
    .expect("no text frame received")
}

async fn rejection_status(url: String) -> u16 {
    match tokio_tungstenite::connect_async(url).await {
        Err(WsError::Http(response)) => response.status().as_u16(),
        Err(e) => panic!("unexpected error: {e}"),
        Ok(_) => panic!("connection should have been rejected"),
    }
}

fn to_user(user_id: &str, message: &str) -> Directive {
    Directive::ToUser {
        user_id: user_id.into(),
        message: message.into(),
    }
}

#[tokio::test]
async fn test_deliver_then_disconnect() {
    let gateway = start_gateway(start_identity(identities()).await, false, 60).await;

    let mut client = gateway.connect("t1").await;
    gateway.wait_for_sessions(1).await;
    assert_eq!(gateway.registry.lookup_by_user("u1").await.len(), 1);

    let report = gateway.dispatcher.dispatch(&to_user("u1", "hi")).await;
    assert_eq!(report.delivered, 1);
    assert_eq!(next_text(&mut client).await, "hi");

    client.close(None).await.unwrap();
    gateway.wait_for_sessions(0).await;

    let report = gateway.dispatcher.dispatch(&to_user("u1", "again")).await;
    assert_eq!(report.targeted, 0);
    assert_eq!(report.delivered, 0);
    assert_eq!(report.failed, 0);
}

#[tokio::test]
async fn test_user_with_two_sessions_gets_both() {
    let gateway = start_gateway(start_identity(identities()).await, false, 60).await;

    let mut first = gateway.connect("t1").await;
    let mut second = gateway.connect("t2").await;
    gateway.wait_for_sessions(2).await;
    assert_eq!(gateway.registry.user_count().await, 1);

    let report = gateway.dispatcher.dispatch(&to_user("u1", "both")).await;
    assert_eq!(report.delivered, 2);
    assert_eq!(next_text(&mut first).await, "both");
    assert_eq!(next_text(&mut second).await, "both");

    let report = gateway
        .dispatcher
        .handle_payload(br#"{"mode":"all","message":"everyone"}"#)
        .await
        .unwrap();
    assert_eq!(report.delivered, 2);
    assert_eq!(next_text(&mut first).await, "everyone");
    assert_eq!(next_text(&mut second).await, "everyone");
}

#[tokio::test]
async fn test_missing_ticket_is_bad_request() {
    let gateway = start_gateway(start_identity(identities()).await, false, 60).await;
    assert_eq!(rejection_status(gateway.ws_url(None)).await, 400);
    assert_eq!(rejection_status(gateway.ws_url(Some(""))).await, 400);
    assert_eq!(gateway.registry.session_count().await, 0);
}

#[tokio::test]
async fn test_unknown_ticket_is_unauthorized() {
    let gateway = start_gateway(start_identity(identities()).await, false, 60).await;
    assert_eq!(rejection_status(gateway.ws_url(Some("nope"))).await, 401);
    assert_eq!(gateway.registry.session_count().await, 0);
}

#[tokio::test]
async fn test_identity_down_is_unavailable() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dead = listener.local_addr().unwrap();
    drop(listener);

    let gateway = start_gateway(format!("http://{dead}{CHECK_TICKET_PATH}"), false, 60).await;
    assert_eq!(rejection_status(gateway.ws_url(Some("t1"))).await, 503);
    assert_eq!(gateway.registry.session_count().await, 0);
}

#[tokio::test]
async fn test_origin_enforced() {
    let gateway = start_gateway(start_identity(identities()).await, true, 60).await;

    assert_eq!(rejection_status(gateway.ws_url(Some("elsewhere"))).await, 403);
    assert_eq!(gateway.registry.session_count().await, 0);

    // Ticket issued to the loopback address still gets in.
    let _client = gateway.connect("t1").await;
    gateway.wait_for_sessions(1).await;
}

#[tokio::test]
async fn test_origin_bypassed() {
    let gateway = start_gateway(start_identity(identities()).await, false, 60).await;

    let mut client = gateway.connect("elsewhere").await;
    gateway.wait_for_sessions(1).await;

    gateway.dispatcher.dispatch(&to_user("u2", "welcome")).await;
    assert_eq!(next_text(&mut client).await, "welcome");
}

#[tokio::test]
async fn test_keepalive_ping() {
    let gateway = start_gateway(start_identity(identities()).await, false, 1).await;

    let mut client = gateway.connect("t1").await;
    let got_ping = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match client.next().await {
                Some(Ok(Message::Ping(_))) => return true,
                Some(Ok(_)) => continue,
                _ => return false,
            }
        }
    })
    .await
    .expect("no keepalive ping");
    assert!(got_ping);

    // Replying to pings keeps the session registered.
    assert_eq!(gateway.registry.session_count().await, 1);
}

#[tokio::test]
async fn test_health() {
    let gateway = start_gateway(start_identity(identities()).await, false, 60).await;
    let _a = gateway.connect("t1").await;
    let _b = gateway.connect("t2").await;
    gateway.wait_for_sessions(2).await;

    let body: serde_json::Value = reqwest::get(format!("http://{}/health", gateway.addr))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["sessions"], 2);
    assert_eq!(body["users"], 1);
}

#[tokio::test]
async fn test_shutdown_closes_sessions() {
    let gateway = start_gateway(start_identity(identities()).await, false, 60).await;
    let mut client = gateway.connect("t1").await;
    gateway.wait_for_sessions(1).await;

    gateway.shutdown.cancel();

    let closed = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match client.next().await {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                Some(Ok(_)) => continue,
            }
        }
    })
    .await;
    assert!(closed.is_ok(), "client was not closed on shutdown");

    gateway.wait_for_sessions(0).await;
    tokio::time::timeout(Duration::from_secs(5), gateway.task)
        .await
        .expect("server stops on shutdown")
        .unwrap();
}
