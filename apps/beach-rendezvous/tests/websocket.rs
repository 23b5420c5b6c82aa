use std::net::SocketAddr;
use std::sync::Arc;

use beach_rendezvous::cli::{recv_event, run_pair_check, send_event};
use beach_rendezvous::crypto::{ConnectionKeys, Ed25519Verifier};
use beach_rendezvous::registry::{RegistrySettings, SessionRegistry};
use beach_rendezvous::server::{self, AppState};
use beach_rendezvous::signals::{ClientEvent, ConnIdPayload, ServerEvent};
use beach_rendezvous::turn::{TurnIssuer, TurnSettings};
use futures_util::SinkExt;
use rendezvous_bus::LocalBus;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio_tungstenite::{connect_async, tungstenite::Message};

struct TestServer {
    addr: SocketAddr,
    registry: SessionRegistry,
    stop: Option<oneshot::Sender<()>>,
}

impl TestServer {
    async fn spawn() -> Self {
        let registry = SessionRegistry::new(
            "node-test",
            Arc::new(LocalBus::new()),
            Arc::new(Ed25519Verifier),
            TurnIssuer::new(TurnSettings {
                stun_urls: vec!["stun:stun.example.org:3478".into()],
                turn_urls: Vec::new(),
                shared_secret: None,
                credential_ttl: std::time::Duration::from_secs(60),
            }),
            RegistrySettings::default(),
        );
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (stop, stopped) = oneshot::channel::<()>();
        let state = AppState {
            registry: registry.clone(),
            metrics: None,
        };
        tokio::spawn(async move {
            let shutdown = async move {
                let _ = stopped.await;
            };
            let _ = server::serve(listener, state, shutdown).await;
        });
        Self {
            addr,
            registry,
            stop: Some(stop),
        }
    }

    fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
    }
}

#[test_timeout::tokio_timeout_test(30)]
async fn pair_check_runs_through_a_live_server() {
    let server = TestServer::spawn().await;
    let report = run_pair_check(&server.url()).await.expect("pairing check succeeds");
    assert_eq!(
        report.steps,
        vec!["initiated", "handshake", "confirmation", "offer", "answer", "rtcConnected"]
    );
    assert_eq!(report.conn_id.len(), 32);
}

#[test_timeout::tokio_timeout_test(30)]
async fn duplicate_initiator_is_told_busy_and_closed() {
    let server = TestServer::spawn().await;
    let keys = ConnectionKeys::generate();
    let message = "busy-check";
    let url = format!(
        "{}/ws?stage=initiator&connId={}&message={message}&signed={}&key={}",
        server.url(),
        keys.conn_id(),
        keys.sign(message.as_bytes()),
        keys.public_hex()
    );

    let (mut first, _) = connect_async(&url).await.unwrap();
    assert!(matches!(
        recv_event(&mut first).await.unwrap(),
        ServerEvent::Initiated { .. }
    ));

    let (mut second, _) = connect_async(&url).await.unwrap();
    assert_eq!(
        recv_event(&mut second).await.unwrap(),
        ServerEvent::ConfirmationFailedBusy
    );
    // The server hangs up after a channel-ending signal.
    assert!(recv_event(&mut second).await.is_err());
    assert_eq!(server.registry.active_attempts(), 1);
}

#[test_timeout::tokio_timeout_test(30)]
async fn unparseable_frames_are_answered_without_closing() {
    let server = TestServer::spawn().await;
    let keys = ConnectionKeys::generate();
    let message = "frame-check";
    let url = format!(
        "{}/?stage=initiator&connId={}&message={message}&signed={}&key={}",
        server.url(),
        keys.conn_id(),
        keys.sign(message.as_bytes()),
        keys.public_hex()
    );
    let (mut socket, _) = connect_async(&url).await.unwrap();
    recv_event(&mut socket).await.unwrap();

    socket.send(Message::text("{not json")).await.unwrap();
    assert_eq!(
        recv_event(&mut socket).await.unwrap(),
        ServerEvent::InvalidConnection
    );
    socket
        .send(Message::binary(b"\xff\xfe".to_vec()))
        .await
        .unwrap();
    assert_eq!(
        recv_event(&mut socket).await.unwrap(),
        ServerEvent::InvalidConnection
    );

    // Still usable: a premature step is rejected the normal way.
    send_event(
        &mut socket,
        &ClientEvent::TryTurn(ConnIdPayload {
            conn_id: keys.conn_id(),
        }),
    )
    .await
    .unwrap();
    assert_eq!(
        recv_event(&mut socket).await.unwrap(),
        ServerEvent::InvalidConnection
    );
    assert_eq!(server.registry.active_attempts(), 1);
}

#[test_timeout::tokio_timeout_test(30)]
async fn health_reports_instance() {
    let server = TestServer::spawn().await;
    let mut stream = TcpStream::connect(server.addr).await.unwrap();
    stream
        .write_all(b"GET /health HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
        .await
        .unwrap();
    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();
    assert!(response.starts_with("HTTP/1.1 200"));
    assert!(response.contains("\"status\":\"ok\""));
    assert!(response.contains("\"instance\":\"node-test\""));
}

#[test_timeout::tokio_timeout_test(30)]
async fn rejected_connect_closes_the_socket() {
    let server = TestServer::spawn().await;
    let keys = ConnectionKeys::generate();
    // No initiator has claimed this connId yet.
    let url = format!(
        "{}/ws?stage=receiver&connId={}",
        server.url(),
        keys.conn_id()
    );
    let (mut socket, _) = connect_async(&url).await.unwrap();
    assert_eq!(
        recv_event(&mut socket).await.unwrap(),
        ServerEvent::InvalidConnection
    );
    assert!(recv_event(&mut socket).await.is_err());
}

#[test_timeout::tokio_timeout_test(30)]
async fn repeated_query_params_are_answered_on_the_socket() {
    let server = TestServer::spawn().await;
    let keys = ConnectionKeys::generate();
    let url = format!(
        "{}/ws?connId=zz&stage=receiver&connId={}",
        server.url(),
        keys.conn_id()
    );
    let (mut socket, response) = connect_async(&url).await.expect("upgrade accepted");
    assert_eq!(response.status().as_u16(), 101);
    assert_eq!(
        recv_event(&mut socket).await.unwrap(),
        ServerEvent::InvalidConnection
    );
    assert!(recv_event(&mut socket).await.is_err());
}
