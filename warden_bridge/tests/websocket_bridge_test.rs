//! End-to-end tests against a live server on an ephemeral port.

use futures::{SinkExt, StreamExt};
use std::{net::SocketAddr, time::Duration};
use tempfile::TempDir;
use tokio::{net::TcpListener, sync::oneshot, time::timeout};
use tokio_tungstenite::{
    connect_async,
    tungstenite::{
        self, Message,
        client::IntoClientRequest,
        http::{HeaderValue, StatusCode},
    },
};
use warden_bridge::{BridgeConfig, ShellConfig, TERMINAL_ROUTE, serve};

const WAIT: Duration = Duration::from_secs(10);

struct TestServer {
    addr: SocketAddr,
    stop: Option<oneshot::Sender<()>>,
    handle: tokio::task::JoinHandle<warden_bridge::Result<()>>,
}

impl TestServer {
    async fn start(shell: ShellConfig) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (stop, stopped) = oneshot::channel::<()>();
        let config = BridgeConfig {
            bind_addr: addr,
            shell,
        };
        let handle = tokio::spawn(serve(listener, config, async move {
            let _ = stopped.await;
        }));
        Self {
            addr,
            stop: Some(stop),
            handle,
        }
    }

    fn terminal_url(&self) -> String {
        format!("ws://{}{}", self.addr, TERMINAL_ROUTE)
    }

    async fn stop(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        let _ = timeout(WAIT, self.handle).await;
    }
}

fn sh_in(dir: &std::path::Path) -> ShellConfig {
    ShellConfig {
        command: "sh".to_string(),
        working_dir: Some(dir.to_path_buf()),
        ..ShellConfig::default()
    }
}

/// Minimal HTTP/1.1 GET over a raw socket; returns the response body.
async fn http_get(addr: SocketAddr, path: &str) -> String {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
    let request = format!(
        "GET {} HTTP/1.1\r\nHost: {}\r\nConnection: close\r\n\r\n",
        path, addr
    );
    stream.write_all(request.as_bytes()).await.unwrap();
    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();
    response
        .split_once("\r\n\r\n")
        .map(|(_, body)| body.to_string())
        .unwrap_or_default()
}

#[tokio::test]
async fn test_websocket_echo_marker() {
    let temp = TempDir::new().unwrap();
    let server = TestServer::start(sh_in(temp.path())).await;

    let (mut socket, _) = connect_async(server.terminal_url()).await.unwrap();
    socket
        .send(Message::text("echo ws_marker_7\n"))
        .await
        .unwrap();

    let mut output = String::new();
    let found = timeout(WAIT, async {
        while let Some(Ok(message)) = socket.next().await {
            if let Message::Text(text) = message {
                output.push_str(text.as_str());
                if output.contains("ws_marker_7\n") {
                    return true;
                }
            }
        }
        false
    })
    .await
    .unwrap_or(false);

    assert!(found, "output was: {:?}", output);
    let _ = socket.close(None).await;
    server.stop().await;
}

#[tokio::test]
async fn test_websocket_exit_sends_normal_close() {
    let temp = TempDir::new().unwrap();
    let server = TestServer::start(sh_in(temp.path())).await;

    let (mut socket, _) = connect_async(server.terminal_url()).await.unwrap();
    socket.send(Message::text("exit\n")).await.unwrap();

    let close_code = timeout(WAIT, async {
        while let Some(Ok(message)) = socket.next().await {
            if let Message::Close(frame) = message {
                return frame.map(|f| u16::from(f.code));
            }
        }
        None
    })
    .await
    .unwrap();

    assert_eq!(close_code, Some(1000));
    server.stop().await;
}

#[tokio::test]
async fn test_websocket_spawn_failure_closes_with_1011() {
    let temp = TempDir::new().unwrap();
    let server = TestServer::start(ShellConfig {
        command: "/definitely/not/a/shell".to_string(),
        ..sh_in(temp.path())
    })
    .await;

    let (mut socket, _) = connect_async(server.terminal_url()).await.unwrap();

    let close = timeout(WAIT, async {
        while let Some(Ok(message)) = socket.next().await {
            if let Message::Close(frame) = message {
                return frame.map(|f| (u16::from(f.code), f.reason.to_string()));
            }
        }
        None
    })
    .await
    .unwrap();

    let (code, reason) = close.expect("close frame with status");
    assert_eq!(code, 1011);
    assert!(reason.contains("Failed to start shell"), "reason: {}", reason);
    server.stop().await;
}

#[tokio::test]
async fn test_health_counts_active_sessions() {
    let temp = TempDir::new().unwrap();
    let server = TestServer::start(sh_in(temp.path())).await;

    let body = http_get(server.addr, "/health").await;
    let json: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(json["active_sessions"], 0);

    let (mut socket, _) = connect_async(server.terminal_url()).await.unwrap();
    socket.send(Message::text("echo up\n")).await.unwrap();
    let _ = timeout(WAIT, socket.next()).await;

    let body = http_get(server.addr, "/health").await;
    let json: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(json["status"], "ok");
    assert_eq!(json["active_sessions"], 1);

    let _ = socket.close(None).await;
    server.stop().await;
}

fn request_with_origin(
    server: &TestServer,
    origin: &str,
) -> tungstenite::handshake::client::Request {
    let mut request = server.terminal_url().into_client_request().unwrap();
    request
        .headers_mut()
        .insert("origin", HeaderValue::from_str(origin).unwrap());
    request
}

#[tokio::test]
async fn test_foreign_origin_cannot_open_terminal() {
    let temp = TempDir::new().unwrap();
    let server = TestServer::start(sh_in(temp.path())).await;

    for origin in ["http://evil.example", "http://localhost.evil.com"] {
        match connect_async(request_with_origin(&server, origin)).await {
            Err(tungstenite::Error::Http(response)) => {
                assert_eq!(response.status(), StatusCode::FORBIDDEN, "{origin}");
            }
            Err(other) => panic!("{origin}: unexpected error {other}"),
            Ok(_) => panic!("{origin}: terminal opened for a foreign page"),
        }
    }

    server.stop().await;
}

#[tokio::test]
async fn test_local_origin_opens_terminal() {
    let temp = TempDir::new().unwrap();
    let server = TestServer::start(sh_in(temp.path())).await;
    let origin = format!("http://127.0.0.1:{}", server.addr.port());

    let (mut socket, _) = connect_async(request_with_origin(&server, &origin))
        .await
        .unwrap();
    socket.send(Message::text("echo origin_ok\n")).await.unwrap();

    let found = timeout(WAIT, async {
        let mut output = String::new();
        while let Some(Ok(message)) = socket.next().await {
            if let Message::Text(text) = message {
                output.push_str(text.as_str());
                if output.contains("origin_ok\n") {
                    return true;
                }
            }
        }
        false
    })
    .await
    .unwrap_or(false);

    assert!(found);
    let _ = socket.close(None).await;
    server.stop().await;
}
