//! WebSocket front end for shell sessions.

use crate::connection::{CloseReason, Connection};
use crate::error::{BridgeError, Result};
use crate::session::{ShellConfig, run_session};
use async_trait::async_trait;
use axum::{
    Json, Router,
    extract::{
        State,
        ws::{
            CloseFrame, Message, WebSocket, WebSocketUpgrade,
            rejection::WebSocketUpgradeRejection,
        },
    },
    http::{HeaderMap, HeaderValue, Method, StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use serde_json::json;
use std::{
    future::Future,
    net::{Ipv4Addr, Ipv6Addr, SocketAddr},
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};
use tokio::net::TcpListener;
use tower_http::{
    cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer},
    trace::TraceLayer,
};
use tracing::{debug, error, info, warn};
use url::{Host, Url};

/// Port used when none is configured.
pub const DEFAULT_PORT: u16 = 8765;

/// Route of the interactive terminal endpoint.
pub const TERMINAL_ROUTE: &str = "/api/ws/terminal";

/// Configuration for the bridge server.
///
/// # Example
///
/// ```rust
/// use warden_bridge::{BridgeConfig, ShellConfig};
///
/// let config = BridgeConfig {
///     bind_addr: "127.0.0.1:0".parse().unwrap(),
///     shell: ShellConfig {
///         command: "sh".to_string(),
///         ..ShellConfig::default()
///     },
/// };
/// assert_eq!(config.shell.read_chunk_size, 1024);
/// ```
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Address to bind. Port 0 picks a free port.
    pub bind_addr: SocketAddr,
    /// Shell spawned for every terminal connection.
    pub shell: ShellConfig,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from((Ipv4Addr::LOCALHOST, DEFAULT_PORT)),
            shell: ShellConfig::default(),
        }
    }
}

#[derive(Clone)]
struct BridgeState {
    shell: Arc<ShellConfig>,
    active_sessions: Arc<AtomicUsize>,
    /// Bound to loopback: only local pages may open a terminal.
    loopback_only: bool,
}

/// Counts a session as active for as long as it is alive.
struct ActiveSession(Arc<AtomicUsize>);

impl ActiveSession {
    fn enter(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(counter))
    }
}

impl Drop for ActiveSession {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// A shell session's view of an upgraded WebSocket.
///
/// Text frames carry input verbatim. Binary frames are accepted and decoded
/// lossily as UTF-8. Control frames never reach the session.
pub struct WsConnection {
    socket: WebSocket,
    closed: bool,
}

impl WsConnection {
    pub fn new(socket: WebSocket) -> Self {
        Self {
            socket,
            closed: false,
        }
    }
}

#[async_trait]
impl Connection for WsConnection {
    async fn recv(&mut self) -> Option<Result<String>> {
        loop {
            match self.socket.recv().await? {
                Ok(Message::Text(text)) => return Some(Ok(text.to_string())),
                Ok(Message::Binary(bytes)) => {
                    return Some(Ok(String::from_utf8_lossy(&bytes).into_owned()));
                }
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => continue,
                Ok(Message::Close(frame)) => {
                    debug!(code = ?frame.as_ref().map(|f| f.code), "Client sent close frame");
                    return None;
                }
                Err(e) => return Some(Err(BridgeError::Connection(e.to_string()))),
            }
        }
    }

    async fn send(&mut self, text: String) -> Result<()> {
        self.socket
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| BridgeError::Connection(e.to_string()))
    }

    async fn close(&mut self, reason: Option<CloseReason>) {
        if self.closed {
            return;
        }
        self.closed = true;
        let frame = reason.map(|reason| {
            let reason = reason.truncated();
            CloseFrame {
                code: reason.code,
                reason: reason.reason.into(),
            }
        });
        if let Err(e) = self.socket.send(Message::Close(frame)).await {
            debug!("Close frame not delivered: {}", e);
        }
    }
}

/// Whether an `Origin` header value names a page served from this machine.
///
/// The parsed host must be exactly `127.0.0.1`, `localhost` or `[::1]`, on any
/// port, over `http` or `https`. `http://localhost.evil.com` is not local.
pub fn is_loopback_origin(origin: &str) -> bool {
    let Ok(url) = Url::parse(origin) else {
        return false;
    };
    if !matches!(url.scheme(), "http" | "https") {
        return false;
    }
    match url.host() {
        Some(Host::Domain(domain)) => domain.eq_ignore_ascii_case("localhost"),
        Some(Host::Ipv4(ip)) => ip == Ipv4Addr::LOCALHOST,
        Some(Host::Ipv6(ip)) => ip == Ipv6Addr::LOCALHOST,
        None => false,
    }
}

/// Build a CORS layer appropriate for the bind address.
///
/// - **Loopback**: only pages whose origin passes [`is_loopback_origin`] may
///   call the HTTP endpoints.
/// - **Non-loopback**: any origin, with a warning logged by the caller.
fn build_cors_layer(bind_addr: &SocketAddr) -> CorsLayer {
    let methods = AllowMethods::list([Method::GET, Method::OPTIONS]);
    let headers = AllowHeaders::list([header::CONTENT_TYPE, header::ACCEPT]);

    if bind_addr.ip().is_loopback() {
        CorsLayer::new()
            .allow_origin(AllowOrigin::predicate(
                |origin: &HeaderValue, _req: &axum::http::request::Parts| {
                    origin.to_str().is_ok_and(is_loopback_origin)
                },
            ))
            .allow_methods(methods)
            .allow_headers(headers)
    } else {
        CorsLayer::new()
            .allow_origin(AllowOrigin::any())
            .allow_methods(methods)
            .allow_headers(headers)
    }
}

/// The bridge's routes: `GET /health` and the terminal WebSocket.
pub fn router(config: &BridgeConfig) -> Router {
    let state = BridgeState {
        shell: Arc::new(config.shell.clone()),
        active_sessions: Arc::new(AtomicUsize::new(0)),
        loopback_only: config.bind_addr.ip().is_loopback(),
    };

    Router::new()
        .route("/health", get(health_check))
        .route(TERMINAL_ROUTE, get(handle_terminal))
        .layer(build_cors_layer(&config.bind_addr))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve on an already bound listener until `shutdown` resolves.
pub async fn serve<F>(listener: TcpListener, config: BridgeConfig, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let local_addr = listener
        .local_addr()
        .map_err(|e| BridgeError::HttpServer(format!("Failed to get local addr: {}", e)))?;

    if !local_addr.ip().is_loopback() {
        warn!(
            "Bridge bound to non-loopback address {}. Every client gets a shell; \
             restrict access via firewall or reverse proxy.",
            local_addr
        );
    }

    let app = router(&BridgeConfig {
        bind_addr: local_addr,
        shell: config.shell,
    });

    info!("Bridge listening on http://{}", local_addr);
    info!("Terminal endpoint: ws://{}{}", local_addr, TERMINAL_ROUTE);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| BridgeError::HttpServer(format!("Server error: {}", e)))?;

    info!("Bridge stopped");
    Ok(())
}

/// Bind `config.bind_addr` and serve until Ctrl-C.
///
/// The bound port is printed to stderr as `WARDEN_BOUND_PORT=<port>` so
/// scripts that bind port 0 can find the server.
pub async fn start_bridge(config: BridgeConfig) -> Result<()> {
    info!("Starting bridge on {}", config.bind_addr);

    let listener = TcpListener::bind(config.bind_addr)
        .await
        .map_err(|e| BridgeError::HttpServer(format!("Failed to bind: {}", e)))?;

    if let Ok(local_addr) = listener.local_addr() {
        eprintln!("WARDEN_BOUND_PORT={}", local_addr.port());
    }

    serve(listener, config, shutdown_signal()).await
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

async fn health_check(State(state): State<BridgeState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "active_sessions": state.active_sessions.load(Ordering::SeqCst),
    }))
}

/// Browsers do not apply CORS to WebSocket upgrades, so the origin is
/// checked here. Clients that send no `Origin` (non-browser tools) pass.
async fn handle_terminal(
    State(state): State<BridgeState>,
    headers: HeaderMap,
    ws: std::result::Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    if state.loopback_only
        && let Some(origin) = headers.get(header::ORIGIN)
        && !origin.to_str().is_ok_and(is_loopback_origin)
    {
        warn!(origin = ?origin, "Rejected terminal connection from a non-local origin");
        return (StatusCode::FORBIDDEN, "Origin not allowed").into_response();
    }

    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => return rejection.into_response(),
    };

    ws.on_upgrade(move |socket| async move {
        let _active = ActiveSession::enter(&state.active_sessions);
        let mut connection = WsConnection::new(socket);
        let outcome = run_session(&mut connection, &state.shell).await;
        info!(
            session_id = ?outcome.session_id,
            reason = %outcome.reason,
            frames_in = outcome.frames_in,
            frames_out = outcome.frames_out,
            "Terminal connection finished"
        );
    })
}
