//! Development HTTP server.
//!
//! Serves the output directory and keeps a websocket open to every page it
//! served. HTML responses get a small script injected that listens on that
//! socket; whenever anything in the output directory changes the server
//! sends `reload` and the page refreshes itself.

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::http::header::{CONTENT_LENGTH, CONTENT_TYPE};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use camino::Utf8PathBuf;
use console::style;
use notify::RecursiveMode;
use notify_debouncer_full::{DebounceEventResult, new_debouncer};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::services::ServeDir;

use crate::error::ServeError;

const RELOAD_PATH: &str = "/__livereload";

const RELOAD_SCRIPT: &str = r#"<script>
(() => {
    const scheme = location.protocol === "https:" ? "wss://" : "ws://";
    const socket = new WebSocket(scheme + location.host + "/__livereload");
    socket.addEventListener("message", () => window.location.reload());
})();
</script>"#;

/// Serves `dist` on `127.0.0.1:port`, or on any free port when that one is
/// taken. Runs until the process exits.
pub async fn serve(dist: Utf8PathBuf, port: u16) -> Result<(), ServeError> {
    let listener = reserve_port(port).await?;
    serve_on(listener, dist).await
}

async fn serve_on(listener: TcpListener, dist: Utf8PathBuf) -> Result<(), ServeError> {
    tokio::fs::create_dir_all(&dist).await?;
    let address = listener.local_addr()?;

    let (reload, _) = broadcast::channel::<()>(16);

    let notify = reload.clone();
    let mut debouncer = new_debouncer(
        Duration::from_millis(100),
        None,
        move |result: DebounceEventResult| match result {
            Ok(events) if !events.is_empty() => {
                // no subscribers just means no open pages
                let _ = notify.send(());
            }
            Ok(_) => {}
            Err(errors) => {
                for e in errors {
                    tracing::error!("output watch error: {e}");
                }
            }
        },
    )?;
    debouncer.watch(&dist, RecursiveMode::Recursive)?;

    let router = Router::new()
        .route(RELOAD_PATH, get(livereload))
        .fallback_service(ServeDir::new(&dist))
        .layer(middleware::from_fn(inject_reload))
        .with_state(reload);

    let url = style(format!("http://{address}/")).yellow();
    tracing::info!("serving {dist} on {url}");

    axum::serve(listener, router).await?;

    Ok(())
}

async fn reserve_port(port: u16) -> Result<TcpListener, ServeError> {
    let preferred = SocketAddr::from((Ipv4Addr::LOCALHOST, port));

    match TcpListener::bind(preferred).await {
        Ok(listener) => Ok(listener),
        Err(e) => {
            tracing::warn!("port {port} unavailable ({e}), picking another one");
            TcpListener::bind(SocketAddr::from((Ipv4Addr::LOCALHOST, 0)))
                .await
                .map_err(ServeError::Bind)
        }
    }
}

async fn livereload(ws: WebSocketUpgrade, State(reload): State<broadcast::Sender<()>>) -> Response {
    ws.on_upgrade(move |socket| client(socket, reload.subscribe()))
}

async fn client(mut socket: WebSocket, mut reload: broadcast::Receiver<()>) {
    loop {
        tokio::select! {
            signal = reload.recv() => {
                if let Err(broadcast::error::RecvError::Closed) = signal {
                    break;
                }
                if socket.send(Message::Text("reload".into())).await.is_err() {
                    break;
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => {}
                }
            }
        }
    }
}

async fn inject_reload(request: Request, next: Next) -> Response {
    let response = next.run(request).await;

    let is_html = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with("text/html"));

    if !is_html {
        return response;
    }

    let (mut parts, body) = response.into_parts();
    let bytes = match axum::body::to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::error!("couldn't buffer HTML response: {e}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let html = inject_script(&String::from_utf8_lossy(&bytes), RELOAD_SCRIPT);
    parts.headers.remove(CONTENT_LENGTH);

    Response::from_parts(parts, Body::from(html))
}

/// Inserts `script` right before the last `</body>`, or appends it when the
/// document has none.
fn inject_script(html: &str, script: &str) -> String {
    let at = html.to_ascii_lowercase().rfind("</body>").unwrap_or(html.len());

    let mut out = String::with_capacity(html.len() + script.len());
    out.push_str(&html[..at]);
    out.push_str(script);
    out.push_str(&html[at..]);
    out
}
