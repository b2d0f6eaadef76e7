//! Development server implementation.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Request, State,
    },
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::get,
    Router,
};
use percent_encoding::percent_decode_str;
use tokio::sync::broadcast::error::RecvError;
use tower_http::services::ServeDir;

use crate::livereload::{client_script, ReloadHub, ReloadMessage, CLIENT_SCRIPT_PATH, SOCKET_PATH};
use crate::watch::WatchDispatcher;
use crate::watcher::FileWatcher;

/// Configuration for the development server.
#[derive(Debug, Clone)]
pub struct DevServerConfig {
    /// Directory to serve (the build output)
    pub dest: PathBuf,

    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,

    /// Open browser on start
    pub open: bool,

    /// Quiet window before a batch of changes is handled
    pub debounce: Duration,
}

impl Default for DevServerConfig {
    fn default() -> Self {
        Self {
            dest: PathBuf::from("www"),
            host: "127.0.0.1".to_string(),
            port: 3000,
            open: true,
            debounce: Duration::from_millis(100),
        }
    }
}

/// Errors that can occur with the server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Failed to bind to {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },

    #[error("File watch error: {0}")]
    Watch(std::io::Error),

    #[error("Server error: {0}")]
    Serve(std::io::Error),
}

/// Shared server state.
struct ServerState {
    dest: PathBuf,
    hub: ReloadHub,
}

/// Development server: static output, live reload and optional watching.
pub struct DevServer {
    config: DevServerConfig,
    hub: ReloadHub,
    dispatcher: Option<WatchDispatcher>,
}

impl DevServer {
    /// Create a server that broadcasts through `hub`.
    pub fn new(config: DevServerConfig, hub: ReloadHub) -> Self {
        Self {
            config,
            hub,
            dispatcher: None,
        }
    }

    /// Watch sources and re-run stages through `dispatcher`.
    pub fn with_dispatcher(mut self, dispatcher: WatchDispatcher) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    /// The router, without binding.
    pub fn router(&self) -> Router {
        let state = Arc::new(ServerState {
            dest: self.config.dest.clone(),
            hub: self.hub.clone(),
        });

        Router::new()
            .route(SOCKET_PATH, get(ws_handler))
            .route(CLIENT_SCRIPT_PATH, get(client_script_handler))
            .fallback(site_handler)
            .with_state(state)
    }

    /// Start the development server.
    pub async fn start(self) -> Result<(), ServerError> {
        let addr = format!("{}:{}", self.config.host, self.config.port);

        if let Some(dispatcher) = &self.dispatcher {
            spawn_watch(dispatcher.clone(), self.config.debounce)?;
        }

        let app = self.router();

        let listener = tokio::net::TcpListener::bind((self.config.host.as_str(), self.config.port))
            .await
            .map_err(|source| ServerError::Bind {
                addr: addr.clone(),
                source,
            })?;

        let url = format!("http://{}", addr);
        tracing::info!("Serving {} at {}", self.config.dest.display(), url);

        if self.config.open {
            let _ = open::that(&url);
        }

        axum::serve(listener, app).await.map_err(ServerError::Serve)?;

        Ok(())
    }
}

/// Start watching and feed batches to the dispatcher.
fn spawn_watch(dispatcher: WatchDispatcher, debounce: Duration) -> Result<(), ServerError> {
    let roots = dispatcher.watch_roots();
    let (watcher, mut rx) =
        FileWatcher::new(dispatcher.root(), &roots, debounce).map_err(ServerError::Watch)?;

    tokio::spawn(async move {
        // Keep watcher alive
        let _watcher = watcher;

        while let Some(batch) = rx.recv().await {
            for path in &batch.changed {
                tracing::debug!("Changed: {}", path.display());
            }
            for path in &batch.removed {
                tracing::debug!("Removed: {}", path.display());
            }

            let stages = dispatcher.handle(&batch);
            if stages.is_empty() {
                tracing::debug!("No stage watches these paths");
            }
        }
    });

    Ok(())
}

/// Serve a file from the output directory, injecting the client into HTML.
async fn site_handler(State(state): State<Arc<ServerState>>, req: Request) -> Response {
    let target = html_target(&state.dest, req.uri().path()).await;
    if let Some(file) = target {
        match tokio::fs::read_to_string(&file).await {
            Ok(html) => return Html(inject_client(&html)).into_response(),
            Err(e) => tracing::warn!("Failed to read {}: {}", file.display(), e),
        }
    }

    let mut files = ServeDir::new(&state.dest);
    match files.try_call(req).await {
        Ok(res) => res.map(axum::body::Body::new).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

/// The HTML file a request path maps to, if any.
///
/// The path is percent-decoded first. Directories map to their `index.html`.
/// Paths escaping `dest` are ignored.
pub async fn html_target(dest: &Path, uri_path: &str) -> Option<PathBuf> {
    let decoded = percent_decode_str(uri_path).decode_utf8().ok()?;
    let relative = Path::new(decoded.trim_start_matches('/'));
    if relative
        .components()
        .any(|c| !matches!(c, Component::Normal(_)))
    {
        return None;
    }

    let mut file = dest.join(relative);
    let mut metadata = tokio::fs::metadata(&file).await.ok()?;
    if metadata.is_dir() {
        file.push("index.html");
        metadata = tokio::fs::metadata(&file).await.ok()?;
    }

    let is_html = file
        .extension()
        .is_some_and(|ext| ext == "html" || ext == "htm");
    (is_html && metadata.is_file()).then_some(file)
}

/// Insert the client script tag before `</body>`, or append it.
pub fn inject_client(html: &str) -> String {
    let tag = format!(r#"<script src="{}"></script>"#, CLIENT_SCRIPT_PATH);

    match html.to_ascii_lowercase().rfind("</body>") {
        Some(pos) => {
            let mut out = String::with_capacity(html.len() + tag.len());
            out.push_str(&html[..pos]);
            out.push_str(&tag);
            out.push_str(&html[pos..]);
            out
        }
        None => format!("{html}{tag}"),
    }
}

/// Handler for the live reload WebSocket endpoint.
async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<ServerState>>,
) -> impl IntoResponse {
    let rx = state.hub.subscribe();
    ws.on_upgrade(move |socket| handle_ws(socket, rx))
}

/// Forward reload messages to one client.
async fn handle_ws(
    mut socket: WebSocket,
    mut rx: tokio::sync::broadcast::Receiver<ReloadMessage>,
) {
    if send_message(&mut socket, &ReloadMessage::Connected).await.is_err() {
        return;
    }

    loop {
        let msg = match rx.recv().await {
            Ok(msg) => msg,
            // Missed messages: a full reload covers them
            Err(RecvError::Lagged(_)) => ReloadMessage::Reload,
            Err(RecvError::Closed) => break,
        };
        if send_message(&mut socket, &msg).await.is_err() {
            break;
        }
    }
}

async fn send_message(socket: &mut WebSocket, msg: &ReloadMessage) -> Result<(), ()> {
    let json = serde_json::to_string(msg).map_err(|e| {
        tracing::warn!("Failed to encode reload message: {}", e);
    })?;
    socket
        .send(Message::Text(json.into()))
        .await
        .map_err(|_| ())
}

/// Handler for the client script.
async fn client_script_handler() -> impl IntoResponse {
    ([("content-type", "application/javascript")], client_script())
}
