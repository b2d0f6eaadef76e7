//! Preview server command.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use axum::Router;
use tower_http::services::ServeDir;

use crate::config::Project;

/// Run the serve command.
pub async fn run(project: &Project, port: Option<u16>, dir: Option<PathBuf>) -> Result<()> {
    let dir = match dir {
        Some(dir) => dir,
        None => project.root.join(&project.config.paths.dest),
    };
    if !dir.exists() {
        anyhow::bail!(
            "Directory not found: {}. Run 'kiln build' first.",
            dir.display()
        );
    }

    let server = project.server(Path::new(&project.config.paths.dest));
    let port = port.unwrap_or(server.port);
    let addr = format!("{}:{}", server.host, port);

    tracing::info!("Serving {} at http://{}", dir.display(), addr);

    let app = Router::new().fallback_service(ServeDir::new(&dir));

    let listener = tokio::net::TcpListener::bind((server.host.as_str(), port))
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    if server.open {
        let url = format!("http://{}", addr);
        let _ = open::that(&url);
    }

    axum::serve(listener, app).await?;

    Ok(())
}
