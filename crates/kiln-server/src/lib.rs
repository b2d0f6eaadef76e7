//! Development server with file watching and live reload for kiln.
//!
//! Watches source files, re-runs the stages they feed, and pushes reload
//! messages to connected browsers over a WebSocket.

pub mod livereload;
pub mod server;
pub mod watch;
pub mod watcher;

pub use livereload::{client_script, ReloadHub, ReloadMessage};
pub use server::{inject_client, DevServer, DevServerConfig, ServerError};
pub use watch::{affected_stages, WatchDispatcher, WatchRule};
pub use watcher::{FileWatcher, WatchBatch};
