//! WebSocket-based live reload.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use kiln_graph::glob::to_slash;
use kiln_graph::{ReloadEvent, ReloadSink};

/// Messages sent to connected browsers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReloadMessage {
    /// Full page reload
    Reload,

    /// Swap the given stylesheets in place
    Css {
        /// Site-absolute URLs of the changed stylesheets
        paths: Vec<String>,
    },

    /// Connection established
    Connected,
}

impl ReloadMessage {
    /// Message for a finished stage.
    ///
    /// Stylesheet-only output is injected; anything else reloads the page.
    pub fn for_event(event: &ReloadEvent) -> Self {
        let all_css = !event.outputs.is_empty()
            && event
                .outputs
                .iter()
                .all(|p| p.extension().is_some_and(|ext| ext == "css"));

        if all_css {
            Self::Css {
                paths: event.outputs.iter().map(|p| url_path(p)).collect(),
            }
        } else {
            Self::Reload
        }
    }
}

fn url_path(relative: &Path) -> String {
    format!("/{}", to_slash(relative))
}

/// Hub for broadcasting reload messages to all connected clients.
#[derive(Debug, Clone)]
pub struct ReloadHub {
    sender: broadcast::Sender<ReloadMessage>,
}

impl ReloadHub {
    /// Create a new hub.
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(100);
        Self { sender }
    }

    /// Send a message to all connected clients.
    pub fn send(&self, msg: ReloadMessage) {
        // No receivers is fine
        let _ = self.sender.send(msg);
    }

    /// Subscribe to reload messages.
    pub fn subscribe(&self) -> broadcast::Receiver<ReloadMessage> {
        self.sender.subscribe()
    }

    /// Number of connected clients.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for ReloadHub {
    fn default() -> Self {
        Self::new()
    }
}

impl ReloadSink for ReloadHub {
    fn notify(&self, event: ReloadEvent) {
        let msg = ReloadMessage::for_event(&event);
        tracing::debug!(
            "'{}' done, notifying {} client(s): {:?}",
            event.stage,
            self.subscriber_count(),
            msg
        );
        self.send(msg);
    }
}

/// Route serving the client script.
pub const CLIENT_SCRIPT_PATH: &str = "/__livereload.js";

/// WebSocket route.
pub const SOCKET_PATH: &str = "/__livereload";

/// Client-side live reload script.
///
/// Connects back to the page's own host, so it works behind any port.
pub fn client_script() -> String {
    format!(
        r#"
(function() {{
  'use strict';

  var scheme = location.protocol === 'https:' ? 'wss://' : 'ws://';
  var url = scheme + location.host + '{socket}';
  var retries = 0;

  function sameFile(href, path) {{
    var a = document.createElement('a');
    a.href = href;
    return a.pathname === path;
  }}

  function swapStyles(paths) {{
    var links = document.querySelectorAll('link[rel="stylesheet"]');
    var swapped = 0;
    Array.prototype.forEach.call(links, function(link) {{
      paths.forEach(function(path) {{
        if (sameFile(link.href, path)) {{
          var clean = link.href.replace(/[?&]livereload=\d+/, '');
          var sep = clean.indexOf('?') === -1 ? '?' : '&';
          link.href = clean + sep + 'livereload=' + Date.now();
          swapped++;
        }}
      }});
    }});
    if (swapped === 0) {{
      location.reload();
    }}
  }}

  function connect() {{
    var ws = new WebSocket(url);

    ws.onopen = function() {{
      retries = 0;
    }};

    ws.onmessage = function(event) {{
      var msg = JSON.parse(event.data);
      switch (msg.type) {{
        case 'reload':
          location.reload();
          break;
        case 'css':
          swapStyles(msg.paths);
          break;
        case 'connected':
          console.log('[kiln] Live reload connected');
          break;
      }}
    }};

    ws.onclose = function() {{
      if (retries < 10) {{
        retries++;
        setTimeout(connect, 1000 * retries);
      }}
    }};
  }}

  connect();
}})();
"#,
        socket = SOCKET_PATH
    )
}
