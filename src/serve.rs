//! Preview server for views.
//!
//! A lightweight HTTP server built on `tiny_http`:
//!
//! - `GET /<logical name>` renders a page or partial (`/` → `index`)
//! - `GET /_stream/<action>/<target>/<name>` answers with a turbo stream
//! - render data comes from `[serve].data/<logical name>.json` when present
//! - registry hot reload (via `watch` module)
//! - graceful shutdown on Ctrl+C
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌──────────────────┐
//! │   Main Thread   │     │  Watcher Thread  │
//! │  (HTTP Server)  │     │  (File Monitor)  │
//! └────────┬────────┘     └────────┬─────────┘
//!          │                       │
//!          ▼                       ▼
//!   Views::render()          Views::reload()
//! └─────────────────────────────────────────────┘
//!                    │
//!                    ▼
//!        RegistryHandle (lock-free swap)
//! ```
//!
//! # Query Parameters
//!
//! | Parameter       | Effect                                   |
//! |-----------------|------------------------------------------|
//! | `layout=alt`    | wrap pages in `layouts/alt`              |
//! | `skip_layout`   | render the bare body                     |
//! | `Turbo-Frame:`  | header; same as `skip_layout`            |

use crate::{
    config::ProjectConfig,
    log,
    views::{
        RenderContext, RenderError, RequestScope, STREAM_CONTENT_TYPE, StreamAction,
        TURBO_FRAME_HEADER, Views,
    },
    watch::watch_for_changes_blocking,
};
use anyhow::{Context, Result, anyhow};
use serde_json::{Value, json};
use std::{
    fs,
    net::SocketAddr,
    path::{Path, PathBuf},
    sync::Arc,
};
use tiny_http::{Header, Request, Response, Server, StatusCode};

/// Try binding to port, retry with incremented port if in use
const MAX_PORT_RETRIES: u16 = 10;

/// URL prefix of stream endpoints
const STREAM_PREFIX: &str = "_stream";

const HTML_CONTENT_TYPE: &str = "text/html; charset=utf-8";
const TEXT_CONTENT_TYPE: &str = "text/plain; charset=utf-8";

/// Headers added to every response.
const SECURE_HEADERS: [(&str, &str); 2] = [
    ("X-XSS-Protection", "1; mode=block"),
    ("X-Frame-Options", "deny"),
];

// ============================================================================
// Server Entry Point
// ============================================================================

/// Start the preview server with optional file watching.
///
/// This function:
/// 1. Binds to the configured interface and port (with auto-retry on port conflict)
/// 2. Sets up Ctrl+C handler for graceful shutdown
/// 3. Spawns file watcher thread (if enabled)
/// 4. Enters the main request handling loop
///
/// The server blocks until Ctrl+C is received.
pub fn serve_views(config: &ProjectConfig, views: Arc<Views>) -> Result<()> {
    let interface: std::net::IpAddr = config
        .serve
        .interface
        .parse()
        .with_context(|| format!("Invalid [serve.interface] `{}`", config.serve.interface))?;

    let (server, addr) = try_bind_port(interface, config.serve.port, MAX_PORT_RETRIES)?;
    let server = Arc::new(server);

    let server_for_signal = Arc::clone(&server);
    ctrlc::set_handler(move || {
        log!("serve"; "shutting down...");
        server_for_signal.unblock();
    })
    .context("Failed to set Ctrl+C handler")?;

    log!("serve"; "http://{}", addr);

    if config.serve.watch {
        let views = Arc::clone(&views);
        std::thread::spawn(move || {
            if let Err(err) = watch_for_changes_blocking(views) {
                log!("watch"; "{err:#}");
            }
        });
    }

    for request in server.incoming_requests() {
        if let Err(e) = handle_request(request, &views, &config.serve.data) {
            log!("serve"; "request error: {e:#}");
        }
    }

    Ok(())
}

/// Try to bind to a port, retrying with incremented port numbers if in use.
fn try_bind_port(
    interface: std::net::IpAddr,
    base_port: u16,
    max_retries: u16,
) -> Result<(Server, SocketAddr)> {
    let mut last_error = None;
    for offset in 0..max_retries {
        let port = base_port.saturating_add(offset);
        let addr = SocketAddr::new(interface, port);

        match Server::http(addr) {
            Ok(server) => {
                if offset > 0 {
                    log!("serve"; "port {} in use, using {} instead", base_port, port);
                }
                return Ok((server, addr));
            }
            Err(e) => last_error = Some(e),
        }
    }

    Err(anyhow!(
        "Failed to bind after {} attempts (ports {}-{}): {}",
        max_retries,
        base_port,
        base_port.saturating_add(max_retries.saturating_sub(1)),
        last_error.map(|e| e.to_string()).unwrap_or_default()
    ))
}

// ============================================================================
// Data Injection
// ============================================================================

/// Injector used by the preview server: exposes `request.path` and
/// `request.turbo_frame` to every template.
pub fn inject_request(request: &RequestScope, data: Value) -> Value {
    let mut data = match data {
        Value::Null => json!({}),
        other => other,
    };
    if let Some(object) = data.as_object_mut() {
        object.entry("request").or_insert_with(|| {
            json!({
                "path": request.value_str("path"),
                "turbo_frame": request.header(TURBO_FRAME_HEADER),
            })
        });
    }
    data
}

// ============================================================================
// Routing
// ============================================================================

/// Parsed request target.
#[derive(Debug, PartialEq, Eq)]
enum Route {
    View {
        name: String,
        layout: Option<String>,
        skip_layout: bool,
    },
    Stream {
        action: StreamAction,
        target: String,
        name: String,
    },
    BadRequest(String),
}

/// Map a request URL to a [`Route`].
///
/// ```text
/// /                           → View { name: "index" }
/// /events/show?layout=print   → View { name: "events/show", layout: "print" }
/// /_stream/append/list/item   → Stream { append, "list", "item" }
/// ```
fn route(url: &str) -> Route {
    let (path, query) = url.split_once('?').unwrap_or((url, ""));
    let path = match urlencoding::decode(path) {
        Ok(path) => path.into_owned(),
        Err(_) => return Route::BadRequest("path is not valid UTF-8".into()),
    };
    let path = path.trim_matches('/');

    if path.split('/').any(|segment| segment == "..") {
        return Route::BadRequest("path must not contain `..`".into());
    }

    if let Some(rest) = path
        .strip_prefix(STREAM_PREFIX)
        .and_then(|rest| rest.strip_prefix('/'))
    {
        let mut parts = rest.splitn(3, '/');
        let (Some(action), Some(target)) = (parts.next(), parts.next()) else {
            return Route::BadRequest(format!("expected /{STREAM_PREFIX}/<action>/<target>/<name>"));
        };
        let action = match action.parse::<StreamAction>() {
            Ok(action) => action,
            Err(err) => return Route::BadRequest(err.to_string()),
        };
        let name = parts.next().unwrap_or_default().to_owned();
        if action.needs_content() && name.is_empty() {
            return Route::BadRequest(format!("`{action}` needs a partial name"));
        }
        return Route::Stream {
            action,
            target: target.to_owned(),
            name,
        };
    }

    let name = if path.is_empty() { "index" } else { path }.to_owned();
    let mut layout = None;
    let mut skip_layout = false;

    for pair in query.split('&').filter(|pair| !pair.is_empty()) {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        let value = urlencoding::decode(value)
            .map(std::borrow::Cow::into_owned)
            .unwrap_or_default();
        match key {
            "layout" if !value.is_empty() => layout = Some(value),
            "skip_layout" => skip_layout = !matches!(value.as_str(), "0" | "false"),
            _ => {}
        }
    }

    Route::View {
        name,
        layout,
        skip_layout,
    }
}

// ============================================================================
// Request Handling
// ============================================================================

/// Response produced for one request, before conversion to `tiny_http`.
#[derive(Debug)]
struct Reply {
    status: u16,
    content_type: &'static str,
    body: String,
}

impl Reply {
    fn ok(content_type: &'static str, body: String) -> Self {
        Self {
            status: 200,
            content_type,
            body,
        }
    }

    fn text(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            content_type: TEXT_CONTENT_TYPE,
            body: body.into(),
        }
    }
}

/// Handle a single HTTP request.
fn handle_request(request: Request, views: &Views, data_dir: &Path) -> Result<()> {
    let mut scope = RequestScope::new().with_value("path", request.url().to_owned());
    for header in request.headers() {
        scope = scope.with_header(header.field.as_str().as_str(), header.value.as_str());
    }

    let reply = respond(views, data_dir, request.url(), scope);
    log!("serve"; "{} {} -> {}", request.method(), request.url(), reply.status);

    let mut response = Response::from_string(reply.body)
        .with_status_code(StatusCode(reply.status))
        .with_header(header("Content-Type", reply.content_type)?);
    for (name, value) in SECURE_HEADERS {
        response.add_header(header(name, value)?);
    }

    request.respond(response)?;
    Ok(())
}

fn header(name: &str, value: &str) -> Result<Header> {
    Header::from_bytes(name, value).map_err(|()| anyhow!("invalid header `{name}: {value}`"))
}

/// Render the reply for `url`. Render failures never produce partial bodies.
fn respond(views: &Views, data_dir: &Path, url: &str, scope: RequestScope) -> Reply {
    match route(url) {
        Route::BadRequest(reason) => Reply::text(400, reason),
        Route::View {
            name,
            layout,
            skip_layout,
        } => {
            let data = match load_data(data_dir, &name) {
                Ok(data) => data,
                Err(err) => return server_error(&name, &err),
            };
            let skip = skip_layout || scope.is_turbo_frame();
            let mut ctx = RenderContext::new(data).with_request(scope);
            if let Some(layout) = layout {
                ctx = ctx.with_layout(layout);
            }
            if skip {
                ctx = ctx.skip_layout();
            }
            match views.render_to_string(&name, &ctx) {
                Ok(html) => Reply::ok(HTML_CONTENT_TYPE, html),
                Err(err) => render_error(&name, err),
            }
        }
        Route::Stream {
            action,
            target,
            name,
        } => {
            let data = if action.needs_content() {
                match load_data(data_dir, &name) {
                    Ok(data) => data,
                    Err(err) => return server_error(&name, &err),
                }
            } else {
                Value::Null
            };
            let ctx = RenderContext::new(data).with_request(scope);
            match views.encode_stream(action, &target, &name, &ctx) {
                Ok(envelope) => Reply::ok(STREAM_CONTENT_TYPE, envelope.to_markup()),
                Err(err) => render_error(&name, err),
            }
        }
    }
}

fn render_error(name: &str, err: RenderError) -> Reply {
    if err.is_not_found() {
        return Reply::text(404, err.to_string());
    }
    server_error(name, &anyhow::Error::new(err))
}

fn server_error(name: &str, err: &anyhow::Error) -> Reply {
    log!("error"; "{name}: {err:#}");
    Reply::text(500, "500 Internal Server Error")
}

/// Read `<data_dir>/<name>.json`, or `null` when there is no fixture.
fn load_data(data_dir: &Path, name: &str) -> Result<Value> {
    let path: PathBuf = data_dir.join(format!("{name}.json"));
    if !path.is_file() {
        return Ok(Value::Null);
    }
    let content =
        fs::read_to_string(&path).with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Invalid JSON in {}", path.display()))
}

// ============================================================================
// Tests
// ============================================================================
