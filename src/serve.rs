use std::io;
use std::net::TcpListener;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::{
    body::Body,
    extract::{Query, Request, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::Response,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tokio::signal;
use tower_http::compression::CompressionLayer;

use crate::analytics::AnalyticsBatch;
use crate::cache::ContentCache;
use crate::config::SiteConfig;
use crate::frontmatter::{self, InitiativeMeta, Scalar};
use crate::html::{self, PageShell};
use crate::initiative::{InitiativeLoader, PageStatus};
use crate::source::{load_fragment, normalize_path, DirSource};

/// Maximum number of consecutive ports to try before giving up.
const MAX_PORT_ATTEMPTS: u16 = 100;

/// Maximum file size that will be read and served (16 MiB).
pub const MAX_FILE_SIZE: u64 = 16 * 1024 * 1024;

/// Shared application state passed to all request handlers via `Arc<AppState>`.
pub struct AppState {
    /// Site directory from which pages and assets are served.
    pub site_root: PathBuf,
    /// Canonicalized `site_root` used for symlink-safe containment checks.
    pub canonical_root: PathBuf,
    pub config: SiteConfig,
    /// Page-level reads (header component) rooted at `site_root`.
    pub pages: DirSource,
    pub initiatives: InitiativeLoader<DirSource>,
}

impl AppState {
    pub fn new(site_root: PathBuf, config: SiteConfig) -> Self {
        let canonical_root =
            std::fs::canonicalize(&site_root).unwrap_or_else(|_| site_root.clone());
        let pages = DirSource::new(canonical_root.clone());
        let mut initiatives = InitiativeLoader::from_config(pages.clone(), &config);
        if let Some(dir) = &config.content.cache_dir {
            initiatives =
                initiatives.with_cache(ContentCache::on_disk(dir.clone(), config.content.cache_ttl()));
        }
        Self {
            site_root,
            canonical_root,
            config,
            pages,
            initiatives,
        }
    }
}

/// Attempt to bind a TCP listener on `bind_addr` starting at `start_port`.
///
/// On `EADDRINUSE` the port is incremented by one and the attempt is retried up
/// to `MAX_PORT_ATTEMPTS` times. Any other OS error fails immediately.
pub fn bind_with_retry(bind_addr: &str, start_port: u16) -> io::Result<(TcpListener, u16)> {
    let mut port = start_port;
    tracing::debug!(port, "trying port");
    for _ in 0..MAX_PORT_ATTEMPTS {
        match TcpListener::bind((bind_addr, port)) {
            Ok(listener) => {
                tracing::debug!(port, "bound");
                return Ok((listener, port));
            }
            Err(e) if e.kind() == io::ErrorKind::AddrInUse => {
                let next = port.wrapping_add(1);
                tracing::debug!(port, next, "address in use");
                port = next;
            }
            Err(e) => {
                return Err(io::Error::new(
                    e.kind(),
                    format!("bind {bind_addr}:{port} failed: {e}"),
                ));
            }
        }
    }
    Err(io::Error::new(
        io::ErrorKind::AddrInUse,
        format!("exhausted {MAX_PORT_ATTEMPTS} port candidates starting at {start_port}; all ports in use"),
    ))
}

// ---------------------------------------------------------------------------
// Path resolution helpers
// ---------------------------------------------------------------------------

/// Percent-decode a URL path byte-by-byte (RFC 3986 §2.1).
///
/// Returns `None` if the encoding is malformed (truncated `%XX` sequence or
/// non-hex digit) or if the decoded bytes are not valid UTF-8.
pub fn percent_decode(encoded: &str) -> Option<String> {
    let bytes = encoded.as_bytes();
    let mut out: Vec<u8> = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            if i + 2 >= bytes.len() {
                return None;
            }
            let hi = hex_digit(bytes[i + 1])?;
            let lo = hex_digit(bytes[i + 2])?;
            out.push((hi << 4) | lo);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}

fn hex_digit(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

/// Derive the `Content-Type` value from a file extension (case-insensitive).
///
/// Unknown extensions are `application/octet-stream` so browsers never sniff.
pub fn mime_for_ext(ext: &str) -> &'static str {
    match ext.to_lowercase().as_str() {
        "md" | "html" | "htm" => "text/html; charset=utf-8",
        "css" => "text/css",
        "js" => "text/javascript",
        "json" => "application/json",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "svg" => "image/svg+xml",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "ico" => "image/x-icon",
        "woff2" => "font/woff2",
        "pdf" => "application/pdf",
        _ => "application/octet-stream",
    }
}

async fn is_file(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_file())
        .unwrap_or(false)
}

/// Resolve a candidate path to an existing file.
///
/// Resolution order:
/// 1. `candidate` itself.
/// 2. For a directory: `index.html`, then `index.md`.
/// 3. Without an extension: `candidate.html`, then `candidate.md`.
///
/// Returns `(resolved_path, branch_name)`, or `None` when nothing matches.
async fn resolve_candidate(candidate: &Path) -> Option<(PathBuf, &'static str)> {
    match tokio::fs::metadata(candidate).await {
        Ok(meta) if meta.is_file() => return Some((candidate.to_path_buf(), "exact")),
        Ok(meta) if meta.is_dir() => {
            for (name, branch) in [("index.html", "index-html"), ("index.md", "index-md")] {
                let index = candidate.join(name);
                if is_file(&index).await {
                    return Some((index, branch));
                }
            }
            return None;
        }
        _ => {}
    }

    if candidate.extension().is_none() {
        for ext in ["html", "md"] {
            let with_ext = candidate.with_extension(ext);
            if is_file(&with_ext).await {
                return Some((with_ext, "extensionless"));
            }
        }
    }

    None
}

// ---------------------------------------------------------------------------
// Response helpers
// ---------------------------------------------------------------------------

/// Response with a content type and `X-Content-Type-Options: nosniff`.
fn respond(status: StatusCode, content_type: &'static str, body: impl Into<Body>) -> Response {
    let mut resp = Response::new(body.into());
    *resp.status_mut() = status;
    let headers = resp.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
    headers.insert(header::X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff"));
    resp
}

fn not_found_response() -> Response {
    respond(StatusCode::NOT_FOUND, "text/plain; charset=utf-8", "Not Found")
}

fn too_large_response(norm_path: &str, size: u64) -> Response {
    let body = format!(
        "Content Too Large: {norm_path} ({size} bytes exceeds {MAX_FILE_SIZE} byte limit)"
    );
    respond(StatusCode::PAYLOAD_TOO_LARGE, "text/plain; charset=utf-8", body)
}

/// Return `true` when the query string contains the `raw=1` parameter.
fn is_raw_mode(query: &str) -> bool {
    query.split('&').any(|param| param == "raw=1")
}

/// Strong validator over the exact response bytes.
fn etag_for(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    format!("\"{}\"", &hex::encode(digest)[..16])
}

/// Whole seconds since the epoch; HTTP dates carry no sub-second part.
fn unix_secs(t: SystemTime) -> u64 {
    t.duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

/// True when the request's validators show the client copy is current.
/// `If-None-Match` takes precedence over `If-Modified-Since`.
fn is_not_modified(headers: &HeaderMap, etag: &str, modified: Option<SystemTime>) -> bool {
    if let Some(inm) = headers.get(header::IF_NONE_MATCH).and_then(|v| v.to_str().ok()) {
        return inm.split(',').map(str::trim).any(|tag| tag == "*" || tag == etag);
    }
    let since = headers
        .get(header::IF_MODIFIED_SINCE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| httpdate::parse_http_date(v).ok());
    match (since, modified) {
        (Some(since), Some(modified)) => unix_secs(modified) <= unix_secs(since),
        _ => false,
    }
}

/// Serve `body` with validators, answering 304 when the client copy is current.
fn conditional_response(
    req_headers: &HeaderMap,
    content_type: &'static str,
    body: Vec<u8>,
    modified: Option<SystemTime>,
) -> Response {
    let etag = etag_for(&body);
    let not_modified = is_not_modified(req_headers, &etag, modified);
    let mut resp = if not_modified {
        respond(StatusCode::NOT_MODIFIED, content_type, Body::empty())
    } else {
        respond(StatusCode::OK, content_type, body)
    };
    let headers = resp.headers_mut();
    if let Ok(value) = HeaderValue::from_str(&etag) {
        headers.insert(header::ETAG, value);
    }
    if let Some(modified) = modified {
        if let Ok(value) = HeaderValue::from_str(&httpdate::fmt_http_date(modified)) {
            headers.insert(header::LAST_MODIFIED, value);
        }
    }
    resp
}

/// Full page for a markdown file: front matter title, else first H1, else
/// the file stem.
fn render_markdown_page(text: &str, path: &Path, site_name: &str) -> String {
    let doc = frontmatter::split(text);
    let meta = InitiativeMeta::from_front_matter(&doc.front_matter);
    let (body_html, first_heading) = html::render_markdown_with_title(&doc.body);
    let title = meta
        .title
        .as_ref()
        .and_then(Scalar::non_empty)
        .or(first_heading)
        .unwrap_or_else(|| {
            path.file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or_default()
                .to_owned()
        });
    let document_title = format!("{title} - {site_name}");
    let article_html = format!("<div class=\"markdown-content\">\n{body_html}</div>\n");
    html::build_page_shell(&PageShell {
        document_title: &document_title,
        heading: &title,
        meta_html: "",
        article_html: &article_html,
        header_html: None,
    })
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct InitiativeQuery {
    pub id: Option<String>,
}

/// `/initiative?id=X`: the rendered article, or the error page with a link
/// back home.
async fn initiative_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<InitiativeQuery>,
) -> Response {
    let page = state.initiatives.page(query.id.as_deref()).await;
    let header_html = load_fragment(&state.pages, &state.config.content.header_component).await;
    let status = match page.status {
        PageStatus::Ok => StatusCode::OK,
        PageStatus::NotFound => StatusCode::NOT_FOUND,
    };
    tracing::info!(id = ?query.id, status = status.as_u16(), "initiative page");
    respond(
        status,
        "text/html; charset=utf-8",
        page.to_document(Some(&header_html)),
    )
}

/// Collection endpoint for analytics batches.
async fn analytics_handler(Json(batch): Json<AnalyticsBatch>) -> StatusCode {
    let sessions: std::collections::BTreeSet<&str> =
        batch.events.iter().map(|e| e.session_id.as_str()).collect();
    tracing::info!(events = batch.events.len(), sessions = sessions.len(), "analytics batch received");
    StatusCode::NO_CONTENT
}

/// Static pipeline for everything else.
///
/// Steps:
/// 1. Percent-decode the raw request path (before any normalisation).
/// 2. Normalise: strip `.`/`..`; reject traversal above the root.
/// 3. Candidate = site root + normalised path.
/// 4. Fallback resolution: exact, directory index, extensionless.
/// 5. Canonicalise and re-verify containment in `canonical_root`.
/// 6. Reject files larger than `MAX_FILE_SIZE` with 413.
/// 7. Dispatch: `.md` is rendered (or returned as `text/plain` with
///    `?raw=1`); anything else is served as a static asset.
///
/// Every response carries `X-Content-Type-Options: nosniff`.
async fn serve_handler(State(state): State<Arc<AppState>>, req: Request) -> Response {
    let raw_path = req.uri().path().to_owned();
    let query = req.uri().query().unwrap_or("").to_owned();

    let Some(decoded) = percent_decode(&raw_path) else {
        tracing::debug!(path = %raw_path, reason = "invalid-percent-encoding", "denied");
        return not_found_response();
    };

    if decoded.contains('\0') {
        tracing::debug!(path = %raw_path, reason = "null-byte", "denied");
        return not_found_response();
    }

    let Some(normalized) = normalize_path(&decoded) else {
        tracing::warn!(path = %raw_path, reason = "path-traversal", "denied");
        return not_found_response();
    };
    let norm_display = normalized.display().to_string();

    let candidate = state.site_root.join(&normalized);

    let Some((resolved, branch)) = resolve_candidate(&candidate).await else {
        tracing::debug!(path = %norm_display, reason = "not-found", "denied");
        return not_found_response();
    };

    let canonical = match tokio::fs::canonicalize(&resolved).await {
        Ok(c) => c,
        Err(_) => {
            tracing::debug!(path = %norm_display, reason = "canonicalize-failed", "denied");
            return not_found_response();
        }
    };

    if !canonical.starts_with(&state.canonical_root) {
        tracing::warn!(
            path = %norm_display,
            canonical = %canonical.display(),
            reason = "outside-root",
            "denied"
        );
        return not_found_response();
    }

    let meta = match tokio::fs::metadata(&canonical).await {
        Ok(m) => m,
        Err(_) => {
            tracing::debug!(path = %norm_display, reason = "metadata-failed", "denied");
            return not_found_response();
        }
    };
    let size = meta.len();
    if size > MAX_FILE_SIZE {
        tracing::warn!(path = %norm_display, size, reason = "too-large", "denied");
        return too_large_response(&norm_display, size);
    }
    let modified = meta.modified().ok();

    tracing::debug!(path = %norm_display, branch, size, "resolved");

    let ext = canonical
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("");

    if ext.eq_ignore_ascii_case("md") {
        let Ok(content) = tokio::fs::read_to_string(&canonical).await else {
            return not_found_response();
        };

        if is_raw_mode(&query) {
            tracing::info!(path = %norm_display, mode = "raw", "request");
            return conditional_response(
                req.headers(),
                "text/plain; charset=utf-8",
                content.into_bytes(),
                modified,
            );
        }

        let page = render_markdown_page(&content, &canonical, &state.config.site_name);
        tracing::info!(path = %norm_display, mode = "rendered", "request");
        conditional_response(
            req.headers(),
            "text/html; charset=utf-8",
            page.into_bytes(),
            modified,
        )
    } else {
        let Ok(bytes) = tokio::fs::read(&canonical).await else {
            return not_found_response();
        };
        tracing::info!(path = %norm_display, mode = "asset", "request");
        conditional_response(req.headers(), mime_for_ext(ext), bytes, modified)
    }
}

/// Router for a site. Split from [`run_serve`] so it can be driven directly.
pub fn router(state: Arc<AppState>) -> Router {
    let analytics_route = if state.config.analytics.endpoint.starts_with('/') {
        state.config.analytics.endpoint.clone()
    } else {
        crate::config::DEFAULT_ANALYTICS_ENDPOINT.to_owned()
    };
    Router::new()
        .route("/initiative", get(initiative_handler))
        .route("/initiative.html", get(initiative_handler))
        .route(&analytics_route, post(analytics_handler))
        .fallback(serve_handler)
        .layer(CompressionLayer::new())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Server entry point
// ---------------------------------------------------------------------------

/// Serve the site rooted at `root`.
///
/// Binds to `bind_addr` starting at `start_port`, retrying on `EADDRINUSE` up
/// to 100 times. The server shuts down cleanly on SIGINT (Ctrl+C).
pub async fn run_serve(
    root: PathBuf,
    bind_addr: String,
    start_port: u16,
    config: SiteConfig,
) -> io::Result<()> {
    if !root.is_dir() {
        return Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("site root is not a directory: {}", root.display()),
        ));
    }
    let state = Arc::new(AppState::new(root, config));

    let (std_listener, bound_port) = bind_with_retry(&bind_addr, start_port)?;
    std_listener.set_nonblocking(true)?;
    let listener = tokio::net::TcpListener::from_std(std_listener)?;

    println!("sitekit serve");
    println!("root:  {}", state.canonical_root.display());
    println!("url:   http://{bind_addr}:{bound_port}/");

    let app = router(state);
    tracing::info!(addr = %bind_addr, port = bound_port, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to install SIGINT handler");
        // Without a handler the server runs until killed.
        std::future::pending::<()>().await;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
