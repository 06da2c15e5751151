//! Minimal HTTP surface: live annotated video plus the recent-events view.
//!
//! Routes (GET only):
//! - `/`              HTML page with the stream and recent events
//! - `/video_feed`    `multipart/x-mixed-replace` MJPEG stream
//! - `/events`        JSON list of recent events
//! - `/events/<file>` snapshot JPEG
//! - `/health`        liveness

use anyhow::{anyhow, Result};
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::RecvTimeoutError;

use crate::alert::{AlertEvent, SnapshotStore};
use crate::pipeline::{mjpeg_part, Broadcaster, MJPEG_CONTENT_TYPE};

const MAX_REQUEST_BYTES: usize = 8192;
const STREAM_POLL: Duration = Duration::from_millis(500);

#[derive(Clone, Debug)]
pub struct ApiConfig {
    pub addr: String,
    pub snapshot_dir: PathBuf,
    /// Events shown on `/` and returned by `/events`.
    pub recent_limit: usize,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:5000".to_string(),
            snapshot_dir: PathBuf::from("events"),
            recent_limit: 12,
        }
    }
}

#[derive(Debug)]
pub struct ApiHandle {
    pub addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl ApiHandle {
    /// Stop accepting connections. Open streams end at their next poll.
    pub fn stop(mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.join().map_err(|_| anyhow!("api server thread panicked"))?;
        }
        Ok(())
    }
}

pub struct ApiServer {
    cfg: ApiConfig,
    broadcaster: Broadcaster,
}

impl ApiServer {
    pub fn new(cfg: ApiConfig, broadcaster: Broadcaster) -> Self {
        Self { cfg, broadcaster }
    }

    pub fn spawn(self) -> Result<ApiHandle> {
        let configured_addr: SocketAddr = self.cfg.addr.parse()?;
        let listener = TcpListener::bind(configured_addr)?;
        let addr = listener.local_addr()?;
        if configured_addr.ip().is_loopback() && !addr.ip().is_loopback() {
            return Err(anyhow!(
                "api configured for loopback address '{}', but bound to non-loopback address '{}'",
                configured_addr,
                addr
            ));
        }
        listener.set_nonblocking(true)?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let ctx = Arc::new(ServerContext {
            store: SnapshotStore::new(self.cfg.snapshot_dir.clone(), 80),
            recent_limit: self.cfg.recent_limit,
            broadcaster: self.broadcaster,
            shutdown: shutdown.clone(),
        });
        let join = std::thread::Builder::new()
            .name("sentry-api".to_string())
            .spawn(move || {
                if let Err(err) = run_api(listener, ctx) {
                    log::error!("http api stopped: {}", err);
                }
            })?;

        Ok(ApiHandle {
            addr,
            shutdown,
            join: Some(join),
        })
    }
}

struct ServerContext {
    store: SnapshotStore,
    recent_limit: usize,
    broadcaster: Broadcaster,
    shutdown: Arc<AtomicBool>,
}

fn run_api(listener: TcpListener, ctx: Arc<ServerContext>) -> Result<()> {
    loop {
        if ctx.shutdown.load(Ordering::SeqCst) {
            break;
        }
        match listener.accept() {
            Ok((stream, _)) => {
                let ctx = ctx.clone();
                // Streams are long-lived, so each connection gets its own thread.
                std::thread::spawn(move || {
                    if let Err(err) = handle_connection(stream, &ctx) {
                        log::debug!("http request ended: {}", err);
                    }
                });
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(50));
                continue;
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

fn handle_connection(mut stream: TcpStream, ctx: &ServerContext) -> Result<()> {
    stream.set_nonblocking(false)?;
    let peer = stream.peer_addr()?;
    let local = stream.local_addr()?;
    if local.ip().is_loopback() && !peer.ip().is_loopback() {
        write_json_response(&mut stream, 403, r#"{"error":"forbidden"}"#)?;
        return Ok(());
    }

    let request = read_request(&mut stream)?;
    if request.method != "GET" {
        write_json_response(&mut stream, 405, r#"{"error":"method_not_allowed"}"#)?;
        return Ok(());
    }
    match request.path.as_str() {
        "/" => {
            let page = render_index(&ctx.store.recent_events(ctx.recent_limit));
            write_response(&mut stream, 200, "text/html; charset=utf-8", page.as_bytes())
        }
        "/video_feed" => stream_video(stream, ctx),
        "/events" => {
            let events = ctx.store.recent_events(ctx.recent_limit);
            let payload = serde_json::to_vec(&events)?;
            write_response(&mut stream, 200, "application/json", &payload)
        }
        "/health" => {
            let body = serde_json::json!({
                "status": "ok",
                "subscribers": ctx.broadcaster.subscriber_count(),
                "streaming": !ctx.broadcaster.is_closed(),
            });
            write_response(&mut stream, 200, "application/json", body.to_string().as_bytes())
        }
        path => match path.strip_prefix("/events/") {
            Some(name) => serve_snapshot(&mut stream, &ctx.store, name),
            None => write_json_response(&mut stream, 404, r#"{"error":"not_found"}"#),
        },
    }
}

fn serve_snapshot(stream: &mut TcpStream, store: &SnapshotStore, name: &str) -> Result<()> {
    let Some(path) = store.resolve(name) else {
        return write_json_response(stream, 404, r#"{"error":"not_found"}"#);
    };
    let bytes = std::fs::read(&path)?;
    write_response(stream, 200, "image/jpeg", &bytes)
}

fn stream_video(mut stream: TcpStream, ctx: &ServerContext) -> Result<()> {
    let subscription = ctx.broadcaster.subscribe();
    let header = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: {}\r\nCache-Control: no-store\r\nConnection: close\r\n\r\n",
        MJPEG_CONTENT_TYPE
    );
    stream.write_all(header.as_bytes())?;
    log::info!("viewer {} connected", subscription.id());
    loop {
        if ctx.shutdown.load(Ordering::SeqCst) {
            break;
        }
        match subscription.recv_timeout(STREAM_POLL) {
            Ok(frame) => {
                if let Err(err) = stream.write_all(&mjpeg_part(&frame)) {
                    log::info!("viewer {} disconnected: {}", subscription.id(), err);
                    break;
                }
            }
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    Ok(())
}

fn render_index(events: &[AlertEvent]) -> String {
    let mut rows = String::new();
    for event in events {
        let name = event.snapshot.as_deref().unwrap_or_default();
        rows.push_str(&format!(
            "<li><a href=\"/events/{file}\">{label}</a> <span>{time}</span></li>\n",
            file = html_escape(name),
            label = html_escape(&event.label),
            time = event.display_time(),
        ));
    }
    if rows.is_empty() {
        rows.push_str("<li>No events yet.</li>\n");
    }
    format!(
        "<!doctype html>\n<html><head><title>Scene Sentry</title></head><body>\n\
         <h1>Live</h1>\n<img src=\"/video_feed\" alt=\"live stream\">\n\
         <h2>Recent events</h2>\n<ul>\n{}</ul>\n</body></html>\n",
        rows
    )
}

fn html_escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

fn read_request(stream: &mut TcpStream) -> Result<HttpRequest> {
    stream.set_read_timeout(Some(Duration::from_secs(2)))?;
    let mut buf = [0u8; 1024];
    let mut data = Vec::new();
    loop {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            break;
        }
        data.extend_from_slice(&buf[..n]);
        if data.len() > MAX_REQUEST_BYTES {
            return Err(anyhow!("request too large"));
        }
        if data.windows(4).any(|w| w == b"\r\n\r\n") {
            break;
        }
    }
    let text = String::from_utf8_lossy(&data);
    let mut lines = text.split("\r\n");
    let request_line = lines.next().ok_or_else(|| anyhow!("empty request"))?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().ok_or_else(|| anyhow!("missing method"))?;
    let raw_path = parts.next().ok_or_else(|| anyhow!("missing path"))?;
    let path = raw_path.split('?').next().unwrap_or(raw_path).to_string();
    Ok(HttpRequest {
        method: method.to_string(),
        path,
    })
}

fn write_json_response(stream: &mut TcpStream, status: u16, body: &str) -> Result<()> {
    write_response(stream, status, "application/json", body.as_bytes())
}

fn write_response(
    stream: &mut TcpStream,
    status: u16,
    content_type: &str,
    body: &[u8],
) -> Result<()> {
    let status_line = match status {
        200 => "HTTP/1.1 200 OK",
        403 => "HTTP/1.1 403 Forbidden",
        404 => "HTTP/1.1 404 Not Found",
        405 => "HTTP/1.1 405 Method Not Allowed",
        _ => "HTTP/1.1 500 Internal Server Error",
    };
    let header = format!(
        "{status_line}\r\nContent-Type: {content_type}\r\nContent-Length: {len}\r\nCache-Control: no-store\r\nConnection: close\r\n\r\n",
        status_line = status_line,
        content_type = content_type,
        len = body.len()
    );
    stream.write_all(header.as_bytes())?;
    stream.write_all(body)?;
    Ok(())
}

#[derive(Debug)]
struct HttpRequest {
    method: String,
    path: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_markup() {
        assert_eq!(html_escape("<a href=\"x\">&'"), "&lt;a href=&quot;x&quot;&gt;&amp;&#39;");
    }

    #[test]
    fn index_lists_events() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(tmp.path(), 80);
        store
            .save("VIOLENCE_20240309-070503.jpg", &image::RgbImage::new(4, 4))
            .unwrap();
        let page = render_index(&store.recent_events(12));
        assert!(page.contains("/events/VIOLENCE_20240309-070503.jpg"));
        assert!(page.contains(">VIOLENCE<"));
        assert!(render_index(&[]).contains("No events yet."));
    }
}
