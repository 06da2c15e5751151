use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use crossbeam_channel::RecvTimeoutError;
use serde_json::Value;

use scene_sentry::api::{ApiConfig, ApiServer};
use scene_sentry::detect::NullBackend;
use scene_sentry::ingest::{SourceStats, SyntheticSource};
use scene_sentry::pipeline::PipelineConfig;
use scene_sentry::{
    build_analyzer, Frame, FrameSource, LogChannel, Pipeline, PipelineHandle, SentryConfig,
    SnapshotStore,
};

const TIMEOUT: Duration = Duration::from_secs(5);

fn start_pipeline(snapshot_dir: &Path) -> Result<PipelineHandle> {
    let mut cfg = SentryConfig::default();
    cfg.alerts.snapshot_dir = snapshot_dir.to_path_buf();
    let analyzer = build_analyzer(&cfg, Box::new(NullBackend::new()), Arc::new(LogChannel));
    let source = SyntheticSource::new("stub://test", 30).with_size(64, 48);
    Pipeline::spawn(source, analyzer, PipelineConfig::default())
}

fn request(addr: SocketAddr, raw: &str) -> Result<(String, Vec<u8>)> {
    let mut stream = TcpStream::connect(addr)?;
    stream.set_read_timeout(Some(TIMEOUT))?;
    stream.write_all(raw.as_bytes())?;
    let mut response = Vec::new();
    stream.read_to_end(&mut response)?;
    let split = response
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .ok_or_else(|| anyhow!("no header terminator"))?;
    let head = String::from_utf8_lossy(&response[..split]).to_string();
    Ok((head, response[split + 4..].to_vec()))
}

fn get(addr: SocketAddr, path: &str) -> Result<(String, Vec<u8>)> {
    request(addr, &format!("GET {} HTTP/1.1\r\nHost: localhost\r\n\r\n", path))
}

#[test]
fn viewer_receives_frames_until_stop() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let pipeline = start_pipeline(tmp.path())?;
    let viewer = pipeline.subscribe();

    let first = viewer.recv_timeout(TIMEOUT)?;
    assert!(first.jpeg.starts_with(&[0xFF, 0xD8]));
    let second = viewer.recv_timeout(TIMEOUT)?;
    assert!(second.seq > first.seq);
    assert!(pipeline.is_running());
    assert_eq!(pipeline.stats().subscribers, 1);

    pipeline.stop()?;
    let deadline = Instant::now() + TIMEOUT;
    while viewer.recv().is_some() {
        assert!(Instant::now() < deadline, "stream did not end after stop");
    }
    Ok(())
}

/// Camera that stalls for a long time on every read and then fails.
struct StalledSource {
    stall: Duration,
}

impl FrameSource for StalledSource {
    fn connect(&mut self) -> Result<()> {
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Frame> {
        std::thread::sleep(self.stall);
        Err(anyhow!("camera stalled"))
    }

    fn is_healthy(&self) -> bool {
        false
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            source: "stalled".to_string(),
            ..SourceStats::default()
        }
    }
}

#[test]
fn stop_disconnects_viewers_while_read_is_blocked() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let mut cfg = SentryConfig::default();
    cfg.alerts.snapshot_dir = tmp.path().to_path_buf();
    let analyzer = build_analyzer(&cfg, Box::new(NullBackend::new()), Arc::new(LogChannel));
    let source = StalledSource {
        stall: Duration::from_secs(3),
    };
    let pipeline = Pipeline::spawn(source, analyzer, PipelineConfig::default())?;
    let viewer = pipeline.subscribe();

    let stopper = std::thread::spawn(move || pipeline.stop());
    let started = Instant::now();
    match viewer.recv_timeout(Duration::from_secs(1)) {
        Err(RecvTimeoutError::Disconnected) => {}
        other => panic!("viewer not released while the source blocked: {:?}", other.map(|f| f.seq)),
    }
    assert!(started.elapsed() < Duration::from_secs(1));

    stopper
        .join()
        .map_err(|_| anyhow!("stop thread panicked"))??;
    Ok(())
}

#[test]
fn two_viewers_see_identical_frames() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let pipeline = start_pipeline(tmp.path())?;
    let a = pipeline.subscribe();
    let b = pipeline.subscribe();

    let fa = a.recv_timeout(TIMEOUT)?;
    let fb = loop {
        let frame = b.recv_timeout(TIMEOUT)?;
        if frame.seq >= fa.seq {
            break frame;
        }
    };
    if fb.seq == fa.seq {
        assert_eq!(fa.jpeg, fb.jpeg);
    }
    pipeline.stop()?;
    Ok(())
}

#[test]
fn http_surface_serves_stream_and_events() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let store = SnapshotStore::new(tmp.path(), 80);
    store.save("VIOLENCE_20240309-070503.jpg", &image::RgbImage::new(8, 8))?;

    let pipeline = start_pipeline(tmp.path())?;
    let api = ApiServer::new(
        ApiConfig {
            addr: "127.0.0.1:0".to_string(),
            snapshot_dir: tmp.path().to_path_buf(),
            ..ApiConfig::default()
        },
        pipeline.broadcaster(),
    )
    .spawn()?;

    // Live stream: header plus at least one complete part.
    let mut stream = TcpStream::connect(api.addr)?;
    stream.set_read_timeout(Some(TIMEOUT))?;
    stream.write_all(b"GET /video_feed HTTP/1.1\r\nHost: localhost\r\n\r\n")?;
    let mut received = Vec::new();
    let mut buf = [0u8; 4096];
    let deadline = Instant::now() + TIMEOUT;
    loop {
        let n = stream.read(&mut buf)?;
        assert!(n > 0, "stream closed early");
        received.extend_from_slice(&buf[..n]);
        let text = String::from_utf8_lossy(&received);
        if text.contains("--frame\r\nContent-Type: image/jpeg\r\n\r\n")
            && received.windows(2).any(|w| w == [0xFF, 0xD9])
        {
            break;
        }
        assert!(Instant::now() < deadline, "no frame on /video_feed");
    }
    let text = String::from_utf8_lossy(&received);
    assert!(text.starts_with("HTTP/1.1 200 OK"));
    assert!(text.contains("multipart/x-mixed-replace; boundary=frame"));
    drop(stream);

    let (head, body) = get(api.addr, "/events")?;
    assert!(head.starts_with("HTTP/1.1 200"));
    let events: Value = serde_json::from_slice(&body)?;
    let events = events.as_array().expect("array");
    assert_eq!(events.len(), 1);
    assert_eq!(events[0]["label"], "VIOLENCE");
    assert_eq!(events[0]["snapshot"], "VIOLENCE_20240309-070503.jpg");

    let (head, body) = get(api.addr, "/events/VIOLENCE_20240309-070503.jpg")?;
    assert!(head.contains("image/jpeg"));
    assert!(body.starts_with(&[0xFF, 0xD8]));

    let (head, _) = get(api.addr, "/events/..%2Fsecret.jpg")?;
    assert!(head.starts_with("HTTP/1.1 404"));
    let (head, _) = get(api.addr, "/events/../Cargo.toml")?;
    assert!(head.starts_with("HTTP/1.1 404"));

    let (head, body) = get(api.addr, "/")?;
    assert!(head.contains("text/html"));
    assert!(String::from_utf8_lossy(&body).contains("/video_feed"));

    let (head, body) = get(api.addr, "/health")?;
    assert!(head.starts_with("HTTP/1.1 200"));
    let health: Value = serde_json::from_slice(&body)?;
    assert_eq!(health["status"], "ok");

    let (head, _) = request(api.addr, "POST /events HTTP/1.1\r\nHost: localhost\r\n\r\n")?;
    assert!(head.starts_with("HTTP/1.1 405"));

    api.stop()?;
    pipeline.stop()?;
    Ok(())
}
