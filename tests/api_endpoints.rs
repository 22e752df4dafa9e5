use anyhow::Result;
use serde_json::Value;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::tempdir;

use truck_counter::api::{ApiHandle, ApiServer};
use truck_counter::config::{
    BackendKind, HistoryBackend, HistorySettings, ModelSettings, ServerConfig,
};
use truck_counter::{ClassFilter, DetectorBackend, ScriptedBackend, TruckDetector};

const BOUNDARY: &str = "----truckcounterboundary";

struct TestApi {
    dir: tempfile::TempDir,
    calls: Arc<AtomicUsize>,
    api_handle: Option<ApiHandle>,
}

impl TestApi {
    /// Server whose detector returns `counts[i]` trucks on call `i`.
    fn new(counts: &[usize]) -> Result<Self> {
        let backend = ScriptedBackend::with_counts(counts);
        let calls = backend.calls();
        let backend: Box<dyn DetectorBackend> = Box::new(backend);
        Self::with_backend(Some(backend), calls)
    }

    fn without_model() -> Result<Self> {
        Self::with_backend(None, Arc::new(AtomicUsize::new(0)))
    }

    /// Scripted backends run under a scripted model config; `None` under the
    /// default tract config with no model file.
    fn with_backend(
        backend: Option<Box<dyn DetectorBackend>>,
        calls: Arc<AtomicUsize>,
    ) -> Result<Self> {
        let dir = tempdir()?;
        let upload_dir = dir.path().join("uploads");
        let model = ModelSettings {
            backend: if backend.is_some() {
                BackendKind::Scripted
            } else {
                BackendKind::Tract
            },
            ..ModelSettings::default()
        };
        let config = ServerConfig {
            api_addr: "127.0.0.1:0".to_string(),
            report_path: upload_dir.join("report.xlsx"),
            upload_dir,
            history: HistorySettings {
                backend: HistoryBackend::Json,
                path: dir.path().join("history.json"),
            },
            model,
            ..ServerConfig::default()
        };
        let detector = TruckDetector::new(
            backend,
            ClassFilter::trucks(),
            ModelSettings::default().confidence,
        );
        let api_handle = ApiServer::new(config, detector).spawn()?;

        Ok(Self {
            dir,
            calls,
            api_handle: Some(api_handle),
        })
    }

    fn addr(&self) -> SocketAddr {
        self.api_handle
            .as_ref()
            .expect("test API handle should be initialized")
            .addr
    }

    fn upload_dir(&self) -> PathBuf {
        self.dir.path().join("uploads")
    }

    fn send(&self, request: &[u8]) -> Result<(String, Vec<u8>)> {
        let mut stream = TcpStream::connect(self.addr())?;
        stream.write_all(request)?;
        let mut response = Vec::new();
        stream.read_to_end(&mut response)?;
        let split = response
            .windows(4)
            .position(|w| w == b"\r\n\r\n")
            .unwrap_or(response.len());
        let headers = String::from_utf8_lossy(&response[..split]).to_string();
        let body = response.get(split + 4..).unwrap_or_default().to_vec();
        Ok((headers, body))
    }

    fn get(&self, path: &str) -> Result<(String, Vec<u8>)> {
        self.send(format!("GET {path} HTTP/1.1\r\nHost: localhost\r\n\r\n").as_bytes())
    }

    fn post(&self, path: &str, content_type: &str, body: &[u8]) -> Result<(String, Vec<u8>)> {
        let mut request = format!(
            "POST {path} HTTP/1.1\r\nHost: localhost\r\n\
             Content-Type: {content_type}\r\nContent-Length: {}\r\n\r\n",
            body.len()
        )
        .into_bytes();
        request.extend_from_slice(body);
        self.send(&request)
    }

    fn upload(&self, filename: &str, data: &[u8]) -> Result<(String, Vec<u8>)> {
        let mut body = format!(
            "--{BOUNDARY}\r\n\
             Content-Disposition: form-data; name=\"file\"; filename=\"{filename}\"\r\n\
             Content-Type: application/octet-stream\r\n\r\n"
        )
        .into_bytes();
        body.extend_from_slice(data);
        body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
        self.post(
            "/upload",
            &format!("multipart/form-data; boundary={BOUNDARY}"),
            &body,
        )
    }

    fn history(&self) -> Result<Vec<Value>> {
        let (headers, body) = self.get("/history")?;
        assert!(headers.contains("200 OK"));
        let value: Value = serde_json::from_slice(&body)?;
        Ok(value.as_array().cloned().unwrap_or_default())
    }
}

impl Drop for TestApi {
    fn drop(&mut self) {
        if let Some(handle) = self.api_handle.take() {
            handle.stop().expect("failed to stop API server");
        }
    }
}

fn jpeg_bytes() -> Result<Vec<u8>> {
    let img = image::RgbImage::from_pixel(64, 48, image::Rgb([90, 90, 90]));
    let mut out = std::io::Cursor::new(Vec::new());
    image::DynamicImage::ImageRgb8(img).write_to(&mut out, image::ImageFormat::Jpeg)?;
    Ok(out.into_inner())
}

fn json(body: &[u8]) -> Result<Value> {
    Ok(serde_json::from_slice(body)?)
}

#[test]
fn upload_counts_trucks_and_records_history() -> Result<()> {
    let api = TestApi::new(&[3])?;

    let (headers, body) = api.upload("truck_photo.jpg", &jpeg_bytes()?)?;
    assert!(headers.contains("200 OK"));
    let value = json(&body)?;
    assert_eq!(value["count"], 3);
    assert_eq!(value["output_path"], "static/uploads/result_truck_photo.jpg");
    assert_eq!(value["status"], "ok");
    assert_eq!(value["history"]["filename"], "truck_photo.jpg");
    assert_eq!(value["history"]["truck_count"], 3);

    assert!(api.upload_dir().join("truck_photo.jpg").exists());
    assert!(api.upload_dir().join("result_truck_photo.jpg").exists());

    let history = api.history()?;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0], value["history"]);

    let (headers, body) = api.get("/static/uploads/result_truck_photo.jpg")?;
    assert!(headers.contains("200 OK"));
    assert!(headers.contains("Content-Type: image/jpeg"));
    assert!(!body.is_empty());
    Ok(())
}

#[test]
fn upload_without_detections_writes_no_artifact() -> Result<()> {
    let api = TestApi::new(&[0])?;

    let (_, body) = api.upload("empty_yard.png", &jpeg_bytes()?)?;
    let value = json(&body)?;
    assert_eq!(value["count"], 0);
    assert_eq!(value["output_path"], "");
    assert_eq!(value["status"], "ok");
    assert!(!api.upload_dir().join("result_empty_yard.png").exists());
    assert_eq!(api.history()?.len(), 1);
    Ok(())
}

#[test]
fn upload_rejects_unsupported_type_without_processing() -> Result<()> {
    let api = TestApi::new(&[3])?;

    let (headers, body) = api.upload("virus.exe", b"MZ\x90\x00")?;
    assert!(headers.contains("400 Bad Request"));
    assert_eq!(json(&body)?["error"], "unsupported file type");
    assert_eq!(api.calls.load(Ordering::SeqCst), 0);
    assert!(api.history()?.is_empty());
    assert!(!api.upload_dir().join("virus.exe").exists());
    Ok(())
}

#[test]
fn upload_requires_a_named_file() -> Result<()> {
    let api = TestApi::new(&[1])?;

    let (headers, body) = api.upload("", b"data")?;
    assert!(headers.contains("400 Bad Request"));
    assert_eq!(json(&body)?["error"], "no file selected");

    let form = b"rtsp_url=rtsp%3A%2F%2Fcam";
    let (headers, body) = api.post("/upload", "application/x-www-form-urlencoded", form)?;
    assert!(headers.contains("400 Bad Request"));
    assert_eq!(json(&body)?["error"], "no file uploaded");

    assert!(api.history()?.is_empty());
    Ok(())
}

#[test]
fn undecodable_upload_reports_decode_failure() -> Result<()> {
    let api = TestApi::new(&[2])?;

    let (headers, body) = api.upload("broken.jpg", b"not really a jpeg")?;
    assert!(headers.contains("200 OK"));
    let value = json(&body)?;
    assert_eq!(value["count"], 0);
    assert_eq!(value["status"], "decode_failed");
    assert_eq!(api.calls.load(Ordering::SeqCst), 0);
    assert_eq!(api.history()?.len(), 1);
    Ok(())
}

#[test]
fn video_upload_goes_through_the_video_processor() -> Result<()> {
    let api = TestApi::new(&[4])?;

    let (headers, body) = api.upload("clip.mp4", b"\x00\x00\x00\x18ftypmp42 not a real clip")?;
    assert!(headers.contains("200 OK"));
    let value = json(&body)?;
    assert_eq!(value["count"], 0);
    assert_eq!(value["status"], "source_unavailable");
    assert_eq!(value["output_path"], "");
    assert_eq!(api.calls.load(Ordering::SeqCst), 0);
    assert!(api.upload_dir().join("clip.mp4").exists());

    let history = api.history()?;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0]["filename"], "clip.mp4");
    assert_eq!(history[0]["truck_count"], 0);
    assert_eq!(history[0]["output_path"], "");
    Ok(())
}

#[test]
fn quoted_semicolon_in_filename_is_kept() -> Result<()> {
    let api = TestApi::new(&[1])?;

    let (headers, body) = api.upload("yard;cam.jpg", &jpeg_bytes()?)?;
    assert!(headers.contains("200 OK"));
    let value = json(&body)?;
    assert_eq!(value["count"], 1);
    assert_eq!(value["history"]["filename"], "yardcam.jpg");
    assert!(api.upload_dir().join("yardcam.jpg").exists());
    Ok(())
}

#[test]
fn malformed_multipart_is_a_bad_request() -> Result<()> {
    let api = TestApi::new(&[1])?;

    let (headers, body) = api.post("/upload", "multipart/form-data", b"--x\r\n")?;
    assert!(headers.contains("400 Bad Request"));
    assert_eq!(json(&body)?["error"], "malformed multipart body");

    let unterminated = b"--b\r\nContent-Disposition: form-data; name=\"file\"; \
filename=\"a.jpg\"\r\n\r\nabc";
    let (headers, body) = api.post("/upload", "multipart/form-data; boundary=b", unterminated)?;
    assert!(headers.contains("400 Bad Request"));
    assert_eq!(json(&body)?["error"], "malformed multipart body");

    let (headers, body) = api.post("/process_rtsp", "multipart/form-data", b"")?;
    assert!(headers.contains("400 Bad Request"));
    assert_eq!(json(&body)?["error"], "malformed form body");

    assert_eq!(api.calls.load(Ordering::SeqCst), 0);
    assert!(api.history()?.is_empty());
    Ok(())
}

#[test]
fn missing_model_yields_zero_with_status() -> Result<()> {
    let api = TestApi::without_model()?;

    let (_, body) = api.get("/health")?;
    let health = json(&body)?;
    assert_eq!(health["status"], "ok");
    assert_eq!(health["model_loaded"], false);

    let (headers, body) = api.upload("truck_photo.jpg", &jpeg_bytes()?)?;
    assert!(headers.contains("200 OK"));
    let value = json(&body)?;
    assert_eq!(value["count"], 0);
    assert_eq!(value["status"], "model_unavailable");
    Ok(())
}

#[test]
fn rtsp_snapshot_is_recorded_as_stream() -> Result<()> {
    let api = TestApi::new(&[2])?;

    let form = b"rtsp_url=stub%3A%2F%2Fgate%3Fwidth%3D64%26height%3D48";
    let (headers, body) = api.post("/process_rtsp", "application/x-www-form-urlencoded", form)?;
    assert!(headers.contains("200 OK"));
    let value = json(&body)?;
    assert_eq!(value["count"], 2);
    assert_eq!(value["status"], "ok");
    let output_path = value["output_path"].as_str().unwrap_or_default();
    assert!(output_path.starts_with("static/uploads/rtsp_frame_"));
    assert!(output_path.ends_with(".jpg"));

    let history = api.history()?;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0]["filename"], "RTSP_STREAM");
    Ok(())
}

#[test]
fn unreachable_rtsp_stream_still_records_history() -> Result<()> {
    let api = TestApi::new(&[2])?;

    let form = b"rtsp_url=stub%3A%2F%2Fgate%3Funreachable%3D1";
    let (_, body) = api.post("/process_rtsp", "application/x-www-form-urlencoded", form)?;
    let value = json(&body)?;
    assert_eq!(value["count"], 0);
    assert_eq!(value["status"], "source_unavailable");
    assert_eq!(value["output_path"], "");
    assert_eq!(api.history()?.len(), 1);
    Ok(())
}

#[test]
fn oversized_stub_stream_does_not_take_down_the_server() -> Result<()> {
    let api = TestApi::new(&[1])?;

    let form = b"rtsp_url=stub%3A%2F%2Fx%3Fwidth%3D70000%26height%3D70000";
    let (headers, body) = api.post("/process_rtsp", "application/x-www-form-urlencoded", form)?;
    assert!(headers.contains("200 OK"));
    let value = json(&body)?;
    assert_eq!(value["count"], 0);
    assert_eq!(value["status"], "source_unavailable");
    assert_eq!(api.calls.load(Ordering::SeqCst), 0);

    let (headers, body) = api.get("/health")?;
    assert!(headers.contains("200 OK"));
    assert_eq!(json(&body)?["status"], "ok");
    assert_eq!(api.history()?.len(), 1);
    Ok(())
}

#[test]
fn stub_streams_are_refused_without_scripted_model() -> Result<()> {
    let api = TestApi::without_model()?;

    let form = b"rtsp_url=stub%3A%2F%2Fx%3Fwidth%3D70000%26height%3D70000";
    let (headers, body) = api.post("/process_rtsp", "application/x-www-form-urlencoded", form)?;
    assert!(headers.contains("400 Bad Request"));
    assert_eq!(json(&body)?["error"], "unsupported stream url");
    assert!(api.history()?.is_empty());

    let (headers, _) = api.get("/health")?;
    assert!(headers.contains("200 OK"));
    Ok(())
}

#[test]
fn report_requires_history() -> Result<()> {
    let api = TestApi::new(&[1])?;

    let (headers, body) = api.get("/download_report")?;
    assert!(headers.contains("400 Bad Request"));
    assert_eq!(json(&body)?["error"], "report not available");

    api.upload("truck_photo.jpg", &jpeg_bytes()?)?;
    let (headers, body) = api.get("/download_report")?;
    assert!(headers.contains("200 OK"));
    assert!(headers.contains(
        "Content-Type: application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"
    ));
    assert!(headers.contains("Content-Disposition: attachment; filename=\"report.xlsx\""));
    assert_eq!(&body[..2], b"PK");
    assert!(api.upload_dir().join("report.xlsx").exists());
    Ok(())
}

#[test]
fn serves_landing_page_and_script() -> Result<()> {
    let api = TestApi::new(&[])?;

    let (headers, body) = api.get("/")?;
    assert!(headers.contains("200 OK"));
    assert!(headers.contains("text/html"));
    assert!(String::from_utf8_lossy(&body).contains("upload-form"));

    let (headers, _) = api.get("/static/js/script.js")?;
    assert!(headers.contains("200 OK"));
    assert!(headers.contains("application/javascript"));
    Ok(())
}

#[test]
fn unknown_routes_and_methods_are_rejected() -> Result<()> {
    let api = TestApi::new(&[])?;

    let (headers, body) = api.get("/events")?;
    assert!(headers.contains("404 Not Found"));
    assert_eq!(json(&body)?["error"], "not_found");

    let (headers, _) = api.get("/upload")?;
    assert!(headers.contains("405 Method Not Allowed"));

    let (headers, _) = api.post("/history", "text/plain", b"")?;
    assert!(headers.contains("405 Method Not Allowed"));

    let (headers, _) = api.get("/static/uploads/../history.json")?;
    assert!(headers.contains("404 Not Found"));

    let (headers, _) = api.get("/static/uploads/missing.jpg")?;
    assert!(headers.contains("404 Not Found"));
    Ok(())
}
