//! Purpose: End-to-end tests for the sync relay HTTP server.
//! Exports: None (integration test module).
//! Role: Validate the read/write/recover contract and error mapping over TCP.
//! Invariants: Uses loopback-only server with a temp records directory.
//! Invariants: Bounded waits avoid test flakiness.
//! Invariants: Server processes are cleaned up on drop.

use serde_json::{Value, json};
use std::io::Read;
use std::net::{SocketAddr, TcpListener};
use std::process::{Child, Command, Stdio};
use std::sync::{Mutex, MutexGuard};
use std::thread::sleep;
use std::time::{Duration, Instant};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

type TestResult<T> = Result<T, Box<dyn std::error::Error>>;

static SERVER_LOCK: Mutex<()> = Mutex::new(());

struct TestServer {
    child: Child,
    base_url: String,
    _server_guard: MutexGuard<'static, ()>,
}

impl TestServer {
    fn start(records_parent: &std::path::Path) -> TestResult<Self> {
        let guard = SERVER_LOCK
            .lock()
            .unwrap_or_else(|poison| poison.into_inner());
        let mut last_err: Option<Box<dyn std::error::Error>> = None;
        for _attempt in 0..3 {
            let port = pick_port()?;
            let bind = format!("127.0.0.1:{port}");
            let base_url = format!("http://{bind}");

            let mut child = Command::new(env!("CARGO_BIN_EXE_synclite"))
                .arg("--dir")
                .arg(records_parent)
                .arg("serve")
                .arg("--bind")
                .arg(&bind)
                .stdout(Stdio::null())
                .stderr(Stdio::piped())
                .spawn()?;

            match wait_for_server(&mut child, bind.parse()?) {
                Ok(()) => {
                    return Ok(Self {
                        child,
                        base_url,
                        _server_guard: guard,
                    });
                }
                Err(err) => {
                    let _ = child.kill();
                    let _ = child.wait();
                    last_err = Some(err);
                    sleep(Duration::from_millis(30));
                }
            }
        }

        Err(last_err.unwrap_or_else(|| "server failed to start".into()))
    }

    fn url(&self, path_and_query: &str) -> String {
        format!("{}{path_and_query}", self.base_url)
    }

    fn put_document(&self, key: &str, document: &Value) -> Result<ureq::Response, ureq::Error> {
        ureq::put(&self.url(&format!("/sync?key={key}")))
            .set("Content-Type", "application/json")
            .send_string(&document.to_string())
    }

    fn get_current(&self, key: &str) -> Result<ureq::Response, ureq::Error> {
        ureq::get(&self.url(&format!("/sync?key={key}"))).call()
    }

    fn get_previous(&self, key: &str) -> Result<ureq::Response, ureq::Error> {
        ureq::get(&self.url(&format!("/sync/previous?key={key}"))).call()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

fn pick_port() -> TestResult<u16> {
    let listener = TcpListener::bind("127.0.0.1:0")?;
    let port = listener.local_addr()?.port();
    drop(listener);
    Ok(port)
}

fn wait_for_server(child: &mut Child, addr: SocketAddr) -> TestResult<()> {
    // Preflights need no key and answer 204 on any path, so they double as a
    // readiness probe.
    let url = format!("http://{addr}/sync");
    let start = Instant::now();
    loop {
        if let Ok(resp) = ureq::request("OPTIONS", &url).call() {
            if resp.status() == 204 {
                return Ok(());
            }
        }
        if let Some(status) = child.try_wait()? {
            let mut stderr = String::new();
            if let Some(mut pipe) = child.stderr.take() {
                let _ = pipe.read_to_string(&mut stderr);
            }
            let detail = stderr.trim();
            return Err(format!(
                "server exited before ready (status: {status}, stderr: {})",
                if detail.is_empty() { "<empty>" } else { detail }
            )
            .into());
        }
        if start.elapsed() > Duration::from_secs(8) {
            return Err("server did not start in time".into());
        }
        sleep(Duration::from_millis(20));
    }
}

fn body_json(response: ureq::Response) -> TestResult<Value> {
    let text = response.into_string()?;
    Ok(serde_json::from_str(&text)?)
}

fn error_status(result: Result<ureq::Response, ureq::Error>) -> TestResult<(u16, Value)> {
    match result {
        Ok(response) => Err(format!("expected error, got status {}", response.status()).into()),
        Err(ureq::Error::Status(code, response)) => Ok((code, body_json(response)?)),
        Err(err) => Err(err.into()),
    }
}

fn parse_timestamp(value: &Value) -> TestResult<OffsetDateTime> {
    let text = value.as_str().ok_or("serverUpdatedAt is not a string")?;
    Ok(OffsetDateTime::parse(text, &Rfc3339)?)
}

#[test]
fn put_then_get_round_trips() -> TestResult<()> {
    let temp_dir = tempfile::tempdir()?;
    let server = TestServer::start(temp_dir.path())?;
    let document = json!({"version": 1, "history": []});

    let put = body_json(server.put_document("supersecret1", &document)?)?;
    assert_eq!(put["ok"], json!(true));
    let written_at = parse_timestamp(&put["serverUpdatedAt"])?;

    let fetched = body_json(server.get_current("supersecret1")?)?;
    assert_eq!(fetched["exists"], json!(true));
    assert_eq!(fetched["data"], document);
    assert_eq!(parse_timestamp(&fetched["serverUpdatedAt"])?, written_at);
    Ok(())
}

#[test]
fn timestamps_are_monotonic_across_writes() -> TestResult<()> {
    let temp_dir = tempfile::tempdir()?;
    let server = TestServer::start(temp_dir.path())?;

    let mut last = None;
    for version in 1..=3 {
        let document = json!({"version": version, "history": []});
        let put = body_json(server.put_document("supersecret1", &document)?)?;
        let stamp = parse_timestamp(&put["serverUpdatedAt"])?;
        if let Some(previous) = last {
            assert!(stamp >= previous, "timestamps went backwards");
        }
        last = Some(stamp);
    }
    Ok(())
}

#[test]
fn previous_slot_holds_the_write_before_last() -> TestResult<()> {
    let temp_dir = tempfile::tempdir()?;
    let server = TestServer::start(temp_dir.path())?;
    let first = json!({"version": 1, "history": []});
    let second = json!({"version": 2, "history": [{"op": "set"}]});

    server.put_document("supersecret1", &first)?;
    server.put_document("supersecret1", &second)?;

    let current = body_json(server.get_current("supersecret1")?)?;
    assert_eq!(current["data"], second);

    let previous = body_json(server.get_previous("supersecret1")?)?;
    assert_eq!(previous["exists"], json!(true));
    assert_eq!(previous["data"], first);
    Ok(())
}

#[test]
fn unknown_key_reads_as_absent() -> TestResult<()> {
    let temp_dir = tempfile::tempdir()?;
    let server = TestServer::start(temp_dir.path())?;

    let current = body_json(server.get_current("supersecret1")?)?;
    assert_eq!(current, json!({"exists": false}));
    let previous = body_json(server.get_previous("supersecret1")?)?;
    assert_eq!(previous, json!({"exists": false}));
    Ok(())
}

#[test]
fn short_key_is_rejected_on_every_route() -> TestResult<()> {
    let temp_dir = tempfile::tempdir()?;
    let server = TestServer::start(temp_dir.path())?;

    let (status, body) = error_status(server.get_current("short"))?;
    assert_eq!(status, 400);
    assert!(body["error"].as_str().unwrap_or_default().contains("8"));

    let (status, _) = error_status(server.get_previous("short"))?;
    assert_eq!(status, 400);

    let (status, _) =
        error_status(server.put_document("short", &json!({"version": 1, "history": []})))?;
    assert_eq!(status, 400);

    // Unrouted paths and methods still validate the key first.
    let (status, _) = error_status(ureq::get(&server.url("/elsewhere?key=short")).call())?;
    assert_eq!(status, 400);
    let (status, _) = error_status(ureq::get(&server.url("/sync")).call())?;
    assert_eq!(status, 400);
    Ok(())
}

#[test]
fn incomplete_document_is_rejected_and_state_is_unchanged() -> TestResult<()> {
    let temp_dir = tempfile::tempdir()?;
    let server = TestServer::start(temp_dir.path())?;
    let original = json!({"version": 1, "history": []});
    server.put_document("supersecret1", &original)?;

    for bad in [
        json!({"version": 2}),
        json!({"history": []}),
        json!({"version": "", "history": []}),
        json!([1, 2, 3]),
    ] {
        let (status, body) = error_status(server.put_document("supersecret1", &bad))?;
        assert_eq!(status, 400);
        assert!(body["error"].is_string());
    }

    let (status, _) = error_status(
        ureq::put(&server.url("/sync?key=supersecret1"))
            .set("Content-Type", "application/json")
            .send_string("{not json"),
    )?;
    assert_eq!(status, 400);

    let fetched = body_json(server.get_current("supersecret1")?)?;
    assert_eq!(fetched["data"], original);
    let previous = body_json(server.get_previous("supersecret1")?)?;
    assert_eq!(previous, json!({"exists": false}));
    Ok(())
}

#[test]
fn oversized_document_is_rejected_with_413() -> TestResult<()> {
    let temp_dir = tempfile::tempdir()?;
    let server = TestServer::start(temp_dir.path())?;
    let original = json!({"version": 1, "history": []});
    server.put_document("supersecret1", &original)?;

    let padding = "x".repeat(5 * 1024 * 1024);
    let oversized = json!({"version": 2, "history": [], "blob": padding});
    let (status, _) = error_status(server.put_document("supersecret1", &oversized))?;
    assert_eq!(status, 413);

    let fetched = body_json(server.get_current("supersecret1")?)?;
    assert_eq!(fetched["data"], original);
    Ok(())
}

#[test]
fn preflight_answers_204_with_cors_headers_anywhere() -> TestResult<()> {
    let temp_dir = tempfile::tempdir()?;
    let server = TestServer::start(temp_dir.path())?;

    for path in ["/sync", "/sync/previous", "/anywhere/else"] {
        let response = ureq::request("OPTIONS", &server.url(path)).call()?;
        assert_eq!(response.status(), 204);
        assert_eq!(response.header("access-control-allow-origin"), Some("*"));
        assert_eq!(
            response.header("access-control-allow-methods"),
            Some("GET, PUT, OPTIONS")
        );
        assert_eq!(
            response.header("access-control-allow-headers"),
            Some("Content-Type")
        );
        assert_eq!(response.into_string()?, "");
    }
    Ok(())
}

#[test]
fn every_response_carries_cors_headers() -> TestResult<()> {
    let temp_dir = tempfile::tempdir()?;
    let server = TestServer::start(temp_dir.path())?;

    let ok = server.get_current("supersecret1")?;
    assert_eq!(ok.header("access-control-allow-origin"), Some("*"));

    match ureq::get(&server.url("/sync")).call() {
        Err(ureq::Error::Status(400, response)) => {
            assert_eq!(response.header("access-control-allow-origin"), Some("*"));
            assert_eq!(
                response.header("access-control-allow-methods"),
                Some("GET, PUT, OPTIONS")
            );
        }
        other => return Err(format!("expected 400, got {other:?}").into()),
    }
    Ok(())
}

#[test]
fn unknown_routes_and_methods_are_404() -> TestResult<()> {
    let temp_dir = tempfile::tempdir()?;
    let server = TestServer::start(temp_dir.path())?;

    let (status, body) = error_status(ureq::get(&server.url("/other?key=supersecret1")).call())?;
    assert_eq!(status, 404);
    assert_eq!(body, json!({"error": "Not found"}));

    let (status, body) = error_status(
        ureq::request("POST", &server.url("/sync?key=supersecret1"))
            .send_string(&json!({"version": 1, "history": []}).to_string()),
    )?;
    assert_eq!(status, 404);
    assert_eq!(body, json!({"error": "Not found"}));

    let (status, _) =
        error_status(ureq::request("DELETE", &server.url("/sync?key=supersecret1")).call())?;
    assert_eq!(status, 404);
    Ok(())
}

#[test]
fn plaintext_key_never_reaches_the_store() -> TestResult<()> {
    let temp_dir = tempfile::tempdir()?;
    let server = TestServer::start(temp_dir.path())?;
    server.put_document("supersecret1", &json!({"version": 1, "history": []}))?;

    let records_dir = temp_dir.path().join("records");
    let mut entries = 0;
    for entry in std::fs::read_dir(&records_dir)? {
        let entry = entry?;
        entries += 1;
        let name = entry.file_name().to_string_lossy().to_string();
        assert!(!name.contains("supersecret1"), "plaintext key in {name}");
        let contents = std::fs::read_to_string(entry.path())?;
        assert!(!contents.contains("supersecret1"), "plaintext key in {name}");
    }
    assert!(entries > 0, "expected at least one stored record");
    Ok(())
}
