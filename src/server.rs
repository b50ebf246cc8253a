//! HTTP API server for the activity log store.
//!
//! Serves JSON endpoints for producers (append) and the dashboard (query,
//! stats, cleanup, health). Uses raw tokio TCP — no HTTP framework
//! dependency needed. Runs a periodic retention sweep alongside the
//! accept loop.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use crate::entry::NewEntry;
use crate::error::TrackerError;
use crate::store::{QueryParams, SortOrder};
use crate::TrackerEngine;

/// API server configuration
#[derive(Debug, Clone)]
pub struct ApiServerConfig {
    /// Address to bind (e.g. "127.0.0.1:3000")
    pub bind_addr: String,
    /// Seconds between automatic retention sweeps
    pub sweep_interval_secs: u64,
    /// CORS allowed origin (empty = derive from bind_addr)
    pub cors_origin: String,
}

/// Lightweight HTTP server for the tracker API
pub struct ApiServer {
    config: ApiServerConfig,
    engine: Arc<TrackerEngine>,
    shutdown_tx: Option<broadcast::Sender<()>>,
}

impl ApiServer {
    pub fn new(config: ApiServerConfig, engine: Arc<TrackerEngine>) -> Self {
        Self {
            config,
            engine,
            shutdown_tx: None,
        }
    }

    /// Start serving HTTP requests
    pub async fn start(&mut self) -> Result<(), TrackerError> {
        let listener = TcpListener::bind(&self.config.bind_addr)
            .await
            .map_err(|e| {
                TrackerError::ConnectionError(format!(
                    "failed to bind {}: {}",
                    self.config.bind_addr, e
                ))
            })?;

        let (shutdown_tx, _) = broadcast::channel::<()>(1);
        self.shutdown_tx = Some(shutdown_tx.clone());

        let cors_origin = if self.config.cors_origin.is_empty() {
            format!("http://{}", self.config.bind_addr)
        } else {
            self.config.cors_origin.clone()
        };

        // Periodic retention sweep alongside the accept loop.
        let sweep_engine = self.engine.clone();
        let sweep_interval = Duration::from_secs(self.config.sweep_interval_secs.max(1));
        let mut sweep_shutdown = shutdown_tx.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(sweep_interval) => {
                        match sweep_engine.store().sweep_retention(Utc::now()) {
                            Ok(0) => {}
                            Ok(removed) => info!(removed, "scheduled retention sweep"),
                            Err(e) => warn!(error = %e, "scheduled retention sweep failed"),
                        }
                    }
                    _ = sweep_shutdown.recv() => break,
                }
            }
        });

        info!(addr = %self.config.bind_addr, "API server listening");

        loop {
            let mut shutdown_rx = shutdown_tx.subscribe();

            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            let engine = self.engine.clone();
                            let cors = cors_origin.clone();
                            let mut shutdown = shutdown_tx.subscribe();
                            tokio::spawn(async move {
                                if let Err(e) = handle_http(stream, engine, &cors, &mut shutdown).await {
                                    warn!(peer = %addr, error = %e, "HTTP handler error");
                                }
                            });
                        }
                        Err(e) => {
                            error!(error = %e, "accept error");
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("API server shutting down");
                    break;
                }
            }
        }

        Ok(())
    }

    /// Signal the server to shut down
    pub fn shutdown(&self) {
        if let Some(tx) = &self.shutdown_tx {
            let _ = tx.send(());
        }
    }
}

/// Handle a single HTTP connection (request/response cycle)
async fn handle_http(
    mut stream: TcpStream,
    engine: Arc<TrackerEngine>,
    cors_origin: &str,
    shutdown: &mut broadcast::Receiver<()>,
) -> Result<(), TrackerError> {
    let mut buf = Vec::with_capacity(65536);
    let mut tmp = [0u8; 8192];

    // Read HTTP headers (loop until we see the header/body delimiter)
    loop {
        let n = tokio::select! {
            result = stream.read(&mut tmp) => {
                match result {
                    Ok(0) => return Ok(()),
                    Ok(n) => n,
                    Err(e) => return Err(TrackerError::ConnectionError(e.to_string())),
                }
            }
            _ = shutdown.recv() => return Ok(()),
        };
        buf.extend_from_slice(&tmp[..n]);

        let s = String::from_utf8_lossy(&buf);
        if s.contains("\r\n\r\n") || s.contains("\n\n") {
            // Read the remaining body if Content-Length says there is more
            let content_length = parse_content_length(&s);
            let header_end = if let Some(idx) = s.find("\r\n\r\n") {
                idx + 4
            } else if let Some(idx) = s.find("\n\n") {
                idx + 2
            } else {
                buf.len()
            };

            let body_received = buf.len() - header_end;
            let mut remaining = content_length.saturating_sub(body_received);
            while remaining > 0 {
                let n = tokio::select! {
                    result = stream.read(&mut tmp) => {
                        match result {
                            Ok(0) => break,
                            Ok(n) => n,
                            Err(e) => return Err(TrackerError::ConnectionError(e.to_string())),
                        }
                    }
                    _ = shutdown.recv() => return Ok(()),
                };
                buf.extend_from_slice(&tmp[..n]);
                remaining = remaining.saturating_sub(n);
            }
            break;
        }

        if buf.len() > 65536 {
            send_response(&mut stream, 413, "text/plain", b"Request too large", cors_origin)
                .await?;
            return Ok(());
        }
    }

    let request = String::from_utf8_lossy(&buf).to_string();

    // Parse the HTTP request line
    let first_line = request.lines().next().unwrap_or("");
    let parts: Vec<&str> = first_line.split_whitespace().collect();

    if parts.len() < 2 {
        send_response(&mut stream, 400, "text/plain", b"Bad Request", cors_origin).await?;
        return Ok(());
    }

    let method = parts[0];
    let path = parts[1].split('?').next().unwrap_or(parts[1]);

    match (method, path) {
        ("GET", "/") => {
            let body = serde_json::json!({
                "service": "nox-tracker",
                "version": env!("CARGO_PKG_VERSION"),
                "endpoints": [
                    "/api/activities", "/api/stats", "/api/cleanup", "/health",
                ],
            });
            let json = serde_json::to_vec(&body).unwrap_or_default();
            send_response(&mut stream, 200, "application/json", &json, cors_origin).await
        }
        ("GET", "/health") => handle_health(&mut stream, &engine, cors_origin).await,
        ("GET", "/api/activities") => {
            handle_query(&mut stream, &engine, &request, cors_origin).await
        }
        ("POST", "/api/activities") => {
            let body = extract_body(&request);
            handle_append(&mut stream, &engine, &body, cors_origin).await
        }
        ("GET", "/api/stats") => handle_stats(&mut stream, &engine, cors_origin).await,
        ("POST", "/api/cleanup") => handle_cleanup(&mut stream, &engine, cors_origin).await,
        ("OPTIONS", _) => send_cors_preflight(&mut stream, cors_origin).await,
        _ => {
            send_response(
                &mut stream,
                404,
                "application/json",
                b"{\"error\":\"not found\"}",
                cors_origin,
            )
            .await
        }
    }
}

/// GET /health — lightweight liveness check
async fn handle_health(
    stream: &mut TcpStream,
    engine: &TrackerEngine,
    cors_origin: &str,
) -> Result<(), TrackerError> {
    let body = serde_json::json!({
        "status": "ok",
        "time": Utc::now().to_rfc3339(),
        "count": engine.store().count(),
    });
    let json = serde_json::to_vec(&body).unwrap_or_default();
    send_response(stream, 200, "application/json", &json, cors_origin).await
}

/// GET /api/activities — filtered, sorted, paginated read
async fn handle_query(
    stream: &mut TcpStream,
    engine: &TrackerEngine,
    raw_request: &str,
    cors_origin: &str,
) -> Result<(), TrackerError> {
    let params = QueryParams {
        agent: parse_query_param(raw_request, "agent").map(str::to_string),
        kind: parse_query_param(raw_request, "type").map(str::to_string),
        sort: parse_query_param(raw_request, "sort")
            .map(SortOrder::parse)
            .unwrap_or_default(),
        limit: parse_query_param(raw_request, "limit").and_then(|v| v.parse().ok()),
        offset: parse_query_param(raw_request, "offset")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0),
    };

    let page = engine.store().query(&params);
    let json = serde_json::to_vec(&page).unwrap_or_default();
    send_response(stream, 200, "application/json", &json, cors_origin).await
}

/// POST /api/activities — append one entry
async fn handle_append(
    stream: &mut TcpStream,
    engine: &TrackerEngine,
    body: &str,
    cors_origin: &str,
) -> Result<(), TrackerError> {
    let new: NewEntry = match serde_json::from_str(body) {
        Ok(e) => e,
        Err(e) => {
            let err = serde_json::json!({"success": false, "error": format!("invalid JSON: {e}")});
            let json = serde_json::to_vec(&err).unwrap_or_default();
            return send_response(stream, 400, "application/json", &json, cors_origin).await;
        }
    };

    match engine.store().append(new) {
        Ok(outcome) => {
            let status = if outcome.accepted { 201 } else { 409 };
            let body = serde_json::json!({"success": outcome.accepted, "id": outcome.id});
            let json = serde_json::to_vec(&body).unwrap_or_default();
            send_response(stream, status, "application/json", &json, cors_origin).await
        }
        Err(e) => {
            error!(error = %e, "append failed");
            let err = serde_json::json!({"success": false, "error": e.to_string()});
            let json = serde_json::to_vec(&err).unwrap_or_default();
            send_response(stream, 500, "application/json", &json, cors_origin).await
        }
    }
}

/// GET /api/stats — aggregate statistics
async fn handle_stats(
    stream: &mut TcpStream,
    engine: &TrackerEngine,
    cors_origin: &str,
) -> Result<(), TrackerError> {
    let stats = engine.store().aggregate_stats(Utc::now());
    let json = serde_json::to_vec(&stats).unwrap_or_default();
    send_response(stream, 200, "application/json", &json, cors_origin).await
}

/// POST /api/cleanup — on-demand retention sweep
async fn handle_cleanup(
    stream: &mut TcpStream,
    engine: &TrackerEngine,
    cors_origin: &str,
) -> Result<(), TrackerError> {
    match engine.store().sweep_retention(Utc::now()) {
        Ok(removed) => {
            let body = serde_json::json!({
                "removed": removed,
                "remaining": engine.store().count(),
            });
            let json = serde_json::to_vec(&body).unwrap_or_default();
            send_response(stream, 200, "application/json", &json, cors_origin).await
        }
        Err(e) => {
            error!(error = %e, "cleanup failed");
            let err = serde_json::json!({"error": e.to_string()});
            let json = serde_json::to_vec(&err).unwrap_or_default();
            send_response(stream, 500, "application/json", &json, cors_origin).await
        }
    }
}

/// Parse a single query parameter from the raw HTTP request
fn parse_query_param<'a>(request: &'a str, key: &str) -> Option<&'a str> {
    let first_line = request.lines().next()?;
    let path = first_line.split_whitespace().nth(1)?;
    let query = path.split('?').nth(1)?;
    for pair in query.split('&') {
        let mut kv = pair.splitn(2, '=');
        if let (Some(k), Some(v)) = (kv.next(), kv.next()) {
            if k == key {
                return Some(v);
            }
        }
    }
    None
}

/// Extract the HTTP body from a raw request string
fn extract_body(request: &str) -> String {
    if let Some(idx) = request.find("\r\n\r\n") {
        request[idx + 4..].to_string()
    } else if let Some(idx) = request.find("\n\n") {
        request[idx + 2..].to_string()
    } else {
        String::new()
    }
}

/// Parse Content-Length header from raw HTTP request
fn parse_content_length(request: &str) -> usize {
    for line in request.lines() {
        let lower = line.to_lowercase();
        if lower.starts_with("content-length:") {
            if let Some(val) = lower.strip_prefix("content-length:") {
                return val.trim().parse().unwrap_or(0);
            }
        }
    }
    0
}

/// Send an HTTP response with dynamic CORS origin
async fn send_response(
    stream: &mut TcpStream,
    status: u16,
    content_type: &str,
    body: &[u8],
    cors_origin: &str,
) -> Result<(), TrackerError> {
    let status_text = match status {
        200 => "OK",
        201 => "Created",
        400 => "Bad Request",
        404 => "Not Found",
        409 => "Conflict",
        413 => "Payload Too Large",
        500 => "Internal Server Error",
        503 => "Service Unavailable",
        _ => "Unknown",
    };

    let header = format!(
        "HTTP/1.1 {} {}\r\n\
         Content-Type: {}\r\n\
         Content-Length: {}\r\n\
         Cache-Control: no-store\r\n\
         Access-Control-Allow-Origin: {}\r\n\
         Access-Control-Allow-Methods: GET, POST, OPTIONS\r\n\
         Access-Control-Allow-Headers: Content-Type\r\n\
         Connection: close\r\n\
         \r\n",
        status,
        status_text,
        content_type,
        body.len(),
        cors_origin
    );

    stream
        .write_all(header.as_bytes())
        .await
        .map_err(|e| TrackerError::ConnectionError(e.to_string()))?;
    stream
        .write_all(body)
        .await
        .map_err(|e| TrackerError::ConnectionError(e.to_string()))?;
    Ok(())
}

/// Reply to an OPTIONS preflight
async fn send_cors_preflight(
    stream: &mut TcpStream,
    cors_origin: &str,
) -> Result<(), TrackerError> {
    send_response(stream, 200, "text/plain", b"", cors_origin).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TrackerConfig;

    fn test_engine(dir: &tempfile::TempDir) -> Arc<TrackerEngine> {
        let mut config = TrackerConfig::default();
        config.store.data_path = Some(
            dir.path()
                .join("activity-log.json")
                .to_string_lossy()
                .to_string(),
        );
        Arc::new(TrackerEngine::new(config))
    }

    async fn start_test_server(engine: Arc<TrackerEngine>) -> String {
        // Bind to pick a free port, then hand the address to the server.
        let probe = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = probe.local_addr().unwrap().to_string();
        drop(probe);

        let mut server = ApiServer::new(
            ApiServerConfig {
                bind_addr: addr.clone(),
                sweep_interval_secs: 3600,
                cors_origin: String::new(),
            },
            engine,
        );
        tokio::spawn(async move { server.start().await });
        tokio::time::sleep(Duration::from_millis(100)).await;
        addr
    }

    async fn request(addr: &str, raw: &str) -> String {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(raw.as_bytes()).await.unwrap();
        let mut resp = Vec::new();
        stream.read_to_end(&mut resp).await.unwrap();
        String::from_utf8_lossy(&resp).to_string()
    }

    fn body_of(resp: &str) -> serde_json::Value {
        let idx = resp.find("\r\n\r\n").unwrap();
        serde_json::from_str(&resp[idx + 4..]).unwrap()
    }

    #[test]
    fn test_parse_query_param() {
        let req = "GET /api/activities?limit=10&agent=nox&sort=-timestamp HTTP/1.1\r\n\r\n";
        assert_eq!(parse_query_param(req, "limit"), Some("10"));
        assert_eq!(parse_query_param(req, "agent"), Some("nox"));
        assert_eq!(parse_query_param(req, "type"), None);
    }

    #[test]
    fn test_extract_body_crlf() {
        let req = "POST /api/activities HTTP/1.1\r\nHost: localhost\r\n\r\n{\"agent\":\"nox\"}";
        assert_eq!(extract_body(req), "{\"agent\":\"nox\"}");
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let dir = tempfile::tempdir().unwrap();
        let addr = start_test_server(test_engine(&dir)).await;

        let resp = request(&addr, "GET /health HTTP/1.1\r\nHost: x\r\n\r\n").await;
        assert!(resp.starts_with("HTTP/1.1 200"));
        let body = body_of(&resp);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["count"], 0);
    }

    #[tokio::test]
    async fn test_append_then_duplicate_conflict() {
        let dir = tempfile::tempdir().unwrap();
        let addr = start_test_server(test_engine(&dir)).await;

        let entry = r#"{"agent":"nox","type":"heartbeat","description":"ok"}"#;
        let post = format!(
            "POST /api/activities HTTP/1.1\r\nHost: x\r\nContent-Length: {}\r\n\r\n{}",
            entry.len(),
            entry
        );

        let first = request(&addr, &post).await;
        assert!(first.starts_with("HTTP/1.1 201"));
        assert_eq!(body_of(&first)["success"], true);

        let second = request(&addr, &post).await;
        assert!(second.starts_with("HTTP/1.1 409"));
        let body = body_of(&second);
        assert_eq!(body["success"], false);
        assert_eq!(body["id"], body_of(&first)["id"]);
    }

    #[tokio::test]
    async fn test_query_endpoint_defaults_and_filters() {
        let dir = tempfile::tempdir().unwrap();
        let engine = test_engine(&dir);
        for (agent, desc) in [("nox", "a"), ("aria", "b"), ("nox", "c")] {
            engine
                .store()
                .append(NewEntry {
                    agent: Some(agent.into()),
                    kind: Some("research".into()),
                    description: Some(desc.into()),
                    ..NewEntry::default()
                })
                .unwrap();
        }
        let addr = start_test_server(engine).await;

        let resp = request(&addr, "GET /api/activities HTTP/1.1\r\nHost: x\r\n\r\n").await;
        let body = body_of(&resp);
        assert_eq!(body["total"], 3);
        assert_eq!(body["limit"], 100);
        assert_eq!(body["offset"], 0);

        let resp = request(
            &addr,
            "GET /api/activities?agent=nox&limit=1 HTTP/1.1\r\nHost: x\r\n\r\n",
        )
        .await;
        let body = body_of(&resp);
        assert_eq!(body["total"], 2);
        assert_eq!(body["entries"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_bad_json_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let addr = start_test_server(test_engine(&dir)).await;

        let bad = "{not json";
        let post = format!(
            "POST /api/activities HTTP/1.1\r\nHost: x\r\nContent-Length: {}\r\n\r\n{}",
            bad.len(),
            bad
        );
        let resp = request(&addr, &post).await;
        assert!(resp.starts_with("HTTP/1.1 400"));
    }

    #[tokio::test]
    async fn test_stats_and_cleanup_endpoints() {
        let dir = tempfile::tempdir().unwrap();
        let engine = test_engine(&dir);
        engine
            .store()
            .append(NewEntry {
                agent: Some("nox".into()),
                kind: Some("research".into()),
                description: Some("fresh".into()),
                ..NewEntry::default()
            })
            .unwrap();
        engine
            .store()
            .append(NewEntry {
                timestamp: Some(Utc::now() - chrono::Duration::days(9)),
                agent: Some("nox".into()),
                kind: Some("research".into()),
                description: Some("ancient".into()),
                ..NewEntry::default()
            })
            .unwrap();
        let addr = start_test_server(engine).await;

        let resp = request(&addr, "GET /api/stats HTTP/1.1\r\nHost: x\r\n\r\n").await;
        let body = body_of(&resp);
        assert_eq!(body["total"], 2);
        assert_eq!(body["byAgent"]["nox"], 2);

        let resp = request(&addr, "POST /api/cleanup HTTP/1.1\r\nHost: x\r\n\r\n").await;
        let body = body_of(&resp);
        assert_eq!(body["removed"], 1);
        assert_eq!(body["remaining"], 1);
    }

    #[tokio::test]
    async fn test_unknown_path_404() {
        let dir = tempfile::tempdir().unwrap();
        let addr = start_test_server(test_engine(&dir)).await;
        let resp = request(&addr, "GET /api/nope HTTP/1.1\r\nHost: x\r\n\r\n").await;
        assert!(resp.starts_with("HTTP/1.1 404"));
    }
}
