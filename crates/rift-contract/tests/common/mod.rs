//! In-process mock API for integration tests.

#![allow(dead_code)]

use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use serde_json::Value;
use std::collections::BTreeMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// Canned answer for one route.
#[derive(Debug, Clone)]
pub struct MockResponse {
    pub status: u16,
    pub body: String,
    pub delay: Duration,
}

impl MockResponse {
    pub fn json(status: u16, body: Value) -> Self {
        Self {
            status,
            body: body.to_string(),
            delay: Duration::ZERO,
        }
    }

    pub fn empty(status: u16) -> Self {
        Self {
            status,
            body: String::new(),
            delay: Duration::ZERO,
        }
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

/// A request as the mock saw it.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub query: Option<String>,
    pub headers: BTreeMap<String, String>,
    pub body: Option<Value>,
}

type Routes = Arc<BTreeMap<String, MockResponse>>;
type Recorded = Arc<Mutex<Vec<RecordedRequest>>>;

pub struct MockServer {
    addr: SocketAddr,
    recorded: Recorded,
    handle: JoinHandle<()>,
}

impl MockServer {
    /// Serve `routes`, keyed by `"METHOD /path"`, on an ephemeral port.
    /// Unknown routes answer 404.
    pub async fn start(routes: Vec<(&str, MockResponse)>) -> Self {
        let routes: Routes = Arc::new(
            routes
                .into_iter()
                .map(|(key, response)| (key.to_string(), response))
                .collect(),
        );
        let recorded: Recorded = Arc::default();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let handle = tokio::spawn({
            let recorded = Arc::clone(&recorded);
            async move {
                loop {
                    let Ok((stream, _)) = listener.accept().await else {
                        return;
                    };
                    let io = TokioIo::new(stream);
                    let routes = Arc::clone(&routes);
                    let recorded = Arc::clone(&recorded);

                    tokio::spawn(async move {
                        let service = service_fn(move |req| {
                            let routes = Arc::clone(&routes);
                            let recorded = Arc::clone(&recorded);
                            async move { handle(req, routes, recorded).await }
                        });
                        let _ = http1::Builder::new().serve_connection(io, service).await;
                    });
                }
            }
        });

        Self {
            addr,
            recorded,
            handle,
        }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.recorded.lock().unwrap().clone()
    }

    pub fn paths(&self) -> Vec<String> {
        self.requests()
            .into_iter()
            .map(|r| format!("{} {}", r.method, r.path))
            .collect()
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn handle(
    req: Request<Incoming>,
    routes: Routes,
    recorded: Recorded,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let method = req.method().to_string();
    let path = req.uri().path().to_string();
    let query = req.uri().query().map(str::to_string);
    let headers = req
        .headers()
        .iter()
        .map(|(name, value)| {
            (
                name.as_str().to_string(),
                String::from_utf8_lossy(value.as_bytes()).into_owned(),
            )
        })
        .collect();
    let bytes = match req.into_body().collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(_) => Bytes::new(),
    };
    let body = serde_json::from_slice(&bytes).ok();

    let key = format!("{method} {path}");
    recorded.lock().unwrap().push(RecordedRequest {
        method,
        path,
        query,
        headers,
        body,
    });

    let response = routes
        .get(&key)
        .cloned()
        .unwrap_or_else(|| MockResponse::json(404, serde_json::json!({"error": "no route"})));

    if !response.delay.is_zero() {
        tokio::time::sleep(response.delay).await;
    }

    Ok(Response::builder()
        .status(response.status)
        .header("content-type", "application/json")
        .body(Full::new(Bytes::from(response.body)))
        .unwrap())
}

/// A URL on which nothing is listening.
pub async fn closed_port_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{addr}")
}

pub fn write_suite(dir: &Path, name: &str, yaml: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, yaml).unwrap();
    path
}

/// Honour `RUST_LOG` when debugging a failing test.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
