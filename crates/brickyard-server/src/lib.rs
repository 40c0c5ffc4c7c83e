//! HTTP front end of the Brickyard control plane.
//!
//! Synchronous requests are answered directly. Slow requests are accepted with
//! `202 Accepted` and a `Location` pointing at `/queue/{id}`, which the client
//! polls:
//!
//! - `200` with `X-Pending: true` while the operation runs,
//! - `303 See Other` to the result once it succeeded with one,
//! - `204 No Content` once it succeeded without one,
//! - `500` with the error text once it failed,
//! - `404` for ids that are unknown or were already collected.
//!
//! After every successful `POST`/`PUT` the database is exported to the
//! configured [`BackupSink`]. The [`TestServer`] helper runs the whole stack
//! on a random port for integration tests.

use brickyard_core::api::{ClusterList, NodeStateRequest, VolumeList};
use brickyard_core::{App, CoreError, ErrorKind, HealthState, PollOutcome, ScheduledOperation};
use brickyard_store::{Db, StoreError};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use thiserror::Error;
use tiny_http::{Header, Method, Request, Response, Server, StatusCode};
use tracing::{debug, error, info, warn};

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("cannot listen on {addr}: {reason}")]
    Bind { addr: String, reason: String },
    #[error(transparent)]
    Core(#[from] CoreError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Destination for the export taken after each mutating request.
pub trait BackupSink: Send + Sync {
    fn write_backup(&self, db: &Db) -> Result<(), StoreError>;
}

/// Keeps the latest export in a single file, replaced atomically.
pub struct FileBackupSink {
    path: PathBuf,
}

impl FileBackupSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl BackupSink for FileBackupSink {
    fn write_backup(&self, db: &Db) -> Result<(), StoreError> {
        db.export_to_file(&self.path)?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route<'a> {
    Hello,
    Clusters,
    Cluster(&'a str),
    Nodes,
    Node(&'a str),
    NodeState(&'a str),
    Devices,
    Device(&'a str),
    Volumes,
    Volume(&'a str),
    VolumeExpand(&'a str),
    Queue(&'a str),
    BackupDb,
}

/// Map a request URL onto a route. Query strings and a trailing slash are
/// ignored.
pub fn parse_route(url: &str) -> Option<Route<'_>> {
    let path = url.split('?').next().unwrap_or(url);
    let path = path.trim_start_matches('/').trim_end_matches('/');
    let segments: Vec<&str> = path.split('/').collect();
    if segments.iter().any(|s| s.is_empty()) {
        return None;
    }
    let route = match segments.as_slice() {
        ["hello"] => Route::Hello,
        ["clusters"] => Route::Clusters,
        ["clusters", id] => Route::Cluster(id),
        ["nodes"] => Route::Nodes,
        ["nodes", id] => Route::Node(id),
        ["nodes", id, "state"] => Route::NodeState(id),
        ["devices"] => Route::Devices,
        ["devices", id] => Route::Device(id),
        ["volumes"] => Route::Volumes,
        ["volumes", id] => Route::Volume(id),
        ["volumes", id, "expand"] => Route::VolumeExpand(id),
        ["queue", id] => Route::Queue(id),
        ["backup", "db"] => Route::BackupDb,
        _ => return None,
    };
    Some(route)
}

/// HTTP status reported for each error kind.
pub fn status_for(kind: ErrorKind) -> u16 {
    match kind {
        ErrorKind::InvalidRequest => 400,
        ErrorKind::NotFound => 404,
        ErrorKind::Conflict | ErrorKind::Ambiguous => 409,
        ErrorKind::NoSpace => 507,
        ErrorKind::RemoteFailure | ErrorKind::StoreFailure | ErrorKind::Fatal => 500,
    }
}

/// A response before it is handed to the HTTP library.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub status: u16,
    pub body: Vec<u8>,
    pub content_type: Option<&'static str>,
    pub headers: Vec<(&'static str, String)>,
}

impl Reply {
    pub fn empty(status: u16) -> Self {
        Self {
            status,
            body: Vec::new(),
            content_type: None,
            headers: Vec::new(),
        }
    }

    pub fn text(status: u16, message: &str) -> Self {
        Self {
            body: message.as_bytes().to_vec(),
            content_type: Some("text/plain; charset=utf-8"),
            ..Self::empty(status)
        }
    }

    fn json<T: Serialize>(status: u16, value: &T) -> Result<Self, CoreError> {
        Ok(Self {
            body: serde_json::to_vec(value)?,
            content_type: Some("application/json"),
            ..Self::empty(status)
        })
    }

    fn accepted(op: &ScheduledOperation) -> Self {
        Self::empty(202).with_header("Location", op.location.clone())
    }

    #[must_use]
    pub fn with_header(mut self, name: &'static str, value: String) -> Self {
        self.headers.push((name, value));
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn from_error(err: &CoreError) -> Self {
        let status = status_for(err.kind());
        if status >= 500 {
            error!("request failed: {err}");
        } else {
            debug!("request rejected: {err}");
        }
        Self::text(status, &err.to_string())
    }

    pub fn from_poll(outcome: PollOutcome) -> Self {
        match outcome {
            PollOutcome::Pending { location } => Self::empty(200)
                .with_header("X-Pending", "true".to_owned())
                .with_header("Location", location),
            PollOutcome::Redirect { location } => Self::empty(303).with_header("Location", location),
            PollOutcome::NoContent => Self::empty(204),
            PollOutcome::Failed { message } => Self::text(500, &message),
            PollOutcome::Unknown => Self::text(404, "operation not found"),
        }
    }
}

fn parse_body<T: DeserializeOwned>(body: &[u8]) -> Result<T, CoreError> {
    serde_json::from_slice(body)
        .map_err(|e| CoreError::InvalidRequest(format!("malformed request body: {e}")))
}

/// Routes requests to the application and takes backups after mutations.
pub struct Service {
    app: App,
    backup: Option<Box<dyn BackupSink>>,
}

impl Service {
    pub fn new(app: App) -> Self {
        Self { app, backup: None }
    }

    #[must_use]
    pub fn with_backup(mut self, sink: Box<dyn BackupSink>) -> Self {
        self.backup = Some(sink);
        self
    }

    pub fn app(&self) -> &App {
        &self.app
    }

    /// Answer one request.
    pub fn dispatch(&self, method: &Method, url: &str, body: &[u8]) -> Reply {
        let reply = match parse_route(url) {
            Some(route) => self
                .route(method, route, body)
                .unwrap_or_else(|e| Reply::from_error(&e)),
            None => Reply::text(404, "not found"),
        };
        if matches!(method, Method::Post | Method::Put) && reply.status < 400 {
            self.backup_after_mutation();
        }
        reply
    }

    fn backup_after_mutation(&self) {
        if let Some(sink) = &self.backup {
            if let Err(e) = sink.write_backup(self.app.db()) {
                warn!("database backup failed: {e}");
            }
        }
    }

    fn route(&self, method: &Method, route: Route<'_>, body: &[u8]) -> Result<Reply, CoreError> {
        let app = &self.app;
        match (method, route) {
            (Method::Get, Route::Hello) => Ok(Reply::text(200, "Hello from Brickyard")),

            (Method::Post, Route::Clusters) => Reply::json(201, &app.cluster_create()?),
            (Method::Get, Route::Clusters) => Reply::json(
                200,
                &ClusterList {
                    clusters: app.cluster_list()?,
                },
            ),
            (Method::Get, Route::Cluster(id)) => Reply::json(200, &app.cluster_info(id)?),
            (Method::Delete, Route::Cluster(id)) => {
                app.cluster_delete(id)?;
                Ok(Reply::empty(204))
            }

            (Method::Post, Route::Nodes) => Ok(Reply::accepted(&app.node_add(parse_body(body)?)?)),
            (Method::Get, Route::Node(id)) => Reply::json(200, &app.node_info(id)?),
            (Method::Delete, Route::Node(id)) => Ok(Reply::accepted(&app.node_delete(id)?)),
            (Method::Post, Route::NodeState(id)) => {
                let req: NodeStateRequest = parse_body(body)?;
                let health: HealthState = req.state.parse()?;
                Reply::json(200, &app.node_set_health(id, health)?)
            }

            (Method::Post, Route::Devices) => {
                Ok(Reply::accepted(&app.device_add(&parse_body(body)?)?))
            }
            (Method::Get, Route::Device(id)) => Reply::json(200, &app.device_info(id)?),
            (Method::Delete, Route::Device(id)) => Ok(Reply::accepted(&app.device_delete(id)?)),

            (Method::Post, Route::Volumes) => {
                Ok(Reply::accepted(&app.volume_create(&parse_body(body)?)?))
            }
            (Method::Get, Route::Volumes) => Reply::json(
                200,
                &VolumeList {
                    volumes: app.volume_list()?,
                },
            ),
            (Method::Get, Route::Volume(id)) => Reply::json(200, &app.volume_info(id)?),
            (Method::Post, Route::VolumeExpand(id)) => {
                Ok(Reply::accepted(&app.volume_expand(id, &parse_body(body)?)?))
            }
            (Method::Delete, Route::Volume(id)) => Ok(Reply::accepted(&app.volume_delete(id)?)),

            (Method::Get, Route::Queue(id)) => Ok(Reply::from_poll(app.operations().poll(id))),
            (Method::Get, Route::BackupDb) => {
                let mut body = Vec::new();
                app.export(&mut body)?;
                Ok(Reply {
                    body,
                    content_type: Some("application/octet-stream"),
                    ..Reply::empty(200)
                })
            }

            _ => Ok(Reply::text(405, "method not allowed")),
        }
    }
}

fn into_response(reply: Reply) -> Response<Cursor<Vec<u8>>> {
    let mut response =
        Response::from_data(reply.body).with_status_code(StatusCode(reply.status));
    let content_type = reply.content_type.map(|ct| ("Content-Type", ct.to_owned()));
    for (name, value) in content_type.into_iter().chain(reply.headers) {
        match Header::from_bytes(name, value.as_bytes()) {
            Ok(header) => response.add_header(header),
            Err(()) => warn!("dropping invalid {name} header"),
        }
    }
    response
}

/// Read, answer and respond to a single HTTP request.
pub fn handle_request(service: &Service, mut req: Request) {
    let method = req.method().clone();
    let url = req.url().to_owned();
    debug!("{method} {url}");

    let mut body = Vec::new();
    let reply = match req.as_reader().read_to_end(&mut body) {
        Ok(_) => service.dispatch(&method, &url, &body),
        Err(e) => Reply::text(400, &format!("cannot read request body: {e}")),
    };
    let status = reply.status;
    if let Err(e) = req.respond(into_response(reply)) {
        warn!("{method} {url}: could not send response: {e}");
    } else {
        debug!("{method} {url} -> {status}");
    }
}

pub fn bind(addr: &str) -> Result<Arc<Server>, ServerError> {
    Server::http(addr)
        .map(Arc::new)
        .map_err(|e| ServerError::Bind {
            addr: addr.to_owned(),
            reason: e.to_string(),
        })
}

fn spawn_workers(
    service: &Arc<Service>,
    server: &Arc<Server>,
    workers: usize,
) -> Result<Vec<JoinHandle<()>>, ServerError> {
    (0..workers.max(1))
        .map(|i| {
            let service = Arc::clone(service);
            let server = Arc::clone(server);
            thread::Builder::new()
                .name(format!("http-{i}"))
                .spawn(move || {
                    for request in server.incoming_requests() {
                        handle_request(&service, request);
                    }
                })
                .map_err(ServerError::from)
        })
        .collect()
}

/// Serve requests on `workers` threads until [`shutdown`] is called.
pub fn serve(service: &Arc<Service>, server: &Arc<Server>, workers: usize) -> Result<(), ServerError> {
    let handles = spawn_workers(service, server, workers)?;
    info!("serving with {} worker threads", handles.len());
    for handle in handles {
        if handle.join().is_err() {
            error!("worker thread panicked");
        }
    }
    Ok(())
}

/// Wake every worker blocked on the listener so it can exit.
pub fn shutdown(server: &Server, workers: usize) {
    for _ in 0..workers.max(1) {
        server.unblock();
    }
}

/// A server on a random local port running in background threads.
///
/// Dropping it stops the workers.
pub struct TestServer {
    pub url: String,
    pub port: u16,
    service: Arc<Service>,
    server: Arc<Server>,
    handles: Vec<JoinHandle<()>>,
}

impl TestServer {
    pub fn start(service: Service) -> Result<Self, ServerError> {
        let server = bind("127.0.0.1:0")?;
        let port = server
            .server_addr()
            .to_ip()
            .map(|addr| addr.port())
            .ok_or_else(|| ServerError::Bind {
                addr: "127.0.0.1:0".to_owned(),
                reason: "not an IP listener".to_owned(),
            })?;
        let service = Arc::new(service);
        let handles = spawn_workers(&service, &server, 2)?;
        Ok(Self {
            url: format!("http://127.0.0.1:{port}"),
            port,
            service,
            server,
            handles,
        })
    }

    pub fn service(&self) -> &Service {
        &self.service
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        shutdown(&self.server, self.handles.len());
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}
