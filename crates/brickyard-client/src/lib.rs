//! Blocking client for the Brickyard HTTP API.
//!
//! Slow operations are answered with `202 Accepted` and a queue location. The
//! client polls that location until the operation settles and, when it
//! produced a resource, fetches it.

pub mod config;

pub use config::ClientConfig;

use brickyard_core::api::{
    ClusterList, DeviceAddRequest, NodeAddRequest, NodeStateRequest, VolumeCreateRequest,
    VolumeExpandRequest, VolumeList,
};
use brickyard_core::entries::{ClusterEntry, DeviceEntry, NodeEntry, VolumeEntry};
use brickyard_core::HealthState;
use brickyard_store::{ClusterId, VolumeId};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::{Read, Write};
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("HTTP error: {0}")]
    Http(String),
    #[error("server returned {code}: {message}")]
    Status { code: u16, message: String },
    #[error("not found: {0}")]
    NotFound(String),
    #[error("operation failed: {0}")]
    OperationFailed(String),
    #[error("timed out waiting for {0}")]
    Timeout(String),
    #[error("unexpected response: {0}")]
    Protocol(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("config error: {0}")]
    Config(String),
}

#[derive(Debug, Clone, Copy)]
enum Verb {
    Get,
    Post,
    Delete,
}

#[derive(Debug)]
struct Reply {
    status: u16,
    location: Option<String>,
    pending: bool,
    body: Vec<u8>,
}

impl Reply {
    fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).trim().to_owned()
    }

    fn json<T: DeserializeOwned>(&self) -> Result<T, ClientError> {
        Ok(serde_json::from_slice(&self.body)?)
    }

    fn into_error(self, url: &str) -> ClientError {
        match self.status {
            404 => ClientError::NotFound(if self.body.is_empty() {
                url.to_owned()
            } else {
                self.text()
            }),
            code => ClientError::Status {
                code,
                message: self.text(),
            },
        }
    }
}

pub struct Client {
    base_url: String,
    agent: ureq::Agent,
    poll_interval: Duration,
    timeout: Duration,
}

impl Client {
    pub fn new(base_url: &str) -> Self {
        let config = ureq::Agent::config_builder()
            .http_status_as_error(false)
            .max_redirects(0)
            .timeout_global(Some(Duration::from_secs(30)))
            .build();
        Self {
            base_url: base_url.trim_end_matches('/').to_owned(),
            agent: ureq::Agent::new_with_config(config),
            poll_interval: Duration::from_millis(500),
            timeout: Duration::from_secs(600),
        }
    }

    pub fn from_config(config: &ClientConfig) -> Self {
        Self::new(&config.server)
            .with_timeout(Duration::from_secs(config.timeout_secs))
            .with_poll_interval(Duration::from_millis(config.poll_interval_ms))
    }

    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// How long to wait for an asynchronous operation to settle.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            path.to_owned()
        } else {
            format!("{}{path}", self.base_url)
        }
    }

    fn request(&self, verb: Verb, path: &str, body: Option<&[u8]>) -> Result<Reply, ClientError> {
        let url = self.url(path);
        debug!("{verb:?} {url}");
        let result = match (verb, body) {
            (Verb::Get, _) => self.agent.get(&url).call(),
            (Verb::Delete, _) => self.agent.delete(&url).call(),
            (Verb::Post, Some(data)) => self
                .agent
                .post(&url)
                .header("Content-Type", "application/json")
                .send(data),
            (Verb::Post, None) => self.agent.post(&url).send_empty(),
        };
        let resp = result.map_err(|e| ClientError::Http(e.to_string()))?;

        let header = |name: &str| {
            resp.headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_owned)
        };
        let status = resp.status().as_u16();
        let location = header("Location");
        let pending = header("X-Pending").is_some_and(|v| v.eq_ignore_ascii_case("true"));

        let mut reader = resp.into_body().into_reader();
        let mut body = Vec::new();
        reader.read_to_end(&mut body)?;
        Ok(Reply {
            status,
            location,
            pending,
            body,
        })
    }

    fn expect(
        &self,
        verb: Verb,
        path: &str,
        body: Option<&[u8]>,
        status: u16,
    ) -> Result<Reply, ClientError> {
        let reply = self.request(verb, path, body)?;
        if reply.status == status {
            Ok(reply)
        } else if reply.status >= 400 {
            Err(reply.into_error(path))
        } else {
            Err(ClientError::Protocol(format!(
                "expected {status} from {path}, got {}",
                reply.status
            )))
        }
    }

    fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ClientError> {
        self.expect(Verb::Get, path, None, 200)?.json()
    }

    /// Submit an asynchronous request and wait for it to settle.
    fn submit(&self, verb: Verb, path: &str, body: Option<&[u8]>) -> Result<Option<String>, ClientError> {
        let reply = self.expect(verb, path, body, 202)?;
        let location = reply
            .location
            .ok_or_else(|| ClientError::Protocol(format!("{path} accepted without a location")))?;
        self.wait_for(&location)
    }

    fn submit_json<B: Serialize>(&self, path: &str, body: &B) -> Result<Option<String>, ClientError> {
        let data = serde_json::to_vec(body)?;
        self.submit(Verb::Post, path, Some(&data))
    }

    fn fetch_result<T: DeserializeOwned>(&self, location: Option<String>) -> Result<T, ClientError> {
        match location {
            Some(location) => self.get_json(&location),
            None => Err(ClientError::Protocol(
                "operation finished without a result".to_owned(),
            )),
        }
    }

    /// Poll a queue location until the operation is no longer pending.
    ///
    /// Returns the location of the result, if the operation produced one.
    pub fn wait_for(&self, location: &str) -> Result<Option<String>, ClientError> {
        let deadline = Instant::now() + self.timeout;
        loop {
            let reply = self.request(Verb::Get, location, None)?;
            match reply.status {
                200 if reply.pending => {}
                303 => {
                    return reply.location.map(Some).ok_or_else(|| {
                        ClientError::Protocol(format!("{location} redirected without a location"))
                    });
                }
                204 => return Ok(None),
                500 => return Err(ClientError::OperationFailed(reply.text())),
                code if code >= 400 => return Err(reply.into_error(location)),
                code => {
                    return Err(ClientError::Protocol(format!(
                        "unexpected {code} while polling {location}"
                    )))
                }
            }
            if Instant::now() >= deadline {
                return Err(ClientError::Timeout(location.to_owned()));
            }
            thread::sleep(self.poll_interval);
        }
    }

    pub fn hello(&self) -> Result<String, ClientError> {
        Ok(self.expect(Verb::Get, "/hello", None, 200)?.text())
    }

    pub fn cluster_create(&self) -> Result<ClusterEntry, ClientError> {
        self.expect(Verb::Post, "/clusters", None, 201)?.json()
    }

    pub fn cluster_list(&self) -> Result<Vec<ClusterId>, ClientError> {
        Ok(self.get_json::<ClusterList>("/clusters")?.clusters)
    }

    pub fn cluster_info(&self, id: &str) -> Result<ClusterEntry, ClientError> {
        self.get_json(&format!("/clusters/{id}"))
    }

    pub fn cluster_delete(&self, id: &str) -> Result<(), ClientError> {
        self.expect(Verb::Delete, &format!("/clusters/{id}"), None, 204)?;
        Ok(())
    }

    pub fn node_add(&self, req: &NodeAddRequest) -> Result<NodeEntry, ClientError> {
        let location = self.submit_json("/nodes", req)?;
        self.fetch_result(location)
    }

    pub fn node_info(&self, id: &str) -> Result<NodeEntry, ClientError> {
        self.get_json(&format!("/nodes/{id}"))
    }

    pub fn node_delete(&self, id: &str) -> Result<(), ClientError> {
        self.submit(Verb::Delete, &format!("/nodes/{id}"), None)?;
        Ok(())
    }

    pub fn node_set_state(&self, id: &str, state: HealthState) -> Result<NodeEntry, ClientError> {
        let body = serde_json::to_vec(&NodeStateRequest {
            state: state.to_string(),
        })?;
        self.expect(Verb::Post, &format!("/nodes/{id}/state"), Some(&body), 200)?
            .json()
    }

    pub fn device_add(&self, req: &DeviceAddRequest) -> Result<DeviceEntry, ClientError> {
        let location = self.submit_json("/devices", req)?;
        self.fetch_result(location)
    }

    pub fn device_info(&self, id: &str) -> Result<DeviceEntry, ClientError> {
        self.get_json(&format!("/devices/{id}"))
    }

    pub fn device_delete(&self, id: &str) -> Result<(), ClientError> {
        self.submit(Verb::Delete, &format!("/devices/{id}"), None)?;
        Ok(())
    }

    pub fn volume_create(&self, req: &VolumeCreateRequest) -> Result<VolumeEntry, ClientError> {
        let location = self.submit_json("/volumes", req)?;
        self.fetch_result(location)
    }

    pub fn volume_list(&self) -> Result<Vec<VolumeId>, ClientError> {
        Ok(self.get_json::<VolumeList>("/volumes")?.volumes)
    }

    pub fn volume_info(&self, id: &str) -> Result<VolumeEntry, ClientError> {
        self.get_json(&format!("/volumes/{id}"))
    }

    pub fn volume_expand(
        &self,
        id: &str,
        req: &VolumeExpandRequest,
    ) -> Result<VolumeEntry, ClientError> {
        let location = self.submit_json(&format!("/volumes/{id}/expand"), req)?;
        self.fetch_result(location)
    }

    pub fn volume_delete(&self, id: &str) -> Result<(), ClientError> {
        self.submit(Verb::Delete, &format!("/volumes/{id}"), None)?;
        Ok(())
    }

    /// Download a database export into `out`. Returns the bytes written.
    pub fn backup<W: Write>(&self, out: &mut W) -> Result<u64, ClientError> {
        let reply = self.expect(Verb::Get, "/backup/db", None, 200)?;
        out.write_all(&reply.body)?;
        Ok(reply.body.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use brickyard_store::NodeId;
    use std::sync::Arc;
    use tiny_http::{Header, Response, Server};

    /// Answers each request with the next scripted `(status, headers, body)`.
    fn scripted(replies: Vec<(u16, Vec<(&'static str, &'static str)>, String)>) -> String {
        let server = Arc::new(Server::http("127.0.0.1:0").unwrap());
        let port = server.server_addr().to_ip().unwrap().port();
        thread::spawn(move || {
            for (status, headers, body) in replies {
                let Ok(req) = server.recv() else { return };
                let mut resp = Response::from_string(body).with_status_code(status);
                for (name, value) in headers {
                    resp.add_header(Header::from_bytes(name, value).unwrap());
                }
                let _ = req.respond(resp);
            }
        });
        format!("http://127.0.0.1:{port}")
    }

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let client = Client::new("http://localhost:8080/");
        assert_eq!(client.base_url(), "http://localhost:8080");
        assert_eq!(client.url("/hello"), "http://localhost:8080/hello");
        assert_eq!(client.url("http://other/x"), "http://other/x");
    }

    #[test]
    fn polls_until_redirect() {
        let mut expected = DeviceEntry::new(NodeId::new("n1"), "/dev/sdb");
        expected.set_capacity(100);
        let url = scripted(vec![
            (202, vec![("Location", "/queue/op1")], String::new()),
            (200, vec![("X-Pending", "true"), ("Location", "/queue/op1")], String::new()),
            (200, vec![("X-Pending", "true"), ("Location", "/queue/op1")], String::new()),
            (303, vec![("Location", "/devices/d1")], String::new()),
            (200, vec![], serde_json::to_string(&expected).unwrap()),
        ]);
        let client = Client::new(&url).with_poll_interval(Duration::from_millis(10));
        let device = client
            .device_add(&DeviceAddRequest {
                node: NodeId::new("n1"),
                name: "/dev/sdb".to_owned(),
            })
            .unwrap();
        assert_eq!(device, expected);
    }

    #[test]
    fn failed_operation_carries_server_message() {
        let url = scripted(vec![
            (202, vec![("Location", "/queue/op1")], String::new()),
            (500, vec![], "command failed on m1: peer detach: busy".to_owned()),
        ]);
        let client = Client::new(&url).with_poll_interval(Duration::from_millis(10));
        let err = client.node_delete("n1").unwrap_err();
        match err {
            ClientError::OperationFailed(msg) => assert!(msg.contains("peer detach")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn sync_errors_map_to_status() {
        let url = scripted(vec![
            (409, vec![], "conflict: cluster c1 still has nodes".to_owned()),
            (404, vec![], "not found: clusters/c2".to_owned()),
        ]);
        let client = Client::new(&url);
        match client.cluster_delete("c1").unwrap_err() {
            ClientError::Status { code, message } => {
                assert_eq!(code, 409);
                assert!(message.contains("still has nodes"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(matches!(
            client.cluster_info("c2"),
            Err(ClientError::NotFound(_))
        ));
    }

    #[test]
    fn pending_past_deadline_times_out() {
        let url = scripted(vec![
            (202, vec![("Location", "/queue/op1")], String::new()),
            (200, vec![("X-Pending", "true")], String::new()),
            (200, vec![("X-Pending", "true")], String::new()),
            (200, vec![("X-Pending", "true")], String::new()),
        ]);
        let client = Client::new(&url)
            .with_poll_interval(Duration::from_millis(20))
            .with_timeout(Duration::from_millis(1));
        assert!(matches!(
            client.volume_delete("v1"),
            Err(ClientError::Timeout(_))
        ));
    }
}
