use std::collections::VecDeque;
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use serde_json::{Value, json};

/// One request seen by the stub, in arrival order.
#[derive(Debug, Clone)]
pub struct Recorded {
    pub method: String,
    pub path: String,
    pub query: String,
    pub authorization: String,
    pub body: Value,
}

#[derive(Debug, Clone)]
pub struct ProviderStubConfig {
    /// Returned as the repository `clone_url`; tests point it at a local bare repo.
    pub clone_url: String,
    /// Status and body for `POST /user/repos` instead of a created repository.
    pub repo_failure: Option<(u16, Value)>,
    /// Successive `readyState`s for the deployment; the last one repeats.
    pub deployment_states: Vec<&'static str>,
    pub alias_status: u16,
}

impl ProviderStubConfig {
    pub fn new(clone_url: impl Into<String>) -> Self {
        Self {
            clone_url: clone_url.into(),
            repo_failure: None,
            deployment_states: vec!["READY"],
            alias_status: 200,
        }
    }
}

/// Fake GitHub and Vercel REST APIs on one port.
pub struct ProviderStub {
    pub base_url: String,
    pub requests: Arc<Mutex<Vec<Recorded>>>,
    shutdown_tx: Option<mpsc::Sender<()>>,
    handle: Option<thread::JoinHandle<()>>,
}

impl ProviderStub {
    pub fn spawn(config: ProviderStubConfig) -> Self {
        let server = tiny_http::Server::http("127.0.0.1:0").expect("start provider stub server");
        let addr = server.server_addr();
        let base_url = format!("http://{addr}");
        let requests = Arc::new(Mutex::new(Vec::new()));
        let recorded = Arc::clone(&requests);

        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

        let handle = thread::spawn(move || {
            let mut states = config
                .deployment_states
                .iter()
                .copied()
                .collect::<VecDeque<_>>();

            loop {
                if shutdown_rx.try_recv().is_ok() {
                    break;
                }

                let mut request = match server.recv_timeout(Duration::from_millis(50)) {
                    Ok(Some(req)) => req,
                    Ok(None) => continue,
                    Err(_) => break,
                };

                let url = request.url().to_string();
                let (path, query) = match url.split_once('?') {
                    Some((path, query)) => (path.to_string(), query.to_string()),
                    None => (url.clone(), String::new()),
                };
                let authorization = request
                    .headers()
                    .iter()
                    .find(|h| h.field.equiv("Authorization"))
                    .map(|h| h.value.as_str().to_string())
                    .unwrap_or_default();
                let mut raw = String::new();
                let _ = request.as_reader().read_to_string(&mut raw);
                let body = serde_json::from_str(&raw).unwrap_or(Value::Null);
                let method = request.method().to_string();

                recorded.lock().unwrap().push(Recorded {
                    method: method.clone(),
                    path: path.clone(),
                    query,
                    authorization,
                    body: body.clone(),
                });

                let (status, response) = match (method.as_str(), path.as_str()) {
                    ("POST", "/user/repos") => match &config.repo_failure {
                        Some((status, body)) => (*status, body.clone()),
                        None => {
                            let name = body["name"].as_str().unwrap_or_default();
                            (
                                201,
                                json!({
                                    "id": 7,
                                    "name": name,
                                    "full_name": format!("octo/{name}"),
                                    "clone_url": config.clone_url,
                                    "html_url": format!("https://github.com/octo/{name}"),
                                    "owner": {"login": "octo"},
                                    "private": body["private"],
                                }),
                            )
                        }
                    },
                    ("GET", "/user/repos") => (200, json!([{"id": 1, "name": "blog"}])),
                    ("POST", "/v11/projects") => (
                        200,
                        json!({
                            "id": "prj_stub",
                            "name": body["name"],
                            "link": {"type": "github", "org": "octo", "repo": "My-Shop"},
                        }),
                    ),
                    ("POST", "/v10/projects/prj_stub/env") => {
                        let created = body.as_array().cloned().unwrap_or_default();
                        (200, json!({"created": created, "failed": []}))
                    }
                    ("POST", "/v13/deployments") => (
                        200,
                        json!({"id": "dpl_stub", "readyState": "QUEUED", "url": "my-shop-x.vercel.app"}),
                    ),
                    ("GET", "/v13/deployments/dpl_stub") => {
                        let state = if states.len() > 1 {
                            states.pop_front().unwrap_or("READY")
                        } else {
                            states.front().copied().unwrap_or("READY")
                        };
                        (
                            200,
                            json!({"id": "dpl_stub", "readyState": state, "url": "my-shop-x.vercel.app"}),
                        )
                    }
                    ("POST", "/v2/deployments/dpl_stub/aliases") => {
                        if config.alias_status == 200 {
                            (200, json!({"uid": "al_1", "alias": body["alias"]}))
                        } else {
                            (
                                config.alias_status,
                                json!({"error": {"code": "not_available", "message": "alias is taken"}}),
                            )
                        }
                    }
                    _ => (404, json!({"message": "Not Found"})),
                };

                let header = tiny_http::Header::from_bytes("Content-Type", "application/json")
                    .expect("content-type header");
                let _ = request.respond(
                    tiny_http::Response::from_string(response.to_string())
                        .with_status_code(status)
                        .with_header(header),
                );
            }
        });

        Self {
            base_url,
            requests,
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .map(|r| format!("{} {}", r.method, r.path))
            .collect()
    }

    pub fn find(&self, method: &str, path: &str) -> Option<Recorded> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.method == method && r.path == path)
            .cloned()
    }
}

impl Drop for ProviderStub {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
