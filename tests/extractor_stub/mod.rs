use std::collections::HashMap;
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use serde_json::{Value, json};

/// Serves a fixed catalog page and per-URL product payloads.
///
/// `POST /catalog` answers with `links`; `GET /product?url=..` answers with
/// the configured payload, or 500 for URLs listed in `failing`.
pub struct ExtractorStub {
    pub base_url: String,
    pub product_requests: Arc<Mutex<Vec<String>>>,
    shutdown_tx: Option<mpsc::Sender<()>>,
    handle: Option<thread::JoinHandle<()>>,
}

#[derive(Debug, Clone, Default)]
pub struct ExtractorStubConfig {
    pub links: Vec<String>,
    pub products: HashMap<String, Value>,
    pub failing: Vec<String>,
}

impl ExtractorStubConfig {
    pub fn with_product(
        mut self,
        url: &str,
        name: &str,
        price_to_show: f64,
        price: f64,
    ) -> Self {
        self.products.insert(
            url.to_string(),
            json!([{
                "id": url.rsplit('/').next().unwrap_or(url),
                "name": name,
                "url": url,
                "priceToShow": price_to_show,
                "price": price,
                "isAvailable": true,
                "quantity": 3,
                "images": [format!("{url}.jpg")],
                "params": [{"name": "Color", "value": "Red"}],
            }]),
        );
        self
    }
}

impl ExtractorStub {
    pub fn spawn(config: ExtractorStubConfig) -> Self {
        let server = tiny_http::Server::http("127.0.0.1:0").expect("start extractor stub server");
        let addr = server.server_addr();
        let base_url = format!("http://{addr}");
        let product_requests = Arc::new(Mutex::new(Vec::new()));
        let recorded = Arc::clone(&product_requests);

        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

        let handle = thread::spawn(move || {
            loop {
                if shutdown_rx.try_recv().is_ok() {
                    break;
                }

                let request = match server.recv_timeout(Duration::from_millis(50)) {
                    Ok(Some(req)) => req,
                    Ok(None) => continue,
                    Err(_) => break,
                };

                let full = format!("http://stub{}", request.url());
                let parsed = url::Url::parse(&full).expect("parse request url");
                let (status, body) = match (request.method(), parsed.path()) {
                    (tiny_http::Method::Post, "/catalog") => {
                        (200, json!({ "links": config.links }).to_string())
                    }
                    (tiny_http::Method::Get, "/product") => {
                        let target = parsed
                            .query_pairs()
                            .find(|(k, _)| k == "url")
                            .map(|(_, v)| v.into_owned())
                            .unwrap_or_default();
                        recorded.lock().unwrap().push(target.clone());
                        if config.failing.contains(&target) {
                            (500, "extraction crashed".to_string())
                        } else {
                            let payload = config.products.get(&target).cloned();
                            (200, payload.unwrap_or_else(|| json!([])).to_string())
                        }
                    }
                    _ => (404, "not found".to_string()),
                };

                let header = tiny_http::Header::from_bytes("Content-Type", "application/json")
                    .expect("content-type header");
                let _ = request.respond(
                    tiny_http::Response::from_string(body)
                        .with_status_code(status)
                        .with_header(header),
                );
            }
        });

        Self {
            base_url,
            product_requests,
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        }
    }
}

impl Drop for ExtractorStub {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
