//! Local fake provider endpoint for tests.

use std::sync::mpsc;
use std::thread;

use tiny_http::{Header, Response, Server};

/// What the fake endpoint received.
#[derive(Debug, Clone)]
pub struct CapturedRequest {
    pub method: String,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl CapturedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn body_json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.body).unwrap()
    }
}

/// A loopback HTTP server answering `count` requests with a canned response.
pub struct FakeEndpoint {
    pub base_url: String,
    captured: mpsc::Receiver<CapturedRequest>,
}

impl FakeEndpoint {
    pub fn serve(status: u16, body: &str) -> Self {
        Self::serve_n(1, status, body)
    }

    pub fn serve_n(count: usize, status: u16, body: &str) -> Self {
        let server = Server::http("127.0.0.1:0").unwrap();
        let addr = server.server_addr().to_ip().unwrap();
        let (tx, rx) = mpsc::channel();
        let body = body.to_string();

        thread::spawn(move || {
            for _ in 0..count {
                let Ok(mut request) = server.recv() else {
                    return;
                };
                let mut payload = Vec::new();
                let _ = request.as_reader().read_to_end(&mut payload);
                let captured = CapturedRequest {
                    method: request.method().to_string(),
                    url: request.url().to_string(),
                    headers: request
                        .headers()
                        .iter()
                        .map(|h| (h.field.to_string(), h.value.to_string()))
                        .collect(),
                    body: payload,
                };
                let _ = tx.send(captured);
                let content_type =
                    Header::from_bytes(&b"Content-Type"[..], &b"application/json"[..]).unwrap();
                let response = Response::from_string(body.clone())
                    .with_status_code(status)
                    .with_header(content_type);
                let _ = request.respond(response);
            }
        });

        Self {
            base_url: format!("http://{addr}"),
            captured: rx,
        }
    }

    /// The next request the endpoint received.
    pub fn request(&self) -> CapturedRequest {
        self.captured
            .recv_timeout(std::time::Duration::from_secs(10))
            .unwrap()
    }
}
