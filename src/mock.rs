//! In-process stand-ins for the verifier and DA services.

use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use actix_web::{dev::ServerHandle, http::StatusCode, web, App, HttpRequest, HttpResponse, HttpServer};
use serde_json::Value;
use url::Url;

use crate::transport::{AuthScheme, HttpTransport, ServiceConfig, TransportConfig};

/// `(0x1111..11, 5, 7)` encoded as `(address,uint256,uint256)`.
pub const LIQUIDITY_RESPONSE: &str = concat!(
    "0x",
    "0000000000000000000000001111111111111111111111111111111111111111",
    "0000000000000000000000000000000000000000000000000000000000000005",
    "0000000000000000000000000000000000000000000000000000000000000007",
);

#[derive(Debug, Clone)]
pub struct MockReply {
    pub status: u16,
    pub body: String,
    /// Held back this long before answering.
    pub delay: Duration,
}

impl MockReply {
    pub fn json(status: u16, body: Value) -> Self {
        Self::raw(status, &body.to_string())
    }

    pub fn ok(body: Value) -> Self {
        Self::json(200, body)
    }

    pub fn raw(status: u16, body: &str) -> Self {
        Self {
            status,
            body: body.to_owned(),
            delay: Duration::ZERO,
        }
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[derive(Debug, Clone)]
pub struct Hit {
    pub path: String,
    pub headers: HashMap<String, String>,
    pub body: Value,
    pub at: Instant,
}

impl Hit {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }
}

#[derive(Default)]
pub struct MockState {
    replies: Mutex<HashMap<String, VecDeque<MockReply>>>,
    hits: Mutex<Vec<Hit>>,
}

impl MockState {
    /// Replies are served in order; the last one repeats forever.
    pub fn script(&self, path: &str, replies: Vec<MockReply>) {
        self.replies
            .lock()
            .unwrap()
            .insert(path.to_owned(), replies.into());
    }

    pub fn hits(&self) -> Vec<Hit> {
        self.hits.lock().unwrap().clone()
    }

    pub fn hits_on(&self, path: &str) -> Vec<Hit> {
        self.hits().into_iter().filter(|h| h.path == path).collect()
    }

    fn next_reply(&self, path: &str) -> MockReply {
        let mut replies = self.replies.lock().unwrap();
        match replies.get_mut(path) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap(),
            Some(queue) if !queue.is_empty() => queue[0].clone(),
            _ => MockReply::raw(500, r#"{"error":"no reply scripted"}"#),
        }
    }
}

pub struct MockServer {
    pub state: Arc<MockState>,
    pub url: Url,
    handle: ServerHandle,
}

impl MockServer {
    /// Must be called from inside an actix system, e.g. `#[actix_web::test]`.
    pub async fn start() -> Self {
        let state = Arc::new(MockState::default());
        let data = web::Data::from(state.clone());
        let server = HttpServer::new(move || {
            App::new()
                .app_data(data.clone())
                .default_service(web::to(respond))
        })
        .workers(1)
        .disable_signals()
        .bind(("127.0.0.1", 0))
        .unwrap();
        let addr = server.addrs()[0];
        let server = server.run();
        let handle = server.handle();
        actix_web::rt::spawn(server);

        Self {
            state,
            url: Url::parse(&format!("http://{addr}/")).unwrap(),
            handle,
        }
    }

    pub async fn stop(self) {
        self.handle.stop(false).await;
    }
}

async fn respond(req: HttpRequest, body: web::Bytes, state: web::Data<MockState>) -> HttpResponse {
    let headers = req
        .headers()
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_owned(), v.to_owned()))
        })
        .collect();
    state.hits.lock().unwrap().push(Hit {
        path: req.path().to_owned(),
        headers,
        body: serde_json::from_slice(&body).unwrap_or(Value::Null),
        at: Instant::now(),
    });

    let reply = state.next_reply(req.path());
    if !reply.delay.is_zero() {
        actix_web::rt::time::sleep(reply.delay).await;
    }
    HttpResponse::build(StatusCode::from_u16(reply.status).unwrap())
        .content_type("application/json")
        .body(reply.body)
}

pub fn transport(url: &Url, auth: AuthScheme, api_key: Option<&str>) -> HttpTransport {
    let service = ServiceConfig::new(url.clone()).with_auth(auth, api_key.map(str::to_owned));
    let config = TransportConfig {
        timeout: Duration::from_secs(5),
        connect_timeout: Duration::from_secs(1),
    };
    HttpTransport::new(service, &config).unwrap()
}
