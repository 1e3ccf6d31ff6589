//! A stand-in generation service for integration tests.
//!
//! Serves `POST /webhook` on an ephemeral local port and answers each prompt
//! with whatever the test's reply function returns.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::Json;
use axum::Router;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::post;

#[derive(Debug, Clone)]
pub struct MockReply {
    pub status: u16,
    pub body: String,
    pub delay: Duration,
}

impl MockReply {
    /// A well-formed reply carrying `source` as the generated program.
    pub fn program(source: &str) -> Self {
        Self {
            status: 200,
            body: serde_json::json!({ "output": source }).to_string(),
            delay: Duration::ZERO,
        }
    }

    pub fn raw(status: u16, body: &str) -> Self {
        Self {
            status,
            body: body.to_string(),
            delay: Duration::ZERO,
        }
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

type ReplyFn = Arc<dyn Fn(&str) -> MockReply + Send + Sync>;

#[derive(serde::Deserialize)]
struct WebhookBody {
    prompt: String,
}

async fn webhook(State(reply): State<ReplyFn>, Json(body): Json<WebhookBody>) -> Response {
    let reply = reply(&body.prompt);
    if !reply.delay.is_zero() {
        tokio::time::sleep(reply.delay).await;
    }
    let status = StatusCode::from_u16(reply.status).unwrap();
    (status, [(header::CONTENT_TYPE, "application/json")], reply.body).into_response()
}

/// Start the mock service and return its webhook URL.
pub async fn spawn_service<F>(reply: F) -> String
where
    F: Fn(&str) -> MockReply + Send + Sync + 'static,
{
    let reply: ReplyFn = Arc::new(reply);
    let app = Router::new().route("/webhook", post(webhook)).with_state(reply);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}/webhook", addr)
}

/// A URL nothing listens on.
pub async fn refused_endpoint() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{}/webhook", addr)
}
