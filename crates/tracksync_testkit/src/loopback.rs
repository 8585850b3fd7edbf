//! HTTP client that routes requests straight into a [`FingerprintServer`].
//!
//! Lets tests drive the real [`HttpApi`](tracksync_engine::HttpApi) encoding
//! and envelope handling without a socket.

use crate::server::FingerprintServer;
use async_trait::async_trait;
use std::sync::Arc;
use tracksync_engine::{HttpClient, HttpResponse, SyncResult};

/// An [`HttpClient`] backed by an in-process server.
#[derive(Clone)]
pub struct LoopbackClient {
    server: Arc<FingerprintServer>,
    expected_bearer: Option<String>,
}

impl LoopbackClient {
    /// Creates a client that accepts any bearer token.
    pub fn new(server: Arc<FingerprintServer>) -> Self {
        Self {
            server,
            expected_bearer: None,
        }
    }

    /// Rejects requests whose bearer token differs from `secret` with 401.
    pub fn with_expected_bearer(mut self, secret: impl Into<String>) -> Self {
        self.expected_bearer = Some(secret.into());
        self
    }

    /// The server behind this client.
    pub fn server(&self) -> &Arc<FingerprintServer> {
        &self.server
    }
}

#[async_trait]
impl HttpClient for LoopbackClient {
    async fn post_json(&self, url: &str, bearer: &str, body: Vec<u8>) -> SyncResult<HttpResponse> {
        if let Some(expected) = &self.expected_bearer {
            if expected != bearer {
                return Ok(HttpResponse {
                    status: 401,
                    body: b"Unauthorized".to_vec(),
                });
            }
        }

        let path = url
            .split_once("://")
            .and_then(|(_, rest)| rest.find('/').map(|at| &rest[at..]))
            .unwrap_or(url);
        self.server.handle_post(path, &body).await
    }
}
