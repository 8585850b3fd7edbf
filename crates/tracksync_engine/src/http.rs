//! HTTP transport implementation.
//!
//! [`HttpApi`] speaks the JSON envelope protocol over any [`HttpClient`].
//! [`ReqwestClient`] is the production client; tests plug in canned or
//! loopback clients instead.

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::transport::FingerprintApi;
use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, error};
use tracksync_protocol::{
    AddRequest, AddResponse, AnalyzeDiffRequest, AnalyzeDiffResponse, ApiFailure, ApiResponse,
    BidirectionalDiffRequest, BidirectionalDiffResponse, CheckRequest, CheckResponse, Endpoint,
    ProtocolError, PullDiffPageRequest, PullDiffPageResponse, ValidateKeyRequest,
    ValidateKeyResponse,
};

/// A raw HTTP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// Status code.
    pub status: u16,
    /// Body bytes.
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// True for 2xx statuses.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// HTTP client abstraction.
///
/// Any status code is a successful exchange; only failures to get a response
/// at all are errors.
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// POSTs a JSON body with bearer authentication.
    async fn post_json(&self, url: &str, bearer: &str, body: Vec<u8>) -> SyncResult<HttpResponse>;
}

/// [`HttpClient`] backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct ReqwestClient {
    client: reqwest::Client,
}

impl ReqwestClient {
    /// Creates a client with a per-request timeout.
    pub fn new(timeout: Duration) -> SyncResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SyncError::transport_fatal(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }
}

fn classify(err: reqwest::Error) -> SyncError {
    if err.is_timeout() {
        SyncError::transport_retryable(format!("request timed out: {err}"))
    } else if err.is_connect() {
        SyncError::transport_retryable(format!("connection failed: {err}"))
    } else {
        SyncError::transport_fatal(err.to_string())
    }
}

#[async_trait]
impl HttpClient for ReqwestClient {
    async fn post_json(&self, url: &str, bearer: &str, body: Vec<u8>) -> SyncResult<HttpResponse> {
        let response = self
            .client
            .post(url)
            .bearer_auth(bearer)
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(classify)?;

        let status = response.status().as_u16();
        let body = response.bytes().await.map_err(classify)?;
        Ok(HttpResponse {
            status,
            body: body.to_vec(),
        })
    }
}

/// The remote fingerprint API over HTTP.
pub struct HttpApi<C: HttpClient = ReqwestClient> {
    config: SyncConfig,
    client: C,
}

impl HttpApi<ReqwestClient> {
    /// Builds a `reqwest`-backed API from configuration.
    pub fn from_config(config: &SyncConfig) -> SyncResult<Self> {
        let client = ReqwestClient::new(config.request_timeout)?;
        Ok(Self::new(config, client))
    }
}

impl<C: HttpClient> HttpApi<C> {
    /// Creates an API over the given client.
    pub fn new(config: &SyncConfig, client: C) -> Self {
        Self {
            config: config.clone(),
            client,
        }
    }

    async fn post<Req, Res>(&self, endpoint: Endpoint, request: &Req) -> SyncResult<ApiResponse<Res>>
    where
        Req: Serialize + Sync,
        Res: DeserializeOwned,
    {
        let body = serde_json::to_vec(request).map_err(ProtocolError::from)?;
        let url = self.config.endpoint_url(endpoint);

        let response = self
            .client
            .post_json(&url, &self.config.api_secret, body)
            .await?;
        debug!(
            endpoint = endpoint.path(),
            status = response.status,
            bytes = response.body.len(),
            "response received"
        );

        match ApiResponse::decode(&response.body, Some(response.status)) {
            Ok(decoded) => Ok(decoded),
            // Proxies and crashed handlers answer with HTML or nothing.
            Err(_) if !response.is_success() => Ok(ApiResponse::Failure(ApiFailure::from_http(
                response.status,
                &response.body,
            ))),
            Err(e) => {
                error!(
                    endpoint = endpoint.path(),
                    status = response.status,
                    error = %e,
                    "undecodable response"
                );
                Err(e.into())
            }
        }
    }
}

#[async_trait]
impl<C: HttpClient> FingerprintApi for HttpApi<C> {
    async fn validate_user_key(
        &self,
        request: &ValidateKeyRequest,
    ) -> SyncResult<ApiResponse<ValidateKeyResponse>> {
        self.post(Endpoint::ValidateUserKey, request).await
    }

    async fn check(&self, request: &CheckRequest) -> SyncResult<ApiResponse<CheckResponse>> {
        self.post(Endpoint::Check, request).await
    }

    async fn bidirectional_diff(
        &self,
        request: &BidirectionalDiffRequest,
    ) -> SyncResult<ApiResponse<BidirectionalDiffResponse>> {
        self.post(Endpoint::BidirectionalDiff, request).await
    }

    async fn analyze_diff(
        &self,
        request: &AnalyzeDiffRequest,
    ) -> SyncResult<ApiResponse<AnalyzeDiffResponse>> {
        self.post(Endpoint::AnalyzeDiff, request).await
    }

    async fn pull_diff_page(
        &self,
        request: &PullDiffPageRequest,
    ) -> SyncResult<ApiResponse<PullDiffPageResponse>> {
        self.post(Endpoint::PullDiffPage, request).await
    }

    async fn add(&self, request: &AddRequest) -> SyncResult<ApiResponse<AddResponse>> {
        self.post(Endpoint::Add, request).await
    }
}
