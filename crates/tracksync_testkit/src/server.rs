//! In-memory reference implementation of the fingerprint sync backend.
//!
//! Behaves like the real service for everything the client can observe:
//! per-user sets keyed by mode, quotas, paginated diff sessions and the
//! idempotent add. Tests steer it with failure injection and read back what
//! was called.

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tracing::debug;
use tracksync_engine::{FingerprintApi, HttpResponse, SyncError, SyncResult};
use tracksync_protocol::{
    AddRequest, AddResponse, AnalyzeDiffRequest, AnalyzeDiffResponse, ApiErrorCode, ApiFailure,
    ApiResponse, BidirectionalDiffRequest, BidirectionalDiffResponse, CheckRequest,
    CheckResponse, DiffStats, Endpoint, Fingerprint, FingerprintSet, PullDiffPageRequest,
    PullDiffPageResponse, SyncMode, UserKeyInfo, ValidateKeyRequest, ValidateKeyResponse,
};

const ENDPOINTS: [Endpoint; 6] = [
    Endpoint::ValidateUserKey,
    Endpoint::Check,
    Endpoint::BidirectionalDiff,
    Endpoint::AnalyzeDiff,
    Endpoint::PullDiffPage,
    Endpoint::Add,
];

/// Server limits.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Fingerprints per pull page.
    pub page_size: u64,
    /// Largest accepted diff or add batch.
    pub max_batch: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            page_size: 1000,
            max_batch: 1000,
        }
    }
}

type IndexHook = Box<dyn Fn(u64) + Send + Sync>;

#[derive(Debug)]
struct Account {
    key: String,
    active: bool,
    limit: u64,
    sets: HashMap<SyncMode, FingerprintSet>,
}

#[derive(Debug)]
struct DiffSession {
    owner: String,
    missing: Vec<Fingerprint>,
}

#[derive(Debug, Default)]
struct Faults {
    expire_pulls: usize,
    fail_add_call: Option<usize>,
    add_calls: usize,
    fail_next: HashMap<Endpoint, ApiFailure>,
}

/// An in-memory fingerprint sync backend.
pub struct FingerprintServer {
    config: ServerConfig,
    accounts: RwLock<HashMap<String, Account>>,
    sessions: RwLock<HashMap<String, DiffSession>>,
    next_session: AtomicU64,
    faults: Mutex<Faults>,
    calls: Mutex<Vec<Endpoint>>,
    diff_hook: Mutex<Option<IndexHook>>,
    pull_hook: Mutex<Option<IndexHook>>,
    latency: Mutex<Duration>,
    offline: AtomicBool,
}

impl Default for FingerprintServer {
    fn default() -> Self {
        Self::with_config(ServerConfig::default())
    }
}

impl FingerprintServer {
    /// Creates a server with default limits.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a server with the given limits.
    pub fn with_config(config: ServerConfig) -> Self {
        Self {
            config,
            accounts: RwLock::new(HashMap::new()),
            sessions: RwLock::new(HashMap::new()),
            next_session: AtomicU64::new(1),
            faults: Mutex::new(Faults::default()),
            calls: Mutex::new(Vec::new()),
            diff_hook: Mutex::new(None),
            pull_hook: Mutex::new(None),
            latency: Mutex::new(Duration::ZERO),
            offline: AtomicBool::new(false),
        }
    }

    // Accounts

    /// Registers an active key. A `limit` of zero means unlimited.
    pub fn add_user(&self, key: &str, limit: u64) {
        let canonical = key.trim().to_lowercase();
        self.accounts.write().insert(
            canonical.clone(),
            Account {
                key: canonical,
                active: true,
                limit,
                sets: HashMap::new(),
            },
        );
    }

    /// Disables a key.
    pub fn deactivate_user(&self, key: &str) {
        if let Some(account) = self.accounts.write().get_mut(&key.trim().to_lowercase()) {
            account.active = false;
        }
    }

    /// Changes a key's quota.
    pub fn set_limit(&self, key: &str, limit: u64) {
        if let Some(account) = self.accounts.write().get_mut(&key.trim().to_lowercase()) {
            account.limit = limit;
        }
    }

    /// Adds fingerprints to a key's set without going through the API.
    pub fn seed(&self, key: &str, mode: SyncMode, set: &FingerprintSet) {
        if let Some(account) = self.accounts.write().get_mut(&key.trim().to_lowercase()) {
            account.sets.entry(mode).or_default().union_with(set);
        }
    }

    /// The set stored for a key and mode.
    pub fn fingerprints(&self, key: &str, mode: SyncMode) -> FingerprintSet {
        self.accounts
            .read()
            .get(&key.trim().to_lowercase())
            .and_then(|account| account.sets.get(&mode).cloned())
            .unwrap_or_default()
    }

    // Failure injection

    /// The next `count` pull calls report an expired session.
    pub fn expire_next_pulls(&self, count: usize) {
        self.faults.lock().expire_pulls = count;
    }

    /// The `nth` add call from now (1-based) fails.
    pub fn fail_add_call(&self, nth: usize) {
        let mut faults = self.faults.lock();
        faults.fail_add_call = Some(faults.add_calls + nth);
    }

    /// The next call to `endpoint` answers with `failure`.
    pub fn fail_next(&self, endpoint: Endpoint, failure: ApiFailure) {
        self.faults.lock().fail_next.insert(endpoint, failure);
    }

    /// Makes every call fail at the transport level.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Delays every call by `latency` of real time.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = latency;
    }

    /// Calls `hook` with the batch index before answering each diff batch.
    pub fn on_diff_batch(&self, hook: impl Fn(u64) + Send + Sync + 'static) {
        *self.diff_hook.lock() = Some(Box::new(hook));
    }

    /// Calls `hook` with the page index before answering each pull.
    pub fn on_pull_page(&self, hook: impl Fn(u64) + Send + Sync + 'static) {
        *self.pull_hook.lock() = Some(Box::new(hook));
    }

    // Accounting

    /// Every call received, in order.
    pub fn calls(&self) -> Vec<Endpoint> {
        self.calls.lock().clone()
    }

    /// Calls received for one endpoint.
    pub fn call_count(&self, endpoint: Endpoint) -> usize {
        self.calls.lock().iter().filter(|e| **e == endpoint).count()
    }

    /// Session ids issued so far.
    pub fn sessions_opened(&self) -> u64 {
        self.next_session.load(Ordering::SeqCst) - 1
    }

    /// Handles a raw JSON POST, as the HTTP front end would.
    pub async fn handle_post(&self, path: &str, body: &[u8]) -> SyncResult<HttpResponse> {
        let Some(endpoint) = ENDPOINTS.into_iter().find(|e| path.ends_with(e.path())) else {
            return Ok(HttpResponse {
                status: 404,
                body: b"Not Found".to_vec(),
            });
        };

        match endpoint {
            Endpoint::ValidateUserKey => {
                route(body, |req: ValidateKeyRequest| async move {
                    self.validate_user_key(&req).await
                })
                .await
            }
            Endpoint::Check => {
                route(body, |req: CheckRequest| async move { self.check(&req).await }).await
            }
            Endpoint::BidirectionalDiff => {
                route(body, |req: BidirectionalDiffRequest| async move {
                    self.bidirectional_diff(&req).await
                })
                .await
            }
            Endpoint::AnalyzeDiff => {
                route(body, |req: AnalyzeDiffRequest| async move {
                    self.analyze_diff(&req).await
                })
                .await
            }
            Endpoint::PullDiffPage => {
                route(body, |req: PullDiffPageRequest| async move {
                    self.pull_diff_page(&req).await
                })
                .await
            }
            Endpoint::Add => {
                route(body, |req: AddRequest| async move { self.add(&req).await }).await
            }
        }
    }

    async fn enter(&self, endpoint: Endpoint) -> SyncResult<Option<ApiFailure>> {
        self.calls.lock().push(endpoint);

        let latency = *self.latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        if self.offline.load(Ordering::SeqCst) {
            return Err(SyncError::transport_retryable("connection refused"));
        }
        Ok(self.faults.lock().fail_next.remove(&endpoint))
    }

    fn authorize(&self, key: &str) -> Result<String, ApiFailure> {
        let accounts = self.accounts.read();
        match accounts.get(&key.trim().to_lowercase()) {
            None => Err(failure(ApiErrorCode::UserKeyNotFound, "user key not found", 401)),
            Some(account) if !account.active => {
                Err(failure(ApiErrorCode::UserKeyInactive, "user key is disabled", 403))
            }
            Some(account) => Ok(account.key.clone()),
        }
    }

    fn stored(&self, key: &str, mode: SyncMode) -> (FingerprintSet, u64) {
        let accounts = self.accounts.read();
        accounts
            .get(key)
            .map(|account| {
                (
                    account.sets.get(&mode).cloned().unwrap_or_default(),
                    account.limit,
                )
            })
            .unwrap_or_default()
    }

    fn do_validate(&self, request: &ValidateKeyRequest) -> ApiResponse<ValidateKeyResponse> {
        let accounts = self.accounts.read();
        match accounts.get(&request.user_key.trim().to_lowercase()) {
            None => ApiResponse::Failure(failure(
                ApiErrorCode::UserKeyNotFound,
                "user key not found",
                404,
            )),
            Some(account) => ApiResponse::Success(ValidateKeyResponse {
                data: UserKeyInfo {
                    user_key: Some(account.key.clone()),
                    is_active: account.active,
                },
                limit: Some(account.limit),
            }),
        }
    }

    fn do_check(&self, request: &CheckRequest) -> Result<CheckResponse, ApiFailure> {
        let key = self.authorize(&request.user_key)?;
        let (set, limit) = self.stored(&key, request.mode);
        Ok(CheckResponse {
            server_count: set.len() as u64,
            client_count: request.count,
            limit,
            need_sync: set.collection_hash() != request.hash.to_lowercase(),
        })
    }

    fn do_diff(
        &self,
        request: &BidirectionalDiffRequest,
    ) -> Result<BidirectionalDiffResponse, ApiFailure> {
        let key = self.authorize(&request.user_key)?;
        if let Some(hook) = self.diff_hook.lock().as_ref() {
            hook(u64::from(request.batch_index));
        }
        if request.client_fingerprints.len() > self.config.max_batch {
            return Err(failure(
                ApiErrorCode::RequestTooLarge,
                "batch exceeds server maximum",
                413,
            ));
        }

        let (set, _) = self.stored(&key, request.mode);
        let server_missing_fingerprints = request
            .client_fingerprints
            .iter()
            .filter(|fp| !set.contains(fp))
            .cloned()
            .collect();
        Ok(BidirectionalDiffResponse {
            server_missing_fingerprints,
        })
    }

    fn do_analyze(&self, request: &AnalyzeDiffRequest) -> Result<AnalyzeDiffResponse, ApiFailure> {
        let key = self.authorize(&request.user_key)?;
        let (set, _) = self.stored(&key, request.mode);
        let client: FingerprintSet = request.client_fingerprints.iter().cloned().collect();
        let missing = set.difference(&client).to_vec();

        let id = format!("diff-{}", self.next_session.fetch_add(1, Ordering::SeqCst));
        let client_missing_count = missing.len() as u64;
        self.sessions.write().insert(
            id.clone(),
            DiffSession {
                owner: key,
                missing,
            },
        );
        debug!(session = %id, client_missing_count, "diff session opened");

        Ok(AnalyzeDiffResponse {
            diff_session_id: id,
            diff_stats: DiffStats {
                client_missing_count,
                page_size: self.config.page_size,
            },
        })
    }

    fn do_pull(&self, request: &PullDiffPageRequest) -> Result<PullDiffPageResponse, ApiFailure> {
        let key = self.authorize(&request.user_key)?;
        if let Some(hook) = self.pull_hook.lock().as_ref() {
            hook(request.page_index);
        }

        {
            let mut faults = self.faults.lock();
            if faults.expire_pulls > 0 {
                faults.expire_pulls -= 1;
                self.sessions.write().remove(&request.diff_session_id);
            }
        }

        let sessions = self.sessions.read();
        let session = sessions.get(&request.diff_session_id).ok_or_else(|| {
            failure(
                ApiErrorCode::DiffSessionNotFound,
                "diff session not found or expired",
                404,
            )
        })?;
        if session.owner != key {
            return Err(failure(
                ApiErrorCode::DiffSessionUserMismatch,
                "diff session belongs to another user",
                403,
            ));
        }

        let page_size = usize::try_from(self.config.page_size.max(1)).unwrap_or(usize::MAX);
        let start = usize::try_from(request.page_index)
            .unwrap_or(usize::MAX)
            .saturating_mul(page_size);
        let missing_fingerprints = session
            .missing
            .iter()
            .skip(start)
            .take(page_size)
            .cloned()
            .collect();
        Ok(PullDiffPageResponse {
            missing_fingerprints,
        })
    }

    fn do_add(&self, request: &AddRequest) -> Result<AddResponse, ApiFailure> {
        let key = self.authorize(&request.user_key)?;
        {
            let mut faults = self.faults.lock();
            faults.add_calls += 1;
            if faults.fail_add_call == Some(faults.add_calls) {
                return Err(failure(
                    ApiErrorCode::ValidationError,
                    "injected add failure",
                    500,
                ));
            }
        }
        if request.add_fingerprints.len() > self.config.max_batch {
            return Err(failure(
                ApiErrorCode::RequestTooLarge,
                "batch exceeds server maximum",
                413,
            ));
        }

        let mut accounts = self.accounts.write();
        let Some(account) = accounts.get_mut(&key) else {
            return Err(failure(ApiErrorCode::UserKeyNotFound, "user key not found", 401));
        };
        let set = account.sets.entry(request.mode).or_default();
        let incoming: FingerprintSet = request.add_fingerprints.iter().cloned().collect();
        let new_count = incoming.difference(set).len() as u64;

        if account.limit > 0 && set.len() as u64 + new_count > account.limit {
            return Err(failure(
                ApiErrorCode::FingerprintLimitExceeded,
                "fingerprint limit exceeded",
                403,
            ));
        }

        set.union_with(&incoming);
        Ok(AddResponse {
            added_count: new_count,
            duplicate_count: request.add_fingerprints.len() as u64 - new_count,
        })
    }
}

fn failure(code: ApiErrorCode, message: &str, status: u16) -> ApiFailure {
    ApiFailure::new(code.as_str(), message).with_status(status)
}

fn envelope<T>(result: Result<T, ApiFailure>) -> ApiResponse<T> {
    match result {
        Ok(payload) => ApiResponse::Success(payload),
        Err(failure) => ApiResponse::Failure(failure),
    }
}

/// Decodes a request body, runs `handler` and encodes the envelope.
async fn route<Req, Res, F, Fut>(body: &[u8], handler: F) -> SyncResult<HttpResponse>
where
    Req: DeserializeOwned,
    Res: Serialize,
    F: FnOnce(Req) -> Fut,
    Fut: Future<Output = SyncResult<ApiResponse<Res>>>,
{
    let request = match serde_json::from_slice::<Req>(body) {
        Ok(request) => request,
        Err(e) => {
            let rejected = failure(ApiErrorCode::ValidationError, &e.to_string(), 400);
            return Ok(encode_failure(&rejected));
        }
    };

    match handler(request).await? {
        ApiResponse::Success(payload) => {
            let mut value = serde_json::to_value(payload).unwrap_or_default();
            if let Some(object) = value.as_object_mut() {
                object.insert("success".into(), serde_json::Value::Bool(true));
            }
            Ok(HttpResponse {
                status: 200,
                body: serde_json::to_vec(&value).unwrap_or_default(),
            })
        }
        ApiResponse::Failure(failure) => Ok(encode_failure(&failure)),
    }
}

fn encode_failure(failure: &ApiFailure) -> HttpResponse {
    HttpResponse {
        status: failure.status.unwrap_or(400),
        body: serde_json::to_vec(&failure.raw).unwrap_or_default(),
    }
}

#[async_trait]
impl FingerprintApi for FingerprintServer {
    async fn validate_user_key(
        &self,
        request: &ValidateKeyRequest,
    ) -> SyncResult<ApiResponse<ValidateKeyResponse>> {
        if let Some(injected) = self.enter(Endpoint::ValidateUserKey).await? {
            return Ok(ApiResponse::Failure(injected));
        }
        Ok(self.do_validate(request))
    }

    async fn check(&self, request: &CheckRequest) -> SyncResult<ApiResponse<CheckResponse>> {
        if let Some(injected) = self.enter(Endpoint::Check).await? {
            return Ok(ApiResponse::Failure(injected));
        }
        Ok(envelope(self.do_check(request)))
    }

    async fn bidirectional_diff(
        &self,
        request: &BidirectionalDiffRequest,
    ) -> SyncResult<ApiResponse<BidirectionalDiffResponse>> {
        if let Some(injected) = self.enter(Endpoint::BidirectionalDiff).await? {
            return Ok(ApiResponse::Failure(injected));
        }
        Ok(envelope(self.do_diff(request)))
    }

    async fn analyze_diff(
        &self,
        request: &AnalyzeDiffRequest,
    ) -> SyncResult<ApiResponse<AnalyzeDiffResponse>> {
        if let Some(injected) = self.enter(Endpoint::AnalyzeDiff).await? {
            return Ok(ApiResponse::Failure(injected));
        }
        Ok(envelope(self.do_analyze(request)))
    }

    async fn pull_diff_page(
        &self,
        request: &PullDiffPageRequest,
    ) -> SyncResult<ApiResponse<PullDiffPageResponse>> {
        if let Some(injected) = self.enter(Endpoint::PullDiffPage).await? {
            return Ok(ApiResponse::Failure(injected));
        }
        Ok(envelope(self.do_pull(request)))
    }

    async fn add(&self, request: &AddRequest) -> SyncResult<ApiResponse<AddResponse>> {
        if let Some(injected) = self.enter(Endpoint::Add).await? {
            return Ok(ApiResponse::Failure(injected));
        }
        Ok(envelope(self.do_add(request)))
    }
}
