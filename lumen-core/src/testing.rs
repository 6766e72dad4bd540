//! In-memory collaborators for deterministic tests and offline tooling.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use lumen_contracts::{
    BackendError, BackendResult,
    clock::Clock,
    media::{BlobFetcher, SignedUrl, UrlResolver},
    snapshot::SnapshotStore,
    upload::{MediaRecords, ObjectStore, UploadRequest, UploadSession},
};
use lumen_model::{ByteSize, CacheKey, MediaRecord};
use parking_lot::Mutex;
use url::Url;

/// 2026-01-05 10:00:00 UTC.
pub fn fixed_now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 5, 10, 0, 0)
        .single()
        .unwrap_or_default()
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock() = now;
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut now = self.now.lock();
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

#[derive(Debug, Default)]
struct ResolverBehaviour {
    failure: Option<BackendError>,
    failing_keys: HashSet<CacheKey>,
    size_hint: Option<ByteSize>,
    delay: Option<Duration>,
}

/// Resolver that signs `https://cdn.test/<key>` and records every call.
#[derive(Debug)]
pub struct CountingResolver {
    clock: Arc<dyn Clock>,
    calls: AtomicUsize,
    log: Mutex<Vec<CacheKey>>,
    behaviour: Mutex<ResolverBehaviour>,
}

impl CountingResolver {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            calls: AtomicUsize::new(0),
            log: Mutex::new(Vec::new()),
            behaviour: Mutex::new(ResolverBehaviour::default()),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Keys in the order the resolver saw them.
    pub fn call_log(&self) -> Vec<CacheKey> {
        self.log.lock().clone()
    }

    pub fn fail_with(&self, err: BackendError) {
        self.behaviour.lock().failure = Some(err);
    }

    /// Fail only `key`, with a transport error.
    pub fn fail_key(&self, key: CacheKey) {
        self.behaviour.lock().failing_keys.insert(key);
    }

    pub fn succeed(&self) {
        let mut behaviour = self.behaviour.lock();
        behaviour.failure = None;
        behaviour.failing_keys.clear();
    }

    pub fn set_size_hint(&self, size: ByteSize) {
        self.behaviour.lock().size_hint = Some(size);
    }

    pub fn clear_size_hint(&self) {
        self.behaviour.lock().size_hint = None;
    }

    pub fn set_delay(&self, delay: Duration) {
        self.behaviour.lock().delay = Some(delay);
    }

    pub fn url_for(key: &CacheKey) -> Url {
        let raw = format!("https://cdn.test/{key}");
        Url::parse(&raw).unwrap_or_else(|_| {
            Url::parse("https://cdn.test/invalid").expect("static URL parses")
        })
    }
}

#[async_trait]
impl UrlResolver for CountingResolver {
    async fn resolve(
        &self,
        key: &CacheKey,
        expires_in: Duration,
    ) -> BackendResult<SignedUrl> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.log.lock().push(key.clone());
        let (failure, size_hint, delay) = {
            let behaviour = self.behaviour.lock();
            let failure = behaviour.failure.clone().or_else(|| {
                behaviour.failing_keys.contains(key).then(|| {
                    BackendError::Transport(format!("injected failure for {key}"))
                })
            });
            (failure, behaviour.size_hint, behaviour.delay)
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(err) = failure {
            return Err(err);
        }

        let mut url = Self::url_for(key);
        url.query_pairs_mut().append_pair("token", &call.to_string());
        let lifetime = chrono::Duration::from_std(expires_in)
            .unwrap_or_else(|_| chrono::Duration::hours(1));
        Ok(SignedUrl {
            url,
            expires_at: self.clock.now() + lifetime,
            size_hint,
        })
    }
}

/// Fetcher returning the same payload for every URL.
#[derive(Debug)]
pub struct FakeFetcher {
    payload: Vec<u8>,
    fetches: AtomicUsize,
}

impl FakeFetcher {
    pub fn new(payload: Vec<u8>) -> Self {
        Self {
            payload,
            fetches: AtomicUsize::new(0),
        }
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BlobFetcher for FakeFetcher {
    async fn fetch(&self, _url: &Url, max_bytes: u64) -> BackendResult<Vec<u8>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if self.payload.len() as u64 > max_bytes {
            return Err(BackendError::Storage(format!(
                "payload of {} bytes exceeds cap {max_bytes}",
                self.payload.len()
            )));
        }
        Ok(self.payload.clone())
    }
}

#[derive(Debug, Default)]
pub struct InMemorySnapshotStore {
    bytes: Mutex<Option<Vec<u8>>>,
}

impl InMemorySnapshotStore {
    pub fn saved(&self) -> Option<Vec<u8>> {
        self.bytes.lock().clone()
    }
}

#[async_trait]
impl SnapshotStore for InMemorySnapshotStore {
    async fn load(&self) -> BackendResult<Option<Vec<u8>>> {
        Ok(self.bytes.lock().clone())
    }

    async fn save(&self, bytes: &[u8]) -> BackendResult<()> {
        *self.bytes.lock() = Some(bytes.to_vec());
        Ok(())
    }
}

/// Media table kept in insertion order.
#[derive(Debug, Default)]
pub struct InMemoryRecords {
    records: Mutex<Vec<MediaRecord>>,
}

impl InMemoryRecords {
    pub fn with_records(records: Vec<MediaRecord>) -> Self {
        Self {
            records: Mutex::new(records),
        }
    }

    pub fn all(&self) -> Vec<MediaRecord> {
        self.records.lock().clone()
    }
}

#[async_trait]
impl MediaRecords for InMemoryRecords {
    async fn find_by_hash(&self, hash: &str) -> BackendResult<Vec<MediaRecord>> {
        Ok(self
            .records
            .lock()
            .iter()
            .filter(|r| r.content_hash.as_deref() == Some(hash))
            .cloned()
            .collect())
    }

    async fn find_by_name_and_size(
        &self,
        filename: &str,
        size_bytes: u64,
    ) -> BackendResult<Vec<MediaRecord>> {
        Ok(self
            .records
            .lock()
            .iter()
            .filter(|r| r.filename == filename && r.size_bytes == size_bytes)
            .cloned()
            .collect())
    }

    async fn recent(&self, limit: usize) -> BackendResult<Vec<MediaRecord>> {
        let mut records = self.records.lock().clone();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        records.truncate(limit);
        Ok(records)
    }

    async fn insert(&self, record: MediaRecord) -> BackendResult<MediaRecord> {
        self.records.lock().push(record.clone());
        Ok(record)
    }
}

#[derive(Debug, Default)]
struct ObjectStoreState {
    sessions: usize,
    chunks: BTreeMap<String, BTreeMap<u32, Vec<u8>>>,
    completed: Vec<String>,
    aborted: Vec<String>,
    /// Remaining injected failures per chunk index.
    chunk_failures: BTreeMap<u32, usize>,
}

/// Object store that assembles chunks in memory.
#[derive(Debug, Default)]
pub struct InMemoryObjectStore {
    state: Mutex<ObjectStoreState>,
    chunk_attempts: AtomicUsize,
}

impl InMemoryObjectStore {
    /// Fail uploads of chunk `index` the next `times` attempts.
    pub fn fail_chunk(&self, index: u32, times: usize) {
        self.state.lock().chunk_failures.insert(index, times);
    }

    pub fn chunk_attempts(&self) -> usize {
        self.chunk_attempts.load(Ordering::SeqCst)
    }

    /// Assembled bytes for a completed storage path.
    pub fn object(&self, storage_path: &str) -> Option<Vec<u8>> {
        let state = self.state.lock();
        if !state.completed.iter().any(|p| p == storage_path) {
            return None;
        }
        state
            .chunks
            .get(storage_path)
            .map(|chunks| chunks.values().flatten().copied().collect())
    }

    pub fn aborted(&self) -> Vec<String> {
        self.state.lock().aborted.clone()
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn begin_upload(
        &self,
        request: &UploadRequest,
    ) -> BackendResult<UploadSession> {
        let mut state = self.state.lock();
        state.sessions += 1;
        let storage_path =
            format!("uploads/{}/{}", state.sessions, request.filename);
        state.chunks.insert(storage_path.clone(), BTreeMap::new());
        Ok(UploadSession {
            id: format!("session-{}", state.sessions),
            storage_path,
        })
    }

    async fn upload_chunk(
        &self,
        session: &UploadSession,
        index: u32,
        bytes: &[u8],
    ) -> BackendResult<()> {
        self.chunk_attempts.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock();
        if let Some(remaining) = state.chunk_failures.get_mut(&index)
            && *remaining > 0
        {
            *remaining -= 1;
            return Err(BackendError::Transport(format!(
                "injected failure for chunk {index}"
            )));
        }
        state
            .chunks
            .entry(session.storage_path.clone())
            .or_default()
            .insert(index, bytes.to_vec());
        Ok(())
    }

    async fn complete_upload(
        &self,
        session: &UploadSession,
    ) -> BackendResult<String> {
        let mut state = self.state.lock();
        state.completed.push(session.storage_path.clone());
        Ok(session.storage_path.clone())
    }

    async fn abort_upload(&self, session: &UploadSession) -> BackendResult<()> {
        let mut state = self.state.lock();
        state.chunks.remove(&session.storage_path);
        state.aborted.push(session.storage_path.clone());
        Ok(())
    }
}
