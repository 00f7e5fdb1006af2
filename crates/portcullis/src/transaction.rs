//! Transaction lifecycle: correlation ids, the deadline race, auditing and
//! the final write through a [`ResponseSink`].

use std::collections::BTreeMap;
use std::future::Future;
use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use http::header::{HeaderName, HeaderValue};
use http::HeaderMap;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::oneshot;

use crate::error::DispatchError;
use crate::request::RawRequest;
use crate::response::SerializedResponse;

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Headers never written to logs in clear.
const REDACTED_HEADERS: &[&str] = &["authorization", "proxy-authorization", "cookie", "set-cookie"];

/// What the live registry knows about an in-flight transaction.
#[derive(Debug, Clone)]
pub struct TransactionRecord {
    pub method: String,
    pub url: String,
    pub ip: Option<IpAddr>,
    pub start_time: SystemTime,
}

/// Live transactions by id. May be shared between managers.
pub type TransactionRegistry = Arc<DashMap<String, TransactionRecord>>;

pub fn new_registry() -> TransactionRegistry {
    Arc::new(DashMap::new())
}

/// Byte counters, shared with the build task.
#[derive(Debug, Default)]
pub struct Counters {
    bytes_read: AtomicU64,
    bytes_written: AtomicU64,
}

impl Counters {
    pub fn add_read(&self, n: usize) {
        self.bytes_read.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub fn bytes_read(&self) -> u64 {
        self.bytes_read.load(Ordering::Relaxed)
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written.load(Ordering::Relaxed)
    }
}

/// Audit entry recorded by [`TransactionManager::catch`].
#[derive(Debug, Clone, Serialize)]
pub struct ErrorRecord {
    pub kind: &'static str,
    pub status: u16,
    pub code: String,
    pub message: String,
    pub debug: Vec<String>,
    pub params: Value,
}

impl ErrorRecord {
    pub fn from_error(error: &DispatchError) -> Self {
        Self {
            kind: error.kind(),
            status: error.status().as_u16(),
            code: error.code().to_string(),
            message: error.to_string(),
            debug: error.debug_chain(),
            params: error.params(),
        }
    }
}

/// Summary emitted when a transaction ends.
#[derive(Debug, Clone, Serialize)]
pub struct CallRecord {
    pub transaction_id: String,
    pub operation_id: Option<String>,
    pub method: String,
    pub url: String,
    pub ip: Option<String>,
    /// Milliseconds since the Unix epoch.
    pub start_time: u64,
    pub duration_ms: u64,
    pub status: u16,
    pub bytes_read: u64,
    pub bytes_written: u64,
    pub errored: bool,
    pub error: Option<ErrorRecord>,
    pub request_headers: BTreeMap<String, String>,
}

/// One request/response exchange.
///
/// Owned by exactly one flow. Dropping it without [`TransactionManager::end`]
/// still frees its registry slot.
#[derive(Debug)]
pub struct Transaction {
    id: String,
    started: Instant,
    start_time: SystemTime,
    method: String,
    url: String,
    ip: Option<IpAddr>,
    headers: HeaderMap,
    counters: Arc<Counters>,
    errored: bool,
    pending_error: Option<DispatchError>,
    audit: Option<ErrorRecord>,
    registry: TransactionRegistry,
    ended: bool,
}

impl Transaction {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn counters(&self) -> Arc<Counters> {
        Arc::clone(&self.counters)
    }

    pub fn errored(&self) -> bool {
        self.errored
    }

    pub fn audit(&self) -> Option<&ErrorRecord> {
        self.audit.as_ref()
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if !self.ended {
            self.registry.remove(&self.id);
        }
    }
}

/// The sink failed to deliver the response.
#[derive(Debug, Error)]
#[error("response sink failed: {0}")]
pub struct SinkError(pub String);

/// Final destination of a serialized response.
pub trait ResponseSink: Send {
    fn send(self: Box<Self>, response: SerializedResponse) -> Result<(), SinkError>;
}

/// Sink delivering the response over a oneshot channel.
#[derive(Debug)]
pub struct OneshotSink(oneshot::Sender<SerializedResponse>);

impl OneshotSink {
    pub fn channel() -> (Self, oneshot::Receiver<SerializedResponse>) {
        let (tx, rx) = oneshot::channel();
        (Self(tx), rx)
    }
}

impl ResponseSink for OneshotSink {
    fn send(self: Box<Self>, response: SerializedResponse) -> Result<(), SinkError> {
        self.0
            .send(response)
            .map_err(|_| SinkError("receiver dropped".to_string()))
    }
}

/// Receives transaction events. Must not affect the outcome of a request.
pub trait TransactionObserver: Send + Sync {
    fn on_call(&self, record: &CallRecord);
    fn on_error(&self, transaction_id: &str, record: &ErrorRecord);
}

/// Observer emitting `CALL` and `ERROR` tracing events.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl TransactionObserver for TracingObserver {
    fn on_call(&self, record: &CallRecord) {
        let headers = serde_json::to_string(&record.request_headers).unwrap_or_default();
        portcullis_telemetry::log_call!(
            transaction_id = %record.transaction_id,
            operation_id = record.operation_id.as_deref().unwrap_or(""),
            method = %record.method,
            url = %record.url,
            ip = record.ip.as_deref().unwrap_or(""),
            status = record.status,
            duration_ms = record.duration_ms,
            bytes_read = record.bytes_read,
            bytes_written = record.bytes_written,
            errored = record.errored,
            error_code = record.error.as_ref().map(|e| e.code.as_str()).unwrap_or(""),
            headers = %headers,
            "transaction ended"
        );
    }

    fn on_error(&self, transaction_id: &str, record: &ErrorRecord) {
        portcullis_telemetry::log_error!(
            transaction_id = %transaction_id,
            kind = record.kind,
            status = record.status,
            code = %record.code,
            message = %record.message,
            debug = ?record.debug,
            "transaction failed"
        );
    }
}

/// Header map with credentials masked, for logging.
pub fn redact_headers(headers: &HeaderMap) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    for (name, value) in headers {
        let value = if REDACTED_HEADERS.contains(&name.as_str()) {
            "***".to_string()
        } else {
            String::from_utf8_lossy(value.as_bytes()).into_owned()
        };
        out.entry(name.as_str().to_string())
            .and_modify(|existing: &mut String| {
                existing.push_str(", ");
                existing.push_str(&value);
            })
            .or_insert(value);
    }
    out
}

/// Creates, races, audits and ends transactions.
#[derive(Clone)]
pub struct TransactionManager {
    registry: TransactionRegistry,
    timeout: Duration,
    header_name: String,
    observer: Arc<dyn TransactionObserver>,
}

impl std::fmt::Debug for TransactionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionManager")
            .field("live", &self.registry.len())
            .field("timeout", &self.timeout)
            .field("header_name", &self.header_name)
            .finish_non_exhaustive()
    }
}

impl TransactionManager {
    pub fn new(
        registry: TransactionRegistry,
        timeout: Duration,
        header_name: impl Into<String>,
        observer: Arc<dyn TransactionObserver>,
    ) -> Self {
        Self {
            registry,
            timeout,
            header_name: header_name.into().to_ascii_lowercase(),
            observer,
        }
    }

    pub fn registry(&self) -> &TransactionRegistry {
        &self.registry
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Register a transaction for `request`.
    ///
    /// A client-supplied id is used unless it is already live; a colliding
    /// id gets a fresh generated one and makes [`start`](Self::start) fail.
    pub fn begin(&self, request: &RawRequest) -> Transaction {
        let record = TransactionRecord {
            method: request.method.clone(),
            url: request.url.clone(),
            ip: request.remote_addr.map(|addr| addr.ip()),
            start_time: SystemTime::now(),
        };

        let requested = request
            .header(&self.header_name)
            .map(str::trim)
            .filter(|id| !id.is_empty());

        let (id, pending_error) = match requested {
            Some(requested) => {
                let claimed = match self.registry.entry(requested.to_string()) {
                    Entry::Vacant(slot) => {
                        slot.insert(record.clone());
                        true
                    }
                    Entry::Occupied(_) => false,
                };
                if claimed {
                    (requested.to_string(), None)
                } else {
                    let fresh = self.mint(&record);
                    tracing::debug!(requested = %requested, assigned = %fresh, "transaction id collision");
                    (
                        fresh,
                        Some(DispatchError::TransactionIdNotUnique {
                            transaction_id: requested.to_string(),
                        }),
                    )
                }
            }
            None => (self.mint(&record), None),
        };

        Transaction {
            id,
            started: Instant::now(),
            start_time: record.start_time,
            method: record.method,
            url: record.url,
            ip: record.ip,
            headers: request.headers.clone(),
            counters: Arc::new(Counters::default()),
            errored: false,
            pending_error,
            audit: None,
            registry: Arc::clone(&self.registry),
            ended: false,
        }
    }

    fn mint(&self, record: &TransactionRecord) -> String {
        loop {
            let id = format!("txn-{}", NEXT_ID.fetch_add(1, Ordering::Relaxed));
            if let Entry::Vacant(slot) = self.registry.entry(id.clone()) {
                slot.insert(record.clone());
                return id;
            }
        }
    }

    /// Race `build` against the deadline.
    ///
    /// `build` runs as its own task; when the deadline wins the task is left
    /// running and its result is discarded.
    pub async fn start<T, F>(&self, txn: &mut Transaction, build: F) -> Result<T, DispatchError>
    where
        T: Send + 'static,
        F: Future<Output = Result<T, DispatchError>> + Send + 'static,
    {
        if let Some(err) = txn.pending_error.take() {
            return Err(err);
        }

        let mut task = tokio::spawn(build);
        tokio::select! {
            joined = &mut task => match joined {
                Ok(result) => result,
                Err(err) => Err(DispatchError::HandlerPanic {
                    reason: panic_reason(err),
                }),
            },
            _ = tokio::time::sleep(self.timeout) => Err(DispatchError::Timeout {
                timeout_ms: u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
                transaction_id: txn.id.clone(),
            }),
        }
    }

    /// Audit `error` on the transaction and hand it back.
    pub fn catch(&self, txn: &mut Transaction, error: DispatchError) -> DispatchError {
        let record = ErrorRecord::from_error(&error);
        self.observer.on_error(&txn.id, &record);
        txn.audit = Some(record);
        error
    }

    /// Deliver the response and retire the transaction.
    ///
    /// Sink failures mark the transaction as errored and are logged only.
    pub fn end(
        &self,
        mut txn: Transaction,
        mut response: SerializedResponse,
        operation_id: Option<&str>,
        sink: Box<dyn ResponseSink>,
    ) {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(self.header_name.as_bytes()),
            HeaderValue::from_str(&txn.id),
        ) {
            response.headers.insert(name, value);
        }

        let status = response.status.as_u16();
        let written = response.body.len() as u64;

        if let Err(err) = sink.send(response) {
            txn.errored = true;
            portcullis_telemetry::log_transport_error!(
                transaction_id = %txn.id,
                error = %err,
                "failed to write response"
            );
        } else {
            txn.counters.bytes_written.fetch_add(written, Ordering::Relaxed);
        }

        let record = CallRecord {
            transaction_id: txn.id.clone(),
            operation_id: operation_id.map(str::to_string),
            method: txn.method.clone(),
            url: txn.url.clone(),
            ip: txn.ip.map(|ip| ip.to_string()),
            start_time: txn
                .start_time
                .duration_since(UNIX_EPOCH)
                .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
                .unwrap_or(0),
            duration_ms: u64::try_from(txn.started.elapsed().as_millis()).unwrap_or(u64::MAX),
            status,
            bytes_read: txn.counters.bytes_read(),
            bytes_written: txn.counters.bytes_written(),
            errored: txn.errored,
            error: txn.audit.take(),
            request_headers: redact_headers(&txn.headers),
        };
        self.observer.on_call(&record);

        self.registry.remove(&txn.id);
        txn.ended = true;
    }
}

fn panic_reason(err: tokio::task::JoinError) -> String {
    if err.is_cancelled() {
        return "task cancelled".to_string();
    }
    match err.try_into_panic() {
        Ok(payload) => payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string()),
        Err(_) => "task failed".to_string(),
    }
}
