//! In-process collaborators.
//!
//! Implementations of the pipeline's seams that keep everything in memory,
//! useful for:
//! - Unit and integration testing without cloud services
//! - Dry runs of the pipeline on a workstation
//!
//! All of them are cheap to share behind an `Arc` and record what they
//! were asked to do, so callers can inspect the effects afterwards.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex, MutexGuard,
    },
};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};

use crate::modules::{
    audit_log::{AuditRecord, AuditStore},
    error::{AuditError, FetchError, NotifyError, StorageError},
    fetcher::ArtifactFetcher,
    notifier::{MailTransport, OutgoingMail},
    storage_key::{Clock, StorageKey},
    storage_writer::ArtifactStore,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Clock frozen at one instant.
pub struct FixedClock {
    instant: Mutex<DateTime<Utc>>,
}

impl FixedClock {
    pub fn new(instant: DateTime<Utc>) -> Self {
        Self {
            instant: Mutex::new(instant),
        }
    }

    pub fn set(&self, instant: DateTime<Utc>) {
        *lock(&self.instant) = instant;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *lock(&self.instant)
    }
}

/// Fetcher serving canned artifacts by URL.
///
/// Unknown URLs answer like a server returning 404.
#[derive(Default)]
pub struct StaticFetcher {
    artifacts: Mutex<HashMap<String, Bytes>>,
    calls: AtomicUsize,
}

impl StaticFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_artifact(self, url: &str, data: impl Into<Bytes>) -> Self {
        lock(&self.artifacts).insert(url.to_string(), data.into());
        self
    }

    // Number of fetches attempted so far
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ArtifactFetcher for StaticFetcher {
    async fn fetch(&self, url: &str) -> Result<Bytes, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        lock(&self.artifacts)
            .get(url)
            .cloned()
            .ok_or_else(|| FetchError::Status {
                url: url.to_string(),
                status: 404,
            })
    }
}

/// Object store keeping blobs in a map.
pub struct InMemoryArtifactStore {
    bucket: String,
    objects: Mutex<HashMap<String, Bytes>>,
    // When set, every put is refused with this status
    deny_with: Option<u16>,
}

impl InMemoryArtifactStore {
    pub fn new(bucket: &str) -> Self {
        Self {
            bucket: bucket.to_string(),
            objects: Mutex::new(HashMap::new()),
            deny_with: None,
        }
    }

    // Store that refuses every write as a permission error
    pub fn denying(bucket: &str) -> Self {
        Self {
            deny_with: Some(403),
            ..Self::new(bucket)
        }
    }

    pub fn get(&self, key: &str) -> Option<Bytes> {
        lock(&self.objects).get(key).cloned()
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<_> = lock(&self.objects).keys().cloned().collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl ArtifactStore for InMemoryArtifactStore {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn put(&self, key: &StorageKey, data: Bytes) -> Result<(), StorageError> {
        if let Some(status) = self.deny_with {
            return Err(StorageError::Denied {
                status,
                message: format!("permission denied writing {}", key),
            });
        }
        lock(&self.objects).insert(key.to_string(), data);
        Ok(())
    }
}

/// Mail transport that records every message instead of sending it.
#[derive(Default)]
pub struct RecordingMailTransport {
    sent: Mutex<Vec<OutgoingMail>>,
    attempts: AtomicUsize,
    fail: bool,
}

impl RecordingMailTransport {
    pub fn new() -> Self {
        Self::default()
    }

    // Transport whose every send is rejected
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    // Messages the transport accepted
    pub fn sent(&self) -> Vec<OutgoingMail> {
        lock(&self.sent).clone()
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MailTransport for RecordingMailTransport {
    async fn send(&self, mail: &OutgoingMail) -> Result<String, NotifyError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail {
            return Err(NotifyError::Rejected {
                status: 502,
                message: "mail provider unavailable".to_string(),
            });
        }
        lock(&self.sent).push(mail.clone());
        Ok(format!("<{}@in-memory>", attempt))
    }
}

/// Audit store with the same overwrite-by-id semantics as the real table.
#[derive(Default)]
pub struct InMemoryAuditStore {
    records: Mutex<Vec<AuditRecord>>,
    fail: bool,
}

impl InMemoryAuditStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn records(&self) -> Vec<AuditRecord> {
        lock(&self.records).clone()
    }
}

#[async_trait]
impl AuditStore for InMemoryAuditStore {
    async fn put(&self, record: &AuditRecord) -> Result<(), AuditError> {
        if self.fail {
            return Err(AuditError {
                table: "in-memory".to_string(),
                message: "table unavailable".to_string(),
            });
        }
        let mut records = lock(&self.records);
        match records.iter_mut().find(|r| r.id == record.id) {
            Some(existing) => *existing = record.clone(),
            None => records.push(record.clone()),
        }
        Ok(())
    }
}
