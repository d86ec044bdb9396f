use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use crate::shared::domain::errors::AppError;

use crate::bounded_contexts::firehose::domain::{
    commit::IndexedRecord,
    repository::{CursorRepository, FirehoseRepositoryResult, RecordRepository},
};

pub struct InMemoryRecordRepository {
    records: Mutex<HashMap<(String, String, String), IndexedRecord>>,
    fingerprints: Mutex<HashSet<String>>,
    upserts: AtomicU64,
    fail_next: AtomicBool,
}

impl InMemoryRecordRepository {
    pub fn new() -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            fingerprints: Mutex::new(HashSet::new()),
            upserts: AtomicU64::new(0),
            fail_next: AtomicBool::new(false),
        }
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn upsert_count(&self) -> u64 {
        self.upserts.load(Ordering::SeqCst)
    }

    /// Fault injection: the next upsert fails as a transient error.
    pub fn fail_next_upsert(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }
}

impl Default for InMemoryRecordRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RecordRepository for InMemoryRecordRepository {
    async fn upsert(&self, record: &IndexedRecord) -> FirehoseRepositoryResult<()> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(AppError::Internal("injected persistence fault".to_string()));
        }
        self.records.lock().unwrap_or_else(|e| e.into_inner()).insert(
            (
                record.did.clone(),
                record.collection.clone(),
                record.rkey.clone(),
            ),
            record.clone(),
        );
        self.fingerprints
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(record.fingerprint.clone());
        self.upserts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn delete(
        &self,
        did: &str,
        collection: &str,
        rkey: &str,
    ) -> FirehoseRepositoryResult<()> {
        self.records.lock().unwrap_or_else(|e| e.into_inner()).remove(&(
            did.to_string(),
            collection.to_string(),
            rkey.to_string(),
        ));
        Ok(())
    }

    async fn fingerprint_exists(&self, fingerprint: &str) -> FirehoseRepositoryResult<bool> {
        Ok(self
            .fingerprints
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(fingerprint))
    }
}

pub struct InMemoryCursorRepository {
    cursor: Mutex<Option<i64>>,
}

impl InMemoryCursorRepository {
    pub fn new() -> Self {
        Self {
            cursor: Mutex::new(None),
        }
    }
}

impl Default for InMemoryCursorRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CursorRepository for InMemoryCursorRepository {
    async fn load(&self) -> FirehoseRepositoryResult<Option<i64>> {
        Ok(*self.cursor.lock().unwrap_or_else(|e| e.into_inner()))
    }

    async fn persist(&self, time_us: i64) -> FirehoseRepositoryResult<()> {
        *self.cursor.lock().unwrap_or_else(|e| e.into_inner()) = Some(time_us);
        Ok(())
    }
}
