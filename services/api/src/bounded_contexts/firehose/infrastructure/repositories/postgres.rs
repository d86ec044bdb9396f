use async_trait::async_trait;
use sqlx::PgPool;

use crate::bounded_contexts::firehose::domain::{
    commit::IndexedRecord,
    repository::{CursorRepository, FirehoseRepositoryResult, RecordRepository},
};

pub struct PostgresRecordRepository {
    pool: PgPool,
}

impl PostgresRecordRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RecordRepository for PostgresRecordRepository {
    async fn upsert(&self, record: &IndexedRecord) -> FirehoseRepositoryResult<()> {
        sqlx::query(
            "INSERT INTO firehose_records (did, collection, rkey, rev, record, fingerprint, indexed_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             ON CONFLICT (did, collection, rkey) DO UPDATE SET
                rev = EXCLUDED.rev,
                record = EXCLUDED.record,
                fingerprint = EXCLUDED.fingerprint,
                indexed_at = EXCLUDED.indexed_at",
        )
        .bind(&record.did)
        .bind(&record.collection)
        .bind(&record.rkey)
        .bind(&record.rev)
        .bind(&record.record)
        .bind(&record.fingerprint)
        .bind(record.indexed_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete(
        &self,
        did: &str,
        collection: &str,
        rkey: &str,
    ) -> FirehoseRepositoryResult<()> {
        sqlx::query("DELETE FROM firehose_records WHERE did = $1 AND collection = $2 AND rkey = $3")
            .bind(did)
            .bind(collection)
            .bind(rkey)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn fingerprint_exists(&self, fingerprint: &str) -> FirehoseRepositoryResult<bool> {
        let (found,): (bool,) = sqlx::query_as(
            "SELECT EXISTS(SELECT 1 FROM firehose_records WHERE fingerprint = $1)",
        )
        .bind(fingerprint)
        .fetch_one(&self.pool)
        .await?;
        Ok(found)
    }
}

pub struct PostgresCursorRepository {
    pool: PgPool,
}

impl PostgresCursorRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CursorRepository for PostgresCursorRepository {
    async fn load(&self) -> FirehoseRepositoryResult<Option<i64>> {
        let row: Option<(i64,)> =
            sqlx::query_as("SELECT time_us FROM indexer_cursor WHERE singleton = TRUE")
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|(time_us,)| time_us))
    }

    async fn persist(&self, time_us: i64) -> FirehoseRepositoryResult<()> {
        // Monotonic at the store too: a stale writer can never move it back.
        sqlx::query(
            "INSERT INTO indexer_cursor (singleton, time_us) VALUES (TRUE, $1)
             ON CONFLICT (singleton) DO UPDATE SET time_us = GREATEST(indexer_cursor.time_us, EXCLUDED.time_us)",
        )
        .bind(time_us)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
