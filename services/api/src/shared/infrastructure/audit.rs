use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sha2::{Digest, Sha256};
use sqlx::PgPool;
use std::net::IpAddr;
use std::sync::Mutex;
use uuid::Uuid;

use crate::shared::domain::errors::AppError;

pub const GENESIS_HASH: &str =
    "0000000000000000000000000000000000000000000000000000000000000000";
const IP_RETENTION_DAYS: i64 = 90;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditOutcome {
    Success,
    Failure,
}

impl AuditOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditOutcome::Success => "success",
            AuditOutcome::Failure => "failure",
        }
    }

    pub fn parse(value: &str) -> Result<Self, AppError> {
        match value {
            "success" => Ok(AuditOutcome::Success),
            "failure" => Ok(AuditOutcome::Failure),
            other => Err(AppError::Validation(format!("unknown outcome: {other}"))),
        }
    }
}

/// One row of the tamper-evident log. `previous_hash` commits to every field
/// of the predecessor, including the predecessor's own `previous_hash`.
#[derive(Debug, Clone)]
pub struct AuditRecord {
    pub id: Uuid,
    pub seq: i64,
    pub actor_did: String,
    pub action: String,
    pub outcome: AuditOutcome,
    pub ip: Option<IpAddr>,
    pub detail: Option<String>,
    pub previous_hash: String,
    pub created_at: DateTime<Utc>,
}

impl AuditRecord {
    /// Hash of this row's fields chained with its own `previous_hash`; the
    /// successor stores this value. The IP column is excluded: it is the one
    /// field rewritten after the fact (retention anonymization), and hashing
    /// it would turn that rewrite into a false tamper signal.
    pub fn chain_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.actor_did.as_bytes());
        hasher.update(b":");
        hasher.update(self.action.as_bytes());
        hasher.update(b":");
        hasher.update(self.outcome.as_str().as_bytes());
        hasher.update(b":");
        hasher.update(self.detail.as_deref().unwrap_or_default().as_bytes());
        hasher.update(b":");
        hasher.update(self.created_at.to_rfc3339().as_bytes());
        hasher.update(b":");
        hasher.update(self.previous_hash.as_bytes());
        hex::encode(hasher.finalize())
    }
}

/// Zero the host bits that identify an individual: IPv4 keeps the /24, IPv6
/// keeps the /48.
pub fn anonymize_ip(ip: IpAddr) -> IpAddr {
    match ip {
        IpAddr::V4(v4) => {
            let mut octets = v4.octets();
            octets[3] = 0;
            IpAddr::from(octets)
        }
        IpAddr::V6(v6) => {
            let mut octets = v6.octets();
            for octet in octets.iter_mut().skip(6) {
                *octet = 0;
            }
            IpAddr::from(octets)
        }
    }
}

/// Walk rows in sequence order, recomputing each hash.
pub fn verify_chain(rows: &[AuditRecord]) -> Result<(), AppError> {
    let mut expected = GENESIS_HASH.to_string();
    for row in rows {
        if row.previous_hash != expected {
            return Err(AppError::Integrity(format!(
                "audit chain broken at seq {}: expected previous_hash {}, found {}",
                row.seq, expected, row.previous_hash
            )));
        }
        expected = row.chain_hash();
    }
    Ok(())
}

#[async_trait]
pub trait AuditStore: Send + Sync {
    async fn append(
        &self,
        actor_did: &str,
        action: &str,
        outcome: AuditOutcome,
        ip: Option<IpAddr>,
        detail: Option<String>,
    ) -> Result<AuditRecord, AppError>;

    async fn list_ordered(&self) -> Result<Vec<AuditRecord>, AppError>;

    /// Anonymize IPs on rows past the retention window. The chain hash does
    /// not cover the IP column, so this rewrite is hash-neutral.
    async fn anonymize_expired_ips(&self, now: DateTime<Utc>) -> Result<u64, AppError>;
}

pub struct InMemoryAuditStore {
    rows: Mutex<Vec<AuditRecord>>,
}

impl InMemoryAuditStore {
    pub fn new() -> Self {
        Self {
            rows: Mutex::new(Vec::new()),
        }
    }
}

impl Default for InMemoryAuditStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AuditStore for InMemoryAuditStore {
    async fn append(
        &self,
        actor_did: &str,
        action: &str,
        outcome: AuditOutcome,
        ip: Option<IpAddr>,
        detail: Option<String>,
    ) -> Result<AuditRecord, AppError> {
        let mut rows = self.rows.lock().unwrap_or_else(|e| e.into_inner());
        let previous_hash = rows
            .last()
            .map(AuditRecord::chain_hash)
            .unwrap_or_else(|| GENESIS_HASH.to_string());
        let record = AuditRecord {
            id: Uuid::new_v4(),
            seq: rows.len() as i64,
            actor_did: actor_did.to_string(),
            action: action.to_string(),
            outcome,
            ip,
            detail,
            previous_hash,
            created_at: Utc::now(),
        };
        rows.push(record.clone());
        Ok(record)
    }

    async fn list_ordered(&self) -> Result<Vec<AuditRecord>, AppError> {
        Ok(self.rows.lock().unwrap_or_else(|e| e.into_inner()).clone())
    }

    async fn anonymize_expired_ips(&self, now: DateTime<Utc>) -> Result<u64, AppError> {
        let cutoff = now - Duration::days(IP_RETENTION_DAYS);
        let mut rows = self.rows.lock().unwrap_or_else(|e| e.into_inner());
        let mut changed = 0;
        for row in rows.iter_mut() {
            if row.created_at < cutoff {
                if let Some(ip) = row.ip {
                    let anonymized = anonymize_ip(ip);
                    if anonymized != ip {
                        row.ip = Some(anonymized);
                        changed += 1;
                    }
                }
            }
        }
        Ok(changed)
    }
}

pub struct PostgresAuditStore {
    pool: PgPool,
}

impl PostgresAuditStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_from(
        &self,
        row: (
            Uuid,
            i64,
            String,
            String,
            String,
            Option<String>,
            Option<String>,
            String,
            DateTime<Utc>,
        ),
    ) -> Result<AuditRecord, AppError> {
        Ok(AuditRecord {
            id: row.0,
            seq: row.1,
            actor_did: row.2,
            action: row.3,
            outcome: AuditOutcome::parse(&row.4)?,
            ip: row.5.and_then(|s| s.parse().ok()),
            detail: row.6,
            previous_hash: row.7,
            created_at: row.8,
        })
    }
}

#[async_trait]
impl AuditStore for PostgresAuditStore {
    async fn append(
        &self,
        actor_did: &str,
        action: &str,
        outcome: AuditOutcome,
        ip: Option<IpAddr>,
        detail: Option<String>,
    ) -> Result<AuditRecord, AppError> {
        let mut tx = self.pool.begin().await?;

        let last: Option<(
            Uuid,
            i64,
            String,
            String,
            String,
            Option<String>,
            Option<String>,
            String,
            DateTime<Utc>,
        )> = sqlx::query_as(
            "SELECT id, seq, actor_did, action, outcome, ip, detail, previous_hash, created_at
             FROM audit_log ORDER BY seq DESC LIMIT 1 FOR UPDATE",
        )
        .fetch_optional(&mut *tx)
        .await?;

        let (previous_hash, seq) = match last {
            Some(row) => {
                let record = self.row_from(row)?;
                (record.chain_hash(), record.seq + 1)
            }
            None => (GENESIS_HASH.to_string(), 0),
        };

        let record = AuditRecord {
            id: Uuid::new_v4(),
            seq,
            actor_did: actor_did.to_string(),
            action: action.to_string(),
            outcome,
            ip,
            detail,
            previous_hash,
            created_at: Utc::now(),
        };

        sqlx::query(
            "INSERT INTO audit_log (id, seq, actor_did, action, outcome, ip, detail, previous_hash, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(record.id)
        .bind(record.seq)
        .bind(&record.actor_did)
        .bind(&record.action)
        .bind(record.outcome.as_str())
        .bind(record.ip.map(|ip| ip.to_string()))
        .bind(&record.detail)
        .bind(&record.previous_hash)
        .bind(record.created_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(record)
    }

    async fn list_ordered(&self) -> Result<Vec<AuditRecord>, AppError> {
        let rows: Vec<(
            Uuid,
            i64,
            String,
            String,
            String,
            Option<String>,
            Option<String>,
            String,
            DateTime<Utc>,
        )> = sqlx::query_as(
            "SELECT id, seq, actor_did, action, outcome, ip, detail, previous_hash, created_at
             FROM audit_log ORDER BY seq ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(|r| self.row_from(r)).collect()
    }

    async fn anonymize_expired_ips(&self, now: DateTime<Utc>) -> Result<u64, AppError> {
        let cutoff = now - Duration::days(IP_RETENTION_DAYS);
        let rows: Vec<(Uuid, Option<String>)> = sqlx::query_as(
            "SELECT id, ip FROM audit_log WHERE created_at < $1 AND ip IS NOT NULL",
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;

        let mut changed = 0;
        for (id, ip) in rows {
            let Some(parsed) = ip.as_deref().and_then(|s| s.parse::<IpAddr>().ok()) else {
                continue;
            };
            let anonymized = anonymize_ip(parsed);
            if anonymized != parsed {
                sqlx::query("UPDATE audit_log SET ip = $1 WHERE id = $2")
                    .bind(anonymized.to_string())
                    .bind(id)
                    .execute(&self.pool)
                    .await?;
                changed += 1;
            }
        }
        Ok(changed)
    }
}
