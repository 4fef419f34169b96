//! Durable pre-migration checkpoints.
//!
//! A checkpoint captures the original encrypted payload of every record a
//! migration is about to touch, before the first mutation. Checkpoints are
//! append-only: once written they are never modified, and the engine never
//! deletes them — retention is the caller's concern.

use crate::error::{StorageError, StorageResult};
use crate::record_store::millis_to_datetime;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use duckdb::{params, Connection};
use medrec_types::{CheckpointId, MemberId, MigrationId, RecordId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

/// One record's original encrypted state, as captured at checkpoint time.
///
/// Restoring writes `payload` back verbatim at `schema_version`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointedRecord {
    pub record_id: RecordId,
    pub schema_version: u32,
    pub payload: Vec<u8>,
}

/// Checkpoint metadata, without the snapshot itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointMeta {
    pub id: CheckpointId,
    pub migration_id: MigrationId,
    pub member_id: MemberId,
    pub schema_id: String,
    pub record_count: usize,
    pub created_at: DateTime<Utc>,
}

/// Durable rollback points for migrations.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Writes a snapshot of the given records under a fresh checkpoint id.
    ///
    /// The write is all-or-nothing: either the whole snapshot is durably
    /// committed, or nothing is.
    async fn save(
        &self,
        migration_id: MigrationId,
        member_id: MemberId,
        schema_id: &str,
        original_records: &[CheckpointedRecord],
    ) -> StorageResult<CheckpointId>;

    /// Returns the captured records, byte-identical to what was saved.
    async fn restore(&self, checkpoint_id: CheckpointId) -> StorageResult<Vec<CheckpointedRecord>>;

    /// Checkpoints belonging to one member, newest first.
    async fn list_for_member(&self, member_id: MemberId) -> StorageResult<Vec<CheckpointMeta>>;
}

/// Checkpoint store backed by DuckDB.
///
/// Each checkpoint is a single row whose `snapshot` column holds the
/// serialized record set, so one INSERT commits the whole snapshot.
#[derive(Clone)]
pub struct DuckCheckpointStore {
    conn: Arc<Mutex<Connection>>,
}

impl DuckCheckpointStore {
    /// Opens or creates a checkpoint store at the given path.
    pub fn open(path: &Path) -> StorageResult<Self> {
        let conn = crate::open_duckdb_with_wal_recovery(path, "128MB", 1)?;
        initialize_checkpoint_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Opens an in-memory checkpoint store (for testing).
    pub fn open_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        initialize_checkpoint_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }
}

#[async_trait]
impl CheckpointStore for DuckCheckpointStore {
    async fn save(
        &self,
        migration_id: MigrationId,
        member_id: MemberId,
        schema_id: &str,
        original_records: &[CheckpointedRecord],
    ) -> StorageResult<CheckpointId> {
        let checkpoint_id = CheckpointId::new();
        let snapshot = serde_json::to_vec(original_records)?;

        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
            INSERT INTO checkpoints (
                id, migration_id, member_id, schema_id, record_count, created_at, snapshot
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
            params![
                checkpoint_id.to_string(),
                migration_id.to_string(),
                member_id.to_string(),
                schema_id,
                original_records.len() as i64,
                Utc::now().timestamp_millis(),
                snapshot,
            ],
        )?;
        Ok(checkpoint_id)
    }

    async fn restore(&self, checkpoint_id: CheckpointId) -> StorageResult<Vec<CheckpointedRecord>> {
        let conn = self.conn.lock().unwrap();
        let result = conn.query_row(
            "SELECT snapshot FROM checkpoints WHERE id = ?",
            params![checkpoint_id.to_string()],
            |row| row.get::<_, Vec<u8>>(0),
        );

        match result {
            Ok(snapshot) => Ok(serde_json::from_slice(&snapshot)?),
            Err(duckdb::Error::QueryReturnedNoRows) => {
                Err(StorageError::CheckpointNotFound(checkpoint_id))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn list_for_member(&self, member_id: MemberId) -> StorageResult<Vec<CheckpointMeta>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, migration_id, member_id, schema_id, record_count, created_at \
             FROM checkpoints WHERE member_id = ? ORDER BY created_at DESC",
        )?;

        let rows: Vec<(String, String, String, String, i64, i64)> = stmt
            .query_map(params![member_id.to_string()], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, i64>(4)?,
                    row.get::<_, i64>(5)?,
                ))
            })?
            .filter_map(|r| r.ok())
            .collect();

        rows.into_iter()
            .map(|(id, migration_id, member_id, schema_id, record_count, created_at)| {
                Ok(CheckpointMeta {
                    id: id
                        .parse()
                        .map_err(|_| StorageError::Corrupt(format!("bad checkpoint id: {id}")))?,
                    migration_id: migration_id.parse().map_err(|_| {
                        StorageError::Corrupt(format!("bad migration id: {migration_id}"))
                    })?,
                    member_id: member_id.parse().map_err(|_| {
                        StorageError::Corrupt(format!("bad member id: {member_id}"))
                    })?,
                    schema_id,
                    record_count: record_count as usize,
                    created_at: millis_to_datetime(created_at),
                })
            })
            .collect()
    }
}

fn initialize_checkpoint_schema(conn: &Connection) -> StorageResult<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS checkpoints (
            id VARCHAR PRIMARY KEY,
            migration_id VARCHAR NOT NULL,
            member_id VARCHAR NOT NULL,
            schema_id VARCHAR NOT NULL,
            record_count INTEGER NOT NULL,
            created_at BIGINT NOT NULL,
            snapshot BLOB NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_checkpoints_member ON checkpoints(member_id);
        "#,
    )?;
    Ok(())
}

/// In-memory checkpoint store for engine tests.
#[derive(Clone, Default)]
pub struct MemoryCheckpointStore {
    checkpoints: Arc<Mutex<BTreeMap<CheckpointId, (CheckpointMeta, Vec<CheckpointedRecord>)>>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of checkpoints written so far.
    pub fn len(&self) -> usize {
        self.checkpoints.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn save(
        &self,
        migration_id: MigrationId,
        member_id: MemberId,
        schema_id: &str,
        original_records: &[CheckpointedRecord],
    ) -> StorageResult<CheckpointId> {
        let checkpoint_id = CheckpointId::new();
        let meta = CheckpointMeta {
            id: checkpoint_id,
            migration_id,
            member_id,
            schema_id: schema_id.to_string(),
            record_count: original_records.len(),
            created_at: Utc::now(),
        };
        self.checkpoints
            .lock()
            .unwrap()
            .insert(checkpoint_id, (meta, original_records.to_vec()));
        Ok(checkpoint_id)
    }

    async fn restore(&self, checkpoint_id: CheckpointId) -> StorageResult<Vec<CheckpointedRecord>> {
        self.checkpoints
            .lock()
            .unwrap()
            .get(&checkpoint_id)
            .map(|(_, records)| records.clone())
            .ok_or(StorageError::CheckpointNotFound(checkpoint_id))
    }

    async fn list_for_member(&self, member_id: MemberId) -> StorageResult<Vec<CheckpointMeta>> {
        let checkpoints = self.checkpoints.lock().unwrap();
        let mut metas: Vec<CheckpointMeta> = checkpoints
            .values()
            .filter(|(meta, _)| meta.member_id == member_id)
            .map(|(meta, _)| meta.clone())
            .collect();
        metas.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(metas)
    }
}
