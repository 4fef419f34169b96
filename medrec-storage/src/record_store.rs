//! Encrypted record store.

use crate::error::{StorageError, StorageResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use duckdb::{params, Connection};
use medrec_types::{MemberId, RecordId};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

/// One encrypted record at rest.
///
/// The payload is opaque ciphertext; only `medrec-crypto` can turn it back
/// into fields, and only with the owning member's key.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRecord {
    pub id: RecordId,
    pub member_id: MemberId,
    /// Logical record type, e.g. "vaccine".
    pub schema_id: String,
    /// Schema version the payload conforms to.
    pub schema_version: u32,
    pub payload: Vec<u8>,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

impl StoredRecord {
    pub fn new(
        member_id: MemberId,
        schema_id: impl Into<String>,
        schema_version: u32,
        payload: Vec<u8>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: RecordId::new(),
            member_id,
            schema_id: schema_id.into(),
            schema_version,
            payload,
            created_at: now,
            modified_at: now,
        }
    }
}

/// Keyed access to encrypted record payloads.
///
/// `fetch_matching` returns records ordered by record id, so callers see a
/// stable processing order. `persist` fails with
/// [`StorageError::RecordNotFound`] when the record does not exist, which
/// is distinct from a database failure.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Every record of one member at one schema id and version, ordered by
    /// record id.
    async fn fetch_matching(
        &self,
        member_id: MemberId,
        schema_id: &str,
        version: u32,
    ) -> StorageResult<Vec<StoredRecord>>;

    /// Replaces a record's payload and bumps its schema version.
    async fn persist(
        &self,
        record_id: RecordId,
        payload: Vec<u8>,
        new_version: u32,
    ) -> StorageResult<()>;

    /// Inserts a record (upsert by id).
    async fn insert(&self, record: &StoredRecord) -> StorageResult<()>;

    /// Fetches a single record by id.
    async fn get(&self, record_id: RecordId) -> StorageResult<Option<StoredRecord>>;

    /// Count of records matching one member/schema/version triple.
    async fn count_matching(
        &self,
        member_id: MemberId,
        schema_id: &str,
        version: u32,
    ) -> StorageResult<usize>;
}

/// Record store backed by DuckDB.
#[derive(Clone)]
pub struct DuckRecordStore {
    conn: Arc<Mutex<Connection>>,
}

impl DuckRecordStore {
    /// Opens or creates a record store at the given path.
    pub fn open(path: &Path) -> StorageResult<Self> {
        let conn = crate::open_duckdb_with_wal_recovery(path, "256MB", 2)?;
        initialize_record_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Opens an in-memory record store (for testing).
    pub fn open_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        initialize_record_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }
}

#[async_trait]
impl RecordStore for DuckRecordStore {
    async fn fetch_matching(
        &self,
        member_id: MemberId,
        schema_id: &str,
        version: u32,
    ) -> StorageResult<Vec<StoredRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, member_id, schema_id, schema_version, payload, created_at, modified_at \
             FROM records WHERE member_id = ? AND schema_id = ? AND schema_version = ? \
             ORDER BY id",
        )?;

        let rows: Vec<RecordRow> = stmt
            .query_map(
                params![member_id.to_string(), schema_id, version as i64],
                row_to_tuple,
            )?
            .filter_map(|r| r.ok())
            .collect();

        rows.into_iter().map(tuple_to_record).collect()
    }

    async fn persist(
        &self,
        record_id: RecordId,
        payload: Vec<u8>,
        new_version: u32,
    ) -> StorageResult<()> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            "UPDATE records SET payload = ?, schema_version = ?, modified_at = ? WHERE id = ?",
            params![
                payload,
                new_version as i64,
                Utc::now().timestamp_millis(),
                record_id.to_string(),
            ],
        )?;
        if changed == 0 {
            return Err(StorageError::RecordNotFound(record_id));
        }
        Ok(())
    }

    async fn insert(&self, record: &StoredRecord) -> StorageResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
            INSERT OR REPLACE INTO records (
                id, member_id, schema_id, schema_version, payload, created_at, modified_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
            params![
                record.id.to_string(),
                record.member_id.to_string(),
                record.schema_id,
                record.schema_version as i64,
                record.payload,
                record.created_at.timestamp_millis(),
                record.modified_at.timestamp_millis(),
            ],
        )?;
        Ok(())
    }

    async fn get(&self, record_id: RecordId) -> StorageResult<Option<StoredRecord>> {
        let conn = self.conn.lock().unwrap();
        let result = conn.query_row(
            "SELECT id, member_id, schema_id, schema_version, payload, created_at, modified_at \
             FROM records WHERE id = ?",
            params![record_id.to_string()],
            row_to_tuple,
        );

        match result {
            Ok(row) => Ok(Some(tuple_to_record(row)?)),
            Err(duckdb::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn count_matching(
        &self,
        member_id: MemberId,
        schema_id: &str,
        version: u32,
    ) -> StorageResult<usize> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM records WHERE member_id = ? AND schema_id = ? AND schema_version = ?",
            params![member_id.to_string(), schema_id, version as i64],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }
}

type RecordRow = (String, String, String, i64, Vec<u8>, i64, i64);

fn row_to_tuple(row: &duckdb::Row<'_>) -> duckdb::Result<RecordRow> {
    Ok((
        row.get::<_, String>(0)?,
        row.get::<_, String>(1)?,
        row.get::<_, String>(2)?,
        row.get::<_, i64>(3)?,
        row.get::<_, Vec<u8>>(4)?,
        row.get::<_, i64>(5)?,
        row.get::<_, i64>(6)?,
    ))
}

fn tuple_to_record(row: RecordRow) -> StorageResult<StoredRecord> {
    let (id, member_id, schema_id, schema_version, payload, created_at, modified_at) = row;
    Ok(StoredRecord {
        id: id
            .parse()
            .map_err(|_| StorageError::Corrupt(format!("bad record id: {id}")))?,
        member_id: member_id
            .parse()
            .map_err(|_| StorageError::Corrupt(format!("bad member id: {member_id}")))?,
        schema_id,
        schema_version: schema_version as u32,
        payload,
        created_at: millis_to_datetime(created_at),
        modified_at: millis_to_datetime(modified_at),
    })
}

pub(crate) fn millis_to_datetime(millis: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(millis).unwrap_or(DateTime::UNIX_EPOCH)
}

fn initialize_record_schema(conn: &Connection) -> StorageResult<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS records (
            id VARCHAR PRIMARY KEY,
            member_id VARCHAR NOT NULL,
            schema_id VARCHAR NOT NULL,
            schema_version INTEGER NOT NULL,
            payload BLOB NOT NULL,
            created_at BIGINT NOT NULL,
            modified_at BIGINT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_records_member ON records(member_id);
        CREATE INDEX IF NOT EXISTS idx_records_match ON records(member_id, schema_id, schema_version);
        "#,
    )?;
    Ok(())
}

/// In-memory record store for engine tests.
#[derive(Clone, Default)]
pub struct MemoryRecordStore {
    records: Arc<Mutex<BTreeMap<RecordId, StoredRecord>>>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn fetch_matching(
        &self,
        member_id: MemberId,
        schema_id: &str,
        version: u32,
    ) -> StorageResult<Vec<StoredRecord>> {
        let records = self.records.lock().unwrap();
        Ok(records
            .values()
            .filter(|r| {
                r.member_id == member_id && r.schema_id == schema_id && r.schema_version == version
            })
            .cloned()
            .collect())
    }

    async fn persist(
        &self,
        record_id: RecordId,
        payload: Vec<u8>,
        new_version: u32,
    ) -> StorageResult<()> {
        let mut records = self.records.lock().unwrap();
        let record = records
            .get_mut(&record_id)
            .ok_or(StorageError::RecordNotFound(record_id))?;
        record.payload = payload;
        record.schema_version = new_version;
        record.modified_at = Utc::now();
        Ok(())
    }

    async fn insert(&self, record: &StoredRecord) -> StorageResult<()> {
        self.records
            .lock()
            .unwrap()
            .insert(record.id, record.clone());
        Ok(())
    }

    async fn get(&self, record_id: RecordId) -> StorageResult<Option<StoredRecord>> {
        Ok(self.records.lock().unwrap().get(&record_id).cloned())
    }

    async fn count_matching(
        &self,
        member_id: MemberId,
        schema_id: &str,
        version: u32,
    ) -> StorageResult<usize> {
        Ok(self
            .fetch_matching(member_id, schema_id, version)
            .await?
            .len())
    }
}
