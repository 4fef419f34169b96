//! DuckDB storage layer for medrec.
//!
//! Persists encrypted record payloads and pre-migration checkpoints.
//! Payloads are opaque ciphertext blobs — this crate never sees plaintext
//! and holds no key material.
//!
//! # Architecture
//!
//! - Records live in a single `records` table keyed by record id, with
//!   member/schema/version columns for matching queries
//! - Checkpoints are append-only: one row per checkpoint holding the full
//!   snapshot of original encrypted payloads
//! - Both stores have in-memory variants for testing

mod checkpoint_store;
mod error;
mod record_store;

pub use checkpoint_store::{
    CheckpointMeta, CheckpointStore, CheckpointedRecord, DuckCheckpointStore,
    MemoryCheckpointStore,
};
pub use error::{StorageError, StorageResult};
pub use record_store::{DuckRecordStore, MemoryRecordStore, RecordStore, StoredRecord};

/// Open a DuckDB connection with stale WAL recovery and resource limits.
///
/// If the initial open fails and a `.wal` file exists alongside the
/// database, it is removed and the open retried once. This handles the
/// common case where an unclean shutdown leaves a WAL file that prevents
/// reopening.
pub(crate) fn open_duckdb_with_wal_recovery(
    path: &std::path::Path,
    memory_limit: &str,
    threads: u32,
) -> StorageResult<duckdb::Connection> {
    let conn = match duckdb::Connection::open(path) {
        Ok(c) => c,
        Err(first_err) => {
            let wal_path = path.with_extension(
                path.extension()
                    .map(|ext| format!("{}.wal", ext.to_string_lossy()))
                    .unwrap_or_else(|| "wal".to_string()),
            );
            if wal_path.exists() {
                tracing::warn!(wal = %wal_path.display(), "open failed, removing stale WAL and retrying");
                if std::fs::remove_file(&wal_path).is_ok() {
                    let c = duckdb::Connection::open(path)?;
                    apply_resource_limits(&c, memory_limit, threads)?;
                    return Ok(c);
                }
            }
            return Err(first_err.into());
        }
    };
    apply_resource_limits(&conn, memory_limit, threads)?;
    Ok(conn)
}

/// Cap per-database memory and thread usage (DuckDB's defaults are sized
/// for a dedicated analytics host, not an app with several open databases).
fn apply_resource_limits(
    conn: &duckdb::Connection,
    memory_limit: &str,
    threads: u32,
) -> StorageResult<()> {
    conn.execute_batch(&format!(
        "PRAGMA memory_limit='{}'; PRAGMA threads={};",
        memory_limit, threads
    ))?;
    Ok(())
}
