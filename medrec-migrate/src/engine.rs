//! The migration engine.

use crate::error::{MigrateError, MigrateResult};
use crate::report::{MigrationPreview, MigrationProgress, MigrationRecordError, MigrationResult};
use crate::transform::apply_steps;
use crate::warnings::compute_warnings;
use chrono::Utc;
use medrec_crypto::{KeyHandle, RecordCodec};
use medrec_model::{MergeStrategy, ModelError, RecordSchema, SchemaMigration};
use medrec_storage::{CheckpointStore, CheckpointedRecord, RecordStore, StoredRecord};
use medrec_types::{CheckpointId, MemberId, MigrationId};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Run-scoped execution options.
#[derive(Debug, Clone, Default)]
pub struct ExecuteOptions {
    /// Conflict policy for merge steps. Required when the migration
    /// contains one.
    pub merge_strategy: Option<MergeStrategy>,
}

impl ExecuteOptions {
    pub fn with_merge_strategy(strategy: MergeStrategy) -> Self {
        Self {
            merge_strategy: Some(strategy),
        }
    }
}

/// Orchestrates schema migrations over one member's encrypted records.
///
/// Collaborators are injected at construction; the engine holds no ambient
/// state and no locks. One `execute` call is a single sequential unit of
/// work — callers must serialize concurrent executions that target the
/// same (member, schema) pair. Runs for different members or schemas are
/// independent.
pub struct MigrationEngine {
    store: Arc<dyn RecordStore>,
    codec: Arc<dyn RecordCodec>,
    checkpoints: Arc<dyn CheckpointStore>,
}

impl MigrationEngine {
    pub fn new(
        store: Arc<dyn RecordStore>,
        codec: Arc<dyn RecordCodec>,
        checkpoints: Arc<dyn CheckpointStore>,
    ) -> Self {
        Self {
            store,
            codec,
            checkpoints,
        }
    }

    /// Forecasts a migration without mutating anything.
    ///
    /// Matching records are decrypted far enough to evaluate the warning
    /// rules, then the plaintext is discarded. A record that fails to
    /// decrypt becomes a warning, not an error; empty result sets are not
    /// errors either. Only definition problems and store failures
    /// propagate.
    pub async fn preview(
        &self,
        migration: &SchemaMigration,
        from_schema: &RecordSchema,
        to_schema: &RecordSchema,
        member_id: MemberId,
        key: &KeyHandle,
    ) -> MigrateResult<MigrationPreview> {
        validate_schema_pair(migration, from_schema, to_schema)?;

        let records = self
            .store
            .fetch_matching(member_id, &migration.schema_id, migration.from_version)
            .await?;
        let sample_record_id = records.first().map(|r| r.id);

        let mut decrypted = Vec::with_capacity(records.len());
        let mut undecryptable = 0usize;
        for record in &records {
            match self.codec.decrypt(&record.payload, key).await {
                Ok(fields) => decrypted.push(fields),
                Err(err) => {
                    debug!(record_id = %record.id, error = %err, "record undecryptable in preview");
                    undecryptable += 1;
                }
            }
        }

        let warnings = compute_warnings(migration, to_schema, &decrypted, undecryptable);
        debug!(
            schema_id = %migration.schema_id,
            matching = records.len(),
            warnings = warnings.len(),
            "preview computed"
        );

        Ok(MigrationPreview {
            matching_records: records.len(),
            sample_record_id,
            warnings,
        })
    }

    /// Runs a migration over every matching record of one member.
    ///
    /// A checkpoint covering the original encrypted payload of every
    /// matched record is durably saved before the first mutation; if that
    /// save fails the call aborts with nothing touched. After the
    /// checkpoint, records are processed strictly in record-id order and
    /// each failure is isolated: the record keeps its stored content and
    /// version, an error is appended to the result, and the run continues.
    /// `on_progress` fires once per record, success or not.
    #[allow(clippy::too_many_arguments)]
    pub async fn execute(
        &self,
        migration: &SchemaMigration,
        from_schema: &RecordSchema,
        to_schema: &RecordSchema,
        member_id: MemberId,
        key: &KeyHandle,
        options: &ExecuteOptions,
        mut on_progress: impl FnMut(MigrationProgress) + Send,
    ) -> MigrateResult<MigrationResult> {
        validate_schema_pair(migration, from_schema, to_schema)?;
        if migration.has_merge_step() && options.merge_strategy.is_none() {
            return Err(MigrateError::MissingMergeStrategy);
        }

        let started_at = Utc::now();
        let migration_id = MigrationId::new();

        let records = self
            .store
            .fetch_matching(member_id, &migration.schema_id, migration.from_version)
            .await?;

        if records.is_empty() {
            info!(
                %migration_id,
                schema_id = %migration.schema_id,
                from_version = migration.from_version,
                "no records match; nothing to migrate"
            );
            return Ok(MigrationResult {
                migration: migration.clone(),
                migration_id,
                checkpoint_id: None,
                records_processed: 0,
                records_succeeded: 0,
                records_failed: 0,
                errors: Vec::new(),
                started_at,
                finished_at: Utc::now(),
            });
        }

        let snapshot: Vec<CheckpointedRecord> = records
            .iter()
            .map(|r| CheckpointedRecord {
                record_id: r.id,
                schema_version: r.schema_version,
                payload: r.payload.clone(),
            })
            .collect();
        let checkpoint_id = self
            .checkpoints
            .save(migration_id, member_id, &migration.schema_id, &snapshot)
            .await
            .map_err(MigrateError::Checkpoint)?;
        info!(%migration_id, %checkpoint_id, records = records.len(), "checkpoint saved");

        let total = records.len();
        let mut errors = Vec::new();
        for (index, record) in records.iter().enumerate() {
            if let Err(err) = self
                .migrate_record(record, migration, options.merge_strategy.as_ref(), key)
                .await
            {
                warn!(
                    %migration_id,
                    record_id = %err.record_id,
                    reason = %err.reason,
                    "record failed; continuing"
                );
                errors.push(err);
            }
            on_progress(MigrationProgress {
                total_records: total,
                processed_records: index + 1,
                current_record_id: record.id,
            });
        }

        let failed = errors.len();
        let result = MigrationResult {
            migration: migration.clone(),
            migration_id,
            checkpoint_id: Some(checkpoint_id),
            records_processed: total,
            records_succeeded: total - failed,
            records_failed: failed,
            errors,
            started_at,
            finished_at: Utc::now(),
        };
        info!(
            %migration_id,
            processed = result.records_processed,
            failed = result.records_failed,
            "migration finished"
        );
        Ok(result)
    }

    /// Decrypt → transform → re-encrypt → persist, for one record.
    ///
    /// All-or-nothing per record: any failure leaves the stored payload
    /// and version exactly as they were.
    async fn migrate_record(
        &self,
        record: &StoredRecord,
        migration: &SchemaMigration,
        strategy: Option<&MergeStrategy>,
        key: &KeyHandle,
    ) -> Result<(), MigrationRecordError> {
        let record_error = |field_id: Option<String>, reason: String| MigrationRecordError {
            record_id: record.id,
            field_id,
            reason,
        };

        let fields = self
            .codec
            .decrypt(&record.payload, key)
            .await
            .map_err(|e| record_error(None, format!("decrypt failed: {e}")))?;

        let transformed = apply_steps(&fields, &migration.steps, strategy)
            .map_err(|e| record_error(Some(e.field_id), e.reason))?;

        let payload = self
            .codec
            .encrypt(&transformed, key)
            .await
            .map_err(|e| record_error(None, format!("encrypt failed: {e}")))?;

        self.store
            .persist(record.id, payload, migration.to_version)
            .await
            .map_err(|e| record_error(None, format!("persist failed: {e}")))?;

        Ok(())
    }

    /// Writes a checkpoint's original payloads back verbatim, restoring
    /// each record to its pre-migration content and version.
    ///
    /// Restoration is an explicit caller-driven operation; `execute` never
    /// rolls back on its own. Returns the number of records restored.
    pub async fn restore_checkpoint(&self, checkpoint_id: CheckpointId) -> MigrateResult<usize> {
        let records = self.checkpoints.restore(checkpoint_id).await?;
        for record in &records {
            self.store
                .persist(record.record_id, record.payload.clone(), record.schema_version)
                .await?;
        }
        info!(%checkpoint_id, records = records.len(), "checkpoint restored");
        Ok(records.len())
    }
}

/// Setup validation: the migration must be well-formed against the
/// from-schema, and the to-schema must be the declared destination.
fn validate_schema_pair(
    migration: &SchemaMigration,
    from_schema: &RecordSchema,
    to_schema: &RecordSchema,
) -> MigrateResult<()> {
    migration.validate(from_schema)?;
    if to_schema.id != migration.schema_id {
        return Err(ModelError::SchemaMismatch {
            expected: migration.schema_id.clone(),
            actual: to_schema.id.clone(),
        }
        .into());
    }
    if to_schema.version != migration.to_version {
        return Err(ModelError::VersionMismatch {
            expected: migration.to_version,
            actual: to_schema.version,
        }
        .into());
    }
    Ok(())
}
