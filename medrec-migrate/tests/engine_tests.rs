use async_trait::async_trait;
use medrec_crypto::{KeyHandle, PassthroughCodec, RecordCodec, SealedRecordCodec};
use medrec_migrate::{ExecuteOptions, MigrateError, MigrationEngine, MigrationProgress};
use medrec_model::{
    FieldDefinition, MergeStrategy, MigrationStep, RecordSchema, SchemaMigration,
};
use medrec_storage::{
    CheckpointMeta, CheckpointStore, CheckpointedRecord, DuckCheckpointStore, DuckRecordStore,
    MemoryCheckpointStore, MemoryRecordStore, RecordStore, StorageError, StorageResult,
    StoredRecord,
};
use medrec_types::{
    CheckpointId, FieldMap, FieldType, FieldValue, MemberId, MigrationId, RecordId,
};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use uuid::Uuid;

// ── Fixtures ─────────────────────────────────────────────────────

fn from_schema() -> RecordSchema {
    RecordSchema::new("vaccine", "Vaccine", 1)
        .built_in()
        .with_field(FieldDefinition::system("name", "Vaccine name", FieldType::Text).required())
        .with_field(FieldDefinition::system("dose", "Dose", FieldType::Text))
        .with_field(FieldDefinition::system("lot_number", "Lot number", FieldType::Text))
        .with_field(FieldDefinition::system("notes", "Notes", FieldType::Text))
}

fn to_schema() -> RecordSchema {
    RecordSchema::new("vaccine", "Vaccine", 2)
        .built_in()
        .with_field(FieldDefinition::system("name", "Vaccine name", FieldType::Text).required())
        .with_field(FieldDefinition::system("dose", "Dose", FieldType::Integer))
        .with_field(FieldDefinition::system("notes", "Notes", FieldType::Text))
}

/// Merge the lot number into the notes, then convert the dose to an integer.
fn standard_migration() -> SchemaMigration {
    SchemaMigration::new("vaccine", 1, 2)
        .with_step(MigrationStep::Merge {
            field_id: "lot_number".into(),
            into_field_id: "notes".into(),
        })
        .with_step(MigrationStep::TypeConvert {
            field_id: "dose".into(),
            to_type: FieldType::Integer,
        })
}

fn concatenate_options() -> ExecuteOptions {
    ExecuteOptions::with_merge_strategy(MergeStrategy::Concatenate {
        separator: ", ".into(),
    })
}

fn vaccine_fields(name: &str, dose: &str, lot: &str, notes: &str) -> FieldMap {
    let mut fields = FieldMap::new();
    fields.insert("name".into(), FieldValue::Text(name.into()));
    fields.insert("dose".into(), FieldValue::Text(dose.into()));
    fields.insert("lot_number".into(), FieldValue::Text(lot.into()));
    fields.insert("notes".into(), FieldValue::Text(notes.into()));
    fields
}

struct Env {
    engine: MigrationEngine,
    store: MemoryRecordStore,
    checkpoints: MemoryCheckpointStore,
    member: MemberId,
    key: KeyHandle,
}

/// Memory stores plus a plaintext codec, so tests can craft payloads.
fn env() -> Env {
    let store = MemoryRecordStore::new();
    let checkpoints = MemoryCheckpointStore::new();
    let engine = MigrationEngine::new(
        Arc::new(store.clone()),
        Arc::new(PassthroughCodec),
        Arc::new(checkpoints.clone()),
    );
    Env {
        engine,
        store,
        checkpoints,
        member: MemberId::new(),
        key: KeyHandle::generate(),
    }
}

/// Seeds a v1 record with a deterministic id so ordering is predictable.
async fn seed(env: &Env, seq: u128, fields: &FieldMap) -> RecordId {
    seed_payload(env, seq, serde_json::to_vec(fields).unwrap()).await
}

async fn seed_payload(env: &Env, seq: u128, payload: Vec<u8>) -> RecordId {
    let mut record = StoredRecord::new(env.member, "vaccine", 1, payload);
    record.id = RecordId(Uuid::from_u128(seq));
    env.store.insert(&record).await.unwrap();
    record.id
}

async fn decrypted(env: &Env, id: RecordId) -> FieldMap {
    let record = env.store.get(id).await.unwrap().unwrap();
    serde_json::from_slice(&record.payload).unwrap()
}

// ── Preview ──────────────────────────────────────────────────────

#[tokio::test]
async fn preview_counts_matches_and_mutates_nothing() {
    let env = env();
    let a = seed(&env, 1, &vaccine_fields("MMR", "1", "A100", "")).await;
    let b = seed(&env, 2, &vaccine_fields("Polio", "2", "B200", "clinic")).await;

    let before_a = env.store.get(a).await.unwrap().unwrap();
    let before_b = env.store.get(b).await.unwrap().unwrap();

    let preview = env
        .engine
        .preview(&standard_migration(), &from_schema(), &to_schema(), env.member, &env.key)
        .await
        .unwrap();

    assert_eq!(preview.matching_records, 2);
    assert_eq!(preview.sample_record_id, Some(a));

    // Nothing changed, byte for byte.
    assert_eq!(env.store.get(a).await.unwrap().unwrap(), before_a);
    assert_eq!(env.store.get(b).await.unwrap().unwrap(), before_b);
    assert!(env.checkpoints.is_empty());
}

#[tokio::test]
async fn preview_of_empty_set_is_not_an_error() {
    let env = env();
    let preview = env
        .engine
        .preview(&standard_migration(), &from_schema(), &to_schema(), env.member, &env.key)
        .await
        .unwrap();

    assert_eq!(preview.matching_records, 0);
    assert_eq!(preview.sample_record_id, None);
    assert!(preview.warnings.is_empty());
}

#[tokio::test]
async fn preview_warns_about_each_step() {
    let env = env();
    // Occupied merge target and an unconvertible dose.
    seed(&env, 1, &vaccine_fields("MMR", "two", "A100", "clinic")).await;
    seed(&env, 2, &vaccine_fields("Polio", "2", "B200", "")).await;

    // Removing "name" is warned because the destination still requires it.
    let migration = standard_migration().with_step(MigrationStep::Remove {
        field_id: "name".into(),
    });

    let preview = env
        .engine
        .preview(&migration, &from_schema(), &to_schema(), env.member, &env.key)
        .await
        .unwrap();

    assert_eq!(
        preview.warnings,
        vec![
            "1 records have existing data in target field 'notes'; merge strategy will apply"
                .to_string(),
            "1 records have values in field 'dose' that cannot be converted to integer"
                .to_string(),
            "removing required field 'name'".to_string(),
        ]
    );
}

#[tokio::test]
async fn preview_turns_undecryptable_records_into_a_warning() {
    let env = env();
    seed(&env, 1, &vaccine_fields("MMR", "1", "A100", "")).await;
    seed_payload(&env, 2, b"not json at all".to_vec()).await;

    let preview = env
        .engine
        .preview(&standard_migration(), &from_schema(), &to_schema(), env.member, &env.key)
        .await
        .unwrap();

    assert_eq!(preview.matching_records, 2);
    assert!(preview
        .warnings
        .iter()
        .any(|w| w == "1 records could not be decrypted and will fail migration"));
}

#[tokio::test]
async fn preview_rejects_invalid_definitions() {
    let env = env();
    let empty = SchemaMigration::new("vaccine", 1, 2);
    let err = env
        .engine
        .preview(&empty, &from_schema(), &to_schema(), env.member, &env.key)
        .await
        .unwrap_err();
    assert!(matches!(err, MigrateError::Definition(_)));
}

// ── Execute: happy path ──────────────────────────────────────────

#[tokio::test]
async fn execute_transforms_records_and_bumps_versions() {
    let env = env();
    let a = seed(&env, 1, &vaccine_fields("MMR", "2", "A100", "clinic")).await;
    let b = seed(&env, 2, &vaccine_fields("Polio", "3", "B200", "")).await;

    let result = env
        .engine
        .execute(
            &standard_migration(),
            &from_schema(),
            &to_schema(),
            env.member,
            &env.key,
            &concatenate_options(),
            |_| {},
        )
        .await
        .unwrap();

    assert!(result.succeeded());
    assert_eq!(result.records_processed, 2);
    assert_eq!(result.records_succeeded, 2);
    assert_eq!(result.records_failed, 0);
    assert!(result.errors.is_empty());
    assert!(result.checkpoint_id.is_some());
    assert!(result.finished_at >= result.started_at);

    let fields_a = decrypted(&env, a).await;
    assert_eq!(fields_a.get("notes"), Some(&FieldValue::Text("clinic, A100".into())));
    assert_eq!(fields_a.get("dose"), Some(&FieldValue::Integer(2)));
    assert!(!fields_a.contains_key("lot_number"));

    let fields_b = decrypted(&env, b).await;
    assert_eq!(fields_b.get("notes"), Some(&FieldValue::Text("B200".into())));
    assert_eq!(fields_b.get("dose"), Some(&FieldValue::Integer(3)));

    for id in [a, b] {
        assert_eq!(env.store.get(id).await.unwrap().unwrap().schema_version, 2);
    }
}

#[tokio::test]
async fn execute_with_no_matches_is_a_no_op() {
    let env = env();
    let result = env
        .engine
        .execute(
            &standard_migration(),
            &from_schema(),
            &to_schema(),
            env.member,
            &env.key,
            &concatenate_options(),
            |_| {},
        )
        .await
        .unwrap();

    assert!(result.succeeded());
    assert_eq!(result.records_processed, 0);
    assert_eq!(result.checkpoint_id, None);
    assert!(env.checkpoints.is_empty());
}

// ── Execute: setup rejection ─────────────────────────────────────

#[tokio::test]
async fn execute_requires_a_merge_strategy_for_merge_steps() {
    let env = env();
    seed(&env, 1, &vaccine_fields("MMR", "1", "A100", "")).await;

    let err = env
        .engine
        .execute(
            &standard_migration(),
            &from_schema(),
            &to_schema(),
            env.member,
            &env.key,
            &ExecuteOptions::default(),
            |_| {},
        )
        .await
        .unwrap_err();

    assert!(matches!(err, MigrateError::MissingMergeStrategy));
    // Rejected before any store access: no checkpoint, record untouched.
    assert!(env.checkpoints.is_empty());
    let record = env.store.get(RecordId(Uuid::from_u128(1))).await.unwrap().unwrap();
    assert_eq!(record.schema_version, 1);
}

#[tokio::test]
async fn execute_rejects_mismatched_destination_schema() {
    let env = env();
    let wrong_to = RecordSchema::new("vaccine", "Vaccine", 3);
    let err = env
        .engine
        .execute(
            &standard_migration(),
            &from_schema(),
            &wrong_to,
            env.member,
            &env.key,
            &concatenate_options(),
            |_| {},
        )
        .await
        .unwrap_err();
    assert!(matches!(err, MigrateError::Definition(_)));
}

// ── Execute: checkpoint-first ────────────────────────────────────

struct FailingCheckpointStore;

#[async_trait]
impl CheckpointStore for FailingCheckpointStore {
    async fn save(
        &self,
        _migration_id: MigrationId,
        _member_id: MemberId,
        _schema_id: &str,
        _original_records: &[CheckpointedRecord],
    ) -> StorageResult<CheckpointId> {
        Err(StorageError::Io("checkpoint volume unavailable".into()))
    }

    async fn restore(&self, checkpoint_id: CheckpointId) -> StorageResult<Vec<CheckpointedRecord>> {
        Err(StorageError::CheckpointNotFound(checkpoint_id))
    }

    async fn list_for_member(&self, _member_id: MemberId) -> StorageResult<Vec<CheckpointMeta>> {
        Ok(Vec::new())
    }
}

#[tokio::test]
async fn execute_is_fail_closed_when_checkpoint_save_fails() {
    let store = MemoryRecordStore::new();
    let engine = MigrationEngine::new(
        Arc::new(store.clone()),
        Arc::new(PassthroughCodec),
        Arc::new(FailingCheckpointStore),
    );
    let member = MemberId::new();
    let key = KeyHandle::generate();

    let fields = vaccine_fields("MMR", "1", "A100", "");
    let mut record = StoredRecord::new(member, "vaccine", 1, serde_json::to_vec(&fields).unwrap());
    record.id = RecordId(Uuid::from_u128(1));
    store.insert(&record).await.unwrap();

    let mut progress_calls = 0usize;
    let err = engine
        .execute(
            &standard_migration(),
            &from_schema(),
            &to_schema(),
            member,
            &key,
            &concatenate_options(),
            |_| progress_calls += 1,
        )
        .await
        .unwrap_err();

    assert!(matches!(err, MigrateError::Checkpoint(_)));
    assert_eq!(progress_calls, 0);
    // The record store is exactly as it was.
    assert_eq!(store.get(record.id).await.unwrap().unwrap(), record);
}

// ── Execute: per-record isolation ────────────────────────────────

#[tokio::test]
async fn one_bad_record_does_not_abort_the_run() {
    let env = env();
    let a = seed(&env, 1, &vaccine_fields("MMR", "1", "A100", "")).await;
    let bad = seed_payload(&env, 2, b"garbage ciphertext".to_vec()).await;
    let c = seed(&env, 3, &vaccine_fields("Polio", "3", "C300", "")).await;

    let mut progress: Vec<MigrationProgress> = Vec::new();
    let result = env
        .engine
        .execute(
            &standard_migration(),
            &from_schema(),
            &to_schema(),
            env.member,
            &env.key,
            &concatenate_options(),
            |p| progress.push(p),
        )
        .await
        .unwrap();

    assert_eq!(result.records_processed, 3);
    assert_eq!(result.records_succeeded, 2);
    assert_eq!(result.records_failed, 1);
    assert_eq!(result.records_succeeded + result.records_failed, result.records_processed);
    assert!(!result.succeeded());

    assert_eq!(result.errors.len(), 1);
    assert_eq!(result.errors[0].record_id, bad);
    assert!(result.errors[0].reason.contains("decrypt failed"));

    // Progress fired once per record, counts non-decreasing, order stable.
    assert_eq!(progress.len(), 3);
    assert_eq!(
        progress.iter().map(|p| p.processed_records).collect::<Vec<_>>(),
        vec![1, 2, 3]
    );
    assert!(progress.iter().all(|p| p.total_records == 3));
    assert_eq!(
        progress.iter().map(|p| p.current_record_id).collect::<Vec<_>>(),
        vec![a, bad, c]
    );

    // The failed record is byte-identical and still at the old version.
    let untouched = env.store.get(bad).await.unwrap().unwrap();
    assert_eq!(untouched.payload, b"garbage ciphertext");
    assert_eq!(untouched.schema_version, 1);

    // Its neighbors migrated.
    assert_eq!(env.store.get(a).await.unwrap().unwrap().schema_version, 2);
    assert_eq!(env.store.get(c).await.unwrap().unwrap().schema_version, 2);
}

#[tokio::test]
async fn conversion_failure_leaves_the_record_unwritten() {
    let env = env();
    let bad = seed(&env, 1, &vaccine_fields("MMR", "two", "A100", "")).await;
    let good = seed(&env, 2, &vaccine_fields("Polio", "3", "B200", "")).await;
    let original = env.store.get(bad).await.unwrap().unwrap();

    let result = env
        .engine
        .execute(
            &standard_migration(),
            &from_schema(),
            &to_schema(),
            env.member,
            &env.key,
            &concatenate_options(),
            |_| {},
        )
        .await
        .unwrap();

    assert_eq!(result.records_failed, 1);
    assert_eq!(result.errors[0].record_id, bad);
    assert_eq!(result.errors[0].field_id.as_deref(), Some("dose"));

    // Whole-record atomicity: the merge that preceded the failing convert
    // was not persisted either.
    let after = env.store.get(bad).await.unwrap().unwrap();
    assert_eq!(after.payload, original.payload);
    assert_eq!(after.schema_version, 1);

    assert_eq!(env.store.get(good).await.unwrap().unwrap().schema_version, 2);
}

// ── Checkpoint restore ───────────────────────────────────────────

#[tokio::test]
async fn restore_checkpoint_rewinds_to_pre_migration_bytes() {
    let env = env();
    let a = seed(&env, 1, &vaccine_fields("MMR", "2", "A100", "clinic")).await;
    let b = seed(&env, 2, &vaccine_fields("Polio", "3", "B200", "")).await;
    let original_a = env.store.get(a).await.unwrap().unwrap();
    let original_b = env.store.get(b).await.unwrap().unwrap();

    let result = env
        .engine
        .execute(
            &standard_migration(),
            &from_schema(),
            &to_schema(),
            env.member,
            &env.key,
            &concatenate_options(),
            |_| {},
        )
        .await
        .unwrap();
    let checkpoint_id = result.checkpoint_id.unwrap();

    // Migration actually changed things.
    assert_ne!(env.store.get(a).await.unwrap().unwrap().payload, original_a.payload);

    let restored = env.engine.restore_checkpoint(checkpoint_id).await.unwrap();
    assert_eq!(restored, 2);

    let after_a = env.store.get(a).await.unwrap().unwrap();
    let after_b = env.store.get(b).await.unwrap().unwrap();
    assert_eq!(after_a.payload, original_a.payload);
    assert_eq!(after_a.schema_version, 1);
    assert_eq!(after_b.payload, original_b.payload);
    assert_eq!(after_b.schema_version, 1);
}

#[tokio::test]
async fn restore_of_unknown_checkpoint_fails() {
    let env = env();
    let err = env
        .engine
        .restore_checkpoint(CheckpointId::new())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        MigrateError::Storage(StorageError::CheckpointNotFound(_))
    ));
}

// ── Idempotence ──────────────────────────────────────────────────

#[tokio::test]
async fn rerunning_a_completed_migration_matches_nothing() {
    let env = env();
    seed(&env, 1, &vaccine_fields("MMR", "2", "A100", "")).await;

    let first = env
        .engine
        .execute(
            &standard_migration(),
            &from_schema(),
            &to_schema(),
            env.member,
            &env.key,
            &concatenate_options(),
            |_| {},
        )
        .await
        .unwrap();
    assert_eq!(first.records_processed, 1);

    let second = env
        .engine
        .execute(
            &standard_migration(),
            &from_schema(),
            &to_schema(),
            env.member,
            &env.key,
            &concatenate_options(),
            |_| {},
        )
        .await
        .unwrap();
    assert_eq!(second.records_processed, 0);
    assert_eq!(second.checkpoint_id, None);
    // Only the first run wrote a checkpoint.
    assert_eq!(env.checkpoints.len(), 1);
}

// ── End to end against DuckDB with real encryption ───────────────

#[tokio::test]
async fn duck_stores_and_sealed_codec_end_to_end() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new("medrec_migrate=debug"))
        .with_test_writer()
        .try_init();

    let store = DuckRecordStore::open_in_memory().unwrap();
    let checkpoints = DuckCheckpointStore::open_in_memory().unwrap();
    let codec = SealedRecordCodec::new();
    let engine = MigrationEngine::new(
        Arc::new(store.clone()),
        Arc::new(codec),
        Arc::new(checkpoints.clone()),
    );
    let member = MemberId::new();
    let key = KeyHandle::generate();

    let fields = vaccine_fields("MMR", "2", "A100", "clinic");
    let payload = codec.seal(&fields, &key).unwrap();
    let record = StoredRecord::new(member, "vaccine", 1, payload.clone());
    store.insert(&record).await.unwrap();

    let result = engine
        .execute(
            &standard_migration(),
            &from_schema(),
            &to_schema(),
            member,
            &key,
            &concatenate_options(),
            |_| {},
        )
        .await
        .unwrap();
    assert!(result.succeeded());

    let migrated = store.get(record.id).await.unwrap().unwrap();
    assert_eq!(migrated.schema_version, 2);
    let opened = codec.open(&migrated.payload, &key).unwrap();
    assert_eq!(opened.get("notes"), Some(&FieldValue::Text("clinic, A100".into())));
    assert_eq!(opened.get("dose"), Some(&FieldValue::Integer(2)));

    // Restore brings back the exact original ciphertext.
    engine
        .restore_checkpoint(result.checkpoint_id.unwrap())
        .await
        .unwrap();
    let restored = store.get(record.id).await.unwrap().unwrap();
    assert_eq!(restored.payload, payload);
    assert_eq!(restored.schema_version, 1);
}
