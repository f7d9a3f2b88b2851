//! Integration test: credential store guarantees with real signed records.

use std::sync::Arc;

use chrono::{Duration, Utc};
use commons_core::{Aid, Said, SchemaId, Verification};
use commons_crypto::KeyPair;
use commons_integration_tests::signed;
use commons_store::schema::{ENDORSEMENT_SCHEMA, MEMBERSHIP_SCHEMA, REVOCATION_SCHEMA};
use commons_store::{
    CountingBackend, CredentialStore, MemoryBackend, PutOutcome, ReadMode, SchemaRegistry,
    StoreError,
};

fn membership(subject: &str, key: &KeyPair) -> commons_core::CredentialRecord {
    signed("EOrg", subject, MEMBERSHIP_SCHEMA, serde_json::json!({"role": "member"}), key)
}

#[test]
fn test_put_is_idempotent() {
    let store = CredentialStore::in_memory();
    let key = KeyPair::generate();
    let record = membership("EU1", &key);

    assert_eq!(store.put(record.clone()).unwrap(), PutOutcome::Inserted);
    let generation = store.generation();
    assert_eq!(store.put(record.clone()).unwrap(), PutOutcome::Updated);

    assert_eq!(store.len().unwrap(), 1);
    assert!(store.generation() >= generation);
    let fetched = store.get(&record.said).unwrap();
    assert!(fetched.same_content(&record));
    assert_eq!(
        store
            .query_by_subject(&Aid::from("EU1"), ReadMode::All)
            .records()
            .unwrap()
            .len(),
        1
    );
}

#[test]
fn test_same_content_put_keeps_verification() {
    let store = CredentialStore::in_memory();
    let record = membership("EU1", &KeyPair::generate());
    store.put(record.clone()).unwrap();
    store
        .set_verification(&record.said, Verification::verified(Utc::now(), 0))
        .unwrap();

    store.put(record.clone()).unwrap();
    assert!(store.get(&record.said).unwrap().verification.is_verified());
}

#[test]
fn test_unverified_records_hidden_from_trusted_reads() {
    let store = CredentialStore::in_memory();
    let record = membership("EU1", &KeyPair::generate());
    store.put(record.clone()).unwrap();

    assert!(matches!(
        store.find(&record.said, ReadMode::Trusted),
        Err(StoreError::NotFound(_))
    ));
    assert!(store.find(&record.said, ReadMode::IncludeUnverified).is_ok());

    store
        .set_verification(&record.said, Verification::invalid(Utc::now(), "bad signature"))
        .unwrap();
    assert!(store.find(&record.said, ReadMode::IncludeUnverified).is_err());
    assert!(store.find(&record.said, ReadMode::All).is_ok());
    assert!(store
        .query_by_issuer(&Aid::from("EOrg"), ReadMode::IncludeUnverified)
        .records()
        .unwrap()
        .is_empty());
}

#[test]
fn test_lookups_avoid_full_scans() {
    let backend = Arc::new(CountingBackend::new(MemoryBackend::new()));
    let store = CredentialStore::open(backend.clone(), Arc::new(SchemaRegistry::new())).unwrap();
    let key = KeyPair::generate();
    let mut target = None;
    for i in 0..100 {
        let record = membership(&format!("EU{}", i), &key);
        if i == 42 {
            target = Some(record.said.clone());
        }
        store.put(record).unwrap();
    }

    backend.reset();
    let by_subject = store
        .query_by_subject(&Aid::from("EU42"), ReadMode::All)
        .records()
        .unwrap();
    assert_eq!(by_subject.len(), 1);
    assert_eq!(Some(by_subject[0].said.clone()), target);
    assert_eq!(backend.scans(), 0);
    assert_eq!(backend.gets(), 1);

    backend.reset();
    let by_schema = store
        .query_by_schema(&SchemaId::from(ENDORSEMENT_SCHEMA), ReadMode::All)
        .records()
        .unwrap();
    assert!(by_schema.is_empty());
    assert_eq!(backend.scans(), 0);
    assert_eq!(backend.gets(), 0);
}

#[test]
fn test_indices_rebuilt_on_reopen() {
    let backend = Arc::new(MemoryBackend::new());
    let key = KeyPair::generate();
    let record = membership("EU1", &key);
    {
        let store = CredentialStore::open(backend.clone(), Arc::new(SchemaRegistry::new())).unwrap();
        store.put(record.clone()).unwrap();
    }

    let store = CredentialStore::open(backend, Arc::new(SchemaRegistry::new())).unwrap();
    let found = store
        .query_by_issuer(&Aid::from("EOrg"), ReadMode::All)
        .records()
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].said, record.said);
}

#[test]
fn test_delete_expired_is_exact() {
    let store = CredentialStore::in_memory();
    let key = KeyPair::generate();
    let now = Utc::now();

    let expired = commons_crypto::sign_record(
        membership("EU1", &key).with_expiration(now - Duration::hours(1)),
        &key,
    )
    .unwrap();
    let boundary = commons_crypto::sign_record(
        membership("EU2", &key).with_expiration(now),
        &key,
    )
    .unwrap();
    let later = commons_crypto::sign_record(
        membership("EU3", &key).with_expiration(now + Duration::hours(1)),
        &key,
    )
    .unwrap();
    let forever = membership("EU4", &key);

    for record in [&expired, &boundary, &later, &forever] {
        store.put(record.clone()).unwrap();
    }

    let expiring = store.query_expiring_before(now, ReadMode::All).records().unwrap();
    assert_eq!(expiring.len(), 1);
    assert_eq!(expiring[0].said, expired.said);

    assert_eq!(store.delete_expired(now).unwrap(), 1);
    assert!(!store.contains(&expired.said).unwrap());
    assert!(store.contains(&boundary.said).unwrap());
    assert!(store.contains(&later.said).unwrap());
    assert!(store.contains(&forever.said).unwrap());
    assert_eq!(store.delete_expired(now).unwrap(), 0);
}

#[test]
fn test_referenced_expired_record_is_tombstoned() {
    let store = CredentialStore::in_memory();
    let key = KeyPair::generate();
    let now = Utc::now();

    let expired = commons_crypto::sign_record(
        membership("EU1", &key).with_expiration(now - Duration::hours(1)),
        &key,
    )
    .unwrap();
    let referrer = commons_crypto::sign_record(
        commons_integration_tests::draft(
            "EU2",
            "EU1",
            ENDORSEMENT_SCHEMA,
            serde_json::json!({}),
        )
        .with_reference(expired.said.clone()),
        &key,
    )
    .unwrap();
    store.put(expired.clone()).unwrap();
    store.put(referrer).unwrap();

    assert_eq!(store.delete_expired(now).unwrap(), 0);
    let kept = store.get(&expired.said).unwrap();
    assert!(kept.tombstoned);
    assert!(store.find(&expired.said, ReadMode::IncludeUnverified).is_err());
    assert!(store.find(&expired.said, ReadMode::All).is_ok());
}

#[test]
fn test_revocation_record_marks_target() {
    let store = CredentialStore::in_memory();
    let key = KeyPair::generate();
    let target = membership("EU1", &key);
    store.put(target.clone()).unwrap();

    let revocation = commons_crypto::sign_record(
        commons_integration_tests::draft(
            "EOrg",
            "EOrg",
            REVOCATION_SCHEMA,
            serde_json::json!({"reason": "left community"}),
        )
        .with_reference(target.said.clone()),
        &key,
    )
    .unwrap();
    store.put(revocation.clone()).unwrap();

    let revoked = store.get(&target.said).unwrap();
    assert!(revoked.is_revoked());
    assert_eq!(
        revoked.revocation.unwrap().revocation_said,
        revocation.said
    );
}

#[test]
fn test_mark_revoked_unknown_record() {
    let store = CredentialStore::in_memory();
    let err = store
        .mark_revoked(&Said::from("EMissing"), Said::from("ERev"), "gone")
        .unwrap_err();
    assert!(matches!(err, StoreError::NotFound(_)));
}
