//! Integration test: replicated log publishing, retries and the local store
//! fallback.

use chrono::Utc;
use commons_core::{Aid, SyncStatus, Verification};
use commons_integration_tests::{signed, Harness, ORG};
use commons_store::schema::{INVITATION_SCHEMA, MEMBERSHIP_SCHEMA, SELF_CLAIM_SCHEMA};
use commons_store::ReadMode;
use commons_sync::SyncError;

fn quick_retries(max_attempts: u32) -> commons_core::EngineConfig {
    let mut config = Harness::community_config();
    config.sync.retry_base_delay_ms = 0;
    config.sync.max_sync_attempts = max_attempts;
    config
}

#[tokio::test]
async fn test_missing_log_falls_back_to_store() {
    let h = Harness::new();
    let membership = signed(
        ORG,
        "EU1",
        MEMBERSHIP_SCHEMA,
        serde_json::json!({"role": "member"}),
        &h.org_key,
    );
    let claim_key = h.member("EU1");
    let claim = signed(
        "EU1",
        "EU1",
        SELF_CLAIM_SCHEMA,
        serde_json::json!({"alias": "fern"}),
        &claim_key,
    );
    for record in [&membership, &claim] {
        h.store.put(record.clone()).unwrap();
        h.store
            .set_verification(&record.said, Verification::verified(Utc::now(), 0))
            .unwrap();
    }

    let err = h.service.adapter().read_all(&h.space()).await.unwrap_err();
    assert!(matches!(err, SyncError::NoLog(_)));

    let credentials = h
        .service
        .community_credentials(&h.org(), ReadMode::Trusted)
        .await
        .unwrap();
    assert_eq!(credentials.len(), 1);
    assert_eq!(credentials[0].said, membership.said);

    let graph = h.service.fresh_graph_for(&h.org()).await.unwrap();
    assert_eq!(graph.edge_count(), 1);
    assert_eq!(graph.node(&Aid::from("EU1")).unwrap().alias, None);
}

#[tokio::test]
async fn test_private_credentials_never_reach_the_log() {
    let h = Harness::new();
    let invitation = signed(ORG, "EU9", INVITATION_SCHEMA, serde_json::json!({}), &h.org_key);
    let report = h.service.ingest(invitation.clone()).await.unwrap();
    assert!(report.published.is_none());

    let membership = signed(
        ORG,
        "EU1",
        MEMBERSHIP_SCHEMA,
        serde_json::json!({"role": "member"}),
        &h.org_key,
    );
    h.service.ingest(membership.clone()).await.unwrap();

    let logged = h.service.adapter().read_all(&h.space()).await.unwrap();
    assert_eq!(logged.len(), 1);
    assert_eq!(logged[0].said, membership.said);
    assert!(matches!(logged[0].sync, SyncStatus::Synced { .. }));
}

#[tokio::test]
async fn test_offline_publish_is_retried() {
    let h = Harness::with_config(quick_retries(5));
    h.substrate.set_offline(true);

    let membership = signed(
        ORG,
        "EU1",
        MEMBERSHIP_SCHEMA,
        serde_json::json!({"role": "member"}),
        &h.org_key,
    );
    let report = h.service.ingest(membership.clone()).await.unwrap();
    assert!(report.verification.unwrap().is_verified());
    assert!(report.published.is_none());

    let pending = h.store.get(&membership.said).unwrap();
    assert!(matches!(
        pending.sync,
        SyncStatus::Pending { attempts: 1, .. }
    ));

    // Reads still work from the local store while the log is unreachable.
    let graph = h.service.fresh_graph_for(&h.org()).await.unwrap();
    assert_eq!(graph.edge_count(), 1);

    h.substrate.set_offline(false);
    let retry = h.service.retry_pending().await.unwrap();
    assert_eq!(retry.synced, 1);
    assert!(h.store.get(&membership.said).unwrap().is_synced());
    assert_eq!(h.substrate.append_count(), 1);
    assert!(h.store.pending_sync().is_empty());
}

#[tokio::test]
async fn test_publish_abandoned_after_attempt_limit() {
    let h = Harness::with_config(quick_retries(2));
    h.substrate.set_offline(true);

    let membership = signed(
        ORG,
        "EU1",
        MEMBERSHIP_SCHEMA,
        serde_json::json!({"role": "member"}),
        &h.org_key,
    );
    h.service.ingest(membership.clone()).await.unwrap();

    let retry = h.service.retry_pending().await.unwrap();
    assert_eq!(retry.abandoned, 1);
    assert_eq!(retry.synced, 0);
    assert_eq!(
        h.store.get(&membership.said).unwrap().sync,
        SyncStatus::LocalOnly
    );
    assert!(h.store.pending_sync().is_empty());
}

#[tokio::test]
async fn test_peer_imports_log_records_unverified() {
    let h = Harness::new();
    let membership = signed(
        ORG,
        "EU1",
        MEMBERSHIP_SCHEMA,
        serde_json::json!({"role": "member"}),
        &h.org_key,
    );
    h.service.ingest(membership.clone()).await.unwrap();

    let peer = h.peer(Harness::community_config());
    assert!(peer
        .service
        .community_credentials(&h.org(), ReadMode::Trusted)
        .await
        .unwrap()
        .is_empty());

    let imported = peer.store.get(&membership.said).unwrap();
    assert!(!imported.verification.is_verified());
    assert!(imported.is_synced());
    let visible = peer
        .service
        .community_credentials(&h.org(), ReadMode::IncludeUnverified)
        .await
        .unwrap();
    assert_eq!(visible.len(), 1);

    let report = peer.service.verify_pending().await.unwrap();
    assert_eq!(report.verified, 1);
    let graph = peer.service.fresh_graph_for(&h.org()).await.unwrap();
    assert_eq!(graph.node(&Aid::from("EU1")).unwrap().graph_depth, Some(1));
}

#[tokio::test]
async fn test_maintenance_pass() {
    let h = Harness::with_config(quick_retries(5));
    h.substrate.fail_next_appends(1);

    let membership = signed(
        ORG,
        "EU1",
        MEMBERSHIP_SCHEMA,
        serde_json::json!({"role": "member"}),
        &h.org_key,
    );
    let expired = commons_crypto::sign_record(
        commons_integration_tests::draft(
            ORG,
            "EU2",
            MEMBERSHIP_SCHEMA,
            serde_json::json!({"role": "member"}),
        )
        .with_expiration(Utc::now() - chrono::Duration::minutes(5)),
        &h.org_key,
    )
    .unwrap();
    h.service.ingest(membership.clone()).await.unwrap();
    h.store.put(expired.clone()).unwrap();

    let report = h.service.run_maintenance(Utc::now()).await.unwrap();
    assert_eq!(report.expired, 1);
    assert_eq!(report.sync.synced, 1);
    assert!(!h.store.contains(&expired.said).unwrap());
    assert!(h.store.get(&membership.said).unwrap().is_synced());
}
