//! Integration test: ingest through the community service and read the
//! resulting trust graph.

use std::sync::Arc;

use chrono::Utc;
use commons_core::{Aid, CredentialRecord, Said};
use commons_integration_tests::{signed, Harness, ORG};
use commons_store::schema::{ENDORSEMENT_SCHEMA, MEMBERSHIP_SCHEMA, SELF_CLAIM_SCHEMA, STEWARD_SCHEMA};
use commons_store::{ReadMode, SchemaRegistry};
use commons_trust::{build_graph, EdgeKind, ScorePolicy};

/// Org issues U1 a membership, U1 endorses U2.
async fn membership_and_endorsement(h: &Harness) -> (CredentialRecord, CredentialRecord) {
    let u1_key = h.member("EU1");
    h.member("EU2");

    let membership = signed(
        ORG,
        "EU1",
        MEMBERSHIP_SCHEMA,
        serde_json::json!({"role": "member"}),
        &h.org_key,
    );
    let endorsement = signed(
        "EU1",
        "EU2",
        ENDORSEMENT_SCHEMA,
        serde_json::json!({"note": "reliable"}),
        &u1_key,
    );

    for record in [&membership, &endorsement] {
        let report = h.service.ingest(record.clone()).await.unwrap();
        assert!(report.verification.unwrap().is_verified());
        assert!(report.published.is_some());
    }
    (membership, endorsement)
}

#[tokio::test]
async fn test_membership_and_endorsement_depths() {
    let h = Harness::new();
    let (membership, endorsement) = membership_and_endorsement(&h).await;

    let graph = h.service.fresh_graph_for(&h.org()).await.unwrap();
    assert_eq!(graph.node_count(), 3);
    assert_eq!(graph.edge_count(), 2);

    assert_eq!(graph.node(&h.org()).unwrap().graph_depth, Some(0));
    assert_eq!(graph.node(&Aid::from("EU1")).unwrap().graph_depth, Some(1));
    assert_eq!(graph.node(&Aid::from("EU2")).unwrap().graph_depth, Some(2));

    let org = h.org();
    let from_org: Vec<_> = graph.edges_from(&org).collect();
    assert_eq!(from_org.len(), 1);
    assert_eq!(from_org[0].kind, EdgeKind::Membership);
    assert_eq!(from_org[0].said, membership.said);

    let u2 = Aid::from("EU2");
    let into_u2: Vec<_> = graph.edges_to(&u2).collect();
    assert_eq!(into_u2.len(), 1);
    assert_eq!(into_u2[0].kind, EdgeKind::Endorsement);
    assert_eq!(into_u2[0].said, endorsement.said);

    let u1 = graph.node(&Aid::from("EU1")).unwrap();
    assert_eq!(u1.incoming_count, 1);
    assert_eq!(u1.outgoing_count, 1);
    assert!(u1.trust_score > graph.node(&u2).unwrap().trust_score);
}

#[tokio::test]
async fn test_revocation_removes_membership_edge() {
    let h = Harness::new();
    let (membership, endorsement) = membership_and_endorsement(&h).await;
    let org = h.org();
    assert_eq!(h.service.fresh_graph_for(&org).await.unwrap().edge_count(), 2);

    assert!(h
        .service
        .revoke(&membership.said, Said::from("ERevoke1"), "left community")
        .unwrap());

    assert!(h.service.get(&membership.said, ReadMode::Trusted).is_err());
    let revoked = h.service.get(&membership.said, ReadMode::All).unwrap();
    assert!(revoked.is_revoked());

    let graph = h.service.fresh_graph_for(&org).await.unwrap();
    assert_eq!(graph.edges_from(&org).count(), 0);
    assert!(graph.edges.iter().all(|e| e.said != membership.said));
    assert!(graph.edges.iter().any(|e| e.said == endorsement.said));
    assert_eq!(graph.node(&Aid::from("EU1")).unwrap().graph_depth, None);
    assert_eq!(graph.node(&Aid::from("EU2")).unwrap().graph_depth, None);
}

#[tokio::test]
async fn test_bidirectional_endorsements() {
    let h = Harness::new();
    let u1_key = h.member("EU1");
    let u2_key = h.member("EU2");

    for record in [
        signed(ORG, "EU1", MEMBERSHIP_SCHEMA, serde_json::json!({"role": "member"}), &h.org_key),
        signed("EU1", "EU2", ENDORSEMENT_SCHEMA, serde_json::json!({}), &u1_key),
        signed("EU2", "EU1", ENDORSEMENT_SCHEMA, serde_json::json!({}), &u2_key),
    ] {
        h.service.ingest(record).await.unwrap();
    }

    let graph = h.service.fresh_graph_for(&h.org()).await.unwrap();
    let bidirectional: Vec<_> = graph.edges.iter().filter(|e| e.bidirectional).collect();
    assert_eq!(bidirectional.len(), 2);
    assert_eq!(
        graph.node(&Aid::from("EU1")).unwrap().bidirectional_relations,
        1
    );

    let summary = h.service.summary(&h.org()).await.unwrap();
    assert_eq!(summary.total_nodes, 3);
    assert_eq!(summary.total_edges, 3);
    assert_eq!(summary.bidirectional_count, 1);
}

#[tokio::test]
async fn test_roles_and_aliases() {
    let h = Harness::new();
    let steward_key = h.member("ESteward");

    for record in [
        signed(
            ORG,
            "ESteward",
            STEWARD_SCHEMA,
            serde_json::json!({"role": "treasurer"}),
            &h.org_key,
        ),
        signed(
            "ESteward",
            "ESteward",
            SELF_CLAIM_SCHEMA,
            serde_json::json!({"alias": "river"}),
            &steward_key,
        ),
    ] {
        h.service.ingest(record).await.unwrap();
    }

    let graph = h.service.fresh_graph_for(&h.org()).await.unwrap();
    assert_eq!(graph.node(&h.org()).unwrap().role, "Organization");
    let steward = graph.node(&Aid::from("ESteward")).unwrap();
    assert_eq!(steward.role, "treasurer");
    assert_eq!(steward.graph_depth, Some(1));
}

#[tokio::test]
async fn test_top_scores_exclude_org() {
    let h = Harness::new();
    membership_and_endorsement(&h).await;

    let top = h.service.top_scores(&h.org(), 10).await.unwrap();
    assert_eq!(top.len(), 2);
    assert!(top.iter().all(|n| n.aid != h.org()));
    assert_eq!(top[0].aid, Aid::from("EU1"));
    assert!(top[0].score >= top[1].score);
}

#[tokio::test]
async fn test_builds_are_deterministic() {
    let h = Harness::new();
    membership_and_endorsement(&h).await;

    let credentials = h
        .service
        .community_credentials(&h.org(), ReadMode::Trusted)
        .await
        .unwrap();
    let mut reversed = credentials.clone();
    reversed.reverse();

    let schemas = SchemaRegistry::new();
    let policy = ScorePolicy::default();
    let built_at = Utc::now();
    let first = build_graph(&h.org(), &credentials, &schemas, &policy, 7, built_at);
    let second = build_graph(&h.org(), &reversed, &schemas, &policy, 7, built_at);
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_concurrent_reads_share_one_build() {
    let h = Arc::new(Harness::new());
    membership_and_endorsement(&h).await;
    let before = h.service.cache().builds_started();

    let mut handles = Vec::new();
    for _ in 0..8 {
        let h = h.clone();
        handles.push(tokio::spawn(async move {
            h.service.graph_for(&h.org()).await.unwrap()
        }));
    }
    let mut graphs = Vec::new();
    for handle in handles {
        graphs.push(handle.await.unwrap());
    }

    assert_eq!(h.service.cache().builds_started(), before + 1);
    assert!(graphs.iter().all(|g| g.edge_count() == 2));
}

#[tokio::test]
async fn test_subgraph_around_member() {
    let h = Harness::new();
    membership_and_endorsement(&h).await;
    let graph = h.service.fresh_graph_for(&h.org()).await.unwrap();

    let around_u2 = graph.subgraph(&Aid::from("EU2"), 1).unwrap();
    assert_eq!(around_u2.node_count(), 2);
    assert_eq!(around_u2.edge_count(), 1);
    assert!(graph.subgraph(&Aid::from("ENobody"), 1).is_err());
}
