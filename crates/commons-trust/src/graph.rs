use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use commons_core::{Aid, CredentialKind, CredentialRecord, Said};
use commons_store::SchemaRegistry;

use crate::error::TrustError;
use crate::score::ScorePolicy;

const ORG_ROLE: &str = "Organization";
const MEMBER_ROLE: &str = "Member";

/// Trust relation an edge was derived from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EdgeKind {
    Membership,
    Endorsement,
    Steward,
}

impl EdgeKind {
    fn from_kind(kind: CredentialKind) -> Option<Self> {
        match kind {
            CredentialKind::Membership => Some(Self::Membership),
            CredentialKind::Endorsement => Some(Self::Endorsement),
            CredentialKind::Steward => Some(Self::Steward),
            _ => None,
        }
    }
}

/// Directed issuer → subject edge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrustEdge {
    pub from: Aid,
    pub to: Aid,
    pub kind: EdgeKind,
    /// Credential the edge was derived from.
    pub said: Said,
    /// An edge in the opposite direction also exists.
    pub bidirectional: bool,
}

/// A participant and its derived metrics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrustNode {
    pub aid: Aid,
    pub alias: Option<String>,
    pub role: String,
    pub trust_score: f64,
    /// BFS distance from the organisation; `None` when unreachable.
    pub graph_depth: Option<u32>,
    pub incoming_count: u32,
    pub outgoing_count: u32,
    pub bidirectional_relations: u32,
    pub unique_issuers: u32,
    /// Credentials naming this node as issuer or subject.
    pub credential_count: u32,
}

impl TrustNode {
    fn new(aid: Aid, role: &str) -> Self {
        Self {
            aid,
            alias: None,
            role: role.to_string(),
            trust_score: 0.0,
            graph_depth: None,
            incoming_count: 0,
            outgoing_count: 0,
            bidirectional_relations: 0,
            unique_issuers: 0,
            credential_count: 0,
        }
    }
}

/// Immutable snapshot of an organisation's trust graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrustGraph {
    pub org: Aid,
    pub nodes: BTreeMap<Aid, TrustNode>,
    /// Ordered by credential SAID.
    pub edges: Vec<TrustEdge>,
    pub built_at: DateTime<Utc>,
    /// Source generation the graph was built from.
    pub generation: u64,
}

impl TrustGraph {
    pub fn node(&self, aid: &Aid) -> Option<&TrustNode> {
        self.nodes.get(aid)
    }

    pub fn edges_from<'a>(&'a self, aid: &'a Aid) -> impl Iterator<Item = &'a TrustEdge> + 'a {
        self.edges.iter().filter(move |e| &e.from == aid)
    }

    pub fn edges_to<'a>(&'a self, aid: &'a Aid) -> impl Iterator<Item = &'a TrustEdge> + 'a {
        self.edges.iter().filter(move |e| &e.to == aid)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Neighbourhood of `aid` within `depth` hops, following edges in either
    /// direction. Depth 0 returns the whole graph.
    pub fn subgraph(&self, aid: &Aid, depth: u32) -> Result<TrustGraph, TrustError> {
        if !self.nodes.contains_key(aid) {
            return Err(TrustError::UnknownNode(aid.clone()));
        }
        if depth == 0 {
            return Ok(self.clone());
        }

        let mut keep: BTreeSet<&Aid> = BTreeSet::new();
        keep.insert(aid);
        let mut queue = VecDeque::from([(aid, 0u32)]);
        while let Some((current, d)) = queue.pop_front() {
            if d == depth {
                continue;
            }
            for edge in &self.edges {
                let next = if &edge.from == current {
                    &edge.to
                } else if &edge.to == current {
                    &edge.from
                } else {
                    continue;
                };
                if keep.insert(next) {
                    queue.push_back((next, d + 1));
                }
            }
        }

        Ok(TrustGraph {
            org: self.org.clone(),
            nodes: self
                .nodes
                .iter()
                .filter(|(k, _)| keep.contains(k))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            edges: self
                .edges
                .iter()
                .filter(|e| keep.contains(&e.from) && keep.contains(&e.to))
                .cloned()
                .collect(),
            built_at: self.built_at,
            generation: self.generation,
        })
    }

    /// Highest scoring members, excluding the organisation itself.
    /// Ties are broken by AID.
    pub fn top_scores(&self, limit: usize) -> Vec<&TrustNode> {
        let mut nodes: Vec<&TrustNode> = self
            .nodes
            .values()
            .filter(|n| n.aid != self.org)
            .collect();
        nodes.sort_by(|a, b| {
            b.trust_score
                .total_cmp(&a.trust_score)
                .then_with(|| a.aid.cmp(&b.aid))
        });
        nodes.truncate(limit);
        nodes
    }
}

/// Build the trust graph of `org` from a credential set.
///
/// Pure: the same input set and `built_at` give an identical graph regardless
/// of input order. Untrusted and expired credentials are skipped.
pub fn build_graph(
    org: &Aid,
    credentials: &[CredentialRecord],
    schemas: &SchemaRegistry,
    policy: &ScorePolicy,
    generation: u64,
    built_at: DateTime<Utc>,
) -> TrustGraph {
    let mut usable: Vec<&CredentialRecord> = credentials
        .iter()
        .filter(|c| c.is_trusted() && !c.is_expired(built_at))
        .collect();
    usable.sort_by(|a, b| a.said.cmp(&b.said));
    usable.dedup_by(|a, b| a.said == b.said);

    let mut nodes: BTreeMap<Aid, TrustNode> = BTreeMap::new();
    nodes.insert(org.clone(), TrustNode::new(org.clone(), ORG_ROLE));
    let mut edges: Vec<TrustEdge> = Vec::new();

    for record in &usable {
        let kind = schemas.kind_of(&record.schema);
        match kind {
            CredentialKind::Membership | CredentialKind::Steward | CredentialKind::Endorsement => {
                let issuer_role = if &record.issuer == org { ORG_ROLE } else { MEMBER_ROLE };
                ensure_node(&mut nodes, &record.issuer, issuer_role);

                let subject = ensure_node(&mut nodes, &record.subject, MEMBER_ROLE);
                if kind != CredentialKind::Endorsement && &record.subject != org {
                    if let Some(role) = record.payload_str("role") {
                        subject.role = role.to_string();
                    }
                }

                if record.issuer != record.subject {
                    if let Some(edge_kind) = EdgeKind::from_kind(kind) {
                        edges.push(TrustEdge {
                            from: record.issuer.clone(),
                            to: record.subject.clone(),
                            kind: edge_kind,
                            said: record.said.clone(),
                            bidirectional: false,
                        });
                    }
                }
                count_credential(&mut nodes, record);
            }
            CredentialKind::Invitation => {
                ensure_node(&mut nodes, &record.issuer, MEMBER_ROLE);
                ensure_node(&mut nodes, &record.subject, MEMBER_ROLE);
                count_credential(&mut nodes, record);
            }
            CredentialKind::SelfClaim => {
                let node = ensure_node(&mut nodes, &record.subject, MEMBER_ROLE);
                if let Some(alias) = record
                    .payload_str("alias")
                    .or_else(|| record.payload_str("displayName"))
                {
                    node.alias = Some(alias.to_string());
                }
                count_credential(&mut nodes, record);
            }
            CredentialKind::Revocation | CredentialKind::Other => {}
        }
    }

    // Degree and issuer metrics.
    let mut issuers: HashMap<&Aid, HashSet<&Aid>> = HashMap::new();
    for edge in &edges {
        if let Some(n) = nodes.get_mut(&edge.from) {
            n.outgoing_count += 1;
        }
        if let Some(n) = nodes.get_mut(&edge.to) {
            n.incoming_count += 1;
        }
        issuers.entry(&edge.to).or_default().insert(&edge.from);
    }
    for (aid, set) in &issuers {
        if let Some(n) = nodes.get_mut(*aid) {
            n.unique_issuers = set.len() as u32;
        }
    }

    mark_bidirectional(&mut nodes, &mut edges);

    let depths = depths_from(org, &edges);
    for node in nodes.values_mut() {
        node.graph_depth = depths.get(&node.aid).copied();
        node.trust_score = policy.score(
            node.incoming_count,
            node.bidirectional_relations,
            node.graph_depth,
        );
    }

    tracing::debug!(
        org = %org,
        nodes = nodes.len(),
        edges = edges.len(),
        generation,
        "trust graph built"
    );

    TrustGraph {
        org: org.clone(),
        nodes,
        edges,
        built_at,
        generation,
    }
}

fn ensure_node<'a>(
    nodes: &'a mut BTreeMap<Aid, TrustNode>,
    aid: &Aid,
    role: &str,
) -> &'a mut TrustNode {
    nodes
        .entry(aid.clone())
        .or_insert_with(|| TrustNode::new(aid.clone(), role))
}

fn count_credential(nodes: &mut BTreeMap<Aid, TrustNode>, record: &CredentialRecord) {
    if let Some(n) = nodes.get_mut(&record.issuer) {
        n.credential_count += 1;
    }
    if record.subject != record.issuer {
        if let Some(n) = nodes.get_mut(&record.subject) {
            n.credential_count += 1;
        }
    }
}

/// Each unordered pair with edges both ways counts once for both endpoints.
fn mark_bidirectional(nodes: &mut BTreeMap<Aid, TrustNode>, edges: &mut [TrustEdge]) {
    let directed: HashSet<(Aid, Aid)> = edges
        .iter()
        .map(|e| (e.from.clone(), e.to.clone()))
        .collect();

    let mut pairs: BTreeSet<(Aid, Aid)> = BTreeSet::new();
    for edge in edges.iter_mut() {
        if directed.contains(&(edge.to.clone(), edge.from.clone())) {
            edge.bidirectional = true;
            let pair = if edge.from < edge.to {
                (edge.from.clone(), edge.to.clone())
            } else {
                (edge.to.clone(), edge.from.clone())
            };
            pairs.insert(pair);
        }
    }

    for (a, b) in pairs {
        for aid in [&a, &b] {
            if let Some(n) = nodes.get_mut(aid) {
                n.bidirectional_relations += 1;
            }
        }
    }
}

fn depths_from(org: &Aid, edges: &[TrustEdge]) -> HashMap<Aid, u32> {
    let mut depths = HashMap::new();
    depths.insert(org.clone(), 0u32);
    let mut queue = VecDeque::from([org.clone()]);
    while let Some(current) = queue.pop_front() {
        let d = depths[&current];
        for edge in edges.iter().filter(|e| e.from == current) {
            if !depths.contains_key(&edge.to) {
                depths.insert(edge.to.clone(), d + 1);
                queue.push_back(edge.to.clone());
            }
        }
    }
    depths
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use commons_core::{SchemaId, Verification};
    use commons_store::schema::{
        ENDORSEMENT_SCHEMA, INVITATION_SCHEMA, MEMBERSHIP_SCHEMA, SELF_CLAIM_SCHEMA,
    };

    fn cred(said: &str, issuer: &str, subject: &str, schema: &str) -> CredentialRecord {
        let mut r = CredentialRecord::new(
            Said::from(said),
            Aid::from(issuer),
            Aid::from(subject),
            SchemaId::from(schema),
            serde_json::json!({"role": "member"}),
        );
        r.verification = Verification::verified(Utc::now(), 0);
        r
    }

    fn build(creds: &[CredentialRecord]) -> TrustGraph {
        build_graph(
            &Aid::from("EOrg"),
            creds,
            &SchemaRegistry::new(),
            &ScorePolicy::default(),
            1,
            Utc::now(),
        )
    }

    #[test]
    fn test_depths_follow_edges() {
        let g = build(&[
            cred("EA", "EOrg", "EU1", MEMBERSHIP_SCHEMA),
            cred("EB", "EU1", "EU2", ENDORSEMENT_SCHEMA),
        ]);
        assert_eq!(g.node(&Aid::from("EOrg")).unwrap().graph_depth, Some(0));
        assert_eq!(g.node(&Aid::from("EU1")).unwrap().graph_depth, Some(1));
        assert_eq!(g.node(&Aid::from("EU2")).unwrap().graph_depth, Some(2));
        assert_eq!(g.edge_count(), 2);
        assert_eq!(g.node(&Aid::from("EU1")).unwrap().role, "member");
        assert_eq!(g.node(&Aid::from("EOrg")).unwrap().role, ORG_ROLE);
    }

    #[test]
    fn test_untrusted_credentials_are_skipped() {
        let mut unverified = cred("EA", "EOrg", "EU1", MEMBERSHIP_SCHEMA);
        unverified.verification = Verification::unverified();
        let expired = cred("EB", "EOrg", "EU2", MEMBERSHIP_SCHEMA)
            .with_expiration(Utc::now() - Duration::days(1));

        let g = build(&[unverified, expired]);
        assert_eq!(g.node_count(), 1);
        assert_eq!(g.edge_count(), 0);
    }

    #[test]
    fn test_bidirectional_counted_once_per_pair() {
        let g = build(&[
            cred("EA", "EU1", "EU2", ENDORSEMENT_SCHEMA),
            cred("EB", "EU2", "EU1", ENDORSEMENT_SCHEMA),
            cred("EC", "EU1", "EU2", MEMBERSHIP_SCHEMA),
        ]);
        assert!(g.edges.iter().all(|e| e.bidirectional));
        assert_eq!(g.node(&Aid::from("EU1")).unwrap().bidirectional_relations, 1);
        assert_eq!(g.node(&Aid::from("EU2")).unwrap().bidirectional_relations, 1);
        assert_eq!(g.node(&Aid::from("EU2")).unwrap().incoming_count, 2);
        assert_eq!(g.node(&Aid::from("EU2")).unwrap().unique_issuers, 1);
    }

    #[test]
    fn test_unreachable_node_has_no_depth() {
        let g = build(&[cred("EA", "EU1", "EU2", ENDORSEMENT_SCHEMA)]);
        let u1 = g.node(&Aid::from("EU1")).unwrap();
        assert_eq!(u1.graph_depth, None);
        assert_eq!(u1.trust_score, 0.0);
    }

    #[test]
    fn test_nodes_only_kinds() {
        let mut claim = cred("EC", "EU3", "EU3", SELF_CLAIM_SCHEMA);
        claim.payload = serde_json::json!({"displayName": "Ada"});
        let g = build(&[cred("EI", "EOrg", "EU4", INVITATION_SCHEMA), claim]);
        assert_eq!(g.edge_count(), 0);
        assert_eq!(g.node(&Aid::from("EU3")).unwrap().alias.as_deref(), Some("Ada"));
        assert!(g.node(&Aid::from("EU4")).is_some());
    }

    #[test]
    fn test_input_order_does_not_matter() {
        let at = Utc::now();
        let a = cred("EA", "EOrg", "EU1", MEMBERSHIP_SCHEMA);
        let b = cred("EB", "EU1", "EU2", ENDORSEMENT_SCHEMA);
        let c = cred("EC", "EU2", "EU1", ENDORSEMENT_SCHEMA);
        let registry = SchemaRegistry::new();
        let policy = ScorePolicy::default();
        let org = Aid::from("EOrg");

        let g1 = build_graph(&org, &[a.clone(), b.clone(), c.clone()], &registry, &policy, 3, at);
        let g2 = build_graph(&org, &[c, a.clone(), b, a], &registry, &policy, 3, at);
        assert_eq!(
            serde_json::to_string(&g1).unwrap(),
            serde_json::to_string(&g2).unwrap()
        );
    }

    #[test]
    fn test_subgraph_and_top_scores() {
        let g = build(&[
            cred("EA", "EOrg", "EU1", MEMBERSHIP_SCHEMA),
            cred("EB", "EU1", "EU2", ENDORSEMENT_SCHEMA),
            cred("EC", "EU2", "EU3", ENDORSEMENT_SCHEMA),
        ]);

        let sub = g.subgraph(&Aid::from("EU1"), 1).unwrap();
        assert_eq!(sub.node_count(), 3);
        assert!(sub.node(&Aid::from("EU3")).is_none());
        assert_eq!(sub.edge_count(), 2);
        assert_eq!(g.subgraph(&Aid::from("EU1"), 0).unwrap(), g);
        assert!(matches!(
            g.subgraph(&Aid::from("ENobody"), 1),
            Err(TrustError::UnknownNode(_))
        ));

        let top = g.top_scores(2);
        assert_eq!(top.len(), 2);
        assert_eq!(top[0].aid, Aid::from("EU1"));
        assert!(top.iter().all(|n| n.aid != Aid::from("EOrg")));
    }
}
