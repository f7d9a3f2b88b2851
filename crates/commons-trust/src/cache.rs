use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::time::Instant;

use commons_core::{Aid, TrustConfig};
use commons_store::SchemaRegistry;

use crate::build_state::{BuildEvent, BuildState, BuildStateMachine};
use crate::error::TrustError;
use crate::graph::{build_graph, TrustGraph};
use crate::score::ScorePolicy;
use crate::source::CredentialSource;

type BuildResult = Result<Arc<TrustGraph>, TrustError>;
type BuildFuture = Shared<BoxFuture<'static, BuildResult>>;

struct OrgEntry {
    state: BuildState,
    graph: Option<Arc<TrustGraph>>,
    invalidated_during_build: bool,
    inflight: Option<BuildFuture>,
}

impl OrgEntry {
    fn new() -> Self {
        Self {
            state: BuildState::Dirty,
            graph: None,
            invalidated_during_build: false,
            inflight: None,
        }
    }

    fn apply(&mut self, event: BuildEvent) {
        match BuildStateMachine::transition(self.state, event) {
            Ok(next) => self.state = next,
            Err(e) => tracing::warn!(error = %e, "ignored build state event"),
        }
    }
}

enum Step {
    Ready(Arc<TrustGraph>),
    Wait {
        build: BuildFuture,
        stale: Option<Arc<TrustGraph>>,
    },
}

struct Inner {
    source: Arc<dyn CredentialSource>,
    schemas: Arc<SchemaRegistry>,
    policy: ScorePolicy,
    config: TrustConfig,
    entries: DashMap<Aid, Arc<Mutex<OrgEntry>>>,
    builds: AtomicU64,
}

/// Per-organisation cache of trust graph snapshots.
///
/// At most one build per organisation runs at a time; concurrent readers
/// attach to the in-flight build. Builds run on their own task, so a reader
/// that gives up does not cancel them.
#[derive(Clone)]
pub struct TrustGraphCache {
    inner: Arc<Inner>,
}

impl TrustGraphCache {
    pub fn new(
        source: Arc<dyn CredentialSource>,
        schemas: Arc<SchemaRegistry>,
        config: TrustConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                source,
                schemas,
                policy: ScorePolicy::new(config.weights),
                config,
                entries: DashMap::new(),
                builds: AtomicU64::new(0),
            }),
        }
    }

    /// Current graph of `org`.
    ///
    /// With stale-while-revalidate on, a previous graph is returned at once
    /// while a rebuild runs in the background. Otherwise behaves like
    /// [`TrustGraphCache::fresh_graph_for`].
    pub async fn graph_for(&self, org: &Aid) -> Result<Arc<TrustGraph>, TrustError> {
        if !self.inner.config.stale_while_revalidate {
            return self.fresh_graph_for(org).await;
        }
        match self.step(org) {
            Step::Ready(graph) => Ok(graph),
            Step::Wait {
                stale: Some(graph), ..
            } => Ok(graph),
            Step::Wait { build, stale: None } => {
                let deadline = Instant::now() + self.inner.config.build_timeout();
                match tokio::time::timeout_at(deadline, build).await {
                    Ok(result) => result,
                    Err(_) => Err(TrustError::Timeout(format!("graph build for {}", org))),
                }
            }
        }
    }

    /// Graph of `org` reflecting every mutation seen so far.
    ///
    /// Waits for in-flight and follow-up builds up to the build deadline. On
    /// timeout or build failure the previous graph is returned when one exists.
    pub async fn fresh_graph_for(&self, org: &Aid) -> Result<Arc<TrustGraph>, TrustError> {
        let deadline = Instant::now() + self.inner.config.build_timeout();
        loop {
            let (build, stale) = match self.step(org) {
                Step::Ready(graph) => return Ok(graph),
                Step::Wait { build, stale } => (build, stale),
            };
            match tokio::time::timeout_at(deadline, build).await {
                Ok(Ok(_)) => continue,
                Ok(Err(e)) => {
                    return match stale {
                        Some(graph) => {
                            tracing::warn!(org = %org, error = %e, "serving stale trust graph after failed build");
                            Ok(graph)
                        }
                        None => Err(e),
                    };
                }
                Err(_) => {
                    return match stale {
                        Some(graph) => {
                            tracing::warn!(org = %org, "serving stale trust graph after build deadline");
                            Ok(graph)
                        }
                        None => Err(TrustError::Timeout(format!("graph build for {}", org))),
                    };
                }
            }
        }
    }

    /// Mark the cached graph of `org` out of date.
    pub fn invalidate(&self, org: &Aid) {
        let Some(entry) = self.inner.entries.get(org).map(|e| e.value().clone()) else {
            return;
        };
        let mut guard = lock(&entry);
        if guard.state == BuildState::Building {
            guard.invalidated_during_build = true;
        }
        guard.apply(BuildEvent::Invalidate);
        tracing::debug!(org = %org, state = %guard.state, "trust graph invalidated");
    }

    /// Mark every cached graph out of date.
    pub fn invalidate_all(&self) {
        let orgs: Vec<Aid> = self.inner.entries.iter().map(|e| e.key().clone()).collect();
        for org in orgs {
            self.invalidate(&org);
        }
    }

    pub fn state_of(&self, org: &Aid) -> Option<BuildState> {
        let entry = self.inner.entries.get(org).map(|e| e.value().clone())?;
        let state = lock(&entry).state;
        Some(state)
    }

    /// Cached graph without triggering a build.
    pub fn cached(&self, org: &Aid) -> Option<Arc<TrustGraph>> {
        let entry = self.inner.entries.get(org).map(|e| e.value().clone())?;
        let graph = lock(&entry).graph.clone();
        graph
    }

    /// Number of builds started since creation.
    pub fn builds_started(&self) -> u64 {
        self.inner.builds.load(Ordering::SeqCst)
    }

    fn entry(&self, org: &Aid) -> Arc<Mutex<OrgEntry>> {
        self.inner
            .entries
            .entry(org.clone())
            .or_insert_with(|| Arc::new(Mutex::new(OrgEntry::new())))
            .value()
            .clone()
    }

    /// Advance the state machine of `org` by one read.
    fn step(&self, org: &Aid) -> Step {
        let entry = self.entry(org);
        let mut guard = lock(&entry);

        if guard.state == BuildState::Clean {
            let generation = self.inner.source.generation();
            let current = guard
                .graph
                .as_ref()
                .filter(|graph| graph.generation == generation)
                .cloned();
            match current {
                Some(graph) => return Step::Ready(graph),
                None => guard.apply(BuildEvent::GenerationChanged),
            }
        }

        if guard.state == BuildState::Dirty {
            guard.apply(BuildEvent::StartBuild);
            guard.invalidated_during_build = false;
            guard.inflight = Some(self.start_build(org.clone(), entry.clone()));
        }

        match guard.inflight.clone() {
            Some(build) => Step::Wait {
                build,
                stale: guard.graph.clone(),
            },
            // Building always carries its future; recover by restarting.
            None => {
                let build = self.start_build(org.clone(), entry.clone());
                guard.inflight = Some(build.clone());
                Step::Wait {
                    build,
                    stale: guard.graph.clone(),
                }
            }
        }
    }

    fn start_build(&self, org: Aid, entry: Arc<Mutex<OrgEntry>>) -> BuildFuture {
        let inner = self.inner.clone();
        let build = async move {
            let started = inner.builds.fetch_add(1, Ordering::SeqCst) + 1;
            tracing::debug!(org = %org, build = started, "trust graph build started");

            // Read before fetching so a concurrent mutation leaves the graph
            // marked older than the source.
            let generation = inner.source.generation();
            let result = inner.source.credentials_for(&org).await.map(|credentials| {
                Arc::new(build_graph(
                    &org,
                    &credentials,
                    &inner.schemas,
                    &inner.policy,
                    generation,
                    Utc::now(),
                ))
            });

            let mut guard = lock(&entry);
            guard.inflight = None;
            match &result {
                Ok(graph) => {
                    let event = if guard.invalidated_during_build {
                        BuildEvent::BuildSuperseded
                    } else {
                        BuildEvent::BuildSucceeded
                    };
                    guard.apply(event);
                    guard.graph = Some(graph.clone());
                    tracing::info!(
                        org = %org,
                        nodes = graph.node_count(),
                        edges = graph.edge_count(),
                        generation,
                        state = %guard.state,
                        "trust graph build finished"
                    );
                }
                Err(e) => {
                    guard.apply(BuildEvent::BuildFailed);
                    tracing::warn!(org = %org, error = %e, "trust graph build failed");
                }
            }
            guard.invalidated_during_build = false;
            result
        }
        .boxed()
        .shared();

        tokio::spawn(build.clone());
        build
    }
}

fn lock(entry: &Mutex<OrgEntry>) -> MutexGuard<'_, OrgEntry> {
    entry.lock().unwrap_or_else(PoisonError::into_inner)
}
