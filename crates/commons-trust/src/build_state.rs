use std::fmt;

use crate::error::TrustError;

/// Per-organisation state of the cached trust graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuildState {
    /// Cached graph matches the source generation.
    Clean,
    /// Cached graph (if any) is out of date.
    Dirty,
    /// A rebuild is in flight.
    Building,
}

impl fmt::Display for BuildState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Clean => write!(f, "Clean"),
            Self::Dirty => write!(f, "Dirty"),
            Self::Building => write!(f, "Building"),
        }
    }
}

/// Events that drive [`BuildState`] transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildEvent {
    /// Explicit invalidation after a store mutation.
    Invalidate,
    /// Source generation moved past the cached graph.
    GenerationChanged,
    /// A reader started a rebuild.
    StartBuild,
    /// Build finished and nothing changed meanwhile.
    BuildSucceeded,
    /// Build finished but was invalidated while running.
    BuildSuperseded,
    /// Build failed.
    BuildFailed,
}

/// Valid transitions:
/// - Clean → Dirty (Invalidate, GenerationChanged)
/// - Dirty → Dirty (Invalidate, GenerationChanged)
/// - Dirty → Building (StartBuild)
/// - Building → Building (Invalidate, GenerationChanged)
/// - Building → Clean (BuildSucceeded)
/// - Building → Dirty (BuildSuperseded, BuildFailed)
///
/// There is no terminal failure state.
pub struct BuildStateMachine;

impl BuildStateMachine {
    pub fn transition(current: BuildState, event: BuildEvent) -> Result<BuildState, TrustError> {
        use BuildEvent::*;
        use BuildState::*;

        let next = match (current, event) {
            (Clean, Invalidate | GenerationChanged) => Dirty,
            (Dirty, Invalidate | GenerationChanged) => Dirty,
            (Dirty, StartBuild) => Building,
            (Building, Invalidate | GenerationChanged) => Building,
            (Building, BuildSucceeded) => Clean,
            (Building, BuildSuperseded | BuildFailed) => Dirty,
            _ => {
                return Err(TrustError::InvalidTransition {
                    from: current,
                    event,
                })
            }
        };

        tracing::trace!(from = %current, to = %next, event = ?event, "build state transition");
        Ok(next)
    }

    pub fn can_transition(current: BuildState, event: BuildEvent) -> bool {
        Self::transition(current, event).is_ok()
    }
}
