//! Resource lifecycle state machine.
//!
//! `Unloaded -> Initialized -> Started -> Stopped -> (Destroyed | Started)`.
//! The manager checks every transition through [`Lifecycle::can_transition`]
//! and surfaces violations as typed errors instead of panicking.

/// Lifecycle state of one resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lifecycle {
    /// Constructed, not yet initialized. Freshly created resources and
    /// resources whose initialize hook failed stay here.
    Unloaded,
    /// Initialize ran; graph wiring and context are in place.
    Initialized,
    /// Actively running.
    Started,
    /// Stopped after running; may be started again.
    Stopped,
    /// Removed from the graph. Terminal.
    Destroyed,
}

impl Lifecycle {
    /// Whether the state machine permits moving from `self` to `to`.
    #[must_use]
    pub fn can_transition(self, to: Lifecycle) -> bool {
        use Lifecycle::{Destroyed, Initialized, Started, Stopped, Unloaded};
        matches!(
            (self, to),
            (Unloaded, Initialized)
                | (Initialized, Started)
                | (Started, Stopped)
                | (Stopped, Started)
                | (Stopped, Destroyed)
                | (Initialized, Destroyed)
                | (Unloaded, Destroyed)
        )
    }

    /// Whether the resource is currently running.
    #[must_use]
    pub fn is_started(self) -> bool {
        self == Lifecycle::Started
    }

    /// Whether the resource may still participate in graph operations.
    #[must_use]
    pub fn is_live(self) -> bool {
        !matches!(self, Lifecycle::Destroyed)
    }
}

impl std::fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Unloaded => "unloaded",
            Self::Initialized => "initialized",
            Self::Started => "started",
            Self::Stopped => "stopped",
            Self::Destroyed => "destroyed",
        };
        f.write_str(name)
    }
}

/// The lifecycle hook a failure occurred in, for logging and events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecyclePhase {
    /// `Resource::on_initialize`
    Initialize,
    /// `Resource::on_start`
    Start,
    /// `Resource::on_stop`
    Stop,
    /// `Resource::on_dispose`
    Dispose,
}

impl std::fmt::Display for LifecyclePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Initialize => "initialize",
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Dispose => "dispose",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_transitions() {
        assert!(Lifecycle::Unloaded.can_transition(Lifecycle::Initialized));
        assert!(Lifecycle::Initialized.can_transition(Lifecycle::Started));
        assert!(Lifecycle::Started.can_transition(Lifecycle::Stopped));
        assert!(Lifecycle::Stopped.can_transition(Lifecycle::Started));
        assert!(Lifecycle::Stopped.can_transition(Lifecycle::Destroyed));
    }

    #[test]
    fn destroy_before_start_is_allowed() {
        assert!(Lifecycle::Initialized.can_transition(Lifecycle::Destroyed));
        // a resource whose initialize failed can still be cleaned up
        assert!(Lifecycle::Unloaded.can_transition(Lifecycle::Destroyed));
    }

    #[test]
    fn forbidden_transitions() {
        assert!(!Lifecycle::Unloaded.can_transition(Lifecycle::Started));
        assert!(!Lifecycle::Started.can_transition(Lifecycle::Destroyed));
        assert!(!Lifecycle::Started.can_transition(Lifecycle::Started));
        assert!(!Lifecycle::Destroyed.can_transition(Lifecycle::Initialized));
        assert!(!Lifecycle::Destroyed.can_transition(Lifecycle::Started));
    }
}
