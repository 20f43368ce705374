use crate::utils::errors::FailureKind;
use std::fmt;

/// Lifecycle of one rotation run.
///
/// ```text
/// Idle -> LockAcquired -> Archiving -> Verifying -> Classifying -> Pruning -> Done
///   |          \______________ any non-terminal state ______________/
///   |                                   |
///   +-> Aborted(LockHeld)           Failed(kind)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    LockAcquired,
    Archiving,
    Verifying,
    Classifying,
    Pruning,
    Done,
    Failed(FailureKind),
    Aborted(FailureKind),
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Done | RunState::Failed(_) | RunState::Aborted(_))
    }

    pub fn can_transition_to(&self, next: RunState) -> bool {
        use RunState::*;
        match (*self, next) {
            (from, _) if from.is_terminal() => false,
            (_, Failed(_)) => true,
            (Idle, Aborted(FailureKind::LockHeld)) => true,
            (Idle, LockAcquired)
            | (LockAcquired, Archiving)
            | (Archiving, Verifying)
            | (Verifying, Classifying)
            | (Classifying, Pruning)
            | (Pruning, Done) => true,
            _ => false,
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunState::Failed(kind) => write!(f, "Failed({:?})", kind),
            RunState::Aborted(kind) => write!(f, "Aborted({:?})", kind),
            other => write!(f, "{:?}", other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_transitions() {
        let path = [
            RunState::Idle,
            RunState::LockAcquired,
            RunState::Archiving,
            RunState::Verifying,
            RunState::Classifying,
            RunState::Pruning,
            RunState::Done,
        ];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
        assert!(!RunState::Archiving.can_transition_to(RunState::Pruning));
        assert!(!RunState::Verifying.can_transition_to(RunState::Archiving));
    }

    #[test]
    fn test_terminal_states() {
        let failed = RunState::Failed(FailureKind::Integrity);
        assert!(RunState::Verifying.can_transition_to(failed));
        assert!(RunState::Idle.can_transition_to(failed));
        assert!(!RunState::Done.can_transition_to(failed));
        assert!(!failed.can_transition_to(RunState::Idle));

        let aborted = RunState::Aborted(FailureKind::LockHeld);
        assert!(RunState::Idle.can_transition_to(aborted));
        assert!(!RunState::LockAcquired.can_transition_to(aborted));
        assert!(!RunState::Idle.can_transition_to(RunState::Aborted(FailureKind::Io)));
        assert_eq!(aborted.to_string(), "Aborted(LockHeld)");
    }
}
