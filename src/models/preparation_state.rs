use serde::{Deserialize, Serialize};
use std::fmt;

/// How far a job's components are towards being usable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PreparationState {
    Pending,
    Preparing,
    Failed,
    Succeeded,
}

impl PreparationState {
    /// Reduce component states to one job-level state.
    ///
    /// Failure dominates, then preparing; the job has succeeded only when every
    /// component has. Anything else is pending.
    pub fn reduce(states: &[PreparationState]) -> PreparationState {
        if states.contains(&Self::Failed) {
            return Self::Failed;
        }

        if states.contains(&Self::Preparing) {
            return Self::Preparing;
        }

        if !states.is_empty() && states.iter().all(|s| *s == Self::Succeeded) {
            return Self::Succeeded;
        }

        Self::Pending
    }
}

impl fmt::Display for PreparationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Preparing => write!(f, "preparing"),
            Self::Failed => write!(f, "failed"),
            Self::Succeeded => write!(f, "succeeded"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::PreparationState::*;
    use super::*;

    #[test]
    fn test_failure_dominates() {
        assert_eq!(
            PreparationState::reduce(&[Failed, Pending, Preparing, Succeeded]),
            Failed
        );
    }

    #[test]
    fn test_all_succeeded() {
        assert_eq!(PreparationState::reduce(&[Succeeded, Succeeded]), Succeeded);
    }

    #[test]
    fn test_all_pending() {
        assert_eq!(PreparationState::reduce(&[Pending, Pending]), Pending);
    }

    #[test]
    fn test_preparing_beats_pending_and_succeeded() {
        assert_eq!(
            PreparationState::reduce(&[Pending, Preparing, Succeeded]),
            Preparing
        );
    }

    #[test]
    fn test_partially_succeeded_is_pending() {
        assert_eq!(PreparationState::reduce(&[Pending, Succeeded]), Pending);
        assert_eq!(PreparationState::reduce(&[]), Pending);
    }
}
