/// Shared behavior of the session and trial state machines.
pub trait Phase: Copy + Clone + PartialEq + Send + Sync + std::fmt::Debug + Default {
    /// Whether clicks are accepted in this phase.
    fn allows_input(&self) -> bool;

    /// The unconditional successor, if the phase has one.
    fn next(&self) -> Option<Self>;

    fn is_terminal(&self) -> bool {
        false
    }
}

/// Lifecycle of one trial.
///
/// `Idle -> Presenting -> (Responded | TimedOut) -> Resolving -> Recording
/// -> IntertrialWait -> Idle`. Leaving `Presenting` needs the response race
/// result, so it goes through [`TrialPhase::conclude`] instead of `next`.
#[derive(Copy, Debug, Clone, PartialEq, Eq, Default)]
pub enum TrialPhase {
    #[default]
    Idle,
    Presenting,
    Responded,
    TimedOut,
    Resolving,
    Recording,
    IntertrialWait,
}

impl TrialPhase {
    pub fn conclude(&self, timed_out: bool) -> Option<Self> {
        match self {
            TrialPhase::Presenting if timed_out => Some(TrialPhase::TimedOut),
            TrialPhase::Presenting => Some(TrialPhase::Responded),
            _ => None,
        }
    }
}

impl Phase for TrialPhase {
    fn allows_input(&self) -> bool {
        matches!(self, TrialPhase::Presenting)
    }

    fn next(&self) -> Option<Self> {
        use TrialPhase::*;
        Some(match self {
            Idle => Presenting,
            Presenting => return None,
            Responded | TimedOut => Resolving,
            Resolving => Recording,
            Recording => IntertrialWait,
            IntertrialWait => Idle,
        })
    }
}

/// Lifecycle of a whole session.
#[derive(Copy, Debug, Clone, PartialEq, Eq, Default)]
pub enum SessionPhase {
    #[default]
    Idle,
    Loading,
    Running,
    Ending,
    Finished,
}

impl Phase for SessionPhase {
    fn allows_input(&self) -> bool {
        matches!(self, SessionPhase::Running)
    }

    fn next(&self) -> Option<Self> {
        use SessionPhase::*;
        Some(match self {
            Idle => Loading,
            Loading => Running,
            Running => Ending,
            Ending => Finished,
            Finished => return None,
        })
    }

    fn is_terminal(&self) -> bool {
        matches!(self, SessionPhase::Finished)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trial_cycle_returns_to_idle() {
        let mut phase = TrialPhase::Idle.next().unwrap();
        assert!(phase.allows_input());
        assert_eq!(phase.next(), None);

        phase = phase.conclude(false).unwrap();
        assert_eq!(phase, TrialPhase::Responded);
        assert!(!phase.allows_input());

        let mut seen = vec![phase];
        while phase != TrialPhase::Idle {
            phase = phase.next().unwrap();
            seen.push(phase);
        }
        assert_eq!(
            seen,
            vec![
                TrialPhase::Responded,
                TrialPhase::Resolving,
                TrialPhase::Recording,
                TrialPhase::IntertrialWait,
                TrialPhase::Idle,
            ]
        );
    }

    #[test]
    fn only_presenting_can_conclude() {
        assert_eq!(
            TrialPhase::Presenting.conclude(true),
            Some(TrialPhase::TimedOut)
        );
        assert_eq!(TrialPhase::Recording.conclude(true), None);
        assert!(!TrialPhase::IntertrialWait.allows_input());
    }

    #[test]
    fn session_ends_finished() {
        let mut phase = SessionPhase::default();
        while let Some(next) = phase.next() {
            phase = next;
        }
        assert!(phase.is_terminal());
    }
}
