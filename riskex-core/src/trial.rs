use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::stimulus::{Payload, Position, Stimulus, StimulusKind, Target};

/// One to three stimuli presented together. Built once per session as part
/// of a block and revisited (never rebuilt) on every reshuffle.
#[derive(Debug, Clone, PartialEq)]
pub struct TrialSpec {
    pub stimuli: Vec<Stimulus>,
}

impl TrialSpec {
    pub fn new(stimuli: Vec<Stimulus>) -> Self {
        debug_assert!((1..=3).contains(&stimuli.len()));
        Self { stimuli }
    }

    pub fn len(&self) -> usize {
        self.stimuli.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stimuli.is_empty()
    }

    pub fn paths(&self) -> Vec<&str> {
        self.stimuli.iter().map(|s| s.path.as_str()).collect()
    }
}

/// A stimulus placed in a screen slot for the current trial.
#[derive(Debug, Clone, PartialEq)]
pub struct PlacedStimulus {
    pub stimulus: Stimulus,
    pub position: Position,
}

/// How a trial's reward amount was decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Resolution {
    Sure,
    Win,
    Lose,
    None,
    Unknown,
}

/// Result of presenting one trial. Consumed by the recorder right away.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseOutcome {
    pub selected: Option<Target>,
    pub timed_out: bool,
    pub reward_amount: u32,
    pub resolution: Resolution,
    pub reaction_time_ms: Option<u64>,
}

impl ResponseOutcome {
    pub fn timed_out() -> Self {
        Self {
            selected: None,
            timed_out: true,
            reward_amount: 0,
            resolution: Resolution::None,
            reaction_time_ms: None,
        }
    }

    /// A response that earns nothing, e.g. a background click.
    pub fn unrewarded(target: Target, reaction_time_ms: u64) -> Self {
        Self {
            selected: Some(target),
            timed_out: false,
            reward_amount: 0,
            resolution: Resolution::None,
            reaction_time_ms: Some(reaction_time_ms),
        }
    }
}

/// A presented stimulus as written to the experiment log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresentedStimulus {
    pub path: String,
    pub kind: StimulusKind,
    pub position: Position,
    #[serde(flatten)]
    pub payload: Payload,
}

impl From<&PlacedStimulus> for PresentedStimulus {
    fn from(placed: &PlacedStimulus) -> Self {
        Self {
            path: placed.stimulus.path.clone(),
            kind: placed.stimulus.kind,
            position: placed.position,
            payload: placed.stimulus.payload,
        }
    }
}

/// Append-only experiment log entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrialRecord {
    /// Session-wide trial number, starting at 1.
    pub trial: u64,
    pub block: u64,
    pub trial_within_block: u64,
    pub stimuli: Vec<PresentedStimulus>,
    pub choice: Option<Target>,
    pub chosen_stimulus: Option<String>,
    /// Only set by detection trials: whether the stimulus itself was clicked.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub correct: Option<bool>,
    pub timeout: bool,
    pub reaction_time_ms: Option<u64>,
    pub gamble_outcome: Resolution,
    pub reward_delivered: u32,
    /// Pulses the pump acknowledged; lower than `reward_delivered` when the
    /// peripheral was offline or a write failed.
    pub pulses_confirmed: u32,
    /// Milliseconds since session start on the monotonic clock.
    pub elapsed_ms: u64,
    pub timestamp: DateTime<Utc>,
}
