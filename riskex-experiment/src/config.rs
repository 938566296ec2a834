use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::error::ParameterError;

/// Per-subject parameter file, loaded once when a session starts.
///
/// Field names follow the parameter file (`ChoiceTimeOut`, ...). Missing
/// fields take their defaults and unrecognized ones are carried along in
/// `extra` so they end up in the persisted record untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct SessionParameters {
    /// Response window, ms.
    #[serde(deserialize_with = "lenient_ms")]
    pub choice_time_out: u64,
    /// Blank screen between trials, ms.
    #[serde(deserialize_with = "lenient_ms")]
    pub inter_trial_interval: u64,
    /// How long each pulse opens the pump, ms.
    #[serde(deserialize_with = "lenient_ms")]
    pub pump_duration: u64,
    /// Pause after each reward pulse, ms.
    #[serde(deserialize_with = "lenient_ms")]
    pub reward_gap: u64,
    /// Blank screen between the choice and the outcome reveal, ms.
    #[serde(deserialize_with = "lenient_ms")]
    pub outcome_delay: u64,
    /// Flush the log every this many completed trials.
    #[serde(deserialize_with = "lenient_ms")]
    pub checkpoint_every: u64,
    /// Stop after this many trials; absent means run until stopped.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_trials: Option<u64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for SessionParameters {
    fn default() -> Self {
        Self {
            choice_time_out: 10_000,
            inter_trial_interval: 1_000,
            pump_duration: 100,
            reward_gap: 200,
            outcome_delay: 200,
            checkpoint_every: 10,
            total_trials: None,
            extra: Map::new(),
        }
    }
}

impl SessionParameters {
    pub fn from_json(text: &str) -> Result<Self, ParameterError> {
        let value: Value = serde_json::from_str(text)?;
        if !value.is_object() {
            return Err(ParameterError::NotAnObject);
        }
        Ok(serde_json::from_value(value)?)
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    pub fn choice_timeout(&self) -> Duration {
        Duration::from_millis(self.choice_time_out)
    }

    pub fn inter_trial(&self) -> Duration {
        Duration::from_millis(self.inter_trial_interval)
    }

    pub fn gap(&self) -> Duration {
        Duration::from_millis(self.reward_gap)
    }

    pub fn outcome_blank(&self) -> Duration {
        Duration::from_millis(self.outcome_delay)
    }

    /// Pump duration as written to the peripheral.
    pub fn pump_ms(&self) -> u32 {
        self.pump_duration.min(u32::MAX as u64) as u32
    }

    pub fn is_checkpoint(&self, trial_index: u64) -> bool {
        self.checkpoint_every > 0 && trial_index > 0 && trial_index % self.checkpoint_every == 0
    }
}

// Parameter files are hand-edited: accept 10000, 10000.0 and "10000".
fn lenient_ms<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;

    match Value::deserialize(deserializer)? {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f.round() as u64))
            .ok_or_else(|| D::Error::custom(format!("expected a non-negative duration, got {n}"))),
        Value::String(s) => s
            .trim()
            .parse::<u64>()
            .map_err(|_| D::Error::custom(format!("expected a duration in ms, got {s:?}"))),
        other => Err(D::Error::custom(format!(
            "expected a duration in ms, got {other}"
        ))),
    }
}

/// How the stimuli of a trial are put on screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presentation {
    /// All stimuli at once, each in its own slot.
    Simultaneous,
    /// One stimulus after the other in the center slot, each with its own
    /// response window.
    Sequential,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExperimentVariant {
    /// One stimulus per trial; clicking it is rewarded, clicking the
    /// background is a miss.
    Detection,
    SureVsSure,
    GambleVsGamble,
    GambleVsSure,
    ThreeGambles,
    /// Legacy gamble-vs-sure shown one at a time.
    SequentialPair,
}

impl ExperimentVariant {
    pub const ALL: [ExperimentVariant; 6] = [
        ExperimentVariant::Detection,
        ExperimentVariant::SureVsSure,
        ExperimentVariant::GambleVsGamble,
        ExperimentVariant::GambleVsSure,
        ExperimentVariant::ThreeGambles,
        ExperimentVariant::SequentialPair,
    ];

    /// Tag written as `experimentType` in session records.
    pub fn experiment_type(&self) -> &'static str {
        match self {
            ExperimentVariant::Detection => "detection",
            ExperimentVariant::SureVsSure => "choice",
            ExperimentVariant::GambleVsGamble => "gamble_vs_gamble",
            ExperimentVariant::GambleVsSure => "gamble_vs_sure",
            ExperimentVariant::ThreeGambles => "3gambles",
            ExperimentVariant::SequentialPair => "sequential",
        }
    }

    pub fn presentation(&self) -> Presentation {
        match self {
            ExperimentVariant::SequentialPair => Presentation::Sequential,
            _ => Presentation::Simultaneous,
        }
    }

    pub fn accepts_background(&self) -> bool {
        matches!(self, ExperimentVariant::Detection)
    }

    pub fn needs_sure(&self) -> bool {
        !matches!(
            self,
            ExperimentVariant::GambleVsGamble | ExperimentVariant::ThreeGambles
        )
    }

    pub fn needs_gamble(&self) -> bool {
        !matches!(self, ExperimentVariant::SureVsSure)
    }
}

impl fmt::Display for ExperimentVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.experiment_type())
    }
}

impl FromStr for ExperimentVariant {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|v| {
                v.experiment_type() == wanted
                    || serde_json::to_value(v).ok().and_then(|j| j.as_str().map(str::to_owned))
                        == Some(wanted.clone())
            })
            .ok_or_else(|| format!("unknown experiment variant {s:?}"))
    }
}

/// Everything needed to set up a session besides the subject's parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct ExperimentConfig {
    pub variant: ExperimentVariant,
    pub sure_folder: String,
    pub gamble_folder: String,
    /// Reward feedback sound, if any.
    pub tone: Option<String>,
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            variant: ExperimentVariant::GambleVsSure,
            sure_folder: "/mkturkfolders/imagebags/sure_options".into(),
            gamble_folder: "/mkturkfolders/imagebags/gamble_options".into(),
            tone: Some("/mkturkfolders/sounds/au0.wav".into()),
        }
    }
}
