use chrono::{DateTime, SecondsFormat, Utc};
use riskex_core::TrialRecord;
use serde::{Deserialize, Serialize};

pub const RECORD_VERSION: &str = "42";

/// Everything written for a session at a checkpoint or at its end.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub subject: String,
    pub experiment_type: String,
    pub parameters: serde_json::Value,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub total_trials: u64,
    pub total_blocks: u64,
    pub version: String,
    #[serde(default)]
    pub saved_locally: bool,
    pub trials: Vec<TrialRecord>,
}

impl SessionRecord {
    /// `<subject>_<experimentType>_<stamp>.json`, stamped with `end_time`.
    pub fn file_name(&self) -> String {
        format!(
            "{}_{}_{}.json",
            safe_component(&self.subject),
            self.experiment_type,
            file_stamp(self.end_time)
        )
    }

    /// Key used by the local fallback store.
    pub fn local_key(&self) -> String {
        format!(
            "experiment_data_{}_{}",
            safe_component(&self.subject),
            file_stamp(self.end_time)
        )
    }

    pub fn subject_dir(&self) -> String {
        safe_component(&self.subject)
    }
}

/// ISO-8601 timestamp with `:` and `.` replaced so it is safe in file names.
pub fn file_stamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
        .replace([':', '.'], "-")
}

fn safe_component(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .map(|c| if matches!(c, '/' | '\\' | ':') { '_' } else { c })
        .collect();
    if cleaned.is_empty() {
        "UnknownSubject".to_string()
    } else {
        cleaned
    }
}
