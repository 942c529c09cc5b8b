//! Transcript message types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::time::Duration;

// ============================================================================
// Messages
// ============================================================================

/// A transcript entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum Message {
    User { content: String },
    Assistant(AssistantMessage),
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Message::User {
            content: content.into(),
        }
    }

    pub fn as_assistant(&self) -> Option<&AssistantMessage> {
        match self {
            Message::Assistant(assistant) => Some(assistant),
            Message::User { .. } => None,
        }
    }
}

/// Result of one council pipeline run.
///
/// `loading`, `timers` and `progress` only exist client-side; messages loaded
/// from the backend get their defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssistantMessage {
    #[serde(default)]
    pub stage1: Option<Vec<Stage1Result>>,
    #[serde(default)]
    pub stage2: Option<Vec<Stage2Result>>,
    #[serde(default)]
    pub stage3: Option<Stage3Result>,
    #[serde(default)]
    pub metadata: Option<Metadata>,
    #[serde(default)]
    pub loading: LoadingFlags,
    #[serde(default)]
    pub timers: StageTimers,
    #[serde(default)]
    pub progress: Progress,
}

impl AssistantMessage {
    /// Placeholder appended before any event arrives
    pub fn placeholder() -> Self {
        Self::default()
    }
}

// ============================================================================
// Stage results
// ============================================================================

/// One council member's answer to the user query
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stage1Result {
    pub model: String,
    #[serde(default)]
    pub response: Option<String>,
    #[serde(default)]
    pub error: Option<bool>,
    #[serde(default)]
    pub error_message: Option<String>,
}

impl Stage1Result {
    pub fn is_error(&self) -> bool {
        self.error.unwrap_or(false)
    }
}

/// One council member's ranking of the anonymized stage 1 answers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stage2Result {
    pub model: String,
    #[serde(default)]
    pub ranking: Option<String>,
    #[serde(default)]
    pub parsed_ranking: Vec<String>,
    #[serde(default)]
    pub error: Option<bool>,
    #[serde(default)]
    pub error_message: Option<String>,
}

impl Stage2Result {
    pub fn is_error(&self) -> bool {
        self.error.unwrap_or(false)
    }
}

/// The chairman's synthesis
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stage3Result {
    pub model: String,
    #[serde(default)]
    pub response: String,
    #[serde(default)]
    pub error: Option<bool>,
    #[serde(default)]
    pub error_message: Option<String>,
}

impl Stage3Result {
    pub fn is_error(&self) -> bool {
        self.error.unwrap_or(false)
    }
}

// ============================================================================
// Metadata
// ============================================================================

/// Open-ended turn metadata. Contributions merge key by key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Metadata(pub Map<String, Value>);

/// Average position of a model across all stage 2 rankings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateRanking {
    pub model: String,
    pub average_rank: f64,
    #[serde(default)]
    pub rankings_count: u32,
}

impl Metadata {
    /// Copy of `self` with every key of `other` overlaid
    #[must_use]
    pub fn merged(&self, other: &Map<String, Value>) -> Self {
        let mut merged = self.0.clone();
        for (key, value) in other {
            merged.insert(key.clone(), value.clone());
        }
        Metadata(merged)
    }

    pub fn search_query(&self) -> Option<&str> {
        self.0.get("search_query").and_then(Value::as_str)
    }

    pub fn search_context(&self) -> Option<&str> {
        self.0.get("search_context").and_then(Value::as_str)
    }

    /// Anonymization label ("Response A") -> real model id
    pub fn label_to_model(&self) -> BTreeMap<String, String> {
        self.0
            .get("label_to_model")
            .and_then(Value::as_object)
            .map(|map| {
                map.iter()
                    .filter_map(|(label, model)| Some((label.clone(), model.as_str()?.to_string())))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Best first. Entries that don't parse are dropped.
    pub fn aggregate_rankings(&self) -> Vec<AggregateRanking> {
        self.0
            .get("aggregate_rankings")
            .and_then(Value::as_array)
            .map(|entries| {
                entries
                    .iter()
                    .filter_map(|entry| AggregateRanking::deserialize(entry).ok())
                    .collect()
            })
            .unwrap_or_default()
    }
}

// ============================================================================
// Client-side turn state
// ============================================================================

/// Pipeline phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    One,
    Two,
    Three,
}

impl Stage {
    pub const ALL: [Stage; 3] = [Stage::One, Stage::Two, Stage::Three];

    pub fn label(self) -> &'static str {
        match self {
            Stage::One => "Stage 1",
            Stage::Two => "Stage 2",
            Stage::Three => "Stage 3",
        }
    }
}

/// Per-phase activity flags
#[allow(clippy::struct_excessive_bools)] // one flag per pipeline phase
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadingFlags {
    pub search: bool,
    pub stage1: bool,
    pub stage2: bool,
    pub stage3: bool,
}

impl LoadingFlags {
    pub fn stage(&self, stage: Stage) -> bool {
        match stage {
            Stage::One => self.stage1,
            Stage::Two => self.stage2,
            Stage::Three => self.stage3,
        }
    }

    pub fn any(&self) -> bool {
        self.search || self.stage1 || self.stage2 || self.stage3
    }

    /// The latest pipeline stage currently marked active
    pub fn active_stage(&self) -> Option<Stage> {
        Stage::ALL.into_iter().rev().find(|s| self.stage(*s))
    }
}

/// Wall-clock start/end per stage
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageTimers {
    pub stage1_start: Option<DateTime<Utc>>,
    pub stage1_end: Option<DateTime<Utc>>,
    pub stage2_start: Option<DateTime<Utc>>,
    pub stage2_end: Option<DateTime<Utc>>,
    pub stage3_start: Option<DateTime<Utc>>,
    pub stage3_end: Option<DateTime<Utc>>,
}

impl StageTimers {
    pub fn span(&self, stage: Stage) -> (Option<DateTime<Utc>>, Option<DateTime<Utc>>) {
        match stage {
            Stage::One => (self.stage1_start, self.stage1_end),
            Stage::Two => (self.stage2_start, self.stage2_end),
            Stage::Three => (self.stage3_start, self.stage3_end),
        }
    }

    /// `end - start` once the stage finished, `now - start` while it runs,
    /// `None` before it started. Clock skew clamps to zero.
    pub fn elapsed(&self, stage: Stage, now: DateTime<Utc>) -> Option<Duration> {
        let (start, end) = self.span(stage);
        let start = start?;
        let until = end.unwrap_or(now);
        Some((until - start).to_std().unwrap_or_default())
    }
}

/// Response-count progress for one fan-out stage
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageProgress {
    pub count: u32,
    pub total: u32,
    pub current_model: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    pub stage1: StageProgress,
    pub stage2: StageProgress,
}
