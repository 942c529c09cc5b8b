//! Pure state transition function
//!
//! Folds one streamed event into the open assistant message. The input is
//! never modified; every transition returns a fresh message value.

use super::message::{AssistantMessage, Metadata, StageProgress};
use super::{Effect, Event};
use chrono::{DateTime, Utc};

/// Result of a state transition
#[derive(Debug, Clone, PartialEq)]
pub struct TransitionResult {
    pub message: AssistantMessage,
    pub effects: Vec<Effect>,
}

impl TransitionResult {
    pub fn new(message: AssistantMessage) -> Self {
        Self {
            message,
            effects: vec![],
        }
    }

    pub fn with_effect(mut self, effect: Effect) -> Self {
        self.effects.push(effect);
        self
    }
}

/// Pure transition function.
///
/// Given the same message, event and clock reading it always produces the
/// same result. `now` stamps the stage timers.
#[allow(clippy::too_many_lines)] // one arm per event kind
pub fn transition(message: &AssistantMessage, event: &Event, now: DateTime<Utc>) -> TransitionResult {
    let mut next = message.clone();

    match event {
        // ============================================================
        // Web search
        // ============================================================
        Event::SearchStart => {
            next.loading.search = true;
        }

        Event::SearchComplete { data } => {
            next.loading.search = false;
            let mut contribution = serde_json::Map::new();
            contribution.insert("search_query".to_string(), data.search_query.clone().into());
            contribution.insert(
                "search_context".to_string(),
                data.search_context.clone().into(),
            );
            next.metadata = Some(merge_metadata(message.metadata.as_ref(), &contribution));
        }

        // ============================================================
        // Stage 1: individual responses
        // ============================================================
        Event::Stage1Start => {
            next.loading.stage1 = true;
            next.timers.stage1_start = Some(now);
        }

        Event::Stage1Init { total } => {
            next.progress.stage1 = StageProgress {
                count: 0,
                total: *total,
                current_model: None,
            };
        }

        Event::Stage1Progress { count, total, data } => {
            let mut accumulated = message.stage1.clone().unwrap_or_default();
            accumulated.push(data.clone());
            next.stage1 = Some(accumulated);
            next.progress.stage1 = advance(&message.progress.stage1, *count, *total, &data.model);
        }

        Event::Stage1Complete { data } => {
            next.stage1 = Some(data.clone());
            next.loading.stage1 = false;
            next.timers.stage1_end = Some(now);
        }

        // ============================================================
        // Stage 2: peer rankings
        // ============================================================
        Event::Stage2Start => {
            next.loading.stage2 = true;
            next.timers.stage2_start = Some(now);
        }

        Event::Stage2Init { total } => {
            next.progress.stage2 = StageProgress {
                count: 0,
                total: *total,
                current_model: None,
            };
        }

        Event::Stage2Progress { count, total, data } => {
            let mut accumulated = message.stage2.clone().unwrap_or_default();
            accumulated.push(data.clone());
            next.stage2 = Some(accumulated);
            next.progress.stage2 = advance(&message.progress.stage2, *count, *total, &data.model);
        }

        Event::Stage2Complete { data, metadata } => {
            next.stage2 = Some(data.clone());
            next.loading.stage2 = false;
            next.timers.stage2_end = Some(now);
            if let Some(contribution) = metadata {
                next.metadata = Some(merge_metadata(message.metadata.as_ref(), contribution));
            }
        }

        // ============================================================
        // Stage 3: chairman synthesis
        // ============================================================
        Event::Stage3Start => {
            next.loading.stage3 = true;
            next.timers.stage3_start = Some(now);
        }

        Event::Stage3Complete { data } => {
            next.stage3 = Some(data.clone());
            next.loading.stage3 = false;
            next.timers.stage3_end = Some(now);
        }

        // ============================================================
        // Turn-level signals: no message change
        // ============================================================
        Event::TitleComplete { data } => {
            let title = data.as_ref().and_then(|d| d.title.clone());
            let mut result = TransitionResult::new(next);
            if let Some(title) = title.filter(|t| !t.trim().is_empty()) {
                result = result.with_effect(Effect::ApplyTitle { title });
            }
            return result.with_effect(Effect::ReloadConversations);
        }

        Event::Complete => {
            return TransitionResult::new(next).with_effect(Effect::TurnComplete);
        }

        Event::Error { message: error } => {
            tracing::warn!(error = ?error, "Council pipeline reported an error");
            return TransitionResult::new(next).with_effect(Effect::turn_failed(error.clone()));
        }

        Event::Unknown => {
            tracing::debug!("Ignoring unrecognized event");
        }
    }

    TransitionResult::new(next)
}

fn merge_metadata(
    current: Option<&Metadata>,
    contribution: &serde_json::Map<String, serde_json::Value>,
) -> Metadata {
    current.cloned().unwrap_or_default().merged(contribution)
}

/// Progress after one `*_progress` event. `count`/`total` never move
/// backwards within a stage; `current_model` is only the latest reporter.
fn advance(prev: &StageProgress, count: u32, total: Option<u32>, model: &str) -> StageProgress {
    StageProgress {
        count: count.max(prev.count),
        total: total.unwrap_or(prev.total).max(prev.total),
        current_model: Some(model.to_string()),
    }
}
