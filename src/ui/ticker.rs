//! Scoped periodic tick for the active stage's elapsed-time display

use crate::state_machine::Stage;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::{CancellationToken, DropGuard};

/// Calls `on_tick` every period until dropped
pub struct StageTicker {
    stage: Stage,
    _guard: DropGuard,
}

impl StageTicker {
    pub fn start(stage: Stage, period: Duration, mut on_tick: impl FnMut() + Send + 'static) -> Self {
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // The first tick completes immediately
            interval.tick().await;
            loop {
                tokio::select! {
                    biased;
                    () = token.cancelled() => break,
                    _ = interval.tick() => on_tick(),
                }
            }
            tracing::trace!(stage = stage.label(), "Stage ticker stopped");
        });

        Self {
            stage,
            _guard: cancel.drop_guard(),
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }
}
