//! Per-turn cancellation handles
//!
//! One live token per conversation. Starting a turn replaces (and cancels)
//! any token still registered for that conversation; aborting removes the
//! token so a second abort finds nothing.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use tokio_util::sync::CancellationToken;

/// Cancellation handle for a single turn
#[derive(Debug, Clone)]
pub struct TurnToken {
    conversation_id: String,
    turn_id: u64,
    cancel: CancellationToken,
}

impl TurnToken {
    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    pub fn turn_id(&self) -> u64 {
        self.turn_id
    }

    /// Token handed to the transport
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Registry of live turn tokens, keyed by conversation
#[derive(Debug, Default)]
pub struct TurnTokens {
    next_turn_id: AtomicU64,
    live: Mutex<HashMap<String, TurnToken>>,
}

impl TurnTokens {
    pub fn new() -> Self {
        Self::default()
    }

    fn live(&self) -> std::sync::MutexGuard<'_, HashMap<String, TurnToken>> {
        self.live.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a fresh token for `conversation_id`
    pub fn begin(&self, conversation_id: &str) -> TurnToken {
        let token = TurnToken {
            conversation_id: conversation_id.to_string(),
            turn_id: self.next_turn_id.fetch_add(1, Ordering::Relaxed),
            cancel: CancellationToken::new(),
        };

        if let Some(superseded) = self.live().insert(conversation_id.to_string(), token.clone()) {
            tracing::warn!(
                conv_id = %conversation_id,
                turn_id = superseded.turn_id,
                "Superseding a turn that was still in flight"
            );
            superseded.cancel.cancel();
        }
        token
    }

    /// Signal the live token for `conversation_id`.
    ///
    /// Returns `false` when no turn is live, including after a previous abort.
    pub fn abort(&self, conversation_id: &str) -> bool {
        let Some(token) = self.live().remove(conversation_id) else {
            return false;
        };
        token.cancel.cancel();
        true
    }

    /// Drop `token` from the registry if it is still the live one
    pub fn finish(&self, token: &TurnToken) {
        let mut live = self.live();
        if live
            .get(&token.conversation_id)
            .is_some_and(|current| current.turn_id == token.turn_id)
        {
            live.remove(&token.conversation_id);
        }
    }

    pub fn is_live(&self, conversation_id: &str) -> bool {
        self.live().contains_key(conversation_id)
    }
}
