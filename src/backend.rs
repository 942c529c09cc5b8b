//! HTTP client for the council backend
//!
//! Conversation CRUD plus the streaming turn endpoint.

mod client;
mod error;
pub mod sse;
mod types;

pub use client::BackendClient;
pub use error::BackendError;
#[cfg(test)]
pub use error::BackendErrorKind;
pub use sse::{RecordStream, StreamRecord};
pub use types::{Conversation, ConversationSummary, TurnRequest};
