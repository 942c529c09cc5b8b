//! Runtime for council turns
//!
//! The controller owns the selected transcript and runs turns against the
//! conversation API and the streaming transport.

mod cancellation;
mod controller;
pub mod traits;

#[cfg(test)]
pub mod testing;

pub use controller::{TurnController, TurnError, TurnOptions, TurnOutcome};

use crate::backend::BackendClient;
use std::sync::Arc;

/// Type alias for the production controller
pub type ProductionController = TurnController<Arc<BackendClient>, Arc<BackendClient>>;

/// Build a controller whose API and transport share one client
pub fn production_controller(client: BackendClient) -> ProductionController {
    let client = Arc::new(client);
    TurnController::new(Arc::clone(&client), client)
}
