//! Council turn state machine
//!
//! Elm-style pure reducer: each streamed event folds into the open assistant
//! message and yields effects for the turn controller to run.

mod effect;
pub mod event;
pub mod message;
mod transition;


pub use effect::Effect;
pub use event::Event;
pub use message::{
    AggregateRanking, AssistantMessage, LoadingFlags, Message, Metadata, Progress, Stage,
    Stage1Result, Stage2Result, Stage3Result, StageProgress, StageTimers,
};
pub use transition::{transition, TransitionResult};
