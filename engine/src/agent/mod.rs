//! Turn pipeline: classification, dispatch, synthesis and memory update

pub mod core;
pub mod synthesizer;

pub use self::core::{AgentCore, ChatTurnResult, TurnState};
pub use synthesizer::AnswerSynthesizer;
