//! # Reply Pipeline
//!
//! One pipeline per user turn: a producer streams the language-model reply and
//! cuts it into sentences, a consumer synthesizes each sentence and streams the
//! audio to the client. Both run concurrently, connected by one ordered channel,
//! so sentence *i* is being spoken while sentence *i+1* is still being generated.

pub mod coordinator;
pub mod sentence;

pub use coordinator::{Pipeline, PipelineReport};
