pub mod orchestrator;
pub mod parse;
pub mod schedule;
pub mod specs;
