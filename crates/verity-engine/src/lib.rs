//! Retrieval-augmented compliance reasoning.
//!
//! [`ComplianceAgent`] evaluates one policy section at a time: it retrieves
//! regulation passages, asks a [`ReasoningStrategy`] for a draft, validates
//! the draft against the evidence, and scores it with the
//! [`ConfidenceEstimator`]. [`AnalysisPipeline`] runs the agent over a whole
//! document on a bounded worker pool and hands the findings to the
//! [`AggregationScorer`].

pub mod agent;
pub mod aggregate;
pub mod cancel;
pub mod confidence;
pub mod draft;
mod error;
pub mod pipeline;
pub mod prompts;
pub mod reasoning;

#[cfg(test)]
mod fixtures;

pub use agent::ComplianceAgent;
pub use aggregate::AggregationScorer;
pub use cancel::{CancelHandle, CancelSignal, cancel_pair};
pub use confidence::{ConfidenceEstimator, ConfidenceLevel, RetrievalAssessment, assess_retrieval};
pub use error::ReasoningError;
pub use pipeline::{AnalysisPipeline, StrategyComparison};
pub use reasoning::{
    Candidate, DraftContext, EngineRun, ReasoningEngine, ReasoningStrategy, Verdict, strategy_for,
};
