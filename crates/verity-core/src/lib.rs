//! Core types, frameworks, configuration and section splitting for Verity.

pub mod config;
pub mod embed;
mod error;
pub mod framework;
pub mod model;
pub mod splitter;

pub use config::{AnalysisConfig, ConfidenceWeights, SplitterConfig, StatusWeights};
pub use embed::{EmbedError, QueryEmbedder};
pub use error::CoreError;
pub use framework::Framework;
pub use model::{
    CharSpan, ChunkId, ComplianceFinding, ComplianceReport, ComplianceStatus, GapReason,
    PolicyDocument, PolicySection, RegulatoryChunk, ReportSummary, RetrievedEvidence, Severity,
    StrategyKind,
};
pub use splitter::SectionSplitter;
