//! Data model shared by every stage of a compliance analysis.
//!
//! Sections and evidence live for a single run. Findings are created once per
//! section and never mutated; a report is always derived from its findings.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::CoreError;

/// Already-extracted policy text supplied by the document source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyDocument {
    pub name: String,
    pub text: String,
}

impl PolicyDocument {
    pub fn new(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            text: text.into(),
        }
    }
}

/// Byte range of a section within the source document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CharSpan {
    pub start: usize,
    pub end: usize,
}

impl CharSpan {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// One analyzable unit of a policy document, produced by the splitter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicySection {
    pub id: String,
    pub order_index: usize,
    pub text: String,
    pub char_span: CharSpan,
}

/// Opaque identity of a regulatory chunk, used for citation.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChunkId(pub String);

impl ChunkId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A passage of regulation text owned by the external index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegulatoryChunk {
    pub id: ChunkId,
    pub text: String,
    pub source_document_id: String,
    #[serde(default)]
    pub offset: u64,
}

/// A chunk returned for a query, with its similarity in `[0, 1]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedEvidence {
    pub chunk: RegulatoryChunk,
    pub similarity: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComplianceStatus {
    Compliant,
    PartiallyCompliant,
    NonCompliant,
    /// "Could not evaluate" marker. Not a compliance level.
    InsufficientEvidence,
}

impl ComplianceStatus {
    /// Position in the compliance ordering. `None` for [`Self::InsufficientEvidence`].
    pub fn rank(&self) -> Option<u8> {
        match self {
            Self::Compliant => Some(2),
            Self::PartiallyCompliant => Some(1),
            Self::NonCompliant => Some(0),
            Self::InsufficientEvidence => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Compliant => "compliant",
            Self::PartiallyCompliant => "partially_compliant",
            Self::NonCompliant => "non_compliant",
            Self::InsufficientEvidence => "insufficient_evidence",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Compliant => "Compliant",
            Self::PartiallyCompliant => "Partially compliant",
            Self::NonCompliant => "Non-compliant",
            Self::InsufficientEvidence => "Insufficient evidence",
        }
    }
}

impl fmt::Display for ComplianceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ComplianceStatus {
    type Err = CoreError;

    /// Accepts the canonical tags plus the phrasings models tend to use.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let norm: String = s
            .trim()
            .to_ascii_lowercase()
            .chars()
            .map(|c| if c == '-' || c == ' ' { '_' } else { c })
            .collect();

        let status = match norm.as_str() {
            "compliant" => Self::Compliant,
            "partial" | "partially_compliant" | "partly_compliant" => Self::PartiallyCompliant,
            "non_compliant" | "noncompliant" | "not_compliant" => Self::NonCompliant,
            "insufficient_evidence" | "insufficient" | "unknown" | "not_applicable" => {
                Self::InsufficientEvidence
            }
            _ => {
                return Err(CoreError::Input(format!("unknown compliance status: {s:?}")));
            }
        };
        Ok(status)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" | "moderate" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            "critical" => Ok(Self::Critical),
            _ => Err(CoreError::Input(format!("unknown severity: {s:?}"))),
        }
    }
}

/// Reasoning strategy used to produce a finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    /// Single-pass structured chain-of-thought.
    #[default]
    Direct,
    /// Bounded thought → action → observation loop that may fetch more evidence.
    RetrieveActObserve,
    /// Draft, then critique and revise against the same evidence.
    SelfCorrecting,
}

impl StrategyKind {
    pub const ALL: [StrategyKind; 3] = [
        StrategyKind::Direct,
        StrategyKind::RetrieveActObserve,
        StrategyKind::SelfCorrecting,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::RetrieveActObserve => "retrieve_act_observe",
            Self::SelfCorrecting => "self_correcting",
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StrategyKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "direct" | "cot" | "chain_of_thought" => Ok(Self::Direct),
            "retrieve_act_observe" | "react" => Ok(Self::RetrieveActObserve),
            "self_correcting" | "self_correction" => Ok(Self::SelfCorrecting),
            other => Err(CoreError::Config(format!("unknown strategy: {other}"))),
        }
    }
}

/// Why a section ended up as [`ComplianceStatus::InsufficientEvidence`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GapReason {
    /// No retrieved passage met the similarity threshold.
    NoEvidence,
    /// The index stayed unavailable after all retries.
    RetrievalFailed,
    /// Every draft failed validation or the model kept failing.
    ValidationFailed,
    /// The retrieve-act-observe loop hit its step cap without committing.
    StepBudgetExhausted,
    /// The model itself reported insufficient evidence.
    ModelAbstained,
    Timeout,
    Cancelled,
}

impl GapReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoEvidence => "no_evidence",
            Self::RetrievalFailed => "retrieval_failed",
            Self::ValidationFailed => "validation_failed",
            Self::StepBudgetExhausted => "step_budget_exhausted",
            Self::ModelAbstained => "model_abstained",
            Self::Timeout => "timeout",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for GapReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The structured verdict for one policy section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComplianceFinding {
    pub section_id: String,
    pub section_order: usize,
    pub status: ComplianceStatus,
    /// Absent only for [`ComplianceStatus::InsufficientEvidence`].
    pub severity: Option<Severity>,
    pub confidence: f64,
    pub rationale: String,
    /// Ids of the evidence the verdict actually relies on, in citation order.
    pub citations: Vec<ChunkId>,
    pub strategy_used: StrategyKind,
    pub retry_count: u32,
    #[serde(default)]
    pub self_correction_rounds: u32,
    #[serde(default)]
    pub retrieval_notes: String,
    #[serde(default)]
    pub recommendation: Option<String>,
    #[serde(default)]
    pub gap_reason: Option<GapReason>,
}

impl ComplianceFinding {
    /// A coverage-gap finding: zero confidence, no citations, no severity.
    pub fn insufficient(
        section: &PolicySection,
        strategy: StrategyKind,
        reason: GapReason,
        rationale: impl Into<String>,
    ) -> Self {
        Self {
            section_id: section.id.clone(),
            section_order: section.order_index,
            status: ComplianceStatus::InsufficientEvidence,
            severity: None,
            confidence: 0.0,
            rationale: rationale.into(),
            citations: Vec::new(),
            strategy_used: strategy,
            retry_count: 0,
            self_correction_rounds: 0,
            retrieval_notes: String::new(),
            recommendation: None,
            gap_reason: Some(reason),
        }
    }

    pub fn is_gap(&self) -> bool {
        self.status == ComplianceStatus::InsufficientEvidence
    }
}

/// Per-status tallies and headline items for a report.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReportSummary {
    pub total_sections: usize,
    pub compliant: usize,
    pub partially_compliant: usize,
    pub non_compliant: usize,
    pub insufficient_evidence: usize,
    /// `section_id: rationale` for critical non-compliant findings.
    pub critical_gaps: Vec<String>,
    /// Recommendations from high/critical findings that are not compliant.
    pub priority_recommendations: Vec<String>,
}

/// Report-level aggregation of all section findings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComplianceReport {
    pub framework_id: String,
    pub document_name: String,
    pub generated_at: DateTime<Utc>,
    /// Findings in section order.
    pub findings: Vec<ComplianceFinding>,
    /// Confidence-weighted score in `[0, 1]`; `None` when nothing could be scored.
    pub overall_score: Option<f64>,
    /// Set when no finding qualified for scoring.
    pub insufficient_coverage: bool,
    /// Set when at least one section was excluded as a coverage gap.
    pub coverage_gap: bool,
    pub gap_sections: Vec<String>,
    pub summary: ReportSummary,
    /// Set when cancellation or the overall timeout cut the run short.
    #[serde(default)]
    pub partial: bool,
}

impl ComplianceReport {
    pub fn to_json_pretty(&self) -> Result<String, CoreError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self, CoreError> {
        Ok(serde_json::from_str(json)?)
    }
}
