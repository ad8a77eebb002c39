//! Confidence estimation and retrieval-quality notes.

use std::fmt;

use serde::{Deserialize, Serialize};
use verity_core::{ChunkId, ConfidenceWeights, RetrievedEvidence};

/// Blends the retrieval signal of the cited evidence with the model's
/// self-assessment.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfidenceEstimator {
    retrieval_weight: f64,
    model_weight: f64,
}

impl ConfidenceEstimator {
    /// Weights are normalised to sum to 1.
    pub fn new(weights: &ConfidenceWeights) -> Self {
        let r = weights.retrieval.max(0.0);
        let m = weights.model.max(0.0);
        let total = r + m;
        if total > 0.0 && total.is_finite() {
            Self {
                retrieval_weight: r / total,
                model_weight: m / total,
            }
        } else {
            Self {
                retrieval_weight: 0.5,
                model_weight: 0.5,
            }
        }
    }

    /// `w_r * mean(similarity of cited) + w_m * self_score`, in `[0, 1]`.
    ///
    /// Only the evidence the finding cites counts; citing nothing gives a
    /// retrieval signal of 0.
    pub fn estimate(&self, cited: &[RetrievedEvidence], model_self_score: f64) -> f64 {
        let signal = if cited.is_empty() {
            0.0
        } else {
            cited.iter().map(|e| unit(e.similarity)).sum::<f64>() / cited.len() as f64
        };
        let confidence = self.retrieval_weight * signal + self.model_weight * unit(model_self_score);
        unit(confidence)
    }
}

impl Default for ConfidenceEstimator {
    fn default() -> Self {
        Self::new(&ConfidenceWeights::default())
    }
}

/// The evidence named by `citations`, in citation order.
pub fn cited_evidence(evidence: &[RetrievedEvidence], citations: &[ChunkId]) -> Vec<RetrievedEvidence> {
    citations
        .iter()
        .filter_map(|id| evidence.iter().find(|e| &e.chunk.id == id))
        .cloned()
        .collect()
}

fn unit(x: f64) -> f64 {
    if x.is_nan() { 0.0 } else { x.clamp(0.0, 1.0) }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceLevel {
    Low,
    Medium,
    High,
}

impl fmt::Display for ConfidenceLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        })
    }
}

/// Human-readable judgement of how well retrieval covered a section.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievalAssessment {
    pub level: ConfidenceLevel,
    pub notes: String,
    pub sufficient: bool,
}

const HIGH_BEST: f64 = 0.75;
const MEDIUM_BEST: f64 = 0.5;

/// High when the best passage is strong and corroborated, medium when at
/// least one passage is reasonably close, low otherwise.
pub fn assess_retrieval(evidence: &[RetrievedEvidence]) -> RetrievalAssessment {
    if evidence.is_empty() {
        return RetrievalAssessment {
            level: ConfidenceLevel::Low,
            notes: "No chunks retrieved above the similarity threshold.".into(),
            sufficient: false,
        };
    }

    let best = evidence
        .iter()
        .map(|e| e.similarity)
        .fold(f64::NEG_INFINITY, f64::max);
    let mean = evidence.iter().map(|e| e.similarity).sum::<f64>() / evidence.len() as f64;

    let level = if best >= HIGH_BEST && evidence.len() >= 2 {
        ConfidenceLevel::High
    } else if best >= MEDIUM_BEST {
        ConfidenceLevel::Medium
    } else {
        ConfidenceLevel::Low
    };

    RetrievalAssessment {
        level,
        notes: format!(
            "{} chunks retrieved; best similarity {best:.2}, mean {mean:.2}; retrieval confidence {level}.",
            evidence.len()
        ),
        sufficient: level != ConfidenceLevel::Low,
    }
}
