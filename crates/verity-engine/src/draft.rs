//! Candidate findings as the model proposes them, and the Validate step.

use std::collections::BTreeSet;

use serde::Deserialize;
use serde_json::Value;
use verity_core::{ChunkId, ComplianceStatus, Severity};

use crate::ReasoningError;

/// A draft exactly as the model returned it. Every field is optional so that
/// validation, not deserialisation, decides what is missing.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RawDraft {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub severity: Option<String>,
    #[serde(default)]
    pub rationale: Option<String>,
    #[serde(default)]
    pub citations: Option<Vec<String>>,
    #[serde(default, alias = "confidence")]
    pub self_score: Option<f64>,
    #[serde(default)]
    pub recommendation: Option<String>,
}

impl RawDraft {
    pub fn from_value(value: Value) -> Result<Self, ReasoningError> {
        serde_json::from_value(value).map_err(|e| ReasoningError::Malformed(e.to_string()))
    }
}

/// A draft that passed validation.
#[derive(Debug, Clone, PartialEq)]
pub struct Draft {
    pub status: ComplianceStatus,
    pub severity: Option<Severity>,
    pub rationale: String,
    pub citations: Vec<ChunkId>,
    /// Model self-assessment in `[0, 1]`.
    pub model_self_score: f64,
    pub recommendation: Option<String>,
}

/// Check a raw draft against the evidence supplied for this section.
///
/// Returns every problem found, not just the first, so the retry
/// instruction can list them all.
pub fn validate(raw: &RawDraft, evidence_ids: &BTreeSet<ChunkId>) -> Result<Draft, Vec<String>> {
    let mut issues = Vec::new();

    let status = match raw.status.as_deref().map(str::parse::<ComplianceStatus>) {
        Some(Ok(s)) => Some(s),
        Some(Err(_)) => {
            issues.push(format!(
                "status {:?} is not one of compliant, partially_compliant, non_compliant, insufficient_evidence",
                raw.status.as_deref().unwrap_or_default()
            ));
            None
        }
        None => {
            issues.push("status is missing".to_string());
            None
        }
    };
    let abstained = status == Some(ComplianceStatus::InsufficientEvidence);

    let rationale = raw.rationale.as_deref().map(str::trim).unwrap_or_default();
    if rationale.is_empty() {
        issues.push("rationale is empty".to_string());
    }

    let severity = match raw.severity.as_deref().map(str::trim) {
        Some(s) if !s.is_empty() => match s.parse::<Severity>() {
            Ok(sev) => Some(sev),
            Err(_) => {
                issues.push(format!(
                    "severity {s:?} is not one of low, medium, high, critical"
                ));
                None
            }
        },
        _ => {
            if !abstained {
                issues.push("severity is required unless status is insufficient_evidence".into());
            }
            None
        }
    };

    let mut citations: Vec<ChunkId> = Vec::new();
    for id in raw.citations.iter().flatten() {
        let id = ChunkId::new(id.trim());
        if !evidence_ids.contains(&id) {
            issues.push(format!("citation {id} is not in the supplied evidence"));
        } else if !citations.contains(&id) {
            citations.push(id);
        }
    }
    if !abstained && status.is_some() && citations.is_empty() && issues.is_empty() {
        issues.push("a verdict must cite at least one supplied evidence id".into());
    }

    let self_score = match raw.self_score {
        Some(s) if s.is_finite() => Some(normalize_score(s)),
        Some(_) => {
            issues.push("self_score is not a number".into());
            None
        }
        None => {
            issues.push("self_score is missing".into());
            None
        }
    };

    if !issues.is_empty() {
        return Err(issues);
    }
    let (Some(status), Some(model_self_score)) = (status, self_score) else {
        return Err(vec!["draft is incomplete".into()]);
    };

    if abstained {
        return Ok(Draft {
            status,
            severity: None,
            rationale: rationale.to_string(),
            citations: Vec::new(),
            model_self_score: 0.0,
            recommendation: None,
        });
    }

    Ok(Draft {
        status,
        severity,
        rationale: rationale.to_string(),
        citations,
        model_self_score,
        recommendation: raw
            .recommendation
            .as_deref()
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .map(str::to_string),
    })
}

/// Scores above 1 are read as percentages.
fn normalize_score(s: f64) -> f64 {
    let s = if s > 1.0 && s <= 100.0 { s / 100.0 } else { s };
    s.clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ids(list: &[&str]) -> BTreeSet<ChunkId> {
        list.iter().map(|s| ChunkId::new(*s)).collect()
    }

    fn raw(v: Value) -> RawDraft {
        RawDraft::from_value(v).unwrap()
    }

    #[test]
    fn accepts_well_formed_draft() {
        let draft = validate(
            &raw(json!({
                "status": "compliant",
                "severity": "low",
                "rationale": "Laptops use full-disk encryption as A.8.24 requires.",
                "citations": ["a8-24", "a8-24"],
                "self_score": 0.9,
                "recommendation": "  "
            })),
            &ids(&["a8-24", "a5-15"]),
        )
        .unwrap();

        assert_eq!(draft.status, ComplianceStatus::Compliant);
        assert_eq!(draft.severity, Some(Severity::Low));
        assert_eq!(draft.citations, vec![ChunkId::new("a8-24")]);
        assert_eq!(draft.model_self_score, 0.9);
        assert_eq!(draft.recommendation, None);
    }

    #[test]
    fn rejects_fabricated_citation() {
        let issues = validate(
            &raw(json!({
                "status": "compliant",
                "severity": "low",
                "rationale": "ok",
                "citations": ["a8-24", "made-up-7"],
                "self_score": 0.8
            })),
            &ids(&["a8-24"]),
        )
        .unwrap_err();
        assert_eq!(issues.len(), 1);
        assert!(issues[0].contains("made-up-7"), "{issues:?}");
    }

    #[test]
    fn lists_every_problem() {
        let issues = validate(&raw(json!({"status": "great"})), &ids(&["a"])).unwrap_err();
        let joined = issues.join("\n");
        assert!(joined.contains("status"), "{joined}");
        assert!(joined.contains("rationale"), "{joined}");
        assert!(joined.contains("self_score"), "{joined}");
    }

    #[test]
    fn severity_required_for_verdicts() {
        let issues = validate(
            &raw(json!({
                "status": "non_compliant",
                "rationale": "No encryption.",
                "citations": ["a"],
                "self_score": 0.7
            })),
            &ids(&["a"]),
        )
        .unwrap_err();
        assert!(issues[0].contains("severity"));
    }

    #[test]
    fn verdict_without_citations_is_rejected() {
        let issues = validate(
            &raw(json!({
                "status": "compliant",
                "severity": "low",
                "rationale": "Looks fine.",
                "citations": [],
                "self_score": 0.9
            })),
            &ids(&["a"]),
        )
        .unwrap_err();
        assert!(issues[0].contains("cite"), "{issues:?}");
    }

    #[test]
    fn abstention_drops_citations_and_severity() {
        let draft = validate(
            &raw(json!({
                "status": "Insufficient Evidence",
                "rationale": "The passages do not address retention.",
                "citations": ["a"],
                "self_score": 0.4
            })),
            &ids(&["a"]),
        )
        .unwrap();
        assert_eq!(draft.status, ComplianceStatus::InsufficientEvidence);
        assert!(draft.citations.is_empty());
        assert_eq!(draft.severity, None);
        assert_eq!(draft.model_self_score, 0.0);
    }

    #[test]
    fn percentage_scores_are_rescaled() {
        let draft = validate(
            &raw(json!({
                "status": "partial",
                "severity": "medium",
                "rationale": "Some controls.",
                "citations": ["a"],
                "confidence": 85
            })),
            &ids(&["a"]),
        )
        .unwrap();
        assert!((draft.model_self_score - 0.85).abs() < 1e-12);
    }

    #[test]
    fn wrong_field_types_are_malformed() {
        let err = RawDraft::from_value(json!({"citations": "a8-24"})).unwrap_err();
        assert!(matches!(err, ReasoningError::Malformed(_)));
    }
}
