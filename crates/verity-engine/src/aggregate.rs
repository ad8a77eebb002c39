//! Report-level aggregation of section findings.

use chrono::Utc;
use tracing::info;
use verity_core::{
    ComplianceFinding, ComplianceReport, ComplianceStatus, ReportSummary, Severity, StatusWeights,
};

/// Confidence-weighted scoring over the findings that reached a verdict.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AggregationScorer {
    weights: StatusWeights,
}

impl AggregationScorer {
    pub fn new(weights: StatusWeights) -> Self {
        Self { weights }
    }

    fn weight(&self, status: ComplianceStatus) -> Option<f64> {
        match status {
            ComplianceStatus::Compliant => Some(self.weights.compliant),
            ComplianceStatus::PartiallyCompliant => Some(self.weights.partially_compliant),
            ComplianceStatus::NonCompliant => Some(self.weights.non_compliant),
            ComplianceStatus::InsufficientEvidence => None,
        }
    }

    /// `Σ wᵢ·cᵢ / Σ cᵢ` over findings with a compliance verdict, or `None`
    /// when nothing qualifies or every qualifying confidence is zero.
    ///
    /// Callers must pass findings in canonical order for the result to be
    /// independent of input order; [`Self::aggregate`] does.
    fn score(&self, findings: &[ComplianceFinding]) -> Option<f64> {
        let (num, den) = findings
            .iter()
            .filter_map(|f| self.weight(f.status).map(|w| (w, f.confidence.clamp(0.0, 1.0))))
            .fold((0.0, 0.0), |(num, den), (w, c)| (num + w * c, den + c));
        (den > 0.0).then(|| (num / den).clamp(0.0, 1.0))
    }

    pub fn aggregate(
        &self,
        framework_id: &str,
        document_name: &str,
        mut findings: Vec<ComplianceFinding>,
    ) -> ComplianceReport {
        findings.sort_by(|a, b| {
            a.section_order
                .cmp(&b.section_order)
                .then_with(|| a.section_id.cmp(&b.section_id))
        });

        let overall_score = self.score(&findings);
        let gap_sections: Vec<String> = findings
            .iter()
            .filter(|f| f.is_gap())
            .map(|f| f.section_id.clone())
            .collect();
        let summary = summarize(&findings);

        info!(
            framework = framework_id,
            sections = findings.len(),
            gaps = gap_sections.len(),
            score = ?overall_score,
            "aggregated report"
        );

        ComplianceReport {
            framework_id: framework_id.to_string(),
            document_name: document_name.to_string(),
            generated_at: Utc::now(),
            findings,
            overall_score,
            insufficient_coverage: overall_score.is_none(),
            coverage_gap: !gap_sections.is_empty(),
            gap_sections,
            summary,
            partial: false,
        }
    }
}

fn summarize(findings: &[ComplianceFinding]) -> ReportSummary {
    let mut s = ReportSummary {
        total_sections: findings.len(),
        ..ReportSummary::default()
    };
    for f in findings {
        match f.status {
            ComplianceStatus::Compliant => s.compliant += 1,
            ComplianceStatus::PartiallyCompliant => s.partially_compliant += 1,
            ComplianceStatus::NonCompliant => s.non_compliant += 1,
            ComplianceStatus::InsufficientEvidence => s.insufficient_evidence += 1,
        }

        if f.status == ComplianceStatus::NonCompliant && f.severity == Some(Severity::Critical) {
            s.critical_gaps.push(format!("{}: {}", f.section_id, f.rationale));
        }

        let urgent = matches!(f.severity, Some(Severity::High | Severity::Critical));
        let failing = matches!(
            f.status,
            ComplianceStatus::NonCompliant | ComplianceStatus::PartiallyCompliant
        );
        if urgent && failing {
            if let Some(rec) = &f.recommendation {
                s.priority_recommendations
                    .push(format!("{}: {rec}", f.section_id));
            }
        }
    }
    s
}
