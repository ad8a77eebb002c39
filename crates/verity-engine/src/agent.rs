//! Per-section evaluation: retrieve, reason, score, and reconsider when the
//! result is not confident enough.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};
use verity_ai::LanguageModel;
use verity_core::{
    AnalysisConfig, ComplianceFinding, Framework, GapReason, PolicySection, StrategyKind,
};
use verity_store::RetrievalClient;

use crate::cancel::CancelSignal;
use crate::confidence::{ConfidenceEstimator, assess_retrieval, cited_evidence};
use crate::prompts::{framework_query, reconsider_instruction};
use crate::reasoning::{DraftContext, EngineRun, ReasoningEngine, Verdict, strategy_for};

/// Evaluates sections independently. Cheap to clone; every clone shares the
/// same model and index.
#[derive(Clone)]
pub struct ComplianceAgent {
    framework: Framework,
    model: Arc<dyn LanguageModel>,
    retrieval: RetrievalClient,
    engine: ReasoningEngine,
    estimator: ConfidenceEstimator,
    k: usize,
    min_similarity: f64,
    call_timeout: Duration,
    confidence_threshold: f64,
    max_self_correction_rounds: u32,
    max_steps: u32,
    max_retries: u32,
}

impl ComplianceAgent {
    pub fn new(
        framework: Framework,
        model: Arc<dyn LanguageModel>,
        retrieval: RetrievalClient,
        config: &AnalysisConfig,
    ) -> Self {
        Self {
            framework,
            model,
            retrieval,
            engine: ReasoningEngine::new(
                strategy_for(config.strategy, config.max_steps),
                config.max_retries,
            ),
            estimator: ConfidenceEstimator::new(&config.confidence_weights),
            k: config.k,
            min_similarity: config.min_similarity,
            call_timeout: config.per_call_timeout(),
            confidence_threshold: config.confidence_threshold,
            max_self_correction_rounds: config.max_self_correction_rounds,
            max_steps: config.max_steps,
            max_retries: config.max_retries,
        }
    }

    /// The same agent with a different reasoning strategy.
    pub fn with_strategy(mut self, kind: StrategyKind) -> Self {
        self.engine = ReasoningEngine::new(strategy_for(kind, self.max_steps), self.max_retries);
        self
    }

    pub fn strategy(&self) -> StrategyKind {
        self.engine.kind()
    }

    pub fn framework(&self) -> Framework {
        self.framework
    }

    /// Produce the finding for one section. Never fails: every error path
    /// ends in a gap-flagged finding.
    pub async fn evaluate(&self, section: &PolicySection, cancel: &CancelSignal) -> ComplianceFinding {
        let strategy = self.strategy();
        if cancel.is_cancelled() {
            return ComplianceFinding::insufficient(
                section,
                strategy,
                GapReason::Cancelled,
                "Analysis was cancelled before this section was evaluated.",
            );
        }

        let query = framework_query(self.framework, &section.text);
        let retrieved = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return ComplianceFinding::insufficient(
                    section,
                    strategy,
                    GapReason::Cancelled,
                    "Analysis was cancelled during retrieval.",
                );
            }
            res = self.retrieval.query(&query, self.k, self.min_similarity) => res,
        };
        let mut evidence = match retrieved {
            Ok(evidence) => evidence,
            Err(e) => {
                warn!(section = %section.id, "retrieval failed: {e}");
                let mut finding = ComplianceFinding::insufficient(
                    section,
                    strategy,
                    GapReason::RetrievalFailed,
                    format!("retrieval failed: {e}"),
                );
                finding.retrieval_notes = "Regulatory index unavailable.".into();
                return finding;
            }
        };
        let assessment = assess_retrieval(&evidence);
        debug!(
            section = %section.id,
            evidence = evidence.len(),
            level = %assessment.level,
            "retrieval assessed"
        );

        let mut best: Option<ComplianceFinding> = None;
        let mut instruction = None;
        let mut rounds = 0;
        loop {
            let supplied = evidence.len();
            let run = self
                .engine
                .run(DraftContext {
                    framework: self.framework,
                    section,
                    evidence: evidence.clone(),
                    instruction: instruction.take(),
                    model: self.model.as_ref(),
                    retrieval: &self.retrieval,
                    k: self.k,
                    min_similarity: self.min_similarity,
                    call_timeout: self.call_timeout,
                    cancel,
                    steps: 0,
                })
                .await;

            let mut finding = self.to_finding(section, &run);
            finding.retrieval_notes = if run.evidence.len() > supplied {
                format!(
                    "{} Follow-up searches added {} passage(s).",
                    assessment.notes,
                    run.evidence.len() - supplied
                )
            } else {
                assessment.notes.clone()
            };
            evidence = run.evidence;

            let terminal = matches!(
                finding.gap_reason,
                Some(GapReason::NoEvidence | GapReason::Cancelled)
            );
            let confident = finding.confidence >= self.confidence_threshold;
            if best
                .as_ref()
                .is_none_or(|b| finding.confidence >= b.confidence)
            {
                best = Some(finding.clone());
            }

            if terminal || confident || rounds >= self.max_self_correction_rounds {
                break;
            }
            rounds += 1;
            debug!(
                section = %section.id,
                round = rounds,
                confidence = finding.confidence,
                "confidence below threshold, reconsidering"
            );
            instruction = Some(reconsider_instruction(&finding));
        }

        let Some(mut finding) = best else {
            return ComplianceFinding::insufficient(
                section,
                strategy,
                GapReason::ValidationFailed,
                "No reasoning round completed.",
            );
        };
        finding.self_correction_rounds = rounds;
        if let Some(reason) = finding.gap_reason {
            warn!(section = %section.id, %reason, "section is a coverage gap");
        }
        finding
    }

    fn to_finding(&self, section: &PolicySection, run: &EngineRun) -> ComplianceFinding {
        let strategy = self.strategy();
        match &run.verdict {
            Verdict::Accepted(draft) => {
                let cited = cited_evidence(&run.evidence, &draft.citations);
                ComplianceFinding {
                    section_id: section.id.clone(),
                    section_order: section.order_index,
                    status: draft.status,
                    severity: draft.severity,
                    confidence: self.estimator.estimate(&cited, draft.model_self_score),
                    rationale: draft.rationale.clone(),
                    citations: draft.citations.clone(),
                    strategy_used: strategy,
                    retry_count: run.retry_count,
                    self_correction_rounds: 0,
                    retrieval_notes: String::new(),
                    recommendation: draft.recommendation.clone(),
                    gap_reason: None,
                }
            }
            Verdict::Forced { reason, rationale } => {
                let mut finding =
                    ComplianceFinding::insufficient(section, strategy, *reason, rationale.clone());
                finding.retry_count = run.retry_count;
                finding
            }
        }
    }
}
