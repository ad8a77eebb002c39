//! Document-level analysis: split, evaluate sections on a bounded worker
//! pool, aggregate.
//!
//! Each section runs as its own task on a [`JoinSet`]; a [`Semaphore`] caps
//! how many evaluate at once. The join barrier races the overall deadline and
//! the cancellation signal. When either fires, in-flight tasks are aborted,
//! finished findings are kept, and every missing section becomes a
//! gap-flagged finding so the report is still complete and marked partial.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{info, warn};
use verity_core::{
    AnalysisConfig, ComplianceFinding, ComplianceReport, CoreError, GapReason, PolicyDocument,
    PolicySection, SectionSplitter, StrategyKind,
};

use crate::aggregate::AggregationScorer;
use crate::agent::ComplianceAgent;
use crate::cancel::CancelSignal;

#[derive(Clone)]
pub struct AnalysisPipeline {
    splitter: SectionSplitter,
    agent: ComplianceAgent,
    scorer: AggregationScorer,
    workers: usize,
    section_timeout: Option<Duration>,
    overall_timeout: Option<Duration>,
}

/// Reports from running the same document under several strategies.
#[derive(Debug, Clone)]
pub struct StrategyComparison {
    pub reports: Vec<(StrategyKind, ComplianceReport)>,
    /// Index into `reports` of the highest defined overall score.
    pub best: usize,
}

impl StrategyComparison {
    pub fn best(&self) -> Option<&(StrategyKind, ComplianceReport)> {
        self.reports.get(self.best)
    }
}

impl AnalysisPipeline {
    pub fn new(agent: ComplianceAgent, config: &AnalysisConfig) -> Self {
        Self {
            splitter: SectionSplitter::new(config.splitter.clone()),
            agent,
            scorer: AggregationScorer::new(config.status_weights.clone()),
            workers: config.workers.max(1),
            section_timeout: config.section_timeout(),
            overall_timeout: config.overall_timeout(),
        }
    }

    pub fn agent(&self) -> &ComplianceAgent {
        &self.agent
    }

    pub fn split(&self, doc: &PolicyDocument) -> Result<Vec<PolicySection>, CoreError> {
        self.splitter.split(&doc.text)
    }

    /// Analyze a whole document. Only an unusable document is an error.
    pub async fn analyze(
        &self,
        doc: &PolicyDocument,
        cancel: &CancelSignal,
    ) -> Result<ComplianceReport, CoreError> {
        let sections = self.split(doc)?;
        let strategy = self.agent.strategy();
        let framework = self.agent.framework();
        info!(
            document = %doc.name,
            framework = framework.id(),
            %strategy,
            sections = sections.len(),
            workers = self.workers,
            "starting analysis"
        );
        let started = Instant::now();
        let deadline = self.overall_timeout.map(|d| started + d);

        let permits = Arc::new(Semaphore::new(self.workers));
        let mut tasks = JoinSet::new();
        for section in &sections {
            let agent = self.agent.clone();
            let section = section.clone();
            let permits = Arc::clone(&permits);
            let cancel = cancel.clone();
            let section_timeout = self.section_timeout;
            tasks.spawn(async move {
                let Ok(_permit) = permits.acquire_owned().await else {
                    return ComplianceFinding::insufficient(
                        &section,
                        agent.strategy(),
                        GapReason::Cancelled,
                        "Worker pool closed before this section was evaluated.",
                    );
                };
                evaluate_bounded(&agent, &section, &cancel, section_timeout).await
            });
        }

        let mut findings = Vec::with_capacity(sections.len());
        let mut stopped = None;
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    stopped = Some(GapReason::Cancelled);
                    break;
                }
                _ = sleep_until_opt(deadline) => {
                    stopped = Some(GapReason::Timeout);
                    break;
                }
                joined = tasks.join_next() => match joined {
                    Some(Ok(finding)) => findings.push(finding),
                    Some(Err(e)) => warn!("section task failed: {e}"),
                    None => break,
                },
            }
        }

        if let Some(reason) = stopped {
            tasks.abort_all();
            while let Some(joined) = tasks.join_next().await {
                if let Ok(finding) = joined {
                    findings.push(finding);
                }
            }
            warn!(
                %reason,
                completed = findings.len(),
                total = sections.len(),
                "analysis stopped early"
            );
        }

        let done: HashSet<String> = findings.iter().map(|f| f.section_id.clone()).collect();
        for section in sections.iter().filter(|s| !done.contains(&s.id)) {
            let (reason, rationale) = match stopped {
                Some(GapReason::Timeout) => (
                    GapReason::Timeout,
                    "Overall analysis deadline passed before this section finished.",
                ),
                Some(_) => (
                    GapReason::Cancelled,
                    "Analysis was cancelled before this section finished.",
                ),
                None => (
                    GapReason::ValidationFailed,
                    "Section evaluation failed unexpectedly.",
                ),
            };
            findings.push(ComplianceFinding::insufficient(
                section, strategy, reason, rationale,
            ));
        }

        let mut report = self.scorer.aggregate(framework.id(), &doc.name, findings);
        report.partial = stopped.is_some();
        info!(
            document = %doc.name,
            elapsed_ms = started.elapsed().as_millis() as u64,
            score = ?report.overall_score,
            gaps = report.gap_sections.len(),
            partial = report.partial,
            "analysis complete"
        );
        Ok(report)
    }

    /// Run the document once per strategy and pick the best-scoring report.
    ///
    /// Reports without a defined score never win unless none has one, in
    /// which case the first is chosen. Ties go to the earlier strategy.
    pub async fn compare_strategies(
        &self,
        doc: &PolicyDocument,
        kinds: &[StrategyKind],
        cancel: &CancelSignal,
    ) -> Result<StrategyComparison, CoreError> {
        if kinds.is_empty() {
            return Err(CoreError::Config("no strategies to compare".into()));
        }

        let mut reports = Vec::with_capacity(kinds.len());
        for &kind in kinds {
            let pipeline = Self {
                agent: self.agent.clone().with_strategy(kind),
                ..self.clone()
            };
            reports.push((kind, pipeline.analyze(doc, cancel).await?));
        }

        let mut best = 0;
        let mut best_score: Option<f64> = None;
        for (i, (_, report)) in reports.iter().enumerate() {
            if let Some(score) = report.overall_score {
                if best_score.is_none_or(|b| score > b) {
                    best = i;
                    best_score = Some(score);
                }
            }
        }
        info!(best = %reports[best].0, score = ?best_score, "compared strategies");
        Ok(StrategyComparison { reports, best })
    }
}

async fn evaluate_bounded(
    agent: &ComplianceAgent,
    section: &PolicySection,
    cancel: &CancelSignal,
    limit: Option<Duration>,
) -> ComplianceFinding {
    let Some(limit) = limit else {
        return agent.evaluate(section, cancel).await;
    };
    match tokio::time::timeout(limit, agent.evaluate(section, cancel)).await {
        Ok(finding) => finding,
        Err(_) => {
            warn!(section = %section.id, ?limit, "section timed out");
            ComplianceFinding::insufficient(
                section,
                agent.strategy(),
                GapReason::Timeout,
                format!("Section evaluation exceeded {limit:?}."),
            )
        }
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
