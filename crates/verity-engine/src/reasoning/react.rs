//! Bounded thought → action → observation loop.
//!
//! Each step the model either searches for more regulation text or commits a
//! verdict. New passages are merged into the evidence set, so a committed
//! verdict may cite anything retrieved along the way. One draft never runs
//! more than `max_steps` model calls. The engine restarts the loop on every
//! Validate retry, so a whole run is bounded by
//! `max_steps × (max_retries + 1)` model calls.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};
use verity_core::StrategyKind;

use super::{Candidate, DraftContext, ReasoningStrategy};
use crate::ReasoningError;
use crate::draft::RawDraft;
use crate::prompts::{framework_query, react_prompt, react_step_schema};

#[derive(Debug, Clone, Copy)]
pub struct RetrieveActObserve {
    max_steps: u32,
}

impl RetrieveActObserve {
    pub fn new(max_steps: u32) -> Self {
        Self {
            max_steps: max_steps.max(1),
        }
    }

    pub fn max_steps(&self) -> u32 {
        self.max_steps
    }
}

#[derive(Debug, Deserialize)]
struct Step {
    #[serde(default)]
    thought: Option<String>,
    #[serde(default)]
    action: Option<String>,
    #[serde(default)]
    query: Option<String>,
    #[serde(default)]
    verdict: Option<Value>,
}

#[async_trait]
impl ReasoningStrategy for RetrieveActObserve {
    fn kind(&self) -> StrategyKind {
        StrategyKind::RetrieveActObserve
    }

    async fn propose(&self, ctx: &mut DraftContext<'_>) -> Result<Candidate, ReasoningError> {
        let mut observations: Vec<String> = Vec::new();

        for step in 0..self.max_steps {
            let prompt = react_prompt(
                ctx.framework,
                &ctx.section.text,
                &ctx.evidence,
                &observations,
                self.max_steps - step,
                ctx.instruction.as_deref(),
            );
            let value = ctx.call_structured(&prompt, &react_step_schema()).await?;
            let reply: Step = serde_json::from_value(value)
                .map_err(|e| ReasoningError::Malformed(format!("step: {e}")))?;

            let action = reply
                .action
                .as_deref()
                .map(|a| a.trim().to_ascii_lowercase())
                .unwrap_or_default();
            debug!(
                section = %ctx.section.id,
                step = step + 1,
                action = %action,
                thought = reply.thought.as_deref().unwrap_or_default(),
                "reasoning step"
            );

            match action.as_str() {
                "commit" | "answer" | "finish" => {
                    let verdict = reply.verdict.ok_or_else(|| {
                        ReasoningError::Malformed("commit without a verdict".into())
                    })?;
                    return Ok(Candidate::Raw(RawDraft::from_value(verdict)?));
                }
                "search" | "retrieve" => {
                    let query = reply
                        .query
                        .map(|q| q.trim().to_string())
                        .filter(|q| !q.is_empty())
                        .unwrap_or_else(|| framework_query(ctx.framework, &ctx.section.text));
                    match ctx.search(&query).await {
                        Ok(new) => observations.push(format!(
                            "search {query:?} returned {new} new passage(s); {} in total",
                            ctx.evidence.len()
                        )),
                        Err(ReasoningError::Cancelled) => return Err(ReasoningError::Cancelled),
                        Err(e) => {
                            warn!(section = %ctx.section.id, "search failed: {e}");
                            observations.push(format!("search {query:?} failed: {e}"));
                        }
                    }
                }
                other => observations.push(format!(
                    "action {other:?} is not available; use \"search\" or \"commit\""
                )),
            }
        }

        Ok(Candidate::Exhausted {
            rationale: format!(
                "No verdict was committed within {} reasoning steps.",
                self.max_steps
            ),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use serde_json::json;
    use verity_core::{Framework, GapReason};

    use super::*;
    use crate::cancel::CancelSignal;
    use crate::fixtures::{Reply, ScriptedModel, StaticIndex, client, evidence, hit, section, verdict};
    use crate::reasoning::{ReasoningEngine, Verdict};

    fn search(query: &str) -> Reply {
        Reply::Json(json!({"thought": "need more", "action": "search", "query": query}))
    }

    fn commit(v: Value) -> Reply {
        Reply::Json(json!({"thought": "enough", "action": "commit", "verdict": v}))
    }

    async fn run(model: &ScriptedModel, index: StaticIndex, max_steps: u32) -> crate::reasoning::EngineRun {
        run_with_retries(model, index, max_steps, 0).await
    }

    async fn run_with_retries(
        model: &ScriptedModel,
        index: StaticIndex,
        max_steps: u32,
        max_retries: u32,
    ) -> crate::reasoning::EngineRun {
        let section = section(0, "Backups are tested quarterly.");
        let retrieval = client(Arc::new(index));
        let cancel = CancelSignal::never();
        let ctx = DraftContext {
            framework: Framework::Iso27001,
            section: &section,
            evidence: vec![evidence("a8-13", 0.7)],
            instruction: None,
            model,
            retrieval: &retrieval,
            k: 4,
            min_similarity: 0.3,
            call_timeout: Duration::from_millis(200),
            cancel: &cancel,
            steps: 0,
        };
        ReasoningEngine::new(Arc::new(RetrieveActObserve::new(max_steps)), max_retries)
            .run(ctx)
            .await
    }

    #[tokio::test]
    async fn search_then_commit_may_cite_new_evidence() {
        let model = ScriptedModel::new([
            search("backup restoration testing"),
            commit(verdict("compliant", "low", &["a8-13", "a5-30"], 0.8)),
        ]);
        let index = StaticIndex::new(vec![hit("a5-30", 0.65), hit("a8-13", 0.9)]);
        let run = run(&model, index, 4).await;

        let Verdict::Accepted(draft) = run.verdict else {
            panic!("expected accepted, got {:?}", run.verdict);
        };
        assert_eq!(draft.citations.len(), 2);
        assert_eq!(run.steps, 2);
        // Duplicate keeps the better score and the set stays ranked.
        let ids: Vec<&str> = run.evidence.iter().map(|e| e.chunk.id.as_str()).collect();
        assert_eq!(ids, vec!["a8-13", "a5-30"]);
        assert_eq!(run.evidence[0].similarity, 0.9);
        assert!(model.prompts()[1].user.contains("1 new passage(s)"));
    }

    #[tokio::test]
    async fn never_committing_hits_step_budget() {
        let model = ScriptedModel::from_fn(|_| search("more"));
        let run = run(&model, StaticIndex::new(vec![]), 3).await;

        assert_eq!(model.calls(), 3);
        let Verdict::Forced { reason, .. } = run.verdict else {
            panic!("expected forced verdict");
        };
        assert_eq!(reason, GapReason::StepBudgetExhausted);
    }

    #[tokio::test]
    async fn retries_restart_the_loop_within_the_run_bound() {
        let bad = verdict("compliant", "low", &["zz-99"], 0.8);
        let attempt = [search("a"), search("b"), commit(bad)];
        let model = ScriptedModel::new(attempt.iter().cloned().cycle().take(9));
        let run = run_with_retries(&model, StaticIndex::new(vec![]), 3, 2).await;

        assert_eq!(model.calls(), 3 * (2 + 1));
        assert_eq!(run.steps, 9);
        assert_eq!(run.retry_count, 2);
        let Verdict::Forced { reason, .. } = run.verdict else {
            panic!("expected forced verdict");
        };
        assert_eq!(reason, GapReason::ValidationFailed);
    }

    #[tokio::test]
    async fn failed_search_becomes_observation() {
        let model = ScriptedModel::new([
            search("anything"),
            commit(verdict("partially_compliant", "medium", &["a8-13"], 0.6)),
        ]);
        let run = run(&model, StaticIndex::unavailable(), 4).await;

        assert!(matches!(run.verdict, Verdict::Accepted(_)));
        assert!(model.prompts()[1].user.contains("failed"));
    }

    #[tokio::test]
    async fn commit_without_verdict_is_malformed() {
        let model = ScriptedModel::new([Reply::Json(json!({"thought": "done", "action": "commit"}))]);
        let run = run(&model, StaticIndex::new(vec![]), 4).await;

        let Verdict::Forced { reason, rationale } = run.verdict else {
            panic!("expected forced verdict");
        };
        assert_eq!(reason, GapReason::ValidationFailed);
        assert!(rationale.contains("commit without a verdict"), "{rationale}");
    }

    #[test]
    fn zero_steps_is_raised_to_one() {
        assert_eq!(RetrieveActObserve::new(0).max_steps(), 1);
    }
}
