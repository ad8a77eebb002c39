use async_trait::async_trait;
use tracing::{debug, warn};
use verity_core::StrategyKind;

use super::direct::Direct;
use super::{Candidate, DraftContext, ReasoningStrategy};
use crate::ReasoningError;
use crate::draft::{RawDraft, validate};
use crate::prompts::{critique_prompt, draft_schema, revise_prompt};

/// Draft, critique, revise. The revision replaces the draft only if it
/// validates against the same evidence.
#[derive(Debug, Clone, Copy, Default)]
pub struct SelfCorrecting;

#[async_trait]
impl ReasoningStrategy for SelfCorrecting {
    fn kind(&self) -> StrategyKind {
        StrategyKind::SelfCorrecting
    }

    async fn propose(&self, ctx: &mut DraftContext<'_>) -> Result<Candidate, ReasoningError> {
        let initial = Direct::draft(ctx).await?;
        let ids = ctx.evidence_ids();

        // Invalid drafts go back to the engine for a retry; abstentions have
        // nothing to critique.
        let draft = match validate(&initial, &ids) {
            Ok(d) if d.status.rank().is_some() => d,
            _ => return Ok(Candidate::Raw(initial)),
        };

        let critique = critique_prompt(ctx.framework, &ctx.section.text, &ctx.evidence, &draft);
        let critique = match ctx.call_text(&critique).await {
            Ok(text) => text,
            Err(ReasoningError::Cancelled) => return Err(ReasoningError::Cancelled),
            Err(e) => {
                warn!(section = %ctx.section.id, "critique failed, keeping draft: {e}");
                return Ok(Candidate::Raw(initial));
            }
        };

        let revise = revise_prompt(
            ctx.framework,
            &ctx.section.text,
            &ctx.evidence,
            &draft,
            &critique,
        );
        let revised = match ctx.call_structured(&revise, &draft_schema()).await {
            Ok(value) => RawDraft::from_value(value),
            Err(ReasoningError::Cancelled) => return Err(ReasoningError::Cancelled),
            Err(e) => Err(e),
        };

        match revised {
            Ok(raw) => match validate(&raw, &ids) {
                Ok(_) => {
                    debug!(section = %ctx.section.id, "revision accepted");
                    Ok(Candidate::Raw(raw))
                }
                Err(issues) => {
                    warn!(
                        section = %ctx.section.id,
                        "revision rejected, keeping draft: {}",
                        issues.join("; ")
                    );
                    Ok(Candidate::Raw(initial))
                }
            },
            Err(e) => {
                warn!(section = %ctx.section.id, "revision failed, keeping draft: {e}");
                Ok(Candidate::Raw(initial))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use serde_json::json;
    use verity_core::{ComplianceStatus, Framework};

    use super::*;
    use crate::cancel::CancelSignal;
    use crate::fixtures::{Reply, ScriptedModel, StaticIndex, client, evidence, section, verdict};
    use crate::reasoning::{EngineRun, ReasoningEngine, Verdict};

    async fn run(model: &ScriptedModel) -> EngineRun {
        let section = section(0, "Access rights are reviewed annually.");
        let retrieval = client(Arc::new(StaticIndex::new(vec![])));
        let cancel = CancelSignal::never();
        let ctx = DraftContext {
            framework: Framework::Iso27001,
            section: &section,
            evidence: vec![evidence("a5-18", 0.8), evidence("a8-2", 0.6)],
            instruction: None,
            model,
            retrieval: &retrieval,
            k: 4,
            min_similarity: 0.3,
            call_timeout: Duration::from_millis(200),
            cancel: &cancel,
            steps: 0,
        };
        ReasoningEngine::new(Arc::new(SelfCorrecting), 1).run(ctx).await
    }

    fn accepted(run: EngineRun) -> crate::draft::Draft {
        match run.verdict {
            Verdict::Accepted(d) => d,
            other => panic!("expected accepted, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn grounded_revision_replaces_draft() {
        let model = ScriptedModel::new([
            Reply::Json(verdict("compliant", "low", &["a5-18"], 0.9)),
            Reply::Text("Annual review does not meet the periodic review requirement.".into()),
            Reply::Json(verdict("partially_compliant", "medium", &["a5-18", "a8-2"], 0.7)),
        ]);
        let run = run(&model).await;
        assert_eq!(run.steps, 3);
        let draft = accepted(run);
        assert_eq!(draft.status, ComplianceStatus::PartiallyCompliant);

        let prompts = model.prompts();
        assert!(prompts[1].user.contains("Identify unsupported claims"));
        assert!(prompts[2].user.contains("periodic review requirement"));
    }

    #[tokio::test]
    async fn revision_with_fabricated_citation_is_discarded() {
        let model = ScriptedModel::new([
            Reply::Json(verdict("compliant", "low", &["a5-18"], 0.9)),
            Reply::Text("Consider A.9.9.".into()),
            Reply::Json(verdict("non_compliant", "high", &["a9-9"], 0.8)),
        ]);
        let draft = accepted(run(&model).await);
        assert_eq!(draft.status, ComplianceStatus::Compliant);
        assert_eq!(draft.citations[0].as_str(), "a5-18");
    }

    #[tokio::test]
    async fn failed_critique_keeps_draft() {
        let model = ScriptedModel::new([
            Reply::Json(verdict("non_compliant", "high", &["a8-2"], 0.8)),
            Reply::Fail("rate limited".into()),
        ]);
        let run = run(&model).await;
        assert_eq!(model.calls(), 2);
        assert_eq!(accepted(run).status, ComplianceStatus::NonCompliant);
    }

    #[tokio::test]
    async fn invalid_initial_draft_skips_critique() {
        let model = ScriptedModel::new([
            Reply::Json(json!({"status": "compliant", "rationale": "ok"})),
            Reply::Json(verdict("compliant", "low", &["a5-18"], 0.9)),
            Reply::Text("Looks grounded.".into()),
            Reply::Json(verdict("compliant", "low", &["a5-18"], 0.95)),
        ]);
        let run = run(&model).await;
        assert_eq!(run.retry_count, 1);
        assert_eq!(model.calls(), 4);
        assert!((accepted(run).model_self_score - 0.95).abs() < 1e-12);
    }
}
