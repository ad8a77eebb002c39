//! Evidence-grounded reasoning over one policy section.
//!
//! A [`ReasoningStrategy`] proposes a candidate finding; the
//! [`ReasoningEngine`] drives it through an explicit state machine:
//!
//! ```text
//! Draft{attempt, instruction} ──propose──▶ Validate{raw}
//!        ▲                                   │
//!        └──── issues, attempt < max ────────┤
//!                                            ▼
//!                                         Finalize
//! ```
//!
//! Failed model calls consume a retry exactly like a rejected draft. Every
//! path ends in `Finalize`, so a section always yields a verdict.

mod direct;
mod react;
mod self_correct;

pub use direct::Direct;
pub use react::RetrieveActObserve;
pub use self_correct::SelfCorrecting;

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};
use verity_ai::{LanguageModel, ModelError, Prompt};
use verity_core::{ChunkId, Framework, GapReason, PolicySection, RetrievedEvidence, StrategyKind};
use verity_store::RetrievalClient;

use crate::cancel::CancelSignal;
use crate::draft::{Draft, RawDraft, validate};
use crate::prompts::{failure_instruction, retry_instruction};
use crate::ReasoningError;

/// Everything a strategy may use while drafting one section.
pub struct DraftContext<'a> {
    pub framework: Framework,
    pub section: &'a PolicySection,
    /// Evidence supplied so far. Retrieve-Act-Observe may grow it.
    pub evidence: Vec<RetrievedEvidence>,
    /// Extra instruction for the next draft (reconsider or retry feedback).
    pub instruction: Option<String>,
    pub model: &'a dyn LanguageModel,
    pub retrieval: &'a RetrievalClient,
    pub k: usize,
    pub min_similarity: f64,
    pub call_timeout: Duration,
    pub cancel: &'a CancelSignal,
    /// Model calls made so far.
    pub steps: u32,
}

impl DraftContext<'_> {
    pub fn evidence_ids(&self) -> BTreeSet<ChunkId> {
        self.evidence.iter().map(|e| e.chunk.id.clone()).collect()
    }

    /// Structured model call, bounded by the per-call timeout and cancellation.
    pub async fn call_structured(
        &mut self,
        prompt: &Prompt,
        schema: &Value,
    ) -> Result<Value, ReasoningError> {
        self.check_cancelled()?;
        self.steps += 1;
        let (model, cancel, limit) = (self.model, self.cancel, self.call_timeout);
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ReasoningError::Cancelled),
            res = tokio::time::timeout(limit, model.generate_structured(prompt, schema)) => {
                Ok(res.map_err(|_| ModelError::Timeout(limit))??)
            }
        }
    }

    /// Free-text model call, bounded like [`Self::call_structured`].
    pub async fn call_text(&mut self, prompt: &Prompt) -> Result<String, ReasoningError> {
        self.check_cancelled()?;
        self.steps += 1;
        let (model, cancel, limit) = (self.model, self.cancel, self.call_timeout);
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ReasoningError::Cancelled),
            res = tokio::time::timeout(limit, model.generate(prompt)) => {
                Ok(res.map_err(|_| ModelError::Timeout(limit))??)
            }
        }
    }

    /// Run an additional retrieval and merge the results into the evidence
    /// set. Returns how many passages were new.
    pub async fn search(&mut self, query: &str) -> Result<usize, ReasoningError> {
        self.check_cancelled()?;
        let (retrieval, cancel) = (self.retrieval, self.cancel);
        let found = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ReasoningError::Cancelled),
            res = retrieval.query(query, self.k, self.min_similarity) => res?,
        };

        let before = self.evidence.len();
        for ev in found {
            match self.evidence.iter_mut().find(|e| e.chunk.id == ev.chunk.id) {
                Some(existing) if ev.similarity > existing.similarity => *existing = ev,
                Some(_) => {}
                None => self.evidence.push(ev),
            }
        }
        self.evidence.sort_by(|a, b| {
            b.similarity
                .total_cmp(&a.similarity)
                .then_with(|| a.chunk.id.cmp(&b.chunk.id))
        });
        Ok(self.evidence.len() - before)
    }

    fn check_cancelled(&self) -> Result<(), ReasoningError> {
        if self.cancel.is_cancelled() {
            Err(ReasoningError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// What a strategy hands back to the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum Candidate {
    /// A draft to validate.
    Raw(RawDraft),
    /// The strategy ran out of steps without committing.
    Exhausted { rationale: String },
}

#[async_trait]
pub trait ReasoningStrategy: Send + Sync {
    fn kind(&self) -> StrategyKind;

    async fn propose(&self, ctx: &mut DraftContext<'_>) -> Result<Candidate, ReasoningError>;
}

pub fn strategy_for(kind: StrategyKind, max_steps: u32) -> Arc<dyn ReasoningStrategy> {
    match kind {
        StrategyKind::Direct => Arc::new(Direct),
        StrategyKind::RetrieveActObserve => Arc::new(RetrieveActObserve::new(max_steps)),
        StrategyKind::SelfCorrecting => Arc::new(SelfCorrecting),
    }
}

/// The engine's outcome for one section.
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    Accepted(Draft),
    /// No usable draft; the section becomes a coverage gap.
    Forced { reason: GapReason, rationale: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct EngineRun {
    pub verdict: Verdict,
    /// The evidence set the verdict was validated against.
    pub evidence: Vec<RetrievedEvidence>,
    pub retry_count: u32,
    pub steps: u32,
}

enum State {
    Draft {
        attempt: u32,
        instruction: Option<String>,
    },
    Validate {
        attempt: u32,
        raw: RawDraft,
    },
    Finalize(Verdict),
}

#[derive(Clone)]
pub struct ReasoningEngine {
    strategy: Arc<dyn ReasoningStrategy>,
    max_retries: u32,
}

impl ReasoningEngine {
    pub fn new(strategy: Arc<dyn ReasoningStrategy>, max_retries: u32) -> Self {
        Self {
            strategy,
            max_retries,
        }
    }

    pub fn kind(&self) -> StrategyKind {
        self.strategy.kind()
    }

    pub async fn run(&self, mut ctx: DraftContext<'_>) -> EngineRun {
        let base_instruction = ctx.instruction.take();
        let mut retry_count = 0;

        let mut state = if ctx.evidence.is_empty() {
            State::Finalize(Verdict::Forced {
                reason: GapReason::NoEvidence,
                rationale: "No regulatory passage met the similarity threshold for this section."
                    .into(),
            })
        } else {
            State::Draft {
                attempt: 0,
                instruction: None,
            }
        };

        loop {
            state = match state {
                State::Draft {
                    attempt,
                    instruction,
                } => {
                    retry_count = attempt;
                    ctx.instruction = join_instructions(base_instruction.as_deref(), instruction);
                    debug!(
                        section = %ctx.section.id,
                        strategy = %self.kind(),
                        attempt,
                        "drafting"
                    );
                    match self.strategy.propose(&mut ctx).await {
                        Ok(Candidate::Raw(raw)) => State::Validate { attempt, raw },
                        Ok(Candidate::Exhausted { rationale }) => State::Finalize(Verdict::Forced {
                            reason: GapReason::StepBudgetExhausted,
                            rationale,
                        }),
                        Err(ReasoningError::Cancelled) => State::Finalize(Verdict::Forced {
                            reason: GapReason::Cancelled,
                            rationale: "Analysis was cancelled before a verdict was reached."
                                .into(),
                        }),
                        Err(e) => {
                            warn!(section = %ctx.section.id, attempt, "reasoning step failed: {e}");
                            self.retry_or_fail(
                                attempt,
                                failure_instruction(&e.to_string()),
                                format!("Reasoning failed after {} attempt(s): {e}", attempt + 1),
                            )
                        }
                    }
                }
                State::Validate { attempt, raw } => match validate(&raw, &ctx.evidence_ids()) {
                    Ok(draft) if draft.status.rank().is_none() => {
                        State::Finalize(Verdict::Forced {
                            reason: GapReason::ModelAbstained,
                            rationale: draft.rationale,
                        })
                    }
                    Ok(draft) => State::Finalize(Verdict::Accepted(draft)),
                    Err(issues) => {
                        warn!(
                            section = %ctx.section.id,
                            attempt,
                            issues = issues.len(),
                            "draft rejected"
                        );
                        self.retry_or_fail(
                            attempt,
                            retry_instruction(&issues),
                            format!(
                                "Validation failed after {} attempt(s): {}",
                                attempt + 1,
                                issues.join("; ")
                            ),
                        )
                    }
                },
                State::Finalize(verdict) => {
                    return EngineRun {
                        verdict,
                        evidence: ctx.evidence,
                        retry_count,
                        steps: ctx.steps,
                    };
                }
            };
        }
    }

    fn retry_or_fail(&self, attempt: u32, instruction: String, rationale: String) -> State {
        if attempt < self.max_retries {
            State::Draft {
                attempt: attempt + 1,
                instruction: Some(instruction),
            }
        } else {
            State::Finalize(Verdict::Forced {
                reason: GapReason::ValidationFailed,
                rationale,
            })
        }
    }
}

fn join_instructions(base: Option<&str>, extra: Option<String>) -> Option<String> {
    match (base, extra) {
        (Some(b), Some(e)) => Some(format!("{b}\n\n{e}")),
        (Some(b), None) => Some(b.to_string()),
        (None, e) => e,
    }
}
