use async_trait::async_trait;
use verity_core::StrategyKind;

use super::{Candidate, DraftContext, ReasoningStrategy};
use crate::ReasoningError;
use crate::draft::RawDraft;
use crate::prompts::{draft_prompt, draft_schema};

/// Single-pass structured chain-of-thought over the supplied evidence.
#[derive(Debug, Clone, Copy, Default)]
pub struct Direct;

impl Direct {
    pub(crate) async fn draft(ctx: &mut DraftContext<'_>) -> Result<RawDraft, ReasoningError> {
        let prompt = draft_prompt(
            ctx.framework,
            &ctx.section.text,
            &ctx.evidence,
            ctx.instruction.as_deref(),
        );
        let value = ctx.call_structured(&prompt, &draft_schema()).await?;
        RawDraft::from_value(value)
    }
}

#[async_trait]
impl ReasoningStrategy for Direct {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Direct
    }

    async fn propose(&self, ctx: &mut DraftContext<'_>) -> Result<Candidate, ReasoningError> {
        Ok(Candidate::Raw(Self::draft(ctx).await?))
    }
}
