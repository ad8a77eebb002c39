//! Prompt templates and output schemas for the reasoning strategies.

use std::fmt::Write as _;

use serde_json::{Value, json};
use verity_ai::Prompt;
use verity_core::{ComplianceFinding, Framework, RetrievedEvidence};

use crate::draft::Draft;

/// Retrieval queries are capped at this many bytes of section text.
pub const MAX_QUERY_CHARS: usize = 1000;

/// Evidence passages are truncated to this many bytes in prompts.
const MAX_EVIDENCE_CHARS: usize = 800;

pub const SYSTEM_PROMPT: &str = "You are an expert compliance analyst. \
Base all conclusions strictly on the provided regulatory context. \
If the context is insufficient to decide, set the status to insufficient_evidence \
explicitly instead of guessing. Cite evidence only by the ids shown in brackets.";

/// Framework-conditioned retrieval query for a section.
pub fn framework_query(framework: Framework, section_text: &str) -> String {
    let text = truncate(section_text.trim(), MAX_QUERY_CHARS);
    format!("{} requirement: {text}", framework.display_name())
}

/// JSON Schema for a candidate finding.
pub fn draft_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "status": {
                "type": "string",
                "enum": ["compliant", "partially_compliant", "non_compliant", "insufficient_evidence"]
            },
            "severity": {
                "type": "string",
                "enum": ["low", "medium", "high", "critical"]
            },
            "rationale": {"type": "string"},
            "citations": {"type": "array", "items": {"type": "string"}},
            "self_score": {"type": "number", "minimum": 0, "maximum": 1},
            "recommendation": {"type": "string"}
        },
        "required": ["status", "rationale", "citations", "self_score"]
    })
}

/// JSON Schema for one retrieve-act-observe step.
pub fn react_step_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "thought": {"type": "string"},
            "action": {"type": "string", "enum": ["search", "commit"]},
            "query": {"type": "string"},
            "verdict": draft_schema()
        },
        "required": ["thought", "action"]
    })
}

pub fn draft_prompt(
    framework: Framework,
    section_text: &str,
    evidence: &[RetrievedEvidence],
    instruction: Option<&str>,
) -> Prompt {
    let mut user = context_block(framework, section_text, evidence);
    user.push_str(
        "TASK:\n\
         1. Explain the relevant regulatory requirement.\n\
         2. Assess compliance of the policy section.\n\
         3. State whether it is compliant, partially_compliant or non_compliant, \
         or insufficient_evidence if the regulatory context does not allow a decision.\n\
         4. Justify your answer using only the regulatory context, citing evidence ids.\n\
         5. Give a severity for any gap and a concrete recommendation.\n\
         6. Rate your own certainty as self_score between 0 and 1.\n",
    );
    push_instruction(&mut user, instruction);
    Prompt::new(SYSTEM_PROMPT, user)
}

pub fn react_prompt(
    framework: Framework,
    section_text: &str,
    evidence: &[RetrievedEvidence],
    observations: &[String],
    steps_left: u32,
    instruction: Option<&str>,
) -> Prompt {
    let mut user = context_block(framework, section_text, evidence);
    if !observations.is_empty() {
        user.push_str("OBSERVATIONS SO FAR:\n");
        for (i, obs) in observations.iter().enumerate() {
            let _ = writeln!(user, "{}. {obs}", i + 1);
        }
        user.push('\n');
    }
    let _ = write!(
        user,
        "Work step by step. You have {steps_left} step(s) left.\n\
         Reply with a thought and one action:\n\
         - \"search\" with a focused \"query\" if the regulatory context above is missing \
         something you need;\n\
         - \"commit\" with a complete \"verdict\" once the evidence is enough to decide.\n\
         If this is your last step you must commit.\n"
    );
    push_instruction(&mut user, instruction);
    Prompt::new(SYSTEM_PROMPT, user)
}

pub fn critique_prompt(
    framework: Framework,
    section_text: &str,
    evidence: &[RetrievedEvidence],
    draft: &Draft,
) -> Prompt {
    let mut user = context_block(framework, section_text, evidence);
    user.push_str("Review the following compliance analysis.\n\nPREVIOUS ANALYSIS:\n---\n");
    push_draft(&mut user, draft);
    user.push_str(
        "---\n\n\
         TASK:\n\
         - Identify unsupported claims or logical errors.\n\
         - Point out citations that do not support the claim they are attached to.\n\
         - Say what a safer, more grounded answer would conclude.\n\
         Reply in plain prose.\n",
    );
    Prompt::new(SYSTEM_PROMPT, user)
}

pub fn revise_prompt(
    framework: Framework,
    section_text: &str,
    evidence: &[RetrievedEvidence],
    draft: &Draft,
    critique: &str,
) -> Prompt {
    let mut user = context_block(framework, section_text, evidence);
    user.push_str("PREVIOUS ANALYSIS:\n---\n");
    push_draft(&mut user, draft);
    let _ = write!(
        user,
        "---\n\nCRITIQUE:\n---\n{}\n---\n\n\
         Produce a corrected final analysis that addresses the critique. \
         Cite only evidence ids listed above.\n",
        critique.trim()
    );
    Prompt::new(SYSTEM_PROMPT, user)
}

/// Instruction for a Validate retry, listing what was wrong.
pub fn retry_instruction(issues: &[String]) -> String {
    let mut out = String::from(
        "Your previous answer was rejected. Fix every problem below and answer again, \
         following the schema exactly:\n",
    );
    for issue in issues {
        let _ = writeln!(out, "- {issue}");
    }
    out
}

/// Instruction after a failed or unusable model call.
pub fn failure_instruction(error: &str) -> String {
    format!(
        "Your previous answer could not be used ({error}). \
         Answer again with a single JSON object that follows the schema exactly."
    )
}

/// Instruction for an agent-level reconsider round.
pub fn reconsider_instruction(previous: &ComplianceFinding) -> String {
    format!(
        "A previous assessment of this section concluded \"{}\" with confidence {:.2}:\n\
         \"{}\"\n\
         That confidence is too low. Reconsider the section carefully against the evidence. \
         Change the verdict only if the evidence supports a different conclusion, and cite \
         the passages that decide it.",
        previous.status,
        previous.confidence,
        previous.rationale.trim()
    )
}

fn context_block(framework: Framework, section_text: &str, evidence: &[RetrievedEvidence]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "FRAMEWORK: {}", framework.display_name());
    out.push_str("KEY REQUIREMENTS:\n");
    for req in framework.requirements() {
        let _ = writeln!(out, "- {req}");
    }
    let _ = write!(out, "\nPOLICY SECTION:\n---\n{}\n---\n\n", section_text.trim());

    out.push_str("REGULATORY CONTEXT:\n");
    if evidence.is_empty() {
        out.push_str("(none)\n");
    }
    for e in evidence {
        let _ = writeln!(
            out,
            "[{}] (similarity {:.2}) {}",
            e.chunk.id,
            e.similarity,
            truncate(e.chunk.text.trim(), MAX_EVIDENCE_CHARS)
        );
    }
    out.push('\n');
    out
}

fn push_draft(out: &mut String, draft: &Draft) {
    let _ = writeln!(out, "status: {}", draft.status);
    if let Some(sev) = draft.severity {
        let _ = writeln!(out, "severity: {sev}");
    }
    let cites: Vec<&str> = draft.citations.iter().map(|c| c.as_str()).collect();
    let _ = writeln!(out, "citations: {}", cites.join(", "));
    let _ = writeln!(out, "rationale: {}", draft.rationale);
    if let Some(rec) = &draft.recommendation {
        let _ = writeln!(out, "recommendation: {rec}");
    }
}

fn push_instruction(out: &mut String, instruction: Option<&str>) {
    if let Some(text) = instruction.filter(|t| !t.trim().is_empty()) {
        let _ = write!(out, "\nIMPORTANT:\n{}\n", text.trim());
    }
}

/// Longest prefix of at most `max` bytes that ends on a char boundary.
fn truncate(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}
