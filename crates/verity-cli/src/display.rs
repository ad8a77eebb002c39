//! Terminal rendering for reports, sections and frameworks.
//!
//! Everything renders to a `String` first so the layout can be tested; the
//! `print_*` wrappers just write it to stdout.

use std::fmt::Write as _;

use verity_core::{ComplianceFinding, ComplianceReport, Framework, PolicySection};
use verity_engine::StrategyComparison;

const MAX_LIST_ITEMS: usize = 10;
const RATIONALE_WIDTH: usize = 110;
const PREVIEW_WIDTH: usize = 70;

// ── Public API ──

pub fn print_report_card(report: &ComplianceReport) {
    print!("{}", render_report_card(report));
}

pub fn print_sections(sections: &[PolicySection]) {
    print!("{}", render_sections(sections));
}

pub fn print_frameworks() {
    print!("{}", render_frameworks());
}

pub fn print_comparison(cmp: &StrategyComparison) {
    print!("{}", render_comparison(cmp));
}

// ── Report card ──

pub fn render_report_card(report: &ComplianceReport) -> String {
    let mut out = String::new();
    let framework = framework_name(&report.framework_id);

    let _ = writeln!(out, "=== {framework} compliance: {} ===", report.document_name);
    let _ = write!(
        out,
        "Generated {} · {} sections",
        report.generated_at.format("%Y-%m-%d %H:%M UTC"),
        report.summary.total_sections
    );
    if report.partial {
        out.push_str(" · PARTIAL (run was cut short)");
    }
    out.push_str("\n\n");

    out.push_str("Summary\n");
    let score = match report.overall_score {
        Some(s) => format!("{:.1}%", s * 100.0),
        None => "n/a (insufficient coverage)".to_string(),
    };
    row(&mut out, "overall score", &score);
    let s = &report.summary;
    row(&mut out, "compliant", &s.compliant.to_string());
    row(&mut out, "partially compliant", &s.partially_compliant.to_string());
    row(&mut out, "non-compliant", &s.non_compliant.to_string());
    row(&mut out, "insufficient evidence", &s.insufficient_evidence.to_string());
    if report.coverage_gap {
        row(
            &mut out,
            "coverage gaps",
            &format!("{} (excluded from score)", report.gap_sections.len()),
        );
    }
    out.push('\n');

    list(&mut out, "Critical gaps", &s.critical_gaps);
    list(&mut out, "Priority recommendations", &s.priority_recommendations);

    out.push_str("Findings\n");
    for f in &report.findings {
        finding(&mut out, f);
    }
    out
}

fn finding(out: &mut String, f: &ComplianceFinding) {
    let severity = f.severity.map(|s| format!(" ({s})")).unwrap_or_default();
    let _ = writeln!(
        out,
        "  [{}] {:<22} {}{}  confidence {:.2}  {}",
        f.section_order,
        f.section_id,
        f.status.label(),
        severity,
        f.confidence,
        f.strategy_used
    );
    let _ = writeln!(out, "      {}", clip(&f.rationale, RATIONALE_WIDTH));
    if !f.citations.is_empty() {
        let cites: Vec<&str> = f.citations.iter().map(|c| c.as_str()).collect();
        let _ = writeln!(out, "      cites: {}", cites.join(", "));
    }
    if let Some(reason) = f.gap_reason {
        let _ = writeln!(out, "      gap: {reason}");
    }
    if f.retry_count > 0 || f.self_correction_rounds > 0 {
        let _ = writeln!(
            out,
            "      retries: {}  reconsider rounds: {}",
            f.retry_count, f.self_correction_rounds
        );
    }
}

// ── Sections ──

pub fn render_sections(sections: &[PolicySection]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{} sections", sections.len());
    for s in sections {
        let _ = writeln!(
            out,
            "  {:<22} {:>6}..{:<6} {:>5} chars  {}",
            s.id,
            s.char_span.start,
            s.char_span.end,
            s.text.len(),
            clip(first_line(&s.text), PREVIEW_WIDTH)
        );
    }
    out
}

// ── Frameworks ──

pub fn render_frameworks() -> String {
    let mut out = String::new();
    for fw in Framework::ALL {
        let _ = writeln!(out, "{:<10} {}", fw.id(), fw.display_name());
        for req in fw.requirements() {
            let _ = writeln!(out, "  - {req}");
        }
    }
    out
}

// ── Strategy comparison ──

pub fn render_comparison(cmp: &StrategyComparison) -> String {
    let mut out = String::from("Strategy comparison\n");
    for (i, (kind, report)) in cmp.reports.iter().enumerate() {
        let score = report
            .overall_score
            .map(|s| format!("{:.1}%", s * 100.0))
            .unwrap_or_else(|| "n/a".to_string());
        let marker = if i == cmp.best { "  <- best" } else { "" };
        let _ = writeln!(
            out,
            "  {:<22} {:>7}  gaps {}{marker}",
            kind.as_str(),
            score,
            report.gap_sections.len()
        );
    }
    out.push('\n');
    out
}

// ── Helpers ──

fn row(out: &mut String, label: &str, value: &str) {
    let _ = writeln!(out, "  {label:<26} {value}");
}

fn list(out: &mut String, header: &str, items: &[String]) {
    if items.is_empty() {
        return;
    }
    let _ = writeln!(out, "{header} ({})", items.len());
    for item in items.iter().take(MAX_LIST_ITEMS) {
        let _ = writeln!(out, "  - {}", clip(item, RATIONALE_WIDTH));
    }
    if items.len() > MAX_LIST_ITEMS {
        let _ = writeln!(out, "  ... and {} more", items.len() - MAX_LIST_ITEMS);
    }
    out.push('\n');
}

fn framework_name(id: &str) -> String {
    id.parse::<Framework>()
        .map(|f| f.display_name().to_string())
        .unwrap_or_else(|_| id.to_string())
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or_default().trim()
}

/// Shorten to at most `width` chars, marking the cut.
fn clip(text: &str, width: usize) -> String {
    let text = text.trim();
    if text.chars().count() <= width {
        return text.to_string();
    }
    let cut: String = text.chars().take(width.saturating_sub(3)).collect();
    format!("{}...", cut.trim_end())
}
