//! Policy document splitting.
//!
//! Breaks a document at structural boundaries (blank lines and heading lines),
//! cuts blocks that exceed the maximum length at sentence or word boundaries,
//! and merges undersized pieces into a neighbour so a heading travels with
//! its body. Merges never push a section past the maximum length.
//!
//! Lengths are measured in bytes of UTF-8 text; cuts always land on char
//! boundaries.

use sha2::{Digest, Sha256};
use tracing::debug;

use crate::{CharSpan, CoreError, PolicySection, SplitterConfig};

/// Headings longer than this are treated as ordinary prose.
const HEADING_MAX_CHARS: usize = 80;

#[derive(Debug, Clone)]
pub struct SectionSplitter {
    config: SplitterConfig,
}

impl SectionSplitter {
    pub fn new(config: SplitterConfig) -> Self {
        Self { config }
    }

    /// Split a document into ordered sections.
    ///
    /// The same text and configuration always produce the same sections,
    /// ids included.
    pub fn split(&self, text: &str) -> Result<Vec<PolicySection>, CoreError> {
        if text.trim().is_empty() {
            return Err(CoreError::Input("policy document is empty".into()));
        }

        let max = self.config.max_section_chars.max(1);
        let mut pieces = Vec::new();
        for (start, end) in structural_blocks(text) {
            cut_long_block(text, start, end, max, &mut pieces);
        }
        let spans = merge_short_pieces(pieces, self.config.min_section_chars, max);

        let sections: Vec<PolicySection> = spans
            .into_iter()
            .enumerate()
            .map(|(order_index, (start, end))| {
                let body = &text[start..end];
                PolicySection {
                    id: section_id(order_index, body),
                    order_index,
                    text: body.to_string(),
                    char_span: CharSpan { start, end },
                }
            })
            .collect();

        debug!(
            sections = sections.len(),
            bytes = text.len(),
            "split policy document"
        );
        Ok(sections)
    }
}

/// `sec-{order:04}-{8 hex chars of SHA-256(text)}`.
fn section_id(order_index: usize, body: &str) -> String {
    let digest = Sha256::digest(body.as_bytes());
    let short: String = digest[..4].iter().map(|b| format!("{b:02x}")).collect();
    format!("sec-{order_index:04}-{short}")
}

/// Trimmed byte spans of paragraph blocks. Heading lines form their own block.
fn structural_blocks(text: &str) -> Vec<(usize, usize)> {
    let mut blocks = Vec::new();
    let mut current: Option<(usize, usize)> = None;
    let mut offset = 0;

    for line in text.split_inclusive('\n') {
        let line_start = offset;
        offset += line.len();

        let trimmed = line.trim();
        if trimmed.is_empty() {
            blocks.extend(current.take());
            continue;
        }

        let content_start = line_start + (line.len() - line.trim_start().len());
        let content_end = line_start + line.trim_end().len();

        if is_heading(trimmed) {
            blocks.extend(current.take());
            blocks.push((content_start, content_end));
            continue;
        }

        current = match current {
            Some((start, _)) => Some((start, content_end)),
            None => Some((content_start, content_end)),
        };
    }
    blocks.extend(current);
    blocks
}

/// Markdown headings and numbered titles such as `4.2 Access Control` or
/// `A.5.1 Policies for information security`.
fn is_heading(line: &str) -> bool {
    if line.starts_with('#') {
        return true;
    }
    if line.chars().count() > HEADING_MAX_CHARS || line.ends_with('.') {
        return false;
    }

    let mut parts = line.splitn(2, char::is_whitespace);
    let (Some(label), Some(title)) = (parts.next(), parts.next()) else {
        return false;
    };
    let label = label.trim_end_matches(['.', ')', ':']);
    if label.is_empty() || label.len() > 12 {
        return false;
    }

    let segments_ok = label
        .split('.')
        .all(|seg| !seg.is_empty() && seg.chars().all(|c| c.is_ascii_alphanumeric()));
    let has_number = label
        .split('.')
        .any(|seg| seg.chars().all(|c| c.is_ascii_digit()));
    let titled = title
        .trim_start()
        .chars()
        .next()
        .is_some_and(char::is_uppercase);

    segments_ok && has_number && titled
}

/// Push `[start, end)` as one or more pieces no longer than `max` bytes.
fn cut_long_block(
    text: &str,
    mut start: usize,
    end: usize,
    max: usize,
    out: &mut Vec<(usize, usize)>,
) {
    while end - start > max {
        let window_end = floor_boundary(text, start + max);
        let window = &text[start..window_end];

        let mut cut = last_sentence_end(window)
            .or_else(|| window.rfind(char::is_whitespace))
            .filter(|&i| i > 0)
            .unwrap_or(window.len());
        if cut == 0 {
            // A single char wider than `max`: take it whole to make progress.
            cut = text[start..].chars().next().map_or(1, char::len_utf8);
        }

        push_trimmed(text, start, start + cut, out);
        start += cut;
        let rest = &text[start..end];
        start += rest.len() - rest.trim_start().len();
    }
    push_trimmed(text, start, end, out);
}

fn last_sentence_end(window: &str) -> Option<usize> {
    window
        .match_indices(['.', '!', '?'])
        .filter(|(i, _)| window[i + 1..].starts_with(char::is_whitespace))
        .map(|(i, _)| i + 1)
        .last()
}

fn push_trimmed(text: &str, start: usize, end: usize, out: &mut Vec<(usize, usize)>) {
    let slice = &text[start..end];
    let s = start + (slice.len() - slice.trim_start().len());
    let e = start + slice.trim_end().len();
    if e > s {
        out.push((s, e));
    }
}

fn floor_boundary(text: &str, mut idx: usize) -> usize {
    if idx >= text.len() {
        return text.len();
    }
    while !text.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

/// Merge pieces shorter than `min` forward into the next piece; a short tail
/// joins the previous section. A merge that would exceed `max` is skipped: the
/// short piece joins the previous section if that fits, else stands alone.
fn merge_short_pieces(
    pieces: Vec<(usize, usize)>,
    min: usize,
    max: usize,
) -> Vec<(usize, usize)> {
    let mut out: Vec<(usize, usize)> = Vec::with_capacity(pieces.len());
    let mut pending: Option<(usize, usize)> = None;

    for (s, e) in pieces {
        let start = match pending.take() {
            Some((ps, _)) if e - ps <= max => ps,
            Some(short) => {
                settle_short(&mut out, short, max);
                s
            }
            None => s,
        };
        if e - start < min {
            pending = Some((start, e));
        } else {
            out.push((start, e));
        }
    }

    if let Some(short) = pending {
        settle_short(&mut out, short, max);
    }
    out
}

/// Append a short piece to the previous section when it fits, else keep it.
fn settle_short(out: &mut Vec<(usize, usize)>, (ps, pe): (usize, usize), max: usize) {
    match out.last_mut() {
        Some(last) if pe - last.0 <= max => last.1 = pe,
        _ => out.push((ps, pe)),
    }
}
