//! Code-aware chunker — splits file content into line-bounded windows.
//!
//! Tries the code-aware strategy first (groups lines by block boundaries so a
//! chunk roughly matches a function/class body); falls back to fixed-size line
//! windows with overlap when code-aware finds nothing to split on.

use regex::Regex;
use std::sync::OnceLock;

pub const DEFAULT_CHUNK_SIZE: usize = 500;
pub const DEFAULT_OVERLAP: usize = 100;

/// A line-bounded slice of a document, ready to be embedded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkSpan {
    pub content: String,
    /// 1-based, inclusive.
    pub line_start: usize,
    /// 1-based, inclusive.
    pub line_end: usize,
}

pub fn chunk(content: &str, chunk_size: usize, overlap: usize) -> Vec<ChunkSpan> {
    let code_aware = chunk_code_aware(content, chunk_size);
    if !code_aware.is_empty() {
        return code_aware;
    }
    chunk_line_fallback(content, chunk_size, overlap)
}

fn block_start_regexes() -> &'static [Regex] {
    static RE: OnceLock<Vec<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        vec![
            Regex::new(r"^(export\s+)?(async\s+)?(function\s+\w+|const\s+\w+\s*=\s*(async\s+)?(\([^)]*\)|[^=])\s*=>|class\s+\w+|interface\s+\w+|type\s+\w+\s*=)").unwrap(),
            Regex::new(r"^(async\s+)?def\s+\w+|^class\s+\w+").unwrap(),
            Regex::new(r"^func\s+(\([^)]+\)\s+)?\w+").unwrap(),
            Regex::new(r"^(pub\s+)?(async\s+)?fn\s+\w+|^impl\s+").unwrap(),
            Regex::new(r"^(public|private|protected)?\s*(static\s+)?(async\s+)?(class|interface|void|int|string|bool|\w+)\s+\w+\s*[({]").unwrap(),
            Regex::new(r"^(def\s+\w+|class\s+\w+|module\s+\w+)").unwrap(),
        ]
    })
}

fn is_block_start(trimmed: &str) -> bool {
    block_start_regexes().iter().any(|re| re.is_match(trimmed))
}

fn indent_of(line: &str) -> usize {
    line.chars().take_while(|c| *c == ' ' || *c == '\t').count()
}

fn push_chunk(acc: &mut String, start: usize, end: usize, out: &mut Vec<ChunkSpan>) {
    if !acc.trim().is_empty() {
        out.push(ChunkSpan {
            content: acc.clone(),
            line_start: start,
            line_end: end.max(start),
        });
    }
    acc.clear();
}

/// Block-aware pass: groups lines into chunks bounded by recognized block
/// starters (function/class/etc.) and their matching close.
fn chunk_code_aware(content: &str, chunk_size: usize) -> Vec<ChunkSpan> {
    let lines: Vec<&str> = content.lines().collect();
    let mut chunks = Vec::new();
    let mut acc = String::new();
    let mut acc_start = 1usize;
    let mut in_block = false;
    let mut block_indent = 0usize;
    let mut i = 0usize;

    while i < lines.len() {
        let line = lines[i];
        let line_no = i + 1;
        let trimmed = line.trim();
        let indent = indent_of(line);

        if in_block {
            let is_closer = matches!(trimmed, "}" | "};" | "end");
            let is_comment = trimmed.starts_with("//") || trimmed.starts_with('#');
            let dedented = indent < block_indent && !is_comment;

            if !trimmed.is_empty() && indent <= block_indent && (is_closer || dedented) {
                if is_closer {
                    acc.push_str(line);
                    acc.push('\n');
                    push_chunk(&mut acc, acc_start, line_no, &mut chunks);
                    in_block = false;
                    i += 1;
                    continue;
                } else {
                    push_chunk(&mut acc, acc_start, line_no.saturating_sub(1), &mut chunks);
                    in_block = false;
                    // Re-process this line: it may itself be a new block start.
                    continue;
                }
            }
        }

        if !in_block && is_block_start(trimmed) {
            if !acc.trim().is_empty() {
                push_chunk(&mut acc, acc_start, line_no.saturating_sub(1), &mut chunks);
            } else {
                acc.clear();
            }
            acc_start = line_no;
            in_block = true;
            block_indent = indent;
            acc.push_str(line);
            acc.push('\n');
            i += 1;
            if acc.len() >= chunk_size {
                push_chunk(&mut acc, acc_start, line_no, &mut chunks);
                in_block = false;
                acc_start = line_no + 1;
            }
            continue;
        }

        if acc.is_empty() {
            acc_start = line_no;
        }
        acc.push_str(line);
        acc.push('\n');
        i += 1;

        if acc.len() >= chunk_size {
            push_chunk(&mut acc, acc_start, line_no, &mut chunks);
            in_block = false;
            acc_start = line_no + 1;
        }
    }

    if !acc.is_empty() {
        push_chunk(&mut acc, acc_start, lines.len().max(acc_start), &mut chunks);
    }

    chunks
}

/// Guaranteed-progress fallback: fixed-size line windows with trailing overlap.
fn chunk_line_fallback(content: &str, chunk_size: usize, overlap: usize) -> Vec<ChunkSpan> {
    let lines: Vec<&str> = content.lines().collect();
    if lines.is_empty() {
        return Vec::new();
    }

    let mut chunks = Vec::new();
    let mut start_idx = 0usize;

    while start_idx < lines.len() {
        let mut acc = String::new();
        let mut end_idx = start_idx;
        while end_idx < lines.len() && acc.len() < chunk_size {
            acc.push_str(lines[end_idx]);
            acc.push('\n');
            end_idx += 1;
        }

        if !acc.trim().is_empty() {
            chunks.push(ChunkSpan {
                content: acc,
                line_start: start_idx + 1,
                line_end: end_idx,
            });
        }

        if end_idx >= lines.len() {
            break;
        }

        let mut back = end_idx;
        let mut kept = 0usize;
        while back > start_idx && kept < overlap {
            back -= 1;
            kept += lines[back].len() + 1;
        }
        start_idx = if back > start_idx { back } else { end_idx };
    }

    chunks
}
