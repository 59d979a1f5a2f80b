//! Answerer (§4.9): turns the top search results into a single prompt for
//! the ChatPort collaborator.

use crate::embedder::ChatPort;
use crate::error::Result;
use crate::retriever::SearchResult;

const SYSTEM_PROMPT: &str = "You are a concise code assistant.";
const MAX_TOKENS: u32 = 1000;
const FALLBACK_PREFIX_BYTES: usize = 1024;
const NO_ANSWER_FALLBACK: &str = "No answer could be generated from the indexed code.";

fn byte_prefix(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

fn build_context(results: &[SearchResult]) -> String {
    let mut out = String::new();
    for r in results {
        out.push_str(&format!("File: {} (lines {}-{})\n", r.path, r.line_start, r.line_end));
        out.push_str("```\n");
        if !r.chunk_content.is_empty() {
            out.push_str(&r.chunk_content);
        } else if let Some(doc) = &r.document_content {
            out.push_str(byte_prefix(doc, FALLBACK_PREFIX_BYTES));
        }
        if !out.ends_with('\n') {
            out.push('\n');
        }
        out.push_str("```\n\n");
    }
    out
}

/// Call the ChatPort with a context block built from `results` and `query`.
/// Returns a fixed fallback string when the model's answer is empty.
pub async fn answer(chat: &dyn ChatPort, query: &str, results: &[SearchResult]) -> Result<String> {
    let context = build_context(results);
    let user = format!("{context}Question: {query}");
    let text = chat.complete(SYSTEM_PROMPT, &user, MAX_TOKENS).await?;
    if text.trim().is_empty() {
        Ok(NO_ANSWER_FALLBACK.to_string())
    } else {
        Ok(text)
    }
}
