//! Hybrid retriever (§4.6): dense cosine scan fused with BM25 via Reciprocal
//! Rank Fusion, deduplicated to one best chunk per file.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::path::Path;

use serde::Serialize;

use crate::answerer;
use crate::embedder::{ChatPort, EmbedKind, EmbedderPort};
use crate::error::Result;
use crate::vector_store::{Chunk, Document, VectorStore};

const RRF_K: f64 = 60.0;
const BM25_K1: f64 = 1.5;
const BM25_B: f64 = 0.75;

#[derive(Debug, Clone, Default)]
pub struct SearchOptions {
    pub hybrid: bool,
    pub file_types: Vec<String>,
}

impl SearchOptions {
    pub fn new() -> Self {
        Self { hybrid: true, file_types: Vec::new() }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResult {
    pub path: String,
    pub score: f64,
    pub chunk_content: String,
    pub line_start: usize,
    pub line_end: usize,
    pub document_content: Option<String>,
}

struct Candidate<'a> {
    doc: &'a Document,
    chunk: &'a Chunk,
}

fn normalize_ext(e: &str) -> String {
    e.trim_start_matches('.').to_lowercase()
}

fn matches_file_type(path: &str, filters: &[String]) -> bool {
    if filters.is_empty() {
        return true;
    }
    let ext = Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();
    filters.iter().any(|f| *f == ext)
}

fn cosine(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f64 = a.iter().zip(b).map(|(x, y)| *x as f64 * *y as f64).sum();
    let na: f64 = a.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
    let nb: f64 = b.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    dot / (na * nb)
}

fn tokenize(text: &str) -> Vec<String> {
    let lower = text.to_lowercase();
    let cleaned: String = lower
        .chars()
        .map(|c| if c.is_alphanumeric() || c.is_whitespace() { c } else { ' ' })
        .collect();
    cleaned
        .split_whitespace()
        .filter(|t| t.chars().count() >= 2)
        .map(str::to_string)
        .collect()
}

/// Rank candidate indices by Okapi BM25 score against `query`, returning the
/// top `3 * top_k`. Empty when the query tokenizes to nothing.
fn bm25_rank(query: &str, candidates: &[Candidate], top_k: usize) -> Vec<usize> {
    let query_tokens = tokenize(query);
    if query_tokens.is_empty() {
        return Vec::new();
    }

    let doc_tokens: Vec<Vec<String>> = candidates.iter().map(|c| tokenize(&c.chunk.content)).collect();
    let n = doc_tokens.len() as f64;
    let avg_len = if doc_tokens.is_empty() {
        0.0
    } else {
        doc_tokens.iter().map(|t| t.len()).sum::<usize>() as f64 / n
    };

    let idf: HashMap<&str, f64> = query_tokens
        .iter()
        .map(|qt| {
            let df = doc_tokens.iter().filter(|dt| dt.iter().any(|t| t == qt)).count() as f64;
            let val = ((n - df + 0.5) / (df + 0.5) + 1.0).ln();
            (qt.as_str(), val)
        })
        .collect();

    let mut scores: Vec<(usize, f64)> = doc_tokens
        .iter()
        .enumerate()
        .map(|(i, dt)| {
            let len = dt.len() as f64;
            let mut tf: HashMap<&str, usize> = HashMap::new();
            for t in dt {
                *tf.entry(t.as_str()).or_insert(0) += 1;
            }
            let score: f64 = query_tokens
                .iter()
                .map(|qt| {
                    let f = *tf.get(qt.as_str()).unwrap_or(&0) as f64;
                    if f == 0.0 {
                        return 0.0;
                    }
                    let idf_val = idf[qt.as_str()];
                    let denom = f + BM25_K1 * (1.0 - BM25_B + BM25_B * len / avg_len.max(1e-9));
                    idf_val * f * (BM25_K1 + 1.0) / denom
                })
                .sum();
            (i, score)
        })
        .collect();

    scores.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));
    scores.into_iter().take(3 * top_k).map(|(i, _)| i).collect()
}

/// `search(query, topK, {hybrid, fileTypes}) -> [SearchResult]` (§4.6).
pub async fn search(
    store: &VectorStore,
    embedder: &dyn EmbedderPort,
    query: &str,
    top_k: usize,
    opts: &SearchOptions,
) -> Result<Vec<SearchResult>> {
    let filters: Vec<String> = opts.file_types.iter().map(|e| normalize_ext(e)).collect();

    let candidates: Vec<Candidate> = store
        .documents()
        .filter(|d| matches_file_type(&d.path, &filters))
        .flat_map(|doc| doc.chunks.iter().map(move |chunk| Candidate { doc, chunk }))
        .collect();

    if candidates.is_empty() {
        return Ok(Vec::new());
    }

    let query_vec = embedder
        .embed(&[query.to_string()], EmbedKind::Query)
        .await?
        .into_iter()
        .next()
        .unwrap_or_default();

    let mut dense: Vec<(usize, f64)> = candidates
        .iter()
        .enumerate()
        .map(|(i, c)| (i, cosine(&query_vec, &c.chunk.embedding)))
        .collect();
    dense.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));
    let v: Vec<usize> = dense.into_iter().take(3 * top_k).map(|(i, _)| i).collect();

    let b: Vec<usize> = if opts.hybrid { bm25_rank(query, &candidates, top_k) } else { Vec::new() };

    let mut fused_order: Vec<(String, usize)> = Vec::new();
    let mut fused_scores: HashMap<(String, usize), f64> = HashMap::new();
    let mut key_to_idx: HashMap<(String, usize), usize> = HashMap::new();
    for (i, c) in candidates.iter().enumerate() {
        key_to_idx.entry((c.doc.path.clone(), c.chunk.line_start)).or_insert(i);
    }

    let mut add_rank_list = |list: &[usize]| {
        for (rank, &idx) in list.iter().enumerate() {
            let c = &candidates[idx];
            let key = (c.doc.path.clone(), c.chunk.line_start);
            let score = 1.0 / (RRF_K + rank as f64 + 1.0);
            match fused_scores.get_mut(&key) {
                Some(s) => *s += score,
                None => {
                    fused_scores.insert(key.clone(), score);
                    fused_order.push(key);
                }
            }
        }
    };
    add_rank_list(&v);
    add_rank_list(&b);

    let mut fused_sorted = fused_order;
    fused_sorted.sort_by(|a, b| {
        fused_scores[b].partial_cmp(&fused_scores[a]).unwrap_or(Ordering::Equal)
    });

    let mut seen_paths: HashSet<String> = HashSet::new();
    let mut deduped: Vec<(String, usize, f64)> = Vec::new();
    for key in &fused_sorted {
        if seen_paths.contains(&key.0) {
            continue;
        }
        seen_paths.insert(key.0.clone());
        deduped.push((key.0.clone(), key.1, fused_scores[key]));
        if seen_paths.len() >= 2 * top_k {
            break;
        }
    }
    deduped.truncate(top_k);

    Ok(deduped
        .into_iter()
        .map(|(path, line_start, score)| {
            let idx = key_to_idx[&(path.clone(), line_start)];
            let c = &candidates[idx];
            SearchResult {
                path,
                score,
                chunk_content: c.chunk.content.clone(),
                line_start: c.chunk.line_start,
                line_end: c.chunk.line_end,
                document_content: Some(c.doc.content.clone()),
            }
        })
        .collect())
}

/// `ask(query, topK) -> answer`: run `search` then delegate to the Answerer.
pub async fn ask(
    store: &VectorStore,
    embedder: &dyn EmbedderPort,
    chat: &dyn ChatPort,
    query: &str,
    top_k: usize,
) -> Result<String> {
    let results = search(store, embedder, query, top_k, &SearchOptions::new()).await?;
    answerer::answer(chat, query, &results).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::embedder::test_support::StubEmbedder;
    use std::sync::atomic::AtomicI64;
    use std::sync::Arc;

    async fn store_with(dir: &std::path::Path, files: &[(&str, &str)]) -> VectorStore {
        let embedder = Arc::new(StubEmbedder::new(4));
        let clock = Arc::new(FixedClock(AtomicI64::new(1000)));
        let mut s = VectorStore::open(dir, "t", embedder, clock).unwrap();
        for (i, (path, content)) in files.iter().enumerate() {
            s.upsert_file(path, content, &format!("h{i}"), content.len() as u64, 0)
                .await
                .unwrap();
        }
        s
    }

    #[test]
    fn cosine_zero_vector_is_zero_not_nan() {
        let score = cosine(&[0.0, 0.0], &[1.0, 1.0]);
        assert_eq!(score, 0.0);
        assert!(!score.is_nan());
    }

    #[test]
    fn bm25_empty_query_tokens_yields_no_ranking() {
        let candidates: Vec<Candidate> = Vec::new();
        assert!(bm25_rank("!!! ???", &candidates, 5).is_empty());
    }

    #[tokio::test]
    async fn search_returns_at_most_top_k_unique_paths() {
        let dir = tempfile::tempdir().unwrap();
        let s = store_with(
            dir.path(),
            &[
                ("a.rs", "fn alpha() { auth_check(); }\n"),
                ("b.rs", "fn beta() { auth_check(); }\n"),
                ("c.rs", "fn gamma() { nothing related here at all }\n"),
            ],
        )
        .await;
        let embedder = StubEmbedder::new(4);
        let results = search(&s, &embedder, "auth check", 2, &SearchOptions::new()).await.unwrap();
        assert!(results.len() <= 2);
        let mut paths: Vec<&str> = results.iter().map(|r| r.path.as_str()).collect();
        let unique: HashSet<&str> = paths.drain(..).collect();
        assert_eq!(unique.len(), results.len());
    }

    #[tokio::test]
    async fn no_chunks_returns_empty() {
        let dir = tempfile::tempdir().unwrap();
        let s = store_with(dir.path(), &[]).await;
        let embedder = StubEmbedder::new(4);
        let results = search(&s, &embedder, "anything", 5, &SearchOptions::new()).await.unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn fusion_tie_break_matches_spec_example() {
        // Chunk A: dense rank 0 (index #1), BM25 rank 2 (index #3).
        // Chunk B: dense rank 1 (index #2), BM25 rank 0 (index #1).
        let v = vec![0usize, 1usize]; // A first, B second
        let b = vec![1usize, 99usize, 0usize]; // B first, ..., A third
        let mut fused: HashMap<usize, f64> = HashMap::new();
        for (rank, &idx) in v.iter().enumerate() {
            *fused.entry(idx).or_insert(0.0) += 1.0 / (RRF_K + rank as f64 + 1.0);
        }
        for (rank, &idx) in b.iter().enumerate() {
            *fused.entry(idx).or_insert(0.0) += 1.0 / (RRF_K + rank as f64 + 1.0);
        }
        let score_a = fused[&0];
        let score_b = fused[&1];
        assert!((score_a - (1.0 / 61.0 + 1.0 / 63.0)).abs() < 1e-9);
        assert!((score_b - (1.0 / 62.0 + 1.0 / 61.0)).abs() < 1e-9);
        assert!(score_b > score_a);
    }
}
