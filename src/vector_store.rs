//! Durable per-file / per-chunk vector store (§3, §4.5).
//!
//! Persists to a single JSON file via write-temp-then-rename. A single
//! `VectorStore` instance owns its file; all mutating methods take `&mut
//! self`, so there is no need for internal locking — the `Runtime` gives one
//! task exclusive access.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::chunker::{self, DEFAULT_CHUNK_SIZE, DEFAULT_OVERLAP};
use crate::clock::Clock;
use crate::embedder::{EmbedKind, EmbedderPort};
use crate::error::{Result, SearchgrepError};

/// Current on-disk schema major version. Loading a store whose
/// `schemaVersion` exceeds this refuses the stored data (treated as
/// `StoreCorrupt`: log and continue with an empty store) rather than
/// mis-reading an incompatible layout.
pub const SCHEMA_VERSION: u32 = 1;

/// Whole-file prefix embedded for the coarse, currently-unused whole-file
/// similarity field (§3, §9 open question — retained but not queried).
const FILE_PREFIX_BYTES: usize = 2048;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chunk {
    pub content: String,
    pub embedding: Vec<f32>,
    pub line_start: usize,
    pub line_end: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub id: String,
    pub path: String,
    pub hash: String,
    pub content: String,
    pub embedding: Vec<f32>,
    pub line_count: usize,
    pub size: u64,
    pub last_modified: i64,
    pub chunks: Vec<Chunk>,
}

fn default_schema_version() -> u32 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreMetadata {
    pub name: String,
    pub created: i64,
    pub updated: i64,
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
}

impl StoreMetadata {
    fn new(name: &str, now: i64) -> Self {
        Self {
            name: name.to_string(),
            created: now,
            updated: now,
            schema_version: SCHEMA_VERSION,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct StoreFileOwned {
    documents: Vec<Document>,
    metadata: StoreMetadata,
}

#[derive(Debug, Serialize)]
struct StoreFileRef<'a> {
    documents: Vec<&'a Document>,
    metadata: &'a StoreMetadata,
}

#[derive(Debug, Clone)]
pub struct FileMetadata {
    pub path: String,
    pub hash: String,
    pub size: u64,
    pub last_modified: i64,
    pub line_count: usize,
}

#[derive(Debug, Clone)]
pub struct StoreInfo {
    pub name: String,
    pub file_count: usize,
    pub total_size: u64,
    pub last_updated: i64,
}

pub struct VectorStore {
    path: PathBuf,
    documents: HashMap<String, Document>,
    metadata: StoreMetadata,
    embedder: Arc<dyn EmbedderPort>,
    clock: Arc<dyn Clock>,
    embedding_dim: Option<usize>,
}

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

impl VectorStore {
    /// Open (or create) the store file `{dataDir}/{name}.json`. A corrupt or
    /// unsupported-schema file is treated as an empty store rather than
    /// propagating an error — it is not overwritten until the first
    /// successful mutation.
    pub fn open(
        data_dir: &Path,
        name: &str,
        embedder: Arc<dyn EmbedderPort>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        std::fs::create_dir_all(data_dir).map_err(|e| SearchgrepError::StoreIOFailure {
            path: data_dir.to_path_buf(),
            source: e,
        })?;
        let path = data_dir.join(format!("{name}.json"));
        let now = clock.now_ms();

        let (documents, metadata) = match std::fs::read_to_string(&path) {
            Ok(text) => match serde_json::from_str::<StoreFileOwned>(&text) {
                Ok(store) if store.metadata.schema_version <= SCHEMA_VERSION => {
                    let docs = store
                        .documents
                        .into_iter()
                        .map(|d| (d.path.clone(), d))
                        .collect();
                    (docs, store.metadata)
                }
                Ok(store) => {
                    crate::debug_log!(
                        "[store] unsupported schemaVersion {} at {}, starting empty",
                        store.metadata.schema_version,
                        path.display()
                    );
                    (HashMap::new(), StoreMetadata::new(name, now))
                }
                Err(e) => {
                    crate::debug_log!("[store] corrupt store at {}: {e}", path.display());
                    (HashMap::new(), StoreMetadata::new(name, now))
                }
            },
            Err(_) => (HashMap::new(), StoreMetadata::new(name, now)),
        };

        let embedding_dim = documents
            .values()
            .flat_map(|d| d.chunks.first())
            .map(|c| c.embedding.len())
            .next();

        Ok(Self {
            path,
            documents,
            metadata,
            embedder,
            clock,
            embedding_dim,
        })
    }

    /// Cheap, read-only check: does `path` need a new Document for `hash`?
    /// `false` means an identical-hash Document is already stored.
    pub fn needs_upsert(&self, path: &str, hash: &str) -> bool {
        match self.documents.get(path) {
            Some(existing) => existing.hash != hash,
            None => true,
        }
    }

    /// Chunk and embed `content`, producing a Document ready to commit. Pure
    /// w.r.t. the store's in-memory state (`&self`) so callers may run many
    /// of these concurrently (bounded by the Synchronizer's semaphore) before
    /// serializing the cheap [`commit_document`](Self::commit_document) step.
    pub async fn build_document(
        &self,
        path: &str,
        content: &str,
        hash: &str,
        size: u64,
        last_modified: i64,
    ) -> Result<Document> {
        let spans = chunker::chunk(content, DEFAULT_CHUNK_SIZE, DEFAULT_OVERLAP);
        let chunk_texts: Vec<String> = spans
            .iter()
            .map(|s| format!("File: {path}\n\n{}", s.content))
            .collect();

        let chunk_vectors = if chunk_texts.is_empty() {
            Vec::new()
        } else {
            self.embedder.embed(&chunk_texts, EmbedKind::Doc).await?
        };

        if let (Some(dim), Some(v)) = (self.embedding_dim, chunk_vectors.first()) {
            if v.len() != dim {
                return Err(SearchgrepError::EmbedderFailure(anyhow::anyhow!(
                    "chunk embedding dimensionality {} does not match store dimensionality {}",
                    v.len(),
                    dim
                )));
            }
        }

        let file_prefix = format!("File: {path}\n\n{}", byte_prefix(content, FILE_PREFIX_BYTES));
        let doc_embedding = self
            .embedder
            .embed(&[file_prefix], EmbedKind::Doc)
            .await?
            .into_iter()
            .next()
            .unwrap_or_default();

        let chunks: Vec<Chunk> = spans
            .into_iter()
            .zip(chunk_vectors)
            .map(|(s, embedding)| Chunk {
                content: s.content,
                embedding,
                line_start: s.line_start,
                line_end: s.line_end,
            })
            .collect();

        Ok(Document {
            id: format!("{path}-{hash}"),
            path: path.to_string(),
            hash: hash.to_string(),
            content: content.to_string(),
            embedding: doc_embedding,
            line_count: content.lines().count(),
            size,
            last_modified,
            chunks,
        })
    }

    /// Insert a built Document, bump `metadata.updated`, and persist.
    pub fn commit_document(&mut self, doc: Document) -> Result<()> {
        if let Some(c) = doc.chunks.first() {
            self.embedding_dim.get_or_insert(c.embedding.len());
        }
        self.documents.insert(doc.path.clone(), doc);
        self.metadata.updated = self.clock.now_ms();
        self.persist()
    }

    /// Insert or replace the Document for `path`. A no-op (no embedding call,
    /// no persist) when `hash` matches the already-stored hash. Convenience
    /// wrapper around [`build_document`](Self::build_document) +
    /// [`commit_document`](Self::commit_document) for single-file callers
    /// (the Watcher, tests); the Synchronizer uses the split form directly
    /// to fan embedding calls out concurrently.
    pub async fn upsert_file(
        &mut self,
        path: &str,
        content: &str,
        hash: &str,
        size: u64,
        last_modified: i64,
    ) -> Result<bool> {
        if !self.needs_upsert(path, hash) {
            return Ok(false);
        }
        let doc = self.build_document(path, content, hash, size, last_modified).await?;
        self.commit_document(doc)?;
        Ok(true)
    }

    pub fn delete_file(&mut self, path: &str) -> Result<bool> {
        if self.documents.remove(path).is_some() {
            self.metadata.updated = self.clock.now_ms();
            self.persist()?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    pub fn list_files(&self) -> Vec<FileMetadata> {
        self.documents
            .values()
            .map(|d| FileMetadata {
                path: d.path.clone(),
                hash: d.hash.clone(),
                size: d.size,
                last_modified: d.last_modified,
                line_count: d.line_count,
            })
            .collect()
    }

    pub fn get_info(&self) -> StoreInfo {
        StoreInfo {
            name: self.metadata.name.clone(),
            file_count: self.documents.len(),
            total_size: self.documents.values().map(|d| d.size).sum(),
            last_updated: self.metadata.updated,
        }
    }

    pub fn clear(&mut self) -> Result<()> {
        self.documents.clear();
        self.embedding_dim = None;
        self.metadata.updated = self.clock.now_ms();
        if self.path.exists() {
            std::fs::remove_file(&self.path).map_err(|e| SearchgrepError::StoreIOFailure {
                path: self.path.clone(),
                source: e,
            })?;
        }
        Ok(())
    }

    pub fn documents(&self) -> impl Iterator<Item = &Document> {
        self.documents.values()
    }

    pub fn document(&self, path: &str) -> Option<&Document> {
        self.documents.get(path)
    }

    fn persist(&self) -> Result<()> {
        let store_file = StoreFileRef {
            documents: self.documents.values().collect(),
            metadata: &self.metadata,
        };
        let text = serde_json::to_string(&store_file).map_err(|e| {
            SearchgrepError::StoreIOFailure {
                path: self.path.clone(),
                source: std::io::Error::new(std::io::ErrorKind::Other, e),
            }
        })?;

        let tmp_path = self.path.with_extension("json.tmp");
        std::fs::write(&tmp_path, text).map_err(|e| SearchgrepError::StoreIOFailure {
            path: self.path.clone(),
            source: e,
        })?;
        std::fs::rename(&tmp_path, &self.path).map_err(|e| SearchgrepError::StoreIOFailure {
            path: self.path.clone(),
            source: e,
        })?;
        Ok(())
    }
}
