//! Synchronizer (§4.7): reconciles the on-disk tree with the VectorStore —
//! scan, compare by content hash, upload changed files, delete vanished
//! ones. Embedding calls for changed files run concurrently under a bounded
//! semaphore (held as a read lock across the network `.await`); the commit
//! itself stays serialized through a brief write lock so two uploads never
//! race on the same JSON file.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use rayon::prelude::*;
use tokio::sync::{RwLock, Semaphore};

use crate::clock::Clock;
use crate::config::Config;
use crate::error::Result;
use crate::hash::hash_content;
use crate::scanner::{self, WalkOptions};
use crate::vector_store::VectorStore;

const DEFAULT_CONCURRENCY: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    Scanning,
    Comparing,
    Uploading,
    Deleting,
    Done,
}

#[derive(Debug, Clone, Copy)]
pub struct ProgressEvent {
    pub phase: SyncPhase,
    pub current: usize,
    pub total: usize,
}

pub type ProgressCallback = Arc<dyn Fn(ProgressEvent) + Send + Sync>;

#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub dry_run: bool,
    pub concurrency: usize,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self { dry_run: false, concurrency: DEFAULT_CONCURRENCY }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SyncResult {
    pub uploaded: usize,
    pub deleted: usize,
    pub skipped: usize,
    pub errors: Vec<(String, String)>,
    pub duration_ms: i64,
}

fn noop_progress() -> ProgressCallback {
    Arc::new(|_| {})
}

/// `sync(root, {dryRun, concurrency}) -> SyncResult` (§4.7).
///
/// Phases run in order: scanning the tree, comparing hashes against the
/// store, uploading changed files (concurrent, bounded), deleting vanished
/// ones (sequential), done. Per-file upload errors are captured into
/// `SyncResult::errors` rather than aborting the batch.
pub async fn sync(
    store: Arc<RwLock<VectorStore>>,
    root: &Path,
    config: &Config,
    clock: &dyn Clock,
    opts: &SyncOptions,
    on_progress: Option<ProgressCallback>,
) -> Result<SyncResult> {
    let on_progress = on_progress.unwrap_or_else(noop_progress);
    let start = clock.now_ms();

    on_progress(ProgressEvent { phase: SyncPhase::Scanning, current: 0, total: 0 });
    let walk_opts = WalkOptions {
        root: root.to_path_buf(),
        max_file_size: config.max_file_size,
        max_file_count: config.max_file_count,
    };
    let local = scanner::walk(&walk_opts)?;

    on_progress(ProgressEvent { phase: SyncPhase::Comparing, current: 0, total: local.len() });
    let indexed: HashMap<String, String> = {
        let guard = store.read().await;
        guard.list_files().into_iter().map(|f| (f.path, f.hash)).collect()
    };

    // Hashing is CPU-bound and embarrassingly parallel across files; a rayon
    // par_iter sweep keeps this phase cheap even for large trees before any
    // network-bound embedding work begins.
    let hashed: Vec<(scanner::FileEntry, String)> = local
        .par_iter()
        .map(|entry| (entry.clone(), hash_content(entry.content.as_bytes())))
        .collect();

    let mut to_upload = Vec::new();
    let mut skipped = 0usize;
    for (entry, hash) in hashed {
        match indexed.get(&entry.path) {
            Some(h) if *h == hash => skipped += 1,
            _ => to_upload.push((entry, hash)),
        }
    }

    let local_paths: HashSet<&str> = local.iter().map(|e| e.path.as_str()).collect();
    let to_delete: Vec<String> =
        indexed.keys().filter(|p| !local_paths.contains(p.as_str())).cloned().collect();

    let total_upload = to_upload.len();
    on_progress(ProgressEvent { phase: SyncPhase::Uploading, current: 0, total: total_upload });

    let mut uploaded = 0usize;
    let mut errors: Vec<(String, String)> = Vec::new();

    if opts.dry_run {
        uploaded = total_upload;
    } else {
        let semaphore = Arc::new(Semaphore::new(opts.concurrency.max(1)));
        let done_count = Arc::new(AtomicUsize::new(0));
        let mut join_set = tokio::task::JoinSet::new();

        for (entry, hash) in to_upload {
            let semaphore = semaphore.clone();
            let store = store.clone();
            let on_progress = on_progress.clone();
            let done_count = done_count.clone();

            join_set.spawn(async move {
                let _permit = semaphore.acquire_owned().await.expect("semaphore closed early");

                let result: Result<()> = async {
                    let needs = {
                        let guard = store.read().await;
                        guard.needs_upsert(&entry.path, &hash)
                    };
                    if !needs {
                        return Ok(());
                    }
                    let doc = {
                        let guard = store.read().await;
                        guard
                            .build_document(&entry.path, &entry.content, &hash, entry.size, entry.last_modified)
                            .await?
                    };
                    let mut guard = store.write().await;
                    guard.commit_document(doc)?;
                    Ok(())
                }
                .await;

                let n = done_count.fetch_add(1, Ordering::SeqCst) + 1;
                on_progress(ProgressEvent { phase: SyncPhase::Uploading, current: n, total: total_upload });

                (entry.path, result)
            });
        }

        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((path, Ok(()))) => uploaded += 1,
                Ok((path, Err(e))) => errors.push((path, e.to_string())),
                Err(join_err) => errors.push(("<task panic>".to_string(), join_err.to_string())),
            }
        }
    }

    on_progress(ProgressEvent { phase: SyncPhase::Deleting, current: 0, total: to_delete.len() });
    let mut deleted = 0usize;
    if opts.dry_run {
        deleted = to_delete.len();
    } else {
        for (i, path) in to_delete.iter().enumerate() {
            let mut guard = store.write().await;
            match guard.delete_file(path) {
                Ok(true) => deleted += 1,
                Ok(false) => {}
                Err(e) => errors.push((path.clone(), e.to_string())),
            }
            drop(guard);
            on_progress(ProgressEvent {
                phase: SyncPhase::Deleting,
                current: i + 1,
                total: to_delete.len(),
            });
        }
    }

    on_progress(ProgressEvent {
        phase: SyncPhase::Done,
        current: uploaded + deleted,
        total: uploaded + deleted,
    });

    Ok(SyncResult { uploaded, deleted, skipped, errors, duration_ms: clock.now_ms() - start })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::embedder::test_support::StubEmbedder;
    use std::sync::atomic::AtomicI64;

    fn test_config() -> Config {
        Config {
            max_file_size: 10 * 1024 * 1024,
            max_file_count: 10_000,
            ..Default::default()
        }
    }

    async fn open_store(dir: &Path) -> Arc<RwLock<VectorStore>> {
        let embedder = Arc::new(StubEmbedder::new(4));
        let clock = Arc::new(FixedClock(AtomicI64::new(1000)));
        Arc::new(RwLock::new(VectorStore::open(dir, "t", embedder, clock).unwrap()))
    }

    #[tokio::test]
    async fn uploads_new_and_changed_files_skips_unchanged() {
        let src = tempfile::tempdir().unwrap();
        let data = tempfile::tempdir().unwrap();
        std::fs::write(src.path().join("a.rs"), "fn a() {}\n").unwrap();
        std::fs::write(src.path().join("b.rs"), "fn b() {}\n").unwrap();

        let store = open_store(data.path()).await;
        let clock = FixedClock(AtomicI64::new(1000));
        let result = sync(store.clone(), src.path(), &test_config(), &clock, &SyncOptions::default(), None)
            .await
            .unwrap();
        assert_eq!(result.uploaded, 2);
        assert_eq!(result.skipped, 0);
        assert_eq!(result.deleted, 0);

        // second run: nothing changed.
        let result2 = sync(store.clone(), src.path(), &test_config(), &clock, &SyncOptions::default(), None)
            .await
            .unwrap();
        assert_eq!(result2.uploaded, 0);
        assert_eq!(result2.skipped, 2);
    }

    #[tokio::test]
    async fn deletes_files_removed_from_disk() {
        let src = tempfile::tempdir().unwrap();
        let data = tempfile::tempdir().unwrap();
        std::fs::write(src.path().join("x.rs"), "fn x() {}\n").unwrap();
        std::fs::write(src.path().join("z.rs"), "fn z() {}\n").unwrap();

        let store = open_store(data.path()).await;
        let clock = FixedClock(AtomicI64::new(1000));
        sync(store.clone(), src.path(), &test_config(), &clock, &SyncOptions::default(), None)
            .await
            .unwrap();

        std::fs::remove_file(src.path().join("z.rs")).unwrap();
        std::fs::write(src.path().join("y.rs"), "fn y() {}\n").unwrap();

        let result = sync(store.clone(), src.path(), &test_config(), &clock, &SyncOptions::default(), None)
            .await
            .unwrap();
        assert_eq!(result.uploaded, 1); // y.rs
        assert_eq!(result.deleted, 1); // z.rs
        assert_eq!(result.skipped, 1); // x.rs unchanged
    }

    #[tokio::test]
    async fn dry_run_reports_without_mutating_store() {
        let src = tempfile::tempdir().unwrap();
        let data = tempfile::tempdir().unwrap();
        std::fs::write(src.path().join("a.rs"), "fn a() {}\n").unwrap();

        let store = open_store(data.path()).await;
        let clock = FixedClock(AtomicI64::new(1000));
        let opts = SyncOptions { dry_run: true, ..Default::default() };
        let result = sync(store.clone(), src.path(), &test_config(), &clock, &opts, None).await.unwrap();
        assert_eq!(result.uploaded, 1);

        let guard = store.read().await;
        assert!(guard.list_files().is_empty());
    }

    #[tokio::test]
    async fn progress_callback_observes_all_phases() {
        let src = tempfile::tempdir().unwrap();
        let data = tempfile::tempdir().unwrap();
        std::fs::write(src.path().join("a.rs"), "fn a() {}\n").unwrap();

        let store = open_store(data.path()).await;
        let clock = FixedClock(AtomicI64::new(1000));
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let seen_cb = seen.clone();
        let cb: ProgressCallback = Arc::new(move |e| seen_cb.lock().unwrap().push(e.phase));
        sync(store, src.path(), &test_config(), &clock, &SyncOptions::default(), Some(cb))
            .await
            .unwrap();

        let phases = seen.lock().unwrap().clone();
        assert!(phases.contains(&SyncPhase::Scanning));
        assert!(phases.contains(&SyncPhase::Uploading));
        assert!(phases.contains(&SyncPhase::Done));
    }
}
