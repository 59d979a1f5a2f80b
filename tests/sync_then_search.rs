//! Black-box-of-the-whole-pipeline test: sync a small source tree into a
//! fresh store, then run a hybrid search against it.

use std::sync::atomic::AtomicI64;
use std::sync::Arc;

use tokio::sync::RwLock;

use searchgrep::clock::{Clock, FixedClock};
use searchgrep::config::Config;
use searchgrep::embedder::test_support::StubEmbedder;
use searchgrep::embedder::EmbedderPort;
use searchgrep::retriever::{self, SearchOptions};
use searchgrep::synchronizer::{self, SyncOptions};
use searchgrep::vector_store::VectorStore;

#[tokio::test]
async fn sync_indexes_tree_then_search_finds_relevant_file() {
    let src = tempfile::tempdir().unwrap();
    let data = tempfile::tempdir().unwrap();

    std::fs::write(
        src.path().join("auth.rs"),
        "fn authenticate(user: &str) -> bool {\n    check_credentials(user)\n}\n",
    )
    .unwrap();
    std::fs::write(
        src.path().join("math.rs"),
        "fn add(a: i32, b: i32) -> i32 {\n    a + b\n}\n",
    )
    .unwrap();
    std::fs::create_dir_all(src.path().join("node_modules/pkg")).unwrap();
    std::fs::write(src.path().join("node_modules/pkg/index.js"), "module.exports = {}").unwrap();

    let embedder: Arc<dyn EmbedderPort> = Arc::new(StubEmbedder::new(8));
    let clock: Arc<dyn Clock> = Arc::new(FixedClock(AtomicI64::new(1_700_000_000_000)));
    let store = Arc::new(RwLock::new(
        VectorStore::open(data.path(), "itest", embedder.clone(), clock.clone()).unwrap(),
    ));

    let config = Config::default();
    let sync_result = synchronizer::sync(
        store.clone(),
        src.path(),
        &config,
        clock.as_ref(),
        &SyncOptions::default(),
        None,
    )
    .await
    .unwrap();

    assert_eq!(sync_result.uploaded, 2, "node_modules must not be indexed");
    assert_eq!(sync_result.deleted, 0);
    assert!(sync_result.errors.is_empty());

    {
        let guard = store.read().await;
        assert_eq!(guard.list_files().len(), 2);
    }

    let guard = store.read().await;
    let results = retriever::search(&guard, embedder.as_ref(), "authenticate user credentials", 5, &SearchOptions::new())
        .await
        .unwrap();
    drop(guard);

    // Both indexed files compete as dense-similarity candidates (the stub
    // embedder isn't semantically meaningful), but BM25 gives `auth.rs` a
    // strict lexical edge since the query terms only appear there; RRF
    // fusion is expected to surface it among the results either way.
    assert_eq!(results.len(), 2);
    assert!(results.iter().any(|r| r.path == "auth.rs"));

    // Second sync with no filesystem changes is a pure no-op.
    let second = synchronizer::sync(store.clone(), src.path(), &config, clock.as_ref(), &SyncOptions::default(), None)
        .await
        .unwrap();
    assert_eq!(second.uploaded, 0);
    assert_eq!(second.skipped, 2);
}
