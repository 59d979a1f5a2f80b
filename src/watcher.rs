//! Watcher (§4.8): live filesystem watch feeding the VectorStore directly,
//! debounced per path so a burst of saves collapses into a single upsert.
//!
//! Built on `notify`; a debounce timer for a path restarts on every new event
//! for that path and only fires once no further event arrives within the
//! window, mirroring how editors/build tools flush-on-settle rather than
//! flush-on-every-keystroke.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use ignore::gitignore::{Gitignore, GitignoreBuilder};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher as NotifyWatcher};
use tokio::sync::mpsc;
use tokio::sync::RwLock;

use crate::clock::Clock;
use crate::error::{Result, SearchgrepError};
use crate::hash::hash_content;
use crate::scanner::SEARCHGREPIGNORE;
use crate::vector_store::VectorStore;

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(300);

const IGNORED_DIRS: &[&str] =
    &["node_modules", ".git", "target", "dist", "build", "out", "coverage", ".next", ".nuxt"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchEventKind {
    Upserted,
    Deleted,
    Skipped,
}

#[derive(Debug, Clone)]
pub struct WatchEvent {
    pub path: String,
    pub kind: WatchEventKind,
}

pub type WatchCallback = Arc<dyn Fn(WatchEvent) + Send + Sync>;

fn path_is_hard_excluded(rel: &Path) -> bool {
    rel.components().any(|c| {
        let s = c.as_os_str().to_string_lossy();
        IGNORED_DIRS.contains(&s.as_ref())
    })
}

fn build_ignore_matcher(root: &Path) -> Gitignore {
    let mut builder = GitignoreBuilder::new(root);
    let _ = builder.add(root.join(".gitignore"));
    let _ = builder.add(root.join(SEARCHGREPIGNORE));
    builder.build().unwrap_or_else(|_| GitignoreBuilder::new(root).build().expect("empty gitignore builds"))
}

fn to_posix(path: &Path) -> String {
    path.components().map(|c| c.as_os_str().to_string_lossy().into_owned()).collect::<Vec<_>>().join("/")
}

/// Applies one settled filesystem event to the store: re-reads the file (for
/// create/modify) or removes it (for delete/rename-away), comparing against
/// the stored hash so an event that settles to an unchanged file is a no-op.
async fn apply_path(
    store: &RwLock<VectorStore>,
    root: &Path,
    rel_path: &str,
    clock: &dyn Clock,
) -> Result<WatchEventKind> {
    let abs = root.join(rel_path);
    match std::fs::read(&abs) {
        Ok(bytes) => {
            let content = String::from_utf8_lossy(&bytes).into_owned();
            let hash = hash_content(&bytes);
            let size = bytes.len() as u64;
            let last_modified = clock.now_ms();
            let mut guard = store.write().await;
            let changed = guard.upsert_file(rel_path, &content, &hash, size, last_modified).await?;
            Ok(if changed { WatchEventKind::Upserted } else { WatchEventKind::Skipped })
        }
        Err(_) => {
            let mut guard = store.write().await;
            let removed = guard.delete_file(rel_path)?;
            Ok(if removed { WatchEventKind::Deleted } else { WatchEventKind::Skipped })
        }
    }
}

struct Debouncer {
    store: Arc<RwLock<VectorStore>>,
    clock: Arc<dyn Clock>,
    root: PathBuf,
    debounce: Duration,
    generations: Arc<Mutex<HashMap<String, u64>>>,
    on_event: WatchCallback,
}

impl Debouncer {
    /// Bump the generation for `path` and spawn a timer that only applies the
    /// change if no newer event has superseded it by the time the debounce
    /// window elapses.
    fn schedule(&self, rel_path: String) {
        let generation = {
            let mut g = self.generations.lock().expect("generations lock poisoned");
            let slot = g.entry(rel_path.clone()).or_insert(0);
            *slot += 1;
            *slot
        };

        let store = self.store.clone();
        let clock = self.clock.clone();
        let root = self.root.clone();
        let debounce = self.debounce;
        let generations = self.generations.clone();
        let on_event = self.on_event.clone();

        tokio::spawn(async move {
            tokio::time::sleep(debounce).await;
            let still_current = {
                let g = generations.lock().expect("generations lock poisoned");
                g.get(&rel_path).copied() == Some(generation)
            };
            if !still_current {
                return;
            }
            match apply_path(&store, &root, &rel_path, clock.as_ref()).await {
                Ok(kind) => on_event(WatchEvent { path: rel_path, kind }),
                Err(e) => crate::debug_log!("[watcher] failed to apply {rel_path}: {e}"),
            }
        });
    }
}

/// Start watching `root`, applying settled changes directly to `store`.
/// Returns a handle that keeps the underlying OS watcher alive; dropping it
/// stops the watch.
pub struct WatchHandle {
    _inner: RecommendedWatcher,
}

pub async fn watch(
    root: PathBuf,
    store: Arc<RwLock<VectorStore>>,
    clock: Arc<dyn Clock>,
    debounce: Duration,
    on_event: WatchCallback,
) -> Result<WatchHandle> {
    let (tx, mut rx) = mpsc::unbounded_channel::<Event>();

    let mut watcher = RecommendedWatcher::new(
        move |res: notify::Result<Event>| {
            if let Ok(event) = res {
                let _ = tx.send(event);
            }
        },
        notify::Config::default(),
    )
    .map_err(|e| SearchgrepError::WatcherFailure(e.into()))?;

    watcher
        .watch(&root, RecursiveMode::Recursive)
        .map_err(|e| SearchgrepError::WatcherFailure(e.into()))?;

    let ignore_matcher = build_ignore_matcher(&root);
    let debouncer = Debouncer {
        store,
        clock,
        root: root.clone(),
        debounce,
        generations: Arc::new(Mutex::new(HashMap::new())),
        on_event,
    };

    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            if !matches!(
                event.kind,
                EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
            ) {
                continue;
            }
            for abs_path in event.paths {
                let Ok(rel) = abs_path.strip_prefix(&root) else { continue };
                if path_is_hard_excluded(rel) {
                    continue;
                }
                if ignore_matcher.matched(rel, abs_path.is_dir()).is_ignore() {
                    continue;
                }
                debouncer.schedule(to_posix(rel));
            }
        }
    });

    Ok(WatchHandle { _inner: watcher })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::embedder::test_support::StubEmbedder;
    use std::sync::atomic::AtomicI64;

    async fn open_store(dir: &Path) -> Arc<RwLock<VectorStore>> {
        let embedder = Arc::new(StubEmbedder::new(4));
        let clock = Arc::new(FixedClock(AtomicI64::new(1000)));
        Arc::new(RwLock::new(VectorStore::open(dir, "t", embedder, clock).unwrap()))
    }

    #[test]
    fn hard_excluded_directories_are_skipped() {
        assert!(path_is_hard_excluded(Path::new("node_modules/pkg/index.js")));
        assert!(path_is_hard_excluded(Path::new("a/target/debug/out")));
        assert!(!path_is_hard_excluded(Path::new("src/main.rs")));
    }

    #[tokio::test(start_paused = true)]
    async fn bursty_edits_on_one_path_settle_into_a_single_upsert() {
        let src = tempfile::tempdir().unwrap();
        let data = tempfile::tempdir().unwrap();
        std::fs::write(src.path().join("a.rs"), "fn a() {}\n").unwrap();

        let store = open_store(data.path()).await;
        let clock: Arc<dyn Clock> = Arc::new(FixedClock(AtomicI64::new(1000)));
        let applied = Arc::new(Mutex::new(Vec::new()));
        let applied_cb = applied.clone();
        let generations = Arc::new(Mutex::new(HashMap::new()));

        let debouncer = Debouncer {
            store: store.clone(),
            clock,
            root: src.path().to_path_buf(),
            debounce: Duration::from_millis(300),
            generations,
            on_event: Arc::new(move |e| applied_cb.lock().unwrap().push(e)),
        };

        debouncer.schedule("a.rs".to_string());
        tokio::time::advance(Duration::from_millis(200)).await;
        debouncer.schedule("a.rs".to_string()); // restarts the 300ms window
        tokio::time::advance(Duration::from_millis(600)).await;
        tokio::task::yield_now().await;

        let events = applied.lock().unwrap().clone();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].path, "a.rs");
    }
}
