//! Runtime (§4.11/§9): the explicit capability bag threaded through the CLI
//! shell in place of process-wide singletons. Everything downstream —
//! synchronizer, retriever, watcher, answerer — takes its capabilities as
//! arguments rather than reaching for a global, so tests can swap any one of
//! them (a stub embedder, a fixed clock) without touching process state.

use std::path::Path;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::clock::{Clock, SystemClock};
use crate::config::{self, Config};
use crate::embedder::{self, ChatPort, EmbedderPort};
use crate::error::{Result, SearchgrepError};
use crate::vector_store::VectorStore;

/// Name of the store file this process operates on, absent a `--store` flag.
pub const DEFAULT_STORE_NAME: &str = "default";

pub struct Runtime {
    pub config: Config,
    pub embedder: Arc<dyn EmbedderPort>,
    pub chat: Option<Arc<dyn ChatPort>>,
    pub clock: Arc<dyn Clock>,
    pub store: Arc<RwLock<VectorStore>>,
}

impl Runtime {
    /// Load the layered config for `cwd`, build the configured EmbedderPort
    /// and (if credentials allow) ChatPort, open `store_name`'s VectorStore
    /// under the config's data directory, and wire it all together.
    pub fn open(cwd: &Path, store_name: &str) -> Result<Self> {
        let config = config::load_config(cwd);
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let embedder = embedder::build_embedder(&config);
        let chat = embedder::build_chat(&config);
        let store = VectorStore::open(&config::default_data_dir(), store_name, embedder.clone(), clock.clone())?;

        Ok(Self { config, embedder, chat, clock, store: Arc::new(RwLock::new(store)) })
    }

    /// The configured ChatPort, or a `ConfigMissing` error when `ask` is
    /// invoked without chat credentials.
    pub fn require_chat(&self) -> Result<Arc<dyn ChatPort>> {
        self.chat.clone().ok_or_else(|| SearchgrepError::ConfigMissing {
            capability: "ChatPort",
            detail: "set OPENAI_API_KEY to use `ask`".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::embedder::test_support::StubEmbedder;
    use std::sync::atomic::AtomicI64;

    fn test_runtime(dir: &Path) -> Runtime {
        let config = Config::default();
        let clock: Arc<dyn Clock> = Arc::new(FixedClock(AtomicI64::new(1000)));
        let embedder: Arc<dyn EmbedderPort> = Arc::new(StubEmbedder::new(4));
        let store = VectorStore::open(dir, "t", embedder.clone(), clock.clone()).unwrap();
        Runtime { config, embedder, chat: None, clock, store: Arc::new(RwLock::new(store)) }
    }

    #[test]
    fn require_chat_errors_when_unconfigured() {
        let dir = tempfile::tempdir().unwrap();
        let rt = test_runtime(dir.path());
        assert!(rt.require_chat().is_err());
    }

    #[test]
    fn require_chat_succeeds_when_configured() {
        let dir = tempfile::tempdir().unwrap();
        let mut rt = test_runtime(dir.path());
        rt.chat = Some(Arc::new(crate::embedder::test_support::StubChat { response: "ok".to_string() }));
        assert!(rt.require_chat().is_ok());
    }
}
