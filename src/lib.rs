//! Notegraph library - re-exports for testing and external use.
//!
//! Notes link to each other with `[[Title]]`; the links form a graph that is
//! laid out by a force simulation. Everything the web server does is
//! available here without HTTP.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

pub mod ai;
pub mod autocomplete;
pub mod debounce;
pub mod errors;
pub mod graph;
pub mod graph_query;
pub mod handlers;
pub mod layout;
pub mod links;
pub mod models;
pub mod notes;
pub mod store;
pub mod templates;
pub mod ticker;
pub mod viewport;
pub mod workspace;

use ai::{AiService, GeminiClient};
use errors::StoreError;
use layout::{LayoutConfig, LayoutEngine};
use store::{NoteStore, SledNoteStore};
use ticker::LayoutDriver;
use viewport::Viewport;
use workspace::Workspace;

// ============================================================================
// Configuration
// ============================================================================

pub const DB_PATH: &str = ".notes_db";
pub const BIND_ADDR: &str = "127.0.0.1:3000";
pub const SAVE_DEBOUNCE_MS: u64 = 800;
pub const TICK_MS: u64 = 16;

#[derive(Debug, Clone)]
pub struct Config {
    pub db_path: String,
    pub bind: SocketAddr,
    pub save_debounce: Duration,
    pub tick: Duration,
    pub gemini_api_key: Option<String>,
    pub ai_model: String,
    pub ai_base_url: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: DB_PATH.to_string(),
            bind: SocketAddr::from(([127, 0, 0, 1], 3000)),
            save_debounce: Duration::from_millis(SAVE_DEBOUNCE_MS),
            tick: Duration::from_millis(TICK_MS),
            gemini_api_key: None,
            ai_model: ai::DEFAULT_MODEL.to_string(),
            ai_base_url: ai::DEFAULT_BASE_URL.to_string(),
        }
    }
}

impl Config {
    /// Read `NOTES_*` and `GEMINI_API_KEY` from the environment. Unset or
    /// unparsable values fall back to the defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let millis = |key: &str, fallback: Duration| {
            get(key)
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_millis)
                .unwrap_or(fallback)
        };
        Self {
            db_path: get("NOTES_DB_PATH").unwrap_or(defaults.db_path),
            bind: get("NOTES_BIND")
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(defaults.bind),
            save_debounce: millis("NOTES_SAVE_DEBOUNCE_MS", defaults.save_debounce),
            tick: millis("NOTES_TICK_MS", defaults.tick),
            gemini_api_key: get("GEMINI_API_KEY").filter(|k| !k.trim().is_empty()),
            ai_model: get("NOTES_AI_MODEL").unwrap_or(defaults.ai_model),
            ai_base_url: get("NOTES_AI_BASE_URL").unwrap_or(defaults.ai_base_url),
        }
    }
}

// ============================================================================
// Application State
// ============================================================================

pub struct AppState {
    pub config: Config,
    pub workspace: Mutex<Workspace>,
    pub driver: Arc<LayoutDriver>,
    pub viewport: Mutex<Viewport>,
    pub store: Arc<dyn NoteStore>,
    pub ai: Option<Arc<dyn AiService>>,
}

impl AppState {
    /// Open the database and build the workspace. Must run inside a tokio
    /// runtime.
    pub fn new(config: Config) -> Result<Self, StoreError> {
        let store: Arc<dyn NoteStore> = Arc::new(SledNoteStore::open(&config.db_path)?);
        let ai: Option<Arc<dyn AiService>> = match &config.gemini_api_key {
            Some(key) => match GeminiClient::new(key.as_str(), config.ai_model.as_str(), config.ai_base_url.as_str()) {
                Ok(client) => Some(Arc::new(client)),
                Err(e) => {
                    tracing::warn!(error = %e, "AI client unavailable");
                    None
                }
            },
            None => None,
        };
        Self::with_parts(config, store, ai)
    }

    pub fn with_parts(
        config: Config,
        store: Arc<dyn NoteStore>,
        ai: Option<Arc<dyn AiService>>,
    ) -> Result<Self, StoreError> {
        let engine = Arc::new(Mutex::new(LayoutEngine::new(LayoutConfig::default())));
        let driver = Arc::new(LayoutDriver::new(engine, config.tick));
        let workspace = Workspace::open(store.clone(), driver.clone(), config.save_debounce)?;
        Ok(Self {
            config,
            workspace: Mutex::new(workspace),
            driver,
            viewport: Mutex::new(Viewport::default()),
            store,
            ai,
        })
    }

    /// Never hold the returned guard across an `.await`.
    pub fn workspace(&self) -> MutexGuard<'_, Workspace> {
        self.workspace.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn viewport(&self) -> MutexGuard<'_, Viewport> {
        self.viewport.lock().unwrap_or_else(|p| p.into_inner())
    }
}

// Re-export commonly used types
pub use errors::{AiError, WorkspaceError};
pub use graph::{backlinks, build_knowledge_graph, unresolved_links, TitleIndex};
pub use links::extract_links;
pub use models::{GraphEdge, GraphNode, GraphQuery, KnowledgeGraph, Note, NotePatch};
pub use workspace::{AiOutcome, AiRequest, View};

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_config_defaults() {
        let config = Config::from_lookup(lookup(&[]));
        assert_eq!(config.db_path, DB_PATH);
        assert_eq!(config.bind.to_string(), BIND_ADDR);
        assert_eq!(config.save_debounce, Duration::from_millis(800));
        assert_eq!(config.tick, Duration::from_millis(16));
        assert!(config.gemini_api_key.is_none());
        assert_eq!(config.ai_model, "gemini-2.5-flash");
    }

    #[test]
    fn test_config_overrides_and_bad_values() {
        let config = Config::from_lookup(lookup(&[
            ("NOTES_DB_PATH", "/tmp/notes"),
            ("NOTES_BIND", "0.0.0.0:8080"),
            ("NOTES_SAVE_DEBOUNCE_MS", "250"),
            ("NOTES_TICK_MS", "soon"),
            ("GEMINI_API_KEY", "  "),
        ]));
        assert_eq!(config.db_path, "/tmp/notes");
        assert_eq!(config.bind.port(), 8080);
        assert_eq!(config.save_debounce, Duration::from_millis(250));
        assert_eq!(config.tick, Duration::from_millis(TICK_MS));
        assert!(config.gemini_api_key.is_none());
    }
}
