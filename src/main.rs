//! Notegraph - linked notes with a live graph view.
//!
//! This is the main entry point for the web server.
//! The application is organized into the following modules:
//!
//! - `models`: Notes, patches, graph and query types
//! - `links`: `[[Title]]` extraction
//! - `graph` / `graph_query`: Graph building and queries
//! - `layout` / `ticker` / `viewport`: Force layout and its display
//! - `autocomplete`: `[[` title suggestions
//! - `store`: sled-backed persistence
//! - `ai`: Gemini research and rewrite calls
//! - `workspace`: The editing session tying it all together
//! - `handlers`: HTTP route handlers

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use notegraph::{handlers, AppState, Config};

const MAX_BODY_BYTES: usize = 32 * 1024 * 1024;

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let config = Config::from_env();
    let bind = config.bind;
    let ai_enabled = config.gemini_api_key.is_some();
    let db_path = config.db_path.clone();

    let state = Arc::new(AppState::new(config).expect("Failed to open note store"));

    let app = Router::new()
        // Pages
        .route("/", get(handlers::index))
        .route("/note/{id}", get(handlers::view_note))
        .route("/graph", get(handlers::graph_page))
        // Note API
        .route("/api/notes", get(handlers::list_notes).post(handlers::create_note))
        .route(
            "/api/notes/{id}",
            axum::routing::put(handlers::replace_note)
                .patch(handlers::patch_note)
                .delete(handlers::delete_note),
        )
        .route("/api/notes/{id}/open", post(handlers::open_note))
        .route("/api/notes/{id}/links", get(handlers::note_links))
        .route("/api/graph", get(handlers::graph_api))
        .route("/api/search", get(handlers::search_api))
        .route("/api/export", get(handlers::export))
        // Autocomplete
        .route("/api/autocomplete", post(handlers::autocomplete))
        .route("/api/autocomplete/apply", post(handlers::autocomplete_apply))
        // Layout
        .route("/api/layout", get(handlers::layout))
        .route("/api/layout/drag", post(handlers::layout_drag))
        .route("/api/layout/viewport", post(handlers::layout_viewport))
        .route("/api/layout/click", post(handlers::layout_click))
        .route("/ws/layout", get(handlers::ws_layout))
        // AI
        .route("/api/ai/research", post(handlers::ai_research))
        .route("/api/ai/enhance", post(handlers::ai_enhance))
        .route("/api/ai/auto-connect", post(handlers::ai_auto_connect))
        .route("/api/ai/image", post(handlers::ai_image))
        .route("/api/ai/audio", post(handlers::ai_audio))
        // Base64 images and recordings are larger than the default body limit
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .with_state(state.clone());

    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .expect("Failed to bind listen address");

    tracing::info!(%bind, db = %db_path, "notes server running");
    if ai_enabled {
        tracing::info!("AI features: ENABLED");
    } else {
        tracing::info!("AI features: DISABLED (set GEMINI_API_KEY to enable)");
    }

    axum::serve(listener, app).await.expect("Server error");

    state.workspace().flush_saves();
}
