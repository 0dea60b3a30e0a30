//! HTTP route handlers for the web application.
//!
//! Handlers lock the workspace only for synchronous work and never across an
//! `.await`. AI requests go through [`crate::workspace::run_ai`], which takes
//! the lock on either side of the service call.

use crate::autocomplete::{Completion, Suggestion, Trigger};
use crate::errors::{AiError, StoreError, WorkspaceError};
use crate::graph::{backlinks, unresolved_links};
use crate::graph_query::query_graph;
use crate::layout::LayoutSnapshot;
use crate::models::{GraphQuery, NotePatch};
use crate::notes::{render_note_body, search_notes};
use crate::templates::{base_html, render_graph_page, render_note_list, render_note_page, render_search_results};
use crate::ticker::lock_layout;
use crate::viewport::{self, Viewport};
use crate::workspace::{run_ai, AiRequest, View};
use crate::AppState;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    http::{header, StatusCode},
    response::{Html, IntoResponse, Response},
    Json,
};
use base64::Engine as _;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

// ============================================================================
// Error Mapping
// ============================================================================

fn status_for(err: &WorkspaceError) -> StatusCode {
    match err {
        WorkspaceError::UnknownNote { .. } => StatusCode::NOT_FOUND,
        WorkspaceError::NoActiveNote => StatusCode::CONFLICT,
        WorkspaceError::Store(StoreError::NotFound { .. }) => StatusCode::NOT_FOUND,
        WorkspaceError::Store(StoreError::Capacity { .. }) => StatusCode::INSUFFICIENT_STORAGE,
        WorkspaceError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        WorkspaceError::Ai(AiError::NotConfigured) => StatusCode::SERVICE_UNAVAILABLE,
        WorkspaceError::Ai(_) => StatusCode::BAD_GATEWAY,
    }
}

fn error_response(err: WorkspaceError) -> Response {
    let status = status_for(&err);
    if status.is_server_error() {
        tracing::error!(error = %err, "request failed");
    }
    (status, err.to_string()).into_response()
}

// ============================================================================
// Pages
// ============================================================================

#[derive(Deserialize)]
pub struct SearchQuery {
    pub q: Option<String>,
}

/// GET / - all notes, or search results when `q` is given.
pub async fn index(Query(query): Query<SearchQuery>, State(state): State<Arc<AppState>>) -> Html<String> {
    let q = query.q.unwrap_or_default();
    let ws = state.workspace();
    if q.trim().is_empty() {
        let content = format!("<h1>Notes</h1>{}", render_note_list(ws.notes()));
        return Html(base_html("Notes", &content, None));
    }
    let results = search_notes(ws.notes(), &q);
    Html(base_html("Search", &render_search_results(&q, &results), Some(&q)))
}

/// GET /note/{id} - open a note in the editor.
pub async fn view_note(Path(id): Path<String>, State(state): State<Arc<AppState>>) -> Response {
    let mut ws = state.workspace();
    let note = match ws.open_note(&id) {
        Ok(note) => note.clone(),
        Err(e) => return error_response(e),
    };

    let rendered = render_note_body(&note, ws.title_index());
    let linking: Vec<(String, String)> = backlinks(ws.graph(), &note.id)
        .into_iter()
        .filter_map(|src| ws.note(src).map(|n| (n.id.clone(), n.title.clone())))
        .collect();
    let unresolved = unresolved_links(&note, ws.title_index());

    let title = if note.title.is_empty() { "Untitled" } else { note.title.as_str() };
    let page = render_note_page(&note, &rendered, &linking, &unresolved);
    Html(base_html(title, &page, None)).into_response()
}

#[derive(Deserialize)]
pub struct GraphParams {
    pub q: Option<String>,
}

/// GET /graph?q= - the graph view. Positions arrive over `/ws/layout`; a
/// query dims the nodes it leaves out.
pub async fn graph_page(Query(params): Query<GraphParams>, State(state): State<Arc<AppState>>) -> Html<String> {
    let raw = params.q.unwrap_or_default();
    let query = GraphQuery::parse(&raw);
    let mut ws = state.workspace();
    ws.show_graph();
    let titles: HashMap<&str, &str> = ws
        .graph()
        .nodes
        .iter()
        .map(|n| (n.id.as_str(), n.title.as_str()))
        .collect();
    let titles_json = serde_json::to_string(&titles).unwrap_or_else(|_| "{}".to_string());

    let (matches_json, stats) = if query.is_unfiltered() {
        ("null".to_string(), ws.graph().stats.clone())
    } else {
        let narrowed = query_graph(&query, ws.graph());
        let ids: Vec<&str> = narrowed.nodes.iter().map(|n| n.id.as_str()).collect();
        let json = serde_json::to_string(&ids).unwrap_or_else(|_| "null".to_string());
        (json, narrowed.stats.clone())
    };
    let summary = format!(
        "{}: {} notes, {} links, {} orphans",
        query.describe(),
        stats.total_nodes,
        stats.total_edges,
        stats.orphan_count
    );
    Html(base_html(
        "Graph",
        &render_graph_page(&titles_json, &matches_json, &raw, &summary),
        None,
    ))
}

// ============================================================================
// Note API
// ============================================================================

pub async fn list_notes(State(state): State<Arc<AppState>>) -> Response {
    Json(state.workspace().notes().to_vec()).into_response()
}

#[derive(Deserialize)]
pub struct CreateNoteBody {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// POST /api/notes
pub async fn create_note(State(state): State<Arc<AppState>>, Json(body): Json<CreateNoteBody>) -> Response {
    match state.workspace().create_note(&body.title, &body.content, &body.tags) {
        Ok(note) => (StatusCode::CREATED, Json(note)).into_response(),
        Err(e) => error_response(e),
    }
}

#[derive(Deserialize)]
pub struct ReplaceNoteBody {
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
}

/// PUT /api/notes/{id} - replace title and body (and tags when given).
pub async fn replace_note(
    Path(id): Path<String>,
    State(state): State<Arc<AppState>>,
    Json(body): Json<ReplaceNoteBody>,
) -> Response {
    let patch = NotePatch {
        title: Some(body.title),
        content: Some(body.content),
        tags: body.tags,
    };
    match state.workspace().edit(&id, &patch) {
        Ok(note) => Json(note).into_response(),
        Err(e) => error_response(e),
    }
}

/// PATCH /api/notes/{id} - change only the fields present.
pub async fn patch_note(
    Path(id): Path<String>,
    State(state): State<Arc<AppState>>,
    Json(patch): Json<NotePatch>,
) -> Response {
    if patch.is_empty() {
        return (StatusCode::BAD_REQUEST, "Nothing to change").into_response();
    }
    let mut ws = state.workspace();
    let earlier = ws.take_save_error();
    match (ws.edit(&id, &patch), earlier) {
        (Ok(_), Some(failed)) => {
            let status = status_for(&WorkspaceError::Store(failed));
            (status, "An earlier save failed; edits are kept in memory. Retry or export.").into_response()
        }
        (Ok(note), None) => Json(note).into_response(),
        (Err(e), _) => error_response(e),
    }
}

/// DELETE /api/notes/{id}
pub async fn delete_note(Path(id): Path<String>, State(state): State<Arc<AppState>>) -> Response {
    match state.workspace().delete_note(&id) {
        Ok(()) => (StatusCode::OK, "Deleted").into_response(),
        Err(e) => error_response(e),
    }
}

/// POST /api/notes/{id}/open - navigate to a note.
pub async fn open_note(Path(id): Path<String>, State(state): State<Arc<AppState>>) -> Response {
    match state.workspace().open_note(&id) {
        Ok(note) => Json(note.clone()).into_response(),
        Err(e) => error_response(e),
    }
}

#[derive(Serialize)]
struct LinkRef {
    id: String,
    title: String,
}

#[derive(Serialize)]
struct NoteLinks {
    backlinks: Vec<LinkRef>,
    unresolved: Vec<String>,
}

/// GET /api/notes/{id}/links - who links here, and which links go nowhere.
pub async fn note_links(Path(id): Path<String>, State(state): State<Arc<AppState>>) -> Response {
    let ws = state.workspace();
    let Some(note) = ws.note(&id) else {
        return (StatusCode::NOT_FOUND, "Note not found").into_response();
    };
    let links = NoteLinks {
        backlinks: backlinks(ws.graph(), &id)
            .into_iter()
            .filter_map(|src| ws.note(src))
            .map(|n| LinkRef {
                id: n.id.clone(),
                title: n.title.clone(),
            })
            .collect(),
        unresolved: unresolved_links(note, ws.title_index()),
    };
    Json(links).into_response()
}

/// GET /api/graph?q= - the graph, optionally narrowed by a query.
pub async fn graph_api(Query(params): Query<GraphParams>, State(state): State<Arc<AppState>>) -> Response {
    let query = GraphQuery::parse(params.q.as_deref().unwrap_or(""));
    let graph = query_graph(&query, state.workspace().graph());
    Json(graph).into_response()
}

/// GET /api/search?q=
pub async fn search_api(Query(query): Query<SearchQuery>, State(state): State<Arc<AppState>>) -> Response {
    let q = query.q.unwrap_or_default();
    Json(search_notes(state.workspace().notes(), &q)).into_response()
}

/// GET /api/export - the whole collection as JSON, for backup after a
/// failed save.
pub async fn export(State(state): State<Arc<AppState>>) -> Response {
    let ws = state.workspace();
    match serde_json::to_string_pretty(ws.notes()) {
        Ok(json) => (
            [
                (header::CONTENT_TYPE, "application/json"),
                (header::CONTENT_DISPOSITION, "attachment; filename=\"notes.json\""),
            ],
            json,
        )
            .into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, format!("Export failed: {}", e)).into_response(),
    }
}

// ============================================================================
// Autocomplete
// ============================================================================

#[derive(Deserialize)]
pub struct AutocompleteBody {
    pub note_id: String,
    pub body: String,
    pub cursor: usize,
    #[serde(default)]
    pub title: Option<String>,
}

#[derive(Serialize)]
struct AutocompleteResponse {
    open: bool,
    trigger: Option<Trigger>,
    suggestions: Vec<Suggestion>,
}

/// POST /api/autocomplete
pub async fn autocomplete(State(state): State<Arc<AppState>>, Json(req): Json<AutocompleteBody>) -> Response {
    let found = state.workspace().suggest(&req.note_id, &req.body, req.cursor);
    let resp = match found {
        Some((trigger, suggestions)) => AutocompleteResponse {
            open: true,
            trigger: Some(trigger),
            suggestions,
        },
        None => AutocompleteResponse {
            open: false,
            trigger: None,
            suggestions: Vec::new(),
        },
    };
    Json(resp).into_response()
}

/// POST /api/autocomplete/apply - accept a suggestion and save the body.
pub async fn autocomplete_apply(State(state): State<Arc<AppState>>, Json(req): Json<AutocompleteBody>) -> Response {
    let Some(title) = req.title else {
        return (StatusCode::BAD_REQUEST, "Missing title").into_response();
    };
    let result: Result<Option<Completion>, WorkspaceError> = state
        .workspace()
        .accept_suggestion(&req.note_id, &req.body, req.cursor, &title);
    match result {
        Ok(Some(done)) => Json(done).into_response(),
        Ok(None) => (StatusCode::CONFLICT, "No open link at cursor").into_response(),
        Err(e) => error_response(e),
    }
}

// ============================================================================
// Layout
// ============================================================================

#[derive(Serialize)]
struct LayoutResponse {
    layout: LayoutSnapshot,
    viewport: Viewport,
}

/// GET /api/layout
pub async fn layout(State(state): State<Arc<AppState>>) -> Response {
    let layout = lock_layout(state.driver.engine()).snapshot();
    let viewport = *state.viewport();
    Json(LayoutResponse { layout, viewport }).into_response()
}

#[derive(Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DragPhase {
    Start,
    Move,
    End,
}

/// Pointer position in screen coordinates.
#[derive(Deserialize)]
pub struct DragBody {
    pub id: String,
    pub phase: DragPhase,
    pub sx: f64,
    pub sy: f64,
}

/// POST /api/layout/drag
pub async fn layout_drag(State(state): State<Arc<AppState>>, Json(req): Json<DragBody>) -> Response {
    let (x, y) = state.viewport().to_world(req.sx, req.sy);
    let ok = {
        let mut engine = lock_layout(state.driver.engine());
        match req.phase {
            DragPhase::Start => engine.start_drag(&req.id, x, y),
            DragPhase::Move => engine.drag_to(&req.id, x, y),
            DragPhase::End => engine.end_drag(&req.id),
        }
    };
    if !ok {
        return (StatusCode::NOT_FOUND, "Node not found or not dragged").into_response();
    }
    if state.workspace().view() == View::Graph {
        state.driver.ensure_running();
    }
    state.driver.publish();
    Json(serde_json::json!({ "ok": true, "x": x, "y": y })).into_response()
}

#[derive(Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ViewportAction {
    Pan { dx: f64, dy: f64 },
    Zoom { sx: f64, sy: f64, factor: f64 },
    /// Put the layout center in the middle of a `width` x `height` screen.
    Center { width: f64, height: f64 },
    Fit { width: f64, height: f64, #[serde(default)] padding: f64 },
}

/// POST /api/layout/viewport - zoom and pan. Never touches the simulation.
pub async fn layout_viewport(State(state): State<Arc<AppState>>, Json(action): Json<ViewportAction>) -> Response {
    let points: Vec<(f64, f64)> = match action {
        ViewportAction::Fit { .. } => lock_layout(state.driver.engine())
            .nodes()
            .iter()
            .map(|n| (n.x, n.y))
            .collect(),
        _ => Vec::new(),
    };
    let center = lock_layout(state.driver.engine()).config().center;

    let mut vp = state.viewport();
    match action {
        ViewportAction::Pan { dx, dy } => vp.pan(dx, dy),
        ViewportAction::Zoom { sx, sy, factor } => vp.zoom_at(sx, sy, factor),
        ViewportAction::Center { width, height } => {
            vp.tx = width / 2.0 - center[0] * vp.scale;
            vp.ty = height / 2.0 - center[1] * vp.scale;
        }
        ViewportAction::Fit { width, height, padding } => {
            if let Some(b) = viewport::bounds(points) {
                vp.fit(b, width, height, padding);
            }
        }
    }
    Json(*vp).into_response()
}

#[derive(Deserialize)]
pub struct ClickBody {
    pub sx: f64,
    pub sy: f64,
}

/// POST /api/layout/click - navigate to the node under the pointer.
pub async fn layout_click(State(state): State<Arc<AppState>>, Json(req): Json<ClickBody>) -> Response {
    let (x, y) = state.viewport().to_world(req.sx, req.sy);
    match state.workspace().click_node(x, y) {
        Ok(hit) => Json(serde_json::json!({ "id": hit.map(|n| n.id.clone()) })).into_response(),
        Err(e) => error_response(e),
    }
}

// ============================================================================
// Layout WebSocket
// ============================================================================

/// GET /ws/layout - stream layout snapshots while the graph view is open.
pub async fn ws_layout(State(state): State<Arc<AppState>>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| handle_layout_ws(socket, state))
}

async fn handle_layout_ws(socket: WebSocket, state: Arc<AppState>) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let mut snapshots = state.driver.subscribe();
    state.workspace().show_graph();

    let initial = snapshots.borrow_and_update().clone();
    if let Ok(json) = serde_json::to_string(&initial) {
        if ws_tx.send(Message::Text(json.into())).await.is_err() {
            return;
        }
    }

    loop {
        tokio::select! {
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = snapshots.borrow_and_update().clone();
                let json = match serde_json::to_string(&snapshot) {
                    Ok(json) => json,
                    Err(_) => continue,
                };
                if ws_tx.send(Message::Text(json.into())).await.is_err() {
                    break;
                }
            }
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                    _ => {}
                }
            }
        }
    }

    drop(snapshots);
    release_layout_stream(&state);
}

/// A graph view unmounted. Ticking stops once no other view is streaming,
/// unless the editor already stopped it.
fn release_layout_stream(state: &AppState) {
    if state.driver.subscriber_count() > 0 {
        return;
    }
    if state.workspace().view() == View::Graph {
        state.driver.stop();
    }
}

// ============================================================================
// AI
// ============================================================================

#[derive(Deserialize)]
pub struct ResearchBody {
    pub query: String,
}

#[derive(Deserialize)]
pub struct EnhanceBody {
    pub instruction: String,
}

/// Media as base64 so the editor can post it as JSON.
#[derive(Deserialize)]
pub struct MediaBody {
    pub data: String,
    pub mime_type: String,
}

async fn ai_request(state: &AppState, request: AiRequest) -> Response {
    let Some(ai) = state.ai.clone() else {
        return error_response(WorkspaceError::Ai(AiError::NotConfigured));
    };
    match run_ai(&state.workspace, ai.as_ref(), request).await {
        Ok(outcome) => Json(outcome).into_response(),
        Err(e) => error_response(e),
    }
}

fn decode_media(body: MediaBody) -> Result<(Vec<u8>, String), Response> {
    base64::engine::general_purpose::STANDARD
        .decode(body.data.trim())
        .map(|data| (data, body.mime_type))
        .map_err(|e| (StatusCode::BAD_REQUEST, format!("Invalid base64: {}", e)).into_response())
}

pub async fn ai_research(State(state): State<Arc<AppState>>, Json(body): Json<ResearchBody>) -> Response {
    if body.query.trim().is_empty() {
        return (StatusCode::BAD_REQUEST, "Empty query").into_response();
    }
    ai_request(&state, AiRequest::Research { query: body.query }).await
}

pub async fn ai_enhance(State(state): State<Arc<AppState>>, Json(body): Json<EnhanceBody>) -> Response {
    ai_request(&state, AiRequest::Enhance { instruction: body.instruction }).await
}

pub async fn ai_auto_connect(State(state): State<Arc<AppState>>) -> Response {
    ai_request(&state, AiRequest::AutoConnect).await
}

pub async fn ai_image(State(state): State<Arc<AppState>>, Json(body): Json<MediaBody>) -> Response {
    match decode_media(body) {
        Ok((data, mime_type)) => ai_request(&state, AiRequest::Image { data, mime_type }).await,
        Err(resp) => resp,
    }
}

pub async fn ai_audio(State(state): State<Arc<AppState>>, Json(body): Json<MediaBody>) -> Response {
    match decode_media(body) {
        Ok((data, mime_type)) => ai_request(&state, AiRequest::Audio { data, mime_type }).await,
        Err(resp) => resp,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            status_for(&WorkspaceError::UnknownNote { id: "x".into() }),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_for(&StoreError::Capacity { reason: "full".into() }.into()),
            StatusCode::INSUFFICIENT_STORAGE
        );
        assert_eq!(
            status_for(&AiError::NotConfigured.into()),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status_for(&AiError::EmptyResponse.into()),
            StatusCode::BAD_GATEWAY
        );
    }

    #[test]
    fn test_viewport_action_parsing() {
        let zoom: ViewportAction =
            serde_json::from_str(r#"{"action":"zoom","sx":1,"sy":2,"factor":1.1}"#).unwrap();
        assert!(matches!(zoom, ViewportAction::Zoom { .. }));
        let fit: ViewportAction =
            serde_json::from_str(r#"{"action":"fit","width":800,"height":600}"#).unwrap();
        assert!(matches!(fit, ViewportAction::Fit { padding, .. } if padding == 0.0));
    }

    #[test]
    fn test_decode_media_rejects_garbage() {
        assert!(decode_media(MediaBody {
            data: "AQID".into(),
            mime_type: "image/png".into()
        })
        .is_ok());
        assert!(decode_media(MediaBody {
            data: "***".into(),
            mime_type: "image/png".into()
        })
        .is_err());
    }

    // ---- pages ----

    fn app_state() -> Arc<AppState> {
        let db = sled::Config::new().temporary(true).open().unwrap();
        let store = Arc::new(crate::store::SledNoteStore::from_db(&db).unwrap());
        Arc::new(AppState::with_parts(crate::Config::default(), store, None).unwrap())
    }

    #[tokio::test]
    async fn test_graph_page_describes_query() {
        let state = app_state();
        state.workspace().create_note("Lonely", "no links", &[]).unwrap();

        let Html(page) = graph_page(Query(GraphParams { q: None }), State(state.clone())).await;
        assert!(page.contains("Full graph:"));
        assert!(page.contains(r#"id="graph-matches">null</script>"#));

        let Html(page) = graph_page(Query(GraphParams { q: Some("orphans".into()) }), State(state.clone())).await;
        assert!(page.contains("orphans only:"));
        assert!(!page.contains(r#"id="graph-matches">null</script>"#));
        assert_eq!(state.workspace().view(), crate::View::Graph);
        state.driver.stop();
    }

    #[tokio::test]
    async fn test_ticker_runs_until_last_stream_closes() {
        let state = app_state();
        let first = state.driver.subscribe();
        let second = state.driver.subscribe();
        state.workspace().show_graph();
        assert!(state.driver.is_running());

        drop(first);
        release_layout_stream(&state);
        assert!(state.driver.is_running());

        drop(second);
        release_layout_stream(&state);
        assert!(!state.driver.is_running());
    }
}
