//! The editing session: notes in memory, the derived graph, the layout, which
//! note is open and which view is showing.
//!
//! Every mutation runs synchronously to completion: the in-memory collection
//! changes, the graph is rebuilt from scratch and the layout reconciles with
//! it before the call returns. Persistence of body and title edits is
//! debounced; creates and deletes are written through immediately.
//!
//! AI requests are tagged with a [`AiTicket`] when they start. The service call
//! itself happens outside the workspace lock (see [`run_ai`]), and the result
//! is checked against the ticket before it touches the note.

use crate::ai::AiService;
use crate::autocomplete::{self, Completion, Suggestion, Trigger};
use crate::debounce::Debouncer;
use crate::errors::{StoreError, WorkspaceError};
use crate::graph::{build_knowledge_graph, TitleIndex};
use crate::layout::LayoutSnapshot;
use crate::models::{KnowledgeGraph, Note, NotePatch};
use crate::store::{sort_notes, NoteStore};
use crate::ticker::{lock_layout, LayoutDriver};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum View {
    Editor,
    Graph,
}

// ============================================================================
// AI tickets
// ============================================================================

/// How an AI result lands in the note.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AiEdit {
    /// Added after whatever the body is when the result arrives.
    Append,
    /// Replaces the body; only valid if the body has not changed since.
    Replace,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AiTicket {
    pub note_id: String,
    pub revision: String,
    pub edit: AiEdit,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AiOutcome {
    Applied { note: Note },
    /// The originating note is no longer the open one.
    DiscardedInactive,
    /// The body changed while a replacing request was in flight.
    DiscardedStale,
}

#[derive(Debug, Clone)]
pub enum AiRequest {
    Research { query: String },
    Enhance { instruction: String },
    AutoConnect,
    Image { data: Vec<u8>, mime_type: String },
    Audio { data: Vec<u8>, mime_type: String },
}

impl AiRequest {
    pub fn edit(&self) -> AiEdit {
        match self {
            AiRequest::Enhance { .. } | AiRequest::AutoConnect => AiEdit::Replace,
            _ => AiEdit::Append,
        }
    }
}

// ============================================================================
// Workspace
// ============================================================================

pub struct Workspace {
    store: Arc<dyn NoteStore>,
    notes: Vec<Note>,
    index: TitleIndex,
    graph: KnowledgeGraph,
    driver: Arc<LayoutDriver>,
    active: Option<String>,
    view: View,
    saves: Debouncer<Note>,
    pending_save: Option<String>,
    save_error: Arc<Mutex<Option<StoreError>>>,
    /// Ids of deleted notes. Held for the whole of every debounced write so
    /// a save racing a delete cannot bring the note back.
    deleted: Arc<Mutex<HashSet<String>>>,
}

fn lock_deleted(deleted: &Mutex<HashSet<String>>) -> MutexGuard<'_, HashSet<String>> {
    deleted.lock().unwrap_or_else(|p| p.into_inner())
}

impl Workspace {
    /// Load every note and lay out the graph. Starts on the graph view.
    pub fn open(
        store: Arc<dyn NoteStore>,
        driver: Arc<LayoutDriver>,
        save_delay: Duration,
    ) -> Result<Self, StoreError> {
        let notes = store.list_all()?;
        let save_error: Arc<Mutex<Option<StoreError>>> = Arc::new(Mutex::new(None));

        let deleted: Arc<Mutex<HashSet<String>>> = Arc::new(Mutex::new(HashSet::new()));

        let sink_store = store.clone();
        let sink_error = save_error.clone();
        let sink_deleted = deleted.clone();
        let saves = Debouncer::new(save_delay, move |note: Note| {
            let gone = lock_deleted(&sink_deleted);
            if gone.contains(&note.id) {
                tracing::debug!(id = %note.id, "dropping save of a deleted note");
                return;
            }
            if let Err(e) = sink_store.upsert(note) {
                tracing::error!(error = %e, "failed to persist note");
                *sink_error.lock().unwrap_or_else(|p| p.into_inner()) = Some(e);
            }
        });

        tracing::info!(notes = notes.len(), "workspace opened");
        let mut workspace = Self {
            store,
            notes,
            index: TitleIndex::default(),
            graph: KnowledgeGraph::default(),
            driver,
            active: None,
            view: View::Graph,
            saves,
            pending_save: None,
            save_error,
            deleted,
        };
        workspace.rebuild();
        Ok(workspace)
    }

    pub fn notes(&self) -> &[Note] {
        &self.notes
    }

    pub fn note(&self, id: &str) -> Option<&Note> {
        self.notes.iter().find(|n| n.id == id)
    }

    pub fn graph(&self) -> &KnowledgeGraph {
        &self.graph
    }

    pub fn title_index(&self) -> &TitleIndex {
        &self.index
    }

    pub fn driver(&self) -> &Arc<LayoutDriver> {
        &self.driver
    }

    pub fn layout_snapshot(&self) -> LayoutSnapshot {
        lock_layout(self.driver.engine()).snapshot()
    }

    pub fn view(&self) -> View {
        self.view
    }

    pub fn active_id(&self) -> Option<&str> {
        self.active.as_deref()
    }

    pub fn active_note(&self) -> Option<&Note> {
        self.active.as_deref().and_then(|id| self.note(id))
    }

    /// The last background persistence failure, if any, cleared on read.
    pub fn take_save_error(&self) -> Option<StoreError> {
        self.save_error
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take()
    }

    fn position(&self, id: &str) -> Result<usize, WorkspaceError> {
        self.notes
            .iter()
            .position(|n| n.id == id)
            .ok_or_else(|| WorkspaceError::UnknownNote { id: id.to_string() })
    }

    /// Recompute the title index and graph from the whole collection and
    /// reconcile the layout with it.
    fn rebuild(&mut self) {
        self.index = TitleIndex::build(&self.notes);
        self.graph = build_knowledge_graph(&self.notes);
        let report = lock_layout(self.driver.engine()).sync(&self.graph);
        tracing::debug!(
            nodes = self.graph.nodes.len(),
            edges = self.graph.edges.len(),
            added = report.added.len(),
            removed = report.removed.len(),
            edges_changed = report.edges_changed,
            "graph rebuilt"
        );
        self.driver.publish();
        if self.view == View::Graph {
            self.driver.ensure_running();
        }
    }

    // ------------------------------------------------------------------------
    // Mutations
    // ------------------------------------------------------------------------

    /// Create a note, persist it and open it in the editor. If persisting
    /// fails the note is kept in memory and the error returned.
    pub fn create_note(&mut self, title: &str, content: &str, tags: &[String]) -> Result<Note, WorkspaceError> {
        self.flush_saves();
        let note = Note::new(title, content).with_tags(tags);
        self.notes.insert(0, note.clone());
        self.active = Some(note.id.clone());
        self.view = View::Editor;
        self.driver.stop();
        self.rebuild();

        self.store.upsert(note.clone())?;
        tracing::info!(id = %note.id, "note created");
        Ok(note)
    }

    /// Apply a user edit in memory, rebuild the graph and schedule a save.
    pub fn edit(&mut self, id: &str, patch: &NotePatch) -> Result<Note, WorkspaceError> {
        let pos = self.position(id)?;
        if !patch.apply(&mut self.notes[pos]) {
            return Ok(self.notes[pos].clone());
        }
        self.notes[pos].updated_at = Utc::now();
        let note = self.notes[pos].clone();
        sort_notes(&mut self.notes);
        self.rebuild();

        if self.pending_save.as_deref() != Some(id) {
            self.flush_saves();
        }
        self.pending_save = Some(id.to_string());
        self.saves.schedule(note.clone());
        Ok(note)
    }

    pub fn edit_content(&mut self, id: &str, content: &str) -> Result<Note, WorkspaceError> {
        self.edit(id, &NotePatch::content(content))
    }

    pub fn edit_title(&mut self, id: &str, title: &str) -> Result<Note, WorkspaceError> {
        self.edit(id, &NotePatch::title(title))
    }

    /// Delete a note. Links to its title become unresolved; if it was open the
    /// workspace falls back to the graph view.
    pub fn delete_note(&mut self, id: &str) -> Result<(), WorkspaceError> {
        self.position(id)?;
        let dropped = if self.pending_save.as_deref() == Some(id) {
            self.pending_save = None;
            self.saves.cancel()
        } else {
            None
        };
        {
            let mut gone = lock_deleted(&self.deleted);
            gone.insert(id.to_string());
            if let Err(e) = self.store.delete(id) {
                gone.remove(id);
                drop(gone);
                // The note stays, so its pending edit must still be saved.
                if let Some(note) = dropped {
                    self.pending_save = Some(id.to_string());
                    self.saves.schedule(note);
                }
                return Err(e.into());
            }
        }
        self.notes.retain(|n| n.id != id);
        if self.active.as_deref() == Some(id) {
            self.active = None;
            self.view = View::Graph;
        }
        self.rebuild();
        tracing::info!(%id, "note deleted");
        Ok(())
    }

    /// Persist any pending edit now. Returns whether one was pending.
    pub fn flush_saves(&mut self) -> bool {
        self.pending_save = None;
        self.saves.flush()
    }

    // ------------------------------------------------------------------------
    // Navigation
    // ------------------------------------------------------------------------

    /// Open `id` in the editor. Pending saves are flushed first and the graph
    /// ticker is stopped.
    pub fn open_note(&mut self, id: &str) -> Result<&Note, WorkspaceError> {
        let pos = self.position(id)?;
        self.flush_saves();
        self.active = Some(id.to_string());
        self.view = View::Editor;
        self.driver.stop();
        Ok(&self.notes[pos])
    }

    /// Follow a wiki-link. Unresolved titles do nothing.
    pub fn follow_link(&mut self, title: &str) -> Result<Option<&Note>, WorkspaceError> {
        match self.index.resolve(title).map(str::to_string) {
            Some(id) => self.open_note(&id).map(Some),
            None => Ok(None),
        }
    }

    pub fn show_graph(&mut self) {
        self.flush_saves();
        self.view = View::Graph;
        self.driver.ensure_running();
    }

    /// Navigate to the node under the world point, if any. Hit testing only
    /// reads positions.
    pub fn click_node(&mut self, x: f64, y: f64) -> Result<Option<&Note>, WorkspaceError> {
        let hit = lock_layout(self.driver.engine()).node_at(x, y).map(str::to_string);
        match hit {
            Some(id) => self.open_note(&id).map(Some),
            None => Ok(None),
        }
    }

    // ------------------------------------------------------------------------
    // Autocomplete
    // ------------------------------------------------------------------------

    pub fn suggest(&self, id: &str, body: &str, cursor: usize) -> Option<(Trigger, Vec<Suggestion>)> {
        autocomplete::suggest(body, cursor, &self.notes, Some(id))
    }

    /// Accept a suggestion into `body` and apply it as a content edit.
    pub fn accept_suggestion(
        &mut self,
        id: &str,
        body: &str,
        cursor: usize,
        title: &str,
    ) -> Result<Option<Completion>, WorkspaceError> {
        let Some(trigger) = autocomplete::find_trigger(body, cursor) else {
            return Ok(None);
        };
        let completion = autocomplete::accept(body, &trigger, title);
        self.edit_content(id, &completion.body)?;
        Ok(Some(completion))
    }

    // ------------------------------------------------------------------------
    // AI results
    // ------------------------------------------------------------------------

    pub fn begin_ai(&self, edit: AiEdit) -> Result<AiTicket, WorkspaceError> {
        let note = self.active_note().ok_or(WorkspaceError::NoActiveNote)?;
        Ok(AiTicket {
            note_id: note.id.clone(),
            revision: note.revision(),
            edit,
        })
    }

    /// Land an AI result on the note named by `ticket`. Only the body of the
    /// in-memory note changes; the whole note is then written through, so a
    /// title edit whose save failed earlier is persisted rather than lost.
    /// If that write fails the result stays in memory and the error is
    /// returned.
    pub fn apply_ai(&mut self, ticket: &AiTicket, text: &str) -> Result<AiOutcome, WorkspaceError> {
        if self.active.as_deref() != Some(ticket.note_id.as_str()) {
            tracing::warn!(note = %ticket.note_id, "discarding AI response for a note that is no longer open");
            return Ok(AiOutcome::DiscardedInactive);
        }
        let pos = self.position(&ticket.note_id)?;
        let current = &self.notes[pos];

        let content = match ticket.edit {
            AiEdit::Replace => {
                if current.revision() != ticket.revision {
                    tracing::warn!(note = %ticket.note_id, "discarding AI rewrite of a note that changed meanwhile");
                    return Ok(AiOutcome::DiscardedStale);
                }
                text.to_string()
            }
            AiEdit::Append => {
                let body = current.content.trim_end();
                if body.is_empty() {
                    text.trim().to_string()
                } else {
                    format!("{}\n\n{}", body, text.trim())
                }
            }
        };

        // The in-memory note is authoritative: an earlier save may have
        // failed, leaving the stored copy behind it.
        self.flush_saves();
        NotePatch::content(content).apply(&mut self.notes[pos]);
        self.notes[pos].updated_at = Utc::now();
        let note = self.notes[pos].clone();
        sort_notes(&mut self.notes);
        self.rebuild();

        self.store.upsert(note.clone())?;
        Ok(AiOutcome::Applied { note })
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        self.flush_saves();
    }
}

/// Run one AI request against the open note. The workspace lock is only
/// taken to issue the ticket and to apply the result, never across the
/// service call.
pub async fn run_ai(
    workspace: &Mutex<Workspace>,
    ai: &dyn AiService,
    request: AiRequest,
) -> Result<AiOutcome, WorkspaceError> {
    let (ticket, body, titles) = {
        let ws = workspace.lock().unwrap_or_else(|p| p.into_inner());
        let ticket = ws.begin_ai(request.edit())?;
        let body = ws.active_note().map(|n| n.content.clone()).unwrap_or_default();
        let titles: Vec<String> = ws
            .notes()
            .iter()
            .filter(|n| n.id != ticket.note_id && !n.title.trim().is_empty())
            .map(|n| n.title.clone())
            .collect();
        (ticket, body, titles)
    };

    let text = match request {
        AiRequest::Research { query } => ai.research(&query).await?.to_markdown(),
        AiRequest::Enhance { instruction } => ai.enhance_text(&instruction, &body).await?,
        AiRequest::AutoConnect => ai.auto_connect(&body, &titles).await?,
        AiRequest::Image { data, mime_type } => ai.analyze_image(&data, &mime_type).await?,
        AiRequest::Audio { data, mime_type } => ai.transcribe_audio(&data, &mime_type).await?,
    };

    let mut ws = workspace.lock().unwrap_or_else(|p| p.into_inner());
    ws.apply_ai(&ticket, &text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::AiError;
    use crate::layout::LayoutEngine;
    use crate::models::ResearchResult;
    use crate::store::SledNoteStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn temp_store() -> Arc<SledNoteStore> {
        let db = sled::Config::new().temporary(true).open().unwrap();
        Arc::new(SledNoteStore::from_db(&db).unwrap())
    }

    fn workspace_on(store: Arc<dyn NoteStore>) -> Workspace {
        let driver = Arc::new(LayoutDriver::new(
            Arc::new(Mutex::new(LayoutEngine::default())),
            Duration::from_millis(16),
        ));
        Workspace::open(store, driver, Duration::from_millis(800)).unwrap()
    }

    fn workspace_with(store: Arc<SledNoteStore>) -> Workspace {
        workspace_on(store)
    }

    /// A sled store whose writes can be switched to fail as if the disk
    /// were full.
    struct FlakyStore {
        inner: SledNoteStore,
        fail_writes: AtomicBool,
    }

    impl FlakyStore {
        fn new() -> Arc<Self> {
            let db = sled::Config::new().temporary(true).open().unwrap();
            Arc::new(Self {
                inner: SledNoteStore::from_db(&db).unwrap(),
                fail_writes: AtomicBool::new(false),
            })
        }

        fn set_failing(&self, failing: bool) {
            self.fail_writes.store(failing, Ordering::SeqCst);
        }

        fn check(&self) -> Result<(), StoreError> {
            if self.fail_writes.load(Ordering::SeqCst) {
                Err(StoreError::Capacity {
                    reason: "disk full".into(),
                })
            } else {
                Ok(())
            }
        }
    }

    impl NoteStore for FlakyStore {
        fn list_all(&self) -> Result<Vec<Note>, StoreError> {
            self.inner.list_all()
        }
        fn get(&self, id: &str) -> Result<Note, StoreError> {
            self.inner.get(id)
        }
        fn upsert(&self, note: Note) -> Result<Vec<Note>, StoreError> {
            self.check()?;
            self.inner.upsert(note)
        }
        fn patch(&self, id: &str, patch: &NotePatch) -> Result<Note, StoreError> {
            self.check()?;
            self.inner.patch(id, patch)
        }
        fn delete(&self, id: &str) -> Result<Vec<Note>, StoreError> {
            self.check()?;
            self.inner.delete(id)
        }
    }

    fn edge_pairs(ws: &Workspace) -> HashSet<(String, String)> {
        ws.graph()
            .edges
            .iter()
            .map(|e| (e.source.clone(), e.target.clone()))
            .collect()
    }

    // ---- end to end ----

    #[tokio::test(start_paused = true)]
    async fn test_create_link_delete_scenario() {
        let mut ws = workspace_with(temp_store());
        let start = ws.notes().len();

        let a = ws.create_note("Alpha", "", &[]).unwrap();
        let b = ws.create_note("Beta", "", &[]).unwrap();
        assert_eq!(ws.notes().len(), start + 2);

        ws.edit_content(&b.id, "see [[alpha]]").unwrap();
        assert_eq!(edge_pairs(&ws), HashSet::from([(b.id.clone(), a.id.clone())]));
        assert_eq!(ws.layout_snapshot().edges.len(), 1);

        ws.delete_note(&a.id).unwrap();
        assert!(ws.graph().edges.is_empty());
        assert!(ws.graph().nodes.iter().all(|n| n.id != a.id));
        assert!(ws.layout_snapshot().nodes.iter().all(|n| n.id != a.id));
        assert_eq!(ws.layout_snapshot().nodes.len(), ws.notes().len());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rename_updates_edges() {
        let mut ws = workspace_with(temp_store());
        let a = ws.create_note("Alpha", "", &[]).unwrap();
        let b = ws.create_note("Beta", "[[Gamma]]", &[]).unwrap();
        assert!(edge_pairs(&ws).is_empty());

        ws.edit_title(&a.id, "Gamma").unwrap();
        assert_eq!(edge_pairs(&ws), HashSet::from([(b.id.clone(), a.id.clone())]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_layout_positions_survive_edits() {
        let mut ws = workspace_with(temp_store());
        let a = ws.create_note("Alpha", "", &[]).unwrap();
        ws.show_graph();
        tokio::time::sleep(Duration::from_millis(500)).await;

        let before = lock_layout(ws.driver().engine()).node(&a.id).cloned().unwrap();
        ws.create_note("Beta", "[[Alpha]]", &[]).unwrap();
        let after = lock_layout(ws.driver().engine()).node(&a.id).cloned().unwrap();
        assert_eq!((before.x, before.y), (after.x, after.y));
    }

    // ---- persistence ----

    #[tokio::test(start_paused = true)]
    async fn test_edits_are_debounced_and_flushed_on_navigation() {
        let store = temp_store();
        let mut ws = workspace_with(store.clone());
        let a = ws.create_note("Alpha", "", &[]).unwrap();

        ws.edit_content(&a.id, "one").unwrap();
        ws.edit_content(&a.id, "two").unwrap();
        assert_eq!(store.get(&a.id).unwrap().content, "");

        tokio::time::sleep(Duration::from_millis(900)).await;
        assert_eq!(store.get(&a.id).unwrap().content, "two");

        ws.edit_content(&a.id, "three").unwrap();
        ws.show_graph();
        assert_eq!(store.get(&a.id).unwrap().content, "three");
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_with_pending_edit_stays_deleted() {
        let store = temp_store();
        let mut ws = workspace_with(store.clone());
        let a = ws.create_note("Alpha", "", &[]).unwrap();
        ws.edit_content(&a.id, "unsaved").unwrap();

        ws.delete_note(&a.id).unwrap();
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(matches!(store.get(&a.id), Err(StoreError::NotFound { .. })));
        assert!(store.list_all().unwrap().iter().all(|n| n.id != a.id));
    }

    #[tokio::test(start_paused = true)]
    async fn test_save_in_flight_cannot_revive_deleted_note() {
        let store = temp_store();
        let mut ws = workspace_with(store.clone());
        let a = ws.create_note("Alpha", "", &[]).unwrap();
        let stale = ws.note(&a.id).cloned().unwrap();
        ws.delete_note(&a.id).unwrap();

        // A timer that had already taken the note before the delete
        ws.saves.schedule(stale);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(matches!(store.get(&a.id), Err(StoreError::NotFound { .. })));
        assert!(ws.take_save_error().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_delete_keeps_note_and_pending_edit() {
        let store = FlakyStore::new();
        let mut ws = workspace_on(store.clone());
        let a = ws.create_note("Alpha", "", &[]).unwrap();
        ws.edit_content(&a.id, "kept").unwrap();

        store.set_failing(true);
        assert!(matches!(
            ws.delete_note(&a.id),
            Err(WorkspaceError::Store(StoreError::Capacity { .. }))
        ));
        store.set_failing(false);
        assert!(ws.note(&a.id).is_some());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(store.get(&a.id).unwrap().content, "kept");
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_note_is_an_error() {
        let mut ws = workspace_with(temp_store());
        assert!(matches!(
            ws.edit_content("nope", "x"),
            Err(WorkspaceError::UnknownNote { .. })
        ));
        assert!(ws.open_note("nope").is_err());
    }

    // ---- navigation ----

    #[tokio::test(start_paused = true)]
    async fn test_follow_link_and_click_node() {
        let mut ws = workspace_with(temp_store());
        let a = ws.create_note("Alpha", "", &[]).unwrap();
        ws.create_note("Beta", "[[ALPHA]] [[Nowhere]]", &[]).unwrap();

        assert_eq!(ws.follow_link("alpha").unwrap().map(|n| n.id.clone()), Some(a.id.clone()));
        assert_eq!(ws.view(), View::Editor);
        assert!(ws.follow_link("Nowhere").unwrap().is_none());
        assert_eq!(ws.active_id(), Some(a.id.as_str()));

        ws.show_graph();
        let (x, y) = {
            let engine = lock_layout(ws.driver().engine());
            let n = engine.node(&a.id).unwrap();
            (n.x, n.y)
        };
        let alpha_before = lock_layout(ws.driver().engine()).alpha();
        let opened = ws.click_node(x, y).unwrap().map(|n| n.id.clone());
        assert!(opened.is_some());
        assert_eq!(ws.view(), View::Editor);
        assert_eq!(lock_layout(ws.driver().engine()).alpha(), alpha_before);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_active_note_returns_to_graph() {
        let mut ws = workspace_with(temp_store());
        let a = ws.create_note("Alpha", "", &[]).unwrap();
        assert_eq!(ws.active_id(), Some(a.id.as_str()));
        ws.delete_note(&a.id).unwrap();
        assert_eq!(ws.active_id(), None);
        assert_eq!(ws.view(), View::Graph);
    }

    #[tokio::test(start_paused = true)]
    async fn test_accept_suggestion_edits_body() {
        let mut ws = workspace_with(temp_store());
        ws.create_note("Space", "", &[]).unwrap();
        let b = ws.create_note("Log", "", &[]).unwrap();

        let (_, found) = ws.suggest(&b.id, "Check [[Sp", 10).unwrap();
        assert_eq!(found[0].title, "Space");
        let done = ws.accept_suggestion(&b.id, "Check [[Sp", 10, "Space").unwrap().unwrap();
        assert_eq!(done.body, "Check [[Space]]");
        assert_eq!(ws.note(&b.id).unwrap().content, "Check [[Space]]");
        assert_eq!(ws.graph().edges.len(), 1);
    }

    // ---- AI tickets ----

    #[tokio::test(start_paused = true)]
    async fn test_replace_is_discarded_when_body_changed() {
        let mut ws = workspace_with(temp_store());
        let a = ws.create_note("Alpha", "draft", &[]).unwrap();
        let ticket = ws.begin_ai(AiEdit::Replace).unwrap();
        ws.edit_content(&a.id, "draft, edited").unwrap();

        assert_eq!(ws.apply_ai(&ticket, "polished").unwrap(), AiOutcome::DiscardedStale);
        assert_eq!(ws.note(&a.id).unwrap().content, "draft, edited");
    }

    #[tokio::test(start_paused = true)]
    async fn test_append_lands_on_current_body() {
        let store = temp_store();
        let mut ws = workspace_with(store.clone());
        let a = ws.create_note("Alpha", "draft", &[]).unwrap();
        let ticket = ws.begin_ai(AiEdit::Append).unwrap();
        ws.edit_content(&a.id, "draft, edited").unwrap();
        ws.edit_title(&a.id, "Alpha 2").unwrap();

        let outcome = ws.apply_ai(&ticket, "Research notes").unwrap();
        let AiOutcome::Applied { note } = outcome else {
            panic!("expected applied outcome");
        };
        assert_eq!(note.content, "draft, edited\n\nResearch notes");
        assert_eq!(note.title, "Alpha 2");
        assert_eq!(store.get(&a.id).unwrap().title, "Alpha 2");
    }

    #[test]
    fn test_ai_outcome_wire_format() {
        let note = Note::new("Alpha", "body");
        let applied = serde_json::to_value(AiOutcome::Applied { note: note.clone() }).unwrap();
        assert_eq!(applied["status"], "applied");
        assert_eq!(applied["note"]["title"], "Alpha");
        let stale = serde_json::to_value(AiOutcome::DiscardedStale).unwrap();
        assert_eq!(stale, serde_json::json!({ "status": "discarded_stale" }));
        assert_ne!(AiOutcome::Applied { note }, AiOutcome::DiscardedInactive);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ai_result_keeps_title_whose_save_failed() {
        let store = FlakyStore::new();
        let mut ws = workspace_on(store.clone());
        let a = ws.create_note("Alpha", "draft", &[]).unwrap();
        let ticket = ws.begin_ai(AiEdit::Append).unwrap();
        ws.edit_title(&a.id, "Renamed").unwrap();

        store.set_failing(true);
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(matches!(ws.take_save_error(), Some(StoreError::Capacity { .. })));
        assert_eq!(store.get(&a.id).unwrap().title, "Alpha");
        store.set_failing(false);

        let AiOutcome::Applied { note } = ws.apply_ai(&ticket, "Findings").unwrap() else {
            panic!("expected applied outcome");
        };
        assert_eq!(note.title, "Renamed");
        assert_eq!(ws.note(&a.id).unwrap().title, "Renamed");
        let stored = store.get(&a.id).unwrap();
        assert_eq!(stored.title, "Renamed");
        assert_eq!(stored.content, "draft\n\nFindings");
    }

    #[tokio::test(start_paused = true)]
    async fn test_ai_result_stays_in_memory_when_store_is_full() {
        let store = FlakyStore::new();
        let mut ws = workspace_on(store.clone());
        let a = ws.create_note("Alpha", "draft", &[]).unwrap();
        let ticket = ws.begin_ai(AiEdit::Append).unwrap();

        store.set_failing(true);
        assert!(matches!(
            ws.apply_ai(&ticket, "Findings"),
            Err(WorkspaceError::Store(StoreError::Capacity { .. }))
        ));
        assert_eq!(ws.note(&a.id).unwrap().content, "draft\n\nFindings");
        assert_eq!(store.get(&a.id).unwrap().content, "draft");
    }

    #[tokio::test(start_paused = true)]
    async fn test_response_for_inactive_note_is_discarded() {
        let mut ws = workspace_with(temp_store());
        let a = ws.create_note("Alpha", "body", &[]).unwrap();
        let ticket = ws.begin_ai(AiEdit::Append).unwrap();
        ws.create_note("Beta", "", &[]).unwrap();

        assert_eq!(ws.apply_ai(&ticket, "late").unwrap(), AiOutcome::DiscardedInactive);
        assert_eq!(ws.note(&a.id).unwrap().content, "body");
    }

    struct CannedAi;

    #[async_trait]
    impl AiService for CannedAi {
        async fn research(&self, query: &str) -> Result<ResearchResult, AiError> {
            Ok(ResearchResult {
                text: format!("About {}", query),
                sources: Vec::new(),
            })
        }
        async fn analyze_image(&self, _: &[u8], _: &str) -> Result<String, AiError> {
            Err(AiError::EmptyResponse)
        }
        async fn transcribe_audio(&self, _: &[u8], _: &str) -> Result<String, AiError> {
            Ok("spoken words".to_string())
        }
        async fn enhance_text(&self, _: &str, context: &str) -> Result<String, AiError> {
            Ok(context.to_uppercase())
        }
        async fn auto_connect(&self, body: &str, _: &[String]) -> Result<String, AiError> {
            Ok(body.replace("Alpha", "[[Alpha]]"))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_ai_round_trip() {
        let ws = Mutex::new(workspace_with(temp_store()));
        let b = {
            let mut guard = ws.lock().unwrap();
            guard.create_note("Alpha", "", &[]).unwrap();
            guard.create_note("Beta", "mentions Alpha", &[]).unwrap()
        };

        let outcome = run_ai(&ws, &CannedAi, AiRequest::AutoConnect).await.unwrap();
        assert!(matches!(outcome, AiOutcome::Applied { .. }));
        {
            let guard = ws.lock().unwrap();
            assert_eq!(guard.note(&b.id).unwrap().content, "mentions [[Alpha]]");
            assert_eq!(guard.graph().edges.len(), 1);
        }

        let err = run_ai(
            &ws,
            &CannedAi,
            AiRequest::Image {
                data: vec![1],
                mime_type: "image/png".into(),
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, WorkspaceError::Ai(AiError::EmptyResponse)));
        assert_eq!(ws.lock().unwrap().note(&b.id).unwrap().content, "mentions [[Alpha]]");
    }

    #[tokio::test(start_paused = true)]
    async fn test_ai_without_open_note() {
        let ws = Mutex::new(workspace_with(temp_store()));
        let err = run_ai(&ws, &CannedAi, AiRequest::Research { query: "x".into() })
            .await
            .unwrap_err();
        assert!(matches!(err, WorkspaceError::NoActiveNote));
    }
}
