//! Durable note storage.
//!
//! Notes live in their own sled tree as JSON records keyed by note id.
//! Listing always returns the most recently updated note first.

use crate::errors::StoreError;
use crate::models::{Note, NotePatch};
use crate::notes::welcome_note;
use chrono::Utc;
use std::path::Path;

const NOTES_TREE: &str = "notes";

pub trait NoteStore: Send + Sync {
    /// Every note, most recently updated first.
    fn list_all(&self) -> Result<Vec<Note>, StoreError>;

    fn get(&self, id: &str) -> Result<Note, StoreError>;

    /// Insert or replace `note`, bumping `updated_at`. Returns the refreshed list.
    fn upsert(&self, note: Note) -> Result<Vec<Note>, StoreError>;

    /// Write only the fields present in `patch`. Returns the refreshed note.
    fn patch(&self, id: &str, patch: &NotePatch) -> Result<Note, StoreError>;

    /// Remove `id` if present. Returns the refreshed list.
    fn delete(&self, id: &str) -> Result<Vec<Note>, StoreError>;

    /// The whole collection as a pretty-printed JSON array.
    fn export_json(&self) -> Result<String, StoreError> {
        Ok(serde_json::to_string_pretty(&self.list_all()?)?)
    }
}

pub fn sort_notes(notes: &mut [Note]) {
    notes.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then_with(|| a.id.cmp(&b.id)));
}

// ============================================================================
// Sled implementation
// ============================================================================

#[derive(Clone)]
pub struct SledNoteStore {
    tree: sled::Tree,
}

impl SledNoteStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let db = sled::open(path)?;
        Self::from_db(&db)
    }

    /// Use the notes tree of an already open database. Seeds the welcome note
    /// when the tree is empty and resets it when a record cannot be decoded.
    pub fn from_db(db: &sled::Db) -> Result<Self, StoreError> {
        let store = Self {
            tree: db.open_tree(NOTES_TREE)?,
        };
        if store.tree.is_empty() {
            tracing::info!("note store is empty, creating welcome note");
            store.reset()?;
        } else {
            store.list_all()?;
        }
        Ok(store)
    }

    fn reset(&self) -> Result<Vec<Note>, StoreError> {
        self.tree.clear()?;
        let note = welcome_note();
        self.write(&note)?;
        Ok(vec![note])
    }

    fn write(&self, note: &Note) -> Result<(), StoreError> {
        let json = serde_json::to_vec(note)?;
        self.tree.insert(note.id.as_bytes(), json)?;
        self.tree.flush()?;
        Ok(())
    }

    fn decode_all(&self) -> Result<Result<Vec<Note>, String>, StoreError> {
        let mut notes = Vec::with_capacity(self.tree.len());
        for entry in self.tree.iter() {
            let (key, value) = entry?;
            match serde_json::from_slice::<Note>(&value) {
                Ok(note) if note.id.as_bytes() == key.as_ref() => notes.push(note),
                Ok(note) => {
                    return Ok(Err(format!("record key does not match note id {}", note.id)))
                }
                Err(e) => return Ok(Err(e.to_string())),
            }
        }
        Ok(Ok(notes))
    }
}

impl NoteStore for SledNoteStore {
    fn list_all(&self) -> Result<Vec<Note>, StoreError> {
        let mut notes = match self.decode_all()? {
            Ok(notes) => notes,
            Err(reason) => {
                tracing::warn!(%reason, "corrupted note record, resetting store to the welcome note");
                return self.reset();
            }
        };
        sort_notes(&mut notes);
        Ok(notes)
    }

    fn get(&self, id: &str) -> Result<Note, StoreError> {
        let data = self
            .tree
            .get(id.as_bytes())?
            .ok_or_else(|| StoreError::NotFound { id: id.to_string() })?;
        Ok(serde_json::from_slice(&data)?)
    }

    fn upsert(&self, mut note: Note) -> Result<Vec<Note>, StoreError> {
        note.updated_at = Utc::now();
        self.write(&note)?;
        self.list_all()
    }

    fn patch(&self, id: &str, patch: &NotePatch) -> Result<Note, StoreError> {
        let mut note = self.get(id)?;
        if patch.apply(&mut note) {
            note.updated_at = Utc::now();
            self.write(&note)?;
        }
        Ok(note)
    }

    fn delete(&self, id: &str) -> Result<Vec<Note>, StoreError> {
        if self.tree.remove(id.as_bytes())?.is_some() {
            self.tree.flush()?;
        }
        self.list_all()
    }
}
