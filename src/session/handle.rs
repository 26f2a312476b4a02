//! Shared, serialized access to one live session.

use super::model::{DialogueSession, ParticipantEdit, ScenarioUpdate};
use super::history::Direction;
use crate::Result;
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Cloneable handle to a session.
///
/// Readers take the state lock briefly. Writers first take the writer gate,
/// which stays held across backend calls so that at most one mutation per
/// session is in flight, while the state lock itself is only held for the
/// in-memory commit.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    state: Arc<RwLock<DialogueSession>>,
    writer: Arc<Mutex<()>>,
}

impl SessionHandle {
    pub fn new(session: DialogueSession) -> Self {
        Self {
            state: Arc::new(RwLock::new(session)),
            writer: Arc::new(Mutex::new(())),
        }
    }

    /// Owned copy of the current state
    pub async fn snapshot(&self) -> DialogueSession {
        self.state.read().await.clone()
    }

    pub async fn read(&self) -> RwLockReadGuard<'_, DialogueSession> {
        self.state.read().await
    }

    pub async fn id(&self) -> String {
        self.state.read().await.id.clone()
    }

    pub(crate) async fn lock_writer(&self) -> MutexGuard<'_, ()> {
        self.writer.lock().await
    }

    /// State write lock; callers must already hold the writer gate
    pub(crate) async fn write(&self) -> RwLockWriteGuard<'_, DialogueSession> {
        self.state.write().await
    }

    /// Run a mutation under the writer gate
    pub async fn mutate<R>(&self, f: impl FnOnce(&mut DialogueSession) -> R) -> R {
        let _gate = self.writer.lock().await;
        let mut session = self.state.write().await;
        f(&mut session)
    }

    pub async fn edit_turn(&self, index: usize, content: String, reaction: Option<String>) -> Result<()> {
        self.mutate(|s| s.edit(index, content, reaction)).await
    }

    pub async fn navigate(&self, direction: Direction) -> Option<usize> {
        self.mutate(|s| s.navigate(direction)).await
    }

    pub async fn update_scenario(&self, update: ScenarioUpdate) {
        self.mutate(|s| s.update_scenario(update)).await
    }

    pub async fn edit_participant(&self, id: &str, edit: ParticipantEdit) -> Result<()> {
        self.mutate(|s| s.edit_participant(id, edit)).await
    }
}
