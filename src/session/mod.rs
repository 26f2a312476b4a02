//! Dialogue session state.
//!
//! - `model`: participants, scenario, turns, checkpoints
//! - `history`: append/edit/pop and the read cursor
//! - `handle`: shared access with a per-session writer gate
//! - `store`: versioned JSON snapshots on disk

mod handle;
mod history;
mod model;
mod store;

pub use handle::SessionHandle;
pub use history::Direction;
pub use model::{
    DialogueSession, Participant, ParticipantEdit, ScenarioState, ScenarioUpdate, SummaryCheckpoint, Turn,
    GENERATION_FAILED_PREFIX, NARRATOR_ID,
};
pub use store::{SessionSnapshot, SessionStore, SessionSummary, SNAPSHOT_VERSION};
