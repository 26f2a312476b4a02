//! Session data: participants, scenario, turns and summary checkpoints.

use crate::{ColloquyError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Stable id of the narrator every session carries
pub const NARRATOR_ID: &str = "narrator";

/// Content prefix marking a turn whose generation failed
pub const GENERATION_FAILED_PREFIX: &str = "[Generation failed:";

const SESSION_NAME_SCENARIO_CHARS: usize = 50;

// ─── Participants ───────────────────────────────────────────────────

/// A speaker in the dialogue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub id: String,
    pub display_name: String,
    pub description: String,
    #[serde(default)]
    pub personality: String,
    #[serde(default)]
    pub speech_patterns: String,
    #[serde(default)]
    pub motivations: String,
    #[serde(default)]
    pub is_narrator: bool,
}

impl Participant {
    pub fn new(
        id: impl Into<String>,
        display_name: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            description: description.into(),
            personality: String::new(),
            speech_patterns: String::new(),
            motivations: String::new(),
            is_narrator: false,
        }
    }

    /// The omniscient narrator
    pub fn narrator() -> Self {
        Self {
            personality: "Objective, descriptive, engaging storyteller".to_string(),
            is_narrator: true,
            ..Self::new(
                NARRATOR_ID,
                "Narrator",
                "The omniscient narrator who describes the world and guides the story",
            )
        }
    }

    pub fn with_personality(mut self, personality: impl Into<String>) -> Self {
        self.personality = personality.into();
        self
    }

    pub fn with_speech_patterns(mut self, speech_patterns: impl Into<String>) -> Self {
        self.speech_patterns = speech_patterns.into();
        self
    }

    pub fn with_motivations(mut self, motivations: impl Into<String>) -> Self {
        self.motivations = motivations.into();
        self
    }

    fn apply(&mut self, edit: ParticipantEdit) {
        if let Some(description) = edit.description {
            self.description = description;
        }
        if let Some(personality) = edit.personality {
            self.personality = personality;
        }
        if let Some(speech_patterns) = edit.speech_patterns {
            self.speech_patterns = speech_patterns;
        }
        if let Some(motivations) = edit.motivations {
            self.motivations = motivations;
        }
    }
}

/// Changes to a participant's descriptive fields; `None` leaves a field alone
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParticipantEdit {
    pub description: Option<String>,
    pub personality: Option<String>,
    pub speech_patterns: Option<String>,
    pub motivations: Option<String>,
}

// ─── Scenario ───────────────────────────────────────────────────────

/// Free-text world state read into every prompt
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScenarioState {
    pub description: String,
    #[serde(default)]
    pub current_state: String,
    #[serde(default)]
    pub what_happens_next: String,
    #[serde(default)]
    pub never_forget: String,
}

impl ScenarioState {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            ..Self::default()
        }
    }

    pub fn apply(&mut self, update: ScenarioUpdate) {
        if let Some(description) = update.description {
            self.description = description;
        }
        if let Some(current_state) = update.current_state {
            self.current_state = current_state;
        }
        if let Some(what_happens_next) = update.what_happens_next {
            self.what_happens_next = what_happens_next;
        }
        if let Some(never_forget) = update.never_forget {
            self.never_forget = never_forget;
        }
    }
}

/// Partial scenario update; `None` leaves a field alone
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScenarioUpdate {
    pub description: Option<String>,
    pub current_state: Option<String>,
    pub what_happens_next: Option<String>,
    pub never_forget: Option<String>,
}

// ─── Turns & checkpoints ────────────────────────────────────────────

/// One committed, speaker-attributed message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub sequence_index: usize,
    pub speaker_id: String,
    pub content: String,
    #[serde(default)]
    pub reaction: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Turn {
    /// Render as `Name: [reaction] "content"`
    pub fn render_line(&self, speaker_name: &str) -> String {
        match &self.reaction {
            Some(reaction) => format!("{}: [{}] \"{}\"", speaker_name, reaction, self.content),
            None => format!("{}: \"{}\"", speaker_name, self.content),
        }
    }

    /// Whether this turn is the placeholder left by a failed generation
    pub fn is_generation_failure(&self) -> bool {
        self.content.starts_with(GENERATION_FAILED_PREFIX)
    }
}

/// Summary of the turn range `[range_start, range_end)`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryCheckpoint {
    pub range_start: usize,
    pub range_end: usize,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

// ─── Session ────────────────────────────────────────────────────────

/// A dialogue session: roster, scenario, turn log, checkpoints and cursor.
///
/// The cursor is not serialized; deserializing re-derives it as the last
/// turn index and rejects snapshots whose invariants do not hold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "SessionRecord")]
pub struct DialogueSession {
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub(crate) scenario: ScenarioState,
    pub(crate) participants: Vec<Participant>,
    pub(crate) turns: Vec<Turn>,
    pub(crate) checkpoints: Vec<SummaryCheckpoint>,
    #[serde(skip)]
    pub(crate) cursor: Option<usize>,
}

/// Serialized shape of a session
#[derive(Deserialize)]
pub(crate) struct SessionRecord {
    id: String,
    name: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    scenario: ScenarioState,
    participants: Vec<Participant>,
    #[serde(default)]
    turns: Vec<Turn>,
    #[serde(default)]
    checkpoints: Vec<SummaryCheckpoint>,
}

impl TryFrom<SessionRecord> for DialogueSession {
    type Error = ColloquyError;

    fn try_from(record: SessionRecord) -> Result<Self> {
        let cursor = record.turns.len().checked_sub(1);
        let session = Self {
            id: record.id,
            name: record.name,
            created_at: record.created_at,
            updated_at: record.updated_at,
            scenario: record.scenario,
            participants: record.participants,
            turns: record.turns,
            checkpoints: record.checkpoints,
            cursor,
        };
        session.validate()?;
        Ok(session)
    }
}

impl DialogueSession {
    /// Create an empty session holding only the narrator
    pub fn new(scenario_description: impl Into<String>) -> Self {
        let now = Utc::now();
        let scenario = ScenarioState::new(scenario_description);
        let name = format!(
            "Story: {}",
            scenario
                .description
                .chars()
                .take(SESSION_NAME_SCENARIO_CHARS)
                .collect::<String>()
        );

        Self {
            id: format!("conv_{}", now.format("%Y%m%d_%H%M%S")),
            name,
            created_at: now,
            updated_at: now,
            scenario,
            participants: vec![Participant::narrator()],
            turns: Vec::new(),
            checkpoints: Vec::new(),
            cursor: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Add a character by name, assigning the next free `char<N>` id
    pub fn with_character(mut self, name: &str, description: &str) -> Self {
        self.add_character(name, description);
        self
    }

    pub(crate) fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    // ── Roster ──────────────────────────────────────────────────

    pub fn participants(&self) -> &[Participant] {
        &self.participants
    }

    pub fn participant(&self, id: &str) -> Option<&Participant> {
        self.participants.iter().find(|p| p.id == id)
    }

    pub fn require_participant(&self, id: &str) -> Result<&Participant> {
        self.participant(id)
            .ok_or_else(|| ColloquyError::ParticipantNotFound(id.to_string()))
    }

    pub fn narrator(&self) -> Option<&Participant> {
        self.participants.iter().find(|p| p.is_narrator)
    }

    /// Non-narrator participants in roster order
    pub fn characters(&self) -> impl Iterator<Item = &Participant> {
        self.participants.iter().filter(|p| !p.is_narrator)
    }

    /// Display name for a speaker id, falling back to the id itself
    pub fn speaker_name<'a>(&'a self, id: &'a str) -> &'a str {
        self.participant(id)
            .map(|p| p.display_name.as_str())
            .unwrap_or(id)
    }

    fn next_character_id(&self) -> String {
        let mut n = self.participants.len();
        loop {
            let id = format!("char{n}");
            if self.participant(&id).is_none() {
                return id;
            }
            n += 1;
        }
    }

    /// Add a non-narrator participant and return it
    pub fn add_character(&mut self, name: &str, description: &str) -> &Participant {
        let participant = Participant::new(self.next_character_id(), name.trim(), description.trim());
        self.participants.push(participant);
        self.touch();
        &self.participants[self.participants.len() - 1]
    }

    /// Insert a fully specified participant; ids must stay unique
    pub fn insert_participant(&mut self, participant: Participant) -> Result<()> {
        if self.participant(&participant.id).is_some() {
            return Err(ColloquyError::DuplicateParticipant(participant.id));
        }
        if participant.is_narrator && self.narrator().is_some() {
            return Err(ColloquyError::DuplicateParticipant(participant.id));
        }
        self.participants.push(participant);
        self.touch();
        Ok(())
    }

    pub fn edit_participant(&mut self, id: &str, edit: ParticipantEdit) -> Result<()> {
        let participant = self
            .participants
            .iter_mut()
            .find(|p| p.id == id)
            .ok_or_else(|| ColloquyError::ParticipantNotFound(id.to_string()))?;
        participant.apply(edit);
        self.touch();
        Ok(())
    }

    // ── Scenario ────────────────────────────────────────────────

    pub fn scenario(&self) -> &ScenarioState {
        &self.scenario
    }

    pub fn update_scenario(&mut self, update: ScenarioUpdate) {
        self.scenario.apply(update);
        self.touch();
    }

    // ── Log views ───────────────────────────────────────────────

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn last_turn(&self) -> Option<&Turn> {
        self.turns.last()
    }

    pub fn checkpoints(&self) -> &[SummaryCheckpoint] {
        &self.checkpoints
    }

    pub fn latest_checkpoint(&self) -> Option<&SummaryCheckpoint> {
        self.checkpoints.last()
    }

    /// End of the range already covered by checkpoints
    pub fn covered_end(&self) -> usize {
        self.checkpoints.last().map(|c| c.range_end).unwrap_or(0)
    }

    /// Append a checkpoint, enforcing contiguity with the previous one
    pub(crate) fn push_checkpoint(&mut self, checkpoint: SummaryCheckpoint) -> Result<()> {
        let expected_start = self.covered_end();
        if checkpoint.range_start != expected_start {
            return Err(ColloquyError::StateInvariant(format!(
                "checkpoint starts at {} but previous coverage ends at {}",
                checkpoint.range_start, expected_start
            )));
        }
        if checkpoint.range_end <= checkpoint.range_start || checkpoint.range_end > self.turns.len() {
            return Err(ColloquyError::StateInvariant(format!(
                "checkpoint range [{}, {}) is empty or beyond {} turns",
                checkpoint.range_start,
                checkpoint.range_end,
                self.turns.len()
            )));
        }
        self.checkpoints.push(checkpoint);
        self.touch();
        Ok(())
    }

    /// Check every structural invariant of the session
    pub fn validate(&self) -> Result<()> {
        let narrators = self.participants.iter().filter(|p| p.is_narrator).count();
        if narrators != 1 {
            return Err(ColloquyError::StateInvariant(format!(
                "expected exactly one narrator, found {narrators}"
            )));
        }

        for (i, p) in self.participants.iter().enumerate() {
            if self.participants[..i].iter().any(|q| q.id == p.id) {
                return Err(ColloquyError::StateInvariant(format!(
                    "duplicate participant id {}",
                    p.id
                )));
            }
        }

        for (i, turn) in self.turns.iter().enumerate() {
            if turn.sequence_index != i {
                return Err(ColloquyError::StateInvariant(format!(
                    "turn at position {i} has sequence index {}",
                    turn.sequence_index
                )));
            }
        }

        let mut expected_start = 0;
        for checkpoint in &self.checkpoints {
            if checkpoint.range_start != expected_start || checkpoint.range_end <= checkpoint.range_start {
                return Err(ColloquyError::StateInvariant(format!(
                    "checkpoint [{}, {}) is not contiguous with coverage ending at {}",
                    checkpoint.range_start, checkpoint.range_end, expected_start
                )));
            }
            if checkpoint.range_end > self.turns.len() {
                return Err(ColloquyError::StateInvariant(format!(
                    "checkpoint [{}, {}) reaches past {} turns",
                    checkpoint.range_start,
                    checkpoint.range_end,
                    self.turns.len()
                )));
            }
            expected_start = checkpoint.range_end;
        }

        match self.cursor {
            None if !self.turns.is_empty() => Err(ColloquyError::StateInvariant(
                "cursor unset on a non-empty history".to_string(),
            )),
            Some(c) if c >= self.turns.len() => Err(ColloquyError::StateInvariant(format!(
                "cursor {c} beyond {} turns",
                self.turns.len()
            ))),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_character_session() -> DialogueSession {
        DialogueSession::new("A rainy night at a roadside inn")
            .with_character("Mara", "A weary courier")
            .with_character("Tobin", "The innkeeper")
    }

    #[test]
    fn test_new_session_has_narrator_only() {
        let session = DialogueSession::new("A quiet harbor");
        assert_eq!(session.participants().len(), 1);
        assert!(session.narrator().is_some());
        assert_eq!(session.cursor, None);
        assert!(session.name.starts_with("Story: A quiet harbor"));
        assert!(session.id.starts_with("conv_"));
        assert!(session.validate().is_ok());
    }

    #[test]
    fn test_character_ids_follow_roster_position() {
        let session = two_character_session();
        let ids: Vec<&str> = session.participants().iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["narrator", "char1", "char2"]);
    }

    #[test]
    fn test_character_ids_skip_taken() {
        let mut session = DialogueSession::new("x");
        session
            .insert_participant(Participant::new("char1", "Squatter", "Took the id first"))
            .unwrap();
        let added = session.add_character("Late", "Arrives second").id.clone();
        assert_eq!(added, "char2");
    }

    #[test]
    fn test_insert_duplicate_rejected() {
        let mut session = two_character_session();
        let result = session.insert_participant(Participant::new("char1", "Clone", ""));
        assert!(matches!(result, Err(ColloquyError::DuplicateParticipant(_))));
        assert!(session.insert_participant(Participant::narrator()).is_err());
    }

    #[test]
    fn test_edit_participant_traits() {
        let mut session = two_character_session();
        session
            .edit_participant(
                "char1",
                ParticipantEdit {
                    personality: Some("Guarded".to_string()),
                    ..Default::default()
                },
            )
            .unwrap();
        let mara = session.participant("char1").unwrap();
        assert_eq!(mara.personality, "Guarded");
        assert_eq!(mara.description, "A weary courier");

        assert!(session
            .edit_participant("ghost", ParticipantEdit::default())
            .is_err());
    }

    #[test]
    fn test_update_scenario_keeps_unset_fields() {
        let mut session = two_character_session();
        session.update_scenario(ScenarioUpdate {
            never_forget: Some("Mara owes Tobin money".to_string()),
            ..Default::default()
        });
        session.update_scenario(ScenarioUpdate {
            what_happens_next: Some("A stranger knocks".to_string()),
            ..Default::default()
        });
        assert_eq!(session.scenario().description, "A rainy night at a roadside inn");
        assert_eq!(session.scenario().never_forget, "Mara owes Tobin money");
        assert_eq!(session.scenario().what_happens_next, "A stranger knocks");
    }

    #[test]
    fn test_render_line() {
        let turn = Turn {
            sequence_index: 0,
            speaker_id: "char1".to_string(),
            content: "Evening.".to_string(),
            reaction: Some("nods".to_string()),
            created_at: Utc::now(),
        };
        assert_eq!(turn.render_line("Mara"), "Mara: [nods] \"Evening.\"");

        let plain = Turn { reaction: None, ..turn };
        assert_eq!(plain.render_line("Mara"), "Mara: \"Evening.\"");
    }

    #[test]
    fn test_deserialize_rejects_index_gap() {
        let mut session = two_character_session();
        session.append("narrator", "Rain falls.".to_string(), None).unwrap();
        session.append("char1", "Evening.".to_string(), None).unwrap();
        session.turns[1].sequence_index = 5;

        let json = serde_json::to_string(&session).unwrap();
        assert!(serde_json::from_str::<DialogueSession>(&json).is_err());
    }

    #[test]
    fn test_push_checkpoint_enforces_contiguity() {
        let mut session = two_character_session();
        for i in 0..4 {
            session.append("narrator", format!("beat {i}"), None).unwrap();
        }
        let gap = SummaryCheckpoint {
            range_start: 1,
            range_end: 4,
            text: "skipped the first turn".to_string(),
            created_at: Utc::now(),
        };
        assert!(matches!(
            session.push_checkpoint(gap),
            Err(ColloquyError::StateInvariant(_))
        ));
        assert!(session.checkpoints().is_empty());

        let ok = SummaryCheckpoint {
            range_start: 0,
            range_end: 4,
            text: "four beats".to_string(),
            created_at: Utc::now(),
        };
        session.push_checkpoint(ok).unwrap();
        assert_eq!(session.covered_end(), 4);
    }

    #[test]
    fn test_validate_rejects_checkpoint_past_log() {
        let mut session = two_character_session();
        for i in 0..3 {
            session.append("narrator", format!("beat {i}"), None).unwrap();
        }
        session.checkpoints.push(SummaryCheckpoint {
            range_start: 0,
            range_end: 50,
            text: "more than happened".to_string(),
            created_at: Utc::now(),
        });
        assert!(matches!(session.validate(), Err(ColloquyError::StateInvariant(_))));
    }

    #[test]
    fn test_pop_drops_checkpoint_covering_popped_turn() {
        let mut session = two_character_session();
        for i in 0..4 {
            session.append("narrator", format!("beat {i}"), None).unwrap();
        }
        session
            .push_checkpoint(SummaryCheckpoint {
                range_start: 0,
                range_end: 2,
                text: "two beats".to_string(),
                created_at: Utc::now(),
            })
            .unwrap();
        session
            .push_checkpoint(SummaryCheckpoint {
                range_start: 2,
                range_end: 4,
                text: "two more".to_string(),
                created_at: Utc::now(),
            })
            .unwrap();

        session.pop_last().unwrap();
        assert_eq!(session.checkpoints().len(), 1);
        assert_eq!(session.covered_end(), 2);
        assert!(session.validate().is_ok());
    }
}
