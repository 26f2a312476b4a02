//! Turn log operations and the read cursor.
//!
//! The log is append-only except for `pop_last` and in-place `edit` or
//! regenerate. Sequence indices always equal list positions.

use super::model::{DialogueSession, Turn};
use crate::{ColloquyError, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Cursor movement direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Back,
    Forward,
}

impl FromStr for Direction {
    type Err = ColloquyError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "back" | "prev" | "previous" => Ok(Self::Back),
            "forward" | "next" => Ok(Self::Forward),
            other => Err(ColloquyError::InvalidInput(format!("unknown direction: {other}"))),
        }
    }
}

impl DialogueSession {
    /// Append a turn for a roster member; returns its sequence index.
    /// The cursor moves to the new turn.
    pub fn append(
        &mut self,
        speaker_id: &str,
        content: String,
        reaction: Option<String>,
    ) -> Result<usize> {
        self.require_participant(speaker_id)?;

        let index = self.turns.len();
        self.turns.push(Turn {
            sequence_index: index,
            speaker_id: speaker_id.to_string(),
            content,
            reaction,
            created_at: Utc::now(),
        });
        self.cursor = Some(index);
        self.touch();
        Ok(index)
    }

    /// Replace a turn's content, and its reaction only when one is given
    pub fn edit(&mut self, index: usize, content: String, reaction: Option<String>) -> Result<()> {
        let len = self.turns.len();
        let turn = self
            .turns
            .get_mut(index)
            .ok_or(ColloquyError::IndexOutOfRange { index, len })?;

        turn.content = content;
        if reaction.is_some() {
            turn.reaction = reaction;
        }
        self.touch();
        Ok(())
    }

    /// Move the cursor one step, clamped to the log bounds
    pub fn navigate(&mut self, direction: Direction) -> Option<usize> {
        if let Some(cursor) = self.cursor {
            self.cursor = Some(match direction {
                Direction::Back => cursor.saturating_sub(1),
                Direction::Forward => (cursor + 1).min(self.turns.len().saturating_sub(1)),
            });
        }
        self.cursor
    }

    /// Remove and return the last turn. Checkpoints that covered it are
    /// dropped, so coverage never reaches past the log.
    pub fn pop_last(&mut self) -> Result<Turn> {
        let turn = self.turns.pop().ok_or(ColloquyError::EmptyHistory)?;
        let len = self.turns.len();
        self.cursor = match self.cursor {
            _ if len == 0 => None,
            Some(c) if c >= len => Some(len - 1),
            other => other,
        };
        self.checkpoints.retain(|c| c.range_end <= len);
        self.touch();
        Ok(turn)
    }

    /// Overwrite the last turn with a fresh reply from the same speaker.
    /// The index and speaker stay; the cursor moves to the turn.
    pub(crate) fn replace_last(
        &mut self,
        index: usize,
        speaker_id: &str,
        content: String,
        reaction: Option<String>,
    ) -> Result<Turn> {
        let len = self.turns.len();
        let turn = match self.turns.last_mut() {
            Some(turn) if turn.sequence_index == index && turn.speaker_id == speaker_id => turn,
            _ => {
                return Err(ColloquyError::StateInvariant(format!(
                    "turn {index} by {speaker_id} is no longer last in a log of {len} turns"
                )))
            }
        };

        turn.content = content;
        turn.reaction = reaction;
        turn.created_at = Utc::now();
        let turn = turn.clone();
        self.cursor = Some(index);
        self.touch();
        Ok(turn)
    }

    /// Turn under the cursor
    pub fn current(&self) -> Option<&Turn> {
        self.cursor.and_then(|c| self.turns.get(c))
    }

    pub fn cursor(&self) -> Option<usize> {
        self.cursor
    }
}
