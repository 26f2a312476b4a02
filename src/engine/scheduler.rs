//! Speaker selection.
//!
//! Round-robin with exclusion of the previous speaker; the narrator opens the
//! story and hands over to the first character. An optional model-assisted
//! pick can override it when the model names exactly one roster member.

use crate::session::DialogueSession;
use crate::{ColloquyError, Result};
use regex::Regex;
use std::collections::BTreeSet;
use std::sync::LazyLock;

/// Turns shown to the model when it is asked to pick the next speaker
const ASSISTED_RECENT_TURNS: usize = 3;
const ASSISTED_DESCRIPTION_CHARS: usize = 50;

static ID_TOKENS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[A-Za-z0-9_\-]+").unwrap());

#[derive(Debug, Clone, Copy, Default)]
pub struct TurnScheduler;

impl TurnScheduler {
    pub fn new() -> Self {
        Self
    }

    /// Pick the next speaker deterministically
    pub fn decide_speaker(&self, session: &DialogueSession) -> Result<String> {
        let narrator = session.narrator().map(|p| p.id.as_str());
        let first_character = || session.characters().next().map(|p| p.id.as_str());

        let choice = match session.last_turn().map(|t| t.speaker_id.as_str()) {
            None => narrator.or_else(first_character),
            Some(last) if Some(last) == narrator => first_character().or(narrator),
            Some(last) => session
                .characters()
                .find(|p| p.id != last)
                .map(|p| p.id.as_str())
                .or(narrator),
        };

        choice
            .map(str::to_string)
            .ok_or(ColloquyError::NoParticipantsAvailable)
    }

    /// Prompt asking the model who should talk next
    pub fn assisted_prompt(&self, session: &DialogueSession) -> String {
        let turns = session.turns();
        let recent = &turns[turns.len().saturating_sub(ASSISTED_RECENT_TURNS)..];
        let context = recent
            .iter()
            .map(|t| format!("{}: {}", session.speaker_name(&t.speaker_id), t.content))
            .collect::<Vec<_>>()
            .join("\n");

        let characters = session
            .characters()
            .map(|c| {
                let short: String = c.description.chars().take(ASSISTED_DESCRIPTION_CHARS).collect();
                format!("- {}: {} ({}...)", c.id, c.display_name, short)
            })
            .collect::<Vec<_>>()
            .join("\n");

        format!(
            r#"Given this conversation context:
{context}

Available characters:
{characters}

Scenario: {scenario}

Who should respond next? Reply with ONLY the character ID (e.g., char1, char2, narrator).
Consider the flow of conversation and who would naturally speak next."#,
            scenario = session.scenario().description,
        )
    }

    /// Accept the model's pick only if it names exactly one roster id
    pub fn pick_from_reply(&self, reply: &str, session: &DialogueSession) -> Option<String> {
        let named: BTreeSet<&str> = ID_TOKENS
            .find_iter(reply)
            .filter_map(|token| {
                session
                    .participants()
                    .iter()
                    .find(|p| p.id.eq_ignore_ascii_case(token.as_str()))
                    .map(|p| p.id.as_str())
            })
            .collect();

        if named.len() == 1 {
            named.into_iter().next().map(str::to_string)
        } else {
            None
        }
    }
}
