//! Prompt construction for a single turn.

use crate::session::{DialogueSession, Participant, ScenarioState};

const NARRATOR_INSTRUCTIONS: &str = "Describe what happens next. Write 2-3 sentences about the scene, \
atmosphere, or events. Do NOT write character dialogue.";
const RESPONSE_FORMAT: &str = "[physical action or emotion] \"what you say\"";
const RESPONSE_EXAMPLE: &str = "[smiles warmly] \"That's exactly what I was thinking!\"";

/// Everything a speaker's prompt is made of, before rendering
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptPayload {
    pub speaker: Participant,
    pub scenario: ScenarioState,
    /// Latest checkpoint text
    pub summary: Option<String>,
    /// Recent turns, oldest first
    pub window: Vec<String>,
    /// `(speaker name, content)` of the line being answered
    pub answering: Option<(String, String)>,
    pub instructions: String,
    /// Required reply shape; `None` for the narrator
    pub response_format: Option<String>,
}

impl PromptPayload {
    /// Produce the prompt text handed to the backend
    pub fn render(&self) -> String {
        let mut sections = Vec::new();

        if self.speaker.is_narrator {
            sections.push("You are the Narrator describing this scene.".to_string());
        } else {
            sections.push(format!("You are {}.", self.speaker.display_name));
        }

        let mut profile = Vec::new();
        if !self.speaker.is_narrator {
            push_field(&mut profile, "Character", &self.speaker.description);
            push_field(&mut profile, "Personality", &self.speaker.personality);
            push_field(&mut profile, "Speech patterns", &self.speaker.speech_patterns);
            push_field(&mut profile, "Motivations", &self.speaker.motivations);
        }
        push_field(&mut profile, "Setting", &self.scenario.description);
        push_field(&mut profile, "Current state", &self.scenario.current_state);
        push_field(&mut profile, "What happens next", &self.scenario.what_happens_next);
        push_field(&mut profile, "Never forget", &self.scenario.never_forget);
        if !profile.is_empty() {
            sections.push(profile.join("\n"));
        }

        if let Some(summary) = &self.summary {
            sections.push(format!("Story so far:\n{summary}"));
        }

        let (heading, empty) = if self.speaker.is_narrator {
            ("Recent events:", "(Story beginning)")
        } else {
            ("Conversation:", "(Just starting)")
        };
        let window = if self.window.is_empty() {
            empty.to_string()
        } else {
            self.window.join("\n")
        };
        sections.push(format!("{heading}\n{window}"));

        if let Some((name, content)) = &self.answering {
            sections.push(format!("{name} just said: \"{content}\""));
        }

        sections.push(self.instructions.clone());

        if self.speaker.is_narrator {
            sections.push("Your narration:".to_string());
        } else {
            sections.push("Your response:".to_string());
        }

        sections.join("\n\n")
    }
}

fn push_field(lines: &mut Vec<String>, label: &str, value: &str) {
    if !value.trim().is_empty() {
        lines.push(format!("{label}: {value}"));
    }
}

/// Builds a speaker's prompt from the last `window` turns
#[derive(Debug, Clone, Copy)]
pub struct ContextWindowBuilder {
    window: usize,
}

impl ContextWindowBuilder {
    pub fn new(window: usize) -> Self {
        Self {
            window: window.max(1),
        }
    }

    pub fn build_context(&self, session: &DialogueSession, speaker: &Participant) -> PromptPayload {
        self.build_context_before(session, speaker, session.len())
    }

    /// Build as if the log ended just before turn `end`; used to redo the last turn
    pub fn build_context_before(&self, session: &DialogueSession, speaker: &Participant, end: usize) -> PromptPayload {
        let turns = &session.turns()[..end.min(session.len())];
        let recent = &turns[turns.len().saturating_sub(self.window)..];
        let window = recent
            .iter()
            .map(|t| t.render_line(session.speaker_name(&t.speaker_id)))
            .collect();

        let (answering, instructions, response_format) = if speaker.is_narrator {
            (None, NARRATOR_INSTRUCTIONS.to_string(), None)
        } else {
            let answering = recent
                .last()
                .map(|t| (session.speaker_name(&t.speaker_id).to_string(), t.content.clone()));
            let instructions = format!(
                "Respond as {}. Write your response in this format:\n{}\n\nExample: {}",
                speaker.display_name, RESPONSE_FORMAT, RESPONSE_EXAMPLE
            );
            (answering, instructions, Some(RESPONSE_FORMAT.to_string()))
        };

        PromptPayload {
            speaker: speaker.clone(),
            scenario: session.scenario().clone(),
            summary: session
                .checkpoints()
                .iter()
                .rev()
                .find(|c| c.range_end <= turns.len())
                .map(|c| c.text.clone()),
            window,
            answering,
            instructions,
            response_format,
        }
    }
}

/// Prompt asking for a short description of a new character
pub fn participant_description_prompt(name: &str, scenario: &ScenarioState) -> String {
    format!(
        r#"Create a character description for someone named {name}.

Setting: {setting}

Write 1-2 sentences describing their personality, background, and speaking style. Make them fit the story and be interesting.

Character description:"#,
        setting = scenario.description,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::ScenarioUpdate;

    fn session_with(n: usize) -> DialogueSession {
        let mut session = DialogueSession::new("A ferry crossing in fog")
            .with_character("Juno", "A nervous smuggler")
            .with_character("Pike", "The ferryman");
        for i in 0..n {
            let speaker = ["narrator", "char1", "char2"][i % 3];
            let reaction = (speaker != "narrator").then(|| "glances".to_string());
            session.append(speaker, format!("line {i}"), reaction).unwrap();
        }
        session
    }

    #[test]
    fn test_window_keeps_last_k_oldest_first() {
        let session = session_with(12);
        let juno = session.participant("char1").unwrap().clone();
        let payload = ContextWindowBuilder::new(10).build_context(&session, &juno);

        assert_eq!(payload.window.len(), 10);
        assert_eq!(payload.window[0], "Pike: [glances] \"line 2\"");
        assert_eq!(payload.window[9], "Pike: [glances] \"line 11\"");
        assert_eq!(payload.answering, Some(("Pike".to_string(), "line 11".to_string())));
    }

    #[test]
    fn test_short_history_uses_everything() {
        let session = session_with(3);
        let narrator = session.narrator().unwrap().clone();
        let payload = ContextWindowBuilder::new(10).build_context(&session, &narrator);
        assert_eq!(payload.window.len(), 3);
        assert_eq!(payload.window[0], "Narrator: \"line 0\"");
    }

    #[test]
    fn test_narrator_payload_has_no_reaction_format() {
        let session = session_with(1);
        let narrator = session.narrator().unwrap().clone();
        let payload = ContextWindowBuilder::new(10).build_context(&session, &narrator);
        assert!(payload.response_format.is_none());
        assert!(payload.answering.is_none());

        let prompt = payload.render();
        assert!(prompt.starts_with("You are the Narrator"));
        assert!(prompt.contains("Do NOT write character dialogue"));
        assert!(!prompt.contains("[physical action or emotion]"));
    }

    #[test]
    fn test_character_prompt_includes_traits_and_scenario() {
        let mut session = session_with(2);
        session.update_scenario(ScenarioUpdate {
            never_forget: Some("The cargo is alive".to_string()),
            ..Default::default()
        });
        session
            .edit_participant(
                "char2",
                crate::session::ParticipantEdit {
                    motivations: Some("Get paid twice".to_string()),
                    ..Default::default()
                },
            )
            .unwrap();
        let pike = session.participant("char2").unwrap().clone();
        let prompt = ContextWindowBuilder::new(10).build_context(&session, &pike).render();

        assert!(prompt.starts_with("You are Pike."));
        assert!(prompt.contains("Character: The ferryman"));
        assert!(prompt.contains("Motivations: Get paid twice"));
        assert!(prompt.contains("Setting: A ferry crossing in fog"));
        assert!(prompt.contains("Never forget: The cargo is alive"));
        assert!(!prompt.contains("What happens next:"));
        assert!(prompt.contains("Juno just said: \"line 1\""));
        assert!(prompt.contains("Example: [smiles warmly]"));
    }

    #[test]
    fn test_summary_precedes_window() {
        let mut session = session_with(4);
        session
            .push_checkpoint(crate::session::SummaryCheckpoint {
                range_start: 0,
                range_end: 4,
                text: "Juno hid the crate.".to_string(),
                created_at: chrono::Utc::now(),
            })
            .unwrap();
        let narrator = session.narrator().unwrap().clone();
        let prompt = ContextWindowBuilder::new(2).build_context(&session, &narrator).render();

        let summary_at = prompt.find("Juno hid the crate.").unwrap();
        let window_at = prompt.find("Recent events:").unwrap();
        assert!(summary_at < window_at);
        assert!(!prompt.contains("line 1"));
    }

    #[test]
    fn test_build_before_hides_later_turns_and_summaries() {
        let mut session = session_with(4);
        session
            .push_checkpoint(crate::session::SummaryCheckpoint {
                range_start: 0,
                range_end: 4,
                text: "Pike demanded double.".to_string(),
                created_at: chrono::Utc::now(),
            })
            .unwrap();
        let juno = session.participant("char1").unwrap().clone();
        let payload = ContextWindowBuilder::new(10).build_context_before(&session, &juno, 3);

        assert_eq!(payload.window.len(), 3);
        assert_eq!(payload.answering, Some(("Pike".to_string(), "line 2".to_string())));
        assert_eq!(payload.summary, None);
    }

    #[test]
    fn test_empty_history_placeholder() {
        let session = session_with(0);
        let juno = session.participant("char1").unwrap().clone();
        let payload = ContextWindowBuilder::new(10).build_context(&session, &juno);
        assert!(payload.render().contains("(Just starting)"));
        assert!(payload.answering.is_none());
    }
}
