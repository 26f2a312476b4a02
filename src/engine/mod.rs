//! Turn engine: scheduling, prompting, parsing and summary checkpoints,
//! tied together by [`DialogueOrchestrator`].

mod checkpoint;
mod context;
mod parser;
mod scheduler;

pub use checkpoint::{CheckpointPlan, SummaryCheckpointer};
pub use context::{participant_description_prompt, ContextWindowBuilder, PromptPayload};
pub use parser::{ParsedResponse, ResponseParser};
pub use scheduler::TurnScheduler;

use crate::backend::GenerationBackend;
use crate::config::{EngineConfig, SettingKey, Settings};
use crate::session::{DialogueSession, Participant, SessionHandle, Turn, GENERATION_FAILED_PREFIX};
use crate::{ColloquyError, Result};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Read-only picture of a session for display
#[derive(Debug, Clone)]
pub struct SessionView {
    pub session: DialogueSession,
    pub settings: Settings,
    pub cursor: Option<usize>,
    pub current: Option<Turn>,
}

/// Drives turns for any number of sessions.
///
/// Every mutating call holds the session's writer gate for its whole
/// duration. Backend calls happen with the gate held but the state lock
/// released, so readers are never blocked by generation.
pub struct DialogueOrchestrator {
    backend: Arc<dyn GenerationBackend>,
    scheduler: TurnScheduler,
    builder: ContextWindowBuilder,
    parser: ResponseParser,
    checkpointer: SummaryCheckpointer,
    config: EngineConfig,
    settings: RwLock<Settings>,
}

impl DialogueOrchestrator {
    pub fn new(backend: Arc<dyn GenerationBackend>, config: EngineConfig, settings: Settings) -> Self {
        Self {
            backend,
            scheduler: TurnScheduler::new(),
            builder: ContextWindowBuilder::new(config.context_window),
            parser: ResponseParser::new(),
            checkpointer: SummaryCheckpointer::new(config.checkpoint_interval, config.checkpoint_policy),
            config,
            settings: RwLock::new(settings),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub async fn settings(&self) -> Settings {
        *self.settings.read().await
    }

    /// Toggle a setting by name (`auto_response`, `show_reactions`, ...)
    pub async fn set_setting(&self, name: &str, value: bool) -> Result<SettingKey> {
        let key = self.settings.write().await.set_by_name(name, value)?;
        info!("Setting {:?} = {}", key, value);
        Ok(key)
    }

    pub async fn view(&self, handle: &SessionHandle) -> SessionView {
        let session = handle.snapshot().await;
        SessionView {
            cursor: session.cursor(),
            current: session.current().cloned(),
            settings: self.settings().await,
            session,
        }
    }

    /// Generate and commit the next turn
    pub async fn produce_next_turn(&self, handle: &SessionHandle, explicit_speaker: Option<&str>) -> Result<Turn> {
        let _gate = handle.lock_writer().await;
        self.produce_turn(handle, explicit_speaker).await
    }

    /// Replace the last turn with a fresh generation by the same speaker.
    /// The log keeps its length throughout; readers never see it shortened.
    pub async fn regenerate_last(&self, handle: &SessionHandle) -> Result<Turn> {
        let _gate = handle.lock_writer().await;
        let settings = self.settings().await;

        let (speaker, payload, index) = {
            let session = handle.read().await;
            let last = session.last_turn().ok_or(ColloquyError::EmptyHistory)?;
            let speaker = session.require_participant(&last.speaker_id)?.clone();
            let payload = self
                .builder
                .build_context_before(&session, &speaker, last.sequence_index);
            (speaker, payload, last.sequence_index)
        };
        info!("Regenerating turn {} ({})", index, speaker.id);

        let parsed = self.reply_for(&speaker, &payload).await;
        let reaction = parsed.reaction.filter(|_| settings.show_reactions);
        let turn = handle
            .write()
            .await
            .replace_last(index, &speaker.id, parsed.dialogue, reaction)?;
        info!("Turn {} by {} regenerated", turn.sequence_index, speaker.display_name);

        self.checkpoint_if_due(handle).await;
        Ok(turn)
    }

    /// Commit a hand-written turn
    pub async fn add_manual_turn(
        &self,
        handle: &SessionHandle,
        speaker_id: &str,
        content: String,
        reaction: Option<String>,
    ) -> Result<Turn> {
        let _gate = handle.lock_writer().await;
        let settings = self.settings().await;

        let turn = {
            let mut session = handle.write().await;
            let is_narrator = session.require_participant(speaker_id)?.is_narrator;
            let reaction = reaction
                .map(|r| r.trim().to_string())
                .filter(|r| !r.is_empty() && !is_narrator && settings.show_reactions);
            let index = session.append(speaker_id, content.trim().to_string(), reaction)?;
            session.turns()[index].clone()
        };
        info!("Manual turn {} by {}", turn.sequence_index, turn.speaker_id);

        self.checkpoint_if_due(handle).await;
        Ok(turn)
    }

    /// Add a character; a blank description is written by the backend
    pub async fn add_participant(&self, handle: &SessionHandle, name: &str, description: &str) -> Result<Participant> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ColloquyError::InvalidInput(
                "participant name must not be empty".to_string(),
            ));
        }

        let _gate = handle.lock_writer().await;

        let description = if description.trim().is_empty() {
            let prompt = {
                let session = handle.read().await;
                participant_description_prompt(name, session.scenario())
            };
            match self.generate(&prompt).await {
                Ok(text) if !text.trim().is_empty() => text.trim().to_string(),
                Ok(_) => placeholder_description(name),
                Err(e) => {
                    warn!("Description generation for {} failed: {}", name, e);
                    placeholder_description(name)
                }
            }
        } else {
            description.trim().to_string()
        };

        let participant = handle.write().await.add_character(name, &description).clone();
        info!("Added participant {} ({})", participant.display_name, participant.id);
        Ok(participant)
    }

    // ─── Internals (writer gate held) ───────────────────────────────

    async fn produce_turn(&self, handle: &SessionHandle, explicit_speaker: Option<&str>) -> Result<Turn> {
        let settings = self.settings().await;

        let speaker_id = match explicit_speaker {
            Some(id) => id.to_string(),
            None if settings.auto_speaker_selection => self.choose_speaker(handle).await?,
            None => return Err(ColloquyError::SpeakerRequired),
        };

        let (speaker, payload, expected_index) = {
            let session = handle.read().await;
            let speaker = session.require_participant(&speaker_id)?.clone();
            let payload = self.builder.build_context(&session, &speaker);
            (speaker, payload, session.len())
        };

        let parsed = self.reply_for(&speaker, &payload).await;
        let reaction = parsed.reaction.filter(|_| settings.show_reactions);

        let turn = {
            let mut session = handle.write().await;
            if session.len() != expected_index {
                return Err(ColloquyError::StateInvariant(format!(
                    "log changed during generation: expected {} turns, found {}",
                    expected_index,
                    session.len()
                )));
            }
            let index = session.append(&speaker.id, parsed.dialogue, reaction)?;
            session.turns()[index].clone()
        };
        info!("Turn {} by {}", turn.sequence_index, speaker.display_name);

        self.checkpoint_if_due(handle).await;
        Ok(turn)
    }

    /// Ask the backend for the speaker's line. A failure becomes a visible
    /// marker line instead of an error.
    async fn reply_for(&self, speaker: &Participant, payload: &PromptPayload) -> ParsedResponse {
        match self.generate(&payload.render()).await {
            Ok(raw) => self.parser.parse(&raw, speaker.is_narrator),
            Err(e) => {
                warn!("Generation for {} failed: {}", speaker.id, e);
                let detail = match e {
                    ColloquyError::BackendUnavailable(msg) => msg,
                    other => other.to_string(),
                };
                ParsedResponse {
                    reaction: None,
                    dialogue: format!("{GENERATION_FAILED_PREFIX} {detail}]"),
                }
            }
        }
    }

    async fn choose_speaker(&self, handle: &SessionHandle) -> Result<String> {
        let (fallback, prompt) = {
            let session = handle.read().await;
            let fallback = self.scheduler.decide_speaker(&session)?;
            let prompt = (self.config.assisted_scheduling && !session.is_empty())
                .then(|| self.scheduler.assisted_prompt(&session));
            (fallback, prompt)
        };

        let Some(prompt) = prompt else {
            debug!("Scheduled {}", fallback);
            return Ok(fallback);
        };

        match self.generate(&prompt).await {
            Ok(reply) => {
                let session = handle.read().await;
                match self.scheduler.pick_from_reply(&reply, &session) {
                    Some(id) => {
                        info!("Assisted scheduling picked {}", id);
                        Ok(id)
                    }
                    None => {
                        info!(
                            "Assisted scheduling reply {:?} named no single participant, using {}",
                            reply.trim(),
                            fallback
                        );
                        Ok(fallback)
                    }
                }
            }
            Err(e) => {
                warn!("Assisted scheduling failed: {}, using {}", e, fallback);
                Ok(fallback)
            }
        }
    }

    /// Attempt a checkpoint if one is due; failures are logged, never returned
    async fn checkpoint_if_due(&self, handle: &SessionHandle) {
        let plan = {
            let session = handle.read().await;
            if !self.checkpointer.should_checkpoint(&session) {
                return;
            }
            match self.checkpointer.plan(&session) {
                Ok(plan) => plan,
                Err(e) => {
                    warn!("Summary checkpoint skipped: {}", e);
                    return;
                }
            }
        };

        let result = match self.generate(&plan.prompt).await {
            Ok(text) => {
                let mut session = handle.write().await;
                self.checkpointer.commit(&mut session, &plan, &text)
            }
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            warn!(
                "Summary checkpoint for turns {}..{} failed: {}",
                plan.range.start, plan.range.end, e
            );
        }
    }

    async fn generate(&self, prompt: &str) -> Result<String> {
        debug!("Sending {} chars to {}", prompt.len(), self.backend.name());
        let timeout = self.config.generation_timeout;
        match tokio::time::timeout(timeout, self.backend.complete(prompt)).await {
            Ok(result) => result,
            Err(_) => Err(ColloquyError::BackendUnavailable(format!(
                "no reply within {}s",
                timeout.as_secs_f32()
            ))),
        }
    }
}

fn placeholder_description(name: &str) -> String {
    format!("{name}, a newcomer to the story.")
}
