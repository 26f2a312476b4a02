//! Rolling summary checkpoints.
//!
//! Every `interval` turns the un-summarized stretch of the log is condensed
//! by the backend into a checkpoint. Checkpoints only ever accumulate; each
//! one starts where the previous one ended.

use crate::backend::GenerationBackend;
use crate::config::CheckpointPolicy;
use crate::session::{DialogueSession, SummaryCheckpoint};
use crate::{ColloquyError, Result};
use chrono::Utc;
use std::ops::Range;
use tracing::info;

/// A checkpoint ready to be sent to the backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointPlan {
    pub range: Range<usize>,
    pub prompt: String,
}

#[derive(Debug, Clone, Copy)]
pub struct SummaryCheckpointer {
    interval: usize,
    policy: CheckpointPolicy,
}

impl SummaryCheckpointer {
    pub fn new(interval: usize, policy: CheckpointPolicy) -> Self {
        Self {
            interval: interval.max(1),
            policy,
        }
    }

    pub fn should_checkpoint(&self, session: &DialogueSession) -> bool {
        let len = session.len();
        let covered = session.covered_end();
        if len <= covered {
            return false;
        }
        match self.policy {
            CheckpointPolicy::Boundary => len >= self.interval && len % self.interval == 0,
            CheckpointPolicy::CatchUp => len - covered >= self.interval,
        }
    }

    /// Range and prompt for the next checkpoint
    pub fn plan(&self, session: &DialogueSession) -> Result<CheckpointPlan> {
        let range = session.covered_end()..session.len();
        if range.is_empty() {
            return Err(ColloquyError::StateInvariant(format!(
                "nothing to summarize: coverage ends at {} and the log has {} turns",
                range.start, range.end
            )));
        }

        let conversation = session.turns()[range.clone()]
            .iter()
            .map(|t| format!("{}: {}", session.speaker_name(&t.speaker_id), t.content))
            .collect::<Vec<_>>()
            .join("\n");

        let prompt = format!(
            r#"Summarize this section of the story, preserving:
1. Key events and developments
2. Character emotions and relationships
3. Important dialogue and decisions
4. Current scenario state

Conversation:
{conversation}

Write a concise summary (3-4 sentences)."#
        );

        Ok(CheckpointPlan { range, prompt })
    }

    /// Append the backend's summary for a plan made against this session
    pub fn commit(
        &self,
        session: &mut DialogueSession,
        plan: &CheckpointPlan,
        text: &str,
    ) -> Result<SummaryCheckpoint> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ColloquyError::BackendUnavailable(
                "backend returned an empty summary".to_string(),
            ));
        }

        let checkpoint = SummaryCheckpoint {
            range_start: plan.range.start,
            range_end: plan.range.end,
            text: text.to_string(),
            created_at: Utc::now(),
        };
        session.push_checkpoint(checkpoint.clone())?;

        info!(
            "Summary checkpoint created for turns {}..{}",
            checkpoint.range_start, checkpoint.range_end
        );
        Ok(checkpoint)
    }

    /// Plan, summarize and commit in one go on an exclusively held session.
    /// On failure the session is left untouched.
    pub async fn checkpoint(
        &self,
        backend: &dyn GenerationBackend,
        session: &mut DialogueSession,
    ) -> Result<SummaryCheckpoint> {
        let plan = self.plan(session)?;
        let text = backend.complete(&plan.prompt).await?;
        self.commit(session, &plan, &text)
    }
}
