//! Text-generation backends.
//!
//! The engine only ever sends a prompt and receives text back.

mod chat;
mod scripted;

pub use chat::ChatBackend;
pub use scripted::{ScriptedBackend, ScriptedReply};

use crate::Result;
use async_trait::async_trait;

/// A text-generation service: prompt in, text out.
///
/// Implementations map their own failures to
/// [`ColloquyError::BackendUnavailable`](crate::ColloquyError::BackendUnavailable).
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String>;

    /// Short label for logs
    fn name(&self) -> &str;
}
