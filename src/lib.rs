//! Colloquy - turn-based dialogue engine
//!
//! Orchestrates a multi-party conversation driven by a text-generation backend:
//! - Decides who speaks next (round-robin with an optional AI-assisted override)
//! - Builds a bounded prompt from recent turns, the latest summary and the scenario
//! - Compacts older history into summary checkpoints
//! - Keeps an append-only turn log with a movable read cursor and regenerate support

pub mod backend;
pub mod commands;
pub mod config;
pub mod engine;
pub mod session;

pub use backend::{ChatBackend, GenerationBackend, ScriptedBackend};
pub use config::{BackendConfig, CheckpointPolicy, EngineConfig, SettingKey, Settings};
pub use engine::{
    ContextWindowBuilder, DialogueOrchestrator, ParsedResponse, PromptPayload, ResponseParser, SessionView,
    SummaryCheckpointer, TurnScheduler,
};
pub use session::{
    DialogueSession, Direction, Participant, ScenarioState, ScenarioUpdate, SessionHandle, SessionStore,
    SummaryCheckpoint, Turn,
};

use std::path::PathBuf;

/// Configuration for Colloquy
#[derive(Debug, Clone)]
pub struct ColloquyConfig {
    /// Directory holding config.toml and, by default, saved sessions
    pub home: PathBuf,

    /// Where session snapshots are written
    pub sessions_dir: PathBuf,

    /// Generation backend connection settings
    pub backend: BackendConfig,

    /// Turn engine tuning
    pub engine: EngineConfig,

    /// Initial runtime toggles
    pub settings: Settings,
}

impl ColloquyConfig {
    pub fn new(home: PathBuf) -> Self {
        let sessions_dir = home.join("sessions");
        Self {
            home,
            sessions_dir,
            backend: BackendConfig::default(),
            engine: EngineConfig::default(),
            settings: Settings::default(),
        }
    }

    pub fn with_sessions_dir(mut self, path: PathBuf) -> Self {
        self.sessions_dir = path;
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.backend.model = model.into();
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.backend.base_url = base_url.into();
        self
    }

    pub fn with_engine(mut self, engine: EngineConfig) -> Self {
        self.engine = engine;
        self
    }

    pub fn with_settings(mut self, settings: Settings) -> Self {
        self.settings = settings;
        self
    }

    /// Reject values the engine cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.engine.context_window == 0 {
            return Err(ColloquyError::Config("context_window must be at least 1".to_string()));
        }
        if self.engine.checkpoint_interval == 0 {
            return Err(ColloquyError::Config(
                "checkpoint_interval must be at least 1".to_string(),
            ));
        }
        if self.backend.max_attempts == 0 {
            return Err(ColloquyError::Config("max_attempts must be at least 1".to_string()));
        }
        Ok(())
    }
}

/// Result type for Colloquy operations
pub type Result<T> = std::result::Result<T, ColloquyError>;

/// Errors that can occur in Colloquy
#[derive(Debug, thiserror::Error)]
pub enum ColloquyError {
    #[error("Turn index {index} out of range (history has {len} turns)")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("History is empty")]
    EmptyHistory,

    #[error("Participant not found: {0}")]
    ParticipantNotFound(String),

    #[error("Participant already exists: {0}")]
    DuplicateParticipant(String),

    #[error("A speaker id is required when automatic speaker selection is disabled")]
    SpeakerRequired,

    #[error("No participant is available to speak")]
    NoParticipantsAvailable,

    #[error("Unknown setting: {0}")]
    UnknownSetting(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Generation backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("State invariant violated: {0}")]
    StateInvariant(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Snapshot version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Broad error classes; callers decide surfacing and retry from these
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad input from the caller; surfaced, never retried
    Validation,
    /// The generation backend failed
    Backend,
    /// Internal state is inconsistent; the operation was aborted
    Invariant,
    /// Disk, serialization or configuration trouble
    Storage,
}

impl ColloquyError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::IndexOutOfRange { .. }
            | Self::EmptyHistory
            | Self::ParticipantNotFound(_)
            | Self::DuplicateParticipant(_)
            | Self::SpeakerRequired
            | Self::NoParticipantsAvailable
            | Self::UnknownSetting(_)
            | Self::InvalidInput(_) => ErrorKind::Validation,
            Self::BackendUnavailable(_) => ErrorKind::Backend,
            Self::StateInvariant(_) => ErrorKind::Invariant,
            Self::Config(_)
            | Self::VersionMismatch { .. }
            | Self::Io(_)
            | Self::Json(_)
            | Self::Toml(_) => ErrorKind::Storage,
        }
    }
}
