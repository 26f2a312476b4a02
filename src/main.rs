//! Colloquy CLI
//!
//! Runs a multi-party dialogue in the terminal against an OpenAI-compatible
//! backend (a local Ollama server by default).

use anyhow::{anyhow, Context};
use clap::Parser;
use colloquy::commands::{help_text, parse_command, Action, ParsedCommand};
use colloquy::config::{colloquy_home, load_config};
use colloquy::session::NARRATOR_ID;
use colloquy::{ChatBackend, DialogueOrchestrator, DialogueSession, SessionHandle, SessionStore, Turn};
use std::io::{self, BufRead, Write};
use std::ops::ControlFlow;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Colloquy - turn-based dialogue with rolling summary memory
#[derive(Parser, Debug)]
#[command(name = "colloquy")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Scenario for a new session
    #[arg(short, long)]
    scenario: Option<String>,

    /// Character for a new session, as NAME or NAME=DESCRIPTION (repeatable)
    #[arg(short = 'c', long = "character", value_name = "NAME=DESCRIPTION")]
    characters: Vec<String>,

    /// Resume a saved session by id
    #[arg(long, value_name = "SESSION_ID")]
    load: Option<String>,

    /// List saved sessions and exit
    #[arg(long)]
    list: bool,

    /// Model name passed to the backend
    #[arg(long)]
    model: Option<String>,

    /// Base URL of the OpenAI-compatible API
    #[arg(long)]
    base_url: Option<String>,

    /// Path to config.toml (defaults to <home>/config.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Disable automatic speaker selection
    #[arg(long)]
    manual: bool,

    /// Drop reactions from generated turns
    #[arg(long)]
    hide_reactions: bool,

    /// Let the model suggest the next speaker
    #[arg(long)]
    assisted_scheduling: bool,

    /// Verbose output: debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();

    let home = colloquy_home()?;
    let mut config = load_config(&home, cli.config.as_deref()).await?;
    if let Some(model) = &cli.model {
        config = config.with_model(model.clone());
    }
    if let Some(base_url) = &cli.base_url {
        config = config.with_base_url(base_url.clone());
    }
    if cli.manual {
        config.settings.auto_speaker_selection = false;
    }
    if cli.hide_reactions {
        config.settings.show_reactions = false;
    }
    if cli.assisted_scheduling {
        config.engine.assisted_scheduling = true;
    }
    config.validate()?;

    let store = SessionStore::new(&config.sessions_dir).await?;

    if cli.list {
        return list_sessions(&store).await;
    }

    let backend = Arc::new(ChatBackend::new(&config.backend)?);
    let engine = DialogueOrchestrator::new(backend, config.engine.clone(), config.settings);

    let handle = match &cli.load {
        Some(id) => {
            let session = store
                .load(id)
                .await?
                .ok_or_else(|| anyhow!("no saved session named {id}"))?;
            SessionHandle::new(session)
        }
        None => {
            let scenario = cli
                .scenario
                .as_deref()
                .ok_or_else(|| anyhow!("--scenario is required unless --load or --list is given"))?;
            let handle = SessionHandle::new(DialogueSession::new(scenario));
            for arg in &cli.characters {
                let (name, description) = parse_character_arg(arg);
                engine
                    .add_participant(&handle, &name, &description)
                    .await
                    .with_context(|| format!("adding character {name}"))?;
            }
            handle
        }
    };

    info!("Session {} ready", handle.id().await);
    run_plain_mode(&engine, &handle, &store).await
}

async fn run_plain_mode(
    engine: &DialogueOrchestrator,
    handle: &SessionHandle,
    store: &SessionStore,
) -> anyhow::Result<()> {
    let (input_tx, mut input_rx) = mpsc::channel::<String>(32);

    // Spawn blocking thread to read from stdin
    std::thread::spawn(move || {
        let stdin = io::stdin();
        for line in stdin.lock().lines() {
            match line {
                Ok(line) => {
                    if input_tx.blocking_send(line).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    eprintln!("Error reading stdin: {}", e);
                    break;
                }
            }
        }
    });

    let mut out = io::stdout();
    show_session(engine, handle, &mut out).await?;
    writeln!(out, "Enter advances the story, /help lists commands.")?;
    out.flush()?;

    while let Some(line) = input_rx.recv().await {
        let action = match parse_command(&line) {
            None => Action::Next(None),
            Some(ParsedCommand::Action(action)) => action,
            Some(ParsedCommand::Invalid(cmd, reason)) => {
                writeln!(out, "{cmd}: {reason}")?;
                continue;
            }
            Some(ParsedCommand::Unknown(name)) => {
                writeln!(out, "Unknown command /{name}, try /help")?;
                continue;
            }
        };

        match execute(engine, handle, store, action, &mut out).await {
            Ok(ControlFlow::Continue(())) => {}
            Ok(ControlFlow::Break(())) => break,
            Err(e) => writeln!(out, "Error: {e:#}")?,
        }
        out.flush()?;
    }

    let path = store.save(&handle.snapshot().await).await?;
    writeln!(out, "Saved to {}", path.display())?;
    Ok(())
}

async fn execute(
    engine: &DialogueOrchestrator,
    handle: &SessionHandle,
    store: &SessionStore,
    action: Action,
    out: &mut impl Write,
) -> anyhow::Result<ControlFlow<()>> {
    match action {
        Action::Next(speaker) => {
            let turn = engine.produce_next_turn(handle, speaker.as_deref()).await?;
            print_turn(handle, &turn, out).await?;
        }
        Action::Say {
            speaker,
            text,
            reaction,
        } => {
            let turn = engine.add_manual_turn(handle, &speaker, text, reaction).await?;
            print_turn(handle, &turn, out).await?;
        }
        Action::Edit { index, text, reaction } => {
            handle.edit_turn(index, text, reaction).await?;
            let session = handle.read().await;
            if let Some(turn) = session.turns().get(index) {
                writeln!(out, "{}", format_turn(&session, turn))?;
            }
        }
        Action::Regen => {
            let turn = engine.regenerate_last(handle).await?;
            print_turn(handle, &turn, out).await?;
        }
        Action::Navigate(direction) => {
            handle.navigate(direction).await;
            let session = handle.read().await;
            match session.current() {
                Some(turn) => writeln!(out, "{}", format_turn(&session, turn))?,
                None => writeln!(out, "(no turns yet)")?,
            }
        }
        Action::Show => show_session(engine, handle, out).await?,
        Action::Scenario(update) => {
            handle.update_scenario(update).await;
            writeln!(out, "Scenario updated")?;
        }
        Action::Add { name, description } => {
            let participant = engine.add_participant(handle, &name, &description).await?;
            writeln!(
                out,
                "Added {} ({}): {}",
                participant.display_name, participant.id, participant.description
            )?;
        }
        Action::Toggle { setting, value } => {
            let key = engine.set_setting(&setting, value).await?;
            writeln!(out, "{key:?} = {value}")?;
        }
        Action::Save => {
            let path = store.save(&handle.snapshot().await).await?;
            writeln!(out, "Saved to {}", path.display())?;
        }
        Action::List => {
            for summary in store.list().await? {
                writeln!(
                    out,
                    "{}  {}  ({} turns, updated {})",
                    summary.id,
                    summary.name,
                    summary.turn_count,
                    summary.updated_at.format("%Y-%m-%d %H:%M")
                )?;
            }
        }
        Action::Help => writeln!(out, "{}", help_text())?,
        Action::Quit => return Ok(ControlFlow::Break(())),
    }
    Ok(ControlFlow::Continue(()))
}

async fn print_turn(handle: &SessionHandle, turn: &Turn, out: &mut impl Write) -> anyhow::Result<()> {
    let session = handle.read().await;
    writeln!(out, "{}", format_turn(&session, turn))?;
    if turn.is_generation_failure() {
        warn!("Turn {} holds a failed generation, /regen to retry", turn.sequence_index);
    }
    if let Some(checkpoint) = session.latest_checkpoint() {
        if checkpoint.range_end == session.len() && checkpoint.range_end == turn.sequence_index + 1 {
            writeln!(
                out,
                "  (summarized turns {}..{})",
                checkpoint.range_start, checkpoint.range_end
            )?;
        }
    }
    Ok(())
}

async fn show_session(
    engine: &DialogueOrchestrator,
    handle: &SessionHandle,
    out: &mut impl Write,
) -> anyhow::Result<()> {
    let view = engine.view(handle).await;
    let session = &view.session;
    let scenario = session.scenario();

    writeln!(out, "== {} [{}] ==", session.name, session.id)?;
    writeln!(out, "Setting: {}", scenario.description)?;
    for (label, value) in [
        ("Current state", &scenario.current_state),
        ("What happens next", &scenario.what_happens_next),
        ("Never forget", &scenario.never_forget),
    ] {
        if !value.is_empty() {
            writeln!(out, "{label}: {value}")?;
        }
    }
    for p in session.participants() {
        writeln!(out, "  {:<10} {} - {}", p.id, p.display_name, p.description)?;
    }
    writeln!(
        out,
        "auto speaker: {}, reactions: {}, checkpoints: {}",
        view.settings.auto_speaker_selection,
        view.settings.show_reactions,
        session.checkpoints().len()
    )?;
    for turn in session.turns() {
        let marker = if view.cursor == Some(turn.sequence_index) { ">" } else { " " };
        writeln!(out, "{marker} {}", format_turn(session, turn))?;
    }
    Ok(())
}

fn format_turn(session: &DialogueSession, turn: &Turn) -> String {
    let name = session.speaker_name(&turn.speaker_id);
    if turn.speaker_id == NARRATOR_ID {
        format!("#{} {}: {}", turn.sequence_index, name, turn.content)
    } else {
        format!("#{} {}", turn.sequence_index, turn.render_line(name))
    }
}

async fn list_sessions(store: &SessionStore) -> anyhow::Result<()> {
    let sessions = store.list().await?;
    if sessions.is_empty() {
        println!("No saved sessions");
    }
    for summary in sessions {
        println!(
            "{}  {}  ({} turns, created {})",
            summary.id,
            summary.name,
            summary.turn_count,
            summary.created_at.format("%Y-%m-%d %H:%M")
        );
    }
    Ok(())
}

/// Split `NAME=DESCRIPTION`; the description may be empty
fn parse_character_arg(arg: &str) -> (String, String) {
    match arg.split_once('=') {
        Some((name, description)) => (name.trim().to_string(), description.trim().to_string()),
        None => (arg.trim().to_string(), String::new()),
    }
}
