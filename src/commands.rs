//! Slash commands for the interactive loop.
//!
//! Every line starting with `/` is a command; anything else is left to the
//! caller (the binary treats a bare line as `/next`).

use crate::session::{Direction, ScenarioUpdate};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialogueCommand {
    Next,
    Say,
    Edit,
    Regen,
    Back,
    Forward,
    Show,
    Scenario,
    Add,
    Toggle,
    Save,
    List,
    Help,
    Quit,
}

impl DialogueCommand {
    pub fn all() -> &'static [DialogueCommand] {
        &[
            DialogueCommand::Next,
            DialogueCommand::Say,
            DialogueCommand::Edit,
            DialogueCommand::Regen,
            DialogueCommand::Back,
            DialogueCommand::Forward,
            DialogueCommand::Show,
            DialogueCommand::Scenario,
            DialogueCommand::Add,
            DialogueCommand::Toggle,
            DialogueCommand::Save,
            DialogueCommand::List,
            DialogueCommand::Help,
            DialogueCommand::Quit,
        ]
    }

    pub fn name(&self) -> &'static str {
        match self {
            DialogueCommand::Next => "next",
            DialogueCommand::Say => "say",
            DialogueCommand::Edit => "edit",
            DialogueCommand::Regen => "regen",
            DialogueCommand::Back => "back",
            DialogueCommand::Forward => "forward",
            DialogueCommand::Show => "show",
            DialogueCommand::Scenario => "scenario",
            DialogueCommand::Add => "add",
            DialogueCommand::Toggle => "toggle",
            DialogueCommand::Save => "save",
            DialogueCommand::List => "list",
            DialogueCommand::Help => "help",
            DialogueCommand::Quit => "quit",
        }
    }

    pub fn usage(&self) -> &'static str {
        match self {
            DialogueCommand::Next => "/next [speaker-id]",
            DialogueCommand::Say => "/say <speaker-id> [reaction] <text>",
            DialogueCommand::Edit => "/edit <index> [reaction] <text>",
            DialogueCommand::Regen => "/regen",
            DialogueCommand::Back => "/back",
            DialogueCommand::Forward => "/forward",
            DialogueCommand::Show => "/show",
            DialogueCommand::Scenario => "/scenario <setting|state|next|never> <text>",
            DialogueCommand::Add => "/add <name>[=description]",
            DialogueCommand::Toggle => "/toggle <auto_response|show_reactions> <on|off>",
            DialogueCommand::Save => "/save",
            DialogueCommand::List => "/list",
            DialogueCommand::Help => "/help",
            DialogueCommand::Quit => "/quit",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            DialogueCommand::Next => "Generate the next turn",
            DialogueCommand::Say => "Write a turn by hand",
            DialogueCommand::Edit => "Rewrite a turn",
            DialogueCommand::Regen => "Regenerate the last turn",
            DialogueCommand::Back => "Move the cursor back",
            DialogueCommand::Forward => "Move the cursor forward",
            DialogueCommand::Show => "Show the session",
            DialogueCommand::Scenario => "Update the scenario",
            DialogueCommand::Add => "Add a character",
            DialogueCommand::Toggle => "Change a setting",
            DialogueCommand::Save => "Save the session",
            DialogueCommand::List => "List saved sessions",
            DialogueCommand::Help => "Show this help",
            DialogueCommand::Quit => "Save and quit",
        }
    }

    pub fn parse(name: &str) -> Option<DialogueCommand> {
        let name = name.to_lowercase();
        match name.as_str() {
            "exit" => Some(DialogueCommand::Quit),
            "regenerate" => Some(DialogueCommand::Regen),
            _ => Self::all().iter().find(|cmd| cmd.name() == name).copied(),
        }
    }
}

impl fmt::Display for DialogueCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}", self.name())
    }
}

/// A command with its arguments parsed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Next(Option<String>),
    Say {
        speaker: String,
        text: String,
        reaction: Option<String>,
    },
    Edit {
        index: usize,
        text: String,
        reaction: Option<String>,
    },
    Regen,
    Navigate(Direction),
    Show,
    Scenario(ScenarioUpdate),
    Add {
        name: String,
        description: String,
    },
    Toggle {
        setting: String,
        value: bool,
    },
    Save,
    List,
    Help,
    Quit,
}

/// Parsed command result
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedCommand {
    Action(Action),
    /// Known command, bad arguments
    Invalid(DialogueCommand, String),
    Unknown(String),
}

/// Parse a `/command`; returns None for lines that are not commands
pub fn parse_command(input: &str) -> Option<ParsedCommand> {
    let rest = input.trim().strip_prefix('/')?;
    let (name, args) = match rest.split_once(char::is_whitespace) {
        Some((name, args)) => (name, args.trim()),
        None => (rest, ""),
    };

    let Some(cmd) = DialogueCommand::parse(name) else {
        return Some(ParsedCommand::Unknown(name.to_string()));
    };

    Some(match parse_args(cmd, args) {
        Ok(action) => ParsedCommand::Action(action),
        Err(reason) => ParsedCommand::Invalid(cmd, reason),
    })
}

fn parse_args(cmd: DialogueCommand, args: &str) -> Result<Action, String> {
    let missing = || format!("usage: {}", cmd.usage());

    match cmd {
        DialogueCommand::Next => Ok(Action::Next(
            args.split_whitespace().next().map(str::to_string),
        )),
        DialogueCommand::Say => {
            let (speaker, text) = args.split_once(char::is_whitespace).ok_or_else(missing)?;
            let (reaction, text) = split_reaction(text);
            if text.is_empty() {
                return Err(missing());
            }
            Ok(Action::Say {
                speaker: speaker.to_string(),
                text,
                reaction,
            })
        }
        DialogueCommand::Edit => {
            let (index, text) = args.split_once(char::is_whitespace).ok_or_else(missing)?;
            let index = index
                .parse::<usize>()
                .map_err(|_| format!("not a turn index: {index}"))?;
            let (reaction, text) = split_reaction(text);
            if text.is_empty() {
                return Err(missing());
            }
            Ok(Action::Edit { index, text, reaction })
        }
        DialogueCommand::Scenario => {
            let (field, text) = args.split_once(char::is_whitespace).ok_or_else(missing)?;
            let text = Some(text.trim().to_string());
            let update = match field.to_lowercase().as_str() {
                "setting" | "description" => ScenarioUpdate {
                    description: text,
                    ..Default::default()
                },
                "state" | "current" | "current_state" => ScenarioUpdate {
                    current_state: text,
                    ..Default::default()
                },
                "next" | "what_happens_next" => ScenarioUpdate {
                    what_happens_next: text,
                    ..Default::default()
                },
                "never" | "never_forget" => ScenarioUpdate {
                    never_forget: text,
                    ..Default::default()
                },
                other => return Err(format!("unknown scenario field: {other}")),
            };
            Ok(Action::Scenario(update))
        }
        DialogueCommand::Add => {
            let (name, description) = args.split_once('=').unwrap_or((args, ""));
            let name = name.trim();
            if name.is_empty() {
                return Err(missing());
            }
            Ok(Action::Add {
                name: name.to_string(),
                description: description.trim().to_string(),
            })
        }
        DialogueCommand::Toggle => {
            let mut parts = args.split_whitespace();
            let (Some(setting), Some(value)) = (parts.next(), parts.next()) else {
                return Err(missing());
            };
            let value = parse_switch(value).ok_or_else(|| format!("expected on or off, got {value}"))?;
            Ok(Action::Toggle {
                setting: setting.to_string(),
                value,
            })
        }
        DialogueCommand::Regen => Ok(Action::Regen),
        DialogueCommand::Back => Ok(Action::Navigate(Direction::Back)),
        DialogueCommand::Forward => Ok(Action::Navigate(Direction::Forward)),
        DialogueCommand::Show => Ok(Action::Show),
        DialogueCommand::Save => Ok(Action::Save),
        DialogueCommand::List => Ok(Action::List),
        DialogueCommand::Help => Ok(Action::Help),
        DialogueCommand::Quit => Ok(Action::Quit),
    }
}

/// Split a leading `[reaction]` off hand-written text
fn split_reaction(text: &str) -> (Option<String>, String) {
    let text = text.trim();
    if let Some(rest) = text.strip_prefix('[') {
        if let Some((reaction, spoken)) = rest.split_once(']') {
            let reaction = reaction.trim();
            let spoken = spoken.trim().trim_matches('"').trim();
            return ((!reaction.is_empty()).then(|| reaction.to_string()), spoken.to_string());
        }
    }
    (None, text.to_string())
}

fn parse_switch(value: &str) -> Option<bool> {
    match value.to_lowercase().as_str() {
        "on" | "true" | "yes" | "1" => Some(true),
        "off" | "false" | "no" | "0" => Some(false),
        _ => None,
    }
}

/// Help listing for every command
pub fn help_text() -> String {
    DialogueCommand::all()
        .iter()
        .map(|cmd| format!("  {:<50} {}", cmd.usage(), cmd.description()))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn action(input: &str) -> Action {
        match parse_command(input) {
            Some(ParsedCommand::Action(action)) => action,
            other => panic!("{input} should parse, got {other:?}"),
        }
    }

    #[test]
    fn test_plain_text_is_not_a_command() {
        assert_eq!(parse_command("just talking"), None);
        assert_eq!(parse_command(""), None);
    }

    #[test]
    fn test_next_with_and_without_speaker() {
        assert_eq!(action("/next"), Action::Next(None));
        assert_eq!(action("/next char2"), Action::Next(Some("char2".to_string())));
    }

    #[test]
    fn test_say_with_reaction() {
        assert_eq!(
            action("/say char1 [grins] \"Told you.\""),
            Action::Say {
                speaker: "char1".to_string(),
                text: "Told you.".to_string(),
                reaction: Some("grins".to_string()),
            }
        );
        assert_eq!(
            action("/say narrator The door creaks."),
            Action::Say {
                speaker: "narrator".to_string(),
                text: "The door creaks.".to_string(),
                reaction: None,
            }
        );
    }

    #[test]
    fn test_edit_needs_index() {
        assert_eq!(
            action("/edit 3 Better line"),
            Action::Edit {
                index: 3,
                text: "Better line".to_string(),
                reaction: None,
            }
        );
        assert!(matches!(
            parse_command("/edit three Better"),
            Some(ParsedCommand::Invalid(DialogueCommand::Edit, _))
        ));
    }

    #[test]
    fn test_scenario_fields() {
        assert_eq!(
            action("/scenario never The map is fake"),
            Action::Scenario(ScenarioUpdate {
                never_forget: Some("The map is fake".to_string()),
                ..Default::default()
            })
        );
        assert!(matches!(
            parse_command("/scenario weather rainy"),
            Some(ParsedCommand::Invalid(DialogueCommand::Scenario, _))
        ));
    }

    #[test]
    fn test_add_and_toggle() {
        assert_eq!(
            action("/add Wren = A falconer"),
            Action::Add {
                name: "Wren".to_string(),
                description: "A falconer".to_string(),
            }
        );
        assert_eq!(
            action("/add Wren"),
            Action::Add {
                name: "Wren".to_string(),
                description: String::new(),
            }
        );
        assert_eq!(
            action("/toggle show_reactions off"),
            Action::Toggle {
                setting: "show_reactions".to_string(),
                value: false,
            }
        );
        assert!(matches!(
            parse_command("/toggle show_reactions maybe"),
            Some(ParsedCommand::Invalid(DialogueCommand::Toggle, _))
        ));
    }

    #[test]
    fn test_aliases_and_unknown() {
        assert_eq!(action("/EXIT"), Action::Quit);
        assert_eq!(action("/back"), Action::Navigate(Direction::Back));
        assert_eq!(
            parse_command("/dance"),
            Some(ParsedCommand::Unknown("dance".to_string()))
        );
    }

    #[test]
    fn test_help_lists_every_command() {
        let help = help_text();
        for cmd in DialogueCommand::all() {
            assert!(help.contains(cmd.usage()));
        }
    }
}
