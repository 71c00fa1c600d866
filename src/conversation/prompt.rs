use std::fmt;
use std::str::FromStr;

use crate::error::ChatError;
use crate::models::chat::{ Role, Turn };

/// Flattened prompt layout expected by the completion backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatTemplate {
    /// `<s>[INST] .. [/INST] ..</s>`; the system prompt rides on the last
    /// user message as Mistral instruct models expect.
    Mistral,
    /// `<|im_start|>role\n..<|im_end|>`
    ChatMl,
    /// `System: ..` / `User: ..` / `Assistant: ..` lines.
    Plain,
}

impl fmt::Display for ChatTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ChatTemplate::Mistral => "mistral",
            ChatTemplate::ChatMl => "chatml",
            ChatTemplate::Plain => "plain",
        };
        write!(f, "{}", name)
    }
}

impl FromStr for ChatTemplate {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mistral" => Ok(ChatTemplate::Mistral),
            "chatml" => Ok(ChatTemplate::ChatMl),
            "plain" => Ok(ChatTemplate::Plain),
            _ => Err(format!("Invalid chat template: '{}'", s)),
        }
    }
}

/// Renders a repaired conversation into a single prompt ending with the
/// generation cue. A trailing placeholder turn is the slot being generated
/// and is not rendered.
pub fn assemble_prompt(turns: &[Turn], template: ChatTemplate) -> String {
    let turns = match turns.last() {
        Some(last) if last.is_placeholder() => &turns[..turns.len() - 1],
        _ => turns,
    };
    match template {
        ChatTemplate::Mistral => render_mistral(turns),
        ChatTemplate::ChatMl => render_chatml(turns),
        ChatTemplate::Plain => render_plain(turns),
    }
}

fn render_mistral(turns: &[Turn]) -> String {
    let system = turns
        .iter()
        .find(|t| t.role == Role::System)
        .map(|t| t.content.trim())
        .filter(|s| !s.is_empty());
    let last_user = turns.iter().rposition(|t| t.role == Role::User);

    let mut prompt = String::from("<s>");
    for (idx, turn) in turns.iter().enumerate() {
        match turn.role {
            Role::System => {}
            Role::User => {
                prompt.push_str("[INST] ");
                if let (Some(system), true) = (system, Some(idx) == last_user) {
                    prompt.push_str(system);
                    prompt.push_str("\n\n");
                }
                prompt.push_str(turn.content.trim());
                prompt.push_str(" [/INST]");
            }
            Role::Assistant => {
                prompt.push(' ');
                prompt.push_str(turn.content.trim());
                prompt.push_str("</s>");
            }
        }
    }
    prompt
}

fn render_chatml(turns: &[Turn]) -> String {
    let mut prompt = String::new();
    for turn in turns {
        prompt.push_str("<|im_start|>");
        prompt.push_str(turn.role.as_str());
        prompt.push('\n');
        prompt.push_str(turn.content.trim());
        prompt.push_str("<|im_end|>\n");
    }
    prompt.push_str("<|im_start|>assistant\n");
    prompt
}

fn render_plain(turns: &[Turn]) -> String {
    let mut prompt = String::new();
    for turn in turns {
        let label = match turn.role {
            Role::System => "System",
            Role::User => "User",
            Role::Assistant => "Assistant",
        };
        prompt.push_str(&format!("{}: {}\n\n", label, turn.content.trim()));
    }
    prompt.push_str("Assistant:");
    prompt
}

/// Output budget from the word count of the triggering input.
pub fn determine_max_tokens(input: &str) -> u32 {
    match input.split_whitespace().count() {
        0..=10 => 512,
        11..=50 => 1024,
        51..=100 => 2048,
        _ => 8192,
    }
}

/// Rejects empty or oversized user text.
pub fn validate_input(text: &str, max_length: usize) -> Result<(), ChatError> {
    if text.trim().is_empty() {
        return Err(ChatError::InvalidInput("Invalid input: No content provided".to_string()));
    }
    if text.chars().count() > max_length {
        return Err(
            ChatError::InvalidInput(
                format!("Invalid input: Text exceeds {} characters", max_length)
            )
        );
    }
    Ok(())
}
