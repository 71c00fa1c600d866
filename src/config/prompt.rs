use serde::Deserialize;
use std::error::Error;
use std::fmt;
use std::fs;
use std::str::FromStr;
use std::sync::Arc;
use log::info;

use crate::cli::Args;
use crate::conversation::prompt::ChatTemplate;

pub const DEFAULT_SYSTEM_PROMPT: &str =
    "You are a professional assistant, coding expert, and MLOps subject matter expert.";
pub const DEFAULT_CONTINUE_PROMPT: &str = "Please continue.";

#[derive(Debug)]
pub enum PromptError {
    InvalidTemplate(String),
    IoError(std::io::Error),
    JsonError(serde_json::Error),
}

impl fmt::Display for PromptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PromptError::InvalidTemplate(name) => write!(f, "Unknown chat template '{}'", name),
            PromptError::IoError(e) => write!(f, "Prompt file IO error: {}", e),
            PromptError::JsonError(e) => write!(f, "Prompt JSON parsing error: {}", e),
        }
    }
}

impl Error for PromptError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            PromptError::IoError(e) => Some(e),
            PromptError::JsonError(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for PromptError {
    fn from(err: std::io::Error) -> Self {
        PromptError::IoError(err)
    }
}

impl From<serde_json::Error> for PromptError {
    fn from(err: serde_json::Error) -> Self {
        PromptError::JsonError(err)
    }
}

/// Overrides read from the optional prompts file. Absent keys keep the CLI values.
#[derive(Deserialize, Debug, Default)]
struct PromptFile {
    system_prompt: Option<String>,
    continue_prompt: Option<String>,
    template: Option<String>,
}

#[derive(Debug, Clone)]
pub struct PromptConfig {
    pub system_prompt: String,
    pub continue_prompt: String,
    pub template: ChatTemplate,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            continue_prompt: DEFAULT_CONTINUE_PROMPT.to_string(),
            template: ChatTemplate::Mistral,
        }
    }
}

impl PromptConfig {
    fn apply(mut self, file: PromptFile) -> Result<Self, PromptError> {
        if let Some(system_prompt) = file.system_prompt {
            self.system_prompt = system_prompt;
        }
        if let Some(continue_prompt) = file.continue_prompt {
            self.continue_prompt = continue_prompt;
        }
        if let Some(template) = file.template {
            self.template = ChatTemplate::from_str(&template).map_err(|_|
                PromptError::InvalidTemplate(template)
            )?;
        }
        Ok(self)
    }
}

pub fn load_prompts(args: &Args) -> Result<Arc<PromptConfig>, Box<dyn Error + Send + Sync>> {
    let template = ChatTemplate::from_str(&args.chat_template).map_err(|_|
        PromptError::InvalidTemplate(args.chat_template.clone())
    )?;
    let base = PromptConfig {
        system_prompt: args.system_prompt.clone(),
        continue_prompt: args.continue_prompt.clone(),
        template,
    };

    let Some(path) = args.prompts_path.as_deref() else {
        return Ok(Arc::new(base));
    };

    let file_content = fs
        ::read_to_string(path)
        .map_err(|e| format!("Failed to read prompts file '{}': {}", path, e))?;
    let config = parse_prompt_file(base, &file_content).map_err(|e|
        format!("Failed to parse prompts file '{}': {}", path, e)
    )?;
    info!("Loaded prompt overrides from: {}", path);
    Ok(Arc::new(config))
}

fn parse_prompt_file(base: PromptConfig, content: &str) -> Result<PromptConfig, PromptError> {
    let file: PromptFile = serde_json::from_str(content)?;
    base.apply(file)
}
