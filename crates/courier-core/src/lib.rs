use serde::{Deserialize, Serialize};
use std::env;

// --- Configuration ---

pub const ENV_PROVIDER: &str = "COURIER_PROVIDER";
pub const ENV_API_KEY: &str = "COURIER_API_KEY";
pub const ENV_MODEL: &str = "COURIER_MODEL";
pub const ENV_NAVIGATOR_URL: &str = "COURIER_NAVIGATOR_URL";

const DEFAULT_PROVIDER: &str = "openai";

/// Process-wide configuration, read once at startup. Handlers receive a copy
/// at construction time; the values are never mutated afterwards.
#[derive(Debug, Clone)]
pub struct Config {
    pub provider: String,
    pub api_key: String,
    pub model: String,
    pub navigator_url: String,
}

impl Config {
    /// Read configuration from the environment. A missing mandatory variable
    /// is a startup-breaking condition: the caller logs the message and exits
    /// non-zero without serving any tool.
    pub fn from_env() -> Result<Config, String> {
        let provider = read_var(ENV_PROVIDER).unwrap_or_else(|| DEFAULT_PROVIDER.to_string());
        let api_key = read_var(ENV_API_KEY).unwrap_or_default();
        // Local ollama backends authenticate nothing; every other provider
        // needs a key before the first call.
        if api_key.is_empty() && provider != "ollama" {
            return Err(format!(
                "{} is not set. Export an API key for the '{}' provider before starting courier-mcp.",
                ENV_API_KEY, provider
            ));
        }
        let model = read_var(ENV_MODEL)
            .ok_or_else(|| format!("{} is not set. Export a model identifier.", ENV_MODEL))?;
        let navigator_url = read_var(ENV_NAVIGATOR_URL).ok_or_else(|| {
            format!(
                "{} is not set. Export the base URL of the navigator chat API.",
                ENV_NAVIGATOR_URL
            )
        })?;
        Ok(Config {
            provider,
            api_key,
            model,
            navigator_url: navigator_url.trim_end_matches('/').to_string(),
        })
    }
}

fn read_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

// --- Chat data model ---

/// Who is sending a prompt to the chat service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    Agent,
    Service,
}

/// Optional caller identifiers accepted by the chat service alongside a
/// prompt. Serializes flat into the initiate request body.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatIdentity {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub application_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_id: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender: Option<Sender>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

/// One supporting citation attached to a resolved answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatReference {
    pub id: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snippet: Option<String>,
}

/// The resolved response of a chat conversation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatAnswer {
    #[serde(default)]
    pub answer: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub references: Vec<ChatReference>,
}

impl ChatAnswer {
    /// Flatten the answer and any references into a single text payload.
    /// References are appended as serialized JSON so the caller sees the
    /// citation data inline with the answer.
    pub fn render(&self) -> String {
        if self.references.is_empty() {
            return self.answer.clone();
        }
        match serde_json::to_string(&self.references) {
            Ok(refs) => format!("{}\n\nReferences: {}", self.answer, refs),
            Err(_) => self.answer.clone(),
        }
    }
}
