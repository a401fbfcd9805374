use llm::builder::{LLMBackend, LLMBuilder};
use llm::chat::ChatMessage;

use courier_core::{Config, ENV_PROVIDER};

/// Providers the engine can be pointed at via `COURIER_PROVIDER`.
const PROVIDERS: &[(&str, LLMBackend)] = &[
    ("openai", LLMBackend::OpenAI),
    ("anthropic", LLMBackend::Anthropic),
    ("google", LLMBackend::Google),
    ("ollama", LLMBackend::Ollama),
    ("groq", LLMBackend::Groq),
    ("mistral", LLMBackend::Mistral),
    ("deepseek", LLMBackend::DeepSeek),
];

/// One-shot text generation against the configured provider. Holds no state
/// between calls; every invocation builds a fresh client from the same
/// immutable configuration.
#[derive(Clone)]
pub struct Engine {
    config: Config,
}

impl Engine {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    fn backend(&self) -> Result<LLMBackend, String> {
        let provider = self.config.provider.as_str();
        PROVIDERS
            .iter()
            .find(|(name, _)| *name == provider)
            .map(|(_, backend)| backend.clone())
            .ok_or_else(|| {
                let known: Vec<&str> = PROVIDERS.iter().map(|(name, _)| *name).collect();
                format!(
                    "unsupported provider '{}' in {} (known: {})",
                    provider,
                    ENV_PROVIDER,
                    known.join(", ")
                )
            })
    }

    /// Send one user message under the given system prompt and return the
    /// model text. Blank output is reported as a failure so the caller never
    /// relays an empty answer as success.
    pub async fn generate(&self, system: &str, user_msg: &str) -> Result<String, String> {
        let mut builder = LLMBuilder::new()
            .backend(self.backend()?)
            .model(&self.config.model)
            .system(system);
        // Local backends run without a key; everything else got one at startup.
        if !self.config.api_key.is_empty() {
            builder = builder.api_key(&self.config.api_key);
        }
        let client = builder
            .build()
            .map_err(|e| format!("provider setup: {e}"))?;

        let turn = [ChatMessage::user().content(user_msg).build()];
        let reply = client
            .chat(&turn)
            .await
            .map_err(|e| format!("{} call: {e}", self.config.provider))?;

        match reply.text() {
            Some(text) if !text.trim().is_empty() => Ok(text),
            _ => Err(format!("{} returned no text", self.config.provider)),
        }
    }
}
