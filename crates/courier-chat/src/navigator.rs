use serde::{Deserialize, Serialize};

use courier_core::{ChatAnswer, ChatIdentity};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InitiateRequest<'a> {
    prompt: &'a str,
    #[serde(flatten)]
    identity: ChatIdentity,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InitiateResponse {
    conversation_id: String,
}

/// Client for the internal navigator chat API. A conversation is opened with
/// a prompt, then its resolved answer is fetched in a second call using the
/// session identifier the open returned.
#[derive(Clone)]
pub struct NavigatorClient {
    client: reqwest::Client,
    base_url: String,
}

impl NavigatorClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    /// Open a conversation for the prompt. Returns the session identifier the
    /// service expects on the paired fetch call.
    pub async fn initiate(&self, prompt: &str, identity: &ChatIdentity) -> Result<String, String> {
        let body = InitiateRequest {
            prompt,
            identity: identity.clone(),
        };
        let resp = self
            .client
            .post(format!("{}/api/conversations", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(|e| format!("initiate request: {e}"))?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| format!("initiate body: {e}"))?;
        if !status.is_success() {
            return Err(format!("initiate returned {}: {}", status.as_u16(), text));
        }

        let parsed: InitiateResponse =
            serde_json::from_str(&text).map_err(|e| format!("initiate response parse: {e}"))?;
        Ok(parsed.conversation_id)
    }

    /// Fetch the resolved answer for a conversation opened by `initiate`.
    pub async fn fetch(&self, conversation_id: &str) -> Result<ChatAnswer, String> {
        let resp = self
            .client
            .get(format!(
                "{}/api/conversations/{}/answer",
                self.base_url, conversation_id
            ))
            .send()
            .await
            .map_err(|e| format!("fetch request: {e}"))?;

        let status = resp.status();
        let text = resp.text().await.map_err(|e| format!("fetch body: {e}"))?;
        if !status.is_success() {
            return Err(format!("fetch returned {}: {}", status.as_u16(), text));
        }

        serde_json::from_str(&text).map_err(|e| format!("fetch response parse: {e}"))
    }

    /// The full two-step exchange. The fetch leg uses exactly the session
    /// identifier the initiate leg returned; neither leg is retried.
    pub async fn ask(&self, prompt: &str, identity: &ChatIdentity) -> Result<ChatAnswer, String> {
        let conversation_id = self.initiate(prompt, identity).await?;
        self.fetch(&conversation_id).await
    }
}
