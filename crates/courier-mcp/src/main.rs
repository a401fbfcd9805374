use courier_chat::engine::Engine;
use courier_chat::navigator::NavigatorClient;
use courier_chat::prompt;
use courier_core::{
    ChatIdentity, Config, Sender, ENV_API_KEY, ENV_MODEL, ENV_NAVIGATOR_URL, ENV_PROVIDER,
};
use rmcp::{
    handler::server::{router::tool::ToolRouter, wrapper::Parameters},
    model::{CallToolResult, Content, ServerCapabilities, ServerInfo},
    schemars, tool, tool_handler, tool_router, ErrorData as McpError, ServerHandler, ServiceExt,
};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Check that a string is UUID-shaped: five dash-separated hex groups,
/// 8-4-4-4-12.
fn is_uuid(s: &str) -> bool {
    if s.len() != 36 {
        return false;
    }
    s.char_indices().all(|(i, c)| match i {
        8 | 13 | 18 | 23 => c == '-',
        _ => c.is_ascii_hexdigit(),
    })
}

fn validate_prompt(prompt: &str) -> Result<(), McpError> {
    if prompt.trim().is_empty() {
        return Err(McpError::invalid_params(
            "prompt must be a non-empty string",
            None,
        ));
    }
    Ok(())
}

fn validate_uuid(value: &str, label: &str) -> Result<(), McpError> {
    if !is_uuid(value) {
        return Err(McpError::invalid_params(
            format!("{} '{}' must be a UUID (8-4-4-4-12 hex groups)", label, value),
            None,
        ));
    }
    Ok(())
}

fn validate_query(req: &QueryRequest) -> Result<(), McpError> {
    validate_prompt(&req.prompt)?;
    if let Some(app) = &req.application_id {
        validate_uuid(app, "application_id")?;
    }
    if let Some(user) = &req.user_id {
        validate_uuid(user, "user_id")?;
    }
    if let Some(model_id) = req.model_id {
        if !(1..=32767).contains(&model_id) {
            return Err(McpError::invalid_params(
                format!("model_id {} must be between 1 and 32767", model_id),
                None,
            ));
        }
    }
    if let Some(sender_id) = &req.sender_id {
        if sender_id.trim().is_empty() {
            return Err(McpError::invalid_params("sender_id must not be blank", None));
        }
    }
    Ok(())
}

// --- Request types ---

#[derive(Debug, Deserialize, schemars::JsonSchema)]
struct AskRequest {
    /// Question or instruction for the generative model
    prompt: String,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
struct QueryRequest {
    /// Question or instruction to send to the navigator chat service
    prompt: String,
    /// UUID of the calling application
    application_id: Option<String>,
    /// Numeric id of the model that should answer, between 1 and 32767. Omit for the service default.
    model_id: Option<u16>,
    /// Who is sending the prompt: "user", "agent", or "service"
    sender: Option<Sender>,
    /// Identifier of the sending client, e.g. an editor instance name
    sender_id: Option<String>,
    /// UUID of the end user the prompt is sent on behalf of
    user_id: Option<String>,
}

impl QueryRequest {
    fn identity(&self) -> ChatIdentity {
        ChatIdentity {
            application_id: self.application_id.clone(),
            model_id: self.model_id,
            sender: self.sender,
            sender_id: self.sender_id.clone(),
            user_id: self.user_id.clone(),
        }
    }
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
struct CommitMessageRequest {
    /// Summary of the staged changes: a diff excerpt or a short description
    prompt: String,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
struct RagQueryRequest {
    /// Question to answer from the indexed knowledge base
    prompt: String,
}

// --- Server ---

#[derive(Clone)]
pub struct CourierServer {
    engine: Engine,
    navigator: NavigatorClient,
    tool_router: ToolRouter<Self>,
}

#[tool_router]
impl CourierServer {
    pub fn new(config: Config) -> Self {
        let navigator = NavigatorClient::new(config.navigator_url.clone());
        Self {
            engine: Engine::new(config),
            navigator,
            tool_router: Self::tool_router(),
        }
    }

    /// Log the failure and hand the host an empty result. The host reads an
    /// empty content sequence as "no answer produced"; the reason stays in
    /// the server log.
    fn failed(tool: &str, err: &str) -> CallToolResult {
        eprintln!("[courier-mcp] {} failed: {}", tool, err);
        CallToolResult::success(vec![])
    }

    #[tool(
        description = "Ask the configured generative model a free-form question. Returns the model's answer as one plain-text block, or an empty result if the model call failed."
    )]
    async fn ask(
        &self,
        Parameters(req): Parameters<AskRequest>,
    ) -> Result<CallToolResult, McpError> {
        validate_prompt(&req.prompt)?;
        match self.engine.generate(prompt::ASK_SYSTEM, &req.prompt).await {
            Ok(text) => Ok(CallToolResult::success(vec![Content::text(text)])),
            Err(e) => Ok(Self::failed("ask", &e)),
        }
    }

    #[tool(
        description = "Send a prompt to the internal navigator chat service, optionally tagged with caller identity (application UUID, model id, sender, user UUID). Returns the service's answer as one plain-text block, or an empty result if the exchange failed."
    )]
    async fn query(
        &self,
        Parameters(req): Parameters<QueryRequest>,
    ) -> Result<CallToolResult, McpError> {
        validate_query(&req)?;
        match self.navigator.ask(&req.prompt, &req.identity()).await {
            Ok(answer) => Ok(CallToolResult::success(vec![Content::text(answer.answer)])),
            Err(e) => Ok(Self::failed("query", &e)),
        }
    }

    #[tool(
        description = "Generate a git commit message for the given change summary. Pass a diff excerpt or a short description of the staged changes; the reply is the commit message only."
    )]
    async fn generate_commit_message(
        &self,
        Parameters(req): Parameters<CommitMessageRequest>,
    ) -> Result<CallToolResult, McpError> {
        validate_prompt(&req.prompt)?;
        let wrapped = prompt::commit_prompt(&req.prompt);
        match self.navigator.ask(&wrapped, &ChatIdentity::default()).await {
            Ok(answer) => Ok(CallToolResult::success(vec![Content::text(answer.answer)])),
            Err(e) => Ok(Self::failed("generate_commit_message", &e)),
        }
    }

    #[tool(
        description = "Answer a question from the indexed knowledge base. The reply is the answer followed by its supporting references serialized inline."
    )]
    async fn rag_query(
        &self,
        Parameters(req): Parameters<RagQueryRequest>,
    ) -> Result<CallToolResult, McpError> {
        validate_prompt(&req.prompt)?;
        match self.navigator.ask(&req.prompt, &ChatIdentity::default()).await {
            Ok(answer) => Ok(CallToolResult::success(vec![Content::text(answer.render())])),
            Err(e) => Ok(Self::failed("rag_query", &e)),
        }
    }
}

#[tool_handler]
impl ServerHandler for CourierServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            instructions: Some(INSTRUCTIONS.into()),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }
}

const INSTRUCTIONS: &str = r#"courier relays prompts from this session to the model backends configured for the project.

## Tools
- `ask`: one-shot question to the configured generative model. Use for quick, self-contained questions.
- `query`: prompt the internal navigator chat service. Accepts optional caller identity (application/user UUIDs, model id, sender tag) when the service routes by caller.
- `generate_commit_message`: turn a diff excerpt or change description into a commit message.
- `rag_query`: answer a question from the indexed knowledge base; the reply includes the supporting references inline.

## Failure behavior
A call that reaches a backend but fails there returns an empty result. Treat empty content as "no answer produced" and retry or rephrase; the failure reason is in the server's log.

## Configuration
The server reads COURIER_PROVIDER, COURIER_API_KEY, COURIER_MODEL, and COURIER_NAVIGATOR_URL from its environment at startup and refuses to start when a mandatory value is missing."#;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Handle `courier-mcp init` subcommand
    if std::env::args().nth(1).as_deref() == Some("init") {
        return init_project();
    }

    let config = Config::from_env().inspect_err(|e| eprintln!("[courier-mcp] {}", e))?;

    let service = CourierServer::new(config)
        .serve(rmcp::transport::io::stdio())
        .await
        .inspect_err(|e| eprintln!("MCP server error: {}", e))?;
    service.waiting().await?;
    Ok(())
}

/// Register courier in the MCP config of every host found on PATH, carrying
/// the server's environment configuration along so a session started from
/// the host sees the same values `init` was run under.
fn init_project() -> Result<(), Box<dyn std::error::Error>> {
    let binary = std::env::current_exe()?.canonicalize()?;
    let cwd = std::env::current_dir()?;

    let mut written: Vec<PathBuf> = Vec::new();
    if host_on_path("claude") {
        written.push(write_claude_config(&cwd, &binary)?);
    }
    if host_on_path("codex") {
        written.push(write_codex_config(&cwd, &binary)?);
    }

    if written.is_empty() {
        eprintln!("No MCP host found in PATH (looked for `claude` and `codex`).");
        eprintln!("Install one, then re-run `courier-mcp init`.");
        std::process::exit(1);
    }

    for path in &written {
        eprintln!("Wrote {}", path.display());
    }
    eprintln!(
        "\nThe {} entry is left blank; fill it in or export it in the host environment.",
        ENV_API_KEY
    );
    Ok(())
}

fn host_on_path(binary: &str) -> bool {
    let path = match std::env::var_os("PATH") {
        Some(p) => p,
        None => return false,
    };
    std::env::split_paths(&path).any(|dir| {
        ["", ".exe"]
            .iter()
            .any(|ext| dir.join(format!("{binary}{ext}")).is_file())
    })
}

/// The configuration block written into host config files. Values come from
/// the current environment; the API key is always left blank so the secret
/// never lands in a file that may be committed.
fn env_stanza() -> Vec<(&'static str, String)> {
    let read = |name: &str| std::env::var(name).unwrap_or_default();
    vec![
        (ENV_PROVIDER, read(ENV_PROVIDER)),
        (ENV_API_KEY, String::new()),
        (ENV_MODEL, read(ENV_MODEL)),
        (ENV_NAVIGATOR_URL, read(ENV_NAVIGATOR_URL)),
    ]
}

/// Merge a `courier` entry into the project's `.mcp.json` (Claude Code).
fn write_claude_config(cwd: &Path, binary: &Path) -> Result<PathBuf, Box<dyn std::error::Error>> {
    let path = cwd.join(".mcp.json");
    let mut root: serde_json::Value = match std::fs::read_to_string(&path) {
        Ok(contents) => serde_json::from_str(&contents).unwrap_or_else(|_| serde_json::json!({})),
        Err(_) => serde_json::json!({}),
    };

    let mut env = serde_json::Map::new();
    for (name, value) in env_stanza() {
        env.insert(name.to_string(), serde_json::Value::String(value));
    }

    if !root.get("mcpServers").is_some_and(|v| v.is_object()) {
        root["mcpServers"] = serde_json::json!({});
    }
    root["mcpServers"]["courier"] = serde_json::json!({
        "type": "stdio",
        "command": binary.to_string_lossy(),
        "args": [],
        "env": env,
    });

    std::fs::write(&path, serde_json::to_string_pretty(&root)?)?;
    Ok(path)
}

/// Merge a `courier` entry into `.codex/config.toml` (Codex).
fn write_codex_config(cwd: &Path, binary: &Path) -> Result<PathBuf, Box<dyn std::error::Error>> {
    let dir = cwd.join(".codex");
    let path = dir.join("config.toml");

    let mut doc: toml_edit::DocumentMut = std::fs::read_to_string(&path)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or_default();

    let mut env = toml_edit::Table::new();
    for (name, value) in env_stanza() {
        env.insert(name, toml_edit::value(value));
    }

    let mut server = toml_edit::Table::new();
    server.insert("command", toml_edit::value(binary.to_string_lossy().to_string()));
    server.insert("args", toml_edit::value(toml_edit::Array::new()));
    server.insert("env", toml_edit::Item::Table(env));

    if !doc.contains_table("mcp_servers") {
        doc["mcp_servers"] = toml_edit::Item::Table(toml_edit::Table::new());
    }
    doc["mcp_servers"]["courier"] = toml_edit::Item::Table(server);

    std::fs::create_dir_all(&dir)?;
    std::fs::write(&path, doc.to_string())?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::{Path, State};
    use axum::http::StatusCode;
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct MockNavigator {
        prompts: Arc<Mutex<HashMap<String, String>>>,
        // Conversation ids in the order they were issued and in the order
        // the answer endpoint saw them.
        initiated: Arc<Mutex<Vec<String>>>,
        fetched: Arc<Mutex<Vec<String>>>,
        fail_answers: bool,
    }

    impl MockNavigator {
        fn failing() -> Self {
            Self {
                fail_answers: true,
                ..Default::default()
            }
        }

        fn initiate_count(&self) -> usize {
            self.initiated.lock().unwrap().len()
        }
    }

    async fn initiate_handler(
        State(state): State<MockNavigator>,
        Json(body): Json<serde_json::Value>,
    ) -> Json<serde_json::Value> {
        let prompt = body["prompt"].as_str().unwrap_or_default().to_string();
        let mut initiated = state.initiated.lock().unwrap();
        let id = format!("c-{}", initiated.len() + 1);
        initiated.push(id.clone());
        state.prompts.lock().unwrap().insert(id.clone(), prompt);
        Json(serde_json::json!({ "conversationId": id }))
    }

    async fn answer_handler(
        State(state): State<MockNavigator>,
        Path(id): Path<String>,
    ) -> Result<Json<serde_json::Value>, StatusCode> {
        state.fetched.lock().unwrap().push(id.clone());
        if state.fail_answers {
            return Err(StatusCode::INTERNAL_SERVER_ERROR);
        }
        let prompts = state.prompts.lock().unwrap();
        match prompts.get(&id) {
            Some(prompt) => Ok(Json(serde_json::json!({
                "answer": format!("ECHO: {prompt}"),
                "references": [{ "id": 1 }],
            }))),
            None => Err(StatusCode::NOT_FOUND),
        }
    }

    async fn start_server(state: MockNavigator) -> CourierServer {
        let app = Router::new()
            .route("/api/conversations", post(initiate_handler))
            .route("/api/conversations/{id}/answer", get(answer_handler))
            .with_state(state);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        CourierServer::new(Config {
            provider: "openai".to_string(),
            api_key: "sk-test".to_string(),
            model: "test-model".to_string(),
            navigator_url: format!("http://{addr}"),
        })
    }

    fn query_request(prompt: &str) -> QueryRequest {
        QueryRequest {
            prompt: prompt.to_string(),
            application_id: None,
            model_id: None,
            sender: None,
            sender_id: None,
            user_id: None,
        }
    }

    // Inspect results through their wire form rather than the library's
    // accessor surface.
    fn content_blocks(result: &CallToolResult) -> Vec<serde_json::Value> {
        serde_json::to_value(result).unwrap()["content"]
            .as_array()
            .cloned()
            .unwrap_or_default()
    }

    fn first_text(result: &CallToolResult) -> String {
        content_blocks(result)
            .first()
            .and_then(|c| c["text"].as_str())
            .unwrap_or_default()
            .to_string()
    }

    #[test]
    fn uuid_shapes() {
        assert!(is_uuid("7f4df47e-9a67-4d22-8f3a-1c2b3d4e5f60"));
        assert!(is_uuid("00000000-0000-0000-0000-000000000000"));
        assert!(!is_uuid("7f4df47e9a674d228f3a1c2b3d4e5f60"));
        assert!(!is_uuid("7f4df47e-9a67-4d22-8f3a-1c2b3d4e5f6"));
        assert!(!is_uuid("zf4df47e-9a67-4d22-8f3a-1c2b3d4e5f60"));
        assert!(!is_uuid(""));
    }

    #[test]
    fn env_stanza_never_copies_the_api_key() {
        std::env::set_var(ENV_API_KEY, "sk-secret");
        std::env::set_var(ENV_MODEL, "gpt-test");
        let stanza = env_stanza();
        let get = |name: &str| stanza.iter().find(|(n, _)| *n == name).unwrap().1.clone();
        assert_eq!(get(ENV_API_KEY), "");
        assert_eq!(get(ENV_MODEL), "gpt-test");
        std::env::remove_var(ENV_API_KEY);
        std::env::remove_var(ENV_MODEL);
    }

    #[tokio::test]
    async fn query_echoes_its_own_prompt() {
        let server = start_server(MockNavigator::default()).await;
        let result = server
            .query(Parameters(query_request("Summarize: hello world")))
            .await
            .unwrap();
        assert_eq!(content_blocks(&result).len(), 1);
        assert_eq!(first_text(&result), "ECHO: Summarize: hello world");
    }

    #[tokio::test]
    async fn rag_query_inlines_answer_and_references() {
        let server = start_server(MockNavigator::default()).await;
        let result = server
            .rag_query(Parameters(RagQueryRequest {
                prompt: "What is X?".to_string(),
            }))
            .await
            .unwrap();
        let text = first_text(&result);
        assert!(text.contains("ECHO: What is X?"), "got: {text}");
        assert!(text.contains(r#"[{"id":1}]"#), "got: {text}");
    }

    #[tokio::test]
    async fn fetch_reuses_the_initiated_session() {
        let state = MockNavigator::default();
        let server = start_server(state.clone()).await;

        server
            .query(Parameters(query_request("first")))
            .await
            .unwrap();
        server
            .generate_commit_message(Parameters(CommitMessageRequest {
                prompt: "add parser".to_string(),
            }))
            .await
            .unwrap();

        let initiated = state.initiated.lock().unwrap().clone();
        let fetched = state.fetched.lock().unwrap().clone();
        assert_eq!(initiated.len(), 2);
        assert_eq!(initiated, fetched);
    }

    #[tokio::test]
    async fn backend_failure_yields_empty_content() {
        let server = start_server(MockNavigator::failing()).await;
        let result = server
            .query(Parameters(query_request("anything")))
            .await
            .unwrap();
        assert!(content_blocks(&result).is_empty());
    }

    #[tokio::test]
    async fn invalid_arguments_never_reach_the_service() {
        let state = MockNavigator::default();
        let server = start_server(state.clone()).await;

        assert!(server.query(Parameters(query_request("   "))).await.is_err());

        let mut req = query_request("valid");
        req.application_id = Some("not-a-uuid".to_string());
        assert!(server.query(Parameters(req)).await.is_err());

        let mut req = query_request("valid");
        req.model_id = Some(0);
        assert!(server.query(Parameters(req)).await.is_err());

        let mut req = query_request("valid");
        req.user_id = Some("1234".to_string());
        assert!(server.query(Parameters(req)).await.is_err());

        let mut req = query_request("valid");
        req.sender_id = Some("  ".to_string());
        assert!(server.query(Parameters(req)).await.is_err());

        assert!(server
            .ask(Parameters(AskRequest {
                prompt: String::new()
            }))
            .await
            .is_err());
        assert!(server
            .rag_query(Parameters(RagQueryRequest {
                prompt: " ".to_string()
            }))
            .await
            .is_err());
        assert!(server
            .generate_commit_message(Parameters(CommitMessageRequest {
                prompt: String::new()
            }))
            .await
            .is_err());

        assert_eq!(state.initiate_count(), 0);
    }

    #[tokio::test]
    async fn concurrent_queries_do_not_cross_talk() {
        let server = start_server(MockNavigator::default()).await;
        let (a, b) = tokio::join!(
            server.query(Parameters(query_request("alpha"))),
            server.query(Parameters(query_request("beta"))),
        );
        assert_eq!(first_text(&a.unwrap()), "ECHO: alpha");
        assert_eq!(first_text(&b.unwrap()), "ECHO: beta");
    }

    #[tokio::test]
    async fn commit_message_prompt_carries_the_change_summary() {
        let state = MockNavigator::default();
        let server = start_server(state.clone()).await;
        server
            .generate_commit_message(Parameters(CommitMessageRequest {
                prompt: "switch parser to nom".to_string(),
            }))
            .await
            .unwrap();

        let prompts = state.prompts.lock().unwrap();
        let sent = prompts.values().next().unwrap();
        assert!(sent.contains("switch parser to nom"), "got: {sent}");
        assert!(sent.contains("commit message"), "got: {sent}");
    }

    #[tokio::test]
    async fn identity_rides_along_on_query() {
        let state = MockNavigator::default();
        let server = start_server(state.clone()).await;
        let mut req = query_request("hello");
        req.application_id = Some("7f4df47e-9a67-4d22-8f3a-1c2b3d4e5f60".to_string());
        req.model_id = Some(7);
        req.sender = Some(Sender::Agent);
        server.query(Parameters(req)).await.unwrap();
        assert_eq!(state.initiate_count(), 1);
    }
}
