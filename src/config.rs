//! Configuration management for mcp-chat
//!
//! The configuration file is a JSON5 document describing the LLM to talk to,
//! the MCP servers to launch or connect to, and a list of example queries.
//! String values may reference environment variables as `${VAR}`; every
//! reference must resolve or loading fails.

use crate::error::{ChatError, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use url::Url;

/// Default configuration file name, resolved against the working directory
pub const DEFAULT_CONFIG_FILE: &str = "llm_mcp_config.json5";

/// Providers understood by [`crate::providers::create_provider`]
pub const SUPPORTED_PROVIDERS: &[&str] = &["openai", "anthropic", "ollama"];

/// Main configuration structure for mcp-chat
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// LLM provider configuration
    pub llm: LlmConfig,

    /// MCP servers keyed by name, in file order
    #[serde(with = "ordered_servers")]
    pub mcp_servers: Vec<(String, McpServerConfig)>,

    /// Queries offered at the prompt when the user just presses Enter
    #[serde(default)]
    pub example_queries: Vec<String>,

    /// Agent loop limits
    #[serde(default)]
    pub agent: AgentConfig,
}

/// LLM provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Provider name (`openai`, `anthropic`, `ollama`)
    pub model_provider: String,

    /// Model name; the provider default is used when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Sampling temperature
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    /// Upper bound on generated tokens per completion
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Prepended to every conversation as a system message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,

    /// Override of the provider API endpoint (useful for proxies and tests)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    /// API key; falls back to the provider's environment variable
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

impl LlmConfig {
    /// Lower-cased provider name
    pub fn provider_name(&self) -> String {
        self.model_provider.trim().to_lowercase()
    }

    /// Pretty JSON of this section with the API key masked, for logging
    pub fn redacted_json(&self) -> String {
        let mut redacted = self.clone();
        if redacted.api_key.is_some() {
            redacted.api_key = Some("***".to_string());
        }
        serde_json::to_string_pretty(&redacted).unwrap_or_else(|_| format!("{:?}", redacted))
    }
}

/// A single entry under `mcp_servers`
///
/// Local servers set `command` (plus optional `args`, `env`, `cwd`); remote
/// servers set `url` (plus optional `type` and `headers`). Use
/// [`McpServerConfig::transport`] to get the validated form.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct McpServerConfig {
    /// Executable to spawn
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,

    /// Arguments passed to `command`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,

    /// Environment for the child process
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub env: HashMap<String, String>,

    /// Working directory for the child process
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<PathBuf>,

    /// Remote server endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Remote transport kind (`http`, `sse`, `ws`)
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub transport_type: Option<String>,

    /// Extra request headers for remote servers (e.g. `Authorization`)
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, String>,
}

/// Validated launch or connection descriptor for one MCP server
#[derive(Debug, Clone, PartialEq)]
pub enum ServerTransport {
    /// Child process speaking newline-delimited JSON over stdio
    Stdio {
        /// Executable
        command: String,
        /// Arguments
        args: Vec<String>,
        /// Environment (the parent `PATH` is added by the transport when absent)
        env: HashMap<String, String>,
        /// Working directory
        cwd: Option<PathBuf>,
    },
    /// Streamable HTTP (`POST` + optional SSE response bodies)
    StreamableHttp {
        /// Endpoint
        url: Url,
        /// Extra headers
        headers: HashMap<String, String>,
    },
    /// Legacy HTTP+SSE (`GET` event stream, `POST` to the announced endpoint)
    Sse {
        /// Event stream URL
        url: Url,
        /// Extra headers
        headers: HashMap<String, String>,
    },
    /// WebSocket, one JSON-RPC message per text frame
    WebSocket {
        /// Endpoint
        url: Url,
        /// Extra headers
        headers: HashMap<String, String>,
    },
}

impl ServerTransport {
    /// Short transport label used in log lines
    pub fn kind(&self) -> &'static str {
        match self {
            ServerTransport::Stdio { .. } => "stdio",
            ServerTransport::StreamableHttp { .. } => "http",
            ServerTransport::Sse { .. } => "sse",
            ServerTransport::WebSocket { .. } => "ws",
        }
    }
}

impl fmt::Display for ServerTransport {
    /// Renders the descriptor without environment or header values, which
    /// commonly hold secrets.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerTransport::Stdio {
                command, args, env, ..
            } => {
                write!(f, "{}", command)?;
                for arg in args {
                    write!(f, " {}", arg)?;
                }
                if !env.is_empty() {
                    let mut keys: Vec<&str> = env.keys().map(String::as_str).collect();
                    keys.sort_unstable();
                    write!(f, " (env: {})", keys.join(", "))?;
                }
                Ok(())
            }
            ServerTransport::StreamableHttp { url, headers }
            | ServerTransport::Sse { url, headers }
            | ServerTransport::WebSocket { url, headers } => {
                write!(f, "{} [{}]", url, self.kind())?;
                if !headers.is_empty() {
                    let mut keys: Vec<&str> = headers.keys().map(String::as_str).collect();
                    keys.sort_unstable();
                    write!(f, " (headers: {})", keys.join(", "))?;
                }
                Ok(())
            }
        }
    }
}

impl McpServerConfig {
    /// Classify and validate this entry
    ///
    /// # Errors
    ///
    /// Returns a message describing the problem; callers prefix it with the
    /// server name.
    pub fn transport(&self) -> std::result::Result<ServerTransport, String> {
        match (&self.command, &self.url) {
            (Some(_), Some(_)) => Err("set either `command` or `url`, not both".to_string()),
            (None, None) => Err("one of `command` or `url` is required".to_string()),
            (Some(command), None) => {
                if command.trim().is_empty() {
                    return Err("`command` cannot be empty".to_string());
                }
                if self.transport_type.is_some() {
                    return Err("`type` is only valid together with `url`".to_string());
                }
                Ok(ServerTransport::Stdio {
                    command: command.clone(),
                    args: self.args.clone(),
                    env: self.env.clone(),
                    cwd: self.cwd.clone(),
                })
            }
            (None, Some(raw_url)) => {
                let url = Url::parse(raw_url).map_err(|e| format!("invalid url {:?}: {}", raw_url, e))?;
                let scheme = url.scheme().to_string();
                let is_http = scheme == "http" || scheme == "https";
                let is_ws = scheme == "ws" || scheme == "wss";
                let headers = self.headers.clone();

                let kind = match self.transport_type.as_deref().map(str::to_lowercase) {
                    Some(kind) => kind,
                    None if is_ws => "ws".to_string(),
                    None if is_http => "http".to_string(),
                    None => return Err(format!("unsupported url scheme `{}`", scheme)),
                };

                match kind.as_str() {
                    "http" | "streamable_http" | "streamable-http" | "streamablehttp" => {
                        if !is_http {
                            return Err(format!("`{}` transport requires an http(s) url", kind));
                        }
                        Ok(ServerTransport::StreamableHttp { url, headers })
                    }
                    "sse" => {
                        if !is_http {
                            return Err("`sse` transport requires an http(s) url".to_string());
                        }
                        Ok(ServerTransport::Sse { url, headers })
                    }
                    "ws" | "websocket" => {
                        if !is_ws {
                            return Err(format!("`{}` transport requires a ws(s) url", kind));
                        }
                        Ok(ServerTransport::WebSocket { url, headers })
                    }
                    other => Err(format!(
                        "unknown transport type `{}` (expected http, sse or ws)",
                        other
                    )),
                }
            }
        }
    }
}

/// Agent behavior configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Maximum number of model calls per query
    #[serde(default = "default_max_turns")]
    pub max_turns: usize,

    /// Timeout for one query, tool calls included (seconds)
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,

    /// Tool output is truncated beyond this many bytes
    #[serde(default = "default_max_output")]
    pub max_tool_output_size: usize,
}

fn default_max_turns() -> usize {
    20
}

fn default_timeout() -> u64 {
    300
}

fn default_max_output() -> usize {
    65_536
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_turns: default_max_turns(),
            timeout_seconds: default_timeout(),
            max_tool_output_size: default_max_output(),
        }
    }
}

/// Replace every `${NAME}` in `text` with `lookup(NAME)`
///
/// `$NAME` without braces is left untouched.
///
/// # Errors
///
/// Returns [`ChatError::UnresolvedEnvVar`] for the first name `lookup`
/// cannot resolve.
pub fn substitute_env_vars<F>(text: &str, lookup: &F) -> Result<String>
where
    F: Fn(&str) -> Option<String>,
{
    let pattern = Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}")
        .map_err(|e| ChatError::Config(format!("Invalid env var pattern: {}", e)))?;
    let mut out = String::with_capacity(text.len());
    let mut last = 0;

    for caps in pattern.captures_iter(text) {
        let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let value = lookup(name.as_str())
            .ok_or_else(|| ChatError::UnresolvedEnvVar(name.as_str().to_string()))?;
        out.push_str(&text[last..whole.start()]);
        out.push_str(&value);
        last = whole.end();
    }

    out.push_str(&text[last..]);
    Ok(out)
}

/// Apply [`substitute_env_vars`] to every string value in a JSON tree
fn substitute_in_value<F>(value: &mut Value, lookup: &F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    match value {
        Value::String(s) => {
            if s.contains("${") {
                *s = substitute_env_vars(s, lookup)?;
            }
        }
        Value::Array(items) => {
            for item in items {
                substitute_in_value(item, lookup)?;
            }
        }
        Value::Object(map) => {
            for (_, item) in map.iter_mut() {
                substitute_in_value(item, lookup)?;
            }
        }
        _ => {}
    }
    Ok(())
}

impl Config {
    /// Load configuration from a JSON5 file
    ///
    /// Environment variables are read from the process environment, so the
    /// caller should load `.env` first.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::ConfigFileNotFound`] when `path` does not exist,
    /// or any error from [`Config::from_json5_str`].
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(ChatError::ConfigFileNotFound(path.display().to_string()).into());
        }

        let contents = std::fs::read_to_string(path).map_err(|e| {
            ChatError::Config(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;

        let config = Self::from_json5_str(&contents, &|name: &str| std::env::var(name).ok())?;
        tracing::debug!(
            "Loaded config from {}: {} MCP server(s), {} example query(ies)",
            path.display(),
            config.mcp_servers.len(),
            config.example_queries.len()
        );
        Ok(config)
    }

    /// Parse, substitute, deserialize and validate a JSON5 document
    ///
    /// Substitution runs on parsed string values, so `${VAR}` inside
    /// comments is ignored and substituted values never need escaping.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::Json5`] for syntax errors,
    /// [`ChatError::UnresolvedEnvVar`] for missing variables,
    /// [`ChatError::Config`] for missing or mistyped keys and
    /// [`ChatError::ConfigValidation`] for invalid values.
    pub fn from_json5_str<F>(contents: &str, lookup: &F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut raw: Value = json5::from_str(contents).map_err(ChatError::from)?;
        if !raw.is_object() {
            return Err(ChatError::Config("top level must be an object".to_string()).into());
        }
        substitute_in_value(&mut raw, lookup)?;

        let config: Config = serde_json::from_value(raw)
            .map_err(|e| ChatError::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::ConfigValidation`] naming the offending key.
    pub fn validate(&self) -> Result<()> {
        let provider = self.llm.provider_name();
        if provider.is_empty() {
            return Err(ChatError::ConfigValidation(
                "llm.model_provider cannot be empty".to_string(),
            )
            .into());
        }
        if !SUPPORTED_PROVIDERS.contains(&provider.as_str()) {
            return Err(ChatError::ConfigValidation(format!(
                "llm.model_provider: unsupported provider {}. Must be one of: {}",
                self.llm.model_provider,
                SUPPORTED_PROVIDERS.join(", ")
            ))
            .into());
        }

        if let Some(temperature) = self.llm.temperature {
            if !(0.0..=2.0).contains(&temperature) {
                return Err(ChatError::ConfigValidation(
                    "llm.temperature must be between 0.0 and 2.0".to_string(),
                )
                .into());
            }
        }

        if self.llm.max_tokens == Some(0) {
            return Err(ChatError::ConfigValidation(
                "llm.max_tokens must be greater than 0".to_string(),
            )
            .into());
        }

        if self.agent.max_turns == 0 {
            return Err(ChatError::ConfigValidation(
                "agent.max_turns must be greater than 0".to_string(),
            )
            .into());
        }

        if self.agent.max_turns > 1000 {
            return Err(ChatError::ConfigValidation(
                "agent.max_turns must be less than or equal to 1000".to_string(),
            )
            .into());
        }

        if self.agent.timeout_seconds == 0 {
            return Err(ChatError::ConfigValidation(
                "agent.timeout_seconds must be greater than 0".to_string(),
            )
            .into());
        }

        if self.agent.max_tool_output_size == 0 {
            return Err(ChatError::ConfigValidation(
                "agent.max_tool_output_size must be greater than 0".to_string(),
            )
            .into());
        }

        for (name, server) in &self.mcp_servers {
            if name.trim().is_empty() {
                return Err(ChatError::ConfigValidation(
                    "mcp_servers: server names cannot be empty".to_string(),
                )
                .into());
            }
            server.transport().map_err(|message| {
                ChatError::ConfigValidation(format!("mcp_servers.{}: {}", name, message))
            })?;
        }

        Ok(())
    }
}

/// (De)serializes `mcp_servers` as a JSON object while keeping file order
mod ordered_servers {
    use super::McpServerConfig;
    use serde::de::{MapAccess, Visitor};
    use serde::ser::SerializeMap;
    use serde::{Deserializer, Serializer};
    use std::fmt;

    type Entries = Vec<(String, McpServerConfig)>;

    pub fn serialize<S: Serializer>(entries: &Entries, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(entries.len()))?;
        for (name, server) in entries {
            map.serialize_entry(name, server)?;
        }
        map.end()
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Entries, D::Error> {
        struct EntriesVisitor;

        impl<'de> Visitor<'de> for EntriesVisitor {
            type Value = Entries;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of server name to server descriptor")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Entries, A::Error> {
                let mut entries: Entries = Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some((name, server)) = access.next_entry::<String, McpServerConfig>()? {
                    if let Some(slot) = entries.iter_mut().find(|entry| entry.0 == name) {
                        slot.1 = server;
                    } else {
                        entries.push((name, server));
                    }
                }
                Ok(entries)
            }
        }

        deserializer.deserialize_map(EntriesVisitor)
    }
}
