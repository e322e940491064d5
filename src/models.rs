use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Which family of CLI a given agent was launched against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    Claude,
    Gemini,
    Synthetic,
}

impl AgentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Claude => "claude",
            Self::Gemini => "gemini",
            Self::Synthetic => "synthetic",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "claude" | "claude-code" => Some(Self::Claude),
            "gemini" | "gemini-cli" => Some(Self::Gemini),
            "synthetic" => Some(Self::Synthetic),
            _ => None,
        }
    }
}

/// An agent's lifecycle position. Transitions are validated by
/// `AgentStatus::can_transition_to` before a save is allowed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Initializing,
    Running,
    Paused,
    Completed,
    Failed,
    Terminated,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initializing => "initializing",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Terminated => "terminated",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "initializing" => Some(Self::Initializing),
            "running" => Some(Self::Running),
            "paused" => Some(Self::Paused),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "terminated" => Some(Self::Terminated),
            _ => None,
        }
    }

    /// Whether moving from `self` to `next` is a lawful transition (§3).
    pub fn can_transition_to(&self, next: AgentStatus) -> bool {
        use AgentStatus::*;
        matches!(
            (self, next),
            (Initializing, Running)
                | (Initializing, Failed)
                | (Initializing, Terminated)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Terminated)
                | (Running, Paused)
                | (Paused, Running)
                | (Paused, Terminated)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Terminated)
    }
}

/// Auxiliary-tool server configuration for `configuration.mcp` (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpServerConfig {
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: std::collections::HashMap<String, String>,
    pub transport: McpTransport,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum McpTransport {
    Stdio,
    Http,
    Sse,
}

/// The recognized launch-time options from §3's Configuration table.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Configuration {
    #[serde(default, rename = "sessionId", skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, rename = "outputFormat", skip_serializing_if = "Option::is_none")]
    pub output_format: Option<String>,
    #[serde(default, rename = "customArgs", skip_serializing_if = "Vec::is_empty")]
    pub custom_args: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
    #[serde(default, rename = "allowedTools", skip_serializing_if = "Vec::is_empty")]
    pub allowed_tools: Vec<String>,
    #[serde(default, rename = "disallowedTools", skip_serializing_if = "Vec::is_empty")]
    pub disallowed_tools: Vec<String>,
    #[serde(default, rename = "workingDirectory", skip_serializing_if = "Option::is_none")]
    pub working_directory: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    #[serde(default, rename = "conversationName", skip_serializing_if = "Option::is_none")]
    pub conversation_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mcp: Option<Vec<McpServerConfig>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

#[derive(Debug)]
pub enum ConfigurationError {
    ConversationNameTooLong,
    ConversationNameEmptyAfterTrim,
    InstructionsTooLong,
}

impl std::fmt::Display for ConfigurationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ConversationNameTooLong => {
                write!(f, "conversationName exceeds 100 characters after trim")
            }
            Self::ConversationNameEmptyAfterTrim => {
                write!(f, "conversationName is empty after trim")
            }
            Self::InstructionsTooLong => write!(f, "instructions exceeds 100000 characters"),
        }
    }
}

impl Configuration {
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if let Some(name) = &self.conversation_name {
            let trimmed = name.trim();
            if trimmed.is_empty() {
                return Err(ConfigurationError::ConversationNameEmptyAfterTrim);
            }
            if trimmed.chars().count() > 100 {
                return Err(ConfigurationError::ConversationNameTooLong);
            }
        }
        if let Some(instructions) = &self.instructions {
            if instructions.chars().count() > 100_000 {
                return Err(ConfigurationError::InstructionsTooLong);
            }
        }
        Ok(())
    }
}

/// The unit of work: one run of an external CLI on behalf of a prompt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: String,
    pub kind: AgentKind,
    pub prompt: String,
    pub configuration: Configuration,
    pub status: AgentStatus,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Agent {
    pub fn new(kind: AgentKind, prompt: impl Into<String>, configuration: Configuration) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind,
            prompt: prompt.into(),
            configuration,
            status: AgentStatus::Initializing,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }
}

/// The six message kinds an agent's timeline can carry (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    User,
    Assistant,
    System,
    Tool,
    Response,
    Error,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
            Self::Tool => "tool",
            Self::Response => "response",
            Self::Error => "error",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "user" => Some(Self::User),
            "assistant" => Some(Self::Assistant),
            "system" => Some(Self::System),
            "tool" => Some(Self::Tool),
            "response" => Some(Self::Response),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

/// One immutable event on an agent's timeline. Assigned `id`, `sequence_number`
/// and `created_at` are set by the Message Store at insert time, never by the
/// caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub agent_id: String,
    pub sequence_number: i64,
    pub kind: MessageKind,
    pub role: Option<String>,
    pub content: String,
    pub raw: Option<String>,
    pub metadata: Option<Value>,
    pub created_at: DateTime<Utc>,
}

/// Parameters accepted by `MessageStore::save_message`; the store fills in
/// `id`, `sequence_number` and `created_at`.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub agent_id: String,
    pub kind: MessageKind,
    pub role: Option<String>,
    pub content: String,
    pub raw: Option<String>,
    pub metadata: Option<Value>,
}

/// The on-disk single-instance marker (§3, §4.9).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessLock {
    pub pid: u32,
    pub port: u16,
    pub version: String,
    pub started_at: DateTime<Utc>,
    pub instance_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_transitions_follow_the_state_machine() {
        assert!(AgentStatus::Initializing.can_transition_to(AgentStatus::Running));
        assert!(AgentStatus::Running.can_transition_to(AgentStatus::Paused));
        assert!(AgentStatus::Paused.can_transition_to(AgentStatus::Running));
        assert!(!AgentStatus::Completed.can_transition_to(AgentStatus::Running));
        assert!(!AgentStatus::Initializing.can_transition_to(AgentStatus::Completed));
    }

    #[test]
    fn conversation_name_boundary_is_exactly_100_chars_after_trim() {
        let mut config = Configuration::default();
        config.conversation_name = Some("a".repeat(100));
        assert!(config.validate().is_ok());

        config.conversation_name = Some("a".repeat(101));
        assert!(config.validate().is_err());
    }

    #[test]
    fn conversation_name_empty_after_trim_is_rejected() {
        let mut config = Configuration::default();
        config.conversation_name = Some("   ".to_string());
        assert!(matches!(
            config.validate(),
            Err(ConfigurationError::ConversationNameEmptyAfterTrim)
        ));
    }

    #[test]
    fn instructions_boundary_is_exactly_100000_chars() {
        let mut config = Configuration::default();
        config.instructions = Some("x".repeat(100_000));
        assert!(config.validate().is_ok());
        config.instructions = Some("x".repeat(100_001));
        assert!(config.validate().is_err());
    }

    #[test]
    fn agent_kind_parses_provider_aliases() {
        assert_eq!(AgentKind::parse("claude-code"), Some(AgentKind::Claude));
        assert_eq!(AgentKind::parse("gemini-cli"), Some(AgentKind::Gemini));
        assert_eq!(AgentKind::parse("bogus"), None);
    }
}
