//! Domain error taxonomy (§7). Plain enums with manual `Display`, matching
//! `agents::AdapterError` in shape — no `anyhow`, no boxed trait objects.

use std::fmt;

/// Failures the Message Store and Agent Repository can produce.
#[derive(Debug)]
pub enum StoreError {
    ForeignKey(String),
    Invalid(String),
    NotFound(String),
    Sqlite(rusqlite::Error),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ForeignKey(s) => write!(f, "foreign-key violation: {s}"),
            Self::Invalid(s) => write!(f, "invalid: {s}"),
            Self::NotFound(s) => write!(f, "not found: {s}"),
            Self::Sqlite(e) => write!(f, "store error: {e}"),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<rusqlite::Error> for StoreError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sqlite(value)
    }
}

/// Failures from spawning or controlling a child process.
#[derive(Debug)]
pub enum ProcessError {
    SpawnFailed(String),
    NotRunning(String),
    Io(std::io::Error),
}

impl fmt::Display for ProcessError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SpawnFailed(s) => write!(f, "spawn failed: {s}"),
            Self::NotRunning(s) => write!(f, "process not running: {s}"),
            Self::Io(e) => write!(f, "io error: {e}"),
        }
    }
}

impl std::error::Error for ProcessError {}

impl From<std::io::Error> for ProcessError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

/// Parser failures are always local (§7); this type exists for completeness
/// of the `line -> Message | skip | fail` contract in §4.4.
#[derive(Debug)]
pub enum ParseError {
    InvalidJson(String),
    MissingField(&'static str),
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidJson(s) => write!(f, "invalid-json: {s}"),
            Self::MissingField(s) => write!(f, "missing field: {s}"),
        }
    }
}

impl std::error::Error for ParseError {}

/// Failures from the Runner Adapter layer (§4.5).
#[derive(Debug)]
pub enum RunnerError {
    UnknownProvider(String),
    SpawnFailed(String),
    NotFound(String),
    Other(String),
}

impl fmt::Display for RunnerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownProvider(s) => write!(f, "unknown provider kind: {s}"),
            Self::SpawnFailed(s) => write!(f, "spawn failed: {s}"),
            Self::NotFound(s) => write!(f, "agent not found: {s}"),
            Self::Other(s) => write!(f, "{s}"),
        }
    }
}

impl std::error::Error for RunnerError {}

/// Domain-rule violations (§7): bad requests, never recovered.
#[derive(Debug)]
pub enum DomainError {
    EmptyPrompt,
    InvalidTransition { from: &'static str, to: &'static str },
    InvalidConfiguration(String),
    MissingAgentType,
}

impl fmt::Display for DomainError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyPrompt => write!(f, "prompt must not be empty"),
            Self::InvalidTransition { from, to } => {
                write!(f, "invalid status transition: {from} -> {to}")
            }
            Self::InvalidConfiguration(s) => write!(f, "invalid configuration: {s}"),
            Self::MissingAgentType => write!(f, "missing agent type"),
        }
    }
}

impl std::error::Error for DomainError {}

/// Instance-lock failures (§4.9, §7).
#[derive(Debug)]
pub enum LockError {
    AlreadyRunning { pid: u32, instance_id: String },
    Io(std::io::Error),
    Corrupt(String),
}

impl fmt::Display for LockError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyRunning { pid, instance_id } => {
                write!(f, "already-running: pid={pid} instance={instance_id}")
            }
            Self::Io(e) => write!(f, "lock io error: {e}"),
            Self::Corrupt(s) => write!(f, "corrupt lock file: {s}"),
        }
    }
}

impl std::error::Error for LockError {}

impl From<std::io::Error> for LockError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

/// Launch Queue failures (§4.7).
#[derive(Debug)]
pub enum QueueError {
    Cancelled,
}

impl fmt::Display for QueueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl std::error::Error for QueueError {}

/// The top-level error a launch can fail with, spanning the taxonomy above.
#[derive(Debug)]
pub enum OrchestrationError {
    Domain(DomainError),
    Store(StoreError),
    Runner(RunnerError),
    Queue(QueueError),
}

impl fmt::Display for OrchestrationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Domain(e) => write!(f, "{e}"),
            Self::Store(e) => write!(f, "{e}"),
            Self::Runner(e) => write!(f, "{e}"),
            Self::Queue(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for OrchestrationError {}

impl From<DomainError> for OrchestrationError {
    fn from(value: DomainError) -> Self {
        Self::Domain(value)
    }
}

impl From<StoreError> for OrchestrationError {
    fn from(value: StoreError) -> Self {
        Self::Store(value)
    }
}

impl From<RunnerError> for OrchestrationError {
    fn from(value: RunnerError) -> Self {
        Self::Runner(value)
    }
}

impl From<QueueError> for OrchestrationError {
    fn from(value: QueueError) -> Self {
        Self::Queue(value)
    }
}
