use std::path::PathBuf;

/// Errors related to configuration loading and parsing.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse config at {path}: {message}")]
    ParseError { path: PathBuf, message: String },

    #[error("Invalid config value for `{key}`: {message}")]
    InvalidValue { key: String, message: String },
}

/// Errors related to safety guardrails (command filtering, workspace enforcement).
#[derive(Debug, thiserror::Error)]
pub enum GuardrailError {
    #[error("Command blocked: `{command}` - {reason}")]
    CommandBlocked { command: String, reason: String },

    #[error("Path outside workspace: `{path}` is not within `{workspace}`")]
    PathOutsideWorkspace { path: PathBuf, workspace: PathBuf },
}

/// Errors related to shell command execution.
#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    #[error("Failed to spawn shell process: {0}")]
    SpawnFailed(String),

    #[error("Process execution failed: {0}")]
    ProcessFailed(String),
}

/// Failures reported by the model-call collaborator.
///
/// Always recoverable from the loop's point of view, up to the configured
/// consecutive-failure ceiling.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    #[error("model request failed: {0}")]
    Request(String),

    #[error("model request timed out after {0}s")]
    Timeout(u64),

    #[error("model returned an empty reply")]
    EmptyReply,
}

/// Errors raised by individual command handlers. Dispatch converts every
/// variant into a failed `ExecutionResult`.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("missing or invalid '{0}' argument")]
    MissingArgument(&'static str),

    #[error("{0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Guardrail(#[from] GuardrailError),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("{0}")]
    Failed(String),
}

/// Errors related to the agent loop and its subsystems.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("Ollama not reachable at {url}: {message}")]
    OllamaUnavailable { url: String, message: String },

    #[error("Model '{model}' not available in Ollama: {message}")]
    ModelNotAvailable { model: String, message: String },

    #[error("Console error: {0}")]
    Console(#[from] std::io::Error),

    #[error("Session logging error: {0}")]
    LoggingError(String),
}
