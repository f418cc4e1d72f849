/// Error taxonomy for the action-protocol core.
///
/// Per-action errors (`ValidationError`, `ExecutionError`) are carried inside an
/// `ExecutionOutcome` and never abort a batch. A `CollaboratorError` aborts only
/// the turn that raised it; a `StorageError` while saving a turn is a warning.
use std::path::PathBuf;

use thiserror::Error;

// ── Storage ───────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("cannot read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot encode conversation: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("chat '{0}' is a default chat and cannot be removed")]
    ProtectedChat(String),

    #[error("chat '{0}' not found")]
    ChatNotFound(String),

    #[error("chat '{0}' already exists")]
    ChatExists(String),

    #[error("invalid chat name '{0}'")]
    InvalidChatName(String),
}

// ── Reply parsing ─────────────────────────────────────────────────────────────

/// A reply that has a bracketed span which does not decode as an action list.
/// A reply with no bracketed span at all is not an error (see `Extracted::Commentary`).
#[derive(Debug, Error, PartialEq)]
pub enum ParseError {
    #[error("malformed action list: {0}")]
    Malformed(String),
}

// ── Action validation ─────────────────────────────────────────────────────────

#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("invalid or empty file path")]
    EmptyPath,

    #[error("no content provided for {0}")]
    MissingContent(String),

    #[error("source or destination path is empty")]
    MissingMovePath,

    #[error("empty terminal command")]
    EmptyCommand,

    #[error("unknown action type '{0}'")]
    UnknownActionType(String),

    #[error("path '{0}' resolves outside the project root")]
    OutsideProject(String),
}

// ── Action execution ──────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("{op} {path}: {source}")]
    Io {
        op: &'static str,
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{0} does not exist")]
    Missing(String),

    #[error("failed to run '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("'{command}' failed with exit code {code}")]
    NonZeroExit { command: String, code: i32 },

    #[error("'{command}' was terminated by a signal")]
    Terminated { command: String },
}

impl ExecutionError {
    pub fn io(op: &'static str, path: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            op,
            path: path.into(),
            source,
        }
    }

    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Self::NonZeroExit { code, .. } => Some(*code),
            _ => None,
        }
    }
}

// ── Model collaborator ────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum CollaboratorError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("API error {status}: {body}")]
    Api { status: u16, body: String },

    #[error("model returned an empty response")]
    EmptyResponse,
}

// ── Turn ──────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum TurnError {
    #[error("model call failed: {0}")]
    Collaborator(#[from] CollaboratorError),
}
