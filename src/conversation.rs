/// Conversation persistence.
///
/// Each (project, chat-name) pair owns one JSON file at
/// `<data_dir>/chats/<project>/<chat>.json` holding the full ordered message
/// history, pretty-printed with 4-space indentation. The file is rewritten after
/// every completed exchange so a restart resumes exactly where the last
/// successful turn left off.
///
/// Older installs kept a single `chats/chat_<project>.json` per project and
/// stored messages as `{"role", "content"}`; both are upgraded on read.
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::StorageError;

/// Name of the chat every project starts in.
pub const MAIN_CHAT: &str = "main";

// ── Messages ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    #[serde(alias = "assistant")]
    Model,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ContentPart {
    Text { text: String },
    InlineBinary { inline_data: InlineData },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InlineData {
    pub mime_type: String,
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
}

impl ContentPart {
    pub fn text(text: impl Into<String>) -> Self {
        ContentPart::Text { text: text.into() }
    }

    pub fn inline_binary(mime_type: impl Into<String>, data: Vec<u8>) -> Self {
        ContentPart::InlineBinary {
            inline_data: InlineData {
                mime_type: mime_type.into(),
                data,
            },
        }
    }
}

/// One entry of the history. Field order matches the on-disk layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub parts: Vec<ContentPart>,
    pub role: Role,
}

impl ConversationMessage {
    pub fn user_text(text: impl Into<String>) -> Self {
        Self {
            parts: vec![ContentPart::text(text)],
            role: Role::User,
        }
    }

    pub fn model_text(text: impl Into<String>) -> Self {
        Self {
            parts: vec![ContentPart::text(text)],
            role: Role::Model,
        }
    }

    /// All text parts joined with newlines; binary parts are skipped.
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|p| match p {
                ContentPart::Text { text } => Some(text.as_str()),
                ContentPart::InlineBinary { .. } => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn has_inline_binary(&self) -> bool {
        self.parts
            .iter()
            .any(|p| matches!(p, ContentPart::InlineBinary { .. }))
    }
}

/// Accepted shapes of a stored message. Legacy entries carry a flat `content` string.
#[derive(Deserialize)]
#[serde(untagged)]
enum StoredMessage {
    Current(ConversationMessage),
    Legacy { role: Role, content: String },
}

impl From<StoredMessage> for ConversationMessage {
    fn from(stored: StoredMessage) -> Self {
        match stored {
            StoredMessage::Current(msg) => msg,
            StoredMessage::Legacy { role, content } => Self {
                parts: vec![ContentPart::text(content)],
                role,
            },
        }
    }
}

// ── Conversation ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct Conversation {
    pub project: String,
    pub chat_name: String,
    messages: Vec<ConversationMessage>,
    /// File this conversation is saved to
    pub path: PathBuf,
}

impl Conversation {
    pub fn messages(&self) -> &[ConversationMessage] {
        &self.messages
    }

    /// Text of the seeding message, which carries the system/context prompt.
    pub fn system_prompt(&self) -> Option<String> {
        self.messages.first().map(ConversationMessage::text)
    }

    /// History plus `next`, i.e. the payload for the next model call.
    /// The conversation itself is not touched.
    pub fn outbound(&self, next: &ConversationMessage) -> Vec<ConversationMessage> {
        let mut out = Vec::with_capacity(self.messages.len() + 1);
        out.extend_from_slice(&self.messages);
        out.push(next.clone());
        out
    }

    /// Record a completed exchange.
    pub fn push_exchange(&mut self, user: ConversationMessage, reply: impl Into<String>) {
        self.messages.push(user);
        self.messages.push(ConversationMessage::model_text(reply));
    }

    /// Append a standalone message (used for one-shot image attachments).
    pub fn attach(&mut self, message: ConversationMessage) {
        self.messages.push(message);
    }

    pub fn has_pending_inline_binary(&self) -> bool {
        self.messages.iter().any(ConversationMessage::has_inline_binary)
    }

    /// Drop every message carrying an inline binary part. Returns how many went.
    pub fn drop_inline_binaries(&mut self) -> usize {
        let before = self.messages.len();
        self.messages.retain(|m| !m.has_inline_binary());
        before - self.messages.len()
    }
}

// ── Store ─────────────────────────────────────────────────────────────────────

/// Result of opening a chat: the conversation plus any recoverable problems
/// hit while reading it (already logged; the caller decides how to show them).
pub struct Loaded {
    pub conversation: Conversation,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ConversationStore {
    chats_dir: PathBuf,
}

impl ConversationStore {
    pub fn new(chats_dir: impl Into<PathBuf>) -> Self {
        Self {
            chats_dir: chats_dir.into(),
        }
    }

    pub fn project_dir(&self, project: &str) -> PathBuf {
        self.chats_dir.join(project)
    }

    pub fn chat_path(&self, project: &str, chat_name: &str) -> PathBuf {
        self.project_dir(project).join(format!("{chat_name}.json"))
    }

    fn legacy_path(&self, project: &str) -> PathBuf {
        self.chats_dir.join(format!("{}.json", legacy_chat_name(project)))
    }

    pub fn exists(&self, project: &str, chat_name: &str) -> bool {
        self.chat_path(project, chat_name).is_file()
    }

    /// `main` and the migrated `chat_<project>` are never removable.
    pub fn is_reserved(project: &str, chat_name: &str) -> bool {
        chat_name == MAIN_CHAT || chat_name == legacy_chat_name(project)
    }

    /// The chat a session opens by default.
    pub fn default_chat(&self, project: &str) -> String {
        let legacy = legacy_chat_name(project);
        if self.exists(project, &legacy) && !self.exists(project, MAIN_CHAT) {
            legacy
        } else {
            MAIN_CHAT.to_string()
        }
    }

    /// Move a legacy `chats/chat_<project>.json` into the per-project folder.
    /// Returns true if a file was moved.
    pub fn migrate_legacy(&self, project: &str) -> Result<bool, StorageError> {
        let legacy = self.legacy_path(project);
        if !legacy.is_file() {
            return Ok(false);
        }
        let target = self.chat_path(project, &legacy_chat_name(project));
        if target.exists() {
            return Ok(false);
        }
        let dir = self.project_dir(project);
        std::fs::create_dir_all(&dir).map_err(|source| StorageError::Write {
            path: dir.clone(),
            source,
        })?;
        std::fs::rename(&legacy, &target).map_err(|source| StorageError::Write {
            path: target.clone(),
            source,
        })?;
        tracing::info!(project, from = %legacy.display(), to = %target.display(), "migrated legacy chat file");
        Ok(true)
    }

    /// Open a chat, reading its history if present.
    ///
    /// Unreadable or corrupt files never fail the load: the problem is logged,
    /// reported in `Loaded::warnings` and the history starts empty. An empty
    /// history is seeded with `system_prompt` as its first `user` message.
    pub fn load(
        &self,
        project: &str,
        chat_name: &str,
        system_prompt: &str,
    ) -> Result<Loaded, StorageError> {
        validate_chat_name(chat_name)?;
        let mut warnings = Vec::new();
        if let Err(e) = self.migrate_legacy(project) {
            tracing::warn!(project, error = %e, "legacy chat migration failed");
            warnings.push(format!("Error migrating chat: {e}"));
        }

        let path = self.chat_path(project, chat_name);
        let mut messages = if path.exists() {
            read_history(&path, &mut warnings)
        } else {
            Vec::new()
        };

        if messages.is_empty() {
            messages.push(ConversationMessage::user_text(system_prompt));
        }

        tracing::debug!(project, chat = chat_name, messages = messages.len(), "conversation loaded");
        Ok(Loaded {
            conversation: Conversation {
                project: project.to_string(),
                chat_name: chat_name.to_string(),
                messages,
                path,
            },
            warnings,
        })
    }

    /// Overwrite the chat file with the full ordered history.
    pub fn save(&self, conversation: &Conversation) -> Result<(), StorageError> {
        if let Some(parent) = conversation.path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| StorageError::Write {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let json = to_pretty_json(conversation.messages())?;
        std::fs::write(&conversation.path, json).map_err(|source| StorageError::Write {
            path: conversation.path.clone(),
            source,
        })?;
        tracing::debug!(
            project = %conversation.project,
            chat = %conversation.chat_name,
            messages = conversation.messages.len(),
            "conversation saved"
        );
        Ok(())
    }

    /// Chat names stored for `project`, after migrating any legacy file.
    pub fn list(&self, project: &str) -> Result<BTreeSet<String>, StorageError> {
        self.migrate_legacy(project)?;
        let dir = self.project_dir(project);
        if !dir.exists() {
            return Ok(BTreeSet::new());
        }
        let entries = std::fs::read_dir(&dir).map_err(|source| StorageError::Read {
            path: dir.clone(),
            source,
        })?;
        Ok(entries
            .flatten()
            .filter_map(|e| {
                let path = e.path();
                if path.extension().map(|x| x == "json").unwrap_or(false) {
                    path.file_stem().map(|s| s.to_string_lossy().to_string())
                } else {
                    None
                }
            })
            .collect())
    }

    /// Last write time of a chat file, for listings.
    pub fn modified(&self, project: &str, chat_name: &str) -> Option<SystemTime> {
        std::fs::metadata(self.chat_path(project, chat_name))
            .and_then(|m| m.modified())
            .ok()
    }

    /// Create an empty chat file. Fails if the chat already exists.
    pub fn create(&self, project: &str, chat_name: &str) -> Result<(), StorageError> {
        validate_chat_name(chat_name)?;
        let path = self.chat_path(project, chat_name);
        if path.exists() {
            return Err(StorageError::ChatExists(chat_name.to_string()));
        }
        let dir = self.project_dir(project);
        std::fs::create_dir_all(&dir).map_err(|source| StorageError::Write {
            path: dir.clone(),
            source,
        })?;
        std::fs::write(&path, "[]").map_err(|source| StorageError::Write { path, source })
    }

    /// Delete a chat file. Default chats are protected.
    pub fn remove(&self, project: &str, chat_name: &str) -> Result<(), StorageError> {
        if Self::is_reserved(project, chat_name) {
            return Err(StorageError::ProtectedChat(chat_name.to_string()));
        }
        validate_chat_name(chat_name)?;
        let path = self.chat_path(project, chat_name);
        if !path.is_file() {
            return Err(StorageError::ChatNotFound(chat_name.to_string()));
        }
        std::fs::remove_file(&path).map_err(|source| StorageError::Write { path, source })?;
        tracing::info!(project, chat = chat_name, "chat removed");
        Ok(())
    }

    /// Delete every chat belonging to `project`, including a legacy file.
    pub fn purge_project(&self, project: &str) -> Result<bool, StorageError> {
        let mut removed = false;
        let dir = self.project_dir(project);
        if dir.exists() {
            std::fs::remove_dir_all(&dir).map_err(|source| StorageError::Write {
                path: dir.clone(),
                source,
            })?;
            removed = true;
        }
        let legacy = self.legacy_path(project);
        if legacy.exists() {
            std::fs::remove_file(&legacy).map_err(|source| StorageError::Write {
                path: legacy.clone(),
                source,
            })?;
            removed = true;
        }
        Ok(removed)
    }
}

pub fn legacy_chat_name(project: &str) -> String {
    format!("chat_{project}")
}

fn validate_chat_name(name: &str) -> Result<(), StorageError> {
    let bad = name.trim().is_empty()
        || name.contains('/')
        || name.contains('\\')
        || name.contains("..");
    if bad {
        Err(StorageError::InvalidChatName(name.to_string()))
    } else {
        Ok(())
    }
}

fn read_history(path: &Path, warnings: &mut Vec<String>) -> Vec<ConversationMessage> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "cannot read chat history");
            warnings.push(format!("Error loading chat history: {e}. Starting new chat."));
            return Vec::new();
        }
    };
    let values: Vec<Value> = match serde_json::from_str(&raw) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "chat history is corrupted");
            warnings.push("Chat history file is corrupted. Starting new chat.".to_string());
            return Vec::new();
        }
    };
    values
        .into_iter()
        .enumerate()
        .filter_map(|(i, v)| match serde_json::from_value::<StoredMessage>(v) {
            Ok(stored) => Some(stored.into()),
            Err(e) => {
                tracing::warn!(path = %path.display(), index = i, error = %e, "skipping unreadable chat message");
                warnings.push(format!("Error processing chat message {i}: {e}"));
                None
            }
        })
        .collect()
}

fn to_pretty_json(messages: &[ConversationMessage]) -> Result<Vec<u8>, StorageError> {
    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
    messages.serialize(&mut ser)?;
    Ok(buf)
}

mod base64_bytes {
    use base64::Engine as _;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let raw = String::deserialize(d)?;
        STANDARD.decode(raw.as_bytes()).map_err(serde::de::Error::custom)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
