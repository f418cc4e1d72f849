/// Model-proposed actions and their execution.
///
/// An `Action` is produced by an `ActionParser` from a reply, shown to the user,
/// confirmed, executed by `ActionExecutor` and discarded. Every failure is turned
/// into an `ExecutionOutcome`, so one bad action never stops its siblings.
pub mod fs;
pub mod parser;
pub mod paths;
pub mod terminal;

use std::path::PathBuf;

use crate::error::{ExecutionError, ValidationError};
use crate::ui::{Interaction, UiEvent};

// ── Action ────────────────────────────────────────────────────────────────────

/// Fields are kept as the model sent them; validation happens at execution time
/// so a bad entry becomes an `Invalid` outcome instead of spoiling the batch.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Create {
        path: String,
        content: Option<String>,
        description: String,
    },
    Edit {
        path: String,
        content: Option<String>,
        description: String,
    },
    Move {
        source_path: String,
        dest_path: String,
        description: String,
    },
    Remove {
        path: String,
        description: String,
    },
    Terminal {
        command: String,
        description: String,
    },
    Unknown {
        action_type: String,
        description: String,
    },
}

impl Action {
    pub fn description(&self) -> &str {
        match self {
            Action::Create { description, .. }
            | Action::Edit { description, .. }
            | Action::Move { description, .. }
            | Action::Remove { description, .. }
            | Action::Terminal { description, .. }
            | Action::Unknown { description, .. } => description,
        }
    }

    pub fn kind(&self) -> &str {
        match self {
            Action::Create { .. } => "create",
            Action::Edit { .. } => "edit",
            Action::Move { .. } => "move",
            Action::Remove { .. } => "remove",
            Action::Terminal { .. } => "terminal",
            Action::Unknown { action_type, .. } => action_type,
        }
    }

    /// Extra line shown under the description when listing proposed actions.
    pub fn detail(&self) -> Option<String> {
        match self {
            Action::Terminal { command, .. } => Some(format!("Command: {command}")),
            _ => None,
        }
    }
}

// ── Outcome ───────────────────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ExecutionOutcome {
    /// Side effect performed; carries a one-line summary
    Applied(String),
    /// User declined at the confirmation prompt
    Skipped,
    /// Required fields missing or path not allowed; nothing was touched
    Invalid(ValidationError),
    Failed(ExecutionError),
    /// A running terminal command was cancelled with Ctrl+C
    Interrupted,
}

impl ExecutionOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, ExecutionOutcome::Applied(_))
    }

    /// The event shown to the user for this outcome.
    pub fn to_event(&self, action: &Action) -> UiEvent {
        match self {
            ExecutionOutcome::Applied(summary) => UiEvent::Success(summary.clone()),
            ExecutionOutcome::Skipped => {
                UiEvent::Dim(format!("Skipped: {}", action.description()))
            }
            ExecutionOutcome::Invalid(e) => {
                UiEvent::Error(format!("Error: {e} ({} action)", action.kind()))
            }
            ExecutionOutcome::Failed(e) => UiEvent::Error(format!("Error: {e}")),
            ExecutionOutcome::Interrupted => {
                UiEvent::Warning("Command interrupted by user".to_string())
            }
        }
    }
}

// ── Executor ──────────────────────────────────────────────────────────────────

/// A validated action with resolved absolute targets.
enum Prepared<'a> {
    Write {
        target: PathBuf,
        shown: String,
        content: &'a str,
        verb: &'static str,
        exists: bool,
    },
    Move {
        from: PathBuf,
        to: PathBuf,
        from_shown: String,
        to_shown: String,
    },
    Remove {
        target: PathBuf,
        shown: String,
    },
    Terminal {
        command: &'a str,
    },
}

impl Prepared<'_> {
    fn question(&self) -> String {
        match self {
            Prepared::Write { shown, verb, exists, .. } => {
                if *verb == "Create" && *exists {
                    format!("Create {shown} (overwrites existing file)?")
                } else {
                    format!("{verb} {shown}?")
                }
            }
            Prepared::Move { from_shown, to_shown, .. } => {
                format!("Move {from_shown} to {to_shown}?")
            }
            Prepared::Remove { shown, .. } => format!("Remove {shown}?"),
            Prepared::Terminal { command } => format!("Run command: {command}?"),
        }
    }
}

/// Applies actions inside one project root.
#[derive(Debug, Clone)]
pub struct ActionExecutor {
    root: PathBuf,
}

impl ActionExecutor {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Validate, confirm and apply a single action.
    pub async fn execute(&self, action: &Action, io: &mut dyn Interaction) -> ExecutionOutcome {
        let prepared = match self.prepare(action) {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(kind = action.kind(), error = %e, "invalid action");
                return ExecutionOutcome::Invalid(e);
            }
        };

        if !io.confirm(&prepared.question()) {
            return ExecutionOutcome::Skipped;
        }

        let result = match prepared {
            Prepared::Write { target, shown, content, verb, exists } => {
                if verb == "Edit" && !exists {
                    io.emit(UiEvent::Warning(format!(
                        "{shown} does not exist yet, creating it"
                    )));
                }
                fs::write_file(&target, &shown, content, verb)
            }
            Prepared::Move { from, to, from_shown, to_shown } => {
                fs::move_path(&from, &to, &from_shown, &to_shown)
            }
            Prepared::Remove { target, shown } => fs::remove_path(&target, &shown),
            Prepared::Terminal { command } => {
                io.emit(UiEvent::Info(
                    "Executing command... (Press CTRL+C to stop)".to_string(),
                ));
                return terminal::run(command, &self.root).await;
            }
        };

        match result {
            Ok(summary) => {
                tracing::info!(kind = action.kind(), %summary, "action applied");
                ExecutionOutcome::Applied(summary)
            }
            Err(e) => {
                tracing::warn!(kind = action.kind(), error = %e, "action failed");
                ExecutionOutcome::Failed(e)
            }
        }
    }

    fn prepare<'a>(&self, action: &'a Action) -> Result<Prepared<'a>, ValidationError> {
        match action {
            Action::Create { path, content, .. } | Action::Edit { path, content, .. } => {
                let (target, shown) = paths::resolve(&self.root, path)?;
                let content = content
                    .as_deref()
                    .ok_or_else(|| ValidationError::MissingContent(shown.clone()))?;
                let verb = if matches!(action, Action::Create { .. }) {
                    "Create"
                } else {
                    "Edit"
                };
                let exists = target.exists();
                Ok(Prepared::Write { target, shown, content, verb, exists })
            }
            Action::Move { source_path, dest_path, .. } => {
                if source_path.trim().is_empty() || dest_path.trim().is_empty() {
                    return Err(ValidationError::MissingMovePath);
                }
                let (from, from_shown) = paths::resolve(&self.root, source_path)?;
                let (to, to_shown) = paths::resolve(&self.root, dest_path)?;
                Ok(Prepared::Move { from, to, from_shown, to_shown })
            }
            Action::Remove { path, .. } => {
                let (target, shown) = paths::resolve(&self.root, path)?;
                Ok(Prepared::Remove { target, shown })
            }
            Action::Terminal { command, .. } => {
                if command.trim().is_empty() {
                    return Err(ValidationError::EmptyCommand);
                }
                Ok(Prepared::Terminal { command: command.trim() })
            }
            Action::Unknown { action_type, .. } => {
                Err(ValidationError::UnknownActionType(action_type.clone()))
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ui::ScriptedInteraction;

    fn create(path: &str, content: Option<&str>) -> Action {
        Action::Create {
            path: path.to_string(),
            content: content.map(str::to_string),
            description: format!("create {path}"),
        }
    }

    #[tokio::test]
    async fn test_empty_path_is_invalid_and_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let exec = ActionExecutor::new(dir.path());
        let mut io = ScriptedInteraction::confirming(&[true]);

        let outcome = exec.execute(&create("", Some("x")), &mut io).await;
        assert!(matches!(outcome, ExecutionOutcome::Invalid(ValidationError::EmptyPath)));
        // Rejected before any prompt
        assert!(io.questions.is_empty());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_create_writes_nested_file() {
        let dir = tempfile::tempdir().unwrap();
        let exec = ActionExecutor::new(dir.path());
        let mut io = ScriptedInteraction::confirming(&[true]);

        let outcome = exec
            .execute(&create("./src/main.py", Some("print('hi')\n")), &mut io)
            .await;
        assert!(outcome.is_applied(), "{outcome:?}");
        assert_eq!(io.questions, vec!["Create src/main.py?"]);
        let written = std::fs::read_to_string(dir.path().join("src/main.py")).unwrap();
        assert_eq!(written, "print('hi')\n");
    }

    #[tokio::test]
    async fn test_missing_content_is_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let exec = ActionExecutor::new(dir.path());
        let mut io = ScriptedInteraction::confirming(&[true]);
        let outcome = exec.execute(&create("a.txt", None), &mut io).await;
        assert!(matches!(
            outcome,
            ExecutionOutcome::Invalid(ValidationError::MissingContent(_))
        ));
        assert!(!dir.path().join("a.txt").exists());
    }

    #[tokio::test]
    async fn test_declined_action_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let exec = ActionExecutor::new(dir.path());
        let mut io = ScriptedInteraction::confirming(&[false]);
        let outcome = exec.execute(&create("a.txt", Some("x")), &mut io).await;
        assert!(matches!(outcome, ExecutionOutcome::Skipped));
        assert!(!dir.path().join("a.txt").exists());
    }

    #[tokio::test]
    async fn test_create_over_existing_asks_to_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "old").unwrap();
        let exec = ActionExecutor::new(dir.path());
        let mut io = ScriptedInteraction::confirming(&[true]);
        exec.execute(&create("a.txt", Some("new")), &mut io).await;
        assert_eq!(io.questions, vec!["Create a.txt (overwrites existing file)?"]);
        assert_eq!(std::fs::read_to_string(dir.path().join("a.txt")).unwrap(), "new");
    }

    #[tokio::test]
    async fn test_edit_missing_file_warns_and_creates() {
        let dir = tempfile::tempdir().unwrap();
        let exec = ActionExecutor::new(dir.path());
        let mut io = ScriptedInteraction::confirming(&[true]);
        let edit = Action::Edit {
            path: "notes.md".to_string(),
            content: Some("# notes".to_string()),
            description: "edit notes".to_string(),
        };
        let outcome = exec.execute(&edit, &mut io).await;
        assert!(outcome.is_applied());
        assert!(io.saw("does not exist yet"));
        assert!(dir.path().join("notes.md").exists());
    }

    #[tokio::test]
    async fn test_path_escape_is_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("project");
        std::fs::create_dir_all(&root).unwrap();
        let exec = ActionExecutor::new(&root);
        let mut io = ScriptedInteraction::confirming(&[true]);

        let outcome = exec.execute(&create("../outside.txt", Some("x")), &mut io).await;
        assert!(matches!(
            outcome,
            ExecutionOutcome::Invalid(ValidationError::OutsideProject(_))
        ));
        assert!(!dir.path().join("outside.txt").exists());
    }

    #[tokio::test]
    async fn test_unknown_action_type_is_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let exec = ActionExecutor::new(dir.path());
        let mut io = ScriptedInteraction::default();
        let action = Action::Unknown {
            action_type: "deploy".to_string(),
            description: "ship it".to_string(),
        };
        let outcome = exec.execute(&action, &mut io).await;
        assert!(matches!(
            outcome,
            ExecutionOutcome::Invalid(ValidationError::UnknownActionType(ref t)) if t == "deploy"
        ));
    }

    #[tokio::test]
    async fn test_move_and_remove() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "x").unwrap();
        let exec = ActionExecutor::new(dir.path());
        let mut io = ScriptedInteraction::confirming(&[true, true]);

        let mv = Action::Move {
            source_path: "a.txt".to_string(),
            dest_path: "docs/b.txt".to_string(),
            description: "move".to_string(),
        };
        assert!(exec.execute(&mv, &mut io).await.is_applied());
        assert!(dir.path().join("docs/b.txt").exists());

        let rm = Action::Remove {
            path: "docs/b.txt".to_string(),
            description: "remove".to_string(),
        };
        assert!(exec.execute(&rm, &mut io).await.is_applied());
        assert!(!dir.path().join("docs/b.txt").exists());
        assert_eq!(io.questions, vec!["Move a.txt to docs/b.txt?", "Remove docs/b.txt?"]);
    }

    #[tokio::test]
    async fn test_move_with_empty_destination_is_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let exec = ActionExecutor::new(dir.path());
        let mut io = ScriptedInteraction::confirming(&[true]);
        let mv = Action::Move {
            source_path: "a.txt".to_string(),
            dest_path: " ".to_string(),
            description: "move".to_string(),
        };
        assert!(matches!(
            exec.execute(&mv, &mut io).await,
            ExecutionOutcome::Invalid(ValidationError::MissingMovePath)
        ));
    }

    #[test]
    fn test_action_detail_only_for_terminal() {
        let t = Action::Terminal {
            command: "npm install".to_string(),
            description: "deps".to_string(),
        };
        assert_eq!(t.detail().as_deref(), Some("Command: npm install"));
        assert_eq!(create("a", Some("b")).detail(), None);
    }
}
