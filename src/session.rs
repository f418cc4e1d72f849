/// One project session: the explicit context value and the controller that runs
/// a request/parse/confirm/execute cycle against it.
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::actions::parser::{ActionParser, BracketScanParser, Extracted};
use crate::actions::{Action, ActionExecutor, ExecutionOutcome};
use crate::client::Collaborator;
use crate::config::Retries;
use crate::conversation::{Conversation, ConversationMessage, ConversationStore};
use crate::error::{ExecutionError, ParseError, TurnError};
use crate::prompts;
use crate::retry::{CallSite, RetryPolicy};
use crate::ui::{Interaction, UiEvent};

// ── Context ───────────────────────────────────────────────────────────────────

/// Everything a running project session owns. Created when a project is
/// opened, dropped when the user leaves it; pinned files die with it.
pub struct SessionContext {
    pub project: String,
    pub project_dir: PathBuf,
    pub conversation: Conversation,
    /// Project-relative path → full text, sent ahead of every request
    pub persistent_files: BTreeMap<String, String>,
}

impl SessionContext {
    pub fn new(project: impl Into<String>, project_dir: impl Into<PathBuf>, conversation: Conversation) -> Self {
        Self {
            project: project.into(),
            project_dir: project_dir.into(),
            conversation,
            persistent_files: BTreeMap::new(),
        }
    }
}

// ── Turn result ───────────────────────────────────────────────────────────────

#[derive(Debug)]
pub enum TurnResult {
    /// Actions were confirmed; one outcome per action, in order
    Executed(Vec<ExecutionOutcome>),
    /// Actions were proposed but the user declined the batch
    Declined(usize),
    /// No action list in the reply
    Answer(String),
    /// A bracketed span that did not decode; the raw reply was shown
    Malformed { reply: String, error: ParseError },
}

impl TurnResult {
    /// One-line recap shown after a turn; `None` when the reply was an answer.
    pub fn summary(&self) -> Option<String> {
        match self {
            TurnResult::Executed(outcomes) => {
                let applied = outcomes.iter().filter(|o| o.is_applied()).count();
                Some(format!("{applied} of {} actions applied", outcomes.len()))
            }
            TurnResult::Declined(n) => Some(format!("{n} proposed actions declined")),
            TurnResult::Answer(text) => {
                tracing::debug!(chars = text.len(), "answer shown");
                None
            }
            TurnResult::Malformed { reply, error } => Some(format!(
                "No actions applied: {error} in a {}-character reply",
                reply.chars().count()
            )),
        }
    }
}

// ── Controller ────────────────────────────────────────────────────────────────

pub struct SessionController<'a, C, P = BracketScanParser> {
    collaborator: &'a C,
    store: &'a ConversationStore,
    parser: P,
    retries: Retries,
}

impl<'a, C: Collaborator> SessionController<'a, C> {
    pub fn new(collaborator: &'a C, store: &'a ConversationStore, retries: Retries) -> Self {
        Self::with_parser(collaborator, store, retries, BracketScanParser)
    }
}

impl<'a, C: Collaborator, P: ActionParser> SessionController<'a, C, P> {
    pub fn with_parser(collaborator: &'a C, store: &'a ConversationStore, retries: Retries, parser: P) -> Self {
        Self {
            collaborator,
            store,
            parser,
            retries,
        }
    }

    pub fn store(&self) -> &ConversationStore {
        self.store
    }

    pub fn collaborator(&self) -> &C {
        self.collaborator
    }

    pub fn retries(&self) -> &Retries {
        &self.retries
    }

    /// Send `text` as the next user turn and record the exchange.
    ///
    /// On model failure the conversation is left exactly as it was. On success
    /// the exchange is appended, any one-shot image is dropped, and the chat is
    /// saved. A failed save is a warning; the reply is still returned.
    pub async fn exchange(
        &self,
        ctx: &mut SessionContext,
        io: &mut dyn Interaction,
        site: CallSite,
        text: String,
    ) -> Result<String, TurnError> {
        let message = ConversationMessage::user_text(text);
        let outbound = ctx.conversation.outbound(&message);
        let policy = RetryPolicy::for_site(&self.retries, site);
        let reply = policy.call(site, self.collaborator, &outbound, io).await?;

        ctx.conversation.push_exchange(message, reply.clone());
        if ctx.conversation.drop_inline_binaries() > 0 {
            io.emit(UiEvent::Dim("Image removed from context.".to_string()));
        }
        if let Err(e) = self.store.save(&ctx.conversation) {
            tracing::warn!(
                project = %ctx.project,
                chat = %ctx.conversation.chat_name,
                path = %ctx.conversation.path.display(),
                error = %e,
                "conversation not saved"
            );
            io.emit(UiEvent::Warning(format!(
                "Could not save chat {}: {e}",
                ctx.conversation.path.display()
            )));
        }
        Ok(reply)
    }

    /// A full turn for a plain user utterance.
    pub async fn run_turn(
        &self,
        ctx: &mut SessionContext,
        io: &mut dyn Interaction,
        utterance: &str,
    ) -> Result<TurnResult, TurnError> {
        let request = prompts::compose_request(&ctx.persistent_files, utterance);
        tracing::info!(project = %ctx.project, chat = %ctx.conversation.chat_name, pinned = ctx.persistent_files.len(), "running turn");
        let reply = self.exchange(ctx, io, CallSite::Turn, request).await?;
        Ok(self.handle_reply(ctx, io, &reply).await)
    }

    /// Parse a reply and either show it as an answer or run its actions.
    pub async fn handle_reply(
        &self,
        ctx: &mut SessionContext,
        io: &mut dyn Interaction,
        reply: &str,
    ) -> TurnResult {
        let actions = match self.parser.parse(reply) {
            Ok(Extracted::Actions(actions)) if !actions.is_empty() => actions,
            Ok(_) => {
                io.emit(UiEvent::Block {
                    title: "AI Response:".to_string(),
                    body: reply.to_string(),
                });
                return TurnResult::Answer(reply.to_string());
            }
            Err(error) => {
                tracing::warn!(project = %ctx.project, error = %error, "could not parse action list");
                io.emit(UiEvent::Warning(format!("Could not parse actions: {error}")));
                io.emit(UiEvent::Block {
                    title: "AI Response:".to_string(),
                    body: reply.to_string(),
                });
                return TurnResult::Malformed {
                    reply: reply.to_string(),
                    error,
                };
            }
        };

        io.emit(UiEvent::Heading("Proposed actions:".to_string()));
        for action in &actions {
            io.emit(UiEvent::Item {
                text: action.description().to_string(),
                detail: action.detail(),
            });
        }
        if !io.confirm("Proceed with these actions?") {
            return TurnResult::Declined(actions.len());
        }

        TurnResult::Executed(self.apply_actions(ctx, io, &actions).await)
    }

    /// Execute each action in order. Outcomes are independent; terminal
    /// commands that ran are offered for analysis right after they finish.
    pub async fn apply_actions(
        &self,
        ctx: &mut SessionContext,
        io: &mut dyn Interaction,
        actions: &[Action],
    ) -> Vec<ExecutionOutcome> {
        let executor = ActionExecutor::new(&ctx.project_dir);
        let mut outcomes = Vec::with_capacity(actions.len());
        for action in actions {
            let outcome = executor.execute(action, io).await;
            io.emit(outcome.to_event(action));
            if let Action::Terminal { command, .. } = action {
                if let Some(exit) = command_exit(&outcome) {
                    self.offer_analysis(ctx, io, command, exit).await;
                }
            }
            outcomes.push(outcome);
        }
        outcomes
    }

    async fn offer_analysis(
        &self,
        ctx: &mut SessionContext,
        io: &mut dyn Interaction,
        command: &str,
        exit: Option<i32>,
    ) {
        if !io.confirm("Analyze command result?") {
            return;
        }
        let prompt = prompts::command_analysis_prompt(command, exit);
        match self.exchange(ctx, io, CallSite::CommandAnalysis, prompt).await {
            Ok(analysis) => io.emit(UiEvent::Block {
                title: "Analysis:".to_string(),
                body: analysis,
            }),
            Err(e) => {
                tracing::warn!(command, error = %e, "command analysis failed");
                io.emit(UiEvent::Warning(format!("Could not analyze result: {e}")));
            }
        }
    }
}

/// Exit status of a command that actually ran: `Some(Some(code))`, or
/// `Some(None)` when it was interrupted. `None` if it never ran.
fn command_exit(outcome: &ExecutionOutcome) -> Option<Option<i32>> {
    match outcome {
        ExecutionOutcome::Applied(_) => Some(Some(0)),
        ExecutionOutcome::Failed(e @ ExecutionError::NonZeroExit { .. }) => Some(e.exit_code()),
        ExecutionOutcome::Failed(ExecutionError::Terminated { .. }) | ExecutionOutcome::Interrupted => {
            Some(None)
        }
        _ => None,
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::conversation::{ContentPart, Role};
    use crate::error::{CollaboratorError, ValidationError};
    use crate::actions::terminal::shell_test_guard;
    use crate::retry::testing::ScriptedCollaborator;
    use crate::ui::ScriptedInteraction;

    pub(crate) struct Fixture {
        pub dir: tempfile::TempDir,
        pub store: ConversationStore,
    }

    impl Fixture {
        pub fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let store = ConversationStore::new(dir.path().join("chats"));
            std::fs::create_dir_all(dir.path().join("projects/demo")).unwrap();
            Self { dir, store }
        }

        pub fn context(&self) -> SessionContext {
            let loaded = self.store.load("demo", "main", "SYSTEM").unwrap();
            SessionContext::new("demo", self.dir.path().join("projects/demo"), loaded.conversation)
        }
    }

    #[tokio::test]
    async fn test_plain_answer_is_recorded_and_saved() {
        let fx = Fixture::new();
        let mut ctx = fx.context();
        let collab = ScriptedCollaborator::replying(&["Python is a language."]);
        let ctl = SessionController::new(&collab, &fx.store, Retries::default());
        let mut io = ScriptedInteraction::default();

        let result = ctl.run_turn(&mut ctx, &mut io, "what is python?").await.unwrap();
        assert!(matches!(result, TurnResult::Answer(ref t) if t == "Python is a language."));
        assert_eq!(ctx.conversation.messages().len(), 3);
        assert!(io.saw("Python is a language."));

        let reloaded = fx.store.load("demo", "main", "SYSTEM").unwrap().conversation;
        assert_eq!(reloaded.messages(), ctx.conversation.messages());
    }

    #[tokio::test]
    async fn test_pinned_file_is_sent_as_fenced_block() {
        let fx = Fixture::new();
        let mut ctx = fx.context();
        std::fs::write(ctx.project_dir.join("notes.txt"), "hello").unwrap();
        ctx.persistent_files.insert("notes.txt".to_string(), "hello".to_string());

        let collab = ScriptedCollaborator::replying(&["ok"]);
        let ctl = SessionController::new(&collab, &fx.store, Retries::default());
        let mut io = ScriptedInteraction::default();
        ctl.run_turn(&mut ctx, &mut io, "summarize").await.unwrap();

        let sent = collab.last_request();
        let last = sent.last().unwrap().text();
        assert!(last.contains("\nFile: notes.txt\n```\nhello\n```\n"));
        assert!(last.ends_with("User request: summarize"));
        // System prompt travels first
        assert_eq!(sent[0].text(), "SYSTEM");
    }

    #[tokio::test]
    async fn test_collaborator_failure_leaves_state_untouched() {
        let fx = Fixture::new();
        let mut ctx = fx.context();
        ctx.persistent_files.insert("a.txt".to_string(), "A".to_string());
        let collab = ScriptedCollaborator::default();
        collab.push_err(CollaboratorError::Api {
            status: 503,
            body: "down".into(),
        });
        let ctl = SessionController::new(&collab, &fx.store, Retries::default());
        let mut io = ScriptedInteraction::default();

        let before = ctx.conversation.messages().to_vec();
        let err = ctl.run_turn(&mut ctx, &mut io, "hi").await.unwrap_err();
        assert!(matches!(err, TurnError::Collaborator(CollaboratorError::Api { status: 503, .. })));
        assert_eq!(ctx.conversation.messages(), before.as_slice());
        assert_eq!(ctx.persistent_files.len(), 1);
        // Nothing was ever saved
        assert!(!fx.store.exists("demo", "main"));
    }

    #[tokio::test]
    async fn test_save_failure_still_proposes_actions() {
        let dir = tempfile::tempdir().unwrap();
        // chats dir is a plain file, so every save fails
        let chats = dir.path().join("chats");
        std::fs::write(&chats, "not a directory").unwrap();
        let store = ConversationStore::new(&chats);
        let root = dir.path().join("projects/demo");
        std::fs::create_dir_all(&root).unwrap();
        let loaded = store.load("demo", "main", "SYSTEM").unwrap();
        let mut ctx = SessionContext::new("demo", &root, loaded.conversation);

        let reply = r#"[{"action_type":"create","path":"kept.txt","content":"x","description":"Create kept.txt"}]"#;
        let collab = ScriptedCollaborator::replying(&[reply]);
        let ctl = SessionController::new(&collab, &store, Retries::default());
        let mut io = ScriptedInteraction::confirming(&[true, true]);

        let result = ctl.run_turn(&mut ctx, &mut io, "make it").await.unwrap();
        assert!(matches!(result, TurnResult::Executed(_)));
        assert_eq!(io.questions, vec!["Proceed with these actions?", "Create kept.txt?"]);
        assert!(root.join("kept.txt").exists());
        assert!(io.saw("Could not save chat"));
        assert_eq!(ctx.conversation.messages().len(), 3);
    }

    #[tokio::test]
    async fn test_image_lives_for_exactly_one_turn() {
        let fx = Fixture::new();
        let mut ctx = fx.context();
        ctx.conversation.attach(ConversationMessage {
            parts: vec![ContentPart::inline_binary("image/png", vec![137, 80, 78, 71])],
            role: Role::User,
        });
        let collab = ScriptedCollaborator::replying(&["nice picture", "second"]);
        let ctl = SessionController::new(&collab, &fx.store, Retries::default());
        let mut io = ScriptedInteraction::default();

        ctl.run_turn(&mut ctx, &mut io, "describe it").await.unwrap();
        let first = collab.last_request();
        assert!(first.iter().any(ConversationMessage::has_inline_binary));
        assert!(!ctx.conversation.has_pending_inline_binary());

        ctl.run_turn(&mut ctx, &mut io, "again").await.unwrap();
        let second = collab.last_request();
        assert!(!second.iter().any(ConversationMessage::has_inline_binary));

        let saved = std::fs::read_to_string(&ctx.conversation.path).unwrap();
        assert!(!saved.contains("inline_data"));
    }

    #[tokio::test]
    async fn test_actions_run_after_aggregate_confirmation() {
        let fx = Fixture::new();
        let mut ctx = fx.context();
        let reply = r#"Creating it now:
[{"action_type":"create","path":"hello.py","content":"print('hi')","description":"Create hello.py"}]"#;
        let collab = ScriptedCollaborator::replying(&[reply]);
        let ctl = SessionController::new(&collab, &fx.store, Retries::default());
        let mut io = ScriptedInteraction::confirming(&[true, true]);

        let result = ctl.run_turn(&mut ctx, &mut io, "make hello").await.unwrap();
        match result {
            TurnResult::Executed(outcomes) => assert!(outcomes[0].is_applied()),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(io.questions, vec!["Proceed with these actions?", "Create hello.py?"]);
        assert!(ctx.project_dir.join("hello.py").exists());
        assert!(io.saw("Create hello.py"));
    }

    #[tokio::test]
    async fn test_declined_batch_touches_nothing_but_is_saved() {
        let fx = Fixture::new();
        let mut ctx = fx.context();
        let reply = r#"[{"action_type":"remove","path":"x","description":"rm"}]"#;
        let collab = ScriptedCollaborator::replying(&[reply]);
        let ctl = SessionController::new(&collab, &fx.store, Retries::default());
        let mut io = ScriptedInteraction::confirming(&[false]);

        let result = ctl.run_turn(&mut ctx, &mut io, "clean up").await.unwrap();
        assert!(matches!(result, TurnResult::Declined(1)));
        assert!(fx.store.exists("demo", "main"));
    }

    #[tokio::test]
    async fn test_malformed_reply_is_shown_raw() {
        let fx = Fixture::new();
        let mut ctx = fx.context();
        let collab = ScriptedCollaborator::replying(&["See [the docs] for more."]);
        let ctl = SessionController::new(&collab, &fx.store, Retries::default());
        let mut io = ScriptedInteraction::default();

        let result = ctl.run_turn(&mut ctx, &mut io, "help").await.unwrap();
        assert!(matches!(result, TurnResult::Malformed { .. }));
        assert!(io.saw("See [the docs] for more."));
        assert!(io.saw("Could not parse actions"));
    }

    #[tokio::test]
    async fn test_batch_isolates_invalid_action() {
        let fx = Fixture::new();
        let mut ctx = fx.context();
        let collab = ScriptedCollaborator::default();
        let ctl = SessionController::new(&collab, &fx.store, Retries::default());
        // Invalid entry is rejected before prompting, so only two confirmations are used
        let mut io = ScriptedInteraction::confirming(&[true, true]);
        let mk = |path: &str| Action::Create {
            path: path.to_string(),
            content: Some("x".to_string()),
            description: format!("create {path}"),
        };
        let actions = vec![mk("one.txt"), mk(""), mk("three.txt")];

        let outcomes = ctl.apply_actions(&mut ctx, &mut io, &actions).await;
        assert_eq!(outcomes.len(), 3);
        assert!(outcomes[0].is_applied());
        assert!(matches!(outcomes[1], ExecutionOutcome::Invalid(ValidationError::EmptyPath)));
        assert!(outcomes[2].is_applied());
        assert!(ctx.project_dir.join("three.txt").exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failed_command_is_reported_and_batch_continues() {
        let _serial = shell_test_guard();
        let fx = Fixture::new();
        let mut ctx = fx.context();
        let reply = r#"[
            {"action_type":"terminal","content":"exit 7","description":"fail"},
            {"action_type":"create","path":"after.txt","content":"x","description":"after"}
        ]"#;
        let collab = ScriptedCollaborator::replying(&[reply, "It failed with 7; check the script."]);
        let ctl = SessionController::new(&collab, &fx.store, Retries::default());
        // proceed, run, analyze, create
        let mut io = ScriptedInteraction::confirming(&[true, true, true, true]);

        let result = ctl.run_turn(&mut ctx, &mut io, "go").await.unwrap();
        let TurnResult::Executed(outcomes) = result else {
            panic!("expected execution");
        };
        match &outcomes[0] {
            ExecutionOutcome::Failed(e) => assert_eq!(e.exit_code(), Some(7)),
            other => panic!("unexpected {other:?}"),
        }
        assert!(outcomes[1].is_applied());
        assert!(io.saw("exit code 7"));
        assert!(io.saw("It failed with 7"));

        let analysis_request = &collab.requests.borrow()[1];
        assert!(analysis_request.last().unwrap().text().contains("Exit code: 7"));
        // turn + analysis exchanges
        assert_eq!(ctx.conversation.messages().len(), 5);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_analysis_failure_is_only_a_warning() {
        let _serial = shell_test_guard();
        let fx = Fixture::new();
        let mut ctx = fx.context();
        let collab = ScriptedCollaborator::default();
        collab.push_err(CollaboratorError::EmptyResponse);
        let ctl = SessionController::new(&collab, &fx.store, Retries::default());
        let mut io = ScriptedInteraction::confirming(&[true, true]);
        let actions = vec![Action::Terminal {
            command: "true".to_string(),
            description: "noop".to_string(),
        }];

        let outcomes = ctl.apply_actions(&mut ctx, &mut io, &actions).await;
        assert!(outcomes[0].is_applied());
        assert!(io.saw("Could not analyze result"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_interrupted_command_does_not_stop_batch() {
        let _serial = shell_test_guard();
        let fx = Fixture::new();
        let mut ctx = fx.context();
        let collab = ScriptedCollaborator::default();
        let ctl = SessionController::new(&collab, &fx.store, Retries::default());
        // run, decline analysis, create
        let mut io = ScriptedInteraction::confirming(&[true, false, true]);
        let actions = vec![
            Action::Terminal {
                command: "sleep 0.5; kill -INT $PPID; sleep 5".to_string(),
                description: "long build".to_string(),
            },
            Action::Create {
                path: "after.txt".to_string(),
                content: Some("x".to_string()),
                description: "after".to_string(),
            },
        ];

        let outcomes = ctl.apply_actions(&mut ctx, &mut io, &actions).await;
        assert!(matches!(outcomes[0], ExecutionOutcome::Interrupted));
        assert!(outcomes[1].is_applied());
        assert!(ctx.project_dir.join("after.txt").exists());
        assert!(io.saw("Command interrupted by user"));
        assert!(io.questions.iter().any(|q| q == "Analyze command result?"));
        assert_eq!(collab.calls(), 0);
    }

    #[test]
    fn test_turn_summary_counts_applied_actions() {
        let executed = TurnResult::Executed(vec![
            ExecutionOutcome::Applied("Created a.txt (1 lines)".to_string()),
            ExecutionOutcome::Skipped,
        ]);
        assert_eq!(executed.summary().as_deref(), Some("1 of 2 actions applied"));
        assert_eq!(TurnResult::Declined(3).summary().as_deref(), Some("3 proposed actions declined"));
        assert_eq!(TurnResult::Answer("hi".to_string()).summary(), None);
    }

    #[test]
    fn test_command_exit_only_for_commands_that_ran() {
        assert_eq!(command_exit(&ExecutionOutcome::Interrupted), Some(None));
        assert_eq!(command_exit(&ExecutionOutcome::Skipped), None);
        assert_eq!(
            command_exit(&ExecutionOutcome::Invalid(ValidationError::EmptyCommand)),
            None
        );
    }
}
