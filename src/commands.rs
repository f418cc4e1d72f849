/// Slash commands of the interactive project loop.
///
/// Verbs are matched exactly (`/plan-mode` is never mistaken for `/plan`).
/// A `/word` that is not a known verb is not a command; the caller sends it
/// to the model like any other text.
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Local};

use crate::actions::parser::ActionParser;
use crate::actions::paths;
use crate::client::Collaborator;
use crate::conversation::{ContentPart, ConversationMessage, ConversationStore, MAIN_CHAT, Role, legacy_chat_name};
use crate::error::StorageError;
use crate::plan::PlanRunner;
use crate::project;
use crate::prompts;
use crate::retry::{CallSite, RetryPolicy};
use crate::session::{SessionContext, SessionController};
use crate::ui::{Interaction, UiEvent};

// ── Parsing ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Help,
    Codebase(Option<String>),
    AddFile(String),
    AddFolder(Option<String>),
    RemoveFile(String),
    NewChat(String),
    OpenChat(String),
    RemoveChat(String),
    ChatList,
    IsWeb,
    AddImage(String),
    AnalyzeImage(String),
    Plan(Option<String>),
    PlanMode,
    Exit,
}

/// `None` when `line` is not a command. `Some(Err(usage))` when the verb is
/// known but a required argument is missing.
pub fn parse(line: &str) -> Option<Result<Command, &'static str>> {
    let line = line.trim();
    if line.eq_ignore_ascii_case("exit") {
        return Some(Ok(Command::Exit));
    }
    if !line.starts_with('/') {
        return None;
    }
    let (verb, rest) = match line.split_once(char::is_whitespace) {
        Some((v, r)) => (v, r.trim()),
        None => (line, ""),
    };
    let arg = (!rest.is_empty()).then(|| rest.to_string());
    let required = |usage: &'static str| arg.clone().ok_or(usage);

    let cmd = match verb {
        "/help" => Ok(Command::Help),
        "/codebase" => Ok(Command::Codebase(arg.clone())),
        "/add-file" => required("Please specify a file path").map(Command::AddFile),
        "/add-folder" => Ok(Command::AddFolder(arg.clone())),
        "/remove-file" => required("Please specify a file path").map(Command::RemoveFile),
        "/new-chat" => required("Please provide a chat name").map(Command::NewChat),
        "/open-chat" => required("Please provide a chat name").map(Command::OpenChat),
        "/remove-chat" => required("Please provide a chat name").map(Command::RemoveChat),
        "/chat-list" => Ok(Command::ChatList),
        "/is-web" => Ok(Command::IsWeb),
        "/add-image" => required("Please provide the image path").map(Command::AddImage),
        "/analyze-image" => required("Please provide the image path").map(Command::AnalyzeImage),
        "/plan" => Ok(Command::Plan(arg.clone())),
        "/plan-mode" => Ok(Command::PlanMode),
        "/exit" => Ok(Command::Exit),
        _ => return None,
    };
    Some(cmd)
}

pub const HELP_TEXT: &str = "\
/help                 - Show this help message
/codebase             - Show all project files and analyze them
/codebase query       - Analyze project files with a specific query
/add-file path        - Add file to active context
/add-folder [path]    - Add all text files from a folder (project root if no path)
/remove-file path     - Remove file from active context
/is-web               - Enable enhanced web development mode
/add-image path       - Attach a PNG image to your next request
/analyze-image path   - Describe an image, then implement something based on it
/new-chat name        - Create a new chat session
/open-chat name       - Switch to an existing chat session
/remove-chat name     - Remove a chat session
/chat-list            - List all available chats
/plan [query]         - Create and execute a project iteration plan
/plan-mode            - Enable automatic iteration planning for all requests
/exit                 - Exit current project

Examples:
/codebase find security issues
/add-file src/main.py
/add-folder src/utils
/remove-file config.json
/add-image designs/mockup.png
/new-chat feature-auth
/open-chat feature-ui
/plan a todo app with local storage";

// ── Dispatch ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Exit,
}

pub async fn dispatch<C: Collaborator, P: ActionParser>(
    command: Command,
    ctl: &SessionController<'_, C, P>,
    ctx: &mut SessionContext,
    io: &mut dyn Interaction,
) -> Flow {
    tracing::debug!(project = %ctx.project, ?command, "command");
    let result = match command {
        Command::Exit => return Flow::Exit,
        Command::Help => {
            io.emit(UiEvent::Block {
                title: "Available commands:".to_string(),
                body: HELP_TEXT.to_string(),
            });
            Ok(())
        }
        Command::Codebase(query) => codebase(ctl, ctx, io, query.as_deref()).await,
        Command::AddFile(path) => add_file(ctx, io, &path),
        Command::AddFolder(path) => add_folder(ctx, io, path.as_deref()),
        Command::RemoveFile(path) => {
            remove_file(ctx, io, &path);
            Ok(())
        }
        Command::NewChat(name) => ctl
            .store()
            .create(&ctx.project, &name)
            .map(|()| io.emit(UiEvent::Success(format!("Created new chat: {name}"))))
            .with_context(|| format!("Error creating chat '{name}'")),
        Command::OpenChat(name) => open_chat(ctl.store(), ctx, io, &name),
        Command::RemoveChat(name) => remove_chat(ctl.store(), ctx, io, &name),
        Command::ChatList => chat_list(ctl.store(), ctx, io),
        Command::IsWeb => web_mode(ctl, ctx, io).await,
        Command::AddImage(path) => add_image(ctx, io, &path),
        Command::AnalyzeImage(path) => analyze_image(ctl, ctx, io, &path).await,
        Command::Plan(query) => {
            let mut runner = PlanRunner::new(ctl);
            let report = runner.run(ctx, io, query.as_deref()).await;
            tracing::info!(
                project = %ctx.project,
                state = ?runner.state(),
                iterations = report.plan.as_ref().map_or(0, |p| p.iterations.len()),
                run = report.steps_run,
                skipped = report.steps_skipped,
                failed = report.steps_failed,
                "plan finished"
            );
            Ok(())
        }
        Command::PlanMode => plan_mode(ctl, ctx, io).await,
    };

    if let Err(e) = result {
        tracing::warn!(project = %ctx.project, error = %format!("{e:#}"), "command failed");
        io.emit(UiEvent::Error(format!("{e:#}")));
    }
    Flow::Continue
}

// ── Pinned files ──────────────────────────────────────────────────────────────

/// Listing shown before every prompt.
pub fn show_persistent_files(ctx: &SessionContext, io: &mut dyn Interaction) {
    if ctx.conversation.has_pending_inline_binary() {
        io.emit(UiEvent::Dim("Image attached to your next request".to_string()));
    }
    if ctx.persistent_files.is_empty() {
        return;
    }
    io.emit(UiEvent::Heading("Active files:".to_string()));
    for path in ctx.persistent_files.keys() {
        io.emit(UiEvent::Item {
            text: path.clone(),
            detail: None,
        });
    }
}

fn add_file(ctx: &mut SessionContext, io: &mut dyn Interaction, raw: &str) -> Result<()> {
    let (abs, rel) = paths::resolve(&ctx.project_dir, raw)?;
    let content = std::fs::read_to_string(&abs).with_context(|| format!("Error reading file {rel}"))?;
    ctx.persistent_files.insert(rel.clone(), content);
    io.emit(UiEvent::Success(format!("Added {rel} to persistent files")));
    Ok(())
}

fn add_folder(ctx: &mut SessionContext, io: &mut dyn Interaction, raw: Option<&str>) -> Result<()> {
    let (folder, shown) = match raw {
        Some(r) => paths::resolve(&ctx.project_dir, r)?,
        None => (ctx.project_dir.clone(), ".".to_string()),
    };
    if !folder.is_dir() {
        bail!("Folder not found: {shown}");
    }

    let files = project::walk_files(&ctx.project_dir, &folder);
    let (read, failed) = project::read_text_files(&ctx.project_dir, &files);
    for (file, reason) in failed {
        tracing::warn!(project = %ctx.project, path = %file, %reason, "could not pin file");
        io.emit(UiEvent::Warning(format!("Could not read {file}: {reason}")));
    }

    let added = read.len();
    ctx.persistent_files.extend(read);
    if added > 0 {
        io.emit(UiEvent::Success(format!("Added {added} files from {shown} to persistent files")));
    } else {
        io.emit(UiEvent::Warning("No text files found in the specified folder".to_string()));
    }
    Ok(())
}

fn remove_file(ctx: &mut SessionContext, io: &mut dyn Interaction, raw: &str) {
    let key = paths::resolve(&ctx.project_dir, raw)
        .map(|(_, rel)| rel)
        .unwrap_or_else(|_| raw.trim().to_string());
    if ctx.persistent_files.remove(&key).is_some() {
        io.emit(UiEvent::Success(format!("Removed {key} from persistent files")));
    } else {
        io.emit(UiEvent::Warning(format!("File {key} not in persistent list")));
    }
}

// ── Chats ─────────────────────────────────────────────────────────────────────

fn open_chat(store: &ConversationStore, ctx: &mut SessionContext, io: &mut dyn Interaction, name: &str) -> Result<()> {
    if !store.exists(&ctx.project, name) {
        bail!("Chat '{name}' not found");
    }
    let system = ctx
        .conversation
        .system_prompt()
        .unwrap_or_else(|| prompts::system_prompt(&ctx.project, &ctx.project_dir));
    let loaded = store.load(&ctx.project, name, &system)?;
    for w in loaded.warnings {
        io.emit(UiEvent::Warning(w));
    }
    ctx.conversation = loaded.conversation;
    io.emit(UiEvent::Success(format!("Opened chat: {name}")));
    Ok(())
}

fn remove_chat(store: &ConversationStore, ctx: &SessionContext, io: &mut dyn Interaction, name: &str) -> Result<()> {
    if name == ctx.conversation.chat_name && !ConversationStore::is_reserved(&ctx.project, name) {
        bail!("Chat '{name}' is open; switch to another chat before removing it");
    }
    match store.remove(&ctx.project, name) {
        Ok(()) => {
            io.emit(UiEvent::Success(format!("Removed chat: {name}")));
            Ok(())
        }
        Err(StorageError::ProtectedChat(_)) => bail!("Cannot remove default chat"),
        Err(e) => Err(e).with_context(|| format!("Error removing chat '{name}'")),
    }
}

fn chat_list(store: &ConversationStore, ctx: &SessionContext, io: &mut dyn Interaction) -> Result<()> {
    let legacy = legacy_chat_name(&ctx.project);
    if store.migrate_legacy(&ctx.project)? {
        io.emit(UiEvent::Warning(format!("Migrated {legacy}.json to project folder")));
    }
    let mut chats = store.list(&ctx.project)?;
    if chats.is_empty() {
        io.emit(UiEvent::Warning("No chats found for this project".to_string()));
        return Ok(());
    }

    io.emit(UiEvent::Heading("Available chats:".to_string()));
    let default = [legacy.as_str(), MAIN_CHAT]
        .into_iter()
        .find(|c| chats.contains(*c))
        .map(str::to_string);
    if let Some(d) = default {
        chats.remove(&d);
        io.emit(chat_item(store, ctx, &d, " (default)"));
    }
    for name in &chats {
        io.emit(chat_item(store, ctx, name, ""));
    }
    Ok(())
}

fn chat_item(store: &ConversationStore, ctx: &SessionContext, name: &str, tag: &str) -> UiEvent {
    let active = if name == ctx.conversation.chat_name { " [active]" } else { "" };
    let detail = store.modified(&ctx.project, name).map(|t| {
        let local: DateTime<Local> = t.into();
        format!("last modified {}", local.format("%Y-%m-%d %H:%M"))
    });
    UiEvent::Item {
        text: format!("{name}{tag}{active}"),
        detail,
    }
}

// ── Model-backed commands ─────────────────────────────────────────────────────

async fn codebase<C: Collaborator, P: ActionParser>(
    ctl: &SessionController<'_, C, P>,
    ctx: &mut SessionContext,
    io: &mut dyn Interaction,
    query: Option<&str>,
) -> Result<()> {
    let files = project::walk_files(&ctx.project_dir, &ctx.project_dir);
    if files.is_empty() {
        io.emit(UiEvent::Warning("No files found in the project".to_string()));
        return Ok(());
    }
    let (contents, failed) = project::read_text_files(&ctx.project_dir, &files);
    for (file, reason) in failed {
        io.emit(UiEvent::Warning(format!("Could not read {file}: {reason}")));
    }

    if query.is_none() {
        io.emit(UiEvent::Heading("Project structure:".to_string()));
        for f in &files {
            io.emit(UiEvent::Item {
                text: f.clone(),
                detail: None,
            });
        }
    }

    let prompt = prompts::codebase_prompt(&files, &contents, query);
    let analysis = ctl
        .exchange(ctx, io, CallSite::Codebase, prompt)
        .await
        .context("Error analyzing codebase")?;
    io.emit(UiEvent::Block {
        title: "Analysis:".to_string(),
        body: analysis,
    });
    Ok(())
}

async fn web_mode<C: Collaborator, P: ActionParser>(
    ctl: &SessionController<'_, C, P>,
    ctx: &mut SessionContext,
    io: &mut dyn Interaction,
) -> Result<()> {
    ctl.exchange(ctx, io, CallSite::Turn, prompts::WEB_MODE_PROMPT.to_string())
        .await
        .context("Error enabling web mode")?;
    io.emit(UiEvent::Success("Enhanced web development mode enabled!".to_string()));
    io.emit(UiEvent::Info(
        "The model will now create comprehensive web solutions with modern UI and advanced features.".to_string(),
    ));
    Ok(())
}

async fn plan_mode<C: Collaborator, P: ActionParser>(
    ctl: &SessionController<'_, C, P>,
    ctx: &mut SessionContext,
    io: &mut dyn Interaction,
) -> Result<()> {
    let reply = ctl
        .exchange(ctx, io, CallSite::Turn, prompts::plan_mode_prompt())
        .await
        .context("Error enabling plan mode")?;
    if !reply.contains(prompts::PLAN_MODE_MARKER) {
        bail!("Error enabling plan mode: the model did not acknowledge it");
    }
    io.emit(UiEvent::Success(
        "Plan mode enabled! All requests will now follow iteration plans automatically.".to_string(),
    ));
    Ok(())
}

// ── Images ────────────────────────────────────────────────────────────────────

fn image_path(root: &Path, raw: &str) -> PathBuf {
    let p = Path::new(raw.trim());
    if p.is_absolute() { p.to_path_buf() } else { root.join(p) }
}

fn image_mime(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_lowercase();
    match ext.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "gif" => Some("image/gif"),
        "webp" => Some("image/webp"),
        _ => None,
    }
}

fn add_image(ctx: &mut SessionContext, io: &mut dyn Interaction, raw: &str) -> Result<()> {
    let path = image_path(&ctx.project_dir, raw);
    if image_mime(&path) != Some("image/png") {
        bail!("Only PNG images are supported: {raw}");
    }
    let bytes = std::fs::read(&path).with_context(|| format!("Error reading image {}", path.display()))?;
    tracing::info!(project = %ctx.project, path = %path.display(), bytes = bytes.len(), "image attached");
    ctx.conversation.attach(ConversationMessage {
        parts: vec![ContentPart::inline_binary("image/png", bytes)],
        role: Role::User,
    });
    io.emit(UiEvent::Success(
        "Image added to context. Your next prompt will include the image.".to_string(),
    ));
    io.emit(UiEvent::Dim(
        "The image will be removed from context after your next prompt.".to_string(),
    ));
    Ok(())
}

async fn analyze_image<C: Collaborator, P: ActionParser>(
    ctl: &SessionController<'_, C, P>,
    ctx: &mut SessionContext,
    io: &mut dyn Interaction,
    raw: &str,
) -> Result<()> {
    let path = image_path(&ctx.project_dir, raw);
    let Some(mime) = image_mime(&path) else {
        bail!("Unsupported image type: {raw}");
    };
    let bytes = std::fs::read(&path).with_context(|| format!("Image file not found: {}", path.display()))?;

    io.emit(UiEvent::Info("Reading and analyzing image...".to_string()));
    let request = ConversationMessage {
        parts: vec![
            ContentPart::text(prompts::IMAGE_ANALYSIS_PROMPT),
            ContentPart::inline_binary(mime, bytes),
        ],
        role: Role::User,
    };
    let policy = RetryPolicy::for_site(ctl.retries(), CallSite::ImageAnalysis);
    let description = policy
        .call(CallSite::ImageAnalysis, ctl.collaborator(), &[request], io)
        .await
        .with_context(|| format!("Error analyzing image after {} attempts", policy.max_attempts))?;
    io.emit(UiEvent::Block {
        title: "Visual Analysis:".to_string(),
        body: description.clone(),
    });

    io.emit(UiEvent::Info(
        "What would you like to implement based on this design? (Type your request or 'skip' to continue)"
            .to_string(),
    ));
    io.emit(UiEvent::Dim(
        "Example: Create a landing page with similar layout and colors".to_string(),
    ));
    let Some(answer) = io.ask("Your implementation request: ") else {
        return Ok(());
    };
    let answer = answer.trim();
    if answer.is_empty() || answer.eq_ignore_ascii_case("skip") {
        return Ok(());
    }

    ctl.run_turn(ctx, io, &prompts::implementation_prompt(&description, answer))
        .await
        .context("Error processing request")?;
    Ok(())
}
