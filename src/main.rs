mod actions;
mod client;
mod commands;
mod config;
mod conversation;
mod error;
mod logging;
mod plan;
mod project;
mod prompts;
mod retry;
mod session;
mod ui;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use config::{ConfigFile, ResolvedConfig};
use conversation::ConversationStore;
use project::ProjectRegistry;
use session::{SessionContext, SessionController};
use ui::{ConsoleInteraction, Interaction, UiEvent};

#[derive(Parser, Debug)]
#[command(
    name = "projwright",
    about = "A terminal project assistant that turns model replies into confirmed file and shell actions",
    long_about = None,
)]
struct Args {
    /// Open this project directly instead of showing the project menu
    #[arg(long)]
    project: Option<String>,

    /// Profile to use from config file
    #[arg(short, long, env = "PROJWRIGHT_PROFILE")]
    profile: Option<String>,

    /// Override endpoint URL
    #[arg(long, env = "PROJWRIGHT_ENDPOINT")]
    endpoint: Option<String>,

    /// Override model name
    #[arg(short, long, env = "PROJWRIGHT_MODEL")]
    model: Option<String>,

    /// Override API key
    #[arg(long, env = "PROJWRIGHT_API_KEY")]
    api_key: Option<String>,

    /// Mirror debug logs to stderr
    #[arg(short, long)]
    verbose: bool,

    /// Write a default config file to ~/.config/projwright/config.toml and exit
    #[arg(long)]
    init: bool,

    /// List available profiles and exit
    #[arg(long)]
    profiles: bool,

    /// Generate shell completions and print to stdout (bash, zsh, fish, elvish)
    #[arg(long, value_name = "SHELL")]
    completions: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // ── --init ────────────────────────────────────────────────────────────────
    if args.init {
        let path = ConfigFile::write_default_if_missing()?;
        println!("Config written to: {}", path.display());
        println!("Edit it, then run: projwright");
        return Ok(());
    }

    // ── --completions ─────────────────────────────────────────────────────────
    if let Some(shell_name) = &args.completions {
        return generate_completions(shell_name);
    }

    let file = ConfigFile::load()?;

    // ── --profiles ────────────────────────────────────────────────────────────
    if args.profiles {
        print_profiles(&file);
        return Ok(());
    }

    let resolved = ResolvedConfig::resolve(
        &file,
        args.profile.as_deref(),
        args.endpoint.as_deref(),
        args.model.as_deref(),
        args.api_key.as_deref(),
    );

    let _guard = logging::init(&resolved.logs_dir(), args.verbose)?;
    tracing::info!(
        profile = %resolved.profile_name,
        endpoint = %resolved.endpoint,
        model = %resolved.model,
        "starting"
    );

    let client = client::Client::new(&resolved)?;
    let store = ConversationStore::new(resolved.chats_dir());
    let registry = ProjectRegistry::new(resolved.projects_dir());
    let controller = SessionController::new(&client, &store, resolved.retries);
    let mut io = ConsoleInteraction::new()?;

    io.emit(UiEvent::Dim(format!(
        "projwright {}  ·  {}  ·  {}",
        env!("CARGO_PKG_VERSION"),
        resolved.profile_name,
        resolved.model
    )));

    if let Some(name) = args.project.as_deref() {
        registry.ensure(name)?;
        return open_project(&registry, &controller, &mut io, name).await;
    }

    project_menu(&registry, &controller, &mut io).await
}

// ── Project menu ──────────────────────────────────────────────────────────────

async fn project_menu<C: client::Collaborator>(
    registry: &ProjectRegistry,
    controller: &SessionController<'_, C>,
    io: &mut dyn Interaction,
) -> Result<()> {
    loop {
        let projects = registry.list()?;
        io.emit(UiEvent::Heading("Projects:".to_string()));
        if projects.is_empty() {
            io.emit(UiEvent::Dim("No projects yet".to_string()));
        }
        for (i, name) in projects.iter().enumerate() {
            io.emit(UiEvent::Item {
                text: format!("{}. {name}", i + 1),
                detail: None,
            });
        }
        io.emit(UiEvent::Info(
            "Enter a number to open a project, 'n' to create one, 'd' to delete one, 'q' to quit".to_string(),
        ));

        let Some(choice) = io.ask("> ") else {
            return Ok(());
        };
        match choice.trim() {
            "" => continue,
            "q" | "exit" => return Ok(()),
            "n" => {
                let Some(name) = io.ask("Project name: ") else { continue };
                let name = name.trim();
                match registry.create(name) {
                    Ok(_) => {
                        io.emit(UiEvent::Success(format!("Created project: {name}")));
                        open_project(registry, controller, io, name).await?;
                    }
                    Err(e) => io.emit(UiEvent::Error(format!("{e:#}"))),
                }
            }
            "d" => {
                let Some(name) = pick_project(io, &projects, "Project to delete (number or name): ") else {
                    continue;
                };
                if !io.confirm(&format!("Delete project '{name}' and all its chats?")) {
                    continue;
                }
                match registry.delete(&name, controller.store()) {
                    Ok(()) => io.emit(UiEvent::Success(format!("Deleted project: {name}"))),
                    Err(e) => io.emit(UiEvent::Error(format!("{e:#}"))),
                }
            }
            other => match select(&projects, other) {
                Some(name) => open_project(registry, controller, io, &name).await?,
                None => io.emit(UiEvent::Error(format!("No such project: {other}"))),
            },
        }
    }
}

fn pick_project(io: &mut dyn Interaction, projects: &[String], prompt: &str) -> Option<String> {
    let answer = io.ask(prompt)?;
    let picked = select(projects, answer.trim());
    if picked.is_none() {
        io.emit(UiEvent::Error(format!("No such project: {}", answer.trim())));
    }
    picked
}

/// A 1-based index into `projects`, or an exact name.
fn select(projects: &[String], answer: &str) -> Option<String> {
    if let Ok(n) = answer.parse::<usize>() {
        return n.checked_sub(1).and_then(|i| projects.get(i)).cloned();
    }
    projects.iter().find(|p| *p == answer).cloned()
}

// ── Project session ───────────────────────────────────────────────────────────

async fn open_project<C: client::Collaborator>(
    registry: &ProjectRegistry,
    controller: &SessionController<'_, C>,
    io: &mut dyn Interaction,
    name: &str,
) -> Result<()> {
    let dir = registry.dir(name);
    let store = controller.store();
    let chat = store.default_chat(name);
    let loaded = store
        .load(name, &chat, &prompts::system_prompt(name, &dir))
        .with_context(|| format!("Failed to open chat '{chat}' of project '{name}'"))?;
    for w in loaded.warnings {
        io.emit(UiEvent::Warning(w));
    }
    let mut ctx = SessionContext::new(name, dir, loaded.conversation);
    tracing::info!(project = name, chat = %chat, "project opened");

    io.emit(UiEvent::Success(format!("Working on project: {name} (chat: {chat})")));
    io.emit(UiEvent::Dim("Type /help for commands, exit to leave the project".to_string()));

    loop {
        commands::show_persistent_files(&ctx, io);
        let Some(line) = io.ask("\nWhat would you like me to do? ") else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match commands::parse(line) {
            Some(Ok(cmd)) => {
                if commands::dispatch(cmd, controller, &mut ctx, io).await == commands::Flow::Exit {
                    break;
                }
            }
            Some(Err(usage)) => io.emit(UiEvent::Error(usage.to_string())),
            None => match controller.run_turn(&mut ctx, io, line).await {
                Ok(result) => {
                    if let Some(summary) = result.summary() {
                        tracing::info!(project = name, %summary, "turn finished");
                        io.emit(UiEvent::Dim(summary));
                    }
                }
                Err(e) => {
                    tracing::error!(project = name, error = %e, "turn failed");
                    io.emit(UiEvent::Error(format!("Error: {e}")));
                }
            },
        }
    }

    tracing::info!(project = name, "project closed");
    Ok(())
}

// ── Profiles ──────────────────────────────────────────────────────────────────

fn print_profiles(file: &ConfigFile) {
    let mut entries: Vec<(&String, &config::Profile)> = file.profiles.iter().collect();
    entries.sort_by(|a, b| a.0.cmp(b.0));
    println!();
    println!("  Profiles");
    if entries.is_empty() {
        println!("  (none configured; run projwright --init)");
    }
    for (name, p) in entries {
        let marker = if *name == file.default_profile { " ←" } else { "" };
        println!("  {name}{marker}");
        println!("    endpoint  {}", p.endpoint);
        println!("    model     {}", p.model);
        println!("    timeout   {}s", p.timeout_secs);
        println!();
    }
}

// ── Shell completions ─────────────────────────────────────────────────────────

fn generate_completions(shell_name: &str) -> Result<()> {
    use clap_complete::{Shell, generate};

    let shell: Shell = match shell_name.to_lowercase().as_str() {
        "bash" => Shell::Bash,
        "zsh" => Shell::Zsh,
        "fish" => Shell::Fish,
        "elvish" => Shell::Elvish,
        _ => anyhow::bail!("Unknown shell: {shell_name} (supported: bash, zsh, fish, elvish)"),
    };

    let mut cmd = Args::command();
    generate(shell, &mut cmd, "projwright", &mut std::io::stdout());
    Ok(())
}
