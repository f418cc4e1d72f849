/// Shell command execution for `terminal` actions.
///
/// The command runs in the project root with the user's terminal attached, so
/// interactive tools and progress output work as they would in a normal shell.
use std::path::Path;

use tokio::process::Command;

use super::ExecutionOutcome;
use crate::error::ExecutionError;

fn shell(command: &str) -> Command {
    if cfg!(windows) {
        let mut cmd = Command::new("cmd");
        cmd.arg("/C").arg(command);
        cmd
    } else {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(command);
        cmd
    }
}

/// Run `command` to completion, or until the user presses Ctrl+C.
pub async fn run(command: &str, root: &Path) -> ExecutionOutcome {
    let mut child = match shell(command).current_dir(root).kill_on_drop(true).spawn() {
        Ok(c) => c,
        Err(source) => {
            return ExecutionOutcome::Failed(ExecutionError::Spawn {
                command: command.to_string(),
                source,
            });
        }
    };
    tracing::info!(command, root = %root.display(), "running terminal action");

    let status = tokio::select! {
        biased;
        _ = tokio::signal::ctrl_c() => {
            let _ = child.kill().await;
            tracing::warn!(command, "terminal action interrupted");
            return ExecutionOutcome::Interrupted;
        }
        status = child.wait() => status,
    };

    let status = match status {
        Ok(s) => s,
        Err(source) => {
            return ExecutionOutcome::Failed(ExecutionError::Spawn {
                command: command.to_string(),
                source,
            });
        }
    };

    match status.code() {
        Some(0) => ExecutionOutcome::Applied(format!("Command finished: {command}")),
        Some(code) => {
            tracing::warn!(command, code, "terminal action exited non-zero");
            ExecutionOutcome::Failed(ExecutionError::NonZeroExit {
                command: command.to_string(),
                code,
            })
        }
        None => ExecutionOutcome::Failed(ExecutionError::Terminated {
            command: command.to_string(),
        }),
    }
}

/// Tests that spawn shells run one at a time: the interrupt test signals the
/// whole test process, and every concurrent `run` would see it.
#[cfg(test)]
pub(crate) fn shell_test_guard() -> std::sync::MutexGuard<'static, ()> {
    static SHELLS: std::sync::Mutex<()> = std::sync::Mutex::new(());
    SHELLS.lock().unwrap_or_else(|e| e.into_inner())
}
