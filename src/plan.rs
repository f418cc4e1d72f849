/// Plan runner: asks the model for an iteration plan, then drives each step
/// through the normal turn cycle with checkpoints in between.
///
/// ```text
/// Idle → PlanProposed → IterationRunning → StepConfirm → StepRunning → … → IterationDone → Completed
/// ```
use regex::Regex;

use crate::actions::parser::ActionParser;
use crate::client::Collaborator;
use crate::prompts;
use crate::retry::CallSite;
use crate::session::{SessionContext, SessionController, TurnResult};
use crate::ui::{Interaction, UiEvent};

/// Stated limit per iteration. Advisory: longer iterations warn but still run.
pub const MAX_STEPS_PER_ITERATION: usize = 4;

// ── Plan types ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct Iteration {
    pub goal: String,
    pub steps: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Plan {
    pub iterations: Vec<Iteration>,
}

/// A plan as found in a reply, with the surrounding text the user sees.
#[derive(Debug, Clone, PartialEq)]
pub struct ProposedPlan {
    /// Raw text inside the ```plan fence
    pub block: String,
    pub plan: Plan,
    /// Text after the closing fence
    pub explanation: String,
}

/// Find the first ```plan fenced block in `reply` and parse it.
pub fn extract_plan(reply: &str) -> Option<ProposedPlan> {
    let fence = Regex::new(r"(?s)```plan[ \t]*\r?\n(.*?)\r?\n?```").ok()?;
    let caps = fence.captures(reply)?;
    let whole = caps.get(0)?;
    let block = caps.get(1)?.as_str().to_string();
    let plan = parse_plan(&block);
    if plan.iterations.is_empty() {
        return None;
    }
    Some(ProposedPlan {
        plan,
        block,
        explanation: reply[whole.end()..].trim().to_string(),
    })
}

/// Line-based parse of a plan block.
///
/// `Iteration N: goal` opens an iteration, `N. text` (or `N)`) adds a step, and
/// any other non-blank line continues the previous step. Markdown emphasis
/// around headers is ignored.
pub fn parse_plan(block: &str) -> Plan {
    let (Ok(header), Ok(step)) = (
        Regex::new(r"(?i)^[#*\s]*Iteration\s+\d+\s*[:.\-]\s*(.*?)[*\s]*$"),
        Regex::new(r"^\s*\d+[.)]\s*(.*)$"),
    ) else {
        return Plan::default();
    };

    let mut iterations: Vec<Iteration> = Vec::new();
    for line in block.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if let Some(c) = header.captures(trimmed) {
            iterations.push(Iteration {
                goal: c[1].trim().to_string(),
                steps: Vec::new(),
            });
            continue;
        }
        let Some(current) = iterations.last_mut() else {
            continue;
        };
        if let Some(c) = step.captures(trimmed) {
            current.steps.push(c[1].trim().to_string());
        } else if let Some(last) = current.steps.last_mut() {
            last.push(' ');
            last.push_str(trimmed);
        }
    }
    Plan { iterations }
}

// ── State machine ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanState {
    Idle,
    PlanProposed,
    IterationRunning { iteration: usize },
    StepConfirm { iteration: usize, step: usize },
    StepRunning { iteration: usize, step: usize },
    IterationDone { iteration: usize },
    Completed,
    /// The user stopped before the plan finished
    Aborted,
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct PlanReport {
    pub plan: Option<Plan>,
    pub steps_run: usize,
    pub steps_skipped: usize,
    pub steps_failed: usize,
}

pub struct PlanRunner<'c, 'a, C, P> {
    controller: &'c SessionController<'a, C, P>,
    state: PlanState,
}

impl<'c, 'a, C: Collaborator, P: ActionParser> PlanRunner<'c, 'a, C, P> {
    pub fn new(controller: &'c SessionController<'a, C, P>) -> Self {
        Self {
            controller,
            state: PlanState::Idle,
        }
    }

    pub fn state(&self) -> PlanState {
        self.state
    }

    fn enter(&mut self, next: PlanState) {
        tracing::debug!(from = ?self.state, to = ?next, "plan state");
        self.state = next;
    }

    /// Request a plan and, if the user agrees, execute it. Never returns an
    /// error: failures are reported and leave the runner in its last state.
    pub async fn run(
        &mut self,
        ctx: &mut SessionContext,
        io: &mut dyn Interaction,
        query: Option<&str>,
    ) -> PlanReport {
        let mut report = PlanReport::default();

        let reply = match self
            .controller
            .exchange(ctx, io, CallSite::Plan, prompts::planning_prompt(query))
            .await
        {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(project = %ctx.project, error = %e, "plan request failed");
                io.emit(UiEvent::Error(format!("Error creating plan: {e}")));
                return report;
            }
        };
        let Some(proposed) = extract_plan(&reply) else {
            io.emit(UiEvent::Error("Could not parse the plan format".to_string()));
            io.emit(UiEvent::Block {
                title: "AI Response:".to_string(),
                body: reply,
            });
            return report;
        };

        self.enter(PlanState::PlanProposed);
        show_plan(&proposed, io);
        report.plan = Some(proposed.plan.clone());
        if !io.confirm("Start executing iterations?") {
            return report;
        }

        for (i, iteration) in proposed.plan.iterations.iter().enumerate() {
            let i = i + 1;
            io.emit(UiEvent::Heading(format!("Starting Iteration {i}: {}", iteration.goal)));
            if i > 1 && !io.confirm("Continue to next iteration?") {
                self.enter(PlanState::Aborted);
                return report;
            }
            self.enter(PlanState::IterationRunning { iteration: i });

            for (j, step) in iteration.steps.iter().enumerate() {
                let j = j + 1;
                self.enter(PlanState::StepConfirm { iteration: i, step: j });
                io.emit(UiEvent::Info(format!("Step {j}: {step}")));
                if !io.confirm(&format!("Execute step {j}?")) {
                    report.steps_skipped += 1;
                    continue;
                }

                self.enter(PlanState::StepRunning { iteration: i, step: j });
                match self.run_step(ctx, io, i, j, step).await {
                    Ok(()) => report.steps_run += 1,
                    Err(reason) => {
                        report.steps_failed += 1;
                        tracing::warn!(project = %ctx.project, iteration = i, step = j, %reason, "plan step failed");
                        io.emit(UiEvent::Error(format!("Error in step {j}: {reason}")));
                        if !io.confirm("Continue to next step?") {
                            self.enter(PlanState::Aborted);
                            return report;
                        }
                    }
                }
            }
            self.enter(PlanState::IterationDone { iteration: i });
        }

        self.enter(PlanState::Completed);
        io.emit(UiEvent::Success("Project plan execution completed!".to_string()));
        report
    }

    async fn run_step(
        &self,
        ctx: &mut SessionContext,
        io: &mut dyn Interaction,
        iteration: usize,
        step_no: usize,
        step: &str,
    ) -> Result<(), String> {
        let prompt = prompts::step_prompt(iteration, step_no, step);
        let reply = self
            .controller
            .exchange(ctx, io, CallSite::Step, prompt)
            .await
            .map_err(|e| e.to_string())?;
        match self.controller.handle_reply(ctx, io, &reply).await {
            TurnResult::Malformed { error, .. } => Err(error.to_string()),
            _ => Ok(()),
        }
    }
}

fn show_plan(proposed: &ProposedPlan, io: &mut dyn Interaction) {
    io.emit(UiEvent::Block {
        title: "Project Iteration Plan:".to_string(),
        body: proposed.block.clone(),
    });
    if !proposed.explanation.is_empty() {
        io.emit(UiEvent::Block {
            title: "Plan Explanation:".to_string(),
            body: proposed.explanation.clone(),
        });
    }
    for (i, it) in proposed.plan.iterations.iter().enumerate() {
        if it.steps.len() > MAX_STEPS_PER_ITERATION {
            io.emit(UiEvent::Warning(format!(
                "Iteration {} has {} steps (more than {MAX_STEPS_PER_ITERATION})",
                i + 1,
                it.steps.len()
            )));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Retries;
    use crate::error::CollaboratorError;
    use crate::retry::testing::ScriptedCollaborator;
    use crate::session::tests::Fixture;
    use crate::ui::ScriptedInteraction;

    const PLAN_REPLY: &str = "Sure! ```plan\nIteration 1: Setup\n1. Create file\n2. Install deps\n```\nDone.";

    #[test]
    fn test_extracts_single_iteration() {
        let proposed = extract_plan(PLAN_REPLY).unwrap();
        assert_eq!(
            proposed.plan.iterations,
            vec![Iteration {
                goal: "Setup".to_string(),
                steps: vec!["Create file".to_string(), "Install deps".to_string()],
            }]
        );
        assert_eq!(proposed.explanation, "Done.");
    }

    #[test]
    fn test_multiple_iterations_and_continuations() {
        let block = "**Iteration 1: Scaffold**\n1. Create package.json\n   with a start script\n2) Add index.js\n\nIteration 2: Polish\n1. Write README";
        let plan = parse_plan(block);
        assert_eq!(plan.iterations.len(), 2);
        assert_eq!(plan.iterations[0].goal, "Scaffold");
        assert_eq!(
            plan.iterations[0].steps,
            vec!["Create package.json with a start script", "Add index.js"]
        );
        assert_eq!(plan.iterations[1].steps, vec!["Write README"]);
    }

    #[test]
    fn test_missing_fence_is_none() {
        assert!(extract_plan("Iteration 1: Setup\n1. Do it").is_none());
        assert!(extract_plan("```plan\njust prose\n```").is_none());
    }

    #[tokio::test]
    async fn test_run_executes_confirmed_steps() {
        let fx = Fixture::new();
        let mut ctx = fx.context();
        let step_reply = r#"[{"action_type":"create","path":"app.txt","content":"v1","description":"Create app.txt"}]"#;
        let collab = ScriptedCollaborator::replying(&[PLAN_REPLY, step_reply]);
        let ctl = SessionController::new(&collab, &fx.store, Retries::default());
        // start, step 1, proceed, create, step 2 declined
        let mut io = ScriptedInteraction::confirming(&[true, true, true, true, false]);

        let mut runner = PlanRunner::new(&ctl);
        let report = runner.run(&mut ctx, &mut io, Some("a tiny app")).await;

        assert_eq!(runner.state(), PlanState::Completed);
        assert_eq!(report.steps_run, 1);
        assert_eq!(report.steps_skipped, 1);
        assert!(ctx.project_dir.join("app.txt").exists());

        let step_request = &collab.requests.borrow()[1];
        assert!(step_request
            .last()
            .unwrap()
            .text()
            .starts_with("Current Iteration: 1\nCurrent Step: 1 - Create file"));
        // Plan and step exchanges were both persisted
        let saved = fx.store.load("demo", "main", "SYSTEM").unwrap().conversation;
        assert_eq!(saved.messages().len(), 5);
    }

    #[tokio::test]
    async fn test_declining_start_leaves_plan_proposed() {
        let fx = Fixture::new();
        let mut ctx = fx.context();
        let collab = ScriptedCollaborator::replying(&[PLAN_REPLY]);
        let ctl = SessionController::new(&collab, &fx.store, Retries::default());
        let mut io = ScriptedInteraction::confirming(&[false]);

        let mut runner = PlanRunner::new(&ctl);
        let report = runner.run(&mut ctx, &mut io, None).await;
        assert_eq!(runner.state(), PlanState::PlanProposed);
        assert!(report.plan.is_some());
        assert_eq!(collab.calls(), 1);
        assert!(io.saw("Plan Explanation:"));
    }

    #[tokio::test]
    async fn test_unparseable_plan_returns_to_idle() {
        let fx = Fixture::new();
        let mut ctx = fx.context();
        let collab = ScriptedCollaborator::replying(&["I would rather not."]);
        let ctl = SessionController::new(&collab, &fx.store, Retries::default());
        let mut io = ScriptedInteraction::default();

        let mut runner = PlanRunner::new(&ctl);
        let report = runner.run(&mut ctx, &mut io, None).await;
        assert_eq!(runner.state(), PlanState::Idle);
        assert!(report.plan.is_none());
        assert!(io.saw("Could not parse the plan format"));
    }

    #[tokio::test]
    async fn test_step_failure_can_abort_plan() {
        let fx = Fixture::new();
        let mut ctx = fx.context();
        let collab = ScriptedCollaborator::replying(&[PLAN_REPLY]);
        collab.push_err(CollaboratorError::EmptyResponse);
        let ctl = SessionController::new(&collab, &fx.store, Retries::default());
        // start, step 1, then decline "Continue to next step?"
        let mut io = ScriptedInteraction::confirming(&[true, true, false]);

        let mut runner = PlanRunner::new(&ctl);
        let report = runner.run(&mut ctx, &mut io, None).await;
        assert_eq!(runner.state(), PlanState::Aborted);
        assert_eq!(report.steps_failed, 1);
        assert_eq!(io.questions.last().unwrap(), "Continue to next step?");
        assert!(io.saw("Error in step 1"));
    }

    #[tokio::test]
    async fn test_second_iteration_needs_confirmation_and_long_iterations_warn() {
        let fx = Fixture::new();
        let mut ctx = fx.context();
        let reply = "```plan\nIteration 1: A\n1. a\n2. b\n3. c\n4. d\n5. e\n\nIteration 2: B\n1. f\n```";
        let collab = ScriptedCollaborator::replying(&[reply]);
        let ctl = SessionController::new(&collab, &fx.store, Retries::default());
        // start, skip five steps, stop before iteration 2
        let mut io =
            ScriptedInteraction::confirming(&[true, false, false, false, false, false, false]);

        let mut runner = PlanRunner::new(&ctl);
        let report = runner.run(&mut ctx, &mut io, None).await;
        assert!(io.saw("Iteration 1 has 5 steps"));
        assert_eq!(report.steps_skipped, 5);
        assert_eq!(io.questions.last().unwrap(), "Continue to next iteration?");
        assert_eq!(runner.state(), PlanState::Aborted);
    }
}
