/// Bounded retry around collaborator calls, configured per call site.
use crate::client::Collaborator;
use crate::config::Retries;
use crate::conversation::ConversationMessage;
use crate::error::CollaboratorError;
use crate::ui::{Interaction, UiEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallSite {
    Turn,
    Plan,
    Step,
    Codebase,
    CommandAnalysis,
    ImageAnalysis,
}

impl CallSite {
    pub fn label(self) -> &'static str {
        match self {
            CallSite::Turn => "turn",
            CallSite::Plan => "plan",
            CallSite::Step => "step",
            CallSite::Codebase => "codebase",
            CallSite::CommandAnalysis => "command_analysis",
            CallSite::ImageAnalysis => "image_analysis",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
}

impl RetryPolicy {
    pub fn for_site(retries: &Retries, site: CallSite) -> Self {
        let n = match site {
            CallSite::Turn => retries.turn,
            CallSite::Plan => retries.plan,
            CallSite::Step => retries.step,
            CallSite::Codebase => retries.codebase,
            CallSite::CommandAnalysis => retries.command_analysis,
            CallSite::ImageAnalysis => retries.image_analysis,
        };
        Self {
            max_attempts: n.max(1),
        }
    }

    /// Call the collaborator until it succeeds or attempts run out. No backoff.
    pub async fn call<C: Collaborator>(
        &self,
        site: CallSite,
        collaborator: &C,
        messages: &[ConversationMessage],
        io: &mut dyn Interaction,
    ) -> Result<String, CollaboratorError> {
        let mut attempt = 1;
        loop {
            match collaborator.complete(messages).await {
                Ok(text) => return Ok(text),
                Err(e) if attempt < self.max_attempts => {
                    tracing::warn!(site = site.label(), attempt, max = self.max_attempts, error = %e, "model call failed, retrying");
                    io.emit(UiEvent::Warning(format!(
                        "Retry {attempt}/{}: {e}",
                        self.max_attempts
                    )));
                    attempt += 1;
                }
                Err(e) => {
                    tracing::error!(site = site.label(), attempt, error = %e, "model call failed");
                    return Err(e);
                }
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::cell::RefCell;
    use std::collections::VecDeque;

    use super::*;

    /// Collaborator double: replays canned results and records every request.
    #[derive(Default)]
    pub struct ScriptedCollaborator {
        pub replies: RefCell<VecDeque<Result<String, CollaboratorError>>>,
        pub requests: RefCell<Vec<Vec<ConversationMessage>>>,
    }

    impl ScriptedCollaborator {
        pub fn replying(replies: &[&str]) -> Self {
            Self {
                replies: RefCell::new(replies.iter().map(|r| Ok(r.to_string())).collect()),
                ..Default::default()
            }
        }

        pub fn push_err(&self, e: CollaboratorError) {
            self.replies.borrow_mut().push_back(Err(e));
        }

        pub fn push_ok(&self, reply: &str) {
            self.replies.borrow_mut().push_back(Ok(reply.to_string()));
        }

        pub fn last_request(&self) -> Vec<ConversationMessage> {
            self.requests.borrow().last().cloned().unwrap_or_default()
        }

        pub fn calls(&self) -> usize {
            self.requests.borrow().len()
        }
    }

    impl Collaborator for ScriptedCollaborator {
        async fn complete(
            &self,
            messages: &[ConversationMessage],
        ) -> Result<String, CollaboratorError> {
            self.requests.borrow_mut().push(messages.to_vec());
            self.replies
                .borrow_mut()
                .pop_front()
                .unwrap_or(Err(CollaboratorError::EmptyResponse))
        }
    }
}
