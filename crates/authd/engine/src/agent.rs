use crate::error::EngineResult;
use crate::session::Session;
use authd_rules::Mechanism;
use authd_types::{AuthItems, Outcome};
use serde::{Deserialize, Serialize};

/// Verdict of one mechanism run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AgentResult {
    Allow,
    Deny,
    UserCanceled,
    /// The agent could not produce a verdict.
    Undefined,
}

impl From<AgentResult> for Outcome {
    fn from(result: AgentResult) -> Self {
        match result {
            AgentResult::Allow => Outcome::Success,
            AgentResult::Deny => Outcome::Denied,
            AgentResult::UserCanceled => Outcome::Canceled,
            AgentResult::Undefined => Outcome::Internal,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AgentResponse {
    pub result: AgentResult,
    /// Merged over the running hints.
    pub hints: AuthItems,
    /// Merged over the running context.
    pub context: AuthItems,
}

impl AgentResponse {
    pub fn new(result: AgentResult) -> Self {
        Self {
            result,
            hints: AuthItems::new(),
            context: AuthItems::new(),
        }
    }
}

/// An out-of-process authentication step, usually one that prompts.
///
/// `run` blocks until the agent answers. The engine never holds a store
/// lock while it waits.
pub trait MechanismAgent: Send {
    fn run(
        &mut self,
        hints: &AuthItems,
        context: &AuthItems,
        immutable_hints: &AuthItems,
    ) -> AgentResponse;

    /// The world this agent acted on changed and it must run again.
    fn interrupt_signal(&self) -> bool;

    fn clear_interrupt(&mut self);

    fn deactivate(&mut self);
}

/// Spawns agents for external mechanisms.
pub trait AgentFactory: Send + Sync {
    fn create(&self, mechanism: &Mechanism, session: &Session)
        -> EngineResult<Box<dyn MechanismAgent>>;
}
