use authd_credential::{AccountDirectory, GroupOracle};
use authd_engine::{
    AgentFactory, AllowAllAdmission, AuditSink, Collaborators, EngineError, EngineResult,
    FullWake, MechanismAgent, Session,
};
use authd_rules::Mechanism;
use authd_types::SystemClock;
use std::sync::Arc;

/// Agent factory for hosts without a UI. Every mechanism that needs an
/// agent fails, which the engine reports as `Internal`.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoAgents;

impl AgentFactory for NoAgents {
    fn create(
        &self,
        mechanism: &Mechanism,
        session: &Session,
    ) -> EngineResult<Box<dyn MechanismAgent>> {
        Err(EngineError::Agent {
            mechanism: mechanism.to_string(),
            message: format!("no agent host for session {}", session.id()),
        })
    }
}

/// Collaborators for evaluating policy without prompting.
pub fn headless(
    directory: Arc<dyn AccountDirectory>,
    groups: Arc<dyn GroupOracle>,
    audit: Arc<dyn AuditSink>,
) -> Collaborators {
    Collaborators {
        directory,
        groups,
        agents: Arc::new(NoAgents),
        admission: Arc::new(AllowAllAdmission),
        power: Arc::new(FullWake),
        audit,
        clock: Arc::new(SystemClock),
    }
}
