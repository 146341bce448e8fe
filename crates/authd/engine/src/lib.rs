//! authd Engine - the authorization decision procedure.
//!
//! [`Engine::authorize`] resolves each requested right to its rule and
//! evaluates it recursively: entitlement and signing bypasses first, then
//! the rule class. User rules are satisfied from cached credentials or by
//! prompting through mechanism agents; delegation rules combine their
//! delegates k-of-n. Policy changes are gated through the same procedure
//! via synthesized `config.*` meta-rights.
//!
//! Every decision is an [`authd_types::Outcome`]; errors from the store
//! or the collaborators surface as `Outcome::Internal`.

#![deny(unsafe_code)]

mod admin;
mod agent;
mod audit;
mod context;
mod engine;
mod error;
mod mechanisms;
mod oracle;
mod session;
mod user;

pub use admin::{meta_right, Modification};
pub use agent::{AgentFactory, AgentResponse, AgentResult, MechanismAgent};
pub use audit::{AuditEvent, AuditKind, AuditLog, AuditRecord, AuditSink};
pub use context::EvaluationContext;
pub use engine::{
    Authorization, AuthorizationRequest, Collaborators, Engine, EngineConfig,
    DEFAULT_MAX_DELEGATION_DEPTH,
};
pub use error::{EngineError, EngineResult};
pub use oracle::{AdmissionOracle, AllowAllAdmission, FullWake, PowerState};
pub use session::{AuthToken, Process, Session, SessionId, ENTITLEMENT_RIGHTS, ENTITLEMENT_VPN};
