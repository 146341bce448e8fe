use crate::agent::AgentFactory;
use crate::audit::{AuditEvent, AuditKind, AuditSink};
use crate::context::EvaluationContext;
use crate::error::EngineResult;
use crate::oracle::{AdmissionOracle, PowerState};
use crate::session::AuthToken;
use authd_credential::{AccountDirectory, GroupOracle};
use authd_rules::{load_rule, resolve, DelegationPolicy, Rule, RuleClass, RuleStore};
use authd_types::{AuthFlags, AuthItems, Clock, Outcome, RuleFlags};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, error, info};

pub const DEFAULT_MAX_DELEGATION_DEPTH: usize = 32;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub max_delegation_depth: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_delegation_depth: DEFAULT_MAX_DELEGATION_DEPTH,
        }
    }
}

/// External parties the engine consults.
#[derive(Clone)]
pub struct Collaborators {
    pub directory: Arc<dyn AccountDirectory>,
    pub groups: Arc<dyn GroupOracle>,
    pub agents: Arc<dyn AgentFactory>,
    pub admission: Arc<dyn AdmissionOracle>,
    pub power: Arc<dyn PowerState>,
    pub audit: Arc<dyn AuditSink>,
    pub clock: Arc<dyn Clock>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AuthorizationRequest {
    pub rights: Vec<String>,
    pub environment: AuthItems,
    pub flags: AuthFlags,
}

impl AuthorizationRequest {
    pub fn new<I, S>(rights: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            rights: rights.into_iter().map(Into::into).collect(),
            environment: AuthItems::new(),
            flags: AuthFlags::empty(),
        }
    }

    pub fn with_flags(mut self, flags: AuthFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_environment(mut self, environment: AuthItems) -> Self {
        self.environment = environment;
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Authorization {
    pub outcome: Outcome,
    pub granted: BTreeSet<String>,
}

/// The decision procedure.
pub struct Engine {
    pub(crate) store: Arc<dyn RuleStore>,
    pub(crate) env: Collaborators,
    config: EngineConfig,
}

impl Engine {
    pub fn new(store: Arc<dyn RuleStore>, env: Collaborators, config: EngineConfig) -> Self {
        Self { store, env, config }
    }

    pub fn store(&self) -> &Arc<dyn RuleStore> {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub(crate) fn now(&self) -> DateTime<Utc> {
        self.env.clock.now()
    }

    pub(crate) fn audit(
        &self,
        ctx: &EvaluationContext<'_>,
        kind: AuditKind,
        mechanism: Option<String>,
        outcome: Outcome,
    ) {
        let process = ctx.token.process();
        self.env.audit.record(AuditEvent {
            timestamp: self.now(),
            kind,
            right: ctx.right.clone(),
            rule: (!ctx.rule.is_empty()).then(|| ctx.rule.clone()),
            mechanism,
            outcome,
            reason: ctx.reason,
            pid: process.pid(),
            uid: process.uid(),
        });
    }

    /// Decide every right of `request` for `token`.
    ///
    /// Acquired credentials are committed to the token, and shared ones
    /// to the session, only when the batch succeeds with `EXTEND_RIGHTS`
    /// and without `DESTROY_RIGHTS`.
    pub fn authorize(&self, token: &AuthToken, request: &AuthorizationRequest) -> Authorization {
        token.reset_dismissed();
        let mut ctx = EvaluationContext::new(
            token,
            request.flags,
            &request.environment,
            self.config.max_delegation_depth,
        );
        let partial = ctx.has(AuthFlags::PARTIAL_RIGHTS);
        let mut outcome = Outcome::Success;

        for right in &request.rights {
            ctx.begin_right(right);
            let result = self.authorize_right(&mut ctx, right);
            info!(right = %right, outcome = ?result, pid = token.process().pid(), "right decided");
            self.audit(&ctx, AuditKind::Decision, None, result);

            if result.is_success() {
                ctx.granted_rights.insert(right.clone());
                continue;
            }
            outcome = result;
            if !partial || result.aborts() {
                break;
            }
        }

        if partial && !outcome.aborts() && !ctx.granted_rights.is_empty() {
            outcome = Outcome::Success;
        }
        if ctx.is_dismissed() {
            debug!("evaluation dismissed");
            outcome = Outcome::Denied;
        }

        if outcome.is_success()
            && ctx.has(AuthFlags::EXTEND_RIGHTS)
            && !ctx.has(AuthFlags::DESTROY_RIGHTS)
        {
            self.commit_credentials(&ctx);
            token.merge_context(&ctx.context);
        }
        ctx.release_agents();

        let granted = if outcome.is_success() {
            std::mem::take(&mut ctx.granted_rights)
        } else {
            BTreeSet::new()
        };
        Authorization { outcome, granted }
    }

    fn commit_credentials(&self, ctx: &EvaluationContext<'_>) {
        let token = ctx.token;
        let session = token.session();
        for credential in &ctx.credentials {
            token.add_credential(credential.clone());
            if !credential.is_shared() {
                continue;
            }
            // least-privilege sessions only ever see right credentials
            if ctx.is_least_privileged() && !credential.is_right() {
                continue;
            }
            session.add_credential(credential.clone());
        }
    }

    fn authorize_right(&self, ctx: &mut EvaluationContext<'_>, right: &str) -> Outcome {
        let token = ctx.token;
        if token.is_sandboxed()
            && !self
                .env
                .admission
                .sandbox_allows(token.process().pid(), right)
        {
            info!(right, pid = token.process().pid(), "sandbox refused right");
            self.audit(ctx, AuditKind::AdmissionDenied, None, Outcome::Denied);
            return Outcome::Denied;
        }

        let rule = match resolve(self.store.as_ref(), right) {
            Ok(rule) => rule,
            Err(e) => {
                error!(right, error = %e, "rule resolution failed");
                return Outcome::Internal;
            }
        };
        self.evaluate(ctx, &rule)
    }

    /// Evaluate `rule` for the current right.
    pub(crate) fn evaluate(&self, ctx: &mut EvaluationContext<'_>, rule: &Rule) -> Outcome {
        if rule.has(RuleFlags::ENTITLED) && ctx.token.entitled_for_right(&ctx.right) {
            debug!(right = %ctx.right, rule = %rule.name, "entitlement bypass");
            self.audit(ctx, AuditKind::Bypass, None, Outcome::Success);
            return Outcome::Success;
        }
        if rule.has(RuleFlags::REQUIRE_APPLE_SIGNED) && !ctx.token.is_apple_signed() {
            info!(right = %ctx.right, rule = %rule.name, "caller not platform signed");
            self.audit(ctx, AuditKind::Bypass, None, Outcome::Denied);
            return Outcome::Denied;
        }

        if let Err(e) = ctx.enter(rule) {
            error!(right = %ctx.right, error = %e, "delegation guard tripped");
            return Outcome::Internal;
        }
        let outcome = match &rule.class {
            RuleClass::Allow => Outcome::Success,
            RuleClass::Deny => Outcome::Denied,
            RuleClass::User(_) => self.evaluate_user(ctx, rule),
            RuleClass::Rule(policy) => self.evaluate_delegation(ctx, policy),
            RuleClass::Mechanism(_) => self.evaluate_mechanisms_class(ctx, rule),
        };
        ctx.leave();
        debug!(right = %ctx.right, rule = %rule.name, class = rule.class.name(), outcome = ?outcome, "rule evaluated");
        outcome
    }

    /// k-of-n over the delegates, in order.
    fn evaluate_delegation(
        &self,
        ctx: &mut EvaluationContext<'_>,
        policy: &DelegationPolicy,
    ) -> Outcome {
        let total = policy.delegates.len();
        if total == 0 {
            return Outcome::Denied;
        }
        let k_of_n = match policy.k_of_n.map_or(0, |k| k as usize) {
            0 => total,
            k => k,
        };
        if k_of_n > total {
            debug!(required = k_of_n, delegates = total, "threshold cannot be met");
            return Outcome::Denied;
        }

        let mut successes = 0;
        for (index, reference) in policy.delegates.iter().enumerate() {
            let delegate = match self.load_delegate(reference.id) {
                Ok(rule) => rule,
                Err(e) => {
                    error!(delegate = %reference.name, error = %e, "delegate load failed");
                    return Outcome::Internal;
                }
            };
            let outcome = self.evaluate(ctx, &delegate);
            if outcome.is_success() {
                successes += 1;
                if successes == k_of_n {
                    return Outcome::Success;
                }
                continue;
            }
            if outcome.aborts() {
                return outcome;
            }
            let remaining = total - index - 1;
            if remaining < k_of_n - successes {
                return outcome;
            }
        }
        Outcome::Denied
    }

    fn load_delegate(&self, id: authd_rules::RuleId) -> EngineResult<Rule> {
        let row = self
            .store
            .get_rule_by_id(id)?
            .ok_or_else(|| authd_rules::StoreError::NotFound(format!("rule id {id}")))?;
        Ok(load_rule(self.store.as_ref(), row)?)
    }

    /// Mechanisms of the `authenticate` rule, loaded once per call.
    pub(crate) fn authenticate_mechanisms(
        &self,
        ctx: &mut EvaluationContext<'_>,
    ) -> Vec<authd_rules::Mechanism> {
        if ctx.authenticate_rule.is_none() {
            match authd_rules::fetch_rule(self.store.as_ref(), authd_types::AUTHENTICATE_RULE) {
                Ok(rule) => ctx.authenticate_rule = rule,
                Err(e) => error!(error = %e, "loading authenticate rule failed"),
            }
        }
        ctx.authenticate_rule
            .as_ref()
            .map(|rule| rule.mechanisms().to_vec())
            .unwrap_or_default()
    }
}
