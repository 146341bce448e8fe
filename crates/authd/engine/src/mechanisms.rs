use crate::audit::AuditKind;
use crate::context::EvaluationContext;
use crate::engine::Engine;
use authd_credential::Credential;
use authd_rules::{BuiltinKind, Mechanism, MechanismKind, Rule};
use authd_types::items::keys;
use authd_types::{
    AuthItems, Outcome, Reason, RuleFlags, SessionAttributes, Uid, Visibility,
    LOGIN_CONSOLE_RIGHT,
};
use tracing::{debug, error, info, warn};

impl Engine {
    /// Class `evaluate-mechanisms`.
    pub(crate) fn evaluate_mechanisms_class(
        &self,
        ctx: &mut EvaluationContext<'_>,
        rule: &Rule,
    ) -> Outcome {
        let mechanisms = rule.mechanisms();
        if self.env.power.is_dark_wake() && mechanisms.iter().any(|m| !m.privileged) {
            info!(right = %ctx.right, rule = %rule.name, "dark wake, refusing interactive mechanisms");
            return Outcome::Denied;
        }
        if mechanisms.is_empty() {
            return Outcome::Success;
        }

        let budget = rule.tries();
        let mut outcome = Outcome::Denied;
        ctx.tries = 0;
        while outcome == Outcome::Denied && (budget == 0 || ctx.tries < budget) {
            if ctx.is_dismissed() {
                return Outcome::Denied;
            }
            ctx.hints.set(keys::TRIES, ctx.tries);
            ctx.hints.set(keys::RETRY_REASON, ctx.reason.code());

            outcome = self.evaluate_mechanisms(ctx, rule, mechanisms);
            if outcome.is_success() {
                self.adopt_mechanism_identity(ctx, rule);
            } else if outcome == Outcome::Denied {
                ctx.reason = Reason::InvalidPassphrase;
            }
            ctx.tries += 1;
        }
        outcome
    }

    /// Install the credential of whoever the mechanisms identified, if any.
    fn adopt_mechanism_identity(&self, ctx: &mut EvaluationContext<'_>, rule: &Rule) {
        let session = ctx.token.session().clone();
        if let Some(uid) = ctx
            .mechanism_context
            .get_u64(keys::UID)
            .and_then(|uid| u32::try_from(uid).ok())
            .map(Uid)
        {
            let credential = Credential::for_uid(uid, self.env.directory.as_ref(), self.now());
            if credential.is_valid() {
                ctx.install_credential(credential, rule);
                if uid == session.owner_uid() {
                    session.set_attribute(SessionAttributes::HAS_AUTHENTICATED);
                }
            }
        }
        if ctx.right == LOGIN_CONSOLE_RIGHT && !ctx.mechanism_context.contains(keys::AUTO_LOGIN) {
            session.set_attribute(SessionAttributes::HAS_AUTHENTICATED);
        }
    }

    fn immutable_hints(&self, ctx: &EvaluationContext<'_>) -> AuthItems {
        let process = ctx.token.process();
        let mut hints = AuthItems::new();
        hints.set(keys::AUTHORIZE_RIGHT, ctx.right.as_str());
        hints.set(keys::AUTHORIZE_RULE, ctx.rule.as_str());
        hints.set(keys::CLIENT_PID, i64::from(process.pid()));
        hints.set(keys::CLIENT_UID, process.uid().0);
        hints.set(keys::CREATOR_PID, i64::from(ctx.token.creator_pid()));
        if let Some(code) = process.code() {
            hints.set(keys::CLIENT_PATH, code.identifier.as_str());
        }
        hints
    }

    /// Run `mechanisms` in order, rewinding when an earlier agent reports
    /// an interrupt.
    pub(crate) fn evaluate_mechanisms(
        &self,
        ctx: &mut EvaluationContext<'_>,
        rule: &Rule,
        mechanisms: &[Mechanism],
    ) -> Outcome {
        let immutable = self.immutable_hints(ctx);
        let mut context = ctx.sticky_context.clone();
        let mut hints = ctx.hints.clone();
        // context and hints as each agent last left them
        let mut saved: Vec<Option<(AuthItems, AuthItems)>> = vec![None; mechanisms.len()];
        let mut outcome = Outcome::Success;
        let mut index = 0;

        while index < mechanisms.len() {
            if ctx.is_dismissed() {
                outcome = Outcome::Denied;
                break;
            }
            let mechanism = &mechanisms[index];

            outcome = match mechanism.kind() {
                MechanismKind::Builtin(BuiltinKind::Entitled) => {
                    if ctx.token.entitled_for_right(&ctx.right) {
                        Outcome::Success
                    } else {
                        Outcome::Denied
                    }
                }
                MechanismKind::External(_) => {
                    let result = self.run_agent(ctx, mechanism, &mut hints, &mut context, &immutable);
                    saved[index] = Some((context.clone(), hints.clone()));
                    if let Some(restart) = self.interrupted_before(ctx, mechanisms, index) {
                        if let Some(agent) = ctx.agents.get_mut(mechanism) {
                            agent.deactivate();
                        }
                        for agent in ctx.agents.values_mut() {
                            agent.clear_interrupt();
                        }
                        if let Some((c, h)) = saved[restart].take() {
                            context = c;
                            hints = h;
                        }
                        ctx.reason = Reason::WorldChanged;
                        info!(
                            right = %ctx.right,
                            mechanism = %mechanisms[restart],
                            "mechanism interrupted, restarting"
                        );
                        self.audit(
                            ctx,
                            AuditKind::Restart,
                            Some(mechanisms[restart].to_string()),
                            Outcome::Success,
                        );
                        index = restart;
                        continue;
                    }
                    result
                }
            };
            self.audit(ctx, AuditKind::Mechanism, Some(mechanism.to_string()), outcome);
            if !outcome.is_success() {
                break;
            }
            index += 1;
        }

        ctx.hints = hints;
        match outcome {
            Outcome::Success => {
                ctx.context
                    .copy_with_visibility(&context, Visibility::Extractable);
                if rule.has(RuleFlags::EXTRACT_PASSWORD) {
                    if let Some(password) = context.get(keys::PASSWORD) {
                        ctx.context
                            .set_with(keys::PASSWORD, password.clone(), Visibility::Extractable);
                    }
                }
            }
            Outcome::Denied => {
                ctx.sticky_context.clear();
                ctx.sticky_context
                    .copy_with_visibility(&context, Visibility::Sticky);
            }
            _ => {}
        }
        ctx.mechanism_context = context;
        debug!(right = %ctx.right, rule = %rule.name, outcome = ?outcome, "mechanisms evaluated");
        outcome
    }

    fn run_agent(
        &self,
        ctx: &mut EvaluationContext<'_>,
        mechanism: &Mechanism,
        hints: &mut AuthItems,
        context: &mut AuthItems,
        immutable: &AuthItems,
    ) -> Outcome {
        if !ctx.agents.contains_key(mechanism) {
            match self.env.agents.create(mechanism, ctx.token.session()) {
                Ok(agent) => {
                    ctx.agents.insert(mechanism.clone(), agent);
                }
                Err(e) => {
                    error!(mechanism = %mechanism, error = %e, "agent unavailable");
                    return Outcome::Internal;
                }
            }
        }
        let agent = match ctx.agents.get_mut(mechanism) {
            Some(agent) => agent,
            None => return Outcome::Internal,
        };
        let response = agent.run(hints, context, immutable);
        hints.merge(&response.hints);
        context.merge(&response.context);
        if response.result == crate::agent::AgentResult::Undefined {
            warn!(mechanism = %mechanism, "agent returned no verdict");
        }
        response.result.into()
    }

    /// Earliest mechanism before `index` whose agent raised an interrupt.
    fn interrupted_before(
        &self,
        ctx: &EvaluationContext<'_>,
        mechanisms: &[Mechanism],
        index: usize,
    ) -> Option<usize> {
        mechanisms[..index].iter().position(|m| {
            ctx.agents
                .get(m)
                .map_or(false, |agent| agent.interrupt_signal())
        })
    }
}
