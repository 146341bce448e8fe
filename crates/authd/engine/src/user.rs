use crate::audit::AuditKind;
use crate::context::EvaluationContext;
use crate::engine::Engine;
use authd_credential::Credential;
use authd_rules::{Rule, RuleClass};
use authd_types::items::keys;
use authd_types::{AuthFlags, Outcome, Reason, RuleFlags, SessionAttributes, Uid};
use tracing::{debug, error, info};

impl Engine {
    /// Class `user`: satisfy from cached credentials, otherwise prompt.
    pub(crate) fn evaluate_user(&self, ctx: &mut EvaluationContext<'_>, rule: &Rule) -> Outcome {
        let token = ctx.token;
        let process = token.process();

        if let Some(group) = rule.group() {
            let entitled = (rule.has(RuleFlags::ENTITLED_AND_GROUP)
                && token.entitled_for_right(&ctx.right))
                || (rule.has(RuleFlags::VPN_ENTITLED_AND_GROUP)
                    && token.vpn_entitled_for_right(&ctx.right));
            if entitled
                && process
                    .credential()
                    .check_membership(group, self.env.groups.as_ref())
            {
                debug!(right = %ctx.right, rule = %rule.name, "entitled group member");
                self.audit(ctx, AuditKind::Bypass, None, Outcome::Success);
                return Outcome::Success;
            }
        }

        // a root caller is itself a credential that meets every user rule
        if process.uid().is_root() {
            debug!(
                right = %ctx.right,
                rule = %rule.name,
                allow_root = rule.has(RuleFlags::ALLOW_ROOT),
                "root caller allowed"
            );
            self.audit(ctx, AuditKind::Bypass, None, Outcome::Success);
            return Outcome::Success;
        }

        if !rule.authenticate_user() {
            let owner = Credential::for_uid(
                token.session().owner_uid(),
                self.env.directory.as_ref(),
                self.now(),
            );
            return self.satisfies(ctx, &owner, rule, true, true);
        }

        // credentials acquired earlier in this call
        let working = ctx.credentials.clone();
        for credential in &working {
            if ctx.is_least_privileged() && !credential.is_right() && credential.is_valid() {
                if self.satisfies(ctx, credential, rule, false, false).is_success() {
                    ctx.install_right_credential(self.now(), rule.is_shared());
                    return Outcome::Success;
                }
                continue;
            }
            if self
                .check_credential(ctx, credential, rule, false)
                .is_success()
            {
                return Outcome::Success;
            }
        }

        // credentials the session already holds
        let effective = ctx.effective_credentials.clone();
        for credential in &effective {
            if self
                .check_credential(ctx, credential, rule, false)
                .is_success()
            {
                ctx.credentials.replace(credential.clone());
                return Outcome::Success;
            }
        }

        if !ctx.has(AuthFlags::EXTEND_RIGHTS) {
            return Outcome::Denied;
        }
        if ctx.has(AuthFlags::PRE_AUTHORIZE) && rule.timeout() == 0 {
            return Outcome::Success;
        }
        if !ctx.has(AuthFlags::INTERACTION_ALLOWED)
            || !token.session().has(SessionAttributes::HAS_GRAPHIC_ACCESS)
        {
            debug!(right = %ctx.right, rule = %rule.name, "interaction not allowed");
            return Outcome::InteractionNotAllowed;
        }
        if self.env.power.is_dark_wake() {
            info!(right = %ctx.right, "dark wake, refusing to prompt");
            return Outcome::Denied;
        }
        self.authenticate(ctx, rule)
    }

    /// Right credentials only count in least-privilege mode and only for
    /// the right they were granted for; user credentials go through
    /// [`Engine::satisfies`].
    fn check_credential(
        &self,
        ctx: &mut EvaluationContext<'_>,
        credential: &Credential,
        rule: &Rule,
        ignore_shared: bool,
    ) -> Outcome {
        if !credential.is_right() {
            return self.satisfies(ctx, credential, rule, ignore_shared, false);
        }
        if !ctx.is_least_privileged() {
            return Outcome::Denied;
        }
        if !ignore_shared && !rule.is_shared() && credential.is_shared() {
            return Outcome::Denied;
        }
        if credential.is_valid() && credential.name() == ctx.right {
            Outcome::Success
        } else {
            Outcome::Denied
        }
    }

    /// Whether a user credential meets `rule`.
    pub(crate) fn satisfies(
        &self,
        ctx: &mut EvaluationContext<'_>,
        credential: &Credential,
        rule: &Rule,
        ignore_shared: bool,
        is_session_owner: bool,
    ) -> Outcome {
        let policy = match &rule.class {
            RuleClass::User(policy) => policy,
            _ => return Outcome::Denied,
        };
        if !credential.is_valid() {
            ctx.reason = Reason::InvalidPassphrase;
            return Outcome::Denied;
        }
        if credential.age(self.now()).num_seconds() > policy.timeout {
            debug!(rule = %rule.name, uid = %credential.uid(), "credential expired");
            return Outcome::Denied;
        }
        if !ignore_shared && !rule.is_shared() && credential.is_shared() {
            return Outcome::Denied;
        }
        if credential.uid().is_root() {
            return Outcome::Success;
        }
        let owner = ctx.token.session().owner_uid();
        if rule.has(RuleFlags::SESSION_OWNER) && credential.uid() == owner {
            return Outcome::Success;
        }

        // with authenticate-user off, the entitlement path alone decides
        if !rule.authenticate_user()
            && (rule.has(RuleFlags::ENTITLED_AND_GROUP)
                || rule.has(RuleFlags::VPN_ENTITLED_AND_GROUP))
        {
            return Outcome::Denied;
        }

        match &policy.group {
            Some(group) => {
                if credential.check_membership(group, self.env.groups.as_ref()) {
                    Outcome::Success
                } else {
                    ctx.reason = Reason::UserNotInGroup;
                    Outcome::Denied
                }
            }
            None if rule.has(RuleFlags::SESSION_OWNER) => {
                ctx.reason = if is_session_owner {
                    Reason::UnknownReason
                } else {
                    Reason::UnacceptableUser
                };
                Outcome::Denied
            }
            None => Outcome::Success,
        }
    }

    /// Prompt until a credential meets `rule` or the tries run out.
    pub(crate) fn authenticate(&self, ctx: &mut EvaluationContext<'_>, rule: &Rule) -> Outcome {
        let mut mechanisms = rule.mechanisms().to_vec();
        if mechanisms.is_empty() {
            mechanisms = self.authenticate_mechanisms(ctx);
        }
        let budget = rule.tries();
        let mut outcome = Outcome::Denied;
        ctx.tries = 0;

        while ctx.tries < budget {
            ctx.hints.set(keys::TRIES, ctx.tries);
            ctx.hints.set(keys::RETRY_REASON, ctx.reason.code());

            outcome = self.evaluate_mechanisms(ctx, rule, &mechanisms);
            if outcome.is_success() {
                outcome = match ctx.mechanism_context.get_u64(keys::UID) {
                    Some(uid) => self.accept_authenticated(ctx, rule, uid),
                    None => {
                        error!(right = %ctx.right, rule = %rule.name, "mechanisms succeeded without a uid");
                        ctx.reason = Reason::UnknownReason;
                        Outcome::Denied
                    }
                };
                if outcome.is_success() {
                    break;
                }
            } else if outcome == Outcome::Denied {
                ctx.reason = Reason::InvalidPassphrase;
            } else {
                break;
            }
            if ctx.is_dismissed() {
                return Outcome::Denied;
            }
            ctx.tries += 1;
        }

        if ctx.tries >= budget && !outcome.is_success() && !outcome.aborts() {
            ctx.reason = Reason::TooManyTries;
            ctx.hints.set(keys::TRIES, ctx.tries);
            ctx.hints.set(keys::RETRY_REASON, ctx.reason.code());
            // agents show the terminal state; the verdict is already Denied
            self.evaluate_mechanisms(ctx, rule, &mechanisms);
            info!(right = %ctx.right, rule = %rule.name, tries = ctx.tries, "too many tries");
            self.audit(ctx, AuditKind::TooManyTries, None, Outcome::Denied);
            return Outcome::Denied;
        }
        outcome
    }

    fn accept_authenticated(
        &self,
        ctx: &mut EvaluationContext<'_>,
        rule: &Rule,
        uid: u64,
    ) -> Outcome {
        let uid = match u32::try_from(uid) {
            Ok(uid) => Uid(uid),
            Err(_) => {
                error!(uid, "uid out of range");
                return Outcome::Denied;
            }
        };
        let credential = Credential::for_uid(uid, self.env.directory.as_ref(), self.now());
        let outcome = self.satisfies(ctx, &credential, rule, true, false);
        if outcome.is_success() {
            ctx.install_credential(credential, rule);
            let session = ctx.token.session();
            if uid == session.owner_uid() {
                session.set_attribute(SessionAttributes::HAS_AUTHENTICATED);
            }
            info!(right = %ctx.right, rule = %rule.name, %uid, "user authenticated");
            self.audit(ctx, AuditKind::Authenticated, None, outcome);
        }
        outcome
    }
}
