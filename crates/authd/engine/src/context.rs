use crate::agent::MechanismAgent;
use crate::error::{EngineError, EngineResult};
use crate::session::AuthToken;
use authd_credential::{Credential, CredentialSet};
use authd_rules::{Mechanism, Rule};
use authd_types::items::keys;
use authd_types::{AuthFlags, AuthItems, Reason};
use std::collections::{BTreeSet, HashMap};

/// State of one `authorize` call.
pub struct EvaluationContext<'a> {
    pub(crate) token: &'a AuthToken,
    pub flags: AuthFlags,
    /// Right currently being evaluated.
    pub right: String,
    /// Rule currently being evaluated.
    pub rule: String,
    pub hints: AuthItems,
    /// Caller-visible context; only extractable values land here.
    pub context: AuthItems,
    /// Survives a failed mechanism sequence.
    pub sticky_context: AuthItems,
    /// Full context returned by the last mechanism sequence.
    pub mechanism_context: AuthItems,
    pub credentials: CredentialSet,
    /// Session credentials, read only.
    pub effective_credentials: CredentialSet,
    pub granted_rights: BTreeSet<String>,
    pub tries: u32,
    pub reason: Reason,
    pub(crate) authenticate_rule: Option<Rule>,
    pub(crate) agents: HashMap<Mechanism, Box<dyn MechanismAgent>>,
    in_progress: Vec<String>,
    max_depth: usize,
}

impl<'a> EvaluationContext<'a> {
    pub(crate) fn new(
        token: &'a AuthToken,
        flags: AuthFlags,
        environment: &AuthItems,
        max_depth: usize,
    ) -> Self {
        // pre-supplied credentials are context, everything else is a hint
        let mut hints = AuthItems::new();
        let mut context = AuthItems::new();
        for (key, item) in environment.iter() {
            let target = match key {
                keys::USERNAME | keys::PASSWORD => &mut context,
                _ => &mut hints,
            };
            target.set_with(key, item.value.clone(), item.visibility);
        }

        Self {
            token,
            flags,
            right: String::new(),
            rule: String::new(),
            hints,
            context: AuthItems::new(),
            sticky_context: context,
            mechanism_context: AuthItems::new(),
            // shared credentials reach us through the session instead
            credentials: token
                .credentials()
                .iter()
                .filter(|credential| !credential.is_shared())
                .cloned()
                .collect(),
            effective_credentials: token.session().credentials(),
            granted_rights: BTreeSet::new(),
            tries: 0,
            reason: Reason::NoReason,
            authenticate_rule: None,
            agents: HashMap::new(),
            in_progress: Vec::new(),
            max_depth,
        }
    }

    pub fn token(&self) -> &AuthToken {
        self.token
    }

    pub fn has(&self, flag: AuthFlags) -> bool {
        self.flags.contains(flag)
    }

    pub fn is_least_privileged(&self) -> bool {
        self.token.is_least_privileged()
    }

    pub fn is_dismissed(&self) -> bool {
        self.token.is_dismissed()
    }

    pub(crate) fn begin_right(&mut self, right: &str) {
        self.right = right.to_string();
        self.rule.clear();
        self.tries = 0;
        self.reason = Reason::NoReason;
        self.in_progress.clear();
    }

    /// Mark `rule` as being evaluated. A rule already on the stack is a
    /// cycle.
    pub(crate) fn enter(&mut self, rule: &Rule) -> EngineResult<()> {
        if self.in_progress.iter().any(|name| *name == rule.name) {
            return Err(EngineError::Cycle {
                rule: rule.name.clone(),
            });
        }
        if self.in_progress.len() >= self.max_depth {
            return Err(EngineError::DepthExceeded {
                rule: rule.name.clone(),
                limit: self.max_depth,
            });
        }
        self.in_progress.push(rule.name.clone());
        self.rule = rule.name.clone();
        Ok(())
    }

    pub(crate) fn leave(&mut self) {
        self.in_progress.pop();
        self.rule = self.in_progress.last().cloned().unwrap_or_default();
    }

    pub fn depth(&self) -> usize {
        self.in_progress.len()
    }

    /// Add a credential acquired for `rule` to the working set, with its
    /// shared twin and, in least-privilege mode, a right credential.
    pub(crate) fn install_credential(&mut self, credential: Credential, rule: &Rule) {
        let shared = rule.is_shared();
        if shared {
            self.credentials.replace(credential.derive_shared());
        }
        self.credentials.replace(credential.clone());
        if self.is_least_privileged() {
            self.install_right_credential(credential.created_at(), shared);
        }
    }

    pub(crate) fn install_right_credential(&mut self, now: chrono::DateTime<chrono::Utc>, shared: bool) {
        let right = Credential::for_right(self.right.clone(), now);
        if shared {
            self.credentials.replace(right.derive_shared());
        }
        self.credentials.replace(right);
    }

    pub(crate) fn release_agents(&mut self) {
        for agent in self.agents.values_mut() {
            agent.deactivate();
        }
        self.agents.clear();
    }
}
