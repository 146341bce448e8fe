use crate::audit::{AuditEvent, AuditKind};
use crate::engine::{AuthorizationRequest, Engine};
use crate::error::EngineResult;
use crate::session::AuthToken;
use authd_rules::{resolve, DelegateRef, Rule, RuleKind, StoreError};
use authd_types::{AuthFlags, Outcome, Reason, CONFIG_PREFIX};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

/// Kind of policy change being gated.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Modification {
    Add,
    Modify,
    Remove,
}

impl Modification {
    fn prefix(self) -> &'static str {
        match self {
            Modification::Add => "config.add.",
            Modification::Modify => "config.modify.",
            Modification::Remove => "config.remove.",
        }
    }
}

/// Meta-right guarding `operation` on `right`.
///
/// Changes to meta-rights themselves are all guarded by
/// `config.config.<name>`.
pub fn meta_right(right: &str, operation: Modification) -> String {
    if right.starts_with(CONFIG_PREFIX) {
        format!("{CONFIG_PREFIX}{right}")
    } else {
        format!("{}{right}", operation.prefix())
    }
}

impl Engine {
    /// Evaluate the meta-right for changing `right`. Only the caller's
    /// extend-rights and interaction flags carry over.
    pub fn verify_modification(
        &self,
        token: &AuthToken,
        right: &str,
        operation: Modification,
        flags: AuthFlags,
    ) -> Outcome {
        let meta = meta_right(right, operation);
        let flags = flags & (AuthFlags::EXTEND_RIGHTS | AuthFlags::INTERACTION_ALLOWED);
        let outcome = self
            .authorize(token, &AuthorizationRequest::new([meta.as_str()]).with_flags(flags))
            .outcome;
        info!(right, meta = %meta, outcome = ?outcome, "policy change verified");
        outcome
    }

    /// Replace or create right `name` from its document form.
    pub fn set_right(
        &self,
        token: &AuthToken,
        name: &str,
        document: &Value,
        flags: AuthFlags,
    ) -> EngineResult<Outcome> {
        let store = self.store.as_ref();
        let operation = match store.get_rule(name)? {
            Some(_) => Modification::Modify,
            None => Modification::Add,
        };
        let outcome = self.verify_modification(token, name, operation, flags);
        if !outcome.is_success() {
            self.audit_admin(token, name, outcome);
            return Ok(outcome);
        }

        let mut lookup_error: Option<StoreError> = None;
        let mut resolver = |delegate: &str| match store.get_rule(delegate) {
            Ok(row) => row.map(|row| DelegateRef::new(row.id, row.name)),
            Err(e) => {
                lookup_error = Some(e);
                None
            }
        };
        let parsed = Rule::from_document(name, RuleKind::Right, document, &mut resolver);
        if let Some(e) = lookup_error {
            return Err(e.into());
        }
        let rule = parsed?;
        store.commit_rule(&rule, self.now(), token.process().code())?;
        info!(right = name, ?operation, "right stored");
        self.audit_admin(token, name, Outcome::Success);
        Ok(Outcome::Success)
    }

    /// Remove right `name`. Removing a right that is not stored is denied
    /// and touches nothing.
    pub fn remove_right(
        &self,
        token: &AuthToken,
        name: &str,
        flags: AuthFlags,
    ) -> EngineResult<Outcome> {
        let store = self.store.as_ref();
        let row = match store.get_rule(name)? {
            Some(row) => row,
            None => {
                warn!(right = name, "remove of unknown right");
                return Ok(Outcome::Denied);
            }
        };
        let outcome = self.verify_modification(token, name, Modification::Remove, flags);
        if outcome.is_success() {
            store.remove_rule(row.id, self.now())?;
            info!(right = name, "right removed");
        }
        self.audit_admin(token, name, outcome);
        Ok(outcome)
    }

    /// Document of the policy that currently governs `name`.
    pub fn right_properties(&self, name: &str) -> EngineResult<Value> {
        Ok(resolve(self.store.as_ref(), name)?.to_document())
    }

    fn audit_admin(&self, token: &AuthToken, right: &str, outcome: Outcome) {
        let process = token.process();
        self.env.audit.record(AuditEvent {
            timestamp: self.now(),
            kind: AuditKind::Administrative,
            right: right.to_string(),
            rule: None,
            mechanism: None,
            outcome,
            reason: Reason::NoReason,
            pid: process.pid(),
            uid: process.uid(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn meta_rights_follow_the_operation() {
        assert_eq!(meta_right("system.foo", Modification::Add), "config.add.system.foo");
        assert_eq!(
            meta_right("system.foo", Modification::Modify),
            "config.modify.system.foo"
        );
        assert_eq!(
            meta_right("system.foo", Modification::Remove),
            "config.remove.system.foo"
        );
        assert_eq!(
            meta_right("config.add.system.foo", Modification::Remove),
            "config.config.add.system.foo"
        );
    }
}
