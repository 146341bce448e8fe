use crate::error::RuleError;
use crate::mechanism::Mechanism;
use crate::row::{MechanismRow, RuleRow};
use authd_types::RuleFlags;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Store-assigned rule id; 0 means the rule was never committed.
pub type RuleId = i64;

pub const DEFAULT_USER_TIMEOUT: i64 = i32::MAX as i64;
pub const DEFAULT_USER_TRIES: u32 = 10_000;
pub const DEFAULT_RULE_GROUP: &str = "admin";
pub const DEFAULT_RULE_TIMEOUT: i64 = 300;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RuleKind {
    /// Requestable capability.
    Right,
    /// Delegation group, referenced by other rules.
    Rule,
}

impl RuleKind {
    pub fn code(self) -> i64 {
        match self {
            RuleKind::Right => 1,
            RuleKind::Rule => 2,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(RuleKind::Right),
            2 => Some(RuleKind::Rule),
            _ => None,
        }
    }
}

/// Reference to a delegate by store id and name.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DelegateRef {
    pub id: RuleId,
    pub name: String,
}

impl DelegateRef {
    pub fn new(id: RuleId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserPolicy {
    pub group: Option<String>,
    /// Maximum credential age in seconds.
    pub timeout: i64,
    pub tries: u32,
    /// Empty means "use the mechanisms of the `authenticate` rule".
    pub mechanisms: Vec<Mechanism>,
}

impl Default for UserPolicy {
    fn default() -> Self {
        Self {
            group: None,
            timeout: DEFAULT_USER_TIMEOUT,
            tries: DEFAULT_USER_TRIES,
            mechanisms: Vec::new(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelegationPolicy {
    /// `None` or `Some(0)` require every delegate.
    pub k_of_n: Option<u32>,
    pub delegates: Vec<DelegateRef>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MechanismPolicy {
    /// 0 = unlimited.
    pub tries: u32,
    pub mechanisms: Vec<Mechanism>,
}

/// Decision class of a rule together with its class-specific payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RuleClass {
    Allow,
    Deny,
    User(UserPolicy),
    Rule(DelegationPolicy),
    Mechanism(MechanismPolicy),
}

impl RuleClass {
    pub fn code(&self) -> i64 {
        match self {
            RuleClass::Rule(_) => 1,
            RuleClass::User(_) => 2,
            RuleClass::Mechanism(_) => 3,
            RuleClass::Allow => 4,
            RuleClass::Deny => 5,
        }
    }

    /// Policy document spelling.
    pub fn name(&self) -> &'static str {
        match self {
            RuleClass::Allow => "allow",
            RuleClass::Deny => "deny",
            RuleClass::User(_) => "user",
            RuleClass::Rule(_) => "rule",
            RuleClass::Mechanism(_) => "evaluate-mechanisms",
        }
    }
}

/// A policy node.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    pub id: RuleId,
    pub name: String,
    pub kind: RuleKind,
    pub class: RuleClass,
    pub flags: RuleFlags,
    pub version: u32,
    pub created: Option<DateTime<Utc>>,
    pub modified: Option<DateTime<Utc>>,
    /// Code identity of whoever last wrote the rule.
    pub identifier: Option<String>,
    pub requirement: Option<String>,
    pub comment: Option<String>,
    /// Language → prompt text; "" is the default language.
    pub prompts: BTreeMap<String, String>,
    pub buttons: BTreeMap<String, String>,
}

impl Rule {
    /// Transient rule with no store id and default metadata.
    pub fn new(name: impl Into<String>, kind: RuleKind, class: RuleClass) -> Self {
        Self {
            id: 0,
            name: name.into(),
            kind,
            class,
            flags: RuleFlags::AUTHENTICATE_USER,
            version: 0,
            created: None,
            modified: None,
            identifier: None,
            requirement: None,
            comment: None,
            prompts: BTreeMap::new(),
            buttons: BTreeMap::new(),
        }
    }

    pub fn with_flags(mut self, flags: RuleFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    /// Fallback policy used when neither the requested name, any of its
    /// parent domains, nor the stored "" rule exists.
    pub fn builtin_default() -> Self {
        let mechanisms = [
            "builtin:policy-banner",
            "loginwindow:login",
            "builtin:reset-password,privileged",
            "loginwindow:success",
            "builtin:authenticate,privileged",
            "PKINITMechanism:auth,privileged",
        ]
        .iter()
        .filter_map(|s| Mechanism::parse(s).ok())
        .collect();

        Rule::new(
            "",
            RuleKind::Right,
            RuleClass::User(UserPolicy {
                group: Some(DEFAULT_RULE_GROUP.to_string()),
                timeout: DEFAULT_RULE_TIMEOUT,
                tries: DEFAULT_USER_TRIES,
                mechanisms,
            }),
        )
        .with_flags(RuleFlags::SHARED | RuleFlags::AUTHENTICATE_USER)
    }

    pub fn has(&self, flag: RuleFlags) -> bool {
        self.flags.contains(flag)
    }

    pub fn is_shared(&self) -> bool {
        self.has(RuleFlags::SHARED)
    }

    pub fn authenticate_user(&self) -> bool {
        self.has(RuleFlags::AUTHENTICATE_USER)
    }

    pub fn group(&self) -> Option<&str> {
        match &self.class {
            RuleClass::User(user) => user.group.as_deref(),
            _ => None,
        }
    }

    pub fn timeout(&self) -> i64 {
        match &self.class {
            RuleClass::User(user) => user.timeout,
            _ => 0,
        }
    }

    pub fn tries(&self) -> u32 {
        match &self.class {
            RuleClass::User(user) => user.tries,
            RuleClass::Mechanism(m) => m.tries,
            _ => 0,
        }
    }

    pub fn k_of_n(&self) -> u32 {
        match &self.class {
            RuleClass::Rule(d) => d.k_of_n.unwrap_or(0),
            _ => 0,
        }
    }

    pub fn mechanisms(&self) -> &[Mechanism] {
        match &self.class {
            RuleClass::User(user) => &user.mechanisms,
            RuleClass::Mechanism(m) => &m.mechanisms,
            _ => &[],
        }
    }

    pub fn delegates(&self) -> &[DelegateRef] {
        match &self.class {
            RuleClass::Rule(d) => &d.delegates,
            _ => &[],
        }
    }

    /// Row form without the join-table children.
    pub fn to_row(&self) -> RuleRow {
        let (group, k_of_n, timeout, tries) = match &self.class {
            RuleClass::User(user) => (
                user.group.clone(),
                None,
                Some(user.timeout),
                Some(i64::from(user.tries)),
            ),
            RuleClass::Rule(d) => (None, d.k_of_n.map(i64::from), None, None),
            RuleClass::Mechanism(m) => (None, None, None, Some(i64::from(m.tries))),
            RuleClass::Allow | RuleClass::Deny => (None, None, None, None),
        };
        RuleRow {
            id: self.id,
            name: self.name.clone(),
            kind: self.kind.code(),
            class: self.class.code(),
            group,
            k_of_n,
            timeout,
            tries,
            flags: self.flags.bits(),
            version: i64::from(self.version),
            created: self.created,
            modified: self.modified,
            identifier: self.identifier.clone(),
            requirement: self.requirement.clone(),
            comment: self.comment.clone(),
        }
    }

    /// Rebuild a rule from its row and ordered children.
    pub fn from_parts(
        row: RuleRow,
        mechanisms: Vec<MechanismRow>,
        delegates: Vec<RuleRow>,
        prompts: BTreeMap<String, String>,
        buttons: BTreeMap<String, String>,
    ) -> Result<Self, RuleError> {
        let malformed = |message: String| RuleError::MalformedRow {
            id: row.id,
            message,
        };
        let kind = RuleKind::from_code(row.kind)
            .ok_or_else(|| malformed(format!("unknown kind {}", row.kind)))?;
        let to_u32 = |value: Option<i64>, field: &str| -> Result<Option<u32>, RuleError> {
            value
                .map(|v| u32::try_from(v).map_err(|_| malformed(format!("{field} out of range: {v}"))))
                .transpose()
        };
        let mechanisms: Vec<Mechanism> = mechanisms
            .into_iter()
            .map(|m| Mechanism {
                id: m.id,
                plugin: m.plugin,
                param: m.param,
                privileged: m.privileged,
            })
            .collect();

        let class = match row.class {
            1 => RuleClass::Rule(DelegationPolicy {
                k_of_n: to_u32(row.k_of_n, "k_of_n")?,
                delegates: delegates
                    .into_iter()
                    .map(|d| DelegateRef::new(d.id, d.name))
                    .collect(),
            }),
            2 => RuleClass::User(UserPolicy {
                group: row.group.clone(),
                timeout: row.timeout.unwrap_or(DEFAULT_USER_TIMEOUT),
                tries: to_u32(row.tries, "tries")?.unwrap_or(DEFAULT_USER_TRIES),
                mechanisms,
            }),
            3 => RuleClass::Mechanism(MechanismPolicy {
                tries: to_u32(row.tries, "tries")?.unwrap_or(0),
                mechanisms,
            }),
            4 => RuleClass::Allow,
            5 => RuleClass::Deny,
            other => return Err(malformed(format!("unknown class {other}"))),
        };
        let version = u32::try_from(row.version)
            .map_err(|_| malformed(format!("version out of range: {}", row.version)))?;

        Ok(Self {
            id: row.id,
            name: row.name,
            kind,
            class,
            flags: RuleFlags::from_bits_truncate(row.flags),
            version,
            created: row.created,
            modified: row.modified,
            identifier: row.identifier,
            requirement: row.requirement,
            comment: row.comment,
            prompts,
            buttons,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_default_matches_fallback_policy() {
        let rule = Rule::builtin_default();
        assert_eq!(rule.name, "");
        assert_eq!(rule.group(), Some("admin"));
        assert_eq!(rule.timeout(), 300);
        assert_eq!(rule.tries(), 10_000);
        assert_eq!(rule.flags, RuleFlags::SHARED | RuleFlags::AUTHENTICATE_USER);
        assert!(!rule.mechanisms().is_empty());
    }

    #[test]
    fn row_round_trip_keeps_class_payload() {
        let mut rule = Rule::new(
            "system.test",
            RuleKind::Right,
            RuleClass::Mechanism(MechanismPolicy {
                tries: 3,
                mechanisms: vec![],
            }),
        );
        rule.id = 9;
        let rebuilt = Rule::from_parts(
            rule.to_row(),
            vec![],
            vec![],
            BTreeMap::new(),
            BTreeMap::new(),
        )
        .unwrap();
        assert_eq!(rebuilt, rule);
    }

    #[test]
    fn unknown_class_code_is_malformed() {
        let mut row = Rule::new("x", RuleKind::Right, RuleClass::Allow).to_row();
        row.class = 42;
        let err = Rule::from_parts(row, vec![], vec![], BTreeMap::new(), BTreeMap::new());
        assert!(matches!(err, Err(RuleError::MalformedRow { .. })));
    }

    #[test]
    fn accessors_default_outside_their_class() {
        let rule = Rule::new("x", RuleKind::Right, RuleClass::Deny);
        assert_eq!(rule.group(), None);
        assert_eq!(rule.k_of_n(), 0);
        assert!(rule.delegates().is_empty());
        assert!(rule.mechanisms().is_empty());
    }
}
