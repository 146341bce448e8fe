//! Declarative policy document form of a rule.
//!
//! A document is a JSON object keyed as below; `rights` and `rules`
//! sections of a policy file map names to these objects.

use crate::error::RuleError;
use crate::mechanism::Mechanism;
use crate::rule::{
    DelegateRef, DelegationPolicy, MechanismPolicy, Rule, RuleClass, RuleKind, UserPolicy,
    DEFAULT_USER_TIMEOUT, DEFAULT_USER_TRIES,
};
use authd_types::RuleFlags;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tracing::warn;

pub mod key {
    pub const CLASS: &str = "class";
    pub const GROUP: &str = "group";
    pub const K_OF_N: &str = "k-of-n";
    pub const TIMEOUT: &str = "timeout";
    pub const TRIES: &str = "tries";
    pub const VERSION: &str = "version";
    pub const COMMENT: &str = "comment";
    pub const MECHANISMS: &str = "mechanisms";
    pub const RULE: &str = "rule";
    pub const PROMPT: &str = "default-prompt";
    pub const BUTTON: &str = "default-button";
    pub const CREATED: &str = "created";
    pub const MODIFIED: &str = "modified";
    pub const IDENTIFIER: &str = "identifier";
    pub const REQUIREMENT: &str = "requirement";
    pub const AUTHENTICATE_USER: &str = "authenticate-user";
}

const FLAG_KEYS: &[(&str, RuleFlags)] = &[
    ("shared", RuleFlags::SHARED),
    ("allow-root", RuleFlags::ALLOW_ROOT),
    ("session-owner", RuleFlags::SESSION_OWNER),
    ("extract-password", RuleFlags::EXTRACT_PASSWORD),
    ("entitled", RuleFlags::ENTITLED),
    ("entitled-group", RuleFlags::ENTITLED_AND_GROUP),
    ("require-apple-signed", RuleFlags::REQUIRE_APPLE_SIGNED),
    ("vpn-entitled-group", RuleFlags::VPN_ENTITLED_AND_GROUP),
    ("password-only", RuleFlags::PASSWORD_ONLY),
];

struct Reader<'a> {
    rule: &'a str,
    map: &'a Map<String, Value>,
}

impl<'a> Reader<'a> {
    fn invalid(&self, field: &'static str, message: impl Into<String>) -> RuleError {
        RuleError::InvalidField {
            rule: self.rule.to_string(),
            field,
            message: message.into(),
        }
    }

    fn string(&self, field: &'static str) -> Result<Option<String>, RuleError> {
        match self.map.get(field) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.clone())),
            Some(other) => Err(self.invalid(field, format!("expected string, got {other}"))),
        }
    }

    fn int(&self, field: &'static str) -> Result<Option<i64>, RuleError> {
        match self.map.get(field) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Number(n)) => n
                .as_i64()
                .map(Some)
                .ok_or_else(|| self.invalid(field, format!("not an integer: {n}"))),
            Some(other) => Err(self.invalid(field, format!("expected integer, got {other}"))),
        }
    }

    fn uint(&self, field: &'static str) -> Result<Option<u32>, RuleError> {
        self.int(field)?
            .map(|v| u32::try_from(v).map_err(|_| self.invalid(field, format!("out of range: {v}"))))
            .transpose()
    }

    fn bool(&self, field: &'static str) -> Result<Option<bool>, RuleError> {
        match self.map.get(field) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Bool(b)) => Ok(Some(*b)),
            Some(other) => Err(self.invalid(field, format!("expected bool, got {other}"))),
        }
    }

    fn strings(&self, field: &'static str) -> Result<Vec<String>, RuleError> {
        match self.map.get(field) {
            None | Some(Value::Null) => Ok(Vec::new()),
            Some(Value::String(s)) => Ok(vec![s.clone()]),
            Some(Value::Array(items)) => items
                .iter()
                .map(|v| {
                    v.as_str()
                        .map(str::to_string)
                        .ok_or_else(|| self.invalid(field, format!("expected string, got {v}")))
                })
                .collect(),
            Some(other) => Err(self.invalid(field, format!("expected array, got {other}"))),
        }
    }

    fn localized(&self, field: &'static str) -> Result<BTreeMap<String, String>, RuleError> {
        match self.map.get(field) {
            None | Some(Value::Null) => Ok(BTreeMap::new()),
            Some(Value::Object(entries)) => entries
                .iter()
                .map(|(lang, text)| {
                    text.as_str()
                        .map(|t| (lang.clone(), t.to_string()))
                        .ok_or_else(|| self.invalid(field, format!("{lang}: expected string")))
                })
                .collect(),
            Some(other) => Err(self.invalid(field, format!("expected map, got {other}"))),
        }
    }

    fn timestamp(&self, field: &'static str) -> Result<Option<DateTime<Utc>>, RuleError> {
        self.string(field)?
            .map(|s| {
                DateTime::parse_from_rfc3339(&s)
                    .map(|t| t.with_timezone(&Utc))
                    .map_err(|e| self.invalid(field, e.to_string()))
            })
            .transpose()
    }
}

impl Rule {
    /// Build a rule from its document form.
    ///
    /// `resolve_delegate` maps a delegate name to its stored reference;
    /// `None` yields [`RuleError::UnresolvedDelegate`] so importers can
    /// defer the rule to a later pass.
    pub fn from_document(
        name: &str,
        kind: RuleKind,
        doc: &Value,
        resolve_delegate: &mut dyn FnMut(&str) -> Option<DelegateRef>,
    ) -> Result<Self, RuleError> {
        let map = doc.as_object().ok_or_else(|| RuleError::InvalidField {
            rule: name.to_string(),
            field: "document",
            message: "expected object".into(),
        })?;
        let r = Reader { rule: name, map };

        let mechanisms = r
            .strings(key::MECHANISMS)?
            .iter()
            .map(|s| Mechanism::parse(s))
            .collect::<Result<Vec<_>, _>>()?;

        let class_name = match r.string(key::CLASS)? {
            Some(class) => Some(class),
            None if map.contains_key(key::RULE) => Some("rule".to_string()),
            None => None,
        };

        let class = match class_name.as_deref() {
            Some("allow") => RuleClass::Allow,
            Some("deny") => RuleClass::Deny,
            Some("user") => RuleClass::User(UserPolicy {
                group: r.string(key::GROUP)?,
                timeout: r.int(key::TIMEOUT)?.unwrap_or(DEFAULT_USER_TIMEOUT),
                tries: r.uint(key::TRIES)?.unwrap_or(DEFAULT_USER_TRIES),
                mechanisms,
            }),
            Some("evaluate-mechanisms") => RuleClass::Mechanism(MechanismPolicy {
                tries: r.uint(key::TRIES)?.unwrap_or(0),
                mechanisms,
            }),
            Some("rule") => {
                let mut delegates = Vec::new();
                for delegate in r.strings(key::RULE)? {
                    let reference = resolve_delegate(&delegate).ok_or_else(|| {
                        RuleError::UnresolvedDelegate {
                            rule: name.to_string(),
                            delegate: delegate.clone(),
                        }
                    })?;
                    delegates.push(reference);
                }
                RuleClass::Rule(DelegationPolicy {
                    k_of_n: r.uint(key::K_OF_N)?,
                    delegates,
                })
            }
            other => {
                warn!(rule = name, class = ?other, "unknown rule class, treating as empty delegation");
                RuleClass::Rule(DelegationPolicy::default())
            }
        };

        let mut flags = RuleFlags::empty();
        for (field, flag) in FLAG_KEYS {
            if r.bool(*field)?.unwrap_or(false) {
                flags |= *flag;
            }
        }
        if r.bool(key::AUTHENTICATE_USER)?.unwrap_or(true) {
            flags |= RuleFlags::AUTHENTICATE_USER;
        }

        let mut rule = Rule::new(name, kind, class).with_flags(flags);
        rule.version = r.uint(key::VERSION)?.unwrap_or(0);
        rule.comment = r.string(key::COMMENT)?;
        rule.identifier = r.string(key::IDENTIFIER)?;
        rule.requirement = r.string(key::REQUIREMENT)?;
        rule.created = r.timestamp(key::CREATED)?;
        rule.modified = r.timestamp(key::MODIFIED)?;
        rule.prompts = r.localized(key::PROMPT)?;
        rule.buttons = r.localized(key::BUTTON)?;
        Ok(rule)
    }

    /// Document form; `from_document(to_document())` reproduces the rule
    /// apart from store ids.
    pub fn to_document(&self) -> Value {
        let mut map = Map::new();
        map.insert(key::CLASS.into(), Value::from(self.class.name()));

        match &self.class {
            RuleClass::User(user) => {
                if let Some(group) = &user.group {
                    map.insert(key::GROUP.into(), Value::from(group.as_str()));
                }
                map.insert(key::TIMEOUT.into(), Value::from(user.timeout));
                map.insert(key::TRIES.into(), Value::from(user.tries));
            }
            RuleClass::Rule(d) => {
                if let Some(k) = d.k_of_n {
                    map.insert(key::K_OF_N.into(), Value::from(k));
                }
                let names: Vec<Value> = d
                    .delegates
                    .iter()
                    .map(|r| Value::from(r.name.as_str()))
                    .collect();
                map.insert(key::RULE.into(), Value::Array(names));
            }
            RuleClass::Mechanism(m) => {
                map.insert(key::TRIES.into(), Value::from(m.tries));
            }
            RuleClass::Allow | RuleClass::Deny => {}
        }

        if !self.mechanisms().is_empty() {
            let mechanisms = self
                .mechanisms()
                .iter()
                .map(|m| Value::from(m.to_string()))
                .collect();
            map.insert(key::MECHANISMS.into(), Value::Array(mechanisms));
        }

        for (field, flag) in FLAG_KEYS {
            if self.flags.contains(*flag) {
                map.insert((*field).into(), Value::Bool(true));
            }
        }
        map.insert(
            key::AUTHENTICATE_USER.into(),
            Value::Bool(self.authenticate_user()),
        );

        map.insert(key::VERSION.into(), Value::from(self.version));
        let optional = [
            (key::COMMENT, &self.comment),
            (key::IDENTIFIER, &self.identifier),
            (key::REQUIREMENT, &self.requirement),
        ];
        for (field, value) in optional {
            if let Some(v) = value {
                map.insert(field.into(), Value::from(v.as_str()));
            }
        }
        for (field, value) in [(key::CREATED, self.created), (key::MODIFIED, self.modified)] {
            if let Some(t) = value {
                map.insert(
                    field.into(),
                    Value::from(t.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
                );
            }
        }
        for (field, texts) in [(key::PROMPT, &self.prompts), (key::BUTTON, &self.buttons)] {
            if !texts.is_empty() {
                let entries = texts
                    .iter()
                    .map(|(lang, text)| (lang.clone(), Value::from(text.as_str())))
                    .collect();
                map.insert(field.into(), Value::Object(entries));
            }
        }
        Value::Object(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn no_delegates(_: &str) -> Option<DelegateRef> {
        None
    }

    fn parse(doc: Value) -> Result<Rule, RuleError> {
        Rule::from_document("test.right", RuleKind::Right, &doc, &mut no_delegates)
    }

    #[test]
    fn user_defaults_apply() {
        let rule = parse(json!({"class": "user", "group": "admin"})).unwrap();
        assert_eq!(rule.timeout(), i64::from(i32::MAX));
        assert_eq!(rule.tries(), 10_000);
        assert!(rule.authenticate_user());
        assert!(!rule.is_shared());
    }

    #[test]
    fn unknown_class_becomes_empty_delegation() {
        let rule = parse(json!({"class": "bogus"})).unwrap();
        assert!(matches!(rule.class, RuleClass::Rule(ref d) if d.delegates.is_empty()));
    }

    #[test]
    fn rule_key_without_class_is_delegation() {
        let mut ids = 0;
        let mut resolver = |name: &str| {
            ids += 1;
            Some(DelegateRef::new(ids, name))
        };
        let rule = Rule::from_document(
            "x",
            RuleKind::Right,
            &json!({"rule": ["a", "b"], "k-of-n": 1}),
            &mut resolver,
        )
        .unwrap();
        let names: Vec<&str> = rule.delegates().iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(rule.k_of_n(), 1);
    }

    #[test]
    fn missing_delegate_is_reported() {
        let err = parse(json!({"class": "rule", "rule": "ghost"})).unwrap_err();
        assert!(matches!(err, RuleError::UnresolvedDelegate { ref delegate, .. } if delegate == "ghost"));
    }

    #[test]
    fn wrong_field_type_is_rejected() {
        let err = parse(json!({"class": "user", "timeout": "soon"})).unwrap_err();
        assert!(matches!(err, RuleError::InvalidField { field: "timeout", .. }));
    }

    #[test]
    fn document_round_trip_preserves_everything() {
        let doc = json!({
            "class": "user",
            "group": "staff",
            "timeout": 60,
            "tries": 3,
            "shared": true,
            "session-owner": true,
            "authenticate-user": false,
            "mechanisms": ["builtin:authenticate,privileged", "loginwindow:success"],
            "version": 4,
            "comment": "for tests",
            "default-prompt": {"": "Enter a password", "fr": "Mot de passe"},
            "default-button": {"": "OK"},
            "created": "2024-05-01T10:00:00Z",
        });
        let rule = parse(doc).unwrap();
        let again = parse(rule.to_document()).unwrap();
        assert_eq!(again, rule);
        assert_eq!(again.mechanisms()[0].to_string(), "builtin:authenticate,privileged");
        assert!(!again.authenticate_user());
    }
}
