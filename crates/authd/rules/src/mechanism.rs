use crate::error::RuleError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};

pub type MechanismId = i64;

const BUILTIN_PLUGIN: &str = "builtin";
const PRIVILEGED_SUFFIX: &str = ",privileged";

/// Mechanisms the engine resolves in-process.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BuiltinKind {
    /// Passes iff the caller holds the entitlement for the right.
    Entitled,
}

/// Plugin/param pair of a mechanism run by an external agent.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PluginRef<'a> {
    pub plugin: &'a str,
    pub param: &'a str,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MechanismKind<'a> {
    Builtin(BuiltinKind),
    External(PluginRef<'a>),
}

/// One authentication step.
///
/// Identity is the `(plugin, param, privileged)` triple; the store id is
/// ignored by equality.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Mechanism {
    #[serde(default)]
    pub id: MechanismId,
    pub plugin: String,
    pub param: String,
    #[serde(default)]
    pub privileged: bool,
}

impl Mechanism {
    pub fn new(plugin: impl Into<String>, param: impl Into<String>) -> Self {
        Self {
            id: 0,
            plugin: plugin.into(),
            param: param.into(),
            privileged: false,
        }
    }

    pub fn privileged(mut self) -> Self {
        self.privileged = true;
        self
    }

    /// Parse `plugin:param` or `plugin:param,privileged`.
    pub fn parse(s: &str) -> Result<Self, RuleError> {
        let (body, privileged) = match s.strip_suffix(PRIVILEGED_SUFFIX) {
            Some(body) => (body, true),
            None => (s, false),
        };
        let (plugin, param) = body
            .split_once(':')
            .ok_or_else(|| RuleError::InvalidMechanism(s.to_string()))?;
        if plugin.is_empty() || param.is_empty() {
            return Err(RuleError::InvalidMechanism(s.to_string()));
        }
        Ok(Self {
            id: 0,
            plugin: plugin.to_string(),
            param: param.to_string(),
            privileged,
        })
    }

    pub fn kind(&self) -> MechanismKind<'_> {
        if self.plugin == BUILTIN_PLUGIN && self.param == "entitled" {
            return MechanismKind::Builtin(BuiltinKind::Entitled);
        }
        MechanismKind::External(PluginRef {
            plugin: &self.plugin,
            param: &self.param,
        })
    }

    pub fn is_builtin(&self) -> bool {
        matches!(self.kind(), MechanismKind::Builtin(_))
    }
}

impl PartialEq for Mechanism {
    fn eq(&self, other: &Self) -> bool {
        self.plugin == other.plugin
            && self.param == other.param
            && self.privileged == other.privileged
    }
}

impl Eq for Mechanism {}

impl Hash for Mechanism {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.plugin.hash(state);
        self.param.hash(state);
        self.privileged.hash(state);
    }
}

impl fmt::Display for Mechanism {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.plugin, self.param)?;
        if self.privileged {
            f.write_str(PRIVILEGED_SUFFIX)?;
        }
        Ok(())
    }
}
