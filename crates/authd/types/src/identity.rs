use serde::{Deserialize, Serialize};
use std::fmt;

/// Process id as reported by the transport.
pub type Pid = i32;

/// POSIX user id.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Uid(pub u32);

impl Uid {
    pub const ROOT: Uid = Uid(0);
    /// Sentinel carried by right credentials; `(uid_t)-2`.
    pub const NONE: Uid = Uid(u32::MAX - 1);

    pub fn is_root(self) -> bool {
        self == Self::ROOT
    }

    pub fn is_none(self) -> bool {
        self == Self::NONE
    }
}

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for Uid {
    fn from(value: u32) -> Self {
        Uid(value)
    }
}

/// Code-signing identity of a process: who last wrote a rule, or who asks.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CodeIdentity {
    pub identifier: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requirement: Option<String>,
}

impl CodeIdentity {
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            requirement: None,
        }
    }

    pub fn with_requirement(mut self, requirement: impl Into<String>) -> Self {
        self.requirement = Some(requirement.into());
        self
    }
}
