use serde::{Deserialize, Serialize};
use std::fmt;

/// Result of evaluating a right, a rule or a mechanism sequence.
///
/// Every evaluation path ends in exactly one of these; none of them is an
/// error in the Rust sense.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Outcome {
    Success,
    Denied,
    /// The user aborted an interactive step.
    Canceled,
    /// Satisfying the rule would need a prompt the caller forbade.
    InteractionNotAllowed,
    /// Contract violation: undecodable rule, mechanism without identity,
    /// delegation cycle, unrecoverable store failure.
    Internal,
}

impl Outcome {
    pub fn is_success(self) -> bool {
        matches!(self, Outcome::Success)
    }

    /// Canceled and Internal abort every enclosing loop immediately.
    pub fn aborts(self) -> bool {
        matches!(self, Outcome::Canceled | Outcome::Internal)
    }

    pub fn name(self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::Denied => "denied",
            Outcome::Canceled => "canceled",
            Outcome::InteractionNotAllowed => "interaction-not-allowed",
            Outcome::Internal => "internal",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Why the last attempt failed. Only ever handed to the next mechanism
/// invocation as a hint; never returned to a caller as the decision.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Reason {
    #[default]
    NoReason,
    UnknownReason,
    InvalidPassphrase,
    UserNotInGroup,
    UnacceptableUser,
    TooManyTries,
    WorldChanged,
}

impl Reason {
    /// Stable numeric code placed into the `reason` hint.
    pub fn code(self) -> u64 {
        match self {
            Reason::NoReason => 0,
            Reason::UnknownReason => 1,
            Reason::InvalidPassphrase => 2,
            Reason::UserNotInGroup => 3,
            Reason::UnacceptableUser => 4,
            Reason::TooManyTries => 5,
            Reason::WorldChanged => 6,
        }
    }
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Reason::NoReason => "noReason",
            Reason::UnknownReason => "unknownReason",
            Reason::InvalidPassphrase => "invalidPassphrase",
            Reason::UserNotInGroup => "userNotInGroup",
            Reason::UnacceptableUser => "unacceptableUser",
            Reason::TooManyTries => "tooManyTries",
            Reason::WorldChanged => "worldChanged",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_canceled_and_internal_abort() {
        assert!(Outcome::Canceled.aborts());
        assert!(Outcome::Internal.aborts());
        assert!(!Outcome::Denied.aborts());
        assert!(!Outcome::InteractionNotAllowed.aborts());
        assert!(!Outcome::Success.aborts());
    }

    #[test]
    fn reason_codes_are_distinct() {
        let all = [
            Reason::NoReason,
            Reason::UnknownReason,
            Reason::InvalidPassphrase,
            Reason::UserNotInGroup,
            Reason::UnacceptableUser,
            Reason::TooManyTries,
            Reason::WorldChanged,
        ];
        let mut codes: Vec<_> = all.iter().map(|r| r.code()).collect();
        codes.dedup();
        assert_eq!(codes.len(), all.len());
        assert_eq!(Reason::WorldChanged.to_string(), "worldChanged");
    }
}
