//! authd Types - vocabulary shared by the credential, rule and engine layers.
//!
//! Nothing in here talks to a store, an agent or the clock of the host
//! beyond [`SystemClock`]; every other crate builds on these definitions.

#![deny(unsafe_code)]

mod clock;
mod flags;
mod identity;
pub mod items;
mod outcome;

pub use clock::{Clock, FixedClock, SystemClock};
pub use flags::{AuthFlags, RuleFlags, SessionAttributes, TokenFlags};
pub use identity::{CodeIdentity, Pid, Uid};
pub use items::{AuthItem, AuthItems, ItemValue, Visibility};
pub use outcome::{Outcome, Reason};

/// Name of the rule whose mechanisms stand in for any user rule that
/// declares none.
pub const AUTHENTICATE_RULE: &str = "authenticate";

/// Name of the primary interactive login right.
pub const LOGIN_CONSOLE_RIGHT: &str = "system.login.console";

/// Prefix shared by every administrative meta-right.
pub const CONFIG_PREFIX: &str = "config.";
