//! authd Credential - proof of identity or of a previously granted right.
//!
//! A [`Credential`] is a cheap handle: clones share validity and the
//! membership cache, so invalidating one copy (session logout) is seen by
//! every token and session that holds it.

#![deny(unsafe_code)]

mod credential;
mod directory;
mod error;
mod set;

pub use credential::{Credential, Subject};
pub use directory::{Account, AccountDirectory, GroupOracle, StaticDirectory, StaticGroups};
pub use error::{CredentialError, CredentialResult};
pub use set::CredentialSet;
