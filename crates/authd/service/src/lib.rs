//! authd Service - the authorization server context.
//!
//! [`AuthorizationService`] owns the rule store, the engine and the
//! registries that map clients to sessions, processes and authorization
//! tokens. It imports the start-up policy, hands out tokens and runs
//! evaluations on blocking worker threads.

#![deny(unsafe_code)]

mod config;
mod error;
mod headless;
mod registry;
mod service;

pub use config::{ServiceConfig, StoreSettings};
pub use error::{ServiceError, ServiceResult};
pub use headless::{headless, NoAgents};
pub use registry::Registry;
pub use service::{
    default_policy, AuthorizationService, ClientInfo, SessionInfo, DEFAULT_POLICY,
};
