//! authd Rules - the policy graph.
//!
//! A [`Rule`] is one policy node: either a right callers request, or a
//! reusable delegation group referenced by other rules. This crate owns
//! the in-memory model, its document and row encodings, the
//! [`RuleStore`] contract with a transactional in-memory implementation,
//! and hierarchical right resolution.

#![deny(unsafe_code)]

mod document;
mod error;
mod import;
mod mechanism;
mod memory;
mod resolve;
mod row;
mod rule;
mod store;

pub use document::key as document_key;
pub use error::{ImportError, RuleError, StoreError, StoreResult};
pub use import::{
    export_policy, import_policy, parse_policy, ImportMode, ImportReport, MAX_IMPORT_PASSES,
    RIGHTS_SECTION, RULES_SECTION,
};
pub use mechanism::{BuiltinKind, Mechanism, MechanismId, MechanismKind, PluginRef};
pub use memory::{BusyPolicy, MemoryRuleStore, SCHEMA_VERSION};
pub use resolve::{candidate_names, resolve};
pub use row::{HistoryEntry, HistoryOperation, Localizations, MechanismRow, RuleRow};
pub use rule::{
    DelegateRef, DelegationPolicy, MechanismPolicy, Rule, RuleClass, RuleId, RuleKind,
    UserPolicy, DEFAULT_RULE_GROUP, DEFAULT_RULE_TIMEOUT, DEFAULT_USER_TIMEOUT,
    DEFAULT_USER_TRIES,
};
pub use store::{
    fetch_rule, load_rule, RuleStore, TransactionMode, CONFIG_DATA_TS, CONFIG_SCHEMA_VERSION,
};
