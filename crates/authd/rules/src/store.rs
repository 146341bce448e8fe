use crate::error::{RuleError, StoreResult};
use crate::row::{HistoryEntry, Localizations, MechanismRow, RuleRow};
use crate::rule::{Rule, RuleId, RuleKind};
use authd_types::CodeIdentity;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Config-table key holding the schema version.
pub const CONFIG_SCHEMA_VERSION: &str = "schema_version";
/// Config-table key holding the timestamp of the last policy import.
pub const CONFIG_DATA_TS: &str = "data_ts";

/// Locking behaviour requested for a transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionMode {
    Normal,
    Immediate,
    Exclusive,
}

/// Durable rule storage.
///
/// Implementations own their locking. Lock contention is retried below
/// this interface and only surfaces as [`crate::StoreError::Busy`] once
/// the retry budget is spent.
pub trait RuleStore: Send + Sync {
    fn get_rule(&self, name: &str) -> StoreResult<Option<RuleRow>>;

    fn get_rule_by_id(&self, id: RuleId) -> StoreResult<Option<RuleRow>>;

    /// Rows ordered by name, optionally restricted to one kind.
    fn list_rules(&self, kind: Option<RuleKind>) -> StoreResult<Vec<RuleRow>>;

    /// Mechanisms of a rule in evaluation order.
    fn get_mechanisms(&self, rule_id: RuleId) -> StoreResult<Vec<MechanismRow>>;

    /// Delegates of a rule in evaluation order.
    fn get_delegates(&self, rule_id: RuleId) -> StoreResult<Vec<RuleRow>>;

    fn get_localizations(&self, rule_id: RuleId) -> StoreResult<Localizations>;

    /// Insert or replace `rule` by name together with its join rows.
    fn commit_rule(
        &self,
        rule: &Rule,
        now: DateTime<Utc>,
        writer: Option<&CodeIdentity>,
    ) -> StoreResult<RuleId>;

    fn remove_rule(&self, id: RuleId, now: DateTime<Utc>) -> StoreResult<()>;

    /// History of one rule, oldest first.
    fn history(&self, rule: &str) -> StoreResult<Vec<HistoryEntry>>;

    fn config_get(&self, key: &str) -> StoreResult<Option<String>>;

    fn config_set(&self, key: &str, value: &str) -> StoreResult<()>;

    /// Run `body` atomically. `body` returns whether to commit; the
    /// result is whether the changes were committed.
    fn run_transaction(
        &self,
        mode: TransactionMode,
        body: &mut dyn FnMut(&dyn RuleStore) -> StoreResult<bool>,
    ) -> StoreResult<bool>;
}

/// Assemble a full [`Rule`] from a stored row and its children.
pub fn load_rule(store: &dyn RuleStore, row: RuleRow) -> Result<Rule, RuleError> {
    let mechanisms = store.get_mechanisms(row.id)?;
    let delegates = store.get_delegates(row.id)?;
    let localizations = store.get_localizations(row.id)?;
    Rule::from_parts(
        row,
        mechanisms,
        delegates,
        localizations.prompts,
        localizations.buttons,
    )
}

/// Exact-name lookup returning the assembled rule.
pub fn fetch_rule(store: &dyn RuleStore, name: &str) -> Result<Option<Rule>, RuleError> {
    match store.get_rule(name)? {
        Some(row) => load_rule(store, row).map(Some),
        None => Ok(None),
    }
}
