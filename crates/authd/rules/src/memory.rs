use crate::error::{StoreError, StoreResult};
use crate::mechanism::{Mechanism, MechanismId};
use crate::row::{HistoryEntry, HistoryOperation, Localizations, MechanismRow, RuleRow};
use crate::rule::{Rule, RuleId, RuleKind};
use crate::store::{RuleStore, TransactionMode, CONFIG_SCHEMA_VERSION};
use authd_types::CodeIdentity;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;
use std::time::Duration;
use tracing::{debug, warn};

pub const SCHEMA_VERSION: &str = "1";

/// How long a writer waits for the write lock, and how often it retries.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusyPolicy {
    pub timeout: Duration,
    pub retries: u32,
}

impl Default for BusyPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(1_000),
            retries: 3,
        }
    }
}

#[derive(Clone, Debug, Default)]
struct State {
    next_rule_id: RuleId,
    next_mechanism_id: MechanismId,
    rules: BTreeMap<RuleId, RuleRow>,
    names: HashMap<String, RuleId>,
    mechanisms: BTreeMap<MechanismId, MechanismRow>,
    rule_mechanisms: HashMap<RuleId, Vec<MechanismId>>,
    delegates: HashMap<RuleId, Vec<RuleId>>,
    localizations: HashMap<RuleId, Localizations>,
    history: Vec<HistoryEntry>,
    config: BTreeMap<String, String>,
}

impl State {
    fn get_rule(&self, name: &str) -> Option<RuleRow> {
        self.names
            .get(name)
            .and_then(|id| self.rules.get(id))
            .cloned()
    }

    fn list_rules(&self, kind: Option<RuleKind>) -> Vec<RuleRow> {
        let mut rows: Vec<RuleRow> = self
            .rules
            .values()
            .filter(|row| kind.map_or(true, |k| row.kind == k.code()))
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.name.cmp(&b.name));
        rows
    }

    fn get_mechanisms(&self, rule_id: RuleId) -> StoreResult<Vec<MechanismRow>> {
        let ids = match self.rule_mechanisms.get(&rule_id) {
            Some(ids) => ids,
            None => return Ok(Vec::new()),
        };
        ids.iter()
            .map(|id| {
                self.mechanisms.get(id).cloned().ok_or_else(|| {
                    StoreError::Corrupt(format!("rule {rule_id} references missing mechanism {id}"))
                })
            })
            .collect()
    }

    fn get_delegates(&self, rule_id: RuleId) -> StoreResult<Vec<RuleRow>> {
        let ids = match self.delegates.get(&rule_id) {
            Some(ids) => ids,
            None => return Ok(Vec::new()),
        };
        ids.iter()
            .map(|id| {
                self.rules.get(id).cloned().ok_or_else(|| {
                    StoreError::Corrupt(format!("rule {rule_id} references missing delegate {id}"))
                })
            })
            .collect()
    }

    fn intern_mechanism(&mut self, mechanism: &Mechanism) -> MechanismId {
        let found = self.mechanisms.values().find(|row| {
            row.plugin == mechanism.plugin
                && row.param == mechanism.param
                && row.privileged == mechanism.privileged
        });
        if let Some(row) = found {
            return row.id;
        }
        self.next_mechanism_id += 1;
        let id = self.next_mechanism_id;
        self.mechanisms.insert(
            id,
            MechanismRow {
                id,
                plugin: mechanism.plugin.clone(),
                param: mechanism.param.clone(),
                privileged: mechanism.privileged,
            },
        );
        id
    }

    fn commit_rule(
        &mut self,
        rule: &Rule,
        now: DateTime<Utc>,
        writer: Option<&CodeIdentity>,
    ) -> StoreResult<RuleId> {
        let delegate_ids = rule
            .delegates()
            .iter()
            .map(|d| {
                self.names
                    .get(&d.name)
                    .copied()
                    .ok_or_else(|| StoreError::UnresolvedDelegate {
                        rule: rule.name.clone(),
                        delegate: d.name.clone(),
                    })
            })
            .collect::<StoreResult<Vec<_>>>()?;

        let existing = self.get_rule(&rule.name);
        let id = match &existing {
            Some(row) => row.id,
            None => {
                self.next_rule_id += 1;
                self.next_rule_id
            }
        };

        let mut row = rule.to_row();
        row.id = id;
        row.created = existing
            .as_ref()
            .and_then(|r| r.created)
            .or(rule.created)
            .or(Some(now));
        row.modified = Some(now);
        if let Some(writer) = writer {
            row.identifier = Some(writer.identifier.clone());
            row.requirement = writer.requirement.clone();
        }

        let mechanism_ids = rule
            .mechanisms()
            .iter()
            .map(|m| self.intern_mechanism(m))
            .collect();

        self.history.push(HistoryEntry {
            timestamp: now,
            rule: rule.name.clone(),
            version: row.version,
            operation: if existing.is_some() {
                HistoryOperation::Update
            } else {
                HistoryOperation::Add
            },
            writer: row.identifier.clone(),
        });
        self.names.insert(rule.name.clone(), id);
        self.rules.insert(id, row);
        self.rule_mechanisms.insert(id, mechanism_ids);
        self.delegates.insert(id, delegate_ids);
        self.localizations.insert(
            id,
            Localizations {
                prompts: rule.prompts.clone(),
                buttons: rule.buttons.clone(),
            },
        );
        Ok(id)
    }

    fn remove_rule(&mut self, id: RuleId, now: DateTime<Utc>) -> StoreResult<()> {
        let row = self
            .rules
            .remove(&id)
            .ok_or_else(|| StoreError::NotFound(format!("rule id {id}")))?;
        self.names.remove(&row.name);
        self.rule_mechanisms.remove(&id);
        self.delegates.remove(&id);
        self.localizations.remove(&id);
        for children in self.delegates.values_mut() {
            children.retain(|child| *child != id);
        }
        self.history.push(HistoryEntry {
            timestamp: now,
            rule: row.name,
            version: row.version,
            operation: HistoryOperation::Remove,
            writer: None,
        });
        Ok(())
    }
}

/// Transactional in-memory [`RuleStore`].
///
/// Reads go straight to the committed state. Writers serialize on a
/// single write lock; each write or transaction works on a staged copy
/// that replaces the committed state only on commit.
pub struct MemoryRuleStore {
    state: RwLock<State>,
    writer: Mutex<()>,
    busy: BusyPolicy,
}

impl Default for MemoryRuleStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRuleStore {
    pub fn new() -> Self {
        Self::with_busy_policy(BusyPolicy::default())
    }

    pub fn with_busy_policy(busy: BusyPolicy) -> Self {
        let mut state = State::default();
        state
            .config
            .insert(CONFIG_SCHEMA_VERSION.to_string(), SCHEMA_VERSION.to_string());
        Self {
            state: RwLock::new(state),
            writer: Mutex::new(()),
            busy,
        }
    }

    fn acquire_writer(&self) -> StoreResult<MutexGuard<'_, ()>> {
        for attempt in 0..=self.busy.retries {
            if let Some(guard) = self.writer.try_lock_for(self.busy.timeout) {
                return Ok(guard);
            }
            debug!(attempt, "rule store busy");
        }
        warn!(retries = self.busy.retries, "rule store busy, giving up");
        Err(StoreError::Busy)
    }

    fn read<T>(&self, f: impl FnOnce(&State) -> T) -> StoreResult<T> {
        let state = self
            .state
            .read()
            .map_err(|_| StoreError::Backend("rule state lock poisoned".to_string()))?;
        Ok(f(&state))
    }

    fn snapshot(&self) -> StoreResult<State> {
        self.read(State::clone)
    }

    fn publish(&self, staged: State) -> StoreResult<()> {
        let mut state = self
            .state
            .write()
            .map_err(|_| StoreError::Backend("rule state lock poisoned".to_string()))?;
        *state = staged;
        Ok(())
    }

    fn write<T>(&self, f: impl FnOnce(&mut State) -> StoreResult<T>) -> StoreResult<T> {
        let _guard = self.acquire_writer()?;
        let mut staged = self.snapshot()?;
        let value = f(&mut staged)?;
        self.publish(staged)?;
        Ok(value)
    }
}

impl RuleStore for MemoryRuleStore {
    fn get_rule(&self, name: &str) -> StoreResult<Option<RuleRow>> {
        self.read(|s| s.get_rule(name))
    }

    fn get_rule_by_id(&self, id: RuleId) -> StoreResult<Option<RuleRow>> {
        self.read(|s| s.rules.get(&id).cloned())
    }

    fn list_rules(&self, kind: Option<RuleKind>) -> StoreResult<Vec<RuleRow>> {
        self.read(|s| s.list_rules(kind))
    }

    fn get_mechanisms(&self, rule_id: RuleId) -> StoreResult<Vec<MechanismRow>> {
        self.read(|s| s.get_mechanisms(rule_id))?
    }

    fn get_delegates(&self, rule_id: RuleId) -> StoreResult<Vec<RuleRow>> {
        self.read(|s| s.get_delegates(rule_id))?
    }

    fn get_localizations(&self, rule_id: RuleId) -> StoreResult<Localizations> {
        self.read(|s| s.localizations.get(&rule_id).cloned().unwrap_or_default())
    }

    fn commit_rule(
        &self,
        rule: &Rule,
        now: DateTime<Utc>,
        writer: Option<&CodeIdentity>,
    ) -> StoreResult<RuleId> {
        self.write(|s| s.commit_rule(rule, now, writer))
    }

    fn remove_rule(&self, id: RuleId, now: DateTime<Utc>) -> StoreResult<()> {
        self.write(|s| s.remove_rule(id, now))
    }

    fn history(&self, rule: &str) -> StoreResult<Vec<HistoryEntry>> {
        self.read(|s| {
            s.history
                .iter()
                .filter(|h| h.rule == rule)
                .cloned()
                .collect()
        })
    }

    fn config_get(&self, key: &str) -> StoreResult<Option<String>> {
        self.read(|s| s.config.get(key).cloned())
    }

    fn config_set(&self, key: &str, value: &str) -> StoreResult<()> {
        self.write(|s| {
            s.config.insert(key.to_string(), value.to_string());
            Ok(())
        })
    }

    fn run_transaction(
        &self,
        mode: TransactionMode,
        body: &mut dyn FnMut(&dyn RuleStore) -> StoreResult<bool>,
    ) -> StoreResult<bool> {
        // every mode takes the single write lock up front
        let _guard = self.acquire_writer()?;
        let tx = Transaction {
            staged: Mutex::new(self.snapshot()?),
        };
        if body(&tx)? {
            self.publish(tx.staged.into_inner())?;
            debug!(?mode, "transaction committed");
            Ok(true)
        } else {
            debug!(?mode, "transaction rolled back");
            Ok(false)
        }
    }
}

/// Store view handed to a transaction body; writes land in the staged
/// copy only.
struct Transaction {
    staged: Mutex<State>,
}

impl RuleStore for Transaction {
    fn get_rule(&self, name: &str) -> StoreResult<Option<RuleRow>> {
        Ok(self.staged.lock().get_rule(name))
    }

    fn get_rule_by_id(&self, id: RuleId) -> StoreResult<Option<RuleRow>> {
        Ok(self.staged.lock().rules.get(&id).cloned())
    }

    fn list_rules(&self, kind: Option<RuleKind>) -> StoreResult<Vec<RuleRow>> {
        Ok(self.staged.lock().list_rules(kind))
    }

    fn get_mechanisms(&self, rule_id: RuleId) -> StoreResult<Vec<MechanismRow>> {
        self.staged.lock().get_mechanisms(rule_id)
    }

    fn get_delegates(&self, rule_id: RuleId) -> StoreResult<Vec<RuleRow>> {
        self.staged.lock().get_delegates(rule_id)
    }

    fn get_localizations(&self, rule_id: RuleId) -> StoreResult<Localizations> {
        Ok(self
            .staged
            .lock()
            .localizations
            .get(&rule_id)
            .cloned()
            .unwrap_or_default())
    }

    fn commit_rule(
        &self,
        rule: &Rule,
        now: DateTime<Utc>,
        writer: Option<&CodeIdentity>,
    ) -> StoreResult<RuleId> {
        let mut staged = self.staged.lock();
        let mut scratch = staged.clone();
        let id = scratch.commit_rule(rule, now, writer)?;
        *staged = scratch;
        Ok(id)
    }

    fn remove_rule(&self, id: RuleId, now: DateTime<Utc>) -> StoreResult<()> {
        self.staged.lock().remove_rule(id, now)
    }

    fn history(&self, rule: &str) -> StoreResult<Vec<HistoryEntry>> {
        Ok(self
            .staged
            .lock()
            .history
            .iter()
            .filter(|h| h.rule == rule)
            .cloned()
            .collect())
    }

    fn config_get(&self, key: &str) -> StoreResult<Option<String>> {
        Ok(self.staged.lock().config.get(key).cloned())
    }

    fn config_set(&self, key: &str, value: &str) -> StoreResult<()> {
        self.staged
            .lock()
            .config
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    /// Nested transactions behave as savepoints.
    fn run_transaction(
        &self,
        _mode: TransactionMode,
        body: &mut dyn FnMut(&dyn RuleStore) -> StoreResult<bool>,
    ) -> StoreResult<bool> {
        let savepoint = self.staged.lock().clone();
        match body(self) {
            Ok(true) => Ok(true),
            other => {
                *self.staged.lock() = savepoint;
                other
            }
        }
    }
}
