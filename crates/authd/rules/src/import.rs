use crate::document::key;
use crate::error::{ImportError, RuleError, StoreError};
use crate::rule::{DelegateRef, Rule, RuleKind};
use crate::store::{load_rule, RuleStore, TransactionMode, CONFIG_DATA_TS};
use authd_types::CodeIdentity;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

pub const RIGHTS_SECTION: &str = "rights";
pub const RULES_SECTION: &str = "rules";

/// Forward references between rules are resolved over at most this many
/// passes.
pub const MAX_IMPORT_PASSES: usize = 3;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImportMode {
    /// Replace a stored rule only when the imported version is newer.
    VersionChecked,
    Overwrite,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportReport {
    pub imported: Vec<String>,
    /// Rules left alone because the stored version is not older.
    pub skipped: Vec<String>,
}

pub fn parse_policy(text: &str) -> Result<Value, ImportError> {
    serde_json::from_str(text).map_err(|e| ImportError::InvalidDocument(e.to_string()))
}

fn section<'a>(doc: &'a Value, key: &str) -> Result<Option<&'a Map<String, Value>>, ImportError> {
    match doc.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Object(map)) => Ok(Some(map)),
        Some(_) => Err(ImportError::InvalidDocument(format!(
            "section {key:?} is not a map"
        ))),
    }
}

/// Import every rule and right of `doc` in one exclusive transaction.
///
/// Rules are committed before rights. A rule whose delegate is not yet
/// stored is deferred to the next pass; anything still unresolved after
/// [`MAX_IMPORT_PASSES`] fails the import and nothing is written.
pub fn import_policy(
    store: &dyn RuleStore,
    doc: &Value,
    mode: ImportMode,
    now: DateTime<Utc>,
    writer: Option<&CodeIdentity>,
) -> Result<ImportReport, ImportError> {
    if !doc.is_object() {
        return Err(ImportError::InvalidDocument("expected a map".into()));
    }
    let mut entries: Vec<(RuleKind, &str, &Value)> = Vec::new();
    for (kind, key) in [(RuleKind::Rule, RULES_SECTION), (RuleKind::Right, RIGHTS_SECTION)] {
        if let Some(map) = section(doc, key)? {
            entries.extend(map.iter().map(|(name, body)| (kind, name.as_str(), body)));
        }
    }

    let mut failure: Option<ImportError> = None;
    let mut report = ImportReport::default();
    let committed = store.run_transaction(TransactionMode::Exclusive, &mut |tx| {
        report = ImportReport::default();
        match import_entries(tx, &entries, mode, now, writer, &mut report) {
            Ok(()) => {
                tx.config_set(
                    CONFIG_DATA_TS,
                    &now.to_rfc3339_opts(SecondsFormat::AutoSi, true),
                )?;
                Ok(true)
            }
            Err(ImportError::Store(e)) => Err(e),
            Err(e) => {
                failure = Some(e);
                Ok(false)
            }
        }
    })?;

    if let Some(e) = failure {
        warn!(error = %e, "policy import rolled back");
        return Err(e);
    }
    if !committed {
        return Err(ImportError::Store(StoreError::Backend(
            "import transaction not committed".into(),
        )));
    }
    info!(
        imported = report.imported.len(),
        skipped = report.skipped.len(),
        "policy imported"
    );
    Ok(report)
}

fn import_entries(
    tx: &dyn RuleStore,
    entries: &[(RuleKind, &str, &Value)],
    mode: ImportMode,
    now: DateTime<Utc>,
    writer: Option<&CodeIdentity>,
    report: &mut ImportReport,
) -> Result<(), ImportError> {
    let mut pending: Vec<&(RuleKind, &str, &Value)> = entries.iter().collect();

    for pass in 1..=MAX_IMPORT_PASSES {
        let mut deferred = Vec::new();
        for entry in pending {
            let (kind, name, body) = *entry;
            if mode == ImportMode::VersionChecked {
                if let Some(stored) = tx.get_rule(name)? {
                    let incoming = body.get(key::VERSION).and_then(Value::as_i64).unwrap_or(0);
                    if incoming <= stored.version {
                        debug!(rule = name, stored = stored.version, incoming, "import skipped, not newer");
                        report.skipped.push(name.to_string());
                        continue;
                    }
                }
            }

            let mut lookup_error: Option<StoreError> = None;
            let mut resolver = |delegate: &str| match tx.get_rule(delegate) {
                Ok(row) => row.map(|row| DelegateRef::new(row.id, row.name)),
                Err(e) => {
                    lookup_error = Some(e);
                    None
                }
            };
            let parsed = Rule::from_document(name, kind, body, &mut resolver);
            if let Some(e) = lookup_error {
                return Err(e.into());
            }
            match parsed {
                Ok(rule) => {
                    tx.commit_rule(&rule, now, writer)?;
                    report.imported.push(name.to_string());
                }
                Err(RuleError::UnresolvedDelegate { delegate, .. }) => {
                    debug!(rule = name, delegate = %delegate, pass, "deferring rule");
                    deferred.push(entry);
                }
                Err(e) => return Err(e.into()),
            }
        }
        if deferred.is_empty() {
            return Ok(());
        }
        pending = deferred;
    }

    Err(ImportError::Unresolved(
        pending.iter().map(|(_, name, _)| name.to_string()).collect(),
    ))
}

/// Document holding every stored rule and right.
pub fn export_policy(store: &dyn RuleStore) -> Result<Value, RuleError> {
    let mut rights = Map::new();
    let mut rules = Map::new();
    for row in store.list_rules(None)? {
        let rule = load_rule(store, row)?;
        let target = match rule.kind {
            RuleKind::Right => &mut rights,
            RuleKind::Rule => &mut rules,
        };
        target.insert(rule.name.clone(), rule.to_document());
    }
    let mut doc = Map::new();
    doc.insert(RIGHTS_SECTION.into(), Value::Object(rights));
    doc.insert(RULES_SECTION.into(), Value::Object(rules));
    Ok(Value::Object(doc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryRuleStore;
    use crate::row::HistoryOperation;
    use crate::store::fetch_rule;
    use serde_json::json;

    #[test]
    fn newer_version_replaces_and_older_is_ignored() {
        let store = MemoryRuleStore::new();
        let now = Utc::now();
        let v1 = json!({"rights": {"X": {"class": "allow", "version": 1}}});
        let v2 = json!({"rights": {"X": {"class": "deny", "version": 2}}});

        import_policy(&store, &v1, ImportMode::VersionChecked, now, None).unwrap();
        let report = import_policy(&store, &v2, ImportMode::VersionChecked, now, None).unwrap();
        assert_eq!(report.imported, vec!["X"]);
        let row = store.get_rule("X").unwrap().unwrap();
        assert_eq!(row.version, 2);
        let ops: Vec<_> = store
            .history("X")
            .unwrap()
            .into_iter()
            .map(|h| h.operation)
            .collect();
        assert_eq!(ops, vec![HistoryOperation::Add, HistoryOperation::Update]);

        let report = import_policy(&store, &v1, ImportMode::VersionChecked, now, None).unwrap();
        assert_eq!(report.skipped, vec!["X"]);
        assert_eq!(store.get_rule("X").unwrap().unwrap().version, 2);
        assert_eq!(store.history("X").unwrap().len(), 2);
    }

    #[test]
    fn overwrite_ignores_versions() {
        let store = MemoryRuleStore::new();
        let now = Utc::now();
        let v2 = json!({"rights": {"X": {"class": "deny", "version": 2}}});
        let v1 = json!({"rights": {"X": {"class": "allow", "version": 1}}});
        import_policy(&store, &v2, ImportMode::Overwrite, now, None).unwrap();
        import_policy(&store, &v1, ImportMode::Overwrite, now, None).unwrap();
        assert_eq!(store.get_rule("X").unwrap().unwrap().version, 1);
    }

    #[test]
    fn forward_references_resolve_across_passes() {
        let store = MemoryRuleStore::new();
        // JSON maps iterate alphabetically, so "a" refers forward twice
        let doc = json!({
            "rules": {
                "a": {"rule": ["b"]},
                "b": {"rule": ["c"]},
                "c": {"class": "allow"},
            },
            "rights": {"right": {"rule": "a"}},
        });
        let report = import_policy(&store, &doc, ImportMode::Overwrite, Utc::now(), None).unwrap();
        assert_eq!(report.imported.len(), 4);
        let a = fetch_rule(&store, "a").unwrap().unwrap();
        assert_eq!(a.delegates()[0].name, "b");
        assert!(store.config_get(CONFIG_DATA_TS).unwrap().is_some());
    }

    #[test]
    fn chains_longer_than_the_pass_limit_fail_atomically() {
        let store = MemoryRuleStore::new();
        let doc = json!({
            "rules": {
                "a": {"rule": "b"},
                "b": {"rule": "c"},
                "c": {"rule": "d"},
                "d": {"class": "allow"},
            },
        });
        let err = import_policy(&store, &doc, ImportMode::Overwrite, Utc::now(), None).unwrap_err();
        assert!(matches!(err, ImportError::Unresolved(ref names) if names == &vec!["a".to_string()]));
        assert!(store.list_rules(None).unwrap().is_empty());
        assert!(store.config_get(CONFIG_DATA_TS).unwrap().is_none());
    }

    #[test]
    fn malformed_sections_are_rejected() {
        let store = MemoryRuleStore::new();
        let err = import_policy(&store, &json!({"rights": []}), ImportMode::Overwrite, Utc::now(), None)
            .unwrap_err();
        assert!(matches!(err, ImportError::InvalidDocument(_)));
        assert!(parse_policy("{not json").is_err());
    }

    fn without_modified(rule: &Rule) -> Value {
        let mut doc = rule.to_document();
        if let Some(map) = doc.as_object_mut() {
            map.remove(key::MODIFIED);
        }
        doc
    }

    #[test]
    fn export_then_import_reproduces_rules() {
        let source = MemoryRuleStore::new();
        let doc = json!({
            "rules": {
                "admin": {"class": "user", "group": "admin", "timeout": 300, "shared": true,
                          "mechanisms": ["builtin:authenticate,privileged"]},
                "root": {"class": "user", "allow-root": true, "authenticate-user": false},
            },
            "rights": {
                "system.test": {"class": "rule", "k-of-n": 1, "rule": ["root", "admin"],
                                "default-prompt": {"": "Allow?", "de": "Erlauben?"}, "version": 3},
                "system.mech": {"class": "evaluate-mechanisms", "tries": 2,
                                "mechanisms": ["a:one", "b:two,privileged"]},
            },
        });
        import_policy(&source, &doc, ImportMode::Overwrite, Utc::now(), None).unwrap();
        let exported = export_policy(&source).unwrap();

        let target = MemoryRuleStore::new();
        import_policy(&target, &exported, ImportMode::Overwrite, Utc::now(), None).unwrap();
        for name in ["admin", "root", "system.test", "system.mech"] {
            let a = fetch_rule(&source, name).unwrap().unwrap();
            let b = fetch_rule(&target, name).unwrap().unwrap();
            assert_eq!(without_modified(&a), without_modified(&b), "{name}");
        }
    }
}
