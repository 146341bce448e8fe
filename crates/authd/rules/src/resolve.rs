use crate::error::RuleError;
use crate::rule::{Rule, RuleKind};
use crate::store::{load_rule, RuleStore};
use tracing::debug;

/// Names tried for `name`, most specific first.
///
/// `com.example.action` yields `com.example.action`, `com.example.`,
/// `com.` and finally `""`. A trailing `.` marks a domain policy.
pub fn candidate_names(name: &str) -> Vec<String> {
    let mut names = vec![name.to_string()];
    let mut rest = name;
    loop {
        let trimmed = rest.strip_suffix('.').unwrap_or(rest);
        match trimmed.rfind('.') {
            Some(idx) => {
                rest = &trimmed[..=idx];
                names.push(rest.to_string());
            }
            None => break,
        }
    }
    if !name.is_empty() {
        names.push(String::new());
    }
    names
}

/// Policy governing right `name`.
///
/// Only rules of kind [`RuleKind::Right`] are candidates. When nothing
/// matches, not even the stored `""` rule, the builtin default applies.
pub fn resolve(store: &dyn RuleStore, name: &str) -> Result<Rule, RuleError> {
    for candidate in candidate_names(name) {
        let row = match store.get_rule(&candidate)? {
            Some(row) if row.kind == RuleKind::Right.code() => row,
            _ => continue,
        };
        debug!(right = name, rule = %candidate, "resolved right");
        return load_rule(store, row);
    }
    debug!(right = name, "no stored policy, using builtin default");
    Ok(Rule::builtin_default())
}
