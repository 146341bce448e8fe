use crate::mechanism::MechanismId;
use crate::rule::RuleId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Flat stored form of a rule; kind and class are integer coded.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleRow {
    pub id: RuleId,
    pub name: String,
    pub kind: i64,
    pub class: i64,
    pub group: Option<String>,
    pub k_of_n: Option<i64>,
    pub timeout: Option<i64>,
    pub tries: Option<i64>,
    pub flags: u32,
    pub version: i64,
    pub created: Option<DateTime<Utc>>,
    pub modified: Option<DateTime<Utc>>,
    pub identifier: Option<String>,
    pub requirement: Option<String>,
    pub comment: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MechanismRow {
    pub id: MechanismId,
    pub plugin: String,
    pub param: String,
    pub privileged: bool,
}

/// Prompt and button texts of one rule, keyed by language.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Localizations {
    pub prompts: BTreeMap<String, String>,
    pub buttons: BTreeMap<String, String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryOperation {
    Add,
    Update,
    Remove,
}

/// One append-only history record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub timestamp: DateTime<Utc>,
    pub rule: String,
    pub version: i64,
    pub operation: HistoryOperation,
    /// Code identifier of the writer, when known.
    pub writer: Option<String>,
}
