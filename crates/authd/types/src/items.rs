//! Context and hint maps exchanged with mechanism agents.
//!
//! Each entry carries a [`Visibility`] tag that decides where it may flow:
//! `Internal` values live only for the current mechanism run, `Sticky`
//! values survive a failed attempt so a multi-step flow can resume, and
//! `Extractable` values are the only ones promoted to the caller.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Well-known item keys.
pub mod keys {
    // context
    pub const UID: &str = "uid";
    pub const USERNAME: &str = "username";
    pub const PASSWORD: &str = "password";
    pub const AUTO_LOGIN: &str = "autologin";

    // hints
    pub const AUTHORIZE_RIGHT: &str = "authorize-right";
    pub const AUTHORIZE_RULE: &str = "authorize-rule";
    pub const TRIES: &str = "tries";
    pub const RETRY_REASON: &str = "reason";
    pub const CLIENT_PID: &str = "client-pid";
    pub const CLIENT_UID: &str = "client-uid";
    pub const CLIENT_PATH: &str = "client-path";
    pub const CREATOR_PID: &str = "creator-pid";
    pub const PROMPT: &str = "prompt";
    pub const BUTTON: &str = "button";
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ItemValue {
    String(String),
    Data(Vec<u8>),
    UInt(u64),
    Int(i64),
    Bool(bool),
}

impl ItemValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ItemValue::String(s) => Some(s),
            ItemValue::Data(bytes) => std::str::from_utf8(bytes).ok(),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            ItemValue::UInt(v) => Some(*v),
            ItemValue::Int(v) => u64::try_from(*v).ok(),
            ItemValue::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ItemValue::Bool(v) => Some(*v),
            _ => None,
        }
    }
}

impl From<&str> for ItemValue {
    fn from(value: &str) -> Self {
        ItemValue::String(value.to_string())
    }
}

impl From<String> for ItemValue {
    fn from(value: String) -> Self {
        ItemValue::String(value)
    }
}

impl From<u64> for ItemValue {
    fn from(value: u64) -> Self {
        ItemValue::UInt(value)
    }
}

impl From<u32> for ItemValue {
    fn from(value: u32) -> Self {
        ItemValue::UInt(u64::from(value))
    }
}

impl From<i64> for ItemValue {
    fn from(value: i64) -> Self {
        ItemValue::Int(value)
    }
}

impl From<bool> for ItemValue {
    fn from(value: bool) -> Self {
        ItemValue::Bool(value)
    }
}

impl From<Vec<u8>> for ItemValue {
    fn from(value: Vec<u8>) -> Self {
        ItemValue::Data(value)
    }
}

/// Where an item may flow once a mechanism sequence ends.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Visibility {
    #[default]
    Internal,
    /// Promoted to the caller-visible context on success.
    Extractable,
    /// Kept across a failed attempt; never promoted to the caller.
    Sticky,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthItem {
    pub value: ItemValue,
    #[serde(default)]
    pub visibility: Visibility,
}

/// Ordered key → (value, visibility) map.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AuthItems {
    items: BTreeMap<String, AuthItem>,
}

impl AuthItems {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert with `Internal` visibility, replacing any previous entry.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<ItemValue>) {
        self.set_with(key, value, Visibility::Internal);
    }

    pub fn set_with(
        &mut self,
        key: impl Into<String>,
        value: impl Into<ItemValue>,
        visibility: Visibility,
    ) {
        self.items.insert(
            key.into(),
            AuthItem {
                value: value.into(),
                visibility,
            },
        );
    }

    /// Retag an existing entry. Returns false when the key is absent.
    pub fn set_visibility(&mut self, key: &str, visibility: Visibility) -> bool {
        match self.items.get_mut(key) {
            Some(item) => {
                item.visibility = visibility;
                true
            }
            None => false,
        }
    }

    pub fn get(&self, key: &str) -> Option<&ItemValue> {
        self.items.get(key).map(|item| &item.value)
    }

    pub fn item(&self, key: &str) -> Option<&AuthItem> {
        self.items.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(ItemValue::as_str)
    }

    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.get(key).and_then(ItemValue::as_u64)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.items.contains_key(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<AuthItem> {
        self.items.remove(key)
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &AuthItem)> {
        self.items.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Copy every entry of `other` over this map, tags included.
    pub fn merge(&mut self, other: &AuthItems) {
        for (key, item) in &other.items {
            self.items.insert(key.clone(), item.clone());
        }
    }

    /// Copy only the entries of `other` tagged `visibility`.
    pub fn copy_with_visibility(&mut self, other: &AuthItems, visibility: Visibility) {
        for (key, item) in other.items.iter().filter(|(_, i)| i.visibility == visibility) {
            self.items.insert(key.clone(), item.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn copy_with_visibility_filters_by_tag() {
        let mut source = AuthItems::new();
        source.set("scratch", "x");
        source.set_with("progress", 2u64, Visibility::Sticky);
        source.set_with("username", "alice", Visibility::Extractable);

        let mut sticky = AuthItems::new();
        sticky.copy_with_visibility(&source, Visibility::Sticky);
        assert_eq!(sticky.len(), 1);
        assert_eq!(sticky.get_u64("progress"), Some(2));

        let mut visible = AuthItems::new();
        visible.copy_with_visibility(&source, Visibility::Extractable);
        assert_eq!(visible.get_str("username"), Some("alice"));
        assert!(!visible.contains("scratch"));
    }

    #[test]
    fn merge_overwrites_and_keeps_tags() {
        let mut base = AuthItems::new();
        base.set("uid", 501u64);
        let mut update = AuthItems::new();
        update.set_with("uid", 502u64, Visibility::Extractable);
        base.merge(&update);
        assert_eq!(base.get_u64("uid"), Some(502));
        assert_eq!(
            base.item("uid").map(|i| i.visibility),
            Some(Visibility::Extractable)
        );
    }

    #[test]
    fn numeric_strings_read_as_uids() {
        let mut items = AuthItems::new();
        items.set(keys::UID, "501");
        assert_eq!(items.get_u64(keys::UID), Some(501));
        items.set(keys::UID, -1i64);
        assert_eq!(items.get_u64(keys::UID), None);
    }

    #[test]
    fn serializes_as_plain_map() {
        let mut items = AuthItems::new();
        items.set_with("username", "alice", Visibility::Extractable);
        let json = serde_json::to_value(&items).unwrap();
        assert!(json.get("username").is_some());
    }
}
