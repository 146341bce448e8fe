//! Account and group oracles, plus in-memory versions of both.

use crate::error::{CredentialError, CredentialResult};
use authd_types::Uid;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};

/// A user account as seen by the directory service.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Account {
    pub uid: Uid,
    pub username: String,
    pub display_name: String,
    /// Administratively disabled; credentials for it are never valid.
    pub locked: bool,
}

impl Account {
    pub fn new(uid: impl Into<Uid>, username: impl Into<String>) -> Self {
        let username = username.into();
        Self {
            uid: uid.into(),
            display_name: username.clone(),
            username,
            locked: false,
        }
    }

    pub fn locked(mut self) -> Self {
        self.locked = true;
        self
    }
}

pub trait AccountDirectory: Send + Sync {
    fn lookup(&self, uid: Uid) -> CredentialResult<Option<Account>>;
}

/// "Is this user a member of this group?"
pub trait GroupOracle: Send + Sync {
    fn is_member(&self, uid: Uid, group: &str) -> CredentialResult<bool>;
}

/// Fixed account table.
#[derive(Default)]
pub struct StaticDirectory {
    accounts: RwLock<HashMap<Uid, Account>>,
}

impl StaticDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_accounts(accounts: impl IntoIterator<Item = Account>) -> Self {
        let directory = Self::new();
        for account in accounts {
            directory.insert(account);
        }
        directory
    }

    pub fn insert(&self, account: Account) {
        self.accounts.write().insert(account.uid, account);
    }

    pub fn lock_account(&self, uid: Uid) -> CredentialResult<()> {
        let mut accounts = self.accounts.write();
        let account = accounts
            .get_mut(&uid)
            .ok_or_else(|| CredentialError::Directory(format!("no account for uid {uid}")))?;
        account.locked = true;
        Ok(())
    }
}

impl AccountDirectory for StaticDirectory {
    fn lookup(&self, uid: Uid) -> CredentialResult<Option<Account>> {
        Ok(self.accounts.read().get(&uid).cloned())
    }
}

/// Fixed group table that counts how often it is asked.
#[derive(Default)]
pub struct StaticGroups {
    members: RwLock<HashMap<String, HashSet<Uid>>>,
    lookups: AtomicUsize,
}

impl StaticGroups {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_member(&self, group: impl Into<String>, uid: impl Into<Uid>) {
        self.members
            .write()
            .entry(group.into())
            .or_default()
            .insert(uid.into());
    }

    pub fn remove_member(&self, group: &str, uid: Uid) {
        if let Some(members) = self.members.write().get_mut(group) {
            members.remove(&uid);
        }
    }

    /// Number of `is_member` calls served so far.
    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

impl GroupOracle for StaticGroups {
    fn is_member(&self, uid: Uid, group: &str) -> CredentialResult<bool> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .members
            .read()
            .get(group)
            .is_some_and(|members| members.contains(&uid)))
    }
}
