use crate::directory::{AccountDirectory, GroupOracle};
use authd_types::Uid;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// What a credential vouches for.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Subject {
    /// A user who authenticated during this session.
    User {
        uid: Uid,
        username: String,
        display_name: String,
    },
    /// A right granted earlier (least-privilege mode).
    Right { name: String },
}

struct Inner {
    subject: Subject,
    created_at: DateTime<Utc>,
    shared: bool,
    valid: AtomicBool,
    // positive membership results only
    groups: Mutex<BTreeSet<String>>,
}

/// Shared handle to a credential.
///
/// Equality and hashing use the identity key (uid or right name) plus the
/// shared bit; validity and the membership cache are ignored.
#[derive(Clone)]
pub struct Credential {
    inner: Arc<Inner>,
}

impl Credential {
    fn build(subject: Subject, created_at: DateTime<Utc>, shared: bool, valid: bool) -> Self {
        Self {
            inner: Arc::new(Inner {
                subject,
                created_at,
                shared,
                valid: AtomicBool::new(valid),
                groups: Mutex::new(BTreeSet::new()),
            }),
        }
    }

    /// Credential for `uid`, looked up in `directory`.
    ///
    /// Unknown and locked accounts yield an invalid credential rather than
    /// an error, so the rule check can report `invalidPassphrase`.
    pub fn for_uid(uid: Uid, directory: &dyn AccountDirectory, now: DateTime<Utc>) -> Self {
        let (username, display_name, valid) = match directory.lookup(uid) {
            Ok(Some(account)) => (account.username, account.display_name, !account.locked),
            Ok(None) => {
                debug!(%uid, "no account for uid");
                (String::new(), String::new(), false)
            }
            Err(e) => {
                warn!(%uid, error = %e, "account lookup failed");
                (String::new(), String::new(), false)
            }
        };
        Self::build(
            Subject::User {
                uid,
                username,
                display_name,
            },
            now,
            false,
            valid,
        )
    }

    /// Right credential recording that `name` was granted.
    pub fn for_right(name: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self::build(Subject::Right { name: name.into() }, now, false, true)
    }

    /// Copy of this credential visible across processes of the session.
    pub fn derive_shared(&self) -> Self {
        let copy = Self::build(
            self.inner.subject.clone(),
            self.inner.created_at,
            true,
            self.is_valid(),
        );
        *copy.inner.groups.lock() = self.inner.groups.lock().clone();
        copy
    }

    pub fn subject(&self) -> &Subject {
        &self.inner.subject
    }

    pub fn is_right(&self) -> bool {
        matches!(self.inner.subject, Subject::Right { .. })
    }

    /// `Uid::NONE` for right credentials.
    pub fn uid(&self) -> Uid {
        match &self.inner.subject {
            Subject::User { uid, .. } => *uid,
            Subject::Right { .. } => Uid::NONE,
        }
    }

    /// Right name for right credentials, user name otherwise.
    pub fn name(&self) -> &str {
        match &self.inner.subject {
            Subject::User { username, .. } => username,
            Subject::Right { name } => name,
        }
    }

    pub fn display_name(&self) -> Option<&str> {
        match &self.inner.subject {
            Subject::User { display_name, .. } => Some(display_name),
            Subject::Right { .. } => None,
        }
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.inner.created_at
    }

    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now - self.inner.created_at
    }

    pub fn is_shared(&self) -> bool {
        self.inner.shared
    }

    pub fn is_valid(&self) -> bool {
        self.inner.valid.load(Ordering::SeqCst)
    }

    /// Mark invalid in place; every clone observes it.
    pub fn invalidate(&self) {
        self.inner.valid.store(false, Ordering::SeqCst);
    }

    pub fn cached_groups(&self) -> BTreeSet<String> {
        self.inner.groups.lock().clone()
    }

    /// Membership of this credential's user in `group`.
    ///
    /// The cache is consulted first; only positive oracle answers are
    /// remembered. Right credentials and the `Uid::NONE` sentinel never
    /// reach the oracle.
    pub fn check_membership(&self, group: &str, oracle: &dyn GroupOracle) -> bool {
        if self.is_right() || self.uid().is_none() {
            return false;
        }
        if self.inner.groups.lock().contains(group) {
            return true;
        }
        match oracle.is_member(self.uid(), group) {
            Ok(true) => {
                self.inner.groups.lock().insert(group.to_string());
                true
            }
            Ok(false) => false,
            Err(e) => {
                warn!(uid = %self.uid(), group, error = %e, "membership check failed");
                false
            }
        }
    }

    fn key(&self) -> (bool, &str, Uid, bool) {
        match &self.inner.subject {
            Subject::Right { name } => (true, name.as_str(), Uid::NONE, self.inner.shared),
            Subject::User { uid, .. } => (false, "", *uid, self.inner.shared),
        }
    }
}

impl PartialEq for Credential {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for Credential {}

impl Hash for Credential {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key().hash(state);
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("Credential");
        match &self.inner.subject {
            Subject::User { uid, username, .. } => s.field("uid", uid).field("username", username),
            Subject::Right { name } => s.field("right", name),
        };
        s.field("shared", &self.inner.shared)
            .field("valid", &self.is_valid())
            .field("created_at", &self.inner.created_at)
            .finish()
    }
}
