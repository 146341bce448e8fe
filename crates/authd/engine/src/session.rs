use authd_credential::{Credential, CredentialSet};
use authd_types::{AuthItems, CodeIdentity, Pid, SessionAttributes, TokenFlags, Uid};
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

pub type SessionId = u32;

/// Entitlement holding the array of rights a caller may take without
/// evaluation.
pub const ENTITLEMENT_RIGHTS: &str = "authorization.rights";
/// Entitlement consulted by `vpn-entitled-group` rules.
pub const ENTITLEMENT_VPN: &str = "authorization.vpn-configuration";

/// A login session and its shared credential cache.
#[derive(Debug)]
pub struct Session {
    id: SessionId,
    owner_uid: Uid,
    attributes: RwLock<SessionAttributes>,
    credentials: RwLock<CredentialSet>,
}

impl Session {
    pub fn new(id: SessionId, owner_uid: Uid, attributes: SessionAttributes) -> Self {
        Self {
            id,
            owner_uid,
            attributes: RwLock::new(attributes),
            credentials: RwLock::new(CredentialSet::new()),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn owner_uid(&self) -> Uid {
        self.owner_uid
    }

    pub fn attributes(&self) -> SessionAttributes {
        *self.attributes.read()
    }

    pub fn has(&self, attribute: SessionAttributes) -> bool {
        self.attributes.read().contains(attribute)
    }

    pub fn set_attribute(&self, attribute: SessionAttributes) {
        self.attributes.write().insert(attribute);
    }

    /// Snapshot of the shared credential cache.
    pub fn credentials(&self) -> CredentialSet {
        self.credentials.read().clone()
    }

    /// Publish `credential`, superseding an equal one that may have
    /// expired or been invalidated.
    pub fn add_credential(&self, credential: Credential) {
        let replaced = self.credentials.write().replace(credential);
        debug!(session = self.id, replaced = replaced.is_some(), "shared credential published");
    }
}

/// A client process as seen by the daemon.
#[derive(Debug)]
pub struct Process {
    pid: Pid,
    uid: Uid,
    session: Arc<Session>,
    code: Option<CodeIdentity>,
    entitlements: BTreeMap<String, Value>,
    flags: TokenFlags,
    // base credential of the caller's own uid
    credential: Credential,
}

impl Process {
    pub fn new(pid: Pid, uid: Uid, session: Arc<Session>, credential: Credential) -> Self {
        Self {
            pid,
            uid,
            session,
            code: None,
            entitlements: BTreeMap::new(),
            flags: TokenFlags::empty(),
            credential,
        }
    }

    pub fn with_code(mut self, code: CodeIdentity) -> Self {
        self.code = Some(code);
        self
    }

    pub fn with_entitlement(mut self, name: impl Into<String>, value: Value) -> Self {
        self.entitlements.insert(name.into(), value);
        self
    }

    /// Sandboxed / platform-signed bits of the process.
    pub fn with_flags(mut self, flags: TokenFlags) -> Self {
        self.flags = flags & (TokenFlags::SANDBOXED | TokenFlags::APPLE_SIGNED);
        self
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    pub fn uid(&self) -> Uid {
        self.uid
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn code(&self) -> Option<&CodeIdentity> {
        self.code.as_ref()
    }

    pub fn flags(&self) -> TokenFlags {
        self.flags
    }

    pub fn credential(&self) -> &Credential {
        &self.credential
    }

    pub fn entitlement(&self, name: &str) -> Option<&Value> {
        self.entitlements.get(name)
    }

    /// True when entitlement `name` is `true`, or an array naming `right`.
    pub fn entitled(&self, name: &str, right: &str) -> bool {
        match self.entitlement(name) {
            Some(Value::Bool(granted)) => *granted,
            Some(Value::Array(rights)) => rights.iter().any(|r| r.as_str() == Some(right)),
            _ => false,
        }
    }
}

/// An authorization reference held by a client.
#[derive(Debug)]
pub struct AuthToken {
    id: Uuid,
    process: Arc<Process>,
    creator_pid: Pid,
    flags: TokenFlags,
    credentials: RwLock<CredentialSet>,
    context: RwLock<AuthItems>,
    dismissed: AtomicBool,
}

impl AuthToken {
    pub fn new(process: Arc<Process>, least_privileged: bool) -> Self {
        let mut flags = process.flags();
        if least_privileged {
            flags |= TokenFlags::LEAST_PRIVILEGED;
        }
        Self {
            id: Uuid::new_v4(),
            creator_pid: process.pid(),
            process,
            flags,
            credentials: RwLock::new(CredentialSet::new()),
            context: RwLock::new(AuthItems::new()),
            dismissed: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn process(&self) -> &Arc<Process> {
        &self.process
    }

    pub fn session(&self) -> &Arc<Session> {
        self.process.session()
    }

    pub fn creator_pid(&self) -> Pid {
        self.creator_pid
    }

    pub fn flags(&self) -> TokenFlags {
        self.flags
    }

    pub fn is_least_privileged(&self) -> bool {
        self.flags.contains(TokenFlags::LEAST_PRIVILEGED)
    }

    pub fn is_sandboxed(&self) -> bool {
        self.flags.contains(TokenFlags::SANDBOXED)
    }

    pub fn is_apple_signed(&self) -> bool {
        self.flags.contains(TokenFlags::APPLE_SIGNED)
    }

    pub fn entitlement(&self, name: &str) -> Option<&Value> {
        self.process.entitlement(name)
    }

    pub fn entitled_for_right(&self, right: &str) -> bool {
        self.process.entitled(ENTITLEMENT_RIGHTS, right)
    }

    pub fn vpn_entitled_for_right(&self, right: &str) -> bool {
        self.process.entitled(ENTITLEMENT_VPN, right)
    }

    pub fn credentials(&self) -> CredentialSet {
        self.credentials.read().clone()
    }

    pub fn add_credential(&self, credential: Credential) {
        self.credentials.write().replace(credential);
    }

    /// Caller-visible context accumulated by successful evaluations.
    pub fn context(&self) -> AuthItems {
        self.context.read().clone()
    }

    pub fn merge_context(&self, items: &AuthItems) {
        self.context.write().merge(items);
    }

    /// Ask any in-flight interactive evaluation to stop.
    pub fn dismiss(&self) {
        self.dismissed.store(true, Ordering::SeqCst);
    }

    pub fn is_dismissed(&self) -> bool {
        self.dismissed.load(Ordering::SeqCst)
    }

    pub(crate) fn reset_dismissed(&self) {
        self.dismissed.store(false, Ordering::SeqCst);
    }

    /// Invalidate every credential this token holds; shared copies
    /// published to the session are the same handles and go with them.
    pub fn destroy(&self) {
        let credentials = self.credentials.read();
        credentials.invalidate_all();
        debug!(token = %self.id, count = credentials.len(), "authorization destroyed");
    }
}
