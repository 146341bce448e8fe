use crate::config::ServiceConfig;
use crate::error::{ServiceError, ServiceResult};
use crate::registry::Registry;
use authd_credential::{AccountDirectory, Credential};
use authd_engine::{
    AuthToken, Authorization, AuthorizationRequest, Collaborators, Engine, EngineConfig, Process,
    Session, SessionId,
};
use authd_rules::{
    export_policy, import_policy, parse_policy, ImportMode, ImportReport, MemoryRuleStore,
    RuleStore, CONFIG_DATA_TS,
};
use authd_types::{
    AuthFlags, Clock, CodeIdentity, Outcome, Pid, SessionAttributes, TokenFlags, Uid,
};
use dashmap::DashMap;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// Policy shipped with the service, imported into an empty store.
pub const DEFAULT_POLICY: &str = include_str!("default_policy.json");

pub fn default_policy() -> ServiceResult<Value> {
    Ok(parse_policy(DEFAULT_POLICY)?)
}

/// Login session a client belongs to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionInfo {
    pub id: SessionId,
    pub owner_uid: Uid,
    pub attributes: SessionAttributes,
}

/// What the transport knows about a connecting client.
#[derive(Clone, Debug)]
pub struct ClientInfo {
    pub pid: Pid,
    pub uid: Uid,
    pub session: SessionInfo,
    pub code: Option<CodeIdentity>,
    pub entitlements: BTreeMap<String, Value>,
    pub flags: TokenFlags,
}

impl ClientInfo {
    pub fn new(pid: Pid, uid: impl Into<Uid>, session: SessionInfo) -> Self {
        Self {
            pid,
            uid: uid.into(),
            session,
            code: None,
            entitlements: BTreeMap::new(),
            flags: TokenFlags::empty(),
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

    pub fn with_flags(mut self, flags: TokenFlags) -> Self {
        self.flags = flags;
        self
    }
}

/// The authorization server context.
///
/// Owns the engine and the session, process and token registries.
/// Evaluations run on blocking worker threads so a request waiting on a
/// prompt does not hold up the others.
pub struct AuthorizationService {
    engine: Arc<Engine>,
    sessions: Registry<SessionId, Session>,
    processes: Registry<Pid, Process>,
    tokens: DashMap<Uuid, Arc<AuthToken>>,
    directory: Arc<dyn AccountDirectory>,
    clock: Arc<dyn Clock>,
}

impl AuthorizationService {
    /// Build the service over a fresh in-memory store and import the
    /// start-up policy when configured to.
    pub fn new(config: &ServiceConfig, env: Collaborators) -> ServiceResult<Self> {
        let store = Arc::new(MemoryRuleStore::with_busy_policy(config.store.busy_policy()));
        let service = Self::with_store(store, env, config.engine.clone());
        if config.import_on_start {
            service.bootstrap(config.policy_path.as_deref())?;
        }
        Ok(service)
    }

    pub fn with_store(
        store: Arc<dyn RuleStore>,
        env: Collaborators,
        engine_config: EngineConfig,
    ) -> Self {
        let directory = Arc::clone(&env.directory);
        let clock = Arc::clone(&env.clock);
        Self {
            engine: Arc::new(Engine::new(store, env, engine_config)),
            sessions: Registry::new("session"),
            processes: Registry::new("process"),
            tokens: DashMap::new(),
            directory,
            clock,
        }
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    fn store(&self) -> &dyn RuleStore {
        self.engine.store().as_ref()
    }

    /// Import `policy_path` (or the bundled policy) unless the store was
    /// populated before.
    pub fn bootstrap(&self, policy_path: Option<&Path>) -> ServiceResult<Option<ImportReport>> {
        if let Some(ts) = self.store().config_get(CONFIG_DATA_TS)? {
            debug!(data_ts = %ts, "policy already imported");
            return Ok(None);
        }
        let doc = match policy_path {
            Some(path) => parse_policy(&std::fs::read_to_string(path)?)?,
            None => default_policy()?,
        };
        let report = self.import(&doc, ImportMode::VersionChecked)?;
        info!(
            source = %policy_path.map_or_else(|| "bundled".to_string(), |p| p.display().to_string()),
            imported = report.imported.len(),
            skipped = report.skipped.len(),
            "start-up policy imported"
        );
        Ok(Some(report))
    }

    pub fn import(&self, doc: &Value, mode: ImportMode) -> ServiceResult<ImportReport> {
        Ok(import_policy(self.store(), doc, mode, self.clock.now(), None)?)
    }

    pub fn export(&self) -> ServiceResult<Value> {
        Ok(export_policy(self.store())?)
    }

    /// New authorization for `client`. Session and process entries are
    /// shared with the client's other live authorizations.
    pub fn create_authorization(
        &self,
        client: &ClientInfo,
        least_privileged: bool,
    ) -> Arc<AuthToken> {
        let info = &client.session;
        let session = self.sessions.get_or_insert_with(
            info.id,
            |live| live.owner_uid() == info.owner_uid,
            || Session::new(info.id, info.owner_uid, info.attributes),
        );
        let process = self.processes.get_or_insert_with(
            client.pid,
            |live| live.uid() == client.uid && Arc::ptr_eq(live.session(), &session),
            || self.build_process(client, &session),
        );

        let token = Arc::new(AuthToken::new(process, least_privileged));
        self.tokens.insert(token.id(), Arc::clone(&token));
        info!(
            token = %token.id(),
            pid = client.pid,
            uid = %client.uid,
            session = info.id,
            least_privileged,
            "authorization created"
        );
        token
    }

    fn build_process(&self, client: &ClientInfo, session: &Arc<Session>) -> Process {
        let credential = Credential::for_uid(client.uid, self.directory.as_ref(), self.clock.now());
        let mut process = Process::new(client.pid, client.uid, Arc::clone(session), credential)
            .with_flags(client.flags);
        if let Some(code) = &client.code {
            process = process.with_code(code.clone());
        }
        for (name, value) in &client.entitlements {
            process = process.with_entitlement(name.clone(), value.clone());
        }
        process
    }

    pub fn authorization(&self, id: &Uuid) -> ServiceResult<Arc<AuthToken>> {
        self.tokens
            .get(id)
            .map(|token| Arc::clone(token.value()))
            .ok_or(ServiceError::UnknownAuthorization(*id))
    }

    async fn on_worker<T, F>(&self, work: F) -> ServiceResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Engine) -> T + Send + 'static,
    {
        let engine = Arc::clone(&self.engine);
        tokio::task::spawn_blocking(move || work(&engine))
            .await
            .map_err(|e| ServiceError::Worker(e.to_string()))
    }

    /// Evaluate `request` for authorization `id`.
    pub async fn copy_rights(
        &self,
        id: Uuid,
        request: AuthorizationRequest,
    ) -> ServiceResult<Authorization> {
        let token = self.authorization(&id)?;
        self.on_worker(move |engine| engine.authorize(&token, &request))
            .await
    }

    /// Forget authorization `id`; with `DESTROY_RIGHTS` its credentials
    /// are invalidated everywhere they were published.
    pub fn release(&self, id: Uuid, flags: AuthFlags) -> ServiceResult<()> {
        let (_, token) = self
            .tokens
            .remove(&id)
            .ok_or(ServiceError::UnknownAuthorization(id))?;
        if flags.contains(AuthFlags::DESTROY_RIGHTS) {
            token.destroy();
        }
        debug!(token = %id, "authorization released");
        drop(token);
        self.sessions.prune();
        self.processes.prune();
        Ok(())
    }

    pub fn destroy(&self, id: Uuid) -> ServiceResult<()> {
        self.release(id, AuthFlags::DESTROY_RIGHTS)
    }

    pub async fn set_right(
        &self,
        id: Uuid,
        name: &str,
        document: Value,
        flags: AuthFlags,
    ) -> ServiceResult<Outcome> {
        let token = self.authorization(&id)?;
        let name = name.to_string();
        Ok(self
            .on_worker(move |engine| engine.set_right(&token, &name, &document, flags))
            .await??)
    }

    pub async fn remove_right(
        &self,
        id: Uuid,
        name: &str,
        flags: AuthFlags,
    ) -> ServiceResult<Outcome> {
        let token = self.authorization(&id)?;
        let name = name.to_string();
        Ok(self
            .on_worker(move |engine| engine.remove_right(&token, &name, flags))
            .await??)
    }

    /// Document of the rule governing `name`.
    pub fn right_get(&self, name: &str) -> ServiceResult<Value> {
        Ok(self.engine.right_properties(name)?)
    }

    pub fn session(&self, id: SessionId) -> Option<Arc<Session>> {
        self.sessions.get(&id)
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn process_count(&self) -> usize {
        self.processes.len()
    }

    pub fn authorization_count(&self) -> usize {
        self.tokens.len()
    }
}
