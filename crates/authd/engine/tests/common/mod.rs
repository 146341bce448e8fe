#![allow(dead_code)]

use authd_credential::{Account, Credential, StaticDirectory, StaticGroups};
use authd_engine::{
    AdmissionOracle, AgentFactory, AgentResponse, AgentResult, AuditLog, AuthToken,
    Authorization, AuthorizationRequest, Collaborators, Engine, EngineConfig, EngineResult,
    MechanismAgent, PowerState, Process, Session,
};
use authd_rules::{
    import_policy, DelegateRef, DelegationPolicy, ImportMode, Mechanism, MechanismPolicy,
    MemoryRuleStore, Rule, RuleClass, RuleKind, RuleStore,
};
use authd_types::items::keys;
use authd_types::{
    AuthFlags, AuthItems, FixedClock, Pid, SessionAttributes, Uid, Visibility,
};
use chrono::{TimeZone, Utc};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub const ROOT: u32 = 0;
pub const ALICE: u32 = 501;
pub const BOB: u32 = 502;
pub const MALLORY: u32 = 503;

type Hook = Box<dyn Fn() + Send + Sync>;

/// Scripted answers for every mechanism agent, keyed by mechanism string.
#[derive(Default)]
pub struct AgentScript {
    queued: Mutex<HashMap<String, VecDeque<AgentResponse>>>,
    fallback: Mutex<HashMap<String, AgentResponse>>,
    runs: Mutex<Vec<String>>,
    seen_hints: Mutex<Vec<AuthItems>>,
    seen_context: Mutex<Vec<AuthItems>>,
    deactivated: Mutex<Vec<String>>,
    interrupts: Mutex<HashMap<String, Arc<AtomicBool>>>,
    raise_after: Mutex<Vec<(String, String)>>,
    hooks: Mutex<HashMap<String, Hook>>,
}

impl AgentScript {
    pub fn push(&self, mechanism: &str, response: AgentResponse) {
        self.queued
            .lock()
            .entry(mechanism.to_string())
            .or_default()
            .push_back(response);
    }

    pub fn always(&self, mechanism: &str, response: AgentResponse) {
        self.fallback.lock().insert(mechanism.to_string(), response);
    }

    /// Once `after` has run, raise the interrupt of `raise` (one shot).
    pub fn interrupt_after(&self, after: &str, raise: &str) {
        self.raise_after
            .lock()
            .push((after.to_string(), raise.to_string()));
    }

    pub fn on_run(&self, mechanism: &str, hook: impl Fn() + Send + Sync + 'static) {
        self.hooks.lock().insert(mechanism.to_string(), Box::new(hook));
    }

    pub fn runs(&self) -> Vec<String> {
        self.runs.lock().clone()
    }

    pub fn seen_hints(&self) -> Vec<AuthItems> {
        self.seen_hints.lock().clone()
    }

    pub fn seen_context(&self) -> Vec<AuthItems> {
        self.seen_context.lock().clone()
    }

    pub fn deactivated(&self) -> Vec<String> {
        self.deactivated.lock().clone()
    }

    fn flag(&self, mechanism: &str) -> Arc<AtomicBool> {
        self.interrupts
            .lock()
            .entry(mechanism.to_string())
            .or_insert_with(|| Arc::new(AtomicBool::new(false)))
            .clone()
    }

    fn answer(&self, mechanism: &str) -> AgentResponse {
        if let Some(response) = self
            .queued
            .lock()
            .get_mut(mechanism)
            .and_then(VecDeque::pop_front)
        {
            return response;
        }
        self.fallback
            .lock()
            .get(mechanism)
            .cloned()
            .unwrap_or_else(|| AgentResponse::new(AgentResult::Allow))
    }
}

struct ScriptedAgent {
    name: String,
    script: Arc<AgentScript>,
    interrupt: Arc<AtomicBool>,
}

impl MechanismAgent for ScriptedAgent {
    fn run(
        &mut self,
        hints: &AuthItems,
        context: &AuthItems,
        immutable_hints: &AuthItems,
    ) -> AgentResponse {
        let mut all_hints = hints.clone();
        all_hints.merge(immutable_hints);
        self.script.runs.lock().push(self.name.clone());
        self.script.seen_hints.lock().push(all_hints);
        self.script.seen_context.lock().push(context.clone());

        let response = self.script.answer(&self.name);

        let raised: Vec<String> = {
            let mut pending = self.script.raise_after.lock();
            let (fire, keep): (Vec<_>, Vec<_>) =
                pending.drain(..).partition(|(after, _)| *after == self.name);
            *pending = keep;
            fire.into_iter().map(|(_, raise)| raise).collect()
        };
        for target in raised {
            self.script.flag(&target).store(true, Ordering::SeqCst);
        }
        if let Some(hook) = self.script.hooks.lock().get(&self.name) {
            hook();
        }
        response
    }

    fn interrupt_signal(&self) -> bool {
        self.interrupt.load(Ordering::SeqCst)
    }

    fn clear_interrupt(&mut self) {
        self.interrupt.store(false, Ordering::SeqCst);
    }

    fn deactivate(&mut self) {
        self.script.deactivated.lock().push(self.name.clone());
    }
}

pub struct ScriptedAgents(pub Arc<AgentScript>);

impl AgentFactory for ScriptedAgents {
    fn create(
        &self,
        mechanism: &Mechanism,
        _session: &Session,
    ) -> EngineResult<Box<dyn MechanismAgent>> {
        let name = mechanism.to_string();
        Ok(Box::new(ScriptedAgent {
            interrupt: self.0.flag(&name),
            name,
            script: Arc::clone(&self.0),
        }))
    }
}

#[derive(Default)]
pub struct Admission {
    refused: Mutex<HashSet<String>>,
}

impl Admission {
    pub fn refuse(&self, right: &str) {
        self.refused.lock().insert(right.to_string());
    }
}

impl AdmissionOracle for Admission {
    fn sandbox_allows(&self, _pid: Pid, right: &str) -> bool {
        !self.refused.lock().contains(right)
    }
}

#[derive(Default)]
pub struct Power {
    dark: AtomicBool,
}

impl Power {
    pub fn set_dark_wake(&self, dark: bool) {
        self.dark.store(dark, Ordering::SeqCst);
    }
}

impl PowerState for Power {
    fn is_dark_wake(&self) -> bool {
        self.dark.load(Ordering::SeqCst)
    }
}

pub fn allow() -> AgentResponse {
    AgentResponse::new(AgentResult::Allow)
}

pub fn deny() -> AgentResponse {
    AgentResponse::new(AgentResult::Deny)
}

pub fn cancel() -> AgentResponse {
    AgentResponse::new(AgentResult::UserCanceled)
}

/// Allow and report `uid` as the authenticated user.
pub fn login(uid: u32) -> AgentResponse {
    let mut response = allow();
    response.context.set(keys::UID, uid);
    response
}

pub fn with_context(
    mut response: AgentResponse,
    key: &str,
    value: &str,
    visibility: Visibility,
) -> AgentResponse {
    response.context.set_with(key, value, visibility);
    response
}

pub struct Harness {
    pub store: Arc<MemoryRuleStore>,
    pub directory: Arc<StaticDirectory>,
    pub groups: Arc<StaticGroups>,
    pub script: Arc<AgentScript>,
    pub audit: Arc<AuditLog>,
    pub clock: Arc<FixedClock>,
    pub power: Arc<Power>,
    pub admission: Arc<Admission>,
    pub engine: Engine,
    next_pid: Mutex<Pid>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        let store = Arc::new(MemoryRuleStore::new());
        let directory = Arc::new(StaticDirectory::with_accounts([
            Account::new(ROOT, "root"),
            Account::new(ALICE, "alice"),
            Account::new(BOB, "bob"),
            Account::new(MALLORY, "mallory").locked(),
        ]));
        let groups = Arc::new(StaticGroups::new());
        groups.add_member("admin", ALICE);
        let script = Arc::new(AgentScript::default());
        let audit = Arc::new(AuditLog::new());
        let clock = Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap(),
        ));
        let power = Arc::new(Power::default());
        let admission = Arc::new(Admission::default());

        let engine = Engine::new(
            store.clone(),
            Collaborators {
                directory: directory.clone(),
                groups: groups.clone(),
                agents: Arc::new(ScriptedAgents(script.clone())),
                admission: admission.clone(),
                power: power.clone(),
                audit: audit.clone(),
                clock: clock.clone(),
            },
            config,
        );
        Self {
            store,
            directory,
            groups,
            script,
            audit,
            clock,
            power,
            admission,
            engine,
            next_pid: Mutex::new(100),
        }
    }

    pub fn commit(&self, rule: Rule) {
        self.store.commit_rule(&rule, self.clock_now(), None).unwrap();
    }

    pub fn import(&self, doc: Value) {
        import_policy(
            self.store.as_ref(),
            &doc,
            ImportMode::Overwrite,
            self.clock_now(),
            None,
        )
        .unwrap();
    }

    pub fn clock_now(&self) -> chrono::DateTime<Utc> {
        use authd_types::Clock;
        self.clock.now()
    }

    /// Interactive session owned by `owner`.
    pub fn session(&self, owner: u32) -> Arc<Session> {
        Arc::new(Session::new(
            1,
            Uid(owner),
            SessionAttributes::HAS_GRAPHIC_ACCESS,
        ))
    }

    pub fn process(&self, uid: u32, session: &Arc<Session>) -> Process {
        let pid = {
            let mut next = self.next_pid.lock();
            *next += 1;
            *next
        };
        let credential = Credential::for_uid(Uid(uid), self.directory.as_ref(), self.clock_now());
        Process::new(pid, Uid(uid), Arc::clone(session), credential)
    }

    pub fn token(&self, uid: u32, session: &Arc<Session>) -> Arc<AuthToken> {
        Arc::new(AuthToken::new(Arc::new(self.process(uid, session)), false))
    }

    pub fn token_for(&self, process: Process, least_privileged: bool) -> Arc<AuthToken> {
        Arc::new(AuthToken::new(Arc::new(process), least_privileged))
    }

    pub fn authorize(&self, token: &AuthToken, right: &str, flags: AuthFlags) -> Authorization {
        self.engine
            .authorize(token, &AuthorizationRequest::new([right]).with_flags(flags))
    }
}

pub fn interactive() -> AuthFlags {
    AuthFlags::EXTEND_RIGHTS | AuthFlags::INTERACTION_ALLOWED
}

pub fn right(name: &str, class: RuleClass) -> Rule {
    Rule::new(name, RuleKind::Right, class)
}

pub fn group_rule(name: &str, class: RuleClass) -> Rule {
    Rule::new(name, RuleKind::Rule, class)
}

pub fn mechanisms(names: &[&str], tries: u32) -> RuleClass {
    RuleClass::Mechanism(MechanismPolicy {
        tries,
        mechanisms: names.iter().map(|n| Mechanism::parse(n).unwrap()).collect(),
    })
}

/// Delegation over stored rules, by name.
pub fn delegation(store: &dyn RuleStore, delegates: &[&str], k_of_n: Option<u32>) -> RuleClass {
    RuleClass::Rule(DelegationPolicy {
        k_of_n,
        delegates: delegates
            .iter()
            .map(|name| {
                let row = store.get_rule(name).unwrap().unwrap();
                DelegateRef::new(row.id, row.name)
            })
            .collect(),
    })
}
