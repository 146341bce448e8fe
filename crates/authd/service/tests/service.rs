use authd_credential::{Account, StaticDirectory, StaticGroups};
use authd_engine::{
    AgentFactory, AgentResponse, AgentResult, AllowAllAdmission, AuditLog, AuthorizationRequest,
    Collaborators, EngineResult, FullWake, MechanismAgent, Session,
};
use authd_rules::Mechanism;
use authd_service::{
    headless, AuthorizationService, ClientInfo, ServiceConfig, ServiceError, SessionInfo,
};
use authd_types::items::keys;
use authd_types::{AuthFlags, AuthItems, Outcome, SessionAttributes, SystemClock, Uid};
use parking_lot::Mutex;
use serde_json::json;
use std::io::Write;
use std::sync::Arc;

const ALICE: u32 = 501;
const BOB: u32 = 502;

/// Every mechanism passes and reports the configured user.
struct LoginAs {
    uid: u32,
    prompts: Arc<Mutex<usize>>,
}

struct LoginAgent {
    uid: u32,
    prompts: Arc<Mutex<usize>>,
}

impl MechanismAgent for LoginAgent {
    fn run(&mut self, _: &AuthItems, _: &AuthItems, _: &AuthItems) -> AgentResponse {
        *self.prompts.lock() += 1;
        let mut response = AgentResponse::new(AgentResult::Allow);
        response.context.set(keys::UID, self.uid);
        response
    }

    fn interrupt_signal(&self) -> bool {
        false
    }

    fn clear_interrupt(&mut self) {}

    fn deactivate(&mut self) {}
}

impl AgentFactory for LoginAs {
    fn create(&self, _: &Mechanism, _: &Session) -> EngineResult<Box<dyn MechanismAgent>> {
        Ok(Box::new(LoginAgent {
            uid: self.uid,
            prompts: Arc::clone(&self.prompts),
        }))
    }
}

fn directory() -> (Arc<StaticDirectory>, Arc<StaticGroups>) {
    let directory = Arc::new(StaticDirectory::with_accounts([
        Account::new(0u32, "root"),
        Account::new(ALICE, "alice"),
        Account::new(BOB, "bob"),
    ]));
    let groups = Arc::new(StaticGroups::new());
    groups.add_member("admin", ALICE);
    (directory, groups)
}

fn service_with(config: &ServiceConfig) -> (AuthorizationService, Arc<Mutex<usize>>) {
    let (directory, groups) = directory();
    let prompts = Arc::new(Mutex::new(0));
    let env = Collaborators {
        directory,
        groups,
        agents: Arc::new(LoginAs {
            uid: ALICE,
            prompts: Arc::clone(&prompts),
        }),
        admission: Arc::new(AllowAllAdmission),
        power: Arc::new(FullWake),
        audit: Arc::new(AuditLog::new()),
        clock: Arc::new(SystemClock),
    };
    (AuthorizationService::new(config, env).unwrap(), prompts)
}

fn console(owner: u32) -> SessionInfo {
    SessionInfo {
        id: 100,
        owner_uid: Uid(owner),
        attributes: SessionAttributes::HAS_GRAPHIC_ACCESS,
    }
}

fn request(right: &str, flags: AuthFlags) -> AuthorizationRequest {
    AuthorizationRequest::new([right]).with_flags(flags)
}

fn interactive() -> AuthFlags {
    AuthFlags::EXTEND_RIGHTS | AuthFlags::INTERACTION_ALLOWED
}

#[tokio::test]
async fn bundled_policy_is_imported_once() {
    let (service, _) = service_with(&ServiceConfig::default());

    let preferences = service.right_get("system.preferences").unwrap();
    assert_eq!(preferences["class"], "user");
    assert_eq!(preferences["group"], "admin");
    let exported = service.export().unwrap();
    assert!(exported["rules"].get("authenticate").is_some());
    assert!(exported["rights"].get("config.").is_some());

    assert!(service.bootstrap(None).unwrap().is_none());
}

#[tokio::test]
async fn configured_policy_replaces_the_bundled_one() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        "{}",
        json!({"rights": {"com.example.custom": {"class": "allow", "version": 1}}})
    )
    .unwrap();
    let config = ServiceConfig {
        policy_path: Some(file.path().to_path_buf()),
        ..ServiceConfig::default()
    };

    let (service, _) = service_with(&config);

    let exported = service.export().unwrap();
    assert_eq!(exported["rights"]["com.example.custom"]["class"], "allow");
    assert!(exported["rights"].get("system.preferences").is_none());
}

#[tokio::test]
async fn import_can_be_disabled() {
    let config = ServiceConfig {
        import_on_start: false,
        ..ServiceConfig::default()
    };
    let (service, _) = service_with(&config);

    let exported = service.export().unwrap();
    assert!(exported["rights"].as_object().map_or(true, |m| m.is_empty()));
}

#[tokio::test]
async fn root_may_change_policy_without_prompting() {
    let (service, prompts) = service_with(&ServiceConfig::default());
    let root = service.create_authorization(&ClientInfo::new(10, 0u32, console(ALICE)), false);
    let bob = service.create_authorization(&ClientInfo::new(11, BOB, console(ALICE)), false);

    let denied = service
        .set_right(bob.id(), "com.example.tool", json!({"class": "allow"}), AuthFlags::empty())
        .await
        .unwrap();
    assert_eq!(denied, Outcome::Denied);

    let stored = service
        .set_right(root.id(), "com.example.tool", json!({"class": "allow"}), AuthFlags::empty())
        .await
        .unwrap();
    assert_eq!(stored, Outcome::Success);
    assert_eq!(service.right_get("com.example.tool").unwrap()["class"], "allow");

    let removed = service
        .remove_right(root.id(), "com.example.tool", AuthFlags::empty())
        .await
        .unwrap();
    assert_eq!(removed, Outcome::Success);
    assert_eq!(*prompts.lock(), 0);
}

#[tokio::test]
async fn authentication_is_shared_across_the_session() {
    let (service, prompts) = service_with(&ServiceConfig::default());
    let first = service.create_authorization(&ClientInfo::new(20, ALICE, console(ALICE)), false);
    let second = service.create_authorization(&ClientInfo::new(21, BOB, console(ALICE)), false);

    let granted = service
        .copy_rights(first.id(), request("system.preferences", interactive()))
        .await
        .unwrap();
    assert_eq!(granted.outcome, Outcome::Success);
    assert!(*prompts.lock() > 0);

    let reused = service
        .copy_rights(second.id(), request("system.preferences", AuthFlags::empty()))
        .await
        .unwrap();
    assert_eq!(reused.outcome, Outcome::Success);

    service.destroy(first.id()).unwrap();

    let after_logout = service
        .copy_rights(second.id(), request("system.preferences", AuthFlags::empty()))
        .await
        .unwrap();
    assert_eq!(after_logout.outcome, Outcome::Denied);
}

#[tokio::test]
async fn registries_share_and_evict_entries() {
    let (service, _) = service_with(&ServiceConfig::default());
    let client = ClientInfo::new(30, BOB, console(BOB));

    let a = service.create_authorization(&client, false);
    let b = service.create_authorization(&client, true);
    assert!(Arc::ptr_eq(a.process(), b.process()));
    assert!(b.is_least_privileged());
    assert_eq!(service.session_count(), 1);
    assert_eq!(service.process_count(), 1);
    assert_eq!(service.authorization_count(), 2);

    let (a_id, b_id) = (a.id(), b.id());
    drop((a, b));
    service.release(a_id, AuthFlags::empty()).unwrap();
    assert_eq!(service.process_count(), 1);
    service.release(b_id, AuthFlags::empty()).unwrap();

    assert_eq!(service.authorization_count(), 0);
    assert_eq!(service.process_count(), 0);
    assert_eq!(service.session_count(), 0);
    assert!(service.session(100).is_none());
}

#[tokio::test]
async fn reused_pids_get_a_fresh_process() {
    let (service, _) = service_with(&ServiceConfig::default());
    let first = service.create_authorization(&ClientInfo::new(40, BOB, console(BOB)), false);
    let second = service.create_authorization(&ClientInfo::new(40, ALICE, console(BOB)), false);

    assert!(!Arc::ptr_eq(first.process(), second.process()));
    assert_eq!(second.process().uid(), Uid(ALICE));
}

#[tokio::test]
async fn unknown_authorizations_are_rejected() {
    let (service, _) = service_with(&ServiceConfig::default());
    let id = uuid::Uuid::new_v4();

    let err = service
        .copy_rights(id, request("system.preferences", AuthFlags::empty()))
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::UnknownAuthorization(missing) if missing == id));
    assert!(service.destroy(id).is_err());
}

#[tokio::test]
async fn headless_hosts_cannot_prompt() {
    let (directory, groups) = directory();
    let service = AuthorizationService::new(
        &ServiceConfig::default(),
        headless(directory, groups, Arc::new(AuditLog::new())),
    )
    .unwrap();
    let token = service.create_authorization(&ClientInfo::new(50, BOB, console(BOB)), false);

    let result = service
        .copy_rights(token.id(), request("system.preferences", interactive()))
        .await
        .unwrap();

    assert_eq!(result.outcome, Outcome::Internal);
}
