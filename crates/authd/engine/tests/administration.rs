mod common;

use authd_engine::{AuditKind, Modification};
use authd_rules::{HistoryOperation, Mechanism, RuleClass, RuleStore, UserPolicy};
use authd_types::{AuthFlags, CodeIdentity, Outcome, RuleFlags};
use common::*;
use serde_json::json;

/// `config.` guarded by an admin prompt, as the bundled policy does.
fn guard_config(h: &Harness) {
    h.commit(
        right(
            "config.",
            RuleClass::User(UserPolicy {
                group: Some("admin".into()),
                timeout: 300,
                tries: 3,
                mechanisms: vec![Mechanism::new("test", "login")],
            }),
        )
        .with_flags(RuleFlags::SHARED | RuleFlags::AUTHENTICATE_USER),
    );
}

#[test]
fn set_right_requires_the_add_meta_right() {
    let h = Harness::new();
    guard_config(&h);
    let session = h.session(BOB);
    let token = h.token(BOB, &session);

    let outcome = h
        .engine
        .set_right(&token, "system.new", &json!({"class": "allow"}), AuthFlags::empty())
        .unwrap();

    assert_eq!(outcome, Outcome::Denied);
    assert!(h.store.get_rule("system.new").unwrap().is_none());
    assert!(h
        .audit
        .events()
        .iter()
        .any(|e| e.kind == AuditKind::Administrative && e.outcome == Outcome::Denied));
}

#[test]
fn authorized_set_right_records_the_writer() {
    let h = Harness::new();
    guard_config(&h);
    h.script.push("test:login", login(ALICE));
    let session = h.session(ALICE);
    let process = h
        .process(ALICE, &session)
        .with_code(CodeIdentity::new("com.example.policy-tool"));
    let token = h.token_for(process, false);

    let outcome = h
        .engine
        .set_right(
            &token,
            "system.new",
            &json!({"class": "allow", "comment": "added by tool"}),
            interactive(),
        )
        .unwrap();

    assert_eq!(outcome, Outcome::Success);
    let row = h.store.get_rule("system.new").unwrap().unwrap();
    assert_eq!(row.identifier.as_deref(), Some("com.example.policy-tool"));
    let history = h.store.history("system.new").unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].operation, HistoryOperation::Add);
    assert_eq!(history[0].writer.as_deref(), Some("com.example.policy-tool"));

    let doc = h.engine.right_properties("system.new").unwrap();
    assert_eq!(doc["class"], "allow");
    assert_eq!(doc["comment"], "added by tool");
}

#[test]
fn modification_uses_the_modify_meta_right() {
    let h = Harness::new();
    h.commit(right("system.existing", RuleClass::Deny));
    h.commit(right("config.modify.", RuleClass::Allow));
    h.commit(right("config.add.", RuleClass::Deny));
    let session = h.session(BOB);
    let token = h.token(BOB, &session);

    let modified = h
        .engine
        .set_right(&token, "system.existing", &json!({"class": "allow"}), AuthFlags::empty())
        .unwrap();
    let added = h
        .engine
        .set_right(&token, "system.fresh", &json!({"class": "allow"}), AuthFlags::empty())
        .unwrap();

    assert_eq!(modified, Outcome::Success);
    assert_eq!(added, Outcome::Denied);
    assert_eq!(
        h.authorize(&token, "system.existing", AuthFlags::empty()).outcome,
        Outcome::Success
    );
}

#[test]
fn removing_an_unknown_right_is_denied_without_mutation() {
    let h = Harness::new();
    h.commit(right("config.", RuleClass::Allow));
    let session = h.session(BOB);
    let token = h.token(BOB, &session);

    let outcome = h
        .engine
        .remove_right(&token, "system.missing", AuthFlags::empty())
        .unwrap();

    assert_eq!(outcome, Outcome::Denied);
    assert!(h.store.history("system.missing").unwrap().is_empty());
}

#[test]
fn cached_admin_credential_authorizes_removal() {
    let h = Harness::new();
    guard_config(&h);
    h.script.push("test:login", login(ALICE));
    let session = h.session(ALICE);
    let token = h.token(ALICE, &session);
    h.engine
        .set_right(&token, "system.temp", &json!({"class": "deny"}), interactive())
        .unwrap();

    let outcome = h
        .engine
        .remove_right(&token, "system.temp", AuthFlags::empty())
        .unwrap();

    assert_eq!(outcome, Outcome::Success);
    assert!(h.store.get_rule("system.temp").unwrap().is_none());
    assert_eq!(h.script.runs().len(), 1);
    let operations: Vec<_> = h
        .store
        .history("system.temp")
        .unwrap()
        .into_iter()
        .map(|entry| entry.operation)
        .collect();
    assert_eq!(
        operations,
        vec![HistoryOperation::Add, HistoryOperation::Remove]
    );
}

#[test]
fn meta_rights_are_guarded_by_config_config() {
    let h = Harness::new();
    h.commit(right("config.", RuleClass::Allow));
    h.commit(right("config.config.", RuleClass::Deny));
    let session = h.session(BOB);
    let token = h.token(BOB, &session);

    assert_eq!(
        h.engine.verify_modification(
            &token,
            "config.add.system.",
            Modification::Modify,
            AuthFlags::empty()
        ),
        Outcome::Denied
    );
    assert_eq!(
        h.engine.verify_modification(
            &token,
            "system.plain",
            Modification::Modify,
            AuthFlags::empty()
        ),
        Outcome::Success
    );
}

#[test]
fn only_extend_and_interaction_flags_reach_the_meta_right() {
    let h = Harness::new();
    guard_config(&h);
    let session = h.session(ALICE);
    let token = h.token(ALICE, &session);

    // pre-authorize would otherwise succeed for a zero-timeout rule
    h.commit(
        right(
            "config.add.",
            RuleClass::User(UserPolicy {
                group: Some("admin".into()),
                timeout: 0,
                tries: 1,
                mechanisms: vec![Mechanism::new("test", "login")],
            }),
        ),
    );
    let outcome = h.engine.verify_modification(
        &token,
        "system.any",
        Modification::Add,
        AuthFlags::EXTEND_RIGHTS | AuthFlags::PRE_AUTHORIZE,
    );

    assert_eq!(outcome, Outcome::InteractionNotAllowed);
}

#[test]
fn malformed_documents_are_rejected_after_the_gate() {
    let h = Harness::new();
    h.commit(right("config.", RuleClass::Allow));
    let session = h.session(BOB);
    let token = h.token(BOB, &session);

    let result = h.engine.set_right(
        &token,
        "system.bad",
        &json!({"class": "rule", "rule": ["no-such-rule"]}),
        AuthFlags::empty(),
    );

    assert!(result.is_err());
    assert!(h.store.get_rule("system.bad").unwrap().is_none());
}
