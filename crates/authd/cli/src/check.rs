//! Non-interactive evaluation

use crate::open_service;
use authd_credential::{Account, StaticDirectory, StaticGroups};
use authd_engine::{AuditLog, AuthorizationRequest};
use authd_service::{headless, ClientInfo, ServiceConfig, SessionInfo};
use authd_types::{AuthFlags, SessionAttributes, Uid};
use clap::Args;
use serde_json::json;
use std::sync::Arc;
use tracing::debug;

#[derive(Args)]
pub struct CheckArgs {
    /// Rights to evaluate
    #[arg(required = true)]
    rights: Vec<String>,

    /// Caller uid
    #[arg(short, long, default_value_t = 501)]
    uid: u32,

    /// Session owner uid (defaults to the caller)
    #[arg(long)]
    owner: Option<u32>,

    /// Users in the admin group
    #[arg(long = "admin", value_name = "UID")]
    admins: Vec<u32>,

    /// Grant whatever subset of the rights succeeds
    #[arg(long)]
    partial: bool,

    /// Print the audit trail
    #[arg(long)]
    audit: bool,
}

pub async fn execute(config: &ServiceConfig, args: CheckArgs) -> anyhow::Result<()> {
    let owner = args.owner.unwrap_or(args.uid);

    let directory = Arc::new(StaticDirectory::new());
    let groups = Arc::new(StaticGroups::new());
    let mut uids = vec![args.uid, owner];
    uids.extend(&args.admins);
    for uid in uids {
        let name = if Uid(uid).is_root() {
            "root".to_string()
        } else {
            format!("user{uid}")
        };
        directory.insert(Account::new(uid, name));
    }
    for uid in &args.admins {
        groups.add_member("admin", *uid);
    }

    let audit = Arc::new(AuditLog::new());
    let service = open_service(config, headless(directory, groups, audit.clone()))?;
    let session = SessionInfo {
        id: 1,
        owner_uid: Uid(owner),
        attributes: SessionAttributes::empty(),
    };
    let token = service.create_authorization(
        &ClientInfo::new(std::process::id() as i32, args.uid, session),
        false,
    );

    let mut flags = AuthFlags::empty();
    if args.partial {
        flags |= AuthFlags::PARTIAL_RIGHTS;
    }
    let request = AuthorizationRequest::new(args.rights.iter().cloned()).with_flags(flags);
    let result = service.copy_rights(token.id(), request).await?;
    debug!(uid = args.uid, owner, outcome = ?result.outcome, "check finished");

    let mut report = json!({
        "rights": args.rights,
        "uid": args.uid,
        "owner": owner,
        "outcome": result.outcome,
        "granted": result.granted,
    });
    if args.audit {
        report["audit"] = serde_json::to_value(audit.events())?;
    }
    println!("{}", serde_json::to_string_pretty(&report)?);

    if !result.outcome.is_success() {
        std::process::exit(1);
    }
    Ok(())
}
