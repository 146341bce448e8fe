//! Policy document commands

use crate::open_service;
use anyhow::Context;
use authd_credential::{StaticDirectory, StaticGroups};
use authd_engine::AuditLog;
use authd_rules::{candidate_names, parse_policy, ImportMode, RuleStore};
use authd_service::{headless, AuthorizationService, ServiceConfig};
use serde_json::json;
use std::path::Path;
use std::sync::Arc;

/// Service with no accounts; enough for policy inspection.
pub fn open(config: &ServiceConfig) -> anyhow::Result<AuthorizationService> {
    let env = headless(
        Arc::new(StaticDirectory::new()),
        Arc::new(StaticGroups::new()),
        Arc::new(AuditLog::new()),
    );
    open_service(config, env)
}

pub fn import(service: &AuthorizationService, file: &Path, overwrite: bool) -> anyhow::Result<()> {
    let text = std::fs::read_to_string(file)
        .with_context(|| format!("reading {}", file.display()))?;
    let doc = parse_policy(&text)?;
    let mode = if overwrite {
        ImportMode::Overwrite
    } else {
        ImportMode::VersionChecked
    };
    let report = service.import(&doc, mode)?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

pub fn export(service: &AuthorizationService, output: Option<&Path>) -> anyhow::Result<()> {
    let text = serde_json::to_string_pretty(&service.export()?)?;
    match output {
        Some(path) => std::fs::write(path, text + "\n")
            .with_context(|| format!("writing {}", path.display()))?,
        None => println!("{text}"),
    }
    Ok(())
}

pub fn show(service: &AuthorizationService, right: &str) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(&service.right_get(right)?)?);
    Ok(())
}

/// Walk the candidate names the way evaluation does and report the hit.
pub fn resolve(service: &AuthorizationService, right: &str) -> anyhow::Result<()> {
    let store = service.engine().store();
    let mut tried = Vec::new();
    let mut governing = None;
    for candidate in candidate_names(right) {
        tried.push(candidate.clone());
        if let Some(row) = store.get_rule(&candidate)? {
            if row.kind == authd_rules::RuleKind::Right.code() {
                governing = Some(candidate);
                break;
            }
        }
    }
    let report = json!({
        "right": right,
        "tried": tried,
        "builtin_default": governing.is_none(),
        "governed_by": governing,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
