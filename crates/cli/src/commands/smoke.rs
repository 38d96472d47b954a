use std::sync::Arc;
use std::time::Instant;

use crate::commands::CommandResult;
use crate::commands::seed::demo_chain_draft;
use serde::Serialize;
use signoff_core::audit::{AuditContext, InMemoryAuditSink};
use signoff_core::config::{AppConfig, LoadOptions};
use signoff_core::domain::action::ActionKind;
use signoff_core::domain::request::{NewApprovalRequest, RequestStatus};
use signoff_core::workflow::{ActionSubmission, InMemoryRoleDirectory};
use signoff_db::{connect_with_settings, migrations, DbPool};
use signoff_engine::{NotificationOutbox, WorkflowApi};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum SmokeStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct SmokeCheck {
    name: &'static str,
    status: SmokeStatus,
    elapsed_ms: u64,
    message: String,
}

#[derive(Debug, Serialize)]
struct SmokeReport {
    command: &'static str,
    status: SmokeStatus,
    summary: String,
    total_elapsed_ms: u64,
    checks: Vec<SmokeCheck>,
}

const AFTER_CONNECT: [&str; 2] = ["migration_visibility", "approval_scenario"];

pub fn run() -> CommandResult {
    let started = Instant::now();
    let mut checks = Vec::new();

    let config = match timed_check(|| AppConfig::load(LoadOptions::default())) {
        Ok((elapsed_ms, config)) => {
            checks.push(pass("config_validation", elapsed_ms, "configuration loaded and validated"));
            config
        }
        Err((elapsed_ms, error)) => {
            checks.push(fail("config_validation", elapsed_ms, error.to_string()));
            checks.push(skipped("db_connectivity"));
            checks.extend(AFTER_CONNECT.into_iter().map(skipped));
            return finalize_report(checks, elapsed_since(started));
        }
    };

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            checks.push(fail(
                "db_connectivity",
                0,
                format!("failed to initialize async runtime: {error}"),
            ));
            checks.extend(AFTER_CONNECT.into_iter().map(skipped));
            return finalize_report(checks, elapsed_since(started));
        }
    };

    let db_started = Instant::now();
    let db_result = runtime.block_on(async {
        connect_with_settings(
            &config.database.url,
            config.database.max_connections,
            config.database.timeout_secs,
        )
        .await
    });

    let pool = match db_result {
        Ok(pool) => {
            checks.push(pass(
                "db_connectivity",
                elapsed_since(db_started),
                format!("connected using `{}`", config.database.url),
            ));
            pool
        }
        Err(error) => {
            checks.push(fail(
                "db_connectivity",
                elapsed_since(db_started),
                format!("failed to connect: {error}"),
            ));
            checks.extend(AFTER_CONNECT.into_iter().map(skipped));
            return finalize_report(checks, elapsed_since(started));
        }
    };

    let migration_started = Instant::now();
    let migration_result = runtime.block_on(async { migrations::run_pending(&pool).await });
    runtime.block_on(async {
        pool.close().await;
    });

    match migration_result {
        Ok(()) => checks.push(pass(
            "migration_visibility",
            elapsed_since(migration_started),
            "migrations are visible and executable",
        )),
        Err(error) => {
            checks.push(fail(
                "migration_visibility",
                elapsed_since(migration_started),
                format!("migration execution failed: {error}"),
            ));
            checks.push(skipped("approval_scenario"));
            return finalize_report(checks, elapsed_since(started));
        }
    }

    // The scenario runs against a scratch in-memory database so the configured
    // one never receives smoke records.
    let scenario_started = Instant::now();
    match runtime.block_on(approval_scenario()) {
        Ok(message) => {
            checks.push(pass("approval_scenario", elapsed_since(scenario_started), message))
        }
        Err(message) => {
            checks.push(fail("approval_scenario", elapsed_since(scenario_started), message))
        }
    }

    finalize_report(checks, elapsed_since(started))
}

/// Create, approve at step 1, reject at step 2, then verify the final state
/// and the requester's rejection notification.
async fn approval_scenario() -> Result<String, String> {
    let pool = connect_with_settings("sqlite::memory:", 1, 5)
        .await
        .map_err(|error| format!("scratch database unavailable: {error}"))?;
    let outcome = run_scenario(&pool).await;
    pool.close().await;
    outcome
}

async fn run_scenario(pool: &DbPool) -> Result<String, String> {
    migrations::run_pending(pool).await.map_err(|error| error.to_string())?;
    let audit = InMemoryAuditSink::default();
    let api = WorkflowApi::sqlite(
        pool.clone(),
        Arc::new(InMemoryRoleDirectory::default()),
        Arc::new(audit.clone()),
        NotificationOutbox::disabled(),
    );

    let requester = "controller@x.com";
    let context = AuditContext::new(None, "smoke", requester);
    let chain =
        api.create_chain(demo_chain_draft(), &context).await.map_err(|error| error.to_string())?;
    let request = api
        .create_request(
            NewApprovalRequest {
                chain_id: chain.id.clone(),
                document_type: chain.document_type.clone(),
                document_id: "SMOKE-1".to_string(),
                document_name: "Smoke budget".to_string(),
                requested_by: requester.to_string(),
            },
            &context,
        )
        .await
        .map_err(|error| error.to_string())?;

    for (step_order, approver, action, comments) in [
        (1, "cfo@x.com", ActionKind::Approve, None),
        (2, "ceo@x.com", ActionKind::Reject, Some("budget too high")),
    ] {
        api.submit_action(
            ActionSubmission {
                request_id: request.id.clone(),
                step_order,
                approver_email: approver.to_string(),
                action,
                comments: comments.map(str::to_string),
                delegated_to: None,
            },
            &AuditContext::new(Some(request.id.clone()), "smoke", approver),
        )
        .await
        .map_err(|error| format!("step {step_order} {}: {error}", action.as_str()))?;
    }

    let detail = api.get_request(&request.id).await.map_err(|error| error.to_string())?;
    if detail.request.status != RequestStatus::Rejected || detail.request.current_step != 2 {
        return Err(format!(
            "expected rejected at step 2, found {} at step {}",
            detail.request.status.as_str(),
            detail.request.current_step
        ));
    }

    let inbox = api.list_notifications(requester, false).await.map_err(|error| error.to_string())?;
    if !inbox.iter().any(|n| n.notification_type.as_str() == "rejected") {
        return Err("requester received no rejection notification".to_string());
    }

    Ok(format!(
        "two-step chain rejected at step 2 with {} actions and {} audit events",
        detail.actions.len(),
        audit.events().len()
    ))
}

fn timed_check<T, E>(check: impl FnOnce() -> Result<T, E>) -> Result<(u64, T), (u64, E)> {
    let started = Instant::now();
    match check() {
        Ok(value) => Ok((elapsed_since(started), value)),
        Err(error) => Err((elapsed_since(started), error)),
    }
}

fn elapsed_since(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

fn pass(name: &'static str, elapsed_ms: u64, message: impl Into<String>) -> SmokeCheck {
    SmokeCheck { name, status: SmokeStatus::Pass, elapsed_ms, message: message.into() }
}

fn fail(name: &'static str, elapsed_ms: u64, message: impl Into<String>) -> SmokeCheck {
    SmokeCheck { name, status: SmokeStatus::Fail, elapsed_ms, message: message.into() }
}

fn skipped(name: &'static str) -> SmokeCheck {
    SmokeCheck {
        name,
        status: SmokeStatus::Skipped,
        elapsed_ms: 0,
        message: "skipped due previous failure".to_string(),
    }
}

fn finalize_report(checks: Vec<SmokeCheck>, total_elapsed_ms: u64) -> CommandResult {
    let passed = checks.iter().filter(|check| check.status == SmokeStatus::Pass).count();
    let total = checks.len();
    let failed = checks.iter().any(|check| check.status == SmokeStatus::Fail);

    let report = SmokeReport {
        command: "smoke",
        status: if failed { SmokeStatus::Fail } else { SmokeStatus::Pass },
        summary: format!("smoke: {passed}/{total} checks passed in {total_elapsed_ms}ms"),
        total_elapsed_ms,
        checks,
    };

    let human = report.summary.clone();
    let machine = serde_json::to_string(&report).unwrap_or_else(|error| {
        format!(
            "{{\"command\":\"smoke\",\"status\":\"fail\",\"summary\":\"serialization failed\",\"error\":\"{}\"}}",
            error.to_string().replace('\\', "\\\\").replace('"', "\\\"")
        )
    });

    CommandResult { exit_code: if failed { 6 } else { 0 }, output: format!("{human}\n{machine}") }
}
