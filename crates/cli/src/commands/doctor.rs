use serde::Serialize;
use signoff_core::config::{AppConfig, LoadOptions};
use signoff_db::{connect_with_settings, migrations};

use crate::commands::CommandResult;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: CheckStatus,
    details: String,
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

pub fn run(json_output: bool) -> CommandResult {
    let report = build_report();
    let exit_code = if report.overall_status == CheckStatus::Pass { 0 } else { 1 };

    let output = if json_output {
        serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        })
    } else {
        render_human(&report)
    };

    CommandResult { exit_code, output }
}

fn build_report() -> DoctorReport {
    let mut checks = Vec::new();

    match AppConfig::load(LoadOptions::default()) {
        Ok(config) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Pass,
                details: "configuration loaded and validated".to_string(),
            });
            checks.push(check_notification_delivery(&config));
            checks.push(check_roles(&config));
            checks.extend(check_database(&config));
        }
        Err(error) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Fail,
                details: error.to_string(),
            });
            for name in
                ["notification_delivery", "role_directory", "database_connectivity", "migrations"]
            {
                checks.push(DoctorCheck {
                    name,
                    status: CheckStatus::Skipped,
                    details: "skipped because configuration did not load".to_string(),
                });
            }
        }
    }

    let all_pass = checks.iter().all(|check| check.status == CheckStatus::Pass);
    let overall_status = if all_pass { CheckStatus::Pass } else { CheckStatus::Fail };
    let summary = if all_pass {
        "doctor: all readiness checks passed".to_string()
    } else {
        "doctor: one or more readiness checks failed".to_string()
    };

    DoctorReport { overall_status, summary, checks }
}

fn check_notification_delivery(config: &AppConfig) -> DoctorCheck {
    let details = match (&config.notifications.webhook_url, &config.notifications.signing_secret)
    {
        (Some(url), Some(_)) => format!("signed webhook delivery to `{url}`"),
        (Some(url), None) => format!("unsigned webhook delivery to `{url}`"),
        (None, _) => "no webhook configured; notifications are stored and logged only".to_string(),
    };
    DoctorCheck { name: "notification_delivery", status: CheckStatus::Pass, details }
}

fn check_roles(config: &AppConfig) -> DoctorCheck {
    let empty: Vec<&str> = config
        .roles
        .iter()
        .filter(|(_, members)| members.is_empty())
        .map(|(role, _)| role.as_str())
        .collect();

    let details = if config.roles.is_empty() {
        "no roles configured; only email-addressed steps can be approved".to_string()
    } else if empty.is_empty() {
        format!("{} role(s) configured", config.roles.len())
    } else {
        format!("roles without members: {}", empty.join(", "))
    };
    DoctorCheck { name: "role_directory", status: CheckStatus::Pass, details }
}

fn check_database(config: &AppConfig) -> Vec<DoctorCheck> {
    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return vec![
                DoctorCheck {
                    name: "database_connectivity",
                    status: CheckStatus::Fail,
                    details: format!("failed to initialize async runtime: {error}"),
                },
                skipped_migrations(),
            ];
        }
    };

    runtime.block_on(async {
        let pool = match connect_with_settings(
            &config.database.url,
            config.database.max_connections,
            config.database.timeout_secs,
        )
        .await
        {
            Ok(pool) => pool,
            Err(error) => {
                return vec![
                    DoctorCheck {
                        name: "database_connectivity",
                        status: CheckStatus::Fail,
                        details: format!("failed to connect to database: {error}"),
                    },
                    skipped_migrations(),
                ];
            }
        };

        let connectivity = DoctorCheck {
            name: "database_connectivity",
            status: CheckStatus::Pass,
            details: format!("connected using `{}`", config.database.url),
        };

        let known = migrations::MIGRATOR
            .iter()
            .filter(|migration| !migration.migration_type.is_down_migration())
            .count();
        let migrations = match migrations::applied_versions(&pool).await {
            Ok(applied) if applied.len() >= known => DoctorCheck {
                name: "migrations",
                status: CheckStatus::Pass,
                details: format!("{} of {known} migration(s) applied", applied.len()),
            },
            Ok(applied) => DoctorCheck {
                name: "migrations",
                status: CheckStatus::Fail,
                details: format!(
                    "{} of {known} migration(s) applied; run `signoff migrate`",
                    applied.len()
                ),
            },
            Err(_) => DoctorCheck {
                name: "migrations",
                status: CheckStatus::Fail,
                details: "migration history not found; run `signoff migrate`".to_string(),
            },
        };

        pool.close().await;
        vec![connectivity, migrations]
    })
}

fn skipped_migrations() -> DoctorCheck {
    DoctorCheck {
        name: "migrations",
        status: CheckStatus::Skipped,
        details: "skipped because the database is unreachable".to_string(),
    }
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = Vec::new();
    lines.push(report.summary.clone());

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skip",
        };
        lines.push(format!("- [{marker}] {}: {}", check.name, check.details));
    }

    lines.join("\n")
}

fn escape_json(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}
