use std::env;
use std::fs;
use std::path::Path;

use secrecy::ExposeSecret;
use signoff_core::config::{resolve_config_path, AppConfig, LoadOptions};
use toml::Value;

/// One reported field: its dotted path, the env vars that can override it
/// (first match wins), and the rendered value.
struct Field {
    key_path: &'static str,
    env_keys: &'static [&'static str],
    value: String,
}

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = resolve_config_path(None);
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for field in fields(&config) {
        let source = field_source(
            field.key_path,
            field.env_keys,
            config_file_doc.as_ref(),
            config_file_path.as_deref(),
        );
        lines.push(render_line(field.key_path, &field.value, source));
    }

    lines.join("\n")
}

fn fields(config: &AppConfig) -> Vec<Field> {
    let roles = if config.roles.is_empty() {
        "<none>".to_string()
    } else {
        config
            .roles
            .iter()
            .map(|(role, members)| format!("{role}({})", members.len()))
            .collect::<Vec<_>>()
            .join(", ")
    };

    vec![
        Field {
            key_path: "database.url",
            env_keys: &["SIGNOFF_DATABASE_URL"],
            value: config.database.url.clone(),
        },
        Field {
            key_path: "database.max_connections",
            env_keys: &["SIGNOFF_DATABASE_MAX_CONNECTIONS"],
            value: config.database.max_connections.to_string(),
        },
        Field {
            key_path: "database.timeout_secs",
            env_keys: &["SIGNOFF_DATABASE_TIMEOUT_SECS"],
            value: config.database.timeout_secs.to_string(),
        },
        Field {
            key_path: "server.bind_address",
            env_keys: &["SIGNOFF_SERVER_BIND_ADDRESS"],
            value: config.server.bind_address.clone(),
        },
        Field {
            key_path: "server.port",
            env_keys: &["SIGNOFF_SERVER_PORT"],
            value: config.server.port.to_string(),
        },
        Field {
            key_path: "server.graceful_shutdown_secs",
            env_keys: &["SIGNOFF_SERVER_GRACEFUL_SHUTDOWN_SECS"],
            value: config.server.graceful_shutdown_secs.to_string(),
        },
        Field {
            key_path: "logging.level",
            env_keys: &["SIGNOFF_LOGGING_LEVEL", "SIGNOFF_LOG_LEVEL"],
            value: config.logging.level.clone(),
        },
        Field {
            key_path: "logging.format",
            env_keys: &["SIGNOFF_LOGGING_FORMAT", "SIGNOFF_LOG_FORMAT"],
            value: format!("{:?}", config.logging.format),
        },
        Field {
            key_path: "notifications.webhook_url",
            env_keys: &["SIGNOFF_NOTIFICATIONS_WEBHOOK_URL"],
            value: config.notifications.webhook_url.clone().unwrap_or_else(|| "<unset>".to_string()),
        },
        Field {
            key_path: "notifications.signing_secret",
            env_keys: &["SIGNOFF_NOTIFICATIONS_SIGNING_SECRET"],
            value: config
                .notifications
                .signing_secret
                .as_ref()
                .map(|secret| redact_secret(secret.expose_secret()))
                .unwrap_or_else(|| "<unset>".to_string()),
        },
        Field {
            key_path: "notifications.timeout_secs",
            env_keys: &["SIGNOFF_NOTIFICATIONS_TIMEOUT_SECS"],
            value: config.notifications.timeout_secs.to_string(),
        },
        Field { key_path: "roles", env_keys: &[], value: roles },
    ]
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_keys: &[&str],
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_keys.iter().find(|key| env::var_os(**key).is_some()) {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}

fn redact_secret(secret: &str) -> String {
    if secret.trim().is_empty() {
        return "<empty>".to_string();
    }
    format!("<redacted, {} chars>", secret.chars().count())
}

#[cfg(test)]
mod tests {
    use toml::Value;

    use super::{contains_path, redact_secret};

    #[test]
    fn secrets_are_never_rendered() {
        let rendered = redact_secret("whsec-very-private");
        assert!(!rendered.contains("private"));
        assert_eq!(rendered, "<redacted, 18 chars>");
        assert_eq!(redact_secret("  "), "<empty>");
    }

    #[test]
    fn nested_keys_are_found_in_the_config_file() {
        let doc: Value = "[notifications]\nwebhook_url = \"https://hooks.example.com\"\n\n[roles]\nfinance = [\"a@x.com\"]\n"
            .parse()
            .expect("toml");
        assert!(contains_path(&doc, "notifications.webhook_url"));
        assert!(contains_path(&doc, "roles"));
        assert!(!contains_path(&doc, "notifications.signing_secret"));
    }
}
