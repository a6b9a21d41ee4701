use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::ExposeSecret;
use tabletalk_core::config::{AppConfig, LoadOptions, DEFAULT_CONFIG_FILE};
use toml::Value;

struct Sources {
    file_doc: Option<Value>,
    file_path: Option<PathBuf>,
}

impl Sources {
    fn line(&self, key_path: &str, value: &str, env_keys: &[&str]) -> String {
        render_line(
            key_path,
            value,
            field_source(key_path, env_keys, self.file_doc.as_ref(), self.file_path.as_deref()),
        )
    }
}

pub fn run(options: LoadOptions) -> String {
    let config_file_path = detect_config_path(options.config_path.as_deref());
    let config = match AppConfig::load(options) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let sources = Sources {
        file_doc: load_config_file_doc(config_file_path.as_deref()),
        file_path: config_file_path,
    };

    let translator = &config.translator;
    let api_key = match &translator.api_key {
        Some(key) => redact_token(key.expose_secret()),
        None => "<unset>".to_string(),
    };
    let schema_path = config
        .schema
        .path
        .as_ref()
        .map(|path| path.display().to_string())
        .unwrap_or_else(|| "<builtin>".to_string());

    let lines = vec![
        "effective config (source precedence: env > file > default):".to_string(),
        sources.line(
            "translator.provider",
            translator.provider.as_str(),
            &["TABLETALK_TRANSLATOR_PROVIDER"],
        ),
        sources.line(
            "translator.base_url",
            &translator.base_url,
            &["TABLETALK_TRANSLATOR_BASE_URL"],
        ),
        sources.line("translator.model", &translator.model, &["TABLETALK_TRANSLATOR_MODEL"]),
        sources.line("translator.api_key", &api_key, &["TABLETALK_TRANSLATOR_API_KEY"]),
        sources.line(
            "translator.timeout_secs",
            &translator.timeout_secs.to_string(),
            &["TABLETALK_TRANSLATOR_TIMEOUT_SECS"],
        ),
        sources.line(
            "translator.max_retries",
            &translator.max_retries.to_string(),
            &["TABLETALK_TRANSLATOR_MAX_RETRIES"],
        ),
        sources.line(
            "session.idle_timeout_secs",
            &config.session.idle_timeout_secs.to_string(),
            &["TABLETALK_SESSION_IDLE_TIMEOUT_SECS"],
        ),
        sources.line(
            "session.max_sessions",
            &config.session.max_sessions.to_string(),
            &["TABLETALK_SESSION_MAX_SESSIONS"],
        ),
        sources.line(
            "suggestions.max_field_suggestions",
            &config.suggestions.max_field_suggestions.to_string(),
            &["TABLETALK_SUGGESTIONS_MAX_FIELD_SUGGESTIONS"],
        ),
        sources.line(
            "suggestions.follow_up_limit",
            &config.suggestions.follow_up_limit.to_string(),
            &["TABLETALK_SUGGESTIONS_FOLLOW_UP_LIMIT"],
        ),
        sources.line("schema.path", &schema_path, &["TABLETALK_SCHEMA_PATH"]),
        sources.line(
            "logging.level",
            &config.logging.level,
            &["TABLETALK_LOGGING_LEVEL", "TABLETALK_LOG_LEVEL"],
        ),
        sources.line(
            "logging.format",
            config.logging.format.as_str(),
            &["TABLETALK_LOGGING_FORMAT", "TABLETALK_LOG_FORMAT"],
        ),
    ];

    lines.join("\n")
}

fn detect_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return path.exists().then(|| path.to_path_buf());
    }

    let root = PathBuf::from(DEFAULT_CONFIG_FILE);
    if root.exists() {
        return Some(root);
    }

    let nested = Path::new("config").join(DEFAULT_CONFIG_FILE);
    if nested.exists() {
        return Some(nested);
    }

    None
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
    if let Some(env_key) = env_keys.iter().find(|key| env::var_os(key).is_some()) {
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

fn redact_token(token: &str) -> String {
    let trimmed = token.trim();
    if trimmed.is_empty() {
        return "<empty>".to_string();
    }

    if let Some((prefix, _)) = trimmed.split_once('-') {
        return format!("{prefix}-***");
    }

    "<redacted>".to_string()
}
