use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub translator: TranslatorConfig,
    pub session: SessionConfig,
    pub suggestions: SuggestionsConfig,
    pub schema: SchemaConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct TranslatorConfig {
    pub provider: TranslatorProvider,
    pub base_url: String,
    pub model: String,
    pub api_key: Option<SecretString>,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

#[derive(Clone, Debug)]
pub struct SessionConfig {
    pub idle_timeout_secs: u64,
    pub max_sessions: usize,
}

#[derive(Clone, Debug)]
pub struct SuggestionsConfig {
    pub max_field_suggestions: usize,
    pub follow_up_limit: usize,
}

#[derive(Clone, Debug, Default)]
pub struct SchemaConfig {
    pub path: Option<PathBuf>,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TranslatorProvider {
    Keyword,
    Ollama,
}

impl TranslatorProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Keyword => "keyword",
            Self::Ollama => "ollama",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

impl LogFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Compact => "compact",
            Self::Pretty => "pretty",
            Self::Json => "json",
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub translator_provider: Option<TranslatorProvider>,
    pub translator_base_url: Option<String>,
    pub translator_model: Option<String>,
    pub schema_path: Option<PathBuf>,
    pub log_level: Option<String>,
    pub log_format: Option<LogFormat>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            translator: TranslatorConfig {
                provider: TranslatorProvider::Keyword,
                base_url: "http://localhost:11434".to_string(),
                model: "llama3.1".to_string(),
                api_key: None,
                timeout_secs: 30,
                max_retries: 2,
            },
            session: SessionConfig { idle_timeout_secs: 900, max_sessions: 64 },
            suggestions: SuggestionsConfig { max_field_suggestions: 5, follow_up_limit: 3 },
            schema: SchemaConfig::default(),
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for TranslatorProvider {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "keyword" => Ok(Self::Keyword),
            "ollama" => Ok(Self::Ollama),
            other => Err(ConfigError::Validation(format!(
                "unsupported translator provider `{other}` (expected keyword|ollama)"
            ))),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected =
                options.config_path.unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(translator) = patch.translator {
            if let Some(provider) = translator.provider {
                self.translator.provider = provider;
            }
            if let Some(base_url) = translator.base_url {
                self.translator.base_url = base_url;
            }
            if let Some(model) = translator.model {
                self.translator.model = model;
            }
            if let Some(api_key) = translator.api_key {
                self.translator.api_key = Some(secret_value(api_key));
            }
            if let Some(timeout_secs) = translator.timeout_secs {
                self.translator.timeout_secs = timeout_secs;
            }
            if let Some(max_retries) = translator.max_retries {
                self.translator.max_retries = max_retries;
            }
        }

        if let Some(session) = patch.session {
            if let Some(idle_timeout_secs) = session.idle_timeout_secs {
                self.session.idle_timeout_secs = idle_timeout_secs;
            }
            if let Some(max_sessions) = session.max_sessions {
                self.session.max_sessions = max_sessions;
            }
        }

        if let Some(suggestions) = patch.suggestions {
            if let Some(max_field_suggestions) = suggestions.max_field_suggestions {
                self.suggestions.max_field_suggestions = max_field_suggestions;
            }
            if let Some(follow_up_limit) = suggestions.follow_up_limit {
                self.suggestions.follow_up_limit = follow_up_limit;
            }
        }

        if let Some(schema) = patch.schema {
            if let Some(path) = schema.path {
                self.schema.path = Some(path);
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("TABLETALK_TRANSLATOR_PROVIDER") {
            self.translator.provider = value.parse()?;
        }
        if let Some(value) = read_env("TABLETALK_TRANSLATOR_BASE_URL") {
            self.translator.base_url = value;
        }
        if let Some(value) = read_env("TABLETALK_TRANSLATOR_MODEL") {
            self.translator.model = value;
        }
        if let Some(value) = read_env("TABLETALK_TRANSLATOR_API_KEY") {
            self.translator.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("TABLETALK_TRANSLATOR_TIMEOUT_SECS") {
            self.translator.timeout_secs = parse_u64("TABLETALK_TRANSLATOR_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("TABLETALK_TRANSLATOR_MAX_RETRIES") {
            self.translator.max_retries = parse_u32("TABLETALK_TRANSLATOR_MAX_RETRIES", &value)?;
        }

        if let Some(value) = read_env("TABLETALK_SESSION_IDLE_TIMEOUT_SECS") {
            self.session.idle_timeout_secs =
                parse_u64("TABLETALK_SESSION_IDLE_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("TABLETALK_SESSION_MAX_SESSIONS") {
            self.session.max_sessions = parse_usize("TABLETALK_SESSION_MAX_SESSIONS", &value)?;
        }

        if let Some(value) = read_env("TABLETALK_SUGGESTIONS_MAX_FIELD_SUGGESTIONS") {
            self.suggestions.max_field_suggestions =
                parse_usize("TABLETALK_SUGGESTIONS_MAX_FIELD_SUGGESTIONS", &value)?;
        }
        if let Some(value) = read_env("TABLETALK_SUGGESTIONS_FOLLOW_UP_LIMIT") {
            self.suggestions.follow_up_limit =
                parse_usize("TABLETALK_SUGGESTIONS_FOLLOW_UP_LIMIT", &value)?;
        }

        if let Some(value) = read_env("TABLETALK_SCHEMA_PATH") {
            self.schema.path = Some(PathBuf::from(value));
        }

        let log_level =
            read_env("TABLETALK_LOGGING_LEVEL").or_else(|| read_env("TABLETALK_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("TABLETALK_LOGGING_FORMAT").or_else(|| read_env("TABLETALK_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(provider) = overrides.translator_provider {
            self.translator.provider = provider;
        }
        if let Some(base_url) = overrides.translator_base_url {
            self.translator.base_url = base_url;
        }
        if let Some(model) = overrides.translator_model {
            self.translator.model = model;
        }
        if let Some(path) = overrides.schema_path {
            self.schema.path = Some(path);
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(log_format) = overrides.log_format {
            self.logging.format = log_format;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_translator(&self.translator)?;
        validate_session(&self.session)?;
        validate_suggestions(&self.suggestions)?;
        validate_schema(&self.schema)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

pub const DEFAULT_CONFIG_FILE: &str = "tabletalk.toml";

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from(DEFAULT_CONFIG_FILE), PathBuf::from("config/tabletalk.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_translator(translator: &TranslatorConfig) -> Result<(), ConfigError> {
    if translator.timeout_secs == 0 || translator.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "translator.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    if translator.provider == TranslatorProvider::Ollama {
        let base_url = translator.base_url.trim();
        if base_url.is_empty() {
            return Err(ConfigError::Validation(
                "translator.base_url is required for the ollama provider".to_string(),
            ));
        }
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(ConfigError::Validation(
                "translator.base_url must start with http:// or https://".to_string(),
            ));
        }
        if translator.model.trim().is_empty() {
            return Err(ConfigError::Validation(
                "translator.model is required for the ollama provider (e.g. `llama3.1`)"
                    .to_string(),
            ));
        }
        let blank_key = translator
            .api_key
            .as_ref()
            .map(|value| value.expose_secret().trim().is_empty())
            .unwrap_or(false);
        if blank_key {
            return Err(ConfigError::Validation(
                "translator.api_key is set but empty; remove it or provide a key".to_string(),
            ));
        }
    }

    Ok(())
}

fn validate_session(session: &SessionConfig) -> Result<(), ConfigError> {
    if session.idle_timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "session.idle_timeout_secs must be greater than zero".to_string(),
        ));
    }

    if session.max_sessions == 0 {
        return Err(ConfigError::Validation(
            "session.max_sessions must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_suggestions(suggestions: &SuggestionsConfig) -> Result<(), ConfigError> {
    if suggestions.max_field_suggestions == 0 {
        return Err(ConfigError::Validation(
            "suggestions.max_field_suggestions must be greater than zero".to_string(),
        ));
    }

    if suggestions.follow_up_limit == 0 {
        return Err(ConfigError::Validation(
            "suggestions.follow_up_limit must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_schema(schema: &SchemaConfig) -> Result<(), ConfigError> {
    if let Some(path) = &schema.path {
        if !path.exists() {
            return Err(ConfigError::Validation(format!(
                "schema.path `{}` does not exist; remove it to use the built-in catalogue",
                path.display()
            )));
        }
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_usize(key: &str, value: &str) -> Result<usize, ConfigError> {
    value.parse::<usize>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    translator: Option<TranslatorPatch>,
    session: Option<SessionPatch>,
    suggestions: Option<SuggestionsPatch>,
    schema: Option<SchemaPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct TranslatorPatch {
    provider: Option<TranslatorProvider>,
    base_url: Option<String>,
    model: Option<String>,
    api_key: Option<String>,
    timeout_secs: Option<u64>,
    max_retries: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct SessionPatch {
    idle_timeout_secs: Option<u64>,
    max_sessions: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct SuggestionsPatch {
    max_field_suggestions: Option<usize>,
    follow_up_limit: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct SchemaPatch {
    path: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

#[cfg(test)]
mod tests {
    use std::env;
    use std::fs;
    use std::path::PathBuf;
    use std::sync::{Mutex, OnceLock};

    use secrecy::ExposeSecret;
    use tempfile::TempDir;

    use super::{
        AppConfig, ConfigError, ConfigOverrides, LoadOptions, LogFormat, TranslatorProvider,
    };

    /// Runs `body` with `vars` set, serialised against other env-mutating tests.
    fn scoped_env<T>(vars: &[(&str, &str)], body: impl FnOnce() -> T) -> T {
        static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
        let _held = LOCK.get_or_init(|| Mutex::new(())).lock().unwrap_or_else(|p| p.into_inner());

        for (name, value) in vars {
            env::set_var(name, value);
        }
        let outcome = body();
        for (name, _) in vars {
            env::remove_var(name);
        }
        outcome
    }

    fn write_file(dir: &TempDir, contents: &str) -> PathBuf {
        let path = dir.path().join("tabletalk.toml");
        fs::write(&path, contents).expect("config file should be writable");
        path
    }

    fn load_from(path: PathBuf) -> Result<AppConfig, ConfigError> {
        AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() })
    }

    #[test]
    fn defaults_are_valid_and_offline() {
        let config = scoped_env(&[], || AppConfig::load(LoadOptions::default()))
            .expect("defaults load");

        assert_eq!(config.translator.provider, TranslatorProvider::Keyword);
        assert_eq!(config.session.idle_timeout_secs, 900);
        assert_eq!(config.suggestions.follow_up_limit, 3);
        assert!(config.schema.path.is_none());
        assert_eq!(config.logging.format, LogFormat::Compact);
    }

    #[test]
    fn file_values_expand_env_references() {
        let dir = TempDir::new().expect("temp dir");
        let path = write_file(
            &dir,
            "[translator]\nprovider = \"ollama\"\nmodel = \"${TT_TEST_MODEL}\"\n\
             api_key = \"${TT_TEST_KEY}\"\n",
        );

        let config = scoped_env(
            &[("TT_TEST_MODEL", "mistral"), ("TT_TEST_KEY", "ollama-secret")],
            || load_from(path),
        )
        .expect("interpolated config");

        assert_eq!(config.translator.model, "mistral");
        let key = config.translator.api_key.as_ref().map(|key| key.expose_secret().to_string());
        assert_eq!(key.as_deref(), Some("ollama-secret"));
    }

    #[test]
    fn unset_reference_names_the_variable() {
        let dir = TempDir::new().expect("temp dir");
        let path = write_file(&dir, "[translator]\nmodel = \"${TT_TEST_UNSET}\"\n");

        let error = scoped_env(&[], || {
            env::remove_var("TT_TEST_UNSET");
            load_from(path)
        })
        .expect_err("interpolation should fail");

        assert!(matches!(
            error,
            ConfigError::MissingEnvInterpolation { ref var } if var == "TT_TEST_UNSET"
        ));
    }

    #[test]
    fn short_log_variables_are_accepted() {
        let config = scoped_env(
            &[("TABLETALK_LOG_LEVEL", "warn"), ("TABLETALK_LOG_FORMAT", "pretty")],
            || AppConfig::load(LoadOptions::default()),
        )
        .expect("aliased logging config");

        assert_eq!(config.logging.level, "warn");
        assert_eq!(config.logging.format, LogFormat::Pretty);
    }

    #[test]
    fn env_beats_file_and_overrides_beat_env() {
        let dir = TempDir::new().expect("temp dir");
        let path = write_file(
            &dir,
            "[translator]\nmodel = \"from-file\"\ntimeout_secs = 45\n\n\
             [session]\nidle_timeout_secs = 60\nmax_sessions = 8\n\n\
             [logging]\nlevel = \"warn\"\n",
        );

        let config = scoped_env(
            &[
                ("TABLETALK_TRANSLATOR_MODEL", "from-env"),
                ("TABLETALK_SESSION_IDLE_TIMEOUT_SECS", "120"),
            ],
            || {
                AppConfig::load(LoadOptions {
                    config_path: Some(path),
                    overrides: ConfigOverrides {
                        log_level: Some("debug".to_string()),
                        ..ConfigOverrides::default()
                    },
                    ..LoadOptions::default()
                })
            },
        )
        .expect("layered config");

        assert_eq!(config.translator.model, "from-env");
        assert_eq!(config.translator.timeout_secs, 45);
        assert_eq!(config.session.idle_timeout_secs, 120);
        assert_eq!(config.session.max_sessions, 8);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn non_numeric_env_value_is_rejected() {
        let error = scoped_env(&[("TABLETALK_SUGGESTIONS_FOLLOW_UP_LIMIT", "three")], || {
            AppConfig::load(LoadOptions::default())
        })
        .expect_err("override should fail");

        assert!(matches!(
            error,
            ConfigError::InvalidEnvOverride { ref key, .. }
                if key == "TABLETALK_SUGGESTIONS_FOLLOW_UP_LIMIT"
        ));
    }

    #[test]
    fn base_url_without_scheme_fails_validation() {
        let error = scoped_env(
            &[
                ("TABLETALK_TRANSLATOR_PROVIDER", "ollama"),
                ("TABLETALK_TRANSLATOR_BASE_URL", "localhost:11434"),
            ],
            || AppConfig::load(LoadOptions::default()),
        )
        .expect_err("validation should fail");

        assert!(matches!(
            error,
            ConfigError::Validation(ref message) if message.contains("translator.base_url")
        ));
    }

    #[test]
    fn debug_output_hides_api_key() {
        let config = scoped_env(&[("TABLETALK_TRANSLATOR_API_KEY", "sk-secret-value")], || {
            AppConfig::load(LoadOptions::default())
        })
        .expect("config with key");

        assert!(!format!("{config:?}").contains("sk-secret-value"));
    }

    #[test]
    fn missing_schema_file_fails_validation() {
        let dir = TempDir::new().expect("temp dir");
        let error = scoped_env(&[], || {
            AppConfig::load(LoadOptions {
                overrides: ConfigOverrides {
                    schema_path: Some(dir.path().join("missing-schema.toml")),
                    ..ConfigOverrides::default()
                },
                ..LoadOptions::default()
            })
        })
        .expect_err("schema validation should fail");

        assert!(matches!(
            error,
            ConfigError::Validation(ref message) if message.contains("schema.path")
        ));
    }
}
