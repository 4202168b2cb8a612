//! Run configuration: YAML with `${VAR}` environment substitution.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::{Captures, Regex};
use serde::Deserialize;
use thiserror::Error;

use github::transport::{DEFAULT_API_URL, DEFAULT_USER_AGENT};
use github::{CatalogConfig, TransportConfig};
use tap::{PageSize, Timestamp};

/// Environment variable read when the file sets no `auth_token`.
pub const TOKEN_ENV: &str = "GITHUB_TOKEN";

/// Largest `per_page` GitHub accepts.
const MAX_PAGE_SIZE: u32 = 100;

static ENV_VAR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("valid env var regex"));

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("missing environment variable(s): {}", .0.join(", "))]
    MissingEnv(Vec<String>),

    #[error("failed to parse config YAML: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Everything one extraction run needs.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default = "default_api_url")]
    pub api_url: String,
    #[serde(default)]
    pub auth_token: Option<String>,
    /// Repository search query, e.g. `org:acme language:rust`.
    pub search_query: String,
    /// Lower bound for date-keyed streams without a bookmark.
    #[serde(default)]
    pub start_date: Option<Timestamp>,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    #[serde(default)]
    pub max_results: Option<u64>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default)]
    pub user_agent: Option<String>,
    /// Allow-list of streams to emit; all when absent.
    #[serde(default)]
    pub streams: Option<Vec<String>>,
    /// Bookmark file; bookmarks are kept in memory when absent.
    #[serde(default)]
    pub state_path: Option<PathBuf>,
}

fn default_api_url() -> String {
    DEFAULT_API_URL.to_owned()
}

fn default_page_size() -> u32 {
    MAX_PAGE_SIZE
}

fn default_max_retries() -> u32 {
    5
}

impl Config {
    /// Parses and validates a YAML document after environment substitution.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] on a missing variable, malformed YAML, or a
    /// value that fails validation.
    pub fn from_yaml(raw: &str) -> Result<Self, ConfigError> {
        let substituted = substitute_env_vars(raw)?;
        let mut config: Config = serde_yaml::from_str(&substituted)?;
        config.auth_token = resolve_token(config.auth_token.take(), std::env::var(TOKEN_ENV).ok());
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses, and validates a config file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Read`] if the file cannot be read, otherwise as
    /// [`Config::from_yaml`].
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&raw)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.search_query.trim().is_empty() {
            return Err(ConfigError::Invalid("search_query must not be empty".into()));
        }
        if !(self.api_url.starts_with("https://") || self.api_url.starts_with("http://")) {
            return Err(ConfigError::Invalid(format!(
                "api_url must be an http(s) URL, got {}",
                self.api_url
            )));
        }
        if self.page_size == 0 || self.page_size > MAX_PAGE_SIZE {
            return Err(ConfigError::Invalid(format!(
                "page_size must be between 1 and {MAX_PAGE_SIZE}, got {}",
                self.page_size
            )));
        }
        if self.max_results == Some(0) {
            return Err(ConfigError::Invalid("max_results must be positive".into()));
        }
        if let Some(streams) = &self.streams {
            if streams.is_empty() || streams.iter().any(|s| s.trim().is_empty()) {
                return Err(ConfigError::Invalid(
                    "streams must list at least one non-empty stream name".into(),
                ));
            }
        }
        Ok(())
    }

    pub fn catalog_config(&self) -> Result<CatalogConfig, ConfigError> {
        let page_size = PageSize::new(self.page_size)
            .ok_or_else(|| ConfigError::Invalid("page_size must be positive".into()))?;
        Ok(CatalogConfig {
            search_query: self.search_query.clone(),
            page_size,
            max_results: self.max_results,
        })
    }

    pub fn transport_config(&self) -> TransportConfig {
        TransportConfig {
            api_url: self.api_url.clone(),
            auth_token: self.auth_token.clone(),
            user_agent: self
                .user_agent
                .clone()
                .unwrap_or_else(|| DEFAULT_USER_AGENT.to_owned()),
            max_retries: self.max_retries,
            ..TransportConfig::default()
        }
    }
}

/// Replaces every `${NAME}` with the value of the environment variable.
///
/// # Errors
///
/// Returns [`ConfigError::MissingEnv`] naming every unset variable.
pub fn substitute_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut missing = Vec::new();
    let output = ENV_VAR_RE.replace_all(input, |cap: &Captures<'_>| match std::env::var(&cap[1]) {
        Ok(value) => value,
        Err(_) => {
            missing.push(cap[1].to_owned());
            String::new()
        }
    });
    if missing.is_empty() {
        Ok(output.into_owned())
    } else {
        Err(ConfigError::MissingEnv(missing))
    }
}

fn resolve_token(configured: Option<String>, from_env: Option<String>) -> Option<String> {
    configured
        .or(from_env)
        .map(|t| t.trim().to_owned())
        .filter(|t| !t.is_empty())
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn minimal_config_gets_defaults() {
        let config = Config::from_yaml("search_query: org:acme\n").unwrap();
        assert_eq!(config.api_url, DEFAULT_API_URL);
        assert_eq!(config.page_size, 100);
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.streams, None);
        assert_eq!(config.state_path, None);
    }

    #[test]
    fn full_config_is_parsed() {
        let yaml = r#"
api_url: https://github.example.com/api/v3
auth_token: abc
search_query: "org:acme language:rust"
start_date: "2023-01-01T00:00:00Z"
page_size: 50
max_results: 200
streams: [issues, issue_comments]
state_path: state/github.json
"#;
        let config = Config::from_yaml(yaml).unwrap();
        assert_eq!(config.auth_token.as_deref(), Some("abc"));
        assert_eq!(config.start_date, Timestamp::parse_rfc3339("2023-01-01T00:00:00Z"));
        assert_eq!(config.streams.as_deref().map(<[String]>::len), Some(2));

        let catalog = config.catalog_config().unwrap();
        assert_eq!(catalog.page_size.as_u32(), 50);
        assert_eq!(catalog.max_results, Some(200));
    }

    #[test]
    fn env_vars_are_substituted() {
        std::env::set_var("TAP_GITHUB_TEST_QUERY", "org:acme");
        let config = Config::from_yaml("search_query: ${TAP_GITHUB_TEST_QUERY}\n").unwrap();
        assert_eq!(config.search_query, "org:acme");
        std::env::remove_var("TAP_GITHUB_TEST_QUERY");
    }

    #[test]
    fn every_missing_env_var_is_reported() {
        let err = substitute_env_vars("${TAP_GITHUB_MISSING_A} ${TAP_GITHUB_MISSING_B}").unwrap_err();
        let message = err.to_string();
        assert!(message.contains("TAP_GITHUB_MISSING_A"));
        assert!(message.contains("TAP_GITHUB_MISSING_B"));
    }

    #[test]
    fn configured_token_wins_over_environment() {
        assert_eq!(
            resolve_token(Some("file".into()), Some("env".into())).as_deref(),
            Some("file")
        );
        assert_eq!(resolve_token(None, Some("env".into())).as_deref(), Some("env"));
        assert_eq!(resolve_token(Some("  ".into()), None), None);
    }

    #[test]
    fn invalid_values_are_rejected() {
        for yaml in [
            "search_query: ''\n",
            "search_query: org:acme\npage_size: 0\n",
            "search_query: org:acme\npage_size: 101\n",
            "search_query: org:acme\nmax_results: 0\n",
            "search_query: org:acme\napi_url: ftp://example.com\n",
            "search_query: org:acme\nstreams: []\n",
        ] {
            let err = Config::from_yaml(yaml).unwrap_err();
            assert!(matches!(err, ConfigError::Invalid(_)), "{yaml}: {err}");
        }
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = Config::from_yaml("search_query: org:acme\nrepositories: [a]\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn load_reads_a_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "search_query: org:acme").unwrap();
        assert_eq!(Config::load(file.path()).unwrap().search_query, "org:acme");

        let err = Config::load(Path::new("/definitely/not/here.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
