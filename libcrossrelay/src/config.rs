//! Configuration management for Crossrelay
//!
//! Configuration comes either from the process environment (the usual way a
//! scheduled job is set up) or from a TOML file with the same structure.

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Deserializer};
use std::path::{Path, PathBuf};

use crate::error::{ConfigError, Result};

pub const DEFAULT_PAGE_SIZE: usize = 20;
pub const DEFAULT_MAX_PAGES: usize = 3;
pub const DEFAULT_USER_LOOKUP_QUERY_ID: &str = "xmU6X_CKVnQ5lSrCbAmJsg";
pub const DEFAULT_TIMELINE_QUERY_ID: &str = "V7H0Ap3_Hh2FyS75OCDO3Q";

#[derive(Debug, Deserialize)]
pub struct Config {
    /// Handle of the source account to mirror (without `@`)
    pub target_account: String,
    pub source: SourceConfig,
    pub destination: DestinationConfig,
    #[serde(default)]
    pub staging: StagingConfig,
    #[serde(default = "default_cursor_store_path")]
    pub cursor_store_path: String,
    #[serde(default = "default_scratch_dir")]
    pub scratch_dir: String,
}

#[derive(Debug, Deserialize)]
pub struct SourceConfig {
    pub auth: SourceAuth,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    #[serde(default = "default_max_pages")]
    pub max_pages: usize,
    #[serde(default = "default_user_lookup_query_id")]
    pub user_lookup_query_id: String,
    #[serde(default = "default_timeline_query_id")]
    pub timeline_query_id: String,
}

/// How the source platform is accessed
#[derive(Debug, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum SourceAuth {
    /// Logged-in web session cookies
    Session {
        #[serde(deserialize_with = "deserialize_secret")]
        auth_token: SecretString,
        #[serde(deserialize_with = "deserialize_secret")]
        ct0: SecretString,
    },
    /// No credentials; items are scraped from an RSS mirror
    Anonymous { feed_url: String },
}

impl SourceAuth {
    pub fn mode(&self) -> &'static str {
        match self {
            SourceAuth::Session { .. } => "session",
            SourceAuth::Anonymous { .. } => "anonymous",
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct DestinationConfig {
    #[serde(deserialize_with = "deserialize_secret")]
    pub sessdata: SecretString,
    #[serde(deserialize_with = "deserialize_secret")]
    pub bili_jct: SecretString,
    #[serde(default)]
    pub buvid3: Option<String>,
}

/// Media download settings
#[derive(Debug, Default, Deserialize)]
pub struct StagingConfig {
    /// Accept invalid TLS certificates from media hosts
    #[serde(default)]
    pub accept_invalid_certs: bool,
}

fn deserialize_secret<'de, D>(deserializer: D) -> std::result::Result<SecretString, D::Error>
where
    D: Deserializer<'de>,
{
    String::deserialize(deserializer).map(SecretString::from)
}

fn default_page_size() -> usize {
    DEFAULT_PAGE_SIZE
}

fn default_max_pages() -> usize {
    DEFAULT_MAX_PAGES
}

fn default_user_lookup_query_id() -> String {
    DEFAULT_USER_LOOKUP_QUERY_ID.to_string()
}

fn default_timeline_query_id() -> String {
    DEFAULT_TIMELINE_QUERY_ID.to_string()
}

fn default_cursor_store_path() -> String {
    resolve_data_path()
        .map(|dir| dir.join("last_id.json"))
        .unwrap_or_else(|_| PathBuf::from("last_id.json"))
        .to_string_lossy()
        .to_string()
}

fn default_scratch_dir() -> String {
    std::env::temp_dir()
        .join("crossrelay")
        .to_string_lossy()
        .to_string()
}

impl Config {
    /// Load configuration from `CROSSRELAY_CONFIG` if set, else from the environment
    pub fn load() -> Result<Self> {
        match std::env::var("CROSSRELAY_CONFIG") {
            Ok(path) if !path.trim().is_empty() => Self::load_from_path(Path::new(&path)),
            _ => Self::from_env(),
        }
    }

    /// Load configuration from a TOML file; a leading `~` is expanded
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let path = PathBuf::from(shellexpand::tilde(&path.to_string_lossy()).as_ref());
        let content = std::fs::read_to_string(&path).map_err(ConfigError::ReadError)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).map_err(ConfigError::ParseError)?;
        config.validate()?;
        Ok(config)
    }

    /// Build configuration from environment variables
    ///
    /// Source access uses `X_AUTH_TOKEN` + `X_CT0` when both are set, and
    /// falls back to the anonymous `X_FEED_URL` mirror otherwise.
    pub fn from_env() -> Result<Self> {
        let target_account = required_env("TARGET_X_USERNAME")?;

        let auth = match (optional_env("X_AUTH_TOKEN"), optional_env("X_CT0")) {
            (Some(auth_token), Some(ct0)) => SourceAuth::Session {
                auth_token: SecretString::from(auth_token),
                ct0: SecretString::from(ct0),
            },
            (Some(_), None) => return Err(ConfigError::MissingField("X_CT0".to_string()).into()),
            (None, Some(_)) => {
                return Err(ConfigError::MissingField("X_AUTH_TOKEN".to_string()).into())
            }
            (None, None) => match optional_env("X_FEED_URL") {
                Some(feed_url) => SourceAuth::Anonymous { feed_url },
                None => {
                    return Err(ConfigError::MissingField(
                        "X_AUTH_TOKEN and X_CT0, or X_FEED_URL".to_string(),
                    )
                    .into())
                }
            },
        };

        let source = SourceConfig {
            auth,
            page_size: parse_env("X_PAGE_SIZE", DEFAULT_PAGE_SIZE)?,
            max_pages: parse_env("X_MAX_PAGES", DEFAULT_MAX_PAGES)?,
            user_lookup_query_id: optional_env("X_USER_LOOKUP_QUERY_ID")
                .unwrap_or_else(default_user_lookup_query_id),
            timeline_query_id: optional_env("X_TIMELINE_QUERY_ID")
                .unwrap_or_else(default_timeline_query_id),
        };

        let destination = DestinationConfig {
            sessdata: SecretString::from(required_env("BILIBILI_SESSDATA")?),
            bili_jct: SecretString::from(required_env("BILIBILI_BILI_JCT")?),
            buvid3: optional_env("BILIBILI_BUVID3"),
        };

        let staging = StagingConfig {
            accept_invalid_certs: parse_env("CROSSRELAY_ACCEPT_INVALID_CERTS", false)?,
        };

        let config = Config {
            target_account,
            source,
            destination,
            staging,
            cursor_store_path: optional_env("CROSSRELAY_CURSOR_PATH")
                .unwrap_or_else(default_cursor_store_path),
            scratch_dir: optional_env("CROSSRELAY_SCRATCH_DIR").unwrap_or_else(default_scratch_dir),
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.target_account.trim().is_empty() {
            return Err(ConfigError::MissingField("target_account".to_string()).into());
        }
        if self.target_account.starts_with('@') {
            return Err(ConfigError::InvalidValue {
                field: "target_account".to_string(),
                reason: "use the bare handle without '@'".to_string(),
            }
            .into());
        }
        let blank = |secret: &SecretString| secret.expose_secret().trim().is_empty();
        if blank(&self.destination.sessdata) {
            return Err(ConfigError::MissingField("destination.sessdata".to_string()).into());
        }
        if blank(&self.destination.bili_jct) {
            return Err(ConfigError::MissingField("destination.bili_jct".to_string()).into());
        }
        match &self.source.auth {
            SourceAuth::Session { auth_token, .. } if blank(auth_token) => {
                return Err(ConfigError::MissingField("source.auth.auth_token".to_string()).into())
            }
            SourceAuth::Session { ct0, .. } if blank(ct0) => {
                return Err(ConfigError::MissingField("source.auth.ct0".to_string()).into())
            }
            SourceAuth::Anonymous { feed_url } if feed_url.trim().is_empty() => {
                return Err(ConfigError::MissingField("source.auth.feed_url".to_string()).into())
            }
            _ => {}
        }
        if self.source.page_size == 0 || self.source.max_pages == 0 {
            return Err(ConfigError::InvalidValue {
                field: "source.page_size/source.max_pages".to_string(),
                reason: "must be at least 1".to_string(),
            }
            .into());
        }
        Ok(())
    }

    /// Cursor file path with `~` expanded
    pub fn cursor_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.cursor_store_path).to_string())
    }

    /// Scratch directory with `~` expanded
    pub fn scratch_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.scratch_dir).to_string())
    }
}

fn optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn required_env(key: &str) -> Result<String> {
    optional_env(key).ok_or_else(|| ConfigError::MissingField(key.to_string()).into())
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> Result<T> {
    match optional_env(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|_| {
            ConfigError::InvalidValue {
                field: key.to_string(),
                reason: format!("cannot parse '{}'", raw),
            }
            .into()
        }),
    }
}

/// Resolve the data directory path following XDG Base Directory spec
pub fn resolve_data_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
        .ok_or_else(|| ConfigError::MissingField("data directory".to_string()))?;

    Ok(data_dir.join("crossrelay"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RelayError;
    use serial_test::serial;

    const ENV_KEYS: &[&str] = &[
        "CROSSRELAY_CONFIG",
        "TARGET_X_USERNAME",
        "X_AUTH_TOKEN",
        "X_CT0",
        "X_FEED_URL",
        "X_PAGE_SIZE",
        "X_MAX_PAGES",
        "X_USER_LOOKUP_QUERY_ID",
        "X_TIMELINE_QUERY_ID",
        "BILIBILI_SESSDATA",
        "BILIBILI_BILI_JCT",
        "BILIBILI_BUVID3",
        "CROSSRELAY_ACCEPT_INVALID_CERTS",
        "CROSSRELAY_CURSOR_PATH",
        "CROSSRELAY_SCRATCH_DIR",
    ];

    fn clear_env() {
        for key in ENV_KEYS {
            std::env::remove_var(key);
        }
    }

    fn set_destination_env() {
        std::env::set_var("BILIBILI_SESSDATA", "sess");
        std::env::set_var("BILIBILI_BILI_JCT", "jct");
    }

    #[test]
    #[serial]
    fn test_from_env_session_mode() {
        clear_env();
        std::env::set_var("TARGET_X_USERNAME", "someone");
        std::env::set_var("X_AUTH_TOKEN", "token");
        std::env::set_var("X_CT0", "csrf");
        std::env::set_var("CROSSRELAY_CURSOR_PATH", "/tmp/relay/last_id.json");
        set_destination_env();

        let config = Config::from_env().unwrap();
        assert_eq!(config.target_account, "someone");
        assert_eq!(config.source.auth.mode(), "session");
        match &config.source.auth {
            SourceAuth::Session { auth_token, ct0 } => {
                assert_eq!(auth_token.expose_secret(), "token");
                assert_eq!(ct0.expose_secret(), "csrf");
            }
            other => panic!("Expected session auth, got {:?}", other),
        }
        assert_eq!(config.destination.bili_jct.expose_secret(), "jct");
        assert_eq!(config.destination.buvid3, None);
        assert_eq!(config.source.page_size, DEFAULT_PAGE_SIZE);
        assert_eq!(config.cursor_path(), PathBuf::from("/tmp/relay/last_id.json"));
        clear_env();
    }

    #[test]
    #[serial]
    fn test_from_env_anonymous_mode() {
        clear_env();
        std::env::set_var("TARGET_X_USERNAME", "someone");
        std::env::set_var("X_FEED_URL", "https://nitter.example");
        std::env::set_var("X_PAGE_SIZE", "5");
        set_destination_env();

        let config = Config::from_env().unwrap();
        assert_eq!(config.source.auth.mode(), "anonymous");
        assert_eq!(config.source.page_size, 5);
        assert!(!config.staging.accept_invalid_certs);
        clear_env();
    }

    #[test]
    #[serial]
    fn test_from_env_missing_target() {
        clear_env();
        set_destination_env();
        std::env::set_var("X_FEED_URL", "https://nitter.example");

        match Config::from_env() {
            Err(RelayError::Config(ConfigError::MissingField(field))) => {
                assert_eq!(field, "TARGET_X_USERNAME")
            }
            other => panic!("Expected missing field, got {:?}", other.map(|_| ())),
        }
        clear_env();
    }

    #[test]
    #[serial]
    fn test_from_env_half_session_is_rejected() {
        clear_env();
        std::env::set_var("TARGET_X_USERNAME", "someone");
        std::env::set_var("X_AUTH_TOKEN", "token");
        set_destination_env();

        match Config::from_env() {
            Err(RelayError::Config(ConfigError::MissingField(field))) => assert_eq!(field, "X_CT0"),
            other => panic!("Expected missing X_CT0, got {:?}", other.map(|_| ())),
        }
        clear_env();
    }

    #[test]
    #[serial]
    fn test_from_env_invalid_number() {
        clear_env();
        std::env::set_var("TARGET_X_USERNAME", "someone");
        std::env::set_var("X_FEED_URL", "https://nitter.example");
        std::env::set_var("X_MAX_PAGES", "many");
        set_destination_env();

        assert!(matches!(
            Config::from_env(),
            Err(RelayError::Config(ConfigError::InvalidValue { .. }))
        ));
        clear_env();
    }

    #[test]
    fn test_from_toml() {
        let config = Config::from_toml_str(
            r#"
target_account = "someone"
cursor_store_path = "~/relay/last_id.json"

[source]
page_size = 10

[source.auth]
mode = "session"
auth_token = "token"
ct0 = "csrf"

[destination]
sessdata = "sess"
bili_jct = "jct"
buvid3 = "buvid"

[staging]
accept_invalid_certs = true
"#,
        )
        .unwrap();

        assert_eq!(config.source.page_size, 10);
        assert_eq!(config.source.max_pages, DEFAULT_MAX_PAGES);
        assert_eq!(config.source.timeline_query_id, DEFAULT_TIMELINE_QUERY_ID);
        assert_eq!(config.destination.buvid3.as_deref(), Some("buvid"));
        assert!(config.staging.accept_invalid_certs);
        assert!(!config.cursor_path().to_string_lossy().starts_with('~'));
    }

    #[test]
    fn test_from_toml_rejects_at_prefixed_handle() {
        let result = Config::from_toml_str(
            r#"
target_account = "@someone"

[source.auth]
mode = "anonymous"
feed_url = "https://nitter.example"

[destination]
sessdata = "sess"
bili_jct = "jct"
"#,
        );
        assert!(matches!(
            result,
            Err(RelayError::Config(ConfigError::InvalidValue { .. }))
        ));
    }

    #[test]
    fn test_from_toml_rejects_empty_destination_cookies() {
        let result = Config::from_toml_str(
            r#"
target_account = "someone"

[source.auth]
mode = "anonymous"
feed_url = "https://nitter.example"

[destination]
sessdata = ""
bili_jct = ""
"#,
        );
        match result {
            Err(RelayError::Config(ConfigError::MissingField(field))) => {
                assert_eq!(field, "destination.sessdata")
            }
            other => panic!("Expected missing sessdata, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_from_toml_rejects_blank_session_cookie() {
        let result = Config::from_toml_str(
            r#"
target_account = "someone"

[source.auth]
mode = "session"
auth_token = "token"
ct0 = "  "

[destination]
sessdata = "sess"
bili_jct = "jct"
"#,
        );
        assert!(matches!(
            result,
            Err(RelayError::Config(ConfigError::MissingField(field))) if field == "source.auth.ct0"
        ));
    }

    #[test]
    fn test_debug_output_redacts_secrets() {
        let config = Config::from_toml_str(
            r#"
target_account = "someone"

[source.auth]
mode = "session"
auth_token = "super-secret-token"
ct0 = "csrf-value"

[destination]
sessdata = "sessdata-value"
bili_jct = "jct-value"
"#,
        )
        .unwrap();

        let debug = format!("{:?}", config);
        assert!(!debug.contains("super-secret-token"));
        assert!(!debug.contains("sessdata-value"));
        assert!(debug.contains("someone"));
    }

    #[test]
    #[serial]
    fn test_load_prefers_config_file() {
        clear_env();
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("crossrelay.toml");
        std::fs::write(
            &path,
            r#"
target_account = "from-file"

[source.auth]
mode = "anonymous"
feed_url = "https://nitter.example"

[destination]
sessdata = "sess"
bili_jct = "jct"
"#,
        )
        .unwrap();
        std::env::set_var("CROSSRELAY_CONFIG", &path);
        std::env::set_var("TARGET_X_USERNAME", "from-env");

        let config = Config::load().unwrap();
        assert_eq!(config.target_account, "from-file");
        clear_env();
    }

    #[test]
    #[serial]
    fn test_load_from_path_expands_home() {
        let home = tempfile::TempDir::new().unwrap();
        std::fs::write(
            home.path().join("crossrelay.toml"),
            r#"
target_account = "from-home"

[source.auth]
mode = "anonymous"
feed_url = "https://nitter.example"

[destination]
sessdata = "sess"
bili_jct = "jct"
"#,
        )
        .unwrap();
        let previous = std::env::var_os("HOME");
        std::env::set_var("HOME", home.path());

        let result = Config::load_from_path(Path::new("~/crossrelay.toml"));

        match previous {
            Some(value) => std::env::set_var("HOME", value),
            None => std::env::remove_var("HOME"),
        }
        assert_eq!(result.unwrap().target_account, "from-home");
    }

    #[test]
    fn test_load_from_missing_path() {
        let result = Config::load_from_path(Path::new("/nonexistent/crossrelay.toml"));
        assert!(matches!(
            result,
            Err(RelayError::Config(ConfigError::ReadError(_)))
        ));
    }
}
