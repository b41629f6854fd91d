use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl LogFormat {
    fn from_env(value: &str) -> anyhow::Result<Self> {
        match value {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(anyhow::anyhow!(
                "Invalid SIGNBOX_LOG_FORMAT '{other}'. Expected 'text' or 'json'"
            )),
        }
    }
}

/// Problems with the action/user configuration file.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Process-level settings, read once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    /// Port the gateway listens on
    pub port: u16,
    /// Address the gateway binds to
    pub bind: String,
    /// YAML file with users and actions; re-read on every request
    pub config_path: PathBuf,
    /// Directory for per-request workspaces
    pub workspace_dir: PathBuf,
    /// Largest accepted upload body
    pub max_upload_bytes: usize,
    pub log_format: LogFormat,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        Ok(Self {
            port: env_parse("SIGNBOX_PORT", 4567)?,
            bind: env_str("SIGNBOX_BIND", "0.0.0.0"),
            config_path: PathBuf::from(env_str("SIGNBOX_CONFIG", "config/config.yml")),
            workspace_dir: std::env::var("SIGNBOX_WORKSPACE_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| std::env::temp_dir()),
            max_upload_bytes: env_parse("SIGNBOX_MAX_UPLOAD_BYTES", 256 * 1024 * 1024)?,
            log_format: LogFormat::from_env(&env_str("SIGNBOX_LOG_FORMAT", "text"))?,
        })
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}

fn env_str(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> anyhow::Result<T>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(val) => val
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("Failed to parse env var {key}={val}: {e}")),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_format_accepts_text_and_json_only() {
        assert_eq!(LogFormat::from_env("text").unwrap(), LogFormat::Text);
        assert_eq!(LogFormat::from_env("json").unwrap(), LogFormat::Json);
        assert!(LogFormat::from_env("yaml").is_err());
    }

    #[test]
    fn test_env_parse_falls_back_and_reports_bad_values() {
        assert_eq!(env_parse("SIGNBOX_TEST_UNSET_PORT", 4567u16).unwrap(), 4567);

        std::env::set_var("SIGNBOX_TEST_BAD_PORT", "not-a-port");
        let err = env_parse("SIGNBOX_TEST_BAD_PORT", 4567u16).unwrap_err();
        assert!(err.to_string().contains("SIGNBOX_TEST_BAD_PORT"));
    }
}
