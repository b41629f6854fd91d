//! Users and actions from the YAML configuration file.
//!
//! The file is read again for every request so credential and user changes
//! apply without a restart.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use shared_types::{ActionSummary, StepTemplate};
use signer::{ActionProfile, Credential, ProfileResolver, ResolveError};

use crate::config::ConfigError;

const DEFAULT_TIMEOUT_SECS: u64 = 60;
const DEFAULT_PROMPT_WINDOW_SECS: u64 = 5;

fn default_timeout() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

fn default_prompt_window() -> u64 {
    DEFAULT_PROMPT_WINDOW_SECS
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileSettings {
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,
    #[serde(default = "default_prompt_window")]
    pub prompt_window_seconds: u64,
    #[serde(default)]
    pub users: BTreeMap<String, UserEntry>,
    #[serde(default)]
    pub actions: BTreeMap<String, ActionEntry>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UserEntry {
    /// Argon2 PHC string.
    pub password_hash: String,
    /// Actions this user may run. Empty means all of them.
    #[serde(default)]
    pub actions: Vec<String>,
}

impl UserEntry {
    pub fn may_use(&self, action: &str) -> bool {
        self.actions.is_empty() || self.actions.iter().any(|a| a == action)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ActionEntry {
    pub password: Credential,
    #[serde(default)]
    pub keypath: Option<String>,
    #[serde(default)]
    pub certpath: Option<String>,
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
    #[serde(default)]
    pub vars: BTreeMap<String, String>,
    /// Overrides the built-in chain together with `steps`.
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub steps: Option<Vec<StepTemplate>>,
}

impl FileSettings {
    /// Parse and validate YAML text.
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let settings: FileSettings = serde_yaml::from_str(text)?;
        settings.validate()?;
        Ok(settings)
    }

    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })?;
        Self::parse(&text)
    }

    pub fn prompt_window(&self) -> Duration {
        Duration::from_secs(self.prompt_window_seconds)
    }

    pub fn user(&self, name: &str) -> Option<&UserEntry> {
        self.users.get(name)
    }

    pub fn has_action(&self, action: &str) -> bool {
        self.actions.contains_key(action)
    }

    /// Build the runnable profile for `action`.
    pub fn profile(&self, action: &str) -> Result<ActionProfile, ResolveError> {
        let entry = self
            .actions
            .get(action)
            .ok_or_else(|| ResolveError::UnknownAction(action.to_string()))?;

        let mut vars = entry.vars.clone();
        if let Some(keypath) = &entry.keypath {
            vars.insert("keypath".to_string(), keypath.clone());
        }
        if let Some(certpath) = &entry.certpath {
            vars.insert("certpath".to_string(), certpath.clone());
        }
        let timeout = Duration::from_secs(entry.timeout_seconds.unwrap_or(self.timeout_seconds));

        match (&entry.steps, &entry.prompt) {
            (Some(steps), Some(prompt)) => ActionProfile::new(
                action,
                entry.password.clone(),
                prompt,
                steps.clone(),
                vars,
                timeout,
            ),
            (Some(_), None) => Err(ResolveError::Invalid {
                action: action.to_string(),
                reason: "custom steps need a prompt".to_string(),
            }),
            (None, _) => match ActionProfile::from_preset(action, entry.password.clone(), vars, timeout) {
                Err(ResolveError::UnknownAction(_)) => Err(ResolveError::Invalid {
                    action: action.to_string(),
                    reason: "no steps configured and no built-in chain".to_string(),
                }),
                other => other,
            },
        }
    }

    /// Actions `user` may run, without secrets.
    pub fn summaries_for(&self, user: &UserEntry) -> Vec<ActionSummary> {
        self.actions
            .keys()
            .filter(|name| user.may_use(name))
            .filter_map(|name| self.profile(name).ok())
            .map(|profile| ActionSummary {
                name: profile.action().to_string(),
                steps: profile.template().steps().len(),
                interactive_steps: profile.template().interactive_steps(),
            })
            .collect()
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.timeout_seconds == 0 {
            return Err(ConfigError::Invalid("timeout_seconds must be positive".into()));
        }
        if self.prompt_window_seconds == 0 {
            return Err(ConfigError::Invalid(
                "prompt_window_seconds must be positive".into(),
            ));
        }
        for action in self.actions.keys() {
            self.profile(action)
                .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        }
        for (name, user) in &self.users {
            argon2::PasswordHash::new(&user.password_hash).map_err(|e| {
                ConfigError::Invalid(format!("user '{name}' has an invalid password_hash: {e}"))
            })?;
            if let Some(unknown) = user.actions.iter().find(|a| !self.has_action(a)) {
                return Err(ConfigError::Invalid(format!(
                    "user '{name}' is granted unknown action '{unknown}'"
                )));
            }
        }
        Ok(())
    }
}

/// Loads [`FileSettings`] from disk on every call.
#[derive(Debug, Clone)]
pub struct SettingsStore {
    path: Arc<PathBuf>,
}

impl SettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Arc::new(path.into()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn load(&self) -> Result<FileSettings, ConfigError> {
        FileSettings::load(&self.path).await
    }
}

#[async_trait]
impl ProfileResolver for SettingsStore {
    async fn resolve(&self, action: &str) -> Result<ActionProfile, ResolveError> {
        let settings = self.load().await.map_err(|e| ResolveError::Invalid {
            action: action.to_string(),
            reason: e.to_string(),
        })?;
        settings.profile(action)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HASH: &str = "$argon2id$v=19$m=19456,t=2,p=1$c2lnbmJveHNhbHQ$7uBz3Xk6cD2C2bIYu0vN2d3d7i5S8K1mJk8e2wqWv2c";

    fn yaml(body: &str) -> String {
        format!("users:\n  ci:\n    password_hash: \"{HASH}\"\n{body}")
    }

    #[test]
    fn test_preset_action_promotes_keypath_and_applies_override_timeout() {
        let settings = FileSettings::parse(&yaml(
            r#"actions:
  codesign:
    password: hunter2
    keypath: /etc/signbox/codesign.p12
    timeout_seconds: 120
"#,
        ))
        .unwrap();

        let profile = settings.profile("codesign").unwrap();
        assert_eq!(profile.timeout(), Duration::from_secs(120));
        assert_eq!(
            profile.vars().get("keypath").map(String::as_str),
            Some("/etc/signbox/codesign.p12")
        );
        assert_eq!(profile.credential().expose(), "hunter2");
        assert_eq!(profile.template().steps().len(), 3);
    }

    #[test]
    fn test_custom_steps_use_global_timeout() {
        let settings = FileSettings::parse(&yaml(
            r#"timeout_seconds: 30
actions:
  custom:
    password: pw
    prompt: "PIN:"
    steps:
      - command: "tool --in {input} --out {output}"
        requires_auth: true
"#,
        ))
        .unwrap();

        let profile = settings.profile("custom").unwrap();
        assert_eq!(profile.timeout(), Duration::from_secs(30));
        assert!(profile.prompt().is_match("PIN:"));
    }

    #[test]
    fn test_invalid_actions_are_rejected_at_load() {
        for body in [
            "actions:\n  mystery:\n    password: pw\n",
            "actions:\n  custom:\n    password: pw\n    steps:\n      - command: tool\n",
            "actions:\n  openssl:\n    password: pw\n",
            "actions:\n  gpg:\n    password: pw\n    timeout_seconds: 0\n",
        ] {
            let err = FileSettings::parse(&yaml(body)).unwrap_err();
            assert!(matches!(err, ConfigError::Invalid(_)), "{body}: {err}");
        }
    }

    #[test]
    fn test_unknown_keys_and_bad_hashes_are_rejected() {
        assert!(matches!(
            FileSettings::parse("timeout: 5\n"),
            Err(ConfigError::Parse(_))
        ));
        assert!(matches!(
            FileSettings::parse("users:\n  ci:\n    password_hash: plain\n"),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_user_grants_filter_summaries() {
        let settings = FileSettings::parse(&format!(
            r#"users:
  ci:
    password_hash: "{HASH}"
    actions: [gpg]
  admin:
    password_hash: "{HASH}"
actions:
  gpg:
    password: a
  codesign:
    password: b
    keypath: /k.p12
"#
        ))
        .unwrap();

        let ci = settings.user("ci").unwrap();
        let names: Vec<_> = settings
            .summaries_for(ci)
            .into_iter()
            .map(|s| s.name)
            .collect();
        assert_eq!(names, vec!["gpg"]);
        assert!(!ci.may_use("codesign"));

        let admin = settings.summaries_for(settings.user("admin").unwrap());
        assert_eq!(admin.len(), 2);
        let codesign = admin.iter().find(|s| s.name == "codesign").unwrap();
        assert_eq!(codesign.interactive_steps, 1);
    }

    #[tokio::test]
    async fn test_store_rereads_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yml");
        std::fs::write(&path, yaml("actions:\n  gpg:\n    password: old\n")).unwrap();
        let store = SettingsStore::new(&path);

        let before = store.resolve("gpg").await.unwrap();
        std::fs::write(&path, yaml("actions:\n  gpg:\n    password: new\n")).unwrap();
        let after = store.resolve("gpg").await.unwrap();

        assert_eq!(before.credential().expose(), "old");
        assert_eq!(after.credential().expose(), "new");
        assert!(matches!(
            store.resolve("openssl").await,
            Err(ResolveError::UnknownAction(_))
        ));
    }
}
