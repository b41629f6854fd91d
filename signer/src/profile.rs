//! Action profiles and the seam through which they are resolved.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use shared_types::StepTemplate;

use crate::chain::{ChainTemplate, TemplateError};
use crate::credential::Credential;

#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("unknown action '{0}'")]
    UnknownAction(String),

    #[error("action '{action}' is misconfigured: {reason}")]
    Invalid { action: String, reason: String },
}

impl ResolveError {
    fn invalid(action: &str, reason: impl std::fmt::Display) -> Self {
        ResolveError::Invalid {
            action: action.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Everything needed to run one action. Read-only once built.
#[derive(Debug, Clone)]
pub struct ActionProfile {
    action: String,
    credential: Credential,
    prompt: Regex,
    template: ChainTemplate,
    vars: BTreeMap<String, String>,
    timeout: Duration,
}

impl ActionProfile {
    /// Build and validate a profile. `prompt_pattern` is a regular expression.
    pub fn new(
        action: impl Into<String>,
        credential: Credential,
        prompt_pattern: &str,
        steps: Vec<StepTemplate>,
        vars: BTreeMap<String, String>,
        timeout: Duration,
    ) -> Result<Self, ResolveError> {
        let action = action.into();
        let prompt = Regex::new(prompt_pattern)
            .map_err(|e| ResolveError::invalid(&action, format!("bad prompt pattern: {e}")))?;
        let template = ChainTemplate::new(steps)
            .and_then(|t| t.validate(&vars).map(|()| t))
            .map_err(|e: TemplateError| ResolveError::invalid(&action, e))?;
        if timeout.is_zero() {
            return Err(ResolveError::invalid(&action, "timeout must be positive"));
        }
        Ok(Self {
            action,
            credential,
            prompt,
            template,
            vars,
            timeout,
        })
    }

    /// Profile for a well-known action, with `vars` layered over the preset's
    /// defaults.
    pub fn from_preset(
        action: &str,
        credential: Credential,
        vars: BTreeMap<String, String>,
        timeout: Duration,
    ) -> Result<Self, ResolveError> {
        let preset = preset(action).ok_or_else(|| ResolveError::UnknownAction(action.to_string()))?;
        let mut merged = preset.default_vars;
        merged.extend(vars);
        Self::new(action, credential, preset.prompt, preset.steps, merged, timeout)
    }

    pub fn action(&self) -> &str {
        &self.action
    }

    pub fn credential(&self) -> &Credential {
        &self.credential
    }

    pub fn prompt(&self) -> &Regex {
        &self.prompt
    }

    pub fn template(&self) -> &ChainTemplate {
        &self.template
    }

    pub fn vars(&self) -> &BTreeMap<String, String> {
        &self.vars
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

/// Source of action profiles, consulted once per request.
#[async_trait]
pub trait ProfileResolver: Send + Sync {
    async fn resolve(&self, action: &str) -> Result<ActionProfile, ResolveError>;
}

/// Fixed in-memory profiles.
#[derive(Debug, Clone, Default)]
pub struct StaticProfiles {
    profiles: HashMap<String, ActionProfile>,
}

impl StaticProfiles {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, profile: ActionProfile) -> Self {
        self.insert(profile);
        self
    }

    pub fn insert(&mut self, profile: ActionProfile) {
        self.profiles.insert(profile.action.clone(), profile);
    }
}

#[async_trait]
impl ProfileResolver for StaticProfiles {
    async fn resolve(&self, action: &str) -> Result<ActionProfile, ResolveError> {
        self.profiles
            .get(action)
            .cloned()
            .ok_or_else(|| ResolveError::UnknownAction(action.to_string()))
    }
}

// ============================================================================
// Well-known actions
// ============================================================================

/// Built-in prompt and chain for a common signing tool.
#[derive(Debug, Clone)]
pub struct Preset {
    pub prompt: &'static str,
    pub steps: Vec<StepTemplate>,
    pub default_vars: BTreeMap<String, String>,
}

pub const PRESET_ACTIONS: &[&str] = &["gpg", "openssl", "codesign"];

pub fn preset(action: &str) -> Option<Preset> {
    match action {
        "gpg" => Some(Preset {
            prompt: "Enter passphrase:",
            steps: vec![StepTemplate::new(
                "gpg --pinentry-mode loopback --armor --output {output} --detach-sig {input}",
                true,
            )],
            default_vars: BTreeMap::new(),
        }),
        "openssl" => Some(Preset {
            prompt: "Enter pass phrase for (.*):",
            steps: vec![StepTemplate::new(
                "openssl dgst -sha256 -sign {keypath} -out {output} {input}",
                true,
            )],
            default_vars: BTreeMap::new(),
        }),
        // Strip any existing signature, sign, then timestamp in a separate pass.
        "codesign" => Some(Preset {
            prompt: "Password:",
            steps: vec![
                StepTemplate::new(
                    "osslsigncode remove-signature -in {input} -out {tmp:unsigned} 2>/dev/null || cp {input} {tmp:unsigned}",
                    false,
                ),
                StepTemplate::new(
                    "osslsigncode sign -askpass -pkcs12 {keypath} -h sha256 -in {tmp:unsigned} -out {tmp:signed}",
                    true,
                ),
                StepTemplate::new(
                    "osslsigncode add -t {timestamp_url} -in {tmp:signed} -out {output}",
                    false,
                ),
            ],
            default_vars: BTreeMap::from([(
                "timestamp_url".to_string(),
                "http://timestamp.digicert.com".to_string(),
            )]),
        }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keypath() -> BTreeMap<String, String> {
        BTreeMap::from([("keypath".to_string(), "/etc/signbox/key".to_string())])
    }

    #[test]
    fn test_codesign_preset_is_three_steps_with_auth_in_the_middle() {
        let profile = ActionProfile::from_preset(
            "codesign",
            Credential::new("pw"),
            keypath(),
            Duration::from_secs(30),
        )
        .unwrap();

        let auth: Vec<bool> = profile
            .template()
            .steps()
            .iter()
            .map(|s| s.requires_auth)
            .collect();
        assert_eq!(auth, vec![false, true, false]);
        assert_eq!(
            profile.vars().get("timestamp_url").map(String::as_str),
            Some("http://timestamp.digicert.com")
        );
        assert!(profile.prompt().is_match("Password:"));
    }

    #[test]
    fn test_openssl_preset_requires_keypath() {
        let err = ActionProfile::from_preset(
            "openssl",
            Credential::new("pw"),
            BTreeMap::new(),
            Duration::from_secs(30),
        )
        .unwrap_err();
        assert!(matches!(err, ResolveError::Invalid { .. }), "{err}");
    }

    #[test]
    fn test_openssl_prompt_matches_key_path_suffix() {
        let preset = preset("openssl").unwrap();
        let re = Regex::new(preset.prompt).unwrap();
        assert!(re.is_match("Enter pass phrase for /etc/signbox/key.pem:"));
    }

    #[test]
    fn test_invalid_prompt_and_zero_timeout_are_rejected() {
        let steps = vec![StepTemplate::new("true", true)];
        assert!(ActionProfile::new(
            "x",
            Credential::default(),
            "(",
            steps.clone(),
            BTreeMap::new(),
            Duration::from_secs(1)
        )
        .is_err());
        assert!(ActionProfile::new(
            "x",
            Credential::default(),
            "ok",
            steps,
            BTreeMap::new(),
            Duration::ZERO
        )
        .is_err());
    }

    #[tokio::test]
    async fn test_static_profiles_resolve_known_and_reject_unknown() {
        let profiles = StaticProfiles::new().with(
            ActionProfile::from_preset(
                "gpg",
                Credential::new("pw"),
                BTreeMap::new(),
                Duration::from_secs(5),
            )
            .unwrap(),
        );

        assert_eq!(profiles.resolve("gpg").await.unwrap().action(), "gpg");
        assert!(matches!(
            profiles.resolve("nope").await,
            Err(ResolveError::UnknownAction(a)) if a == "nope"
        ));
    }
}
