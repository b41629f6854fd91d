//! Stub signing tools and helpers shared by the signer integration tests.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use sha2::{Digest, Sha256};
use shared_types::StepTemplate;
use signer::{ActionProfile, Credential, Signer, SignerOptions, StaticProfiles};

pub const SECRET: &str = "open sesame";
pub const PROMPT: &str = "Enter passphrase:";

/// Temp dir holding stub tools, recordings and the signer's workspace root.
pub struct Harness {
    pub dir: tempfile::TempDir,
}

impl Harness {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        std::fs::create_dir(dir.path().join("work")).expect("failed to create work dir");
        Self { dir }
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    pub fn work_dir(&self) -> PathBuf {
        self.path("work")
    }

    fn script(&self, name: &str, body: &str) -> PathBuf {
        let path = self.path(name);
        std::fs::write(&path, body).expect("failed to write stub script");
        path
    }

    /// `signtool <in> <out> [record]`: prompts, checks the passphrase, writes
    /// `signed:<sha256 of in>`. With `record`, stores what it read.
    pub fn signtool(&self) -> PathBuf {
        self.script(
            "signtool.sh",
            &format!(
                r#"in="$1"; out="$2"; record="${{3:-}}"
read -r -s -p "{PROMPT} " pw
echo
if [ -n "$record" ]; then
  printf '%s' "$pw" > "$record"
  extra=""
  read -r -t 1 extra
  printf '%s' "$extra" > "$record.extra"
fi
if [ "$pw" != "{SECRET}" ]; then
  echo "bad passphrase" >&2
  exit 2
fi
printf 'signed:%s' "$(sha256sum "$in" | cut -d' ' -f1)" > "$out"
"#
            ),
        )
    }

    /// `line_recorder <record>`: waits briefly for a line on its terminal and records it.
    pub fn line_recorder(&self) -> PathBuf {
        self.script(
            "line_recorder.sh",
            r#"line=""
read -r -t 1 line
printf '%s' "$line" > "$1"
"#,
        )
    }

    /// Prints something that is not the prompt, then hangs.
    pub fn mute_tool(&self) -> PathBuf {
        self.script("mute.sh", "echo 'Passphrase please>'\nsleep 30\n")
    }

    /// Records its pid to `$1`, then hangs as that same pid.
    pub fn sleeper(&self) -> PathBuf {
        self.script("sleeper.sh", "echo $$ > \"$1\"\nexec sleep 30\n")
    }

    pub fn signer(&self, profile: ActionProfile, prompt_window: Duration) -> Signer {
        Signer::new(
            Arc::new(StaticProfiles::new().with(profile)),
            SignerOptions {
                workspace_root: self.work_dir(),
                prompt_window,
                ..SignerOptions::default()
            },
        )
    }

    /// Workspace files left behind in the signer's root.
    pub fn leftovers(&self) -> Vec<String> {
        std::fs::read_dir(self.work_dir())
            .expect("failed to list work dir")
            .filter_map(Result::ok)
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect()
    }
}

pub fn profile(
    action: &str,
    credential: &str,
    steps: Vec<StepTemplate>,
    vars: &[(&str, &PathBuf)],
    timeout: Duration,
) -> ActionProfile {
    let vars: BTreeMap<String, String> = vars
        .iter()
        .map(|(k, v)| (k.to_string(), v.display().to_string()))
        .collect();
    ActionProfile::new(
        action,
        Credential::new(credential),
        PROMPT,
        steps,
        vars,
        timeout,
    )
    .expect("invalid test profile")
}

pub fn expected_signature(input: &[u8]) -> Vec<u8> {
    format!("signed:{}", hex::encode(Sha256::digest(input))).into_bytes()
}

/// True while `pid` exists and is not a zombie.
pub fn process_running(pid: i32) -> bool {
    let Ok(stat) = std::fs::read_to_string(format!("/proc/{pid}/stat")) else {
        return false;
    };
    let state = stat
        .rsplit_once(") ")
        .and_then(|(_, rest)| rest.chars().next());
    !matches!(state, Some('Z') | Some('X') | None)
}

/// Poll until `pid` stops running or `within` elapses.
pub async fn wait_until_gone(pid: i32, within: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + within;
    while tokio::time::Instant::now() < deadline {
        if !process_running(pid) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    !process_running(pid)
}
