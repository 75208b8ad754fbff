use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use regex::Regex;

use crate::auth::GithubAuth;
use crate::classify::TagPolicy;
use crate::hooks::HookSet;
use crate::remote::RemoteSpec;

/// Everything a run needs, assembled once after remote resolution and
/// immutable afterwards. Every phase receives it explicitly.
#[derive(Debug)]
pub struct RunContext {
    pub source: RemoteSpec,
    pub dest: RemoteSpec,
    pub rebase: RemoteSpec,
    pub working_dir: PathBuf,
    pub git_username: Option<String>,
    pub git_email: Option<String>,
    pub tag_policy: TagPolicy,
    /// Short sha prefixes (>= 4 hex chars) excluded from the carry set.
    pub excluded_commits: Vec<String>,
    pub hooks: HookSet,
    pub auth: Arc<GithubAuth>,
    pub dry_run: bool,
    pub always_run_hooks: bool,
    /// ART phase predicate; the phase is off when unset.
    pub art_title_filter: Option<Regex>,
    pub hook_timeout: Duration,
    pub network_timeout: Duration,
}

impl RunContext {
    /// Environment exported to every lifecycle hook.
    pub fn hook_env(&self, workdir: &Path) -> Vec<(String, String)> {
        vec![
            (
                "REBASEBOT_SOURCE".to_string(),
                self.source.ref_name.clone(),
            ),
            ("REBASEBOT_DEST".to_string(), self.dest.ref_name.clone()),
            (
                "REBASEBOT_REBASE".to_string(),
                self.rebase.ref_name.clone(),
            ),
            (
                "REBASEBOT_WORKING_DIR".to_string(),
                workdir.display().to_string(),
            ),
            (
                "REBASEBOT_GIT_USERNAME".to_string(),
                self.git_username.clone().unwrap_or_default(),
            ),
            (
                "REBASEBOT_GIT_EMAIL".to_string(),
                self.git_email.clone().unwrap_or_default(),
            ),
        ]
    }
}

/// How a run ended. Every variant exits 0; failures travel as errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// The carry set was empty and dest already matches the replay.
    NoChange,
    /// Local rebase finished; push and PR were skipped on request.
    DryRun,
    /// The matched PR carries the manual-override label; nothing touched.
    ManualOverride { number: u64 },
    PullRequestCreated { number: u64, url: String },
    PullRequestUpdated { number: u64, url: String },
    /// Remote branch and PR already matched the local replay.
    AlreadyUpToDate { number: u64, url: String },
}

impl RunOutcome {
    pub fn notification_text(&self, ctx: &RunContext) -> String {
        let span = format!(
            "{}:{} into {}:{}",
            ctx.source.url, ctx.source.ref_name, ctx.dest.url, ctx.dest.ref_name
        );
        match self {
            RunOutcome::NoChange => {
                format!("rebasebot: nothing to do merging {span}")
            }
            RunOutcome::DryRun => {
                format!("rebasebot: dry run of {span} finished; nothing pushed")
            }
            RunOutcome::ManualOverride { number } => format!(
                "rebasebot: PR #{number} carries the rebase/manual label; leaving {span} alone"
            ),
            RunOutcome::PullRequestCreated { number, url } => {
                format!("rebasebot: opened PR #{number} merging {span}: {url}")
            }
            RunOutcome::PullRequestUpdated { number, url } => {
                format!("rebasebot: refreshed PR #{number} merging {span}: {url}")
            }
            RunOutcome::AlreadyUpToDate { number, url } => {
                format!("rebasebot: PR #{number} already up to date for {span}: {url}")
            }
        }
    }
}
