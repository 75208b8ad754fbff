use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use log::info;
use regex::Regex;

use crate::auth::GithubAuth;
use crate::classify::TagPolicy;
use crate::context::RunContext;
use crate::error::{Error, Result};
use crate::hooks::{self, HookOrigin, HookSet};
use crate::plan::validate_exclusions;
use crate::remote::{RemoteName, RemoteSpec};

const DEFAULT_NETWORK_TIMEOUT: Duration = Duration::from_secs(600);

/// Rebase a downstream fork onto its upstream and keep the resulting
/// pull request fresh.
#[derive(Parser, Debug)]
#[command(name = "rebasebot", version)]
pub struct Cli {
    /// Source (upstream) remote as <url>:<ref>.
    #[arg(long, value_name = "URL:REF", conflicts_with_all = ["source_repo", "source_ref_hook"])]
    pub source: Option<String>,

    /// GitHub repository (namespace/name) whose source ref is produced
    /// by the source-ref hook.
    #[arg(long, value_name = "NAMESPACE/NAME", requires = "source_ref_hook")]
    pub source_repo: Option<String>,

    /// Hook printing the source ref for --source-repo; local path or
    /// _BUILTIN_/<name>.
    #[arg(long, value_name = "SPEC", requires = "source_repo")]
    pub source_ref_hook: Option<String>,

    /// Destination (downstream) remote as <url>:<ref>; must be
    /// github-hosted.
    #[arg(long, value_name = "URL:REF")]
    pub dest: String,

    /// Intermediate remote holding the rebase branch as <url>:<ref>;
    /// must be github-hosted.
    #[arg(long, value_name = "URL:REF")]
    pub rebase: String,

    /// File containing a personal access token.
    #[arg(long, value_name = "PATH")]
    pub github_user_token: Option<PathBuf>,

    /// GitHub App private key for API calls.
    #[arg(long, value_name = "PATH")]
    pub github_app_key: Option<PathBuf>,

    #[arg(long, value_name = "ID")]
    pub github_app_id: Option<u64>,

    /// GitHub App private key used to mint clone/push tokens.
    #[arg(long, value_name = "PATH")]
    pub github_cloner_key: Option<PathBuf>,

    #[arg(long, value_name = "ID")]
    pub github_cloner_id: Option<u64>,

    /// Stop after the local rebase; push nothing, touch no PR.
    #[arg(long)]
    pub dry_run: bool,

    #[arg(long, value_name = "PATH", default_value = ".rebase")]
    pub working_dir: PathBuf,

    /// Shorthand for appending the bundled go-modules hook to
    /// --post-rebase-hook.
    #[arg(long)]
    pub update_go_modules: bool,

    #[arg(long, value_enum, default_value = "none")]
    pub tag_policy: TagPolicy,

    /// Sha prefixes (at least 4 hex characters) never replayed.
    #[arg(long, value_name = "SHA", num_args = 1..)]
    pub exclude_commits: Vec<String>,

    #[arg(long, value_name = "NAME")]
    pub git_username: Option<String>,

    #[arg(long, value_name = "EMAIL")]
    pub git_email: Option<String>,

    /// Run the pre- and post-rebase hook phases even when there is
    /// nothing to replay.
    #[arg(long)]
    pub always_run_hooks: bool,

    /// File containing a Slack incoming-webhook url.
    #[arg(long, value_name = "PATH")]
    pub slack_webhook: Option<PathBuf>,

    /// Regex over open source-repo PR titles enabling the ART fold-in
    /// phase.
    #[arg(long, value_name = "REGEX")]
    pub art_pr_title_filter: Option<String>,

    /// Per-hook timeout in seconds.
    #[arg(long, value_name = "SECONDS", default_value_t = hooks::DEFAULT_HOOK_TIMEOUT.as_secs())]
    pub hook_timeout: u64,

    #[arg(long, value_name = "SPEC")]
    pub pre_rebase_hook: Vec<String>,

    #[arg(long, value_name = "SPEC")]
    pub pre_carry_commit_hook: Vec<String>,

    #[arg(long, value_name = "SPEC")]
    pub post_rebase_hook: Vec<String>,

    #[arg(long, value_name = "SPEC")]
    pub pre_push_rebase_branch_hook: Vec<String>,

    #[arg(long, value_name = "SPEC")]
    pub pre_create_pr_hook: Vec<String>,
}

fn parse_hook_list(specs: &[String]) -> Result<Vec<HookOrigin>> {
    specs.iter().map(|spec| HookOrigin::parse(spec)).collect()
}

fn build_auth(cli: &Cli) -> Result<Arc<GithubAuth>> {
    let any_app = cli.github_app_key.is_some()
        || cli.github_app_id.is_some()
        || cli.github_cloner_key.is_some()
        || cli.github_cloner_id.is_some();

    if let Some(token_path) = &cli.github_user_token {
        if any_app {
            return Err(Error::config(
                "--github-user-token and the --github-app-* flags are mutually exclusive",
            ));
        }
        return Ok(Arc::new(GithubAuth::from_token_file(token_path)?));
    }

    match (
        &cli.github_app_key,
        cli.github_app_id,
        &cli.github_cloner_key,
        cli.github_cloner_id,
    ) {
        (Some(app_key), Some(app_id), Some(cloner_key), Some(cloner_id)) => Ok(Arc::new(
            GithubAuth::from_app_keys(app_id, app_key, cloner_id, cloner_key)?,
        )),
        _ if any_app => Err(Error::config(
            "--github-app-key, --github-app-id, --github-cloner-key and --github-cloner-id must be given together",
        )),
        _ => Err(Error::config(
            "either --github-user-token or the --github-app-* flags are required",
        )),
    }
}

/// Resolve the source remote, running the source-ref hook when the ref
/// is dynamic.
async fn build_source(cli: &Cli, hook_timeout: Duration) -> Result<RemoteSpec> {
    match (&cli.source, &cli.source_repo) {
        (Some(spec), None) => RemoteSpec::parse(RemoteName::Source, spec),
        (None, Some(source_repo)) => {
            let hook_spec = cli.source_ref_hook.as_ref().ok_or_else(|| {
                Error::config("--source-repo requires --source-ref-hook".to_string())
            })?;
            let origin = HookOrigin::parse(hook_spec)?;
            let ref_name = hooks::run_source_ref_hook(&origin, source_repo, hook_timeout).await?;
            info!("Source ref hook resolved {source_repo} to {ref_name:?}");
            RemoteSpec::for_source_repo(source_repo, ref_name)
        }
        (Some(_), Some(_)) => Err(Error::config(
            "--source and --source-repo are mutually exclusive".to_string(),
        )),
        (None, None) => Err(Error::config(
            "one of --source or --source-repo is required".to_string(),
        )),
    }
}

/// Turn parsed arguments into the immutable per-run context.
pub async fn build_run_context(cli: Cli) -> Result<RunContext> {
    let auth = build_auth(&cli)?;
    let hook_timeout = Duration::from_secs(cli.hook_timeout);

    let source = build_source(&cli, hook_timeout).await?;
    let dest = RemoteSpec::parse(RemoteName::Dest, &cli.dest)?;
    let rebase = RemoteSpec::parse(RemoteName::Rebase, &cli.rebase)?;

    let excluded_commits = validate_exclusions(&cli.exclude_commits)?;

    let mut post_rebase = parse_hook_list(&cli.post_rebase_hook)?;
    if cli.update_go_modules {
        post_rebase.push(HookOrigin::Builtin("update-go-modules".to_string()));
    }

    let hooks = HookSet {
        pre_rebase: parse_hook_list(&cli.pre_rebase_hook)?,
        pre_carry_commit: parse_hook_list(&cli.pre_carry_commit_hook)?,
        post_rebase,
        pre_push_rebase_branch: parse_hook_list(&cli.pre_push_rebase_branch_hook)?,
        pre_create_pr: parse_hook_list(&cli.pre_create_pr_hook)?,
    };

    let art_title_filter = cli
        .art_pr_title_filter
        .as_deref()
        .map(Regex::new)
        .transpose()
        .map_err(|err| Error::config(format!("invalid --art-pr-title-filter: {err}")))?;

    Ok(RunContext {
        source,
        dest,
        rebase,
        working_dir: cli.working_dir,
        git_username: cli.git_username,
        git_email: cli.git_email,
        tag_policy: cli.tag_policy,
        excluded_commits,
        hooks,
        auth,
        dry_run: cli.dry_run,
        always_run_hooks: cli.always_run_hooks,
        art_title_filter,
        hook_timeout,
        network_timeout: DEFAULT_NETWORK_TIMEOUT,
    })
}
