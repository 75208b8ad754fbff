use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::{debug, info};

use crate::error::{Error, Result};
use crate::git::repository::GitRepo;
use crate::remote::RemoteName;

pub const DEFAULT_HOOK_TIMEOUT: Duration = Duration::from_secs(600);

/// Environment variable names whose values never reach hook processes.
const SCRUBBED_EXACT: &[&str] = &["GITHUB_TOKEN", "GH_TOKEN"];
const SCRUBBED_SUFFIXES: &[&str] = &["_TOKEN", "_SECRET", "_PASSWORD", "_PASSPHRASE"];

/// The named points of the run at which user hooks execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookPhase {
    PreRebase,
    PreCarryCommit,
    PostRebase,
    PrePushRebaseBranch,
    PreCreatePr,
}

impl HookPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            HookPhase::PreRebase => "pre-rebase",
            HookPhase::PreCarryCommit => "pre-carry-commit",
            HookPhase::PostRebase => "post-rebase",
            HookPhase::PrePushRebaseBranch => "pre-push-rebase-branch",
            HookPhase::PreCreatePr => "pre-create-pr",
        }
    }
}

/// Where a hook script in a `git:` spec comes from: one of the three
/// configured remotes, or an arbitrary url fetched on demand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GitHookSource {
    Remote(RemoteName),
    Url(String),
}

/// A hook origin as written on the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookOrigin {
    Local(PathBuf),
    Builtin(String),
    Git {
        source: GitHookSource,
        ref_name: String,
        path: String,
    },
}

impl HookOrigin {
    /// Grammar: `_BUILTIN_/<path>` | `git:<remote>/<ref>:<path>` |
    /// `git:<url>/<ref>:<path>` | `<filesystem-path>`. In the `git:`
    /// forms the final colon splits off the path and the final slash
    /// before it splits off the ref.
    pub fn parse(spec: &str) -> Result<HookOrigin> {
        if let Some(rest) = spec.strip_prefix("_BUILTIN_/") {
            if rest.is_empty() {
                return Err(Error::config(format!("empty builtin hook path in {spec:?}")));
            }
            return Ok(HookOrigin::Builtin(rest.to_string()));
        }

        if let Some(rest) = spec.strip_prefix("git:") {
            let (head, path) = rest.rsplit_once(':').ok_or_else(|| {
                Error::config(format!(
                    "git hook spec {spec:?} must look like git:<remote-or-url>/<ref>:<path>"
                ))
            })?;
            let (source, ref_name) = head.rsplit_once('/').ok_or_else(|| {
                Error::config(format!(
                    "git hook spec {spec:?} must look like git:<remote-or-url>/<ref>:<path>"
                ))
            })?;
            if ref_name.is_empty() || path.is_empty() {
                return Err(Error::config(format!("malformed git hook spec {spec:?}")));
            }

            let source = match RemoteName::from_name(source) {
                Some(remote) => GitHookSource::Remote(remote),
                None => GitHookSource::Url(source.to_string()),
            };
            return Ok(HookOrigin::Git {
                source,
                ref_name: ref_name.to_string(),
                path: path.to_string(),
            });
        }

        Ok(HookOrigin::Local(PathBuf::from(spec)))
    }

    /// Stable display name used in logs and error reports.
    pub fn display(&self) -> String {
        match self {
            HookOrigin::Local(path) => path.display().to_string(),
            HookOrigin::Builtin(name) => format!("_BUILTIN_/{name}"),
            HookOrigin::Git {
                source,
                ref_name,
                path,
            } => match source {
                GitHookSource::Remote(remote) => {
                    format!("git:{}/{ref_name}:{path}", remote.as_str())
                }
                GitHookSource::Url(url) => format!("git:{url}/{ref_name}:{path}"),
            },
        }
    }
}

/// The configured hooks, per phase, in configuration order.
#[derive(Debug, Clone, Default)]
pub struct HookSet {
    pub pre_rebase: Vec<HookOrigin>,
    pub pre_carry_commit: Vec<HookOrigin>,
    pub post_rebase: Vec<HookOrigin>,
    pub pre_push_rebase_branch: Vec<HookOrigin>,
    pub pre_create_pr: Vec<HookOrigin>,
}

impl HookSet {
    pub fn for_phase(&self, phase: HookPhase) -> &[HookOrigin] {
        match phase {
            HookPhase::PreRebase => &self.pre_rebase,
            HookPhase::PreCarryCommit => &self.pre_carry_commit,
            HookPhase::PostRebase => &self.post_rebase,
            HookPhase::PrePushRebaseBranch => &self.pre_push_rebase_branch,
            HookPhase::PreCreatePr => &self.pre_create_pr,
        }
    }
}

/// Locates the bundled hook scripts. Overridable for packaging layouts
/// where the scripts do not sit next to the binary.
pub fn builtin_hooks_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("REBASEBOT_BUILTIN_HOOKS_DIR") {
        return PathBuf::from(dir);
    }
    if let Ok(exe) = std::env::current_exe() {
        if let Some(parent) = exe.parent() {
            let candidate = parent.join("builtin-hooks");
            if candidate.is_dir() {
                return candidate;
            }
        }
    }
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("builtin-hooks")
}

/// Find `name` under the builtin tree: exact relative path first, then a
/// recursive search so a bare script name resolves from any subdirectory.
fn find_builtin(name: &str) -> Result<PathBuf> {
    let root = builtin_hooks_dir();
    let direct = root.join(name);
    if direct.is_file() {
        return Ok(direct);
    }

    let mut stack = vec![root.clone()];
    while let Some(dir) = stack.pop() {
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(_) => continue,
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
            } else if path.ends_with(name) {
                return Ok(path);
            }
        }
    }

    Err(Error::config(format!(
        "builtin hook {name:?} not found under {}",
        root.display()
    )))
}

/// Resolves hook origins to executable paths and runs them with the
/// documented environment. Resolution results are cached for the run.
pub struct HookRunner {
    base_env: Vec<(String, String)>,
    timeout: Duration,
    cache: HashMap<String, PathBuf>,
}

impl HookRunner {
    pub fn new(base_env: Vec<(String, String)>, timeout: Duration) -> HookRunner {
        HookRunner {
            base_env,
            timeout,
            cache: HashMap::new(),
        }
    }

    /// Run every hook configured for `phase`, in configuration order.
    /// The first failure aborts the phase.
    pub async fn run_phase(
        &mut self,
        phase: HookPhase,
        origins: &[HookOrigin],
        repo: &GitRepo,
        extra_env: &[(String, String)],
    ) -> Result<()> {
        for origin in origins {
            info!("Running {} hook {}", phase.as_str(), origin.display());
            let script = self.resolve(origin, Some(repo)).await?;
            run_script(
                &script,
                origin.display(),
                repo.workdir(),
                &self.base_env,
                extra_env,
                self.timeout,
            )
            .await?;
        }
        Ok(())
    }

    async fn resolve(&mut self, origin: &HookOrigin, repo: Option<&GitRepo>) -> Result<PathBuf> {
        let key = origin.display();
        if let Some(path) = self.cache.get(&key) {
            return Ok(path.clone());
        }

        let path = match origin {
            HookOrigin::Local(path) => {
                let resolved = path
                    .canonicalize()
                    .map_err(|err| Error::config(format!("hook {}: {err}", path.display())))?;
                if !resolved.is_file() {
                    return Err(Error::config(format!(
                        "hook {} is not a file",
                        resolved.display()
                    )));
                }
                resolved
            }
            HookOrigin::Builtin(name) => find_builtin(name)?,
            HookOrigin::Git {
                source,
                ref_name,
                path,
            } => {
                let repo = repo.ok_or_else(|| {
                    Error::config(format!(
                        "hook {key} needs the workspace, which does not exist yet"
                    ))
                })?;
                self.materialize_git_hook(repo, source, ref_name, path)
                    .await?
            }
        };

        debug!("Hook {key} resolved to {}", path.display());
        self.cache.insert(key, path.clone());
        Ok(path)
    }

    /// Extract the single blob `<rev>:<path>` into the repository scratch
    /// directory and mark it executable.
    async fn materialize_git_hook(
        &self,
        repo: &GitRepo,
        source: &GitHookSource,
        ref_name: &str,
        path: &str,
    ) -> Result<PathBuf> {
        let content = match source {
            GitHookSource::Remote(remote) => {
                // Branch refs land under refs/remotes, tag refs under
                // refs/tags; try both namespaces.
                let remote_rev = format!("refs/remotes/{}/{ref_name}", remote.as_str());
                let tag_rev = format!("refs/tags/{ref_name}");
                repo.show_blob(&remote_rev, path)
                    .or_else(|_| repo.show_blob(&tag_rev, path))?
            }
            GitHookSource::Url(url) => {
                repo.fetch(url, ref_name, self.timeout).await?;
                repo.show_blob("FETCH_HEAD", path)?
            }
        };

        let file_name = Path::new(path)
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("hook");
        let target = repo
            .scratch_dir()?
            .join(format!("{}-{file_name}", self.cache.len()));
        std::fs::write(&target, content)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&target, std::fs::Permissions::from_mode(0o755))?;
        }

        Ok(target)
    }
}

/// Resolve and run the source-ref hook: its single stdout line becomes
/// the source ref. Runs before the workspace exists, so only local and
/// builtin origins are accepted.
pub async fn run_source_ref_hook(
    origin: &HookOrigin,
    source_repo: &str,
    timeout: Duration,
) -> Result<String> {
    let script = match origin {
        HookOrigin::Local(path) => path
            .canonicalize()
            .map_err(|err| Error::config(format!("source-ref hook {}: {err}", path.display())))?,
        HookOrigin::Builtin(name) => find_builtin(name)?,
        HookOrigin::Git { .. } => {
            return Err(Error::config(
                "the source-ref hook must be a local path or a builtin".to_string(),
            ))
        }
    };

    let cwd = std::env::current_dir()?;
    let env = vec![("REBASEBOT_SOURCE_REPO".to_string(), source_repo.to_string())];
    let stdout = capture_script(&script, origin.display(), &cwd, &env, &[], timeout).await?;

    let ref_name = stdout.lines().next().unwrap_or("").trim().to_string();
    if ref_name.is_empty() {
        return Err(Error::Hook {
            script: origin.display(),
            code: Some(0),
            stderr: "hook produced no ref on stdout".to_string(),
        });
    }
    Ok(ref_name)
}

async fn run_script(
    script: &Path,
    name: String,
    workdir: &Path,
    base_env: &[(String, String)],
    extra_env: &[(String, String)],
    timeout: Duration,
) -> Result<()> {
    capture_script(script, name, workdir, base_env, extra_env, timeout).await?;
    Ok(())
}

/// Execute one hook process: documented environment exported, inherited
/// credentials scrubbed, killed on timeout. Returns captured stdout.
async fn capture_script(
    script: &Path,
    name: String,
    workdir: &Path,
    base_env: &[(String, String)],
    extra_env: &[(String, String)],
    timeout: Duration,
) -> Result<String> {
    let mut command = tokio::process::Command::new(script);
    command
        .current_dir(workdir)
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        .kill_on_drop(true);

    for (key, _) in std::env::vars() {
        let scrub = SCRUBBED_EXACT.contains(&key.as_str())
            || SCRUBBED_SUFFIXES.iter().any(|suffix| key.ends_with(suffix));
        if scrub {
            command.env_remove(&key);
        }
    }
    for (key, value) in base_env.iter().chain(extra_env) {
        command.env(key, value);
    }

    let child = command.spawn()?;
    let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(output) => output?,
        Err(_) => {
            return Err(Error::HookTimeout {
                script: name,
                seconds: timeout.as_secs(),
            })
        }
    };

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).trim_end().to_string();

    for line in stdout.lines() {
        debug!("[{name}] {line}");
    }

    if !output.status.success() {
        return Err(Error::Hook {
            script: name,
            code: output.status.code(),
            stderr,
        });
    }
    if !stderr.is_empty() {
        debug!("[{name}] stderr: {stderr}");
    }
    Ok(stdout)
}
