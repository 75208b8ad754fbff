use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use git2::{Oid, Repository};
use log::debug;

use crate::error::{Error, Result};

/// Local repository handle: `git2` for the plumbing libgit2 expresses
/// well (refs, revwalks, merge bases, tree lookups), the `git` CLI for
/// the porcelain the run drives (fetch, cherry-pick, push) and for
/// plumbing libgit2 has no equivalent of (`git cherry` patch-id
/// matching).
pub struct GitRepo {
    repo: Repository,
    workdir: PathBuf,
}

impl GitRepo {
    /// Open the working directory as a repository, initializing it on
    /// first use.
    pub fn open_or_init(path: &Path) -> Result<GitRepo> {
        let repo = match Repository::open(path) {
            Ok(repo) => repo,
            Err(_) => {
                std::fs::create_dir_all(path)?;
                Repository::init(path)?
            }
        };

        let workdir = repo
            .workdir()
            .ok_or_else(|| Error::config(format!("{} is a bare repository", path.display())))?
            .to_path_buf();

        Ok(GitRepo { repo, workdir })
    }

    pub fn inner(&self) -> &Repository {
        &self.repo
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// Per-run scratch space, kept inside `.git` so commits made by hooks
    /// never pick it up.
    pub fn scratch_dir(&self) -> Result<PathBuf> {
        let dir = self.repo.path().join("rebasebot");
        std::fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    pub fn ensure_remote(&self, name: &str, url: &str) -> Result<()> {
        match self.repo.find_remote(name) {
            Ok(remote) => {
                if remote.url() != Some(url) {
                    debug!("Updating remote {name} url to {url}");
                    self.repo.remote_set_url(name, url)?;
                }
            }
            Err(_) => {
                debug!("Adding remote {name} -> {url}");
                self.repo.remote(name, url)?;
            }
        }
        Ok(())
    }

    pub fn set_remote_url(&self, name: &str, url: &str) -> Result<()> {
        self.repo.remote_set_url(name, url)?;
        Ok(())
    }

    /// Committer identity, repository-local scope only.
    pub fn set_identity(&self, username: Option<&str>, email: Option<&str>) -> Result<()> {
        let mut config = self.repo.config()?;
        if let Some(username) = username {
            config.set_str("user.name", username)?;
        }
        if let Some(email) = email {
            config.set_str("user.email", email)?;
        }
        Ok(())
    }

    pub fn resolve(&self, rev: &str) -> Result<Oid> {
        let object = self.repo.revparse_single(rev)?;
        // Annotated tags peel to the commit they point at.
        Ok(object.peel_to_commit()?.id())
    }

    pub fn merge_base(&self, a: Oid, b: Oid) -> Result<Oid> {
        Ok(self.repo.merge_base(a, b)?)
    }

    /// Commits reachable from `tip` but not from `base`, topological
    /// order, oldest first.
    pub fn commits_between(&self, base: Oid, tip: Oid) -> Result<Vec<Oid>> {
        let mut revwalk = self.repo.revwalk()?;
        revwalk.push(tip)?;
        revwalk.hide(base)?;
        revwalk.set_sorting(git2::Sort::TOPOLOGICAL | git2::Sort::REVERSE)?;

        let mut commits = Vec::new();
        for oid in revwalk {
            commits.push(oid?);
        }
        Ok(commits)
    }

    pub fn is_ancestor(&self, ancestor: Oid, descendant: Oid) -> Result<bool> {
        if ancestor == descendant {
            return Ok(true);
        }
        Ok(self.repo.graph_descendant_of(descendant, ancestor)?)
    }

    /// Full shas in `upstream..tip` whose patch already exists in
    /// `upstream`, per `git cherry` patch-id matching (the `-`-marked
    /// lines).
    pub fn patch_equivalent_in(&self, upstream: &str, tip: &str) -> Result<HashSet<String>> {
        let output = self.run_git(&["cherry", upstream, tip])?;
        Ok(output
            .lines()
            .filter_map(|line| line.strip_prefix("- "))
            .map(|sha| sha.trim().to_string())
            .collect())
    }

    pub fn head_sha(&self) -> Result<String> {
        let head = self.repo.head()?.peel_to_commit()?;
        Ok(head.id().to_string())
    }

    pub fn trees_equal(&self, a: Oid, b: Oid) -> Result<bool> {
        let tree_a = self.repo.find_commit(a)?.tree_id();
        let tree_b = self.repo.find_commit(b)?.tree_id();
        Ok(tree_a == tree_b)
    }

    /// First-parent chain of subjects from `tip` down to (excluding)
    /// `stop`, newest first. Ends early if `stop` is never reached.
    pub fn first_parent_subjects(&self, tip: Oid, stop: Oid) -> Result<Vec<String>> {
        let mut subjects = Vec::new();
        let mut current = tip;
        while current != stop {
            let commit = self.repo.find_commit(current)?;
            subjects.push(commit.summary().unwrap_or_default().to_string());
            match commit.parent_id(0) {
                Ok(parent) => current = parent,
                Err(_) => break,
            }
        }
        Ok(subjects)
    }

    pub fn checkout_new_branch(&self, branch: &str, at: Oid) -> Result<()> {
        // Forced: a crashed previous run may have left the worktree dirty.
        self.run_git(&["checkout", "-f", "-B", branch, &at.to_string()])?;
        Ok(())
    }

    /// Cherry-pick one commit, preserving authorship and message. On any
    /// failure the in-progress pick is aborted before surfacing; a
    /// conflicted index reports the offending sha.
    pub fn cherry_pick(&self, sha: &str) -> Result<()> {
        let args = [
            "cherry-pick",
            "--allow-empty",
            "--keep-redundant-commits",
            sha,
        ];
        match self.run_git(&args) {
            Ok(_) => Ok(()),
            Err(err) => {
                let conflicted = self
                    .repo
                    .index()
                    .map(|index| index.has_conflicts())
                    .unwrap_or(false);

                if let Err(abort_err) = self.run_git(&["cherry-pick", "--abort"]) {
                    debug!("cherry-pick --abort after failed pick: {abort_err}");
                }

                if conflicted {
                    Err(Error::Conflict {
                        sha: sha.to_string(),
                    })
                } else {
                    Err(err)
                }
            }
        }
    }

    /// Blob content of `<rev>:<path>` without touching the worktree.
    pub fn show_blob(&self, rev: &str, path: &str) -> Result<Vec<u8>> {
        let spec = format!("{rev}:{path}");
        let output = self.git_command(&["show", &spec]).output()?;
        if !output.status.success() {
            return Err(git_cli_error(&["show", &spec], &output));
        }
        Ok(output.stdout)
    }

    /// `git ls-remote <remote> <ref>`: tells which namespace the ref
    /// lives in (heads vs tags). Returns `(sha, full ref name)`.
    pub async fn ls_remote(
        &self,
        remote: &str,
        ref_name: &str,
        timeout: Duration,
    ) -> Result<Option<(String, String)>> {
        let output = self
            .run_git_network(&["ls-remote", remote, ref_name], timeout)
            .await?;

        for line in output.lines() {
            let mut fields = line.split_whitespace();
            if let (Some(sha), Some(full_ref)) = (fields.next(), fields.next()) {
                if full_ref.ends_with("^{}") {
                    continue;
                }
                return Ok(Some((sha.to_string(), full_ref.to_string())));
            }
        }
        Ok(None)
    }

    pub async fn fetch(&self, remote: &str, refspec: &str, timeout: Duration) -> Result<()> {
        self.run_git_network(&["fetch", remote, refspec], timeout)
            .await?;
        Ok(())
    }

    pub async fn push_force(&self, remote: &str, refspec: &str, timeout: Duration) -> Result<()> {
        self.run_git_network(&["push", "--force", remote, refspec], timeout)
            .await?;
        Ok(())
    }

    fn git_command(&self, args: &[&str]) -> Command {
        let mut command = Command::new("git");
        command
            .args(args)
            .current_dir(&self.workdir)
            .env("LANG", "C")
            .env("GIT_TERMINAL_PROMPT", "0");
        command
    }

    pub fn run_git(&self, args: &[&str]) -> Result<String> {
        let output = self.git_command(args).output()?;
        if !output.status.success() {
            return Err(git_cli_error(args, &output));
        }
        Ok(String::from_utf8_lossy(&output.stdout)
            .trim_end()
            .to_string())
    }

    /// Network-facing git subprocess with an explicit timeout. The child
    /// is killed when the timeout fires.
    async fn run_git_network(&self, args: &[&str], timeout: Duration) -> Result<String> {
        let what = format!("git {}", args.join(" "));
        debug!("Running {what}");

        let mut command = tokio::process::Command::new("git");
        command
            .args(args)
            .current_dir(&self.workdir)
            .env("LANG", "C")
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);

        let child = command.spawn()?;
        let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(output) => output?,
            Err(_) => {
                return Err(Error::NetworkTimeout {
                    what,
                    seconds: timeout.as_secs(),
                })
            }
        };

        if !output.status.success() {
            return Err(Error::GitCli {
                args: args.join(" "),
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr)
                    .trim_end()
                    .to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout)
            .trim_end()
            .to_string())
    }
}

fn git_cli_error(args: &[&str], output: &std::process::Output) -> Error {
    Error::GitCli {
        args: args.join(" "),
        code: output.status.code(),
        stderr: String::from_utf8_lossy(&output.stderr)
            .trim_end()
            .to_string(),
    }
}
