use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use rebasebot::auth::GithubAuth;
use rebasebot::classify::TagPolicy;
use rebasebot::context::RunContext;
use rebasebot::error::Result;
use rebasebot::github::{Github, PullRequest};
use rebasebot::hooks::HookSet;
use rebasebot::remote::{GithubRepo, Provider, RemoteName, RemoteSpec};

/// Run a git command isolated from user and system configuration.
pub fn git(args: &[&str], dir: &Path) -> String {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .env("GIT_CONFIG_GLOBAL", "/dev/null")
        .env("GIT_CONFIG_SYSTEM", "/dev/null")
        .env("LANG", "C")
        .output()
        .expect("git should be runnable");
    assert!(
        output.status.success(),
        "git {args:?} failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).trim_end().to_string()
}

/// Three bare "remotes" plus a seed clone used to author their history.
pub struct Fixture {
    pub root: tempfile::TempDir,
    pub source_git: PathBuf,
    pub dest_git: PathBuf,
    pub rebase_git: PathBuf,
    pub seed: PathBuf,
}

pub const SOURCE_REF: &str = "master";
pub const DEST_REF: &str = "main";
pub const REBASE_REF: &str = "rebase-main";

impl Fixture {
    pub fn new() -> Fixture {
        let root = tempfile::tempdir().unwrap();
        let source_git = root.path().join("source.git");
        let dest_git = root.path().join("dest.git");
        let rebase_git = root.path().join("rebase.git");
        let seed = root.path().join("seed");

        for bare in [&source_git, &dest_git, &rebase_git] {
            std::fs::create_dir_all(bare).unwrap();
            git(&["init", "--bare"], bare);
        }

        std::fs::create_dir_all(&seed).unwrap();
        git(&["init", "-b", "work"], &seed);
        git(&["config", "user.name", "Seed Author"], &seed);
        git(&["config", "user.email", "seed@example.com"], &seed);

        Fixture {
            root,
            source_git,
            dest_git,
            rebase_git,
            seed,
        }
    }

    /// Author a commit in the seed clone; returns its sha.
    pub fn commit(&self, subject: &str, filename: &str, content: &str) -> String {
        std::fs::write(self.seed.join(filename), content).unwrap();
        git(&["add", filename], &self.seed);
        git(&["commit", "-m", subject], &self.seed);
        git(&["rev-parse", "HEAD"], &self.seed)
    }

    pub fn push_source(&self) {
        self.push(&self.source_git, SOURCE_REF);
    }

    pub fn push_dest(&self) {
        self.push(&self.dest_git, DEST_REF);
    }

    fn push(&self, bare: &Path, ref_name: &str) {
        let url = bare.display().to_string();
        let refspec = format!("+HEAD:refs/heads/{ref_name}");
        git(&["push", &url, &refspec], &self.seed);
    }

    /// Subjects on a branch of a bare remote, newest first.
    pub fn branch_subjects(&self, bare: &Path, ref_name: &str) -> Vec<String> {
        let dir = bare.to_str().unwrap();
        let output = Command::new("git")
            .args(["-C", dir, "log", "--format=%s", ref_name])
            .env("GIT_CONFIG_GLOBAL", "/dev/null")
            .env("GIT_CONFIG_SYSTEM", "/dev/null")
            .output()
            .unwrap();
        assert!(
            output.status.success(),
            "git log {ref_name} in {dir} failed: {}",
            String::from_utf8_lossy(&output.stderr)
        );
        String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(|line| line.to_string())
            .collect()
    }

    pub fn branch_exists(&self, bare: &Path, ref_name: &str) -> bool {
        let dir = bare.to_str().unwrap();
        Command::new("git")
            .args([
                "-C",
                dir,
                "show-ref",
                "--quiet",
                "--verify",
                &format!("refs/heads/{ref_name}"),
            ])
            .status()
            .unwrap()
            .success()
    }

    pub fn branch_sha(&self, bare: &Path, ref_name: &str) -> String {
        let dir = bare.to_str().unwrap();
        let output = Command::new("git")
            .args(["-C", dir, "rev-parse", &format!("refs/heads/{ref_name}")])
            .output()
            .unwrap();
        assert!(output.status.success());
        String::from_utf8_lossy(&output.stdout).trim().to_string()
    }

    pub fn source_url(&self) -> String {
        self.source_git.display().to_string()
    }

    /// A context wired to the three local remotes. Dest and rebase get
    /// github coordinates so the PR phases run, while their file urls
    /// keep every git operation local.
    pub fn context(&self) -> RunContext {
        RunContext {
            source: RemoteSpec {
                name: RemoteName::Source,
                url: self.source_url(),
                ref_name: SOURCE_REF.to_string(),
                provider: Provider::Git,
                github: None,
            },
            dest: RemoteSpec {
                name: RemoteName::Dest,
                url: self.dest_git.display().to_string(),
                ref_name: DEST_REF.to_string(),
                provider: Provider::Github,
                github: Some(GithubRepo {
                    owner: "downstream".to_string(),
                    name: "fork".to_string(),
                }),
            },
            rebase: RemoteSpec {
                name: RemoteName::Rebase,
                url: self.rebase_git.display().to_string(),
                ref_name: REBASE_REF.to_string(),
                provider: Provider::Github,
                github: Some(GithubRepo {
                    owner: "bot".to_string(),
                    name: "fork".to_string(),
                }),
            },
            working_dir: self.root.path().join("workdir"),
            git_username: Some("Rebase Bot".to_string()),
            git_email: Some("bot@example.com".to_string()),
            tag_policy: TagPolicy::None,
            excluded_commits: Vec::new(),
            hooks: HookSet::default(),
            auth: Arc::new(GithubAuth::UserToken {
                token: "test-token".to_string(),
            }),
            dry_run: false,
            always_run_hooks: false,
            art_title_filter: None,
            hook_timeout: Duration::from_secs(30),
            network_timeout: Duration::from_secs(60),
        }
    }

    /// Drop an executable hook script into the fixture root.
    pub fn hook_script(&self, name: &str, body: &str) -> PathBuf {
        let path = self.root.path().join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        }
        path
    }
}

/// In-memory provider double recording every mutation.
#[derive(Default)]
pub struct MockGithub {
    pub open_prs: Mutex<Vec<PullRequest>>,
    pub created: Mutex<Vec<PullRequest>>,
    pub updated: Mutex<Vec<(u64, Option<String>, String)>>,
    next_number: AtomicU64,
}

impl MockGithub {
    pub fn new() -> MockGithub {
        MockGithub {
            next_number: AtomicU64::new(100),
            ..MockGithub::default()
        }
    }

    pub fn with_open_pr(self, pr: PullRequest) -> MockGithub {
        self.open_prs.lock().unwrap().push(pr);
        self
    }

    pub fn mutation_count(&self) -> usize {
        self.created.lock().unwrap().len() + self.updated.lock().unwrap().len()
    }
}

/// A plausible open PR from the rebase branch into dest.
pub fn open_pr(number: u64, title: &str, labels: &[&str]) -> PullRequest {
    PullRequest {
        number,
        title: title.to_string(),
        body: "old body".to_string(),
        head_ref: REBASE_REF.to_string(),
        head_sha: "0".repeat(40),
        base_ref: DEST_REF.to_string(),
        labels: labels.iter().map(|label| label.to_string()).collect(),
        state: "open".to_string(),
        html_url: format!("https://github.com/downstream/fork/pull/{number}"),
    }
}

#[async_trait]
impl Github for MockGithub {
    async fn list_open_prs(
        &self,
        _repo: &GithubRepo,
        head: Option<&str>,
        base: Option<&str>,
    ) -> Result<Vec<PullRequest>> {
        let prs = self.open_prs.lock().unwrap();
        Ok(prs
            .iter()
            .filter(|pr| {
                let head_matches = head
                    .map(|head| head.split(':').next_back() == Some(pr.head_ref.as_str()))
                    .unwrap_or(true);
                let base_matches = base.map(|base| base == pr.base_ref).unwrap_or(true);
                head_matches && base_matches
            })
            .cloned()
            .collect())
    }

    async fn create_pr(
        &self,
        _repo: &GithubRepo,
        title: &str,
        head: &str,
        base: &str,
        body: &str,
    ) -> Result<PullRequest> {
        let number = self.next_number.fetch_add(1, Ordering::SeqCst);
        let pr = PullRequest {
            number,
            title: title.to_string(),
            body: body.to_string(),
            head_ref: head.split(':').next_back().unwrap_or(head).to_string(),
            head_sha: String::new(),
            base_ref: base.to_string(),
            labels: Vec::new(),
            state: "open".to_string(),
            html_url: format!("https://github.com/downstream/fork/pull/{number}"),
        };
        self.created.lock().unwrap().push(pr.clone());
        Ok(pr)
    }

    async fn update_pr(
        &self,
        _repo: &GithubRepo,
        number: u64,
        title: Option<&str>,
        body: &str,
    ) -> Result<PullRequest> {
        self.updated
            .lock()
            .unwrap()
            .push((number, title.map(|t| t.to_string()), body.to_string()));

        let prs = self.open_prs.lock().unwrap();
        let mut pr = prs
            .iter()
            .find(|pr| pr.number == number)
            .cloned()
            .unwrap_or_else(|| open_pr(number, title.unwrap_or("updated"), &[]));
        if let Some(title) = title {
            pr.title = title.to_string();
        }
        pr.body = body.to_string();
        Ok(pr)
    }
}
