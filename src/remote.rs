use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{Error, Result};

/// `owner/name` coordinates of a github.com-hosted repository, parsed
/// out of its clone url.
static HTTPS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^https://github\.com/([^/]+)/([^/]+?)(?:\.git)?/?$").unwrap());
static SSH_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^git@github\.com:([^/]+)/([^/]+?)(?:\.git)?$").unwrap());

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GithubRepo {
    pub owner: String,
    pub name: String,
}

impl GithubRepo {
    pub fn from_url(url: &str) -> Option<GithubRepo> {
        let captures = HTTPS_RE.captures(url).or_else(|| SSH_RE.captures(url))?;
        Some(GithubRepo {
            owner: captures[1].to_string(),
            name: captures[2].to_string(),
        })
    }

    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    Git,
    Github,
}

/// One of the three configured remotes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteName {
    Source,
    Dest,
    Rebase,
}

impl RemoteName {
    pub fn as_str(self) -> &'static str {
        match self {
            RemoteName::Source => "source",
            RemoteName::Dest => "dest",
            RemoteName::Rebase => "rebase",
        }
    }

    pub fn from_name(name: &str) -> Option<RemoteName> {
        match name {
            "source" => Some(RemoteName::Source),
            "dest" => Some(RemoteName::Dest),
            "rebase" => Some(RemoteName::Rebase),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RemoteSpec {
    pub name: RemoteName,
    pub url: String,
    pub ref_name: String,
    pub provider: Provider,
    /// Present iff `provider == Github`.
    pub github: Option<GithubRepo>,
}

impl RemoteSpec {
    /// Parse a `<url>:<ref>` pair. Urls contain colons themselves, so the
    /// final colon is the separator.
    pub fn parse(name: RemoteName, spec: &str) -> Result<RemoteSpec> {
        let (url, ref_name) = spec.rsplit_once(':').ok_or_else(|| {
            Error::config(format!(
                "--{} must look like <url>:<ref>, got {spec:?}",
                name.as_str()
            ))
        })?;

        if url.is_empty() || ref_name.is_empty() || ref_name.starts_with('/') {
            return Err(Error::config(format!(
                "--{} must look like <url>:<ref>, got {spec:?}",
                name.as_str()
            )));
        }

        let github = GithubRepo::from_url(url);
        let provider = if github.is_some() {
            Provider::Github
        } else {
            Provider::Git
        };

        let remote = RemoteSpec {
            name,
            url: url.to_string(),
            ref_name: ref_name.to_string(),
            provider,
            github,
        };

        if matches!(name, RemoteName::Dest | RemoteName::Rebase) && remote.github.is_none() {
            return Err(Error::config(format!(
                "--{} must be hosted on github.com, got {url:?}",
                name.as_str()
            )));
        }

        Ok(remote)
    }

    /// Remote spec for `--source-repo`, whose ref is produced later by the
    /// source-ref hook.
    pub fn for_source_repo(full_name: &str, ref_name: String) -> Result<RemoteSpec> {
        let mut parts = full_name.splitn(2, '/');
        let (owner, repo_name) = match (parts.next(), parts.next()) {
            (Some(owner), Some(repo_name)) if !owner.is_empty() && !repo_name.is_empty() => {
                (owner, repo_name)
            }
            _ => {
                return Err(Error::config(format!(
                    "--source-repo must look like <namespace>/<name>, got {full_name:?}"
                )))
            }
        };

        Ok(RemoteSpec {
            name: RemoteName::Source,
            url: format!("https://github.com/{owner}/{repo_name}"),
            ref_name,
            provider: Provider::Github,
            github: Some(GithubRepo {
                owner: owner.to_string(),
                name: repo_name.to_string(),
            }),
        })
    }

    /// Repo coordinates, for remotes that are required to be github-hosted.
    pub fn github_repo(&self) -> Result<&GithubRepo> {
        self.github.as_ref().ok_or_else(|| {
            Error::config(format!(
                "remote {} is not hosted on github.com",
                self.name.as_str()
            ))
        })
    }
}
