use log::{debug, info};

use crate::classify::{classify_subject, included_by_policy, CommitTag, TagPolicy};
use crate::error::{Error, Result};
use crate::git::workspace::Workspace;

/// A dest-only commit under consideration for the carry set.
#[derive(Debug, Clone)]
pub struct CommitDescriptor {
    pub sha: String,
    pub author: String,
    pub committer: String,
    pub subject: String,
    pub body: String,
    pub parents: Vec<String>,
    pub tag: CommitTag,
}

/// The ordered carry set to replay onto the source tip.
#[derive(Debug, Clone, Default)]
pub struct RebasePlan {
    pub carries: Vec<CommitDescriptor>,
    pub requires_push: bool,
}

impl RebasePlan {
    pub fn is_noop(&self) -> bool {
        self.carries.is_empty()
    }
}

/// Exclusion prefixes must be long enough not to match by accident.
pub fn validate_exclusions(excluded: &[String]) -> Result<Vec<String>> {
    let mut prefixes = Vec::with_capacity(excluded.len());
    for prefix in excluded {
        let prefix = prefix.to_ascii_lowercase();
        if prefix.len() < 4 || !prefix.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(Error::config(format!(
                "--exclude-commits entries must be hex sha prefixes of at least 4 characters, got {prefix:?}"
            )));
        }
        prefixes.push(prefix);
    }
    Ok(prefixes)
}

fn is_excluded(sha: &str, excluded: &[String]) -> bool {
    excluded.iter().any(|prefix| sha.starts_with(prefix))
}

/// Compute the carry set: commits reachable from dest but not from the
/// merge base with source, oldest first, filtered by tag policy, the
/// exclusion list, and containment in source.
pub fn build_plan(
    workspace: &Workspace,
    policy: TagPolicy,
    excluded: &[String],
) -> Result<RebasePlan> {
    let repo = &workspace.repo;

    let merge_base = repo.merge_base(workspace.dest_tip, workspace.source_tip)?;
    debug!("merge base of dest and source is {merge_base}");

    let candidates = repo.commits_between(merge_base, workspace.dest_tip)?;
    info!("{} dest-only commits since the merge base", candidates.len());

    // Patch-id equivalence against source, computed once for the range.
    let equivalent = repo.patch_equivalent_in(
        &workspace.source_rev,
        &workspace.dest_tip.to_string(),
    )?;

    let mut carries = Vec::new();
    for oid in candidates {
        let commit = repo.inner().find_commit(oid)?;
        let sha = oid.to_string();

        if commit.parent_count() > 1 {
            debug!("Skipping merge commit {sha}");
            continue;
        }

        let subject = commit.summary().unwrap_or_default().to_string();
        let tag = classify_subject(&subject);

        if !included_by_policy(&tag, policy) {
            info!("Leaving out {} ({subject:?}): tag policy", &sha[..7]);
            continue;
        }

        if is_excluded(&sha, excluded) {
            info!("Leaving out {} ({subject:?}): excluded on the command line", &sha[..7]);
            continue;
        }

        if equivalent.contains(&sha) || repo.is_ancestor(oid, workspace.source_tip)? {
            debug!("Leaving out {sha}: already present in source");
            continue;
        }

        let author = commit.author();
        let committer = commit.committer();
        carries.push(CommitDescriptor {
            sha,
            author: signature_line(&author),
            committer: signature_line(&committer),
            subject,
            body: commit.body().unwrap_or_default().to_string(),
            parents: commit.parent_ids().map(|id| id.to_string()).collect(),
            tag,
        });
    }

    let requires_push = !carries.is_empty();
    if requires_push {
        info!("Carry set has {} commits:", carries.len());
        for carry in &carries {
            info!("  {} {}", &carry.sha[..7], carry.subject);
        }
    } else {
        info!("Carry set is empty; source already contains every downstream commit");
    }

    Ok(RebasePlan {
        carries,
        requires_push,
    })
}

fn signature_line(signature: &git2::Signature<'_>) -> String {
    format!(
        "{} <{}>",
        signature.name().unwrap_or_default(),
        signature.email().unwrap_or_default()
    )
}
