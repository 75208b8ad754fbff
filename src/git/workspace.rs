use git2::Oid;
use log::{debug, info};

use crate::context::RunContext;
use crate::error::{Error, Result};
use crate::git::repository::GitRepo;
use crate::remote::{Provider, RemoteSpec};

/// The workspace after setup: repository handle plus the tips fetched
/// from the three remotes.
pub struct Workspace {
    pub repo: GitRepo,
    /// Revision the source ref resolves to locally (a remote-tracking
    /// ref, or a tag ref when the source ref names a tag).
    pub source_rev: String,
    pub source_tip: Oid,
    pub dest_tip: Oid,
    /// Tip of the rebase branch on the rebase remote; absent on the
    /// first run.
    pub rebase_tip: Option<Oid>,
}

/// Initialize (or reuse) the working directory, configure the three
/// named remotes, and fetch their refs.
pub async fn prepare(ctx: &RunContext) -> Result<Workspace> {
    let repo = GitRepo::open_or_init(&ctx.working_dir)?;

    for remote in [&ctx.source, &ctx.dest, &ctx.rebase] {
        repo.ensure_remote(remote.name.as_str(), &remote.url)?;
    }
    repo.set_identity(ctx.git_username.as_deref(), ctx.git_email.as_deref())?;

    info!(
        "Fetching {}:{}, {}:{} and {}:{}",
        ctx.source.url,
        ctx.source.ref_name,
        ctx.dest.url,
        ctx.dest.ref_name,
        ctx.rebase.url,
        ctx.rebase.ref_name
    );

    let (source_rev, source_tip) = fetch_source(ctx, &repo).await?;
    let dest_tip = fetch_branch(ctx, &repo, &ctx.dest, true)
        .await?
        .ok_or_else(|| Error::RefNotFound {
            remote: ctx.dest.name.as_str().to_string(),
            ref_name: ctx.dest.ref_name.clone(),
        })?;
    let rebase_tip = fetch_branch(ctx, &repo, &ctx.rebase, false).await?;

    debug!("source tip {source_tip}, dest tip {dest_tip}, rebase tip {rebase_tip:?}");

    Ok(Workspace {
        repo,
        source_rev,
        source_tip,
        dest_tip,
        rebase_tip,
    })
}

/// Clone url carrying credentials for this single network operation.
/// Installation tokens expire, so the url is never written to the remote
/// configuration; it is passed straight to the git subprocess instead.
pub(crate) async fn network_url(ctx: &RunContext, remote: &RemoteSpec) -> Result<String> {
    match (&remote.provider, &remote.github) {
        (Provider::Github, Some(repo)) if remote.url.starts_with("https://") => {
            ctx.auth.authenticated_url(repo).await
        }
        _ => Ok(remote.url.clone()),
    }
}

/// The source ref may name a branch or a tag; `ls-remote` decides which
/// namespace it lives in, preferring a branch when both exist.
async fn fetch_source(ctx: &RunContext, repo: &GitRepo) -> Result<(String, Oid)> {
    let url = network_url(ctx, &ctx.source).await?;
    let ref_name = &ctx.source.ref_name;

    let head_pattern = format!("refs/heads/{ref_name}");
    let tag_pattern = format!("refs/tags/{ref_name}");

    let resolved = match repo
        .ls_remote(&url, &head_pattern, ctx.network_timeout)
        .await?
    {
        Some(found) => Some(found),
        None => {
            repo.ls_remote(&url, &tag_pattern, ctx.network_timeout)
                .await?
        }
    };

    let (_, full_ref) = resolved.ok_or_else(|| Error::RefNotFound {
        remote: ctx.source.name.as_str().to_string(),
        ref_name: ref_name.clone(),
    })?;

    let (refspec, local_rev) = if full_ref.starts_with("refs/tags/") {
        (
            format!("+refs/tags/{ref_name}:refs/tags/{ref_name}"),
            format!("refs/tags/{ref_name}"),
        )
    } else {
        (
            format!("+refs/heads/{ref_name}:refs/remotes/source/{ref_name}"),
            format!("refs/remotes/source/{ref_name}"),
        )
    };

    repo.fetch(&url, &refspec, ctx.network_timeout).await?;
    let tip = repo.resolve(&local_rev)?;
    Ok((local_rev, tip))
}

/// Fetch a branch ref into its remote-tracking ref. A missing ref is an
/// error when `required`, otherwise `None` (the rebase branch does not
/// exist before the first push).
async fn fetch_branch(
    ctx: &RunContext,
    repo: &GitRepo,
    remote: &RemoteSpec,
    required: bool,
) -> Result<Option<Oid>> {
    let url = network_url(ctx, remote).await?;
    let ref_name = &remote.ref_name;
    let name = remote.name.as_str();

    let pattern = format!("refs/heads/{ref_name}");
    if repo
        .ls_remote(&url, &pattern, ctx.network_timeout)
        .await?
        .is_none()
    {
        if required {
            return Err(Error::RefNotFound {
                remote: name.to_string(),
                ref_name: ref_name.clone(),
            });
        }
        debug!("{name}/{ref_name} does not exist yet");
        return Ok(None);
    }

    let refspec = format!("+refs/heads/{ref_name}:refs/remotes/{name}/{ref_name}");
    repo.fetch(&url, &refspec, ctx.network_timeout).await?;
    let tip = repo.resolve(&format!("refs/remotes/{name}/{ref_name}"))?;
    Ok(Some(tip))
}

/// Force-push the local rebase branch to the rebase remote with fresh
/// credentials.
pub async fn push_rebase_branch(ctx: &RunContext, repo: &GitRepo) -> Result<()> {
    let url = network_url(ctx, &ctx.rebase).await?;
    let refspec = format!("refs/heads/rebase:refs/heads/{}", ctx.rebase.ref_name);
    repo.push_force(&url, &refspec, ctx.network_timeout).await
}
