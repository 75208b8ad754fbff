use log::info;
use regex::Regex;

use crate::context::RunContext;
use crate::error::Result;
use crate::git::workspace::Workspace;
use crate::github::Github;

/// Fold an open tooling-update PR from the source repository into the
/// rebase branch. Runs only when a title filter is configured and the
/// source is github-hosted; anything other than exactly one match is
/// skipped without error.
pub async fn pick_art_pr(
    ctx: &RunContext,
    workspace: &Workspace,
    filter: &Regex,
    github: &dyn Github,
) -> Result<()> {
    let source_repo = ctx.source.github_repo()?;
    let open_prs = github.list_open_prs(source_repo, None, None).await?;

    let mut matches = open_prs
        .iter()
        .filter(|pr| filter.is_match(&pr.title));

    let candidate = match (matches.next(), matches.next()) {
        (Some(pr), None) => pr,
        (None, _) => {
            info!("No open PR on {} matches the ART filter", source_repo.full_name());
            return Ok(());
        }
        (Some(_), Some(_)) => {
            info!(
                "More than one open PR on {} matches the ART filter; skipping",
                source_repo.full_name()
            );
            return Ok(());
        }
    };

    info!(
        "Folding in ART PR #{} ({:?})",
        candidate.number, candidate.title
    );

    let repo = &workspace.repo;
    let url = crate::git::workspace::network_url(ctx, &ctx.source).await?;
    let pr_ref = format!("refs/remotes/source/pr/{}", candidate.number);
    let refspec = format!("+refs/pull/{}/head:{pr_ref}", candidate.number);
    repo.fetch(&url, &refspec, ctx.network_timeout).await?;

    let pr_tip = repo.resolve(&pr_ref)?;
    let rebase_tip = repo.resolve("refs/heads/rebase")?;
    let base = repo.merge_base(pr_tip, rebase_tip)?;

    for oid in repo.commits_between(base, pr_tip)? {
        let commit = repo.inner().find_commit(oid)?;
        if commit.parent_count() > 1 {
            continue;
        }
        info!(
            "Cherry-picking ART commit {} {}",
            &oid.to_string()[..7],
            commit.summary().unwrap_or_default()
        );
        repo.cherry_pick(&oid.to_string())?;
    }

    Ok(())
}
