use log::{info, warn};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::context::{RunContext, RunOutcome};
use crate::error::Result;
use crate::git::workspace::{self, Workspace};
use crate::github::{Github, PullRequest};
use crate::hooks::{HookPhase, HookRunner};
use crate::plan::RebasePlan;

/// A human may claim a PR by labelling it; the bot then leaves it alone
/// indefinitely.
pub const MANUAL_OVERRIDE_LABEL: &str = "rebase/manual";

/// Optional `TICKET-123: ` prefix humans prepend to the generated title.
static TICKET_PREFIX_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Z][A-Z0-9]+-\d+:\s").unwrap());

/// Shape of a title the bot generated, with or without a ticket prefix
/// already stripped.
static TITLE_TEMPLATE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^Merge .+ \([0-9a-f]{7}\) into .+$").unwrap());

pub fn generated_title(ctx: &RunContext, source_short_sha: &str) -> String {
    format!(
        "Merge {} ({}) into {}",
        ctx.source.url, source_short_sha, ctx.dest.ref_name
    )
}

pub fn generated_body(ctx: &RunContext, plan: &RebasePlan) -> String {
    let mut body = format!(
        "Automated rebase of {}:{} onto {}:{}.\n",
        ctx.dest.url, ctx.dest.ref_name, ctx.source.url, ctx.source.ref_name
    );
    if plan.carries.is_empty() {
        body.push_str("\nNo downstream commits were replayed.\n");
    } else {
        body.push_str("\nReplayed commits:\n");
        for carry in &plan.carries {
            body.push_str(&format!("- {} {}\n", &carry.sha[..7], carry.subject));
        }
    }
    body
}

/// Decide the new title for an existing PR. `None` means leave the title
/// alone: either it already matches, or a human replaced it with
/// something that is not the bot's template. A leading ticket prefix is
/// preserved and only the generated part behind it is refreshed.
pub fn reconcile_title(existing: &str, generated: &str) -> Option<String> {
    let (prefix, rest) = match TICKET_PREFIX_RE.find(existing) {
        Some(found) => existing.split_at(found.end()),
        None => ("", existing),
    };

    if !TITLE_TEMPLATE_RE.is_match(rest) {
        return None;
    }
    if rest == generated {
        return None;
    }
    Some(format!("{prefix}{generated}"))
}

/// Push the rebase branch and reconcile the PR on dest. Ordering
/// matters: the manual-override label is honored before anything is
/// pushed, and the push is skipped when the remote branch already holds
/// an equivalent replay.
pub async fn push_and_reconcile(
    ctx: &RunContext,
    workspace: &Workspace,
    plan: &RebasePlan,
    hooks: &mut HookRunner,
    github: &dyn Github,
) -> Result<RunOutcome> {
    let repo = &workspace.repo;
    let local_tip = repo.resolve("refs/heads/rebase")?;

    if repo.trees_equal(local_tip, workspace.dest_tip)? {
        info!("Rebase branch tree matches dest; nothing to push");
        return Ok(RunOutcome::NoChange);
    }

    if ctx.dry_run {
        info!(
            "Dry run: rebase branch is at {}; skipping push and PR reconciliation",
            &local_tip.to_string()[..7]
        );
        return Ok(RunOutcome::DryRun);
    }

    let dest_repo = ctx.dest.github_repo()?;
    let rebase_repo = ctx.rebase.github_repo()?;
    let head = format!("{}:{}", rebase_repo.owner, ctx.rebase.ref_name);

    let mut open_prs = github
        .list_open_prs(dest_repo, Some(&head), Some(&ctx.dest.ref_name))
        .await?;
    if open_prs.len() > 1 {
        warn!(
            "{} open PRs from {head} into {}; reconciling the first",
            open_prs.len(),
            ctx.dest.ref_name
        );
    }
    let existing = if open_prs.is_empty() {
        None
    } else {
        Some(open_prs.remove(0))
    };

    if let Some(pr) = &existing {
        if pr.labels.iter().any(|label| label == MANUAL_OVERRIDE_LABEL) {
            info!(
                "PR #{} carries the {MANUAL_OVERRIDE_LABEL} label; standing down",
                pr.number
            );
            return Ok(RunOutcome::ManualOverride { number: pr.number });
        }
    }

    let needs_push = !replay_already_pushed(workspace, local_tip)?;
    if needs_push {
        hooks
            .run_phase(
                HookPhase::PrePushRebaseBranch,
                ctx.hooks.for_phase(HookPhase::PrePushRebaseBranch),
                repo,
                &[],
            )
            .await?;

        info!(
            "Force-pushing rebase branch {} to {}:{}",
            &local_tip.to_string()[..7],
            ctx.rebase.url,
            ctx.rebase.ref_name
        );
        workspace::push_rebase_branch(ctx, repo).await?;
    } else {
        info!("Remote rebase branch already matches the local replay; not pushing");
    }

    let source_sha = workspace.source_tip.to_string();
    let title = generated_title(ctx, &source_sha[..7]);
    let body = generated_body(ctx, plan);

    match existing {
        Some(pr) => reconcile_existing(github, dest_repo, pr, &title, &body, needs_push).await,
        None => {
            hooks
                .run_phase(
                    HookPhase::PreCreatePr,
                    ctx.hooks.for_phase(HookPhase::PreCreatePr),
                    repo,
                    &[],
                )
                .await?;

            info!("Opening PR {head} -> {} ({title:?})", ctx.dest.ref_name);
            let pr = github
                .create_pr(dest_repo, &title, &head, &ctx.dest.ref_name, &body)
                .await?;
            Ok(RunOutcome::PullRequestCreated {
                number: pr.number,
                url: pr.html_url,
            })
        }
    }
}

async fn reconcile_existing(
    github: &dyn Github,
    dest_repo: &crate::remote::GithubRepo,
    pr: PullRequest,
    title: &str,
    body: &str,
    pushed: bool,
) -> Result<RunOutcome> {
    let new_title = reconcile_title(&pr.title, title);

    if !pushed && new_title.is_none() && pr.body == body {
        info!("PR #{} already reflects the replay; leaving it alone", pr.number);
        return Ok(RunOutcome::AlreadyUpToDate {
            number: pr.number,
            url: pr.html_url,
        });
    }

    match &new_title {
        Some(new_title) => info!("Updating PR #{} and retitling to {new_title:?}", pr.number),
        None => info!("Updating PR #{} body; title left as {:?}", pr.number, pr.title),
    }

    let updated = github
        .update_pr(dest_repo, pr.number, new_title.as_deref(), body)
        .await?;
    Ok(RunOutcome::PullRequestUpdated {
        number: updated.number,
        url: updated.html_url,
    })
}

/// The replay is already on the rebase remote when the trees match and
/// the first-parent subject chains down to the source tip agree. Commit
/// shas differ between runs (committer timestamps), so equality is
/// judged on content, not ids.
fn replay_already_pushed(workspace: &Workspace, local_tip: git2::Oid) -> Result<bool> {
    let remote_tip = match workspace.rebase_tip {
        Some(tip) => tip,
        None => return Ok(false),
    };

    let repo = &workspace.repo;
    if !repo.trees_equal(local_tip, remote_tip)? {
        return Ok(false);
    }

    let local_chain = repo.first_parent_subjects(local_tip, workspace.source_tip)?;
    let remote_chain = repo.first_parent_subjects(remote_tip, workspace.source_tip)?;
    Ok(local_chain == remote_chain)
}
