use log::{info, warn};

use crate::art;
use crate::carry;
use crate::context::{RunContext, RunOutcome};
use crate::error::Result;
use crate::git::workspace;
use crate::github::Github;
use crate::hooks::HookRunner;
use crate::plan;
use crate::pr;
use crate::remote::Provider;

/// One complete run: workspace, plan, replay, optional ART fold-in,
/// push, PR reconciliation. Phases execute strictly in this order; a
/// failing phase aborts the run.
pub async fn run(
    ctx: &RunContext,
    dest_github: &dyn Github,
    source_github: Option<&dyn Github>,
) -> Result<RunOutcome> {
    let workspace = workspace::prepare(ctx).await?;

    let rebase_plan = plan::build_plan(&workspace, ctx.tag_policy, &ctx.excluded_commits)?;

    if rebase_plan.is_noop() && !ctx.always_run_hooks {
        info!("Nothing to replay and hooks not requested; finishing");
        return Ok(RunOutcome::NoChange);
    }

    let mut hooks = HookRunner::new(ctx.hook_env(workspace.repo.workdir()), ctx.hook_timeout);

    carry::execute(ctx, &workspace, &rebase_plan, &mut hooks).await?;

    if let Some(filter) = &ctx.art_title_filter {
        match (ctx.source.provider, source_github) {
            (Provider::Github, Some(source_github)) => {
                art::pick_art_pr(ctx, &workspace, filter, source_github).await?;
            }
            _ => warn!("ART filter configured but the source is not github-hosted; skipping"),
        }
    }

    pr::push_and_reconcile(ctx, &workspace, &rebase_plan, &mut hooks, dest_github).await
}
