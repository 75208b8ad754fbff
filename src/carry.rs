use log::info;

use crate::context::RunContext;
use crate::error::Result;
use crate::git::workspace::Workspace;
use crate::hooks::{HookPhase, HookRunner};
use crate::plan::RebasePlan;

/// Replay the carry set onto the source tip on a fresh local `rebase`
/// branch, running the pre-rebase, per-commit, and post-rebase hook
/// phases. With an empty carry set this still runs the pre- and
/// post-rebase phases, which is exactly the `--always-run-hooks` case.
pub async fn execute(
    ctx: &RunContext,
    workspace: &Workspace,
    plan: &RebasePlan,
    hooks: &mut HookRunner,
) -> Result<()> {
    let repo = &workspace.repo;

    repo.checkout_new_branch("rebase", workspace.source_tip)?;
    info!(
        "Created rebase branch at source tip {}",
        &workspace.source_tip.to_string()[..7]
    );

    hooks
        .run_phase(
            HookPhase::PreRebase,
            ctx.hooks.for_phase(HookPhase::PreRebase),
            repo,
            &[],
        )
        .await?;

    for carry in &plan.carries {
        hooks
            .run_phase(
                HookPhase::PreCarryCommit,
                ctx.hooks.for_phase(HookPhase::PreCarryCommit),
                repo,
                &[("REBASEBOT_COMMIT_SHA".to_string(), carry.sha.clone())],
            )
            .await?;

        info!("Cherry-picking {} {}", &carry.sha[..7], carry.subject);
        repo.cherry_pick(&carry.sha)?;
    }

    hooks
        .run_phase(
            HookPhase::PostRebase,
            ctx.hooks.for_phase(HookPhase::PostRebase),
            repo,
            &[],
        )
        .await?;

    Ok(())
}
