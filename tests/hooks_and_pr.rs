mod common;

use common::{open_pr, Fixture, MockGithub, DEST_REF, REBASE_REF, SOURCE_REF};
use rebasebot::context::RunOutcome;
use rebasebot::error::Error;
use rebasebot::hooks::HookOrigin;
use rebasebot::remote::{GithubRepo, Provider};
use rebasebot::run;

#[tokio::test]
async fn hooks_see_the_documented_environment() {
    let fixture = Fixture::new();
    fixture.commit("base", "README.md", "hello");
    fixture.push_source();
    fixture.commit("UPSTREAM: <carry>: patch", "carry.txt", "x");
    fixture.push_dest();

    let env_file = fixture.root.path().join("hook-env.txt");
    let script = fixture.hook_script(
        "env-dump",
        &format!(
            "printf '%s\\n' \"$REBASEBOT_SOURCE\" \"$REBASEBOT_DEST\" \"$REBASEBOT_REBASE\" \
             \"$REBASEBOT_GIT_USERNAME\" \"$REBASEBOT_GIT_EMAIL\" \"$REBASEBOT_WORKING_DIR\" \
             > {}",
            env_file.display()
        ),
    );

    let mut ctx = fixture.context();
    ctx.hooks.pre_rebase = vec![HookOrigin::Local(script)];

    let github = MockGithub::new();
    run::run(&ctx, &github, None).await.unwrap();

    let dumped = std::fs::read_to_string(&env_file).unwrap();
    let lines: Vec<&str> = dumped.lines().collect();
    assert_eq!(
        &lines[..5],
        &[SOURCE_REF, DEST_REF, REBASE_REF, "Rebase Bot", "bot@example.com"]
    );
    assert!(lines[5].ends_with("workdir/") || lines[5].ends_with("workdir"));
}

#[tokio::test]
async fn per_commit_hooks_see_the_commit_sha_and_run_in_order() {
    let fixture = Fixture::new();
    fixture.commit("base", "README.md", "hello");
    fixture.push_source();
    let first = fixture.commit("UPSTREAM: <carry>: one", "one.txt", "1");
    let second = fixture.commit("UPSTREAM: <carry>: two", "two.txt", "2");
    fixture.push_dest();

    let log_file = fixture.root.path().join("picked.txt");
    let script = fixture.hook_script(
        "sha-log",
        &format!("echo \"$REBASEBOT_COMMIT_SHA\" >> {}", log_file.display()),
    );

    let mut ctx = fixture.context();
    ctx.hooks.pre_carry_commit = vec![HookOrigin::Local(script)];

    let github = MockGithub::new();
    run::run(&ctx, &github, None).await.unwrap();

    let logged = std::fs::read_to_string(&log_file).unwrap();
    assert_eq!(logged.lines().collect::<Vec<_>>(), vec![first, second]);
}

#[tokio::test]
async fn hooks_within_a_phase_run_in_configuration_order() {
    let fixture = Fixture::new();
    fixture.commit("base", "README.md", "hello");
    fixture.push_source();
    fixture.commit("UPSTREAM: <carry>: patch", "carry.txt", "x");
    fixture.push_dest();

    let log_file = fixture.root.path().join("order.txt");
    let first = fixture.hook_script(
        "first",
        &format!("echo first >> {}", log_file.display()),
    );
    let second = fixture.hook_script(
        "second",
        &format!("echo second >> {}", log_file.display()),
    );

    let mut ctx = fixture.context();
    ctx.hooks.post_rebase = vec![HookOrigin::Local(first), HookOrigin::Local(second)];

    let github = MockGithub::new();
    run::run(&ctx, &github, None).await.unwrap();

    let logged = std::fs::read_to_string(&log_file).unwrap();
    assert_eq!(logged, "first\nsecond\n");
}

#[tokio::test]
async fn failing_post_rebase_hook_aborts_before_the_push() {
    let fixture = Fixture::new();
    fixture.commit("base", "README.md", "hello");
    fixture.push_source();
    fixture.commit("UPSTREAM: <carry>: patch", "carry.txt", "x");
    fixture.push_dest();

    let script = fixture.hook_script("fail", "echo generator exploded >&2\nexit 1");

    let mut ctx = fixture.context();
    ctx.hooks.post_rebase = vec![HookOrigin::Local(script)];

    let github = MockGithub::new();
    let err = run::run(&ctx, &github, None).await.unwrap_err();

    match &err {
        Error::Hook { code, stderr, .. } => {
            assert_eq!(*code, Some(1));
            assert!(stderr.contains("generator exploded"));
        }
        other => panic!("expected hook failure, got {other:?}"),
    }
    assert_eq!(err.exit_code(), 1);
    assert!(!fixture.branch_exists(&fixture.rebase_git, REBASE_REF));
    assert_eq!(github.mutation_count(), 0);
}

#[tokio::test]
async fn always_run_hooks_pushes_hook_commits_even_with_an_empty_carry_set() {
    let fixture = Fixture::new();
    fixture.commit("base", "README.md", "hello");
    fixture.push_source();
    fixture.push_dest();

    let marker = fixture.root.path().join("carry-hook-ran");
    let generator = fixture.hook_script(
        "regen",
        "echo generated > manifest.txt\ngit add manifest.txt\ngit commit -m 'regenerate manifest'",
    );
    let carry_probe = fixture.hook_script(
        "carry-probe",
        &format!("touch {}", marker.display()),
    );

    let mut ctx = fixture.context();
    ctx.always_run_hooks = true;
    ctx.hooks.post_rebase = vec![HookOrigin::Local(generator)];
    ctx.hooks.pre_carry_commit = vec![HookOrigin::Local(carry_probe)];

    let github = MockGithub::new();
    let outcome = run::run(&ctx, &github, None).await.unwrap();

    assert!(matches!(outcome, RunOutcome::PullRequestCreated { .. }));
    let subjects = fixture.branch_subjects(&fixture.rebase_git, REBASE_REF);
    assert_eq!(subjects[0], "regenerate manifest");
    // No commits were replayed, so the per-commit phase never fires.
    assert!(!marker.exists());
}

#[tokio::test]
async fn empty_carry_set_without_the_flag_skips_hooks_entirely() {
    let fixture = Fixture::new();
    fixture.commit("base", "README.md", "hello");
    fixture.push_source();
    fixture.push_dest();

    let marker = fixture.root.path().join("hook-ran");
    let probe = fixture.hook_script("probe", &format!("touch {}", marker.display()));

    let mut ctx = fixture.context();
    ctx.hooks.pre_rebase = vec![HookOrigin::Local(probe)];

    let github = MockGithub::new();
    let outcome = run::run(&ctx, &github, None).await.unwrap();

    assert_eq!(outcome, RunOutcome::NoChange);
    assert!(!marker.exists());
}

#[tokio::test]
async fn existing_bot_titled_pr_is_retitled_with_ticket_prefix_preserved() {
    let fixture = Fixture::new();
    let base = fixture.commit("base", "README.md", "hello");
    fixture.commit("UPSTREAM: <carry>: patch", "carry.txt", "x");
    fixture.push_dest();
    common::git(&["reset", "--hard", &base], &fixture.seed);
    let source_tip = fixture.commit("upstream feature", "up.txt", "v1");
    fixture.push_source();

    let stale_title = format!(
        "OCPBUGS-1234: Merge {} (0000000) into {DEST_REF}",
        fixture.source_url()
    );
    let github = MockGithub::new().with_open_pr(open_pr(41, &stale_title, &[]));

    let ctx = fixture.context();
    let outcome = run::run(&ctx, &github, None).await.unwrap();

    assert!(matches!(outcome, RunOutcome::PullRequestUpdated { number: 41, .. }));
    let updated = github.updated.lock().unwrap();
    assert_eq!(updated.len(), 1);
    assert_eq!(
        updated[0].1.as_deref(),
        Some(
            format!(
                "OCPBUGS-1234: Merge {} ({}) into {DEST_REF}",
                fixture.source_url(),
                &source_tip[..7]
            )
            .as_str()
        )
    );
}

#[tokio::test]
async fn hand_written_pr_titles_are_not_touched() {
    let fixture = Fixture::new();
    let base = fixture.commit("base", "README.md", "hello");
    fixture.commit("UPSTREAM: <carry>: patch", "carry.txt", "x");
    fixture.push_dest();
    common::git(&["reset", "--hard", &base], &fixture.seed);
    fixture.commit("upstream work", "up.txt", "v2");
    fixture.push_source();

    let github = MockGithub::new().with_open_pr(open_pr(42, "Hold my rebase", &[]));

    let ctx = fixture.context();
    run::run(&ctx, &github, None).await.unwrap();

    let updated = github.updated.lock().unwrap();
    assert_eq!(updated.len(), 1);
    assert_eq!(updated[0].1, None, "title must stay untouched");
    assert!(updated[0].2.contains("UPSTREAM: <carry>: patch"));
}

#[tokio::test]
async fn pre_create_pr_hook_runs_only_when_a_pr_is_created() {
    let fixture = Fixture::new();
    let base = fixture.commit("base", "README.md", "hello");
    fixture.commit("UPSTREAM: <carry>: patch", "carry.txt", "x");
    fixture.push_dest();
    common::git(&["reset", "--hard", &base], &fixture.seed);
    fixture.commit("upstream work", "up.txt", "v2");
    fixture.push_source();

    let marker = fixture.root.path().join("create-hook-ran");
    let probe = fixture.hook_script("probe", &format!("touch {}", marker.display()));

    let mut ctx = fixture.context();
    ctx.hooks.pre_create_pr = vec![HookOrigin::Local(probe)];

    // First run creates the PR: the hook fires.
    let github = MockGithub::new();
    run::run(&ctx, &github, None).await.unwrap();
    assert!(marker.exists());

    // Against an existing PR it must not fire again.
    std::fs::remove_file(&marker).unwrap();
    let created = github.created.lock().unwrap()[0].clone();
    let second = MockGithub::new().with_open_pr(created);
    run::run(&ctx, &second, None).await.unwrap();
    assert!(!marker.exists());
}

#[tokio::test]
async fn git_origin_hooks_resolve_from_a_configured_remote() {
    let fixture = Fixture::new();
    fixture.commit("base", "README.md", "hello");
    fixture.push_source();
    fixture.commit("UPSTREAM: <carry>: patch", "carry.txt", "x");
    std::fs::create_dir_all(fixture.seed.join("hooks")).unwrap();
    fixture.commit(
        "add repo hook",
        "hooks/mark.sh",
        "#!/bin/sh\necho hooked > \"$REBASEBOT_WORKING_DIR/hooked.txt\"\n",
    );
    fixture.push_dest();

    let mut ctx = fixture.context();
    ctx.hooks.post_rebase = vec![HookOrigin::parse(&format!(
        "git:dest/{DEST_REF}:hooks/mark.sh"
    ))
    .unwrap()];

    let github = MockGithub::new();
    run::run(&ctx, &github, None).await.unwrap();

    let marker = ctx.working_dir.join("hooked.txt");
    assert!(marker.exists(), "hook fetched from the dest remote must run");
}

#[tokio::test]
async fn art_pr_commits_are_folded_into_the_rebase_branch() {
    let fixture = Fixture::new();
    let base = fixture.commit("base", "README.md", "hello");
    fixture.push_source();
    fixture.commit("UPSTREAM: <carry>: patch", "carry.txt", "x");
    fixture.push_dest();

    // An open tooling-bump PR on the source repo, head published under
    // the usual pull ref.
    common::git(&["reset", "--hard", &base], &fixture.seed);
    fixture.commit("Updating builder images to go 1.22", "tooling.txt", "1.22");
    common::git(
        &[
            "push",
            &fixture.source_git.display().to_string(),
            "+HEAD:refs/pull/55/head",
        ],
        &fixture.seed,
    );

    let mut ctx = fixture.context();
    ctx.source.provider = Provider::Github;
    ctx.source.github = Some(GithubRepo {
        owner: "upstream".to_string(),
        name: "project".to_string(),
    });
    ctx.art_title_filter = Some(regex::Regex::new(r"^Updating builder images").unwrap());

    let mut art_pr = open_pr(55, "Updating builder images to go 1.22", &[]);
    art_pr.base_ref = SOURCE_REF.to_string();
    art_pr.head_ref = "art-bump".to_string();
    let source_github = MockGithub::new().with_open_pr(art_pr);

    let dest_github = MockGithub::new();
    run::run(&ctx, &dest_github, Some(&source_github)).await.unwrap();

    let subjects = fixture.branch_subjects(&fixture.rebase_git, REBASE_REF);
    assert!(subjects.contains(&"Updating builder images to go 1.22".to_string()));
    assert!(subjects.contains(&"UPSTREAM: <carry>: patch".to_string()));
}

#[tokio::test]
async fn art_phase_skips_quietly_when_nothing_matches() {
    let fixture = Fixture::new();
    let base = fixture.commit("base", "README.md", "hello");
    fixture.commit("UPSTREAM: <carry>: patch", "carry.txt", "x");
    fixture.push_dest();
    common::git(&["reset", "--hard", &base], &fixture.seed);
    fixture.commit("upstream work", "up.txt", "v2");
    fixture.push_source();

    let mut ctx = fixture.context();
    ctx.source.provider = Provider::Github;
    ctx.source.github = Some(GithubRepo {
        owner: "upstream".to_string(),
        name: "project".to_string(),
    });
    ctx.art_title_filter = Some(regex::Regex::new(r"^Updating builder images").unwrap());

    let source_github = MockGithub::new();
    let dest_github = MockGithub::new();
    let outcome = run::run(&ctx, &dest_github, Some(&source_github))
        .await
        .unwrap();

    assert!(matches!(outcome, RunOutcome::PullRequestCreated { .. }));
}
