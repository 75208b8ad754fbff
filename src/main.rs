use clap::Parser;
use log::{error, info, LevelFilter};
use simple_logger::SimpleLogger;

use rebasebot::cli::{self, Cli};
use rebasebot::github::GithubClient;
use rebasebot::notify::SlackNotifier;
use rebasebot::run;

#[tokio::main]
async fn main() {
    SimpleLogger::new()
        .with_utc_timestamps()
        .with_level(LevelFilter::Info)
        .init()
        .unwrap();

    let cli = Cli::parse();
    std::process::exit(run_to_exit_code(cli).await);
}

async fn run_to_exit_code(cli: Cli) -> i32 {
    let notifier = match SlackNotifier::from_webhook_file(cli.slack_webhook.as_deref()) {
        Ok(notifier) => notifier,
        Err(err) => {
            error!("{err}");
            return err.exit_code();
        }
    };

    let ctx = match cli::build_run_context(cli).await {
        Ok(ctx) => ctx,
        Err(err) => {
            error!("{err}");
            // Configuration problems abort before anything happened;
            // only operational failures are worth a notification.
            if err.exit_code() != 2 {
                notifier
                    .post(&format!("rebasebot: run failed: {err}"))
                    .await;
            }
            return err.exit_code();
        }
    };

    let github = GithubClient::new(ctx.auth.clone());

    match run::run(&ctx, &github, Some(&github)).await {
        Ok(outcome) => {
            let text = outcome.notification_text(&ctx);
            info!("{text}");
            notifier.post(&text).await;
            0
        }
        Err(err) => {
            error!("Run failed: {err}");
            notifier
                .post(&format!("rebasebot: run failed: {err}"))
                .await;
            err.exit_code()
        }
    }
}
