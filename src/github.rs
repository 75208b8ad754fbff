use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, warn};
use octocrab::params::State;
use octocrab::Octocrab;

use crate::auth::GithubAuth;
use crate::error::Result;
use crate::remote::GithubRepo;

/// The slice of a pull request the run consumes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullRequest {
    pub number: u64,
    pub title: String,
    pub body: String,
    pub head_ref: String,
    pub head_sha: String,
    pub base_ref: String,
    pub labels: Vec<String>,
    pub state: String,
    pub html_url: String,
}

/// Hosting-provider operations the engine consumes. Listing is
/// idempotent and retried on transient failures; create and update are
/// mutations and never retried.
#[async_trait]
pub trait Github {
    /// Open PRs on `repo`, optionally filtered by `head` (in
    /// `owner:ref` form) and `base`.
    async fn list_open_prs(
        &self,
        repo: &GithubRepo,
        head: Option<&str>,
        base: Option<&str>,
    ) -> Result<Vec<PullRequest>>;

    async fn create_pr(
        &self,
        repo: &GithubRepo,
        title: &str,
        head: &str,
        base: &str,
        body: &str,
    ) -> Result<PullRequest>;

    async fn update_pr(
        &self,
        repo: &GithubRepo,
        number: u64,
        title: Option<&str>,
        body: &str,
    ) -> Result<PullRequest>;
}

const MAX_LIST_ATTEMPTS: u32 = 3;

fn is_transient(err: &octocrab::Error) -> bool {
    match err {
        octocrab::Error::GitHub { source, .. } => source.status_code.is_server_error(),
        _ => false,
    }
}

fn backoff(attempt: u32) -> Duration {
    Duration::from_secs(1 << attempt)
}

pub struct GithubClient {
    auth: Arc<GithubAuth>,
}

impl GithubClient {
    pub fn new(auth: Arc<GithubAuth>) -> GithubClient {
        GithubClient { auth }
    }

    /// A fresh authorized client per operation; installation tokens
    /// rotate, so nothing is cached across calls.
    async fn client_for(&self, repo: &GithubRepo) -> Result<Octocrab> {
        self.auth.api_client(repo).await
    }

    async fn list_once(
        &self,
        repo: &GithubRepo,
        head: Option<&str>,
        base: Option<&str>,
    ) -> Result<Vec<PullRequest>> {
        let octocrab = self.client_for(repo).await?;
        let handler = octocrab.pulls(&repo.owner, &repo.name);

        let mut builder = handler.list().state(State::Open).per_page(100);
        if let Some(head) = head {
            builder = builder.head(head);
        }
        if let Some(base) = base {
            builder = builder.base(base);
        }

        let mut page = builder.send().await?;
        let mut all_prs: Vec<PullRequest> = page.items.iter().map(from_model).collect();

        while page.next.is_some() {
            match octocrab
                .get_page::<octocrab::models::pulls::PullRequest>(&page.next)
                .await?
            {
                Some(next_page) => {
                    all_prs.extend(next_page.items.iter().map(from_model));
                    page = next_page;
                }
                None => break,
            }
        }

        debug!(
            "{} open PRs on {} (head={head:?} base={base:?})",
            all_prs.len(),
            repo.full_name()
        );
        Ok(all_prs)
    }
}

#[async_trait]
impl Github for GithubClient {
    async fn list_open_prs(
        &self,
        repo: &GithubRepo,
        head: Option<&str>,
        base: Option<&str>,
    ) -> Result<Vec<PullRequest>> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.list_once(repo, head, base).await {
                Ok(prs) => return Ok(prs),
                Err(crate::error::Error::Provider(err))
                    if attempt < MAX_LIST_ATTEMPTS && is_transient(&err) =>
                {
                    warn!(
                        "Listing open PRs on {} failed (attempt {attempt}/{MAX_LIST_ATTEMPTS}): {err}. Retrying...",
                        repo.full_name()
                    );
                    tokio::time::sleep(backoff(attempt)).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn create_pr(
        &self,
        repo: &GithubRepo,
        title: &str,
        head: &str,
        base: &str,
        body: &str,
    ) -> Result<PullRequest> {
        let octocrab = self.client_for(repo).await?;
        let pr = octocrab
            .pulls(&repo.owner, &repo.name)
            .create(title, head, base)
            .body(body)
            .send()
            .await?;
        Ok(from_model(&pr))
    }

    async fn update_pr(
        &self,
        repo: &GithubRepo,
        number: u64,
        title: Option<&str>,
        body: &str,
    ) -> Result<PullRequest> {
        let octocrab = self.client_for(repo).await?;
        let handler = octocrab.pulls(&repo.owner, &repo.name);

        let mut builder = handler.update(number).body(body);
        if let Some(title) = title {
            builder = builder.title(title);
        }
        Ok(from_model(&builder.send().await?))
    }
}

fn from_model(pr: &octocrab::models::pulls::PullRequest) -> PullRequest {
    PullRequest {
        number: pr.number,
        title: pr.title.clone().unwrap_or_default(),
        body: pr.body.clone().unwrap_or_default(),
        head_ref: pr.head.ref_field.clone(),
        head_sha: pr.head.sha.clone(),
        base_ref: pr.base.ref_field.clone(),
        labels: pr
            .labels
            .clone()
            .unwrap_or_default()
            .into_iter()
            .map(|label| label.name)
            .collect(),
        state: match pr.state {
            Some(octocrab::models::IssueState::Open) => "open".to_string(),
            Some(octocrab::models::IssueState::Closed) => "closed".to_string(),
            _ => "unknown".to_string(),
        },
        html_url: pr
            .html_url
            .as_ref()
            .map(|url| url.to_string())
            .unwrap_or_default(),
    }
}
